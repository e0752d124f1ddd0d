//! Session Registry
//!
//! Authoritative store of the applications connected to this session and the
//! windows they own, plus the stacking order and the focus pair. Only the
//! reactor thread mutates it.
//!
//! Windows live inside their [`AppRecord`], so removing an application removes
//! its windows with it. Every path that removes a window also drops it from
//! the stacking order, clears focus if it pointed there, and hands the surface
//! reference back to the provider.

mod app;
mod focus;
mod stacking;
mod window;

use std::collections::HashMap;

use tracing::{debug, info};

pub use app::{AppHandle, AppRecord, ConnectionId, Endpoint};
pub use focus::{FocusPolicy, FocusTarget};
pub use window::{WindowId, WindowRecord};

use crate::error::{Result, ServerError};
use crate::shared::window_state::{Rect, WindowState};
use crate::surface::SurfaceProvider;
use focus::FocusState;
use stacking::StackingOrder;

/// Registry-level focus behavior, taken from the `[input]` config section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FocusOptions {
    /// Raise a window to the top of the stacking order when it gains focus
    pub raise_on_focus: bool,
    /// Give a new window focus when nothing else holds it
    pub focus_new_windows: bool,
}

impl Default for FocusOptions {
    fn default() -> Self {
        Self {
            raise_on_focus: true,
            focus_new_windows: false,
        }
    }
}

pub struct Registry {
    apps: HashMap<String, AppRecord>,
    /// Window handle -> owning application id
    owners: HashMap<WindowId, String>,
    stacking: StackingOrder,
    focus: FocusState,
    options: FocusOptions,
    surfaces: Box<dyn SurfaceProvider>,
    next_app: u64,
    next_window: u64,
}

impl Registry {
    pub fn new(surfaces: Box<dyn SurfaceProvider>) -> Self {
        Self {
            apps: HashMap::new(),
            owners: HashMap::new(),
            stacking: StackingOrder::new(),
            focus: FocusState::default(),
            options: FocusOptions::default(),
            surfaces,
            next_app: 1,
            next_window: 1,
        }
    }

    pub fn set_focus_options(&mut self, options: FocusOptions) {
        self.options = options;
    }

    /// Geometry of the drawable area, from the surface provider
    pub fn display_geometry(&self) -> Rect {
        self.surfaces.current_geometry()
    }

    // ========================================================================
    // Applications
    // ========================================================================

    pub fn register_application(&mut self, id: &str, pid: u32, endpoint: Endpoint) -> Result<AppHandle> {
        if self.apps.contains_key(id) {
            return Err(ServerError::DuplicateApplication(id.to_string()));
        }

        let handle = AppHandle(self.next_app);
        self.next_app += 1;
        self.apps
            .insert(id.to_string(), AppRecord::new(handle, id, pid, endpoint));

        info!("Registered application {} (pid {})", id, pid);
        Ok(handle)
    }

    /// Remove an application and all of its windows. Returns `false` (and
    /// does nothing) if it was not registered.
    pub fn unregister_application(&mut self, id: &str) -> bool {
        let Some(app) = self.apps.remove(id) else {
            debug!("Teardown of unregistered application {} ignored", id);
            return false;
        };

        self.focus.clear_if_app(id);
        let windows = app.into_windows();
        let count = windows.len();
        for window in windows {
            self.forget_window(window);
        }

        info!("Unregistered application {} ({} windows)", id, count);
        true
    }

    pub fn app(&self, id: &str) -> Option<&AppRecord> {
        self.apps.get(id)
    }

    pub fn app_count(&self) -> usize {
        self.apps.len()
    }

    /// Ids of registered applications, in registration order
    pub fn app_ids(&self) -> Vec<String> {
        self.sorted_ids(|_| true)
    }

    /// Applications whose client process is `pid`
    pub fn apps_with_pid(&self, pid: u32) -> Vec<String> {
        self.sorted_ids(|app| app.pid() == pid)
    }

    /// Applications registered over `connection`
    pub fn apps_on_connection(&self, connection: ConnectionId) -> Vec<String> {
        self.sorted_ids(|app| app.endpoint().connection() == connection)
    }

    fn sorted_ids(&self, keep: impl Fn(&AppRecord) -> bool) -> Vec<String> {
        let mut apps: Vec<&AppRecord> = self.apps.values().filter(|a| keep(a)).collect();
        apps.sort_by_key(|a| a.handle());
        apps.into_iter().map(|a| a.id().to_string()).collect()
    }

    // ========================================================================
    // Windows
    // ========================================================================

    pub fn create_window(&mut self, app_id: &str, geometry: Rect) -> Result<WindowId> {
        if !self.apps.contains_key(app_id) {
            return Err(ServerError::UnknownApplication(app_id.to_string()));
        }

        let id = WindowId(self.next_window);
        self.next_window += 1;
        let surface = self.surfaces.acquire_surface_ref(id);

        if let Some(app) = self.apps.get_mut(app_id) {
            app.push_window(WindowRecord::new(id, surface, geometry));
        }
        self.owners.insert(id, app_id.to_string());
        self.stacking.add_window(id);
        debug!("Created window {} for {} at {:?}", id, app_id, geometry);

        if self.options.focus_new_windows && self.focus.get().is_none() {
            self.focus_window(id)?;
        }
        Ok(id)
    }

    /// Move a window to `state`. Returns whether anything changed; entering a
    /// state that cannot hold focus clears focus from the window.
    pub fn set_window_state(&mut self, window: WindowId, state: WindowState) -> Result<bool> {
        let display = self.display_geometry();
        let record = self.window_mut(window)?;
        let changed = record.set_state(state, display);

        if changed {
            debug!("Window {} is now {:?}", window, state);
            if !state.is_visible() && self.focus.clear_if_window(window) {
                debug!("Window {} lost focus on {:?}", window, state);
            }
        }
        Ok(changed)
    }

    pub fn set_window_geometry(&mut self, window: WindowId, geometry: Rect) -> Result<()> {
        let display = self.display_geometry();
        self.window_mut(window)?.set_geometry(geometry, display);
        debug!("Window {} geometry set to {:?}", window, geometry);
        Ok(())
    }

    /// Remove a window. Returns `false` (and does nothing) if it is unknown.
    pub fn destroy_window(&mut self, window: WindowId) -> bool {
        let Some(owner) = self.owners.get(&window).cloned() else {
            debug!("Destroy of unknown window {} ignored", window);
            return false;
        };
        let Some(record) = self.apps.get_mut(&owner).and_then(|app| app.take_window(window)) else {
            self.owners.remove(&window);
            return false;
        };

        self.forget_window(record);
        debug!("Destroyed window {} of {}", window, owner);
        true
    }

    pub fn window(&self, window: WindowId) -> Option<&WindowRecord> {
        let owner = self.owners.get(&window)?;
        self.apps.get(owner)?.window(window)
    }

    /// Id of the application owning `window`
    pub fn owner_of(&self, window: WindowId) -> Option<&str> {
        self.owners.get(&window).map(String::as_str)
    }

    pub fn window_count(&self) -> usize {
        self.owners.len()
    }

    /// Bottom to top
    pub fn stacking_order(&self) -> &[WindowId] {
        self.stacking.as_slice()
    }

    fn window_mut(&mut self, window: WindowId) -> Result<&mut WindowRecord> {
        let owner = self
            .owners
            .get(&window)
            .ok_or(ServerError::UnknownWindow(window))?;
        self.apps
            .get_mut(owner)
            .and_then(|app| app.window_mut(window))
            .ok_or(ServerError::UnknownWindow(window))
    }

    /// Drop every index entry for a record that has already been detached
    /// from its application, then release its surface.
    fn forget_window(&mut self, record: WindowRecord) {
        let id = record.id();
        self.owners.remove(&id);
        self.stacking.remove_window(id);
        self.focus.clear_if_window(id);
        self.surfaces.release_surface_ref(record.into_surface());
    }

    // ========================================================================
    // Focus
    // ========================================================================

    /// The focused application and window, if any
    pub fn lookup_focus_target(&self) -> Option<(AppHandle, WindowId)> {
        let focus = self.focus.get()?;
        let app = self.apps.get(&focus.app_id)?;
        Some((app.handle(), focus.window))
    }

    pub fn focus(&self) -> Option<&FocusTarget> {
        self.focus.get()
    }

    pub fn focused_app(&self) -> Option<&AppRecord> {
        self.apps.get(&self.focus.get()?.app_id)
    }

    /// Focus `window`. Returns `Ok(false)` if the window is minimized or
    /// hidden and therefore cannot take focus.
    pub fn focus_window(&mut self, window: WindowId) -> Result<bool> {
        let record = self.window(window).ok_or(ServerError::UnknownWindow(window))?;
        if !record.is_focusable() {
            debug!("Window {} is {:?}, not focusing", window, record.state());
            return Ok(false);
        }

        let owner = self
            .owners
            .get(&window)
            .cloned()
            .ok_or(ServerError::UnknownWindow(window))?;
        self.focus.set(&owner, window);
        if self.options.raise_on_focus {
            self.stacking.raise_window(window);
        }
        debug!("Focused window {} of {}", window, owner);
        Ok(true)
    }

    pub fn clear_focus(&mut self) {
        if let Some(old) = self.focus.clear() {
            debug!("Cleared focus from window {}", old.window);
        }
    }

    /// Topmost focusable window containing the point
    pub fn window_at(&self, x: i32, y: i32) -> Option<WindowId> {
        self.stacking.top_down().find(|&id| {
            self.window(id)
                .is_some_and(|w| w.is_focusable() && w.geometry().contains(x, y))
        })
    }

    /// Focus the next focusable window in stacking order, wrapping from the
    /// top back to the bottom.
    pub fn focus_next(&mut self) -> Option<WindowId> {
        let candidates: Vec<WindowId> = self
            .stacking
            .as_slice()
            .iter()
            .copied()
            .filter(|&id| self.window(id).is_some_and(WindowRecord::is_focusable))
            .collect();
        if candidates.is_empty() {
            return None;
        }

        let next = match self.focus.focused_window() {
            Some(current) => match candidates.iter().position(|&w| w == current) {
                Some(pos) => candidates[(pos + 1) % candidates.len()],
                None => candidates[0],
            },
            None => candidates[0],
        };

        match self.focus_window(next) {
            Ok(true) => Some(next),
            _ => None,
        }
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Tear down every application. Returns how many were removed.
    pub fn clear(&mut self) -> usize {
        let ids = self.app_ids();
        for id in &ids {
            self.unregister_application(id);
        }
        ids.len()
    }

    /// Panics if any index disagrees with the records.
    #[cfg(test)]
    pub fn assert_consistent(&self) {
        let mut seen = 0;
        for (id, app) in &self.apps {
            assert_eq!(app.id(), id);
            for window in app.windows() {
                seen += 1;
                assert_eq!(self.owners.get(&window.id()), Some(id), "owner index for {}", window.id());
                assert!(self.stacking.as_slice().contains(&window.id()));
            }
        }
        assert_eq!(seen, self.owners.len(), "owner index has stale entries");
        assert_eq!(seen, self.stacking.as_slice().len(), "stacking has stale entries");

        if let Some(focus) = self.focus.get() {
            let window = self.window(focus.window).expect("focus points at a live window");
            assert_eq!(self.owner_of(focus.window), Some(focus.app_id.as_str()));
            assert!(window.is_focusable());
        }
    }
}
