//! Window records
//!
//! A window is always stored inside its owning [`AppRecord`](super::AppRecord),
//! so it cannot outlive the application.

use std::fmt;

use crate::shared::window_state::{Rect, WindowState};
use crate::surface::SurfaceRef;

/// Server-assigned window handle, never reused within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(pub u64);

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A top-level window owned by an application
#[derive(Debug)]
pub struct WindowRecord {
    id: WindowId,

    /// Backing surface, owned by the surface provider
    surface: SurfaceRef,

    state: WindowState,

    /// Geometry the window has in the normal state
    normal: Rect,

    /// Geometry the window currently occupies
    geometry: Rect,
}

impl WindowRecord {
    pub(super) fn new(id: WindowId, surface: SurfaceRef, geometry: Rect) -> Self {
        Self {
            id,
            surface,
            state: WindowState::Normal,
            normal: geometry,
            geometry,
        }
    }

    pub fn id(&self) -> WindowId {
        self.id
    }

    pub fn surface(&self) -> &SurfaceRef {
        &self.surface
    }

    pub fn state(&self) -> WindowState {
        self.state
    }

    pub fn geometry(&self) -> Rect {
        self.geometry
    }

    /// Minimized and hidden windows cannot take focus
    pub fn is_focusable(&self) -> bool {
        self.state.is_visible()
    }

    /// Apply a state transition. Returns `false` when `state` is already
    /// current.
    pub(super) fn set_state(&mut self, state: WindowState, display: Rect) -> bool {
        if self.state == state {
            return false;
        }
        self.state = state;
        self.geometry = Rect::for_state(self.normal, state, display);
        true
    }

    /// Replace the normal-state geometry. A maximized window keeps its
    /// maximized extent along the maximized axes.
    pub(super) fn set_geometry(&mut self, geometry: Rect, display: Rect) {
        self.normal = geometry;
        self.geometry = Rect::for_state(geometry, self.state, display);
    }

    pub(super) fn into_surface(self) -> SurfaceRef {
        self.surface
    }
}
