//! Focus Module
//!
//! Holds the focused application/window pair and the focus policy. The pair
//! is stored as live keys; the registry clears it whenever the record it
//! names goes away.

use serde::{Deserialize, Serialize};

use super::WindowId;

/// Focus policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusPolicy {
    /// A button press focuses the window under the pointer
    #[default]
    ClickToFocus,
    /// Moving the pointer over a window focuses it
    FocusFollowsMouse,
}

/// The currently focused application and window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FocusTarget {
    pub app_id: String,
    pub window: WindowId,
}

#[derive(Debug, Default)]
pub struct FocusState {
    current: Option<FocusTarget>,
}

impl FocusState {
    pub fn get(&self) -> Option<&FocusTarget> {
        self.current.as_ref()
    }

    pub fn focused_window(&self) -> Option<WindowId> {
        self.current.as_ref().map(|f| f.window)
    }

    pub fn set(&mut self, app_id: &str, window: WindowId) {
        self.current = Some(FocusTarget {
            app_id: app_id.to_string(),
            window,
        });
    }

    pub fn clear(&mut self) -> Option<FocusTarget> {
        self.current.take()
    }

    /// Clear focus if it points at `window`
    pub fn clear_if_window(&mut self, window: WindowId) -> bool {
        if self.focused_window() == Some(window) {
            self.current = None;
            return true;
        }
        false
    }

    /// Clear focus if it points into `app_id`
    pub fn clear_if_app(&mut self, app_id: &str) -> bool {
        if self.current.as_ref().is_some_and(|f| f.app_id == app_id) {
            self.current = None;
            return true;
        }
        false
    }
}
