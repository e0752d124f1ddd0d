//! Input Router
//!
//! Decides which window receives each input event. Pointer events may move
//! focus before routing (click-to-focus, or focus-follows-mouse on motion);
//! the event is then delivered to the focused application's endpoint,
//! tagged with the focused window and translated into its coordinates.

pub mod adapter;
pub mod evdev;

use tracing::{debug, warn};
use windowserver_ipc::{InputEvent, Modifiers, ServerMessage};

use crate::config::InputConfig;
use crate::session::{FocusPolicy, Registry, WindowId};

/// What happened to a routed event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Queued on the focused application's endpoint
    Delivered(WindowId),
    /// Focus was empty
    Discarded,
    /// Handled by the server itself (focus cycling)
    Consumed,
    /// The focused application's endpoint did not accept the event
    Undeliverable(WindowId),
}

pub struct InputRouter {
    policy: FocusPolicy,
    cycle_keycode: Option<u32>,
}

impl InputRouter {
    pub fn new(config: &InputConfig) -> Self {
        Self {
            policy: config.focus_mode,
            cycle_keycode: config.cycle_keycode,
        }
    }

    pub fn reconfigure(&mut self, config: &InputConfig) {
        self.policy = config.focus_mode;
        self.cycle_keycode = config.cycle_keycode;
    }

    pub fn route_input_event(&self, registry: &mut Registry, event: &InputEvent) -> RouteOutcome {
        match *event {
            InputEvent::PointerButton { x, y, pressed: true, .. } => {
                self.focus_under_pointer(registry, x, y);
            }
            InputEvent::PointerMotion { x, y } if self.policy == FocusPolicy::FocusFollowsMouse => {
                self.focus_under_pointer(registry, x, y);
            }
            InputEvent::Key { keycode, pressed, modifiers }
                if Some(keycode) == self.cycle_keycode && modifiers.contains(Modifiers::ALT) =>
            {
                if pressed {
                    match registry.focus_next() {
                        Some(window) => debug!("Cycled focus to window {}", window),
                        None => debug!("No window to cycle focus to"),
                    }
                }
                return RouteOutcome::Consumed;
            }
            _ => {}
        }

        let Some(window) = registry.focus().map(|f| f.window) else {
            debug!("No focus, discarding {:?}", event);
            return RouteOutcome::Discarded;
        };
        let (Some(app), Some(record)) = (registry.focused_app(), registry.window(window)) else {
            return RouteOutcome::Discarded;
        };

        let origin = record.geometry();
        let msg = ServerMessage::Input {
            window_id: window.0,
            event: event.translated(origin.x, origin.y),
        };
        if app.endpoint().send(msg) {
            RouteOutcome::Delivered(window)
        } else {
            warn!("Input for window {} of {} not delivered", window, app.id());
            RouteOutcome::Undeliverable(window)
        }
    }

    /// Focus the topmost focusable window under the pointer. Empty desktop
    /// leaves focus where it was.
    fn focus_under_pointer(&self, registry: &mut Registry, x: i32, y: i32) {
        let Some(window) = registry.window_at(x, y) else {
            return;
        };
        if registry.focus().is_some_and(|f| f.window == window) {
            return;
        }
        if let Err(e) = registry.focus_window(window) {
            warn!("Failed to focus window {}: {}", window, e);
        }
    }
}
