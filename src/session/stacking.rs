//! Stacking Module
//!
//! Global window z-order. Index 0 is the bottom; the last entry is topmost.

use tracing::debug;

use super::WindowId;

#[derive(Debug, Default)]
pub struct StackingOrder {
    order: Vec<WindowId>,
}

impl StackingOrder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a new window on top
    pub fn add_window(&mut self, window: WindowId) {
        if !self.order.contains(&window) {
            self.order.push(window);
        }
    }

    pub fn remove_window(&mut self, window: WindowId) {
        self.order.retain(|&w| w != window);
    }

    /// Raise a window to the top. Unknown windows are ignored.
    pub fn raise_window(&mut self, window: WindowId) {
        if let Some(pos) = self.order.iter().position(|&w| w == window) {
            if pos + 1 != self.order.len() {
                let w = self.order.remove(pos);
                self.order.push(w);
                debug!("Raised window {}", window);
            }
        }
    }

    /// Topmost first
    pub fn top_down(&self) -> impl Iterator<Item = WindowId> + '_ {
        self.order.iter().rev().copied()
    }

    /// Bottom to top
    pub fn as_slice(&self) -> &[WindowId] {
        &self.order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raise_moves_to_top() {
        let mut stack = StackingOrder::new();
        for id in 1..=3 {
            stack.add_window(WindowId(id));
        }
        stack.raise_window(WindowId(1));
        assert_eq!(stack.as_slice(), &[WindowId(2), WindowId(3), WindowId(1)]);
        assert_eq!(stack.top_down().next(), Some(WindowId(1)));

        stack.raise_window(WindowId(42));
        stack.remove_window(WindowId(3));
        assert_eq!(stack.as_slice(), &[WindowId(2), WindowId(1)]);
    }
}
