//! Window geometry and state as stored by the server
//!
//! Wire geometry is validated into a [`Rect`] before it reaches the registry,
//! so a `Rect` never has a negative size.

use windowserver_ipc::Geometry as WireGeometry;

pub use windowserver_ipc::WindowState;

/// Rectangle in the server's logical coordinate space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Validate client-supplied geometry. Fails with the offending field when
    /// the size is negative.
    pub fn from_wire(geometry: WireGeometry) -> Result<Self, String> {
        let width = u32::try_from(geometry.width)
            .map_err(|_| format!("negative width {}", geometry.width))?;
        let height = u32::try_from(geometry.height)
            .map_err(|_| format!("negative height {}", geometry.height))?;
        Ok(Self::new(geometry.x, geometry.y, width, height))
    }

    /// Half-open containment: the right and bottom edges are outside
    pub fn contains(&self, x: i32, y: i32) -> bool {
        let (x, y) = (i64::from(x), i64::from(y));
        let left = i64::from(self.x);
        let top = i64::from(self.y);
        x >= left
            && y >= top
            && x < left + i64::from(self.width)
            && y < top + i64::from(self.height)
    }

    /// Geometry a window in `state` occupies on `display`, given the geometry
    /// it would have in the normal state.
    pub fn for_state(base: Rect, state: WindowState, display: Rect) -> Rect {
        match state {
            WindowState::MaxVertical => Rect { y: display.y, height: display.height, ..base },
            WindowState::MaxHorizontal => Rect { x: display.x, width: display.width, ..base },
            WindowState::Maximized => display,
            WindowState::Normal | WindowState::Minimized | WindowState::Hidden => base,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_size_rejected() {
        assert!(Rect::from_wire(WireGeometry::new(0, 0, -1, 10)).is_err());
        assert!(Rect::from_wire(WireGeometry::new(0, 0, 10, -1)).is_err());
        assert_eq!(
            Rect::from_wire(WireGeometry::new(-5, 3, 0, 0)),
            Ok(Rect::new(-5, 3, 0, 0))
        );
    }

    #[test]
    fn test_contains_is_half_open() {
        let rect = Rect::new(0, 0, 800, 600);
        assert!(rect.contains(0, 0));
        assert!(rect.contains(799, 599));
        assert!(!rect.contains(800, 10));
        assert!(!rect.contains(10, -1));
        assert!(!Rect::new(5, 5, 0, 0).contains(5, 5));
    }

    #[test]
    fn test_maximized_layouts() {
        let display = Rect::new(0, 0, 1920, 1080);
        let base = Rect::new(100, 50, 640, 480);

        assert_eq!(Rect::for_state(base, WindowState::MaxVertical, display), Rect::new(100, 0, 640, 1080));
        assert_eq!(Rect::for_state(base, WindowState::MaxHorizontal, display), Rect::new(0, 50, 1920, 480));
        assert_eq!(Rect::for_state(base, WindowState::Maximized, display), display);
        assert_eq!(Rect::for_state(base, WindowState::Minimized, display), base);
    }
}
