//! Surface Provider boundary
//!
//! The provider owns graphics memory. The registry only holds [`SurfaceRef`]s,
//! which are neither `Clone` nor `Copy`: releasing one consumes it, so a
//! reference cannot be released twice or used after its window is destroyed.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::session::WindowId;
use crate::shared::window_state::Rect;

/// Handle to a drawable surface owned by a [`SurfaceProvider`]
#[derive(Debug, PartialEq, Eq)]
pub struct SurfaceRef {
    id: u64,
}

impl SurfaceRef {
    pub fn new(id: u64) -> Self {
        Self { id }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Exposes the drawable surface geometry and hands out per-window surfaces
pub trait SurfaceProvider {
    /// Geometry of the whole drawable area
    fn current_geometry(&self) -> Rect;

    fn acquire_surface_ref(&mut self, window: WindowId) -> SurfaceRef;

    fn release_surface_ref(&mut self, surface: SurfaceRef);
}

/// Shared view of the references a [`HeadlessSurfaces`] has handed out
#[derive(Debug, Clone, Default)]
pub struct SurfaceLedger {
    live: Rc<RefCell<HashMap<u64, WindowId>>>,
}

impl SurfaceLedger {
    pub fn live_count(&self) -> usize {
        self.live.borrow().len()
    }

    pub fn owner(&self, surface: u64) -> Option<WindowId> {
        self.live.borrow().get(&surface).copied()
    }
}

/// Provider without graphics memory, used when no framebuffer is attached
pub struct HeadlessSurfaces {
    geometry: Rect,
    next_id: u64,
    ledger: SurfaceLedger,
}

impl HeadlessSurfaces {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            geometry: Rect::new(0, 0, width, height),
            next_id: 1,
            ledger: SurfaceLedger::default(),
        }
    }

    pub fn ledger(&self) -> SurfaceLedger {
        self.ledger.clone()
    }
}

impl SurfaceProvider for HeadlessSurfaces {
    fn current_geometry(&self) -> Rect {
        self.geometry
    }

    fn acquire_surface_ref(&mut self, window: WindowId) -> SurfaceRef {
        let id = self.next_id;
        self.next_id += 1;
        self.ledger.live.borrow_mut().insert(id, window);
        debug!("Surface {} acquired for window {}", id, window);
        SurfaceRef::new(id)
    }

    fn release_surface_ref(&mut self, surface: SurfaceRef) {
        match self.ledger.live.borrow_mut().remove(&surface.id) {
            Some(window) => debug!("Surface {} of window {} released", surface.id, window),
            None => warn!("Release of unknown surface {}", surface.id),
        }
    }
}
