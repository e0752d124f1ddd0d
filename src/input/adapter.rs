//! Input Adapter boundary
//!
//! The reactor pulls decoded events from an adapter whenever one of its
//! devices reports readiness. `next_event` must never block.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::os::unix::io::RawFd;
use std::rc::Rc;

use windowserver_ipc::InputEvent;

pub trait InputAdapter {
    /// Next decoded event, or `None` when nothing is pending
    fn next_event(&mut self) -> Option<InputEvent>;

    /// Descriptors of devices dropped since the last call. Their readiness
    /// watches should be removed.
    fn take_closed_fds(&mut self) -> Vec<RawFd> {
        Vec::new()
    }
}

/// In-memory adapter. Clones share one queue, so a producer can keep a clone
/// while the reactor owns another.
#[derive(Debug, Clone, Default)]
pub struct QueuedInput {
    queue: Rc<RefCell<VecDeque<InputEvent>>>,
}

impl QueuedInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: InputEvent) {
        self.queue.borrow_mut().push_back(event);
    }
}

impl InputAdapter for QueuedInput {
    fn next_event(&mut self) -> Option<InputEvent> {
        self.queue.borrow_mut().pop_front()
    }
}
