//! Application records and their communication endpoints

use std::fmt;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use windowserver_ipc::ServerMessage;

use super::{WindowId, WindowRecord};

/// Identifies one control-channel connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where messages for a client go. Sending never blocks: a full queue drops
/// the message.
#[derive(Debug, Clone)]
pub struct Endpoint {
    connection: ConnectionId,
    tx: mpsc::Sender<ServerMessage>,
}

impl Endpoint {
    pub fn new(connection: ConnectionId, tx: mpsc::Sender<ServerMessage>) -> Self {
        Self { connection, tx }
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Queue a message for the client. Returns `false` if it was dropped.
    pub fn send(&self, msg: ServerMessage) -> bool {
        match self.tx.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(msg)) => {
                warn!("Connection {} queue full, dropping {:?}", self.connection, msg);
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Connection {} already closed", self.connection);
                false
            }
        }
    }
}

/// Stable handle returned by registration. A re-registered application id
/// gets a new handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AppHandle(pub u64);

/// One connected client application
#[derive(Debug)]
pub struct AppRecord {
    handle: AppHandle,
    id: String,
    pid: u32,
    endpoint: Endpoint,

    /// Windows in creation order
    windows: Vec<WindowRecord>,
}

impl AppRecord {
    pub(super) fn new(handle: AppHandle, id: &str, pid: u32, endpoint: Endpoint) -> Self {
        Self {
            handle,
            id: id.to_string(),
            pid,
            endpoint,
            windows: Vec::new(),
        }
    }

    pub fn handle(&self) -> AppHandle {
        self.handle
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn windows(&self) -> &[WindowRecord] {
        &self.windows
    }

    pub(super) fn push_window(&mut self, window: WindowRecord) {
        self.windows.push(window);
    }

    pub(super) fn window(&self, id: WindowId) -> Option<&WindowRecord> {
        self.windows.iter().find(|w| w.id() == id)
    }

    pub(super) fn window_mut(&mut self, id: WindowId) -> Option<&mut WindowRecord> {
        self.windows.iter_mut().find(|w| w.id() == id)
    }

    pub(super) fn take_window(&mut self, id: WindowId) -> Option<WindowRecord> {
        let pos = self.windows.iter().position(|w| w.id() == id)?;
        Some(self.windows.remove(pos))
    }

    pub(super) fn into_windows(self) -> Vec<WindowRecord> {
        self.windows
    }
}
