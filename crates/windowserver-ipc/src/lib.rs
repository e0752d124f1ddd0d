//! Window Server IPC Protocol
//!
//! Shared message types for the control channel between `windowserver` and
//! its client applications. Every message travels as a length-prefixed JSON
//! frame (see [`FramedMessage`]).

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Socket path for the server's service endpoint
pub fn socket_path() -> std::path::PathBuf {
    runtime_dir().join("windowserver.sock")
}

/// Per-user runtime directory (`$XDG_RUNTIME_DIR`, falling back to `/run/user/<uid>`)
pub fn runtime_dir() -> std::path::PathBuf {
    let runtime_dir = std::env::var("XDG_RUNTIME_DIR")
        .unwrap_or_else(|_| format!("/run/user/{}", unsafe { libc::getuid() }));
    std::path::PathBuf::from(runtime_dir)
}

/// Environment variable handed to spawned clients with the socket location
pub const SOCKET_ENV: &str = "WINDOWSERVER_SOCKET";

// ============================================================================
// Shared value types
// ============================================================================

/// Window state as seen on the wire and inside the server.
///
/// Maximization and minimization are discrete states, not independent flags,
/// so any state may move to any other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WindowState {
    #[default]
    Normal,
    MaxVertical,
    MaxHorizontal,
    Maximized,
    Minimized,
    Hidden,
}

impl WindowState {
    /// Minimized and hidden windows cannot hold focus or receive clicks
    pub fn is_visible(self) -> bool {
        !matches!(self, WindowState::Minimized | WindowState::Hidden)
    }
}

/// Rectangle as sent by clients. Sizes are signed so that negative values can
/// be rejected by the server instead of failing to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Geometry {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }
}

bitflags! {
    /// Keyboard modifier state attached to key events
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct Modifiers: u32 {
        const SHIFT = 1 << 0;
        const CTRL = 1 << 1;
        const ALT = 1 << 2;
        const SUPER = 1 << 3;
    }
}

/// Normalized input event, as produced by an input adapter and forwarded to
/// the focused client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InputEvent {
    /// A key changed state
    Key {
        keycode: u32,
        pressed: bool,
        #[serde(default)]
        modifiers: Modifiers,
    },

    /// The pointer moved to an absolute position
    PointerMotion { x: i32, y: i32 },

    /// A pointer button changed state at a position
    PointerButton {
        x: i32,
        y: i32,
        button: u32,
        pressed: bool,
    },

    /// Wheel or touchpad scroll at a position
    Scroll {
        x: i32,
        y: i32,
        delta_x: f64,
        delta_y: f64,
    },
}

impl InputEvent {
    /// Same event with its position shifted by `(-dx, -dy)`, saturating at
    /// the `i32` range
    pub fn translated(&self, dx: i32, dy: i32) -> Self {
        let mut event = self.clone();
        match &mut event {
            InputEvent::Key { .. } => {}
            InputEvent::PointerMotion { x, y }
            | InputEvent::PointerButton { x, y, .. }
            | InputEvent::Scroll { x, y, .. } => {
                *x = x.saturating_sub(dx);
                *y = y.saturating_sub(dy);
            }
        }
        event
    }
}

// ============================================================================
// Client → Server control messages
// ============================================================================

/// Kinds of control message the server understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    RegisterApplication,
    TeardownApplication,
    CreateWindow,
    SetWindowState,
    DestroyWindow,
    UpdateGeometry,
}

impl MessageKind {
    pub const ALL: [MessageKind; 6] = [
        MessageKind::RegisterApplication,
        MessageKind::TeardownApplication,
        MessageKind::CreateWindow,
        MessageKind::SetWindowState,
        MessageKind::DestroyWindow,
        MessageKind::UpdateGeometry,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::RegisterApplication => "register_application",
            MessageKind::TeardownApplication => "teardown_application",
            MessageKind::CreateWindow => "create_window",
            MessageKind::SetWindowState => "set_window_state",
            MessageKind::DestroyWindow => "destroy_window",
            MessageKind::UpdateGeometry => "update_geometry",
        }
    }

    pub fn parse(kind: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == kind)
    }
}

/// A control message as it appears on the wire.
///
/// `kind` stays a plain string so that unknown kinds decode successfully and
/// can be answered with [`ErrorCode::UnsupportedMessage`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlMessage {
    pub kind: String,
    pub application_id: String,
    /// Client-chosen value echoed back in the reply
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Geometry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<WindowState>,
}

impl ControlMessage {
    fn new(kind: MessageKind, application_id: &str) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            application_id: application_id.to_string(),
            serial: None,
            pid: None,
            window_id: None,
            geometry: None,
            state: None,
        }
    }

    pub fn register(application_id: &str, pid: u32) -> Self {
        Self {
            pid: Some(pid),
            ..Self::new(MessageKind::RegisterApplication, application_id)
        }
    }

    pub fn teardown(application_id: &str) -> Self {
        Self::new(MessageKind::TeardownApplication, application_id)
    }

    pub fn create_window(application_id: &str, geometry: Geometry) -> Self {
        Self {
            geometry: Some(geometry),
            ..Self::new(MessageKind::CreateWindow, application_id)
        }
    }

    pub fn set_window_state(application_id: &str, window_id: u64, state: WindowState) -> Self {
        Self {
            window_id: Some(window_id),
            state: Some(state),
            ..Self::new(MessageKind::SetWindowState, application_id)
        }
    }

    pub fn destroy_window(application_id: &str, window_id: u64) -> Self {
        Self {
            window_id: Some(window_id),
            ..Self::new(MessageKind::DestroyWindow, application_id)
        }
    }

    pub fn update_geometry(application_id: &str, window_id: u64, geometry: Geometry) -> Self {
        Self {
            window_id: Some(window_id),
            geometry: Some(geometry),
            ..Self::new(MessageKind::UpdateGeometry, application_id)
        }
    }

    /// Attach a serial for reply correlation
    pub fn with_serial(mut self, serial: u32) -> Self {
        self.serial = Some(serial);
        self
    }
}

// ============================================================================
// Server → Client messages
// ============================================================================

/// Reason attached to a negative acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    DuplicateApplication,
    UnknownApplication,
    UnknownWindow,
    UnsupportedMessage,
    MalformedMessage,
}

/// Messages sent from the server to a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// The request was applied (or was a no-op)
    Ack { serial: Option<u32> },

    /// The application was registered
    Registered {
        serial: Option<u32>,
        application_id: String,
    },

    /// A window was created for the application
    WindowCreated { serial: Option<u32>, window_id: u64 },

    /// The request was rejected; no state was changed
    Nak {
        serial: Option<u32>,
        code: ErrorCode,
        reason: String,
    },

    /// Input routed to one of the client's windows
    Input { window_id: u64, event: InputEvent },

    /// One of the client's windows gained or lost focus
    Focus { window_id: u64, focused: bool },
}

// ============================================================================
// Message Framing
// ============================================================================

/// Largest payload accepted on the control channel
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// A framed message with length prefix for reliable socket reads
#[derive(Debug)]
pub struct FramedMessage {
    pub data: Vec<u8>,
}

impl FramedMessage {
    /// Create a new framed message from serializable data
    pub fn new<T: Serialize>(msg: &T) -> anyhow::Result<Self> {
        let data = serde_json::to_vec(msg)?;
        Ok(Self { data })
    }

    /// Encode message with length prefix (4 bytes, big-endian)
    pub fn encode(&self) -> Vec<u8> {
        let len = self.data.len() as u32;
        let mut buf = Vec::with_capacity(4 + self.data.len());
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(&self.data);
        buf
    }

    /// Payload length announced by a 4-byte prefix, or `None` if it exceeds
    /// [`MAX_FRAME_LEN`]
    pub fn payload_len(prefix: [u8; 4]) -> Option<usize> {
        let len = u32::from_be_bytes(prefix) as usize;
        (len <= MAX_FRAME_LEN).then_some(len)
    }

    /// Decode a control message from bytes
    pub fn decode_control_message(data: &[u8]) -> anyhow::Result<ControlMessage> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Decode a server message from bytes
    pub fn decode_server_message(data: &[u8]) -> anyhow::Result<ServerMessage> {
        Ok(serde_json::from_slice(data)?)
    }
}
