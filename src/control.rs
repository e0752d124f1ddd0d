//! Control-Message Handler
//!
//! Turns a control-channel payload into a validated [`Command`] and applies it
//! to the registry. Validation runs against the current registry before
//! anything is mutated, so a rejected message leaves no partial change behind.
//! Every message gets exactly one reply on the sender's endpoint.

use tracing::{debug, warn};
use windowserver_ipc::{ControlMessage, FramedMessage, MessageKind, ServerMessage};

use crate::error::{Result, ServerError};
use crate::session::{Endpoint, Registry, WindowId};
use crate::shared::window_state::{Rect, WindowState};

/// A control message that passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    RegisterApplication { id: String, pid: u32 },
    TeardownApplication { id: String },
    CreateWindow { app_id: String, geometry: Rect },
    SetWindowState { window: WindowId, state: WindowState },
    DestroyWindow { window: WindowId },
    UpdateGeometry { window: WindowId, geometry: Rect },
}

pub fn decode(payload: &[u8]) -> Result<ControlMessage> {
    FramedMessage::decode_control_message(payload)
        .map_err(|e| ServerError::MalformedMessage(e.to_string()))
}

/// Check a decoded message against the registry without changing it
pub fn validate(msg: &ControlMessage, registry: &Registry) -> Result<Command> {
    let kind = MessageKind::parse(&msg.kind)
        .ok_or_else(|| ServerError::UnsupportedMessage(msg.kind.clone()))?;
    let app_id = msg.application_id.as_str();
    if app_id.is_empty() {
        return Err(ServerError::MalformedMessage("empty application_id".into()));
    }

    let command = match kind {
        MessageKind::RegisterApplication => {
            let pid = msg.pid.ok_or_else(|| missing("pid"))?;
            if registry.app(app_id).is_some() {
                return Err(ServerError::DuplicateApplication(app_id.to_string()));
            }
            Command::RegisterApplication { id: app_id.to_string(), pid }
        }
        MessageKind::TeardownApplication => Command::TeardownApplication { id: app_id.to_string() },
        MessageKind::CreateWindow => {
            let geometry = geometry(msg)?;
            known_app(registry, app_id)?;
            Command::CreateWindow { app_id: app_id.to_string(), geometry }
        }
        MessageKind::SetWindowState => {
            let state = msg.state.ok_or_else(|| missing("state"))?;
            let window = window_id(msg)?;
            known_app(registry, app_id)?;
            owned_window(registry, app_id, window)?;
            Command::SetWindowState { window, state }
        }
        MessageKind::DestroyWindow => {
            let window = window_id(msg)?;
            known_app(registry, app_id)?;
            // Absent windows are a no-op; someone else's window is not.
            if registry.owner_of(window).is_some_and(|owner| owner != app_id) {
                return Err(ServerError::UnknownWindow(window));
            }
            Command::DestroyWindow { window }
        }
        MessageKind::UpdateGeometry => {
            let geometry = geometry(msg)?;
            let window = window_id(msg)?;
            known_app(registry, app_id)?;
            owned_window(registry, app_id, window)?;
            Command::UpdateGeometry { window, geometry }
        }
    };
    Ok(command)
}

/// Apply a validated command. Returns the reply for the sender.
pub fn apply(
    command: &Command,
    registry: &mut Registry,
    endpoint: &Endpoint,
    serial: Option<u32>,
) -> Result<ServerMessage> {
    let reply = match command {
        Command::RegisterApplication { id, pid } => {
            registry.register_application(id, *pid, endpoint.clone())?;
            ServerMessage::Registered { serial, application_id: id.clone() }
        }
        Command::TeardownApplication { id } => {
            registry.unregister_application(id);
            ServerMessage::Ack { serial }
        }
        Command::CreateWindow { app_id, geometry } => {
            let window = registry.create_window(app_id, *geometry)?;
            ServerMessage::WindowCreated { serial, window_id: window.0 }
        }
        Command::SetWindowState { window, state } => {
            registry.set_window_state(*window, *state)?;
            ServerMessage::Ack { serial }
        }
        Command::DestroyWindow { window } => {
            registry.destroy_window(*window);
            ServerMessage::Ack { serial }
        }
        Command::UpdateGeometry { window, geometry } => {
            registry.set_window_geometry(*window, *geometry)?;
            ServerMessage::Ack { serial }
        }
    };
    Ok(reply)
}

/// Decode, validate, and apply one payload from `endpoint`, answering with an
/// acknowledgement or a NAK. The error is returned for logging only; the
/// connection stays open either way.
pub fn handle_message(registry: &mut Registry, endpoint: &Endpoint, payload: &[u8]) -> Result<Command> {
    let mut serial = None;
    let result = decode(payload).and_then(|msg| {
        serial = msg.serial;
        debug!("Control message from {}: {:?}", endpoint.connection(), msg);
        let command = validate(&msg, registry)?;
        let reply = apply(&command, registry, endpoint, serial)?;
        Ok((command, reply))
    });

    match result {
        Ok((command, reply)) => {
            endpoint.send(reply);
            Ok(command)
        }
        Err(e) => {
            warn!("Dropped control message from {}: {}", endpoint.connection(), e);
            endpoint.send(ServerMessage::Nak {
                serial,
                code: e.code(),
                reason: e.to_string(),
            });
            Err(e)
        }
    }
}

fn missing(field: &str) -> ServerError {
    ServerError::MalformedMessage(format!("missing {}", field))
}

fn window_id(msg: &ControlMessage) -> Result<WindowId> {
    msg.window_id.map(WindowId).ok_or_else(|| missing("window_id"))
}

fn geometry(msg: &ControlMessage) -> Result<Rect> {
    let geometry = msg.geometry.ok_or_else(|| missing("geometry"))?;
    Rect::from_wire(geometry).map_err(ServerError::MalformedMessage)
}

fn known_app(registry: &Registry, app_id: &str) -> Result<()> {
    match registry.app(app_id) {
        Some(_) => Ok(()),
        None => Err(ServerError::UnknownApplication(app_id.to_string())),
    }
}

fn owned_window(registry: &Registry, app_id: &str, window: WindowId) -> Result<()> {
    match registry.owner_of(window) {
        Some(owner) if owner == app_id => Ok(()),
        _ => Err(ServerError::UnknownWindow(window)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ConnectionId;
    use crate::surface::HeadlessSurfaces;
    use tokio::sync::mpsc;
    use windowserver_ipc::{ErrorCode, Geometry};

    fn setup() -> (Registry, Endpoint, mpsc::Receiver<ServerMessage>) {
        let reg = Registry::new(Box::new(HeadlessSurfaces::new(1920, 1080)));
        let (tx, rx) = mpsc::channel(16);
        (reg, Endpoint::new(ConnectionId(1), tx), rx)
    }

    fn send(reg: &mut Registry, ep: &Endpoint, msg: &ControlMessage) -> Result<Command> {
        let payload = serde_json::to_vec(msg).unwrap();
        handle_message(reg, ep, &payload)
    }

    fn expect_nak(rx: &mut mpsc::Receiver<ServerMessage>, expected: ErrorCode) {
        match rx.try_recv().unwrap() {
            ServerMessage::Nak { code, .. } => assert_eq!(code, expected),
            other => panic!("expected NAK, got {:?}", other),
        }
    }

    #[test]
    fn test_register_and_create_window() {
        let (mut reg, ep, mut rx) = setup();

        let cmd = send(&mut reg, &ep, &ControlMessage::register("A1", 100).with_serial(1)).unwrap();
        assert_eq!(cmd, Command::RegisterApplication { id: "A1".into(), pid: 100 });
        assert_eq!(
            rx.try_recv().unwrap(),
            ServerMessage::Registered { serial: Some(1), application_id: "A1".into() }
        );

        send(&mut reg, &ep, &ControlMessage::create_window("A1", Geometry::new(0, 0, 800, 600))).unwrap();
        let window_id = match rx.try_recv().unwrap() {
            ServerMessage::WindowCreated { window_id, .. } => window_id,
            other => panic!("unexpected reply {:?}", other),
        };
        assert_eq!(reg.window(WindowId(window_id)).unwrap().geometry(), Rect::new(0, 0, 800, 600));
        assert_eq!(reg.app("A1").unwrap().endpoint().connection(), ConnectionId(1));
    }

    #[test]
    fn test_create_window_for_unknown_application() {
        let (mut reg, ep, mut rx) = setup();
        let err = send(&mut reg, &ep, &ControlMessage::create_window("ghost", Geometry::new(0, 0, 1, 1)))
            .unwrap_err();

        assert!(matches!(err, ServerError::UnknownApplication(_)));
        expect_nak(&mut rx, ErrorCode::UnknownApplication);
        assert_eq!(reg.window_count(), 0);
        assert_eq!(reg.app_count(), 0);
    }

    #[test]
    fn test_unknown_kind_is_unsupported() {
        let (mut reg, ep, mut rx) = setup();
        let payload = br#"{"kind":"warp_pointer","application_id":"A1","serial":9}"#;

        let err = handle_message(&mut reg, &ep, payload).unwrap_err();
        assert!(matches!(err, ServerError::UnsupportedMessage(kind) if kind == "warp_pointer"));
        match rx.try_recv().unwrap() {
            ServerMessage::Nak { serial, code, .. } => {
                assert_eq!(serial, Some(9));
                assert_eq!(code, ErrorCode::UnsupportedMessage);
            }
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[test]
    fn test_garbage_is_malformed() {
        let (mut reg, ep, mut rx) = setup();
        let err = handle_message(&mut reg, &ep, b"{not json").unwrap_err();
        assert!(matches!(err, ServerError::MalformedMessage(_)));
        expect_nak(&mut rx, ErrorCode::MalformedMessage);
    }

    #[test]
    fn test_missing_fields_are_malformed() {
        let (mut reg, ep, mut rx) = setup();
        let mut msg = ControlMessage::register("A1", 100);
        msg.pid = None;
        assert!(matches!(send(&mut reg, &ep, &msg), Err(ServerError::MalformedMessage(_))));
        expect_nak(&mut rx, ErrorCode::MalformedMessage);

        let mut msg = ControlMessage::create_window("A1", Geometry::new(0, 0, 1, 1));
        msg.geometry = None;
        assert!(matches!(send(&mut reg, &ep, &msg), Err(ServerError::MalformedMessage(_))));

        let msg = ControlMessage::teardown("");
        assert!(matches!(send(&mut reg, &ep, &msg), Err(ServerError::MalformedMessage(_))));
        assert_eq!(reg.app_count(), 0);
    }

    #[test]
    fn test_negative_geometry_rejected_without_mutation() {
        let (mut reg, ep, mut rx) = setup();
        send(&mut reg, &ep, &ControlMessage::register("A1", 100)).unwrap();
        rx.try_recv().unwrap();

        let err = send(&mut reg, &ep, &ControlMessage::create_window("A1", Geometry::new(0, 0, -10, 10)))
            .unwrap_err();
        assert!(matches!(err, ServerError::MalformedMessage(_)));
        assert_eq!(reg.window_count(), 0);
    }

    #[test]
    fn test_duplicate_registration_nakd() {
        let (mut reg, ep, mut rx) = setup();
        send(&mut reg, &ep, &ControlMessage::register("A1", 100)).unwrap();
        rx.try_recv().unwrap();

        assert!(send(&mut reg, &ep, &ControlMessage::register("A1", 200)).is_err());
        expect_nak(&mut rx, ErrorCode::DuplicateApplication);
        assert_eq!(reg.app("A1").unwrap().pid(), 100);
    }

    #[test]
    fn test_window_messages_require_ownership() {
        let (mut reg, ep, mut rx) = setup();
        send(&mut reg, &ep, &ControlMessage::register("A1", 100)).unwrap();
        send(&mut reg, &ep, &ControlMessage::register("A2", 200)).unwrap();
        let w = reg.create_window("A1", Rect::new(0, 0, 10, 10)).unwrap();
        while rx.try_recv().is_ok() {}

        let msg = ControlMessage::set_window_state("A2", w.0, WindowState::Hidden);
        assert!(matches!(send(&mut reg, &ep, &msg), Err(ServerError::UnknownWindow(_))));
        expect_nak(&mut rx, ErrorCode::UnknownWindow);

        assert!(send(&mut reg, &ep, &ControlMessage::destroy_window("A2", w.0)).is_err());
        assert_eq!(reg.window(w).unwrap().state(), WindowState::Normal);

        send(&mut reg, &ep, &ControlMessage::set_window_state("A1", w.0, WindowState::Hidden)).unwrap();
        assert_eq!(reg.window(w).unwrap().state(), WindowState::Hidden);
    }

    #[test]
    fn test_teardown_and_destroy_are_idempotent() {
        let (mut reg, ep, mut rx) = setup();
        send(&mut reg, &ep, &ControlMessage::teardown("A1")).unwrap();
        assert_eq!(rx.try_recv().unwrap(), ServerMessage::Ack { serial: None });

        send(&mut reg, &ep, &ControlMessage::register("A1", 100)).unwrap();
        send(&mut reg, &ep, &ControlMessage::destroy_window("A1", 77)).unwrap();
        send(&mut reg, &ep, &ControlMessage::teardown("A1")).unwrap();
        send(&mut reg, &ep, &ControlMessage::teardown("A1")).unwrap();
        assert_eq!(reg.app_count(), 0);
    }

    #[test]
    fn test_destroy_from_unregistered_application() {
        let (mut reg, ep, mut rx) = setup();
        let err = send(&mut reg, &ep, &ControlMessage::destroy_window("ghost", 77)).unwrap_err();

        assert!(matches!(err, ServerError::UnknownApplication(id) if id == "ghost"));
        expect_nak(&mut rx, ErrorCode::UnknownApplication);
    }

    #[test]
    fn test_geometry_update() {
        let (mut reg, ep, _rx) = setup();
        send(&mut reg, &ep, &ControlMessage::register("A1", 100)).unwrap();
        let w = reg.create_window("A1", Rect::new(0, 0, 10, 10)).unwrap();

        send(&mut reg, &ep, &ControlMessage::update_geometry("A1", w.0, Geometry::new(5, 6, 70, 80))).unwrap();
        assert_eq!(reg.window(w).unwrap().geometry(), Rect::new(5, 6, 70, 80));

        let bad = ControlMessage::update_geometry("A1", w.0, Geometry::new(0, 0, 1, -1));
        assert!(send(&mut reg, &ep, &bad).is_err());
        assert_eq!(reg.window(w).unwrap().geometry(), Rect::new(5, 6, 70, 80));
    }
}
