//! Control-channel listener
//!
//! Accepts client connections on the service socket. Each connection gets a
//! reader task that turns length-prefixed frames into [`ControlEvent::Frame`]s
//! and a writer task that drains the connection's outgoing queue. A client
//! that stalls mid-frame only blocks its own reader.

use std::path::{Path, PathBuf};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use windowserver_ipc::{FramedMessage, ServerMessage};

use crate::error::{Result, ServerError};
use crate::reactor::ControlEvent;
use crate::session::{ConnectionId, Endpoint};

/// Outgoing messages a connection may have queued before new ones are dropped
const OUTGOING_QUEUE: usize = 256;

pub struct ControlListener {
    listener: UnixListener,
    path: PathBuf,
}

impl ControlListener {
    /// Bind the service socket, replacing a stale one
    pub fn bind(path: &Path) -> Result<Self> {
        // Remove existing socket if present
        if path.exists() {
            std::fs::remove_file(path).map_err(|e| ServerError::setup("remove stale socket", e))?;
        }

        // Create parent directory if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ServerError::setup("create socket directory", e))?;
        }

        let listener = UnixListener::bind(path)
            .map_err(|e| ServerError::setup(&format!("bind {:?}", path), e))?;
        info!("Control channel listening on {:?}", path);

        Ok(Self {
            listener,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Start accepting connections (spawns a background task)
    pub fn start(self, events: mpsc::Sender<ControlEvent>) -> ListenerHandle {
        let path = self.path.clone();
        let listener = self.listener;

        let task = tokio::spawn(async move {
            let mut next_conn = 1u64;
            loop {
                match listener.accept().await {
                    Ok((stream, _)) => {
                        let conn = ConnectionId(next_conn);
                        next_conn += 1;
                        debug!("Accepted connection {}", conn);
                        tokio::spawn(handle_client(conn, stream, events.clone()));
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                    }
                }
            }
        });

        ListenerHandle { path, task }
    }
}

/// Running listener. [`ListenerHandle::close`] stops accepting and removes
/// the socket file.
pub struct ListenerHandle {
    path: PathBuf,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    pub fn close(self) {
        self.task.abort();
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed socket {:?}", self.path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove socket {:?}: {}", self.path, e),
        }
    }
}

/// Handle a connected client
async fn handle_client(conn: ConnectionId, stream: UnixStream, events: mpsc::Sender<ControlEvent>) {
    let (reader, writer) = stream.into_split();
    let (tx, rx) = mpsc::channel(OUTGOING_QUEUE);

    if events
        .send(ControlEvent::Connected { conn, endpoint: Endpoint::new(conn, tx) })
        .await
        .is_err()
    {
        return;
    }

    let mut reader_task = tokio::spawn(read_frames(conn, reader, events.clone()));
    let mut writer_task = tokio::spawn(write_messages(conn, writer, rx));

    // Wait for either task to finish, then stop the other
    tokio::select! {
        _ = &mut reader_task => {}
        _ = &mut writer_task => {}
    }
    reader_task.abort();
    writer_task.abort();

    let _ = events.send(ControlEvent::Disconnected { conn }).await;
}

/// Client → server
async fn read_frames(conn: ConnectionId, mut reader: OwnedReadHalf, events: mpsc::Sender<ControlEvent>) {
    let mut len_buf = [0u8; 4];
    loop {
        // Read length prefix
        if reader.read_exact(&mut len_buf).await.is_err() {
            break;
        }
        let Some(len) = FramedMessage::payload_len(len_buf) else {
            warn!("Connection {}: frame of {} bytes too large, closing", conn, u32::from_be_bytes(len_buf));
            break;
        };

        // Read message
        let mut payload = vec![0u8; len];
        if reader.read_exact(&mut payload).await.is_err() {
            break;
        }

        if events.send(ControlEvent::Frame { conn, payload }).await.is_err() {
            break;
        }
    }
    debug!("Reader for {} ended", conn);
}

/// Server → client
async fn write_messages(conn: ConnectionId, mut writer: OwnedWriteHalf, mut rx: mpsc::Receiver<ServerMessage>) {
    while let Some(msg) = rx.recv().await {
        match FramedMessage::new(&msg) {
            Ok(frame) => {
                if writer.write_all(&frame.encode()).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("Failed to encode message for {}: {}", conn, e);
            }
        }
    }
    debug!("Writer for {} ended", conn);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use windowserver_ipc::ControlMessage;

    async fn next_event(rx: &mut mpsc::Receiver<ControlEvent>) -> ControlEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    async fn read_reply(stream: &mut UnixStream) -> ServerMessage {
        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).await.unwrap();
        let mut payload = vec![0u8; FramedMessage::payload_len(len_buf).unwrap()];
        stream.read_exact(&mut payload).await.unwrap();
        FramedMessage::decode_server_message(&payload).unwrap()
    }

    #[tokio::test]
    async fn test_frames_and_replies_flow_through_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ws.sock");
        let (tx, mut rx) = mpsc::channel(16);
        let handle = ControlListener::bind(&path).unwrap().start(tx);

        let mut client = UnixStream::connect(&path).await.unwrap();
        let endpoint = match next_event(&mut rx).await {
            ControlEvent::Connected { endpoint, .. } => endpoint,
            other => panic!("unexpected event {:?}", other),
        };

        let frame = FramedMessage::new(&ControlMessage::register("A1", 100)).unwrap();
        client.write_all(&frame.encode()).await.unwrap();
        match next_event(&mut rx).await {
            ControlEvent::Frame { conn, payload } => {
                assert_eq!(conn, endpoint.connection());
                assert_eq!(payload, frame.data);
            }
            other => panic!("unexpected event {:?}", other),
        }

        assert!(endpoint.send(ServerMessage::Ack { serial: Some(4) }));
        assert_eq!(read_reply(&mut client).await, ServerMessage::Ack { serial: Some(4) });

        drop(client);
        assert!(matches!(next_event(&mut rx).await, ControlEvent::Disconnected { .. }));

        handle.close();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_partial_frame_does_not_block_other_clients() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ws.sock");
        let (tx, mut rx) = mpsc::channel(16);
        let _handle = ControlListener::bind(&path).unwrap().start(tx);

        let mut slow = UnixStream::connect(&path).await.unwrap();
        assert!(matches!(next_event(&mut rx).await, ControlEvent::Connected { .. }));
        slow.write_all(&100u32.to_be_bytes()).await.unwrap();
        slow.write_all(&[b'{'; 50]).await.unwrap();

        let mut fast = UnixStream::connect(&path).await.unwrap();
        let fast_conn = match next_event(&mut rx).await {
            ControlEvent::Connected { conn, .. } => conn,
            other => panic!("unexpected event {:?}", other),
        };
        let frame = FramedMessage::new(&ControlMessage::register("A2", 200)).unwrap();
        fast.write_all(&frame.encode()).await.unwrap();

        match next_event(&mut rx).await {
            ControlEvent::Frame { conn, payload } => {
                assert_eq!(conn, fast_conn);
                assert_eq!(payload, frame.data);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_oversized_frame_closes_connection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ws.sock");
        let (tx, mut rx) = mpsc::channel(16);
        let _handle = ControlListener::bind(&path).unwrap().start(tx);

        let mut client = UnixStream::connect(&path).await.unwrap();
        assert!(matches!(next_event(&mut rx).await, ControlEvent::Connected { .. }));

        client.write_all(&u32::MAX.to_be_bytes()).await.unwrap();
        assert!(matches!(next_event(&mut rx).await, ControlEvent::Disconnected { .. }));
    }

    #[tokio::test]
    async fn test_bind_replaces_stale_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ws.sock");
        std::fs::write(&path, b"stale").unwrap();

        let listener = ControlListener::bind(&path).unwrap();
        assert_eq!(listener.path(), path.as_path());
    }

    #[tokio::test]
    async fn test_bind_failure_is_setup_failure() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"").unwrap();

        let err = ControlListener::bind(&blocker.join("ws.sock")).err().unwrap();
        assert!(matches!(err, ServerError::SetupFailure(_)));
    }
}
