//! Kernel event sources
//!
//! Each registered interest gets a forwarder that turns kernel activity into a
//! [`KernelEvent`] on the reactor's channel, so nothing runs in signal context
//! and all state stays on the reactor thread.
//!
//! Device descriptors are polled with mio on a blocking thread (LeftWM
//! style); signals and timers are plain tokio tasks.

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::time::Duration;

use mio::Token;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::KernelEvent;
use crate::error::{Result, ServerError};

/// Signals the reactor can be woken by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Terminate,
    Interrupt,
    Hangup,
    Child,
}

impl Signal {
    fn kind(self) -> SignalKind {
        match self {
            Signal::Terminate => SignalKind::terminate(),
            Signal::Interrupt => SignalKind::interrupt(),
            Signal::Hangup => SignalKind::hangup(),
            Signal::Child => SignalKind::child(),
        }
    }
}

/// Forwarders for every registered source. Dropping this stops them all.
#[derive(Default)]
pub struct Sources {
    tasks: Vec<JoinHandle<()>>,
    /// Dropping a guard tells the matching poll thread to exit
    poll_guards: HashMap<RawFd, oneshot::Receiver<()>>,
}

impl Sources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward readability of `fd` as `DeviceReadable(token)`
    pub fn watch_fd(&mut self, fd: RawFd, token: Token, tx: mpsc::Sender<KernelEvent>) -> Result<()> {
        let mut poll = mio::Poll::new().map_err(|e| ServerError::setup("create mio poll", e))?;
        let mut events = mio::Events::with_capacity(8);
        poll.registry()
            .register(&mut mio::unix::SourceFd(&fd), token, mio::Interest::READABLE)
            .map_err(|e| ServerError::setup("register device fd", e))?;

        let (guard, poll_guard) = oneshot::channel::<()>();
        let timeout = Duration::from_millis(100);
        tokio::task::spawn_blocking(move || {
            loop {
                if guard.is_closed() {
                    debug!("Device poll thread for fd {} shutting down", fd);
                    return;
                }

                if let Err(err) = poll.poll(&mut events, Some(timeout)) {
                    if err.kind() != std::io::ErrorKind::Interrupted {
                        warn!("Device poll on fd {} failed: {:?}", fd, err);
                    }
                    continue;
                }

                let ready = events.iter().any(|event| event.token() == token);
                if ready && tx.blocking_send(KernelEvent::DeviceReadable(token)).is_err() {
                    return;
                }
            }
        });

        if self.poll_guards.insert(fd, poll_guard).is_some() {
            debug!("Replaced existing poll thread for fd {}", fd);
        }
        Ok(())
    }

    /// Stop the poll thread for `fd`. Returns `false` if it was not watched.
    pub fn unwatch_fd(&mut self, fd: RawFd) -> bool {
        self.poll_guards.remove(&fd).is_some()
    }

    /// Forward every delivery of `sig` as `Signal(sig)`
    pub fn watch_signal(&mut self, sig: Signal, tx: mpsc::Sender<KernelEvent>) -> Result<()> {
        let mut stream =
            signal(sig.kind()).map_err(|e| ServerError::setup(&format!("install {:?} handler", sig), e))?;

        self.tasks.push(tokio::spawn(async move {
            while stream.recv().await.is_some() {
                if matches!(sig, Signal::Terminate | Signal::Interrupt) {
                    info!("Received {:?}, shutting down gracefully", sig);
                }
                if tx.send(KernelEvent::Signal(sig)).await.is_err() {
                    break;
                }
            }
        }));
        Ok(())
    }

    /// Forward a tick every `period` as `Timer(token)`
    pub fn watch_timer(&mut self, period: Duration, token: Token, tx: mpsc::Sender<KernelEvent>) {
        self.tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // Skip first immediate tick
            interval.tick().await;
            loop {
                interval.tick().await;
                if tx.send(KernelEvent::Timer(token)).await.is_err() {
                    break;
                }
            }
        }));
    }

}

impl Drop for Sources {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[tokio::test]
    async fn test_readable_fd_is_forwarded() {
        let (mut writer, reader) = UnixStream::pair().unwrap();
        reader.set_nonblocking(true).unwrap();
        let (tx, mut rx) = mpsc::channel(8);

        let mut sources = Sources::new();
        sources.watch_fd(reader.as_raw_fd(), Token(3), tx).unwrap();
        writer.write_all(b"x").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert_eq!(event, Some(KernelEvent::DeviceReadable(Token(3))));
        drop(sources);
    }

    #[tokio::test]
    async fn test_unwatched_fd_stops_forwarding() {
        let (mut writer, reader) = UnixStream::pair().unwrap();
        reader.set_nonblocking(true).unwrap();
        let (tx, mut rx) = mpsc::channel(8);

        let mut sources = Sources::new();
        sources.watch_fd(reader.as_raw_fd(), Token(4), tx).unwrap();
        assert!(sources.unwatch_fd(reader.as_raw_fd()));
        assert!(!sources.unwatch_fd(reader.as_raw_fd()));
        writer.write_all(b"x").unwrap();

        // The poll thread exits and drops its sender, closing the channel
        let mut forwarded = 0;
        loop {
            match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap() {
                Some(_) => forwarded += 1,
                None => break,
            }
        }
        assert!(forwarded <= 1);
    }

    #[tokio::test]
    async fn test_timer_ticks_are_forwarded() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut sources = Sources::new();
        sources.watch_timer(Duration::from_millis(10), Token(9), tx);

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert_eq!(event, Some(KernelEvent::Timer(Token(9))));
    }

    #[tokio::test]
    async fn test_dropping_sources_stops_forwarders() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut sources = Sources::new();
        sources.watch_timer(Duration::from_secs(3600), Token(1), tx);
        drop(sources);

        // The aborted task drops its sender, closing the channel
        let closed = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert_eq!(closed, None);
    }
}
