//! windowserver
//!
//! Core of a window server: tracks connected applications and their windows,
//! multiplexes device, signal and control-channel events on one thread, and
//! routes input to the focused window.

mod config;
mod control;
mod error;
mod input;
mod ipc;
mod reactor;
mod session;
mod shared;
mod shell;
mod surface;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::Config;
use error::{Result, ServerError};
use input::adapter::{InputAdapter, QueuedInput};
use input::evdev::EvdevInput;
use ipc::{ControlListener, ListenerHandle};
use reactor::{Interest, Reactor, Signal};
use shared::window_state::Rect;
use surface::HeadlessSurfaces;

/// Command line flags
#[derive(Debug, Default)]
struct Args {
    no_shell: bool,
    socket: Option<PathBuf>,
}

impl Args {
    fn parse(args: impl IntoIterator<Item = String>) -> Self {
        let mut parsed = Args::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--no-shell" => parsed.no_shell = true,
                "--socket" => match args.next() {
                    Some(path) => parsed.socket = Some(PathBuf::from(path)),
                    None => warn!("--socket needs a path, ignoring"),
                },
                other => warn!("Ignoring unknown argument {:?}", other),
            }
        }
        parsed
    }
}

/// Setup state plus the running reactor
struct WindowServer {
    reactor: Reactor,
    listener: Option<ListenerHandle>,
    socket_path: PathBuf,
    ready_file: Option<PathBuf>,
}

impl WindowServer {
    fn new(config: &Config, args: &Args) -> Result<Self> {
        let display = Rect::new(0, 0, config.display.width, config.display.height);
        let surfaces = HeadlessSurfaces::new(config.display.width, config.display.height);

        let (input, device_fds): (Box<dyn InputAdapter>, _) = if config.input.devices.is_empty() {
            info!("No input devices configured");
            (Box::new(QueuedInput::new()), Vec::new())
        } else {
            let evdev = EvdevInput::open(&config.input.devices, display)
                .map_err(|e| ServerError::setup("open input devices", format!("{:#}", e)))?;
            let fds = evdev.fds();
            (Box::new(evdev), fds)
        };

        let mut reactor = Reactor::new(config, input, Box::new(surfaces));
        reactor.set_config_path(Config::config_path().ok());

        for fd in device_fds {
            reactor.register_interest(Interest::DeviceReadable(fd))?;
        }
        for sig in [Signal::Terminate, Signal::Interrupt, Signal::Hangup] {
            reactor.register_interest(Interest::Signal(sig))?;
        }
        reactor.watch_processes(Duration::from_millis(config.process.probe_interval_ms.max(1)))?;

        let socket_path = args.socket.clone().unwrap_or_else(|| config.server.socket_path());
        let listener = ControlListener::bind(&socket_path)?.start(reactor.handle().control_sender());

        let mut server = Self {
            reactor,
            listener: Some(listener),
            socket_path,
            ready_file: None,
        };

        if config.server.ready_file {
            server.emit_ready_signal();
        }

        if args.no_shell {
            info!("--no-shell given, not launching a shell");
        } else if !config.session.shell.is_empty() {
            match shell::launch(&config.session.shell, &server.socket_path) {
                Ok(pid) => server.reactor.watch_shell(pid),
                Err(e) => error!("{:#}", e),
            }
        }

        Ok(server)
    }

    /// Create a ready file so session scripts can wait for the socket
    fn emit_ready_signal(&mut self) {
        let ready_file = PathBuf::from(
            std::env::var("XDG_RUNTIME_DIR").unwrap_or_else(|_| "/tmp".to_string()),
        )
        .join("windowserver-ready");
        if let Err(e) = std::fs::write(&ready_file, "ready") {
            warn!("Failed to create ready file: {}", e);
        } else {
            info!("Created ready signal file: {:?}", ready_file);
            self.ready_file = Some(ready_file);
        }
    }

    async fn run(&mut self) -> Result<()> {
        self.reactor.run().await
    }

    fn shutdown(&mut self) {
        info!("Shutting down, cleaning up...");
        self.reactor.shutdown();
        if let Some(listener) = self.listener.take() {
            listener.close();
        }
        if let Some(ready_file) = self.ready_file.take() {
            if let Err(e) = std::fs::remove_file(&ready_file) {
                warn!("Failed to remove ready file {:?}: {}", ready_file, e);
            }
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "windowserver=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting window server");

    let args = Args::parse(std::env::args().skip(1));
    let config = Config::load().unwrap_or_else(|e| {
        error!("Failed to load config, using defaults: {:#}", e);
        Config::default()
    });

    let mut server = match WindowServer::new(&config, &args) {
        Ok(server) => server,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = server.run().await;
    server.shutdown();

    match result {
        Ok(()) => {
            info!("Window server exited cleanly");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Application error: {}", e);
            ExitCode::FAILURE
        }
    }
}
