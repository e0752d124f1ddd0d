//! Event Multiplexer
//!
//! The reactor owns all server state and is the only thing that mutates it.
//! It blocks on two channels at once: kernel events (device readiness,
//! signals, timers, process exits) and control events from the listener.
//! Every wake drains both channels, up to `max_batch` events each, and
//! dispatches the whole batch before blocking again.
//!
//! Process exit and connection loss both end in the same application teardown
//! as an explicit `teardown_application` message.

mod process;
mod sources;

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::path::PathBuf;
use std::time::Duration;

use mio::Token;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use windowserver_ipc::{InputEvent, ServerMessage};

pub use process::ProcessWatch;
pub use sources::{Signal, Sources};

use crate::config::{Config, InputConfig};
use crate::control::{self, Command};
use crate::error::Result;
use crate::input::adapter::InputAdapter;
use crate::input::{InputRouter, RouteOutcome};
use crate::session::{ConnectionId, Endpoint, Registry, WindowId};
use crate::surface::SurfaceProvider;

const CHANNEL_CAPACITY: usize = 1024;

/// Events from the kernel side of the multiplexer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelEvent {
    /// A watched input device has data
    DeviceReadable(Token),
    /// A client process is gone
    ProcessExited(u32),
    Signal(Signal),
    Timer(Token),
}

/// Events from the control channel, in per-connection order
#[derive(Debug)]
pub enum ControlEvent {
    Connected { conn: ConnectionId, endpoint: Endpoint },
    Frame { conn: ConnectionId, payload: Vec<u8> },
    Disconnected { conn: ConnectionId },
}

/// Kernel sources that can be added to the watch set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    DeviceReadable(RawFd),
    ProcessExit(u32),
    Signal(Signal),
    Timer(Duration),
}

/// Cloneable way into a running reactor
#[derive(Debug, Clone)]
pub struct ReactorHandle {
    kernel: mpsc::Sender<KernelEvent>,
    control: mpsc::Sender<ControlEvent>,
}

impl ReactorHandle {
    pub fn control_sender(&self) -> mpsc::Sender<ControlEvent> {
        self.control.clone()
    }

    pub async fn send_kernel(&self, event: KernelEvent) -> bool {
        self.kernel.send(event).await.is_ok()
    }

    pub async fn send_control(&self, event: ControlEvent) -> bool {
        self.control.send(event).await.is_ok()
    }

    /// Ask the loop to stop after its current batch
    pub fn stop(&self) {
        if self.kernel.try_send(KernelEvent::Signal(Signal::Terminate)).is_err() {
            warn!("Reactor did not accept stop request");
        }
    }
}

pub struct Reactor {
    registry: Registry,
    router: InputRouter,
    input: Box<dyn InputAdapter>,
    processes: ProcessWatch,
    sources: Sources,
    connections: HashMap<ConnectionId, Endpoint>,

    kernel_tx: mpsc::Sender<KernelEvent>,
    kernel_rx: mpsc::Receiver<KernelEvent>,
    control_tx: mpsc::Sender<ControlEvent>,
    control_rx: mpsc::Receiver<ControlEvent>,

    next_token: usize,
    probe_timer: Option<Token>,
    max_batch: usize,
    config_path: Option<PathBuf>,

    shell_pid: Option<u32>,
    stop_on_shell_exit: bool,

    /// Focus pair last announced to clients
    announced_focus: Option<(String, WindowId)>,
    stopping: bool,
}

impl Reactor {
    pub fn new(config: &Config, input: Box<dyn InputAdapter>, surfaces: Box<dyn SurfaceProvider>) -> Self {
        let (kernel_tx, kernel_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (control_tx, control_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let mut registry = Registry::new(surfaces);
        registry.set_focus_options(config.input.focus_options());

        Self {
            registry,
            router: InputRouter::new(&config.input),
            input,
            processes: ProcessWatch::new(),
            sources: Sources::new(),
            connections: HashMap::new(),
            kernel_tx,
            kernel_rx,
            control_tx,
            control_rx,
            next_token: 0,
            probe_timer: None,
            max_batch: config.server.max_batch.max(1),
            config_path: None,
            shell_pid: None,
            stop_on_shell_exit: config.session.stop_on_shell_exit,
            announced_focus: None,
            stopping: false,
        }
    }

    /// File re-read for the `[input]` section on SIGHUP
    pub fn set_config_path(&mut self, path: Option<PathBuf>) {
        self.config_path = path;
    }

    pub fn handle(&self) -> ReactorHandle {
        ReactorHandle {
            kernel: self.kernel_tx.clone(),
            control: self.control_tx.clone(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn processes(&self) -> &ProcessWatch {
        &self.processes
    }

    /// Add a kernel source to the watch set. The returned token identifies
    /// device and timer events; it is meaningless for the other kinds.
    pub fn register_interest(&mut self, interest: Interest) -> Result<Token> {
        let token = Token(self.next_token);
        self.next_token += 1;

        match interest {
            Interest::DeviceReadable(fd) => {
                self.sources.watch_fd(fd, token, self.kernel_tx.clone())?;
                info!("Watching device fd {} as {:?}", fd, token);
            }
            Interest::ProcessExit(pid) => {
                self.processes.watch(pid);
            }
            Interest::Signal(sig) => {
                self.sources.watch_signal(sig, self.kernel_tx.clone())?;
                debug!("Watching {:?}", sig);
            }
            Interest::Timer(period) => {
                self.sources.watch_timer(period, token, self.kernel_tx.clone());
                debug!("Timer {:?} every {:?}", token, period);
            }
        }
        Ok(token)
    }

    /// Install SIGCHLD and a periodic probe, both of which reap watched pids
    pub fn watch_processes(&mut self, probe_interval: Duration) -> Result<()> {
        self.register_interest(Interest::Signal(Signal::Child))?;
        let token = self.register_interest(Interest::Timer(probe_interval))?;
        self.probe_timer = Some(token);
        Ok(())
    }

    /// Watch the initial shell; its exit may stop the loop
    pub fn watch_shell(&mut self, pid: u32) {
        self.shell_pid = Some(pid);
        self.processes.watch(pid);
    }

    // ========================================================================
    // Main loop
    // ========================================================================

    /// Run until stopped. Returns after the batch containing the stop request
    /// has been fully dispatched.
    pub async fn run(&mut self) -> Result<()> {
        info!("Starting main event loop");
        while self.run_once().await {}
        info!("Main event loop stopped");
        Ok(())
    }

    /// Block for one wake, dispatch everything drained. Returns `false` once
    /// the loop should stop.
    pub async fn run_once(&mut self) -> bool {
        let mut kernel_batch = Vec::new();
        let mut control_batch = Vec::new();

        tokio::select! {
            Some(event) = self.kernel_rx.recv() => kernel_batch.push(event),
            Some(event) = self.control_rx.recv() => control_batch.push(event),
            else => {
                error!("Event channels closed");
                self.stopping = true;
                return false;
            }
        }

        // Drain whatever else is ready on both channels
        while kernel_batch.len() < self.max_batch {
            match self.kernel_rx.try_recv() {
                Ok(event) => kernel_batch.push(event),
                Err(_) => break,
            }
        }
        while control_batch.len() < self.max_batch {
            match self.control_rx.try_recv() {
                Ok(event) => control_batch.push(event),
                Err(_) => break,
            }
        }
        debug!(
            "Dispatching {} kernel and {} control events",
            kernel_batch.len(),
            control_batch.len()
        );

        for event in kernel_batch {
            self.dispatch_kernel(event);
            self.announce_focus();
        }
        for event in control_batch {
            self.dispatch_control(event);
            self.announce_focus();
        }

        !self.stopping
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    fn dispatch_kernel(&mut self, event: KernelEvent) {
        match event {
            KernelEvent::DeviceReadable(token) => {
                debug!("Device {:?} readable", token);
                while let Some(input) = self.input.next_event() {
                    self.route(&input);
                    self.announce_focus();
                }
                for fd in self.input.take_closed_fds() {
                    if self.sources.unwatch_fd(fd) {
                        info!("Stopped watching closed device fd {}", fd);
                    }
                }
            }
            KernelEvent::ProcessExited(pid) => self.process_exited(pid),
            KernelEvent::Signal(Signal::Terminate | Signal::Interrupt) => {
                info!("Stop requested");
                self.stopping = true;
            }
            KernelEvent::Signal(Signal::Hangup) => self.reload_input_config(),
            KernelEvent::Signal(Signal::Child) => self.reap_processes(),
            KernelEvent::Timer(token) if Some(token) == self.probe_timer => self.reap_processes(),
            KernelEvent::Timer(token) => debug!("Timer {:?} fired", token),
        }
    }

    fn dispatch_control(&mut self, event: ControlEvent) {
        match event {
            ControlEvent::Connected { conn, endpoint } => {
                info!("Client connected ({})", conn);
                self.connections.insert(conn, endpoint);
            }
            ControlEvent::Frame { conn, payload } => {
                let Some(endpoint) = self.connections.get(&conn).cloned() else {
                    warn!("Frame from unknown connection {} dropped", conn);
                    return;
                };
                match control::handle_message(&mut self.registry, &endpoint, &payload) {
                    Ok(Command::RegisterApplication { pid, .. }) => {
                        self.processes.watch(pid);
                    }
                    Ok(_) | Err(_) => {}
                }
            }
            ControlEvent::Disconnected { conn } => {
                self.connections.remove(&conn);
                let apps = self.registry.apps_on_connection(conn);
                info!("Client disconnected ({}), tearing down {} application(s)", conn, apps.len());
                for id in apps {
                    self.teardown_application(&id);
                }
            }
        }
    }

    fn route(&mut self, event: &InputEvent) {
        match self.router.route_input_event(&mut self.registry, event) {
            RouteOutcome::Delivered(window) => debug!("Input delivered to window {}", window),
            RouteOutcome::Discarded | RouteOutcome::Consumed => {}
            RouteOutcome::Undeliverable(window) => debug!("Input for window {} dropped", window),
        }
    }

    /// The single teardown path shared by explicit teardown, process exit and
    /// connection loss
    fn teardown_application(&mut self, id: &str) {
        self.registry.unregister_application(id);
    }

    fn process_exited(&mut self, pid: u32) {
        self.processes.unwatch(pid);

        let apps = self.registry.apps_with_pid(pid);
        if !apps.is_empty() {
            info!("Process {} exited, tearing down {:?}", pid, apps);
        }
        for id in apps {
            self.teardown_application(&id);
        }

        if self.shell_pid == Some(pid) {
            self.shell_pid = None;
            if self.stop_on_shell_exit {
                info!("Shell (pid {}) exited, stopping", pid);
                self.stopping = true;
            } else {
                warn!("Shell (pid {}) exited", pid);
            }
        }
    }

    fn reap_processes(&mut self) {
        // Pids whose applications are all gone no longer need probing
        let registry = &self.registry;
        let shell = self.shell_pid;
        self.processes
            .retain(|&pid| Some(pid) == shell || !registry.apps_with_pid(pid).is_empty());

        for pid in self.processes.reap() {
            self.process_exited(pid);
        }
    }

    fn reload_input_config(&mut self) {
        let Some(path) = self.config_path.as_deref() else {
            debug!("SIGHUP ignored, no config file");
            return;
        };
        match Config::load_from(path) {
            Ok(config) => {
                self.apply_input_config(&config.input);
                info!("Reloaded input configuration");
            }
            Err(e) => warn!("Failed to reload configuration: {:#}", e),
        }
    }

    pub fn apply_input_config(&mut self, input: &InputConfig) {
        self.router.reconfigure(input);
        self.registry.set_focus_options(input.focus_options());
    }

    /// Tell clients about a focus change since the last announcement
    fn announce_focus(&mut self) {
        let current = self
            .registry
            .focus()
            .map(|f| (f.app_id.clone(), f.window));
        if current == self.announced_focus {
            return;
        }

        if let Some((app_id, window)) = &self.announced_focus {
            if let Some(app) = self.registry.app(app_id) {
                app.endpoint().send(ServerMessage::Focus { window_id: window.0, focused: false });
            }
        }
        if let Some((app_id, window)) = &current {
            if let Some(app) = self.registry.app(app_id) {
                app.endpoint().send(ServerMessage::Focus { window_id: window.0, focused: true });
            }
        }
        self.announced_focus = current;
    }

    /// Tear down every application and stop all forwarders
    pub fn shutdown(&mut self) {
        let count = self.registry.clear();
        self.connections.clear();
        self.sources = Sources::new();
        info!("Shut down: tore down {} application(s)", count);
    }
}
