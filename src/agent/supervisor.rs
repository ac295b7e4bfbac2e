//! Agent supervisor
//!
//! A single actor task owns the [`SessionState`]. Requests from the
//! [`Supervisor`] handle and events from process threads are both funnelled
//! into it, so session state is only ever touched from one place and
//! notifications go out in the order things happened.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::{
    decode_chunk, is_authenticated, ActiveProcess, AgentCommand, AgentEvent, BootstrapState,
    SessionState, SetupStep, SupervisorStatus,
};
use crate::config::CoHome;
use crate::env::EnvironmentResolver;
use crate::pty::{
    resolve_executable, LaunchRequest, ProcessEvent, ProcessEventKind, ProcessEventSender,
    ProcessLauncher, PtyError,
};

/// Shown when a process ends with no setup step waiting on it
pub const EXITED_NOTICE: &str = "\n[co ai exited]\n";

/// Fan-out of notifications, one unbounded queue per subscriber.
///
/// Nothing is ever dropped for a slow reader; closed subscribers are pruned
/// on the next publish.
#[derive(Clone, Default)]
struct Subscribers {
    senders: Arc<Mutex<Vec<mpsc::UnboundedSender<AgentEvent>>>>,
}

impl Subscribers {
    fn subscribe(&self) -> mpsc::UnboundedReceiver<AgentEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(tx);
        rx
    }

    fn publish(&self, event: AgentEvent) {
        self.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Drop every sender so subscribers see the end of the stream
    fn close(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::UnboundedSender<AgentEvent>>> {
        self.senders.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Where `co` lives and which home it works in
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub home: CoHome,
    /// Name resolved through PATH when no bundled binary is usable
    pub program: String,
    pub bundled_binary: Option<PathBuf>,
}

/// Requests handled by the actor
enum Request {
    Start,
    Stop,
    Send(String),
    Status(oneshot::Sender<SupervisorStatus>),
}

/// Handle to the supervisor task
///
/// Cheap to clone. All operations are fire-and-forget requests; their
/// effects are observed through [`subscribe`](Self::subscribe).
#[derive(Clone)]
pub struct Supervisor {
    request_tx: mpsc::UnboundedSender<Request>,
    subscribers: Subscribers,
    running_rx: watch::Receiver<bool>,
}

impl Supervisor {
    /// Spawn the supervisor task on the current runtime
    pub fn spawn(
        launcher: impl ProcessLauncher + 'static,
        resolver: Arc<EnvironmentResolver>,
        options: SupervisorOptions,
    ) -> Self {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (process_tx, process_rx) = mpsc::unbounded_channel();
        let subscribers = Subscribers::default();
        let (running_tx, running_rx) = watch::channel(false);

        let actor = SupervisorActor {
            launcher: Box::new(launcher),
            resolver,
            options,
            session: SessionState::Idle,
            subscribers: subscribers.clone(),
            running_tx,
            process_tx,
        };
        tokio::spawn(actor.run(request_rx, process_rx));

        Self {
            request_tx,
            subscribers,
            running_rx,
        }
    }

    /// Run setup if needed, then `co ai`. Ignored while a process is live.
    pub fn start(&self) {
        self.request(Request::Start);
    }

    /// Ask the live process to terminate. Ignored when idle.
    pub fn stop(&self) {
        self.request(Request::Stop);
    }

    /// Send one line of input. Dropped when idle.
    pub fn send(&self, text: impl Into<String>) {
        self.request(Request::Send(text.into()));
    }

    /// Whether a process is live, as of the last state-change notification
    pub fn is_running(&self) -> bool {
        *self.running_rx.borrow()
    }

    /// Subscribe to output and state-change notifications.
    ///
    /// Every event published after this call is delivered in order. The
    /// stream ends once the supervisor task has finished.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<AgentEvent> {
        self.subscribers.subscribe()
    }

    /// Current status, answered after every earlier request has been handled
    pub async fn status(&self) -> Option<SupervisorStatus> {
        let (tx, rx) = oneshot::channel();
        self.request_tx.send(Request::Status(tx)).ok()?;
        rx.await.ok()
    }

    /// Wait until no process is live. Returns false on timeout.
    pub async fn wait_idle(&self, limit: Duration) -> bool {
        let mut running_rx = self.running_rx.clone();
        let idle = matches!(
            tokio::time::timeout(limit, running_rx.wait_for(|running| !*running)).await,
            Ok(Ok(_))
        );
        idle
    }

    fn request(&self, request: Request) {
        if self.request_tx.send(request).is_err() {
            warn!("Supervisor task is gone; request dropped");
        }
    }
}

/// Owns the session; runs on its own task
struct SupervisorActor {
    launcher: Box<dyn ProcessLauncher>,
    resolver: Arc<EnvironmentResolver>,
    options: SupervisorOptions,
    session: SessionState,
    subscribers: Subscribers,
    running_tx: watch::Sender<bool>,
    /// Cloned into every launch
    process_tx: ProcessEventSender,
}

impl SupervisorActor {
    async fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<Request>,
        mut processes: mpsc::UnboundedReceiver<ProcessEvent>,
    ) {
        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(request) => self.handle_request(request).await,
                    None => break,
                },
                Some(event) = processes.recv() => self.handle_process_event(event),
            }
        }

        // Every handle is gone; don't leave the agent orphaned
        if let SessionState::Running(active) = &mut self.session {
            if let Err(e) = active.handle.terminate() {
                warn!("Failed to stop co {} on shutdown: {}", active.command.name(), e);
            }
        }
        self.subscribers.close();
        debug!("Supervisor task finished");
    }

    async fn handle_request(&mut self, request: Request) {
        match request {
            Request::Start => self.start().await,
            Request::Stop => self.stop(),
            Request::Send(text) => self.send(text),
            Request::Status(reply) => {
                let _ = reply.send(self.session.status());
            }
        }
    }

    async fn start(&mut self) {
        if self.session.is_running() {
            debug!("Start ignored: a process is already running");
            return;
        }

        let env = self.resolver.resolve().await;
        let state = BootstrapState::evaluate(&self.options.home, &env);
        debug!("Bootstrap state: {:?}", state);

        match state.setup_step() {
            Some(step) => {
                info!("Running setup step: co {}", step.command().name());
                self.emit_output(step.start_notice());
                self.launch(step.command(), Some(step));
            }
            None => self.launch(AgentCommand::Ai, None),
        }
    }

    fn stop(&mut self) {
        match &mut self.session {
            SessionState::Running(active) => {
                info!("Stopping co {}", active.command.name());
                match active.handle.terminate() {
                    Ok(()) => {}
                    // Its exit event is already on the way
                    Err(PtyError::ProcessExited) => {
                        debug!("co {} already exited", active.command.name())
                    }
                    Err(e) => warn!("Failed to stop co {}: {}", active.command.name(), e),
                }
            }
            SessionState::Idle => debug!("Stop ignored: nothing running"),
        }
    }

    fn send(&mut self, text: String) {
        match &mut self.session {
            SessionState::Running(active) => {
                let line = format!("{text}\n");
                match active.handle.write(line.as_bytes()) {
                    Ok(()) => debug!("Sent {} bytes to co {}", line.len(), active.command.name()),
                    Err(e) => warn!("Failed to send input to co {}: {}", active.command.name(), e),
                }
            }
            SessionState::Idle => debug!("Input dropped: nothing running"),
        }
    }

    /// Start `co <command>`; `continuation` runs when it exits
    fn launch(&mut self, command: AgentCommand, continuation: Option<SetupStep>) {
        let id = Uuid::new_v4();
        let target = resolve_executable(
            self.options.bundled_binary.as_deref(),
            &self.options.program,
            command.args(),
        );
        info!("Launching {:?} {}", target.program, target.args.join(" "));

        let request = LaunchRequest {
            id,
            target,
            env: self.resolver.snapshot(),
            cwd: self.options.home.root().to_path_buf(),
        };

        match self.launcher.launch(request, self.process_tx.clone()) {
            Ok(handle) => {
                self.session = SessionState::Running(ActiveProcess {
                    id,
                    command,
                    handle,
                    continuation,
                });
                self.notify_state();
            }
            Err(e) => {
                // Same observable path as a process that exited at once
                warn!("Failed to launch co {}: {}", command.name(), e);
                self.emit_output(&format!("\n[Failed to launch co {}: {}]\n", command.name(), e));
                self.after_exit(continuation);
            }
        }
    }

    fn handle_process_event(&mut self, event: ProcessEvent) {
        match event.kind {
            ProcessEventKind::Output(data) => {
                if self.session.active(event.id).is_none() {
                    trace!("Ignoring output from stale process {}", event.id);
                    return;
                }
                if let Some(text) = decode_chunk(data) {
                    self.emit_output(&text);
                }
            }
            ProcessEventKind::Exited(exit) => {
                let Some(active) = self.session.finish(event.id) else {
                    trace!("Ignoring exit of stale process {}", event.id);
                    return;
                };
                info!(
                    "co {} exited (code {:?}, {:?})",
                    active.command.name(),
                    exit.exit_code,
                    exit.reason
                );
                self.after_exit(active.continuation);
            }
        }
    }

    fn after_exit(&mut self, continuation: Option<SetupStep>) {
        match continuation {
            Some(step) => self.continue_setup(step),
            None => {
                self.emit_output(EXITED_NOTICE);
                self.notify_state();
            }
        }
    }

    /// A setup step finished: start `co ai` if a key is now available
    fn continue_setup(&mut self, step: SetupStep) {
        let env = self.resolver.snapshot();
        if is_authenticated(&self.options.home, &env) {
            info!("Setup step co {} succeeded", step.command().name());
            self.emit_output(step.success_notice());
            self.launch(AgentCommand::Ai, None);
        } else {
            info!("Setup step co {} left no API key", step.command().name());
            self.emit_output(step.failure_notice());
            self.notify_state();
        }
    }

    fn emit_output(&self, text: &str) {
        self.subscribers.publish(AgentEvent::Output {
            text: text.to_string(),
        });
    }

    fn notify_state(&self) {
        let running = self.session.is_running();
        self.running_tx.send_replace(running);
        self.subscribers.publish(AgentEvent::StateChanged { running });
    }
}
