//! Backend process supervisor
//!
//! Owns the one backend process of an application run. `start()` spawns the
//! packaged executable and waits until its output announces readiness (or a
//! failure, or the readiness window runs out); `stop()` takes it down with
//! SIGTERM and escalates to SIGKILL after the grace window.
//!
//! The child is observed through discrete [`ProcessEvent`]s: one reader task
//! per output stream plus a waiter task feed a single driver, which answers
//! the pending `start()` exactly once.

use crate::api::ApiClient;
use crate::config::{DeploymentMode, ReadinessFallback, ShellConfig, BACKEND_DIR, REAP_TIMEOUT};
use crate::error::SupervisorError;
use crate::platform;
use crate::readiness::{
    MarkerClassifier, OutputClassifier, OutputStream, ProcessEvent, ReadinessTracker, Resolution,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex as StateLock;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Lifecycle of the supervised backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    NotStarted,
    Spawning,
    Ready,
    Failed,
    Terminating,
    Terminated,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::NotStarted => "not_started",
            LifecycleState::Spawning => "spawning",
            LifecycleState::Ready => "ready",
            LifecycleState::Failed => "failed",
            LifecycleState::Terminating => "terminating",
            LifecycleState::Terminated => "terminated",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the backend gets launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendLaunch {
    /// Somebody else runs the backend (development).
    External,
    /// Spawn this executable with no arguments.
    Executable(PathBuf),
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub launch: BackendLaunch,
    pub readiness_timeout: Duration,
    pub fallback: ReadinessFallback,
    pub grace: Duration,
    pub buffer_limit: usize,
    pub backend_url: String,
}

impl SupervisorConfig {
    pub fn external() -> Self {
        Self::from_launch(BackendLaunch::External, &ShellConfig::default())
    }

    pub fn executable(path: impl Into<PathBuf>) -> Self {
        Self::from_launch(BackendLaunch::Executable(path.into()), &ShellConfig::default())
    }

    /// Build from shell settings; `executable` is ignored in development mode.
    pub fn from_shell(config: &ShellConfig, mode: DeploymentMode, executable: PathBuf) -> Self {
        let launch = match mode {
            DeploymentMode::Development => BackendLaunch::External,
            DeploymentMode::Packaged => BackendLaunch::Executable(executable),
        };
        Self::from_launch(launch, config)
    }

    fn from_launch(launch: BackendLaunch, config: &ShellConfig) -> Self {
        Self {
            launch,
            readiness_timeout: config.readiness.timeout(),
            fallback: config.readiness.fallback,
            grace: config.shutdown.grace(),
            buffer_limit: config.readiness.buffer_limit,
            backend_url: config.backend_url.clone(),
        }
    }

    pub fn with_readiness_timeout(mut self, timeout: Duration) -> Self {
        self.readiness_timeout = timeout;
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn with_fallback(mut self, fallback: ReadinessFallback, backend_url: impl Into<String>) -> Self {
        self.fallback = fallback;
        self.backend_url = backend_url.into();
        self
    }
}

/// `<resources>/backend/app` (`app.exe` on Windows).
pub fn backend_executable(resources_dir: &Path) -> PathBuf {
    resources_dir
        .join(BACKEND_DIR)
        .join(platform::executable_name())
}

/// Successful result of `start()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Development mode; nothing was spawned.
    External,
    /// A readiness marker was seen.
    Ready { pid: u32, elapsed: Duration },
    /// No marker within the readiness window; proceeding anyway.
    AssumedReady { pid: u32 },
}

impl StartOutcome {
    pub fn pid(&self) -> Option<u32> {
        match self {
            StartOutcome::External => None,
            StartOutcome::Ready { pid, .. } | StartOutcome::AssumedReady { pid } => Some(*pid),
        }
    }
}

/// What `stop()` had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReport {
    NotRunning,
    AlreadyExited { pid: u32, code: Option<i32> },
    /// Exited within the grace window after the graceful signal.
    Graceful { pid: u32, code: Option<i32> },
    /// Needed a forceful kill.
    Forced { pid: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<i32>,
}

/// Point-in-time view of the supervised process.
#[derive(Debug, Clone)]
pub struct ProcessSnapshot {
    pub pid: u32,
    pub executable: PathBuf,
    pub started_at: DateTime<Utc>,
    pub state: LifecycleState,
    pub exit: Option<ExitInfo>,
}

struct ProcessHandle {
    pid: u32,
    executable: PathBuf,
    started_at: DateTime<Utc>,
    exit: watch::Receiver<Option<ExitInfo>>,
    kill: mpsc::Sender<()>,
}

impl ProcessHandle {
    fn exit_info(&self) -> Option<ExitInfo> {
        *self.exit.borrow()
    }

    async fn wait_exit(&mut self) -> Option<ExitInfo> {
        self.exit
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|info| *info)
    }

    /// Ask the waiter task to kill through the child handle.
    fn request_kill(&self) {
        let _ = self.kill.try_send(());
    }
}

pub struct BackendSupervisor {
    config: SupervisorConfig,
    classifier: Arc<dyn OutputClassifier>,
    handle: Mutex<Option<ProcessHandle>>,
    state: Arc<StateLock<LifecycleState>>,
}

impl BackendSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            classifier: Arc::new(MarkerClassifier::default()),
            handle: Mutex::new(None),
            state: Arc::new(StateLock::new(LifecycleState::NotStarted)),
        }
    }

    /// Replace the marker matching, e.g. with configured markers.
    pub fn with_classifier(mut self, classifier: Arc<dyn OutputClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    pub async fn pid(&self) -> Option<u32> {
        self.handle.lock().await.as_ref().map(|handle| handle.pid)
    }

    pub async fn snapshot(&self) -> Option<ProcessSnapshot> {
        let guard = self.handle.lock().await;
        guard.as_ref().map(|handle| ProcessSnapshot {
            pid: handle.pid,
            executable: handle.executable.clone(),
            started_at: handle.started_at,
            state: self.state(),
            exit: handle.exit_info(),
        })
    }

    /// Resolves once the spawned backend has exited, whoever caused it.
    /// Never resolves when no process was spawned.
    pub async fn exited(&self) -> ExitInfo {
        let receiver = self
            .handle
            .lock()
            .await
            .as_ref()
            .map(|handle| handle.exit.clone());
        let observed = match receiver {
            Some(mut exit) => exit.wait_for(Option::is_some).await.ok().and_then(|info| *info),
            None => None,
        };
        match observed {
            Some(info) => info,
            None => std::future::pending().await,
        }
    }

    /// Spawn the backend and wait until it is ready, failed, or timed out.
    ///
    /// Only one start per supervisor: a second call is rejected while a
    /// process is active and after the first run has ended.
    pub async fn start(&self) -> Result<StartOutcome, SupervisorError> {
        let executable = match &self.config.launch {
            BackendLaunch::External => {
                info!("development mode: backend is managed externally, nothing to spawn");
                return Ok(StartOutcome::External);
            }
            BackendLaunch::Executable(path) => path.clone(),
        };

        let started = Instant::now();
        let (reply_tx, reply_rx) = oneshot::channel();

        let pid = {
            let mut slot = self.handle.lock().await;
            if let Some(active) = slot.as_ref() {
                return Err(SupervisorError::AlreadyRunning { pid: active.pid });
            }
            let state = self.state();
            if state != LifecycleState::NotStarted {
                return Err(SupervisorError::AlreadyStarted { state });
            }

            if !executable.is_file() {
                self.set_state(LifecycleState::Failed);
                error!(path = %executable.display(), "backend executable not found");
                return Err(SupervisorError::ExecutableNotFound { path: executable });
            }

            self.set_state(LifecycleState::Spawning);
            info!(path = %executable.display(), "starting backend");

            let mut child = match spawn_backend(&executable) {
                Ok(child) => child,
                Err(source) => {
                    self.set_state(LifecycleState::Failed);
                    error!(path = %executable.display(), error = %source, "failed to spawn backend");
                    return Err(SupervisorError::Spawn {
                        path: executable,
                        source,
                    });
                }
            };
            let Some(pid) = child.id() else {
                self.set_state(LifecycleState::Failed);
                return Err(SupervisorError::Spawn {
                    path: executable,
                    source: io::Error::other("backend exited before its pid was known"),
                });
            };

            let (events_tx, events_rx) = mpsc::unbounded_channel();
            let (exit_tx, exit_rx) = watch::channel(None);
            let (kill_tx, kill_rx) = mpsc::channel(1);

            let mut readers = Vec::with_capacity(2);
            if let Some(stdout) = child.stdout.take() {
                readers.push(tokio::spawn(forward_output(
                    stdout,
                    OutputStream::Stdout,
                    pid,
                    events_tx.clone(),
                )));
            }
            if let Some(stderr) = child.stderr.take() {
                readers.push(tokio::spawn(forward_output(
                    stderr,
                    OutputStream::Stderr,
                    pid,
                    events_tx.clone(),
                )));
            }
            tokio::spawn(wait_for_exit(child, pid, readers, kill_rx, events_tx, exit_tx));

            let tracker = ReadinessTracker::new(self.classifier.clone(), self.config.buffer_limit);
            tokio::spawn(drive_readiness(
                events_rx,
                tracker,
                self.config.readiness_timeout,
                reply_tx,
                self.state.clone(),
            ));

            *slot = Some(ProcessHandle {
                pid,
                executable,
                started_at: Utc::now(),
                exit: exit_rx,
                kill: kill_tx,
            });
            pid
        };

        debug!(pid, "backend spawned, waiting for readiness");
        let resolution = reply_rx.await;
        self.conclude_start(pid, started, resolution).await
    }

    async fn conclude_start(
        &self,
        pid: u32,
        started: Instant,
        resolution: Result<Resolution, oneshot::error::RecvError>,
    ) -> Result<StartOutcome, SupervisorError> {
        let outcome = match resolution {
            Ok(Resolution::Ready) => Ok(StartOutcome::Ready {
                pid,
                elapsed: started.elapsed(),
            }),
            Ok(Resolution::TimedOut) => self.readiness_fallback(pid).await,
            Ok(Resolution::Fatal { detail, .. }) => Err(SupervisorError::PortConflict { detail }),
            Ok(Resolution::Exited { code }) => Err(SupervisorError::PrematureExit { code }),
            Err(_) => Err(SupervisorError::Io(io::Error::other(
                "backend event stream closed before readiness was decided",
            ))),
        };

        match &outcome {
            Ok(result) => {
                self.advance(LifecycleState::Spawning, LifecycleState::Ready);
                info!(pid, outcome = ?result, "backend ready");
            }
            Err(err) => {
                error!(pid, error = %err, "backend failed to start");
                self.abort_start(pid).await;
                self.advance(LifecycleState::Spawning, LifecycleState::Failed);
            }
        }
        outcome
    }

    async fn readiness_fallback(&self, pid: u32) -> Result<StartOutcome, SupervisorError> {
        let timeout_ms = self.config.readiness_timeout.as_millis() as u64;
        match self.config.fallback {
            ReadinessFallback::Optimistic => {
                warn!(
                    pid,
                    timeout_ms, "no readiness marker from backend, continuing without confirmation"
                );
                Ok(StartOutcome::AssumedReady { pid })
            }
            ReadinessFallback::Probe => {
                warn!(pid, timeout_ms, "no readiness marker from backend, probing it over HTTP");
                let reachable = match ApiClient::new(&self.config.backend_url) {
                    Ok(client) => client.probe().await,
                    Err(err) => {
                        warn!(error = %err, "cannot build backend probe");
                        false
                    }
                };
                if reachable {
                    Ok(StartOutcome::AssumedReady { pid })
                } else {
                    Err(SupervisorError::ReadinessTimeout { timeout_ms })
                }
            }
        }
    }

    /// Kill whatever is left of a failed start.
    async fn abort_start(&self, pid: u32) {
        let handle = {
            let mut slot = self.handle.lock().await;
            match slot.as_ref() {
                Some(handle) if handle.pid == pid => slot.take(),
                _ => None,
            }
        };
        if let Some(handle) = handle {
            let report = terminate(handle, self.config.grace).await;
            debug!(pid, ?report, "cleaned up failed backend");
        }
    }

    /// Terminate the backend. Never fails; safe to call any number of times.
    pub async fn stop(&self) -> StopReport {
        let handle = self.handle.lock().await.take();
        let Some(handle) = handle else {
            self.advance(LifecycleState::Failed, LifecycleState::Terminated);
            debug!("stop requested with no active backend");
            return StopReport::NotRunning;
        };

        self.set_state(LifecycleState::Terminating);
        let report = terminate(handle, self.config.grace).await;
        self.set_state(LifecycleState::Terminated);
        info!(?report, "backend stopped");
        report
    }

    fn set_state(&self, next: LifecycleState) {
        let mut state = self.state.lock();
        debug!(from = %*state, to = %next, "backend state change");
        *state = next;
    }

    fn advance(&self, from: LifecycleState, to: LifecycleState) -> bool {
        let mut state = self.state.lock();
        if *state != from {
            return false;
        }
        debug!(from = %from, to = %to, "backend state change");
        *state = to;
        true
    }
}

impl Drop for BackendSupervisor {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.get_mut().take() {
            if handle.exit_info().is_none() {
                warn!(pid = handle.pid, "supervisor dropped with backend running, killing it");
                #[cfg(unix)]
                {
                    let _ = platform::send_kill(handle.pid);
                }
                handle.request_kill();
            }
        }
    }
}

fn spawn_backend(executable: &Path) -> io::Result<Child> {
    let mut command = Command::new(executable);
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = executable.parent() {
        command.current_dir(dir);
    }
    platform::prepare_command(&mut command)?;
    command.spawn()
}

/// Graceful signal, grace window, then forced kill.
///
/// The grace timer and the exit notification race; when the exit wins the
/// timer is dropped and no forced kill is ever sent.
async fn terminate(mut handle: ProcessHandle, grace: Duration) -> StopReport {
    let pid = handle.pid;
    if let Some(exit) = handle.exit_info() {
        debug!(pid, code = ?exit.code, "backend already exited");
        return StopReport::AlreadyExited {
            pid,
            code: exit.code,
        };
    }

    #[cfg(unix)]
    {
        info!(pid, grace_ms = grace.as_millis() as u64, "sending SIGTERM to backend");
        if let Err(err) = platform::send_graceful(pid) {
            warn!(pid, error = %err, "SIGTERM failed");
        }

        tokio::select! {
            exit = handle.wait_exit() => {
                return StopReport::Graceful {
                    pid,
                    code: exit.and_then(|info| info.code),
                };
            }
            _ = tokio::time::sleep(grace) => {}
        }

        warn!(pid, "backend still running after grace window, sending SIGKILL");
        if let Err(err) = platform::send_kill(pid) {
            warn!(pid, error = %err, "SIGKILL failed, killing through child handle");
            handle.request_kill();
        }
    }

    #[cfg(windows)]
    {
        let _ = grace;
        info!(pid, "killing backend process tree");
        if let Err(err) = platform::tree_kill(pid).await {
            warn!(pid, error = %err, "taskkill failed, killing through child handle");
            handle.request_kill();
        }
    }

    if tokio::time::timeout(REAP_TIMEOUT, handle.wait_exit())
        .await
        .is_err()
    {
        warn!(pid, "backend did not exit after forced kill");
    }
    StopReport::Forced { pid }
}

async fn forward_output<R>(
    mut reader: R,
    stream: OutputStream,
    pid: u32,
    events: mpsc::UnboundedSender<ProcessEvent>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut buffer = [0u8; 8192];
    loop {
        let read = match reader.read(&mut buffer).await {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) => {
                warn!(pid, stream = stream.as_str(), error = %err, "failed to read backend output");
                break;
            }
        };
        let text = String::from_utf8_lossy(&buffer[..read]).into_owned();
        for line in text.lines().filter(|line| !line.trim().is_empty()) {
            info!(target: "studydesk::backend", pid, stream = stream.as_str(), "{}", line);
        }
        // Keep draining even once nobody listens, or the pipe fills up.
        let _ = events.send(ProcessEvent::Output { stream, text });
    }
}

async fn wait_for_exit(
    mut child: Child,
    pid: u32,
    readers: Vec<JoinHandle<()>>,
    mut kill_requests: mpsc::Receiver<()>,
    events: mpsc::UnboundedSender<ProcessEvent>,
    exit: watch::Sender<Option<ExitInfo>>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        Some(()) = kill_requests.recv() => {
            debug!(pid, "killing backend through its child handle");
            if let Err(err) = child.start_kill() {
                warn!(pid, error = %err, "direct kill failed");
            }
            child.wait().await
        }
    };

    let code = match status {
        Ok(status) => {
            info!(pid, %status, "backend exited");
            status.code()
        }
        Err(err) => {
            error!(pid, error = %err, "failed to wait for backend");
            None
        }
    };
    exit.send_replace(Some(ExitInfo { code }));

    // Output written before the exit has to reach the driver before the exit does.
    // A grandchild holding the pipes open must not stall it.
    let drained = tokio::time::timeout(REAP_TIMEOUT, async {
        for reader in readers {
            let _ = reader.await;
        }
    })
    .await;
    if drained.is_err() {
        warn!(pid, "backend output still open after exit, not waiting for it");
    }
    let _ = events.send(ProcessEvent::Exited { code });
}

/// Turn process events into the single start resolution.
///
/// Keeps consuming after resolving so a backend that dies later is noticed.
async fn drive_readiness(
    mut events: mpsc::UnboundedReceiver<ProcessEvent>,
    mut tracker: ReadinessTracker,
    timeout: Duration,
    reply: oneshot::Sender<Resolution>,
    state: Arc<StateLock<LifecycleState>>,
) {
    let deadline = Instant::now() + timeout;
    let mut reply = Some(reply);

    loop {
        let event = if reply.is_some() {
            match tokio::time::timeout_at(deadline, events.recv()).await {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(_) => ProcessEvent::TimedOut,
            }
        } else {
            match events.recv().await {
                Some(event) => event,
                None => break,
            }
        };

        if let Some(resolution) = tracker.observe(&event) {
            if let Some(reply) = reply.take() {
                let _ = reply.send(resolution);
            }
            continue;
        }

        if let ProcessEvent::Exited { code } = event {
            match *state.lock() {
                LifecycleState::Terminating | LifecycleState::Terminated => {
                    debug!(?code, "backend exit observed during shutdown");
                }
                current => {
                    error!(?code, state = %current, "backend exited unexpectedly");
                }
            }
        }
    }
}
