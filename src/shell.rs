//! Shell host
//!
//! Ties one application run together: decide the deployment mode, start the
//! backend, show the UI, wait for a shutdown trigger and stop the backend.
//! Startup failures are surfaced through a [`FailureReporter`].

use crate::config::{
    DeploymentMode, ShellConfig, BACKEND_DIR, RESOURCES_DIR, UI_DIST_DIR, UI_ENTRY_FILE,
    UI_RENDERER_DIR,
};
use crate::error::{FailureKind, SupervisorError};
use crate::readiness::MarkerClassifier;
use crate::signal::{ShutdownHandle, ShutdownListener};
use crate::supervisor::{backend_executable, BackendSupervisor, StartOutcome, SupervisorConfig};
use colored::Colorize;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Environment override for the deployment mode.
pub const MODE_ENV: &str = "STUDYDESK_MODE";

/// Exit status of a shell run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellExit {
    /// Ran and shut down normally.
    Normal,
    /// The backend could not be started.
    StartupFailure,
    /// The backend died while the UI was up.
    BackendLost,
}

impl ShellExit {
    pub fn code(&self) -> u8 {
        match self {
            ShellExit::Normal => 0,
            ShellExit::StartupFailure | ShellExit::BackendLost => 1,
        }
    }
}

/// Where the UI is loaded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiLocation {
    /// Dev server URL
    Url(String),
    /// Bundled entry page
    File(PathBuf),
}

impl fmt::Display for UiLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UiLocation::Url(url) => f.write_str(url),
            UiLocation::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Loads the UI.
///
/// A launcher hosting its own window reports closing it, or a quit request,
/// through the `shutdown` handle it is given.
pub trait UiLauncher: Send + Sync {
    fn open(&self, location: &UiLocation, shutdown: ShutdownHandle) -> io::Result<()>;
}

/// Opens the UI with the platform's default handler.
#[derive(Debug, Default)]
pub struct SystemOpener;

// The default handler's window is not observable, so only OS signals end the run.
impl UiLauncher for SystemOpener {
    fn open(&self, location: &UiLocation, _shutdown: ShutdownHandle) -> io::Result<()> {
        match location {
            UiLocation::Url(url) => open::that(url),
            UiLocation::File(path) => {
                if !path.is_file() {
                    return Err(io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("UI entry page not found: {}", path.display()),
                    ));
                }
                open::that(path)
            }
        }
    }
}

/// Used with `--no-ui`.
#[derive(Debug, Default)]
pub struct HeadlessLauncher;

impl UiLauncher for HeadlessLauncher {
    fn open(&self, location: &UiLocation, _shutdown: ShutdownHandle) -> io::Result<()> {
        info!(%location, "UI loading disabled");
        Ok(())
    }
}

/// User-facing description of a failed start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupFailure {
    pub kind: FailureKind,
    pub message: String,
    pub detail: String,
}

impl StartupFailure {
    pub fn title(&self) -> String {
        format!("Study Desk: {}", self.kind)
    }
}

impl From<&SupervisorError> for StartupFailure {
    fn from(err: &SupervisorError) -> Self {
        Self {
            kind: err.kind(),
            message: err.user_message(),
            detail: err.to_string(),
        }
    }
}

pub trait FailureReporter: Send + Sync {
    fn report(&self, failure: &StartupFailure);
}

/// Prints the failure to stderr.
#[derive(Debug, Default)]
pub struct ConsoleReporter;

impl FailureReporter for ConsoleReporter {
    fn report(&self, failure: &StartupFailure) {
        eprintln!();
        eprintln!("{} {}", "❌".red(), failure.title().red().bold());
        eprintln!("   {}", failure.message);
        eprintln!("   {}", failure.detail.dimmed());
        eprintln!();
    }
}

/// Desktop notification, plus the console message.
#[derive(Debug, Default)]
pub struct DesktopReporter {
    console: ConsoleReporter,
}

impl FailureReporter for DesktopReporter {
    fn report(&self, failure: &StartupFailure) {
        let shown = notify_rust::Notification::new()
            .appname("Study Desk")
            .summary(&failure.title())
            .body(&failure.message)
            .show()
            .map(|_| ());
        if let Err(err) = shown {
            warn!(error = %err, "desktop notification unavailable");
        }
        self.console.report(failure);
    }
}

/// Pick the deployment mode.
///
/// Order: configured mode, `STUDYDESK_MODE`, an explicit backend executable,
/// then whether `<resources>/backend` exists.
pub fn detect_mode(config: &ShellConfig, resources_dir: &Path) -> DeploymentMode {
    if let Some(mode) = config.mode {
        return mode;
    }
    if let Some(mode) = mode_from_env() {
        return mode;
    }
    if config.backend_executable.is_some() || resources_dir.join(BACKEND_DIR).is_dir() {
        DeploymentMode::Packaged
    } else {
        DeploymentMode::Development
    }
}

fn mode_from_env() -> Option<DeploymentMode> {
    let value = std::env::var(MODE_ENV).ok()?;
    match value.trim().to_ascii_lowercase().as_str() {
        "development" | "dev" => Some(DeploymentMode::Development),
        "packaged" | "production" | "prod" => Some(DeploymentMode::Packaged),
        other => {
            warn!(value = other, "ignoring unknown {}", MODE_ENV);
            None
        }
    }
}

/// Configured resources directory, or `resources/` next to the executable.
pub fn resolve_resources_dir(config: &ShellConfig, install_dir: &Path) -> PathBuf {
    config
        .resources_dir
        .clone()
        .unwrap_or_else(|| install_dir.join(RESOURCES_DIR))
}

/// Directory holding the running executable.
pub fn install_dir() -> io::Result<PathBuf> {
    let exe = std::env::current_exe()?;
    exe.parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| io::Error::other("executable has no parent directory"))
}

pub fn ui_location(mode: DeploymentMode, config: &ShellConfig, resources_dir: &Path) -> UiLocation {
    match mode {
        DeploymentMode::Development => UiLocation::Url(config.dev_ui_url.clone()),
        DeploymentMode::Packaged => UiLocation::File(
            resources_dir
                .join(UI_DIST_DIR)
                .join(UI_RENDERER_DIR)
                .join(UI_ENTRY_FILE),
        ),
    }
}

pub struct ShellHost {
    mode: DeploymentMode,
    ui: UiLocation,
    supervisor: BackendSupervisor,
    launcher: Box<dyn UiLauncher>,
    reporter: Box<dyn FailureReporter>,
}

impl ShellHost {
    /// Build a host for the install rooted at `install_dir`.
    pub fn new(config: &ShellConfig, install_dir: &Path) -> Self {
        let resources_dir = resolve_resources_dir(config, install_dir);
        let mode = detect_mode(config, &resources_dir);
        let executable = config
            .backend_executable
            .clone()
            .unwrap_or_else(|| backend_executable(&resources_dir));
        let classifier = Arc::new(MarkerClassifier::from_settings(&config.readiness));
        let supervisor =
            BackendSupervisor::new(SupervisorConfig::from_shell(config, mode, executable))
                .with_classifier(classifier);
        let launcher: Box<dyn UiLauncher> = if config.open_ui {
            Box::new(SystemOpener)
        } else {
            Box::new(HeadlessLauncher)
        };

        Self {
            mode,
            ui: ui_location(mode, config, &resources_dir),
            supervisor,
            launcher,
            reporter: Box::new(DesktopReporter::default()),
        }
    }

    pub fn with_launcher(mut self, launcher: Box<dyn UiLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn with_reporter(mut self, reporter: Box<dyn FailureReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn mode(&self) -> DeploymentMode {
        self.mode
    }

    pub fn ui(&self) -> &UiLocation {
        &self.ui
    }

    pub fn supervisor(&self) -> &BackendSupervisor {
        &self.supervisor
    }

    /// Run until a shutdown trigger; the backend is stopped on every path out.
    pub async fn run(&self, shutdown: &mut ShutdownListener) -> ShellExit {
        info!(mode = self.mode.as_str(), ui = %self.ui, "starting shell");

        let started = tokio::select! {
            biased;
            result = self.supervisor.start() => Some(result),
            trigger = shutdown.recv() => {
                info!(trigger = trigger.as_str(), "shutdown requested during backend startup");
                None
            }
        };

        let outcome = match started {
            None => {
                self.supervisor.stop().await;
                return ShellExit::Normal;
            }
            Some(Err(err)) => {
                error!(error = %err, "backend startup failed");
                self.reporter.report(&StartupFailure::from(&err));
                self.supervisor.stop().await;
                return ShellExit::StartupFailure;
            }
            Some(Ok(outcome)) => outcome,
        };
        if let StartOutcome::AssumedReady { pid } = outcome {
            warn!(pid, "loading UI without confirmed backend readiness");
        }

        if let Err(err) = self.launcher.open(&self.ui, shutdown.handle()) {
            error!(ui = %self.ui, error = %err, "failed to load UI");
        }

        let exit = tokio::select! {
            trigger = shutdown.recv() => {
                info!(trigger = trigger.as_str(), "shutting down");
                ShellExit::Normal
            }
            exit = self.supervisor.exited() => {
                error!(code = ?exit.code, "backend exited unexpectedly, shutting down");
                ShellExit::BackendLost
            }
        };
        let report = self.supervisor.stop().await;
        info!(?report, "shell stopped");
        exit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    #[derive(Clone, Default)]
    struct Recorder {
        failures: Arc<Mutex<Vec<StartupFailure>>>,
        opened: Arc<Mutex<Vec<UiLocation>>>,
        close_window: bool,
    }

    impl FailureReporter for Recorder {
        fn report(&self, failure: &StartupFailure) {
            self.failures.lock().push(failure.clone());
        }
    }

    impl UiLauncher for Recorder {
        fn open(&self, location: &UiLocation, shutdown: ShutdownHandle) -> io::Result<()> {
            self.opened.lock().push(location.clone());
            if self.close_window {
                shutdown.window_closed();
            }
            Ok(())
        }
    }

    fn host(config: &ShellConfig, install: &Path, recorder: &Recorder) -> ShellHost {
        ShellHost::new(config, install)
            .with_launcher(Box::new(recorder.clone()))
            .with_reporter(Box::new(recorder.clone()))
    }

    #[test]
    #[serial]
    fn layout_decides_mode_when_unset() {
        let install = TempDir::new().unwrap();
        let config = ShellConfig::default();
        let resources = resolve_resources_dir(&config, install.path());
        assert_eq!(detect_mode(&config, &resources), DeploymentMode::Development);

        fs::create_dir_all(resources.join(BACKEND_DIR)).unwrap();
        assert_eq!(detect_mode(&config, &resources), DeploymentMode::Packaged);
    }

    #[test]
    #[serial]
    fn configured_mode_wins_over_layout() {
        let install = TempDir::new().unwrap();
        fs::create_dir_all(install.path().join(RESOURCES_DIR).join(BACKEND_DIR)).unwrap();
        let config = ShellConfig {
            mode: Some(DeploymentMode::Development),
            ..ShellConfig::default()
        };
        let resources = resolve_resources_dir(&config, install.path());
        assert_eq!(detect_mode(&config, &resources), DeploymentMode::Development);
    }

    #[test]
    fn ui_location_follows_mode() {
        let config = ShellConfig::default();
        let resources = Path::new("/opt/studydesk/resources");
        assert_eq!(
            ui_location(DeploymentMode::Development, &config, resources),
            UiLocation::Url("http://localhost:5173".to_string())
        );
        assert_eq!(
            ui_location(DeploymentMode::Packaged, &config, resources),
            UiLocation::File(PathBuf::from(
                "/opt/studydesk/resources/dist/renderer/index.html"
            ))
        );
    }

    #[test]
    fn failure_carries_kind_and_message() {
        let err = SupervisorError::PrematureExit { code: Some(2) };
        let failure = StartupFailure::from(&err);
        assert_eq!(failure.kind, FailureKind::PrematureExit);
        assert!(failure.title().contains("Backend stopped unexpectedly"));
        assert!(failure.message.contains("exit code 2"));
    }

    #[test]
    fn exit_codes() {
        assert_eq!(ShellExit::Normal.code(), 0);
        assert_eq!(ShellExit::StartupFailure.code(), 1);
        assert_eq!(ShellExit::BackendLost.code(), 1);
    }

    #[tokio::test]
    #[serial]
    async fn missing_backend_is_reported_and_ui_never_loads() {
        let install = TempDir::new().unwrap();
        let config = ShellConfig {
            mode: Some(DeploymentMode::Packaged),
            ..ShellConfig::default()
        };
        let recorder = Recorder::default();
        let host = host(&config, install.path(), &recorder);
        let mut shutdown = ShutdownListener::new();

        assert_eq!(host.run(&mut shutdown).await, ShellExit::StartupFailure);
        let failures = recorder.failures.lock();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].kind, FailureKind::Spawn);
        assert!(recorder.opened.lock().is_empty());
    }

    #[tokio::test]
    #[serial]
    async fn development_run_loads_dev_url_and_exits_on_window_close() {
        let install = TempDir::new().unwrap();
        let config = ShellConfig {
            mode: Some(DeploymentMode::Development),
            ..ShellConfig::default()
        };
        let recorder = Recorder {
            close_window: true,
            ..Recorder::default()
        };
        let host = host(&config, install.path(), &recorder);
        let mut shutdown = ShutdownListener::new();

        assert_eq!(host.run(&mut shutdown).await, ShellExit::Normal);
        assert_eq!(
            *recorder.opened.lock(),
            vec![UiLocation::Url("http://localhost:5173".to_string())]
        );
        assert!(recorder.failures.lock().is_empty());
    }
}
