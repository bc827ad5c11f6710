//! Error types for the studydesk shell
//!
//! Startup failures are classified so the shell can tell the user what went
//! wrong; shutdown failures never leave the supervisor and have no type here.

use crate::supervisor::LifecycleState;
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failures of the backend process supervisor.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("backend is already running (pid {pid})")]
    AlreadyRunning { pid: u32 },

    #[error("backend supervisor already used for this run (state: {state})")]
    AlreadyStarted { state: LifecycleState },

    #[error("backend executable not found: {}", path.display())]
    ExecutableNotFound { path: PathBuf },

    #[error("failed to spawn backend {}: {source}", path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("backend port is already in use: {detail}")]
    PortConflict { detail: String },

    #[error("backend exited before becoming ready ({})", describe_exit(*code))]
    PrematureExit { code: Option<i32> },

    #[error("backend not reachable after {timeout_ms}ms without a readiness marker")]
    ReadinessTimeout { timeout_ms: u64 },

    #[error("backend supervision failed: {0}")]
    Io(#[from] io::Error),
}

fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}

/// Coarse failure classification, used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    AlreadyRunning,
    Spawn,
    PortConflict,
    PrematureExit,
    ReadinessTimeout,
    Internal,
}

impl FailureKind {
    pub fn display_name(&self) -> &'static str {
        match self {
            FailureKind::AlreadyRunning => "Backend already running",
            FailureKind::Spawn => "Backend could not be started",
            FailureKind::PortConflict => "Backend port in use",
            FailureKind::PrematureExit => "Backend stopped unexpectedly",
            FailureKind::ReadinessTimeout => "Backend not responding",
            FailureKind::Internal => "Internal error",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl SupervisorError {
    pub fn kind(&self) -> FailureKind {
        match self {
            SupervisorError::AlreadyRunning { .. } | SupervisorError::AlreadyStarted { .. } => {
                FailureKind::AlreadyRunning
            }
            SupervisorError::ExecutableNotFound { .. } | SupervisorError::Spawn { .. } => {
                FailureKind::Spawn
            }
            SupervisorError::PortConflict { .. } => FailureKind::PortConflict,
            SupervisorError::PrematureExit { .. } => FailureKind::PrematureExit,
            SupervisorError::ReadinessTimeout { .. } => FailureKind::ReadinessTimeout,
            SupervisorError::Io(_) => FailureKind::Internal,
        }
    }

    /// Text shown in the startup-failure dialog.
    pub fn user_message(&self) -> String {
        match self {
            SupervisorError::AlreadyRunning { pid } => {
                format!("The study backend is already running (process {pid}).")
            }
            SupervisorError::AlreadyStarted { state } => {
                format!("The study backend was already started once in this session ({state}).")
            }
            SupervisorError::ExecutableNotFound { path } => format!(
                "The study backend was not found at {}. Reinstall the application.",
                path.display()
            ),
            SupervisorError::Spawn { path, source } => format!(
                "The study backend at {} could not be started: {}",
                path.display(),
                source
            ),
            SupervisorError::PortConflict { .. } => {
                "The study backend could not open its port because another program is using it. \
                 Close the other program (or another running copy of this app) and try again."
                    .to_string()
            }
            SupervisorError::PrematureExit { code } => format!(
                "The study backend stopped during startup ({}).",
                describe_exit(*code)
            ),
            SupervisorError::ReadinessTimeout { timeout_ms } => format!(
                "The study backend did not answer within {:.1} seconds.",
                *timeout_ms as f64 / 1000.0
            ),
            SupervisorError::Io(err) => format!("Unexpected error while starting the backend: {err}"),
        }
    }
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration value for {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

/// Errors of the `/api` client contract.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid API url: {0}")]
    Url(#[from] url::ParseError),

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Non-2xx answer; `body` is the server's text, verbatim.
    #[error("{body}")]
    Status { status: u16, body: String },

    #[error("invalid JSON from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Top-level errors of the command handlers.
#[derive(Debug, Error)]
pub enum ShellError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("cannot locate the install directory: {0}")]
    InstallDir(#[source] io::Error),

    #[error("failed to listen for shutdown signals: {0}")]
    Signal(#[source] io::Error),
}

pub type ShellResult<T> = Result<T, ShellError>;
