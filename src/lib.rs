//! Study Desk shell
//!
//! Desktop host for the study planner: supervises the bundled backend
//! process (spawn, readiness detection, graceful-then-forced shutdown), opens
//! the UI, and exposes a small client for the backend's `/api` contract.

pub mod api;
pub mod commands;
pub mod config;
pub mod error;
pub mod platform;
pub mod readiness;
pub mod shell;
pub mod signal;
pub mod supervisor;
pub mod utils;

pub use api::ApiClient;
pub use config::{DeploymentMode, ReadinessFallback, ShellConfig};
pub use error::{ApiError, ConfigError, FailureKind, ShellError, SupervisorError};
pub use readiness::{MarkerClassifier, OutputClass, OutputClassifier, OutputStream};
pub use shell::{ShellExit, ShellHost, UiLocation};
pub use signal::{ShutdownHandle, ShutdownListener, ShutdownTrigger};
pub use supervisor::{
    BackendSupervisor, LifecycleState, StartOutcome, StopReport, SupervisorConfig,
};
