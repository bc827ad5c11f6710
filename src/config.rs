//! Shell configuration
//!
//! Fixed constants of the backend contract plus the layered [`ShellConfig`]
//! (built-in defaults, then `~/.studydesk/config.toml`, then `STUDYDESK__*`
//! environment variables).

use crate::error::ConfigError;
use crate::utils::ConfigPaths;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const BACKEND_DIR: &str = "backend";
pub const BACKEND_HOST: &str = "127.0.0.1";
pub const BACKEND_PORT: u16 = 5000;
pub const DEV_UI_URL: &str = "http://localhost:5173";
pub const UI_DIST_DIR: &str = "dist";
pub const UI_RENDERER_DIR: &str = "renderer";
pub const UI_ENTRY_FILE: &str = "index.html";
pub const RESOURCES_DIR: &str = "resources";

pub const READY_MARKERS: &[&str] = &["Running on", "Serving Flask app"];
pub const PORT_CONFLICT_MARKERS: &[&str] = &["Address already in use", "port is already in use"];

pub const READINESS_TIMEOUT: Duration = Duration::from_secs(10);
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);
// Upper bound for reaping a child after SIGKILL / taskkill
pub const REAP_TIMEOUT: Duration = Duration::from_secs(1);
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
// Per-stream accumulation used for marker matching (64KB)
pub const OUTPUT_BUFFER_LIMIT: usize = 64 * 1024;

pub const ENV_PREFIX: &str = "STUDYDESK";
pub const CONFIG_DIRECTORY: &str = ".studydesk";
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Where the backend comes from for this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    /// Backend and UI dev server are started externally.
    Development,
    /// Backend executable ships inside the resources directory.
    Packaged,
}

impl DeploymentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentMode::Development => "development",
            DeploymentMode::Packaged => "packaged",
        }
    }
}

/// What happens when no readiness marker shows up in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReadinessFallback {
    /// Proceed as if the backend were ready.
    #[default]
    Optimistic,
    /// Ask the backend over HTTP; fail the start if nothing answers.
    Probe,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessSettings {
    pub timeout_ms: u64,
    pub fallback: ReadinessFallback,
    pub ready_markers: Vec<String>,
    pub fatal_markers: Vec<String>,
    pub buffer_limit: usize,
}

impl Default for ReadinessSettings {
    fn default() -> Self {
        Self {
            timeout_ms: READINESS_TIMEOUT.as_millis() as u64,
            fallback: ReadinessFallback::default(),
            ready_markers: READY_MARKERS.iter().map(|s| s.to_string()).collect(),
            fatal_markers: PORT_CONFLICT_MARKERS.iter().map(|s| s.to_string()).collect(),
            buffer_limit: OUTPUT_BUFFER_LIMIT,
        }
    }
}

impl ReadinessSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownSettings {
    pub grace_ms: u64,
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self {
            grace_ms: SHUTDOWN_GRACE.as_millis() as u64,
        }
    }
}

impl ShutdownSettings {
    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }
}

/// Complete shell configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// Forced deployment mode; detected from the install layout when unset
    pub mode: Option<DeploymentMode>,
    /// Packaged resources directory (holds `backend/` and `dist/`)
    pub resources_dir: Option<PathBuf>,
    /// Explicit backend executable, overrides the resources lookup
    pub backend_executable: Option<PathBuf>,
    pub backend_url: String,
    pub dev_ui_url: String,
    pub open_ui: bool,
    pub readiness: ReadinessSettings,
    pub shutdown: ShutdownSettings,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            mode: None,
            resources_dir: None,
            backend_executable: None,
            backend_url: default_backend_url(),
            dev_ui_url: DEV_UI_URL.to_string(),
            open_ui: true,
            readiness: ReadinessSettings::default(),
            shutdown: ShutdownSettings::default(),
        }
    }
}

pub fn default_backend_url() -> String {
    format!("http://{}:{}", BACKEND_HOST, BACKEND_PORT)
}

/// `~/.studydesk/config.toml`, when a home directory is known.
pub fn default_config_path() -> Option<PathBuf> {
    ConfigPaths::new().ok().map(|paths| paths.config_file)
}

impl ShellConfig {
    /// Load the layered configuration.
    ///
    /// An explicit `path` must exist; the default per-user file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file_source = match path {
            Some(explicit) => Some(
                File::from(explicit.to_path_buf())
                    .format(FileFormat::Toml)
                    .required(true),
            ),
            None => default_config_path().map(|default| {
                File::from(default).format(FileFormat::Toml).required(false)
            }),
        };
        Self::load_from(file_source)
    }

    fn load_from(
        file_source: Option<File<config::FileSourceFile, FileFormat>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = Config::builder().add_source(Config::try_from(&ShellConfig::default())?);
        if let Some(source) = file_source {
            builder = builder.add_source(source);
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let loaded: ShellConfig = builder.build()?.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.readiness.timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "readiness.timeout_ms",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.shutdown.grace_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "shutdown.grace_ms",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.readiness.ready_markers.iter().all(|m| m.is_empty()) {
            return Err(ConfigError::Invalid {
                field: "readiness.ready_markers",
                message: "at least one non-empty marker is required".to_string(),
            });
        }
        if self.readiness.buffer_limit == 0 {
            return Err(ConfigError::Invalid {
                field: "readiness.buffer_limit",
                message: "must be greater than zero".to_string(),
            });
        }
        url::Url::parse(&self.backend_url).map_err(|err| ConfigError::Invalid {
            field: "backend_url",
            message: err.to_string(),
        })?;
        url::Url::parse(&self.dev_ui_url).map_err(|err| ConfigError::Invalid {
            field: "dev_ui_url",
            message: err.to_string(),
        })?;
        Ok(())
    }
}
