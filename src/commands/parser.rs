//! Command line parsing
//!
//! `studydesk` with no subcommand behaves like `studydesk run`.

use crate::api::parse_method;
use crate::config::{DeploymentMode, ShellConfig};
use clap::{Args, Parser, Subcommand};
use reqwest::Method;
use serde_json::Value;
use std::ffi::OsString;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "studydesk",
    about = "Desktop shell for the study planner: runs the bundled backend and opens the UI",
    version
)]
pub struct Cli {
    /// Log filter, e.g. `debug` or `info,studydesk::backend=warn` (default: RUST_LOG)
    #[arg(long, global = true, value_name = "FILTER")]
    pub log_level: Option<String>,

    /// Write logs to this file as well
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Configuration file (default: ~/.studydesk/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the backend, open the UI and wait for shutdown
    Run(RunArgs),

    /// Check whether the backend answers HTTP
    Probe {
        /// Backend base URL (default: configured backend_url)
        #[arg(long)]
        url: Option<String>,
        /// Give up after this many milliseconds
        #[arg(long, default_value_t = 2000)]
        timeout_ms: u64,
    },

    /// Call an endpoint of the backend's /api
    Api {
        /// GET, POST, PUT or DELETE
        #[arg(value_parser = parse_method_arg)]
        method: Method,
        /// Path below /api, e.g. /disciplines
        path: String,
        /// JSON request body
        #[arg(long, value_parser = parse_json_arg)]
        data: Option<Value>,
        /// Backend base URL (default: configured backend_url)
        #[arg(long)]
        url: Option<String>,
    },
}

#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct RunArgs {
    /// Backend and UI dev server run externally
    #[arg(long, conflicts_with = "packaged")]
    pub dev: bool,

    /// Spawn the bundled backend
    #[arg(long)]
    pub packaged: bool,

    /// Resources directory holding backend/ and dist/
    #[arg(long, value_name = "DIR")]
    pub resources: Option<PathBuf>,

    /// Backend executable to spawn instead of <resources>/backend/app
    #[arg(long, value_name = "PATH")]
    pub backend: Option<PathBuf>,

    /// Do not open the UI
    #[arg(long)]
    pub no_ui: bool,
}

impl RunArgs {
    pub fn mode(&self) -> Option<DeploymentMode> {
        if self.dev {
            Some(DeploymentMode::Development)
        } else if self.packaged {
            Some(DeploymentMode::Packaged)
        } else {
            None
        }
    }

    /// Command line flags take precedence over configuration.
    pub fn apply(&self, config: &mut ShellConfig) {
        if let Some(mode) = self.mode() {
            config.mode = Some(mode);
        }
        if let Some(resources) = &self.resources {
            config.resources_dir = Some(resources.clone());
        }
        if let Some(backend) = &self.backend {
            config.backend_executable = Some(backend.clone());
        }
        if self.no_ui {
            config.open_ui = false;
        }
    }
}

impl Cli {
    pub fn parse_cli() -> Self {
        Self::parse_cli_from(std::env::args_os())
    }

    pub fn try_parse_cli_from<I, T>(iter: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Self::try_parse_from(iter)
    }

    /// Parse, letting clap print the error and exit on failure.
    pub fn parse_cli_from<I, T>(iter: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        match Self::try_parse_cli_from(iter) {
            Ok(cli) => cli,
            Err(err) => err.exit(),
        }
    }

    /// The selected command, `run` when none was given.
    pub fn command(&self) -> Commands {
        self.command
            .clone()
            .unwrap_or_else(|| Commands::Run(RunArgs::default()))
    }
}

fn parse_method_arg(value: &str) -> Result<Method, String> {
    parse_method(value).ok_or_else(|| format!("unsupported method '{value}' (use GET, POST, PUT or DELETE)"))
}

fn parse_json_arg(value: &str) -> Result<Value, String> {
    serde_json::from_str(value).map_err(|err| format!("invalid JSON body: {err}"))
}
