//! Well-known paths
//!
//! - persistent configuration lives in `~/.studydesk/`
//! - runtime data (logs) lives in `<temp>/.studydesk/`

use crate::config::{CONFIG_DIRECTORY, CONFIG_FILE_NAME};
use anyhow::Result;
use std::path::PathBuf;

pub const LOG_FILE_NAME: &str = "studydesk.log";

pub struct ConfigPaths {
    /// `~/.studydesk/`
    pub config_dir: PathBuf,
    /// `~/.studydesk/config.toml`
    pub config_file: PathBuf,
    /// `<temp>/.studydesk/`
    pub runtime_dir: PathBuf,
    pub log_dir: PathBuf,
    pub log_file: PathBuf,
}

impl ConfigPaths {
    pub fn new() -> Result<Self> {
        let home_dir =
            dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Cannot find home directory"))?;
        Ok(Self::with_roots(
            home_dir.join(CONFIG_DIRECTORY),
            runtime_root(),
        ))
    }

    fn with_roots(config_dir: PathBuf, runtime_dir: PathBuf) -> Self {
        let log_dir = runtime_dir.join("logs");
        Self {
            config_file: config_dir.join(CONFIG_FILE_NAME),
            log_file: log_dir.join(LOG_FILE_NAME),
            config_dir,
            runtime_dir,
            log_dir,
        }
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.config_dir)?;
        std::fs::create_dir_all(&self.log_dir)?;
        Ok(())
    }
}

/// Linux/macOS: `/tmp/.studydesk/`, Windows: `%TEMP%\.studydesk\`
pub fn runtime_root() -> PathBuf {
    std::env::temp_dir().join(CONFIG_DIRECTORY)
}

/// Log file used by `run` when `--log-file` is not given.
pub fn default_log_file() -> PathBuf {
    runtime_root().join("logs").join(LOG_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn layout_under_roots() {
        let dir = TempDir::new().unwrap();
        let paths = ConfigPaths::with_roots(dir.path().join("cfg"), dir.path().join("run"));
        assert_eq!(paths.config_file, dir.path().join("cfg").join("config.toml"));
        assert_eq!(
            paths.log_file,
            dir.path().join("run").join("logs").join("studydesk.log")
        );

        paths.ensure_dirs().unwrap();
        assert!(paths.config_dir.is_dir());
        assert!(paths.log_dir.is_dir());
    }

    #[test]
    fn default_log_file_is_in_runtime_root() {
        assert!(default_log_file().starts_with(runtime_root()));
    }
}
