//! `studydesk probe`

use crate::api::ApiClient;
use crate::config::ShellConfig;
use crate::error::ShellResult;
use colored::Colorize;
use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

pub async fn handle_probe_command(
    url: Option<&str>,
    timeout_ms: u64,
    config_path: Option<&Path>,
) -> ExitCode {
    match probe(url, timeout_ms, config_path).await {
        Ok((base, true)) => {
            println!("{} backend reachable at {}", "✅".green(), base.cyan());
            ExitCode::from(0)
        }
        Ok((base, false)) => {
            eprintln!("{} no backend answering at {}", "❌".red(), base.yellow());
            ExitCode::from(1)
        }
        Err(err) => {
            eprintln!("{}", err);
            ExitCode::from(2)
        }
    }
}

async fn probe(
    url: Option<&str>,
    timeout_ms: u64,
    config_path: Option<&Path>,
) -> ShellResult<(String, bool)> {
    let base = match url {
        Some(url) => url.to_string(),
        None => ShellConfig::load(config_path)?.backend_url,
    };
    let client = ApiClient::new(&base)?;
    let reachable = client
        .probe_within(Duration::from_millis(timeout_ms))
        .await;
    Ok((base, reachable))
}
