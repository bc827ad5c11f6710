//! `studydesk api`

use crate::api::ApiClient;
use crate::config::ShellConfig;
use crate::error::{ApiError, ShellError, ShellResult};
use reqwest::Method;
use serde_json::Value;
use std::path::Path;
use std::process::ExitCode;

pub async fn handle_api_command(
    method: Method,
    path: &str,
    data: Option<&Value>,
    url: Option<&str>,
    config_path: Option<&Path>,
) -> ExitCode {
    match call(method, path, data, url, config_path).await {
        Ok(value) => {
            match serde_json::to_string_pretty(&value) {
                Ok(text) => println!("{}", text),
                Err(_) => println!("{}", value),
            }
            ExitCode::from(0)
        }
        // non-2xx: the server's text, as is
        Err(ShellError::Api(ApiError::Status { body, .. })) => {
            eprintln!("{}", body);
            ExitCode::from(1)
        }
        Err(err) => {
            eprintln!("{}", err);
            ExitCode::from(2)
        }
    }
}

async fn call(
    method: Method,
    path: &str,
    data: Option<&Value>,
    url: Option<&str>,
    config_path: Option<&Path>,
) -> ShellResult<Value> {
    let base = match url {
        Some(url) => url.to_string(),
        None => ShellConfig::load(config_path)?.backend_url,
    };
    let client = ApiClient::new(&base)?;
    Ok(client.call(method, path, data).await?)
}
