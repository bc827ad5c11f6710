//! Client for the backend's `/api` JSON contract
//!
//! Mirrors what the UI does: every call goes to `<base>/api<path>` with a
//! JSON content type, an empty 2xx body reads as `{}`, and a non-2xx answer
//! becomes an error carrying the server's text untouched.

use crate::config::PROBE_TIMEOUT;
use crate::error::ApiError;
use reqwest::{Client, Method};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base: Url,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        Self::with_timeout(base_url, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let base = Url::parse(base_url)?;
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| ApiError::Transport {
                url: base.to_string(),
                source,
            })?;
        Ok(Self { http, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// `<base>/api<path>`; `path` is expected to start with `/`.
    pub fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        let base = self.base.as_str().trim_end_matches('/');
        let path = if path.starts_with('/') || path.is_empty() {
            path.to_string()
        } else {
            format!("/{path}")
        };
        Ok(Url::parse(&format!("{base}/api{path}"))?)
    }

    pub async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, ApiError> {
        let url = self.endpoint(path)?;
        debug!(%method, %url, "api call");

        let mut request = self
            .http
            .request(method, url.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(body) = body {
            request = request.body(body.to_string());
        }

        let response = request.send().await.map_err(|source| ApiError::Transport {
            url: url.to_string(),
            source,
        })?;
        let status = response.status();
        let text = response.text().await.map_err(|source| ApiError::Transport {
            url: url.to_string(),
            source,
        })?;

        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        if text.is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        serde_json::from_str(&text).map_err(|source| ApiError::Decode {
            url: url.to_string(),
            source,
        })
    }

    pub async fn get(&self, path: &str) -> Result<Value, ApiError> {
        self.call(Method::GET, path, None).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> Result<Value, ApiError> {
        self.call(Method::POST, path, Some(body)).await
    }

    pub async fn put(&self, path: &str, body: &Value) -> Result<Value, ApiError> {
        self.call(Method::PUT, path, Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<Value, ApiError> {
        self.call(Method::DELETE, path, None).await
    }

    /// True when anything answers HTTP at the base URL, whatever the status.
    pub async fn probe(&self) -> bool {
        self.probe_within(PROBE_TIMEOUT).await
    }

    pub async fn probe_within(&self, timeout: Duration) -> bool {
        match self
            .http
            .get(self.base.clone())
            .timeout(timeout)
            .send()
            .await
        {
            Ok(response) => {
                debug!(status = %response.status(), url = %self.base, "backend answered probe");
                true
            }
            Err(err) => {
                debug!(url = %self.base, error = %err, "backend probe failed");
                false
            }
        }
    }
}

/// Parse a method name as typed on the command line.
pub fn parse_method(name: &str) -> Option<Method> {
    match name.to_ascii_uppercase().as_str() {
        "GET" => Some(Method::GET),
        "POST" => Some(Method::POST),
        "PUT" => Some(Method::PUT),
        "DELETE" => Some(Method::DELETE),
        _ => None,
    }
}
