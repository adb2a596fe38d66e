//! HTTP client shared by the executor and the listing code

use crate::humanize::ByteSize;
use crate::task::TaskError;
use reqwest::header::CONTENT_LENGTH;
use reqwest::{Client, ClientBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request to {url} failed: {message}")]
    RequestFailed { url: String, message: String },

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("{url} rejected the session (HTTP {status})")]
    Unauthorized { url: String, status: u16 },

    #[error("request to {url} cancelled")]
    Cancelled { url: String },
}

impl HttpError {
    fn is_retryable(&self) -> bool {
        match self {
            HttpError::RequestFailed { .. } | HttpError::Timeout { .. } => true,
            HttpError::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS.as_u16() || *status >= 500
            }
            HttpError::Unauthorized { .. } | HttpError::Cancelled { .. } => false,
        }
    }
}

impl From<HttpError> for TaskError {
    fn from(err: HttpError) -> Self {
        match err {
            HttpError::RequestFailed { url, message } => TaskError::Request { url, message },
            HttpError::Timeout { url } => TaskError::Request {
                url,
                message: "timed out".to_string(),
            },
            HttpError::Status { url, status } => TaskError::Status { url, status },
            HttpError::Unauthorized { url, status } => TaskError::Unauthorized { url, status },
            HttpError::Cancelled { .. } => TaskError::Cancelled,
        }
    }
}

pub type Result<T> = std::result::Result<T, HttpError>;

/// HTTP client configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpConfig {
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Cap on a whole request including the body; unset for large files
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Buffer between the response body and the file
    #[serde(default = "default_write_buffer")]
    pub write_buffer: ByteSize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: None,
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            user_agent: default_user_agent(),
            write_buffer: default_write_buffer(),
        }
    }
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

fn default_user_agent() -> String {
    concat!("gimpfetch/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_write_buffer() -> ByteSize {
    ByteSize::kib(256)
}

impl HttpConfig {
    /// reqwest builder carrying the timeouts and user agent
    pub fn client_builder(&self) -> ClientBuilder {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .user_agent(&self.user_agent);
        if let Some(secs) = self.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        builder
    }

    fn backoff(&self, attempt: u32) -> Duration {
        // 1x, 2x, 4x ... the base backoff
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(1 << (attempt - 1).min(16)))
    }
}

/// Retrying wrapper around a session's reqwest client
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    config: HttpConfig,
}

impl HttpClient {
    pub fn new(client: Client, config: HttpConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    /// Size the server reports for `url`, if it reports one
    pub async fn content_length(&self, url: &str, cancel: &CancellationToken) -> Result<Option<u64>> {
        let response = self
            .with_retries(url, cancel, || self.client.head(url).send())
            .await?;

        let length = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok());
        debug!(url, ?length, "HEAD completed");
        Ok(length)
    }

    /// Successful GET response, body not yet read
    pub async fn get(&self, url: &str, cancel: &CancellationToken) -> Result<Response> {
        self.with_retries(url, cancel, || self.client.get(url).send())
            .await
    }

    /// GET a page and return its body as text
    pub async fn get_text(&self, url: &str) -> Result<String> {
        let response = self.get(url, &CancellationToken::new()).await?;
        response.text().await.map_err(|e| HttpError::RequestFailed {
            url: url.to_string(),
            message: format!("failed to read body: {e}"),
        })
    }

    async fn with_retries<F, Fut>(
        &self,
        url: &str,
        cancel: &CancellationToken,
        send: F,
    ) -> Result<Response>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = reqwest::Result<Response>>,
    {
        let mut attempts = 0;

        loop {
            attempts += 1;

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(HttpError::Cancelled { url: url.to_string() }),
                sent = send() => check(url, sent),
            };

            match outcome {
                Ok(response) => {
                    if attempts > 1 {
                        debug!(url, attempts, "Request succeeded after retry");
                    }
                    return Ok(response);
                }
                Err(e) if e.is_retryable() && attempts <= self.config.max_retries => {
                    let backoff = self.config.backoff(attempts);
                    warn!(url, attempts, error = %e, ?backoff, "Request failed, retrying");
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(HttpError::Cancelled { url: url.to_string() }),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                Err(e) => {
                    if attempts > 1 {
                        warn!(url, attempts, error = %e, "Request failed after retries");
                    }
                    return Err(e);
                }
            }
        }
    }
}

fn check(url: &str, sent: reqwest::Result<Response>) -> Result<Response> {
    let response = sent.map_err(|e| {
        if e.is_timeout() {
            HttpError::Timeout {
                url: url.to_string(),
            }
        } else {
            HttpError::RequestFailed {
                url: url.to_string(),
                message: e.to_string(),
            }
        }
    })?;

    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(HttpError::Unauthorized {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }
    if !status.is_success() {
        return Err(HttpError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_config_defaults() {
        let config = HttpConfig::default();
        assert_eq!(config.connect_timeout_secs, 30);
        assert_eq!(config.request_timeout_secs, None);
        assert_eq!(config.max_retries, 3);
        assert!(config.user_agent.starts_with("gimpfetch/"));
    }

    #[test]
    fn test_backoff_doubles() {
        let config = HttpConfig {
            retry_backoff_ms: 100,
            ..HttpConfig::default()
        };
        assert_eq!(config.backoff(1), Duration::from_millis(100));
        assert_eq!(config.backoff(2), Duration::from_millis(200));
        assert_eq!(config.backoff(3), Duration::from_millis(400));
    }

    #[test]
    fn test_retryable_classification() {
        let url = "https://example.com".to_string();
        assert!(HttpError::Status { url: url.clone(), status: 503 }.is_retryable());
        assert!(HttpError::Status { url: url.clone(), status: 429 }.is_retryable());
        assert!(!HttpError::Status { url: url.clone(), status: 404 }.is_retryable());
        assert!(!HttpError::Unauthorized { url: url.clone(), status: 401 }.is_retryable());
        assert!(HttpError::Timeout { url }.is_retryable());
    }

    #[test]
    fn test_unauthorized_maps_to_fatal_task_error() {
        let err: TaskError = HttpError::Unauthorized {
            url: "https://example.com/f".to_string(),
            status: 403,
        }
        .into();
        assert!(err.is_fatal());
    }
}
