use crate::error::{LlmError, Result};
use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const ENDPOINT: &str = "https://api.mistral.ai";
pub const CODESTRAL_ENDPOINT: &str = "https://codestral.mistral.ai";
pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

pub const MISTRAL_API_KEY_ENV: &str = "MISTRAL_API_KEY";
pub const CODESTRAL_API_KEY_ENV: &str = "CODESTRAL_API_KEY";

/// Statuses that are retried instead of surfaced.
pub const RETRY_STATUS_CODES: [StatusCode; 5] = [
    StatusCode::TOO_MANY_REQUESTS,
    StatusCode::INTERNAL_SERVER_ERROR,
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];

const RETRY_STEP_MS: u64 = 500;

/// Settings fixed at client construction.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub api_key: Option<String>,
    pub endpoint: String,
    /// Total attempts per request; `0` selects the default.
    pub max_retries: u32,
    /// Per-attempt timeout in seconds; `0` selects the default.
    #[serde(rename = "timeout_secs", deserialize_with = "duration_secs::deserialize")]
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: ENDPOINT.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("endpoint", &self.endpoint)
            .field("max_retries", &self.max_retries)
            .field("timeout", &self.timeout)
            .finish()
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

#[derive(Clone)]
pub struct MistralClient {
    http: reqwest::Client,
    api_key: String,
    endpoint: String,
    max_retries: u32,
    timeout: Duration,
}

impl MistralClient {
    /// Client for the default endpoint. An empty key falls back to `MISTRAL_API_KEY`.
    pub fn new(api_key: &str) -> Result<Self> {
        let api_key = resolve_api_key(Some(api_key), MISTRAL_API_KEY_ENV, |k| {
            std::env::var(k).ok()
        });
        Self::build(api_key, ENDPOINT, DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT)
    }

    /// Client for the Codestral endpoint. An empty key falls back to `CODESTRAL_API_KEY`.
    pub fn codestral(api_key: &str) -> Result<Self> {
        let api_key = resolve_api_key(Some(api_key), CODESTRAL_API_KEY_ENV, |k| {
            std::env::var(k).ok()
        });
        Self::build(
            api_key,
            CODESTRAL_ENDPOINT,
            DEFAULT_MAX_RETRIES,
            DEFAULT_TIMEOUT,
        )
    }

    pub fn with_config(config: ClientConfig) -> Result<Self> {
        let env_key = if config.endpoint.trim_end_matches('/') == CODESTRAL_ENDPOINT {
            CODESTRAL_API_KEY_ENV
        } else {
            MISTRAL_API_KEY_ENV
        };
        let api_key = resolve_api_key(config.api_key.as_deref(), env_key, |k| {
            std::env::var(k).ok()
        });
        let endpoint = if config.endpoint.trim().is_empty() {
            ENDPOINT
        } else {
            config.endpoint.as_str()
        };
        Self::build(api_key, endpoint, config.max_retries, config.timeout)
    }

    #[tracing::instrument(level = "debug", skip_all, fields(endpoint = %endpoint))]
    fn build(api_key: String, endpoint: &str, max_retries: u32, timeout: Duration) -> Result<Self> {
        let endpoint = reqwest::Url::parse(endpoint)
            .map_err(|e| LlmError::InvalidInput(format!("invalid endpoint {endpoint:?}: {e}")))?;
        if api_key.is_empty() {
            tracing::warn!("no api key configured; requests will be unauthenticated");
        }
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| LlmError::InvalidInput(format!("http client build failed: {e}")))?;
        Ok(Self {
            http,
            api_key,
            endpoint: endpoint.as_str().trim_end_matches('/').to_string(),
            max_retries: if max_retries == 0 {
                DEFAULT_MAX_RETRIES
            } else {
                max_retries
            },
            timeout: if timeout.is_zero() {
                DEFAULT_TIMEOUT
            } else {
                timeout
            },
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Buffered call: the full body is read and decoded into `T`.
    pub(crate) async fn request_json<B, T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.send_with_retries(method, path, body).await?;
        let bytes = match tokio::time::timeout(self.timeout, response.bytes()).await {
            Ok(bytes) => bytes?,
            Err(_) => {
                return Err(LlmError::Connection(format!(
                    "reading response body timed out after {:?}",
                    self.timeout
                )));
            }
        };
        serde_json::from_slice(&bytes).map_err(|e| {
            tracing::warn!(%e, path, "response body did not match the expected shape");
            LlmError::ResponseFormat(format!("{path}: {e}"))
        })
    }

    /// Stream mode: the open response is handed back unread.
    pub(crate) async fn request_stream<B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<reqwest::Response>
    where
        B: Serialize + ?Sized,
    {
        self.send_with_retries(method, path, body).await
    }

    async fn send_with_retries<B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<reqwest::Response>
    where
        B: Serialize + ?Sized,
    {
        let url = format!("{}/{}", self.endpoint, path.trim_start_matches('/'));
        let payload = body
            .map(serde_json::to_vec)
            .transpose()
            .map_err(|e| LlmError::InvalidInput(format!("request body: {e}")))?
            .map(Bytes::from);

        let mut last_error = String::new();
        for attempt in 0..self.max_retries {
            let mut req = self
                .http
                .request(method.clone(), &url)
                .bearer_auth(&self.api_key)
                .header(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            if let Some(payload) = payload.as_ref() {
                req = req.body(payload.clone());
            }

            tracing::debug!(%method, %url, attempt, "sending request");
            match tokio::time::timeout(self.timeout, req.send()).await {
                Ok(Ok(response)) => {
                    let status = response.status();
                    if RETRY_STATUS_CODES.contains(&status) {
                        last_error = format!("transient HTTP status {status}");
                        drop(response);
                        if self.backoff(attempt, &last_error).await {
                            continue;
                        }
                        break;
                    }
                    if status.as_u16() >= 400 {
                        let headers = response.headers().clone();
                        let body = match tokio::time::timeout(self.timeout, response.text()).await
                        {
                            Ok(Ok(body)) => body,
                            Ok(Err(error)) => format!("<failed to read error body: {error}>"),
                            Err(_) => format!(
                                "<error body read timed out after {:?}>",
                                self.timeout
                            ),
                        };
                        tracing::error!(%status, %body, %url, "request failed");
                        return Err(LlmError::Api {
                            status,
                            headers,
                            body,
                        });
                    }
                    return Ok(response);
                }
                Ok(Err(error)) => last_error = error.to_string(),
                Err(_) => last_error = format!("attempt timed out after {:?}", self.timeout),
            }
            if !self.backoff(attempt, &last_error).await {
                break;
            }
        }

        tracing::error!(
            %url,
            attempts = self.max_retries,
            error = %last_error,
            "request retries exhausted"
        );
        Err(LlmError::Connection(last_error))
    }

    /// Sleeps before the next attempt. Returns `false` when none is left.
    async fn backoff(&self, attempt: u32, cause: &str) -> bool {
        if attempt + 1 >= self.max_retries {
            return false;
        }
        let delay = retry_delay(attempt);
        tracing::warn!(
            attempt = attempt + 1,
            max_retries = self.max_retries,
            ?delay,
            cause,
            "request failed; retrying"
        );
        tokio::time::sleep(delay).await;
        true
    }
}

impl std::fmt::Debug for MistralClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MistralClient")
            .field("endpoint", &self.endpoint)
            .field("max_retries", &self.max_retries)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Wait after the zero-based attempt `attempt`: `(attempt + 1) * 500ms`.
pub(crate) fn retry_delay(attempt: u32) -> Duration {
    Duration::from_millis(RETRY_STEP_MS * (u64::from(attempt) + 1))
}

fn resolve_api_key(
    explicit: Option<&str>,
    env_var: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> String {
    match explicit.map(str::trim) {
        Some(key) if !key.is_empty() => key.to_string(),
        _ => lookup(env_var).unwrap_or_default(),
    }
}
