use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LlmError>;

#[derive(Debug, Error)]
pub enum LlmError {
    /// The server could not be reached, the attempt timed out, or every retry
    /// came back with a transient status.
    #[error("connection error: {0}")]
    Connection(String),

    /// The server answered with a non-retryable error status.
    #[error("{body} (HTTP status: {})", .status.as_u16())]
    Api {
        status: StatusCode,
        headers: HeaderMap,
        body: String,
    },

    #[error("unexpected response format: {0}")]
    ResponseFormat(String),

    #[error("stream parse error: {0}")]
    StreamParse(String),

    #[error("stream read error: {0}")]
    Stream(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl LlmError {
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    pub fn is_api(&self) -> bool {
        matches!(self, Self::Api { .. })
    }

    /// HTTP status for API-level failures.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        Self::Connection(e.to_string())
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(e: serde_json::Error) -> Self {
        Self::ResponseFormat(e.to_string())
    }
}
