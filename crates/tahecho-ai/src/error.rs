//! Error types for tahecho-ai

use thiserror::Error;

/// Result type alias using tahecho-ai Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to a language-model provider
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// API returned an error response
    #[error("API error: {message} (type: {error_type})")]
    Api { error_type: String, message: String },

    /// Non-success HTTP status without a structured error body
    #[error("HTTP status {code}: {message}")]
    Status { code: u16, message: String },

    /// Rate limit exceeded
    #[error("Rate limited: retry after {retry_after:?} seconds")]
    RateLimited { retry_after: Option<u64> },

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Invalid API key
    #[error("Invalid or missing API key")]
    InvalidApiKey,

    /// Server-sent events error
    #[error("SSE error: {0}")]
    Sse(String),

    /// Unexpected response format
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// The provider finished without producing any text
    #[error("Empty response from model")]
    EmptyResponse,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create an API error from type and message
    pub fn api(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            error_type: error_type.into(),
            message: message.into(),
        }
    }

    /// Map a non-success HTTP status to the closest typed variant.
    pub fn from_status(code: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            401 | 403 => Error::Auth(format!("{} {}", code, message).trim().to_string()),
            429 => Error::RateLimited { retry_after: None },
            _ => Error::Status { code, message },
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Error::RateLimited { .. } | Error::Sse(_) => true,
            Error::Status { code, .. } => *code >= 500,
            Error::Api {
                error_type,
                message,
            } => {
                let et = error_type.to_lowercase();
                let msg = message.to_lowercase();
                et.contains("rate_limit")
                    || et.contains("overloaded")
                    || msg.contains("rate limit")
                    || msg.contains("overloaded")
                    || msg.contains("too many requests")
            }
            _ => false,
        }
    }

    /// Whether the provider rejected our credentials
    pub fn is_auth(&self) -> bool {
        match self {
            Error::Auth(_) | Error::InvalidApiKey => true,
            Error::Status { code, .. } => *code == 401 || *code == 403,
            Error::Api { error_type, .. } => {
                let et = error_type.to_lowercase();
                et.contains("authentication") || et.contains("invalid_api_key")
            }
            _ => false,
        }
    }

    /// Whether the failure happened before the provider could answer
    /// (timeouts, refused or dropped connections)
    pub fn is_connectivity(&self) -> bool {
        match self {
            Error::Http(e) => e.is_timeout() || e.is_connect(),
            Error::Sse(msg) => {
                let msg = msg.to_lowercase();
                msg.contains("timed out")
                    || msg.contains("timeout")
                    || msg.contains("connection")
                    || msg.contains("dns")
            }
            _ => false,
        }
    }
}
