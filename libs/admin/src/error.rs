//! Admin API error types.

use thiserror::Error;

/// Errors returned by admin API implementations.
#[derive(Debug, Error)]
pub enum AdminError {
    /// The resource does not exist (or is not visible yet).
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    /// The cluster rejected the request.
    #[error("admin API error ({status} {code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    /// The request never got a response.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The request was rejected locally before being sent.
    #[error("invalid request: {0}")]
    Invalid(String),

    /// The response body could not be decoded.
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl AdminError {
    /// Create a not-found error.
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Create an API error from response details.
    pub fn api(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Returns true if the resource was not found.
    pub fn is_not_found(&self) -> bool {
        matches!(self, AdminError::NotFound { .. })
    }
}

/// Result alias for admin API calls.
pub type Result<T> = std::result::Result<T, AdminError>;
