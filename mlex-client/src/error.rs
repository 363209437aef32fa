//! Error types for the registry client

use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when talking to the job registry
#[derive(Debug, Error)]
pub enum ClientError {
    /// No HTTP response was received (connect failure, timeout, reset)
    #[error("Transport error: {message}")]
    Transport {
        /// Error message including its source chain
        message: String,
        /// The connection was never established, so the request was not sent
        connect: bool,
    },

    /// API returned an error status code
    #[error("API error (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error message from the API
        message: String,
    },

    /// Failed to parse response
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ClientError {
    /// Create an API error from status code and message
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            message: message.into(),
        }
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>, connect: bool) -> Self {
        Self::Transport {
            message: message.into(),
            connect,
        }
    }

    /// Check if this error is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_)) || matches!(self, Self::ApiError { status: 404, .. })
    }

    /// Check if this error happened below HTTP (no response was received)
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// Check if the request is known not to have reached the registry
    pub fn is_connect(&self) -> bool {
        matches!(self, Self::Transport { connect: true, .. })
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return Self::ParseError(error_chain(&err));
        }
        if err.is_builder() {
            return Self::InvalidRequest(error_chain(&err));
        }
        if let Some(status) = err.status() {
            if status.as_u16() == 404 {
                return Self::NotFound(error_chain(&err));
            }
            return Self::api_error(status.as_u16(), error_chain(&err));
        }
        Self::transport(error_chain(&err), err.is_connect())
    }
}

/// Joins an error with all of its sources
///
/// reqwest's own message hides the io error (e.g. "connection reset by peer")
/// in the source chain.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
