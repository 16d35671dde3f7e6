//! Error types for the backend client.

use thiserror::Error;

/// Errors that can occur when talking to the WAVE backend.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Invalid client configuration (base URL, API key).
    #[error("invalid client configuration: {0}")]
    Config(String),

    /// Transport-level HTTP error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered with a non-success status.
    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl ClientError {
    /// Whether the backend rejected the credentials.
    pub fn is_auth(&self) -> bool {
        matches!(self, ClientError::Status { status: 401 | 403, .. })
    }
}

impl From<wave_core::CoreError> for ClientError {
    fn from(e: wave_core::CoreError) -> Self {
        ClientError::Serialization(e.to_string())
    }
}
