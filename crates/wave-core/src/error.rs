//! Core domain errors.

use thiserror::Error;

/// Core domain errors for WAVE setup.
#[derive(Debug, Error)]
pub enum CoreError {
    /// No participant credential was supplied for an access URL.
    #[error("Missing participant credential: an experimentee API key is required")]
    MissingCredential,

    /// Invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Experiment schema violates the backend's column rules.
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}
