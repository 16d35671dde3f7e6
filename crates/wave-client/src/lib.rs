//! WAVE backend client library.
//!
//! Defines the [`WaveBackend`] collaborator used by the provisioning flows and
//! an HTTP implementation talking to the WAVE REST API.

pub mod backend;
pub mod error;
pub mod http;

pub use backend::WaveBackend;
pub use error::ClientError;
pub use http::HttpBackend;
