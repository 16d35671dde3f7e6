//! WAVE Setup Library
//!
//! Provisioning flows against the WAVE backend, the local preview server,
//! and the configuration and prompts used by the `wave-setup` binary.

pub mod config;
pub mod preview;
pub mod prompt;
pub mod provision;

pub use config::{Config, ConfigError, Role};
pub use preview::{start_preview_server, PreviewError, PreviewOptions, PreviewServer, ServerState};
pub use provision::{EnsuredResource, ProvisionError, Provisioner};
