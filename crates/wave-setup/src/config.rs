//! Connection configuration.
//!
//! Values normally come from the environment (see the `ENV_*` constants) via
//! the CLI layer. Missing values surface as [`ConfigError`]; nothing here
//! terminates the process.

use std::fmt;

use thiserror::Error;

use wave_client::{ClientError, HttpBackend};

pub const ENV_BACKEND_URL: &str = "WAVE_BACKEND_URL";
pub const ENV_RESEARCHER_API_KEY: &str = "RESEARCHER_API_KEY";
pub const ENV_EXPERIMENTEE_API_KEY: &str = "EXPERIMENTEE_API_KEY";
pub const ENV_ADMIN_API_KEY: &str = "ADMIN_API_KEY";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required value is unset or empty.
    #[error("{var} is not set; export it or add it to your environment file")]
    Missing { var: &'static str },

    /// The backend client rejected the configuration.
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Which key authenticates backend calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Role {
    #[default]
    Researcher,
    Admin,
}

/// Backend connection settings and credentials.
#[derive(Clone, Default)]
pub struct Config {
    pub backend_url: Option<String>,
    pub role: Role,
    pub researcher_api_key: Option<String>,
    pub admin_api_key: Option<String>,
    pub experimentee_api_key: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl Config {
    /// Backend base URL.
    pub fn backend_url(&self) -> Result<&str, ConfigError> {
        non_empty(&self.backend_url).ok_or(ConfigError::Missing {
            var: ENV_BACKEND_URL,
        })
    }

    /// API key for the configured role.
    pub fn backend_api_key(&self) -> Result<&str, ConfigError> {
        match self.role {
            Role::Researcher => non_empty(&self.researcher_api_key).ok_or(ConfigError::Missing {
                var: ENV_RESEARCHER_API_KEY,
            }),
            Role::Admin => non_empty(&self.admin_api_key).ok_or(ConfigError::Missing {
                var: ENV_ADMIN_API_KEY,
            }),
        }
    }

    /// Participant credential embedded in access URLs, if configured.
    pub fn experimentee_api_key(&self) -> Option<&str> {
        non_empty(&self.experimentee_api_key)
    }

    /// Build the HTTP backend client.
    pub fn connect(&self) -> Result<HttpBackend, ConfigError> {
        Ok(HttpBackend::new(self.backend_url()?, self.backend_api_key()?)?)
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = |key: &Option<String>| if non_empty(key).is_some() { "<set>" } else { "<unset>" };
        f.debug_struct("Config")
            .field("backend_url", &self.backend_url)
            .field("role", &self.role)
            .field("researcher_api_key", &shown(&self.researcher_api_key))
            .field("admin_api_key", &shown(&self.admin_api_key))
            .field("experimentee_api_key", &shown(&self.experimentee_api_key))
            .finish()
    }
}
