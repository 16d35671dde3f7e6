//! Newtype wrappers for identifiers to ensure type safety.

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Prefix of generated test participant identifiers.
pub const TEST_PARTICIPANT_PREFIX: &str = "test_participant_";

/// Identifier of an experiment instance, as assigned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExperimentId(String);

impl ExperimentId {
    /// Create a new ExperimentId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume and return the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ExperimentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ExperimentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ExperimentId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Identifier of a participant taking an experiment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Create a new ParticipantId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random test participant id (`test_participant_<8 hex>`).
    pub fn generate_test() -> Self {
        let token = Uuid::new_v4().simple().to_string();
        Self(format!("{}{}", TEST_PARTICIPANT_PREFIX, &token[..8]))
    }

    /// Get the inner string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume and return the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ParticipantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ParticipantId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Name and participant id for a manual test run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestIdentifiers {
    /// Experiment description used for the test instance.
    pub test_name: String,

    /// Participant id embedded in the access URL.
    pub participant_id: ParticipantId,
}

/// Generate a test experiment name and participant id for `base_name`.
///
/// The name carries a second-resolution local timestamp, so two calls within
/// the same second yield the same name. The participant id uses a random
/// token and is unique in practice, not guaranteed.
pub fn generate_test_identifiers(base_name: &str) -> TestIdentifiers {
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    TestIdentifiers {
        test_name: format!("TEST_{}_{}", base_name, timestamp),
        participant_id: ParticipantId::generate_test(),
    }
}
