//! WAVE Setup Core Domain Types
//!
//! This crate contains pure domain logic with no dependencies on:
//! - Network/HTTP
//! - Async runtimes
//! - Process environment
//!
//! It holds the resource model, the reconciler that decides between reusing,
//! creating and refusing a resource, the participant access URL builder, and
//! the experiment schema rules.

pub mod access;
pub mod error;
pub mod ids;
pub mod model;
pub mod reconcile;
pub mod schema;

// Re-export commonly used types
pub use access::{build_access_url, AccessUrl, REDACTED_PLACEHOLDER};
pub use error::CoreError;
pub use ids::{generate_test_identifiers, ExperimentId, ParticipantId, TestIdentifiers};
pub use model::{
    DataTable, Experiment, ExperimentTypeSpec, NewExperiment, RemoteResource, ResourceDescriptor,
    TagSpec, DEFAULT_PROVENANCE,
};
pub use reconcile::{reconcile, reconcile_batch, Named, ReconciliationDecision};
pub use schema::{validate_schema, ColumnType, RESERVED_COLUMNS};
