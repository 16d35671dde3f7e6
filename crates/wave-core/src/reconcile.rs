//! Deciding whether a desired resource is reused, created, or refused.
//!
//! Everything here is pure: the caller lists the backend's current resources
//! and acts on the decision. The list-then-create sequence is not atomic, so a
//! resource created concurrently by someone else can still reach the backend's
//! own uniqueness checks.

use std::collections::HashSet;

use crate::model::{ExperimentTypeSpec, RemoteResource, ResourceDescriptor, TagSpec};

/// Reason reported when only the uniqueness key collides.
pub const KEY_COLLISION: &str = "uniqueness_key collision";

/// Outcome of reconciling one desired resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconciliationDecision {
    /// A resource with the same name exists; use it.
    Reuse { existing_id: i64 },
    /// Nothing collides; create the resource.
    Create,
    /// A different resource already holds the uniqueness key.
    Conflict { reason: String },
}

/// Anything identified by a name for batch reconciliation.
pub trait Named {
    fn name(&self) -> &str;
}

impl Named for ResourceDescriptor {
    fn name(&self) -> &str {
        ResourceDescriptor::name(self)
    }
}

impl Named for TagSpec {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Named for ExperimentTypeSpec {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Named for RemoteResource {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Reconcile `desired` against the backend listing `existing`.
///
/// A name match wins over a key match. Duplicate names in `existing` resolve
/// to the first entry.
pub fn reconcile(
    desired: &ResourceDescriptor,
    existing: &[RemoteResource],
) -> ReconciliationDecision {
    if let Some(found) = existing.iter().find(|r| r.name == desired.name()) {
        return ReconciliationDecision::Reuse {
            existing_id: found.id,
        };
    }

    let key_taken = existing
        .iter()
        .any(|r| r.uniqueness_key.as_deref() == Some(desired.uniqueness_key()));
    if key_taken {
        ReconciliationDecision::Conflict {
            reason: KEY_COLLISION.to_string(),
        }
    } else {
        ReconciliationDecision::Create
    }
}

/// The items of `desired` whose names are absent from `existing`.
///
/// Order follows `desired`; a name repeated in `desired` is returned once.
pub fn reconcile_batch<T: Named + Clone>(desired: &[T], existing: &[RemoteResource]) -> Vec<T> {
    let mut seen: HashSet<&str> = existing.iter().map(|r| r.name.as_str()).collect();
    desired
        .iter()
        .filter(|item| seen.insert(item.name()))
        .cloned()
        .collect()
}
