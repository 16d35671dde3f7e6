//! Provisioning flows: list, reconcile, then reuse or create.
//!
//! Each flow re-lists the backend on every call and keeps nothing between
//! calls. Creates are not transactional: another client may create a
//! same-named resource between the list and the create, in which case the
//! backend's own uniqueness checks reject the create.

use std::collections::HashSet;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{error, info, warn};

use wave_client::{ClientError, WaveBackend};
use wave_core::{
    reconcile, reconcile_batch, validate_schema, CoreError, DataTable, Experiment, ExperimentId,
    ExperimentTypeSpec, NewExperiment, ReconciliationDecision, RemoteResource, TagSpec,
};

/// Page size used when listing backend collections.
pub const DEFAULT_PAGE_SIZE: u32 = 1000;

/// Errors raised by the provisioning flows.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Invalid input or missing credential.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The table name is held by a differently named experiment type.
    #[error(
        "experiment type '{name}' cannot be created: table '{uniqueness_key}' \
         is already used by another experiment type ({reason})"
    )]
    ResourceConflict {
        name: String,
        uniqueness_key: String,
        reason: String,
    },

    /// A backend call failed before anything was created.
    #[error("backend error while trying to {operation}: {source}")]
    Backend {
        operation: &'static str,
        #[source]
        source: ClientError,
    },

    /// A tag creation failed after earlier tags of the batch were created.
    #[error(
        "created {count} tag(s) before failing on '{failed}': {source}",
        count = .created.len()
    )]
    PartialBatchFailure {
        created: Vec<RemoteResource>,
        failed: String,
        #[source]
        source: ClientError,
    },
}

impl ProvisionError {
    fn backend(operation: &'static str) -> impl FnOnce(ClientError) -> Self {
        move |source| ProvisionError::Backend { operation, source }
    }
}

/// Result of [`Provisioner::ensure_experiment_type`].
#[derive(Debug, Clone, PartialEq)]
pub struct EnsuredResource {
    pub id: i64,
    /// `false` when an existing resource was reused.
    pub created: bool,
    /// The reused resource reports a schema different from the requested one.
    pub schema_drift: bool,
    pub resource: RemoteResource,
}

#[derive(Debug, Clone, Copy)]
enum Collection {
    ExperimentTypes,
    Tags,
}

impl Collection {
    fn list_operation(self) -> &'static str {
        match self {
            Collection::ExperimentTypes => "list experiment types",
            Collection::Tags => "list tags",
        }
    }
}

/// Runs the provisioning flows against a backend.
pub struct Provisioner<B> {
    backend: B,
    page_size: u32,
}

impl<B: WaveBackend> Provisioner<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Builder method to set the listing page size (at least 1).
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// All experiment types known to the backend.
    pub async fn experiment_types(&self) -> Result<Vec<RemoteResource>, ProvisionError> {
        self.list_all(Collection::ExperimentTypes).await
    }

    /// All tags known to the backend.
    pub async fn tags(&self) -> Result<Vec<RemoteResource>, ProvisionError> {
        self.list_all(Collection::Tags).await
    }

    async fn list_all(&self, collection: Collection) -> Result<Vec<RemoteResource>, ProvisionError> {
        let mut all: Vec<RemoteResource> = Vec::new();
        let mut seen: HashSet<i64> = HashSet::new();
        let mut skip = 0u32;

        loop {
            let page = match collection {
                Collection::ExperimentTypes => {
                    self.backend.list_experiment_types(skip, self.page_size).await
                }
                Collection::Tags => self.backend.list_tags(skip, self.page_size).await,
            }
            .map_err(ProvisionError::backend(collection.list_operation()))?;

            let count = page.len();
            let mut fresh = 0usize;
            for resource in page {
                if seen.insert(resource.id) {
                    fresh += 1;
                    all.push(resource);
                }
            }

            if count < self.page_size as usize {
                break;
            }
            if fresh == 0 {
                warn!(
                    skip,
                    limit = self.page_size,
                    "Backend returned a full page of already seen resources; stopping pagination"
                );
                break;
            }
            skip = skip.saturating_add(self.page_size);
        }

        Ok(all)
    }

    /// Make sure an experiment type named `desired.name` exists.
    ///
    /// Reuses a same-named type whatever its schema, creates one when neither
    /// name nor table is taken, and refuses with
    /// [`ProvisionError::ResourceConflict`] when only the table name is taken.
    /// The schema is only validated when a create is about to happen. The
    /// caller should stop its workflow on a conflict.
    pub async fn ensure_experiment_type(
        &self,
        desired: &ExperimentTypeSpec,
    ) -> Result<EnsuredResource, ProvisionError> {
        let descriptor = desired.descriptor()?;

        let existing = self.experiment_types().await?;
        info!(
            existing = existing.len(),
            name = %desired.name,
            table = %desired.table_name,
            "Reconciling experiment type"
        );

        match reconcile(&descriptor, &existing) {
            ReconciliationDecision::Reuse { existing_id } => {
                let resource = existing
                    .into_iter()
                    .find(|r| r.id == existing_id)
                    .ok_or_else(|| {
                        CoreError::InvalidInput(format!(
                            "reconciled experiment type {} vanished from the listing",
                            existing_id
                        ))
                    })?;
                let schema_drift = schema_differs(desired, &resource);
                if schema_drift {
                    warn!(
                        id = existing_id,
                        name = %desired.name,
                        "Reused experiment type has a different schema than requested"
                    );
                }
                info!(id = existing_id, name = %desired.name, "Reusing existing experiment type");
                Ok(EnsuredResource {
                    id: existing_id,
                    created: false,
                    schema_drift,
                    resource,
                })
            }
            ReconciliationDecision::Conflict { reason } => {
                error!(
                    name = %desired.name,
                    table = %desired.table_name,
                    reason = %reason,
                    "Table name already in use"
                );
                Err(ProvisionError::ResourceConflict {
                    name: desired.name.clone(),
                    uniqueness_key: desired.table_name.clone(),
                    reason,
                })
            }
            ReconciliationDecision::Create => {
                validate_schema(&desired.schema_definition)?;
                let resource = self
                    .backend
                    .create_experiment_type(desired)
                    .await
                    .map_err(ProvisionError::backend("create experiment type"))?;
                info!(id = resource.id, name = %resource.name, "Created experiment type");
                Ok(EnsuredResource {
                    id: resource.id,
                    created: true,
                    schema_drift: false,
                    resource,
                })
            }
        }
    }

    /// Create every tag of `desired` the backend does not have yet.
    ///
    /// Returns the newly created tags. Tags are created one by one; a failure
    /// stops the batch and earlier creations stay in place.
    pub async fn ensure_tags(
        &self,
        desired: &[TagSpec],
    ) -> Result<Vec<RemoteResource>, ProvisionError> {
        if let Some(tag) = desired.iter().find(|t| t.name.is_empty()) {
            return Err(CoreError::InvalidInput(format!(
                "tag name is empty (description: '{}')",
                tag.description
            ))
            .into());
        }

        let existing = self.tags().await?;
        let missing = reconcile_batch(desired, &existing);
        info!(
            desired = desired.len(),
            missing = missing.len(),
            "Reconciled tags"
        );

        let mut created = Vec::with_capacity(missing.len());
        for tag in missing {
            match self.backend.create_tag(&tag).await {
                Ok(resource) => {
                    info!(id = resource.id, tag = %resource.name, "Created tag");
                    created.push(resource);
                }
                Err(source) => {
                    error!(tag = %tag.name, error = %source, "Failed to create tag");
                    if created.is_empty() {
                        return Err(ProvisionError::Backend {
                            operation: "create tag",
                            source,
                        });
                    }
                    return Err(ProvisionError::PartialBatchFailure {
                        created,
                        failed: tag.name,
                        source,
                    });
                }
            }
        }

        Ok(created)
    }

    /// Create a new experiment instance. Instances are never deduplicated.
    ///
    /// `extra_data` defaults to the `created_by` provenance marker.
    pub async fn create_experiment(
        &self,
        experiment_type_id: i64,
        description: &str,
        tags: &[String],
        extra_data: Option<Map<String, Value>>,
    ) -> Result<Experiment, ProvisionError> {
        let request = NewExperiment::new(
            experiment_type_id,
            description,
            tags.to_vec(),
            extra_data,
        );
        let experiment = self
            .backend
            .create_experiment(&request)
            .await
            .map_err(ProvisionError::backend("create experiment"))?;
        info!(
            uuid = %experiment.uuid,
            experiment_type_id,
            tags = tags.len(),
            "Created experiment"
        );
        Ok(experiment)
    }

    /// All data logged for an experiment.
    pub async fn fetch_experiment_data(
        &self,
        experiment_id: &ExperimentId,
    ) -> Result<DataTable, ProvisionError> {
        let table = self
            .backend
            .get_experiment_data(experiment_id)
            .await
            .map_err(ProvisionError::backend("fetch experiment data"))?;
        info!(uuid = %experiment_id, rows = table.len(), "Fetched experiment data");
        Ok(table)
    }
}

/// A listing without `schema_definition` is not treated as drift.
fn schema_differs(desired: &ExperimentTypeSpec, existing: &RemoteResource) -> bool {
    let Some(remote) = existing.field("schema_definition") else {
        return false;
    };
    match serde_json::to_value(&desired.schema_definition) {
        Ok(local) => &local != remote,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;
    use wave_core::ColumnType;

    #[derive(Default)]
    struct FakeState {
        types: Vec<RemoteResource>,
        tags: Vec<RemoteResource>,
        next_id: i64,
        fail_listing: bool,
        /// Tag name whose creation fails.
        failing_tag: Option<String>,
        list_calls: Vec<(u32, u32)>,
        creates: usize,
    }

    #[derive(Default)]
    struct FakeBackend {
        state: Mutex<FakeState>,
    }

    impl FakeBackend {
        fn with_types(types: Vec<RemoteResource>) -> Self {
            let next_id = types.iter().map(|r| r.id).max().unwrap_or(0) + 1;
            Self {
                state: Mutex::new(FakeState {
                    types,
                    next_id,
                    ..Default::default()
                }),
            }
        }

        fn with_tags(names: &[&str]) -> Self {
            let tags: Vec<RemoteResource> = names
                .iter()
                .enumerate()
                .map(|(i, name)| RemoteResource::new(i as i64 + 1, *name, None))
                .collect();
            let next_id = tags.len() as i64 + 1;
            Self {
                state: Mutex::new(FakeState {
                    tags,
                    next_id,
                    ..Default::default()
                }),
            }
        }

        fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
            self.state.lock().unwrap()
        }
    }

    fn unavailable() -> ClientError {
        ClientError::Status {
            status: 503,
            body: "unavailable".to_string(),
        }
    }

    fn page(items: &[RemoteResource], skip: u32, limit: u32) -> Vec<RemoteResource> {
        items
            .iter()
            .skip(skip as usize)
            .take(limit as usize)
            .cloned()
            .collect()
    }

    #[async_trait]
    impl WaveBackend for FakeBackend {
        async fn list_experiment_types(
            &self,
            skip: u32,
            limit: u32,
        ) -> Result<Vec<RemoteResource>, ClientError> {
            let mut state = self.state();
            state.list_calls.push((skip, limit));
            if state.fail_listing {
                return Err(unavailable());
            }
            Ok(page(&state.types, skip, limit))
        }

        async fn create_experiment_type(
            &self,
            spec: &ExperimentTypeSpec,
        ) -> Result<RemoteResource, ClientError> {
            let mut state = self.state();
            let id = state.next_id;
            state.next_id += 1;
            state.creates += 1;
            let resource = RemoteResource::new(id, spec.name.clone(), Some(spec.table_name.clone()))
                .with_field(
                    "schema_definition",
                    serde_json::to_value(&spec.schema_definition).unwrap(),
                );
            state.types.push(resource.clone());
            Ok(resource)
        }

        async fn list_tags(
            &self,
            skip: u32,
            limit: u32,
        ) -> Result<Vec<RemoteResource>, ClientError> {
            let mut state = self.state();
            state.list_calls.push((skip, limit));
            if state.fail_listing {
                return Err(unavailable());
            }
            Ok(page(&state.tags, skip, limit))
        }

        async fn create_tag(&self, tag: &TagSpec) -> Result<RemoteResource, ClientError> {
            let mut state = self.state();
            if state.failing_tag.as_deref() == Some(tag.name.as_str()) {
                return Err(unavailable());
            }
            let id = state.next_id;
            state.next_id += 1;
            state.creates += 1;
            let resource = RemoteResource::new(id, tag.name.clone(), None);
            state.tags.push(resource.clone());
            Ok(resource)
        }

        async fn create_experiment(
            &self,
            request: &NewExperiment,
        ) -> Result<Experiment, ClientError> {
            let mut state = self.state();
            state.creates += 1;
            let mut fields = Map::new();
            fields.insert(
                "additional_data".to_string(),
                Value::Object(request.additional_data.clone()),
            );
            Ok(Experiment {
                uuid: ExperimentId::new(format!("exp-{}", state.creates)),
                description: request.description.clone(),
                tags: request.tags.clone(),
                fields,
            })
        }

        async fn get_experiment_data(
            &self,
            experiment_id: &ExperimentId,
        ) -> Result<DataTable, ClientError> {
            Ok(DataTable::from_json(json!([
                {"experiment_uuid": experiment_id.as_str(), "rt": 512}
            ]))?)
        }
    }

    fn rt_v1() -> RemoteResource {
        RemoteResource::new(7, "RT_v1", Some("rt_v1_table".to_string()))
    }

    fn spec(name: &str, table: &str) -> ExperimentTypeSpec {
        ExperimentTypeSpec::new(name, table).with_column("rt", ColumnType::Float)
    }

    #[tokio::test]
    async fn reuses_experiment_type_with_same_name() {
        let provisioner = Provisioner::new(FakeBackend::with_types(vec![rt_v1()]));

        let ensured = provisioner
            .ensure_experiment_type(&spec("RT_v1", "anything"))
            .await
            .unwrap();
        assert_eq!(ensured.id, 7);
        assert!(!ensured.created);
        assert_eq!(provisioner.backend().state().creates, 0);
    }

    #[tokio::test]
    async fn creates_missing_experiment_type_once() {
        let provisioner = Provisioner::new(FakeBackend::with_types(vec![rt_v1()]));
        let desired = spec("RT_v2", "rt_v2_table");

        let first = provisioner.ensure_experiment_type(&desired).await.unwrap();
        assert!(first.created);
        assert_eq!(first.resource.uniqueness_key.as_deref(), Some("rt_v2_table"));

        let second = provisioner.ensure_experiment_type(&desired).await.unwrap();
        assert!(!second.created);
        assert_eq!(second.id, first.id);
        assert_eq!(provisioner.backend().state().creates, 1);
    }

    #[tokio::test]
    async fn table_collision_is_a_conflict() {
        let provisioner = Provisioner::new(FakeBackend::with_types(vec![rt_v1()]));

        let err = provisioner
            .ensure_experiment_type(&spec("RT_v2", "rt_v1_table"))
            .await
            .unwrap_err();
        match err {
            ProvisionError::ResourceConflict {
                name,
                uniqueness_key,
                ..
            } => {
                assert_eq!(name, "RT_v2");
                assert_eq!(uniqueness_key, "rt_v1_table");
            }
            other => panic!("expected conflict, got {:?}", other),
        }
        assert_eq!(provisioner.backend().state().creates, 0);
    }

    #[tokio::test]
    async fn invalid_schema_is_rejected_before_create() {
        let provisioner = Provisioner::new(FakeBackend::default());
        let desired = ExperimentTypeSpec::new("RT_v3", "rt_v3_table")
            .with_column("participant_id", ColumnType::String);

        let err = provisioner.ensure_experiment_type(&desired).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Core(CoreError::InvalidSchema(_))));
        assert_eq!(provisioner.backend().state().creates, 0);
    }

    #[tokio::test]
    async fn reuse_ignores_schema_validity() {
        let provisioner = Provisioner::new(FakeBackend::with_types(vec![rt_v1()]));

        let empty = provisioner
            .ensure_experiment_type(&ExperimentTypeSpec::new("RT_v1", "rt_v1_table"))
            .await
            .unwrap();
        assert_eq!((empty.id, empty.created), (7, false));

        let reserved = ExperimentTypeSpec::new("RT_v1", "rt_v1_table")
            .with_column("created_at", ColumnType::Datetime);
        let ensured = provisioner.ensure_experiment_type(&reserved).await.unwrap();
        assert_eq!((ensured.id, ensured.created), (7, false));
        assert_eq!(provisioner.backend().state().creates, 0);
    }

    #[tokio::test]
    async fn reuse_with_different_schema_reports_drift() {
        let remote = rt_v1().with_field("schema_definition", json!({"rt": "INTEGER"}));
        let provisioner = Provisioner::new(FakeBackend::with_types(vec![remote]));

        let drifted = provisioner
            .ensure_experiment_type(&spec("RT_v1", "rt_v1_table"))
            .await
            .unwrap();
        assert_eq!(drifted.id, 7);
        assert!(!drifted.created);
        assert!(drifted.schema_drift);

        let matching = provisioner
            .ensure_experiment_type(
                &ExperimentTypeSpec::new("RT_v1", "rt_v1_table")
                    .with_column("rt", ColumnType::Integer),
            )
            .await
            .unwrap();
        assert!(!matching.schema_drift);
        assert_eq!(provisioner.backend().state().creates, 0);
    }

    #[tokio::test]
    async fn listing_failure_aborts() {
        let backend = FakeBackend::default();
        backend.state().fail_listing = true;
        let provisioner = Provisioner::new(backend);

        let err = provisioner
            .ensure_experiment_type(&spec("RT_v1", "rt_v1_table"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::Backend {
                operation: "list experiment types",
                ..
            }
        ));

        let err = provisioner.ensure_tags(&[TagSpec::new("fast")]).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Backend { operation: "list tags", .. }));
    }

    #[tokio::test]
    async fn lists_every_page() {
        let types: Vec<RemoteResource> = (1..=5)
            .map(|i| RemoteResource::new(i, format!("T{}", i), Some(format!("t{}", i))))
            .collect();
        let provisioner = Provisioner::new(FakeBackend::with_types(types)).with_page_size(2);

        let listed = provisioner.experiment_types().await.unwrap();
        assert_eq!(listed.len(), 5);
        assert_eq!(
            provisioner.backend().state().list_calls,
            vec![(0, 2), (2, 2), (4, 2)]
        );
    }

    #[tokio::test]
    async fn creates_only_missing_tags_in_order() {
        let provisioner = Provisioner::new(FakeBackend::with_tags(&["fast"]));
        let desired = vec![
            TagSpec::new("fast"),
            TagSpec::new("slow").with_description("slow condition"),
            TagSpec::new("pilot"),
        ];

        let created = provisioner.ensure_tags(&desired).await.unwrap();
        let names: Vec<&str> = created.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["slow", "pilot"]);

        assert!(provisioner.ensure_tags(&desired).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn tag_failure_after_success_is_partial() {
        let backend = FakeBackend::with_tags(&[]);
        backend.state().failing_tag = Some("pilot".to_string());
        let provisioner = Provisioner::new(backend);

        let err = provisioner
            .ensure_tags(&[TagSpec::new("slow"), TagSpec::new("pilot"), TagSpec::new("late")])
            .await
            .unwrap_err();
        match err {
            ProvisionError::PartialBatchFailure {
                created, failed, ..
            } => {
                assert_eq!(created.len(), 1);
                assert_eq!(created[0].name, "slow");
                assert_eq!(failed, "pilot");
            }
            other => panic!("expected partial failure, got {:?}", other),
        }

        // No rollback, and nothing after the failure was attempted.
        let state = provisioner.backend().state();
        let names: Vec<&str> = state.tags.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["slow"]);
    }

    #[tokio::test]
    async fn first_tag_failure_is_a_backend_error() {
        let backend = FakeBackend::with_tags(&[]);
        backend.state().failing_tag = Some("slow".to_string());
        let provisioner = Provisioner::new(backend);

        let err = provisioner.ensure_tags(&[TagSpec::new("slow")]).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Backend { operation: "create tag", .. }));
    }

    #[tokio::test]
    async fn empty_tag_name_is_rejected() {
        let provisioner = Provisioner::new(FakeBackend::default());
        let err = provisioner.ensure_tags(&[TagSpec::new("")]).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Core(CoreError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn experiments_are_never_deduplicated() {
        let provisioner = Provisioner::new(FakeBackend::default());
        let tags = vec!["fast".to_string()];

        let a = provisioner.create_experiment(7, "pilot", &tags, None).await.unwrap();
        let b = provisioner.create_experiment(7, "pilot", &tags, None).await.unwrap();
        assert_ne!(a.uuid, b.uuid);
        assert_eq!(
            a.fields.get("additional_data"),
            Some(&json!({"created_by": wave_core::DEFAULT_PROVENANCE}))
        );
    }

    #[tokio::test]
    async fn fetches_experiment_data() {
        let provisioner = Provisioner::new(FakeBackend::default());
        let table = provisioner
            .fetch_experiment_data(&ExperimentId::new("exp-9"))
            .await
            .unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.rows()[0]["experiment_uuid"], json!("exp-9"));
    }
}
