//! The backend collaborator consumed by the provisioning flows.

use async_trait::async_trait;

use wave_core::{
    DataTable, Experiment, ExperimentId, ExperimentTypeSpec, NewExperiment, RemoteResource,
    TagSpec,
};

use crate::error::ClientError;

/// Operations the WAVE backend must provide.
///
/// Every call may fail independently; implementations do not retry.
#[async_trait]
pub trait WaveBackend: Send + Sync {
    /// One page of experiment types. Uniqueness keys are table names.
    async fn list_experiment_types(
        &self,
        skip: u32,
        limit: u32,
    ) -> Result<Vec<RemoteResource>, ClientError>;

    /// Create an experiment type.
    async fn create_experiment_type(
        &self,
        spec: &ExperimentTypeSpec,
    ) -> Result<RemoteResource, ClientError>;

    /// One page of tags.
    async fn list_tags(&self, skip: u32, limit: u32) -> Result<Vec<RemoteResource>, ClientError>;

    /// Create a tag.
    async fn create_tag(&self, tag: &TagSpec) -> Result<RemoteResource, ClientError>;

    /// Create an experiment instance.
    async fn create_experiment(&self, request: &NewExperiment) -> Result<Experiment, ClientError>;

    /// All data rows logged for an experiment.
    async fn get_experiment_data(
        &self,
        experiment_id: &ExperimentId,
    ) -> Result<DataTable, ClientError>;
}
