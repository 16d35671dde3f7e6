//! HTTP implementation of [`WaveBackend`] for the WAVE REST API.

use std::fmt;

use async_trait::async_trait;
use reqwest::Url;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use wave_core::{
    DataTable, Experiment, ExperimentId, ExperimentTypeSpec, NewExperiment, RemoteResource,
    TagSpec,
};

use crate::backend::WaveBackend;
use crate::error::ClientError;

/// JSON field holding an experiment type's uniqueness key.
const TABLE_NAME_FIELD: &str = "table_name";

/// HTTP client for the WAVE backend, authenticated with a bearer API key.
#[derive(Clone)]
pub struct HttpBackend {
    inner: reqwest::Client,
    base_url: Url,
    api_key: String,
}

impl fmt::Debug for HttpBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpBackend")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl HttpBackend {
    /// Create a new HTTP backend client.
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, ClientError> {
        Self::with_client(reqwest::Client::new(), base_url, api_key)
    }

    /// Create a client reusing an existing `reqwest::Client`.
    pub fn with_client(
        inner: reqwest::Client,
        base_url: &str,
        api_key: &str,
    ) -> Result<Self, ClientError> {
        if api_key.trim().is_empty() {
            return Err(ClientError::Config("API key is empty".to_string()));
        }
        let base_url = Url::parse(base_url)
            .map_err(|e| ClientError::Config(format!("invalid base URL '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::Config(format!(
                "base URL '{}' cannot carry a path",
                base_url
            )));
        }
        Ok(Self {
            inner,
            base_url,
            api_key: api_key.to_string(),
        })
    }

    /// Base URL of the backend.
    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// Check if the backend is healthy.
    pub async fn health(&self) -> Result<bool, ClientError> {
        let url = self.endpoint(&["health"])?;
        debug!(url = %url, "Checking health");

        let response = self.inner.get(url).send().await?;
        Ok(response.status().is_success())
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::Config("base URL cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// GET a JSON document.
    async fn get_json(&self, url: Url, query: &[(&str, u32)]) -> Result<Value, ClientError> {
        debug!(url = %url, "GET request");
        let response = self
            .inner
            .get(url)
            .bearer_auth(&self.api_key)
            .query(query)
            .send()
            .await?;
        read_json(response).await
    }

    /// POST a JSON body and return the JSON reply.
    async fn post_json<T: Serialize + ?Sized>(
        &self,
        url: Url,
        body: &T,
    ) -> Result<Value, ClientError> {
        debug!(url = %url, "POST request");
        let response = self
            .inner
            .post(url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;
        read_json(response).await
    }

    async fn list(
        &self,
        collection: &str,
        key_field: Option<&str>,
        skip: u32,
        limit: u32,
    ) -> Result<Vec<RemoteResource>, ClientError> {
        let url = self.endpoint(&["api", "v1", collection, ""])?;
        let value = self
            .get_json(url, &[("skip", skip), ("limit", limit)])
            .await?;
        let Value::Array(items) = value else {
            return Err(ClientError::Serialization(format!(
                "expected a JSON array listing {}",
                collection
            )));
        };
        items
            .into_iter()
            .map(|item| RemoteResource::from_json(item, key_field).map_err(ClientError::from))
            .collect()
    }
}

async fn read_json(response: reqwest::Response) -> Result<Value, ClientError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ClientError::Status {
            status: status.as_u16(),
            body,
        });
    }

    response
        .json()
        .await
        .map_err(|e| ClientError::Serialization(e.to_string()))
}

#[async_trait]
impl WaveBackend for HttpBackend {
    async fn list_experiment_types(
        &self,
        skip: u32,
        limit: u32,
    ) -> Result<Vec<RemoteResource>, ClientError> {
        self.list("experiment-types", Some(TABLE_NAME_FIELD), skip, limit)
            .await
    }

    async fn create_experiment_type(
        &self,
        spec: &ExperimentTypeSpec,
    ) -> Result<RemoteResource, ClientError> {
        let url = self.endpoint(&["api", "v1", "experiment-types", ""])?;
        let value = self.post_json(url, spec).await?;
        Ok(RemoteResource::from_json(value, Some(TABLE_NAME_FIELD))?)
    }

    async fn list_tags(&self, skip: u32, limit: u32) -> Result<Vec<RemoteResource>, ClientError> {
        self.list("tags", None, skip, limit).await
    }

    async fn create_tag(&self, tag: &TagSpec) -> Result<RemoteResource, ClientError> {
        let url = self.endpoint(&["api", "v1", "tags", ""])?;
        let value = self.post_json(url, tag).await?;
        Ok(RemoteResource::from_json(value, None)?)
    }

    async fn create_experiment(&self, request: &NewExperiment) -> Result<Experiment, ClientError> {
        let url = self.endpoint(&["api", "v1", "experiments", ""])?;
        let value = self.post_json(url, request).await?;
        serde_json::from_value(value).map_err(|e| ClientError::Serialization(e.to_string()))
    }

    async fn get_experiment_data(
        &self,
        experiment_id: &ExperimentId,
    ) -> Result<DataTable, ClientError> {
        let url = self.endpoint(&["api", "v1", "experiment-data", experiment_id.as_str(), "data"])?;
        let value = self.get_json(url, &[]).await?;
        Ok(DataTable::from_json(value)?)
    }
}
