//! Resource model shared by the reconciler, the backend client and the orchestrator.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::CoreError;
use crate::ids::ExperimentId;
use crate::schema::ColumnType;

/// Provenance marker attached to experiments created without explicit extra data.
pub const DEFAULT_PROVENANCE: &str = "wave-setup";

/// A desired named resource plus the secondary field that must also be unique.
///
/// For experiment types the uniqueness key is the backing table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceDescriptor {
    name: String,
    uniqueness_key: String,
}

impl ResourceDescriptor {
    /// Create a descriptor, rejecting empty names or keys.
    pub fn new(
        name: impl Into<String>,
        uniqueness_key: impl Into<String>,
    ) -> Result<Self, CoreError> {
        let name = name.into();
        let uniqueness_key = uniqueness_key.into();
        if name.is_empty() {
            return Err(CoreError::InvalidInput("resource name is empty".to_string()));
        }
        if uniqueness_key.is_empty() {
            return Err(CoreError::InvalidInput(format!(
                "uniqueness key of '{}' is empty",
                name
            )));
        }
        Ok(Self {
            name,
            uniqueness_key,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uniqueness_key(&self) -> &str {
        &self.uniqueness_key
    }
}

/// A resource as listed or returned by the backend.
///
/// Only `id`, `name` and the uniqueness key are interpreted; every other
/// field is carried through untouched in `fields`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteResource {
    pub id: i64,
    pub name: String,
    #[serde(skip)]
    pub uniqueness_key: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl RemoteResource {
    /// Create a resource with no opaque fields.
    pub fn new(id: i64, name: impl Into<String>, uniqueness_key: Option<String>) -> Self {
        Self {
            id,
            name: name.into(),
            uniqueness_key,
            fields: Map::new(),
        }
    }

    /// Build a resource from a backend JSON object.
    ///
    /// `key_field` names the JSON field holding the uniqueness key (e.g.
    /// `table_name`); it stays in `fields` as well so the original payload
    /// round-trips.
    pub fn from_json(value: Value, key_field: Option<&str>) -> Result<Self, CoreError> {
        let Value::Object(mut fields) = value else {
            return Err(CoreError::Serialization(
                "expected a JSON object for a remote resource".to_string(),
            ));
        };

        let id = fields
            .remove("id")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| CoreError::Serialization("resource has no integer 'id'".to_string()))?;
        let name = match fields.remove("name") {
            Some(Value::String(name)) => name,
            _ => {
                return Err(CoreError::Serialization(format!(
                    "resource {} has no string 'name'",
                    id
                )))
            }
        };
        let uniqueness_key = match key_field {
            Some(field) => match fields.get(field) {
                Some(Value::String(key)) => Some(key.clone()),
                _ => {
                    return Err(CoreError::Serialization(format!(
                        "resource '{}' has no string '{}'",
                        name, field
                    )))
                }
            },
            None => None,
        };

        Ok(Self {
            id,
            name,
            uniqueness_key,
            fields,
        })
    }

    /// Look up an opaque field.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Builder method to set an opaque field.
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }
}

/// Definition of an experiment type to provision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentTypeSpec {
    /// Experiment type name, unique in the backend.
    pub name: String,

    /// Backing table name, also unique in the backend.
    pub table_name: String,

    /// Human-readable description.
    #[serde(default)]
    pub description: String,

    /// Column name to column type.
    pub schema_definition: BTreeMap<String, ColumnType>,
}

impl ExperimentTypeSpec {
    /// Create a new spec with an empty schema.
    pub fn new(name: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table_name: table_name.into(),
            description: String::new(),
            schema_definition: BTreeMap::new(),
        }
    }

    /// Builder method to set description.
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    /// Builder method to add a column.
    pub fn with_column(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
        self.schema_definition.insert(name.into(), column_type);
        self
    }

    /// Descriptor used for reconciliation.
    pub fn descriptor(&self) -> Result<ResourceDescriptor, CoreError> {
        ResourceDescriptor::new(self.name.clone(), self.table_name.clone())
    }
}

/// A tag to provision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl TagSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
        }
    }

    /// Builder method to set description.
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }
}

/// Request to create an experiment instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewExperiment {
    pub experiment_type_id: i64,
    pub description: String,
    pub tags: Vec<String>,
    pub additional_data: Map<String, Value>,
}

impl NewExperiment {
    /// Create a request; `additional_data` falls back to the provenance marker.
    pub fn new(
        experiment_type_id: i64,
        description: impl Into<String>,
        tags: Vec<String>,
        additional_data: Option<Map<String, Value>>,
    ) -> Self {
        let additional_data = additional_data.unwrap_or_else(|| {
            let mut marker = Map::new();
            marker.insert(
                "created_by".to_string(),
                Value::String(DEFAULT_PROVENANCE.to_string()),
            );
            marker
        });
        Self {
            experiment_type_id,
            description: description.into(),
            tags,
            additional_data,
        }
    }
}

/// An experiment instance created by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    /// Backend-assigned experiment identifier.
    pub uuid: ExperimentId,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Remaining backend fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Tabular experiment data: one JSON record per row.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DataTable {
    columns: Vec<String>,
    rows: Vec<Map<String, Value>>,
}

impl DataTable {
    /// Build a table from records; columns are the union of keys in first-seen order.
    pub fn from_records(rows: Vec<Map<String, Value>>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for row in &rows {
            for key in row.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }
        Self { columns, rows }
    }

    /// Parse a backend payload: either an array of records or an object
    /// wrapping one under `data`.
    pub fn from_json(value: Value) -> Result<Self, CoreError> {
        let records = match value {
            Value::Array(items) => items,
            Value::Object(mut obj) => match obj.remove("data") {
                Some(Value::Array(items)) => items,
                _ => {
                    return Err(CoreError::Serialization(
                        "experiment data object has no 'data' array".to_string(),
                    ))
                }
            },
            _ => {
                return Err(CoreError::Serialization(
                    "experiment data must be an array of records".to_string(),
                ))
            }
        };

        let rows = records
            .into_iter()
            .map(|record| match record {
                Value::Object(row) => Ok(row),
                other => Err(CoreError::Serialization(format!(
                    "experiment data record is not an object: {}",
                    other
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_records(rows))
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Map<String, Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
