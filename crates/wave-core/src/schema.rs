//! Experiment schema column rules enforced by the WAVE backend.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Column names the backend adds to every experiment table.
pub const RESERVED_COLUMNS: [(&str, &str); 5] = [
    ("id", "Auto-generated primary key"),
    ("experiment_uuid", "Links data to experiment"),
    ("participant_id", "Participant identifier (added automatically)"),
    ("created_at", "Timestamp when data was created"),
    ("updated_at", "Timestamp when data was last modified"),
];

/// Maximum length of a `STRING` column value.
pub const STRING_MAX_LEN: usize = 255;

/// Supported column data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ColumnType {
    /// Whole numbers (e.g. trial numbers, counts).
    Integer,
    /// Decimal numbers (e.g. reaction times, scores).
    Float,
    /// Text up to 255 characters.
    String,
    /// Longer text content.
    Text,
    /// True/false values.
    Boolean,
    /// Date and time stamps.
    Datetime,
    /// Complex structured data.
    Json,
}

impl ColumnType {
    pub const ALL: [ColumnType; 7] = [
        ColumnType::Integer,
        ColumnType::Float,
        ColumnType::String,
        ColumnType::Text,
        ColumnType::Boolean,
        ColumnType::Datetime,
        ColumnType::Json,
    ];

    /// Wire name of the type.
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Float => "FLOAT",
            ColumnType::String => "STRING",
            ColumnType::Text => "TEXT",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Datetime => "DATETIME",
            ColumnType::Json => "JSON",
        }
    }

    fn summary(&self) -> &'static str {
        match self {
            ColumnType::Integer => "Whole numbers (e.g., trial numbers, counts)",
            ColumnType::Float => "Decimal numbers (e.g., reaction times, scores)",
            ColumnType::String => "Text up to 255 characters (e.g., responses, stimulus names)",
            ColumnType::Text => "Longer text content (unlimited length)",
            ColumnType::Boolean => "True/false values (e.g., accuracy, conditions)",
            ColumnType::Datetime => "Date and time stamps",
            ColumnType::Json => "Complex structured data",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ColumnType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ColumnType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| CoreError::InvalidSchema(format!("unsupported column type '{}'", s)))
    }
}

/// Check a schema against the reserved-name and non-empty rules.
pub fn validate_schema(schema: &BTreeMap<String, ColumnType>) -> Result<(), CoreError> {
    if schema.is_empty() {
        return Err(CoreError::InvalidSchema(
            "schema must define at least one column".to_string(),
        ));
    }
    for column in schema.keys() {
        if column.trim().is_empty() {
            return Err(CoreError::InvalidSchema("column name is empty".to_string()));
        }
        if RESERVED_COLUMNS.iter().any(|(reserved, _)| reserved == column) {
            return Err(CoreError::InvalidSchema(format!(
                "column '{}' is reserved by the backend",
                column
            )));
        }
    }
    Ok(())
}

/// Human-readable summary of the schema rules.
pub fn rules_text() -> String {
    let mut out = String::from("### Schema Validation Rules\n");
    out.push_str("\n**Reserved Column Names** (cannot be used in your schema):\n");
    for (name, meaning) in RESERVED_COLUMNS {
        out.push_str(&format!("- `{}` - {}\n", name, meaning));
    }
    out.push_str("\n**Supported Data Types**:\n");
    for column_type in ColumnType::ALL {
        out.push_str(&format!("- `{}` - {}\n", column_type, column_type.summary()));
    }
    out.push_str("\n**Important Notes**:\n");
    out.push_str(&format!(
        "- STRING fields are capped at {} characters - use TEXT for longer content\n",
        STRING_MAX_LEN
    ));
    out.push_str("- Column names are case-sensitive and should match exactly\n");
    out.push_str("- Field names cannot conflict with reserved names above\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(columns: &[(&str, ColumnType)]) -> BTreeMap<String, ColumnType> {
        columns
            .iter()
            .map(|(name, t)| (name.to_string(), *t))
            .collect()
    }

    #[test]
    fn accepts_plain_schema() {
        let s = schema(&[("rt", ColumnType::Float), ("response", ColumnType::String)]);
        assert!(validate_schema(&s).is_ok());
    }

    #[test]
    fn rejects_reserved_and_empty() {
        assert!(validate_schema(&BTreeMap::new()).is_err());
        assert!(validate_schema(&schema(&[("participant_id", ColumnType::String)])).is_err());
        assert!(validate_schema(&schema(&[(" ", ColumnType::Text)])).is_err());
    }

    #[test]
    fn reserved_names_are_case_sensitive() {
        assert!(validate_schema(&schema(&[("ID", ColumnType::Integer)])).is_ok());
    }

    #[test]
    fn column_type_wire_names() {
        let parsed: ColumnType = serde_json::from_str("\"DATETIME\"").unwrap();
        assert_eq!(parsed, ColumnType::Datetime);
        assert_eq!(serde_json::to_string(&ColumnType::Json).unwrap(), "\"JSON\"");
        assert_eq!("BOOLEAN".parse::<ColumnType>().unwrap(), ColumnType::Boolean);
        assert!("boolean".parse::<ColumnType>().is_err());
    }

    #[test]
    fn rules_text_lists_every_type() {
        let text = rules_text();
        for t in ColumnType::ALL {
            assert!(text.contains(&format!("`{}`", t)));
        }
        assert!(text.contains("`experiment_uuid`"));
    }
}
