//! Declared raw-file schema
//!
//! Loaded once per validation run from a JSON document of the form:
//!
//! ```json
//! {
//!   "NumberofColumns": 3,
//!   "ColName": { "Wafer": "object", "Sensor-1": "float64", "Sensor-2": "float64" }
//! }
//! ```
//!
//! `ColName` is an ordered mapping: column identity is checked by
//! position, not by name lookup.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::frame::ColumnKind;

/// Declared type of a schema column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Text,
    Integer,
    Float,
}

impl ColumnType {
    /// Parse a declared type string; accepts pandas dtype names and a few
    /// plain aliases.
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "object" | "varchar" | "text" | "str" => Ok(ColumnType::Text),
            "int" | "int32" | "int64" | "integer" => Ok(ColumnType::Integer),
            "float" | "float32" | "float64" => Ok(ColumnType::Float),
            other => Err(Error::Schema(format!("unknown declared type {other:?}"))),
        }
    }

    /// Whether an inferred column kind satisfies this declaration.
    pub fn matches(self, kind: ColumnKind) -> bool {
        matches!(
            (self, kind),
            (ColumnType::Text, ColumnKind::Text)
                | (ColumnType::Integer, ColumnKind::Integer)
                | (ColumnType::Float, ColumnKind::Float)
        )
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnType::Text => write!(f, "object"),
            ColumnType::Integer => write!(f, "int64"),
            ColumnType::Float => write!(f, "float64"),
        }
    }
}

/// Ordered column declarations plus the expected column count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaSpec {
    pub column_count: usize,
    pub columns: Vec<(String, ColumnType)>,
}

#[derive(Deserialize)]
struct SchemaFile {
    #[serde(rename = "NumberofColumns")]
    number_of_columns: usize,
    #[serde(rename = "ColName")]
    col_name: serde_json::Map<String, serde_json::Value>,
}

impl SchemaSpec {
    /// Load and sanity-check a schema file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| Error::Schema(format!("cannot read {}: {e}", path.display())))?;
        let raw: SchemaFile = serde_json::from_str(&text)?;
        let mut columns = Vec::with_capacity(raw.col_name.len());
        for (name, dtype) in &raw.col_name {
            let dtype = dtype
                .as_str()
                .ok_or_else(|| Error::Schema(format!("declared type for {name} is not a string")))?;
            columns.push((name.clone(), ColumnType::parse(dtype)?));
        }
        if columns.len() != raw.number_of_columns {
            return Err(Error::Schema(format!(
                "NumberofColumns is {} but ColName lists {} columns",
                raw.number_of_columns,
                columns.len()
            )));
        }
        Ok(Self {
            column_count: raw.number_of_columns,
            columns,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn loads_ordered_columns() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("schema.json");
        fs::write(
            &path,
            r#"{"NumberofColumns": 3,
                "ColName": {"Wafer": "object", "Sensor-2": "float64", "Sensor-1": "float64"}}"#,
        )
        .unwrap();
        let spec = SchemaSpec::load(&path).unwrap();
        assert_eq!(spec.column_count, 3);
        // declaration order preserved, not alphabetical
        assert_eq!(spec.columns[1].0, "Sensor-2");
        assert_eq!(spec.columns[0].1, ColumnType::Text);
    }

    #[test]
    fn count_mismatch_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("schema.json");
        fs::write(
            &path,
            r#"{"NumberofColumns": 2, "ColName": {"a": "float64"}}"#,
        )
        .unwrap();
        assert!(SchemaSpec::load(&path).is_err());
    }

    #[test]
    fn type_matching() {
        assert!(ColumnType::Float.matches(ColumnKind::Float));
        assert!(!ColumnType::Float.matches(ColumnKind::Integer));
        assert!(ColumnType::Text.matches(ColumnKind::Text));
    }
}
