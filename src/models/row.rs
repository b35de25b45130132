//! Fixed-width row model
//!
//! The column order declared here is the only compatibility contract with
//! downstream consumers of the row store.

use serde::{Deserialize, Serialize};

use crate::config::{ColumnConfig, RowsConfig};

/// Origin of a column value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnSource {
    /// Field of the primary record
    #[default]
    Record,
    /// Field of the record's supplementary data
    Supplementary,
}

/// One output row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    /// Stable record id; upsert key within a scope
    pub record_id: String,
    /// Cell values in column order
    pub cells: Vec<String>,
}

impl Row {
    /// Create a row
    pub fn new(record_id: impl Into<String>, cells: Vec<String>) -> Self {
        Self {
            record_id: record_id.into(),
            cells,
        }
    }

    /// Number of cells
    pub fn width(&self) -> usize {
        self.cells.len()
    }
}

/// Declared row layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowSchema {
    /// Record field holding the id
    pub id_field: String,
    /// Ordered columns
    pub columns: Vec<ColumnConfig>,
}

impl RowSchema {
    /// Create a schema
    pub fn new(id_field: impl Into<String>, columns: Vec<ColumnConfig>) -> Self {
        Self {
            id_field: id_field.into(),
            columns,
        }
    }

    /// Build from configuration
    pub fn from_config(config: &RowsConfig) -> Self {
        Self::new(config.id_field.clone(), config.columns.clone())
    }

    /// Declared width
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// Column headers in order
    pub fn headers(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}
