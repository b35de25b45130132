//! Record → row transformation

use serde_json::Value;

use crate::error::SyncError;
use crate::models::{ColumnSource, Row, RowSchema};

/// Turns a remote record plus its supplementary data into a row
pub trait RowTransformer: Send + Sync {
    /// Declared row width
    fn width(&self) -> usize;

    /// Stable id of a record
    fn record_id(&self, record: &Value) -> Option<String>;

    /// Build the row for one record
    fn transform(&self, record: &Value, supplementary: Option<&Value>) -> Result<Row, SyncError>;
}

/// Transformer driven by the declarative column list
#[derive(Debug, Clone)]
pub struct SchemaTransformer {
    schema: RowSchema,
}

impl SchemaTransformer {
    /// Create a transformer for a schema
    pub fn new(schema: RowSchema) -> Self {
        Self { schema }
    }

    /// The schema in use
    pub fn schema(&self) -> &RowSchema {
        &self.schema
    }
}

impl RowTransformer for SchemaTransformer {
    fn width(&self) -> usize {
        self.schema.width()
    }

    fn record_id(&self, record: &Value) -> Option<String> {
        lookup(record, &self.schema.id_field)
            .map(render)
            .filter(|id| !id.is_empty())
    }

    fn transform(&self, record: &Value, supplementary: Option<&Value>) -> Result<Row, SyncError> {
        let id = self.record_id(record).ok_or_else(|| {
            SyncError::InvalidData(format!(
                "record has no '{}' field: {}",
                self.schema.id_field, record
            ))
        })?;

        let cells = self
            .schema
            .columns
            .iter()
            .map(|column| {
                let source = match column.from {
                    ColumnSource::Record => Some(record),
                    ColumnSource::Supplementary => supplementary,
                };
                source
                    .and_then(|value| lookup(value, &column.field))
                    .map(render)
                    .unwrap_or_default()
            })
            .collect();

        Ok(Row::new(id, cells))
    }
}

/// Resolve a dot-separated path; numeric segments index arrays
fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Render a JSON value as cell text
fn render(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}
