//! Row writer
//!
//! Writes one batch of rows with a single store call. The whole batch is
//! checked against the declared width first, so a malformed row means that
//! nothing from the batch is written.

use std::sync::Arc;

use tracing::debug;

use crate::database::Database;
use crate::error::EngineError;
use crate::models::Row;

/// Bulk writer for fixed-width rows
#[derive(Clone)]
pub struct RowWriter {
    db: Arc<dyn Database>,
    width: usize,
}

impl RowWriter {
    /// Create a writer enforcing `width`
    pub fn new(db: Arc<dyn Database>, width: usize) -> Self {
        Self { db, width }
    }

    /// Declared width
    pub fn width(&self) -> usize {
        self.width
    }

    /// Write a batch for a scope, keyed by record id
    ///
    /// Returns the number of rows written.
    pub async fn write(&self, scope_id: &str, rows: &[Row]) -> Result<u64, EngineError> {
        if let Some(bad) = rows.iter().find(|r| r.width() != self.width) {
            return Err(EngineError::RowWidthMismatch {
                scope: scope_id.to_string(),
                record_id: bad.record_id.clone(),
                expected: self.width,
                actual: bad.width(),
            });
        }

        let written = self.db.upsert_rows(scope_id, rows).await?;
        debug!(scope = scope_id, rows = written, "Wrote batch");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{MockDatabase, SqliteDatabase};

    fn row(id: &str, width: usize) -> Row {
        Row::new(id, vec![id.to_string(); width])
    }

    // Test 1: Valid batch is written
    #[tokio::test]
    async fn test_write_valid_batch() {
        let db = Arc::new(SqliteDatabase::in_memory().await.unwrap());
        let writer = RowWriter::new(db.clone(), 3);

        let written = writer
            .write("s1", &[row("1", 3), row("2", 3)])
            .await
            .unwrap();

        assert_eq!(written, 2);
        assert_eq!(db.count_rows("s1").await.unwrap(), 2);
    }

    // Test 2: One bad row rejects the whole batch before any write
    #[tokio::test]
    async fn test_width_mismatch_writes_nothing() {
        let mut mock = MockDatabase::new();
        mock.expect_upsert_rows().times(0);

        let writer = RowWriter::new(Arc::new(mock), 3);
        let result = writer
            .write("s1", &[row("1", 3), row("2", 2), row("3", 3)])
            .await;

        match result {
            Err(EngineError::RowWidthMismatch {
                record_id,
                expected,
                actual,
                ..
            }) => {
                assert_eq!(record_id, "2");
                assert_eq!(expected, 3);
                assert_eq!(actual, 2);
            }
            other => panic!("Expected RowWidthMismatch, got {:?}", other),
        }
    }

    // Test 3: Rewriting a batch does not duplicate rows
    #[tokio::test]
    async fn test_rewrite_is_idempotent() {
        let db = Arc::new(SqliteDatabase::in_memory().await.unwrap());
        let writer = RowWriter::new(db.clone(), 2);
        let batch = [row("1", 2), row("2", 2)];

        writer.write("s1", &batch).await.unwrap();
        writer.write("s1", &batch).await.unwrap();

        assert_eq!(db.count_rows("s1").await.unwrap(), 2);
    }
}
