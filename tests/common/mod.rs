//! Common test utilities and helpers for integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use pagesync::config::{ColumnConfig, Config, RowsConfig};
use pagesync::database::SqliteDatabase;
use pagesync::error::SyncError;
use pagesync::models::{ColumnSource, RowSchema, ScopeRegistry, SyncScope};
use pagesync::sync::{Dispatcher, Page, PageSource, SchemaTransformer};

/// Create an in-memory database for testing
pub async fn create_test_database() -> Arc<SqliteDatabase> {
    Arc::new(
        SqliteDatabase::in_memory()
            .await
            .expect("Failed to create test database"),
    )
}

/// Open a connection to an on-disk database shared between invocations
pub async fn open_shared_database(path: &Path) -> Arc<SqliteDatabase> {
    Arc::new(
        SqliteDatabase::new(path.to_str().expect("utf-8 temp path"))
            .await
            .expect("Failed to open shared database"),
    )
}

/// Configuration with two columns, no throttle and no lock wait
pub fn create_test_config() -> Config {
    let mut config = Config::default();
    config.api.base_url = "http://127.0.0.1:9".to_string();
    config.api.page_size = 100;
    config.api.throttle_ms = 0;
    config.sync.interactive_lock_wait_ms = 0;
    config.sync.scheduled_lock_wait_ms = 0;
    config.rows = RowsConfig {
        id_field: "id".to_string(),
        columns: vec![
            ColumnConfig {
                name: "Id".to_string(),
                from: ColumnSource::Record,
                field: "id".to_string(),
            },
            ColumnConfig {
                name: "Name".to_string(),
                from: ColumnSource::Record,
                field: "name".to_string(),
            },
        ],
    };
    config
}

/// Build a dispatcher over the given scopes
pub fn create_dispatcher(
    db: Arc<SqliteDatabase>,
    source: Arc<dyn PageSource>,
    scopes: Vec<SyncScope>,
    config: &Config,
) -> Dispatcher {
    let transformer = Arc::new(SchemaTransformer::new(RowSchema::from_config(&config.rows)));
    Dispatcher::new(ScopeRegistry::new(scopes), db, source, transformer, config)
}

/// One record as the API returns it
pub fn record(i: u64) -> Value {
    json!({"id": i, "name": format!("record-{}", i)})
}

/// Listing body for `page` of a dataset of `total` records
pub fn page_body(total: u64, page: u64, page_size: u64) -> Value {
    let start = (page * page_size).min(total);
    let end = (start + page_size).min(total);
    json!({
        "total_count": total,
        "records": (start..end).map(record).collect::<Vec<_>>()
    })
}

/// In-memory upstream
///
/// Pages are served from `total` records. `fail_on` makes one page fail a
/// given number of times before succeeding, and `delay` slows every fetch.
pub struct FakeSource {
    total: AtomicU64,
    delay: Duration,
    fail_on: Mutex<HashMap<u64, u32>>,
    fetched: Mutex<Vec<u64>>,
}

impl FakeSource {
    pub fn new(total: u64) -> Self {
        Self {
            total: AtomicU64::new(total),
            delay: Duration::ZERO,
            fail_on: Mutex::new(HashMap::new()),
            fetched: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail `page` the next `times` fetches
    pub fn fail_page(&self, page: u64, times: u32) {
        self.fail_on.lock().unwrap().insert(page, times);
    }

    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::SeqCst);
    }

    /// Pages fetched so far, in order
    pub fn fetched(&self) -> Vec<u64> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageSource for FakeSource {
    async fn fetch_page(
        &self,
        _scope: &SyncScope,
        page: u64,
        page_size: u32,
    ) -> Result<Page, SyncError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        {
            let mut fail_on = self.fail_on.lock().unwrap();
            if let Some(remaining) = fail_on.get_mut(&page) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(SyncError::Status {
                        status: 500,
                        body: format!("page {} unavailable", page),
                    });
                }
            }
        }

        self.fetched.lock().unwrap().push(page);
        let body = page_body(self.total.load(Ordering::SeqCst), page, page_size as u64);
        Ok(serde_json::from_value(body).unwrap())
    }

    async fn fetch_supplementary(
        &self,
        _scope: &SyncScope,
        _ids: &[String],
    ) -> Result<HashMap<String, Value>, SyncError> {
        Ok(HashMap::new())
    }
}
