//! Remote page source
//!
//! [`PageSource`] is the seam between the batch loop and the remote API.
//! [`ApiSource`] implements it over [`ApiClient`]:
//!
//! - listing: `GET {endpoint}?page={n}&page_size={size}` returning
//!   `{"total_count": 250, "records": [...]}`
//! - supplementary: `GET {supplementary_endpoint}?ids=a,b,c` returning an
//!   object keyed by record id

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::SyncError;
use crate::models::SyncScope;
use crate::sync::http_client::ApiClient;

/// One page of the listing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// Total records in the scope; present at least on the first page
    #[serde(default)]
    pub total_count: Option<u64>,

    /// Records on this page
    #[serde(default)]
    pub records: Vec<Value>,
}

/// Source of pages and per-record supplementary data
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetch page `page` (0-indexed)
    async fn fetch_page(
        &self,
        scope: &SyncScope,
        page: u64,
        page_size: u32,
    ) -> Result<Page, SyncError>;

    /// Fetch supplementary data for the given record ids
    ///
    /// Ids missing from the result simply have no supplementary data.
    async fn fetch_supplementary(
        &self,
        scope: &SyncScope,
        ids: &[String],
    ) -> Result<HashMap<String, Value>, SyncError>;
}

/// [`PageSource`] backed by the remote HTTP API
#[derive(Debug, Clone)]
pub struct ApiSource {
    client: ApiClient,
}

impl ApiSource {
    /// Create a source on top of a client
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PageSource for ApiSource {
    async fn fetch_page(
        &self,
        scope: &SyncScope,
        page: u64,
        page_size: u32,
    ) -> Result<Page, SyncError> {
        let query = [
            ("page", page.to_string()),
            ("page_size", page_size.to_string()),
        ];
        let page_data: Page = self
            .client
            .get_json_with_query(&scope.endpoint, &query)
            .await?;

        debug!(
            scope = %scope.id,
            page,
            records = page_data.records.len(),
            total_count = ?page_data.total_count,
            "Fetched page"
        );
        Ok(page_data)
    }

    async fn fetch_supplementary(
        &self,
        scope: &SyncScope,
        ids: &[String],
    ) -> Result<HashMap<String, Value>, SyncError> {
        let Some(supplementary) = &scope.supplementary_endpoint else {
            return Ok(HashMap::new());
        };
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let query = [("ids", ids.join(","))];
        self.client
            .get_json_with_query(supplementary, &query)
            .await
    }
}
