//! Authenticated HTTP client for the remote data API
//!
//! This module provides the one request primitive the engine uses:
//! `request(endpoint, method, payload)`. Transient failures (rate limiting,
//! gateway/unavailable statuses, transport errors) are retried through the
//! [`RetryManager`]; every other non-2xx status fails immediately.

use crate::config::{ApiConfig, RetryConfig};
use crate::error::SyncError;
use crate::models::StatusToken;
use crate::sync::oplog::OperationLog;
use crate::sync::retry::{RetryEvent, RetryManager};
use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, RETRY_AFTER};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

/// Longest response body kept in a `SyncError::Status`
const MAX_ERROR_BODY: usize = 512;

/// HTTP client with bearer auth and bounded retry
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
    retry: RetryManager,
    oplog: Option<OperationLog>,
}

impl ApiClient {
    /// Create a new client from configuration
    pub fn new(api: &ApiConfig, retry: RetryConfig) -> Result<Self, SyncError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(api.request_timeout_secs))
            .build()
            .map_err(|e| SyncError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self::with_client(client, api, retry))
    }

    /// Create a client with a custom reqwest Client
    pub fn with_client(client: Client, api: &ApiConfig, retry: RetryConfig) -> Self {
        Self {
            client,
            base_url: api.base_url.trim_end_matches('/').to_string(),
            auth_token: api.auth_token.clone().filter(|t| !t.is_empty()),
            retry: RetryManager::new(retry),
            oplog: None,
        }
    }

    /// Write RETRY events to the operational log
    pub fn with_operation_log(mut self, oplog: OperationLog) -> Self {
        self.oplog = Some(oplog);
        self
    }

    /// Absolute URL for an endpoint relative to the base
    pub fn url_for(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    /// Perform a request with retry
    ///
    /// # Arguments
    ///
    /// * `endpoint` - Path (and query) relative to the base URL
    /// * `method` - HTTP method
    /// * `payload` - Optional JSON body
    ///
    /// # Returns
    ///
    /// The response body of the first 2xx response. After `max_retries`
    /// retries of a transient failure the error is
    /// `SyncError::RetriesExhausted` carrying the last failure.
    pub async fn request(
        &self,
        endpoint: &str,
        method: Method,
        payload: Option<&serde_json::Value>,
    ) -> Result<Bytes, SyncError> {
        self.request_with_query(endpoint, method, &[], payload).await
    }

    /// Like [`request`](Self::request), with query pairs that are
    /// percent-encoded onto the URL
    pub async fn request_with_query(
        &self,
        endpoint: &str,
        method: Method,
        query: &[(&str, String)],
        payload: Option<&serde_json::Value>,
    ) -> Result<Bytes, SyncError> {
        let url = self.url_for(endpoint);

        self.retry
            .execute_observed(
                || self.send_once(&url, method.clone(), query, payload),
                |event: RetryEvent| {
                    let url = url.clone();
                    async move {
                        if let Some(oplog) = &self.oplog {
                            oplog
                                .record(
                                    StatusToken::Retry,
                                    "http",
                                    None,
                                    format!(
                                        "{} attempt {}/{} in {}ms: {}",
                                        url,
                                        event.attempt,
                                        event.max_retries,
                                        event.backoff.as_millis(),
                                        event.error
                                    ),
                                )
                                .await;
                        }
                    }
                },
            )
            .await
    }

    /// GET an endpoint and decode the JSON body
    pub async fn get_json<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, SyncError> {
        self.get_json_with_query(endpoint, &[]).await
    }

    /// GET an endpoint with encoded query pairs and decode the JSON body
    pub async fn get_json_with_query<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<T, SyncError> {
        let body = self
            .request_with_query(endpoint, Method::GET, query, None)
            .await?;
        serde_json::from_slice(&body).map_err(|e| {
            SyncError::InvalidData(format!("Failed to decode response from {}: {}", endpoint, e))
        })
    }

    /// Single attempt, mapping transport failures and statuses to `SyncError`
    async fn send_once(
        &self,
        url: &str,
        method: Method,
        query: &[(&str, String)],
        payload: Option<&serde_json::Value>,
    ) -> Result<Bytes, SyncError> {
        debug!(url = url, method = %method, query = ?query, "Sending HTTP request");

        let mut request = self.client.request(method, url);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(token) = &self.auth_token {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        if let Some(body) = payload {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                SyncError::NetworkTimeout
            } else if e.is_connect() {
                SyncError::ConnectionRefused
            } else {
                SyncError::Network(e.to_string())
            }
        })?;

        let status = response.status();

        if status.is_success() {
            let body = response
                .bytes()
                .await
                .map_err(|e| SyncError::Network(e.to_string()))?;
            debug!(url = url, body_size = body.len(), "Received response");
            return Ok(body);
        }

        match status {
            StatusCode::TOO_MANY_REQUESTS => {
                // Logged only; the backoff schedule does not follow Retry-After
                let retry_after = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0);

                warn!(url = url, retry_after, "Rate limited by upstream");
                Err(SyncError::RateLimited(retry_after))
            }
            StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT => {
                warn!(url = url, status = status.as_u16(), "Upstream unavailable");
                Err(SyncError::ServiceUnavailable(status.as_u16()))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                warn!(url = url, status = status.as_u16(), "Request failed");
                Err(SyncError::Status {
                    status: status.as_u16(),
                    body: truncate(body, MAX_ERROR_BODY),
                })
            }
        }
    }
}

fn truncate(mut s: String, max: usize) -> String {
    if s.len() > max {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s.truncate(end);
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{Database, SqliteDatabase};
    use std::sync::Arc;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn api_config(base_url: &str) -> ApiConfig {
        ApiConfig {
            base_url: base_url.to_string(),
            auth_token: Some("secret".to_string()),
            ..Default::default()
        }
    }

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff_ms: 10,
            max_backoff_ms: 100,
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    // Test 1: GET returns the body and sends the bearer token
    #[tokio::test]
    async fn test_get_sends_bearer_token() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/records"))
            .and(query_param("page", "0"))
            .and(header("Authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = ApiClient::new(&api_config(&mock_server.uri()), fast_retry(3)).unwrap();
        let body = client
            .request("records?page=0", Method::GET, None)
            .await
            .unwrap();

        assert_eq!(body, Bytes::from("ok"));
    }

    // Test 2: POST sends the JSON payload
    #[tokio::test]
    async fn test_post_sends_payload() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .and(body_json(serde_json::json!({"ids": [1, 2]})))
            .respond_with(ResponseTemplate::new(201).set_body_string("created"))
            .mount(&mock_server)
            .await;

        let client = ApiClient::new(&api_config(&mock_server.uri()), fast_retry(3)).unwrap();
        let payload = serde_json::json!({"ids": [1, 2]});
        let body = client
            .request("/search", Method::POST, Some(&payload))
            .await
            .unwrap();

        assert_eq!(body, Bytes::from("created"));
    }

    // Test 3: Always rate limited: 1 attempt + 3 retries, then RetriesExhausted
    #[tokio::test]
    async fn test_rate_limited_retry_bound() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/records"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "120"))
            .expect(4)
            .mount(&mock_server)
            .await;

        let client = ApiClient::new(&api_config(&mock_server.uri()), fast_retry(3)).unwrap();
        let result = client.request("records", Method::GET, None).await;

        match result.unwrap_err() {
            SyncError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 4);
                assert_eq!(*last, SyncError::RateLimited(120));
            }
            err => panic!("Expected RetriesExhausted, got {:?}", err),
        }
    }

    // Test 4: 503 then 200 succeeds on retry
    #[tokio::test]
    async fn test_service_unavailable_then_success() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/records"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/records"))
            .respond_with(ResponseTemplate::new(200).set_body_string("recovered"))
            .mount(&mock_server)
            .await;

        let client = ApiClient::new(&api_config(&mock_server.uri()), fast_retry(3)).unwrap();
        let body = client.request("records", Method::GET, None).await.unwrap();

        assert_eq!(body, Bytes::from("recovered"));
    }

    // Test 5: Other non-2xx fails immediately with status and body
    #[tokio::test]
    async fn test_terminal_status_not_retried() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/records"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden scope"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = ApiClient::new(&api_config(&mock_server.uri()), fast_retry(3)).unwrap();
        let result = client.request("records", Method::GET, None).await;

        assert_eq!(
            result.unwrap_err(),
            SyncError::Status {
                status: 403,
                body: "forbidden scope".to_string()
            }
        );
    }

    // Test 6: 500 is terminal, 502 and 504 are retried
    #[tokio::test]
    async fn test_gateway_statuses_are_retryable() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/internal"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gateway"))
            .respond_with(ResponseTemplate::new(502))
            .expect(2)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/timeout"))
            .respond_with(ResponseTemplate::new(504))
            .expect(2)
            .mount(&mock_server)
            .await;

        let client = ApiClient::new(&api_config(&mock_server.uri()), fast_retry(1)).unwrap();

        assert!(matches!(
            client.request("internal", Method::GET, None).await,
            Err(SyncError::Status { status: 500, .. })
        ));
        assert!(matches!(
            client.request("gateway", Method::GET, None).await,
            Err(SyncError::RetriesExhausted { attempts: 2, .. })
        ));
        assert!(matches!(
            client.request("timeout", Method::GET, None).await,
            Err(SyncError::RetriesExhausted { attempts: 2, .. })
        ));
    }

    // Test 7: Connection refused is mapped and retried
    #[tokio::test]
    async fn test_connection_refused() {
        // Nothing listens on port 1
        let client = ApiClient::new(&api_config("http://127.0.0.1:1"), fast_retry(1)).unwrap();
        let result = client.request("records", Method::GET, None).await;

        match result.unwrap_err() {
            SyncError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 2);
                assert!(matches!(
                    *last,
                    SyncError::ConnectionRefused | SyncError::Network(_)
                ));
            }
            err => panic!("Expected RetriesExhausted, got {:?}", err),
        }
    }

    // Test 8: get_json decodes and rejects malformed bodies
    #[tokio::test]
    async fn test_get_json() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/good"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"n": 3})))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/bad"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&mock_server)
            .await;

        let client = ApiClient::new(&api_config(&mock_server.uri()), fast_retry(0)).unwrap();

        let value: serde_json::Value = client.get_json("good").await.unwrap();
        assert_eq!(value["n"], 3);

        let bad: Result<serde_json::Value, _> = client.get_json("bad").await;
        assert!(matches!(bad, Err(SyncError::InvalidData(_))));
    }

    // Test 9: Retries are written to the ops log as RETRY
    #[tokio::test]
    async fn test_retry_events_logged() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/records"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&mock_server)
            .await;

        let db = Arc::new(SqliteDatabase::in_memory().await.unwrap());
        let client = ApiClient::new(&api_config(&mock_server.uri()), fast_retry(2))
            .unwrap()
            .with_operation_log(OperationLog::new(db.clone()));

        let _ = client.request("records", Method::GET, None).await;

        let entries = db.recent_logs(10).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.status == StatusToken::Retry));
        assert!(entries[1].message.contains("attempt 1/2"));
    }

    // Test 10: URL joining tolerates slashes on both sides
    #[test]
    fn test_url_for() {
        let client = ApiClient::with_client(
            Client::new(),
            &api_config("https://api.example.com/v1/"),
            RetryConfig::default(),
        );
        assert_eq!(
            client.url_for("/records?page=1"),
            "https://api.example.com/v1/records?page=1"
        );
        assert_eq!(
            client.url_for("records"),
            "https://api.example.com/v1/records"
        );
    }

    // Test 11: Error bodies are truncated on a char boundary
    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short".to_string(), 10), "short");
        assert_eq!(truncate("ééé".to_string(), 3), "é");
    }
}
