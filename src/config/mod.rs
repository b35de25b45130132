//! Configuration management for pagesync
//!
//! This module handles loading, parsing, and validating application configuration
//! from YAML files and environment variables. Unrecognized keys are ignored.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::models::{ColumnSource, ScopeKind};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Remote API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Retry configuration for the HTTP client
    #[serde(default)]
    pub retry: RetryConfig,

    /// Batch loop and lock configuration
    #[serde(default)]
    pub sync: SyncConfig,

    /// Row layout written to the row store
    #[serde(default)]
    pub rows: RowsConfig,

    /// Scope registry
    #[serde(default)]
    pub scopes: Vec<ScopeConfig>,

    /// Cadences for daemon mode
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Staleness thresholds reported by `status`
    #[serde(default)]
    pub staleness: StalenessConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileRead(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(yaml);
        serde_yaml::from_str(&expanded)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse YAML: {}", e)))
    }

    /// Load configuration from environment variables with prefix PAGESYNC_
    ///
    /// Scopes and row columns cannot be expressed this way; a file is
    /// required for anything beyond a smoke run.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Ok(url) = std::env::var("PAGESYNC_API_BASE_URL") {
            config.api.base_url = url;
        }
        if let Ok(token) = std::env::var("PAGESYNC_API_TOKEN") {
            config.api.auth_token = Some(token);
        }
        if let Ok(size) = std::env::var("PAGESYNC_API_PAGE_SIZE") {
            config.api.page_size = size
                .parse()
                .map_err(|_| ConfigError::Parse("Invalid page size".to_string()))?;
        }
        if let Ok(ms) = std::env::var("PAGESYNC_API_THROTTLE_MS") {
            config.api.throttle_ms = ms
                .parse()
                .map_err(|_| ConfigError::Parse("Invalid throttle interval".to_string()))?;
        }
        if let Ok(path) = std::env::var("PAGESYNC_DATABASE_PATH") {
            config.database.path = path;
        }
        if let Ok(level) = std::env::var("PAGESYNC_LOG_LEVEL") {
            config.logging.level = level;
        }

        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.base_url.trim().is_empty() {
            return Err(ConfigError::MissingRequired("api.base_url".to_string()));
        }
        if self.api.page_size == 0 {
            return Err(ConfigError::InvalidValue(
                "api.page_size must be positive".to_string(),
            ));
        }
        if self.sync.budget_secs >= self.sync.ceiling_secs {
            return Err(ConfigError::InvalidValue(format!(
                "sync.budget_secs ({}) must be strictly less than sync.ceiling_secs ({})",
                self.sync.budget_secs, self.sync.ceiling_secs
            )));
        }
        if self.sync.batch_size == 0 {
            return Err(ConfigError::InvalidValue(
                "sync.batch_size must be positive".to_string(),
            ));
        }
        if self.rows.columns.is_empty() {
            return Err(ConfigError::MissingRequired("rows.columns".to_string()));
        }

        let schedule = &self.schedule;
        for (key, secs) in [
            ("continue_secs", schedule.continue_secs),
            ("refresh_secs", schedule.refresh_secs),
            ("discover_secs", schedule.discover_secs),
            ("snapshot_secs", schedule.snapshot_secs),
            ("reconcile_secs", schedule.reconcile_secs),
        ] {
            if secs == 0 {
                return Err(ConfigError::InvalidValue(format!(
                    "schedule.{} must be positive",
                    key
                )));
            }
        }

        let mut seen = HashSet::new();
        for scope in &self.scopes {
            if scope.id.trim().is_empty() {
                return Err(ConfigError::InvalidValue("scope id is empty".to_string()));
            }
            if scope.batch_size == Some(0) {
                return Err(ConfigError::InvalidValue(format!(
                    "scope {}: batch_size must be positive",
                    scope.id
                )));
            }
            if !seen.insert(scope.id.as_str()) {
                return Err(ConfigError::InvalidValue(format!(
                    "duplicate scope id: {}",
                    scope.id
                )));
            }
        }

        Ok(())
    }
}

/// Remote API configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiConfig {
    /// Base endpoint, e.g. `https://api.example.com/v1`
    #[serde(default)]
    pub base_url: String,

    /// Bearer token
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Records per page
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Sleep between successive page fetches (milliseconds)
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,

    /// Per-request timeout (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            auth_token: None,
            page_size: default_page_size(),
            throttle_ms: default_throttle_ms(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl ApiConfig {
    /// Sleep between successive page requests
    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }
}

fn default_page_size() -> u32 {
    100
}

fn default_throttle_ms() -> u64 {
    1000
}

fn default_request_timeout() -> u64 {
    30
}

/// Retry configuration for external API calls
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retries after the initial attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial backoff duration in milliseconds
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff duration in milliseconds
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Backoff multiplier
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Whether to add jitter to backoff
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: false,
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff() -> u64 {
    2000
}

fn default_max_backoff() -> u64 {
    60_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

/// Batch loop and lock configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncConfig {
    /// Wall-clock budget per invocation (seconds)
    #[serde(default = "default_budget")]
    pub budget_secs: u64,

    /// Host hard execution ceiling (seconds); also the lock TTL
    #[serde(default = "default_ceiling")]
    pub ceiling_secs: u64,

    /// Default maximum rows written per scope per invocation
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,

    /// Lock wait for interactive invocations (milliseconds)
    #[serde(default = "default_interactive_wait")]
    pub interactive_lock_wait_ms: u64,

    /// Lock wait for scheduled invocations (milliseconds)
    #[serde(default = "default_scheduled_wait")]
    pub scheduled_lock_wait_ms: u64,
}

impl SyncConfig {
    /// Wall-clock budget as a Duration
    pub fn budget(&self) -> Duration {
        Duration::from_secs(self.budget_secs)
    }

    /// Host ceiling as a Duration
    pub fn ceiling(&self) -> Duration {
        Duration::from_secs(self.ceiling_secs)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            budget_secs: default_budget(),
            ceiling_secs: default_ceiling(),
            batch_size: default_batch_size(),
            interactive_lock_wait_ms: default_interactive_wait(),
            scheduled_lock_wait_ms: default_scheduled_wait(),
        }
    }
}

fn default_budget() -> u64 {
    330 // 5.5 minutes
}

fn default_ceiling() -> u64 {
    360 // 6 minutes
}

fn default_batch_size() -> u64 {
    2000
}

fn default_interactive_wait() -> u64 {
    30_000
}

fn default_scheduled_wait() -> u64 {
    1000
}

/// Row layout configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RowsConfig {
    /// Record field holding the stable record id
    #[serde(default = "default_id_field")]
    pub id_field: String,

    /// Ordered column list; its length is the row width
    #[serde(default)]
    pub columns: Vec<ColumnConfig>,
}

impl Default for RowsConfig {
    fn default() -> Self {
        Self {
            id_field: default_id_field(),
            columns: Vec::new(),
        }
    }
}

fn default_id_field() -> String {
    "id".to_string()
}

/// A single output column
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnConfig {
    /// Column header
    pub name: String,

    /// Where the value comes from
    #[serde(default)]
    pub from: ColumnSource,

    /// Field name (dots address nested objects)
    pub field: String,
}

/// Scope descriptor as declared in the configuration file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScopeConfig {
    /// Unique scope id
    pub id: String,

    /// Historical or current
    #[serde(default)]
    pub kind: ScopeKind,

    /// All underlying units are final (historical scopes only)
    #[serde(default)]
    pub finalized: bool,

    /// Listing endpoint relative to `api.base_url`
    pub endpoint: String,

    /// Optional supplementary endpoint merged into each batch
    #[serde(default)]
    pub supplementary_endpoint: Option<String>,

    /// Per-scope override of `sync.batch_size`
    #[serde(default)]
    pub batch_size: Option<u64>,
}

/// Cadences (seconds) for the named operations in daemon mode
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleConfig {
    /// Continuation cadence
    #[serde(default = "default_continue_interval")]
    pub continue_secs: u64,

    /// Secondary-scope refresh cadence
    #[serde(default = "default_refresh_interval")]
    pub refresh_secs: u64,

    /// Fast-incremental discovery cadence
    #[serde(default = "default_discover_interval")]
    pub discover_secs: u64,

    /// Snapshot capture cadence
    #[serde(default = "default_snapshot_interval")]
    pub snapshot_secs: u64,

    /// Full reconciliation cadence
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_secs: u64,

    /// Initial delay before the first tick
    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: u64,

    /// Random jitter added to each tick
    #[serde(default = "default_jitter_secs")]
    pub jitter_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            continue_secs: default_continue_interval(),
            refresh_secs: default_refresh_interval(),
            discover_secs: default_discover_interval(),
            snapshot_secs: default_snapshot_interval(),
            reconcile_secs: default_reconcile_interval(),
            initial_delay_secs: default_initial_delay(),
            jitter_secs: default_jitter_secs(),
        }
    }
}

fn default_continue_interval() -> u64 {
    600
}

fn default_refresh_interval() -> u64 {
    7200
}

fn default_discover_interval() -> u64 {
    1800
}

fn default_snapshot_interval() -> u64 {
    86_400
}

fn default_reconcile_interval() -> u64 {
    604_800
}

fn default_initial_delay() -> u64 {
    5
}

fn default_jitter_secs() -> u64 {
    30
}

/// Staleness thresholds for derived views
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StalenessConfig {
    /// Current scopes older than this are reported stale
    #[serde(default = "default_current_stale")]
    pub current_secs: u64,

    /// Non-finalized historical scopes older than this are reported stale
    #[serde(default = "default_historical_stale")]
    pub historical_secs: u64,
}

impl Default for StalenessConfig {
    fn default() -> Self {
        Self {
            current_secs: default_current_stale(),
            historical_secs: default_historical_stale(),
        }
    }
}

fn default_current_stale() -> u64 {
    3 * 3600
}

fn default_historical_stale() -> u64 {
    8 * 86_400
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "pagesync.db".to_string()
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (`json` or `pretty`)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Configuration error types
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ConfigError {
    /// Error reading configuration file
    #[error("Failed to read configuration file: {0}")]
    FileRead(String),

    /// Error parsing configuration
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// Invalid configuration value
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// Missing required configuration
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

/// Expand environment variables in a string
///
/// Supports `${VAR_NAME}` syntax; unknown variables are left untouched.
fn expand_env_vars(input: &str) -> String {
    let re = regex_lite::Regex::new(r"\$\{([^}]+)\}")
        .expect("Invalid regex pattern for environment variable expansion");

    re.replace_all(input, |caps: &regex_lite::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}
