//! Scope descriptors and the explicit scope registry

use serde::{Deserialize, Serialize};

use crate::config::ScopeConfig;

/// Scope classification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    /// Past partition; immutable once complete and finalized
    Historical,
    /// Live partition; always eligible
    #[default]
    Current,
}

impl std::fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScopeKind::Historical => write!(f, "historical"),
            ScopeKind::Current => write!(f, "current"),
        }
    }
}

/// Per-scope state machine position derived from a checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScopeState {
    /// No batch written yet
    NotStarted,
    /// At least one batch written, not complete
    InProgress,
    /// Loop reported completion
    Complete,
}

impl std::fmt::Display for ScopeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScopeState::NotStarted => write!(f, "NOT_STARTED"),
            ScopeState::InProgress => write!(f, "IN_PROGRESS"),
            ScopeState::Complete => write!(f, "COMPLETE"),
        }
    }
}

/// A bounded, independently-trackable partition of the source dataset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncScope {
    /// Unique id; also the checkpoint namespace
    pub id: String,

    /// Historical or current
    pub kind: ScopeKind,

    /// All underlying units are final
    pub finalized: bool,

    /// Listing endpoint relative to the API base
    pub endpoint: String,

    /// Optional endpoint returning per-record supplementary data
    pub supplementary_endpoint: Option<String>,

    /// Maximum rows written per invocation
    pub batch_size: u64,
}

impl SyncScope {
    /// Create a current scope with the default batch size
    pub fn new(id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ScopeKind::Current,
            finalized: false,
            endpoint: endpoint.into(),
            supplementary_endpoint: None,
            batch_size: 2000,
        }
    }

    /// Mark as historical
    pub fn historical(mut self, finalized: bool) -> Self {
        self.kind = ScopeKind::Historical;
        self.finalized = finalized;
        self
    }

    /// Set the supplementary endpoint
    pub fn with_supplementary(mut self, endpoint: impl Into<String>) -> Self {
        self.supplementary_endpoint = Some(endpoint.into());
        self
    }

    /// Set the per-invocation row cap
    pub fn with_batch_size(mut self, batch_size: u64) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Name of the advisory lock guarding this scope's checkpoint
    pub fn lock_name(&self) -> String {
        format!("scope:{}", self.id)
    }

    /// Historical, finalized and complete: nothing left to learn from upstream
    pub fn is_frozen(&self, state: ScopeState) -> bool {
        self.kind == ScopeKind::Historical && self.finalized && state == ScopeState::Complete
    }

    /// Build from a config entry, falling back to the global batch size
    pub fn from_config(config: &ScopeConfig, default_batch_size: u64) -> Self {
        Self {
            id: config.id.clone(),
            kind: config.kind,
            finalized: config.finalized,
            endpoint: config.endpoint.clone(),
            supplementary_endpoint: config.supplementary_endpoint.clone(),
            batch_size: config.batch_size.unwrap_or(default_batch_size),
        }
    }
}

/// Explicit registry of scope descriptors, populated once at startup
#[derive(Debug, Clone, Default)]
pub struct ScopeRegistry {
    scopes: Vec<SyncScope>,
}

impl ScopeRegistry {
    /// Create a registry from descriptors; order is preserved
    pub fn new(scopes: Vec<SyncScope>) -> Self {
        Self { scopes }
    }

    /// Populate from the declarative configuration
    pub fn from_config(scopes: &[ScopeConfig], default_batch_size: u64) -> Self {
        Self::new(
            scopes
                .iter()
                .map(|s| SyncScope::from_config(s, default_batch_size))
                .collect(),
        )
    }

    /// Look up a scope by id
    pub fn get(&self, id: &str) -> Option<&SyncScope> {
        self.scopes.iter().find(|s| s.id == id)
    }

    /// All scopes in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &SyncScope> {
        self.scopes.iter()
    }

    /// Number of registered scopes
    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }
}
