//! Store-level configuration. Mirrors the `#[serde(default)]` +
//! `effective_*()` accessor pattern used throughout this codebase's
//! configuration types, adapted to the knowledge-graph engine's open-time
//! options (storage mode, changelog, fuzzy resolution, batch sizes).

use serde::{Deserialize, Serialize};

/// Physical storage layout a store is opened with (§4.4). Stamped into
/// store metadata at creation; reopening under a different mode is
/// rejected (`KaybeeError::ModeMismatch`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// One physical table per type.
    Multi,
    /// One wide, sparse `_data` table for every node.
    Single,
}

impl Default for StorageMode {
    fn default() -> Self {
        StorageMode::Multi
    }
}

impl StorageMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageMode::Multi => "multi",
            StorageMode::Single => "single",
        }
    }
}

/// Top-level configuration for opening a `KnowledgeGraph` store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KaybeeConfig {
    /// Physical schema layout. Default: multi.
    pub mode: Option<StorageMode>,
    /// Whether to maintain the append-only changelog. Default: true.
    pub changelog: Option<bool>,
    /// Whether `resolve()` falls back to canonical-form matching when an
    /// exact name match fails. Default: true.
    pub fuzzy_resolve: Option<bool>,
    /// Batch size used by the replicator's changelog-drain loop.
    /// Default: 10_000.
    pub push_batch_limit: Option<u32>,
}

impl Default for KaybeeConfig {
    fn default() -> Self {
        Self {
            mode: None,
            changelog: None,
            fuzzy_resolve: None,
            push_batch_limit: None,
        }
    }
}

impl KaybeeConfig {
    pub fn effective_mode(&self) -> StorageMode {
        self.mode.unwrap_or_default()
    }

    pub fn effective_changelog(&self) -> bool {
        self.changelog.unwrap_or(true)
    }

    pub fn effective_fuzzy_resolve(&self) -> bool {
        self.fuzzy_resolve.unwrap_or(true)
    }

    pub fn effective_push_batch_limit(&self) -> u32 {
        self.push_batch_limit.unwrap_or(10_000)
    }
}
