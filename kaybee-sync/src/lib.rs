//! # kaybee-sync
//!
//! The replicator (§4.9): changelog-driven push against a generic remote
//! relational store, full-scan fallback when the changelog is disabled, and
//! a scope-filtered pull that writes straight through the local storage
//! backend rather than the node engine (so pulled rows never re-enter the
//! changelog and loop back out on the next push).
//!
//! The only thing this crate assumes about the remote store is the
//! `RemoteAdapter` contract below — a thin cursor-style seam, same shape as
//! the teacher's storage traits (`IDriftReader` et al. in `drift-core`):
//! one trait, `Send + Sync`, every fallible call returns `KaybeeResult`.

mod pull;
mod push;

pub use pull::pull;
pub use push::push;

use kaybee_core::KaybeeResult;

/// One row back from `RemoteAdapter::query`, alongside its column names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

/// The remote relational store the replicator pushes to and pulls from.
///
/// Dialect assumptions (§4.9): the SQL the replicator issues expects
/// `INSERT ... ON DUPLICATE KEY UPDATE` (or an adapter-side equivalent),
/// `ALTER TABLE ADD COLUMN`, and an `information_schema.tables`-style
/// existence probe. An adapter may translate the SQL this crate builds
/// into whatever dialect the remote actually speaks, as long as the
/// observable behavior matches.
pub trait RemoteAdapter: Send + Sync {
    /// Run a statement with no result set (DDL, INSERT/UPDATE/DELETE).
    fn execute(&mut self, sql: &str, params: &[serde_json::Value]) -> KaybeeResult<()>;

    /// Run a statement that returns rows.
    fn query(&mut self, sql: &str, params: &[serde_json::Value]) -> KaybeeResult<RemoteRows>;

    /// Whether a table with this name currently exists remotely.
    fn table_exists(&mut self, table: &str) -> KaybeeResult<bool>;

    /// Column names of an existing remote table.
    fn table_columns(&mut self, table: &str) -> KaybeeResult<Vec<String>>;

    /// Every table name the adapter currently knows about (used by `pull`
    /// to discover candidate type tables by scope-column presence).
    fn table_names(&mut self) -> KaybeeResult<Vec<String>>;

    /// Commit whatever transaction the adapter holds open. The replicator
    /// calls this exactly once, at the end of a push or pull.
    fn commit(&mut self) -> KaybeeResult<()>;
}

/// Extra columns injected into every remote row, and stripped from every
/// row pulled back (`{team_id: "eng"}`, `{tenant: "acme", user: "alice"}`, …).
pub type Scope = std::collections::BTreeMap<String, serde_json::Value>;
