//! # kaybee
//!
//! Facade crate for the kaybee knowledge-graph engine: re-exports the
//! public surface of `kaybee-core` (domain model, errors, config),
//! `kaybee-validate` (the constraint gatekeeper), `kaybee-storage` (the
//! `KnowledgeGraph` itself), and `kaybee-sync` (replication), plus a
//! `tracing-subscriber` initialization helper (§10.3). Application code
//! should depend on this crate alone; the workspace split exists so
//! `kaybee-validate` never needs to depend on `kaybee-storage`.

pub use kaybee_core::{
    config::{KaybeeConfig, StorageMode},
    errors::{KaybeeError, KaybeeResult},
    frontmatter,
    model::{AttrMap, AttrValue, Node, Violation, IMPLICIT_TYPE, RESERVED_TYPE_NAMES},
    reader::GraphReader,
    slug::slugify,
    wikilinks,
};

pub use kaybee_validate::{
    custom, freeze_schema, no_orphans, requires_field, requires_link, requires_tag, NodeView, Rule, Validator,
};

pub use kaybee_storage::{ChangelogEntry, GrepResult, KnowledgeGraph, NodeInfo, TagsResult};

pub use kaybee_sync::{pull, push, RemoteAdapter, RemoteRows, Scope};

/// Install a `tracing` subscriber reading its filter from `RUST_LOG`
/// (defaulting to `info` when unset). Call once, near the start of `main`;
/// safe to call more than once — later calls are ignored rather than
/// panicking, since embedding applications may initialize logging
/// themselves before opening a graph.
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_write_and_read_round_trip_through_the_facade() {
        let mut kg = KnowledgeGraph::open_in_memory(&KaybeeConfig::default()).unwrap();
        kg.write("note", "---\ntype: concept\n---\nhello").unwrap();
        assert_eq!(kg.cat("note").unwrap(), "---\ntype: concept\n---\nhello");
    }

    #[test]
    fn init_logging_does_not_panic_when_called_twice() {
        init_logging();
        init_logging();
    }
}
