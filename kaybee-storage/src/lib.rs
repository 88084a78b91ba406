//! # kaybee-storage
//!
//! The physical half of the knowledge-graph engine: the two-mode SQLite
//! schema (§4.4), the node engine's single write path (§4.5), the link
//! index and resolver (§4.6), the changelog (§4.8), and the read-side
//! query facade (`ls`/`find`/`grep`/`tree`/`info`/`tags`/`schema`/`graph`)
//! plus the progressive reader (§4.10).
//!
//! `KnowledgeGraph` in `engine` is the sole public entry point; every other
//! module here is an implementation detail it composes.

pub mod backend;
pub mod changelog;
pub mod connection;
pub mod engine;
pub mod linkindex;

pub use changelog::ChangelogEntry;
pub use engine::{GrepResult, KnowledgeGraph, NodeInfo, TagsResult};
