//! # kaybee-core
//!
//! Foundation crate for the kaybee knowledge-graph engine.
//! Defines the domain model, the error taxonomy, configuration, and the
//! pure text-processing functions (name normalization, frontmatter parsing,
//! wikilink extraction) that have no storage dependency. Every other crate
//! in the workspace depends on this one.

pub mod config;
pub mod errors;
pub mod frontmatter;
pub mod ident;
pub mod model;
pub mod reader;
pub mod slug;
pub mod wikilinks;

pub use config::KaybeeConfig;
pub use errors::{KaybeeError, KaybeeResult};
pub use model::{AttrMap, AttrValue, Node, Violation, IMPLICIT_TYPE, RESERVED_TYPE_NAMES};
pub use reader::GraphReader;
pub use slug::slugify;
