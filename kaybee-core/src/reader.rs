//! `GraphReader` — the read-only seam relational validator rules query
//! through. Kept in `kaybee-core` so `kaybee-validate` never needs to
//! depend on `kaybee-storage`; `kaybee-storage`'s store implements it.

use crate::model::AttrMap;

/// Read-only view of a knowledge-graph store, sufficient to express every
/// built-in relational constraint (§4.7) without a storage dependency.
pub trait GraphReader {
    /// All node names, optionally restricted to one type (`None` = every node).
    fn ls(&self, type_name: Option<&str>) -> Vec<String>;

    /// Whether a node with this exact (already-normalized) name exists.
    fn exists(&self, name: &str) -> bool;

    /// The node's effective type (`"kaybee"` for untyped nodes). Separate
    /// from `frontmatter()` because the `type` key is never stored in the
    /// attribute map itself (§3.1).
    fn node_type(&self, name: &str) -> String;

    /// The attribute map for a node (empty if missing). Carries `type` for
    /// typed nodes, per the storage backend's read contract.
    fn frontmatter(&self, name: &str) -> AttrMap;

    /// Raw outgoing wikilink targets (`target_raw`) for a node.
    fn wikilinks(&self, name: &str) -> Vec<String>;

    /// Resolve a raw wikilink target to an existing node name, if any.
    fn resolve_wikilink(&self, target: &str) -> Option<String>;

    /// Names of nodes with a resolved outgoing link to `name`, plus any
    /// symlink nodes (`ln`) whose `link_target` equals `name`.
    fn backlinks(&self, name: &str) -> Vec<String>;
}
