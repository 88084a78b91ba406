//! Domain model shared by every crate in the workspace: the attribute value
//! variants, the ordered attribute map, the externally visible `Node`, and
//! validator violations.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// The implicit type assigned to a node whose frontmatter carries no `type` key.
/// Reported to callers as "untyped" (`None`) but stored internally under this name.
pub const IMPLICIT_TYPE: &str = "kaybee";

/// Physical table / object names the storage layer owns; user types may never collide
/// with these (enforced at the type-registration boundary).
pub const RESERVED_TYPE_NAMES: &[&str] =
    &["nodes", "_types", "_links", "_changelog", "_data", "_type_fields"];

/// A single frontmatter attribute value. Frontmatter is a YAML subset, so every
/// value is one of a scalar string, a flat list of strings, or a one-level map
/// of string to string — nothing deeper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Scalar(String),
    List(Vec<String>),
    Map(Vec<(String, String)>),
}

impl AttrValue {
    /// The "truthy" test used by `requires_field`: a scalar is truthy unless empty,
    /// a list is truthy unless empty, a map is truthy unless empty.
    pub fn is_truthy(&self) -> bool {
        match self {
            AttrValue::Scalar(s) => !s.is_empty(),
            AttrValue::List(items) => !items.is_empty(),
            AttrValue::Map(entries) => !entries.is_empty(),
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            AttrValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            AttrValue::Scalar(s) => Some(s),
            _ => None,
        }
    }
}

/// Insertion-ordered key→value map, mirroring the dict-preserves-order semantics
/// the node format round-trips on. A side index keeps key lookup O(1) without
/// giving up iteration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttrMap {
    entries: Vec<(String, AttrValue)>,
    index: FxHashMap<String, usize>,
}

impl AttrMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.index.get(key).map(|&i| &self.entries[i].1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Insert or overwrite a key, preserving its original position on overwrite.
    pub fn insert(&mut self, key: impl Into<String>, value: AttrValue) {
        let key = key.into();
        if let Some(&i) = self.index.get(&key) {
            self.entries[i].1 = value;
        } else {
            self.index.insert(key.clone(), self.entries.len());
            self.entries.push((key, value));
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<AttrValue> {
        let i = self.index.remove(key)?;
        let (_, value) = self.entries.remove(i);
        for idx in self.index.values_mut() {
            if *idx > i {
                *idx -= 1;
            }
        }
        Some(value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }
}

impl FromIterator<(String, AttrValue)> for AttrMap {
    fn from_iter<T: IntoIterator<Item = (String, AttrValue)>>(iter: T) -> Self {
        let mut map = AttrMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

/// A fully materialized node: identity, type, body, and attributes. The `type`
/// key is never present in `attrs` — it is pulled out into `node_type` on read
/// and re-attached on reconstruction (see `kaybee_storage::reconstruct`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub name: String,
    /// `None` means the implicit type (`kaybee`) — surfaced to callers as "untyped".
    pub node_type: Option<String>,
    pub body: String,
    pub attrs: AttrMap,
}

impl Node {
    /// The effective storage type: the explicit type, or the implicit one.
    pub fn effective_type(&self) -> &str {
        self.node_type.as_deref().unwrap_or(IMPLICIT_TYPE)
    }
}

/// One constraint violation, as surfaced by the validator (either aggregated into
/// `KaybeeError::Validation` on the write path, or returned from `validate()`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub node: String,
    pub rule: String,
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: [{}] {}", self.node, self.rule, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attr_map_preserves_insertion_order_across_overwrite() {
        let mut m = AttrMap::new();
        m.insert("b", AttrValue::Scalar("2".into()));
        m.insert("a", AttrValue::Scalar("1".into()));
        m.insert("b", AttrValue::Scalar("20".into()));
        let keys: Vec<_> = m.keys().collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert_eq!(m.get("b"), Some(&AttrValue::Scalar("20".into())));
    }

    #[test]
    fn attr_map_remove_shifts_index() {
        let mut m = AttrMap::new();
        m.insert("a", AttrValue::Scalar("1".into()));
        m.insert("b", AttrValue::Scalar("2".into()));
        m.insert("c", AttrValue::Scalar("3".into()));
        m.remove("a");
        assert_eq!(m.get("b"), Some(&AttrValue::Scalar("2".into())));
        assert_eq!(m.get("c"), Some(&AttrValue::Scalar("3".into())));
        assert_eq!(m.keys().collect::<Vec<_>>(), vec!["b", "c"]);
    }

    #[test]
    fn truthy_rules() {
        assert!(!AttrValue::Scalar(String::new()).is_truthy());
        assert!(AttrValue::Scalar("x".into()).is_truthy());
        assert!(!AttrValue::List(vec![]).is_truthy());
        assert!(AttrValue::List(vec!["x".into()]).is_truthy());
    }
}
