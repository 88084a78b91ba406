//! # kaybee-validate
//!
//! The constraint registry and gatekeeper described in §4.7: an ordered
//! list of rules, each a `(type-filter, check function, structural-flag)`
//! triple. Structural rules are decidable from `(name, type, attrs)` alone
//! and run pre-write on the node engine's hot path; relational rules need
//! cross-node reads through `GraphReader` and only run on an explicit
//! `validate`/`check` pass.
//!
//! Depends only on `kaybee-core` — no storage dependency — so a validator
//! can be constructed and have its structural rules exercised without ever
//! opening a store.

use kaybee_core::model::AttrMap;
use kaybee_core::reader::GraphReader;
use kaybee_core::{KaybeeError, KaybeeResult, Violation};

/// A single node as presented to a constraint check: its name, effective
/// type, and attribute map (the `type` key itself is never present in
/// `attrs` — see `kaybee_core::model::Node`).
pub struct NodeView<'a> {
    pub name: &'a str,
    pub node_type: &'a str,
    pub attrs: &'a AttrMap,
}

/// A constraint check function. `reader` is `None` in structural (pre-write)
/// mode, `Some` in relational (post-write) mode.
pub type CheckFn = dyn Fn(Option<&dyn GraphReader>, &NodeView) -> Vec<Violation> + Send + Sync;

/// One registered rule: an optional type filter (`None` matches every
/// node), the check function, and whether it is safe to run pre-write.
pub struct Rule {
    type_filter: Option<String>,
    check: Box<CheckFn>,
    structural: bool,
}

impl Rule {
    fn matches_type(&self, node_type: &str) -> bool {
        match &self.type_filter {
            None => true,
            Some(t) => t == node_type,
        }
    }
}

/// Collects constraints and validates a store against them. The gatekeeper
/// for the node engine's write path; also directly queryable for an
/// explicit relational validation pass.
#[derive(Default)]
pub struct Validator {
    rules: Vec<Rule>,
}

impl Validator {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// Register a rule. Returns `self` so built-in factories chain the way
    /// the Python `Validator().add(...).add(...)` builder reads.
    pub fn add(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Run every rule (structural and relational) against the current store
    /// state. Used by an explicit validation pass, not the write path.
    pub fn validate(&self, reader: &dyn GraphReader) -> Vec<Violation> {
        let mut violations = Vec::new();
        let all_nodes = reader.ls(None);

        for rule in &self.rules {
            let names: Vec<String> = match &rule.type_filter {
                None => all_nodes.clone(),
                Some(t) => reader.ls(Some(t)),
            };
            for name in names {
                let node_type = reader.node_type(&name);
                let attrs = reader.frontmatter(&name);
                let view = NodeView {
                    name: &name,
                    node_type: &node_type,
                    attrs: &attrs,
                };
                violations.extend((rule.check)(Some(reader), &view));
            }
        }
        violations
    }

    /// `validate()` and raise `KaybeeError::Validation` if anything failed.
    pub fn check(&self, reader: &dyn GraphReader) -> KaybeeResult<()> {
        let violations = self.validate(reader);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(KaybeeError::validation(violations))
        }
    }

    /// Run only the structural rules matching `node_type` against a proposed
    /// write. This is the gatekeeper hook the node engine calls before any
    /// storage state changes — it takes no reader because structural rules
    /// are decidable from `(name, type, attrs)` alone.
    pub fn validate_structural(&self, name: &str, node_type: &str, attrs: &AttrMap) -> Vec<Violation> {
        let view = NodeView { name, node_type, attrs };
        self.rules
            .iter()
            .filter(|r| r.structural && r.matches_type(node_type))
            .flat_map(|r| (r.check)(None, &view))
            .collect()
    }
}

// ---------------------------------------------------------------------
// Built-in rule factories
// ---------------------------------------------------------------------

/// Every node (optionally of `type_name`) must carry a truthy `field` in
/// its attribute map. Structural.
pub fn requires_field(type_name: Option<&str>, field: &str) -> Rule {
    let field = field.to_string();
    Rule {
        type_filter: type_name.map(String::from),
        structural: true,
        check: Box::new(move |_reader, view| {
            let ok = view.attrs.get(&field).map(|v| v.is_truthy()).unwrap_or(false);
            if ok {
                Vec::new()
            } else {
                vec![Violation {
                    node: view.name.to_string(),
                    rule: "requires_field".to_string(),
                    message: format!("missing field '{field}'"),
                }]
            }
        }),
    }
}

/// Every node (optionally of `type_name`) must have a non-empty `tags`
/// list. Structural. Per §9, duplicate/empty-string tags are not
/// deduplicated or rejected here — only list non-emptiness is checked.
pub fn requires_tag(type_name: Option<&str>) -> Rule {
    Rule {
        type_filter: type_name.map(String::from),
        structural: true,
        check: Box::new(|_reader, view| {
            let has_tags = view
                .attrs
                .get("tags")
                .and_then(|v| v.as_list())
                .map(|items| !items.is_empty())
                .unwrap_or(false);
            if has_tags {
                Vec::new()
            } else {
                vec![Violation {
                    node: view.name.to_string(),
                    rule: "requires_tag".to_string(),
                    message: "must have at least one tag".to_string(),
                }]
            }
        }),
    }
}

/// Every node (optionally of `type_name`) must carry at least one outgoing
/// wikilink, optionally one resolving to a node of `target_type`.
/// Relational — needs `resolve_wikilink`/`frontmatter` of other nodes.
pub fn requires_link(type_name: Option<&str>, target_type: Option<&str>) -> Rule {
    let target_type = target_type.map(String::from);
    Rule {
        type_filter: type_name.map(String::from),
        structural: false,
        check: Box::new(move |reader, view| {
            let reader = reader.expect("requires_link is relational and needs a GraphReader");
            let links = reader.wikilinks(view.name);
            if links.is_empty() {
                let mut msg = "must have at least one outgoing link".to_string();
                if let Some(t) = &target_type {
                    msg.push_str(&format!(" to type '{t}'"));
                }
                return vec![Violation {
                    node: view.name.to_string(),
                    rule: "requires_link".to_string(),
                    message: msg,
                }];
            }

            if let Some(t) = &target_type {
                for raw in &links {
                    if let Some(resolved) = reader.resolve_wikilink(raw) {
                        if reader.exists(&resolved) && reader.node_type(&resolved) == *t {
                            return Vec::new();
                        }
                    }
                }
                return vec![Violation {
                    node: view.name.to_string(),
                    rule: "requires_link".to_string(),
                    message: format!("must link to at least one node of type '{t}'"),
                }];
            }

            Vec::new()
        }),
    }
}

/// Every node (optionally of `type_name`) must have at least one link in
/// or out. Relational.
pub fn no_orphans(type_name: Option<&str>) -> Rule {
    Rule {
        type_filter: type_name.map(String::from),
        structural: false,
        check: Box::new(|reader, view| {
            let reader = reader.expect("no_orphans is relational and needs a GraphReader");
            if !reader.wikilinks(view.name).is_empty() || !reader.backlinks(view.name).is_empty() {
                Vec::new()
            } else {
                vec![Violation {
                    node: view.name.to_string(),
                    rule: "no_orphans".to_string(),
                    message: "node has no incoming or outgoing links".to_string(),
                }]
            }
        }),
    }
}

/// Nodes of `type_name` may not carry any attribute key outside
/// `allowed_fields` (the `type` key is always implicitly allowed and need
/// not be listed; `frontmatter()` re-attaches it for typed nodes on the
/// relational path, so it must be seeded into the allowed set here too).
/// Structural.
pub fn freeze_schema(type_name: &str, allowed_fields: &[&str]) -> Rule {
    let allowed: std::collections::HashSet<String> = allowed_fields
        .iter()
        .map(|s| s.to_string())
        .chain(std::iter::once("type".to_string()))
        .collect();
    Rule {
        type_filter: Some(type_name.to_string()),
        structural: true,
        check: Box::new(move |_reader, view| {
            let mut extra: Vec<&str> = view
                .attrs
                .keys()
                .filter(|k| !allowed.contains(*k))
                .collect();
            if extra.is_empty() {
                Vec::new()
            } else {
                extra.sort_unstable();
                vec![Violation {
                    node: view.name.to_string(),
                    rule: "freeze_schema".to_string(),
                    message: format!("disallowed field(s): {}", extra.join(", ")),
                }]
            }
        }),
    }
}

/// An arbitrary user-supplied predicate. `fn_` returns `Some(message)` on
/// failure, `None` on success. `structural` must be `true` only if `fn_`
/// never touches the reader.
pub fn custom(
    type_name: Option<&str>,
    rule_name: &str,
    structural: bool,
    fn_: impl Fn(Option<&dyn GraphReader>, &NodeView) -> Option<String> + Send + Sync + 'static,
) -> Rule {
    let rule_name = rule_name.to_string();
    Rule {
        type_filter: type_name.map(String::from),
        structural,
        check: Box::new(move |reader, view| match fn_(reader, view) {
            Some(message) => vec![Violation {
                node: view.name.to_string(),
                rule: rule_name.clone(),
                message,
            }],
            None => Vec::new(),
        }),
    }
}
