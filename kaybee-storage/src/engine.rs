//! The node engine (§4.5): the sole write path, the CRUD surface, and the
//! read-side query facade (§4.11). `KnowledgeGraph` owns the connection and
//! every write runs inside one `rusqlite::Transaction` — backend upsert,
//! link-index sync, and changelog append commit together or not at all.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use kaybee_core::config::{KaybeeConfig, StorageMode};
use kaybee_core::frontmatter;
use kaybee_core::ident::safe_ident;
use kaybee_core::model::{AttrMap, AttrValue, IMPLICIT_TYPE};
use kaybee_core::reader::GraphReader;
use kaybee_core::{slugify, KaybeeError, KaybeeResult};
use kaybee_validate::Validator;
use regex::RegexBuilder;
use rusqlite::{Connection, OptionalExtension};

use crate::changelog::{self, ChangelogEntry, Op};
use crate::{backend, linkindex};

fn now() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn attrs_to_json(attrs: &AttrMap) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for (key, value) in attrs.iter() {
        let encoded = match value {
            AttrValue::Scalar(s) => serde_json::Value::String(s.clone()),
            AttrValue::List(items) => {
                serde_json::Value::Array(items.iter().cloned().map(serde_json::Value::String).collect())
            }
            AttrValue::Map(entries) => {
                let mut sub = serde_json::Map::new();
                for (sk, sv) in entries {
                    sub.insert(sk.clone(), serde_json::Value::String(sv.clone()));
                }
                serde_json::Value::Object(sub)
            }
        };
        map.insert(key.to_string(), encoded);
    }
    serde_json::Value::Object(map)
}

/// Re-attach the `type` attribute for reconstruction/reading: the `type`
/// key is never stored inside `AttrMap` (see `kaybee_core::model::Node`),
/// so it is synthesized back onto the front of the map whenever a node's
/// full external text form is needed.
fn with_type_attr(node_type: &str, attrs: &AttrMap) -> AttrMap {
    let mut out = AttrMap::new();
    if node_type != IMPLICIT_TYPE {
        out.insert("type", AttrValue::Scalar(node_type.to_string()));
    }
    for (key, value) in attrs.iter() {
        out.insert(key.to_string(), value.clone());
    }
    out
}

fn glob_to_regex(pattern: &str) -> KaybeeResult<regex::Regex> {
    let mut out = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            c => out.push_str(&regex::escape(&c.to_string())),
        }
    }
    out.push('$');
    regex::Regex::new(&out).map_err(|e| KaybeeError::IllegalArgument(format!("invalid pattern '{pattern}': {e}")))
}

fn sqlite_value_to_json(v: rusqlite::types::Value) -> serde_json::Value {
    match v {
        rusqlite::types::Value::Null => serde_json::Value::Null,
        rusqlite::types::Value::Integer(i) => serde_json::json!(i),
        rusqlite::types::Value::Real(f) => serde_json::json!(f),
        rusqlite::types::Value::Text(s) => serde_json::Value::String(s),
        rusqlite::types::Value::Blob(b) => serde_json::json!(b),
    }
}

/// One node's query-facade summary (`info`).
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInfo {
    pub name: String,
    pub node_type: Option<String>,
    pub tags: Vec<String>,
    pub content_length: usize,
    pub has_content: bool,
    pub link_count: usize,
    pub backlink_count: usize,
    pub attr_count: usize,
}

/// `grep`'s result shape depends on its flags (§4.11); this mirrors that
/// rather than overloading one return type three ways.
#[derive(Debug, Clone, PartialEq)]
pub enum GrepResult {
    Names(Vec<String>),
    Lines(Vec<String>),
    Count(usize),
}

/// `tags(name?)`'s two shapes: one node's tag list, or the whole store's
/// tag → [names] index.
#[derive(Debug, Clone, PartialEq)]
pub enum TagsResult {
    ForNode(Vec<String>),
    All(HashMap<String, Vec<String>>),
}

/// The knowledge-graph store. Owns the one `rusqlite::Connection` this
/// process holds open on it (§5 — no pooling, no multi-writer concurrency).
pub struct KnowledgeGraph {
    conn: Connection,
    mode: StorageMode,
    changelog_enabled: bool,
    fuzzy_resolve: bool,
    validator: Option<Validator>,
}

impl KnowledgeGraph {
    pub fn open(path: &Path, config: &KaybeeConfig) -> KaybeeResult<Self> {
        let mode = config.effective_mode();
        let changelog_enabled = config.effective_changelog();
        let conn = crate::connection::open(path, mode, changelog_enabled)?;
        Ok(Self {
            conn,
            mode,
            changelog_enabled,
            fuzzy_resolve: config.effective_fuzzy_resolve(),
            validator: None,
        })
    }

    pub fn open_in_memory(config: &KaybeeConfig) -> KaybeeResult<Self> {
        let mode = config.effective_mode();
        let changelog_enabled = config.effective_changelog();
        let conn = crate::connection::open_in_memory(mode, changelog_enabled)?;
        Ok(Self {
            conn,
            mode,
            changelog_enabled,
            fuzzy_resolve: config.effective_fuzzy_resolve(),
            validator: None,
        })
    }

    pub fn mode(&self) -> StorageMode {
        self.mode
    }

    pub fn changelog_enabled(&self) -> bool {
        self.changelog_enabled
    }

    // ------------------------------------------------------------
    // Validator integration
    // ------------------------------------------------------------

    pub fn set_validator(&mut self, validator: Validator) -> &mut Self {
        self.validator = Some(validator);
        self
    }

    pub fn clear_validator(&mut self) -> &mut Self {
        self.validator = None;
        self
    }

    pub fn validate(&self) -> Vec<kaybee_core::Violation> {
        match &self.validator {
            Some(v) => v.validate(self),
            None => Vec::new(),
        }
    }

    pub fn check(&self) -> KaybeeResult<()> {
        match &self.validator {
            Some(v) => v.check(self),
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------
    // Internal read helpers shared with the GraphReader impl
    // ------------------------------------------------------------

    fn node_type_of(&self, name: &str) -> String {
        self.conn
            .query_row("SELECT type FROM nodes WHERE name = ?1", [name], |row| row.get::<_, String>(0))
            .unwrap_or_else(|_| IMPLICIT_TYPE.to_string())
    }

    fn frontmatter_of(&self, name: &str) -> AttrMap {
        let node_type = self.node_type_of(name);
        let attrs = backend::read_row(&self.conn, self.mode, &node_type, name)
            .ok()
            .flatten()
            .map(|(_, attrs)| attrs)
            .unwrap_or_default();
        with_type_attr(&node_type, &attrs)
    }

    // ------------------------------------------------------------
    // The single write path (§4.5)
    // ------------------------------------------------------------

    fn write_node(&mut self, name: &str, content: &str) -> KaybeeResult<()> {
        let (parsed_attrs, body) = frontmatter::parse_frontmatter(content);
        let effective_type = match parsed_attrs.get("type") {
            Some(AttrValue::Scalar(s)) if !s.is_empty() => s.clone(),
            _ => IMPLICIT_TYPE.to_string(),
        };
        let mut attrs = parsed_attrs;
        attrs.remove("type");

        if let Some(validator) = &self.validator {
            let violations = validator.validate_structural(name, &effective_type, &attrs);
            if !violations.is_empty() {
                return Err(KaybeeError::validation(violations));
            }
        }

        let tx = self.conn.transaction()?;

        let old_type: Option<String> = tx
            .query_row("SELECT type FROM nodes WHERE name = ?1", [name], |row| row.get(0))
            .optional()?;
        let type_changed = matches!(&old_type, Some(t) if *t != effective_type);
        if type_changed {
            backend::delete_row(&tx, self.mode, old_type.as_deref().unwrap(), name)?;
        }

        tx.execute(
            "INSERT OR REPLACE INTO nodes (name, type) VALUES (?1, ?2)",
            rusqlite::params![name, effective_type],
        )?;
        backend::upsert_row(&tx, self.mode, &effective_type, name, &body, &attrs)?;

        if effective_type != IMPLICIT_TYPE {
            tx.execute("INSERT OR IGNORE INTO _types (type_name) VALUES (?1)", [&effective_type])?;
        }

        linkindex::sync_links(&tx, self.fuzzy_resolve, name, &body)?;
        linkindex::re_resolve_links_to(&tx, self.fuzzy_resolve, name)?;

        let ts = now();
        if type_changed {
            let old = old_type.clone().unwrap();
            changelog::append(
                &tx,
                self.changelog_enabled,
                ts,
                name,
                Op::NodeTypeChange { old_type: &old, new_type: &effective_type },
            )?;
        }
        let attrs_json = attrs_to_json(&attrs);
        changelog::append(
            &tx,
            self.changelog_enabled,
            ts,
            name,
            Op::NodeWrite { node_type: &effective_type, body: &body, attrs: &attrs_json },
        )?;

        tx.commit()?;
        tracing::debug!(node = name, node_type = %effective_type, "node.write");
        Ok(())
    }

    // ------------------------------------------------------------
    // CRUD
    // ------------------------------------------------------------

    pub fn write(&mut self, name: &str, content: &str) -> KaybeeResult<()> {
        let name = slugify(name);
        self.write_node(&name, content)
    }

    pub fn touch(&mut self, name: &str, content: &str) -> KaybeeResult<()> {
        let name = slugify(name);
        if GraphReader::exists(self, &name) {
            if !content.is_empty() {
                return self.write_node(&name, content);
            }
            return Ok(());
        }
        if !content.is_empty() {
            return self.write_node(&name, content);
        }

        let tx = self.conn.transaction()?;
        tx.execute("INSERT OR IGNORE INTO nodes (name, type) VALUES (?1, 'kaybee')", [&name])?;
        backend::upsert_row(&tx, self.mode, IMPLICIT_TYPE, &name, "", &AttrMap::new())?;
        let ts = now();
        changelog::append(
            &tx,
            self.changelog_enabled,
            ts,
            &name,
            Op::NodeWrite { node_type: IMPLICIT_TYPE, body: "", attrs: &serde_json::json!({}) },
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn cat(&self, name: &str) -> KaybeeResult<String> {
        if !GraphReader::exists(self, name) {
            return Err(KaybeeError::NotFound(name.to_string()));
        }
        let node_type = self.node_type_of(name);
        let (body, attrs) = backend::read_row(&self.conn, self.mode, &node_type, name)?.unwrap_or_default();
        Ok(frontmatter::reconstruct(&with_type_attr(&node_type, &attrs), &body))
    }

    /// Progressive read (§4.10): `depth=0` is exactly `cat`; `depth=N`
    /// recursively appends resolved outgoing targets up to `N` hops.
    pub fn read(&self, name: &str, depth: u32) -> KaybeeResult<String> {
        if depth == 0 {
            return self.cat(name);
        }
        let mut visited = HashSet::new();
        let mut sections = Vec::new();
        self.read_recursive(name, depth, &mut visited, &mut sections, true)?;
        Ok(sections.join("\n"))
    }

    fn read_recursive(
        &self,
        name: &str,
        depth: u32,
        visited: &mut HashSet<String>,
        sections: &mut Vec<String>,
        is_root: bool,
    ) -> KaybeeResult<()> {
        if visited.contains(name) {
            return Ok(());
        }
        visited.insert(name.to_string());

        let content = self.cat(name)?;
        if is_root {
            sections.push(content);
        } else {
            sections.push(format!("--- [[{name}]] ---"));
            sections.push(content);
        }

        if depth == 0 {
            return Ok(());
        }

        let mut targets: Vec<String> = linkindex::links(&self.conn, name)?
            .into_iter()
            .filter_map(|(_, resolved)| resolved)
            .collect();
        targets.sort();
        targets.dedup();

        for target in targets {
            if !visited.contains(&target) && GraphReader::exists(self, &target) {
                self.read_recursive(&target, depth - 1, visited, sections, false)?;
            }
        }
        Ok(())
    }

    pub fn rm(&mut self, name: &str) -> KaybeeResult<()> {
        if !GraphReader::exists(self, name) {
            return Err(KaybeeError::NotFound(name.to_string()));
        }
        let tx = self.conn.transaction()?;
        let node_type: String = tx.query_row("SELECT type FROM nodes WHERE name = ?1", [name], |row| row.get(0))?;
        backend::delete_row(&tx, self.mode, &node_type, name)?;
        tx.execute("DELETE FROM _links WHERE source = ?1", [name])?;
        tx.execute("UPDATE _links SET target_resolved = NULL WHERE target_resolved = ?1", [name])?;
        tx.execute("DELETE FROM nodes WHERE name = ?1", [name])?;
        let ts = now();
        changelog::append(&tx, self.changelog_enabled, ts, name, Op::NodeRm { node_type: &node_type })?;
        tx.commit()?;
        Ok(())
    }

    pub fn mv(&mut self, old_name: &str, new_name: &str) -> KaybeeResult<()> {
        if !GraphReader::exists(self, old_name) {
            return Err(KaybeeError::NotFound(old_name.to_string()));
        }
        let new_name = slugify(new_name);
        if old_name == new_name {
            return Ok(());
        }
        if GraphReader::exists(self, &new_name) {
            return Err(KaybeeError::AlreadyExists(new_name));
        }

        let tx = self.conn.transaction()?;
        let node_type: String =
            tx.query_row("SELECT type FROM nodes WHERE name = ?1", [old_name], |row| row.get(0))?;
        let (body, attrs) = backend::read_row(&tx, self.mode, &node_type, old_name)?.unwrap_or_default();

        backend::delete_row(&tx, self.mode, &node_type, old_name)?;
        tx.execute("DELETE FROM nodes WHERE name = ?1", [old_name])?;
        tx.execute(
            "INSERT INTO nodes (name, type) VALUES (?1, ?2)",
            rusqlite::params![new_name, node_type],
        )?;
        backend::upsert_row(&tx, self.mode, &node_type, &new_name, &body, &attrs)?;

        tx.execute(
            "UPDATE _links SET source = ?1 WHERE source = ?2",
            rusqlite::params![new_name, old_name],
        )?;
        tx.execute(
            "UPDATE _links SET target_resolved = ?1 WHERE target_resolved = ?2",
            rusqlite::params![new_name, old_name],
        )?;

        let ts = now();
        let attrs_json = attrs_to_json(&attrs);
        changelog::append(
            &tx,
            self.changelog_enabled,
            ts,
            &new_name,
            Op::NodeMv { old_name, node_type: &node_type, body: &body, attrs: &attrs_json },
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn cp(&mut self, src: &str, dst: &str) -> KaybeeResult<()> {
        if !GraphReader::exists(self, src) {
            return Err(KaybeeError::NotFound(src.to_string()));
        }
        let dst = slugify(dst);
        if src == dst {
            return Err(KaybeeError::IllegalArgument(format!("cannot copy to self: {src}")));
        }
        if GraphReader::exists(self, &dst) {
            return Err(KaybeeError::AlreadyExists(dst));
        }

        let tx = self.conn.transaction()?;
        let node_type: String = tx.query_row("SELECT type FROM nodes WHERE name = ?1", [src], |row| row.get(0))?;
        let (body, attrs) = backend::read_row(&tx, self.mode, &node_type, src)?.unwrap_or_default();

        tx.execute(
            "INSERT INTO nodes (name, type) VALUES (?1, ?2)",
            rusqlite::params![dst, node_type],
        )?;
        backend::upsert_row(&tx, self.mode, &node_type, &dst, &body, &attrs)?;
        linkindex::sync_links(&tx, self.fuzzy_resolve, &dst, &body)?;

        let ts = now();
        let attrs_json = attrs_to_json(&attrs);
        changelog::append(
            &tx,
            self.changelog_enabled,
            ts,
            &dst,
            Op::NodeCp { source: src, node_type: &node_type, body: &body, attrs: &attrs_json },
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Create an untyped symlink node at `dst` carrying `link_target = src`
    /// (§4.5). Reuses the write path so the link-index/changelog stay
    /// consistent for free.
    pub fn ln(&mut self, src: &str, dst: &str) -> KaybeeResult<()> {
        let mut attrs = AttrMap::new();
        attrs.insert("link_target", AttrValue::Scalar(src.to_string()));
        let content = frontmatter::reconstruct(&attrs, "");
        self.write(&dst, &content)
    }

    // ------------------------------------------------------------
    // Type registry
    // ------------------------------------------------------------

    pub fn types(&self) -> KaybeeResult<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT type_name FROM _types ORDER BY type_name")?;
        let rows = stmt.query_map([], |row| row.get(0))?.filter_map(Result::ok).collect();
        Ok(rows)
    }

    pub fn add_type(&mut self, type_name: &str) -> KaybeeResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute("INSERT OR IGNORE INTO _types (type_name) VALUES (?1)", [type_name])?;
        let ts = now();
        changelog::append(&tx, self.changelog_enabled, ts, type_name, Op::TypeAdd)?;
        tx.commit()?;
        Ok(())
    }

    pub fn remove_type(&mut self, type_name: &str) -> KaybeeResult<()> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM nodes WHERE type = ?1", [type_name], |row| row.get(0))?;
        if count > 0 {
            return Err(KaybeeError::TypeInUse(type_name.to_string()));
        }
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM _types WHERE type_name = ?1", [type_name])?;
        let ts = now();
        changelog::append(&tx, self.changelog_enabled, ts, type_name, Op::TypeRm)?;
        tx.commit()?;
        Ok(())
    }

    // ------------------------------------------------------------
    // Changelog
    // ------------------------------------------------------------

    pub fn changelog(&self, since_seq: i64, limit: u32) -> KaybeeResult<Vec<ChangelogEntry>> {
        changelog::read(&self.conn, self.changelog_enabled, since_seq, limit)
    }

    pub fn changelog_truncate(&mut self, before_seq: i64) -> KaybeeResult<usize> {
        changelog::truncate(&self.conn, self.changelog_enabled, before_seq)
    }

    pub fn commit(&self) -> KaybeeResult<()> {
        Ok(())
    }

    // ------------------------------------------------------------
    // Query facade (§4.11)
    // ------------------------------------------------------------

    /// Node names matching a shell-glob-style `pattern` (`*`, `?`); all
    /// names when `pattern` is absent. Distinct from `GraphReader::ls`,
    /// which filters by exact type and backs the validator's relational
    /// rules — that trait method stays reachable via `&dyn GraphReader`.
    pub fn ls(&self, pattern: Option<&str>) -> KaybeeResult<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT name FROM nodes ORDER BY name")?;
        let names: Vec<String> = stmt.query_map([], |row| row.get(0))?.filter_map(Result::ok).collect();
        match pattern {
            None => Ok(names),
            Some(p) => {
                let re = glob_to_regex(p)?;
                Ok(names.into_iter().filter(|n| re.is_match(n)).collect())
            }
        }
    }

    /// Indented outline of the progressive-read traversal from `root`.
    pub fn tree(&self, root: &str, depth: u32) -> KaybeeResult<String> {
        let mut visited = HashSet::new();
        let mut lines = Vec::new();
        self.tree_recursive(root, depth, 0, &mut visited, &mut lines)?;
        Ok(lines.join("\n"))
    }

    fn tree_recursive(
        &self,
        name: &str,
        depth: u32,
        hop: usize,
        visited: &mut HashSet<String>,
        lines: &mut Vec<String>,
    ) -> KaybeeResult<()> {
        if visited.contains(name) {
            return Ok(());
        }
        visited.insert(name.to_string());
        lines.push(format!("{}{name}", "  ".repeat(hop)));

        if depth == 0 {
            return Ok(());
        }
        let mut targets: Vec<String> = linkindex::links(&self.conn, name)?
            .into_iter()
            .filter_map(|(_, resolved)| resolved)
            .collect();
        targets.sort();
        targets.dedup();
        for target in targets {
            if !visited.contains(&target) && GraphReader::exists(self, &target) {
                self.tree_recursive(&target, depth - 1, hop + 1, visited, lines)?;
            }
        }
        Ok(())
    }

    /// Case-insensitive substring or regex match against node bodies.
    pub fn find(&self, query: &str) -> KaybeeResult<Vec<String>> {
        let rows = backend::content_rows(&self.conn, self.mode, None)?;
        let mut matches: Vec<String> = if let Ok(re) = RegexBuilder::new(query).case_insensitive(true).build() {
            rows.into_iter().filter(|(_, body)| re.is_match(body)).map(|(n, _)| n).collect()
        } else {
            let needle = query.to_lowercase();
            rows.into_iter()
                .filter(|(_, body)| body.to_lowercase().contains(&needle))
                .map(|(n, _)| n)
                .collect()
        };
        matches.sort();
        Ok(matches)
    }

    /// Line-oriented search over node bodies (§4.11).
    #[allow(clippy::too_many_arguments)]
    pub fn grep(
        &self,
        pattern: &str,
        type_filter: Option<&str>,
        ignore_case: bool,
        invert: bool,
        count: bool,
        lines: bool,
    ) -> KaybeeResult<GrepResult> {
        let re = RegexBuilder::new(pattern)
            .case_insensitive(ignore_case)
            .build()
            .map_err(|e| KaybeeError::IllegalArgument(format!("invalid pattern '{pattern}': {e}")))?;
        let rows = backend::content_rows(&self.conn, self.mode, type_filter)?;

        if lines {
            let mut out = Vec::new();
            for (name, body) in &rows {
                for (lineno, line) in body.lines().enumerate() {
                    let matched = re.is_match(line) != invert;
                    if matched {
                        out.push(format!("{name}:{}:{line}", lineno + 1));
                    }
                }
            }
            return Ok(GrepResult::Lines(out));
        }

        let names: Vec<String> = rows
            .into_iter()
            .filter(|(_, body)| re.is_match(body) != invert)
            .map(|(name, _)| name)
            .collect();

        if count {
            Ok(GrepResult::Count(names.len()))
        } else {
            Ok(GrepResult::Names(names))
        }
    }

    pub fn info(&self, name: &str) -> KaybeeResult<NodeInfo> {
        if !GraphReader::exists(self, name) {
            return Err(KaybeeError::NotFound(name.to_string()));
        }
        let node_type = self.node_type_of(name);
        let (body, attrs) = backend::read_row(&self.conn, self.mode, &node_type, name)?.unwrap_or_default();
        let tags = attrs
            .get("tags")
            .and_then(|v| v.as_list())
            .map(|items| items.to_vec())
            .unwrap_or_default();

        Ok(NodeInfo {
            name: name.to_string(),
            node_type: if node_type == IMPLICIT_TYPE { None } else { Some(node_type) },
            tags,
            content_length: body.len(),
            has_content: !body.is_empty(),
            link_count: linkindex::wikilinks(&self.conn, name)?.len(),
            backlink_count: linkindex::backlinks(&self.conn, self.mode, name)?.len(),
            attr_count: attrs.len(),
        })
    }

    pub fn tags(&self, name: Option<&str>) -> KaybeeResult<TagsResult> {
        if let Some(name) = name {
            let node_type = self.node_type_of(name);
            let (_, attrs) = backend::read_row(&self.conn, self.mode, &node_type, name)?.unwrap_or_default();
            let tags = attrs
                .get("tags")
                .and_then(|v| v.as_list())
                .map(|items| items.to_vec())
                .unwrap_or_default();
            return Ok(TagsResult::ForNode(tags));
        }
        Ok(TagsResult::All(self.tags_all()?))
    }

    fn tags_all(&self) -> KaybeeResult<HashMap<String, Vec<String>>> {
        let mut tag_map: HashMap<String, Vec<String>> = HashMap::new();

        let tables: Vec<String> = match self.mode {
            StorageMode::Single => vec!["_data".to_string()],
            StorageMode::Multi => {
                let mut stmt = self.conn.prepare("SELECT DISTINCT type FROM nodes")?;
                let types: Vec<String> = stmt.query_map([], |row| row.get(0))?.filter_map(Result::ok).collect();
                types.iter().map(|t| safe_ident(t)).collect()
            }
        };

        for table in tables {
            if !backend::table_exists(&self.conn, &table)? {
                continue;
            }
            let columns = backend::existing_columns(&self.conn, &table)?;
            if !columns.contains("tags") {
                continue;
            }
            let mut stmt = self
                .conn
                .prepare(&format!("SELECT name, tags FROM {table} WHERE tags IS NOT NULL"))?;
            let rows: Vec<(String, String)> = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .filter_map(Result::ok)
                .collect();
            for (name, raw_tags) in rows {
                if let Ok(serde_json::Value::Array(items)) = serde_json::from_str::<serde_json::Value>(&raw_tags) {
                    for item in items {
                        if let serde_json::Value::String(tag) = item {
                            tag_map.entry(tag).or_default().push(name.clone());
                        }
                    }
                }
            }
        }
        Ok(tag_map)
    }

    pub fn schema(&self, type_name: Option<&str>) -> KaybeeResult<HashMap<String, Vec<String>>> {
        let types: Vec<String> = match type_name {
            Some(t) => vec![t.to_string()],
            None => {
                let mut stmt = self
                    .conn
                    .prepare("SELECT DISTINCT type FROM nodes WHERE type != 'kaybee' ORDER BY type")?;
                stmt.query_map([], |row| row.get(0))?.filter_map(Result::ok).collect()
            }
        };
        let mut result = HashMap::new();
        for t in types {
            let fields = backend::type_fields(&self.conn, self.mode, &t)?;
            result.insert(t, fields);
        }
        Ok(result)
    }

    pub fn graph(&self) -> KaybeeResult<HashMap<String, Vec<String>>> {
        linkindex::graph(&self.conn)
    }

    /// Raw parametrized SQL against the underlying connection (§4.11),
    /// returning rows as loosely-typed JSON values. The officially
    /// supported escape hatch — the table names in §6.3 are contractual.
    pub fn query(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> KaybeeResult<Vec<Vec<serde_json::Value>>> {
        let mut stmt = self.conn.prepare(sql)?;
        let col_count = stmt.column_count();
        let rows = stmt.query_map(params, |row| {
            let mut out = Vec::with_capacity(col_count);
            for i in 0..col_count {
                let value: rusqlite::types::Value = row.get(i)?;
                out.push(sqlite_value_to_json(value));
            }
            Ok(out)
        })?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    // ------------------------------------------------------------
    // Replication support (§4.9) — bypasses the write path deliberately
    // ------------------------------------------------------------

    /// Insert-or-replace a node's physical row and node-index entry
    /// directly through the storage backend, skipping the link index and
    /// the changelog. `kaybee-sync`'s pull uses this so rows it writes
    /// locally never generate a changelog entry the push loop would turn
    /// around and re-send (push-back prevention).
    pub fn ingest_row(&mut self, node_type: &str, name: &str, body: &str, attrs: &AttrMap) -> KaybeeResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO nodes (name, type) VALUES (?1, ?2)",
            rusqlite::params![name, node_type],
        )?;
        backend::upsert_row(&tx, self.mode, node_type, name, body, attrs)?;
        if node_type != IMPLICIT_TYPE {
            tx.execute("INSERT OR IGNORE INTO _types (type_name) VALUES (?1)", [node_type])?;
        }
        tx.commit()?;
        Ok(())
    }
}

impl GraphReader for KnowledgeGraph {
    fn ls(&self, type_name: Option<&str>) -> Vec<String> {
        let result = match type_name {
            None => self
                .conn
                .prepare("SELECT name FROM nodes ORDER BY name")
                .and_then(|mut stmt| stmt.query_map([], |row| row.get(0))?.collect::<Result<Vec<String>, _>>()),
            Some(t) => self.conn.prepare("SELECT name FROM nodes WHERE type = ?1 ORDER BY name").and_then(
                |mut stmt| stmt.query_map([t], |row| row.get(0))?.collect::<Result<Vec<String>, _>>(),
            ),
        };
        result.unwrap_or_default()
    }

    fn exists(&self, name: &str) -> bool {
        self.conn
            .query_row("SELECT 1 FROM nodes WHERE name = ?1", [name], |_| Ok(()))
            .is_ok()
    }

    fn node_type(&self, name: &str) -> String {
        self.node_type_of(name)
    }

    fn frontmatter(&self, name: &str) -> AttrMap {
        self.frontmatter_of(name)
    }

    fn wikilinks(&self, name: &str) -> Vec<String> {
        linkindex::wikilinks(&self.conn, name).unwrap_or_default()
    }

    fn resolve_wikilink(&self, target: &str) -> Option<String> {
        linkindex::resolve(&self.conn, self.fuzzy_resolve, target).ok().flatten()
    }

    fn backlinks(&self, name: &str) -> Vec<String> {
        linkindex::backlinks(&self.conn, self.mode, name).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kaybee_validate::{requires_field, Validator as V};

    fn graph() -> KnowledgeGraph {
        KnowledgeGraph::open_in_memory(&KaybeeConfig::default()).unwrap()
    }

    #[test]
    fn write_then_cat_round_trips_frontmatter_and_body() {
        let mut g = graph();
        g.write("Alice", "---\ntype: person\nage: 30\n---\nhello").unwrap();
        let text = g.cat("alice").unwrap();
        assert!(text.contains("type: person"));
        assert!(text.contains("age: 30"));
        assert!(text.ends_with("hello"));
    }

    #[test]
    fn touch_without_content_then_with_content_writes_once() {
        let mut g = graph();
        g.touch("note", "").unwrap();
        assert!(GraphReader::exists(&g, "note"));
        assert_eq!(g.cat("note").unwrap(), "");

        g.touch("note", "body text").unwrap();
        assert_eq!(g.cat("note").unwrap(), "body text");
    }

    #[test]
    fn touch_is_a_no_op_when_node_exists_and_content_empty() {
        let mut g = graph();
        g.write("x", "content").unwrap();
        g.touch("x", "").unwrap();
        assert_eq!(g.cat("x").unwrap(), "content");
    }

    #[test]
    fn rm_missing_node_is_not_found() {
        let mut g = graph();
        let err = g.rm("missing").unwrap_err();
        matches!(err, KaybeeError::NotFound(_));
    }

    #[test]
    fn mv_updates_links_pointing_at_old_name() {
        let mut g = graph();
        g.write("target", "body").unwrap();
        g.write("source", "see [[target]]").unwrap();
        g.mv("target", "renamed").unwrap();

        let links = g.find("renamed").unwrap();
        assert!(!links.is_empty());
        assert_eq!(GraphReader::resolve_wikilink(&g, "target"), None);
        assert_eq!(GraphReader::resolve_wikilink(&g, "renamed"), Some("renamed".to_string()));
    }

    #[test]
    fn cp_rejects_copy_to_self() {
        let mut g = graph();
        g.write("n", "body").unwrap();
        let err = g.cp("n", "n").unwrap_err();
        matches!(err, KaybeeError::IllegalArgument(_));
    }

    #[test]
    fn ln_creates_symlink_counted_as_backlink() {
        let mut g = graph();
        g.write("origin", "body").unwrap();
        g.ln("origin", "alias").unwrap();
        let backlinks = GraphReader::backlinks(&g, "origin");
        assert!(backlinks.contains(&"alias".to_string()));
    }

    #[test]
    fn type_change_emits_type_change_entry_before_write_entry() {
        let mut g = graph();
        g.write("n", "---\ntype: concept\n---\nbody").unwrap();
        g.write("n", "---\ntype: person\n---\nbody").unwrap();

        let entries = g.changelog(0, 100).unwrap();
        let ops: Vec<&str> = entries.iter().map(|e| e.op.as_str()).collect();
        let change_idx = ops.iter().position(|o| *o == "node.type_change").unwrap();
        let write_idx_after = ops[change_idx + 1..].iter().position(|o| *o == "node.write").unwrap() + change_idx + 1;
        assert!(change_idx < write_idx_after);
    }

    #[test]
    fn validator_blocks_structural_violation_on_write() {
        let mut g = graph();
        g.set_validator(V::new().add(requires_field(Some("concept"), "description")));
        let err = g.write("n", "---\ntype: concept\n---\nbody").unwrap_err();
        matches!(err, KaybeeError::Validation(_));
    }

    #[test]
    fn read_with_depth_follows_resolved_links_once() {
        let mut g = graph();
        g.write("b", "leaf").unwrap();
        g.write("a", "see [[b]]").unwrap();
        let text = g.read("a", 1).unwrap();
        assert!(text.contains("--- [[b]] ---"));
        assert!(text.contains("leaf"));
    }

    #[test]
    fn ls_glob_matches_node_names() {
        let mut g = graph();
        g.write("concept-one", "body").unwrap();
        g.write("concept-two", "body").unwrap();
        g.write("other", "body").unwrap();
        let mut names = g.ls(Some("concept-*")).unwrap();
        names.sort();
        assert_eq!(names, vec!["concept-one".to_string(), "concept-two".to_string()]);
    }

    #[test]
    fn grep_lines_reports_line_numbers() {
        let mut g = graph();
        g.write("n", "first\nsecond target\nthird").unwrap();
        let result = g.grep("target", None, false, false, false, true).unwrap();
        match result {
            GrepResult::Lines(lines) => assert_eq!(lines, vec!["n:2:second target".to_string()]),
            other => panic!("expected Lines, got {other:?}"),
        }
    }

    #[test]
    fn tags_all_aggregates_across_nodes() {
        let mut g = graph();
        g.write("n1", "---\ntags: [a, b]\n---\nbody").unwrap();
        g.write("n2", "---\ntags: [b, c]\n---\nbody").unwrap();
        let TagsResult::All(map) = g.tags(None).unwrap() else { panic!("expected All") };
        let mut owners = map.get("b").cloned().unwrap_or_default();
        owners.sort();
        assert_eq!(owners, vec!["n1".to_string(), "n2".to_string()]);
    }

    #[test]
    fn schema_reports_fields_for_typed_nodes() {
        let mut g = graph();
        g.write("n", "---\ntype: concept\ndescription: hi\n---\nbody").unwrap();
        let schema = g.schema(Some("concept")).unwrap();
        assert_eq!(schema.get("concept").unwrap(), &vec!["description".to_string()]);
    }

    #[test]
    fn remove_type_fails_while_nodes_of_that_type_exist() {
        let mut g = graph();
        g.write("n", "---\ntype: concept\n---\nbody").unwrap();
        let err = g.remove_type("concept").unwrap_err();
        matches!(err, KaybeeError::TypeInUse(_));
    }

    /// §8.4 S1: dangling link resolves once its target is created, queried
    /// through the contractual `_links(source, target_raw, target_resolved)`
    /// column names (§6.3) that raw-SQL consumers depend on.
    #[test]
    fn raw_sql_scenario_s1_dangling_link_resolves_on_target_creation() {
        let mut g = graph();
        g.write("a", "[[b]]").unwrap();
        assert_eq!(GraphReader::wikilinks(&g, "a"), vec!["b".to_string()]);

        let rows = g
            .query("select target_resolved from _links where source = 'a'", &[])
            .unwrap();
        assert_eq!(rows[0][0], serde_json::Value::Null);

        g.touch("b", "").unwrap();
        let rows = g
            .query("select target_resolved from _links where source = 'a'", &[])
            .unwrap();
        assert_eq!(rows[0][0], serde_json::Value::String("b".to_string()));
    }

    /// §8.4 S2: renaming a link's target rewrites `target_resolved` in
    /// place, again via the spec-contractual `_links` column names.
    #[test]
    fn raw_sql_scenario_s2_mv_rewrites_target_resolved() {
        let mut g = graph();
        g.touch("target", "").unwrap();
        g.write("src", "See [[target]].").unwrap();
        g.mv("target", "new-target").unwrap();

        let rows = g
            .query("select target_resolved from _links where source = 'src'", &[])
            .unwrap();
        assert_eq!(rows[0][0], serde_json::Value::String("new-target".to_string()));
    }
}
