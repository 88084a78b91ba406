//! Changelog-driven push (§4.9): replays local `_changelog` entries against
//! a generic remote relational adapter, upserting or deleting rows keyed on
//! `(name, scope...)`. Falls back to a full local scan when the changelog
//! is disabled (deletes are not propagated in that mode — documented, not
//! a bug). Grounded on `examples/original_source/src/kaybee/sync.py`'s
//! `sync_push`/`_sync_push_full`/`_upsert_to_mysql`/`_ensure_mysql_table`.

use std::collections::{HashMap, HashSet};

use kaybee_core::frontmatter;
use kaybee_core::model::{AttrMap, AttrValue, IMPLICIT_TYPE};
use kaybee_core::reader::GraphReader;
use kaybee_core::KaybeeResult;
use kaybee_storage::{ChangelogEntry, KnowledgeGraph};

use crate::{RemoteAdapter, Scope};

/// Per-push column cache (§4.9): avoids a remote existence probe for every
/// row once a table's shape has been seen once this push.
#[derive(Default)]
struct SchemaCache {
    columns: HashMap<String, HashSet<String>>,
}

impl SchemaCache {
    /// Ensure `table` exists remotely with every column in `local_cols`
    /// plus every scope key, creating it (with a uniqueness constraint on
    /// `name` + scope keys) or altering it as needed.
    fn ensure_table(
        &mut self,
        adapter: &mut dyn RemoteAdapter,
        table: &str,
        local_cols: &[String],
        scope_keys: &[String],
    ) -> KaybeeResult<()> {
        let mut all_cols: Vec<String> = scope_keys.to_vec();
        all_cols.extend(local_cols.iter().cloned());

        if let Some(existing) = self.columns.get_mut(table) {
            for col in &all_cols {
                if !existing.contains(col) {
                    adapter.execute(&format!("ALTER TABLE {table} ADD COLUMN {col} {}", sql_type_for(col)), &[])?;
                    existing.insert(col.clone());
                }
            }
            return Ok(());
        }

        if adapter.table_exists(table)? {
            let mut existing: HashSet<String> = adapter.table_columns(table)?.into_iter().collect();
            for col in &all_cols {
                if !existing.contains(col) {
                    adapter.execute(&format!("ALTER TABLE {table} ADD COLUMN {col} {}", sql_type_for(col)), &[])?;
                    existing.insert(col.clone());
                }
            }
            self.columns.insert(table.to_string(), existing);
        } else {
            let col_defs: Vec<String> = all_cols.iter().map(|c| format!("{c} {}", sql_type_for(c))).collect();
            let mut unique_on = vec!["name".to_string()];
            unique_on.extend(scope_keys.iter().cloned());
            adapter.execute(
                &format!(
                    "CREATE TABLE {table} ({}, UNIQUE ({}))",
                    col_defs.join(", "),
                    unique_on.join(", ")
                ),
                &[],
            )?;
            self.columns.insert(table.to_string(), all_cols.into_iter().collect());
        }
        Ok(())
    }

    /// Whether `table` is known to exist remotely, without an extra probe
    /// when the cache already has an answer.
    fn table_exists(&self, adapter: &mut dyn RemoteAdapter, table: &str) -> KaybeeResult<bool> {
        if self.columns.contains_key(table) {
            return Ok(true);
        }
        adapter.table_exists(table)
    }
}

/// §6.4: TEXT for every column, promoted to a large-text type for `content`
/// (the remote adapter's dialect is expected to understand this, per the
/// adapter contract's documented dialect assumptions).
fn sql_type_for(col: &str) -> &'static str {
    if col == "content" {
        "LONGTEXT"
    } else {
        "TEXT"
    }
}

fn encode_attr_value(value: &AttrValue) -> serde_json::Value {
    match value {
        AttrValue::Scalar(s) => serde_json::Value::String(s.clone()),
        AttrValue::List(items) => serde_json::Value::String(serde_json::to_string(items).unwrap_or_default()),
        AttrValue::Map(entries) => {
            let obj: serde_json::Map<String, serde_json::Value> = entries
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect();
            serde_json::Value::String(serde_json::Value::Object(obj).to_string())
        }
    }
}

fn upsert(
    adapter: &mut dyn RemoteAdapter,
    cache: &mut SchemaCache,
    table: &str,
    name: &str,
    body: &str,
    attrs: &AttrMap,
    scope: &Scope,
) -> KaybeeResult<()> {
    let scope_keys: Vec<String> = scope.keys().cloned().collect();
    let mut local_cols = vec!["name".to_string(), "content".to_string()];
    local_cols.extend(attrs.keys().map(String::from));

    cache.ensure_table(adapter, table, &local_cols, &scope_keys)?;

    let mut all_cols = scope_keys.clone();
    all_cols.extend(local_cols.iter().cloned());

    let mut values: Vec<serde_json::Value> = scope.values().cloned().collect();
    values.push(serde_json::Value::String(name.to_string()));
    values.push(serde_json::Value::String(body.to_string()));
    for (_, value) in attrs.iter() {
        values.push(encode_attr_value(value));
    }

    let unique_on: HashSet<&str> = std::iter::once("name").chain(scope_keys.iter().map(String::as_str)).collect();
    let update_parts: Vec<String> = all_cols
        .iter()
        .filter(|c| !unique_on.contains(c.as_str()))
        .map(|c| format!("{c} = VALUES({c})"))
        .collect();

    let placeholders = vec!["?"; all_cols.len()].join(", ");
    let col_list = all_cols.join(", ");
    let sql = if update_parts.is_empty() {
        format!("INSERT IGNORE INTO {table} ({col_list}) VALUES ({placeholders})")
    } else {
        format!(
            "INSERT INTO {table} ({col_list}) VALUES ({placeholders}) ON DUPLICATE KEY UPDATE {}",
            update_parts.join(", ")
        )
    };
    adapter.execute(&sql, &values)
}

fn delete(adapter: &mut dyn RemoteAdapter, cache: &SchemaCache, table: &str, name: &str, scope: &Scope) -> KaybeeResult<()> {
    if !cache.table_exists(adapter, table)? {
        return Ok(());
    }
    let mut where_parts = vec!["name = ?".to_string()];
    let scope_keys: Vec<String> = scope.keys().cloned().collect();
    where_parts.extend(scope_keys.iter().map(|k| format!("{k} = ?")));

    let mut values = vec![serde_json::Value::String(name.to_string())];
    values.extend(scope.values().cloned());

    let sql = format!("DELETE FROM {table} WHERE {}", where_parts.join(" AND "));
    adapter.execute(&sql, &values)
}

/// `node.write`/`node.mv`/`node.cp` payloads all carry `{type, content, attrs}`
/// (plus op-specific extras); decode the common shape once.
fn decode_payload(payload: &serde_json::Value) -> (String, String, AttrMap) {
    let node_type = payload.get("type").and_then(|v| v.as_str()).unwrap_or(IMPLICIT_TYPE).to_string();
    let body = payload.get("content").and_then(|v| v.as_str()).unwrap_or_default().to_string();
    let mut attrs = AttrMap::new();
    if let Some(serde_json::Value::Object(map)) = payload.get("attrs") {
        for (k, v) in map {
            attrs.insert(k.clone(), json_to_attr_value(v));
        }
    }
    (node_type, body, attrs)
}

fn json_to_attr_value(v: &serde_json::Value) -> AttrValue {
    match v {
        serde_json::Value::Array(items) => {
            AttrValue::List(items.iter().map(|i| i.as_str().map(String::from).unwrap_or_else(|| i.to_string())).collect())
        }
        serde_json::Value::Object(map) => AttrValue::Map(
            map.iter()
                .map(|(k, v)| (k.clone(), v.as_str().map(String::from).unwrap_or_else(|| v.to_string())))
                .collect(),
        ),
        serde_json::Value::String(s) => AttrValue::Scalar(s.clone()),
        other => AttrValue::Scalar(other.to_string()),
    }
}

fn apply_entry(
    adapter: &mut dyn RemoteAdapter,
    cache: &mut SchemaCache,
    scope: &Scope,
    entry: &ChangelogEntry,
) -> KaybeeResult<()> {
    let empty = serde_json::json!({});
    let payload = entry.payload.as_ref().unwrap_or(&empty);

    match entry.op.as_str() {
        "node.write" | "node.cp" => {
            let (node_type, body, attrs) = decode_payload(payload);
            upsert(adapter, cache, &node_type, &entry.name, &body, &attrs, scope)?;
        }
        "node.rm" => {
            let node_type = payload.get("type").and_then(|v| v.as_str()).unwrap_or(IMPLICIT_TYPE).to_string();
            delete(adapter, cache, &node_type, &entry.name, scope)?;
        }
        "node.mv" => {
            let old_name = payload.get("old_name").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            let (node_type, body, attrs) = decode_payload(payload);
            delete(adapter, cache, &node_type, &old_name, scope)?;
            upsert(adapter, cache, &node_type, &entry.name, &body, &attrs, scope)?;
        }
        "node.type_change" => {
            // Paired with the `node.write` entry that always immediately
            // follows in the same batch (§9): delete the stale row from the
            // old type's table before that entry's upsert lands the new one.
            let old_type = payload.get("old_type").and_then(|v| v.as_str()).unwrap_or(IMPLICIT_TYPE).to_string();
            delete(adapter, cache, &old_type, &entry.name, scope)?;
        }
        "type.add" => {
            let scope_keys: Vec<String> = scope.keys().cloned().collect();
            cache.ensure_table(adapter, &entry.name, &["name".to_string(), "content".to_string()], &scope_keys)?;
        }
        // type.rm: never drop remote tables.
        _ => {}
    }
    Ok(())
}

/// Full local scan, upserting every node into its type's remote table.
/// Deletes are NOT propagated in this mode (documented limitation, §4.9).
fn push_full(kg: &KnowledgeGraph, adapter: &mut dyn RemoteAdapter, scope: &Scope) -> KaybeeResult<i64> {
    let mut cache = SchemaCache::default();
    for name in kg.ls(None)? {
        let node_type = GraphReader::node_type(kg, &name);
        let text = kg.cat(&name)?;
        let (mut attrs, body) = frontmatter::parse_frontmatter(&text);
        attrs.remove("type");
        upsert(adapter, &mut cache, &node_type, &name, &body, &attrs, scope)?;
    }
    adapter.commit()?;
    tracing::info!("sync push (full scan) complete");
    Ok(0)
}

/// Push local changes to the remote store (§4.9).
///
/// When the changelog is enabled, replays entries with `seq > since_seq` in
/// bounded batches of `batch_limit`, looping until the changelog is drained,
/// translating each op into the remote operations described in §4.9. When
/// disabled, falls back to [`push_full`] and `since_seq`/`batch_limit` are
/// ignored; the return value is always `0` in that mode.
///
/// Commits once at the end and returns the last `seq` processed (unchanged
/// from `since_seq` if there was nothing new) — the caller persists this
/// for the next call.
pub fn push(
    kg: &KnowledgeGraph,
    adapter: &mut dyn RemoteAdapter,
    scope: &Scope,
    since_seq: i64,
    batch_limit: u32,
) -> KaybeeResult<i64> {
    if !kg.changelog_enabled() {
        return push_full(kg, adapter, scope);
    }

    let mut cache = SchemaCache::default();
    let mut last_seq = since_seq;

    loop {
        let entries = kg.changelog(last_seq, batch_limit)?;
        if entries.is_empty() {
            break;
        }
        for entry in &entries {
            apply_entry(adapter, &mut cache, scope, entry)?;
            last_seq = entry.seq;
        }
    }

    adapter.commit()?;
    tracing::info!(since_seq, last_seq, "sync push complete");
    Ok(last_seq)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kaybee_core::config::KaybeeConfig;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// In-memory stand-in for a remote relational store, enough to exercise
    /// the adapter contract without a real MySQL-speaking dependency.
    #[derive(Default)]
    struct FakeRemote {
        tables: HashMap<String, (Vec<String>, Vec<HashMap<String, serde_json::Value>>)>,
    }

    impl FakeRemote {
        fn row_count(&self, table: &str) -> usize {
            self.tables.get(table).map(|(_, rows)| rows.len()).unwrap_or(0)
        }
    }

    /// A tiny, deliberately permissive SQL-ish interpreter covering just the
    /// statement shapes `push`/`pull` emit: CREATE TABLE, ALTER TABLE ADD
    /// COLUMN, INSERT [IGNORE] ... [ON DUPLICATE KEY UPDATE ...], DELETE.
    struct FakeAdapter {
        remote: Rc<RefCell<FakeRemote>>,
    }

    impl RemoteAdapter for FakeAdapter {
        fn execute(&mut self, sql: &str, params: &[serde_json::Value]) -> KaybeeResult<()> {
            let mut remote = self.remote.borrow_mut();
            let sql_trim = sql.trim();

            if let Some(rest) = sql_trim.strip_prefix("CREATE TABLE ") {
                let (table, rest) = rest.split_once(' ').unwrap();
                let inside = rest.trim_start_matches('(').rsplit_once(')').unwrap().0;
                let cols: Vec<String> = inside
                    .split(',')
                    .map(|c| c.trim())
                    .filter(|c| !c.starts_with("UNIQUE"))
                    .map(|c| c.split_whitespace().next().unwrap().to_string())
                    .collect();
                remote.tables.insert(table.to_string(), (cols, Vec::new()));
                return Ok(());
            }

            if let Some(rest) = sql_trim.strip_prefix("ALTER TABLE ") {
                let mut it = rest.split_whitespace();
                let table = it.next().unwrap().to_string();
                // skip "ADD" "COLUMN"
                let col = it.nth(2).unwrap().to_string();
                if let Some((cols, _)) = remote.tables.get_mut(&table) {
                    if !cols.contains(&col) {
                        cols.push(col);
                    }
                }
                return Ok(());
            }

            if sql_trim.starts_with("INSERT") {
                let table_start = sql_trim.find("INTO ").unwrap() + 5;
                let rest = &sql_trim[table_start..];
                let (table, _) = rest.split_once(' ').unwrap();
                let col_start = rest.find('(').unwrap() + 1;
                let col_end = rest.find(')').unwrap();
                let cols: Vec<String> = rest[col_start..col_end].split(',').map(|c| c.trim().to_string()).collect();

                let entry = remote.tables.entry(table.to_string()).or_insert_with(|| (cols.clone(), Vec::new()));
                for c in &cols {
                    if !entry.0.contains(c) {
                        entry.0.push(c.clone());
                    }
                }
                let mut row: HashMap<String, serde_json::Value> = HashMap::new();
                for (col, val) in cols.iter().zip(params.iter()) {
                    row.insert(col.clone(), val.clone());
                }
                let name_val = row.get("name").cloned();
                if let Some(existing) = entry.1.iter_mut().find(|r| r.get("name") == name_val.as_ref()) {
                    *existing = row;
                } else {
                    entry.1.push(row);
                }
                return Ok(());
            }

            if let Some(rest) = sql_trim.strip_prefix("DELETE FROM ") {
                let (table, _) = rest.split_once(" WHERE ").unwrap();
                if let Some((_, rows)) = remote.tables.get_mut(table) {
                    let name_val = params.first().cloned();
                    rows.retain(|r| r.get("name") != name_val.as_ref());
                }
                return Ok(());
            }

            Ok(())
        }

        fn query(&mut self, _sql: &str, _params: &[serde_json::Value]) -> KaybeeResult<crate::RemoteRows> {
            Ok(crate::RemoteRows::default())
        }

        fn table_exists(&mut self, table: &str) -> KaybeeResult<bool> {
            Ok(self.remote.borrow().tables.contains_key(table))
        }

        fn table_columns(&mut self, table: &str) -> KaybeeResult<Vec<String>> {
            Ok(self.remote.borrow().tables.get(table).map(|(c, _)| c.clone()).unwrap_or_default())
        }

        fn table_names(&mut self) -> KaybeeResult<Vec<String>> {
            Ok(self.remote.borrow().tables.keys().cloned().collect())
        }

        fn commit(&mut self) -> KaybeeResult<()> {
            Ok(())
        }
    }

    fn scope() -> Scope {
        let mut s = Scope::new();
        s.insert("team_id".to_string(), serde_json::Value::String("eng".to_string()));
        s
    }

    #[test]
    fn push_upserts_writes_and_deletes_removed_rows() {
        let mut g = KnowledgeGraph::open_in_memory(&KaybeeConfig::default()).unwrap();
        g.write("a", "---\ntype: concept\n---\nbody a").unwrap();
        g.write("b", "---\ntype: concept\n---\nbody b").unwrap();
        g.write("c", "---\ntype: concept\n---\nbody c").unwrap();

        let remote = Rc::new(RefCell::new(FakeRemote::default()));
        let mut adapter = FakeAdapter { remote: remote.clone() };
        let s = scope();

        let seq1 = push(&g, &mut adapter, &s, 0, 10_000).unwrap();
        assert!(seq1 > 0);
        assert_eq!(remote.borrow().row_count("concept"), 3);

        g.rm("b").unwrap();
        let seq2 = push(&g, &mut adapter, &s, seq1, 10_000).unwrap();
        assert!(seq2 > seq1);
        assert_eq!(remote.borrow().row_count("concept"), 2);

        // Second push with the same since_seq is a no-op.
        let seq3 = push(&g, &mut adapter, &s, seq2, 10_000).unwrap();
        assert_eq!(seq3, seq2);
        assert_eq!(remote.borrow().row_count("concept"), 2);
    }

    #[test]
    fn push_full_scan_fallback_when_changelog_disabled() {
        let mut cfg = KaybeeConfig::default();
        cfg.changelog = Some(false);
        let mut g = KnowledgeGraph::open_in_memory(&cfg).unwrap();
        g.write("a", "---\ntype: concept\n---\nbody a").unwrap();

        let remote = Rc::new(RefCell::new(FakeRemote::default()));
        let mut adapter = FakeAdapter { remote: remote.clone() };
        let s = scope();

        let seq = push(&g, &mut adapter, &s, 0, 10_000).unwrap();
        assert_eq!(seq, 0);
        assert_eq!(remote.borrow().row_count("concept"), 1);
    }

    #[test]
    fn type_change_deletes_stale_row_from_old_type_table() {
        let mut g = KnowledgeGraph::open_in_memory(&KaybeeConfig::default()).unwrap();
        g.write("n", "---\ntype: concept\n---\nbody").unwrap();

        let remote = Rc::new(RefCell::new(FakeRemote::default()));
        let mut adapter = FakeAdapter { remote: remote.clone() };
        let s = scope();
        let seq1 = push(&g, &mut adapter, &s, 0, 10_000).unwrap();
        assert_eq!(remote.borrow().row_count("concept"), 1);

        g.write("n", "---\ntype: person\n---\nbody").unwrap();
        push(&g, &mut adapter, &s, seq1, 10_000).unwrap();

        assert_eq!(remote.borrow().row_count("concept"), 0);
        assert_eq!(remote.borrow().row_count("person"), 1);
    }
}
