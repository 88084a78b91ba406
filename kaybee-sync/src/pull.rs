//! Scope-filtered pull (§4.9): pulls every remote row matching `scope` back
//! into local storage. Writes go through `KnowledgeGraph::ingest_row`, the
//! node-engine bypass, so pulled rows never generate a changelog entry the
//! next push would turn around and re-send. Grounded on
//! `examples/original_source/src/kaybee/sync.py`'s `sync_pull`/
//! `_get_mysql_tables`, resolved against the mode-aware Rust storage layer
//! instead of that original's hardcoded `_data` table (§9 open question).

use kaybee_core::model::{AttrMap, AttrValue};
use kaybee_core::KaybeeResult;
use kaybee_storage::KnowledgeGraph;

use crate::{RemoteAdapter, Scope};

/// Remote tables worth pulling from: every one carrying every scope column
/// plus a `name` column (i.e. tables a prior push could have produced).
fn candidate_tables(adapter: &mut dyn RemoteAdapter, scope: &Scope) -> KaybeeResult<Vec<String>> {
    let mut out = Vec::new();
    for table in adapter.table_names()? {
        let cols = adapter.table_columns(&table)?;
        if cols.iter().any(|c| c == "name") && scope.keys().all(|k| cols.contains(k)) {
            out.push(table);
        }
    }
    Ok(out)
}

/// Mirrors `kaybee_storage::backend`'s column encoding: a column value that
/// parses as a JSON array or object round-trips to `List`/`Map`; anything
/// else is a plain scalar.
fn decode_column_value(raw: &str) -> AttrValue {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Array(items)) => AttrValue::List(items.iter().map(json_value_to_string).collect()),
        Ok(serde_json::Value::Object(map)) => {
            AttrValue::Map(map.iter().map(|(k, v)| (k.clone(), json_value_to_string(v))).collect())
        }
        _ => AttrValue::Scalar(raw.to_string()),
    }
}

fn json_value_to_string(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn value_to_string(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Pull every row matching `scope` from the remote store into local storage
/// (§4.9). Returns the number of rows written. Idempotent: re-pulling the
/// same remote state overwrites local rows in place rather than
/// duplicating them.
pub fn pull(kg: &mut KnowledgeGraph, adapter: &mut dyn RemoteAdapter, scope: &Scope) -> KaybeeResult<usize> {
    let scope_keys: Vec<String> = scope.keys().cloned().collect();
    let tables = candidate_tables(adapter, scope)?;
    let mut total = 0usize;

    for table in tables {
        if !adapter.table_exists(&table)? {
            continue;
        }

        let where_clause = scope_keys.iter().map(|k| format!("{k} = ?")).collect::<Vec<_>>().join(" AND ");
        let sql = if where_clause.is_empty() {
            format!("SELECT * FROM {table}")
        } else {
            format!("SELECT * FROM {table} WHERE {where_clause}")
        };
        let params: Vec<serde_json::Value> = scope.values().cloned().collect();
        let result = adapter.query(&sql, &params)?;

        let name_idx = match result.columns.iter().position(|c| c == "name") {
            Some(i) => i,
            None => continue,
        };
        let content_idx = result.columns.iter().position(|c| c == "content");

        for row in &result.rows {
            let name = row.get(name_idx).map(value_to_string).unwrap_or_default();
            if name.is_empty() {
                continue;
            }
            let body = content_idx.and_then(|i| row.get(i)).map(value_to_string).unwrap_or_default();

            let mut attrs = AttrMap::new();
            for (i, col) in result.columns.iter().enumerate() {
                if col == "name" || col == "content" || scope_keys.contains(col) {
                    continue;
                }
                if let Some(raw) = row.get(i) {
                    let raw = value_to_string(raw);
                    if !raw.is_empty() {
                        attrs.insert(col.clone(), decode_column_value(&raw));
                    }
                }
            }

            kg.ingest_row(&table, &name, &body, &attrs)?;
            total += 1;
        }
    }

    adapter.commit()?;
    tracing::info!(total, "sync pull complete");
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kaybee_core::config::KaybeeConfig;
    use kaybee_core::reader::GraphReader;
    use std::collections::HashMap;

    struct FakeAdapter {
        tables: HashMap<String, (Vec<String>, Vec<HashMap<String, serde_json::Value>>)>,
    }

    impl RemoteAdapter for FakeAdapter {
        fn execute(&mut self, _sql: &str, _params: &[serde_json::Value]) -> KaybeeResult<()> {
            Ok(())
        }

        fn query(&mut self, sql: &str, params: &[serde_json::Value]) -> KaybeeResult<crate::RemoteRows> {
            let table = sql.split("FROM ").nth(1).unwrap().split_whitespace().next().unwrap();
            let (cols, rows) = match self.tables.get(table) {
                Some(t) => t,
                None => return Ok(crate::RemoteRows::default()),
            };

            let scope_cols: Vec<&str> = if sql.contains("WHERE") {
                sql.split("WHERE ").nth(1).unwrap().split(" AND ").map(|p| p.split(" = ").next().unwrap()).collect()
            } else {
                Vec::new()
            };

            let filtered: Vec<Vec<serde_json::Value>> = rows
                .iter()
                .filter(|row| {
                    scope_cols.iter().zip(params.iter()).all(|(c, v)| row.get(*c) == Some(v))
                })
                .map(|row| cols.iter().map(|c| row.get(c).cloned().unwrap_or(serde_json::Value::Null)).collect())
                .collect();

            Ok(crate::RemoteRows { columns: cols.clone(), rows: filtered })
        }

        fn table_exists(&mut self, table: &str) -> KaybeeResult<bool> {
            Ok(self.tables.contains_key(table))
        }

        fn table_columns(&mut self, table: &str) -> KaybeeResult<Vec<String>> {
            Ok(self.tables.get(table).map(|(c, _)| c.clone()).unwrap_or_default())
        }

        fn table_names(&mut self) -> KaybeeResult<Vec<String>> {
            Ok(self.tables.keys().cloned().collect())
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

    fn row(name: &str, content: &str, team_id: &str, tags: Option<&str>) -> HashMap<String, serde_json::Value> {
        let mut r = HashMap::new();
        r.insert("name".to_string(), serde_json::Value::String(name.to_string()));
        r.insert("content".to_string(), serde_json::Value::String(content.to_string()));
        r.insert("team_id".to_string(), serde_json::Value::String(team_id.to_string()));
        if let Some(tags) = tags {
            r.insert("tags".to_string(), serde_json::Value::String(tags.to_string()));
        }
        r
    }

    #[test]
    fn pulls_matching_rows_into_local_storage() {
        let mut tables = HashMap::new();
        tables.insert(
            "concept".to_string(),
            (
                vec!["name".to_string(), "content".to_string(), "team_id".to_string(), "tags".to_string()],
                vec![row("a", "body a", "eng", Some(r#"["x","y"]"#)), row("b", "body b", "other", None)],
            ),
        );
        let mut adapter = FakeAdapter { tables };

        let mut g = KnowledgeGraph::open_in_memory(&KaybeeConfig::default()).unwrap();
        let pulled = pull(&mut g, &mut adapter, &scope()).unwrap();

        assert_eq!(pulled, 1);
        assert!(GraphReader::exists(&g, "a"));
        assert!(!GraphReader::exists(&g, "b"));
        assert_eq!(GraphReader::node_type(&g, "a"), "concept");
        let attrs = GraphReader::frontmatter(&g, "a");
        assert_eq!(attrs.get("tags"), Some(&AttrValue::List(vec!["x".into(), "y".into()])));
    }

    #[test]
    fn pulled_rows_do_not_generate_changelog_entries() {
        let mut tables = HashMap::new();
        tables.insert(
            "concept".to_string(),
            (
                vec!["name".to_string(), "content".to_string(), "team_id".to_string()],
                vec![row("a", "body a", "eng", None)],
            ),
        );
        let mut adapter = FakeAdapter { tables };

        let mut g = KnowledgeGraph::open_in_memory(&KaybeeConfig::default()).unwrap();
        pull(&mut g, &mut adapter, &scope()).unwrap();

        assert!(g.changelog(0, 100).unwrap().is_empty());
    }

    #[test]
    fn re_pulling_overwrites_rather_than_duplicates() {
        let mut tables = HashMap::new();
        tables.insert(
            "concept".to_string(),
            (vec!["name".to_string(), "content".to_string(), "team_id".to_string()], vec![row("a", "v1", "eng", None)]),
        );
        let mut adapter = FakeAdapter { tables };
        let mut g = KnowledgeGraph::open_in_memory(&KaybeeConfig::default()).unwrap();

        pull(&mut g, &mut adapter, &scope()).unwrap();
        adapter.tables.get_mut("concept").unwrap().1[0].insert("content".to_string(), serde_json::Value::String("v2".to_string()));
        pull(&mut g, &mut adapter, &scope()).unwrap();

        assert_eq!(g.ls(None).unwrap(), vec!["a".to_string()]);
        assert_eq!(g.cat("a").unwrap().trim_end(), "---\ntype: concept\n---\nv2");
    }
}
