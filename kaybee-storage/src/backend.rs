//! The two-mode physical storage backend (§4.4): per-type tables in multi
//! mode, one wide `_data` table plus a `_type_fields` registry in single
//! mode. `data_table`/`upsert_row`/`delete_row`/`read_row`/`content_rows`
//! are the uniform API the node engine and the query facade drive; both
//! modes satisfy the same read/write contract.

use std::collections::HashSet;

use kaybee_core::config::StorageMode;
use kaybee_core::ident::safe_ident;
use kaybee_core::model::{AttrMap, AttrValue, IMPLICIT_TYPE, RESERVED_TYPE_NAMES};
use kaybee_core::{KaybeeError, KaybeeResult};
use rusqlite::Connection;

/// Physical table holding `type_name`'s rows. In single mode every type
/// (including the implicit one) shares `_data`; in multi mode each gets
/// its own sanitized table name.
pub fn data_table(mode: StorageMode, type_name: &str) -> String {
    match mode {
        StorageMode::Single => "_data".to_string(),
        StorageMode::Multi => safe_ident(type_name),
    }
}

fn encode_value(value: &AttrValue) -> String {
    match value {
        AttrValue::Scalar(s) => s.clone(),
        AttrValue::List(items) => serde_json::to_string(items).expect("list encodes to JSON"),
        AttrValue::Map(entries) => {
            let body = entries
                .iter()
                .map(|(k, v)| {
                    format!(
                        "{}:{}",
                        serde_json::to_string(k).expect("key encodes"),
                        serde_json::to_string(v).expect("value encodes")
                    )
                })
                .collect::<Vec<_>>()
                .join(",");
            format!("{{{body}}}")
        }
    }
}

fn decode_value(raw: &str) -> AttrValue {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Array(items)) => {
            AttrValue::List(items.iter().map(json_value_to_string).collect())
        }
        Ok(serde_json::Value::Object(map)) => AttrValue::Map(
            map.iter()
                .map(|(k, v)| (k.clone(), json_value_to_string(v)))
                .collect(),
        ),
        _ => AttrValue::Scalar(raw.to_string()),
    }
}

fn json_value_to_string(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub(crate) fn existing_columns(conn: &Connection, table: &str) -> KaybeeResult<HashSet<String>> {
    let sql = format!("PRAGMA table_info({table})");
    let mut stmt = match conn.prepare(&sql) {
        Ok(stmt) => stmt,
        Err(_) => return Ok(HashSet::new()),
    };
    let cols = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .filter_map(Result::ok)
        .collect();
    Ok(cols)
}

pub(crate) fn table_exists(conn: &Connection, table: &str) -> KaybeeResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Ensure the physical table/columns for `type_name` exist and that every
/// key in `keys` has a backing column. In single mode, also registers the
/// type→field mapping in `_type_fields` (I6). Rejects reserved type names
/// (I5); `kaybee` itself is exempt (it is the implicit type, not reserved).
pub fn ensure_type_table(
    conn: &Connection,
    mode: StorageMode,
    type_name: &str,
    keys: &[String],
) -> KaybeeResult<()> {
    if type_name != IMPLICIT_TYPE && RESERVED_TYPE_NAMES.contains(&type_name) {
        return Err(KaybeeError::IllegalArgument(format!(
            "reserved type name: '{type_name}'"
        )));
    }

    let table = data_table(mode, type_name);

    if matches!(mode, StorageMode::Multi) {
        conn.execute(
            &format!("CREATE TABLE IF NOT EXISTS {table} (name TEXT PRIMARY KEY, content TEXT)"),
            [],
        )?;
    }

    let existing = existing_columns(conn, &table)?;
    for key in keys {
        let col = safe_ident(key);
        if !existing.contains(&col) {
            conn.execute(&format!("ALTER TABLE {table} ADD COLUMN {col} TEXT"), [])?;
        }
        if matches!(mode, StorageMode::Single) && type_name != IMPLICIT_TYPE {
            conn.execute(
                "INSERT OR IGNORE INTO _type_fields (type_name, field_name) VALUES (?1, ?2)",
                rusqlite::params![type_name, col],
            )?;
        }
    }
    Ok(())
}

/// Upsert a node's physical row: body plus every attribute, lazily
/// creating columns for any never-before-seen key.
pub fn upsert_row(
    conn: &Connection,
    mode: StorageMode,
    type_name: &str,
    name: &str,
    body: &str,
    attrs: &AttrMap,
) -> KaybeeResult<()> {
    let keys: Vec<String> = attrs.keys().map(String::from).collect();
    ensure_type_table(conn, mode, type_name, &keys)?;

    let table = data_table(mode, type_name);
    let mut columns = vec!["name".to_string(), "content".to_string()];
    let mut values: Vec<String> = vec![name.to_string(), body.to_string()];
    for (key, value) in attrs.iter() {
        columns.push(safe_ident(key));
        values.push(encode_value(value));
    }

    let placeholders = (1..=values.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let col_list = columns.join(", ");
    let sql = format!("INSERT OR REPLACE INTO {table} ({col_list}) VALUES ({placeholders})");
    let params: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v as &dyn rusqlite::ToSql).collect();
    conn.execute(&sql, params.as_slice())?;
    Ok(())
}

/// Delete a node's physical row. Tolerates the table not existing (a node
/// never written under this type, or a pathological type name collision).
pub fn delete_row(conn: &Connection, mode: StorageMode, type_name: &str, name: &str) -> KaybeeResult<()> {
    let table = data_table(mode, type_name);
    if !table_exists(conn, &table)? {
        return Ok(());
    }
    conn.execute(&format!("DELETE FROM {table} WHERE name = ?1"), [name])?;
    Ok(())
}

/// Read a node's body and attributes (the `type` key is never present in
/// the returned map — see `kaybee_core::model::Node`). Returns `None` if
/// the physical row is missing (a thin-index-only node, e.g. from `touch`
/// without content, still has an empty row — see `engine::touch`).
pub fn read_row(
    conn: &Connection,
    mode: StorageMode,
    type_name: &str,
    name: &str,
) -> KaybeeResult<Option<(String, AttrMap)>> {
    let table = data_table(mode, type_name);
    if !table_exists(conn, &table)? {
        return Ok(None);
    }

    let columns = existing_columns(conn, &table)?;
    if columns.is_empty() {
        return Ok(None);
    }

    let type_fields: Option<HashSet<String>> = if matches!(mode, StorageMode::Single) && type_name != IMPLICIT_TYPE {
        let mut stmt = conn.prepare("SELECT field_name FROM _type_fields WHERE type_name = ?1")?;
        let fields = stmt
            .query_map([type_name], |row| row.get::<_, String>(0))?
            .filter_map(Result::ok)
            .collect();
        Some(fields)
    } else {
        None
    };

    let mut ordered_cols: Vec<String> = columns.into_iter().collect();
    ordered_cols.sort();
    let col_list = ordered_cols.join(", ");
    let sql = format!("SELECT {col_list} FROM {table} WHERE name = ?1");

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([name])?;
    let Some(row) = rows.next()? else {
        return Ok(None);
    };

    let mut body = String::new();
    let mut attrs = AttrMap::new();
    for (idx, col) in ordered_cols.iter().enumerate() {
        if col == "name" {
            continue;
        }
        let value: Option<String> = row.get(idx)?;
        if col == "content" {
            body = value.unwrap_or_default();
            continue;
        }
        let Some(value) = value else { continue };
        if let Some(fields) = &type_fields {
            if !fields.contains(col) {
                continue;
            }
        }
        attrs.insert(col.clone(), decode_value(&value));
    }

    Ok(Some((body, attrs)))
}

/// `(name, body)` pairs, optionally restricted to one type. The single
/// content scanner `grep`/`tags` share.
pub fn content_rows(
    conn: &Connection,
    mode: StorageMode,
    type_name: Option<&str>,
) -> KaybeeResult<Vec<(String, String)>> {
    if let Some(type_name) = type_name {
        let table = data_table(mode, type_name);
        if !table_exists(conn, &table)? {
            return Ok(Vec::new());
        }
        let sql = match mode {
            StorageMode::Single => format!(
                "SELECT d.name, d.content FROM {table} d \
                 JOIN nodes n ON n.name = d.name WHERE n.type = ?1 ORDER BY d.name"
            ),
            StorageMode::Multi => format!("SELECT name, content FROM {table} ORDER BY name"),
        };
        let mut stmt = conn.prepare(&sql)?;
        let rows: Vec<(String, String)> = if matches!(mode, StorageMode::Single) {
            stmt.query_map([type_name], |row| Ok((row.get(0)?, row.get::<_, Option<String>>(1)?.unwrap_or_default())))?
                .filter_map(Result::ok)
                .collect()
        } else {
            stmt.query_map([], |row| Ok((row.get(0)?, row.get::<_, Option<String>>(1)?.unwrap_or_default())))?
                .filter_map(Result::ok)
                .collect()
        };
        return Ok(rows);
    }

    if matches!(mode, StorageMode::Single) {
        let mut stmt = conn.prepare("SELECT name, content FROM _data ORDER BY name")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get::<_, Option<String>>(1)?.unwrap_or_default())))?
            .filter_map(Result::ok)
            .collect();
        return Ok(rows);
    }

    let mut type_stmt = conn.prepare("SELECT DISTINCT type FROM nodes")?;
    let types: Vec<String> = type_stmt
        .query_map([], |row| row.get(0))?
        .filter_map(Result::ok)
        .collect();

    let mut parts = Vec::new();
    for t in &types {
        let safe = safe_ident(t);
        if table_exists(conn, &safe)? {
            parts.push(format!("SELECT name, content FROM {safe}"));
        }
    }
    if parts.is_empty() {
        return Ok(Vec::new());
    }
    let sql = parts.join(" UNION ALL ");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get::<_, Option<String>>(1)?.unwrap_or_default())))?
        .filter_map(Result::ok)
        .collect();
    Ok(rows)
}

/// Field names recorded for a type, for schema introspection (`schema()`).
pub fn type_fields(conn: &Connection, mode: StorageMode, type_name: &str) -> KaybeeResult<Vec<String>> {
    match mode {
        StorageMode::Single => {
            let mut stmt =
                conn.prepare("SELECT field_name FROM _type_fields WHERE type_name = ?1 ORDER BY field_name")?;
            let fields = stmt
                .query_map([type_name], |row| row.get(0))?
                .filter_map(Result::ok)
                .collect();
            Ok(fields)
        }
        StorageMode::Multi => {
            let table = safe_ident(type_name);
            if !table_exists(conn, &table)? {
                return Ok(Vec::new());
            }
            let mut cols: Vec<String> = existing_columns(conn, &table)?.into_iter().collect();
            cols.retain(|c| c != "name" && c != "content");
            cols.sort();
            Ok(cols)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::open_in_memory;

    #[test]
    fn upsert_then_read_round_trips_scalar_list_and_map() {
        let conn = open_in_memory(StorageMode::Multi, true).unwrap();
        let mut attrs = AttrMap::new();
        attrs.insert("description", AttrValue::Scalar("hi".into()));
        attrs.insert("tags", AttrValue::List(vec!["a".into(), "b".into()]));
        upsert_row(&conn, StorageMode::Multi, "concept", "n1", "body", &attrs).unwrap();

        let (body, read_attrs) = read_row(&conn, StorageMode::Multi, "concept", "n1").unwrap().unwrap();
        assert_eq!(body, "body");
        assert_eq!(read_attrs.get("description"), Some(&AttrValue::Scalar("hi".into())));
        assert_eq!(
            read_attrs.get("tags"),
            Some(&AttrValue::List(vec!["a".into(), "b".into()]))
        );
    }

    #[test]
    fn single_mode_filters_columns_to_owning_type() {
        let conn = open_in_memory(StorageMode::Single, true).unwrap();
        let mut a1 = AttrMap::new();
        a1.insert("description", AttrValue::Scalar("concept field".into()));
        upsert_row(&conn, StorageMode::Single, "concept", "c1", "body1", &a1).unwrap();

        let mut a2 = AttrMap::new();
        a2.insert("age", AttrValue::Scalar("42".into()));
        upsert_row(&conn, StorageMode::Single, "person", "p1", "body2", &a2).unwrap();

        // c1's row in _data now has an (unused) `age` column too — make sure
        // reading c1 does not surface it.
        let (_, attrs) = read_row(&conn, StorageMode::Single, "concept", "c1").unwrap().unwrap();
        assert!(attrs.get("age").is_none());
        assert!(attrs.get("description").is_some());
    }

    #[test]
    fn reserved_type_name_is_rejected() {
        let conn = open_in_memory(StorageMode::Multi, true).unwrap();
        let err = ensure_type_table(&conn, StorageMode::Multi, "nodes", &[]).unwrap_err();
        matches!(err, KaybeeError::IllegalArgument(_));
    }

    #[test]
    fn delete_on_missing_table_is_a_no_op() {
        let conn = open_in_memory(StorageMode::Multi, true).unwrap();
        delete_row(&conn, StorageMode::Multi, "nonexistent", "n").unwrap();
    }
}
