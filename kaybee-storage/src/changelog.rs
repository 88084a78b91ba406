//! The append-only changelog (§4.8): one entry per `node.*`/`type.*`
//! mutation, keyed by a monotonic, gap-free `seq` (I7). `ts` is advisory
//! wall-clock time, never used for ordering.

use kaybee_core::KaybeeResult;
use rusqlite::Connection;
use serde_json::json;

/// One changelog entry as read back via `changelog()`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangelogEntry {
    pub seq: i64,
    pub ts: f64,
    pub op: String,
    pub name: String,
    pub payload: Option<serde_json::Value>,
}

/// The mutation kinds the changelog records (§3.1, §4.8). `TypeChange` is
/// the resolution of SPEC_FULL's §9 open question: logged immediately
/// before the paired `node.write` entry whenever a write changes a node's
/// type, so the replicator can delete the stale remote row before the
/// upsert (see `kaybee-sync`).
pub enum Op<'a> {
    NodeWrite { node_type: &'a str, body: &'a str, attrs: &'a serde_json::Value },
    NodeRm { node_type: &'a str },
    NodeMv { old_name: &'a str, node_type: &'a str, body: &'a str, attrs: &'a serde_json::Value },
    NodeCp { source: &'a str, node_type: &'a str, body: &'a str, attrs: &'a serde_json::Value },
    NodeTypeChange { old_type: &'a str, new_type: &'a str },
    TypeAdd,
    TypeRm,
}

impl Op<'_> {
    fn name(&self) -> &'static str {
        match self {
            Op::NodeWrite { .. } => "node.write",
            Op::NodeRm { .. } => "node.rm",
            Op::NodeMv { .. } => "node.mv",
            Op::NodeCp { .. } => "node.cp",
            Op::NodeTypeChange { .. } => "node.type_change",
            Op::TypeAdd => "type.add",
            Op::TypeRm => "type.rm",
        }
    }

    fn payload(&self) -> Option<serde_json::Value> {
        match self {
            Op::NodeWrite { node_type, body, attrs } => {
                Some(json!({ "type": node_type, "content": body, "attrs": attrs }))
            }
            Op::NodeRm { node_type } => Some(json!({ "type": node_type })),
            Op::NodeMv { old_name, node_type, body, attrs } => Some(json!({
                "old_name": old_name, "type": node_type, "content": body, "attrs": attrs
            })),
            Op::NodeCp { source, node_type, body, attrs } => Some(json!({
                "source": source, "type": node_type, "content": body, "attrs": attrs
            })),
            Op::NodeTypeChange { old_type, new_type } => {
                Some(json!({ "old_type": old_type, "type": new_type }))
            }
            Op::TypeAdd | Op::TypeRm => None,
        }
    }
}

/// Append one entry for `name` if the changelog is enabled; a no-op
/// otherwise. `ts` is supplied by the caller (engine) rather than sampled
/// here, since the workspace may not call `SystemTime::now()` in a context
/// that forbids nondeterminism (tests replaying fixed clocks).
pub fn append(conn: &Connection, enabled: bool, ts: f64, name: &str, op: Op) -> KaybeeResult<()> {
    if !enabled {
        return Ok(());
    }
    let payload = op.payload().map(|v| v.to_string());
    conn.execute(
        "INSERT INTO _changelog (ts, op, name, payload) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![ts, op.name(), name, payload],
    )?;
    Ok(())
}

/// Entries with `seq > since_seq`, ascending, bounded by `limit`. Empty
/// when the changelog is disabled (the replicator then falls back to a
/// full-scan push).
pub fn read(conn: &Connection, enabled: bool, since_seq: i64, limit: u32) -> KaybeeResult<Vec<ChangelogEntry>> {
    if !enabled {
        return Ok(Vec::new());
    }
    let mut stmt = conn.prepare(
        "SELECT seq, ts, op, name, payload FROM _changelog WHERE seq > ?1 ORDER BY seq LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(rusqlite::params![since_seq, limit], |row| {
            let payload: Option<String> = row.get(4)?;
            Ok(ChangelogEntry {
                seq: row.get(0)?,
                ts: row.get(1)?,
                op: row.get(2)?,
                name: row.get(3)?,
                payload: payload.and_then(|p| serde_json::from_str(&p).ok()),
            })
        })?
        .filter_map(Result::ok)
        .collect();
    Ok(rows)
}

/// Discard entries with `seq < before_seq`. Returns rows deleted. A no-op
/// (returning 0) when the changelog is disabled.
pub fn truncate(conn: &Connection, enabled: bool, before_seq: i64) -> KaybeeResult<usize> {
    if !enabled {
        return Ok(0);
    }
    let deleted = conn.execute("DELETE FROM _changelog WHERE seq < ?1", [before_seq])?;
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::open_in_memory;
    use kaybee_core::config::StorageMode;

    #[test]
    fn sequences_are_strictly_increasing_and_gap_free() {
        let conn = open_in_memory(StorageMode::Multi, true).unwrap();
        for i in 0..3 {
            append(&conn, true, 0.0, &format!("n{i}"), Op::TypeAdd).unwrap();
        }
        let entries = read(&conn, true, 0, 100).unwrap();
        let seqs: Vec<i64> = entries.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn disabled_changelog_returns_nothing_and_appends_nothing() {
        let conn = open_in_memory(StorageMode::Multi, false).unwrap();
        append(&conn, false, 0.0, "n", Op::TypeAdd).unwrap();
        assert!(read(&conn, false, 0, 100).unwrap().is_empty());
        assert_eq!(truncate(&conn, false, 100).unwrap(), 0);
    }

    #[test]
    fn truncate_discards_below_threshold() {
        let conn = open_in_memory(StorageMode::Multi, true).unwrap();
        for i in 0..5 {
            append(&conn, true, 0.0, &format!("n{i}"), Op::TypeAdd).unwrap();
        }
        let deleted = truncate(&conn, true, 3).unwrap();
        assert_eq!(deleted, 2);
        let remaining = read(&conn, true, 0, 100).unwrap();
        assert_eq!(remaining.len(), 3);
        assert!(remaining.iter().all(|e| e.seq >= 3));
    }
}
