//! Connection opening, PRAGMA setup, and the common + per-mode schema DDL
//! (§6.3). Mode is stamped into `PRAGMA user_version`: 1 = multi, 2 =
//! single, 0 = fresh/unstamped (accepts either mode, per `core.py`'s
//! `_init_schema`).

use std::path::Path;

use kaybee_core::config::StorageMode;
use kaybee_core::{KaybeeError, KaybeeResult};
use rusqlite::Connection;

const USER_VERSION_MULTI: u32 = 1;
const USER_VERSION_SINGLE: u32 = 2;

const SCHEMA_SQL_COMMON: &str = "
CREATE TABLE IF NOT EXISTS nodes (
    name TEXT PRIMARY KEY,
    type TEXT NOT NULL DEFAULT 'kaybee'
);
CREATE INDEX IF NOT EXISTS idx_nodes_type ON nodes(type);

CREATE TABLE IF NOT EXISTS _types (
    type_name TEXT PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS _links (
    source TEXT NOT NULL,
    target_raw TEXT NOT NULL,
    target_resolved TEXT,
    context TEXT,
    PRIMARY KEY (source, target_raw)
);
CREATE INDEX IF NOT EXISTS idx_links_target ON _links(target_resolved);
";

const SCHEMA_SQL_MULTI: &str = "
CREATE TABLE IF NOT EXISTS kaybee (
    name TEXT PRIMARY KEY,
    content TEXT DEFAULT ''
);
";

const SCHEMA_SQL_SINGLE: &str = "
CREATE TABLE IF NOT EXISTS _data (
    name TEXT PRIMARY KEY,
    content TEXT DEFAULT ''
);

CREATE TABLE IF NOT EXISTS _type_fields (
    type_name TEXT NOT NULL,
    field_name TEXT NOT NULL,
    PRIMARY KEY (type_name, field_name)
);
";

fn expected_version(mode: StorageMode) -> u32 {
    match mode {
        StorageMode::Multi => USER_VERSION_MULTI,
        StorageMode::Single => USER_VERSION_SINGLE,
    }
}

fn mode_label(version: u32) -> &'static str {
    if version == USER_VERSION_SINGLE {
        "single"
    } else {
        "multi"
    }
}

/// Open (and, on first use, initialize) a store at `path`, stamping or
/// verifying its physical mode. `changelog` controls whether the
/// `_changelog` table is created (§4.8) — disabling it later does not drop
/// an already-created table, it simply stops appends.
pub fn open(path: &Path, mode: StorageMode, changelog: bool) -> KaybeeResult<Connection> {
    let conn = Connection::open(path)?;
    init(&conn, mode, changelog)?;
    Ok(conn)
}

/// Open an in-memory store (tests, scratch sessions).
pub fn open_in_memory(mode: StorageMode, changelog: bool) -> KaybeeResult<Connection> {
    let conn = Connection::open_in_memory()?;
    init(&conn, mode, changelog)?;
    Ok(conn)
}

fn init(conn: &Connection, mode: StorageMode, changelog: bool) -> KaybeeResult<()> {
    conn.pragma_update(None, "journal_mode", "WAL").ok();
    conn.pragma_update(None, "foreign_keys", "ON")?;

    let expected = expected_version(mode);
    let current: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if current != 0 && current != expected {
        return Err(KaybeeError::ModeMismatch {
            requested: mode.as_str().to_string(),
            stamped: mode_label(current).to_string(),
        });
    }

    conn.execute_batch(SCHEMA_SQL_COMMON)?;
    match mode {
        StorageMode::Multi => conn.execute_batch(SCHEMA_SQL_MULTI)?,
        StorageMode::Single => conn.execute_batch(SCHEMA_SQL_SINGLE)?,
    }

    conn.pragma_update(None, "user_version", expected)?;

    if changelog {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS _changelog (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                ts REAL NOT NULL,
                op TEXT NOT NULL,
                name TEXT NOT NULL,
                payload TEXT
            );",
        )?;
    }

    Ok(())
}
