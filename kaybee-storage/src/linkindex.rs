//! The link index and resolver (§4.6). Owned exclusively by the node
//! engine — never user-visible for mutation, only for read (`wikilinks`,
//! `links`, `backlinks`, `graph`).

use kaybee_core::config::StorageMode;
use kaybee_core::ident::safe_ident;
use kaybee_core::slugify;
use kaybee_core::wikilinks::extract_wikilinks;
use kaybee_core::KaybeeResult;
use rusqlite::Connection;
use std::collections::HashMap;

/// Resolve a raw wikilink target to an existing node name: exact match
/// first, then (if `fuzzy`) the first node whose canonical form matches.
pub fn resolve(conn: &Connection, fuzzy: bool, raw: &str) -> KaybeeResult<Option<String>> {
    let exact: Option<String> = conn
        .query_row("SELECT name FROM nodes WHERE name = ?1", [raw], |row| row.get(0))
        .ok();
    if exact.is_some() {
        return Ok(exact);
    }
    if !fuzzy {
        return Ok(None);
    }

    let target_slug = slugify(raw);
    let mut stmt = conn.prepare("SELECT name FROM nodes ORDER BY name")?;
    let names: Vec<String> = stmt
        .query_map([], |row| row.get(0))?
        .filter_map(Result::ok)
        .collect();
    Ok(names.into_iter().find(|n| slugify(n) == target_slug))
}

/// Re-derive `name`'s outgoing links from `body` (I3): delete its existing
/// rows, extract every `[[target]]`, dedup on first occurrence, resolve
/// each, and record the first body line the target occurs in as context.
pub fn sync_links(conn: &Connection, fuzzy: bool, name: &str, body: &str) -> KaybeeResult<()> {
    conn.execute("DELETE FROM _links WHERE source = ?1", [name])?;

    let mut seen = std::collections::HashSet::new();
    for target in extract_wikilinks(body) {
        if !seen.insert(target.clone()) {
            continue;
        }
        let resolved = resolve(conn, fuzzy, &target)?;
        let marker = format!("[[{target}]]");
        let context = body
            .lines()
            .find(|line| line.contains(&marker))
            .map(|line| line.trim().to_string())
            .unwrap_or_default();
        conn.execute(
            "INSERT OR REPLACE INTO _links (source, target_raw, target_resolved, context) \
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![name, target, resolved, context],
        )?;
    }
    Ok(())
}

/// Re-resolve every link whose `target_resolved` is currently null or
/// equals `name` (I4) — the dangling set plus links that previously
/// pointed at the node just written/renamed/removed.
pub fn re_resolve_links_to(conn: &Connection, fuzzy: bool, name: &str) -> KaybeeResult<()> {
    let mut stmt = conn.prepare(
        "SELECT source, target_raw FROM _links WHERE target_resolved IS NULL OR target_resolved = ?1",
    )?;
    let rows: Vec<(String, String)> = stmt
        .query_map([name], |row| Ok((row.get(0)?, row.get(1)?)))?
        .filter_map(Result::ok)
        .collect();

    for (source, target_raw) in rows {
        let resolved = resolve(conn, fuzzy, &target_raw)?;
        conn.execute(
            "UPDATE _links SET target_resolved = ?1 WHERE source = ?2 AND target_raw = ?3",
            rusqlite::params![resolved, source, target_raw],
        )?;
    }
    Ok(())
}

/// Raw outgoing targets for `name`, in insertion order.
pub fn wikilinks(conn: &Connection, name: &str) -> KaybeeResult<Vec<String>> {
    let mut stmt = conn.prepare("SELECT target_raw FROM _links WHERE source = ?1 ORDER BY rowid")?;
    let rows = stmt
        .query_map([name], |row| row.get(0))?
        .filter_map(Result::ok)
        .collect();
    Ok(rows)
}

/// `(target_raw, target_resolved)` pairs for `name`'s outgoing links.
pub fn links(conn: &Connection, name: &str) -> KaybeeResult<Vec<(String, Option<String>)>> {
    let mut stmt = conn.prepare(
        "SELECT target_raw, target_resolved FROM _links WHERE source = ?1 ORDER BY rowid",
    )?;
    let rows = stmt
        .query_map([name], |row| Ok((row.get(0)?, row.get(1)?)))?
        .filter_map(Result::ok)
        .collect();
    Ok(rows)
}

/// Sources with a resolved outgoing edge to `name`, plus any untyped
/// symlink node (`ln`) whose `link_target` attribute equals `name`.
pub fn backlinks(conn: &Connection, mode: StorageMode, name: &str) -> KaybeeResult<Vec<String>> {
    let mut stmt = conn.prepare("SELECT source FROM _links WHERE target_resolved = ?1")?;
    let mut out: Vec<String> = stmt
        .query_map([name], |row| row.get(0))?
        .filter_map(Result::ok)
        .collect();

    let symlink_table = match mode {
        StorageMode::Single => "_data".to_string(),
        StorageMode::Multi => safe_ident(kaybee_core::model::IMPLICIT_TYPE),
    };
    let exists: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [&symlink_table],
            |row| row.get(0),
        )
        .unwrap_or(0);
    if exists > 0 {
        let has_col: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM pragma_table_info('{symlink_table}') WHERE name = 'link_target'"),
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);
        if has_col > 0 {
            let sql = if matches!(mode, StorageMode::Single) {
                "SELECT d.name FROM _data d JOIN nodes n ON n.name = d.name \
                 WHERE n.type = 'kaybee' AND d.link_target = ?1"
            } else {
                "SELECT name FROM kaybee WHERE link_target = ?1"
            };
            let mut stmt = conn.prepare(sql)?;
            let symlinks: Vec<String> = stmt
                .query_map([name], |row| row.get(0))?
                .filter_map(Result::ok)
                .collect();
            out.extend(symlinks);
        }
    }
    Ok(out)
}

/// `source -> [resolved targets]` adjacency across every resolved edge.
pub fn graph(conn: &Connection) -> KaybeeResult<HashMap<String, Vec<String>>> {
    let mut stmt =
        conn.prepare("SELECT source, target_resolved FROM _links WHERE target_resolved IS NOT NULL")?;
    let rows: Vec<(String, String)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .filter_map(Result::ok)
        .collect();
    let mut adj: HashMap<String, Vec<String>> = HashMap::new();
    for (src, tgt) in rows {
        adj.entry(src).or_default().push(tgt);
    }
    Ok(adj)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::open_in_memory;

    #[test]
    fn sync_links_dedups_on_first_occurrence() {
        let conn = open_in_memory(StorageMode::Multi, true).unwrap();
        conn.execute("INSERT INTO nodes (name, type) VALUES ('a', 'kaybee')", []).unwrap();
        sync_links(&conn, true, "a", "[[b]] and [[b]] again").unwrap();
        let links = wikilinks(&conn, "a").unwrap();
        assert_eq!(links, vec!["b".to_string()]);
    }

    #[test]
    fn re_resolve_converges_dangling_links_on_target_creation() {
        let conn = open_in_memory(StorageMode::Multi, true).unwrap();
        conn.execute("INSERT INTO nodes (name, type) VALUES ('a', 'kaybee')", []).unwrap();
        sync_links(&conn, true, "a", "[[b]]").unwrap();
        let (raw_links,) = (links(&conn, "a").unwrap(),);
        assert_eq!(raw_links[0].1, None);

        conn.execute("INSERT INTO nodes (name, type) VALUES ('b', 'kaybee')", []).unwrap();
        re_resolve_links_to(&conn, true, "b").unwrap();
        let raw_links = links(&conn, "a").unwrap();
        assert_eq!(raw_links[0].1, Some("b".to_string()));
    }
}
