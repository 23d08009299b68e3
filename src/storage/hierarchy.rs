//! Hierarchy Resolver.
//!
//! Level and parent path are pure functions of the path and are written with
//! each row. The parent's external id can only be linked once every record
//! is durable, because children may arrive before their parents; that link
//! is a whole-table pass run after each import.

use rusqlite::Connection;

use super::{quote_ident, TableLayout};
use crate::error::SieveError;

/// Number of non-empty `/`-separated segments.
pub fn level(path: &str) -> i64 {
    path.split('/').filter(|s| !s.is_empty()).count() as i64
}

/// The path without its final segment, or `None` when `level(path) <= 1`.
pub fn parent_path(path: &str) -> Option<String> {
    if level(path) <= 1 {
        return None;
    }
    let trimmed = path.trim_end_matches('/');
    trimmed.rfind('/').map(|cut| trimmed[..cut].to_string())
}

/// Links every record to the external id of the record at its parent path.
///
/// When several records share the parent path, the lowest non-empty external
/// id wins, comparing numerically for digit-only ids (shorter first, then
/// lexicographic). Records whose parent is absent get `NULL`, so the pass can
/// be re-run after any import. Returns the number of records now linked.
pub fn resolve_parent_ids(conn: &Connection, layout: &TableLayout) -> Result<usize, SieveError> {
    let table = quote_ident(&layout.table);
    let path = quote_ident(layout.path_column());
    let ext = quote_ident(layout.external_id_column());

    let sql = format!(
        "UPDATE {table} SET parent_external_id = (
             SELECT p.{ext} FROM {table} AS p
             WHERE p.{path} = {table}.parent_path AND p.{ext} <> ''
             ORDER BY length(p.{ext}), p.{ext}
             LIMIT 1
         )
         WHERE parent_path IS NOT NULL"
    );

    let started = std::time::Instant::now();
    conn.execute(&sql, [])
        .map_err(|e| SieveError::destination(&layout.table, format!("parent resolution failed: {e}")))?;

    let linked: i64 = conn
        .query_row(
            &format!("SELECT COUNT(*) FROM {table} WHERE parent_external_id IS NOT NULL"),
            [],
            |row| row.get(0),
        )
        .map_err(|e| SieveError::destination(&layout.table, e))?;

    tracing::info!(
        linked,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Resolved parent links"
    );
    Ok(linked as usize)
}
