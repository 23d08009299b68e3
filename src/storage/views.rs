//! Secondary indexes and derived read-only views.
//!
//! Indexes are dropped before a bulk load and rebuilt once afterwards. Views
//! are dropped and recreated on every rebuild so the per-status views track
//! the statuses currently in the table.

use std::collections::HashSet;

use rusqlite::Connection;

use super::{quote_ident, TableLayout};
use crate::classify::sanitize_status;
use crate::error::SieveError;

/// Recursion guard for the hierarchy view. Ids are only unique together with
/// the path, so a cycle through reused ids is possible in bad data.
const MAX_TREE_DEPTH: u32 = 256;

fn index_name(layout: &TableLayout, column: &str) -> String {
    format!("idx_{}_{}", layout.table, column)
}

/// Columns that get a secondary index.
fn indexed_columns(layout: &TableLayout) -> Vec<String> {
    let mut columns: Vec<String> = [
        layout.path_column(),
        layout.external_id_column(),
        "parent_path",
        "parent_external_id",
        "level",
        layout.status_column(),
        layout.size_column(),
        "source_batch",
    ]
    .iter()
    .map(|c| c.to_string())
    .collect();
    let mut seen = HashSet::new();
    columns.retain(|c| seen.insert(c.clone()));
    columns
}

pub fn drop_indexes(conn: &Connection, layout: &TableLayout) -> Result<usize, SieveError> {
    let columns = indexed_columns(layout);
    for column in &columns {
        conn.execute_batch(&format!(
            "DROP INDEX IF EXISTS {}",
            quote_ident(&index_name(layout, column))
        ))
        .map_err(|e| SieveError::destination(&layout.table, format!("failed to drop index: {e}")))?;
    }
    tracing::debug!(table = %layout.table, count = columns.len(), "Dropped indexes");
    Ok(columns.len())
}

pub fn create_indexes(conn: &Connection, layout: &TableLayout) -> Result<usize, SieveError> {
    let started = std::time::Instant::now();
    let columns = indexed_columns(layout);
    for column in &columns {
        conn.execute_batch(&format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
            quote_ident(&index_name(layout, column)),
            quote_ident(&layout.table),
            quote_ident(column)
        ))
        .map_err(|e| SieveError::destination(&layout.table, format!("failed to create index: {e}")))?;
    }
    tracing::info!(
        table = %layout.table,
        count = columns.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Created indexes"
    );
    Ok(columns.len())
}

/// Turns a status value into a view-name suffix (`Match Exists` -> `match_exists`).
///
/// Uses the same sanitizing as status destinations, with `-` mapped to `_`.
pub fn view_suffix(status: &str) -> String {
    let sanitized = sanitize_status(status).replace('-', "_");
    if sanitized.is_empty() {
        "unknown".to_string()
    } else {
        sanitized
    }
}

fn existing_status_views(conn: &Connection) -> Result<Vec<String>, SieveError> {
    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type = 'view' AND name LIKE 'by\\_status\\_%' ESCAPE '\\'")
        .map_err(|e| SieveError::destination("views", e))?;
    let names = stmt
        .query_map([], |row| row.get(0))
        .map_err(|e| SieveError::destination("views", e))?
        .collect::<Result<Vec<String>, _>>()
        .map_err(|e| SieveError::destination("views", e))?;
    Ok(names)
}

fn distinct_statuses(conn: &Connection, layout: &TableLayout) -> Result<Vec<String>, SieveError> {
    let status = quote_ident(layout.status_column());
    let mut stmt = conn
        .prepare(&format!(
            "SELECT DISTINCT CAST({status} AS TEXT) FROM {} WHERE {status} IS NOT NULL AND trim({status}) <> '' ORDER BY 1",
            quote_ident(&layout.table)
        ))
        .map_err(|e| SieveError::destination(&layout.table, e))?;
    let values = stmt
        .query_map([], |row| row.get(0))
        .map_err(|e| SieveError::destination(&layout.table, e))?
        .collect::<Result<Vec<String>, _>>()
        .map_err(|e| SieveError::destination(&layout.table, e))?;
    Ok(values)
}

/// Drops and recreates all derived views. Returns the number of views.
pub fn rebuild_views(conn: &Connection, layout: &TableLayout) -> Result<usize, SieveError> {
    let table = quote_ident(&layout.table);
    let size = quote_ident(layout.size_column());
    let status = quote_ident(layout.status_column());
    let path = quote_ident(layout.path_column());
    let ext = quote_ident(layout.external_id_column());

    let mut statements = Vec::new();
    for view in ["files_view", "folders_view", "status_summary", "hierarchy_tree"] {
        statements.push(format!("DROP VIEW IF EXISTS {view}"));
    }
    for view in existing_status_views(conn)? {
        statements.push(format!("DROP VIEW IF EXISTS {}", quote_ident(&view)));
    }

    statements.push(format!(
        "CREATE VIEW files_view AS SELECT * FROM {table} WHERE {size} > 0"
    ));
    statements.push(format!(
        "CREATE VIEW folders_view AS SELECT * FROM {table} WHERE {size} = 0 OR {size} IS NULL"
    ));
    statements.push(format!(
        "CREATE VIEW status_summary AS
         SELECT COALESCE({status}, 'Unknown') AS status_name,
                COUNT(*) AS record_count,
                COUNT(CASE WHEN {size} > 0 THEN 1 END) AS file_count,
                COUNT(CASE WHEN {size} = 0 OR {size} IS NULL THEN 1 END) AS folder_count
         FROM {table}
         GROUP BY COALESCE({status}, 'Unknown')
         ORDER BY record_count DESC"
    ));
    statements.push(format!(
        "CREATE VIEW hierarchy_tree AS
         WITH RECURSIVE tree(id, path, external_id, parent_external_id, level, depth, trail) AS (
             SELECT id, {path}, {ext}, parent_external_id, level, 0, {path}
             FROM {table}
             WHERE parent_external_id IS NULL
             UNION ALL
             SELECT t.id, t.{path}, t.{ext}, t.parent_external_id, t.level, tree.depth + 1,
                    tree.trail || ' > ' || t.{path}
             FROM {table} AS t
             JOIN tree ON t.parent_external_id = tree.external_id AND t.parent_path = tree.path
             WHERE tree.depth < {MAX_TREE_DEPTH}
         )
         SELECT * FROM tree ORDER BY trail"
    ));

    let mut created = 4;
    let mut seen = HashSet::new();
    for value in distinct_statuses(conn, layout)? {
        let name = format!("by_status_{}", view_suffix(&value));
        // Different raw values may share a suffix; the first one keeps it.
        if !seen.insert(name.clone()) {
            continue;
        }
        statements.push(format!(
            "CREATE VIEW {} AS SELECT * FROM {table} WHERE {status} = '{}'",
            quote_ident(&name),
            value.replace('\'', "''")
        ));
        created += 1;
    }

    for sql in &statements {
        conn.execute_batch(sql)
            .map_err(|e| SieveError::destination(&layout.table, format!("failed to rebuild views: {e}")))?;
    }

    tracing::info!(table = %layout.table, views = created, "Rebuilt views");
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_suffixes() {
        assert_eq!(view_suffix("Match Exists"), "match_exists");
        assert_eq!(view_suffix("success"), "success");
        assert_eq!(view_suffix("  --failed!! "), "failed");
        assert_eq!(view_suffix("%%"), "unknown");
    }

    #[test]
    fn view_suffix_matches_status_destination_names() {
        for raw in ["Match Exists", "Error: timed out", "Ünïcode ok", "in_progress"] {
            assert_eq!(view_suffix(raw), sanitize_status(raw).replace('-', "_"), "{raw}");
        }
        assert_eq!(view_suffix("Ünïcode ok"), "ncode_ok");
    }
}
