//! SQLite connection setup and schema management.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;

use super::{quote_ident, TableLayout};
use crate::error::SieveError;

/// Current version of the bookkeeping schema. Increment when adding migrations.
pub(crate) const SCHEMA_VERSION: i32 = 1;

/// V1 schema: one row per imported source.
const V1_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS import_log (
    id INTEGER PRIMARY KEY,
    run_id TEXT NOT NULL,
    source_batch TEXT NOT NULL,
    source_path TEXT NOT NULL,
    rows_read INTEGER NOT NULL,
    rows_inserted INTEGER NOT NULL,
    rows_updated INTEGER NOT NULL,
    errors INTEGER NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_import_log_run_id ON import_log(run_id);
"#;

/// Opens (creating if needed) the database file and prepares it for import.
pub fn open_connection(path: &Path) -> Result<Connection, SieveError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            SieveError::destination(path.display(), format!("failed to create database directory: {e}"))
        })?;
    }

    let mut conn = Connection::open(path)
        .map_err(|e| SieveError::destination(path.display(), format!("failed to open database: {e}")))?;

    configure_connection(&conn)?;
    run_migrations(&mut conn)?;
    Ok(conn)
}

/// Configures connection for bulk loading.
pub(crate) fn configure_connection(conn: &Connection) -> Result<(), SieveError> {
    conn.busy_timeout(Duration::from_secs(30))
        .map_err(|e| SieveError::Internal(format!("Failed to set busy timeout: {e}")))?;

    // In-memory databases report "memory" and ignore the WAL request.
    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(|e| SieveError::Internal(format!("Failed to set WAL mode: {e}")))?;
    conn.pragma_update(None, "synchronous", "NORMAL")
        .map_err(|e| SieveError::Internal(format!("Failed to set synchronous mode: {e}")))?;
    conn.pragma_update(None, "temp_store", "MEMORY")
        .map_err(|e| SieveError::Internal(format!("Failed to set temp store: {e}")))?;

    Ok(())
}

/// Runs bookkeeping migrations using PRAGMA user_version.
pub(crate) fn run_migrations(conn: &mut Connection) -> Result<(), SieveError> {
    let current_version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(|e| SieveError::Internal(format!("Failed to get schema version: {e}")))?;

    if current_version >= SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn
        .transaction()
        .map_err(|e| SieveError::Internal(format!("Failed to start migration transaction: {e}")))?;

    if current_version < 1 {
        tx.execute_batch(V1_SCHEMA)
            .map_err(|e| SieveError::Internal(format!("V1 migration failed: {e}")))?;
    }

    tx.pragma_update(None, "user_version", SCHEMA_VERSION)
        .map_err(|e| SieveError::Internal(format!("Failed to update schema version: {e}")))?;

    tx.commit()
        .map_err(|e| SieveError::Internal(format!("Failed to commit migration: {e}")))?;

    Ok(())
}

/// Builds the `CREATE TABLE` statement for the configured layout.
pub(crate) fn create_table_sql(layout: &TableLayout) -> String {
    let mut defs = vec!["id INTEGER PRIMARY KEY".to_string()];

    for column in &layout.columns {
        let name = quote_ident(&column.name);
        let ty = column.kind.sql_type();
        let def = if column.name == layout.path_column() {
            format!("{name} {ty} NOT NULL")
        } else if column.name == layout.external_id_column() {
            format!("{name} {ty} NOT NULL DEFAULT ''")
        } else {
            format!("{name} {ty}")
        };
        defs.push(def);
    }

    defs.extend([
        "level INTEGER NOT NULL".to_string(),
        "parent_path TEXT".to_string(),
        "parent_external_id TEXT".to_string(),
        "source_batch TEXT NOT NULL".to_string(),
        "imported_at TEXT".to_string(),
        format!(
            "UNIQUE({}, {})",
            quote_ident(layout.path_column()),
            quote_ident(layout.external_id_column())
        ),
    ]);

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        quote_ident(&layout.table),
        defs.join(",\n    ")
    )
}

/// Creates the import table, or adds configured columns missing from an
/// existing one.
pub fn ensure_table(conn: &Connection, layout: &TableLayout) -> Result<(), SieveError> {
    conn.execute_batch(&create_table_sql(layout))
        .map_err(|e| SieveError::destination(&layout.table, format!("failed to create table: {e}")))?;

    let existing = existing_columns(conn, &layout.table)?;
    for column in &layout.columns {
        if existing.contains(&column.name.to_ascii_lowercase()) {
            continue;
        }
        // Key columns cannot be added after the fact; the unique constraint
        // would not cover them.
        if column.name == layout.path_column() || column.name == layout.external_id_column() {
            return Err(SieveError::Config(format!(
                "table {} exists without key column {}",
                layout.table, column.name
            )));
        }

        conn.execute_batch(&format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            quote_ident(&layout.table),
            quote_ident(&column.name),
            column.kind.sql_type()
        ))
        .map_err(|e| SieveError::destination(&layout.table, format!("failed to add column: {e}")))?;

        tracing::info!(table = %layout.table, column = %column.name, "Added missing column");
    }

    Ok(())
}

fn existing_columns(conn: &Connection, table: &str) -> Result<HashSet<String>, SieveError> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({})", quote_ident(table)))
        .map_err(|e| SieveError::destination(table, e))?;

    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .map_err(|e| SieveError::destination(table, e))?
        .collect::<Result<HashSet<_>, _>>()
        .map_err(|e| SieveError::destination(table, e))?;

    Ok(names.into_iter().map(|n| n.to_ascii_lowercase()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SieveConfig;
    use tempfile::TempDir;

    fn layout() -> TableLayout {
        TableLayout::from_config(&SieveConfig::default()).expect("default layout")
    }

    #[test]
    fn open_creates_file_and_bookkeeping() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("nested").join("import.db");

        let conn = open_connection(&db_path).expect("Failed to open database");
        assert!(db_path.exists(), "Database file should exist");

        let version: i32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .expect("Failed to get version");
        assert_eq!(version, SCHEMA_VERSION);

        let journal_mode: String = conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .expect("Failed to get journal mode");
        assert_eq!(journal_mode.to_lowercase(), "wal");

        // Opening again must not re-run migrations.
        drop(conn);
        open_connection(&db_path).expect("Second open should succeed");
    }

    #[test]
    fn table_has_key_and_hierarchy_columns() {
        let conn = Connection::open_in_memory().expect("Failed to open db");
        let layout = layout();
        ensure_table(&conn, &layout).expect("Failed to create table");
        ensure_table(&conn, &layout).expect("Table creation should be idempotent");

        let columns = existing_columns(&conn, &layout.table).expect("table info");
        for expected in [
            "file_name",
            "target_file_id",
            "level",
            "parent_path",
            "parent_external_id",
            "source_batch",
            "imported_at",
        ] {
            assert!(columns.contains(expected), "missing {expected}");
        }
    }

    #[test]
    fn missing_columns_are_added() {
        let conn = Connection::open_in_memory().expect("Failed to open db");
        let mut config = SieveConfig::default();
        config.store.columns.truncate(5);
        config.store.status_column = "file_name".into();
        let narrow = TableLayout::from_config(&config).expect("narrow layout");
        ensure_table(&conn, &narrow).expect("Failed to create table");

        let full = layout();
        ensure_table(&conn, &full).expect("Failed to widen table");

        let columns = existing_columns(&conn, &full.table).expect("table info");
        assert!(columns.contains("translated_file_name"));
    }
}
