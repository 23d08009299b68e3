//! Persistence Layer and Hierarchy Resolver over a local SQLite database.
//!
//! A run drops secondary indexes, streams every source through a
//! [`BatchWriter`], then calls [`Store::finish_import`] once to rebuild
//! indexes, link parents and recreate views, in that order.

mod database;
pub mod hierarchy;
mod upsert;
mod views;

use std::path::Path;

use rusqlite::Connection;

pub use database::{ensure_table, open_connection};
pub use hierarchy::{level, parent_path, resolve_parent_ids};
pub use upsert::{BatchWriter, UpsertStats};
pub use views::{create_indexes, drop_indexes, rebuild_views, view_suffix};

use crate::config::{SieveConfig, StoreColumn};
use crate::error::SieveError;
use crate::reader::ColumnRef;

/// Quotes an SQL identifier.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// The configured table and where its role columns sit.
#[derive(Debug, Clone)]
pub struct TableLayout {
    pub table: String,
    pub columns: Vec<StoreColumn>,
    path: usize,
    external_id: usize,
    size: usize,
    status: usize,
}

impl TableLayout {
    pub fn from_config(config: &SieveConfig) -> Result<Self, SieveError> {
        let store = &config.store;
        let find = |column: ColumnRef, role: &str| {
            store
                .columns
                .iter()
                .position(|c| c.column == column)
                .ok_or_else(|| {
                    SieveError::Config(format!("store.columns has no column read from {column} ({role})"))
                })
        };

        let status = store
            .columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(&store.status_column))
            .ok_or_else(|| {
                SieveError::Config(format!(
                    "store.status_column '{}' is not a stored column",
                    store.status_column
                ))
            })?;

        Ok(Self {
            table: store.table.clone(),
            columns: store.columns.clone(),
            path: find(config.columns.path, "path")?,
            external_id: find(config.columns.external_id, "external_id")?,
            size: find(config.columns.size, "size")?,
            status,
        })
    }

    pub fn path_column(&self) -> &str {
        &self.columns[self.path].name
    }

    pub fn path_column_ref(&self) -> ColumnRef {
        self.columns[self.path].column
    }

    pub fn external_id_column(&self) -> &str {
        &self.columns[self.external_id].name
    }

    pub fn size_column(&self) -> &str {
        &self.columns[self.size].name
    }

    pub fn status_column(&self) -> &str {
        &self.columns[self.status].name
    }
}

/// What the post-load rebuild did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildReport {
    pub indexes: usize,
    pub linked: usize,
    pub views: usize,
}

/// One `import_log` row.
#[derive(Debug, Clone)]
pub struct ImportLogEntry {
    pub run_id: String,
    pub source_batch: String,
    pub source_path: String,
    pub rows_read: u64,
    pub rows_inserted: u64,
    pub rows_updated: u64,
    pub errors: u64,
    pub started_at: String,
    pub finished_at: String,
}

/// The single writer connection for a run.
pub struct Store {
    conn: Connection,
    layout: TableLayout,
    batch_size: usize,
}

impl Store {
    /// Opens the database file and makes sure the import table exists.
    pub fn open(path: &Path, layout: TableLayout, batch_size: usize) -> Result<Self, SieveError> {
        let conn = open_connection(path)?;
        Self::with_connection(conn, layout, batch_size)
    }

    /// Wraps an already configured and migrated connection.
    pub fn with_connection(
        conn: Connection,
        layout: TableLayout,
        batch_size: usize,
    ) -> Result<Self, SieveError> {
        ensure_table(&conn, &layout)?;
        Ok(Self {
            conn,
            layout,
            batch_size,
        })
    }

    pub fn layout(&self) -> &TableLayout {
        &self.layout
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn record_count(&self) -> Result<u64, SieveError> {
        let count: i64 = self
            .conn
            .query_row(
                &format!("SELECT COUNT(*) FROM {}", quote_ident(&self.layout.table)),
                [],
                |row| row.get(0),
            )
            .map_err(|e| SieveError::destination(&self.layout.table, e))?;
        Ok(count as u64)
    }

    /// Drops secondary indexes ahead of a bulk load.
    pub fn begin_bulk_load(&self) -> Result<usize, SieveError> {
        drop_indexes(&self.conn, &self.layout)
    }

    /// Starts a batch writer tagging rows with `source_batch`.
    pub fn writer(&mut self, source_batch: &str) -> BatchWriter<'_> {
        BatchWriter::new(&mut self.conn, &self.layout, source_batch, self.batch_size)
    }

    /// Rebuilds indexes, resolves parent links and recreates views.
    ///
    /// Indexes come first so the parent self-join can use the path index.
    pub fn finish_import(&self) -> Result<RebuildReport, SieveError> {
        let indexes = create_indexes(&self.conn, &self.layout)?;
        let linked = resolve_parent_ids(&self.conn, &self.layout)?;
        let views = rebuild_views(&self.conn, &self.layout)?;
        Ok(RebuildReport {
            indexes,
            linked,
            views,
        })
    }

    pub fn log_import(&self, entry: &ImportLogEntry) -> Result<(), SieveError> {
        self.conn
            .execute(
                r#"
                INSERT INTO import_log (run_id, source_batch, source_path, rows_read, rows_inserted,
                                        rows_updated, errors, started_at, finished_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
                rusqlite::params![
                    entry.run_id,
                    entry.source_batch,
                    entry.source_path,
                    entry.rows_read as i64,
                    entry.rows_inserted as i64,
                    entry.rows_updated as i64,
                    entry.errors as i64,
                    entry.started_at,
                    entry.finished_at,
                ],
            )
            .map_err(|e| SieveError::destination("import_log", e))?;
        Ok(())
    }
}
