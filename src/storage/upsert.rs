//! Batched, idempotent upserts keyed by (path, external id).

use rusqlite::types::Value;
use rusqlite::{Connection, ErrorCode};

use super::hierarchy::{level, parent_path};
use super::{quote_ident, TableLayout};
use crate::config::ColumnKind;
use crate::error::{row_preview, SieveError};
use crate::reader::cell::normalize_datetime_text;
use crate::reader::RowRecord;

/// Log a running total every this many rejected rows.
const ERROR_LOG_INTERVAL: u64 = 100;

/// Builds the upsert statement. A repeated key overwrites every mutable
/// column, hierarchy fields included; the parent link is cleared and left to
/// the next resolution pass.
pub(crate) fn upsert_sql(layout: &TableLayout) -> String {
    let mut names: Vec<String> = layout.columns.iter().map(|c| quote_ident(&c.name)).collect();
    names.extend(
        ["level", "parent_path", "parent_external_id", "source_batch", "imported_at"]
            .iter()
            .map(|c| c.to_string()),
    );

    let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{i}")).collect();

    let path = quote_ident(layout.path_column());
    let ext = quote_ident(layout.external_id_column());
    let updates: Vec<String> = names
        .iter()
        .filter(|n| **n != path && **n != ext)
        .map(|n| format!("{n} = excluded.{n}"))
        .collect();

    format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT({path}, {ext}) DO UPDATE SET {}",
        quote_ident(&layout.table),
        names.join(", "),
        placeholders.join(", "),
        updates.join(", ")
    )
}

/// Counters for one writer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UpsertStats {
    pub rows_written: u64,
    pub rows_rejected: u64,
    /// Cells stored as NULL because they did not fit their column kind.
    pub cells_nulled: u64,
    pub batches_committed: u64,
}

/// Accumulates rows and commits them `batch_size` at a time.
///
/// A row failing a constraint is logged and counted without affecting the
/// rest of its batch. Any other write failure, or a failed commit, rolls back
/// that batch and is returned as a destination error.
pub struct BatchWriter<'c> {
    conn: &'c mut Connection,
    layout: &'c TableLayout,
    sql: String,
    source_batch: String,
    imported_at: String,
    batch_size: usize,
    pending: Vec<RowRecord>,
    stats: UpsertStats,
}

impl<'c> BatchWriter<'c> {
    pub fn new(
        conn: &'c mut Connection,
        layout: &'c TableLayout,
        source_batch: &str,
        batch_size: usize,
    ) -> Self {
        Self {
            conn,
            layout,
            sql: upsert_sql(layout),
            source_batch: source_batch.to_string(),
            imported_at: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            batch_size: batch_size.max(1),
            pending: Vec::with_capacity(batch_size.max(1)),
            stats: UpsertStats::default(),
        }
    }

    pub fn push(&mut self, row: RowRecord) -> Result<(), SieveError> {
        self.pending.push(row);
        if self.pending.len() >= self.batch_size {
            self.commit_pending()?;
        }
        Ok(())
    }

    /// Commits whatever is pending. Called at segment ends so that a later
    /// parse failure cannot take already-read rows with it.
    pub fn flush(&mut self) -> Result<(), SieveError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.commit_pending()
    }

    /// Commits the final partial batch and returns the counters.
    pub fn finish(mut self) -> Result<UpsertStats, SieveError> {
        self.flush()?;
        Ok(self.stats)
    }

    pub fn stats(&self) -> UpsertStats {
        self.stats
    }

    fn commit_pending(&mut self) -> Result<(), SieveError> {
        let rows = std::mem::take(&mut self.pending);
        let table = self.layout.table.clone();

        let tx = self
            .conn
            .transaction()
            .map_err(|e| SieveError::destination(&table, format!("failed to begin transaction: {e}")))?;

        {
            let mut stmt = tx
                .prepare_cached(&self.sql)
                .map_err(|e| SieveError::destination(&table, format!("failed to prepare upsert: {e}")))?;

            for row in &rows {
                let (params, nulled) = row_params(self.layout, row, &self.source_batch, &self.imported_at);
                self.stats.cells_nulled += nulled;

                match stmt.execute(rusqlite::params_from_iter(params)) {
                    Ok(_) => self.stats.rows_written += 1,
                    Err(e) if !is_row_error(&e) => {
                        // The store itself is unwritable; the batch rolls back with `tx`.
                        return Err(SieveError::destination(
                            &table,
                            format!("failed to write row {}: {e}", row.row_number + 1),
                        ));
                    }
                    Err(e) => {
                        self.stats.rows_rejected += 1;
                        let err = SieveError::PersistenceConstraint(e.to_string());
                        tracing::warn!(
                            row = row.row_number + 1,
                            preview = %row_preview(&row.cells),
                            "{err}"
                        );
                        if self.stats.rows_rejected % ERROR_LOG_INTERVAL == 0 {
                            tracing::warn!(rejected = self.stats.rows_rejected, "Rows rejected so far");
                        }
                    }
                }
            }
        }

        // Dropping an uncommitted transaction rolls it back.
        tx.commit()
            .map_err(|e| SieveError::destination(&table, format!("failed to commit batch: {e}")))?;
        self.stats.batches_committed += 1;

        tracing::debug!(
            table = %table,
            rows = rows.len(),
            written = self.stats.rows_written,
            "Committed batch"
        );
        Ok(())
    }
}

/// Whether a statement error concerns only the offending row.
///
/// Constraint and type failures reject that row; anything else (read-only
/// database, I/O, full disk, corruption) means nothing can be written.
fn is_row_error(e: &rusqlite::Error) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(failure, _) => matches!(
            failure.code,
            ErrorCode::ConstraintViolation | ErrorCode::TypeMismatch | ErrorCode::TooBig
        ),
        rusqlite::Error::ToSqlConversionFailure(_) => true,
        _ => false,
    }
}

/// Converts one row into statement parameters in `upsert_sql` order.
/// Returns the parameters and the number of cells coerced to NULL.
fn row_params(
    layout: &TableLayout,
    row: &RowRecord,
    source_batch: &str,
    imported_at: &str,
) -> (Vec<Value>, u64) {
    let mut nulled = 0;
    let mut params = Vec::with_capacity(layout.columns.len() + 5);

    for column in &layout.columns {
        let raw = row.at(column.column).trim();
        let value = if column.name == layout.external_id_column() {
            // Part of the key: an absent id is the empty string, never NULL.
            Value::Text(raw.to_string())
        } else if raw.is_empty() {
            Value::Null
        } else {
            match column.kind {
                ColumnKind::Text => Value::Text(raw.to_string()),
                ColumnKind::Integer => match parse_integer(raw) {
                    Some(v) => Value::Integer(v),
                    None => {
                        nulled += 1;
                        Value::Null
                    }
                },
                ColumnKind::Datetime => match normalize_datetime_text(raw) {
                    Some(v) => Value::Text(v),
                    None => {
                        nulled += 1;
                        Value::Null
                    }
                },
            }
        };
        params.push(value);
    }

    let path = row.at(layout.path_column_ref()).trim();
    params.push(Value::Integer(level(path)));
    params.push(parent_path(path).map(Value::Text).unwrap_or(Value::Null));
    params.push(Value::Null);
    params.push(Value::Text(source_batch.to_string()));
    params.push(Value::Text(imported_at.to_string()));

    (params, nulled)
}

/// Parses integer text, accepting integral floats (`"120.0"`).
fn parse_integer(raw: &str) -> Option<i64> {
    raw.parse::<i64>().ok().or_else(|| {
        raw.parse::<f64>()
            .ok()
            .filter(|f| f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15)
            .map(|f| f as i64)
    })
}
