use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Maximum characters kept per cell in a row preview.
pub(crate) const PREVIEW_CELL_CHARS: usize = 50;

/// Maximum cells included in a row preview.
pub(crate) const PREVIEW_CELLS: usize = 3;

/// Builds a short, truncated preview of a row for log lines.
///
/// Only the first few cells are shown and long values are cut, so a
/// mis-parsed free-text row cannot flood the log.
pub(crate) fn row_preview(cells: &[String]) -> String {
    cells
        .iter()
        .take(PREVIEW_CELLS)
        .map(|cell| {
            if cell.chars().count() > PREVIEW_CELL_CHARS {
                let cut: String = cell.chars().take(PREVIEW_CELL_CHARS).collect();
                format!("{cut}...")
            } else {
                cell.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Failure categories tracked in batch and run reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SourceOpen,
    SegmentParse,
    RowCoercion,
    AnomalousStatus,
    PersistenceConstraint,
    DestinationIo,
    Config,
    Internal,
}

impl ErrorKind {
    /// Returns the stable name used in summaries.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::SourceOpen => "source_open",
            ErrorKind::SegmentParse => "segment_parse",
            ErrorKind::RowCoercion => "row_coercion",
            ErrorKind::AnomalousStatus => "anomalous_status",
            ErrorKind::PersistenceConstraint => "persistence_constraint",
            ErrorKind::DestinationIo => "destination_io",
            ErrorKind::Config => "config",
            ErrorKind::Internal => "internal",
        }
    }

    /// Returns true if an error of this kind must stop the whole run.
    pub fn is_fatal_for_run(&self) -> bool {
        matches!(
            self,
            ErrorKind::DestinationIo | ErrorKind::Config | ErrorKind::Internal
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum SieveError {
    // ── Reading ───────────────────────────────────────────────────────────────
    #[error("Cannot open source {source_id}: {reason}")]
    SourceOpen { source_id: String, reason: String },

    #[error("Cannot parse segment '{segment}': {reason}")]
    SegmentParse { segment: String, reason: String },

    #[error("Column {column} value '{value}' is not numeric")]
    RowCoercion { column: String, value: String },

    // ── Persistence ───────────────────────────────────────────────────────────
    #[error("Row rejected by store: {0}")]
    PersistenceConstraint(String),

    #[error("Cannot write destination {path}: {reason}")]
    DestinationIo { path: String, reason: String },

    // ── Setup ─────────────────────────────────────────────────────────────────
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SieveError {
    /// Shorthand for a destination failure on a path-like target.
    pub fn destination(path: impl fmt::Display, reason: impl fmt::Display) -> Self {
        SieveError::DestinationIo {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Returns the report category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SieveError::SourceOpen { .. } => ErrorKind::SourceOpen,
            SieveError::SegmentParse { .. } => ErrorKind::SegmentParse,
            SieveError::RowCoercion { .. } => ErrorKind::RowCoercion,
            SieveError::PersistenceConstraint(_) => ErrorKind::PersistenceConstraint,
            SieveError::DestinationIo { .. } => ErrorKind::DestinationIo,
            SieveError::Config(_) => ErrorKind::Config,
            SieveError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns true if this error must abort the run rather than a single
    /// source, segment or row.
    pub fn is_fatal(&self) -> bool {
        self.kind().is_fatal_for_run()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Returns one instance of every SieveError variant.
    fn all_variants() -> Vec<SieveError> {
        vec![
            SieveError::SourceOpen {
                source_id: "report.xlsx".into(),
                reason: "zip header missing".into(),
            },
            SieveError::SegmentParse {
                segment: "Transfer Report 2".into(),
                reason: "unexpected eof".into(),
            },
            SieveError::RowCoercion {
                column: "B".into(),
                value: "n/a".into(),
            },
            SieveError::PersistenceConstraint("NOT NULL constraint failed".into()),
            SieveError::destination("/tmp/out.csv", "disk full"),
            SieveError::Config("batch_size must be positive".into()),
            SieveError::Internal("task panicked".into()),
        ]
    }

    #[test]
    fn only_destination_and_setup_errors_are_fatal() {
        for variant in all_variants() {
            let expected = matches!(
                variant,
                SieveError::DestinationIo { .. } | SieveError::Config(_) | SieveError::Internal(_)
            );
            assert_eq!(variant.is_fatal(), expected, "fatality mismatch for {:?}", variant);
        }
    }

    #[test]
    fn all_variants_have_nonempty_messages_and_kind_names() {
        for variant in all_variants() {
            assert!(!variant.to_string().trim().is_empty(), "{:?}", variant);
            assert!(!variant.kind().as_str().is_empty());
        }
    }

    #[test]
    fn row_preview_truncates_cells_and_count() {
        let long = "x".repeat(80);
        let cells = vec![long.clone(), "b".into(), "c".into(), "d".into()];
        let preview = row_preview(&cells);

        assert!(preview.starts_with(&format!("{}...", "x".repeat(50))));
        assert!(preview.ends_with(", b, c"));
        assert!(!preview.contains('d'));
    }

    #[test]
    fn row_preview_of_empty_row_is_empty() {
        assert_eq!(row_preview(&[]), "");
    }
}
