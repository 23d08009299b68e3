//! Row Stream Reader: turns workbook sheets into dense row records.
//!
//! Everything downstream depends only on [`SegmentReader`] and [`RowRecord`];
//! the two strategies ([`StreamingWorkbook`], [`BufferedWorkbook`]) are
//! interchangeable and yield the same rows for the same sheet.

pub mod buffered;
pub mod cell;
pub mod column;
pub mod row;
pub mod streaming;

use std::path::Path;

use serde::Deserialize;

pub use buffered::BufferedWorkbook;
pub use column::{column_index, column_letters, parse_cell_reference, ColumnRef};
pub use row::{RowAssembler, RowRecord, SparseCell};
pub use streaming::StreamingWorkbook;

use crate::error::SieveError;

/// Lazy, forward-only rows of one segment.
pub type RowStream<'a> = Box<dyn Iterator<Item = Result<RowRecord, SieveError>> + 'a>;

/// A source made of named segments (sheets).
pub trait SegmentReader {
    /// All segment names in workbook order.
    fn segment_names(&self) -> Vec<String>;

    /// Opens one segment for a single forward pass.
    fn rows<'a>(&'a mut self, segment: &str) -> Result<RowStream<'a>, SieveError>;
}

/// How a source is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadStrategy {
    /// Streaming where the format allows it, buffered otherwise.
    #[default]
    Auto,
    Streaming,
    Buffered,
}

/// Spreadsheet file extensions accepted as sources.
const SPREADSHEET_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xls", "xlsb", "ods"];

/// Extensions whose sheets can be streamed cell by cell.
const STREAMABLE_EXTENSIONS: &[&str] = &["xlsx", "xlsm"];

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Returns true if the file looks like a readable workbook.
///
/// Office lock files (`~$Book.xlsx`) are rejected.
pub fn is_spreadsheet(path: &Path) -> bool {
    let lock_file = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('~'));

    !lock_file
        && extension_of(path).is_some_and(|ext| SPREADSHEET_EXTENSIONS.contains(&ext.as_str()))
}

/// Opens a source with the requested strategy.
pub fn open_source(
    path: &Path,
    strategy: ReadStrategy,
) -> Result<Box<dyn SegmentReader>, SieveError> {
    if !is_spreadsheet(path) {
        return Err(SieveError::SourceOpen {
            source_id: path.display().to_string(),
            reason: "not a supported spreadsheet file".into(),
        });
    }

    let streamable = extension_of(path)
        .is_some_and(|ext| STREAMABLE_EXTENSIONS.contains(&ext.as_str()));

    match strategy {
        ReadStrategy::Auto if streamable => Ok(Box::new(StreamingWorkbook::open(path)?)),
        ReadStrategy::Streaming => {
            if !streamable {
                return Err(SieveError::SourceOpen {
                    source_id: path.display().to_string(),
                    reason: "streaming is only available for .xlsx/.xlsm".into(),
                });
            }
            Ok(Box::new(StreamingWorkbook::open(path)?))
        }
        ReadStrategy::Auto | ReadStrategy::Buffered => Ok(Box::new(BufferedWorkbook::open(path)?)),
    }
}

/// Returns the segments of `reader` whose name starts with `prefix`, in order.
pub fn matching_segments(reader: &dyn SegmentReader, prefix: &str) -> Vec<String> {
    reader
        .segment_names()
        .into_iter()
        .filter(|name| name.starts_with(prefix))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct Named(Vec<&'static str>);

    impl SegmentReader for Named {
        fn segment_names(&self) -> Vec<String> {
            self.0.iter().map(|s| s.to_string()).collect()
        }

        fn rows<'a>(&'a mut self, _segment: &str) -> Result<RowStream<'a>, SieveError> {
            Ok(Box::new(std::iter::empty()))
        }
    }

    #[test]
    fn prefix_filter_keeps_order() {
        let reader = Named(vec![
            "Summary",
            "Transfer Report",
            "Errors",
            "Transfer Report (2)",
        ]);
        assert_eq!(
            matching_segments(&reader, "Transfer Report"),
            vec!["Transfer Report", "Transfer Report (2)"]
        );
    }

    #[test]
    fn spreadsheet_detection() {
        assert!(is_spreadsheet(&PathBuf::from("a/Job 1.xlsx")));
        assert!(is_spreadsheet(&PathBuf::from("JOB.XLS")));
        assert!(!is_spreadsheet(&PathBuf::from("~$Job.xlsx")));
        assert!(!is_spreadsheet(&PathBuf::from("notes.csv")));
        assert!(!is_spreadsheet(&PathBuf::from("noext")));
    }

    #[test]
    fn unreadable_workbook_is_a_source_open_error() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("broken.xlsx");
        std::fs::write(&path, b"not a zip archive").expect("Failed to write file");

        for strategy in [ReadStrategy::Auto, ReadStrategy::Streaming, ReadStrategy::Buffered] {
            let err = open_source(&path, strategy).err().expect("open should fail");
            assert!(
                matches!(err, SieveError::SourceOpen { .. }),
                "unexpected error {:?}",
                err
            );
        }
    }

    #[test]
    fn streaming_rejects_legacy_formats() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("legacy.xls");
        std::fs::write(&path, b"").expect("Failed to write file");

        let err = open_source(&path, ReadStrategy::Streaming).err().expect("should fail");
        assert!(matches!(err, SieveError::SourceOpen { .. }));
    }

    fn fixture() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/transfer_report.xlsx")
    }

    fn read_all(reader: &mut dyn SegmentReader, segment: &str) -> Vec<RowRecord> {
        reader
            .rows(segment)
            .expect("segment should open")
            .collect::<Result<Vec<_>, _>>()
            .expect("rows should parse")
    }

    #[test]
    fn streaming_and_buffered_read_the_same_rows() {
        let mut streaming = StreamingWorkbook::open(&fixture()).expect("streaming open");
        let mut buffered = BufferedWorkbook::open(&fixture()).expect("buffered open");

        assert_eq!(streaming.segment_names(), vec!["Summary", "Transfer Report"]);
        assert_eq!(streaming.segment_names(), buffered.segment_names());

        let streamed = read_all(&mut streaming, "Transfer Report");
        let loaded = read_all(&mut buffered, "Transfer Report");
        assert_eq!(streamed, loaded);

        assert_eq!(streamed.len(), 4, "blank row 3 is skipped");
        assert_eq!(
            streamed[0].cells,
            vec!["File Name", "Source File Size", "", "Target File ID", "Created"]
        );
        assert_eq!(
            streamed[1].cells,
            vec!["/Clients/Acme", "0", "", "100", "2024-01-01 12:00:00"]
        );
        assert_eq!(streamed[2].row_number, 3);
        assert_eq!(streamed[2].get(1), "120");
        assert_eq!(streamed[2].get(26), "far");
        assert_eq!(streamed[2].cells.len(), 27);
        assert_eq!(streamed[3].cells, vec!["", "7"]);
    }

    #[test]
    fn auto_strategy_opens_xlsx() {
        let mut reader = open_source(&fixture(), ReadStrategy::Auto).expect("open");
        assert_eq!(
            matching_segments(reader.as_ref(), "Transfer Report"),
            vec!["Transfer Report"]
        );
        assert_eq!(read_all(reader.as_mut(), "Summary").len(), 1);
    }
}
