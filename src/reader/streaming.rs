//! Constant-memory row streaming over `.xlsx` worksheets.
//!
//! Cells are pulled one at a time from the worksheet XML and folded into rows
//! by a [`RowAssembler`]; at most one row is held in memory. The shared
//! strings table is the only per-workbook structure loaded up front.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use calamine::{open_workbook, Data, Reader, Xlsx};

use super::cell::render_cell;
use super::row::{RowAssembler, RowRecord, SparseCell};
use super::{RowStream, SegmentReader};
use crate::error::SieveError;

/// A pull-based source of sparse cells.
pub trait CellSource {
    fn next_cell(&mut self) -> Result<Option<SparseCell>, SieveError>;
}

/// Streaming reader over an `.xlsx` workbook.
pub struct StreamingWorkbook {
    workbook: Xlsx<BufReader<File>>,
    source_id: String,
}

impl StreamingWorkbook {
    pub fn open(path: &Path) -> Result<Self, SieveError> {
        let workbook = open_workbook::<Xlsx<BufReader<File>>, _>(path).map_err(|e| {
            SieveError::SourceOpen {
                source_id: path.display().to_string(),
                reason: e.to_string(),
            }
        })?;

        Ok(Self {
            workbook,
            source_id: path.display().to_string(),
        })
    }
}

impl SegmentReader for StreamingWorkbook {
    fn segment_names(&self) -> Vec<String> {
        self.workbook.sheet_names()
    }

    fn rows<'a>(&'a mut self, segment: &str) -> Result<RowStream<'a>, SieveError> {
        let mut cells = self
            .workbook
            .worksheet_cells_reader(segment)
            .map_err(|e| SieveError::SegmentParse {
                segment: segment.to_string(),
                reason: e.to_string(),
            })?;

        tracing::debug!(source = %self.source_id, segment, "Streaming worksheet");

        let segment = segment.to_string();
        let source = FnCells(move || {
            let next = cells.next_cell().map_err(|e| SieveError::SegmentParse {
                segment: segment.clone(),
                reason: e.to_string(),
            })?;

            Ok(next.map(|cell| {
                let (row, column) = cell.get_position();
                let value: Data = cell.get_value().clone().into();
                SparseCell {
                    row,
                    column: column as usize,
                    text: render_cell(&value),
                }
            }))
        });
        Ok(Box::new(StreamingRows::new(source)))
    }
}

/// Adapts a cell-pulling closure to [`CellSource`].
struct FnCells<F>(F);

impl<F> CellSource for FnCells<F>
where
    F: FnMut() -> Result<Option<SparseCell>, SieveError>,
{
    fn next_cell(&mut self) -> Result<Option<SparseCell>, SieveError> {
        (self.0)()
    }
}

/// Iterator folding a [`CellSource`] into non-blank rows.
pub struct StreamingRows<S> {
    cells: S,
    assembler: RowAssembler,
    done: bool,
    failed: Option<SieveError>,
}

impl<S: CellSource> StreamingRows<S> {
    pub fn new(cells: S) -> Self {
        Self {
            cells,
            assembler: RowAssembler::new(),
            done: false,
            failed: None,
        }
    }
}

impl<S: CellSource> Iterator for StreamingRows<S> {
    type Item = Result<RowRecord, SieveError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(e) = self.failed.take() {
            return Some(Err(e));
        }
        while !self.done {
            match self.cells.next_cell() {
                Ok(Some(cell)) => {
                    if let Some(row) = self.assembler.push(cell) {
                        if !row.is_blank() {
                            return Some(Ok(row));
                        }
                    }
                }
                Ok(None) => {
                    self.done = true;
                    if let Some(row) = self.assembler.take() {
                        if !row.is_blank() {
                            return Some(Ok(row));
                        }
                    }
                }
                Err(e) => {
                    // The row in progress is emitted before the error.
                    self.done = true;
                    if let Some(row) = self.assembler.take() {
                        if !row.is_blank() {
                            self.failed = Some(e);
                            return Some(Ok(row));
                        }
                    }
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct VecCells(std::vec::IntoIter<Result<SparseCell, SieveError>>);

    impl CellSource for VecCells {
        fn next_cell(&mut self) -> Result<Option<SparseCell>, SieveError> {
            self.0.next().transpose()
        }
    }

    fn ok(row: u32, column: usize, text: &str) -> Result<SparseCell, SieveError> {
        Ok(SparseCell {
            row,
            column,
            text: text.into(),
        })
    }

    #[test]
    fn skips_blank_rows_and_emits_last_row() {
        let cells = VecCells(
            vec![
                ok(0, 0, "File Name"),
                ok(0, 1, "Size"),
                ok(1, 0, ""),
                ok(3, 0, "/A"),
                ok(3, 1, "0"),
            ]
            .into_iter(),
        );
        let rows: Vec<_> = StreamingRows::new(cells).map(|r| r.unwrap()).collect();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].cells, vec!["File Name", "Size"]);
        assert_eq!(rows[1].row_number, 3);
        assert_eq!(rows[1].cells, vec!["/A", "0"]);
    }

    #[test]
    fn parse_error_keeps_row_in_progress_then_ends() {
        let cells = VecCells(
            vec![
                ok(0, 0, "h"),
                ok(1, 0, "a"),
                Err(SieveError::SegmentParse {
                    segment: "Transfer Report".into(),
                    reason: "bad xml".into(),
                }),
                ok(2, 0, "never"),
            ]
            .into_iter(),
        );
        let mut rows = StreamingRows::new(cells);

        assert_eq!(rows.next().unwrap().unwrap().cells, vec!["h"]);
        assert_eq!(rows.next().unwrap().unwrap().cells, vec!["a"]);
        assert!(matches!(
            rows.next(),
            Some(Err(SieveError::SegmentParse { .. }))
        ));
        assert!(rows.next().is_none());
    }
}
