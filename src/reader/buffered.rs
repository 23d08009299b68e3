//! Full-materialization reader for legacy and smaller workbooks.
//!
//! Loads a whole worksheet into a calamine [`Range`] before yielding rows.
//! Handles every format calamine can open (`.xls`, `.xlsx`, `.xlsb`, `.ods`).

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use calamine::{open_workbook_auto, Data, Range, Reader, Sheets};

use super::cell::render_cell;
use super::row::RowRecord;
use super::{RowStream, SegmentReader};
use crate::error::SieveError;

/// Buffered reader over any supported workbook format.
pub struct BufferedWorkbook {
    workbook: Sheets<BufReader<File>>,
    source_id: String,
}

impl BufferedWorkbook {
    pub fn open(path: &Path) -> Result<Self, SieveError> {
        let workbook = open_workbook_auto(path).map_err(|e| SieveError::SourceOpen {
            source_id: path.display().to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            workbook,
            source_id: path.display().to_string(),
        })
    }
}

impl SegmentReader for BufferedWorkbook {
    fn segment_names(&self) -> Vec<String> {
        self.workbook.sheet_names()
    }

    fn rows<'a>(&'a mut self, segment: &str) -> Result<RowStream<'a>, SieveError> {
        let range = self
            .workbook
            .worksheet_range(segment)
            .map_err(|e| SieveError::SegmentParse {
                segment: segment.to_string(),
                reason: e.to_string(),
            })?;

        let (height, width) = range.get_size();
        tracing::debug!(
            source = %self.source_id,
            segment,
            height,
            width,
            "Loaded worksheet"
        );

        let rows: Vec<RowRecord> = range_rows(&range).collect();
        Ok(Box::new(rows.into_iter().map(Ok)))
    }
}

/// Converts a loaded range into non-blank dense rows.
///
/// A range starts at its first used cell, so positions are shifted back to
/// absolute sheet coordinates; otherwise column indices would disagree with
/// the streaming reader whenever column A or row 1 is empty.
pub fn range_rows(range: &Range<Data>) -> impl Iterator<Item = RowRecord> + '_ {
    let (start_row, start_col) = range.start().unwrap_or((0, 0));

    range
        .rows()
        .enumerate()
        .map(move |(offset, cells)| {
            let mut dense = vec![String::new(); start_col as usize];
            dense.extend(cells.iter().map(render_cell));
            RowRecord::new(start_row + offset as u32, dense)
        })
        .filter(|row| !row.is_blank())
}
