//! Dense row records reconstructed from sparse cells.

use serde::Serialize;

use super::column::ColumnRef;

/// One data row: a dense, 0-indexed sequence of cell texts.
///
/// Missing cells are empty strings and trailing empty cells are trimmed, so
/// two reads of the same sheet compare equal regardless of strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowRecord {
    /// 0-based row number within the segment.
    pub row_number: u32,
    pub cells: Vec<String>,
}

impl RowRecord {
    pub fn new(row_number: u32, mut cells: Vec<String>) -> Self {
        while cells.last().is_some_and(|c| c.is_empty()) {
            cells.pop();
        }
        Self { row_number, cells }
    }

    /// Returns the cell at `index`, or `""` when the row is shorter.
    pub fn get(&self, index: usize) -> &str {
        self.cells.get(index).map(String::as_str).unwrap_or("")
    }

    /// Returns the cell at a configured column.
    pub fn at(&self, column: ColumnRef) -> &str {
        self.get(column.index())
    }

    /// Returns true if the row has a cell (possibly empty) at `index`.
    pub fn has(&self, index: usize) -> bool {
        index < self.cells.len()
    }

    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(|c| c.trim().is_empty())
    }
}

/// A single non-dense cell as produced by a streaming parser.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseCell {
    pub row: u32,
    pub column: usize,
    pub text: String,
}

/// Accumulates sparse cells of one row and emits a [`RowRecord`] when the
/// row number changes.
#[derive(Debug, Default)]
pub struct RowAssembler {
    current: Option<(u32, Vec<String>)>,
}

impl RowAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a cell. Returns the previous row if this cell starts a new one.
    pub fn push(&mut self, cell: SparseCell) -> Option<RowRecord> {
        let starts_new_row = matches!(&self.current, Some((row, _)) if *row != cell.row);
        let finished = if starts_new_row { self.take() } else { None };

        let (_, cells) = self
            .current
            .get_or_insert_with(|| (cell.row, Vec::new()));
        if cells.len() <= cell.column {
            cells.resize(cell.column + 1, String::new());
        }
        cells[cell.column] = cell.text;

        finished
    }

    /// Emits whatever row is still being assembled.
    pub fn take(&mut self) -> Option<RowRecord> {
        self.current
            .take()
            .map(|(row, cells)| RowRecord::new(row, cells))
    }
}
