//! Atomic CSV file writer with automatic cleanup on failure.
//!
//! Writes to a temporary file in the same directory as the destination,
//! then atomically replaces the destination on `finish()`. If dropped
//! before finishing, the temporary file is automatically cleaned up, which
//! is also how an empty destination is discarded.

use std::io::BufWriter;
use std::path::{Path, PathBuf};

use csv::{QuoteStyle, Writer, WriterBuilder};
use tempfile::NamedTempFile;

use crate::error::SieveError;

/// An atomic CSV writer with every field double-quoted.
pub struct AtomicCsvWriter {
    writer: Writer<BufWriter<NamedTempFile>>,
    final_path: PathBuf,
}

impl AtomicCsvWriter {
    /// Creates a new atomic CSV writer targeting the specified path.
    ///
    /// The temporary file is created in the same directory as `final_path`
    /// so that persisting is a rename on one filesystem. Rows may have
    /// different lengths.
    pub fn new(final_path: impl AsRef<Path>) -> Result<Self, SieveError> {
        let final_path = final_path.as_ref().to_path_buf();

        let parent_dir = final_path.parent().ok_or_else(|| {
            SieveError::destination(final_path.display(), "cannot determine parent directory")
        })?;

        let temp_file = NamedTempFile::new_in(parent_dir).map_err(|e| {
            SieveError::destination(
                final_path.display(),
                format!("failed to create temporary file: {}", e),
            )
        })?;

        let csv_writer = WriterBuilder::new()
            .quote_style(QuoteStyle::Always)
            .flexible(true)
            .from_writer(BufWriter::new(temp_file));

        Ok(Self {
            writer: csv_writer,
            final_path,
        })
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    /// Writes one record.
    pub fn write_row<I, T>(&mut self, fields: I) -> Result<(), SieveError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        self.writer
            .write_record(fields)
            .map_err(|e| SieveError::destination(self.final_path.display(), e))
    }

    /// Pushes buffered rows down to the temporary file and syncs its data.
    ///
    /// The destination stays open and unpublished.
    pub fn flush(&mut self) -> Result<(), SieveError> {
        self.writer
            .flush()
            .map_err(|e| SieveError::destination(self.final_path.display(), e))?;
        self.writer
            .get_ref()
            .get_ref()
            .as_file()
            .sync_data()
            .map_err(|e| SieveError::destination(self.final_path.display(), e))
    }

    /// Flushes all buffers and atomically persists the file to the final path.
    ///
    /// Returns the final path on success. On error the temporary file is
    /// cleaned up automatically.
    pub fn finish(self) -> Result<PathBuf, SieveError> {
        let buf_writer = self.writer.into_inner().map_err(|e| {
            SieveError::destination(
                self.final_path.display(),
                format!("failed to flush CSV writer: {}", e.error()),
            )
        })?;

        let named_temp = buf_writer.into_inner().map_err(|e| {
            SieveError::destination(
                self.final_path.display(),
                format!("failed to flush buffer: {}", e.error()),
            )
        })?;

        named_temp.persist(&self.final_path).map_err(|e| {
            SieveError::destination(self.final_path.display(), format!("failed to persist: {}", e.error))
        })?;

        Ok(self.final_path)
    }
}
