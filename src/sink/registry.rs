//! Per-source registry of open destinations.
//!
//! Folder, File and pattern destinations are opened speculatively as soon as
//! the header is known; status destinations open on their first row. Nothing
//! is published until [`SinkRegistry::finish`], which persists destinations
//! that received rows and discards the rest.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::atomic_writer::AtomicCsvWriter;
use super::destination_path;
use crate::classify::Label;
use crate::error::SieveError;
use crate::reader::RowRecord;

/// Lifecycle of one destination.
///
/// `Unopened -> OpenEmpty -> OpenWithData -> Finalized`, or
/// `OpenEmpty -> Discarded` when no row ever arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DestinationState {
    Unopened,
    OpenEmpty,
    OpenWithData,
    Finalized,
    Discarded,
}

struct Destination {
    path: PathBuf,
    writer: Option<AtomicCsvWriter>,
    rows: u64,
    state: DestinationState,
}

impl Destination {
    fn open(path: PathBuf, header: &[String]) -> Result<Self, SieveError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| SieveError::destination(parent.display(), e))?;
        }
        let mut writer = AtomicCsvWriter::new(&path)?;
        writer.write_row(header)?;

        Ok(Self {
            path,
            writer: Some(writer),
            rows: 0,
            state: DestinationState::OpenEmpty,
        })
    }

    fn write(&mut self, row: &RowRecord) -> Result<(), SieveError> {
        let writer = self.writer.as_mut().ok_or_else(|| {
            SieveError::Internal(format!("write to closed destination {}", self.path.display()))
        })?;
        writer.write_row(&row.cells)?;
        self.rows += 1;
        self.state = DestinationState::OpenWithData;
        Ok(())
    }

    fn close(&mut self) -> Result<(), SieveError> {
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };

        if self.rows > 0 {
            writer.finish()?;
            self.state = DestinationState::Finalized;
        } else {
            // Dropping the writer removes its temp file.
            drop(writer);
            remove_stale(&self.path)?;
            self.state = DestinationState::Discarded;
        }
        Ok(())
    }
}

fn remove_stale(path: &Path) -> Result<(), SieveError> {
    match fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "Removed stale empty destination");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SieveError::destination(path.display(), e)),
    }
}

/// What happened to one destination of a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DestinationReport {
    pub label: String,
    pub path: PathBuf,
    pub rows: u64,
    pub state: DestinationState,
}

/// Owned mapping from label to destination for one source.
pub struct SinkRegistry {
    root: PathBuf,
    source_stem: String,
    speculative: Vec<Label>,
    header: Option<Vec<String>>,
    destinations: BTreeMap<Label, Destination>,
}

impl SinkRegistry {
    /// Creates a registry for one source. `speculative` lists the labels to
    /// open as soon as the header is known.
    pub fn new(root: impl Into<PathBuf>, source_stem: &str, speculative: Vec<Label>) -> Self {
        Self {
            root: root.into(),
            source_stem: source_stem.to_string(),
            speculative,
            header: None,
            destinations: BTreeMap::new(),
        }
    }

    /// Records the header of a processed segment.
    ///
    /// Only the first header is kept; later segments reuse it.
    pub fn set_header(&mut self, header: &RowRecord) -> Result<(), SieveError> {
        if let Some(existing) = &self.header {
            if existing != &header.cells {
                tracing::debug!(
                    source = %self.source_stem,
                    "Segment header differs from the first one; keeping the first"
                );
            }
            return Ok(());
        }

        self.header = Some(header.cells.clone());
        for label in self.speculative.clone() {
            self.open(&label)?;
        }
        Ok(())
    }

    fn open(&mut self, label: &Label) -> Result<&mut Destination, SieveError> {
        if !self.destinations.contains_key(label) {
            let header = self.header.as_deref().ok_or_else(|| {
                SieveError::Internal("destination opened before a header was read".into())
            })?;
            let path = destination_path(&self.root, &self.source_stem, label);
            let destination = Destination::open(path, header)?;
            self.destinations.insert(label.clone(), destination);
        }

        self.destinations
            .get_mut(label)
            .ok_or_else(|| SieveError::Internal(format!("destination {label} vanished")))
    }

    /// Writes `row` to the destination of every label.
    pub fn route(&mut self, labels: &[Label], row: &RowRecord) -> Result<(), SieveError> {
        for label in labels {
            self.open(label)?.write(row)?;
        }
        Ok(())
    }

    /// Durability barrier at a segment boundary; nothing is published.
    pub fn flush(&mut self) -> Result<(), SieveError> {
        for destination in self.destinations.values_mut() {
            if let Some(writer) = destination.writer.as_mut() {
                writer.flush()?;
            }
        }
        Ok(())
    }

    pub fn state(&self, label: &Label) -> DestinationState {
        self.destinations
            .get(label)
            .map(|d| d.state)
            .unwrap_or(DestinationState::Unopened)
    }

    pub fn rows(&self, label: &Label) -> u64 {
        self.destinations.get(label).map(|d| d.rows).unwrap_or(0)
    }

    /// Publishes destinations with rows and discards empty ones.
    pub fn finish(mut self) -> Result<Vec<DestinationReport>, SieveError> {
        let mut reports = Vec::with_capacity(self.destinations.len());

        for (label, destination) in self.destinations.iter_mut() {
            destination.close()?;
            reports.push(DestinationReport {
                label: label.to_string(),
                path: destination.path.clone(),
                rows: destination.rows,
                state: destination.state,
            });
        }

        // Speculative labels never opened (no header at all) may still have
        // stale output from an earlier run.
        for label in &self.speculative {
            if !self.destinations.contains_key(label) {
                remove_stale(&destination_path(&self.root, &self.source_stem, label))?;
            }
        }

        let finalized = reports
            .iter()
            .filter(|r| r.state == DestinationState::Finalized)
            .count();
        tracing::info!(
            source = %self.source_stem,
            finalized,
            discarded = reports.len() - finalized,
            "Destinations closed"
        );

        Ok(reports)
    }
}
