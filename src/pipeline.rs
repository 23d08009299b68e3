//! Run orchestration.
//!
//! Sources are processed one after another, segments within a source in
//! workbook order, and rows within a segment by a single consumer that
//! classifies, routes and persists each row before reading the next.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;
use uuid::Uuid;

use crate::classify::{Classifier, Label};
use crate::config::SieveConfig;
use crate::error::{row_preview, ErrorKind, SieveError};
use crate::reader::{matching_segments, open_source, SegmentReader};
use crate::sink::{DestinationReport, DestinationState, SinkRegistry};
use crate::storage::{BatchWriter, ImportLogEntry, Store, TableLayout};

/// Log progress every this many rows.
const PROGRESS_INTERVAL: u64 = 10_000;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn now() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Per-source results.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub source: String,
    pub source_batch: String,
    pub segments_total: usize,
    pub segments_processed: usize,
    pub segments_failed: usize,
    pub rows_read: u64,
    pub label_counts: BTreeMap<String, u64>,
    pub error_counts: BTreeMap<ErrorKind, u64>,
    pub destinations: Vec<DestinationReport>,
    pub rows_inserted: u64,
    pub rows_updated: u64,
    pub cells_nulled: u64,
    pub elapsed_ms: u64,
}

impl BatchReport {
    fn new(source: &str, source_batch: &str) -> Self {
        Self {
            source: source.to_string(),
            source_batch: source_batch.to_string(),
            ..Self::default()
        }
    }

    fn count_error(&mut self, kind: ErrorKind, n: u64) {
        if n > 0 {
            *self.error_counts.entry(kind).or_default() += n;
        }
    }

    pub fn errors(&self) -> u64 {
        self.error_counts.values().sum()
    }

    pub fn finalized(&self) -> impl Iterator<Item = &DestinationReport> {
        self.destinations
            .iter()
            .filter(|d| d.state == DestinationState::Finalized)
    }
}

/// A source that could not be read at all.
#[derive(Debug, Clone, Serialize)]
pub struct FailedSource {
    pub source: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every source and segment was processed.
    Success,
    /// Some sources or segments failed, but at least one produced rows.
    PartialSuccess,
    /// Sources failed and none produced any rows, or a destination failure
    /// stopped the run.
    Failed,
}

/// End-of-run summary.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: String,
    pub batches: Vec<BatchReport>,
    pub failed_sources: Vec<FailedSource>,
    pub rows_read: u64,
    pub label_totals: BTreeMap<String, u64>,
    pub error_totals: BTreeMap<ErrorKind, u64>,
    /// Records with a resolved parent after the run, when a store is used.
    pub records_linked: Option<usize>,
    pub elapsed_ms: u64,
    /// The destination failure that stopped the run early, if any.
    pub fatal_error: Option<String>,
    pub outcome: RunOutcome,
}

impl RunSummary {
    fn new(run_id: Uuid, started_at: String) -> Self {
        Self {
            run_id,
            started_at,
            batches: Vec::new(),
            failed_sources: Vec::new(),
            rows_read: 0,
            label_totals: BTreeMap::new(),
            error_totals: BTreeMap::new(),
            records_linked: None,
            elapsed_ms: 0,
            fatal_error: None,
            outcome: RunOutcome::Success,
        }
    }

    fn add_batch(&mut self, batch: BatchReport) {
        self.rows_read += batch.rows_read;
        for (label, n) in &batch.label_counts {
            *self.label_totals.entry(label.clone()).or_default() += n;
        }
        for (kind, n) in &batch.error_counts {
            *self.error_totals.entry(*kind).or_default() += n;
        }
        self.batches.push(batch);
    }

    fn add_failed(&mut self, source: &str, err: &SieveError) {
        *self.error_totals.entry(err.kind()).or_default() += 1;
        self.failed_sources.push(FailedSource {
            source: source.to_string(),
            reason: err.to_string(),
        });
    }

    fn abort(&mut self, err: &SieveError) {
        *self.error_totals.entry(err.kind()).or_default() += 1;
        self.fatal_error = Some(err.to_string());
    }

    fn decide_outcome(&self) -> RunOutcome {
        if self.fatal_error.is_some() {
            return RunOutcome::Failed;
        }
        let any_rows = self.batches.iter().any(|b| b.rows_read > 0);
        let segment_failures = self.batches.iter().any(|b| b.segments_failed > 0);

        if self.failed_sources.is_empty() && !segment_failures {
            RunOutcome::Success
        } else if any_rows {
            RunOutcome::PartialSuccess
        } else {
            RunOutcome::Failed
        }
    }
}

/// Source-batch tag: the file name without its spreadsheet extension.
pub fn source_batch_tag(path: &Path) -> String {
    path.file_stem()
        .or_else(|| path.file_name())
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// A configured pipeline holding the run's single store connection.
pub struct Pipeline {
    config: SieveConfig,
    classifier: Classifier,
    store: Option<Store>,
}

impl Pipeline {
    pub fn new(config: SieveConfig) -> Result<Self, SieveError> {
        config.validate()?;
        let classifier = Classifier::new(&config)?;

        let store = match &config.store.database {
            Some(path) => Some(Store::open(
                path,
                TableLayout::from_config(&config)?,
                config.store.batch_size,
            )?),
            None => None,
        };

        Ok(Self {
            config,
            classifier,
            store,
        })
    }

    pub fn store(&self) -> Option<&Store> {
        self.store.as_ref()
    }

    /// Labels whose destinations open as soon as a header is known.
    fn speculative_labels(&self) -> Vec<Label> {
        let mut labels = vec![Label::Folder, Label::File];
        labels.extend(
            self.config
                .classify
                .patterns
                .iter()
                .map(|p| Label::Pattern(p.name.clone())),
        );
        labels
    }

    /// Processes spreadsheet files in order.
    pub fn run(&mut self, sources: &[PathBuf]) -> Result<RunSummary, SieveError> {
        let strategy = self.config.reader.strategy;
        self.run_with(sources, |path| open_source(path, strategy))
    }

    /// Processes sources opened by `open`.
    ///
    /// A source that fails to open is recorded and skipped. A destination
    /// failure stops the run: no further source is read, indexes and views
    /// are still rebuilt where possible, and the summary carries the error
    /// with a `Failed` outcome.
    pub fn run_with<F>(&mut self, sources: &[PathBuf], mut open: F) -> Result<RunSummary, SieveError>
    where
        F: FnMut(&Path) -> Result<Box<dyn SegmentReader>, SieveError>,
    {
        let started = Instant::now();
        let mut summary = RunSummary::new(Uuid::new_v4(), now());
        tracing::info!(run_id = %summary.run_id, sources = sources.len(), "Starting import run");

        if let Err(e) = self.import_sources(sources, &mut open, &mut summary) {
            tracing::error!(error = %e, "Aborting import run");
            summary.abort(&e);
        }

        if let Some(store) = &self.store {
            match store.finish_import() {
                Ok(rebuild) => summary.records_linked = Some(rebuild.linked),
                Err(e) if summary.fatal_error.is_some() => {
                    tracing::warn!(error = %e, "Could not rebuild indexes and views after abort");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Post-import rebuild failed");
                    summary.abort(&e);
                }
            }
        }

        summary.elapsed_ms = started.elapsed().as_millis() as u64;
        summary.outcome = summary.decide_outcome();
        log_summary(&summary);
        Ok(summary)
    }

    /// Loads every source; returns the first fatal error.
    fn import_sources<F>(
        &mut self,
        sources: &[PathBuf],
        open: &mut F,
        summary: &mut RunSummary,
    ) -> Result<(), SieveError>
    where
        F: FnMut(&Path) -> Result<Box<dyn SegmentReader>, SieveError>,
    {
        if let Some(store) = &self.store {
            store.begin_bulk_load()?;
        }

        let mut tags: HashMap<String, String> = HashMap::new();
        for (i, path) in sources.iter().enumerate() {
            let source_id = path.display().to_string();
            tracing::info!(source = %source_id, "Processing source {}/{}", i + 1, sources.len());

            // The tag names both the CSV directory and the stored batch.
            let tag = source_batch_tag(path);
            if let Some(first) = tags.get(&tag) {
                let e = SieveError::Config(format!(
                    "source batch '{tag}' was already imported from {first} in this run"
                ));
                tracing::warn!(source = %source_id, error = %e, "Skipping source");
                summary.add_failed(&source_id, &e);
                continue;
            }

            let mut reader = match open(path) {
                Ok(reader) => reader,
                Err(e) if !e.is_fatal() => {
                    tracing::warn!(source = %source_id, error = %e, "Skipping source");
                    summary.add_failed(&source_id, &e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            tags.insert(tag.clone(), source_id.clone());

            let batch = self.process_source(&summary.run_id, &source_id, &tag, reader.as_mut())?;
            summary.add_batch(batch);
        }
        Ok(())
    }

    /// Streams every matching segment of one source to the destinations.
    pub fn process_source(
        &mut self,
        run_id: &Uuid,
        source_id: &str,
        source_batch: &str,
        reader: &mut dyn SegmentReader,
    ) -> Result<BatchReport, SieveError> {
        let started = Instant::now();
        let started_at = now();
        let mut report = BatchReport::new(source_id, source_batch);

        let mut sinks = self
            .config
            .output
            .csv_dir
            .as_ref()
            .map(|root| SinkRegistry::new(root, source_batch, self.speculative_labels()));

        let records_before = match &self.store {
            Some(store) => store.record_count()?,
            None => 0,
        };
        let mut writer = self
            .store
            .as_mut()
            .map(|store| store.writer(source_batch));

        report.segments_total = reader.segment_names().len();
        let segments = matching_segments(reader, &self.config.segment_prefix);
        tracing::info!(
            source = %source_id,
            matching = segments.len(),
            total = report.segments_total,
            "Found segments"
        );

        for segment in &segments {
            let result = process_segment(
                &self.classifier,
                reader,
                segment,
                sinks.as_mut(),
                writer.as_mut(),
                &mut report,
            );

            match result {
                Ok(rows) => {
                    report.segments_processed += 1;
                    tracing::info!(source = %source_id, segment = %segment, rows, "Segment complete");
                }
                Err(e) if !e.is_fatal() => {
                    report.segments_failed += 1;
                    report.count_error(e.kind(), 1);
                    tracing::warn!(source = %source_id, segment = %segment, error = %e, "Skipping rest of segment");
                }
                Err(e) => return Err(e),
            }

            // Rows read before a parse failure are kept.
            if let Some(sinks) = sinks.as_mut() {
                sinks.flush()?;
            }
            if let Some(writer) = writer.as_mut() {
                writer.flush()?;
            }
        }

        if let Some(sinks) = sinks {
            report.destinations = sinks.finish()?;
        }

        if let Some(writer) = writer {
            let stats = writer.finish()?;
            report.count_error(ErrorKind::PersistenceConstraint, stats.rows_rejected);
            report.cells_nulled = stats.cells_nulled;

            if let Some(store) = &self.store {
                let records_after = store.record_count()?;
                report.rows_inserted = records_after.saturating_sub(records_before);
                report.rows_updated = stats.rows_written.saturating_sub(report.rows_inserted);

                store.log_import(&ImportLogEntry {
                    run_id: run_id.to_string(),
                    source_batch: source_batch.to_string(),
                    source_path: source_id.to_string(),
                    rows_read: report.rows_read,
                    rows_inserted: report.rows_inserted,
                    rows_updated: report.rows_updated,
                    errors: report.errors(),
                    started_at,
                    finished_at: now(),
                })?;
            }
        }

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            source = %source_id,
            rows = report.rows_read,
            inserted = report.rows_inserted,
            updated = report.rows_updated,
            errors = report.errors(),
            elapsed_ms = report.elapsed_ms,
            "Source complete"
        );
        Ok(report)
    }
}

/// Reads one segment: header first, then classify, route and persist each
/// data row. Returns the number of data rows read.
fn process_segment(
    classifier: &Classifier,
    reader: &mut dyn SegmentReader,
    segment: &str,
    mut sinks: Option<&mut SinkRegistry>,
    mut writer: Option<&mut BatchWriter<'_>>,
    report: &mut BatchReport,
) -> Result<u64, SieveError> {
    let mut rows = reader.rows(segment)?;

    let header = match rows.next() {
        None => {
            tracing::debug!(segment, "Segment is empty");
            return Ok(0);
        }
        Some(header) => header?,
    };
    if let Some(sinks) = sinks.as_deref_mut() {
        sinks.set_header(&header)?;
    }

    let mut read = 0u64;
    for row in rows {
        let row = row?;
        read += 1;
        report.rows_read += 1;

        let classification = classifier.classify(&row);
        if classification.size_coercion_failed() {
            report.count_error(ErrorKind::RowCoercion, 1);
        }
        if let Some(raw) = &classification.anomalous_status {
            report.count_error(ErrorKind::AnomalousStatus, 1);
            tracing::warn!(
                segment,
                row = row.row_number + 1,
                chars = raw.chars().count(),
                preview = %row_preview(std::slice::from_ref(raw)),
                "Status value looks anomalous; not classifying by status"
            );
        }
        for label in &classification.labels {
            *report.label_counts.entry(label.to_string()).or_default() += 1;
        }

        if let Some(sinks) = sinks.as_deref_mut() {
            sinks.route(&classification.labels, &row)?;
        }
        if let Some(writer) = writer.as_deref_mut() {
            writer.push(row)?;
        }

        if read % PROGRESS_INTERVAL == 0 {
            tracing::info!(segment, rows = read, "Processing rows");
        }
    }

    Ok(read)
}

fn log_summary(summary: &RunSummary) {
    for (label, n) in &summary.label_totals {
        tracing::info!(label = %label, rows = n, "Label total");
    }
    for (kind, n) in &summary.error_totals {
        tracing::warn!(kind = %kind, count = n, "Error total");
    }
    for failed in &summary.failed_sources {
        tracing::warn!(source = %failed.source, reason = %failed.reason, "Source failed");
    }
    if let Some(fatal) = &summary.fatal_error {
        tracing::error!(error = %fatal, "Run stopped early");
    }
    tracing::info!(
        run_id = %summary.run_id,
        sources = summary.batches.len(),
        failed = summary.failed_sources.len(),
        rows = summary.rows_read,
        elapsed_ms = summary.elapsed_ms,
        outcome = ?summary.outcome,
        "Import run finished"
    );
}

/// Runs an import on the blocking thread pool.
pub async fn run_import(config: SieveConfig, sources: Vec<PathBuf>) -> Result<RunSummary, SieveError> {
    tokio::task::spawn_blocking(move || {
        let mut pipeline = Pipeline::new(config)?;
        pipeline.run(&sources)
    })
    .await
    .map_err(|e| SieveError::Internal(format!("Import task failed: {e}")))?
}
