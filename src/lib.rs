//! Streams transfer-report workbooks into per-label CSV extracts and a
//! hierarchical SQLite store.
//!
//! ```text
//! source -> reader -> classify -> sink (CSV) -> storage (SQLite) -> hierarchy -> views
//! ```

pub mod classify;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod reader;
pub mod sink;
pub mod storage;

pub use config::SieveConfig;
pub use error::{ErrorKind, SieveError};
pub use pipeline::{run_import, BatchReport, Pipeline, RunOutcome, RunSummary};
