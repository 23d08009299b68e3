//! Sink Multiplexer: one CSV destination per label.
//!
//! Destinations of a source are grouped under `<root>/<source-stem>/`:
//!
//! ```text
//! <root>/<stem>/Folder-Object-<stem>.csv
//! <root>/<stem>/File-Object-<stem>.csv
//! <root>/<stem>/<Pattern>/<Pattern>-<stem>.csv
//! <root>/<stem>/Status/<status>-Status-<stem>.csv
//! ```

mod atomic_writer;
mod registry;

use std::path::{Path, PathBuf};

pub use atomic_writer::AtomicCsvWriter;
pub use registry::{DestinationReport, DestinationState, SinkRegistry};

use crate::classify::Label;

/// Final path of the destination for `label` within a source's namespace.
pub fn destination_path(root: &Path, source_stem: &str, label: &Label) -> PathBuf {
    let base = root.join(source_stem);
    match label {
        Label::Folder => base.join(format!("Folder-Object-{source_stem}.csv")),
        Label::File => base.join(format!("File-Object-{source_stem}.csv")),
        Label::Pattern(name) => base.join(name).join(format!("{name}-{source_stem}.csv")),
        Label::Status(status) => base
            .join("Status")
            .join(format!("{status}-Status-{source_stem}.csv")),
    }
}
