//! Row Classifier.
//!
//! Applies independent rules to a row and returns every label that applies.
//! Labels are additive: a folder row matching two path patterns and carrying
//! a status ends up with four labels.

pub mod status;

use std::fmt;

use regex::Regex;
use serde::Serialize;

use crate::config::{PatternConfig, SieveConfig};
use crate::error::SieveError;
use crate::reader::{ColumnRef, RowRecord};

pub use status::{classify_status, resolve_status, sanitize_status, StatusOutcome};

/// A classification tag. A row may carry any number of them.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "kind", content = "name", rename_all = "lowercase")]
pub enum Label {
    /// Size is exactly zero.
    Folder,
    /// Size is positive.
    File,
    /// A folder whose path matched the named pattern.
    Pattern(String),
    /// A sanitized status value.
    Status(String),
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Folder => f.write_str("Folder"),
            Label::File => f.write_str("File"),
            Label::Pattern(name) => write!(f, "{name}"),
            Label::Status(status) => write!(f, "Status:{status}"),
        }
    }
}

/// Result of the size rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SizeOutcome {
    /// The size cell is empty.
    Absent,
    /// The size cell holds something that is not a finite number.
    Unparsable,
    Value(f64),
}

/// Reads a size cell without ever coercing bad input to zero.
pub fn parse_size(raw: &str) -> SizeOutcome {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return SizeOutcome::Absent;
    }
    match trimmed.parse::<f64>() {
        Ok(v) if v.is_finite() => SizeOutcome::Value(v),
        _ => SizeOutcome::Unparsable,
    }
}

/// Everything the classifier learned about one row.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub labels: Vec<Label>,
    pub size: SizeOutcome,
    /// Raw status value rejected as anomalous, if any.
    pub anomalous_status: Option<String>,
}

impl Classification {
    pub fn size_coercion_failed(&self) -> bool {
        self.size == SizeOutcome::Unparsable
    }

    pub fn has(&self, label: &Label) -> bool {
        self.labels.contains(label)
    }
}

/// Compiles configured patterns so that each must match the whole path.
pub fn compile_patterns(patterns: &[PatternConfig]) -> Result<Vec<(String, Regex)>, SieveError> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(&format!("^(?:{})$", p.regex))
                .map(|re| (p.name.clone(), re))
                .map_err(|e| SieveError::Config(format!("pattern '{}': {}", p.name, e)))
        })
        .collect()
}

pub struct Classifier {
    path: ColumnRef,
    size: ColumnRef,
    status: Vec<ColumnRef>,
    status_max_len: usize,
    patterns: Vec<(String, Regex)>,
}

impl Classifier {
    pub fn new(config: &SieveConfig) -> Result<Self, SieveError> {
        Ok(Self {
            path: config.columns.path,
            size: config.columns.size,
            status: config.columns.status.clone(),
            status_max_len: config.classify.status_max_len,
            patterns: compile_patterns(&config.classify.patterns)?,
        })
    }

    pub fn classify(&self, row: &RowRecord) -> Classification {
        let mut labels = Vec::new();

        let size = parse_size(row.at(self.size));
        match size {
            SizeOutcome::Value(v) if v == 0.0 => {
                labels.push(Label::Folder);
                let path = row.at(self.path);
                for (name, re) in &self.patterns {
                    if re.is_match(path) {
                        labels.push(Label::Pattern(name.clone()));
                    }
                }
            }
            SizeOutcome::Value(v) if v > 0.0 => labels.push(Label::File),
            _ => {}
        }

        let mut anomalous_status = None;
        match classify_status(row, &self.status, self.status_max_len) {
            StatusOutcome::Label(s) => labels.push(Label::Status(s)),
            StatusOutcome::Anomalous { raw } => anomalous_status = Some(raw),
            StatusOutcome::Missing => {}
        }

        Classification {
            labels,
            size,
            anomalous_status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> Classifier {
        Classifier::new(&SieveConfig::default()).unwrap()
    }

    /// Builds a row in the default report layout: path A, size B, status S.
    fn report_row(path: &str, size: &str, status: &str) -> RowRecord {
        let mut cells = vec![String::new(); 19];
        cells[0] = path.into();
        cells[1] = size.into();
        cells[18] = status.into();
        RowRecord::new(2, cells)
    }

    #[test]
    fn size_rule_is_exclusive() {
        let c = classifier();

        let folder = c.classify(&report_row("/A", "0", ""));
        assert!(folder.has(&Label::Folder) && !folder.has(&Label::File));

        let file = c.classify(&report_row("/A/x.txt", "12", ""));
        assert!(file.has(&Label::File) && !file.has(&Label::Folder));

        let negative = c.classify(&report_row("/A", "-3", ""));
        assert!(negative.labels.is_empty());
    }

    #[test]
    fn unparsable_size_still_gets_status() {
        let result = classifier().classify(&report_row("/A", "n/a", "Success"));
        assert!(result.size_coercion_failed());
        assert_eq!(result.labels, vec![Label::Status("success".into())]);

        let absent = classifier().classify(&report_row("/A", "", "Success"));
        assert!(!absent.size_coercion_failed());
        assert_eq!(absent.size, SizeOutcome::Absent);
    }

    #[test]
    fn patterns_are_additive_and_only_for_folders() {
        let c = classifier();

        let customer = c.classify(&report_row("//srv/share/Clients/Acme", "0", "success"));
        assert_eq!(
            customer.labels,
            vec![
                Label::Folder,
                Label::Pattern("Customer-Folders".into()),
                Label::Status("success".into()),
            ]
        );

        let policy = c.classify(&report_row("/Clients/Acme/POL-1/", "0", ""));
        assert_eq!(
            policy.labels,
            vec![Label::Folder, Label::Pattern("Policy-Reference".into())]
        );

        let claim = c.classify(&report_row("/Clients/Acme/CL9/Claim Documents/A1", "0", ""));
        assert_eq!(claim.labels, vec![Label::Folder, Label::Pattern("Claims".into())]);

        let file = c.classify(&report_row("/Clients/Acme", "10", ""));
        assert_eq!(file.labels, vec![Label::File]);
    }

    #[test]
    fn overlapping_patterns_all_apply() {
        let mut config = SieveConfig::default();
        config.classify.patterns = vec![
            PatternConfig::new("Any", ".*"),
            PatternConfig::new("Top", "/[^/]+"),
        ];
        let c = Classifier::new(&config).unwrap();

        let result = c.classify(&report_row("/Top", "0", ""));
        assert_eq!(
            result.labels,
            vec![
                Label::Folder,
                Label::Pattern("Any".into()),
                Label::Pattern("Top".into())
            ]
        );
    }

    #[test]
    fn patterns_match_the_whole_path() {
        let mut config = SieveConfig::default();
        config.classify.patterns = vec![PatternConfig::new("Top", "/[^/]+")];
        let c = Classifier::new(&config).unwrap();

        assert!(!c.classify(&report_row("/a/b", "0", "")).has(&Label::Pattern("Top".into())));
    }

    #[test]
    fn anomalous_status_is_reported_not_labelled() {
        let text = "this looks like a description someone pasted into the status column by mistake";
        let result = classifier().classify(&report_row("/A", "0", text));
        assert_eq!(result.labels, vec![Label::Folder]);
        assert_eq!(result.anomalous_status.as_deref(), Some(text));
    }

    #[test]
    fn size_parsing() {
        assert_eq!(parse_size(" 120 "), SizeOutcome::Value(120.0));
        assert_eq!(parse_size("0"), SizeOutcome::Value(0.0));
        assert_eq!(parse_size(""), SizeOutcome::Absent);
        assert_eq!(parse_size("abc"), SizeOutcome::Unparsable);
        assert_eq!(parse_size("NaN"), SizeOutcome::Unparsable);
    }
}
