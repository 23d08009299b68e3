//! Status value resolution and sanitizing.

use crate::reader::{ColumnRef, RowRecord};

/// Outcome of classifying a row by its status value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusOutcome {
    /// No candidate column held a non-blank value.
    Missing,
    /// A usable, sanitized status.
    Label(String),
    /// The value sanitized to nothing or to something too long to be a status.
    Anomalous { raw: String },
}

/// Reads the status through the fallback chain.
///
/// Candidates are tried in order and the first cell that exists and is not
/// blank wins, so shifted or truncated rows still find a status.
pub fn resolve_status<'r>(row: &'r RowRecord, candidates: &[ColumnRef]) -> Option<&'r str> {
    candidates
        .iter()
        .map(|column| row.at(*column))
        .find(|value| !value.trim().is_empty())
}

/// Turns a raw status into a stable destination identifier.
///
/// Keeps ASCII letters, digits, `-` and `_`; whitespace runs become a single
/// `-`; anything else is dropped. Repeated `-` collapse, leading and trailing
/// `-` are trimmed and the result is lowercased.
pub fn sanitize_status(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        let mapped = if ch.is_ascii_alphanumeric() || ch == '_' {
            ch.to_ascii_lowercase()
        } else if ch == '-' || ch.is_whitespace() {
            '-'
        } else {
            continue;
        };
        if mapped == '-' && out.ends_with('-') {
            continue;
        }
        out.push(mapped);
    }
    out.trim_matches('-').to_string()
}

/// Resolves and sanitizes the status of a row.
pub fn classify_status(row: &RowRecord, candidates: &[ColumnRef], max_len: usize) -> StatusOutcome {
    let Some(raw) = resolve_status(row, candidates) else {
        return StatusOutcome::Missing;
    };

    let sanitized = sanitize_status(raw);
    if sanitized.is_empty() || sanitized.len() > max_len {
        StatusOutcome::Anomalous {
            raw: raw.to_string(),
        }
    } else {
        StatusOutcome::Label(sanitized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> RowRecord {
        RowRecord::new(1, cells.iter().map(|s| s.to_string()).collect())
    }

    const CHAIN: [ColumnRef; 3] = [ColumnRef(3), ColumnRef(2), ColumnRef(0)];

    #[test]
    fn sanitizing_is_deterministic_and_case_folded() {
        assert_eq!(sanitize_status("Success"), "success");
        assert_eq!(sanitize_status("  Match exists "), "match-exists");
        assert_eq!(sanitize_status("match-exists"), "match-exists");
        assert_eq!(sanitize_status("Failed: (permission)"), "failed-permission");
        assert_eq!(sanitize_status("a  /  b"), "a-b");
        assert_eq!(sanitize_status("--x--"), "x");
        assert_eq!(sanitize_status("ok_2"), "ok_2");
        assert_eq!(sanitize_status("Süccess"), "sccess");
    }

    #[test]
    fn distinct_raw_values_may_collide() {
        assert_eq!(sanitize_status("Match Exists"), sanitize_status("match-exists"));
    }

    #[test]
    fn fallback_chain_takes_first_non_blank() {
        assert_eq!(resolve_status(&row(&["p", "", "r", "s"]), &CHAIN), Some("s"));
        assert_eq!(resolve_status(&row(&["p", "", "r", "  "]), &CHAIN), Some("r"));
        assert_eq!(resolve_status(&row(&["p", "", "r"]), &CHAIN), Some("r"));
        assert_eq!(resolve_status(&row(&["p"]), &CHAIN), Some("p"));
        assert_eq!(resolve_status(&row(&["", "x"]), &CHAIN), None);
    }

    #[test]
    fn outcomes() {
        assert_eq!(
            classify_status(&row(&["", "", "", "Success"]), &CHAIN, 50),
            StatusOutcome::Label("success".into())
        );
        assert_eq!(classify_status(&row(&[""]), &CHAIN, 50), StatusOutcome::Missing);

        let long = "word ".repeat(20);
        assert!(matches!(
            classify_status(&row(&["", "", "", &long]), &CHAIN, 50),
            StatusOutcome::Anomalous { .. }
        ));
        assert!(matches!(
            classify_status(&row(&["", "", "", "%%%"]), &CHAIN, 50),
            StatusOutcome::Anomalous { .. }
        ));
    }
}
