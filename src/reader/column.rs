//! Spreadsheet column addressing (`A`, `Z`, `AA`, `XFD`, ...).
//!
//! Column letters are bijective base-26: `A` is 0, `Z` is 25, `AA` is 26.
//! There is no upper bound beyond `usize`, so addressing is not limited to
//! single letters or to any particular spreadsheet format.

use std::fmt;

use serde::{Deserialize, Deserializer};

use crate::error::SieveError;

/// Converts column letters to a 0-based index.
pub fn column_index(letters: &str) -> Result<usize, SieveError> {
    if letters.is_empty() {
        return Err(SieveError::Config("empty column reference".into()));
    }

    let mut index: usize = 0;
    for ch in letters.chars() {
        let upper = ch.to_ascii_uppercase();
        if !upper.is_ascii_uppercase() {
            return Err(SieveError::Config(format!(
                "invalid column letters '{letters}'"
            )));
        }
        let digit = (upper as u8 - b'A') as usize + 1;
        index = index
            .checked_mul(26)
            .and_then(|v| v.checked_add(digit))
            .ok_or_else(|| SieveError::Config(format!("column '{letters}' is out of range")))?;
    }

    Ok(index - 1)
}

/// Converts a 0-based index back to column letters.
pub fn column_letters(index: usize) -> String {
    let mut n = index + 1;
    let mut out = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        out.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Splits an A1-style reference into 0-based `(row, column)`.
pub fn parse_cell_reference(reference: &str) -> Result<(u32, usize), SieveError> {
    let split = reference
        .find(|c: char| c.is_ascii_digit())
        .ok_or_else(|| SieveError::Config(format!("cell reference '{reference}' has no row")))?;
    let (letters, digits) = reference.split_at(split);

    let column = column_index(letters)?;
    let row: u32 = digits
        .parse()
        .map_err(|_| SieveError::Config(format!("invalid row in cell reference '{reference}'")))?;
    if row == 0 {
        return Err(SieveError::Config(format!(
            "row numbers start at 1 in '{reference}'"
        )));
    }

    Ok((row - 1, column))
}

/// A configured column position, written either as letters (`"S"`) or as a
/// 0-based index (`18`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColumnRef(pub usize);

impl ColumnRef {
    pub fn parse(letters: &str) -> Result<Self, SieveError> {
        column_index(letters.trim()).map(ColumnRef)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&column_letters(self.0))
    }
}

impl<'de> Deserialize<'de> for ColumnRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Index(usize),
            Letters(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Index(i) => Ok(ColumnRef(i)),
            Raw::Letters(s) => ColumnRef::parse(&s).map_err(serde::de::Error::custom),
        }
    }
}
