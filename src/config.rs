//! Run configuration.
//!
//! Loaded from a TOML file; every key is optional and falls back to the
//! layout of the transfer reports this tool was built for.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::classify::compile_patterns;
use crate::error::SieveError;
use crate::reader::{ColumnRef, ReadStrategy};

/// Columns the store adds on top of the configured ones.
pub const RESERVED_COLUMNS: &[&str] = &[
    "id",
    "level",
    "parent_path",
    "parent_external_id",
    "source_batch",
    "imported_at",
];

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SieveConfig {
    /// Only segments whose name starts with this prefix are processed.
    pub segment_prefix: String,
    pub reader: ReaderConfig,
    pub columns: ColumnsConfig,
    pub classify: ClassifyConfig,
    pub output: OutputConfig,
    pub store: StoreConfig,
}

impl Default for SieveConfig {
    fn default() -> Self {
        Self {
            segment_prefix: "Transfer Report".to_string(),
            reader: ReaderConfig::default(),
            columns: ColumnsConfig::default(),
            classify: ClassifyConfig::default(),
            output: OutputConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReaderConfig {
    pub strategy: ReadStrategy,
}

/// Column roles used by classification.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ColumnsConfig {
    pub path: ColumnRef,
    pub size: ColumnRef,
    pub external_id: ColumnRef,
    /// Status candidates in priority order; the first non-blank cell wins.
    pub status: Vec<ColumnRef>,
}

impl Default for ColumnsConfig {
    fn default() -> Self {
        Self {
            path: ColumnRef(0),
            size: ColumnRef(1),
            external_id: ColumnRef(3),
            status: vec![ColumnRef(18), ColumnRef(17), ColumnRef(15)],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClassifyConfig {
    /// Sanitized status values longer than this are treated as anomalous.
    pub status_max_len: usize,
    /// Folder path patterns, evaluated in order. All matches apply.
    pub patterns: Vec<PatternConfig>,
}

impl Default for ClassifyConfig {
    fn default() -> Self {
        Self {
            status_max_len: 50,
            patterns: vec![
                PatternConfig::new(
                    "Claims",
                    r".*/Clients/[^/]+/[^/]+/Claim Documents/[^/]+/?",
                ),
                PatternConfig::new("Customer-Folders", r".*/Clients/[^/]+/?"),
                PatternConfig::new("Policy-Reference", r".*/Clients/[^/]+/[^/]+/?"),
            ],
        }
    }
}

/// A named path pattern. The regex must match the whole path.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatternConfig {
    pub name: String,
    pub regex: String,
}

impl PatternConfig {
    pub fn new(name: &str, regex: &str) -> Self {
        Self {
            name: name.to_string(),
            regex: regex.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    /// Root directory of per-label CSV files. Disabled when unset.
    pub csv_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Text,
    Integer,
    Datetime,
}

impl ColumnKind {
    pub fn sql_type(self) -> &'static str {
        match self {
            ColumnKind::Integer => "INTEGER",
            ColumnKind::Text | ColumnKind::Datetime => "TEXT",
        }
    }
}

/// One stored column and the sheet column it is read from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreColumn {
    pub name: String,
    pub column: ColumnRef,
    #[serde(default = "default_kind")]
    pub kind: ColumnKind,
}

fn default_kind() -> ColumnKind {
    ColumnKind::Text
}

impl StoreColumn {
    fn new(name: &str, column: usize, kind: ColumnKind) -> Self {
        Self {
            name: name.to_string(),
            column: ColumnRef(column),
            kind,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// SQLite database file. Disabled when unset.
    pub database: Option<PathBuf>,
    pub table: String,
    /// Rows per committed transaction.
    pub batch_size: usize,
    /// Stored column that the status views group by.
    pub status_column: String,
    pub columns: Vec<StoreColumn>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        use ColumnKind::*;

        let columns = [
            ("file_name", Text),
            ("source_file_size", Integer),
            ("target_file_size", Integer),
            ("target_file_id", Text),
            ("source_account", Text),
            ("target_account", Text),
            ("creation_time", Datetime),
            ("source_last_modified_by", Text),
            ("source_last_modification_time", Datetime),
            ("target_last_modification_time", Datetime),
            ("last_access_time", Datetime),
            ("start_time", Datetime),
            ("transfer_time", Datetime),
            ("checksum_method", Text),
            ("checksum", Text),
            ("file_status", Text),
            ("errors", Text),
            ("status", Text),
            ("translated_file_name", Text),
        ]
        .iter()
        .enumerate()
        .map(|(i, (name, kind))| StoreColumn::new(name, i, *kind))
        .collect();

        Self {
            database: None,
            table: "transfer_objects".to_string(),
            batch_size: 1000,
            status_column: "file_status".to_string(),
            columns,
        }
    }
}

impl StoreConfig {
    /// Returns the stored column read from `column`, if any.
    pub fn column_for(&self, column: ColumnRef) -> Option<&StoreColumn> {
        self.columns.iter().find(|c| c.column == column)
    }
}

impl SieveConfig {
    /// Reads and validates a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self, SieveError> {
        let config = Self::read(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a TOML configuration file without validating it, so callers
    /// can apply overrides first.
    pub fn read(path: &Path) -> Result<Self, SieveError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SieveError::Config(format!("Cannot read config {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, SieveError> {
        let config = Self::parse(content)?;
        config.validate()?;
        Ok(config)
    }

    fn parse(content: &str) -> Result<Self, SieveError> {
        toml::from_str(content)
            .map_err(|e| SieveError::Config(format!("Failed to parse TOML config: {e}")))
    }

    /// Checks cross-field rules that serde cannot express.
    pub fn validate(&self) -> Result<(), SieveError> {
        if self.output.csv_dir.is_none() && self.store.database.is_none() {
            return Err(SieveError::Config(
                "no destination configured: set output.csv_dir and/or store.database".into(),
            ));
        }
        if self.classify.status_max_len == 0 {
            return Err(SieveError::Config("classify.status_max_len must be positive".into()));
        }

        let mut names = HashSet::new();
        for pattern in &self.classify.patterns {
            if !is_label_name(&pattern.name) {
                return Err(SieveError::Config(format!(
                    "pattern name '{}' may only contain letters, digits, '-' and '_'",
                    pattern.name
                )));
            }
            if !names.insert(pattern.name.to_ascii_lowercase()) {
                return Err(SieveError::Config(format!(
                    "duplicate pattern name '{}'",
                    pattern.name
                )));
            }
        }
        compile_patterns(&self.classify.patterns)?;

        if self.store.database.is_some() {
            self.validate_store()?;
        }
        Ok(())
    }

    fn validate_store(&self) -> Result<(), SieveError> {
        let store = &self.store;

        if store.batch_size == 0 {
            return Err(SieveError::Config("store.batch_size must be positive".into()));
        }
        if !is_sql_identifier(&store.table) {
            return Err(SieveError::Config(format!(
                "invalid table name '{}'",
                store.table
            )));
        }

        let mut seen = HashSet::new();
        for column in &store.columns {
            let lower = column.name.to_ascii_lowercase();
            if !is_sql_identifier(&column.name) {
                return Err(SieveError::Config(format!(
                    "invalid column name '{}'",
                    column.name
                )));
            }
            if RESERVED_COLUMNS.contains(&lower.as_str()) {
                return Err(SieveError::Config(format!(
                    "column name '{}' is reserved",
                    column.name
                )));
            }
            if !seen.insert(lower) {
                return Err(SieveError::Config(format!(
                    "duplicate column name '{}'",
                    column.name
                )));
            }
        }

        let roles = [
            ("path", self.columns.path),
            ("external_id", self.columns.external_id),
            ("size", self.columns.size),
        ];
        for (role, column) in roles {
            if store.column_for(column).is_none() {
                return Err(SieveError::Config(format!(
                    "store.columns has no column read from {column} ({role})"
                )));
            }
        }
        if store.column_for(self.columns.path) == store.column_for(self.columns.external_id) {
            return Err(SieveError::Config(
                "path and external_id must be different columns".into(),
            ));
        }
        if !store
            .columns
            .iter()
            .any(|c| c.name.eq_ignore_ascii_case(&store.status_column))
        {
            return Err(SieveError::Config(format!(
                "store.status_column '{}' is not a stored column",
                store.status_column
            )));
        }
        Ok(())
    }
}

/// Label names end up in file names, so they are kept to a safe alphabet.
fn is_label_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

pub(crate) fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [output]
        csv_dir = "out"
    "#;

    #[test]
    fn defaults_match_transfer_report_layout() {
        let config = SieveConfig::from_toml_str(MINIMAL).unwrap();

        assert_eq!(config.segment_prefix, "Transfer Report");
        assert_eq!(config.reader.strategy, ReadStrategy::Auto);
        assert_eq!(config.columns.path, ColumnRef(0));
        assert_eq!(
            config.columns.status,
            vec![ColumnRef(18), ColumnRef(17), ColumnRef(15)]
        );
        assert_eq!(config.classify.status_max_len, 50);
        assert_eq!(config.classify.patterns.len(), 3);
        assert_eq!(config.store.columns.len(), 19);
        assert_eq!(config.store.batch_size, 1000);
        assert_eq!(
            config.store.column_for(ColumnRef(3)).map(|c| c.name.as_str()),
            Some("target_file_id")
        );
    }

    #[test]
    fn full_config_parses() {
        let config = SieveConfig::from_toml_str(
            r#"
            segment_prefix = "Report"

            [reader]
            strategy = "buffered"

            [columns]
            path = "A"
            size = "B"
            external_id = "C"
            status = ["E", 3]

            [classify]
            status_max_len = 20
            patterns = [{ name = "Top", regex = "/[^/]+" }]

            [store]
            database = "objects.db"
            table = "objects"
            batch_size = 10
            status_column = "state"
            columns = [
                { name = "path", column = "A" },
                { name = "bytes", column = "B", kind = "integer" },
                { name = "object_id", column = "C" },
                { name = "state", column = "E" },
                { name = "created", column = "F", kind = "datetime" },
            ]
            "#,
        )
        .unwrap();

        assert_eq!(config.reader.strategy, ReadStrategy::Buffered);
        assert_eq!(config.columns.status, vec![ColumnRef(4), ColumnRef(3)]);
        assert_eq!(config.store.columns[1].kind, ColumnKind::Integer);
        assert_eq!(config.store.columns[0].kind, ColumnKind::Text);
        assert_eq!(config.store.batch_size, 10);
    }

    #[test]
    fn a_destination_is_required() {
        let err = SieveConfig::from_toml_str("").unwrap_err();
        assert!(matches!(err, SieveError::Config(_)));
    }

    #[test]
    fn invalid_regex_is_rejected() {
        let err = SieveConfig::from_toml_str(
            r#"
            [output]
            csv_dir = "out"
            [classify]
            patterns = [{ name = "Broken", regex = "([a-z" }]
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Broken"), "{err}");
    }

    #[test]
    fn pattern_names_must_be_file_safe() {
        let mut config = SieveConfig::default();
        config.output.csv_dir = Some(PathBuf::from("out"));
        config.classify.patterns = vec![PatternConfig::new("../escape", ".*")];
        assert!(config.validate().is_err());
    }

    #[test]
    fn store_rules() {
        let mut config = SieveConfig::default();
        config.store.database = Some(PathBuf::from("x.db"));
        assert!(config.validate().is_ok());

        let mut bad = config.clone();
        bad.store.batch_size = 0;
        assert!(bad.validate().is_err());

        let mut bad = config.clone();
        bad.store.table = "drop table;".into();
        assert!(bad.validate().is_err());

        let mut bad = config.clone();
        bad.store.columns[4].name = "level".into();
        assert!(bad.validate().is_err());

        let mut bad = config.clone();
        bad.store.columns[4].name = "FILE_NAME".into();
        assert!(bad.validate().is_err());

        let mut bad = config.clone();
        bad.store.columns.retain(|c| c.name != "target_file_id");
        assert!(bad.validate().is_err());

        let mut bad = config;
        bad.store.status_column = "nope".into();
        assert!(bad.validate().is_err());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = SieveConfig::from_toml_str(
            r#"
            [output]
            csv_dir = "out"
            colour = "blue"
            "#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn load_validates_but_read_does_not() {
        let dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("sieve.toml");

        std::fs::write(&path, MINIMAL).expect("Failed to write config");
        assert!(SieveConfig::load(&path).is_ok());

        std::fs::write(&path, "segment_prefix = \"Report\"").expect("Failed to write config");
        assert!(SieveConfig::load(&path).is_err());
        assert_eq!(SieveConfig::read(&path).unwrap().segment_prefix, "Report");

        assert!(SieveConfig::read(&dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn identifiers() {
        assert!(is_sql_identifier("transfer_objects"));
        assert!(is_sql_identifier("_x1"));
        assert!(!is_sql_identifier("1x"));
        assert!(!is_sql_identifier("a-b"));
        assert!(!is_sql_identifier(""));
    }
}
