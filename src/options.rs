// ABOUTME: Transfer options shared by the export and import engines
// ABOUTME: Output formats, conflict modes and table include/exclude selection

use crate::error::{Result, TransferError};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_INSERT_BATCH_SIZE: usize = 100;
pub const DEFAULT_STREAMING_THRESHOLD: u64 = 10_000;
pub const DEFAULT_STREAM_PAGE_SIZE: u64 = 1000;
pub const DEFAULT_MIGRATION_TABLE: &str = "schema_migrations";

/// Serialization format of a dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Sql,
    Json,
    Yaml,
    Csv,
}

impl Format {
    /// # Examples
    ///
    /// ```
    /// # use dbtransfer::options::Format;
    /// assert_eq!(Format::from_name("YML").unwrap(), Format::Yaml);
    /// assert!(Format::from_name("xml").is_err());
    /// ```
    pub fn from_name(name: &str) -> Result<Self> {
        match name.trim().to_lowercase().as_str() {
            "sql" => Ok(Format::Sql),
            "json" => Ok(Format::Json),
            "yaml" | "yml" => Ok(Format::Yaml),
            "csv" => Ok(Format::Csv),
            other => Err(TransferError::Configuration(format!(
                "Unsupported format '{}'. Use sql, json, yaml or csv",
                other
            ))),
        }
    }

    /// Detect the format from a file extension, looking through a trailing `.gz`.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_lowercase();
        let name = name.strip_suffix(".gz").unwrap_or(&name);
        let ext = Path::new(name).extension()?.to_str()?;
        Format::from_name(ext).ok()
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Format::Sql => "sql",
            Format::Json => "json",
            Format::Yaml => "yaml",
            Format::Csv => "csv",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// What the importer does with rows already present in a target table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictMode {
    /// Delete existing rows, then insert.
    #[default]
    Replace,
    /// Insert alongside existing rows.
    Append,
    /// Import only into empty tables.
    Skip,
}

impl ConflictMode {
    pub fn from_name(name: &str) -> Result<Self> {
        match name.trim().to_lowercase().as_str() {
            "replace" => Ok(ConflictMode::Replace),
            "append" => Ok(ConflictMode::Append),
            "skip" => Ok(ConflictMode::Skip),
            other => Err(TransferError::Configuration(format!(
                "Unsupported conflict mode '{}'. Use replace, append or skip",
                other
            ))),
        }
    }
}

/// Options for one export or import run.
#[derive(Debug, Clone)]
pub struct TransferOptions {
    pub format: Format,
    /// Inclusion filter; `None` selects every table.
    pub tables: Option<BTreeSet<String>>,
    pub exclude: BTreeSet<String>,
    /// Row limit per table, applied after `where`.
    pub limit: Option<u64>,
    /// Raw user WHERE clause per table.
    pub where_clauses: BTreeMap<String, String>,
    pub include_schema: bool,
    pub drop_tables: bool,
    pub use_transaction: bool,
    pub batch_size: usize,
    /// Rows per generated INSERT statement in SQL dumps.
    pub insert_batch_size: usize,
    pub compress: bool,
    pub disable_foreign_keys: bool,
    pub conflict_mode: ConflictMode,
    pub stop_on_error: bool,
    pub streaming_threshold: u64,
    pub stream_page_size: u64,
    pub migration_table: String,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            format: Format::Sql,
            tables: None,
            exclude: BTreeSet::new(),
            limit: None,
            where_clauses: BTreeMap::new(),
            include_schema: false,
            drop_tables: false,
            use_transaction: true,
            batch_size: DEFAULT_BATCH_SIZE,
            insert_batch_size: DEFAULT_INSERT_BATCH_SIZE,
            compress: false,
            disable_foreign_keys: true,
            conflict_mode: ConflictMode::Replace,
            stop_on_error: false,
            streaming_threshold: DEFAULT_STREAMING_THRESHOLD,
            stream_page_size: DEFAULT_STREAM_PAGE_SIZE,
            migration_table: DEFAULT_MIGRATION_TABLE.to_string(),
        }
    }
}

impl TransferOptions {
    /// Determines if a table takes part in this transfer
    ///
    /// The inclusion filter is applied first, then the exclusion filter. The
    /// migration-tracking table is skipped unless the inclusion filter names it.
    ///
    /// # Examples
    ///
    /// ```
    /// # use dbtransfer::options::TransferOptions;
    /// let mut options = TransferOptions::default();
    /// assert!(options.should_transfer_table("users"));
    /// assert!(!options.should_transfer_table("schema_migrations"));
    ///
    /// options.tables = Some(["schema_migrations".to_string()].into());
    /// assert!(options.should_transfer_table("schema_migrations"));
    /// assert!(!options.should_transfer_table("users"));
    /// ```
    pub fn should_transfer_table(&self, table: &str) -> bool {
        if let Some(include) = &self.tables {
            if !include.contains(table) {
                return false;
            }
        } else if table == self.migration_table {
            return false;
        }

        !self.exclude.contains(table)
    }

    /// Filter a table list, keeping its order.
    pub fn select_tables(&self, all_tables: &[String]) -> Vec<String> {
        all_tables
            .iter()
            .filter(|t| self.should_transfer_table(t))
            .cloned()
            .collect()
    }

    /// WHERE clause configured for a table, ignoring blank entries.
    pub fn where_for(&self, table: &str) -> Option<&str> {
        self.where_clauses
            .get(table)
            .map(|w| w.trim())
            .filter(|w| !w.is_empty())
    }

    /// Parse a `table:clause` pair as accepted on the command line.
    pub fn add_where(&mut self, spec: &str) -> Result<()> {
        let (table, clause) = spec.split_once(':').ok_or_else(|| {
            TransferError::Configuration(format!(
                "WHERE filter must look like 'table:clause', got '{}'",
                spec
            ))
        })?;
        let table = table.trim();
        if table.is_empty() {
            return Err(TransferError::Configuration(
                "WHERE filter is missing its table name".to_string(),
            ));
        }
        self.where_clauses
            .insert(table.to_string(), clause.trim().to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_include_then_exclude() {
        let options = TransferOptions {
            tables: Some(["users".to_string(), "posts".to_string()].into()),
            exclude: ["posts".to_string()].into(),
            ..Default::default()
        };
        let all = names(&["comments", "posts", "schema_migrations", "users"]);
        assert_eq!(options.select_tables(&all), names(&["users"]));
    }

    #[test]
    fn test_migration_table_excluded_by_default() {
        let options = TransferOptions {
            migration_table: "migrations".to_string(),
            ..Default::default()
        };
        let all = names(&["migrations", "users", "schema_migrations"]);
        assert_eq!(
            options.select_tables(&all),
            names(&["users", "schema_migrations"])
        );
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(Format::from_path(Path::new("dump.sql.gz")), Some(Format::Sql));
        assert_eq!(Format::from_path(Path::new("/x/data.YAML")), Some(Format::Yaml));
        assert_eq!(Format::from_path(Path::new("data.txt")), None);
        assert_eq!(Format::from_path(Path::new("noext")), None);
    }

    #[test]
    fn test_conflict_mode_parse() {
        assert_eq!(ConflictMode::from_name("Skip").unwrap(), ConflictMode::Skip);
        assert!(ConflictMode::from_name("merge").unwrap_err().is_fatal());
    }

    #[test]
    fn test_add_where_spec() {
        let mut options = TransferOptions::default();
        options.add_where("users: status = 'a:b'").unwrap();
        assert_eq!(options.where_for("users"), Some("status = 'a:b'"));
        assert!(options.add_where("no separator").is_err());
        assert!(options.add_where(":x = 1").is_err());
        options.add_where("posts:  ").unwrap();
        assert_eq!(options.where_for("posts"), None);
    }
}
