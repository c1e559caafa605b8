// ABOUTME: Import engine that loads SQL, JSON, YAML and CSV dumps into the connected database
// ABOUTME: Runs inside scoped foreign-key and transaction guards that restore state on every path

use super::conflict::{self, ConflictDecision};
use super::csv::read_table;
use super::sql::{estimate_insert_rows, is_transaction_control, split_statements, target_table};
use crate::adapter::{binary_from_json, DatabaseAdapter, ForeignKeyGuard, Row, TransactionGuard};
use crate::dialect::AdapterType;
use crate::error::{Result, TransferError};
use crate::export::CSV_METADATA_FILE;
use crate::options::{Format, TransferOptions};
use crate::schema::{count_rows, list_tables, table_layout, TableLayout};
use crate::stats::{TableVerification, TransferStatistics, VerifyReport};
use crate::storage::{FileSystem, LocalFileSystem};
use crate::utils::{sanitize_identifier, sha256_hex};
use flate2::read::GzDecoder;
use regex::Regex;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsStr;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static YAML_KEY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_\-]*:(\s|$)").expect("static regex must compile")
});

fn is_gzip(path: &Path, data: &[u8]) -> bool {
    data.starts_with(&[0x1f, 0x8b])
        || path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("gz"))
            .unwrap_or(false)
}

fn gunzip(data: &[u8], path: &Path) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| TransferError::io(path, e))?;
    Ok(out)
}

/// Read a file, decompressing gzip content, as UTF-8 text.
fn read_text(fs: &dyn FileSystem, path: &Path) -> Result<String> {
    let raw = fs.read_file(path)?;
    let bytes = if is_gzip(path, &raw) {
        gunzip(&raw, path)?
    } else {
        raw
    };
    String::from_utf8(bytes).map_err(|e| {
        TransferError::Data(format!("{} is not valid UTF-8: {}", path.display(), e))
    })
}

/// A bare `<name>.csv` or `<name>.csv.gz` with no directory part.
fn is_plain_csv_file_name(name: &str) -> bool {
    Path::new(name).file_name() == Some(OsStr::new(name))
        && (name.ends_with(".csv") || name.ends_with(".csv.gz"))
}

/// Guess a dump format from its content: JSON braces, YAML keys, else SQL.
///
/// # Examples
///
/// ```
/// # use dbtransfer::import::engine::detect_format;
/// # use dbtransfer::options::Format;
/// assert_eq!(detect_format("{\"data\": {}}"), Format::Json);
/// assert_eq!(detect_format("# dump\nmetadata:\n  tables_count: 0\n"), Format::Yaml);
/// assert_eq!(detect_format("-- header\nINSERT INTO t VALUES (1);"), Format::Sql);
/// ```
pub fn detect_format(text: &str) -> Format {
    let trimmed = text.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return Format::Json;
    }
    let first = trimmed
        .lines()
        .map(str::trim_end)
        .find(|line| !line.trim().is_empty() && !line.starts_with('#'));
    match first {
        Some(line) if line == "---" || YAML_KEY_LINE.is_match(line) => Format::Yaml,
        _ => Format::Sql,
    }
}

fn statement_preview(statement: &str) -> String {
    let flat: String = statement.split_whitespace().collect::<Vec<_>>().join(" ");
    let preview: String = flat.chars().take(80).collect();
    if flat.chars().count() > 80 {
        format!("{}...", sanitize_identifier(&preview))
    } else {
        sanitize_identifier(&preview)
    }
}

/// Borrowed state for one import run inside the guards.
struct ImportRun<'a> {
    adapter: &'a dyn DatabaseAdapter,
    fs: &'a dyn FileSystem,
    options: &'a TransferOptions,
    dialect: AdapterType,
    stats: &'a mut TransferStatistics,
}

impl ImportRun<'_> {
    /// Fatal errors and every error under `stop_on_error` abort; the rest are collected.
    fn fail(&mut self, error: TransferError) -> Result<()> {
        if error.is_fatal() || self.options.stop_on_error {
            return Err(error);
        }
        self.stats.record_error(error.to_string());
        Ok(())
    }

    fn import_sql(&mut self, script: &str) -> Result<()> {
        let statements = split_statements(script, self.dialect);
        tracing::info!("Executing {} statement(s)", statements.len());
        let mut tables = BTreeSet::new();

        for statement in &statements {
            if is_transaction_control(statement) {
                tracing::debug!("Skipping transaction control statement: {}", statement);
                continue;
            }
            let table = target_table(statement);
            if let Some(name) = &table {
                if !self.options.should_transfer_table(name) {
                    tracing::debug!("Skipping statement for filtered table {}", sanitize_identifier(name));
                    continue;
                }
            }
            match self.adapter.execute(statement) {
                Ok(_) => {
                    self.stats.rows_imported += estimate_insert_rows(statement, self.dialect);
                    if let Some(name) = table {
                        tables.insert(name);
                    }
                }
                Err(e) => self.fail(TransferError::Data(format!(
                    "Statement failed ({}): {}",
                    statement_preview(statement),
                    e
                )))?,
            }
        }
        self.stats.tables_processed += tables.len() as u64;
        Ok(())
    }

    fn import_document(&mut self, text: &str, format: Format) -> Result<()> {
        let document: JsonValue = match format {
            Format::Yaml => serde_yaml::from_str(text)
                .map_err(|e| TransferError::Data(format!("Invalid YAML document: {}", e)))?,
            _ => serde_json::from_str(text)
                .map_err(|e| TransferError::Data(format!("Invalid JSON document: {}", e)))?,
        };
        let data = document
            .get("data")
            .and_then(JsonValue::as_object)
            .ok_or_else(|| TransferError::Data("Document has no 'data' object".to_string()))?;

        for (table, entry) in data {
            if !self.options.should_transfer_table(table) {
                tracing::debug!("Skipping filtered table {}", sanitize_identifier(table));
                continue;
            }
            let rows = match entry {
                JsonValue::Array(rows) => rows,
                other => match other.get("rows").and_then(JsonValue::as_array) {
                    Some(rows) => rows,
                    None => {
                        self.fail(TransferError::Data(format!(
                            "Table '{}' has neither a row list nor a 'rows' key",
                            sanitize_identifier(table)
                        )))?;
                        continue;
                    }
                },
            };

            let mut objects = Vec::with_capacity(rows.len());
            for (index, row) in rows.iter().enumerate() {
                match row {
                    JsonValue::Object(map) => objects.push(map.clone()),
                    _ => self.fail(TransferError::Data(format!(
                        "Row {} of table '{}' is not an object",
                        index + 1,
                        sanitize_identifier(table)
                    )))?,
                }
            }
            self.import_rows(table, objects)?;
        }
        Ok(())
    }

    fn import_csv_file(&mut self, table: &str, path: &Path, expected_checksum: Option<&str>) -> Result<()> {
        let text = read_text(self.fs, path)?;
        if let Some(expected) = expected_checksum {
            let actual = sha256_hex(text.as_bytes());
            if !actual.eq_ignore_ascii_case(expected) {
                self.stats.record_warning(format!(
                    "Checksum mismatch for {}: expected {}, got {}",
                    path.display(),
                    expected,
                    actual
                ));
            }
        }
        let parsed = match read_table(&text) {
            Ok(parsed) => parsed,
            Err(e) => {
                return self.fail(TransferError::Data(format!("{}: {}", path.display(), e)));
            }
        };
        for line in &parsed.skipped {
            self.stats.record_warning(format!(
                "Skipped malformed row {} in {} (column count mismatch)",
                line,
                path.display()
            ));
        }
        self.import_rows(table, parsed.rows)
    }

    /// Conflict resolution, then batched inserts for one table.
    fn import_rows(&mut self, table: &str, rows: Vec<Row>) -> Result<()> {
        match self.adapter.has_table(table) {
            Ok(true) => {}
            Ok(false) => {
                return self.fail(TransferError::State(format!(
                    "Target table '{}' does not exist",
                    sanitize_identifier(table)
                )))
            }
            Err(e) => return self.fail(e),
        }
        let layout = match table_layout(self.adapter, table) {
            Ok(layout) => layout,
            Err(e) => return self.fail(e),
        };

        match conflict::resolve(self.adapter, table, self.options.conflict_mode) {
            Ok(ConflictDecision::Import) => {}
            Ok(ConflictDecision::Skip { existing_rows }) => {
                tracing::info!(
                    "Skipping table {}: it already holds {} row(s)",
                    sanitize_identifier(table),
                    existing_rows
                );
                return Ok(());
            }
            Err(e) => return self.fail(e),
        }

        let mut imported = 0u64;
        for chunk in rows.chunks(self.options.batch_size.max(1)) {
            imported += self.insert_batch(table, &layout, chunk)?;
        }
        tracing::info!(
            "Imported table {} ({} of {} rows)",
            sanitize_identifier(table),
            imported,
            rows.len()
        );
        self.stats.rows_imported += imported;
        self.stats.tables_processed += 1;
        Ok(())
    }

    /// Insert rows with prepared multi-row statements, returning rows written.
    ///
    /// Values of binary columns are decoded from base64 and bound as hex.
    fn insert_batch(&mut self, table: &str, layout: &TableLayout, rows: &[Row]) -> Result<u64> {
        let mut columns: Vec<String> = Vec::new();
        for row in rows {
            for key in row.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }
        if columns.is_empty() {
            return Ok(0);
        }

        let per_statement = (self.dialect.max_bind_parameters() / columns.len()).max(1);
        let column_list: Vec<String> = columns
            .iter()
            .map(|c| self.dialect.quote_identifier(c))
            .collect();
        let placeholders: Vec<&str> = columns
            .iter()
            .map(|c| {
                if layout.is_binary(c) {
                    self.dialect.binary_placeholder()
                } else {
                    "?"
                }
            })
            .collect();
        let group = format!("({})", placeholders.join(", "));

        let mut written = 0u64;
        for chunk in rows.chunks(per_statement) {
            let sql = format!(
                "INSERT INTO {} ({}) VALUES {}",
                self.dialect.quote_identifier(table),
                column_list.join(", "),
                vec![group.as_str(); chunk.len()].join(", ")
            );
            let bindings: Vec<JsonValue> = chunk
                .iter()
                .flat_map(|row| {
                    columns.iter().map(|c| {
                        let value = row.get(c).unwrap_or(&JsonValue::Null);
                        if layout.is_binary(c) {
                            binary_from_json(value)
                                .map(|bytes| JsonValue::String(hex::encode(bytes)))
                                .unwrap_or(JsonValue::Null)
                        } else {
                            value.clone()
                        }
                    })
                })
                .collect();
            match self.adapter.execute_prepared(&sql, &bindings) {
                Ok(_) => {
                    written += chunk.len() as u64;
                    tracing::debug!("Inserted {} row(s) into {}", chunk.len(), sanitize_identifier(table));
                }
                Err(e) => self.fail(TransferError::Data(format!(
                    "Insert of {} row(s) into '{}' failed: {}",
                    chunk.len(),
                    sanitize_identifier(table),
                    e
                )))?,
            }
        }
        Ok(written)
    }
}

/// Imports dumps through one database connection.
///
/// The importer owns its adapter and disconnects it when dropped.
pub struct Importer {
    adapter: Box<dyn DatabaseAdapter>,
    fs: Box<dyn FileSystem>,
    options: TransferOptions,
    format_override: Option<Format>,
    stats: TransferStatistics,
}

impl Importer {
    pub fn new(adapter: Box<dyn DatabaseAdapter>, options: TransferOptions) -> Self {
        Self {
            adapter,
            fs: Box::new(LocalFileSystem),
            options,
            format_override: None,
            stats: TransferStatistics::default(),
        }
    }

    pub fn with_file_system(mut self, fs: Box<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }

    /// Skip format detection and parse input as `format`.
    pub fn with_format(mut self, format: Format) -> Self {
        self.format_override = Some(format);
        self
    }

    pub fn adapter(&self) -> &dyn DatabaseAdapter {
        self.adapter.as_ref()
    }

    pub fn file_system(&self) -> &dyn FileSystem {
        self.fs.as_ref()
    }

    pub fn statistics(&self) -> &TransferStatistics {
        &self.stats
    }

    pub fn errors(&self) -> &[String] {
        &self.stats.errors
    }

    pub fn warnings(&self) -> &[String] {
        &self.stats.warnings
    }

    pub fn disconnect(&mut self) -> Result<()> {
        self.adapter.disconnect()
    }

    /// Run `body` inside the foreign-key and transaction guards.
    ///
    /// Commits only when no error was collected. Returns whether the run was clean.
    fn run_scoped(&mut self, body: impl FnOnce(&mut ImportRun<'_>) -> Result<()>) -> Result<bool> {
        let adapter = self.adapter.as_ref();
        let _foreign_keys = if self.options.disable_foreign_keys {
            Some(ForeignKeyGuard::disable(adapter)?)
        } else {
            None
        };
        let transaction = if self.options.use_transaction {
            TransactionGuard::begin_if_supported(adapter)?
        } else {
            None
        };

        let outcome = {
            let mut run = ImportRun {
                adapter,
                fs: self.fs.as_ref(),
                options: &self.options,
                dialect: adapter.adapter_type(),
                stats: &mut self.stats,
            };
            body(&mut run)
        };

        match outcome {
            Ok(()) if !self.stats.has_errors() => {
                if let Some(tx) = transaction {
                    tx.commit()?;
                }
                tracing::info!(
                    "Import finished: {} row(s) into {} table(s)",
                    self.stats.rows_imported,
                    self.stats.tables_processed
                );
                Ok(true)
            }
            Ok(()) => {
                if let Some(tx) = transaction {
                    tx.rollback()?;
                    let count = self.stats.errors.len();
                    self.stats
                        .record_warning(format!("Import rolled back after {} error(s)", count));
                }
                Ok(false)
            }
            Err(e) => {
                if let Some(tx) = transaction {
                    if let Err(rollback_error) = tx.rollback() {
                        tracing::warn!("Rollback after failed import also failed: {}", rollback_error);
                    }
                }
                Err(e)
            }
        }
    }

    /// Import a SQL, JSON, YAML or single-table CSV file, gzip-compressed or not.
    ///
    /// Returns `Ok(true)` when every statement and row was written, `Ok(false)`
    /// when errors were collected (see [`Importer::errors`]).
    pub fn import_from_file(&mut self, path: &Path) -> Result<bool> {
        self.stats = TransferStatistics::default();
        let text = read_text(self.fs.as_ref(), path)?;
        let format = self
            .format_override
            .or_else(|| Format::from_path(path))
            .unwrap_or_else(|| detect_format(&text));
        tracing::info!("Importing {} as {}", path.display(), format);

        match format {
            Format::Sql => self.run_scoped(|run| run.import_sql(&text)),
            Format::Json | Format::Yaml => self.run_scoped(|run| run.import_document(&text, format)),
            Format::Csv => {
                let table = csv_table_name(path).ok_or_else(|| {
                    TransferError::Configuration(format!(
                        "Cannot derive a table name from {}",
                        path.display()
                    ))
                })?;
                if !self.options.should_transfer_table(&table) {
                    tracing::info!("Table {} is filtered out", sanitize_identifier(&table));
                    return Ok(true);
                }
                self.run_scoped(|run| run.import_csv_file(&table, path, None))
            }
        }
    }

    /// Import every `<table>.csv[.gz]` in `dir`, in the order `export_metadata.json` lists them.
    pub fn import_from_csv_directory(&mut self, dir: &Path) -> Result<bool> {
        self.stats = TransferStatistics::default();
        if !self.fs.is_dir(dir) {
            return Err(TransferError::io(
                dir,
                std::io::Error::new(std::io::ErrorKind::NotFound, "directory not found"),
            ));
        }

        let metadata = self.read_csv_metadata(dir);
        let listed: Vec<String> = metadata
            .as_ref()
            .and_then(|m| m.get("tables"))
            .and_then(JsonValue::as_array)
            .map(|names| names.iter().filter_map(|n| n.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        let checksums: BTreeMap<String, String> = metadata
            .as_ref()
            .and_then(|m| m.get("checksums"))
            .and_then(JsonValue::as_object)
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        let mut files: Vec<PathBuf> = Vec::new();
        for name in &listed {
            if !is_plain_csv_file_name(name) {
                self.stats.record_warning(format!(
                    "Ignoring metadata entry '{}': not a CSV file name inside {}",
                    sanitize_identifier(name),
                    dir.display()
                ));
                continue;
            }
            let path = dir.join(name);
            if self.fs.file_exists(&path) {
                files.push(path);
            } else {
                self.stats
                    .record_warning(format!("Expected file {} not found in {}", name, dir.display()));
            }
        }
        let mut extra = self.fs.glob(&dir.join("*.csv"))?;
        extra.extend(self.fs.glob(&dir.join("*.csv.gz"))?);
        extra.sort();
        for path in extra {
            if !files.contains(&path) {
                files.push(path);
            }
        }

        let mut plan = Vec::new();
        for path in files {
            let Some(table) = csv_table_name(&path) else {
                continue;
            };
            if !self.options.should_transfer_table(&table) {
                tracing::debug!("Skipping filtered table {}", sanitize_identifier(&table));
                continue;
            }
            let checksum = path
                .file_name()
                .and_then(|n| checksums.get(n.to_string_lossy().as_ref()))
                .cloned();
            plan.push((table, path, checksum));
        }
        tracing::info!("Importing {} CSV file(s) from {}", plan.len(), dir.display());

        self.run_scoped(|run| {
            for (table, path, checksum) in &plan {
                run.import_csv_file(table, path, checksum.as_deref())?;
            }
            Ok(())
        })
    }

    fn read_csv_metadata(&mut self, dir: &Path) -> Option<JsonValue> {
        let path = dir.join(CSV_METADATA_FILE);
        if !self.fs.file_exists(&path) {
            return None;
        }
        let parsed = self
            .fs
            .read_file(&path)
            .and_then(|bytes| serde_json::from_slice::<JsonValue>(&bytes).map_err(TransferError::from));
        match parsed {
            Ok(value) => Some(value),
            Err(e) => {
                self.stats
                    .record_warning(format!("Ignoring unreadable {}: {}", path.display(), e));
                None
            }
        }
    }

    /// Compare current row counts with the expected ones.
    pub fn verify_import(&self, expected: &BTreeMap<String, u64>) -> VerifyReport {
        let mut report = VerifyReport::default();
        for (table, expected_rows) in expected {
            let actual = match count_rows(self.adapter.as_ref(), table, None) {
                Ok(count) => Some(count),
                Err(e) => {
                    tracing::warn!("Could not count rows of {}: {}", sanitize_identifier(table), e);
                    None
                }
            };
            report.tables.insert(
                table.clone(),
                TableVerification {
                    expected: *expected_rows,
                    actual,
                    matches: actual == Some(*expected_rows),
                },
            );
        }
        report
    }

    /// Delete every row of every table, returning the tables cleared.
    ///
    /// The migration-tracking table is kept unless `include_migration_table` is set.
    pub fn clear_all_data(&mut self, include_migration_table: bool) -> Result<Vec<String>> {
        let adapter = self.adapter.as_ref();
        let dialect = adapter.adapter_type();
        let tables: Vec<String> = list_tables(adapter)?
            .into_iter()
            .filter(|t| include_migration_table || *t != self.options.migration_table)
            .collect();

        let _foreign_keys = ForeignKeyGuard::disable(adapter)?;
        let transaction = TransactionGuard::begin_if_supported(adapter)?;
        for table in &tables {
            let deleted = adapter.execute(&dialect.delete_all_sql(table))?;
            tracing::info!("Cleared {} ({} rows)", sanitize_identifier(table), deleted);
        }
        if let Some(tx) = transaction {
            tx.commit()?;
        }
        Ok(tables)
    }
}

impl Drop for Importer {
    fn drop(&mut self) {
        if let Err(e) = self.adapter.disconnect() {
            tracing::warn!("Error while disconnecting importer: {}", e);
        }
    }
}

/// Table name for a CSV file: the file name without `.csv` or `.csv.gz`.
pub fn csv_table_name(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let stem = name
        .strip_suffix(".gz")
        .unwrap_or(name)
        .strip_suffix(".csv")?;
    (!stem.is_empty()).then(|| stem.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::SqliteAdapter;
    use crate::options::ConflictMode;
    use crate::storage::MemoryFileSystem;

    fn importer(options: TransferOptions, fs: MemoryFileSystem) -> Importer {
        let adapter = SqliteAdapter::open_in_memory().unwrap();
        adapter
            .execute(
                "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);
                 INSERT INTO users VALUES (1, 'existing');
                 CREATE TABLE schema_migrations (version BIGINT PRIMARY KEY);
                 INSERT INTO schema_migrations VALUES (1);",
            )
            .unwrap();
        Importer::new(Box::new(adapter), options).with_file_system(Box::new(fs))
    }

    fn count(importer: &Importer, table: &str) -> u64 {
        count_rows(importer.adapter(), table, None).unwrap()
    }

    #[test]
    fn test_csv_table_name() {
        assert_eq!(csv_table_name(Path::new("/d/users.csv")).as_deref(), Some("users"));
        assert_eq!(csv_table_name(Path::new("/d/users.csv.gz")).as_deref(), Some("users"));
        assert_eq!(csv_table_name(Path::new("/d/users.txt")), None);
    }

    #[test]
    fn test_sql_import_skips_transaction_control() {
        let fs = MemoryFileSystem::new();
        fs.write_file(
            Path::new("/in/dump.sql"),
            b"BEGIN TRANSACTION;\nDELETE FROM \"users\";\nINSERT INTO \"users\" VALUES (5, 'a;b'), (6, 'c');\nCOMMIT;\n",
        )
        .unwrap();
        let mut importer = importer(TransferOptions::default(), fs);
        assert!(importer.import_from_file(Path::new("/in/dump.sql")).unwrap());
        assert_eq!(importer.statistics().rows_imported, 2);
        assert_eq!(count(&importer, "users"), 2);
    }

    #[test]
    fn test_errors_roll_back_without_stop_on_error() {
        let fs = MemoryFileSystem::new();
        fs.write_file(
            Path::new("/in/dump.sql"),
            b"INSERT INTO users VALUES (7, 'x');\nINSERT INTO nowhere VALUES (1);\nINSERT INTO users VALUES (8, 'y');\n",
        )
        .unwrap();
        let mut importer = importer(TransferOptions::default(), fs);
        assert!(!importer.import_from_file(Path::new("/in/dump.sql")).unwrap());
        assert_eq!(importer.errors().len(), 1);
        assert_eq!(count(&importer, "users"), 1);
    }

    #[test]
    fn test_stop_on_error_aborts() {
        let fs = MemoryFileSystem::new();
        fs.write_file(
            Path::new("/in/dump.sql"),
            b"INSERT INTO users VALUES (7, 'x');\nINSERT INTO nowhere VALUES (1);\n",
        )
        .unwrap();
        let options = TransferOptions {
            stop_on_error: true,
            ..Default::default()
        };
        let mut importer = importer(options, fs);
        assert!(importer.import_from_file(Path::new("/in/dump.sql")).is_err());
        assert_eq!(count(&importer, "users"), 1);
        // The connection is usable again after the rollback
        importer.adapter().execute("INSERT INTO users VALUES (9, 'z')").unwrap();
    }

    #[test]
    fn test_json_missing_table_is_state_error() {
        let fs = MemoryFileSystem::new();
        fs.write_file(
            Path::new("/in/data.json"),
            br#"{"data": {"ghosts": [{"id": 1}], "users": {"rows_count": 1, "rows": [{"id": 3, "name": "new"}]}}}"#,
        )
        .unwrap();
        let mut importer = importer(TransferOptions::default(), fs);
        assert!(!importer.import_from_file(Path::new("/in/data.json")).unwrap());
        assert!(importer.errors()[0].contains("ghosts"));
    }

    #[test]
    fn test_yaml_detected_from_content_with_append() {
        let fs = MemoryFileSystem::new();
        fs.write_file(
            Path::new("/in/dump"),
            b"metadata:\n  tables_count: 1\ndata:\n  users:\n  - id: 2\n    name: ''\n",
        )
        .unwrap();
        let options = TransferOptions {
            conflict_mode: ConflictMode::Append,
            ..Default::default()
        };
        let mut importer = importer(options, fs);
        assert!(importer.import_from_file(Path::new("/in/dump")).unwrap());
        assert_eq!(count(&importer, "users"), 2);
        let row = importer
            .adapter()
            .fetch_row("SELECT name FROM users WHERE id = 2", &[])
            .unwrap()
            .unwrap();
        assert_eq!(row["name"], serde_json::json!(""));
    }

    #[test]
    fn test_csv_directory_warns_on_missing_and_checksum() {
        let fs = MemoryFileSystem::new();
        fs.write_file(
            Path::new("/csv/export_metadata.json"),
            br#"{"tables": ["users.csv", "posts.csv"], "checksums": {"users.csv": "deadbeef"}}"#,
        )
        .unwrap();
        fs.write_file(Path::new("/csv/users.csv"), b"id,name\n10,ann\n11\n").unwrap();
        let mut importer = importer(TransferOptions::default(), fs);
        assert!(importer.import_from_csv_directory(Path::new("/csv")).unwrap());
        let warnings = importer.warnings().join("\n");
        assert!(warnings.contains("posts.csv"));
        assert!(warnings.contains("Checksum mismatch"));
        assert!(warnings.contains("Skipped malformed row 3"));
        assert_eq!(count(&importer, "users"), 1);
    }

    #[test]
    fn test_csv_directory_ignores_entries_outside_the_directory() {
        let fs = MemoryFileSystem::new();
        fs.write_file(
            Path::new("/csv/export_metadata.json"),
            br#"{"tables": ["../secret/users.csv", "/secret/users.csv", "nested/users.csv"]}"#,
        )
        .unwrap();
        fs.write_file(Path::new("/secret/users.csv"), b"id,name\n99,leaked\n").unwrap();
        fs.write_file(Path::new("/csv/nested/users.csv"), b"id,name\n98,nested\n").unwrap();
        let mut importer = importer(TransferOptions::default(), fs);
        assert!(importer.import_from_csv_directory(Path::new("/csv")).unwrap());

        let ignored = importer
            .warnings()
            .iter()
            .filter(|w| w.starts_with("Ignoring metadata entry"))
            .count();
        assert_eq!(ignored, 3);
        assert_eq!(count(&importer, "users"), 1);
        assert_eq!(importer.statistics().tables_processed, 0);
    }

    #[test]
    fn test_plain_csv_file_names() {
        assert!(is_plain_csv_file_name("users.csv"));
        assert!(is_plain_csv_file_name("users.csv.gz"));
        assert!(!is_plain_csv_file_name("../users.csv"));
        assert!(!is_plain_csv_file_name("/tmp/users.csv"));
        assert!(!is_plain_csv_file_name("users.txt"));
        assert!(!is_plain_csv_file_name(".."));
    }

    #[test]
    fn test_clear_all_data_keeps_migration_table() {
        let mut importer = importer(TransferOptions::default(), MemoryFileSystem::new());
        let cleared = importer.clear_all_data(false).unwrap();
        assert_eq!(cleared, vec!["users"]);
        assert_eq!(count(&importer, "users"), 0);
        assert_eq!(count(&importer, "schema_migrations"), 1);

        importer.clear_all_data(true).unwrap();
        assert_eq!(count(&importer, "schema_migrations"), 0);
    }

    #[test]
    fn test_verify_import_reports_missing_tables() {
        let importer = importer(TransferOptions::default(), MemoryFileSystem::new());
        let expected: BTreeMap<String, u64> =
            [("users".to_string(), 1), ("ghosts".to_string(), 0)].into();
        let report = importer.verify_import(&expected);
        assert!(report.tables["users"].matches);
        assert_eq!(report.tables["ghosts"].actual, None);
        assert_eq!(report.mismatched(), vec!["ghosts"]);
    }
}
