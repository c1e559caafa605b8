// ABOUTME: Export engine that reads selected tables and writes SQL, JSON, YAML or CSV output
// ABOUTME: Large SQL/CSV exports to the local file system are paged and streamed to disk

use super::csv as csv_format;
use super::document::{self, TableSnapshot};
use super::sink::{gzip, output_path, DumpOutput, StreamSink};
use super::sql;
use crate::adapter::{DatabaseAdapter, Row};
use crate::dialect::AdapterType;
use crate::error::{Result, TransferError};
use crate::options::{Format, TransferOptions};
use crate::schema::{self, TableLayout};
use crate::stats::TransferStatistics;
use crate::storage::{FileSystem, LocalFileSystem};
use crate::utils::{sanitize_identifier, sha256_hex};
use crate::where_clause::{parameterize, ParameterizedClause};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Name of the metadata file written next to CSV exports.
pub const CSV_METADATA_FILE: &str = "export_metadata.json";

/// Output path and statistics of a finished export.
#[derive(Debug, Clone)]
pub struct ExportResult {
    pub path: PathBuf,
    pub statistics: TransferStatistics,
}

/// Table chosen for export with the number of rows it will contribute.
struct PlannedTable {
    name: String,
    layout: TableLayout,
    filter: Option<ParameterizedClause>,
    rows: u64,
}

fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// File name for a table's CSV output.
pub fn csv_file_name(table: &str, compress: bool) -> String {
    let safe: String = table
        .chars()
        .map(|c| if matches!(c, '/' | '\\') || c.is_control() { '_' } else { c })
        .collect();
    if compress {
        format!("{}.csv.gz", safe)
    } else {
        format!("{}.csv", safe)
    }
}

/// Exports table contents through one database connection.
///
/// The exporter owns its adapter and disconnects it when dropped.
pub struct Exporter {
    adapter: Box<dyn DatabaseAdapter>,
    fs: Box<dyn FileSystem>,
    options: TransferOptions,
    dialect: AdapterType,
    stats: TransferStatistics,
}

impl Exporter {
    pub fn new(adapter: Box<dyn DatabaseAdapter>, options: TransferOptions) -> Self {
        let dialect = adapter.adapter_type();
        Self {
            adapter,
            fs: Box::new(LocalFileSystem),
            options,
            dialect,
            stats: TransferStatistics::default(),
        }
    }

    pub fn with_file_system(mut self, fs: Box<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }

    pub fn adapter(&self) -> &dyn DatabaseAdapter {
        self.adapter.as_ref()
    }

    pub fn file_system(&self) -> &dyn FileSystem {
        self.fs.as_ref()
    }

    pub fn options(&self) -> &TransferOptions {
        &self.options
    }

    pub fn statistics(&self) -> &TransferStatistics {
        &self.stats
    }

    pub fn disconnect(&mut self) -> Result<()> {
        self.adapter.disconnect()
    }

    /// Tables selected by the inclusion and exclusion filters, in name order.
    pub fn table_list(&self) -> Result<Vec<String>> {
        let all = schema::list_tables(self.adapter.as_ref())?;
        Ok(self.options.select_tables(&all))
    }

    /// Rows this exporter would write for `table`, honoring `where` and `limit`.
    pub fn table_row_count(&self, table: &str) -> Result<u64> {
        let filter = self.filter_for(table)?;
        self.effective_count(table, filter.as_ref())
    }

    fn filter_for(&self, table: &str) -> Result<Option<ParameterizedClause>> {
        self.options
            .where_for(table)
            .map(|clause| parameterize(clause, self.dialect))
            .transpose()
    }

    fn effective_count(&self, table: &str, filter: Option<&ParameterizedClause>) -> Result<u64> {
        let count = schema::count_rows(self.adapter.as_ref(), table, filter)?;
        Ok(match self.options.limit {
            Some(limit) => count.min(limit),
            None => count,
        })
    }

    /// Resolve tables, validate every WHERE clause and count rows before writing anything.
    fn plan(&self) -> Result<Vec<PlannedTable>> {
        for (table, clause) in &self.options.where_clauses {
            if !clause.trim().is_empty() {
                parameterize(clause, self.dialect).map_err(|e| {
                    TransferError::Validation(format!(
                        "WHERE clause for table '{}': {}",
                        sanitize_identifier(table),
                        e
                    ))
                })?;
            }
        }

        let mut planned = Vec::new();
        for name in self.table_list()? {
            let filter = self.filter_for(&name)?;
            if let Some(f) = &filter {
                tracing::debug!(
                    "Filter for {}: {} ({} binding(s))",
                    sanitize_identifier(&name),
                    f.sql,
                    f.bindings.len()
                );
            }
            let rows = self.effective_count(&name, filter.as_ref())?;
            let layout = schema::table_layout(self.adapter.as_ref(), &name)?;
            planned.push(PlannedTable {
                name,
                layout,
                filter,
                rows,
            });
        }
        Ok(planned)
    }

    fn should_stream(&self, format: Format, planned: &[PlannedTable]) -> bool {
        let total: u64 = planned.iter().map(|t| t.rows).sum();
        self.fs.is_local()
            && matches!(format, Format::Sql | Format::Csv)
            && total > self.options.streaming_threshold
    }

    fn ensure_parent(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !self.fs.is_dir(parent) {
                self.fs.mkdir(parent, true)?;
            }
        }
        Ok(())
    }

    /// Export every selected table into one file.
    ///
    /// Returns the path actually written, which gains a `.gz` suffix when
    /// compression is on. CSV exports are written as a directory at `path`.
    ///
    /// # Errors
    ///
    /// WHERE clauses are validated before any output is produced; a rejected
    /// clause fails the whole export.
    pub fn export_to_file(&mut self, path: &Path) -> Result<ExportResult> {
        self.stats = TransferStatistics::default();
        let format = self.options.format;
        if format == Format::Csv {
            self.export_csv_to_directory(path)?;
            return Ok(ExportResult {
                path: path.to_path_buf(),
                statistics: self.stats.clone(),
            });
        }

        let planned = self.plan()?;
        let target = output_path(path, self.options.compress);
        self.ensure_parent(&target)?;
        let exported_at = timestamp();
        tracing::info!(
            "Exporting {} table(s) as {} to {}",
            planned.len(),
            format,
            target.display()
        );

        if format == Format::Sql && self.should_stream(format, &planned) {
            tracing::info!("Row count exceeds streaming threshold; writing in pages");
            let mut sink = StreamSink::create(&target, self.options.compress)?;
            self.write_sql(&mut sink, &planned, true, &exported_at)?;
            sink.finish()?;
        } else {
            let text = match format {
                Format::Sql => {
                    let mut buffer = String::new();
                    self.write_sql(&mut buffer, &planned, false, &exported_at)?;
                    buffer
                }
                _ => {
                    let snapshots = self.snapshots(&planned)?;
                    document::render(format, &snapshots, self.dialect, &exported_at)?
                }
            };
            self.write_buffer(&target, text.as_bytes())?;
        }

        tracing::info!(
            "Exported {} row(s) from {} table(s)",
            self.stats.rows_exported,
            self.stats.tables_processed
        );
        Ok(ExportResult {
            path: target,
            statistics: self.stats.clone(),
        })
    }

    /// Compress if configured, then write. Compression failures surface before the write.
    fn write_buffer(&self, target: &Path, data: &[u8]) -> Result<()> {
        if self.options.compress {
            let compressed = gzip(data, target)?;
            self.fs.write_file(target, &compressed)
        } else {
            self.fs.write_file(target, data)
        }
    }

    fn snapshots(&mut self, planned: &[PlannedTable]) -> Result<Vec<TableSnapshot>> {
        let mut snapshots = Vec::with_capacity(planned.len());
        for table in planned {
            let rows = self.fetch_rows(table, self.options.limit, 0)?;
            tracing::info!(
                "Exported table {} ({} rows)",
                sanitize_identifier(&table.name),
                rows.len()
            );
            self.stats.rows_exported += rows.len() as u64;
            self.stats.tables_processed += 1;
            snapshots.push(TableSnapshot {
                name: table.name.clone(),
                columns: table.layout.columns.clone(),
                rows,
            });
        }
        Ok(snapshots)
    }

    /// SELECT for one window of a table, ordered so consecutive pages never overlap.
    fn select_sql(&self, table: &PlannedTable, limit: Option<u64>, offset: u64) -> String {
        let mut sql = format!("SELECT * FROM {}", self.dialect.quote_identifier(&table.name));
        if let Some(filter) = &table.filter {
            sql.push_str(" WHERE ");
            sql.push_str(&filter.sql);
        }
        sql.push_str(&self.dialect.order_by(&table.layout.order_by));
        match limit {
            Some(limit) => self.dialect.paginate(&sql, limit, offset),
            None => sql,
        }
    }

    fn fetch_rows(&self, table: &PlannedTable, limit: Option<u64>, offset: u64) -> Result<Vec<Row>> {
        let bindings = table
            .filter
            .as_ref()
            .map(|f| f.bindings.as_slice())
            .unwrap_or(&[]);
        self.adapter
            .fetch_all(&self.select_sql(table, limit, offset), bindings)
    }

    /// Feed a table's rows to `sink`, either all at once or in pages.
    fn for_each_batch(
        &self,
        table: &PlannedTable,
        streaming: bool,
        mut sink: impl FnMut(Vec<Row>) -> Result<()>,
    ) -> Result<()> {
        if !streaming {
            return sink(self.fetch_rows(table, self.options.limit, 0)?);
        }
        let page_size = self.options.stream_page_size.max(1);
        let mut offset = 0;
        while offset < table.rows {
            let page = page_size.min(table.rows - offset);
            let rows = self.fetch_rows(table, Some(page), offset)?;
            if rows.is_empty() {
                break;
            }
            offset += rows.len() as u64;
            tracing::debug!(
                "Fetched {} row(s) of {} ({}/{})",
                rows.len(),
                sanitize_identifier(&table.name),
                offset,
                table.rows
            );
            sink(rows)?;
        }
        Ok(())
    }

    fn write_sql(
        &mut self,
        out: &mut dyn DumpOutput,
        planned: &[PlannedTable],
        streaming: bool,
        exported_at: &str,
    ) -> Result<()> {
        let adapter = self.adapter.as_ref();
        out.put(&sql::header(adapter, exported_at, &self.options))?;
        let batch_size = self.options.insert_batch_size.max(1);

        for table in planned {
            out.put(&sql::table_preamble(adapter, &table.name, &self.options)?)?;
            let layout = &table.layout;
            let mut pending: Vec<Row> = Vec::with_capacity(batch_size);
            let mut written = 0u64;

            self.for_each_batch(table, streaming, |rows| {
                for row in rows {
                    pending.push(row);
                    if pending.len() >= batch_size {
                        out.put(&sql::insert_statement(adapter, &table.name, layout, &pending)?)?;
                        written += pending.len() as u64;
                        pending.clear();
                    }
                }
                Ok(())
            })?;
            if !pending.is_empty() {
                out.put(&sql::insert_statement(adapter, &table.name, layout, &pending)?)?;
                written += pending.len() as u64;
            }

            tracing::info!(
                "Exported table {} ({} rows)",
                sanitize_identifier(&table.name),
                written
            );
            self.stats.rows_exported += written;
            self.stats.tables_processed += 1;
        }

        out.put(&sql::footer(self.dialect, &self.options))
    }

    fn write_csv_table(&self, out: &mut dyn DumpOutput, table: &PlannedTable, streaming: bool) -> Result<u64> {
        let columns = &table.layout.columns;
        out.put(&csv_format::header_line(columns))?;
        let mut written = 0u64;
        self.for_each_batch(table, streaming, |rows| {
            for row in &rows {
                out.put(&csv_format::row_line(columns, row))?;
            }
            written += rows.len() as u64;
            Ok(())
        })?;
        Ok(written)
    }

    /// Export every selected table as `<table>.csv` plus `export_metadata.json`.
    ///
    /// Returns the files written, metadata last.
    pub fn export_csv_to_directory(&mut self, dir: &Path) -> Result<Vec<PathBuf>> {
        self.stats = TransferStatistics::default();
        let planned = self.plan()?;
        if !self.fs.is_dir(dir) {
            self.fs.mkdir(dir, true)?;
        }
        let streaming = self.should_stream(Format::Csv, &planned);
        let compress = self.options.compress;
        tracing::info!(
            "Exporting {} table(s) as CSV to {}{}",
            planned.len(),
            dir.display(),
            if streaming { " (streaming)" } else { "" }
        );

        let mut written = Vec::new();
        let mut file_names = Vec::new();
        let mut checksums = BTreeMap::new();
        for table in &planned {
            let file_name = csv_file_name(&table.name, compress);
            let path = dir.join(&file_name);
            let (rows, checksum) = if streaming {
                let mut sink = StreamSink::create(&path, compress)?;
                let rows = self.write_csv_table(&mut sink, table, true)?;
                (rows, sink.finish()?)
            } else {
                let mut buffer = String::new();
                let rows = self.write_csv_table(&mut buffer, table, false)?;
                let checksum = sha256_hex(buffer.as_bytes());
                self.write_buffer(&path, buffer.as_bytes())?;
                (rows, checksum)
            };
            tracing::info!(
                "Exported table {} ({} rows) to {}",
                sanitize_identifier(&table.name),
                rows,
                file_name
            );
            self.stats.rows_exported += rows;
            self.stats.tables_processed += 1;
            checksums.insert(file_name.clone(), checksum);
            file_names.push(file_name);
            written.push(path);
        }

        let metadata = json!({
            "exported_at": timestamp(),
            "database_type": self.dialect.name(),
            "tables": file_names,
            "checksums": checksums,
        });
        let metadata_path = dir.join(CSV_METADATA_FILE);
        let text = serde_json::to_string_pretty(&metadata)?;
        self.fs.write_file(&metadata_path, text.as_bytes())?;
        written.push(metadata_path);

        tracing::info!(
            "Exported {} row(s) from {} table(s)",
            self.stats.rows_exported,
            self.stats.tables_processed
        );
        Ok(written)
    }
}

impl Drop for Exporter {
    fn drop(&mut self) {
        if let Err(e) = self.adapter.disconnect() {
            tracing::warn!("Error while disconnecting exporter: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::SqliteAdapter;
    use crate::storage::MemoryFileSystem;

    fn exporter(options: TransferOptions) -> Exporter {
        let adapter = SqliteAdapter::open_in_memory().unwrap();
        adapter
            .execute(
                "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, status TEXT);
                 INSERT INTO users VALUES (1, 'ann', 'active'), (2, 'bob', 'banned'), (3, 'cy', 'active');
                 CREATE TABLE schema_migrations (version BIGINT PRIMARY KEY);",
            )
            .unwrap();
        Exporter::new(Box::new(adapter), options).with_file_system(Box::new(MemoryFileSystem::new()))
    }

    #[test]
    fn test_table_list_skips_migration_table() {
        let exporter = exporter(TransferOptions::default());
        assert_eq!(exporter.table_list().unwrap(), vec!["users"]);
    }

    #[test]
    fn test_row_count_honors_where_and_limit() {
        let mut options = TransferOptions::default();
        options.add_where("users:status = 'active'").unwrap();
        let filtered = exporter(options);
        assert_eq!(filtered.table_row_count("users").unwrap(), 2);

        let limited = exporter(TransferOptions {
            limit: Some(1),
            ..Default::default()
        });
        assert_eq!(limited.table_row_count("users").unwrap(), 1);
    }

    #[test]
    fn test_rejected_where_writes_nothing() {
        let mut options = TransferOptions::default();
        options.add_where("users:1=1; DROP TABLE users").unwrap();
        let mut exporter = exporter(options);
        let err = exporter.export_to_file(Path::new("/out/dump.sql")).unwrap_err();
        assert!(matches!(err, TransferError::Validation(_)));
        assert!(!exporter.file_system().file_exists(Path::new("/out/dump.sql")));
    }

    #[test]
    fn test_sql_export_with_filter() {
        let mut options = TransferOptions::default();
        options.add_where("users:status = 'active'").unwrap();
        let mut exporter = exporter(options);
        let result = exporter.export_to_file(Path::new("/out/dump.sql")).unwrap();
        assert_eq!(result.statistics.rows_exported, 2);
        let text = String::from_utf8(exporter.file_system().read_file(&result.path).unwrap()).unwrap();
        assert!(text.contains("'ann'"));
        assert!(!text.contains("'bob'"));
        assert!(!text.contains("schema_migrations"));
    }

    #[test]
    fn test_compressed_path_gains_suffix_once() {
        let mut exporter = exporter(TransferOptions {
            compress: true,
            format: Format::Json,
            ..Default::default()
        });
        let result = exporter.export_to_file(Path::new("/out/dump.json")).unwrap();
        assert_eq!(result.path, PathBuf::from("/out/dump.json.gz"));
        let again = exporter.export_to_file(Path::new("/out/again.json.gz")).unwrap();
        assert_eq!(again.path, PathBuf::from("/out/again.json.gz"));
    }

    #[test]
    fn test_csv_directory_metadata() {
        let mut exporter = exporter(TransferOptions::default());
        let files = exporter.export_csv_to_directory(Path::new("/csv")).unwrap();
        assert_eq!(files, vec![PathBuf::from("/csv/users.csv"), PathBuf::from("/csv/export_metadata.json")]);
        let csv = exporter.file_system().read_file(Path::new("/csv/users.csv")).unwrap();
        assert_eq!(
            String::from_utf8(csv.clone()).unwrap(),
            "id,name,status\n1,ann,active\n2,bob,banned\n3,cy,active\n"
        );
        let metadata: serde_json::Value = serde_json::from_slice(
            &exporter.file_system().read_file(Path::new("/csv/export_metadata.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(metadata["tables"], json!(["users.csv"]));
        assert_eq!(metadata["checksums"]["users.csv"], json!(sha256_hex(&csv)));
    }

    #[test]
    fn test_paged_reads_are_ordered_by_primary_key() {
        let exporter = exporter(TransferOptions::default());
        let planned = exporter.plan().unwrap();
        assert_eq!(
            exporter.select_sql(&planned[0], Some(2), 2),
            "SELECT * FROM \"users\" ORDER BY \"id\" LIMIT 2 OFFSET 2"
        );
        let rows = exporter.fetch_rows(&planned[0], Some(2), 2).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], json!("cy"));
    }

    #[test]
    fn test_paged_reads_without_primary_key_order_by_every_column() {
        let adapter = SqliteAdapter::open_in_memory().unwrap();
        adapter
            .execute("CREATE TABLE events (kind TEXT, at TEXT); INSERT INTO events VALUES ('b', '2'), ('a', '1');")
            .unwrap();
        let exporter = Exporter::new(Box::new(adapter), TransferOptions::default());
        let planned = exporter.plan().unwrap();
        assert!(exporter
            .select_sql(&planned[0], Some(1), 1)
            .contains("ORDER BY \"kind\", \"at\" LIMIT 1 OFFSET 1"));
    }

    #[test]
    fn test_csv_file_name() {
        assert_eq!(csv_file_name("users", false), "users.csv");
        assert_eq!(csv_file_name("a/b", true), "a_b.csv.gz");
    }
}
