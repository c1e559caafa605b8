// ABOUTME: SQLite adapter backed by rusqlite
// ABOUTME: Path validation, value conversion and transaction tracking for one connection

use super::{binary_to_json, float_to_json, DatabaseAdapter, Row};
use crate::dialect::AdapterType;
use crate::error::{Result, TransferError};
use rusqlite::types::Value as SqliteValue;
use rusqlite::{Connection, OpenFlags};
use serde_json::Value as JsonValue;
use std::cell::Cell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const MEMORY_PATH: &str = ":memory:";

/// SQLite connection implementing [`DatabaseAdapter`].
pub struct SqliteAdapter {
    path: PathBuf,
    conn: Option<Connection>,
    options: HashMap<String, String>,
    in_transaction: Cell<bool>,
}

impl SqliteAdapter {
    /// Create an adapter for a database file without opening it yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut options = HashMap::new();
        options.insert("name".to_string(), path.display().to_string());
        Self {
            path,
            conn: None,
            options,
            in_transaction: Cell::new(false),
        }
    }

    /// Open (creating if needed) a database file.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use dbtransfer::adapter::{DatabaseAdapter, SqliteAdapter};
    /// # fn example() -> dbtransfer::error::Result<()> {
    /// let adapter = SqliteAdapter::open("app.sqlite3")?;
    /// assert!(adapter.is_connected());
    /// # Ok(())
    /// # }
    /// ```
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let mut adapter = Self::new(path);
        adapter.connect()?;
        Ok(adapter)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(MEMORY_PATH)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> Result<&Connection> {
        self.conn.as_ref().ok_or_else(|| {
            TransferError::Database(format!(
                "SQLite connection to '{}' is closed",
                self.path.display()
            ))
        })
    }
}

/// Validate a SQLite file path before opening it.
///
/// Rejects empty paths, directories and files without a `.db`, `.sqlite` or
/// `.sqlite3` extension. The file does not need to exist yet.
pub fn validate_sqlite_path(path: &str) -> Result<PathBuf> {
    if path.trim().is_empty() {
        return Err(TransferError::Configuration(
            "SQLite file path cannot be empty".to_string(),
        ));
    }
    if path == MEMORY_PATH {
        return Ok(PathBuf::from(path));
    }

    let path_buf = PathBuf::from(path);
    if path_buf.is_dir() {
        return Err(TransferError::Configuration(format!(
            "Path '{}' is a directory, not a SQLite database file",
            path
        )));
    }

    match path_buf.extension().and_then(|ext| ext.to_str()) {
        Some("db") | Some("sqlite") | Some("sqlite3") => Ok(path_buf),
        Some(other) => Err(TransferError::Configuration(format!(
            "Invalid SQLite file extension '{}'. Must be .db, .sqlite, or .sqlite3",
            other
        ))),
        None => Err(TransferError::Configuration(format!(
            "SQLite file '{}' has no extension. Must be .db, .sqlite, or .sqlite3",
            path
        ))),
    }
}

/// Convert a SQLite value to JSON.
///
/// INTEGER and REAL become numbers, TEXT stays a string and BLOB becomes
/// base64 text.
pub fn sqlite_value_to_json(value: SqliteValue) -> JsonValue {
    match value {
        SqliteValue::Null => JsonValue::Null,
        SqliteValue::Integer(i) => JsonValue::Number(i.into()),
        SqliteValue::Real(f) => float_to_json(f),
        SqliteValue::Text(s) => JsonValue::String(s),
        SqliteValue::Blob(b) => binary_to_json(&b),
    }
}

/// Convert a JSON scalar to a SQLite bound value.
pub fn json_to_sqlite_value(value: &JsonValue) -> SqliteValue {
    match value {
        JsonValue::Null => SqliteValue::Null,
        JsonValue::Bool(b) => SqliteValue::Integer(i64::from(*b)),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => SqliteValue::Integer(i),
            None => SqliteValue::Real(n.as_f64().unwrap_or_default()),
        },
        JsonValue::String(s) => SqliteValue::Text(s.clone()),
        other => SqliteValue::Text(other.to_string()),
    }
}

impl DatabaseAdapter for SqliteAdapter {
    fn adapter_type(&self) -> AdapterType {
        AdapterType::Sqlite
    }

    fn connect(&mut self) -> Result<()> {
        if self.conn.is_some() {
            return Ok(());
        }
        let path_str = self.path.display().to_string();
        let validated = validate_sqlite_path(&path_str)?;

        tracing::debug!("Opening SQLite database: {}", validated.display());
        let conn = if path_str == MEMORY_PATH {
            Connection::open_in_memory()
        } else {
            Connection::open_with_flags(
                &validated,
                OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
            )
        }
        .map_err(|e| TransferError::database(format!("Failed to open SQLite database '{}'", path_str), e))?;

        let _version: String = conn
            .query_row("SELECT sqlite_version()", [], |row| row.get(0))
            .map_err(|e| {
                TransferError::database("Failed to query SQLite version (database may be corrupted)", e)
            })?;

        self.conn = Some(conn);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            if self.in_transaction.replace(false) {
                let _ = conn.execute_batch("ROLLBACK");
            }
            conn.close()
                .map_err(|(_, e)| TransferError::database("Failed to close SQLite connection", e))?;
            tracing::debug!("Closed SQLite database: {}", self.path.display());
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    fn execute(&self, sql: &str) -> Result<u64> {
        let conn = self.conn()?;
        conn.execute_batch(sql)
            .map_err(|e| TransferError::database("Statement failed", e))?;
        Ok(conn.changes())
    }

    fn execute_prepared(&self, sql: &str, bindings: &[JsonValue]) -> Result<u64> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare_cached(sql)
            .map_err(|e| TransferError::database("Failed to prepare statement", e))?;
        let params: Vec<SqliteValue> = bindings.iter().map(json_to_sqlite_value).collect();
        let affected = stmt
            .execute(rusqlite::params_from_iter(params))
            .map_err(|e| TransferError::database("Prepared statement failed", e))?;
        Ok(affected as u64)
    }

    fn fetch_all(&self, sql: &str, bindings: &[String]) -> Result<Vec<Row>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| TransferError::database("Failed to prepare query", e))?;
        let column_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();

        let rows = stmt
            .query_map(rusqlite::params_from_iter(bindings.iter()), |row| {
                let mut map = Row::new();
                for (idx, name) in column_names.iter().enumerate() {
                    let value: SqliteValue = row.get(idx)?;
                    map.insert(name.clone(), sqlite_value_to_json(value));
                }
                Ok(map)
            })
            .map_err(|e| TransferError::database("Query failed", e))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| TransferError::database("Failed to read query rows", e))?;

        Ok(rows)
    }

    fn has_table(&self, name: &str) -> Result<bool> {
        let rows = self.fetch_all(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?",
            &[name.to_string()],
        )?;
        Ok(!rows.is_empty())
    }

    fn option(&self, key: &str) -> Option<String> {
        self.options.get(key).cloned()
    }

    fn begin_transaction(&self) -> Result<()> {
        self.conn()?
            .execute_batch("BEGIN TRANSACTION")
            .map_err(|e| TransferError::database("Failed to begin transaction", e))?;
        self.in_transaction.set(true);
        Ok(())
    }

    fn commit_transaction(&self) -> Result<()> {
        self.conn()?
            .execute_batch("COMMIT")
            .map_err(|e| TransferError::database("Failed to commit transaction", e))?;
        self.in_transaction.set(false);
        Ok(())
    }

    fn rollback_transaction(&self) -> Result<()> {
        self.in_transaction.set(false);
        self.conn()?
            .execute_batch("ROLLBACK")
            .map_err(|e| TransferError::database("Failed to roll back transaction", e))?;
        Ok(())
    }

    fn has_transactions(&self) -> bool {
        true
    }

    fn quote_string(&self, value: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare_cached("SELECT quote(?1)")
            .map_err(|e| TransferError::database("Failed to prepare quote()", e))?;
        let quoted: String = stmt
            .query_row([value], |row| row.get(0))
            .map_err(|e| TransferError::database("quote() failed", e))?;
        Ok(Some(quoted))
    }

    fn quote_strings(&self, values: &[String]) -> Result<Option<Vec<String>>> {
        super::quote_in_batches(self, values)
    }
}

impl Drop for SqliteAdapter {
    fn drop(&mut self) {
        if let Err(e) = self.disconnect() {
            tracing::warn!("Error while closing SQLite connection: {}", e);
        }
    }
}
