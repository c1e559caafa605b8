// ABOUTME: Database adapter boundary shared by the export, import, schema and migration layers
// ABOUTME: One adapter wraps exactly one open connection; rows are ordered column->scalar maps

pub mod guard;
pub mod mysql;
pub mod postgres;
pub mod sqlite;

pub use guard::{ForeignKeyGuard, TransactionGuard};
pub use mysql::MySqlAdapter;
pub use postgres::PostgresAdapter;
pub use sqlite::SqliteAdapter;

use crate::dialect::AdapterType;
use crate::error::{Result, TransferError};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::Value as JsonValue;

/// One result row, columns in SELECT order.
pub type Row = serde_json::Map<String, JsonValue>;

/// Low-level database connection used by every engine in this crate.
///
/// Methods take `&self` so that scoped guards (transactions, foreign-key
/// pragmas) can hold a shared borrow while the engine keeps working through
/// the same connection.
pub trait DatabaseAdapter {
    fn adapter_type(&self) -> AdapterType;

    fn connect(&mut self) -> Result<()>;

    fn disconnect(&mut self) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Execute a statement without bindings, returning affected rows when known.
    fn execute(&self, sql: &str) -> Result<u64>;

    /// Execute a prepared statement with `?` placeholders bound to `bindings`.
    fn execute_prepared(&self, sql: &str, bindings: &[JsonValue]) -> Result<u64>;

    /// Run a query with `?` placeholders bound to string values.
    fn fetch_all(&self, sql: &str, bindings: &[String]) -> Result<Vec<Row>>;

    fn fetch_row(&self, sql: &str, bindings: &[String]) -> Result<Option<Row>> {
        Ok(self.fetch_all(sql, bindings)?.into_iter().next())
    }

    fn has_table(&self, name: &str) -> Result<bool>;

    /// Connection option such as `name`, `host` or `charset`.
    fn option(&self, key: &str) -> Option<String>;

    fn begin_transaction(&self) -> Result<()>;

    fn commit_transaction(&self) -> Result<()>;

    fn rollback_transaction(&self) -> Result<()>;

    fn has_transactions(&self) -> bool;

    /// Native string quoting of the live connection.
    ///
    /// `Ok(None)` means the connection offers no quoting primitive.
    fn quote_string(&self, value: &str) -> Result<Option<String>>;

    /// Native quoting for many strings, in input order.
    fn quote_strings(&self, values: &[String]) -> Result<Option<Vec<String>>> {
        values.iter().map(|v| self.quote_string(v)).collect()
    }
}

/// Strings quoted per round trip by [`quote_in_batches`].
const QUOTE_BATCH: usize = 500;

/// Quote strings through the dialect's batch query, one round trip per chunk.
pub(crate) fn quote_in_batches(
    adapter: &dyn DatabaseAdapter,
    values: &[String],
) -> Result<Option<Vec<String>>> {
    let dialect = adapter.adapter_type();
    let mut quoted = Vec::with_capacity(values.len());
    for chunk in values.chunks(QUOTE_BATCH) {
        let Some(sql) = dialect.batch_quote_sql(chunk.len()) else {
            return Ok(None);
        };
        let rows = adapter.fetch_all(&sql, chunk)?;
        quoted.extend(rows.iter().filter_map(|row| column_text(row, "quoted")));
    }
    if quoted.len() != values.len() {
        return Err(TransferError::Database(format!(
            "Batch quoting returned {} of {} values",
            quoted.len(),
            values.len()
        )));
    }
    Ok(Some(quoted))
}

/// Read a scalar from the first column of a row as an unsigned count.
pub fn row_count_value(row: &Row) -> Option<u64> {
    let value = row.values().next()?;
    match value {
        JsonValue::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f as u64)),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Look up a column case-insensitively, since drivers differ in the case they report.
pub fn column_value<'a>(row: &'a Row, name: &str) -> Option<&'a JsonValue> {
    row.get(name).or_else(|| {
        row.iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    })
}

/// Column value rendered as text, `None` for SQL NULL or a missing column.
pub fn column_text(row: &Row, name: &str) -> Option<String> {
    match column_value(row, name)? {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Convert a float to JSON, keeping non-finite values as strings.
pub(crate) fn float_to_json(value: f64) -> JsonValue {
    serde_json::Number::from_f64(value)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(value.to_string()))
}

/// Decode bytes of a text-like column as UTF-8 when possible, else base64.
pub(crate) fn bytes_to_json(bytes: &[u8]) -> JsonValue {
    match std::str::from_utf8(bytes) {
        Ok(text) => JsonValue::String(text.to_string()),
        Err(_) => binary_to_json(bytes),
    }
}

/// Binary column values always travel through rows as base64 text.
pub(crate) fn binary_to_json(bytes: &[u8]) -> JsonValue {
    JsonValue::String(BASE64.encode(bytes))
}

/// Bytes held by a binary column value, `None` for NULL.
///
/// Base64 text decodes to its bytes; text that is not base64 and other
/// scalars are taken as their own UTF-8 bytes.
///
/// # Examples
///
/// ```
/// # use dbtransfer::adapter::binary_from_json;
/// # use serde_json::json;
/// assert_eq!(binary_from_json(&json!("/wA=")), Some(vec![0xff, 0x00]));
/// assert_eq!(binary_from_json(&json!("not base64!")), Some(b"not base64!".to_vec()));
/// assert_eq!(binary_from_json(&json!(null)), None);
/// ```
pub fn binary_from_json(value: &JsonValue) -> Option<Vec<u8>> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(BASE64.decode(s).unwrap_or_else(|_| s.as_bytes().to_vec())),
        other => Some(other.to_string().into_bytes()),
    }
}
