// ABOUTME: SQL dump text: header, foreign-key pragmas, per-table sections and batched INSERTs
// ABOUTME: Literals come from the dialect policy so strings use the connection's native quoting

use crate::adapter::{binary_from_json, column_text, DatabaseAdapter, Row};
use crate::dialect::AdapterType;
use crate::error::{Result, TransferError};
use crate::options::TransferOptions;
use crate::schema::TableLayout;
use serde_json::Value as JsonValue;

/// Prefix of the header line carrying the export time.
pub const EXPORTED_AT_PREFIX: &str = "-- Exported at: ";

pub fn header(adapter: &dyn DatabaseAdapter, exported_at: &str, options: &TransferOptions) -> String {
    let dialect = adapter.adapter_type();
    let mut out = String::new();
    out.push_str("-- dbtransfer SQL dump\n");
    out.push_str(&format!("-- Database type: {}\n", dialect));
    if let Some(name) = adapter.option("name") {
        out.push_str(&format!(
            "-- Database: {}\n",
            crate::utils::sanitize_identifier(&name)
        ));
    }
    out.push_str(&format!("{}{}\n\n", EXPORTED_AT_PREFIX, exported_at));
    if options.disable_foreign_keys {
        out.push_str(&format!("{};\n", dialect.disable_foreign_keys_sql()));
    }
    if options.use_transaction {
        out.push_str(&format!("{};\n", dialect.begin_transaction_sql()));
    }
    out
}

pub fn footer(dialect: AdapterType, options: &TransferOptions) -> String {
    let mut out = String::from("\n");
    if options.use_transaction {
        out.push_str("COMMIT;\n");
    }
    if options.disable_foreign_keys {
        out.push_str(&format!("{};\n", dialect.enable_foreign_keys_sql()));
    }
    out
}

/// CREATE TABLE statement as the database reports it.
///
/// PostgreSQL has no single-statement equivalent, so a placeholder comment is
/// returned instead.
pub fn create_table_statement(adapter: &dyn DatabaseAdapter, table: &str) -> Result<String> {
    let dialect = adapter.adapter_type();
    let statement = match dialect {
        AdapterType::MySql => adapter
            .fetch_row(&format!("SHOW CREATE TABLE {}", dialect.quote_identifier(table)), &[])?
            .and_then(|row| column_text(&row, "Create Table")),
        AdapterType::Sqlite => adapter
            .fetch_row(
                "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?",
                &[table.to_string()],
            )?
            .and_then(|row| column_text(&row, "sql")),
        AdapterType::Postgres | AdapterType::SqlServer => None,
    };
    Ok(match statement {
        Some(sql) => format!("{};\n", sql.trim_end().trim_end_matches(';')),
        None => format!(
            "-- CREATE TABLE for {} is not supported for {}\n",
            dialect.quote_identifier(table),
            dialect
        ),
    })
}

/// Section opener for one table: DROP, CREATE and the row-clearing DELETE.
///
/// A table that is dropped and recreated is already empty, so the DELETE is
/// left out. DROP without CREATE would leave nothing to insert into, so
/// `drop_tables` only takes effect together with `include_schema`.
pub fn table_preamble(
    adapter: &dyn DatabaseAdapter,
    table: &str,
    options: &TransferOptions,
) -> Result<String> {
    let dialect = adapter.adapter_type();
    let mut out = format!("\n-- Table: {}\n", dialect.quote_identifier(table));
    let recreate = options.include_schema && options.drop_tables;
    if recreate {
        out.push_str(&format!("{};\n", dialect.drop_table_sql(table)));
    }
    if options.include_schema {
        out.push_str(&create_table_statement(adapter, table)?);
    }
    if !recreate {
        out.push_str(&format!("{};\n", dialect.delete_all_sql(table)));
    }
    Ok(out)
}

/// One multi-row INSERT statement for `rows`, in layout column order.
///
/// Binary columns are written as hex literals. Every other value of the
/// statement is formatted in one batch so strings cost one quoting round trip.
pub fn insert_statement(
    adapter: &dyn DatabaseAdapter,
    table: &str,
    layout: &TableLayout,
    rows: &[Row],
) -> Result<String> {
    let dialect = adapter.adapter_type();
    let columns = &layout.columns;
    let mut binary_cells: Vec<Option<String>> = Vec::with_capacity(rows.len() * columns.len());
    let mut plain: Vec<&JsonValue> = Vec::new();
    for row in rows {
        for column in columns {
            let value = row.get(column).unwrap_or(&JsonValue::Null);
            match binary_from_json(value) {
                Some(bytes) if layout.is_binary(column) => {
                    binary_cells.push(Some(dialect.binary_literal(&bytes)))
                }
                _ => {
                    binary_cells.push(None);
                    plain.push(value);
                }
            }
        }
    }

    let mut literals = dialect.format_literals(&plain, adapter)?.into_iter();
    let cells = binary_cells
        .into_iter()
        .map(|cell| cell.or_else(|| literals.next()))
        .collect::<Option<Vec<String>>>()
        .ok_or_else(|| TransferError::State(format!("Missing literal while writing '{}'", table)))?;

    let column_list: Vec<String> = columns.iter().map(|c| dialect.quote_identifier(c)).collect();
    let groups: Vec<String> = cells
        .chunks(columns.len().max(1))
        .map(|values| format!("({})", values.join(", ")))
        .collect();
    Ok(format!(
        "INSERT INTO {} ({}) VALUES\n{};\n",
        dialect.quote_identifier(table),
        column_list.join(", "),
        groups.join(",\n")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::SqliteAdapter;
    use serde_json::json;
    use std::cell::Cell;

    fn adapter() -> SqliteAdapter {
        let adapter = SqliteAdapter::open_in_memory().unwrap();
        adapter
            .execute("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, zip TEXT, avatar BLOB)")
            .unwrap();
        adapter
    }

    #[test]
    fn test_header_and_footer_pragmas() {
        let adapter = adapter();
        let options = TransferOptions::default();
        let head = header(&adapter, "2024-01-01T00:00:00Z", &options);
        assert!(head.contains("-- Exported at: 2024-01-01T00:00:00Z"));
        assert!(head.contains("PRAGMA foreign_keys = OFF;\nBEGIN TRANSACTION;\n"));
        let foot = footer(AdapterType::Sqlite, &options);
        assert!(foot.ends_with("COMMIT;\nPRAGMA foreign_keys = ON;\n"));

        let bare = TransferOptions {
            use_transaction: false,
            disable_foreign_keys: false,
            ..Default::default()
        };
        assert!(!header(&adapter, "t", &bare).contains("PRAGMA"));
        assert_eq!(footer(AdapterType::Sqlite, &bare), "\n");
    }

    #[test]
    fn test_table_preamble_variants() {
        let adapter = adapter();
        let plain = table_preamble(&adapter, "users", &TransferOptions::default()).unwrap();
        assert!(plain.contains("DELETE FROM \"users\";"));
        assert!(!plain.contains("CREATE TABLE"));

        let recreate = TransferOptions {
            include_schema: true,
            drop_tables: true,
            ..Default::default()
        };
        let text = table_preamble(&adapter, "users", &recreate).unwrap();
        assert!(text.contains("DROP TABLE IF EXISTS \"users\";"));
        assert!(text.contains("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, zip TEXT, avatar BLOB);"));
        assert!(!text.contains("DELETE FROM"));
    }

    #[test]
    fn test_insert_statement_literals() {
        let adapter = adapter();
        let layout = TableLayout {
            columns: vec!["id".to_string(), "name".to_string(), "zip".to_string()],
            ..Default::default()
        };
        let mut first = Row::new();
        first.insert("id".into(), json!(1));
        first.insert("name".into(), json!("O'Brien"));
        first.insert("zip".into(), json!("0042"));
        let mut second = Row::new();
        second.insert("id".into(), json!(2));
        second.insert("name".into(), json!(null));
        second.insert("zip".into(), json!("12345"));

        let sql = insert_statement(&adapter, "users", &layout, &[first, second]).unwrap();
        assert_eq!(
            sql,
            "INSERT INTO \"users\" (\"id\", \"name\", \"zip\") VALUES\n\
             (1, 'O''Brien', '0042'),\n\
             (2, NULL, 12345);\n"
        );
        adapter.execute(&sql).unwrap();
    }

    #[test]
    fn test_insert_statement_writes_binary_as_hex() {
        let adapter = adapter();
        let layout = crate::schema::table_layout(&adapter, "users").unwrap();
        let mut row = Row::new();
        row.insert("id".into(), json!(1));
        row.insert("name".into(), json!("/wA="));
        row.insert("zip".into(), json!(null));
        row.insert("avatar".into(), json!("/wA="));

        let sql = insert_statement(&adapter, "users", &layout, &[row]).unwrap();
        assert!(sql.contains("(1, '/wA=', NULL, X'ff00')"), "{}", sql);
        adapter.execute(&sql).unwrap();
        let stored = adapter
            .fetch_row("SELECT typeof(avatar) AS kind, hex(avatar) AS hex FROM users", &[])
            .unwrap()
            .unwrap();
        assert_eq!(stored["kind"], json!("blob"));
        assert_eq!(stored["hex"], json!("FF00"));
    }

    /// Delegates to SQLite while counting quoting requests.
    struct CountingAdapter {
        inner: SqliteAdapter,
        single: Cell<usize>,
        batches: Cell<usize>,
    }

    impl DatabaseAdapter for CountingAdapter {
        fn adapter_type(&self) -> AdapterType {
            self.inner.adapter_type()
        }
        fn connect(&mut self) -> Result<()> {
            self.inner.connect()
        }
        fn disconnect(&mut self) -> Result<()> {
            self.inner.disconnect()
        }
        fn is_connected(&self) -> bool {
            self.inner.is_connected()
        }
        fn execute(&self, sql: &str) -> Result<u64> {
            self.inner.execute(sql)
        }
        fn execute_prepared(&self, sql: &str, bindings: &[JsonValue]) -> Result<u64> {
            self.inner.execute_prepared(sql, bindings)
        }
        fn fetch_all(&self, sql: &str, bindings: &[String]) -> Result<Vec<Row>> {
            self.inner.fetch_all(sql, bindings)
        }
        fn has_table(&self, name: &str) -> Result<bool> {
            self.inner.has_table(name)
        }
        fn option(&self, key: &str) -> Option<String> {
            self.inner.option(key)
        }
        fn begin_transaction(&self) -> Result<()> {
            self.inner.begin_transaction()
        }
        fn commit_transaction(&self) -> Result<()> {
            self.inner.commit_transaction()
        }
        fn rollback_transaction(&self) -> Result<()> {
            self.inner.rollback_transaction()
        }
        fn has_transactions(&self) -> bool {
            self.inner.has_transactions()
        }
        fn quote_string(&self, value: &str) -> Result<Option<String>> {
            self.single.set(self.single.get() + 1);
            self.inner.quote_string(value)
        }
        fn quote_strings(&self, values: &[String]) -> Result<Option<Vec<String>>> {
            self.batches.set(self.batches.get() + 1);
            self.inner.quote_strings(values)
        }
    }

    #[test]
    fn test_insert_statement_quotes_once_per_statement() {
        let adapter = CountingAdapter {
            inner: adapter(),
            single: Cell::new(0),
            batches: Cell::new(0),
        };
        let layout = crate::schema::table_layout(&adapter, "users").unwrap();
        let rows: Vec<Row> = (1..=50)
            .map(|i| {
                let mut row = Row::new();
                row.insert("id".into(), json!(i));
                row.insert("name".into(), json!(format!("user {}", i % 5)));
                row.insert("zip".into(), json!("0042"));
                row.insert("avatar".into(), json!(null));
                row
            })
            .collect();

        let sql = insert_statement(&adapter, "users", &layout, &rows).unwrap();
        assert_eq!(adapter.batches.get(), 1);
        assert_eq!(adapter.single.get(), 0);
        assert!(sql.contains("(50, 'user 0', '0042', NULL);"));
        adapter.execute(&sql).unwrap();
    }
}
