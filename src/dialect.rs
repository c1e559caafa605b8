// ABOUTME: Per-database quoting and literal policy for MySQL, PostgreSQL, SQLite and SQL Server
// ABOUTME: Every dialect-specific SQL fragment used by the export and import engines lives here

use crate::adapter::DatabaseAdapter;
use crate::error::{Result, TransferError};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;

/// Database dialect bound to one open connection.
///
/// Selected once when an engine is constructed and never changed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterType {
    MySql,
    Postgres,
    Sqlite,
    SqlServer,
}

impl AdapterType {
    /// Resolve an adapter name as it appears in configuration files.
    ///
    /// # Examples
    ///
    /// ```
    /// # use dbtransfer::dialect::AdapterType;
    /// assert_eq!(AdapterType::from_name("pgsql").unwrap(), AdapterType::Postgres);
    /// assert_eq!(AdapterType::from_name("SQLite").unwrap(), AdapterType::Sqlite);
    /// assert!(AdapterType::from_name("oracle").is_err());
    /// ```
    pub fn from_name(name: &str) -> Result<Self> {
        match name.trim().to_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(AdapterType::MySql),
            "pgsql" | "postgres" | "postgresql" => Ok(AdapterType::Postgres),
            "sqlite" | "sqlite3" => Ok(AdapterType::Sqlite),
            "mssql" | "sqlsrv" | "sqlserver" => Ok(AdapterType::SqlServer),
            other => Err(TransferError::Configuration(format!(
                "Unsupported database adapter '{}'. Use mysql, pgsql, sqlite or mssql",
                other
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AdapterType::MySql => "mysql",
            AdapterType::Postgres => "pgsql",
            AdapterType::Sqlite => "sqlite",
            AdapterType::SqlServer => "mssql",
        }
    }

    /// Quote an identifier (table or column name) for this dialect.
    ///
    /// The quote character inside the name is doubled, so any string is safe
    /// to embed once quoted.
    ///
    /// # Examples
    ///
    /// ```
    /// # use dbtransfer::dialect::AdapterType;
    /// assert_eq!(AdapterType::MySql.quote_identifier("a`b"), "`a``b`");
    /// assert_eq!(AdapterType::Postgres.quote_identifier("a\"b"), "\"a\"\"b\"");
    /// assert_eq!(AdapterType::SqlServer.quote_identifier("a]b"), "[a]]b]");
    /// ```
    pub fn quote_identifier(&self, name: &str) -> String {
        match self {
            AdapterType::MySql => format!("`{}`", name.replace('`', "``")),
            AdapterType::SqlServer => format!("[{}]", name.replace(']', "]]")),
            AdapterType::Postgres | AdapterType::Sqlite => {
                format!("\"{}\"", name.replace('"', "\"\""))
            }
        }
    }

    pub fn boolean_literal(&self, value: bool) -> &'static str {
        match (self, value) {
            (AdapterType::Postgres, true) => "TRUE",
            (AdapterType::Postgres, false) => "FALSE",
            (_, true) => "1",
            (_, false) => "0",
        }
    }

    /// Format a scalar as SQL literal text for generated INSERT statements.
    ///
    /// Only used for dumps. WHERE clauses always go through the parameterizer.
    pub fn format_literal(&self, value: &JsonValue, adapter: &dyn DatabaseAdapter) -> Result<String> {
        let mut literals = self.format_literals(&[value], adapter)?;
        Ok(literals.pop().unwrap_or_else(|| "NULL".to_string()))
    }

    /// Format many scalars at once, returning literals in input order.
    ///
    /// Strings are quoted with the connection's native quoting primitive, each
    /// distinct string once and in as few round trips as the adapter allows.
    /// When the adapter has no primitive, SQLite falls back to its single-quote
    /// doubling rule and every other dialect refuses to continue.
    pub fn format_literals(
        &self,
        values: &[&JsonValue],
        adapter: &dyn DatabaseAdapter,
    ) -> Result<Vec<String>> {
        let texts = values
            .iter()
            .map(|value| text_to_quote(value))
            .collect::<Result<Vec<_>>>()?;
        let mut distinct: Vec<String> = texts.iter().flatten().cloned().collect();
        distinct.sort();
        distinct.dedup();
        let quoted: HashMap<String, String> = distinct
            .iter()
            .cloned()
            .zip(self.quote_all(&distinct, adapter)?)
            .collect();

        values
            .iter()
            .zip(texts)
            .map(|(value, text)| match text {
                Some(text) => quoted.get(&text).cloned().ok_or_else(|| {
                    TransferError::State("String literal missing from quoting batch".to_string())
                }),
                None => Ok(self.bare_literal(value)),
            })
            .collect()
    }

    /// Literal for values that need no quoting.
    fn bare_literal(&self, value: &JsonValue) -> String {
        match value {
            JsonValue::Null => "NULL".to_string(),
            JsonValue::Bool(b) => self.boolean_literal(*b).to_string(),
            JsonValue::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    fn quote_all(&self, values: &[String], adapter: &dyn DatabaseAdapter) -> Result<Vec<String>> {
        if values.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(quoted) = adapter.quote_strings(values)? {
            return Ok(quoted);
        }
        match self {
            AdapterType::Sqlite => Ok(values
                .iter()
                .map(|v| format!("'{}'", v.replace('\'', "''")))
                .collect()),
            other => Err(TransferError::Configuration(format!(
                "No native string quoting available for {} connection; refusing to build SQL literals",
                other.name()
            ))),
        }
    }

    /// Query quoting `count` bound strings in one round trip, one `quoted` row
    /// per value in binding order. `None` when the dialect has no such query.
    pub fn batch_quote_sql(&self, count: usize) -> Option<String> {
        if count == 0 {
            return None;
        }
        let values_rows = |row: fn(usize) -> String| -> String {
            (1..=count).map(row).collect::<Vec<_>>().join(", ")
        };
        match self {
            AdapterType::Postgres => Some(format!(
                "SELECT quote_literal(v) AS quoted FROM (VALUES {}) AS t(v, n) ORDER BY n",
                values_rows(|n| format!("(?::text, {})", n))
            )),
            AdapterType::MySql => {
                let rest: String = (2..=count)
                    .map(|n| format!(" UNION ALL SELECT CAST(? AS CHAR), {}", n))
                    .collect();
                Some(format!(
                    "SELECT QUOTE(v) AS quoted FROM (SELECT CAST(? AS CHAR) AS v, 1 AS n{}) AS t ORDER BY n",
                    rest
                ))
            }
            AdapterType::Sqlite => Some(format!(
                "SELECT quote(column1) AS quoted FROM (VALUES {}) ORDER BY column2",
                values_rows(|n| format!("(?, {})", n))
            )),
            AdapterType::SqlServer => None,
        }
    }

    /// Statement that disables foreign-key enforcement for the session.
    pub fn disable_foreign_keys_sql(&self) -> &'static str {
        match self {
            AdapterType::MySql => "SET FOREIGN_KEY_CHECKS=0",
            AdapterType::Postgres => "SET session_replication_role = replica",
            AdapterType::Sqlite => "PRAGMA foreign_keys = OFF",
            AdapterType::SqlServer => "EXEC sp_msforeachtable 'ALTER TABLE ? NOCHECK CONSTRAINT all'",
        }
    }

    /// Statement that restores foreign-key enforcement for the session.
    pub fn enable_foreign_keys_sql(&self) -> &'static str {
        match self {
            AdapterType::MySql => "SET FOREIGN_KEY_CHECKS=1",
            AdapterType::Postgres => "SET session_replication_role = DEFAULT",
            AdapterType::Sqlite => "PRAGMA foreign_keys = ON",
            AdapterType::SqlServer => {
                "EXEC sp_msforeachtable 'ALTER TABLE ? WITH CHECK CHECK CONSTRAINT all'"
            }
        }
    }

    /// Transaction opener written into SQL dumps.
    pub fn begin_transaction_sql(&self) -> &'static str {
        match self {
            AdapterType::MySql => "START TRANSACTION",
            AdapterType::Postgres => "BEGIN",
            AdapterType::Sqlite | AdapterType::SqlServer => "BEGIN TRANSACTION",
        }
    }

    pub fn drop_table_sql(&self, table: &str) -> String {
        format!("DROP TABLE IF EXISTS {}", self.quote_identifier(table))
    }

    pub fn delete_all_sql(&self, table: &str) -> String {
        format!("DELETE FROM {}", self.quote_identifier(table))
    }

    pub fn count_rows_sql(&self, table: &str) -> String {
        format!("SELECT COUNT(*) AS row_count FROM {}", self.quote_identifier(table))
    }

    /// ` ORDER BY` over quoted `columns`, empty when there are none.
    pub fn order_by(&self, columns: &[String]) -> String {
        if columns.is_empty() {
            return String::new();
        }
        let quoted: Vec<String> = columns.iter().map(|c| self.quote_identifier(c)).collect();
        format!(" ORDER BY {}", quoted.join(", "))
    }

    /// Append a row window to a SELECT statement.
    ///
    /// Callers paging through a table put an [`order_by`](Self::order_by) on
    /// `sql` first, since page boundaries are only stable under a total order.
    /// SQL Server needs an ORDER BY for OFFSET and gets a constant one if
    /// `sql` has none.
    pub fn paginate(&self, sql: &str, limit: u64, offset: u64) -> String {
        match self {
            AdapterType::SqlServer => {
                let order = if sql.to_uppercase().contains(" ORDER BY ") {
                    ""
                } else {
                    " ORDER BY (SELECT NULL)"
                };
                format!(
                    "{}{} OFFSET {} ROWS FETCH NEXT {} ROWS ONLY",
                    sql, order, offset, limit
                )
            }
            _ if offset == 0 => format!("{} LIMIT {}", sql, limit),
            _ => format!("{} LIMIT {} OFFSET {}", sql, limit, offset),
        }
    }

    /// Literal for raw bytes in a generated INSERT statement.
    ///
    /// # Examples
    ///
    /// ```
    /// # use dbtransfer::dialect::AdapterType;
    /// assert_eq!(AdapterType::Sqlite.binary_literal(&[0xff, 0x00]), "X'ff00'");
    /// assert_eq!(AdapterType::Postgres.binary_literal(&[0xff, 0x00]), "'\\xff00'::bytea");
    /// assert_eq!(AdapterType::SqlServer.binary_literal(&[0xff, 0x00]), "0xFF00");
    /// ```
    pub fn binary_literal(&self, bytes: &[u8]) -> String {
        match self {
            AdapterType::MySql | AdapterType::Sqlite => format!("X'{}'", hex::encode(bytes)),
            AdapterType::Postgres => format!("'\\x{}'::bytea", hex::encode(bytes)),
            AdapterType::SqlServer => format!("0x{}", hex::encode_upper(bytes)),
        }
    }

    /// Placeholder that turns a bound hex string into raw bytes.
    pub fn binary_placeholder(&self) -> &'static str {
        match self {
            AdapterType::MySql => "UNHEX(?)",
            AdapterType::Postgres => "decode(?, 'hex')",
            AdapterType::Sqlite => "unhex(?)",
            AdapterType::SqlServer => "CONVERT(VARBINARY(MAX), ?, 2)",
        }
    }

    /// Query listing user tables, one `name` column per row.
    pub fn list_tables_sql(&self) -> &'static str {
        match self {
            AdapterType::MySql => {
                "SELECT TABLE_NAME AS name FROM INFORMATION_SCHEMA.TABLES \
                 WHERE TABLE_SCHEMA = DATABASE() AND TABLE_TYPE = 'BASE TABLE' ORDER BY TABLE_NAME"
            }
            AdapterType::Postgres => {
                "SELECT tablename AS name FROM pg_catalog.pg_tables \
                 WHERE schemaname = current_schema() ORDER BY tablename"
            }
            AdapterType::Sqlite => {
                "SELECT name FROM sqlite_master WHERE type = 'table' \
                 AND name NOT LIKE 'sqlite_%' ORDER BY name"
            }
            AdapterType::SqlServer => {
                "SELECT TABLE_NAME AS name FROM INFORMATION_SCHEMA.TABLES \
                 WHERE TABLE_TYPE = 'BASE TABLE' ORDER BY TABLE_NAME"
            }
        }
    }

    /// Upper bound on bound parameters in one prepared statement.
    pub fn max_bind_parameters(&self) -> usize {
        match self {
            AdapterType::MySql | AdapterType::Postgres => 65_535,
            AdapterType::Sqlite => 32_766,
            AdapterType::SqlServer => 2_100,
        }
    }

    /// Rewrite `?` placeholders into the driver's native form.
    ///
    /// PostgreSQL uses `$1..$n`; every other dialect keeps `?`. Question marks
    /// inside quoted literals or identifiers are left alone.
    ///
    /// # Examples
    ///
    /// ```
    /// # use dbtransfer::dialect::AdapterType;
    /// assert_eq!(
    ///     AdapterType::Postgres.native_placeholders("SELECT * FROM \"t?\" WHERE a = ? AND b = ?"),
    ///     "SELECT * FROM \"t?\" WHERE a = $1 AND b = $2"
    /// );
    /// assert_eq!(AdapterType::MySql.native_placeholders("a = ?"), "a = ?");
    /// ```
    pub fn native_placeholders(&self, sql: &str) -> String {
        if *self != AdapterType::Postgres {
            return sql.to_string();
        }
        let mut out = String::with_capacity(sql.len() + 8);
        let mut quote: Option<char> = None;
        let mut index = 0;
        for ch in sql.chars() {
            match quote {
                Some(q) if ch == q => quote = None,
                Some(_) => {}
                None if ch == '\'' || ch == '"' => quote = Some(ch),
                None if ch == '?' => {
                    index += 1;
                    out.push('$');
                    out.push_str(&index.to_string());
                    continue;
                }
                None => {}
            }
            out.push(ch);
        }
        out
    }
}

impl fmt::Display for AdapterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Text a value must be quoted as, `None` when it is written bare.
fn text_to_quote(value: &JsonValue) -> Result<Option<String>> {
    match value {
        JsonValue::String(s) if !is_unquoted_numeric(s) => Ok(Some(s.clone())),
        JsonValue::Array(_) | JsonValue::Object(_) => Ok(Some(serde_json::to_string(value)?)),
        _ => Ok(None),
    }
}

/// Whether a string value can be emitted as a bare numeric literal.
///
/// Plain decimal numbers qualify, except those whose significant part starts
/// with `0` followed by anything other than `.`, so codes such as `"007"` or
/// ZIP codes keep their leading zeros.
///
/// # Examples
///
/// ```
/// # use dbtransfer::dialect::is_unquoted_numeric;
/// assert!(is_unquoted_numeric("42"));
/// assert!(is_unquoted_numeric("0"));
/// assert!(is_unquoted_numeric("0.5"));
/// assert!(!is_unquoted_numeric("0042"));
/// assert!(!is_unquoted_numeric("12abc"));
/// ```
pub fn is_unquoted_numeric(value: &str) -> bool {
    let digits = value.strip_prefix('-').unwrap_or(value);
    if digits.is_empty() {
        return false;
    }

    let (int_part, frac_part) = match digits.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (digits, None),
    };
    if int_part.is_empty() || !int_part.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    if let Some(frac) = frac_part {
        if frac.is_empty() || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
    }

    let mut chars = digits.chars();
    if chars.next() == Some('0') {
        if let Some(second) = chars.next() {
            if second != '.' {
                return false;
            }
        }
    }

    // Integers that overflow i64 would lose precision once unquoted
    frac_part.is_some() || int_part.len() < 19 || value.parse::<i64>().is_ok()
}
