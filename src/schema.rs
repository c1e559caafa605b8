// ABOUTME: Reads column, index and foreign-key metadata per dialect into a portable document
// ABOUTME: Normalizes dialect type names and reports the latest applied migration as the version

use crate::adapter::{column_text, column_value, row_count_value, DatabaseAdapter, Row};
use crate::dialect::AdapterType;
use crate::error::{Result, TransferError};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};

/// Column definition in portable form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precision: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub primary_key: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub auto_increment: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexDefinition {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKeyDefinition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub columns: Vec<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_delete: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_update: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSchema {
    pub columns: Vec<ColumnDefinition>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<IndexDefinition>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub foreign_keys: Vec<ForeignKeyDefinition>,
}

/// `{version, tables: {name: {columns, indexes?, foreign_keys?}}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaDocument {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub tables: BTreeMap<String, TableSchema>,
}

impl SchemaDocument {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// Portable type name plus length/precision/scale parsed from a dialect type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedType {
    pub name: String,
    pub length: Option<u64>,
    pub precision: Option<u64>,
    pub scale: Option<u64>,
}

/// Map a dialect type name into the portable vocabulary.
///
/// # Examples
///
/// ```
/// # use dbtransfer::schema::normalize_type;
/// assert_eq!(normalize_type("INT(11) UNSIGNED").name, "integer");
/// assert_eq!(normalize_type("varchar(255)").length, Some(255));
/// assert_eq!(normalize_type("character varying").name, "string");
/// assert_eq!(normalize_type("longtext").name, "text");
/// let decimal = normalize_type("DECIMAL(10,2)");
/// assert_eq!((decimal.precision, decimal.scale), (Some(10), Some(2)));
/// ```
pub fn normalize_type(raw: &str) -> NormalizedType {
    let lowered = raw.trim().to_lowercase();
    let (base, args) = match lowered.split_once('(') {
        Some((base, rest)) => {
            let inner = rest.split(')').next().unwrap_or("");
            let args: Vec<u64> = inner
                .split(',')
                .filter_map(|a| a.trim().parse().ok())
                .collect();
            (base.trim().to_string(), args)
        }
        None => (lowered.clone(), Vec::new()),
    };
    let base = base
        .trim_end_matches(" unsigned")
        .trim_end_matches(" signed")
        .trim()
        .to_string();

    let name = match base.as_str() {
        "int" | "integer" | "tinyint" | "smallint" | "mediumint" | "int2" | "int4" | "serial"
        | "smallserial" => "integer",
        "bigint" | "int8" | "bigserial" => "biginteger",
        "varchar" | "char" | "character varying" | "character" | "nvarchar" | "nchar"
        | "bpchar" | "varchar2" => "string",
        "text" | "longtext" | "mediumtext" | "tinytext" | "clob" | "ntext" => "text",
        "decimal" | "numeric" => "decimal",
        "float" | "double" | "real" | "double precision" | "float4" | "float8" => "float",
        "bool" | "boolean" | "bit" => "boolean",
        "date" => "date",
        "datetime" | "timestamp" | "timestamp without time zone" | "timestamp with time zone"
        | "timestamptz" | "datetime2" => "datetime",
        "time" | "time without time zone" | "time with time zone" => "time",
        "blob" | "longblob" | "mediumblob" | "tinyblob" | "bytea" | "binary" | "varbinary" => {
            "binary"
        }
        "json" | "jsonb" => "json",
        "uuid" | "uniqueidentifier" => "uuid",
        other => other,
    }
    .to_string();

    let mut normalized = NormalizedType {
        name,
        length: None,
        precision: None,
        scale: None,
    };
    match (normalized.name.as_str(), args.as_slice()) {
        ("decimal" | "float", [p, s, ..]) => {
            normalized.precision = Some(*p);
            normalized.scale = Some(*s);
        }
        ("decimal" | "float", [p]) => normalized.precision = Some(*p),
        ("string" | "binary", [len, ..]) => normalized.length = Some(*len),
        _ => {}
    }
    normalized
}

/// `NO ACTION` and `RESTRICT` are the dialect defaults and are omitted.
fn referential_action(rule: Option<String>) -> Option<String> {
    let rule = rule?.trim().to_uppercase();
    match rule.as_str() {
        "" | "NO ACTION" | "RESTRICT" => None,
        _ => Some(rule),
    }
}

fn column_u64(row: &Row, name: &str) -> Option<u64> {
    match column_value(row, name)? {
        JsonValue::Number(n) => n.as_u64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn column_flag(row: &Row, name: &str) -> bool {
    match column_value(row, name) {
        Some(JsonValue::Bool(b)) => *b,
        Some(JsonValue::Number(n)) => n.as_i64().map(|v| v != 0).unwrap_or(false),
        Some(JsonValue::String(s)) => {
            matches!(s.trim().to_lowercase().as_str(), "1" | "yes" | "y" | "true" | "t")
        }
        _ => false,
    }
}

/// User tables of the connected database in name order.
pub fn list_tables(adapter: &dyn DatabaseAdapter) -> Result<Vec<String>> {
    let rows = adapter.fetch_all(adapter.adapter_type().list_tables_sql(), &[])?;
    Ok(rows.iter().filter_map(|r| column_text(r, "name")).collect())
}

/// What the transfer engines need to read and write one table's rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableLayout {
    /// Column names in ordinal order.
    pub columns: Vec<String>,
    /// Columns holding raw bytes; their row values are base64 text.
    pub binary: BTreeSet<String>,
    /// Stable row order for paged reads: the primary key, else every orderable column.
    pub order_by: Vec<String>,
}

impl TableLayout {
    pub fn from_columns(columns: &[ColumnDefinition]) -> Self {
        let primary: Vec<String> = columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.clone())
            .collect();
        let order_by = if primary.is_empty() {
            // json and xml have no ordering operator on PostgreSQL
            columns
                .iter()
                .filter(|c| !matches!(c.data_type.as_str(), "json" | "xml"))
                .map(|c| c.name.clone())
                .collect()
        } else {
            primary
        };
        Self {
            columns: columns.iter().map(|c| c.name.clone()).collect(),
            binary: columns
                .iter()
                .filter(|c| c.data_type == "binary")
                .map(|c| c.name.clone())
                .collect(),
            order_by,
        }
    }

    pub fn is_binary(&self, column: &str) -> bool {
        self.binary.contains(column)
    }
}

/// Column layout of `table`.
pub fn table_layout(adapter: &dyn DatabaseAdapter, table: &str) -> Result<TableLayout> {
    let columns = SchemaIntrospector::new(adapter, "").columns(table)?;
    Ok(TableLayout::from_columns(&columns))
}

/// Reads structural metadata through one adapter.
pub struct SchemaIntrospector<'a> {
    adapter: &'a dyn DatabaseAdapter,
    dialect: AdapterType,
    migration_table: String,
}

impl<'a> SchemaIntrospector<'a> {
    pub fn new(adapter: &'a dyn DatabaseAdapter, migration_table: &str) -> Self {
        Self {
            adapter,
            dialect: adapter.adapter_type(),
            migration_table: migration_table.to_string(),
        }
    }

    fn unsupported(&self) -> TransferError {
        TransferError::Configuration(format!(
            "Schema introspection is not available for {}",
            self.dialect
        ))
    }

    pub fn columns(&self, table: &str) -> Result<Vec<ColumnDefinition>> {
        match self.dialect {
            AdapterType::Sqlite => self.sqlite_columns(table),
            AdapterType::MySql => self.mysql_columns(table),
            AdapterType::Postgres => self.postgres_columns(table),
            AdapterType::SqlServer => Err(self.unsupported()),
        }
    }

    /// Secondary indexes; the primary key's implicit index is excluded.
    pub fn indexes(&self, table: &str) -> Result<Vec<IndexDefinition>> {
        match self.dialect {
            AdapterType::Sqlite => self.sqlite_indexes(table),
            AdapterType::MySql => {
                let rows = self.adapter.fetch_all(
                    "SELECT CAST(INDEX_NAME AS CHAR) AS index_name, \
                            CAST(COLUMN_NAME AS CHAR) AS column_name, NON_UNIQUE AS non_unique \
                     FROM INFORMATION_SCHEMA.STATISTICS \
                     WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? AND INDEX_NAME <> 'PRIMARY' \
                     ORDER BY INDEX_NAME, SEQ_IN_INDEX",
                    &[table.to_string()],
                )?;
                Ok(group_indexes(&rows, |r| !column_flag(r, "non_unique")))
            }
            AdapterType::Postgres => {
                let rows = self.adapter.fetch_all(
                    "SELECT i.relname::text AS index_name, a.attname::text AS column_name, \
                            ix.indisunique AS is_unique \
                     FROM pg_index ix \
                     JOIN pg_class t ON t.oid = ix.indrelid \
                     JOIN pg_class i ON i.oid = ix.indexrelid \
                     JOIN pg_namespace n ON n.oid = t.relnamespace \
                     JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey) \
                     WHERE n.nspname = current_schema() AND t.relname = ?::text \
                       AND NOT ix.indisprimary \
                     ORDER BY i.relname, array_position(ix.indkey, a.attnum)",
                    &[table.to_string()],
                )?;
                Ok(group_indexes(&rows, |r| column_flag(r, "is_unique")))
            }
            AdapterType::SqlServer => Err(self.unsupported()),
        }
    }

    /// Foreign keys, with default referential actions omitted.
    pub fn foreign_keys(&self, table: &str) -> Result<Vec<ForeignKeyDefinition>> {
        let rows = match self.dialect {
            AdapterType::Sqlite => {
                let rows = self.adapter.fetch_all(
                    "SELECT id AS constraint_name, \"from\" AS column_name, \
                            \"table\" AS referenced_table, \"to\" AS referenced_column, \
                            on_update AS update_rule, on_delete AS delete_rule \
                     FROM pragma_foreign_key_list(?) ORDER BY id, seq",
                    &[table.to_string()],
                )?;
                return Ok(group_foreign_keys(&rows, false));
            }
            AdapterType::MySql => self.adapter.fetch_all(
                "SELECT CAST(kcu.CONSTRAINT_NAME AS CHAR) AS constraint_name, \
                        CAST(kcu.COLUMN_NAME AS CHAR) AS column_name, \
                        CAST(kcu.REFERENCED_TABLE_NAME AS CHAR) AS referenced_table, \
                        CAST(kcu.REFERENCED_COLUMN_NAME AS CHAR) AS referenced_column, \
                        CAST(rc.UPDATE_RULE AS CHAR) AS update_rule, \
                        CAST(rc.DELETE_RULE AS CHAR) AS delete_rule \
                 FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE kcu \
                 JOIN INFORMATION_SCHEMA.REFERENTIAL_CONSTRAINTS rc \
                   ON kcu.CONSTRAINT_NAME = rc.CONSTRAINT_NAME \
                  AND kcu.TABLE_SCHEMA = rc.CONSTRAINT_SCHEMA \
                 WHERE kcu.TABLE_SCHEMA = DATABASE() AND kcu.TABLE_NAME = ? \
                   AND kcu.REFERENCED_TABLE_NAME IS NOT NULL \
                 ORDER BY kcu.CONSTRAINT_NAME, kcu.ORDINAL_POSITION",
                &[table.to_string()],
            )?,
            AdapterType::Postgres => self.adapter.fetch_all(
                "SELECT tc.constraint_name::text AS constraint_name, \
                        kcu.column_name::text AS column_name, \
                        ccu.table_name::text AS referenced_table, \
                        ccu.column_name::text AS referenced_column, \
                        rc.update_rule::text AS update_rule, rc.delete_rule::text AS delete_rule \
                 FROM information_schema.table_constraints tc \
                 JOIN information_schema.key_column_usage kcu \
                   ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema \
                 JOIN information_schema.constraint_column_usage ccu \
                   ON ccu.constraint_name = tc.constraint_name AND ccu.constraint_schema = tc.table_schema \
                 JOIN information_schema.referential_constraints rc \
                   ON rc.constraint_name = tc.constraint_name AND rc.constraint_schema = tc.table_schema \
                 WHERE tc.constraint_type = 'FOREIGN KEY' AND tc.table_schema = current_schema() \
                   AND tc.table_name::text = ? \
                 ORDER BY tc.constraint_name, kcu.ordinal_position",
                &[table.to_string()],
            )?,
            AdapterType::SqlServer => return Err(self.unsupported()),
        };
        Ok(group_foreign_keys(&rows, true))
    }

    pub fn table_schema(&self, table: &str) -> Result<TableSchema> {
        Ok(TableSchema {
            columns: self.columns(table)?,
            indexes: self.indexes(table)?,
            foreign_keys: self.foreign_keys(table)?,
        })
    }

    /// Latest applied migration version, `None` without a tracking table.
    pub fn current_version(&self) -> Result<Option<String>> {
        if self.migration_table.is_empty() || !self.adapter.has_table(&self.migration_table)? {
            return Ok(None);
        }
        let sql = format!(
            "SELECT version FROM {} ORDER BY version DESC",
            self.dialect.quote_identifier(&self.migration_table)
        );
        let sql = self.dialect.paginate(&sql, 1, 0);
        Ok(self
            .adapter
            .fetch_row(&sql, &[])?
            .and_then(|row| column_text(&row, "version")))
    }

    /// Describe every user table except the migration-tracking table.
    pub fn document(&self) -> Result<SchemaDocument> {
        let mut tables = BTreeMap::new();
        for table in list_tables(self.adapter)? {
            if table == self.migration_table {
                continue;
            }
            tracing::debug!("Introspecting table {}", crate::utils::sanitize_identifier(&table));
            tables.insert(table.clone(), self.table_schema(&table)?);
        }
        tracing::info!("Read schema for {} table(s)", tables.len());
        Ok(SchemaDocument {
            version: self.current_version()?,
            tables,
        })
    }

    fn sqlite_columns(&self, table: &str) -> Result<Vec<ColumnDefinition>> {
        let rows = self.adapter.fetch_all(
            "SELECT name, type, \"notnull\" AS not_null, dflt_value, pk FROM pragma_table_info(?) ORDER BY cid",
            &[table.to_string()],
        )?;
        let pk_count = rows.iter().filter(|r| column_flag(r, "pk")).count();
        Ok(rows
            .iter()
            .filter_map(|row| {
                let name = column_text(row, "name")?;
                let raw_type = column_text(row, "type").unwrap_or_default();
                let normalized = normalize_type(&raw_type);
                let primary_key = column_flag(row, "pk");
                // A lone INTEGER PRIMARY KEY aliases the rowid
                let auto_increment =
                    primary_key && pk_count == 1 && raw_type.eq_ignore_ascii_case("integer");
                Some(ColumnDefinition {
                    name,
                    nullable: !column_flag(row, "not_null") && !primary_key,
                    length: normalized.length,
                    precision: normalized.precision,
                    scale: normalized.scale,
                    data_type: normalized.name,
                    default: column_text(row, "dflt_value"),
                    primary_key,
                    auto_increment,
                    comment: None,
                })
            })
            .collect())
    }

    fn sqlite_indexes(&self, table: &str) -> Result<Vec<IndexDefinition>> {
        let list = self.adapter.fetch_all(
            "SELECT name, \"unique\" AS is_unique, origin FROM pragma_index_list(?) ORDER BY name",
            &[table.to_string()],
        )?;
        let mut indexes = Vec::new();
        for entry in &list {
            if column_text(entry, "origin").as_deref() == Some("pk") {
                continue;
            }
            let Some(name) = column_text(entry, "name") else {
                continue;
            };
            let columns = self
                .adapter
                .fetch_all(
                    "SELECT name FROM pragma_index_info(?) ORDER BY seqno",
                    &[name.clone()],
                )?
                .iter()
                .filter_map(|r| column_text(r, "name"))
                .collect();
            indexes.push(IndexDefinition {
                name,
                columns,
                unique: column_flag(entry, "is_unique"),
            });
        }
        Ok(indexes)
    }

    fn mysql_columns(&self, table: &str) -> Result<Vec<ColumnDefinition>> {
        let rows = self.adapter.fetch_all(
            "SELECT CAST(COLUMN_NAME AS CHAR) AS column_name, \
                    CAST(COLUMN_TYPE AS CHAR) AS column_type, \
                    CHARACTER_MAXIMUM_LENGTH AS max_length, \
                    NUMERIC_PRECISION AS numeric_precision, NUMERIC_SCALE AS numeric_scale, \
                    CAST(IS_NULLABLE AS CHAR) AS is_nullable, \
                    CAST(COLUMN_DEFAULT AS CHAR) AS column_default, \
                    CAST(COLUMN_COMMENT AS CHAR) AS column_comment, \
                    CAST(EXTRA AS CHAR) AS extra, CAST(COLUMN_KEY AS CHAR) AS column_key \
             FROM INFORMATION_SCHEMA.COLUMNS \
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? \
             ORDER BY ORDINAL_POSITION",
            &[table.to_string()],
        )?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                let name = column_text(row, "column_name")?;
                let normalized = normalize_type(&column_text(row, "column_type").unwrap_or_default());
                let is_decimal = normalized.name == "decimal";
                Some(ColumnDefinition {
                    name,
                    nullable: column_flag(row, "is_nullable"),
                    length: normalized.length.or_else(|| {
                        (normalized.name == "string")
                            .then(|| column_u64(row, "max_length"))
                            .flatten()
                    }),
                    precision: normalized
                        .precision
                        .or_else(|| is_decimal.then(|| column_u64(row, "numeric_precision")).flatten()),
                    scale: normalized
                        .scale
                        .or_else(|| is_decimal.then(|| column_u64(row, "numeric_scale")).flatten()),
                    data_type: normalized.name,
                    default: column_text(row, "column_default"),
                    primary_key: column_text(row, "column_key").as_deref() == Some("PRI"),
                    auto_increment: column_text(row, "extra")
                        .map(|e| e.to_lowercase().contains("auto_increment"))
                        .unwrap_or(false),
                    comment: column_text(row, "column_comment").filter(|c| !c.is_empty()),
                })
            })
            .collect())
    }

    fn postgres_columns(&self, table: &str) -> Result<Vec<ColumnDefinition>> {
        let rows = self.adapter.fetch_all(
            "SELECT c.column_name::text AS column_name, c.data_type::text AS data_type, \
                    c.character_maximum_length::bigint AS max_length, \
                    c.numeric_precision::bigint AS numeric_precision, \
                    c.numeric_scale::bigint AS numeric_scale, \
                    c.is_nullable::text AS is_nullable, c.column_default::text AS column_default, \
                    c.is_identity::text AS is_identity, \
                    col_description(format('%I.%I', c.table_schema, c.table_name)::regclass::oid, \
                                    c.ordinal_position::int) AS column_comment, \
                    EXISTS ( \
                        SELECT 1 FROM information_schema.table_constraints tc \
                        JOIN information_schema.key_column_usage kcu \
                          ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema \
                        WHERE tc.constraint_type = 'PRIMARY KEY' AND tc.table_schema = c.table_schema \
                          AND tc.table_name = c.table_name AND kcu.column_name = c.column_name \
                    ) AS is_primary \
             FROM information_schema.columns c \
             WHERE c.table_schema = current_schema() AND c.table_name::text = ? \
             ORDER BY c.ordinal_position",
            &[table.to_string()],
        )?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                let name = column_text(row, "column_name")?;
                let normalized = normalize_type(&column_text(row, "data_type").unwrap_or_default());
                let default = column_text(row, "column_default");
                let serial = default
                    .as_deref()
                    .map(|d| d.starts_with("nextval("))
                    .unwrap_or(false);
                let is_decimal = normalized.name == "decimal";
                Some(ColumnDefinition {
                    name,
                    nullable: column_flag(row, "is_nullable"),
                    length: (normalized.name == "string")
                        .then(|| column_u64(row, "max_length"))
                        .flatten(),
                    precision: is_decimal.then(|| column_u64(row, "numeric_precision")).flatten(),
                    scale: is_decimal.then(|| column_u64(row, "numeric_scale")).flatten(),
                    data_type: normalized.name,
                    default: if serial { None } else { default },
                    primary_key: column_flag(row, "is_primary"),
                    auto_increment: serial || column_flag(row, "is_identity"),
                    comment: column_text(row, "column_comment"),
                })
            })
            .collect())
    }
}

fn group_indexes(rows: &[Row], unique: impl Fn(&Row) -> bool) -> Vec<IndexDefinition> {
    let mut indexes: Vec<IndexDefinition> = Vec::new();
    for row in rows {
        let (Some(name), Some(column)) = (column_text(row, "index_name"), column_text(row, "column_name")) else {
            continue;
        };
        match indexes.iter_mut().find(|i| i.name == name) {
            Some(index) => index.columns.push(column),
            None => indexes.push(IndexDefinition {
                name,
                columns: vec![column],
                unique: unique(row),
            }),
        }
    }
    indexes
}

fn group_foreign_keys(rows: &[Row], named: bool) -> Vec<ForeignKeyDefinition> {
    let mut keys: Vec<(String, ForeignKeyDefinition)> = Vec::new();
    for row in rows {
        let id = column_value(row, "constraint_name")
            .map(|v| match v {
                JsonValue::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_default();
        let Some(column) = column_text(row, "column_name") else {
            continue;
        };
        let referenced_column = column_text(row, "referenced_column");
        let position = match keys.iter().position(|(key, _)| *key == id) {
            Some(position) => position,
            None => {
                keys.push((
                    id.clone(),
                    ForeignKeyDefinition {
                        name: named.then(|| id.clone()),
                        columns: Vec::new(),
                        referenced_table: column_text(row, "referenced_table").unwrap_or_default(),
                        referenced_columns: Vec::new(),
                        on_delete: referential_action(column_text(row, "delete_rule")),
                        on_update: referential_action(column_text(row, "update_rule")),
                    },
                ));
                keys.len() - 1
            }
        };
        let fk = &mut keys[position].1;
        if !fk.columns.contains(&column) {
            fk.columns.push(column);
        }
        if let Some(referenced) = referenced_column {
            if !fk.referenced_columns.contains(&referenced) {
                fk.referenced_columns.push(referenced);
            }
        }
    }
    keys.into_iter().map(|(_, fk)| fk).collect()
}

/// Row count of a table, optionally filtered by a parameterized WHERE fragment.
pub fn count_rows(
    adapter: &dyn DatabaseAdapter,
    table: &str,
    filter: Option<&crate::where_clause::ParameterizedClause>,
) -> Result<u64> {
    let dialect = adapter.adapter_type();
    let mut sql = dialect.count_rows_sql(table);
    let mut bindings: &[String] = &[];
    if let Some(clause) = filter {
        sql.push_str(" WHERE ");
        sql.push_str(&clause.sql);
        bindings = clause.bindings.as_slice();
    }
    let row = adapter.fetch_row(&sql, bindings)?.ok_or_else(|| {
        TransferError::State(format!(
            "Row count query for '{}' returned no rows",
            crate::utils::sanitize_identifier(table)
        ))
    })?;
    row_count_value(&row).ok_or_else(|| {
        TransferError::State(format!(
            "Row count query for '{}' returned a non-numeric value",
            crate::utils::sanitize_identifier(table)
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::SqliteAdapter;

    fn sample_db() -> SqliteAdapter {
        let adapter = SqliteAdapter::open_in_memory().unwrap();
        adapter
            .execute(
                "CREATE TABLE users (id INTEGER PRIMARY KEY, email VARCHAR(120) NOT NULL, \
                    balance DECIMAL(10,2) DEFAULT 0);
                 CREATE UNIQUE INDEX idx_users_email ON users(email);
                 CREATE TABLE posts (id INTEGER PRIMARY KEY, user_id INTEGER NOT NULL \
                    REFERENCES users(id) ON DELETE CASCADE, body TEXT);
                 CREATE INDEX idx_posts_user ON posts(user_id);",
            )
            .unwrap();
        adapter
    }

    #[test]
    fn test_normalize_type_vocabulary() {
        assert_eq!(normalize_type("tinyint").name, "integer");
        assert_eq!(normalize_type("smallint").name, "integer");
        assert_eq!(normalize_type("char(2)").name, "string");
        assert_eq!(normalize_type("char(2)").length, Some(2));
        assert_eq!(normalize_type("timestamp without time zone").name, "datetime");
        assert_eq!(normalize_type("geometry").name, "geometry");
    }

    #[test]
    fn test_sqlite_columns() {
        let adapter = sample_db();
        let columns = SchemaIntrospector::new(&adapter, "schema_migrations")
            .columns("users")
            .unwrap();
        assert_eq!(columns.len(), 3);
        assert!(columns[0].primary_key);
        assert!(columns[0].auto_increment);
        assert_eq!(columns[1].data_type, "string");
        assert_eq!(columns[1].length, Some(120));
        assert!(!columns[1].nullable);
        assert_eq!(columns[2].data_type, "decimal");
        assert_eq!(columns[2].scale, Some(2));
        assert_eq!(columns[2].default.as_deref(), Some("0"));
    }

    #[test]
    fn test_sqlite_indexes_and_foreign_keys() {
        let adapter = sample_db();
        let introspector = SchemaIntrospector::new(&adapter, "schema_migrations");
        let indexes = introspector.indexes("users").unwrap();
        assert_eq!(indexes.len(), 1);
        assert!(indexes[0].unique);
        assert_eq!(indexes[0].columns, vec!["email"]);

        let fks = introspector.foreign_keys("posts").unwrap();
        assert_eq!(fks.len(), 1);
        assert_eq!(fks[0].referenced_table, "users");
        assert_eq!(fks[0].columns, vec!["user_id"]);
        assert_eq!(fks[0].referenced_columns, vec!["id"]);
        assert_eq!(fks[0].on_delete.as_deref(), Some("CASCADE"));
        assert_eq!(fks[0].on_update, None);
    }

    #[test]
    fn test_document_version_and_exclusion() {
        let adapter = sample_db();
        let introspector = SchemaIntrospector::new(&adapter, "schema_migrations");
        assert_eq!(introspector.document().unwrap().version, None);

        adapter
            .execute(
                "CREATE TABLE schema_migrations (version BIGINT PRIMARY KEY, migration_name TEXT);
                 INSERT INTO schema_migrations VALUES (20240101000000, 'a'), (20240301000000, 'b');",
            )
            .unwrap();
        let document = introspector.document().unwrap();
        assert_eq!(document.version.as_deref(), Some("20240301000000"));
        assert!(!document.tables.contains_key("schema_migrations"));
        assert_eq!(document.tables.len(), 2);

        let json: JsonValue = serde_json::from_str(&document.to_json().unwrap()).unwrap();
        assert_eq!(json["tables"]["users"]["columns"][0]["type"], "integer");
        assert!(json["tables"]["posts"]["foreign_keys"].is_array());
        assert!(document.to_yaml().unwrap().contains("20240301000000"));
    }

    #[test]
    fn test_table_layout_orders_by_primary_key() {
        let adapter = SqliteAdapter::open_in_memory().unwrap();
        adapter
            .execute(
                "CREATE TABLE files (name TEXT, id INTEGER PRIMARY KEY, body BLOB);
                 CREATE TABLE tags (label TEXT, payload BLOB);",
            )
            .unwrap();
        let files = table_layout(&adapter, "files").unwrap();
        assert_eq!(files.columns, vec!["name", "id", "body"]);
        assert_eq!(files.order_by, vec!["id"]);
        assert!(files.is_binary("body"));
        assert!(!files.is_binary("name"));

        let tags = table_layout(&adapter, "tags").unwrap();
        assert_eq!(tags.order_by, vec!["label", "payload"]);
    }

    #[test]
    fn test_count_rows_with_filter() {
        let adapter = sample_db();
        adapter
            .execute("INSERT INTO users (email) VALUES ('a@x'), ('b@x'), ('c@y')")
            .unwrap();
        assert_eq!(count_rows(&adapter, "users", None).unwrap(), 3);
        let clause =
            crate::where_clause::parameterize("email LIKE '%@x'", AdapterType::Sqlite).unwrap();
        assert_eq!(count_rows(&adapter, "users", Some(&clause)).unwrap(), 2);
    }
}
