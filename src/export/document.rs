// ABOUTME: JSON and YAML dump documents built from per-table snapshots
// ABOUTME: JSON wraps rows as {rows_count, rows}; YAML lists rows directly under the table

use crate::adapter::Row;
use crate::dialect::AdapterType;
use crate::error::Result;
use crate::options::Format;
use serde_json::{json, Map, Value as JsonValue};

/// Rows of one exported table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSnapshot {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

fn build(
    snapshots: &[TableSnapshot],
    dialect: AdapterType,
    exported_at: &str,
    nested: bool,
) -> JsonValue {
    let mut data = Map::new();
    for snapshot in snapshots {
        let rows: Vec<JsonValue> = snapshot.rows.iter().cloned().map(JsonValue::Object).collect();
        let entry = if nested {
            json!({ "rows_count": rows.len(), "rows": rows })
        } else {
            JsonValue::Array(rows)
        };
        data.insert(snapshot.name.clone(), entry);
    }
    json!({
        "metadata": {
            "exported_at": exported_at,
            "database_type": dialect.name(),
            "tables_count": snapshots.len(),
        },
        "data": data,
    })
}

/// Render snapshots as a JSON or YAML dump.
pub fn render(
    format: Format,
    snapshots: &[TableSnapshot],
    dialect: AdapterType,
    exported_at: &str,
) -> Result<String> {
    match format {
        Format::Yaml => Ok(serde_yaml::to_string(&build(snapshots, dialect, exported_at, false))?),
        _ => {
            let mut text =
                serde_json::to_string_pretty(&build(snapshots, dialect, exported_at, true))?;
            text.push('\n');
            Ok(text)
        }
    }
}
