// ABOUTME: CSV line formatter used by every CSV export path
// ABOUTME: NULL is an empty unquoted field and the empty string is a quoted empty field

use crate::adapter::Row;
use serde_json::Value as JsonValue;

fn needs_quoting(text: &str) -> bool {
    text.is_empty()
        || text
            .chars()
            .any(|c| matches!(c, ',' | '"' | '\n' | '\r'))
        || text.starts_with(' ')
        || text.ends_with(' ')
}

fn quote(text: &str) -> String {
    format!("\"{}\"", text.replace('"', "\"\""))
}

/// Render one value as a CSV field.
///
/// # Examples
///
/// ```
/// # use dbtransfer::export::csv::format_field;
/// # use serde_json::json;
/// assert_eq!(format_field(&json!(null)), "");
/// assert_eq!(format_field(&json!("")), "\"\"");
/// assert_eq!(format_field(&json!("a,b")), "\"a,b\"");
/// assert_eq!(format_field(&json!("say \"hi\"")), "\"say \"\"hi\"\"\"");
/// assert_eq!(format_field(&json!(42)), "42");
/// ```
pub fn format_field(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::String(s) => {
            if needs_quoting(s) {
                quote(s)
            } else {
                s.clone()
            }
        }
        other => quote(&other.to_string()),
    }
}

/// Header line for a column list, newline-terminated.
pub fn header_line(columns: &[String]) -> String {
    let fields: Vec<String> = columns
        .iter()
        .map(|c| {
            if needs_quoting(c) {
                quote(c)
            } else {
                c.clone()
            }
        })
        .collect();
    format!("{}\n", fields.join(","))
}

/// Data line for a row in column order, newline-terminated. Missing columns are NULL.
pub fn row_line(columns: &[String], row: &Row) -> String {
    let fields: Vec<String> = columns
        .iter()
        .map(|c| format_field(row.get(c).unwrap_or(&JsonValue::Null)))
        .collect();
    format!("{}\n", fields.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_row_line_null_versus_empty() {
        let columns = vec!["id".to_string(), "nick".to_string(), "note".to_string()];
        let mut row = Row::new();
        row.insert("id".into(), json!(1));
        row.insert("nick".into(), json!(""));
        row.insert("note".into(), json!(null));
        assert_eq!(row_line(&columns, &row), "1,\"\",\n");
    }

    #[test]
    fn test_multiline_and_padding_quoted() {
        assert_eq!(format_field(&json!("a\nb")), "\"a\nb\"");
        assert_eq!(format_field(&json!(" padded")), "\" padded\"");
        assert_eq!(format_field(&json!("0042")), "0042");
    }

    #[test]
    fn test_header_line() {
        let columns = vec!["id".to_string(), "full name".to_string(), "a,b".to_string()];
        assert_eq!(header_line(&columns), "id,full name,\"a,b\"\n");
    }
}
