// ABOUTME: CSV reader for exported table files
// ABOUTME: Keeps NULL (empty unquoted field) distinct from the empty string (quoted empty field)

use crate::adapter::Row;
use crate::error::{Result, TransferError};
use serde_json::Value as JsonValue;

/// One parsed record; `None` is an empty unquoted field.
pub type CsvRecord = Vec<Option<String>>;

/// Parse CSV text into records. Quoted fields may span lines.
///
/// A blank line yields an empty record, which is a NULL row for a
/// single-column table and ignored otherwise.
///
/// # Examples
///
/// ```
/// # use dbtransfer::import::csv::parse_records;
/// let records = parse_records("a,b\n1,\"\"\n2,\n").unwrap();
/// assert_eq!(records[1], vec![Some("1".to_string()), Some(String::new())]);
/// assert_eq!(records[2], vec![Some("2".to_string()), None]);
/// ```
pub fn parse_records(text: &str) -> Result<Vec<CsvRecord>> {
    let mut records = Vec::new();
    let mut record: CsvRecord = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut in_quotes = false;
    let mut line_has_content = false;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            if ch == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(ch);
            }
            continue;
        }
        match ch {
            '"' if field.is_empty() && !quoted => {
                quoted = true;
                in_quotes = true;
                line_has_content = true;
            }
            ',' => {
                record.push(finish_field(&mut field, &mut quoted));
                line_has_content = true;
            }
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                if line_has_content || !field.is_empty() {
                    record.push(finish_field(&mut field, &mut quoted));
                }
                records.push(std::mem::take(&mut record));
                line_has_content = false;
            }
            _ => {
                field.push(ch);
                line_has_content = true;
            }
        }
    }

    if in_quotes {
        return Err(TransferError::Data(
            "CSV input ends inside a quoted field".to_string(),
        ));
    }
    if line_has_content || !field.is_empty() {
        record.push(finish_field(&mut field, &mut quoted));
        records.push(record);
    }
    Ok(records)
}

fn finish_field(field: &mut String, quoted: &mut bool) -> Option<String> {
    let value = std::mem::take(field);
    let was_quoted = std::mem::replace(quoted, false);
    if value.is_empty() && !was_quoted {
        None
    } else {
        Some(value)
    }
}

/// Header and rows of one CSV table file.
#[derive(Debug, Clone, PartialEq)]
pub struct CsvTable {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    /// 1-based record numbers (header is 1) skipped for a column-count mismatch.
    pub skipped: Vec<usize>,
}

/// Parse a table file; rows whose field count differs from the header are skipped.
pub fn read_table(text: &str) -> Result<CsvTable> {
    let mut records = parse_records(text)?.into_iter();
    let header = records
        .next()
        .ok_or_else(|| TransferError::Data("CSV file has no header row".to_string()))?;
    let columns: Vec<String> = header.into_iter().map(Option::unwrap_or_default).collect();
    if columns.iter().any(|c| c.is_empty()) {
        return Err(TransferError::Data(
            "CSV header contains an empty column name".to_string(),
        ));
    }

    let mut rows = Vec::new();
    let mut skipped = Vec::new();
    for (index, mut record) in records.enumerate() {
        if record.is_empty() {
            if columns.len() != 1 {
                continue;
            }
            record.push(None);
        }
        if record.len() != columns.len() {
            skipped.push(index + 2);
            continue;
        }
        let mut row = Row::new();
        for (column, value) in columns.iter().zip(record) {
            row.insert(
                column.clone(),
                value.map(JsonValue::String).unwrap_or(JsonValue::Null),
            );
        }
        rows.push(row);
    }
    Ok(CsvTable {
        columns,
        rows,
        skipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::csv::{header_line, row_line};
    use serde_json::json;

    #[test]
    fn test_quoted_fields_with_newlines_and_quotes() {
        let records = parse_records("id,note\r\n1,\"line one\nline \"\"two\"\"\"\r\n").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1][1].as_deref(), Some("line one\nline \"two\""));
    }

    #[test]
    fn test_blank_lines() {
        let records = parse_records("a\n\n1\n").unwrap();
        assert_eq!(
            records,
            vec![vec![Some("a".to_string())], vec![], vec![Some("1".to_string())]]
        );

        let single = read_table("note\n\nx\n").unwrap();
        assert_eq!(single.rows.len(), 2);
        assert_eq!(single.rows[0]["note"], JsonValue::Null);

        let wide = read_table("a,b\n1,2\n\n").unwrap();
        assert_eq!(wide.rows.len(), 1);
        assert!(wide.skipped.is_empty());
    }

    #[test]
    fn test_unterminated_quote_is_data_error() {
        assert!(matches!(
            parse_records("a\n\"open"),
            Err(TransferError::Data(_))
        ));
    }

    #[test]
    fn test_read_table_skips_malformed_rows() {
        let table = read_table("id,name\n1,ann\n2\n3,cy,extra\n4,\n").unwrap();
        assert_eq!(table.columns, vec!["id", "name"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.skipped, vec![3, 4]);
        assert_eq!(table.rows[1]["name"], json!(null));
    }

    #[test]
    fn test_reads_what_the_exporter_writes() {
        let columns = vec!["id".to_string(), "nick".to_string(), "note".to_string(), "zip".to_string()];
        let mut row = Row::new();
        row.insert("id".into(), json!(7));
        row.insert("nick".into(), json!(""));
        row.insert("note".into(), json!(null));
        row.insert("zip".into(), json!("0042"));
        let text = format!("{}{}", header_line(&columns), row_line(&columns, &row));

        let table = read_table(&text).unwrap();
        let parsed = &table.rows[0];
        assert_eq!(parsed["id"], json!("7"));
        assert_eq!(parsed["nick"], json!(""));
        assert_eq!(parsed["note"], json!(null));
        assert_eq!(parsed["zip"], json!("0042"));
    }
}
