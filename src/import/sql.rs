// ABOUTME: Splits SQL scripts into statements while tracking string-literal and comment state
// ABOUTME: Also extracts statement target tables and estimates INSERT row counts

use crate::dialect::AdapterType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Normal,
    /// Inside a literal or quoted identifier; `bool` is whether backslash escapes apply.
    Quoted(char, bool),
    LineComment,
    BlockComment,
}

/// Whether backslash escapes apply to a literal that opens at `at`.
///
/// MySQL always honors them; PostgreSQL only in `E'...'` strings.
fn backslash_escapes(dialect: AdapterType, quote: char, chars: &[char], at: usize) -> bool {
    match dialect {
        AdapterType::MySql => quote != '`',
        AdapterType::Postgres => {
            quote == '\''
                && at > 0
                && matches!(chars[at - 1], 'E' | 'e')
                && (at < 2 || !(chars[at - 2].is_alphanumeric() || chars[at - 2] == '_'))
        }
        AdapterType::Sqlite | AdapterType::SqlServer => false,
    }
}

/// Split a script into statements.
///
/// `;`, `--`, `#` and `/*` inside literals are ordinary characters. Doubled
/// quotes always escape; backslash escapes follow the dialect. Comments are
/// dropped and statements are returned trimmed without their terminator.
///
/// # Examples
///
/// ```
/// # use dbtransfer::import::sql::split_statements;
/// # use dbtransfer::dialect::AdapterType;
/// let script = "INSERT INTO t VALUES ('a;b'); -- done\nDELETE FROM t;";
/// assert_eq!(
///     split_statements(script, AdapterType::Sqlite),
///     vec!["INSERT INTO t VALUES ('a;b')", "DELETE FROM t"]
/// );
/// ```
pub fn split_statements(script: &str, dialect: AdapterType) -> Vec<String> {
    let chars: Vec<char> = script.chars().collect();
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut state = State::Normal;
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        let next = chars.get(i + 1).copied();
        match state {
            State::Normal => match ch {
                '\'' | '"' | '`' => {
                    state = State::Quoted(ch, backslash_escapes(dialect, ch, &chars, i));
                    current.push(ch);
                }
                '[' if dialect == AdapterType::SqlServer => {
                    state = State::Quoted(']', false);
                    current.push(ch);
                }
                '-' if next == Some('-') => {
                    state = State::LineComment;
                    i += 1;
                }
                '#' if dialect == AdapterType::MySql => state = State::LineComment,
                '/' if next == Some('*') => {
                    state = State::BlockComment;
                    i += 1;
                }
                ';' => {
                    push_statement(&mut statements, &mut current);
                }
                _ => current.push(ch),
            },
            State::Quoted(quote, escapes) => {
                current.push(ch);
                if escapes && ch == '\\' {
                    if let Some(escaped) = next {
                        current.push(escaped);
                        i += 1;
                    }
                } else if ch == quote {
                    if next == Some(quote) {
                        current.push(quote);
                        i += 1;
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::LineComment => {
                if ch == '\n' {
                    state = State::Normal;
                    current.push('\n');
                }
            }
            State::BlockComment => {
                if ch == '*' && next == Some('/') {
                    state = State::Normal;
                    current.push(' ');
                    i += 1;
                }
            }
        }
        i += 1;
    }
    push_statement(&mut statements, &mut current);
    statements
}

fn push_statement(statements: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        statements.push(trimmed.to_string());
    }
    current.clear();
}

fn normalized_keywords(statement: &str) -> String {
    statement
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

/// BEGIN/START TRANSACTION/COMMIT/ROLLBACK statements owned by the importer.
pub fn is_transaction_control(statement: &str) -> bool {
    matches!(
        normalized_keywords(statement).as_str(),
        "BEGIN"
            | "BEGIN TRANSACTION"
            | "BEGIN WORK"
            | "START TRANSACTION"
            | "COMMIT"
            | "COMMIT TRANSACTION"
            | "COMMIT WORK"
            | "END"
            | "END TRANSACTION"
            | "ROLLBACK"
            | "ROLLBACK TRANSACTION"
            | "ROLLBACK WORK"
    )
}

/// Read one possibly quoted, possibly schema-qualified identifier; returns the last part.
fn read_identifier(text: &str) -> Option<String> {
    let mut chars = text.trim_start().chars().peekable();
    let mut last = None;
    loop {
        let part = match chars.peek().copied()? {
            open @ ('"' | '`' | '[') => {
                let close = if open == '[' { ']' } else { open };
                chars.next();
                let mut name = String::new();
                loop {
                    let c = chars.next()?;
                    if c == close {
                        if chars.peek() == Some(&close) {
                            chars.next();
                            name.push(close);
                        } else {
                            break;
                        }
                    } else {
                        name.push(c);
                    }
                }
                name
            }
            _ => {
                let mut name = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' || c == '$' {
                        name.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if name.is_empty() {
                    return last;
                }
                name
            }
        };
        last = Some(part);
        if chars.peek() == Some(&'.') {
            chars.next();
        } else {
            return last;
        }
    }
}

/// Table a data or DDL statement acts on, if recognizable.
///
/// # Examples
///
/// ```
/// # use dbtransfer::import::sql::target_table;
/// assert_eq!(target_table("INSERT INTO `app`.`users` (id) VALUES (1)").as_deref(), Some("users"));
/// assert_eq!(target_table("DROP TABLE IF EXISTS \"a\"\"b\"").as_deref(), Some("a\"b"));
/// assert_eq!(target_table("PRAGMA foreign_keys = OFF"), None);
/// ```
pub fn target_table(statement: &str) -> Option<String> {
    let upper = statement.trim_start().to_uppercase();
    let words: Vec<&str> = upper.split_whitespace().collect();
    let prefixes: &[&[&str]] = &[
        &["INSERT", "INTO"],
        &["REPLACE", "INTO"],
        &["INSERT", "OR", "REPLACE", "INTO"],
        &["INSERT", "OR", "IGNORE", "INTO"],
        &["INSERT", "IGNORE", "INTO"],
        &["DELETE", "FROM"],
        &["DROP", "TABLE", "IF", "EXISTS"],
        &["DROP", "TABLE"],
        &["CREATE", "TABLE", "IF", "NOT", "EXISTS"],
        &["CREATE", "TABLE"],
        &["TRUNCATE", "TABLE"],
        &["TRUNCATE"],
        &["UPDATE"],
    ];
    let prefix = prefixes
        .iter()
        .find(|p| words.len() > p.len() && words[..p.len()] == p[..])?;

    // Skip the same number of words in the original text to keep identifier case
    let mut rest = statement.trim_start();
    for _ in 0..prefix.len() {
        let end = rest.find(char::is_whitespace)?;
        rest = rest[end..].trim_start();
    }
    read_identifier(rest)
}

/// Number of value groups in an INSERT statement, zero for anything else.
///
/// # Examples
///
/// ```
/// # use dbtransfer::import::sql::estimate_insert_rows;
/// # use dbtransfer::dialect::AdapterType;
/// let sql = "INSERT INTO t (a, b) VALUES (1, '(x)'), (2, 'y')";
/// assert_eq!(estimate_insert_rows(sql, AdapterType::Sqlite), 2);
/// assert_eq!(estimate_insert_rows("DELETE FROM t", AdapterType::Sqlite), 0);
/// ```
pub fn estimate_insert_rows(statement: &str, dialect: AdapterType) -> u64 {
    let upper = statement.to_uppercase();
    if !(upper.trim_start().starts_with("INSERT") || upper.trim_start().starts_with("REPLACE")) {
        return 0;
    }

    let chars: Vec<char> = statement.chars().collect();
    let upper_chars: Vec<char> = upper.chars().collect();
    let mut quote: Option<(char, bool)> = None;
    let mut after_values = false;
    let mut depth = 0u32;
    let mut groups = 0u64;
    let mut i = 0;
    while i < chars.len() {
        let ch = chars[i];
        if let Some((q, escapes)) = quote {
            if escapes && ch == '\\' {
                i += 1;
            } else if ch == q {
                if chars.get(i + 1) == Some(&q) {
                    i += 1;
                } else {
                    quote = None;
                }
            }
        } else if matches!(ch, '\'' | '"' | '`') {
            quote = Some((ch, backslash_escapes(dialect, ch, &chars, i)));
        } else if !after_values {
            let is_word = |c: &char| c.is_alphanumeric() || *c == '_';
            if upper_chars.len() == chars.len()
                && upper_chars[i..].starts_with(&['V', 'A', 'L', 'U', 'E', 'S'])
                && (i == 0 || !is_word(&chars[i - 1]))
                && !chars.get(i + 6).map(is_word).unwrap_or(false)
            {
                after_values = true;
                i += 5;
            }
        } else if ch == '(' {
            if depth == 0 {
                groups += 1;
            }
            depth += 1;
        } else if ch == ')' {
            depth = depth.saturating_sub(1);
        }
        i += 1;
    }
    groups
}
