// ABOUTME: Turns a validated WHERE clause into placeholder SQL plus ordered bindings
// ABOUTME: Supports AND/OR chains of comparisons, LIKE, IN lists and IS [NOT] NULL

use super::scanner::{tokenize, Token};
use super::validator::validate;
use crate::dialect::AdapterType;
use crate::error::{Result, TransferError};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

static IDENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$")
        .expect("static regex must compile")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    NotEq,
    NotEqAnsi,
    Lt,
    Gt,
    LtEq,
    GtEq,
    Like,
    NotLike,
    In,
    NotIn,
    IsNull,
    IsNotNull,
}

impl Operator {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::NotEq => "!=",
            Operator::NotEqAnsi => "<>",
            Operator::Lt => "<",
            Operator::Gt => ">",
            Operator::LtEq => "<=",
            Operator::GtEq => ">=",
            Operator::Like => "LIKE",
            Operator::NotLike => "NOT LIKE",
            Operator::In => "IN",
            Operator::NotIn => "NOT IN",
            Operator::IsNull => "IS NULL",
            Operator::IsNotNull => "IS NOT NULL",
        }
    }

    fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "=" => Some(Operator::Eq),
            "!=" => Some(Operator::NotEq),
            "<>" => Some(Operator::NotEqAnsi),
            "<" => Some(Operator::Lt),
            ">" => Some(Operator::Gt),
            "<=" => Some(Operator::LtEq),
            ">=" => Some(Operator::GtEq),
            _ => None,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Right-hand side of a condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WhereValue {
    None,
    Single(String),
    List(Vec<String>),
}

/// One `column OP value` condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhereCondition {
    pub column: String,
    pub operator: Operator,
    pub value: WhereValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connective {
    And,
    Or,
}

impl Connective {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Connective::And => "AND",
            Connective::Or => "OR",
        }
    }
}

/// Parsed clause: `connectives[i]` joins `conditions[i]` and `conditions[i + 1]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhereClause {
    pub conditions: Vec<WhereCondition>,
    pub connectives: Vec<Connective>,
}

/// SQL with `?` placeholders and the values bound to them, in order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParameterizedClause {
    pub sql: String,
    pub bindings: Vec<String>,
}

impl ParameterizedClause {
    pub fn placeholder_count(&self) -> usize {
        let mut scanner = super::scanner::QuoteScanner::new();
        let mut events = Vec::new();
        for ch in self.sql.chars() {
            scanner.step(ch, &mut events);
        }
        events
            .iter()
            .filter(|e| matches!(e, super::scanner::Event::Code('?')))
            .count()
    }
}

fn quote_column(column: &str, dialect: AdapterType) -> String {
    column
        .split('.')
        .map(|part| dialect.quote_identifier(part))
        .collect::<Vec<_>>()
        .join(".")
}

impl WhereClause {
    /// Render placeholder SQL with identifiers quoted for `dialect`.
    pub fn to_parameterized(&self, dialect: AdapterType) -> ParameterizedClause {
        let mut sql = String::new();
        let mut bindings = Vec::new();

        for (i, condition) in self.conditions.iter().enumerate() {
            if i > 0 {
                sql.push(' ');
                sql.push_str(self.connectives[i - 1].as_sql());
                sql.push(' ');
            }
            sql.push_str(&quote_column(&condition.column, dialect));
            sql.push(' ');
            sql.push_str(condition.operator.as_sql());
            match &condition.value {
                WhereValue::None => {}
                WhereValue::Single(value) => {
                    sql.push_str(" ?");
                    bindings.push(value.clone());
                }
                WhereValue::List(values) => {
                    let placeholders = vec!["?"; values.len()].join(", ");
                    sql.push_str(&format!(" ({})", placeholders));
                    bindings.extend(values.iter().cloned());
                }
            }
        }

        ParameterizedClause { sql, bindings }
    }
}

fn keyword(token: Option<&Token>, expected: &str) -> bool {
    matches!(token, Some(Token::Word(w)) if w.eq_ignore_ascii_case(expected))
}

fn unexpected(token: Option<&Token>, wanted: &str) -> TransferError {
    let found = match token {
        None => "end of clause".to_string(),
        Some(Token::Word(w)) => format!("'{}'", w),
        Some(Token::Quoted(_)) => "a quoted value".to_string(),
        Some(Token::Operator(op)) => format!("'{}'", op),
        Some(Token::LParen) => "'('".to_string(),
        Some(Token::RParen) => "')'".to_string(),
        Some(Token::Comma) => "','".to_string(),
    };
    TransferError::Validation(format!("expected {}, found {}", wanted, found))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn clause(&mut self) -> Result<WhereClause> {
        let mut conditions = vec![self.condition()?];
        let mut connectives = Vec::new();
        while let Some(token) = self.peek() {
            let connective = match token {
                Token::Word(w) if w.eq_ignore_ascii_case("AND") => Connective::And,
                Token::Word(w) if w.eq_ignore_ascii_case("OR") => Connective::Or,
                other => return Err(unexpected(Some(other), "AND or OR")),
            };
            self.pos += 1;
            connectives.push(connective);
            conditions.push(self.condition()?);
        }
        Ok(WhereClause {
            conditions,
            connectives,
        })
    }

    fn condition(&mut self) -> Result<WhereCondition> {
        let column = match self.advance() {
            Some(Token::Word(w)) if IDENT_RE.is_match(&w) => w,
            Some(Token::LParen) => {
                return Err(TransferError::Validation(
                    "grouping parentheses are not supported".to_string(),
                ))
            }
            other => return Err(unexpected(other.as_ref(), "a column name")),
        };

        if keyword(self.peek(), "IS") {
            self.pos += 1;
            let operator = if keyword(self.peek(), "NOT") {
                self.pos += 1;
                Operator::IsNotNull
            } else {
                Operator::IsNull
            };
            if !keyword(self.peek(), "NULL") {
                return Err(unexpected(self.peek(), "NULL"));
            }
            self.pos += 1;
            return Ok(WhereCondition {
                column,
                operator,
                value: WhereValue::None,
            });
        }

        let negated = keyword(self.peek(), "NOT");
        let op_offset = usize::from(negated);
        if keyword(self.peek_at(op_offset), "IN") {
            self.pos += op_offset + 1;
            let values = self.value_list()?;
            return Ok(WhereCondition {
                column,
                operator: if negated { Operator::NotIn } else { Operator::In },
                value: WhereValue::List(values),
            });
        }
        if keyword(self.peek_at(op_offset), "LIKE") {
            self.pos += op_offset + 1;
            let value = self.value()?;
            return Ok(WhereCondition {
                column,
                operator: if negated { Operator::NotLike } else { Operator::Like },
                value: WhereValue::Single(value),
            });
        }
        if negated {
            return Err(unexpected(self.peek_at(1), "IN or LIKE after NOT"));
        }

        let operator = match self.advance() {
            Some(Token::Operator(symbol)) => Operator::from_symbol(&symbol)
                .ok_or_else(|| TransferError::Validation(format!("unsupported operator '{}'", symbol)))?,
            other => return Err(unexpected(other.as_ref(), "a comparison operator")),
        };
        let value = self.value()?;
        Ok(WhereCondition {
            column,
            operator,
            value: WhereValue::Single(value),
        })
    }

    fn value(&mut self) -> Result<String> {
        match self.advance() {
            Some(Token::Quoted(value)) => Ok(value),
            Some(Token::Word(w))
                if !w.eq_ignore_ascii_case("AND") && !w.eq_ignore_ascii_case("OR") =>
            {
                Ok(w)
            }
            Some(Token::LParen) => Err(TransferError::Validation(
                "grouping parentheses are not supported".to_string(),
            )),
            other => Err(unexpected(other.as_ref(), "a value")),
        }
    }

    fn value_list(&mut self) -> Result<Vec<String>> {
        match self.advance() {
            Some(Token::LParen) => {}
            other => return Err(unexpected(other.as_ref(), "'(' after IN")),
        }
        if matches!(self.peek(), Some(Token::RParen)) {
            return Err(TransferError::Validation("empty IN list".to_string()));
        }
        let mut values = vec![self.value()?];
        loop {
            match self.advance() {
                Some(Token::Comma) => values.push(self.value()?),
                Some(Token::RParen) => return Ok(values),
                other => return Err(unexpected(other.as_ref(), "',' or ')'")),
            }
        }
    }
}

/// Parse a clause into its conditions and connectives.
///
/// The clause is validated first; rejection is a hard error.
pub fn parse(clause: &str) -> Result<WhereClause> {
    validate(clause)?;
    let tokens = tokenize(clause)?;
    if tokens.is_empty() {
        return Err(TransferError::Validation("empty WHERE clause".to_string()));
    }
    let mut parser = Parser { tokens, pos: 0 };
    parser.clause()
}

/// Validate and parameterize a clause for `dialect`.
///
/// # Examples
///
/// ```
/// # use dbtransfer::dialect::AdapterType;
/// # use dbtransfer::where_clause::parameterize;
/// let clause = parameterize("status IN ('', 'active') AND age >= 18", AdapterType::MySql).unwrap();
/// assert_eq!(clause.sql, "`status` IN (?, ?) AND `age` >= ?");
/// assert_eq!(clause.bindings, vec!["", "active", "18"]);
/// ```
pub fn parameterize(clause: &str, dialect: AdapterType) -> Result<ParameterizedClause> {
    let parsed = parse(clause)?;
    let parameterized = parsed.to_parameterized(dialect);
    tracing::debug!(
        "Parameterized WHERE clause: {} ({} binding(s))",
        parameterized.sql,
        parameterized.bindings.len()
    );
    Ok(parameterized)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pg(clause: &str) -> ParameterizedClause {
        parameterize(clause, AdapterType::Postgres).unwrap()
    }

    #[test]
    fn test_single_condition_undoes_doubling() {
        let p = pg("name = 'O''Brien'");
        assert_eq!(p.sql, "\"name\" = ?");
        assert_eq!(p.bindings, vec!["O'Brien"]);
        assert_eq!(p.placeholder_count(), 1);
    }

    #[test]
    fn test_double_quoted_value() {
        let p = pg("title = \"say \"\"hi\"\"\"");
        assert_eq!(p.bindings, vec!["say \"hi\""]);
    }

    #[test]
    fn test_empty_string_survives() {
        let p = pg("nickname = ''");
        assert_eq!(p.sql, "\"nickname\" = ?");
        assert_eq!(p.bindings, vec![""]);
    }

    #[test]
    fn test_in_list_variants() {
        let p = pg("status IN ('', 'active')");
        assert_eq!(p.sql, "\"status\" IN (?, ?)");
        assert_eq!(p.bindings, vec!["", "active"]);

        let p = pg("id NOT IN (7)");
        assert_eq!(p.sql, "\"id\" NOT IN (?)");
        assert_eq!(p.bindings, vec!["7"]);

        assert!(parameterize("id IN ()", AdapterType::Postgres).is_err());
    }

    #[test]
    fn test_mixed_connectives_preserve_order() {
        let p = pg("a = 1 OR b = 2 AND c IS NOT NULL OR d LIKE 'x%'");
        assert_eq!(
            p.sql,
            "\"a\" = ? OR \"b\" = ? AND \"c\" IS NOT NULL OR \"d\" LIKE ?"
        );
        assert_eq!(p.bindings, vec!["1", "2", "x%"]);
    }

    #[test]
    fn test_qualified_column_quotes_each_part() {
        let p = parameterize("users.id > 5", AdapterType::SqlServer).unwrap();
        assert_eq!(p.sql, "[users].[id] > ?");
    }

    #[test]
    fn test_operator_forms() {
        let p = pg("a<>1 AND b!=2 AND c<=3 AND d NOT LIKE '%q'");
        assert_eq!(
            p.sql,
            "\"a\" <> ? AND \"b\" != ? AND \"c\" <= ? AND \"d\" NOT LIKE ?"
        );
    }

    #[test]
    fn test_grouping_parentheses_rejected() {
        let err = parameterize("(a = 1 OR b = 2)", AdapterType::Sqlite).unwrap_err();
        assert!(err.to_string().contains("grouping"));
        assert!(parameterize("a = (1)", AdapterType::Sqlite).is_err());
    }

    #[test]
    fn test_grammar_errors() {
        for clause in ["", "a", "a =", "= 1", "a = 1 b = 2", "a IS 1", "a NOT = 1", "1a = 2", "a = 1 AND"] {
            let err = parameterize(clause, AdapterType::Sqlite).unwrap_err();
            assert!(err.is_fatal(), "{} should fail with a validation error", clause);
        }
    }

    #[test]
    fn test_runs_validator_first() {
        let err = parameterize("a = 1; DROP TABLE t", AdapterType::Sqlite).unwrap_err();
        assert!(err.to_string().contains("stacked statement"));
    }

    #[test]
    fn test_parse_exposes_structure() {
        let parsed = parse("a IS NULL OR b IN ('x')").unwrap();
        assert_eq!(parsed.connectives, vec![Connective::Or]);
        assert_eq!(parsed.conditions[0].operator, Operator::IsNull);
        assert_eq!(
            parsed.conditions[1].value,
            WhereValue::List(vec!["x".to_string()])
        );
    }
}
