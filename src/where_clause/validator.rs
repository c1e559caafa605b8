// ABOUTME: Fail-closed safety gate for user-supplied WHERE clauses
// ABOUTME: Rejects comments, stacked statements, DDL/DML keywords, subqueries and unbalanced input

use super::scanner::{parens_balanced, quotes_balanced};
use crate::error::{Result, TransferError};
use regex::Regex;
use std::sync::LazyLock;

/// Named rejection rule.
struct Rule {
    name: &'static str,
    pattern: Regex,
}

fn rule(name: &'static str, pattern: &str) -> Rule {
    Rule {
        name,
        pattern: Regex::new(pattern).expect("static regex must compile"),
    }
}

// Keyword rules match on word boundaries so `updated_at` or `created_by` pass
static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        rule("comment marker", r"--|/\*|\*/|#"),
        rule("stacked statement", r";\s*\S"),
        rule(
            "data-modifying keyword",
            r"(?i)\b(DROP|CREATE|ALTER|TRUNCATE|DELETE|INSERT|UPDATE|REPLACE|GRANT|REVOKE)\b",
        ),
        rule("UNION", r"(?i)\bUNION\b"),
        rule("subquery", r"(?is)\bSELECT\b.*\bFROM\b"),
        rule(
            "dangerous function",
            r"(?i)\b(SLEEP|BENCHMARK|LOAD_FILE|OUTFILE|DUMPFILE)\b|\bCHAR\s*\(",
        ),
        rule(
            "system schema reference",
            r"(?i)\b(INFORMATION_SCHEMA|MYSQL|PERFORMANCE_SCHEMA)\b",
        ),
        rule("hex literal", r"(?i)\b0x[0-9a-f]"),
    ]
});

/// Check a clause against every rule, naming the first one that rejects it.
///
/// The check runs over the raw text, literals included, and never rewrites
/// the input.
///
/// # Errors
///
/// Returns [`TransferError::Validation`] for any rejected clause.
pub fn validate(clause: &str) -> Result<()> {
    for rule in RULES.iter() {
        if rule.pattern.is_match(clause) {
            tracing::debug!("WHERE clause rejected by rule '{}'", rule.name);
            return Err(TransferError::Validation(format!(
                "clause rejected ({})",
                rule.name
            )));
        }
    }
    if !quotes_balanced(clause) {
        return Err(TransferError::Validation(
            "clause rejected (unbalanced quotes)".to_string(),
        ));
    }
    if !parens_balanced(clause) {
        return Err(TransferError::Validation(
            "clause rejected (unbalanced parentheses)".to_string(),
        ));
    }
    Ok(())
}

/// Boolean form of [`validate`].
///
/// # Examples
///
/// ```
/// # use dbtransfer::where_clause::is_valid;
/// assert!(is_valid("status = 'active' AND updated_at > '2024-01-01'"));
/// assert!(!is_valid("id = 1; DROP TABLE users"));
/// assert!(!is_valid("id = 1 UNION SELECT password FROM users"));
/// ```
pub fn is_valid(clause: &str) -> bool {
    validate(clause).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_ordinary_conditions() {
        for clause in [
            "id = 1",
            "status = 'active'",
            "created_at >= '2024-01-01' AND deleted_by IS NULL",
            "name LIKE 'A%' OR name NOT LIKE '%z'",
            "status IN ('', 'active')",
            "title = 'It''s fine'",
            "updated_at > '2023-12-31'",
        ] {
            assert!(is_valid(clause), "should accept: {}", clause);
        }
    }

    #[test]
    fn test_rejects_comments() {
        assert!(!is_valid("id = 1 -- trailing"));
        assert!(!is_valid("id = 1 /* x */"));
        assert!(!is_valid("id = 1 # mysql comment"));
    }

    #[test]
    fn test_rejection_names_rule() {
        let err = validate("id = 1; SELECT 1").unwrap_err().to_string();
        assert!(err.contains("stacked statement"), "{}", err);
        let err = validate("name = 'x' OR SLEEP(5)").unwrap_err().to_string();
        assert!(err.contains("dangerous function"), "{}", err);
        let err = validate("name = 'open").unwrap_err().to_string();
        assert!(err.contains("unbalanced quotes"), "{}", err);
        let err = validate("id IN (1, 2").unwrap_err().to_string();
        assert!(err.contains("unbalanced parentheses"), "{}", err);
    }

    #[test]
    fn test_rejects_keywords_case_insensitively() {
        assert!(!is_valid("1=1 or DrOp"));
        assert!(!is_valid("x = 1 union all select 1"));
        assert!(!is_valid("x = (select id from users)"));
        assert!(!is_valid("x = char(65)"));
        assert!(!is_valid("x = 0x41"));
        assert!(!is_valid("x IN (SELECT table_name FROM information_schema.tables)"));
    }

    #[test]
    fn test_trailing_semicolon_alone_is_not_stacked() {
        assert!(validate("id = 1;").is_ok());
    }
}
