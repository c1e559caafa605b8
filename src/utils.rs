// ABOUTME: Small helpers for identifier validation, log-safe display and file checksums
// ABOUTME: Shared by configuration, export and import code

use crate::error::{Result, TransferError};
use sha2::{Digest, Sha256};

/// Validate a table name that is taken from configuration
///
/// Table names read from a live database are always quoted and never need
/// this check. Names supplied by users for tables the tool creates itself
/// (such as the migration-tracking table) must be plain identifiers.
///
/// # Examples
///
/// ```
/// # use dbtransfer::utils::validate_table_name;
/// assert!(validate_table_name("schema_migrations").is_ok());
/// assert!(validate_table_name("_private").is_ok());
/// assert!(validate_table_name("123abc").is_err());
/// assert!(validate_table_name("x\"; DROP TABLE users; --").is_err());
/// ```
pub fn validate_table_name(identifier: &str) -> Result<()> {
    let trimmed = identifier.trim();
    if trimmed.is_empty() {
        return Err(TransferError::Configuration(
            "Table name cannot be empty or whitespace-only".to_string(),
        ));
    }

    if trimmed.len() > 63 {
        return Err(TransferError::Configuration(format!(
            "Table name '{}' exceeds maximum length of 63 characters (got {})",
            sanitize_identifier(trimmed),
            trimmed.len()
        )));
    }

    let mut chars = trimmed.chars();
    if let Some(first) = chars.next() {
        if !first.is_ascii_alphabetic() && first != '_' {
            return Err(TransferError::Configuration(format!(
                "Table name '{}' must start with a letter or underscore, not '{}'",
                sanitize_identifier(trimmed),
                first
            )));
        }
    }

    for (i, c) in trimmed.chars().enumerate() {
        if !c.is_ascii_alphanumeric() && c != '_' {
            return Err(TransferError::Configuration(format!(
                "Table name '{}' contains invalid character '{}' at position {}. \
                 Only letters, digits, and underscores are allowed",
                sanitize_identifier(trimmed),
                if c.is_control() {
                    format!("\\x{:02x}", c as u32)
                } else {
                    c.to_string()
                },
                i
            )));
        }
    }

    Ok(())
}

/// Sanitize an identifier for display
///
/// Removes control characters and limits length to prevent log injection.
/// For display only; SQL always goes through quoting or bindings.
///
/// # Examples
///
/// ```
/// # use dbtransfer::utils::sanitize_identifier;
/// assert_eq!(sanitize_identifier("normal_table"), "normal_table");
/// assert_eq!(sanitize_identifier("table\nname"), "tablename");
/// assert_eq!(sanitize_identifier(&"a".repeat(200)).len(), 100);
/// ```
pub fn sanitize_identifier(identifier: &str) -> String {
    identifier
        .chars()
        .filter(|c| !c.is_control())
        .take(100)
        .collect()
}

/// Lowercase hex SHA-256 of a byte slice.
pub fn sha256_hex(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_table_name_length() {
        assert!(validate_table_name(&"a".repeat(63)).is_ok());
        assert!(validate_table_name(&"a".repeat(64)).is_err());
        assert!(validate_table_name("   ").is_err());
    }

    #[test]
    fn test_validate_table_name_reports_control_chars() {
        let err = validate_table_name("ab\u{0007}c").unwrap_err().to_string();
        assert!(err.contains("\\x07"));
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
