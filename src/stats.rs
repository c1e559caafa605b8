// ABOUTME: Run statistics and import verification reports
// ABOUTME: Accumulated by one engine during a transfer, read-only afterwards

use serde::Serialize;
use std::collections::BTreeMap;

/// Counters and messages collected during one export or import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransferStatistics {
    pub rows_exported: u64,
    pub rows_imported: u64,
    pub tables_processed: u64,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl TransferStatistics {
    pub fn record_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!("{}", message);
        self.errors.push(message);
    }

    pub fn record_warning(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{}", message);
        self.warnings.push(message);
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Expected versus actual row count for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableVerification {
    pub expected: u64,
    /// `None` when the count query failed.
    pub actual: Option<u64>,
    #[serde(rename = "match")]
    pub matches: bool,
}

/// Per-table result of comparing imported row counts with expectations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub tables: BTreeMap<String, TableVerification>,
}

impl VerifyReport {
    pub fn all_match(&self) -> bool {
        self.tables.values().all(|t| t.matches)
    }

    pub fn mismatched(&self) -> Vec<&str> {
        self.tables
            .iter()
            .filter(|(_, t)| !t.matches)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_messages() {
        let mut stats = TransferStatistics::default();
        assert!(!stats.has_errors());
        stats.record_warning("missing file");
        stats.record_error("bad row");
        assert!(stats.has_errors());
        assert_eq!(stats.warnings, vec!["missing file"]);
    }

    #[test]
    fn test_verify_report() {
        let mut report = VerifyReport::default();
        report.tables.insert(
            "users".into(),
            TableVerification { expected: 2, actual: Some(2), matches: true },
        );
        assert!(report.all_match());
        report.tables.insert(
            "posts".into(),
            TableVerification { expected: 3, actual: None, matches: false },
        );
        assert!(!report.all_match());
        assert_eq!(report.mismatched(), vec!["posts"]);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["tables"]["users"]["match"], serde_json::json!(true));
    }
}
