// ABOUTME: Per-table conflict resolution run once before rows are written
// ABOUTME: Replace clears the table, Append keeps it, Skip imports only into empty tables

use crate::adapter::DatabaseAdapter;
use crate::error::{Result, TransferError};
use crate::options::ConflictMode;
use crate::schema::count_rows;
use crate::utils::sanitize_identifier;

/// Outcome of conflict resolution for one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictDecision {
    Import,
    /// Table already holds rows and the mode is Skip.
    Skip { existing_rows: u64 },
}

/// Apply `mode` to `table` and decide whether rows should be written.
///
/// # Errors
///
/// Under Skip, a failed row-count query is a `State` error and the table
/// must not be imported. Under Replace, a failed DELETE is propagated.
pub fn resolve(
    adapter: &dyn DatabaseAdapter,
    table: &str,
    mode: ConflictMode,
) -> Result<ConflictDecision> {
    match mode {
        ConflictMode::Replace => {
            let deleted = adapter.execute(&adapter.adapter_type().delete_all_sql(table))?;
            tracing::debug!(
                "Cleared {} existing row(s) from {}",
                deleted,
                sanitize_identifier(table)
            );
            Ok(ConflictDecision::Import)
        }
        ConflictMode::Append => Ok(ConflictDecision::Import),
        ConflictMode::Skip => {
            let existing_rows = count_rows(adapter, table, None).map_err(|e| {
                TransferError::State(format!(
                    "Could not count rows of '{}' under skip mode, refusing to import it: {}",
                    sanitize_identifier(table),
                    e
                ))
            })?;
            if existing_rows == 0 {
                Ok(ConflictDecision::Import)
            } else {
                Ok(ConflictDecision::Skip { existing_rows })
            }
        }
    }
}
