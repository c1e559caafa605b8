// ABOUTME: Scope guards for foreign-key checks and transactions on a DatabaseAdapter
// ABOUTME: Dropping a guard restores the connection state, warning if that fails

use super::DatabaseAdapter;
use crate::error::Result;

/// Disables foreign-key checks until dropped.
pub struct ForeignKeyGuard<'a> {
    adapter: &'a dyn DatabaseAdapter,
}

impl<'a> ForeignKeyGuard<'a> {
    pub fn disable(adapter: &'a dyn DatabaseAdapter) -> Result<Self> {
        adapter.execute(adapter.adapter_type().disable_foreign_keys_sql())?;
        tracing::debug!("Foreign-key checks disabled");
        Ok(Self { adapter })
    }
}

impl Drop for ForeignKeyGuard<'_> {
    fn drop(&mut self) {
        let sql = self.adapter.adapter_type().enable_foreign_keys_sql();
        match self.adapter.execute(sql) {
            Ok(_) => tracing::debug!("Foreign-key checks restored"),
            Err(e) => tracing::warn!("Failed to restore foreign-key checks: {}", e),
        }
    }
}

/// Open transaction that rolls back when dropped without a commit.
pub struct TransactionGuard<'a> {
    adapter: &'a dyn DatabaseAdapter,
    open: bool,
}

impl<'a> TransactionGuard<'a> {
    pub fn begin(adapter: &'a dyn DatabaseAdapter) -> Result<Self> {
        adapter.begin_transaction()?;
        Ok(Self {
            adapter,
            open: true,
        })
    }

    /// Begin only when the adapter supports transactions.
    pub fn begin_if_supported(adapter: &'a dyn DatabaseAdapter) -> Result<Option<Self>> {
        if adapter.has_transactions() {
            Self::begin(adapter).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Commit; on failure the guard stays open and rolls back on drop.
    pub fn commit(mut self) -> Result<()> {
        self.adapter.commit_transaction()?;
        self.open = false;
        Ok(())
    }

    pub fn rollback(mut self) -> Result<()> {
        self.open = false;
        self.adapter.rollback_transaction()
    }
}

impl Drop for TransactionGuard<'_> {
    fn drop(&mut self) {
        if self.open {
            tracing::warn!("Transaction dropped without commit, rolling back");
            if let Err(e) = self.adapter.rollback_transaction() {
                tracing::warn!("Automatic rollback failed: {}", e);
            }
        }
    }
}
