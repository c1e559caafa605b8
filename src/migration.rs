// ABOUTME: Versioned SQL migrations applied and reverted through a DatabaseAdapter
// ABOUTME: Tracks applied versions with start/end times in the migration table

use crate::adapter::{column_text, DatabaseAdapter, TransactionGuard};
use crate::config::Config;
use crate::error::{Result, TransferError};
use crate::import::sql::split_statements;
use crate::storage::{FileSystem, LocalFileSystem};
use crate::utils::validate_table_name;
use regex::Regex;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static MIGRATION_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)_([A-Za-z0-9][A-Za-z0-9_\-]*)\.(up|down)\.sql$")
        .expect("static regex must compile")
});

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A migration found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub version: u64,
    pub name: String,
    pub up: Option<PathBuf>,
    pub down: Option<PathBuf>,
}

/// A row of the migration-tracking table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMigration {
    pub version: u64,
    pub name: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationState {
    Up,
    Down,
}

/// One line of [`MigrationManager::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    pub version: u64,
    pub name: String,
    pub state: MigrationState,
    /// Applied, but its migration file no longer exists.
    pub missing: bool,
    pub applied_at: Option<String>,
}

/// Parse `<version>_<name>.(up|down).sql`.
///
/// # Examples
///
/// ```
/// # use dbtransfer::migration::parse_migration_file_name;
/// assert_eq!(
///     parse_migration_file_name("20240301000000_create_users.up.sql"),
///     Some((20240301000000, "create_users".to_string(), true))
/// );
/// assert_eq!(parse_migration_file_name("create_users.sql"), None);
/// ```
pub fn parse_migration_file_name(file_name: &str) -> Option<(u64, String, bool)> {
    let caps = MIGRATION_FILE.captures(file_name)?;
    let version = caps[1].parse().ok()?;
    Some((version, caps[2].to_string(), &caps[3] == "up"))
}

/// Applies, reverts and reports migrations for one environment.
pub struct MigrationManager {
    adapter: Box<dyn DatabaseAdapter>,
    fs: Box<dyn FileSystem>,
    migrations_dir: PathBuf,
    table: String,
}

impl MigrationManager {
    pub fn new(
        adapter: Box<dyn DatabaseAdapter>,
        migrations_dir: impl Into<PathBuf>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            adapter,
            fs: Box::new(LocalFileSystem),
            migrations_dir: migrations_dir.into(),
            table: table.into(),
        }
    }

    /// Connect to `environment` (or the default one) and use the configured migration settings.
    pub fn from_config(config: &Config, environment: Option<&str>) -> Result<Self> {
        let adapter = config.environment(environment)?.connect(&config.base_dir)?;
        Ok(Self::new(
            adapter,
            config.migrations_dir(),
            config.migration_table.clone(),
        ))
    }

    pub fn with_file_system(mut self, fs: Box<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }

    pub fn adapter(&self) -> &dyn DatabaseAdapter {
        self.adapter.as_ref()
    }

    pub fn migrations_dir(&self) -> &Path {
        &self.migrations_dir
    }

    /// Migrations in the migrations directory, ordered by version.
    ///
    /// # Errors
    ///
    /// Two files sharing a version under different names is a `Configuration` error.
    pub fn discover(&self) -> Result<Vec<Migration>> {
        if !self.fs.is_dir(&self.migrations_dir) {
            tracing::warn!(
                "Migrations directory {} does not exist",
                self.migrations_dir.display()
            );
            return Ok(Vec::new());
        }

        let mut found: BTreeMap<u64, Migration> = BTreeMap::new();
        for path in self.fs.glob(&self.migrations_dir.join("*.sql"))? {
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some((version, name, is_up)) = parse_migration_file_name(file_name) else {
                tracing::warn!("Ignoring {}: not a <version>_<name>.up|down.sql file", file_name);
                continue;
            };
            let entry = found.entry(version).or_insert_with(|| Migration {
                version,
                name: name.clone(),
                up: None,
                down: None,
            });
            if entry.name != name {
                return Err(TransferError::Configuration(format!(
                    "Migration version {} is used by both '{}' and '{}'",
                    version, entry.name, name
                )));
            }
            if is_up {
                entry.up = Some(path);
            } else {
                entry.down = Some(path);
            }
        }
        Ok(found.into_values().collect())
    }

    fn quoted_table(&self) -> String {
        self.adapter.adapter_type().quote_identifier(&self.table)
    }

    fn ensure_table(&self) -> Result<()> {
        validate_table_name(&self.table)?;
        if self.adapter.has_table(&self.table)? {
            return Ok(());
        }
        tracing::info!("Creating migration table {}", self.table);
        self.adapter.execute(&format!(
            "CREATE TABLE {} (version BIGINT NOT NULL PRIMARY KEY, migration_name VARCHAR(100) NULL, start_time TIMESTAMP NULL, end_time TIMESTAMP NULL)",
            self.quoted_table()
        ))?;
        Ok(())
    }

    /// Rows of the tracking table, ordered by version. Empty when it does not exist.
    pub fn applied(&self) -> Result<Vec<AppliedMigration>> {
        if !self.adapter.has_table(&self.table)? {
            return Ok(Vec::new());
        }
        let rows = self.adapter.fetch_all(
            &format!(
                "SELECT version, migration_name, start_time, end_time FROM {} ORDER BY version",
                self.quoted_table()
            ),
            &[],
        )?;
        rows.iter()
            .map(|row| {
                let raw = column_text(row, "version").unwrap_or_default();
                let version = raw.trim().parse().map_err(|_| {
                    TransferError::Data(format!("Invalid migration version '{}'", raw))
                })?;
                Ok(AppliedMigration {
                    version,
                    name: column_text(row, "migration_name"),
                    start_time: column_text(row, "start_time"),
                    end_time: column_text(row, "end_time"),
                })
            })
            .collect()
    }

    /// Latest applied version.
    pub fn current_version(&self) -> Result<Option<u64>> {
        Ok(self.applied()?.last().map(|m| m.version))
    }

    fn read_script(&self, path: &Path) -> Result<String> {
        let bytes = self.fs.read_file(path)?;
        String::from_utf8(bytes)
            .map_err(|e| TransferError::Data(format!("{} is not valid UTF-8: {}", path.display(), e)))
    }

    fn run_script(&self, migration: &Migration, path: &Path, record: impl FnOnce() -> Result<u64>) -> Result<()> {
        let script = self.read_script(path)?;
        let statements = split_statements(&script, self.adapter.adapter_type());
        let tx = TransactionGuard::begin_if_supported(self.adapter.as_ref())?;
        for statement in &statements {
            self.adapter.execute(statement).map_err(|e| {
                TransferError::Database(format!(
                    "Migration {} ({}) failed: {}",
                    migration.version, migration.name, e
                ))
            })?;
        }
        record()?;
        if let Some(tx) = tx {
            tx.commit()?;
        }
        Ok(())
    }

    /// Apply pending migrations in version order, up to and including `target`.
    ///
    /// Each migration runs in its own transaction. Returns the versions applied.
    pub fn migrate(&self, target: Option<u64>) -> Result<Vec<u64>> {
        self.ensure_table()?;
        let applied: Vec<u64> = self.applied()?.iter().map(|m| m.version).collect();
        let pending: Vec<Migration> = self
            .discover()?
            .into_iter()
            .filter(|m| !applied.contains(&m.version))
            .filter(|m| target.map_or(true, |t| m.version <= t))
            .collect();

        if pending.is_empty() {
            tracing::info!("No pending migrations");
            return Ok(Vec::new());
        }

        let mut done = Vec::with_capacity(pending.len());
        for migration in &pending {
            let path = migration.up.as_deref().ok_or_else(|| {
                TransferError::Configuration(format!(
                    "Migration {} ({}) has no .up.sql file",
                    migration.version, migration.name
                ))
            })?;
            tracing::info!("Migrating {} {}", migration.version, migration.name);
            let start = chrono::Utc::now().format(TIMESTAMP_FORMAT).to_string();
            self.run_script(migration, path, || {
                let end = chrono::Utc::now().format(TIMESTAMP_FORMAT).to_string();
                self.adapter.execute_prepared(
                    &format!(
                        "INSERT INTO {} (version, migration_name, start_time, end_time) VALUES (?, ?, ?, ?)",
                        self.quoted_table()
                    ),
                    &[json!(migration.version), json!(migration.name), json!(start), json!(end)],
                )
            })?;
            done.push(migration.version);
        }
        tracing::info!("Applied {} migration(s)", done.len());
        Ok(done)
    }

    /// Revert the latest migration, or every migration newer than `target`.
    ///
    /// Returns the versions reverted, newest first.
    pub fn rollback(&self, target: Option<u64>) -> Result<Vec<u64>> {
        let mut applied = self.applied()?;
        applied.reverse();
        let to_revert: Vec<AppliedMigration> = match target {
            None => applied.into_iter().take(1).collect(),
            Some(t) => applied.into_iter().filter(|m| m.version > t).collect(),
        };
        if to_revert.is_empty() {
            tracing::info!("Nothing to roll back");
            return Ok(Vec::new());
        }

        let known: BTreeMap<u64, Migration> = self
            .discover()?
            .into_iter()
            .map(|m| (m.version, m))
            .collect();

        let mut done = Vec::with_capacity(to_revert.len());
        for entry in &to_revert {
            let migration = known.get(&entry.version).ok_or_else(|| {
                TransferError::State(format!(
                    "Applied migration {} has no file in {}",
                    entry.version,
                    self.migrations_dir.display()
                ))
            })?;
            let path = migration.down.as_deref().ok_or_else(|| {
                TransferError::Configuration(format!(
                    "Migration {} ({}) has no .down.sql file",
                    migration.version, migration.name
                ))
            })?;
            tracing::info!("Reverting {} {}", migration.version, migration.name);
            self.run_script(migration, path, || {
                self.adapter.execute_prepared(
                    &format!("DELETE FROM {} WHERE version = ?", self.quoted_table()),
                    &[json!(migration.version)],
                )
            })?;
            done.push(migration.version);
        }
        Ok(done)
    }

    /// Every known migration with its state, ordered by version.
    pub fn status(&self) -> Result<Vec<MigrationStatus>> {
        let applied: BTreeMap<u64, AppliedMigration> = self
            .applied()?
            .into_iter()
            .map(|m| (m.version, m))
            .collect();
        let mut statuses: BTreeMap<u64, MigrationStatus> = BTreeMap::new();

        for migration in self.discover()? {
            let record = applied.get(&migration.version);
            statuses.insert(
                migration.version,
                MigrationStatus {
                    version: migration.version,
                    name: migration.name,
                    state: if record.is_some() {
                        MigrationState::Up
                    } else {
                        MigrationState::Down
                    },
                    missing: false,
                    applied_at: record.and_then(|r| r.start_time.clone()),
                },
            );
        }
        for (version, record) in &applied {
            statuses.entry(*version).or_insert_with(|| MigrationStatus {
                version: *version,
                name: record.name.clone().unwrap_or_default(),
                state: MigrationState::Up,
                missing: true,
                applied_at: record.start_time.clone(),
            });
        }
        Ok(statuses.into_values().collect())
    }
}

impl Drop for MigrationManager {
    fn drop(&mut self) {
        if let Err(e) = self.adapter.disconnect() {
            tracing::warn!("Error while disconnecting migration manager: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::SqliteAdapter;
    use crate::storage::MemoryFileSystem;

    fn manager(files: &[(&str, &str)]) -> MigrationManager {
        let fs = MemoryFileSystem::new();
        for (name, body) in files {
            fs.write_file(&Path::new("/db/migrations").join(name), body.as_bytes())
                .unwrap();
        }
        let adapter = SqliteAdapter::open_in_memory().unwrap();
        MigrationManager::new(Box::new(adapter), "/db/migrations", "schema_migrations")
            .with_file_system(Box::new(fs))
    }

    #[test]
    fn test_discover_pairs_up_and_down() {
        let manager = manager(&[
            ("2_posts.up.sql", "CREATE TABLE posts (id INTEGER);"),
            ("1_users.up.sql", "CREATE TABLE users (id INTEGER);"),
            ("1_users.down.sql", "DROP TABLE users;"),
            ("notes.sql", "-- not a migration"),
        ]);
        let found = manager.discover().unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].version, 1);
        assert!(found[0].down.is_some());
        assert!(found[1].down.is_none());
    }

    #[test]
    fn test_conflicting_names_for_one_version() {
        let manager = manager(&[("1_a.up.sql", ""), ("1_b.up.sql", "")]);
        assert!(matches!(
            manager.discover(),
            Err(TransferError::Configuration(_))
        ));
    }

    #[test]
    fn test_migrate_to_target_then_rest() {
        let manager = manager(&[
            ("1_users.up.sql", "CREATE TABLE users (id INTEGER);"),
            ("2_posts.up.sql", "CREATE TABLE posts (id INTEGER);"),
        ]);
        assert_eq!(manager.migrate(Some(1)).unwrap(), vec![1]);
        assert!(!manager.adapter().has_table("posts").unwrap());
        assert_eq!(manager.migrate(None).unwrap(), vec![2]);
        assert_eq!(manager.current_version().unwrap(), Some(2));
        assert!(manager.migrate(None).unwrap().is_empty());
    }

    #[test]
    fn test_failed_migration_is_not_recorded() {
        let manager = manager(&[
            ("1_users.up.sql", "CREATE TABLE users (id INTEGER);"),
            ("2_broken.up.sql", "CREATE TABLE ok (id INTEGER); INSERT INTO nowhere VALUES (1);"),
        ]);
        assert!(manager.migrate(None).is_err());
        assert_eq!(manager.current_version().unwrap(), Some(1));
        assert!(!manager.adapter().has_table("ok").unwrap());
    }

    #[test]
    fn test_status_flags_missing_files() {
        let manager = manager(&[("1_users.up.sql", "CREATE TABLE users (id INTEGER);")]);
        manager.migrate(None).unwrap();
        manager
            .adapter()
            .execute("INSERT INTO schema_migrations (version, migration_name) VALUES (9, 'gone')")
            .unwrap();
        let status = manager.status().unwrap();
        assert_eq!(status.len(), 2);
        assert_eq!(status[0].state, MigrationState::Up);
        assert!(!status[0].missing);
        assert!(status[1].missing);
        assert_eq!(status[1].name, "gone");
    }
}
