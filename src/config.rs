// ABOUTME: Parses dbtransfer.toml into environments, migration settings and transfer defaults
// ABOUTME: Opens the DatabaseAdapter matching an environment's adapter name

use crate::adapter::{DatabaseAdapter, MySqlAdapter, PostgresAdapter, SqliteAdapter};
use crate::dialect::AdapterType;
use crate::error::{Result, TransferError};
use crate::options::{
    TransferOptions, DEFAULT_BATCH_SIZE, DEFAULT_INSERT_BATCH_SIZE, DEFAULT_MIGRATION_TABLE,
    DEFAULT_STREAMING_THRESHOLD,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "dbtransfer.toml";
pub const CONFIG_ENV_VAR: &str = "DBTRANSFER_CONFIG";
pub const PASSWORD_ENV_VAR: &str = "DBTRANSFER_DB_PASSWORD";

/// Connection settings for one named environment.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct EnvironmentConfig {
    pub adapter: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    /// Database name, or the file path for SQLite.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub pass: Option<String>,
    #[serde(default)]
    pub charset: Option<String>,
    /// Alternative to `name` for SQLite files.
    #[serde(default)]
    pub path: Option<String>,
}

impl EnvironmentConfig {
    pub fn adapter_type(&self) -> Result<AdapterType> {
        AdapterType::from_name(&self.adapter)
    }

    fn database_name(&self) -> Result<&str> {
        self.name
            .as_deref()
            .or(self.path.as_deref())
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| {
                TransferError::Configuration(format!(
                    "Environment using adapter '{}' has no database name",
                    self.adapter
                ))
            })
    }

    /// Open a connection for this environment.
    ///
    /// SQLite paths are resolved against `base_dir` when relative.
    pub fn connect(&self, base_dir: &Path) -> Result<Box<dyn DatabaseAdapter>> {
        let name = self.database_name()?;
        let host = self.host.as_deref().unwrap_or("localhost");
        let mut adapter: Box<dyn DatabaseAdapter> = match self.adapter_type()? {
            AdapterType::Sqlite => {
                let path = Path::new(name);
                let resolved = if path.is_absolute() || name == ":memory:" {
                    path.to_path_buf()
                } else {
                    base_dir.join(path)
                };
                Box::new(SqliteAdapter::new(resolved))
            }
            AdapterType::Postgres => Box::new(PostgresAdapter::from_parts(
                host,
                self.port,
                name,
                self.user.as_deref(),
                self.pass.as_deref(),
            )),
            AdapterType::MySql => Box::new(MySqlAdapter::from_parts(
                host,
                self.port,
                name,
                self.user.as_deref(),
                self.pass.as_deref(),
                self.charset.as_deref(),
            )?),
            AdapterType::SqlServer => {
                return Err(TransferError::Configuration(
                    "SQL Server is supported for quoting only; no driver is available to connect"
                        .to_string(),
                ))
            }
        };
        adapter.connect()?;
        tracing::info!(
            "Connected to {} database '{}'",
            adapter.adapter_type(),
            crate::utils::sanitize_identifier(name)
        );
        Ok(adapter)
    }
}

/// Transfer defaults from the `[transfer]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransferDefaults {
    pub batch_size: usize,
    pub insert_batch_size: usize,
    pub streaming_threshold: u64,
}

impl Default for TransferDefaults {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            insert_batch_size: DEFAULT_INSERT_BATCH_SIZE,
            streaming_threshold: DEFAULT_STREAMING_THRESHOLD,
        }
    }
}

fn default_migration_table() -> String {
    DEFAULT_MIGRATION_TABLE.to_string()
}

fn default_migrations_path() -> String {
    "db/migrations".to_string()
}

/// Parsed configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub default_environment: Option<String>,
    #[serde(default = "default_migration_table")]
    pub migration_table: String,
    #[serde(default = "default_migrations_path")]
    pub migrations_path: String,
    #[serde(default)]
    pub environments: BTreeMap<String, EnvironmentConfig>,
    #[serde(default)]
    pub transfer: TransferDefaults,
    /// Directory relative paths are resolved against.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl Config {
    /// Parse configuration text.
    ///
    /// # Examples
    ///
    /// ```
    /// # use dbtransfer::config::Config;
    /// let config = Config::from_toml(r#"
    ///     default_environment = "dev"
    ///     [environments.dev]
    ///     adapter = "sqlite"
    ///     name = "dev.sqlite3"
    /// "#).unwrap();
    /// assert_eq!(config.migration_table, "schema_migrations");
    /// assert!(config.environment(None).is_ok());
    /// ```
    pub fn from_toml(raw: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(raw)?;
        crate::utils::validate_table_name(&config.migration_table)?;
        if let Ok(password) = std::env::var(PASSWORD_ENV_VAR) {
            for env in config.environments.values_mut() {
                env.pass = Some(password.clone());
            }
        }
        config.base_dir = PathBuf::from(".");
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| TransferError::io(path, e))?;
        let mut config = Self::from_toml(&raw)?;
        config.base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Config path from an explicit flag, then `DBTRANSFER_CONFIG`, then the default file name.
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    /// Look up an environment, falling back to `default_environment`.
    pub fn environment(&self, name: Option<&str>) -> Result<&EnvironmentConfig> {
        let name = name
            .or(self.default_environment.as_deref())
            .ok_or_else(|| {
                TransferError::Configuration(
                    "No environment given and no default_environment configured".to_string(),
                )
            })?;
        self.environments.get(name).ok_or_else(|| {
            let known: Vec<&str> = self.environments.keys().map(String::as_str).collect();
            TransferError::Configuration(format!(
                "Unknown environment '{}'. Known environments: {}",
                name,
                if known.is_empty() { "(none)".to_string() } else { known.join(", ") }
            ))
        })
    }

    pub fn migrations_dir(&self) -> PathBuf {
        let path = Path::new(&self.migrations_path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Transfer options seeded from this configuration.
    pub fn transfer_options(&self) -> TransferOptions {
        TransferOptions {
            batch_size: self.transfer.batch_size.max(1),
            insert_batch_size: self.transfer.insert_batch_size.max(1),
            streaming_threshold: self.transfer.streaming_threshold,
            migration_table: self.migration_table.clone(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
        default_environment = "development"
        migration_table = "migrations"
        migrations_path = "db/migrate"

        [environments.development]
        adapter = "sqlite"
        name = "dev.sqlite3"

        [environments.production]
        adapter = "mysql"
        host = "db.internal"
        port = 3306
        name = "app"
        user = "app"
        charset = "utf8mb4"

        [transfer]
        batch_size = 500
    "#;

    #[test]
    fn test_parse_sample_config() {
        let config = Config::from_toml(SAMPLE).unwrap();
        assert_eq!(config.migration_table, "migrations");
        assert_eq!(config.transfer.batch_size, 500);
        assert_eq!(config.transfer.insert_batch_size, DEFAULT_INSERT_BATCH_SIZE);

        let prod = config.environment(Some("production")).unwrap();
        assert_eq!(prod.adapter_type().unwrap(), AdapterType::MySql);
        assert_eq!(prod.port, Some(3306));

        let options = config.transfer_options();
        assert_eq!(options.batch_size, 500);
        assert_eq!(options.migration_table, "migrations");
    }

    #[test]
    fn test_unknown_environment_lists_known() {
        let config = Config::from_toml(SAMPLE).unwrap();
        let err = config.environment(Some("staging")).unwrap_err().to_string();
        assert!(err.contains("development"));
        assert!(err.contains("production"));
    }

    #[test]
    fn test_unsupported_adapter_rejected() {
        let config = Config::from_toml(
            r#"
            [environments.x]
            adapter = "oracle"
            name = "db"
        "#,
        )
        .unwrap();
        let env = config.environment(Some("x")).unwrap();
        assert!(env.adapter_type().is_err());
        assert!(env.connect(Path::new(".")).is_err());
    }

    #[test]
    fn test_mssql_connect_is_configuration_error() {
        let env = EnvironmentConfig {
            adapter: "sqlsrv".into(),
            name: Some("db".into()),
            ..Default::default()
        };
        assert_eq!(env.adapter_type().unwrap(), AdapterType::SqlServer);
        let err = env.connect(Path::new(".")).err().unwrap();
        assert!(matches!(err, TransferError::Configuration(_)));
    }

    #[test]
    fn test_load_resolves_sqlite_relative_to_config() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("dbtransfer.toml");
        std::fs::write(
            &config_path,
            "[environments.dev]\nadapter = \"sqlite\"\nname = \"data.sqlite3\"\n",
        )
        .unwrap();
        let config = Config::load(&config_path).unwrap();
        let adapter = config
            .environment(Some("dev"))
            .unwrap()
            .connect(&config.base_dir)
            .unwrap();
        assert_eq!(adapter.adapter_type(), AdapterType::Sqlite);
        assert!(dir.path().join("data.sqlite3").exists());
    }

    #[test]
    fn test_invalid_toml_reports_error() {
        let mut tmp = NamedTempFile::new().unwrap();
        write!(tmp, "default_environment = [").unwrap();
        assert!(Config::load(tmp.path()).is_err());
    }
}
