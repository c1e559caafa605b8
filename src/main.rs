// ABOUTME: CLI entry point for dbtransfer
// ABOUTME: Parses commands, loads configuration and routes to the transfer engines

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use dbtransfer::adapter::DatabaseAdapter;
use dbtransfer::config::{Config, CONFIG_ENV_VAR};
use dbtransfer::export::Exporter;
use dbtransfer::import::Importer;
use dbtransfer::migration::{MigrationManager, MigrationState};
use dbtransfer::options::{ConflictMode, Format, TransferOptions};
use dbtransfer::schema::SchemaIntrospector;
use dbtransfer::stats::TransferStatistics;
use dialoguer::{theme::ColorfulTheme, Confirm};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "dbtransfer")]
#[command(about = "Export, import and migrate relational databases", long_about = None)]
struct Cli {
    /// Configuration file (defaults to dbtransfer.toml)
    #[arg(long, global = true, env = CONFIG_ENV_VAR)]
    config: Option<PathBuf>,
    /// Environment from the configuration file
    #[arg(long, global = true)]
    env: Option<String>,
    /// Log debug detail
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

/// Table selection shared by every transfer command.
#[derive(Args)]
struct TableFilter {
    /// Include only these tables (comma-separated)
    #[arg(long, value_delimiter = ',')]
    tables: Option<Vec<String>>,
    /// Exclude these tables (comma-separated)
    #[arg(long, value_delimiter = ',')]
    exclude: Option<Vec<String>>,
}

#[derive(Args)]
struct ExportArgs {
    #[command(flatten)]
    filter: TableFilter,
    /// Row filter for one table (format: table:clause, repeatable)
    #[arg(long = "where")]
    where_clauses: Vec<String>,
    /// Maximum rows per table
    #[arg(long)]
    limit: Option<u64>,
    /// Emit CREATE TABLE statements in SQL dumps
    #[arg(long)]
    include_schema: bool,
    /// Emit DROP TABLE before CREATE TABLE (requires --include-schema)
    #[arg(long)]
    drop_tables: bool,
    /// Do not wrap SQL dumps in a transaction
    #[arg(long)]
    no_transaction: bool,
    /// Gzip the output
    #[arg(long)]
    compress: bool,
    /// Keep foreign-key checks enabled in SQL dumps
    #[arg(long)]
    no_disable_fk: bool,
}

#[derive(Args)]
struct ImportArgs {
    #[command(flatten)]
    filter: TableFilter,
    /// How to treat tables that already hold rows
    #[arg(long, default_value = "replace")]
    conflict: String,
    /// Abort on the first failed statement or batch
    #[arg(long)]
    stop_on_error: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Export tables to a SQL, JSON, YAML or CSV file
    Export {
        #[arg(long)]
        output: PathBuf,
        /// Output format (sql, json, yaml, csv); guessed from --output when omitted
        #[arg(long)]
        format: Option<String>,
        #[command(flatten)]
        args: ExportArgs,
    },
    /// Export each table to its own CSV file
    ExportCsv {
        #[arg(long)]
        dir: PathBuf,
        #[command(flatten)]
        args: ExportArgs,
    },
    /// Import a SQL, JSON, YAML or CSV file
    Import {
        #[arg(long)]
        input: PathBuf,
        /// Input format; detected from the file when omitted
        #[arg(long)]
        format: Option<String>,
        #[command(flatten)]
        args: ImportArgs,
    },
    /// Import a directory written by export-csv
    ImportCsv {
        #[arg(long)]
        dir: PathBuf,
        #[command(flatten)]
        args: ImportArgs,
    },
    /// Describe tables, columns, indexes and foreign keys
    Schema {
        /// Write to this file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
        /// Emit YAML instead of JSON
        #[arg(long)]
        yaml: bool,
    },
    /// Apply pending migrations
    Migrate {
        /// Stop after this version
        #[arg(long)]
        target: Option<u64>,
    },
    /// Revert the latest migration, or every migration newer than --target
    Rollback {
        #[arg(long)]
        target: Option<u64>,
    },
    /// Show applied and pending migrations
    Status,
    /// Delete all rows from every table
    Clear {
        /// Also empty the migration-tracking table
        #[arg(long)]
        include_migration_table: bool,
        /// Skip confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },
}

fn apply_filter(options: &mut TransferOptions, filter: TableFilter) {
    options.tables = filter.tables.map(|t| t.into_iter().collect());
    options.exclude = filter.exclude.unwrap_or_default().into_iter().collect();
}

fn export_options(config: &Config, args: ExportArgs) -> anyhow::Result<TransferOptions> {
    let mut options = config.transfer_options();
    apply_filter(&mut options, args.filter);
    for spec in &args.where_clauses {
        options.add_where(spec)?;
    }
    options.limit = args.limit;
    options.include_schema = args.include_schema;
    options.drop_tables = args.drop_tables;
    options.use_transaction = !args.no_transaction;
    options.compress = args.compress;
    options.disable_foreign_keys = !args.no_disable_fk;
    Ok(options)
}

fn import_options(config: &Config, args: ImportArgs) -> anyhow::Result<TransferOptions> {
    let mut options = config.transfer_options();
    apply_filter(&mut options, args.filter);
    options.conflict_mode = ConflictMode::from_name(&args.conflict)?;
    options.stop_on_error = args.stop_on_error;
    Ok(options)
}

fn report(stats: &TransferStatistics) {
    for warning in &stats.warnings {
        println!("warning: {}", warning);
    }
    for error in &stats.errors {
        println!("error: {}", error);
    }
}

fn confirm(prompt: &str) -> anyhow::Result<bool> {
    Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(false)
        .interact()
        .context("Failed to get confirmation")
}

fn write_or_print(output: Option<&Path>, text: &str) -> anyhow::Result<()> {
    match output {
        Some(path) => std::fs::write(path, text)
            .with_context(|| format!("Failed to write {}", path.display())),
        None => {
            print!("{}", text);
            Ok(())
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging - RUST_LOG wins, otherwise info (debug with --verbose)
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    let config_path = Config::resolve_path(cli.config.as_deref());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;
    let env = cli.env.as_deref();
    let connect = || -> anyhow::Result<Box<dyn DatabaseAdapter>> {
        config
            .environment(env)?
            .connect(&config.base_dir)
            .context("Failed to connect to database")
    };

    match cli.command {
        Commands::Export {
            output,
            format,
            args,
        } => {
            let mut options = export_options(&config, args)?;
            options.format = match format {
                Some(name) => Format::from_name(&name)?,
                None => Format::from_path(&output).unwrap_or(Format::Sql),
            };
            let mut exporter = Exporter::new(connect()?, options);
            let result = exporter
                .export_to_file(&output)
                .with_context(|| format!("Export to {} failed", output.display()))?;
            report(&result.statistics);
            println!(
                "Exported {} row(s) from {} table(s) to {}",
                result.statistics.rows_exported,
                result.statistics.tables_processed,
                result.path.display()
            );
            Ok(())
        }
        Commands::ExportCsv { dir, args } => {
            let mut options = export_options(&config, args)?;
            options.format = Format::Csv;
            let mut exporter = Exporter::new(connect()?, options);
            let files = exporter
                .export_csv_to_directory(&dir)
                .with_context(|| format!("CSV export to {} failed", dir.display()))?;
            report(exporter.statistics());
            println!("Wrote {} file(s) to {}", files.len(), dir.display());
            Ok(())
        }
        Commands::Import {
            input,
            format,
            args,
        } => {
            let options = import_options(&config, args)?;
            let mut importer = Importer::new(connect()?, options);
            if let Some(name) = format {
                importer = importer.with_format(Format::from_name(&name)?);
            }
            let clean = importer
                .import_from_file(&input)
                .with_context(|| format!("Import of {} failed", input.display()))?;
            report(importer.statistics());
            if !clean {
                bail!("Import finished with {} error(s)", importer.errors().len());
            }
            println!(
                "Imported {} row(s) into {} table(s)",
                importer.statistics().rows_imported,
                importer.statistics().tables_processed
            );
            Ok(())
        }
        Commands::ImportCsv { dir, args } => {
            let options = import_options(&config, args)?;
            let mut importer = Importer::new(connect()?, options);
            let clean = importer
                .import_from_csv_directory(&dir)
                .with_context(|| format!("CSV import from {} failed", dir.display()))?;
            report(importer.statistics());
            if !clean {
                bail!("Import finished with {} error(s)", importer.errors().len());
            }
            println!(
                "Imported {} row(s) into {} table(s)",
                importer.statistics().rows_imported,
                importer.statistics().tables_processed
            );
            Ok(())
        }
        Commands::Schema { output, yaml } => {
            let adapter = connect()?;
            let document = SchemaIntrospector::new(adapter.as_ref(), &config.migration_table)
                .document()
                .context("Failed to read schema")?;
            let text = if yaml {
                document.to_yaml()?
            } else {
                document.to_json()?
            };
            write_or_print(output.as_deref(), &text)
        }
        Commands::Migrate { target } => {
            let manager = MigrationManager::from_config(&config, env)?;
            let applied = manager.migrate(target).context("Migration failed")?;
            println!("Applied {} migration(s)", applied.len());
            Ok(())
        }
        Commands::Rollback { target } => {
            let manager = MigrationManager::from_config(&config, env)?;
            let reverted = manager.rollback(target).context("Rollback failed")?;
            println!("Reverted {} migration(s)", reverted.len());
            Ok(())
        }
        Commands::Status => {
            let manager = MigrationManager::from_config(&config, env)?;
            let statuses = manager.status()?;
            println!("{:>6}  {:<16}  Name", "Status", "Version");
            for status in statuses {
                let state = match status.state {
                    MigrationState::Up => "up",
                    MigrationState::Down => "down",
                };
                let marker = if status.missing { "  ** MISSING **" } else { "" };
                println!("{:>6}  {:<16}  {}{}", state, status.version, status.name, marker);
            }
            Ok(())
        }
        Commands::Clear {
            include_migration_table,
            yes,
        } => {
            if !yes && !confirm("Delete every row from every table?")? {
                tracing::warn!("Clear cancelled by user");
                return Ok(());
            }
            let mut importer = Importer::new(connect()?, config.transfer_options());
            let cleared = importer
                .clear_all_data(include_migration_table)
                .context("Failed to clear data")?;
            println!("Cleared {} table(s)", cleared.len());
            Ok(())
        }
    }
}
