use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use dao_bot_core::{MigrationError, MigrationReport};
use dao_bot_store_sqlite::{MigrationConfig, Migrator, SqliteStore};
use serde::Serialize;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "dao-migrate.v1";

const EXIT_OK: u8 = 0;
const EXIT_FILE_FAILED: u8 = 1;
const EXIT_RUN_FAILED: u8 = 2;

#[derive(Debug, Parser)]
#[command(name = "dao-migrate")]
#[command(about = "Move DAO bot game state from legacy JSON files into SQLite")]
struct Cli {
    #[arg(long, global = true, default_value = "./dao_bot.db")]
    db: PathBuf,

    /// Tracing filter, e.g. `debug` or `dao_bot_store_sqlite=trace`. Overrides `RUST_LOG`.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Back up, transform, and load every legacy file.
    Run(RunArgs),
    /// Report whether a migration looks needed.
    Status(StatusArgs),
    /// Create missing tables and print the schema status.
    Schema,
    /// Run `quick_check` and `foreign_key_check` against the database.
    IntegrityCheck,
    /// Online backup of the database file.
    Backup(BackupArgs),
    /// Seed the default jobs into an empty `jobs` table.
    SeedJobs,
}

#[derive(Debug, Args)]
struct RunArgs {
    #[arg(long, default_value = "./data")]
    legacy_dir: PathBuf,
    /// Where `backup_<timestamp>` is created. Defaults to the legacy directory.
    #[arg(long)]
    backup_dir: Option<PathBuf>,
    #[arg(long, default_value = "./migration.log")]
    log_file: PathBuf,
}

#[derive(Debug, Args)]
struct StatusArgs {
    #[arg(long, default_value = "./data")]
    legacy_dir: PathBuf,
}

#[derive(Debug, Args)]
struct BackupArgs {
    #[arg(long)]
    out: PathBuf,
}

/// Every stdout payload is a JSON object stamped with the contract version.
fn with_contract_version(value: Value) -> Value {
    let mut object = match value {
        Value::Object(object) => object,
        other => {
            let mut object = serde_json::Map::new();
            object.insert("payload".to_string(), other);
            object
        }
    };
    object.insert("contract_version".to_string(), Value::from(CLI_CONTRACT_VERSION));
    Value::Object(object)
}

fn emit_json(payload: impl Serialize) -> Result<()> {
    let value = serde_json::to_value(payload).context("failed to serialize command output")?;
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level).ok(),
        None => EnvFilter::try_from_default_env().ok(),
    }
    .unwrap_or_else(|| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            tracing::error!("{err:#}");
            let _ = emit_json(serde_json::json!({ "error": format!("{err:#}") }));
            ExitCode::from(EXIT_RUN_FAILED)
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let mut store = SqliteStore::open(&cli.db)?;
    match cli.command {
        Command::Run(args) => run_migrate(&args, &mut store),
        Command::Status(args) => run_status(&args, &store),
        Command::Schema => run_schema(&mut store),
        Command::IntegrityCheck => run_integrity_check(&store),
        Command::Backup(args) => run_backup(&args, &store),
        Command::SeedJobs => run_seed_jobs(&mut store),
    }
}

fn run_migrate(args: &RunArgs, store: &mut SqliteStore) -> Result<ExitCode> {
    let mut config = MigrationConfig::new(&args.legacy_dir);
    if let Some(backup_dir) = &args.backup_dir {
        config = config.with_backup_root(backup_dir);
    }

    let report = match Migrator::new(config).run(store) {
        Ok(report) => report,
        Err(err) => {
            if let Some(report) = err.report() {
                if let Err(log_err) = append_log(&args.log_file, report) {
                    tracing::warn!("{log_err:#}");
                }
            }
            return Ok(run_level_failure(&err, Some(&args.log_file)));
        }
    };

    if let Err(err) = append_log(&args.log_file, &report) {
        tracing::warn!("{err:#}");
    }

    let code = if report.succeeded() { EXIT_OK } else { EXIT_FILE_FAILED };
    emit_json(serde_json::json!({
        "succeeded": report.succeeded(),
        "exit_code": code,
        "totals": report.totals(),
        "log_file": args.log_file,
        "report": report
    }))?;
    Ok(ExitCode::from(code))
}

/// Exit 2 with a JSON error. A ledger failure still prints the per-file report.
fn run_level_failure(err: &MigrationError, log_file: Option<&Path>) -> ExitCode {
    tracing::error!("migration aborted: {err}");
    let kind = match err {
        MigrationError::Schema(_) => "schema",
        MigrationError::LegacyDir { .. } => "legacy_dir",
        MigrationError::Ledger { .. } => "ledger",
    };
    let mut payload = serde_json::json!({
        "succeeded": false,
        "exit_code": EXIT_RUN_FAILED,
        "error": { "kind": kind, "message": err.to_string() }
    });
    if let (Some(report), Value::Object(object)) = (err.report(), &mut payload) {
        object.insert("totals".to_string(), serde_json::json!(report.totals()));
        object.insert("log_file".to_string(), serde_json::json!(log_file));
        object.insert("report".to_string(), serde_json::json!(report));
    }
    let _ = emit_json(payload);
    ExitCode::from(EXIT_RUN_FAILED)
}

fn append_log(log_file: &Path, report: &MigrationReport) -> Result<()> {
    if let Some(parent) = log_file.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create log directory {}", parent.display()))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("failed to open migration log {}", log_file.display()))?;
    writeln!(file, "{}", report.render_log())
        .with_context(|| format!("failed to append to migration log {}", log_file.display()))
}

fn run_status(args: &StatusArgs, store: &SqliteStore) -> Result<ExitCode> {
    let status = store.schema_status()?;
    let need = store.migration_needed(&args.legacy_dir)?;
    let runs = if status.missing_tables.iter().any(|table| table == "migration_runs") {
        Vec::new()
    } else {
        store.migration_runs()?
    };

    emit_json(serde_json::json!({
        "migration_needed": need.needed,
        "legacy": need,
        "schema": status,
        "tables": store.table_counts()?,
        "runs": runs
    }))?;
    Ok(ExitCode::from(EXIT_OK))
}

fn run_schema(store: &mut SqliteStore) -> Result<ExitCode> {
    match store.ensure_schema() {
        Ok(status) => {
            emit_json(&status)?;
            Ok(ExitCode::from(EXIT_OK))
        }
        Err(err) => Ok(run_level_failure(&MigrationError::Schema(err), None)),
    }
}

fn run_integrity_check(store: &SqliteStore) -> Result<ExitCode> {
    let report = store.integrity_check()?;
    emit_json(&report)?;
    Ok(ExitCode::from(EXIT_OK))
}

fn run_backup(args: &BackupArgs, store: &SqliteStore) -> Result<ExitCode> {
    store.backup_database(&args.out)?;
    emit_json(serde_json::json!({
        "backup_path": args.out,
        "status": "ok"
    }))?;
    Ok(ExitCode::from(EXIT_OK))
}

fn run_seed_jobs(store: &mut SqliteStore) -> Result<ExitCode> {
    store.ensure_schema()?;
    let seeded = store.seed_default_jobs()?;
    emit_json(serde_json::json!({
        "seeded": seeded,
        "jobs": store.table_counts()?.into_iter().find(|count| count.table == "jobs").map(|c| c.rows)
    }))?;
    Ok(ExitCode::from(EXIT_OK))
}
