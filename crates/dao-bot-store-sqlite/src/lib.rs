use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use dao_bot_core::{
    parse_legacy_file, LegacyFile, MigrationReport, SchemaError, DEFAULT_JOBS,
};
use rusqlite::{params, Connection, DatabaseName};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

mod adapter;
mod backup;
mod load;
mod migrate;
mod schema;

pub use backup::{backup_legacy_file, create_backup_dir, sha256_hex, VerifiedBackup};
pub use migrate::{migrate, MigrationConfig, Migrator};
pub use schema::{ensure_schema, schema_status, SchemaStatus, SCHEMA_VERSION};

/// Bot tables in load order, for row counts.
pub const BOT_TABLES: [&str; 10] = [
    "store_items",
    "jobs",
    "users",
    "user_meta",
    "user_jobs",
    "inventory",
    "sects",
    "sect_members",
    "tournaments",
    "tournament_participants",
];

pub struct SqliteStore {
    conn: Connection,
    path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForeignKeyViolation {
    pub table: String,
    pub rowid: i64,
    pub parent: String,
    pub fk_index: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    /// Every line `quick_check` printed; a healthy database prints just `ok`.
    pub quick_check_messages: Vec<String>,
    pub foreign_key_violations: Vec<ForeignKeyViolation>,
    pub schema_status: SchemaStatus,
    pub tables: Vec<TableCount>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableCount {
    pub table: String,
    pub rows: i64,
}

/// Whether the bot's startup check would ask for a migration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrationNeed {
    pub needed: bool,
    pub legacy_file: Option<PathBuf>,
    pub legacy_records: usize,
    pub legacy_parse_error: Option<String>,
    pub users_rows: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub succeeded: bool,
}

impl SqliteStore {
    /// Open (or create) the bot database, creating its directory when needed.
    ///
    /// Connections run in WAL mode with foreign keys enforced, so the loader's reference
    /// checks and the schema's `REFERENCES` clauses agree.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create database directory {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open bot database at {}", path.display()))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure bot database pragmas")?;
        tracing::debug!(database = %path.display(), "Opened bot database");

        Ok(Self { conn, path: path.to_path_buf() })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// # Errors
    /// See [`ensure_schema`].
    pub fn ensure_schema(&mut self) -> Result<SchemaStatus, SchemaError> {
        ensure_schema(&mut self.conn)
    }

    /// # Errors
    /// See [`schema_status`].
    pub fn schema_status(&self) -> Result<SchemaStatus, SchemaError> {
        schema_status(&self.conn)
    }

    /// Row counts of every bot table that exists.
    ///
    /// # Errors
    /// Returns an error when a count query fails.
    pub fn table_counts(&self) -> Result<Vec<TableCount>> {
        let mut counts = Vec::with_capacity(BOT_TABLES.len());
        for table in BOT_TABLES {
            let exists: i64 = self
                .conn
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
                    params![table],
                    |row| row.get(0),
                )
                .with_context(|| format!("failed to check if table exists: {table}"))?;
            if exists == 0 {
                continue;
            }
            let rows: i64 = self
                .conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
                .with_context(|| format!("failed to count rows of {table}"))?;
            counts.push(TableCount { table: table.to_string(), rows });
        }
        Ok(counts)
    }

    /// A migration is needed when the legacy users file holds records and `users` is empty.
    ///
    /// # Errors
    /// Returns an error when the legacy file cannot be read or `users` cannot be counted.
    pub fn migration_needed(&self, legacy_dir: &Path) -> Result<MigrationNeed> {
        let legacy_file = LegacyFile::Users
            .file_names()
            .iter()
            .map(|name| legacy_dir.join(name))
            .find(|path| path.is_file());

        let (legacy_records, legacy_parse_error) = match &legacy_file {
            Some(path) => {
                let bytes = fs::read(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
                match parse_legacy_file(LegacyFile::Users, name.as_deref().unwrap_or(""), &bytes) {
                    Ok(batch) => (batch.attempted(), None),
                    Err(err) => (0, Some(err.to_string())),
                }
            }
            None => (0, None),
        };

        let users_rows = if self.schema_status()?.missing_tables.iter().any(|t| t == "users") {
            0
        } else {
            self.conn
                .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
                .context("failed to count users")?
        };

        Ok(MigrationNeed {
            needed: legacy_records > 0 && users_rows == 0,
            legacy_file,
            legacy_records,
            legacy_parse_error,
            users_rows,
        })
    }

    /// Insert the bot's default jobs when the `jobs` table is empty. Returns how many were added.
    ///
    /// # Errors
    /// Returns an error when the schema is missing or the insert transaction fails.
    pub fn seed_default_jobs(&mut self) -> Result<usize> {
        let tx = self.conn.transaction().context("failed to start seed transaction")?;
        let existing: i64 = tx
            .query_row("SELECT COUNT(*) FROM jobs", [], |row| row.get(0))
            .context("failed to count jobs")?;
        if existing > 0 {
            return Ok(0);
        }

        for (name, min_pay, max_pay) in DEFAULT_JOBS {
            tx.execute(
                "INSERT INTO jobs(job_id, name, min_pay, max_pay) VALUES (?1, ?1, ?2, ?3)",
                params![name, min_pay, max_pay],
            )
            .with_context(|| format!("failed to seed job {name}"))?;
        }
        tx.commit().context("failed to commit seed transaction")?;
        Ok(DEFAULT_JOBS.len())
    }

    /// Append a finished run to the `migration_runs` ledger.
    ///
    /// # Errors
    /// Returns an error when the report cannot be serialized or written.
    pub fn record_run(&mut self, report: &MigrationReport) -> Result<()> {
        let report_json =
            serde_json::to_string(report).context("failed to serialize migration report")?;
        let finished_at = report.finished_at.clone().unwrap_or_else(|| report.started_at.clone());
        self.conn
            .execute(
                "INSERT INTO migration_runs(run_id, started_at, finished_at, succeeded, report_json)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    report.run_id,
                    report.started_at,
                    finished_at,
                    i64::from(report.succeeded()),
                    report_json
                ],
            )
            .with_context(|| format!("failed to record migration run {}", report.run_id))?;
        Ok(())
    }

    /// Recorded runs, oldest first.
    ///
    /// # Errors
    /// Returns an error when the ledger cannot be read.
    pub fn migration_runs(&self) -> Result<Vec<RunSummary>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT run_id, started_at, finished_at, succeeded
                 FROM migration_runs
                 ORDER BY started_at ASC, run_id ASC",
            )
            .context("failed to prepare migration_runs query")?;
        let rows = stmt.query_map([], |row| {
            Ok(RunSummary {
                run_id: row.get(0)?,
                started_at: row.get(1)?,
                finished_at: row.get(2)?,
                succeeded: row.get::<_, i64>(3)? == 1,
            })
        })?;

        let mut runs = Vec::new();
        for row in rows {
            runs.push(row?);
        }
        Ok(runs)
    }

    /// Load a recorded report back from the ledger.
    ///
    /// # Errors
    /// Returns an error when the run is unknown or its stored report is not valid JSON.
    pub fn load_run_report(&self, run_id: &str) -> Result<MigrationReport> {
        let raw: String = self
            .conn
            .query_row(
                "SELECT report_json FROM migration_runs WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .with_context(|| format!("migration run not found: {run_id}"))?;
        serde_json::from_str(&raw).context("failed to decode stored migration report")
    }

    /// Online copy of the whole bot database into `out_file`.
    ///
    /// # Errors
    /// Returns an error when `out_file` is the live database, its directory cannot be
    /// created, or the copy fails.
    pub fn backup_database(&self, out_file: &Path) -> Result<()> {
        if out_file == self.path {
            anyhow::bail!("refusing to back up {} onto itself", out_file.display());
        }
        if let Some(parent) = out_file.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create backup directory {}", parent.display()))?;
        }

        self.conn
            .backup(DatabaseName::Main, out_file, None)
            .with_context(|| format!("failed to back up bot database to {}", out_file.display()))?;
        tracing::info!("Backed up bot database: {:?} -> {:?}", self.path, out_file);
        Ok(())
    }

    /// `quick_check`, `foreign_key_check`, schema status, and row counts in one report.
    ///
    /// # Errors
    /// Returns an error when any of the checks cannot be run.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let mut stmt = self.conn.prepare("PRAGMA quick_check").context("failed to run quick_check")?;
        let quick_check_messages = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read quick_check output")?;

        let mut stmt = self
            .conn
            .prepare("PRAGMA foreign_key_check")
            .context("failed to run foreign_key_check")?;
        let foreign_key_violations = stmt
            .query_map([], |row| {
                Ok(ForeignKeyViolation {
                    table: row.get(0)?,
                    rowid: row.get(1)?,
                    parent: row.get(2)?,
                    fk_index: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read foreign_key_check output")?;

        Ok(IntegrityReport {
            quick_check_ok: quick_check_messages == ["ok"],
            quick_check_messages,
            foreign_key_violations,
            schema_status: self.schema_status()?,
            tables: self.table_counts()?,
        })
    }
}

pub(crate) fn now_rfc3339() -> std::result::Result<String, time::error::Format> {
    OffsetDateTime::now_utc().format(&time::format_description::well_known::Rfc3339)
}
