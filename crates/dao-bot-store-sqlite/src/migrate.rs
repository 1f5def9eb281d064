//! One-shot migration of the legacy JSON files into the bot database.
//!
//! A run moves through `NOT_STARTED -> BACKING_UP -> TRANSFORMING -> LOADING -> REPORTED`.
//! Each file can fail at its own stage without stopping the others; only schema problems
//! and an unusable legacy directory abort the run.

use std::path::{Path, PathBuf};

use dao_bot_core::{
    parse_legacy_file, BackupError, DiscoveryWarning, EntryKind, FileStage, FileStatus, LegacyBatch,
    LegacyFile, MigrationError, MigrationReport, RunId, RunPhase,
};
use time::OffsetDateTime;

use crate::backup::{backup_legacy_file, create_backup_dir};
use crate::load::load_batch;
use crate::{now_rfc3339, SqliteStore};

#[derive(Debug, Clone)]
pub struct MigrationConfig {
    pub legacy_dir: PathBuf,
    /// Parent of the per-run `backup_<timestamp>` directory.
    pub backup_root: PathBuf,
}

impl MigrationConfig {
    /// Backups go next to the legacy files unless [`Self::with_backup_root`] says otherwise.
    #[must_use]
    pub fn new(legacy_dir: impl Into<PathBuf>) -> Self {
        let legacy_dir = legacy_dir.into();
        Self { backup_root: legacy_dir.clone(), legacy_dir }
    }

    #[must_use]
    pub fn with_backup_root(mut self, backup_root: impl Into<PathBuf>) -> Self {
        self.backup_root = backup_root.into();
        self
    }
}

pub struct Migrator {
    config: MigrationConfig,
}

/// A found legacy file waiting for its next stage.
struct Staged {
    file: LegacyFile,
    name: String,
    bytes: Vec<u8>,
}

impl Migrator {
    #[must_use]
    pub fn new(config: MigrationConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Run the migration against `store`, ensuring the schema first.
    ///
    /// # Errors
    /// Returns [`MigrationError::Schema`] when the schema cannot be ensured,
    /// [`MigrationError::LegacyDir`] when the legacy directory is unusable, and
    /// [`MigrationError::Ledger`], carrying the finished report, when the run cannot be recorded.
    /// Per-file failures are reported in the returned [`MigrationReport`].
    pub fn run(&self, store: &mut SqliteStore) -> Result<MigrationReport, MigrationError> {
        let legacy_dir = &self.config.legacy_dir;
        if !legacy_dir.is_dir() {
            return Err(MigrationError::LegacyDir {
                path: legacy_dir.clone(),
                message: "not a directory".to_string(),
            });
        }

        store.ensure_schema()?;

        let run_id = RunId::new();
        let mut report = MigrationReport::new(
            run_id.to_string(),
            timestamp(),
            store.path().to_path_buf(),
            legacy_dir.clone(),
        );
        tracing::info!(
            run_id = %report.run_id,
            legacy_dir = %legacy_dir.display(),
            database = %store.path().display(),
            "Starting legacy migration"
        );

        let found = discover(legacy_dir, &mut report);

        set_phase(&mut report, RunPhase::BackingUp);
        let staged = self.back_up(found, &mut report);

        set_phase(&mut report, RunPhase::Transforming);
        let batches = transform(staged, &mut report);

        set_phase(&mut report, RunPhase::Loading);
        for (name, batch) in batches {
            load_file(store, &name, &batch, &mut report);
        }

        report.finished_at = Some(timestamp());
        set_phase(&mut report, RunPhase::Reported);

        let totals = report.totals();
        if report.succeeded() {
            tracing::info!(
                run_id = %report.run_id,
                migrated = totals.migrated,
                skipped = totals.skipped,
                "Legacy migration finished"
            );
        } else {
            tracing::error!(
                run_id = %report.run_id,
                failed_files = report.failed_files(),
                failed_records = totals.failed,
                "Legacy migration finished with failed files"
            );
        }

        if let Err(err) = store.record_run(&report) {
            tracing::error!(run_id = %report.run_id, "{err:#}");
            return Err(MigrationError::Ledger {
                message: format!("{err:#}"),
                report: Box::new(report),
            });
        }
        Ok(report)
    }

    fn back_up(&self, found: Vec<(LegacyFile, PathBuf)>, report: &mut MigrationReport) -> Vec<Staged> {
        let mut staged = Vec::with_capacity(found.len());
        let mut backup_dir: Option<PathBuf> = None;

        for (file, path) in found {
            let name = file_name_of(&path);
            if backup_dir.is_none() {
                match create_backup_dir(&self.config.backup_root, OffsetDateTime::now_utc()) {
                    Ok(dir) => {
                        tracing::info!("Created backup directory: {dir:?}");
                        report.backup_dir = Some(dir.clone());
                        backup_dir = Some(dir);
                    }
                    Err(err) => {
                        fail_backup(report, file, &name, &err);
                        continue;
                    }
                }
            }
            let Some(dir) = backup_dir.as_deref() else { continue };

            match backup_legacy_file(&path, dir) {
                Ok(backup) => {
                    tracing::info!("Backed up '{name}': {:?} -> {:?}", backup.source, backup.backup);
                    if let Some(file_report) = report.file_mut(file) {
                        file_report.backup_path = Some(backup.backup);
                    }
                    staged.push(Staged { file, name, bytes: backup.bytes });
                }
                Err(err) => fail_backup(report, file, &name, &err),
            }
        }

        staged
    }
}

/// Run the migration with backups written next to the legacy files.
///
/// # Errors
/// See [`Migrator::run`].
pub fn migrate(legacy_dir: &Path, store: &mut SqliteStore) -> Result<MigrationReport, MigrationError> {
    Migrator::new(MigrationConfig::new(legacy_dir)).run(store)
}

fn fail_backup(report: &mut MigrationReport, file: LegacyFile, name: &str, err: &BackupError) {
    tracing::error!("Backup of '{name}' failed: {err}");
    if let Some(file_report) = report.file_mut(file) {
        file_report.status = FileStatus::Failed { stage: FileStage::Backup, reason: err.to_string() };
    }
}

fn timestamp() -> String {
    now_rfc3339().unwrap_or_else(|_| OffsetDateTime::now_utc().unix_timestamp().to_string())
}

fn set_phase(report: &mut MigrationReport, phase: RunPhase) {
    report.phase = phase;
    tracing::info!(run_id = %report.run_id, phase = phase.as_str(), "Migration phase");
}

fn file_name_of(path: &Path) -> String {
    path.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_default()
}

fn discover(legacy_dir: &Path, report: &mut MigrationReport) -> Vec<(LegacyFile, PathBuf)> {
    let mut found = Vec::new();
    for file in LegacyFile::LOAD_ORDER {
        let path = file
            .file_names()
            .iter()
            .map(|name| legacy_dir.join(name))
            .find(|candidate| candidate.is_file());
        let Some(file_report) = report.file_mut(file) else { continue };

        match path {
            Some(path) => {
                file_report.path = Some(path.clone());
                found.push((file, path));
            }
            None => {
                let warning = DiscoveryWarning {
                    file: file.primary_file_name().to_string(),
                    dir: legacy_dir.to_path_buf(),
                };
                tracing::warn!("{warning}");
                file_report.status = FileStatus::Missing;
                file_report.push_entry("-", EntryKind::Warning, warning.to_string());
            }
        }
    }
    found
}

fn transform(staged: Vec<Staged>, report: &mut MigrationReport) -> Vec<(String, LegacyBatch)> {
    let mut batches = Vec::with_capacity(staged.len());
    for Staged { file, name, bytes } in staged {
        let Some(file_report) = report.file_mut(file) else { continue };
        match parse_legacy_file(file, &name, &bytes) {
            Ok(batch) => {
                file_report.counts.attempted = batch.attempted();
                for rejected in batch.rejected() {
                    tracing::warn!("Skipping '{name}' record {}: {}", rejected.key, rejected.error);
                    file_report.push_entry(&rejected.key, EntryKind::Skipped, rejected.error.to_string());
                }
                file_report.counts.skipped = batch.rejected().len();
                batches.push((name, batch));
            }
            Err(err) => {
                tracing::error!("{err}");
                file_report.status =
                    FileStatus::Failed { stage: FileStage::Parse, reason: err.to_string() };
            }
        }
    }
    batches
}

fn load_file(store: &mut SqliteStore, name: &str, batch: &LegacyBatch, report: &mut MigrationReport) {
    let Some(file_report) = report.file_mut(batch.file()) else { return };

    match load_batch(store.connection_mut(), name, batch) {
        Ok(outcome) => {
            file_report.counts.migrated = outcome.migrated;
            file_report.counts.skipped += outcome.skipped;
            for (key, kind, reason) in outcome.entries {
                match kind {
                    EntryKind::Warning => tracing::warn!("'{name}' record {key}: {reason}"),
                    _ => tracing::info!("Skipping '{name}' record {key}: {reason}"),
                }
                file_report.push_entry(key, kind, reason);
            }
            file_report.status = FileStatus::Migrated;
            tracing::info!(
                "Migrated '{name}': attempted={} migrated={} skipped={}",
                file_report.counts.attempted,
                file_report.counts.migrated,
                file_report.counts.skipped
            );
        }
        Err(err) => {
            tracing::error!("{err}; rolled back");
            let keys = batch.record_keys();
            file_report.counts.failed = keys.len();
            for key in keys {
                file_report.push_entry(key, EntryKind::Failed, err.to_string());
            }
            file_report.status = FileStatus::Failed { stage: FileStage::Load, reason: err.to_string() };
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use anyhow::Result;
    use dao_bot_core::{FileCounts, FileReport};
    use rusqlite::params;

    use super::*;

    struct Fixture {
        _dir: tempfile::TempDir,
        legacy: PathBuf,
        backups: PathBuf,
        store: SqliteStore,
    }

    impl Fixture {
        fn new() -> Result<Self> {
            let dir = tempfile::tempdir()?;
            let legacy = dir.path().join("data");
            let backups = dir.path().join("backups");
            fs::create_dir_all(&legacy)?;
            let store = SqliteStore::open(&dir.path().join("dao_bot.db"))?;
            Ok(Self { _dir: dir, legacy, backups, store })
        }

        fn write(&self, name: &str, contents: &str) -> Result<()> {
            fs::write(self.legacy.join(name), contents)?;
            Ok(())
        }

        fn run(&mut self) -> Result<MigrationReport> {
            let config = MigrationConfig::new(&self.legacy).with_backup_root(&self.backups);
            Ok(Migrator::new(config).run(&mut self.store)?)
        }

        fn count(&self, table: &str) -> Result<i64> {
            Ok(self.store.connection().query_row(
                &format!("SELECT COUNT(*) FROM {table}"),
                [],
                |row| row.get(0),
            )?)
        }

        fn dump(&self) -> Result<Vec<String>> {
            let mut rows = Vec::new();
            for table in crate::BOT_TABLES {
                let mut stmt = self
                    .store
                    .connection()
                    .prepare(&format!("SELECT * FROM {table} ORDER BY 1, 2"))?;
                let width = stmt.column_count();
                let mut query = stmt.query([])?;
                while let Some(row) = query.next()? {
                    let mut cells = vec![table.to_string()];
                    for index in 0..width {
                        let value: rusqlite::types::Value = row.get(index)?;
                        cells.push(format!("{value:?}"));
                    }
                    rows.push(cells.join("|"));
                }
            }
            Ok(rows)
        }

        fn write_full_legacy_set(&self) -> Result<()> {
            self.write("store.json", r#"{"Herb": {"price": 10}, "Sword": 150}"#)?;
            self.write("jobs.json", r#"{"Farmer": [200, 400], "Alchemist": [400, 600]}"#)?;
            self.write(
                "users.json",
                r#"{
                    "1": {"cash": 100, "bank": 50, "job": "Farmer", "inventory": ["Herb", "Herb"],
                          "jobs": {"Farmer": {"xp": 5}}, "last_collects": {"role": 1}},
                    "2": {"cash": 7, "job": "Necromancer", "inventory": ["Ghost"]}
                }"#,
            )?;
            self.write(
                "inventory.json",
                r#"[{"user_id": "2", "item_id": "Sword", "quantity": 1},
                    {"user_id": "9", "item_id": "Sword", "quantity": 1},
                    {"user_id": "2", "item_id": "Wand", "quantity": 1}]"#,
            )?;
            self.write(
                "sects.json",
                r#"{"azure": {"name": "Azure", "leader": "1", "members": ["1", "2", "77"]}}"#,
            )?;
            self.write(
                "tournaments.json",
                r#"{"t1": {"host": "1", "winner": "404", "status": "completed",
                          "participants": ["1", -1], "bot_names": {"-1": "Dummy"}, "add_money": 500}}"#,
            )
        }
    }

    #[test]
    fn fresh_migration_of_a_single_user() -> Result<()> {
        let mut fx = Fixture::new()?;
        fx.write("users.json", r#"{"1": {"cash": 100, "bank": 50}}"#)?;

        let report = fx.run()?;
        let users = report.file(LegacyFile::Users).map(|f| f.counts);
        assert_eq!(users, Some(FileCounts { attempted: 1, migrated: 1, skipped: 0, failed: 0 }));
        assert!(report.succeeded());
        assert_eq!(report.phase, RunPhase::Reported);

        let row: (String, i64, i64) = fx.store.connection().query_row(
            "SELECT user_id, cash, bank FROM users",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        assert_eq!(row, ("1".to_string(), 100, 50));
        Ok(())
    }

    #[test]
    fn economy_json_is_the_users_fallback() -> Result<()> {
        let mut fx = Fixture::new()?;
        fx.write("economy.json", r#"{"5": {"cash": 1}}"#)?;
        let report = fx.run()?;
        let users = report.file(LegacyFile::Users);
        assert_eq!(users.map(|f| f.status.clone()), Some(FileStatus::Migrated));
        assert_eq!(users.map(FileReport::file_name), Some("economy.json".to_string()));
        assert_eq!(fx.count("users")?, 1);
        Ok(())
    }

    #[test]
    fn malformed_inventory_record_is_skipped_and_the_rest_commit() -> Result<()> {
        let mut fx = Fixture::new()?;
        fx.write("store.json", r#"{"Sword": 100, "Herb": 5}"#)?;
        fx.write("users.json", r#"{"1": {}}"#)?;
        fx.write(
            "inventory.json",
            r#"[{"user_id": "1", "item_id": "Sword", "quantity": 2},
                {"user_id": "1", "item_id": "Herb"}]"#,
        )?;

        let report = fx.run()?;
        let inventory = report.file(LegacyFile::Inventory);
        assert_eq!(
            inventory.map(|f| f.counts),
            Some(FileCounts { attempted: 2, migrated: 1, skipped: 1, failed: 0 })
        );
        let skipped = inventory.map(|f| f.entries_of(EntryKind::Skipped).len());
        assert_eq!(skipped, Some(1));
        assert_eq!(fx.count("inventory")?, 1);
        Ok(())
    }

    #[test]
    fn missing_file_is_a_warning_and_the_run_succeeds() -> Result<()> {
        let mut fx = Fixture::new()?;
        fx.write("users.json", r#"{"1": {}}"#)?;

        let report = fx.run()?;
        let sects = report.file(LegacyFile::Sects);
        assert_eq!(sects.map(|f| f.status.clone()), Some(FileStatus::Missing));
        assert_eq!(sects.map(|f| f.entries_of(EntryKind::Warning).len()), Some(1));
        assert!(report.succeeded());
        assert_eq!(fx.count("sects")?, 0);
        Ok(())
    }

    #[test]
    fn second_run_changes_nothing() -> Result<()> {
        let mut fx = Fixture::new()?;
        fx.write_full_legacy_set()?;

        let first = fx.run()?;
        assert!(first.succeeded());
        let after_first = fx.dump()?;

        let second = fx.run()?;
        assert!(second.succeeded());
        assert_eq!(fx.dump()?, after_first);

        let users = second.file(LegacyFile::Users).map(|f| f.counts);
        assert_eq!(users, Some(FileCounts { attempted: 2, migrated: 0, skipped: 2, failed: 0 }));
        let reasons: Vec<String> = second
            .file(LegacyFile::Users)
            .map(|f| f.entries_of(EntryKind::Skipped).iter().map(|e| e.reason.clone()).collect())
            .unwrap_or_default();
        assert_eq!(reasons, vec!["already present".to_string(); 2]);
        assert_eq!(fx.store.migration_runs()?.len(), 2);
        Ok(())
    }

    #[test]
    fn references_are_resolved_or_reported() -> Result<()> {
        let mut fx = Fixture::new()?;
        fx.write_full_legacy_set()?;
        let report = fx.run()?;

        // user 2's job and inline item are unknown
        let job: Option<String> = fx.store.connection().query_row(
            "SELECT job_id FROM users WHERE user_id = '2'",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(job, None);
        let users = report.file(LegacyFile::Users).map(|f| f.entries_of(EntryKind::Warning).len());
        assert_eq!(users, Some(2));

        // inventory rows for an unknown user and an unknown item are skipped
        assert_eq!(
            report.file(LegacyFile::Inventory).map(|f| f.counts),
            Some(FileCounts { attempted: 3, migrated: 1, skipped: 2, failed: 0 })
        );
        let orphans: i64 = fx.store.connection().query_row(
            "SELECT COUNT(*) FROM inventory WHERE item_id NOT IN (SELECT item_id FROM store_items)",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(orphans, 0);
        let herbs: i64 = fx.store.connection().query_row(
            "SELECT quantity FROM inventory WHERE user_id = '1' AND item_id = 'Herb'",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(herbs, 2);

        // sect member 77 is dropped, tournament winner 404 is cleared
        assert_eq!(fx.count("sect_members")?, 2);
        let winner: Option<String> = fx.store.connection().query_row(
            "SELECT winner_id FROM tournaments WHERE tournament_id = 't1'",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(winner, None);
        assert_eq!(fx.count("tournament_participants")?, 2);
        assert_eq!(fx.count("user_meta")?, 1);
        assert_eq!(fx.count("user_jobs")?, 1);

        assert!(fx.store.integrity_check()?.foreign_key_violations.is_empty());
        Ok(())
    }

    #[test]
    fn load_failure_rolls_back_only_that_file() -> Result<()> {
        let mut fx = Fixture::new()?;
        fx.store.ensure_schema()?;
        fx.store.connection().execute_batch(
            "CREATE TRIGGER reject_cursed BEFORE INSERT ON inventory
             WHEN NEW.item_id = 'Cursed'
             BEGIN SELECT RAISE(ABORT, 'cursed items cannot be stored'); END;",
        )?;
        fx.write("store.json", r#"{"Sword": 100, "Cursed": 1}"#)?;
        fx.write("users.json", r#"{"1": {}}"#)?;
        fx.write(
            "inventory.json",
            r#"[{"user_id": "1", "item_id": "Sword", "quantity": 1},
                {"user_id": "1", "item_id": "Cursed", "quantity": 1},
                {"user_id": "1", "quantity": 1}]"#,
        )?;

        let report = fx.run()?;
        assert!(!report.succeeded());
        let inventory = report.file(LegacyFile::Inventory);
        assert!(matches!(
            inventory.map(|f| &f.status),
            Some(FileStatus::Failed { stage: FileStage::Load, .. })
        ));
        assert_eq!(
            inventory.map(|f| f.counts),
            Some(FileCounts { attempted: 3, migrated: 0, skipped: 1, failed: 2 })
        );
        assert_eq!(fx.count("inventory")?, 0);
        assert_eq!(fx.count("users")?, 1);
        assert_eq!(fx.count("store_items")?, 2);
        Ok(())
    }

    #[test]
    fn unparseable_file_fails_at_parse_and_others_continue() -> Result<()> {
        let mut fx = Fixture::new()?;
        fx.write("jobs.json", "[1, 2")?;
        fx.write("users.json", r#"{"1": {}}"#)?;

        let report = fx.run()?;
        assert!(matches!(
            report.file(LegacyFile::Jobs).map(|f| &f.status),
            Some(FileStatus::Failed { stage: FileStage::Parse, .. })
        ));
        assert_eq!(fx.count("users")?, 1);
        Ok(())
    }

    #[test]
    fn backups_are_taken_before_loading() -> Result<()> {
        let mut fx = Fixture::new()?;
        let users = r#"{"1": {"cash": 100, "bank": 50}}"#;
        fx.write("users.json", users)?;

        let report = fx.run()?;
        let backup_dir = report.backup_dir.clone().unwrap_or_default();
        assert!(backup_dir.starts_with(&fx.backups));
        let backup_path = report.file(LegacyFile::Users).and_then(|f| f.backup_path.clone());
        assert_eq!(backup_path, Some(backup_dir.join("users.json")));
        assert_eq!(fs::read_to_string(backup_dir.join("users.json"))?, users);
        Ok(())
    }

    #[test]
    fn rerun_recovers_sect_rows_dropped_while_users_were_broken() -> Result<()> {
        let mut fx = Fixture::new()?;
        fx.write("users.json", "{broken")?;
        fx.write("sects.json", r#"{"azure": {"name": "Azure", "leader": "1", "members": ["1", "2"]}}"#)?;

        let first = fx.run()?;
        assert!(!first.succeeded());
        assert_eq!(fx.count("sects")?, 1);
        assert_eq!(fx.count("sect_members")?, 0);

        fx.write("users.json", r#"{"1": {}, "2": {}}"#)?;
        let second = fx.run()?;
        assert!(second.succeeded());
        assert_eq!(fx.count("users")?, 2);
        assert_eq!(fx.count("sect_members")?, 2);
        let leader: Option<String> = fx.store.connection().query_row(
            "SELECT leader_id FROM sects WHERE sect_id = 'azure'",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(leader.as_deref(), Some("1"));
        assert_eq!(
            second.file(LegacyFile::Sects).map(|f| f.counts),
            Some(FileCounts { attempted: 1, migrated: 1, skipped: 0, failed: 0 })
        );

        let third = fx.run()?;
        assert_eq!(third.file(LegacyFile::Sects).map(|f| f.counts.skipped), Some(1));
        Ok(())
    }

    #[test]
    fn rerun_recovers_inline_inventory_dropped_while_store_was_broken() -> Result<()> {
        let mut fx = Fixture::new()?;
        fx.write("store.json", "[1,")?;
        fx.write("jobs.json", r#"{"Farmer": [200, 400]}"#)?;
        fx.write("users.json", r#"{"1": {"job": "Farmer", "inventory": ["Herb", "Herb"]}}"#)?;

        fx.run()?;
        assert_eq!(fx.count("inventory")?, 0);

        fx.write("store.json", r#"{"Herb": 5}"#)?;
        let second = fx.run()?;
        assert!(second.succeeded());
        assert_eq!(fx.count("store_items")?, 1);
        let herbs: i64 = fx.store.connection().query_row(
            "SELECT quantity FROM inventory WHERE user_id = '1' AND item_id = 'Herb'",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(herbs, 2);
        assert_eq!(second.file(LegacyFile::Users).map(|f| f.counts.migrated), Some(1));
        Ok(())
    }

    #[test]
    fn rerun_fills_a_cleared_job_but_keeps_a_set_one() -> Result<()> {
        let mut fx = Fixture::new()?;
        fx.write("users.json", r#"{"1": {"job": "Farmer"}, "2": {"job": "Farmer"}}"#)?;
        fx.run()?;
        fx.store
            .connection()
            .execute("INSERT INTO jobs(job_id, name, min_pay, max_pay) VALUES ('Miner', 'Miner', 1, 2)", [])?;
        fx.store.connection().execute("UPDATE users SET job_id = 'Miner' WHERE user_id = '2'", [])?;

        fx.write("jobs.json", r#"{"Farmer": [200, 400]}"#)?;
        fx.run()?;
        let jobs: Vec<Option<String>> = {
            let mut stmt =
                fx.store.connection().prepare("SELECT job_id FROM users ORDER BY user_id")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };
        assert_eq!(jobs, vec![Some("Farmer".to_string()), Some("Miner".to_string())]);
        Ok(())
    }

    #[test]
    fn failed_backup_fails_the_file_and_loads_nothing() -> Result<()> {
        let mut fx = Fixture::new()?;
        fs::write(&fx.backups, "not a directory")?;
        fx.write("users.json", r#"{"1": {}}"#)?;
        fx.write("jobs.json", r#"{"Farmer": [200, 400]}"#)?;

        let report = fx.run()?;
        assert!(!report.succeeded());
        assert_eq!(report.failed_files(), 2);
        for file in [LegacyFile::Users, LegacyFile::Jobs] {
            assert!(matches!(
                report.file(file).map(|f| &f.status),
                Some(FileStatus::Failed { stage: FileStage::Backup, .. })
            ));
        }
        assert_eq!(report.file(LegacyFile::Sects).map(|f| f.status.clone()), Some(FileStatus::Missing));
        assert_eq!(report.phase, RunPhase::Reported);
        assert_eq!(fx.count("users")?, 0);
        assert_eq!(fx.count("jobs")?, 0);
        assert_eq!(fx.store.migration_runs()?.len(), 1);
        Ok(())
    }

    #[test]
    fn ledger_failure_keeps_the_report_and_the_loaded_rows() -> Result<()> {
        let mut fx = Fixture::new()?;
        fx.store.ensure_schema()?;
        fx.store.connection().execute_batch(
            "CREATE TRIGGER ledger_read_only BEFORE INSERT ON migration_runs
             BEGIN SELECT RAISE(ABORT, 'ledger is read-only'); END;",
        )?;
        fx.write("users.json", r#"{"1": {"cash": 3}}"#)?;

        let config = MigrationConfig::new(&fx.legacy).with_backup_root(&fx.backups);
        let err = match Migrator::new(config).run(&mut fx.store) {
            Ok(_) => anyhow::bail!("run should fail to record the ledger"),
            Err(err) => err,
        };
        assert!(matches!(err, MigrationError::Ledger { .. }));
        assert!(err.to_string().contains("ledger is read-only"));
        assert_eq!(err.to_string().matches("failed to record migration run").count(), 1);

        let report = err.report().cloned().unwrap_or_else(|| panic!("ledger error carries the report"));
        assert!(report.succeeded());
        assert_eq!(report.file(LegacyFile::Users).map(|f| f.counts.migrated), Some(1));
        assert!(report.render_log().contains("users.json"));
        assert_eq!(fx.count("users")?, 1);
        Ok(())
    }

    #[test]
    fn missing_legacy_directory_is_a_run_level_error() -> Result<()> {
        let mut fx = Fixture::new()?;
        let config = MigrationConfig::new(fx.legacy.join("absent"));
        let result = Migrator::new(config).run(&mut fx.store);
        assert!(matches!(result, Err(MigrationError::LegacyDir { .. })));
        Ok(())
    }

    #[test]
    fn schema_conflict_aborts_before_any_backup() -> Result<()> {
        let mut fx = Fixture::new()?;
        fx.store
            .connection()
            .execute("CREATE TABLE users (user_id TEXT PRIMARY KEY, balance INTEGER)", params![])?;
        fx.write("users.json", r#"{"1": {}}"#)?;

        let result = fx.run();
        assert!(result.is_err());
        assert!(!fx.backups.exists());
        Ok(())
    }
}
