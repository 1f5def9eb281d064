//! The per-run migration report and its log rendering.

use std::fmt::Write as _;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::legacy::LegacyFile;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    NotStarted,
    BackingUp,
    Transforming,
    Loading,
    Reported,
}

impl RunPhase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::BackingUp => "backing_up",
            Self::Transforming => "transforming",
            Self::Loading => "loading",
            Self::Reported => "reported",
        }
    }
}

/// The stage at which a file failed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum FileStage {
    Backup,
    Parse,
    Load,
}

impl FileStage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Backup => "backup",
            Self::Parse => "parse",
            Self::Load => "load",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FileStatus {
    Pending,
    Missing,
    Migrated,
    Failed { stage: FileStage, reason: String },
}

impl FileStatus {
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Counted per top-level legacy record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Default)]
pub struct FileCounts {
    pub attempted: usize,
    pub migrated: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl FileCounts {
    pub fn absorb(&mut self, other: Self) {
        self.attempted += other.attempted;
        self.migrated += other.migrated;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Skipped,
    Failed,
    Warning,
}

impl EntryKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::Failed => "failed",
            Self::Warning => "warning",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ReportEntry {
    pub file: String,
    pub key: String,
    pub kind: EntryKind,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct FileReport {
    pub file: LegacyFile,
    /// Source path, when the file was found.
    pub path: Option<PathBuf>,
    pub backup_path: Option<PathBuf>,
    pub status: FileStatus,
    pub counts: FileCounts,
    pub entries: Vec<ReportEntry>,
}

impl FileReport {
    #[must_use]
    pub fn pending(file: LegacyFile) -> Self {
        Self {
            file,
            path: None,
            backup_path: None,
            status: FileStatus::Pending,
            counts: FileCounts::default(),
            entries: Vec::new(),
        }
    }

    /// Name used in entries: the file actually read, or the preferred name if none was.
    #[must_use]
    pub fn file_name(&self) -> String {
        self.path
            .as_ref()
            .and_then(|path| path.file_name())
            .map_or_else(
                || self.file.primary_file_name().to_string(),
                |name| name.to_string_lossy().into_owned(),
            )
    }

    pub fn push_entry(&mut self, key: impl Into<String>, kind: EntryKind, reason: impl Into<String>) {
        self.entries.push(ReportEntry {
            file: self.file_name(),
            key: key.into(),
            kind,
            reason: reason.into(),
        });
    }

    #[must_use]
    pub fn entries_of(&self, kind: EntryKind) -> Vec<&ReportEntry> {
        self.entries.iter().filter(|entry| entry.kind == kind).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct MigrationReport {
    pub run_id: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub phase: RunPhase,
    pub database: PathBuf,
    pub legacy_dir: PathBuf,
    /// The timestamped directory this run's backups were written to.
    pub backup_dir: Option<PathBuf>,
    pub files: Vec<FileReport>,
}

impl MigrationReport {
    #[must_use]
    pub fn new(
        run_id: impl Into<String>,
        started_at: impl Into<String>,
        database: PathBuf,
        legacy_dir: PathBuf,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            started_at: started_at.into(),
            finished_at: None,
            phase: RunPhase::NotStarted,
            database,
            legacy_dir,
            backup_dir: None,
            files: LegacyFile::LOAD_ORDER.iter().copied().map(FileReport::pending).collect(),
        }
    }

    /// True when no file reached a failed state. Missing files do not count as failures.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        !self.files.iter().any(|file| file.status.is_failed())
    }

    #[must_use]
    pub fn failed_files(&self) -> usize {
        self.files.iter().filter(|file| file.status.is_failed()).count()
    }

    #[must_use]
    pub fn file(&self, file: LegacyFile) -> Option<&FileReport> {
        self.files.iter().find(|report| report.file == file)
    }

    pub fn file_mut(&mut self, file: LegacyFile) -> Option<&mut FileReport> {
        self.files.iter_mut().find(|report| report.file == file)
    }

    #[must_use]
    pub fn totals(&self) -> FileCounts {
        let mut totals = FileCounts::default();
        for file in &self.files {
            totals.absorb(file.counts);
        }
        totals
    }

    /// Plain-text rendering appended to the migration log.
    #[must_use]
    pub fn render_log(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "=== migration run {} ===", self.run_id);
        let _ = writeln!(
            out,
            "started: {}  finished: {}",
            self.started_at,
            self.finished_at.as_deref().unwrap_or("-")
        );
        let _ = writeln!(out, "database: {}", self.database.display());
        let _ = writeln!(out, "legacy dir: {}", self.legacy_dir.display());
        if let Some(backup_dir) = &self.backup_dir {
            let _ = writeln!(out, "backup dir: {}", backup_dir.display());
        }

        for file in &self.files {
            let status = match &file.status {
                FileStatus::Failed { stage, reason } => {
                    format!("failed at {}: {reason}", stage.as_str())
                }
                FileStatus::Pending => "pending".to_string(),
                FileStatus::Missing => "missing".to_string(),
                FileStatus::Migrated => "migrated".to_string(),
            };
            let counts = file.counts;
            let _ = writeln!(
                out,
                "[{}] {status} attempted={} migrated={} skipped={} failed={}",
                file.file_name(),
                counts.attempted,
                counts.migrated,
                counts.skipped,
                counts.failed
            );
            for entry in &file.entries {
                let _ = writeln!(out, "  {} {}: {}", entry.kind.as_str(), entry.key, entry.reason);
            }
        }

        let totals = self.totals();
        let outcome = if self.succeeded() {
            "succeeded".to_string()
        } else {
            format!("failed ({} file(s) failed)", self.failed_files())
        };
        let _ = writeln!(
            out,
            "result: {outcome} attempted={} migrated={} skipped={} failed={}",
            totals.attempted, totals.migrated, totals.skipped, totals.failed
        );
        out
    }
}
