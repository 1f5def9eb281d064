use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use ulid::Ulid;

mod error;
mod legacy;
mod records;
mod report;
mod store;

pub use error::{
    BackupError, DiscoveryWarning, LoadError, MigrationError, ParseError, RecordError,
    SchemaError, StoreError,
};
pub use legacy::{
    inventory_key, parse_legacy_file, LegacyBatch, LegacyFile, ParsedFile, RejectedRecord,
};
pub use records::{
    Balance, InventoryItem, Job, Sect, SectMember, SectRole, SectUpdate, StoreItem, Tournament,
    TournamentParticipant, TournamentStatus, TournamentUpdate, User, UserJob, UserUpdate,
    DEFAULT_JOB_RANK, DEFAULT_RARITY, UNLIMITED_STOCK,
};
pub use report::{
    EntryKind, FileCounts, FileReport, FileStage, FileStatus, MigrationReport, ReportEntry,
    RunPhase,
};
pub use store::{BotStore, StoreResult};

/// Identifies one migration run in the report, the log, and `migration_runs`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct RunId(pub Ulid);

impl RunId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for RunId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Jobs the bot ships with, seeded into an empty `jobs` table: `(name, min_pay, max_pay)`.
pub const DEFAULT_JOBS: [(&str, i64, i64); 4] = [
    ("Farmer", 200, 400),
    ("Blacksmith", 300, 500),
    ("Alchemist", 400, 600),
    ("Merchant", 600, 800),
];

/// Directory name for one run's legacy backups, `backup_YYYYMMDD_HHMMSS`.
#[must_use]
pub fn backup_dir_name(at: OffsetDateTime) -> String {
    format!(
        "backup_{:04}{:02}{:02}_{:02}{:02}{:02}",
        at.year(),
        u8::from(at.month()),
        at.day(),
        at.hour(),
        at.minute(),
        at.second()
    )
}
