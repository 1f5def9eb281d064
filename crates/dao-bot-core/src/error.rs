use std::path::PathBuf;

use crate::report::MigrationReport;

/// A legacy file that was not found. Never fatal: its tables are simply left empty.
#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
#[error("legacy file {file} not found in {dir}; its tables are left empty")]
pub struct DiscoveryWarning {
    pub file: String,
    pub dir: PathBuf,
}

/// Backup of one legacy file failed or could not be verified. Fatal to that file only.
#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum BackupError {
    #[error("failed to {action} {}: {message}", .path.display())]
    Io { action: &'static str, path: PathBuf, message: String },
    #[error(
        "backup {} does not match its source (expected {expected_len} bytes sha256:{expected_sha256}, got {actual_len} bytes sha256:{actual_sha256})",
        .path.display()
    )]
    Verification {
        path: PathBuf,
        expected_len: usize,
        actual_len: usize,
        expected_sha256: String,
        actual_sha256: String,
    },
}

/// The top level of a legacy file could not be read as records. Fatal to that file.
#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
#[error("failed to parse {file}: {message}")]
pub struct ParseError {
    pub file: String,
    pub message: String,
}

/// One legacy record did not satisfy its table's record schema. Fatal to that record only.
#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum RecordError {
    #[error("record is not a JSON object")]
    NotAnObject,
    #[error("record has no usable `{0}` identifier")]
    MissingKey(&'static str),
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("field `{field}` is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl RecordError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField { field, reason: reason.into() }
    }
}

/// The database schema cannot be created or does not match. Fatal to the whole run.
#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum SchemaError {
    #[error(
        "table `{table}` conflicts with the expected schema (missing columns: {missing:?}, unexpected columns: {unexpected:?})"
    )]
    Conflict { table: String, missing: Vec<String>, unexpected: Vec<String> },
    #[error("unsupported schema version {found}; this build supports up to {supported}")]
    UnsupportedVersion { found: i64, supported: i64 },
    #[error("{context}: {message}")]
    Storage { context: &'static str, message: String },
}

/// Writing one file's batch failed; the transaction was rolled back. Fatal to that file.
#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
#[error("failed to load {file}: {message}")]
pub struct LoadError {
    pub file: String,
    pub message: String,
}

/// Run-level failures. Per-file failures are recorded in the report instead.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("legacy directory {} is not usable: {message}", .path.display())]
    LegacyDir { path: PathBuf, message: String },
    /// Every file was processed but the run could not be written to `migration_runs`.
    /// The report is carried along so it can still be logged.
    #[error("{message}")]
    Ledger { message: String, report: Box<MigrationReport> },
}

impl MigrationError {
    /// The finished report, when the failure happened after all files were processed.
    #[must_use]
    pub fn report(&self) -> Option<&MigrationReport> {
        match self {
            Self::Ledger { report, .. } => Some(report.as_ref()),
            Self::Schema(_) | Self::LegacyDir { .. } => None,
        }
    }
}

/// Errors surfaced by [`crate::BotStore`] implementations.
#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    Invalid(String),
    #[error("storage error: {0}")]
    Storage(String),
}
