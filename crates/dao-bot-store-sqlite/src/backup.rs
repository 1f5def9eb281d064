//! Verified copies of legacy files, taken before anything is written to the database.

use std::fs;
use std::path::{Path, PathBuf};

use dao_bot_core::{backup_dir_name, BackupError};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

/// A backup whose copy matched the source bytes. `bytes` is what the migrator transforms.
#[derive(Debug, Clone)]
pub struct VerifiedBackup {
    pub source: PathBuf,
    pub backup: PathBuf,
    pub bytes: Vec<u8>,
    pub sha256: String,
}

#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Create `<root>/backup_<YYYYMMDD_HHMMSS>`, adding a numeric suffix if that name is taken.
///
/// # Errors
/// Returns [`BackupError::Io`] when the directory cannot be created.
pub fn create_backup_dir(root: &Path, at: OffsetDateTime) -> Result<PathBuf, BackupError> {
    let base = backup_dir_name(at);
    let mut candidate = root.join(&base);
    let mut suffix = 1_u32;
    while candidate.exists() {
        candidate = root.join(format!("{base}_{suffix}"));
        suffix += 1;
    }

    fs::create_dir_all(&candidate).map_err(|err| BackupError::Io {
        action: "create backup directory",
        path: candidate.clone(),
        message: err.to_string(),
    })?;
    Ok(candidate)
}

/// Read `source` once, write it into `backup_dir`, and verify the copy by length and SHA-256.
///
/// # Errors
/// Returns [`BackupError::Io`] on any read or write failure and
/// [`BackupError::Verification`] when the copy differs from the bytes read.
pub fn backup_legacy_file(source: &Path, backup_dir: &Path) -> Result<VerifiedBackup, BackupError> {
    let io = |action: &'static str, path: &Path| {
        let path = path.to_path_buf();
        move |err: std::io::Error| BackupError::Io { action, path, message: err.to_string() }
    };

    let bytes = fs::read(source).map_err(io("read", source))?;
    let file_name = source.file_name().ok_or_else(|| BackupError::Io {
        action: "name backup of",
        path: source.to_path_buf(),
        message: "path has no file name".to_string(),
    })?;
    let target = backup_dir.join(file_name);

    fs::write(&target, &bytes).map_err(io("write", &target))?;
    let copy = fs::read(&target).map_err(io("read back", &target))?;

    let expected_sha256 = sha256_hex(&bytes);
    let actual_sha256 = sha256_hex(&copy);
    if copy.len() != bytes.len() || expected_sha256 != actual_sha256 {
        return Err(BackupError::Verification {
            path: target,
            expected_len: bytes.len(),
            actual_len: copy.len(),
            expected_sha256,
            actual_sha256,
        });
    }

    Ok(VerifiedBackup { source: source.to_path_buf(), backup: target, bytes, sha256: expected_sha256 })
}
