//! Backup ledger: a JSON list of completed backups with time-based retention.
//!
//! Every operation is a full read-modify-write of `backuplist.json` performed
//! while holding an exclusive `flock` on `backuplist.json.lock`, so separate
//! runs (e.g. two timers firing at once) never lose each other's records.
//! All methods block; async callers go through `spawn_blocking`.

pub mod lock;
pub mod retention;

use crate::utils::errors::LedgerError;
use chrono::{DateTime, SecondsFormat, Utc};
use lock::LedgerLock;
use retention::{retain_newer, RetentionSpec};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const LEDGER_FILE_NAME: &str = "backuplist.json";

/// One completed backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BackupRecord {
    pub id: String,
    /// Name of the remote the target is assigned to.
    pub remote: String,
    /// Final remote location, empty when the upload failed.
    pub file_path: String,
    /// RFC 3339 completion time.
    pub date: String,
}

impl BackupRecord {
    pub fn new(
        id: impl Into<String>,
        remote: impl Into<String>,
        file_path: Option<String>,
        date: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            remote: remote.into(),
            file_path: file_path.unwrap_or_default(),
            date: date.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

/// Handle on the ledger stored in a state directory.
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
    lock_path: PathBuf,
    enabled: bool,
    retention: Option<RetentionSpec>,
}

impl Ledger {
    /// `retention` of `None` disables the sweep.
    pub fn new(state_dir: &Path, enabled: bool, retention: Option<RetentionSpec>) -> Self {
        let path = state_dir.join(LEDGER_FILE_NAME);
        let lock_path = state_dir.join(format!("{}.lock", LEDGER_FILE_NAME));
        Self {
            path,
            lock_path,
            enabled,
            retention,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn append(&self, record: BackupRecord) -> Result<(), LedgerError> {
        if !self.enabled {
            debug!("Backup list disabled, not recording backup {}", record.id);
            return Ok(());
        }

        let _lock = LedgerLock::acquire(&self.lock_path)?;
        let mut records = self.read()?.unwrap_or_default();
        debug!("Recording backup {} ({} existing entries)", record.id, records.len());
        records.push(record);
        self.write(&records)
    }

    /// Drop records older than the retention period.
    ///
    /// Returns the number of removed records, `None` when nothing was swept.
    pub fn sweep(&self) -> Result<Option<usize>, LedgerError> {
        self.sweep_at(Utc::now())
    }

    pub fn sweep_at(&self, now: DateTime<Utc>) -> Result<Option<usize>, LedgerError> {
        let Some(retention) = self.retention.as_ref().filter(|_| self.enabled) else {
            return Ok(None);
        };

        let _lock = LedgerLock::acquire(&self.lock_path)?;
        let Some(records) = self.read()? else {
            debug!("No backup list at {}, nothing to clean", self.path.display());
            return Ok(None);
        };

        let cutoff = retention.cutoff(now);
        let before = records.len();
        let kept = retain_newer(records, cutoff);
        let removed = before - kept.len();
        self.write(&kept)?;

        info!(
            "Cleaned backup list: removed {} of {} entries older than {} ({})",
            removed,
            before,
            retention,
            cutoff.to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        Ok(Some(removed))
    }

    /// Current contents, read under the lock.
    pub fn records(&self) -> Result<Vec<BackupRecord>, LedgerError> {
        let _lock = LedgerLock::acquire(&self.lock_path)?;
        Ok(self.read()?.unwrap_or_default())
    }

    /// `None` when the file does not exist yet. A JSON `null` reads as empty.
    fn read(&self) -> Result<Option<Vec<BackupRecord>>, LedgerError> {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(LedgerError::Read {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };

        let records: Option<Vec<BackupRecord>> =
            serde_json::from_slice(&data).map_err(|e| LedgerError::Parse {
                path: self.path.clone(),
                source: e,
            })?;
        Ok(Some(records.unwrap_or_default()))
    }

    fn write(&self, records: &[BackupRecord]) -> Result<(), LedgerError> {
        let data = serde_json::to_vec_pretty(records).map_err(LedgerError::Encode)?;
        let tmp_path = self.path.with_extension("json.tmp");
        let write_error = |source: std::io::Error| LedgerError::Write {
            path: self.path.clone(),
            source,
        };

        let mut file = File::create(&tmp_path).map_err(write_error)?;
        file.write_all(&data).map_err(write_error)?;
        file.sync_all().map_err(write_error)?;
        drop(file);

        std::fs::rename(&tmp_path, &self.path).map_err(write_error)
    }
}
