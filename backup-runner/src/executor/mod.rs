//! Backup run orchestration.
//!
//! A run walks the requested targets one after the other: build the archive,
//! ship it to the target's remote, record the result in the ledger. A broken
//! target never stops the batch; only ledger failures end the run early,
//! because a run that cannot record its backups should not keep producing
//! them. The retention sweep runs once after the batch.

use crate::archive::{build_archive, ArchiveFormat, ArchiveStats};
use crate::config::Config;
use crate::ledger::{BackupRecord, Ledger};
use crate::remote;
use crate::transfer::format_bytes;
use crate::utils::errors::{ArchiveError, ConfigError, LedgerError};
use crate::utils::ids::backup_id;
use chrono::{DateTime, Local, TimeZone, Utc};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// How a single target ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetStatus {
    Uploaded { location: String },
    UploadFailed { error: String },
    BuildFailed { error: String },
}

#[derive(Debug, Clone)]
pub struct TargetOutcome {
    pub target: String,
    pub id: String,
    pub archive: PathBuf,
    pub status: TargetStatus,
    pub duration: Duration,
}

impl TargetOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.status, TargetStatus::Uploaded { .. })
    }
}

/// Result of a whole run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub outcomes: Vec<TargetOutcome>,
    /// Ledger entries removed by the retention sweep, `None` if it did not run.
    pub swept: Option<usize>,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(TargetOutcome::is_success)
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_success()).count()
    }
}

/// Archive file name: `{target}-{day}{Mon}{year}-{id}.{ext}`, e.g.
/// `docs-5Mar2024-k3j9x0qa.tar.gz`. The day is taken in `date`'s own zone.
pub fn archive_file_name<Tz>(target: &str, date: DateTime<Tz>, id: &str, extension: &str) -> String
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    format!("{}-{}-{}.{}", target, date.format("%-d%b%Y"), id, extension)
}

pub struct BackupExecutor {
    config: Config,
    format: ArchiveFormat,
    ledger: Ledger,
}

impl BackupExecutor {
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        let format = config.archive_format()?;
        let ledger = Ledger::new(
            config.state_dir(),
            config.backup_list.enabled,
            config.retention()?,
        );

        Ok(Self {
            config,
            format,
            ledger,
        })
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Back up `targets` in order.
    pub async fn run(&self, targets: &[String]) -> Result<RunSummary, LedgerError> {
        info!(
            "Starting backup of {} target(s): {}",
            targets.len(),
            targets.join(", ")
        );

        let mut summary = RunSummary::default();
        for target in targets {
            let outcome = self.backup_target(target).await?;
            summary.outcomes.push(outcome);
        }

        summary.swept = self.with_ledger(|ledger| ledger.sweep()).await?;

        info!(
            "Backup run finished: {} succeeded, {} failed",
            summary.outcomes.len() - summary.failed_count(),
            summary.failed_count()
        );
        Ok(summary)
    }

    async fn backup_target(&self, name: &str) -> Result<TargetOutcome, LedgerError> {
        let start_time = Instant::now();
        let id = backup_id(self.config.id_length);
        let file_name = archive_file_name(name, Local::now(), &id, self.format.extension());
        let archive = self.config.archive_dir.join(&file_name);

        let mut outcome = TargetOutcome {
            target: name.to_string(),
            id: id.clone(),
            archive: archive.clone(),
            status: TargetStatus::BuildFailed {
                error: String::new(),
            },
            duration: Duration::ZERO,
        };

        let Some(target) = self.config.targets.get(name) else {
            error!("Target \"{}\" is not configured", name);
            outcome.status = TargetStatus::BuildFailed {
                error: "target is not configured".to_string(),
            };
            return Ok(outcome);
        };

        info!("Archiving {} into {}", target.path.display(), archive.display());
        match self.build(&target.path, &archive).await {
            Ok(stats) => info!(
                "Archived {}: {} files, {} directories, {} ({} on disk)",
                name,
                stats.files,
                stats.directories,
                format_bytes(stats.source_bytes),
                format_bytes(stats.archive_bytes)
            ),
            Err(e) => {
                error!("Failed to archive target \"{}\": {}", name, e);
                remove_archive(&archive).await;
                outcome.status = TargetStatus::BuildFailed {
                    error: e.to_string(),
                };
                outcome.duration = start_time.elapsed();
                log_outcome(&outcome);
                return Ok(outcome);
            }
        }

        let upload = match self.config.remotes.get(&target.remote) {
            Some(remote) => remote::upload(&target.remote, remote, &archive, &file_name)
                .await
                .map_err(|e| e.to_string()),
            None => Err(format!("remote \"{}\" is not configured", target.remote)),
        };

        let location = match upload {
            Ok(location) => {
                if self.config.delete_after_upload {
                    remove_archive(&archive).await;
                }
                outcome.status = TargetStatus::Uploaded {
                    location: location.clone(),
                };
                Some(location)
            }
            Err(e) => {
                error!(
                    "Failed to upload {} to remote \"{}\": {}. The archive is kept at {}",
                    file_name,
                    target.remote,
                    e,
                    archive.display()
                );
                outcome.status = TargetStatus::UploadFailed { error: e };
                None
            }
        };

        let record = BackupRecord::new(id, target.remote.clone(), location, Utc::now());
        self.with_ledger(move |ledger| ledger.append(record)).await?;

        outcome.duration = start_time.elapsed();
        log_outcome(&outcome);
        Ok(outcome)
    }

    async fn build(&self, source: &Path, output: &Path) -> Result<ArchiveStats, ArchiveError> {
        let source = source.to_path_buf();
        let output = output.to_path_buf();
        let format = self.format;

        tokio::task::spawn_blocking(move || build_archive(&source, &output, format))
            .await
            .map_err(|e| ArchiveError::Worker(e.to_string()))?
    }

    /// Run a ledger operation on the blocking pool; it may wait on the lock.
    async fn with_ledger<T, F>(&self, op: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&Ledger) -> Result<T, LedgerError> + Send + 'static,
        T: Send + 'static,
    {
        let ledger = self.ledger.clone();
        tokio::task::spawn_blocking(move || op(&ledger))
            .await
            .map_err(|e| LedgerError::Worker(e.to_string()))?
    }
}

async fn remove_archive(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => info!("Removed {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Unable to remove {}: {}", path.display(), e),
    }
}

fn log_outcome(outcome: &TargetOutcome) {
    let elapsed = format!("{:.1}s", outcome.duration.as_secs_f64());
    match &outcome.status {
        TargetStatus::Uploaded { location } => info!(
            target_name = %outcome.target,
            id = %outcome.id,
            %elapsed,
            %location,
            "Backup of {} completed", outcome.target
        ),
        TargetStatus::UploadFailed { error } => warn!(
            target_name = %outcome.target,
            id = %outcome.id,
            %elapsed,
            %error,
            "Backup of {} was archived but not uploaded", outcome.target
        ),
        TargetStatus::BuildFailed { error } => error!(
            target_name = %outcome.target,
            id = %outcome.id,
            %elapsed,
            %error,
            "Backup of {} failed", outcome.target
        ),
    }
}
