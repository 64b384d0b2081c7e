//! backup-runner library
//!
//! Archives configured directories, ships the archives to a remote store and
//! keeps a ledger of completed backups.

pub mod archive;
pub mod config;
pub mod executor;
pub mod fs;
pub mod ledger;
pub mod remote;
pub mod systemd;
pub mod transfer;
pub mod utils;

#[cfg(test)]
mod testutil;

// Re-export commonly used types
pub use config::Config;
pub use executor::{BackupExecutor, RunSummary, TargetOutcome, TargetStatus};
pub use ledger::{BackupRecord, Ledger};
