//! Utility modules for the backup runner.

pub mod errors;
pub mod ids;
pub mod logger;

pub use errors::{ArchiveError, ConfigError, LedgerError, UploadError};
