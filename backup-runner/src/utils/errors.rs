//! Error types for the backup runner.
//!
//! Each failure class has its own enum because the run orchestrator treats
//! them differently: configuration and ledger errors end the run, archive
//! errors abort a single target and upload errors are only logged.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Configuration file not found (tried {0:?})")]
    NotFound(Vec<PathBuf>),

    #[error("Unknown archive format \"{0}\"")]
    UnknownArchive(String),

    #[error("Unknown compression \"{0}\"")]
    UnknownCompression(String),

    #[error("Compression \"{compression}\" is not supported for {archive} archives")]
    UnsupportedCompression { archive: String, compression: String },

    #[error("Invalid retention spec \"{spec}\": {reason}")]
    Retention { spec: String, reason: String },

    #[error("Unable to read password file for remote \"{remote}\": {source}")]
    PasswordFile {
        remote: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unknown target \"{0}\"")]
    UnknownTarget(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to walk source tree: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Failed to write zip entry: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Failed to archive {path}: {source}")]
    Entry {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Archive worker failed: {0}")]
    Worker(String),
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Invalid HTTP method {0}")]
    InvalidMethod(String),

    #[error("{method} {url} returned {status}")]
    Status {
        method: String,
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("Failed to create chunk folder: {0}")]
    Session(#[source] Box<UploadError>),

    #[error("Failed to upload chunk {index} ({offset} bytes transferred before it): {source}")]
    Chunk {
        index: u32,
        /// Byte offset reached by the last successfully uploaded chunk.
        offset: u64,
        #[source]
        source: Box<UploadError>,
    },

    #[error("Failed to assemble file chunks: {0}")]
    Assemble(#[source] Box<UploadError>),

    #[error("Failed to start upload helper \"{script}\": {source}")]
    HelperSpawn {
        script: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Upload helper \"{script}\" exited with {status}")]
    HelperExit { script: String, status: String },
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Unable to obtain ledger lock {path}: {reason}")]
    Lock { path: PathBuf, reason: String },

    #[error("Unable to read ledger {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unable to parse ledger {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unable to encode ledger: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Unable to write ledger {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Ledger worker failed: {0}")]
    Worker(String),
}
