//! Archive construction.
//!
//! A source directory is written into a single archive file in one forward
//! pass. File contents are streamed from disk straight into the encoder, so
//! memory use does not depend on the size of the tree.
//!
//! Two archive kinds are supported:
//! - `tar`: a sequential stream, optionally wrapped in a gzip or zstd filter.
//!   The layering is file → compression filter → tar encoder.
//! - `zip`: per-entry headers, each entry either stored or deflated.

pub mod writer;

use crate::fs::walker::{walk_tree, EntryKind, TreeEntry};
use crate::utils::errors::{ArchiveError, ConfigError};
use chrono::{Datelike, Local, Timelike};
use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;
use std::time::SystemTime;
use tracing::{debug, warn};
use writer::CompressedWriter;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Default gzip/deflate level when the configuration does not set one.
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Zip entries at or above this size need zip64 headers.
const ZIP64_THRESHOLD: u64 = 0xFFFF_FFFF;

const WRITE_BUFFER_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Tar,
    Zip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Zstd,
    Deflate,
}

impl FromStr for ArchiveKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tar" => Ok(Self::Tar),
            "zip" => Ok(Self::Zip),
            _ => Err(ConfigError::UnknownArchive(s.to_string())),
        }
    }
}

impl FromStr for Compression {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Self::None),
            "gzip" => Ok(Self::Gzip),
            "zstd" => Ok(Self::Zstd),
            "deflate" => Ok(Self::Deflate),
            _ => Err(ConfigError::UnknownCompression(s.to_string())),
        }
    }
}

impl fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Tar => "tar",
            Self::Zip => "zip",
        })
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Gzip => "gzip",
            Self::Zstd => "zstd",
            Self::Deflate => "deflate",
        })
    }
}

/// A validated archive kind + compression pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveFormat {
    kind: ArchiveKind,
    compression: Compression,
    level: u32,
}

impl ArchiveFormat {
    pub fn new(kind: ArchiveKind, compression: Compression, level: u32) -> Result<Self, ConfigError> {
        let supported = matches!(
            (kind, compression),
            (ArchiveKind::Tar, Compression::None | Compression::Gzip | Compression::Zstd)
                | (ArchiveKind::Zip, Compression::None | Compression::Deflate)
        );
        if !supported {
            return Err(ConfigError::UnsupportedCompression {
                archive: kind.to_string(),
                compression: compression.to_string(),
            });
        }

        if !(1..=9).contains(&level) {
            return Err(ConfigError::Invalid(format!(
                "compression_level must be between 1 and 9, got {}",
                level
            )));
        }

        Ok(Self {
            kind,
            compression,
            level,
        })
    }

    /// Parse the configuration strings for archive kind and compression.
    pub fn parse(archive: &str, compression: &str, level: u32) -> Result<Self, ConfigError> {
        Self::new(archive.parse()?, compression.parse()?, level)
    }

    pub fn kind(&self) -> ArchiveKind {
        self.kind
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    /// File extension without the leading dot, e.g. `tar.zst`.
    pub fn extension(&self) -> &'static str {
        match (self.kind, self.compression) {
            (ArchiveKind::Tar, Compression::Gzip) => "tar.gz",
            (ArchiveKind::Tar, Compression::Zstd) => "tar.zst",
            (ArchiveKind::Tar, _) => "tar",
            (ArchiveKind::Zip, _) => "zip",
        }
    }
}

/// Counters for a finished archive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveStats {
    pub files: u64,
    pub directories: u64,
    pub skipped: u64,
    /// Bytes read from source files.
    pub source_bytes: u64,
    /// Size of the archive file on disk.
    pub archive_bytes: u64,
}

/// Write the tree under `source` into a new archive file at `output`.
///
/// Any error aborts the whole archive; the partially written `output` is left
/// for the caller to remove.
pub fn build_archive(
    source: &Path,
    output: &Path,
    format: ArchiveFormat,
) -> Result<ArchiveStats, ArchiveError> {
    let metadata = std::fs::metadata(source).map_err(|e| ArchiveError::Entry {
        path: source.to_path_buf(),
        source: e,
    })?;
    if !metadata.is_dir() {
        return Err(ArchiveError::Entry {
            path: source.to_path_buf(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "source is not a directory"),
        });
    }

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let file = File::create(output)?;
    let out = BufWriter::with_capacity(WRITE_BUFFER_SIZE, file);

    let mut stats = ArchiveStats::default();
    let out = match format.kind {
        ArchiveKind::Tar => write_tar(source, out, format, &mut stats)?,
        ArchiveKind::Zip => write_zip(source, out, format, &mut stats)?,
    };

    let file = out.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    stats.archive_bytes = file.metadata()?.len();

    debug!(
        "Archived {} files, {} directories ({} bytes) into {} ({} bytes)",
        stats.files,
        stats.directories,
        stats.source_bytes,
        output.display(),
        stats.archive_bytes
    );

    Ok(stats)
}

fn write_tar<W: Write>(
    source: &Path,
    out: W,
    format: ArchiveFormat,
    stats: &mut ArchiveStats,
) -> Result<W, ArchiveError> {
    let encoder = CompressedWriter::new(out, format.compression, format.level)?;
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    walk_tree(source, |entry: &TreeEntry| -> Result<(), ArchiveError> {
        match entry.kind {
            EntryKind::Directory => {
                builder
                    .append_dir(&entry.relative_path, &entry.path)
                    .map_err(|e| entry_error(entry, e))?;
                stats.directories += 1;
            }
            EntryKind::File => {
                let mut file = File::open(&entry.path).map_err(|e| entry_error(entry, e))?;
                builder
                    .append_file(&entry.relative_path, &mut file)
                    .map_err(|e| entry_error(entry, e))?;
                stats.files += 1;
                stats.source_bytes += entry.size;
            }
            EntryKind::Other => skip_entry(entry, stats, "not a regular file or directory"),
        }
        Ok(())
    })?;

    let encoder = builder.into_inner()?;
    Ok(encoder.finish()?)
}

fn write_zip<W: Write + io::Seek>(
    source: &Path,
    out: W,
    format: ArchiveFormat,
    stats: &mut ArchiveStats,
) -> Result<W, ArchiveError> {
    let mut zip = ZipWriter::new(out);

    let base_options = match format.compression {
        Compression::Deflate => FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(format.level as i32)),
        _ => FileOptions::default().compression_method(CompressionMethod::Stored),
    };

    walk_tree(source, |entry: &TreeEntry| -> Result<(), ArchiveError> {
        if entry.kind == EntryKind::Other {
            skip_entry(entry, stats, "not a regular file or directory");
            return Ok(());
        }
        let Some(name) = entry.archive_name() else {
            skip_entry(entry, stats, "name is not valid UTF-8");
            return Ok(());
        };

        let mut options = base_options.unix_permissions(entry.mode);
        if let Some(mtime) = entry.mtime.and_then(zip_time) {
            options = options.last_modified_time(mtime);
        }

        if entry.kind == EntryKind::Directory {
            zip.add_directory(name, options)?;
            stats.directories += 1;
        } else {
            let mut file = File::open(&entry.path).map_err(|e| entry_error(entry, e))?;
            zip.start_file(name, options.large_file(entry.size >= ZIP64_THRESHOLD))?;
            io::copy(&mut file, &mut zip).map_err(|e| entry_error(entry, e))?;
            stats.files += 1;
            stats.source_bytes += entry.size;
        }
        Ok(())
    })?;

    Ok(zip.finish()?)
}

fn entry_error(entry: &TreeEntry, source: io::Error) -> ArchiveError {
    ArchiveError::Entry {
        path: entry.path.clone(),
        source,
    }
}

fn skip_entry(entry: &TreeEntry, stats: &mut ArchiveStats, reason: &str) {
    warn!("Skipping {}: {}", entry.path.display(), reason);
    stats.skipped += 1;
}

/// Zip timestamps are local wall-clock time with 2 second resolution and
/// cannot go below 1980.
fn zip_time(mtime: SystemTime) -> Option<zip::DateTime> {
    let local: chrono::DateTime<Local> = mtime.into();
    zip::DateTime::from_date_and_time(
        u16::try_from(local.year()).ok()?,
        local.month() as u8,
        local.day() as u8,
        local.hour() as u8,
        local.minute() as u8,
        local.second() as u8,
    )
    .ok()
}
