//! Chunk-level progress tracking for uploads.

use std::fmt;
use std::time::{Duration, Instant};

/// Snapshot of an upload's progress after a chunk completed.
#[derive(Debug, Clone)]
pub struct TransferProgress {
    pub total_bytes: u64,
    pub transferred_bytes: u64,

    pub chunks_done: u32,
    pub total_chunks: u32,

    /// Speed of the most recent chunk in bytes/second
    pub bytes_per_second: u64,

    /// Estimated time remaining (seconds)
    pub eta_seconds: u64,
}

impl TransferProgress {
    pub fn new(total_bytes: u64, total_chunks: u32) -> Self {
        Self {
            total_bytes,
            transferred_bytes: 0,
            chunks_done: 0,
            total_chunks,
            bytes_per_second: 0,
            eta_seconds: 0,
        }
    }

    /// Percentage complete (0-100). An empty upload counts as complete.
    pub fn percent_complete(&self) -> f64 {
        if self.total_bytes == 0 {
            100.0
        } else {
            (self.transferred_bytes as f64 / self.total_bytes as f64) * 100.0
        }
    }

    pub fn is_complete(&self) -> bool {
        self.transferred_bytes >= self.total_bytes
    }
}

impl fmt::Display for TransferProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "chunk {}/{}: {} / {} ({:.1}%), {}, ETA {}",
            self.chunks_done,
            self.total_chunks,
            format_bytes(self.transferred_bytes),
            format_bytes(self.total_bytes),
            self.percent_complete(),
            format_speed(self.bytes_per_second),
            format_duration(self.eta_seconds)
        )
    }
}

/// Progress tracker with time-based speed calculation
pub struct ProgressTracker {
    start_time: Instant,
    last_update_time: Instant,
    progress: TransferProgress,
}

impl ProgressTracker {
    pub fn new(total_bytes: u64, total_chunks: u32) -> Self {
        let now = Instant::now();
        Self {
            start_time: now,
            last_update_time: now,
            progress: TransferProgress::new(total_bytes, total_chunks),
        }
    }

    /// Account for a finished chunk of `len` bytes and recompute speed and ETA.
    pub fn chunk_done(&mut self, len: u64) -> &TransferProgress {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update_time).as_secs_f64();

        if elapsed > 0.0 {
            self.progress.bytes_per_second = (len as f64 / elapsed) as u64;
        }

        self.progress.transferred_bytes += len;
        self.progress.chunks_done += 1;

        if self.progress.bytes_per_second > 0 {
            let remaining_bytes = self
                .progress
                .total_bytes
                .saturating_sub(self.progress.transferred_bytes);
            self.progress.eta_seconds = remaining_bytes / self.progress.bytes_per_second;
        }

        self.last_update_time = now;
        &self.progress
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Average speed since start
    pub fn average_speed(&self) -> u64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            (self.progress.transferred_bytes as f64 / elapsed) as u64
        } else {
            0
        }
    }

    pub fn progress(&self) -> &TransferProgress {
        &self.progress
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

pub fn format_speed(bytes_per_second: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_second))
}

pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}
