//! Moving finished archives to remote storage.

pub mod chunked;
pub mod progress;

use crate::utils::errors::UploadError;
use reqwest::Url;

pub use chunked::{plan_chunks, ChunkSpec, ChunkedUploader, UploadSession, DEFAULT_CHUNK_SIZE};
pub use progress::{format_bytes, format_duration, format_speed, ProgressTracker, TransferProgress};

pub fn parse_url(raw: &str) -> Result<Url, UploadError> {
    Url::parse(raw).map_err(|e| UploadError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })
}

/// Append the `/` separated segments of `path` to `base`.
///
/// Empty segments are skipped, so `dest_dir` values with leading, trailing
/// or doubled slashes all produce the same URL. Segments are percent-encoded.
pub fn join_url(base: &Url, path: &str) -> Result<Url, UploadError> {
    let mut url = base.clone();
    {
        let mut segments = url.path_segments_mut().map_err(|_| UploadError::InvalidUrl {
            url: base.to_string(),
            reason: "URL cannot have a path".to_string(),
        })?;
        segments
            .pop_if_empty()
            .extend(path.split('/').filter(|segment| !segment.is_empty()));
    }
    Ok(url)
}
