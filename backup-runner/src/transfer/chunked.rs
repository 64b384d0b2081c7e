//! Chunked upload over WebDAV (Nextcloud chunking).
//!
//! A file is pushed in three steps:
//!
//! 1. `MKCOL {dav}/uploads/{user}/backup-runner-{uuid}` creates a scratch
//!    collection private to this upload.
//! 2. Each chunk is `PUT` to `{scratch}/{index:05}`, indices starting at 1.
//! 3. `MOVE {scratch}/.file` to `{dav}/files/{user}/{dest_dir}/{name}` makes
//!    the server assemble the chunks in name order into the final file.
//!
//! Every request carries `OC-Total-Length` and `Destination` so the server
//! can check quota and the final path up front. Uploads are not resumable: a
//! failed chunk aborts the upload and the scratch collection is deleted.

use super::progress::{format_bytes, format_speed, ProgressTracker};
use super::{join_url, parse_url};
use crate::utils::errors::UploadError;
use bytes::Bytes;
use reqwest::{Client, Method, RequestBuilder, Response, Url};
use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 50 MiB
pub const DEFAULT_CHUNK_SIZE: u64 = 50 * 1024 * 1024;

const SCRATCH_PREFIX: &str = "backup-runner";
const DAV_PATH: &str = "remote.php/dav";

/// One contiguous byte range of the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpec {
    /// 1-based position, also the chunk's name on the server.
    pub index: u32,
    pub offset: u64,
    pub len: u64,
}

impl ChunkSpec {
    pub fn name(&self) -> String {
        format!("{:05}", self.index)
    }

    pub fn end(&self) -> u64 {
        self.offset + self.len
    }
}

/// Split `total` bytes into chunks of `chunk_size` (the last may be shorter).
///
/// A zero `chunk_size` is treated as 1. An empty file has no chunks.
pub fn plan_chunks(total: u64, chunk_size: u64) -> Vec<ChunkSpec> {
    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::with_capacity(total.div_ceil(chunk_size) as usize);
    let mut offset = 0;
    let mut index = 1;

    while offset < total {
        let len = chunk_size.min(total - offset);
        chunks.push(ChunkSpec { index, offset, len });
        offset += len;
        index += 1;
    }

    chunks
}

/// State of one in-flight upload. Never persisted.
#[derive(Debug)]
pub struct UploadSession {
    pub scratch: Url,
    pub destination: Url,
    pub total_length: u64,
    pub chunks: Vec<ChunkSpec>,
    /// Bytes acknowledged by the server so far.
    pub offset: u64,
}

impl UploadSession {
    fn chunk_url(&self, chunk: &ChunkSpec) -> Result<Url, UploadError> {
        join_url(&self.scratch, &chunk.name())
    }

    fn assembly_url(&self) -> Result<Url, UploadError> {
        join_url(&self.scratch, ".file")
    }
}

/// Client for one chunked-upload remote.
#[derive(Debug, Clone)]
pub struct ChunkedUploader {
    client: Client,
    dav_root: Url,
    user: String,
    password: Option<String>,
    dest_dir: String,
    chunk_size: u64,
}

impl ChunkedUploader {
    pub fn new(
        root: &str,
        user: &str,
        password: Option<&str>,
        dest_dir: &str,
        chunk_size: u64,
    ) -> Result<Self, UploadError> {
        let dav_root = join_url(&parse_url(root)?, DAV_PATH)?;
        Ok(Self {
            client: Client::new(),
            dav_root,
            user: user.to_string(),
            password: password.map(str::to_string),
            dest_dir: dest_dir.to_string(),
            chunk_size: chunk_size.max(1),
        })
    }

    /// Final location of `file_name` on the remote.
    pub fn destination_url(&self, file_name: &str) -> Result<Url, UploadError> {
        let files = join_url(&self.dav_root, &format!("files/{}", self.user))?;
        join_url(&join_url(&files, &self.dest_dir)?, file_name)
    }

    fn new_session(&self, file_name: &str, total_length: u64) -> Result<UploadSession, UploadError> {
        let scratch_name = format!("{}-{}", SCRATCH_PREFIX, Uuid::new_v4().simple());
        let uploads = join_url(&self.dav_root, &format!("uploads/{}", self.user))?;

        Ok(UploadSession {
            scratch: join_url(&uploads, &scratch_name)?,
            destination: self.destination_url(file_name)?,
            total_length,
            chunks: plan_chunks(total_length, self.chunk_size),
            offset: 0,
        })
    }

    /// Upload `local` as `file_name` and return its final URL.
    pub async fn upload(&self, local: &Path, file_name: &str) -> Result<String, UploadError> {
        let total_length = tokio::fs::metadata(local).await?.len();
        let mut session = self.new_session(file_name, total_length)?;

        info!(
            "Uploading {} ({}) in {} chunk(s) to {}",
            local.display(),
            format_bytes(total_length),
            session.chunks.len(),
            session.destination
        );

        self.send(self.request(dav_method("MKCOL")?, &session.scratch, &session))
            .await
            .map_err(|e| UploadError::Session(Box::new(e)))?;
        debug!("Created scratch collection {}", session.scratch);

        if let Err(e) = self.transfer(local, &mut session).await {
            self.discard(&session).await;
            return Err(e);
        }

        Ok(session.destination.to_string())
    }

    async fn transfer(&self, local: &Path, session: &mut UploadSession) -> Result<(), UploadError> {
        let file = Arc::new(File::open(local)?);
        let mut tracker = ProgressTracker::new(session.total_length, session.chunks.len() as u32);

        for chunk in session.chunks.clone() {
            if let Err(e) = self.put_chunk(&file, &chunk, session).await {
                return Err(UploadError::Chunk {
                    index: chunk.index,
                    offset: session.offset,
                    source: Box::new(e),
                });
            }
            session.offset = chunk.end();
            info!("Uploading {}: {}", file_name(local), tracker.chunk_done(chunk.len));
        }
        drop(file);

        let assembly = session.assembly_url()?;
        self.send(
            self.request(dav_method("MOVE")?, &assembly, session)
                .header("Overwrite", "T"),
        )
        .await
        .map_err(|e| UploadError::Assemble(Box::new(e)))?;

        info!(
            "Uploaded {} in {:.1}s ({} average)",
            session.destination,
            tracker.elapsed().as_secs_f64(),
            format_speed(tracker.average_speed())
        );
        Ok(())
    }

    async fn put_chunk(
        &self,
        file: &Arc<File>,
        chunk: &ChunkSpec,
        session: &UploadSession,
    ) -> Result<(), UploadError> {
        let body = read_chunk(Arc::clone(file), *chunk).await?;
        let url = session.chunk_url(chunk)?;
        self.send(self.request(Method::PUT, &url, session).body(body))
            .await
            .map(drop)
    }

    /// Best-effort removal of the scratch collection after a failure.
    async fn discard(&self, session: &UploadSession) {
        let request = self.request(Method::DELETE, &session.scratch, session);
        match self.send(request).await {
            Ok(_) => debug!("Removed scratch collection {}", session.scratch),
            Err(e) => warn!(
                "Unable to remove scratch collection {}: {}",
                session.scratch, e
            ),
        }
    }

    fn request(&self, method: Method, url: &Url, session: &UploadSession) -> RequestBuilder {
        self.client
            .request(method, url.clone())
            .basic_auth(&self.user, self.password.as_ref())
            .header("OC-Total-Length", session.total_length.to_string())
            .header("Destination", session.destination.as_str())
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, UploadError> {
        let (client, request) = request.build_split();
        let request = request?;
        let method = request.method().to_string();
        let url = request.url().to_string();

        let response = client.execute(request).await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(UploadError::Status {
                method,
                url,
                status: response.status(),
            })
        }
    }
}

fn dav_method(name: &str) -> Result<Method, UploadError> {
    Method::from_bytes(name.as_bytes()).map_err(|_| UploadError::InvalidMethod(name.to_string()))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

async fn read_chunk(file: Arc<File>, chunk: ChunkSpec) -> Result<Bytes, UploadError> {
    let buf = tokio::task::spawn_blocking(move || {
        let mut buf = vec![0u8; chunk.len as usize];
        file.read_exact_at(&mut buf, chunk.offset)?;
        Ok::<_, std::io::Error>(buf)
    })
    .await
    .map_err(|e| std::io::Error::other(e.to_string()))??;

    Ok(Bytes::from(buf))
}
