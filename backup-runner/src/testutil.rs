//! In-process fake of the chunked-upload DAV endpoints.

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::Router;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub struct DavRequest {
    pub method: String,
    pub path: String,
    pub total_length: Option<String>,
    pub destination: Option<String>,
    pub overwrite: Option<String>,
    pub authorized: bool,
}

#[derive(Debug, Default)]
pub struct DavState {
    pub requests: Vec<DavRequest>,
    pub collections: HashSet<String>,
    /// Uploaded chunks per scratch collection, ordered by chunk name.
    pub chunks: HashMap<String, BTreeMap<String, Vec<u8>>>,
    /// Assembled files by request path.
    pub files: HashMap<String, Vec<u8>>,
    /// Chunk name (e.g. `00002`) whose PUT answers 500.
    pub fail_chunk: Option<String>,
}

impl DavState {
    pub fn methods(&self) -> Vec<String> {
        self.requests.iter().map(|r| r.method.clone()).collect()
    }
}

pub struct DavServer {
    pub base_url: String,
    pub state: Arc<Mutex<DavState>>,
}

impl DavServer {
    pub async fn start() -> Self {
        Self::start_with(DavState::default()).await
    }

    pub async fn start_with(state: DavState) -> Self {
        let state = Arc::new(Mutex::new(state));
        let app = Router::new()
            .fallback(handle)
            .layer(DefaultBodyLimit::disable())
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            state,
        }
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, DavState> {
        self.state.lock().unwrap()
    }
}

/// A URL nothing listens on.
pub async fn closed_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

fn split_parent(path: &str) -> (&str, &str) {
    path.rsplit_once('/').unwrap_or(("", path))
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn handle(
    State(state): State<Arc<Mutex<DavState>>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let mut state = state.lock().unwrap();
    let path = uri.path().trim_end_matches('/').to_string();
    let destination = header(&headers, "destination");

    state.requests.push(DavRequest {
        method: method.as_str().to_string(),
        path: path.clone(),
        total_length: header(&headers, "oc-total-length"),
        destination: destination.clone(),
        overwrite: header(&headers, "overwrite"),
        authorized: headers.contains_key("authorization"),
    });

    match method.as_str() {
        "MKCOL" => {
            state.collections.insert(path);
            StatusCode::CREATED
        }
        "PUT" => {
            let (parent, name) = split_parent(&path);
            if state.fail_chunk.as_deref() == Some(name) {
                return StatusCode::INTERNAL_SERVER_ERROR;
            }
            if !state.collections.contains(parent) {
                return StatusCode::CONFLICT;
            }
            let parent = parent.to_string();
            state
                .chunks
                .entry(parent)
                .or_default()
                .insert(name.to_string(), body.to_vec());
            StatusCode::CREATED
        }
        "MOVE" => {
            let (scratch, name) = split_parent(&path);
            let Some(target) = destination.and_then(|d| d.parse::<Uri>().ok()) else {
                return StatusCode::BAD_REQUEST;
            };
            if name != ".file" || !state.collections.contains(scratch) {
                return StatusCode::NOT_FOUND;
            }
            let scratch = scratch.to_string();
            let assembled: Vec<u8> = state
                .chunks
                .remove(&scratch)
                .unwrap_or_default()
                .into_values()
                .flatten()
                .collect();
            state.collections.remove(&scratch);
            state.files.insert(target.path().to_string(), assembled);
            StatusCode::CREATED
        }
        "DELETE" => {
            state.chunks.remove(&path);
            if state.collections.remove(&path) {
                StatusCode::NO_CONTENT
            } else {
                StatusCode::NOT_FOUND
            }
        }
        _ => StatusCode::METHOD_NOT_ALLOWED,
    }
}
