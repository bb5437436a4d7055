//! Upload sessions
//!
//! Foreign callers upload either by pushing chunks into an open session
//! and finalizing, or by pointing the session at a file. Sessions are
//! keyed by an opaque id; operations within one session are serialized,
//! distinct sessions do not interfere.

use crate::engine::{NodeEngine, StoreParams};
use bytes::Bytes;
use nebula_core::cid::Cid;
use nebula_core::error::{NebulaError, Result};
use nebula_core::DEFAULT_BLOCK_SIZE;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Upload session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Open,
    Finalizing,
    Cancelled,
    Completed,
}

struct UploadSession {
    /// Absolute path for file uploads, or just a name for chunked uploads.
    name: String,
    /// Transport chunk size chosen at init.
    chunk_size: usize,
    /// Bytes accumulated through `chunk`.
    buffer: Vec<u8>,
    state: UploadState,
}

impl UploadSession {
    fn require_open(&self) -> Result<()> {
        if self.state != UploadState::Open {
            return Err(NebulaError::InvalidState(format!(
                "upload session is {:?}",
                self.state
            )));
        }
        Ok(())
    }
}

/// Manages upload sessions on top of the node engine.
pub struct UploadManager {
    engine: Arc<NodeEngine>,
    sessions: Mutex<HashMap<String, Arc<tokio::sync::Mutex<UploadSession>>>>,
}

impl UploadManager {
    pub fn new(engine: Arc<NodeEngine>) -> Self {
        Self {
            engine,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Open a session. `filepath` is the file to upload for
    /// [`UploadManager::upload_file`], or a display name for chunked
    /// uploads; metadata is derived from it. A zero `chunk_size` selects
    /// the default block size.
    pub fn init(&self, filepath: &str, chunk_size: usize) -> Result<String> {
        if filepath.is_empty() {
            return Err(NebulaError::InvalidArgument(
                "filepath must not be empty".to_string(),
            ));
        }
        let chunk_size = if chunk_size == 0 {
            DEFAULT_BLOCK_SIZE
        } else {
            chunk_size
        };
        let id = Uuid::new_v4().to_string();
        let session = UploadSession {
            name: filepath.to_string(),
            chunk_size,
            buffer: Vec::new(),
            state: UploadState::Open,
        };
        self.sessions
            .lock()
            .insert(id.clone(), Arc::new(tokio::sync::Mutex::new(session)));
        debug!(session = %id, filepath, chunk_size, "Upload session opened");
        Ok(id)
    }

    fn session(&self, id: &str) -> Result<Arc<tokio::sync::Mutex<UploadSession>>> {
        self.sessions
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| NebulaError::NotFound(format!("upload session {}", id)))
    }

    /// Append a chunk to an open session.
    pub async fn chunk(&self, id: &str, data: &[u8]) -> Result<()> {
        let session = self.session(id)?;
        let mut session = session.lock().await;
        session.require_open()?;
        session.buffer.extend_from_slice(data);
        Ok(())
    }

    /// Drive the buffered bytes through the engine and complete the
    /// session, returning the manifest CID.
    pub async fn finalize(&self, id: &str) -> Result<Cid> {
        let session = self.session(id)?;
        let mut session = session.lock().await;
        session.require_open()?;
        session.state = UploadState::Finalizing;

        let data = std::mem::take(&mut session.buffer);
        let params = store_params(&session.name);
        let result = self
            .engine
            .store(std::io::Cursor::new(data), params, None)
            .await;

        match result {
            Ok(cid) => {
                session.state = UploadState::Completed;
                debug!(session = %id, cid = %cid, "Upload finalized");
                Ok(cid)
            }
            Err(e) => {
                // Buffered bytes are gone; the session cannot be resumed.
                session.state = UploadState::Cancelled;
                Err(e)
            }
        }
    }

    /// Upload the file named at init, with optional per-block progress.
    /// Progress is emitted only when the storage block size does not
    /// exceed the session chunk size, to avoid over-chunked reporting.
    pub async fn upload_file(
        &self,
        id: &str,
        progress: Option<&(dyn Fn(u64, &Bytes) + Send + Sync)>,
    ) -> Result<Cid> {
        let session = self.session(id)?;
        let mut session = session.lock().await;
        session.require_open()?;
        session.state = UploadState::Finalizing;

        let file = match tokio::fs::File::open(&session.name).await {
            Ok(file) => file,
            Err(e) => {
                session.state = UploadState::Cancelled;
                return Err(NebulaError::IoFailure(format!(
                    "cannot open {}: {}",
                    session.name, e
                )));
            }
        };

        let hook = if DEFAULT_BLOCK_SIZE <= session.chunk_size {
            progress
        } else {
            None
        };

        let params = store_params(&session.name);
        let result = self.engine.store(file, params, hook).await;
        match result {
            Ok(cid) => {
                session.state = UploadState::Completed;
                debug!(session = %id, cid = %cid, "File upload complete");
                Ok(cid)
            }
            Err(e) => {
                session.state = UploadState::Cancelled;
                Err(e)
            }
        }
    }

    /// Cancel an open session, discarding buffered state.
    pub async fn cancel(&self, id: &str) -> Result<()> {
        let session = self.session(id)?;
        let mut session = session.lock().await;
        session.require_open()?;
        session.state = UploadState::Cancelled;
        session.buffer = Vec::new();
        debug!(session = %id, "Upload session cancelled");
        Ok(())
    }

    /// Current state, for diagnostics.
    pub async fn state(&self, id: &str) -> Result<UploadState> {
        let session = self.session(id)?;
        let session = session.lock().await;
        Ok(session.state)
    }
}

fn store_params(name: &str) -> StoreParams {
    let path = Path::new(name);
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    let mimetype = mimetype_for(&filename);
    StoreParams::new(DEFAULT_BLOCK_SIZE)
        .with_filename(filename)
        .with_mimetype(mimetype)
}

/// Derive a MIME type from the filename extension.
fn mimetype_for(filename: &str) -> &'static str {
    let ext = Path::new(filename)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "txt" | "md" | "log" => "text/plain",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "js" => "text/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        _ => "application/octet-stream",
    }
}
