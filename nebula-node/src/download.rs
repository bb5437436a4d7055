//! Download sessions
//!
//! Download sessions are keyed by the content CID. The manifest is fetched
//! lazily at the first chunk read; chunks are re-framed from storage
//! blocks to the transport chunk size chosen at init.

use crate::engine::NodeEngine;
use bytes::{Bytes, BytesMut};
use nebula_core::cid::Cid;
use nebula_core::error::{NebulaError, Result};
use nebula_core::DEFAULT_BLOCK_SIZE;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::debug;

/// Download session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    Initialized,
    Streaming,
    Cancelled,
    Completed,
}

struct DownloadSession {
    cid: Cid,
    chunk_size: usize,
    local: bool,
    state: DownloadState,
    /// Underlying block stream, opened lazily at the first read.
    stream: Option<ReceiverStream<Result<Bytes>>>,
    /// Bytes carried over between transport chunks.
    pending: BytesMut,
}

/// Manages download sessions on top of the node engine.
pub struct DownloadManager {
    engine: Arc<NodeEngine>,
    sessions: Mutex<HashMap<String, Arc<tokio::sync::Mutex<DownloadSession>>>>,
}

impl DownloadManager {
    pub fn new(engine: Arc<NodeEngine>) -> Self {
        Self {
            engine,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Record a session for `cid`. A zero `chunk_size` selects the default
    /// block size.
    pub fn init(&self, cid: &str, chunk_size: usize, local: bool) -> Result<()> {
        let cid = Cid::from_base58(cid)?;
        let chunk_size = if chunk_size == 0 {
            DEFAULT_BLOCK_SIZE
        } else {
            chunk_size
        };
        let session = DownloadSession {
            cid,
            chunk_size,
            local,
            state: DownloadState::Initialized,
            stream: None,
            pending: BytesMut::new(),
        };
        self.sessions
            .lock()
            .insert(cid.to_base58(), Arc::new(tokio::sync::Mutex::new(session)));
        debug!(cid = %cid, chunk_size, local, "Download session opened");
        Ok(())
    }

    fn session(&self, cid: &str) -> Result<Arc<tokio::sync::Mutex<DownloadSession>>> {
        let key = Cid::from_base58(cid)?.to_base58();
        self.sessions
            .lock()
            .get(&key)
            .cloned()
            .ok_or_else(|| NebulaError::NotFound(format!("download session {}", key)))
    }

    /// Return the next transport chunk, or `None` once the content is
    /// drained. The first call opens the block stream.
    pub async fn next_chunk(&self, cid: &str) -> Result<Option<Bytes>> {
        let session = self.session(cid)?;
        let mut session = session.lock().await;

        match session.state {
            DownloadState::Initialized => {
                let stream = self.engine.retrieve(session.cid, session.local).await?;
                session.stream = Some(stream);
                session.state = DownloadState::Streaming;
            }
            DownloadState::Streaming => {}
            other => {
                return Err(NebulaError::InvalidState(format!(
                    "download session is {:?}",
                    other
                )))
            }
        }

        // Refill the carry-over buffer until a full chunk is available.
        while session.pending.len() < session.chunk_size {
            let next = match session.stream.as_mut() {
                Some(stream) => stream.next().await,
                None => None,
            };
            match next {
                Some(Ok(bytes)) => session.pending.extend_from_slice(&bytes),
                Some(Err(e)) => {
                    session.state = DownloadState::Cancelled;
                    session.stream = None;
                    return Err(e);
                }
                None => break,
            }
        }

        if session.pending.is_empty() {
            session.state = DownloadState::Completed;
            session.stream = None;
            return Ok(None);
        }

        let take = session.pending.len().min(session.chunk_size);
        Ok(Some(session.pending.split_to(take).freeze()))
    }

    /// Stream the whole content, invoking `on_chunk` per transport chunk
    /// and mirroring to `filepath` when given.
    pub async fn stream_to(
        &self,
        cid: &str,
        filepath: Option<&Path>,
        mut on_chunk: impl FnMut(&Bytes) -> Result<()>,
    ) -> Result<u64> {
        let mut file = match filepath {
            Some(path) => Some(tokio::fs::File::create(path).await.map_err(|e| {
                NebulaError::IoFailure(format!("cannot create {:?}: {}", path, e))
            })?),
            None => None,
        };

        let mut total = 0u64;
        while let Some(chunk) = self.next_chunk(cid).await? {
            if let Some(file) = file.as_mut() {
                file.write_all(&chunk).await?;
            }
            on_chunk(&chunk)?;
            total += chunk.len() as u64;
        }
        if let Some(mut file) = file.take() {
            file.flush().await?;
        }
        debug!(cid, total, "Download stream complete");
        Ok(total)
    }

    /// Halt emissions and drop the block stream.
    pub async fn cancel(&self, cid: &str) -> Result<()> {
        let session = self.session(cid)?;
        let mut session = session.lock().await;
        session.state = DownloadState::Cancelled;
        session.stream = None;
        session.pending = BytesMut::new();
        debug!(cid, "Download session cancelled");
        Ok(())
    }

    /// Fetch only the manifest, as JSON.
    pub async fn manifest_json(&self, cid: &str) -> Result<serde_json::Value> {
        let cid = Cid::from_base58(cid)?;
        let manifest = self.engine.fetch_manifest(&cid).await?;
        Ok(manifest.to_json())
    }

    /// Current state, for diagnostics.
    pub async fn state(&self, cid: &str) -> Result<DownloadState> {
        let session = self.session(cid)?;
        let session = session.lock().await;
        Ok(session.state)
    }
}
