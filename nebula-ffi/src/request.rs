//! Request envelopes
//!
//! Payloads are copied out of foreign memory at submission time; the
//! worker owns the envelope from the moment it is drained until the
//! terminal callback fires. Callbacks run on the worker thread and must
//! not block.

use crate::context::{RET_ERR, RET_OK, RET_PROGRESS};
use bytes::Bytes;
use nebula_core::error::Result;
use nebula_node::NebulaNode;
use std::os::raw::{c_char, c_int, c_void};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Completion callback shared with the C header: `(code, msg, len, userData)`.
pub type Callback = extern "C" fn(c_int, *const c_char, usize, *mut c_void);

/// Foreign context pointer, passed back to the callback verbatim.
#[derive(Clone, Copy)]
pub struct UserData(pub *mut c_void);

// The pointer is never dereferenced on our side; it only travels back to
// the foreign callback, which runs on the worker thread.
unsafe impl Send for UserData {}
unsafe impl Sync for UserData {}

/// The operation a request performs.
pub enum Operation {
    // Lifecycle
    Start,
    Stop,
    Close,

    // Info
    Version,
    Revision,
    Repo,
    PeerId,
    Spr,
    DebugInfo,

    // Debug
    LogLevel { level: String },
    #[cfg(feature = "api-debug-peers")]
    PeerDebug { peer_id: String },

    // P2P
    Connect { peer_id: String, addresses: Vec<String> },

    // Upload
    UploadInit { filepath: String, chunk_size: usize },
    UploadChunk { session: String, data: Vec<u8> },
    UploadFinalize { session: String },
    UploadCancel { session: String },
    UploadFile { session: String },

    // Download
    DownloadInit { cid: String, chunk_size: usize, local: bool },
    DownloadStream { cid: String, filepath: Option<PathBuf> },
    DownloadChunk { cid: String },
    DownloadCancel { cid: String },
    DownloadManifest { cid: String },

    // Storage
    List,
    Space,
    Delete { cid: String },
    Fetch { cid: String },
    Exists { cid: String },
}

/// A queued request: operation, completion callback, caller context.
pub struct Request {
    pub op: Operation,
    pub callback: Callback,
    pub user_data: UserData,
}

impl Request {
    /// Execute the operation and fire the terminal callback.
    pub async fn process(self, node: Option<Arc<NebulaNode>>) {
        let emitter = Emitter {
            callback: self.callback,
            user_data: self.user_data,
        };

        let Some(node) = node else {
            emitter.emit(RET_ERR, b"node has been destroyed");
            return;
        };

        let result = dispatch(self.op, &node, &emitter).await;
        match result {
            Ok(msg) => emitter.emit(RET_OK, msg.as_bytes()),
            Err(e) => {
                debug!(error = %e, "Request failed");
                emitter.emit(RET_ERR, e.to_string().as_bytes());
            }
        }
    }
}

/// Invokes the foreign callback. The message buffer is only valid during
/// the call; the callee must copy it.
#[derive(Clone, Copy)]
struct Emitter {
    callback: Callback,
    user_data: UserData,
}

impl Emitter {
    fn emit(&self, code: c_int, msg: &[u8]) {
        (self.callback)(
            code,
            msg.as_ptr() as *const c_char,
            msg.len(),
            self.user_data.0,
        );
    }
}

async fn dispatch(op: Operation, node: &Arc<NebulaNode>, emitter: &Emitter) -> Result<String> {
    match op {
        Operation::Start => {
            node.start()?;
            Ok(String::new())
        }
        Operation::Stop => {
            node.stop()?;
            Ok(String::new())
        }
        Operation::Close => {
            node.close().await?;
            Ok(String::new())
        }

        Operation::Version => Ok(nebula_node::version().to_string()),
        Operation::Revision => Ok(nebula_node::revision().to_string()),
        Operation::Repo => Ok(node.repo()),
        Operation::PeerId => Ok(node.peer_id().to_string()),
        Operation::Spr => Ok(node.spr()),
        Operation::DebugInfo => Ok(node.debug_json().to_string()),

        Operation::LogLevel { level } => {
            crate::logging::set_level(&level)?;
            Ok(String::new())
        }
        #[cfg(feature = "api-debug-peers")]
        Operation::PeerDebug { peer_id } => {
            let table = node.debug_json();
            let entry = table["table"]["nodes"]
                .as_array()
                .and_then(|nodes| {
                    nodes
                        .iter()
                        .find(|n| n["peerId"].as_str() == Some(peer_id.as_str()))
                        .cloned()
                })
                .unwrap_or_else(|| {
                    serde_json::json!({
                        "peerId": peer_id,
                        "seqNo": 0,
                        "addresses": [],
                    })
                });
            Ok(entry.to_string())
        }

        Operation::Connect { peer_id, addresses } => {
            node.connect(&peer_id, addresses).await?;
            Ok(String::new())
        }

        Operation::UploadInit {
            filepath,
            chunk_size,
        } => node.uploads().init(&filepath, chunk_size),
        Operation::UploadChunk { session, data } => {
            node.uploads().chunk(&session, &data).await?;
            Ok(String::new())
        }
        Operation::UploadFinalize { session } => {
            let cid = node.uploads().finalize(&session).await?;
            Ok(cid.to_base58())
        }
        Operation::UploadCancel { session } => {
            node.uploads().cancel(&session).await?;
            Ok(String::new())
        }
        Operation::UploadFile { session } => {
            let progress = *emitter;
            let cid = node
                .uploads()
                .upload_file(
                    &session,
                    Some(&move |_index, chunk: &Bytes| {
                        progress.emit(RET_PROGRESS, chunk);
                    }),
                )
                .await?;
            Ok(cid.to_base58())
        }

        Operation::DownloadInit {
            cid,
            chunk_size,
            local,
        } => {
            node.downloads().init(&cid, chunk_size, local)?;
            Ok(String::new())
        }
        Operation::DownloadStream { cid, filepath } => {
            let progress = *emitter;
            node.downloads()
                .stream_to(&cid, filepath.as_deref(), |chunk| {
                    progress.emit(RET_PROGRESS, chunk);
                    Ok(())
                })
                .await?;
            Ok(String::new())
        }
        Operation::DownloadChunk { cid } => {
            match node.downloads().next_chunk(&cid).await? {
                Some(chunk) => emitter.emit(RET_PROGRESS, &chunk),
                None => {} // drained; terminal OK carries no chunk
            }
            Ok(String::new())
        }
        Operation::DownloadCancel { cid } => {
            node.downloads().cancel(&cid).await?;
            Ok(String::new())
        }
        Operation::DownloadManifest { cid } => {
            Ok(node.downloads().manifest_json(&cid).await?.to_string())
        }

        Operation::List => Ok(node.list_json().await?.to_string()),
        Operation::Space => Ok(node.space_json().await?.to_string()),
        Operation::Delete { cid } => {
            node.delete(&cid).await?;
            Ok(String::new())
        }
        Operation::Fetch { cid } => {
            node.fetch(&cid)?;
            Ok(String::new())
        }
        Operation::Exists { cid } => {
            let exists = node.exists(&cid).await?;
            Ok(if exists { "true" } else { "false" }.to_string())
        }
    }
}
