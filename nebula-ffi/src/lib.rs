//! C ABI for embedding a NebulaStore node from C/C++ or other hosts.
//!
//! All functions are asynchronous unless noted: the synchronous return
//! code reports whether the request was dispatched to the worker thread
//! (`RET_OK`) or failed immediately (`RET_ERR`, `RET_MISSING_CALLBACK`).
//! The operation result arrives later through the callback, on the worker
//! thread: `RET_PROGRESS` zero or more times, then `RET_OK` or `RET_ERR`
//! once. Callback message buffers are only valid during the call and must
//! be copied; callbacks must not block.

pub mod context;
pub mod logging;
pub mod request;

use context::{Context, RET_ERR, RET_MISSING_CALLBACK, RET_OK};
use nebula_node::{NebulaNode, NodeConfig};
use request::{Callback, Operation, Request, UserData};
use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_void};
use std::path::PathBuf;
use std::sync::Arc;

/// Copy a C string. `None` for null pointers.
unsafe fn copy_cstr(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
}

fn invoke(callback: Callback, code: c_int, msg: &str, user_data: *mut c_void) {
    callback(code, msg.as_ptr() as *const c_char, msg.len(), user_data);
}

/// Dispatch an operation on a context handle.
fn submit(
    ctx: *mut c_void,
    op: Operation,
    callback: Option<Callback>,
    user_data: *mut c_void,
) -> c_int {
    if ctx.is_null() {
        return RET_ERR;
    }
    let Some(callback) = callback else {
        return RET_MISSING_CALLBACK;
    };
    let ctx = unsafe { &*(ctx as *const Context) };
    ctx.submit(Request {
        op,
        callback,
        user_data: UserData(user_data),
    })
}

/// Create a new node instance from a JSON configuration string.
/// Returns an opaque context handle, or null on failure (the callback, if
/// provided, receives the error message).
#[no_mangle]
pub extern "C" fn nebula_new(
    config_json: *const c_char,
    callback: Option<Callback>,
    user_data: *mut c_void,
) -> *mut c_void {
    let config_json = unsafe { copy_cstr(config_json) }.unwrap_or_else(|| "{}".to_string());

    let config = match NodeConfig::from_json(&config_json) {
        Ok(config) => config,
        Err(e) => {
            if let Some(callback) = callback {
                invoke(callback, RET_ERR, &e.to_string(), user_data);
            }
            return std::ptr::null_mut();
        }
    };

    logging::init(&config.log_level);

    let node = match NebulaNode::new(config) {
        Ok(node) => node,
        Err(e) => {
            if let Some(callback) = callback {
                invoke(callback, RET_ERR, &e.to_string(), user_data);
            }
            return std::ptr::null_mut();
        }
    };

    let ctx = Context::spawn(node);
    Arc::into_raw(ctx) as *mut c_void
}

/// Destroy a node instance, joining the worker thread and freeing all
/// shared state. No callbacks fire after this returns. This call is
/// synchronous.
#[no_mangle]
pub extern "C" fn nebula_destroy(
    ctx: *mut c_void,
    callback: Option<Callback>,
    user_data: *mut c_void,
) -> c_int {
    if ctx.is_null() {
        return RET_ERR;
    }
    let ctx = unsafe { Arc::from_raw(ctx as *const Context) };
    ctx.destroy();
    drop(ctx);
    if let Some(callback) = callback {
        invoke(callback, RET_OK, "", user_data);
    }
    RET_OK
}

/// Start the node. The node can be started and stopped multiple times;
/// starting a running node is a no-op.
#[no_mangle]
pub extern "C" fn nebula_start(
    ctx: *mut c_void,
    callback: Option<Callback>,
    user_data: *mut c_void,
) -> c_int {
    submit(ctx, Operation::Start, callback, user_data)
}

/// Stop the node.
#[no_mangle]
pub extern "C" fn nebula_stop(
    ctx: *mut c_void,
    callback: Option<Callback>,
    user_data: *mut c_void,
) -> c_int {
    submit(ctx, Operation::Stop, callback, user_data)
}

/// Close the node, releasing resources before destruction.
#[no_mangle]
pub extern "C" fn nebula_close(
    ctx: *mut c_void,
    callback: Option<Callback>,
    user_data: *mut c_void,
) -> c_int {
    submit(ctx, Operation::Close, callback, user_data)
}

/// Get the library version string.
#[no_mangle]
pub extern "C" fn nebula_version(
    ctx: *mut c_void,
    callback: Option<Callback>,
    user_data: *mut c_void,
) -> c_int {
    submit(ctx, Operation::Version, callback, user_data)
}

/// Get the source revision the library was built from.
#[no_mangle]
pub extern "C" fn nebula_revision(
    ctx: *mut c_void,
    callback: Option<Callback>,
    user_data: *mut c_void,
) -> c_int {
    submit(ctx, Operation::Revision, callback, user_data)
}

/// Get the data directory used by the node.
#[no_mangle]
pub extern "C" fn nebula_repo(
    ctx: *mut c_void,
    callback: Option<Callback>,
    user_data: *mut c_void,
) -> c_int {
    submit(ctx, Operation::Repo, callback, user_data)
}

/// Retrieve debug information (JSON).
#[no_mangle]
pub extern "C" fn nebula_debug(
    ctx: *mut c_void,
    callback: Option<Callback>,
    user_data: *mut c_void,
) -> c_int {
    submit(ctx, Operation::DebugInfo, callback, user_data)
}

/// Get the node's signed peer record.
#[no_mangle]
pub extern "C" fn nebula_spr(
    ctx: *mut c_void,
    callback: Option<Callback>,
    user_data: *mut c_void,
) -> c_int {
    submit(ctx, Operation::Spr, callback, user_data)
}

/// Get the node's peer ID.
#[no_mangle]
pub extern "C" fn nebula_peer_id(
    ctx: *mut c_void,
    callback: Option<Callback>,
    user_data: *mut c_void,
) -> c_int {
    submit(ctx, Operation::PeerId, callback, user_data)
}

/// Set the log level at run time. `level` can be one of TRACE, DEBUG,
/// INFO, NOTICE, WARN, ERROR or FATAL.
#[no_mangle]
pub extern "C" fn nebula_log_level(
    ctx: *mut c_void,
    level: *const c_char,
    callback: Option<Callback>,
    user_data: *mut c_void,
) -> c_int {
    let Some(level) = (unsafe { copy_cstr(level) }) else {
        return RET_ERR;
    };
    submit(ctx, Operation::LogLevel { level }, callback, user_data)
}

/// Request debug information for a peer ID (JSON). Only available when
/// the library is compiled with the `api-debug-peers` feature.
#[cfg(feature = "api-debug-peers")]
#[no_mangle]
pub extern "C" fn nebula_peer_debug(
    ctx: *mut c_void,
    peer_id: *const c_char,
    callback: Option<Callback>,
    user_data: *mut c_void,
) -> c_int {
    let Some(peer_id) = (unsafe { copy_cstr(peer_id) }) else {
        return RET_ERR;
    };
    submit(ctx, Operation::PeerDebug { peer_id }, callback, user_data)
}

/// Connect to a peer using `peer_addresses` if provided, otherwise by
/// `peer_id` through discovery.
#[no_mangle]
pub extern "C" fn nebula_connect(
    ctx: *mut c_void,
    peer_id: *const c_char,
    peer_addresses: *const *const c_char,
    peer_addresses_len: usize,
    callback: Option<Callback>,
    user_data: *mut c_void,
) -> c_int {
    let Some(peer_id) = (unsafe { copy_cstr(peer_id) }) else {
        return RET_ERR;
    };
    let mut addresses = Vec::with_capacity(peer_addresses_len);
    if !peer_addresses.is_null() {
        for i in 0..peer_addresses_len {
            let entry = unsafe { *peer_addresses.add(i) };
            if let Some(address) = unsafe { copy_cstr(entry) } {
                addresses.push(address);
            }
        }
    }
    submit(
        ctx,
        Operation::Connect { peer_id, addresses },
        callback,
        user_data,
    )
}

/// Initialize an upload session. `filepath` is the file to upload for
/// `nebula_upload_file`, or the logical name for a chunked upload;
/// filename and MIME metadata are derived from it. A zero `chunk_size`
/// selects the default block size. The callback returns the session id.
#[no_mangle]
pub extern "C" fn nebula_upload_init(
    ctx: *mut c_void,
    filepath: *const c_char,
    chunk_size: usize,
    callback: Option<Callback>,
    user_data: *mut c_void,
) -> c_int {
    let Some(filepath) = (unsafe { copy_cstr(filepath) }) else {
        return RET_ERR;
    };
    submit(
        ctx,
        Operation::UploadInit {
            filepath,
            chunk_size,
        },
        callback,
        user_data,
    )
}

/// Upload a chunk for the given session.
#[no_mangle]
pub extern "C" fn nebula_upload_chunk(
    ctx: *mut c_void,
    session_id: *const c_char,
    chunk: *const u8,
    len: usize,
    callback: Option<Callback>,
    user_data: *mut c_void,
) -> c_int {
    let Some(session) = (unsafe { copy_cstr(session_id) }) else {
        return RET_ERR;
    };
    if chunk.is_null() && len > 0 {
        return RET_ERR;
    }
    let data = if len == 0 {
        Vec::new()
    } else {
        unsafe { std::slice::from_raw_parts(chunk, len) }.to_vec()
    };
    submit(
        ctx,
        Operation::UploadChunk { session, data },
        callback,
        user_data,
    )
}

/// Finalize an upload session. The callback returns the manifest CID of
/// the uploaded content.
#[no_mangle]
pub extern "C" fn nebula_upload_finalize(
    ctx: *mut c_void,
    session_id: *const c_char,
    callback: Option<Callback>,
    user_data: *mut c_void,
) -> c_int {
    let Some(session) = (unsafe { copy_cstr(session_id) }) else {
        return RET_ERR;
    };
    submit(
        ctx,
        Operation::UploadFinalize { session },
        callback,
        user_data,
    )
}

/// Cancel an ongoing upload session.
#[no_mangle]
pub extern "C" fn nebula_upload_cancel(
    ctx: *mut c_void,
    session_id: *const c_char,
    callback: Option<Callback>,
    user_data: *mut c_void,
) -> c_int {
    let Some(session) = (unsafe { copy_cstr(session_id) }) else {
        return RET_ERR;
    };
    submit(
        ctx,
        Operation::UploadCancel { session },
        callback,
        user_data,
    )
}

/// Upload the file named at session init. The callback receives
/// RET_PROGRESS per stored block (when the block size does not exceed the
/// session chunk size), then the manifest CID.
#[no_mangle]
pub extern "C" fn nebula_upload_file(
    ctx: *mut c_void,
    session_id: *const c_char,
    callback: Option<Callback>,
    user_data: *mut c_void,
) -> c_int {
    let Some(session) = (unsafe { copy_cstr(session_id) }) else {
        return RET_ERR;
    };
    submit(ctx, Operation::UploadFile { session }, callback, user_data)
}

/// Initialize a download session for `cid`. A zero `chunk_size` selects
/// the default block size. `local` restricts retrieval to the local store.
#[no_mangle]
pub extern "C" fn nebula_download_init(
    ctx: *mut c_void,
    cid: *const c_char,
    chunk_size: usize,
    local: bool,
    callback: Option<Callback>,
    user_data: *mut c_void,
) -> c_int {
    let Some(cid) = (unsafe { copy_cstr(cid) }) else {
        return RET_ERR;
    };
    submit(
        ctx,
        Operation::DownloadInit {
            cid,
            chunk_size,
            local,
        },
        callback,
        user_data,
    )
}

/// Stream a download for `cid`. `nebula_download_init` must have been
/// called first. Chunks arrive as RET_PROGRESS callbacks; when `filepath`
/// is provided the content is also written there.
#[no_mangle]
pub extern "C" fn nebula_download_stream(
    ctx: *mut c_void,
    cid: *const c_char,
    _chunk_size: usize,
    _local: bool,
    filepath: *const c_char,
    callback: Option<Callback>,
    user_data: *mut c_void,
) -> c_int {
    let Some(cid) = (unsafe { copy_cstr(cid) }) else {
        return RET_ERR;
    };
    let filepath = unsafe { copy_cstr(filepath) }.map(PathBuf::from);
    submit(
        ctx,
        Operation::DownloadStream { cid, filepath },
        callback,
        user_data,
    )
}

/// Download one chunk for `cid`. `nebula_download_init` must have been
/// called first. The chunk arrives as a RET_PROGRESS callback; a terminal
/// RET_OK without a preceding chunk means the content is drained.
#[no_mangle]
pub extern "C" fn nebula_download_chunk(
    ctx: *mut c_void,
    cid: *const c_char,
    callback: Option<Callback>,
    user_data: *mut c_void,
) -> c_int {
    let Some(cid) = (unsafe { copy_cstr(cid) }) else {
        return RET_ERR;
    };
    submit(ctx, Operation::DownloadChunk { cid }, callback, user_data)
}

/// Cancel an ongoing download for `cid`.
#[no_mangle]
pub extern "C" fn nebula_download_cancel(
    ctx: *mut c_void,
    cid: *const c_char,
    callback: Option<Callback>,
    user_data: *mut c_void,
) -> c_int {
    let Some(cid) = (unsafe { copy_cstr(cid) }) else {
        return RET_ERR;
    };
    submit(ctx, Operation::DownloadCancel { cid }, callback, user_data)
}

/// Retrieve the manifest for `cid` as JSON.
#[no_mangle]
pub extern "C" fn nebula_download_manifest(
    ctx: *mut c_void,
    cid: *const c_char,
    callback: Option<Callback>,
    user_data: *mut c_void,
) -> c_int {
    let Some(cid) = (unsafe { copy_cstr(cid) }) else {
        return RET_ERR;
    };
    submit(ctx, Operation::DownloadManifest { cid }, callback, user_data)
}

/// Retrieve the list of manifests stored in the node (JSON array).
#[no_mangle]
pub extern "C" fn nebula_list(
    ctx: *mut c_void,
    callback: Option<Callback>,
    user_data: *mut c_void,
) -> c_int {
    submit(ctx, Operation::List, callback, user_data)
}

/// Retrieve storage space information (JSON).
#[no_mangle]
pub extern "C" fn nebula_space(
    ctx: *mut c_void,
    callback: Option<Callback>,
    user_data: *mut c_void,
) -> c_int {
    submit(ctx, Operation::Space, callback, user_data)
}

/// Delete the content identified by `cid`.
#[no_mangle]
pub extern "C" fn nebula_delete(
    ctx: *mut c_void,
    cid: *const c_char,
    callback: Option<Callback>,
    user_data: *mut c_void,
) -> c_int {
    let Some(cid) = (unsafe { copy_cstr(cid) }) else {
        return RET_ERR;
    };
    submit(ctx, Operation::Delete { cid }, callback, user_data)
}

/// Fetch the content identified by `cid` from the network into the local
/// store. The download runs in the background without progress updates.
#[no_mangle]
pub extern "C" fn nebula_fetch(
    ctx: *mut c_void,
    cid: *const c_char,
    callback: Option<Callback>,
    user_data: *mut c_void,
) -> c_int {
    let Some(cid) = (unsafe { copy_cstr(cid) }) else {
        return RET_ERR;
    };
    submit(ctx, Operation::Fetch { cid }, callback, user_data)
}

/// Check if the content identified by `cid` exists in the local store.
/// The callback message is "true" or "false".
#[no_mangle]
pub extern "C" fn nebula_exists(
    ctx: *mut c_void,
    cid: *const c_char,
    callback: Option<Callback>,
    user_data: *mut c_void,
) -> c_int {
    let Some(cid) = (unsafe { copy_cstr(cid) }) else {
        return RET_ERR;
    };
    submit(ctx, Operation::Exists { cid }, callback, user_data)
}
