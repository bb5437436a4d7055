//! FFI pipeline tests
//!
//! Drives the C ABI end to end: context lifecycle, chunked upload,
//! download streaming and storage queries, with callbacks collected
//! through a waitable sink.

use nebula_ffi::context::{RET_OK, RET_PROGRESS};
use std::ffi::CString;
use std::os::raw::{c_char, c_int, c_void};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Collects callback invocations and lets the test thread wait for the
/// terminal one.
struct Sink {
    entries: Mutex<Vec<(i32, Vec<u8>)>>,
    cv: Condvar,
}

impl Sink {
    fn new() -> Box<Self> {
        Box::new(Self {
            entries: Mutex::new(Vec::new()),
            cv: Condvar::new(),
        })
    }

    fn as_user_data(&self) -> *mut c_void {
        self as *const Self as *mut c_void
    }

    /// Wait until a non-progress entry arrives, then drain and return
    /// (progress payloads, terminal code, terminal payload).
    fn wait(&self) -> (Vec<Vec<u8>>, i32, Vec<u8>) {
        let mut entries = self.entries.lock().unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(30);
        loop {
            if let Some(pos) = entries.iter().position(|(code, _)| *code != RET_PROGRESS) {
                let drained: Vec<(i32, Vec<u8>)> = entries.drain(..=pos).collect();
                let (code, msg) = drained.last().cloned().unwrap();
                let progress = drained
                    .into_iter()
                    .filter(|(code, _)| *code == RET_PROGRESS)
                    .map(|(_, msg)| msg)
                    .collect();
                return (progress, code, msg);
            }
            let (guard, timeout) = self
                .cv
                .wait_timeout(entries, Duration::from_millis(100))
                .unwrap();
            entries = guard;
            if timeout.timed_out() && std::time::Instant::now() > deadline {
                panic!("timed out waiting for a terminal callback");
            }
        }
    }
}

extern "C" fn collect(code: c_int, msg: *const c_char, len: usize, user_data: *mut c_void) {
    let sink = unsafe { &*(user_data as *const Sink) };
    let payload = if msg.is_null() || len == 0 {
        Vec::new()
    } else {
        unsafe { std::slice::from_raw_parts(msg as *const u8, len) }.to_vec()
    };
    let mut entries = sink.entries.lock().unwrap();
    entries.push((code, payload));
    sink.cv.notify_all();
}

fn new_context(dir: &tempfile::TempDir, sink: &Sink) -> *mut c_void {
    let config = serde_json::json!({
        "data-dir": dir.path().join("data"),
        "log-level": "ERROR",
    })
    .to_string();
    let config = CString::new(config).unwrap();
    let ctx = nebula_ffi::nebula_new(config.as_ptr(), Some(collect), sink.as_user_data());
    assert!(!ctx.is_null(), "context creation failed");
    ctx
}

#[test]
fn test_lifecycle_upload_download_roundtrip() {
    let dir = tempfile::TempDir::new().unwrap();
    let sink = Sink::new();
    let ctx = new_context(&dir, &sink);

    // Start; a second start is a no-op and must not corrupt state.
    assert_eq!(
        nebula_ffi::nebula_start(ctx, Some(collect), sink.as_user_data()),
        RET_OK
    );
    assert_eq!(sink.wait().1, RET_OK);
    assert_eq!(
        nebula_ffi::nebula_start(ctx, Some(collect), sink.as_user_data()),
        RET_OK
    );
    assert_eq!(sink.wait().1, RET_OK);

    // Version is non-empty.
    assert_eq!(
        nebula_ffi::nebula_version(ctx, Some(collect), sink.as_user_data()),
        RET_OK
    );
    let (_, code, version) = sink.wait();
    assert_eq!(code, RET_OK);
    assert!(!version.is_empty());

    // Upload via chunks: init -> chunk -> finalize.
    let filepath = CString::new("hello.txt").unwrap();
    assert_eq!(
        nebula_ffi::nebula_upload_init(
            ctx,
            filepath.as_ptr(),
            11,
            Some(collect),
            sink.as_user_data()
        ),
        RET_OK
    );
    let (_, code, session) = sink.wait();
    assert_eq!(code, RET_OK);
    assert!(!session.is_empty());
    let session = CString::new(session).unwrap();

    let payload = b"hello world";
    assert_eq!(
        nebula_ffi::nebula_upload_chunk(
            ctx,
            session.as_ptr(),
            payload.as_ptr(),
            payload.len(),
            Some(collect),
            sink.as_user_data()
        ),
        RET_OK
    );
    assert_eq!(sink.wait().1, RET_OK);

    assert_eq!(
        nebula_ffi::nebula_upload_finalize(ctx, session.as_ptr(), Some(collect), sink.as_user_data()),
        RET_OK
    );
    let (_, code, cid) = sink.wait();
    assert_eq!(code, RET_OK);
    assert!(!cid.is_empty(), "finalize must return a CID");
    let cid = CString::new(cid).unwrap();

    // The manifest exists locally.
    assert_eq!(
        nebula_ffi::nebula_exists(ctx, cid.as_ptr(), Some(collect), sink.as_user_data()),
        RET_OK
    );
    let (_, code, exists) = sink.wait();
    assert_eq!(code, RET_OK);
    assert_eq!(exists, b"true");

    // Space reports stored blocks.
    assert_eq!(
        nebula_ffi::nebula_space(ctx, Some(collect), sink.as_user_data()),
        RET_OK
    );
    let (_, code, space) = sink.wait();
    assert_eq!(code, RET_OK);
    let space: serde_json::Value = serde_json::from_slice(&space).unwrap();
    assert!(space["totalBlocks"].as_u64().unwrap() >= 1);
    assert!(space["quotaUsedBytes"].as_u64().unwrap() >= 11);

    // Manifest JSON round-trips the metadata.
    assert_eq!(
        nebula_ffi::nebula_download_manifest(ctx, cid.as_ptr(), Some(collect), sink.as_user_data()),
        RET_OK
    );
    let (_, code, manifest) = sink.wait();
    assert_eq!(code, RET_OK);
    let manifest: serde_json::Value = serde_json::from_slice(&manifest).unwrap();
    assert_eq!(manifest["datasetSize"], 11);
    assert_eq!(manifest["filename"], "hello.txt");
    assert_eq!(manifest["mimetype"], "text/plain");

    // Download chunk by chunk.
    assert_eq!(
        nebula_ffi::nebula_download_init(ctx, cid.as_ptr(), 5, true, Some(collect), sink.as_user_data()),
        RET_OK
    );
    assert_eq!(sink.wait().1, RET_OK);

    let mut downloaded = Vec::new();
    loop {
        assert_eq!(
            nebula_ffi::nebula_download_chunk(ctx, cid.as_ptr(), Some(collect), sink.as_user_data()),
            RET_OK
        );
        let (progress, code, _) = sink.wait();
        assert_eq!(code, RET_OK);
        if progress.is_empty() {
            break;
        }
        for chunk in progress {
            assert!(chunk.len() <= 5);
            downloaded.extend_from_slice(&chunk);
        }
    }
    assert_eq!(downloaded, payload);

    // Delete, then the manifest is gone.
    assert_eq!(
        nebula_ffi::nebula_delete(ctx, cid.as_ptr(), Some(collect), sink.as_user_data()),
        RET_OK
    );
    assert_eq!(sink.wait().1, RET_OK);
    assert_eq!(
        nebula_ffi::nebula_exists(ctx, cid.as_ptr(), Some(collect), sink.as_user_data()),
        RET_OK
    );
    let (_, code, exists) = sink.wait();
    assert_eq!(code, RET_OK);
    assert_eq!(exists, b"false");

    assert_eq!(
        nebula_ffi::nebula_stop(ctx, Some(collect), sink.as_user_data()),
        RET_OK
    );
    assert_eq!(sink.wait().1, RET_OK);
    assert_eq!(
        nebula_ffi::nebula_close(ctx, Some(collect), sink.as_user_data()),
        RET_OK
    );
    assert_eq!(sink.wait().1, RET_OK);
    assert_eq!(
        nebula_ffi::nebula_destroy(ctx, Some(collect), sink.as_user_data()),
        RET_OK
    );
}

#[test]
fn test_missing_callback_and_null_ctx() {
    let dir = tempfile::TempDir::new().unwrap();
    let sink = Sink::new();
    let ctx = new_context(&dir, &sink);

    assert_eq!(
        nebula_ffi::nebula_version(ctx, None, std::ptr::null_mut()),
        nebula_ffi::context::RET_MISSING_CALLBACK
    );
    assert_eq!(
        nebula_ffi::nebula_version(std::ptr::null_mut(), Some(collect), sink.as_user_data()),
        nebula_ffi::context::RET_ERR
    );

    assert_eq!(
        nebula_ffi::nebula_destroy(ctx, Some(collect), sink.as_user_data()),
        RET_OK
    );
}

#[test]
fn test_invalid_config_returns_null() {
    let sink = Sink::new();
    let config = CString::new(r#"{"log-level": "LOUD"}"#).unwrap();
    let ctx = nebula_ffi::nebula_new(config.as_ptr(), Some(collect), sink.as_user_data());
    assert!(ctx.is_null());
    let (_, code, msg) = sink.wait();
    assert_eq!(code, nebula_ffi::context::RET_ERR);
    assert!(!msg.is_empty());
}

#[test]
fn test_upload_errors_after_cancel() {
    let dir = tempfile::TempDir::new().unwrap();
    let sink = Sink::new();
    let ctx = new_context(&dir, &sink);

    let filepath = CString::new("doomed.bin").unwrap();
    assert_eq!(
        nebula_ffi::nebula_upload_init(ctx, filepath.as_ptr(), 0, Some(collect), sink.as_user_data()),
        RET_OK
    );
    let (_, code, session) = sink.wait();
    assert_eq!(code, RET_OK);
    let session = CString::new(session).unwrap();

    assert_eq!(
        nebula_ffi::nebula_upload_cancel(ctx, session.as_ptr(), Some(collect), sink.as_user_data()),
        RET_OK
    );
    assert_eq!(sink.wait().1, RET_OK);

    // Finalizing a cancelled session reports an error through the callback.
    assert_eq!(
        nebula_ffi::nebula_upload_finalize(ctx, session.as_ptr(), Some(collect), sink.as_user_data()),
        RET_OK
    );
    let (_, code, msg) = sink.wait();
    assert_eq!(code, nebula_ffi::context::RET_ERR);
    assert!(String::from_utf8_lossy(&msg).contains("state"));

    assert_eq!(
        nebula_ffi::nebula_destroy(ctx, Some(collect), sink.as_user_data()),
        RET_OK
    );
}
