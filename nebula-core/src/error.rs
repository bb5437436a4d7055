//! Error types for NebulaStore
//!
//! Provides a unified error type for all NebulaStore operations.

use thiserror::Error;

/// Result type alias for NebulaStore operations
pub type Result<T> = std::result::Result<T, NebulaError>;

/// Unified error type for NebulaStore
#[derive(Error, Debug)]
pub enum NebulaError {
    // ===== Addressing Errors =====
    #[error("Invalid CID: {0}")]
    InvalidCid(String),

    #[error("Unknown hash codec: {0:#x}")]
    UnknownCodec(u64),

    #[error("Block does not hash to its CID")]
    InvalidBlock,

    // ===== Manifest Errors =====
    #[error("Not a manifest CID: {0}")]
    NotAManifest(String),

    #[error("Malformed manifest: missing field {0}")]
    MalformedManifest(&'static str),

    // ===== Store Errors =====
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage quota exceeded: {used} + {requested} > {max} bytes")]
    QuotaExceeded { used: u64, requested: u64, max: u64 },

    #[error("I/O failure: {0}")]
    IoFailure(String),

    // ===== Network Errors =====
    #[error("Network failure: {0}")]
    NetworkFailure(String),

    // ===== Session Errors =====
    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Operation cancelled")]
    Cancelled,

    // ===== Request Pipeline Errors =====
    #[error("Request dispatch failed: {0}")]
    DispatchFailed(String),

    #[error("Timed out after {0} ms")]
    Timeout(u64),

    // ===== Generic Errors =====
    #[error("Internal error: {0}")]
    Internal(String),
}

impl NebulaError {
    /// Construct an aggregate fetch failure naming the failed block count.
    pub fn failed_blocks(count: usize) -> Self {
        NebulaError::NotFound(format!("{} blocks could not be fetched", count))
    }
}

impl From<std::io::Error> for NebulaError {
    fn from(err: std::io::Error) -> Self {
        NebulaError::IoFailure(err.to_string())
    }
}

impl From<serde_json::Error> for NebulaError {
    fn from(err: serde_json::Error) -> Self {
        NebulaError::Internal(format!("JSON error: {}", err))
    }
}
