//! NebulaStore Node
//!
//! The node engine and its surroundings:
//! - `NodeEngine`: store, retrieve, batched fetch and delete of datasets
//! - `UploadManager` / `DownloadManager`: per-session state machines
//! - `NodeConfig`: JSON configuration
//! - `NebulaNode`: component wiring and lifecycle

pub mod config;
pub mod download;
pub mod engine;
pub mod node;
pub mod tracked;
pub mod upload;

pub use config::NodeConfig;
pub use download::{DownloadManager, DownloadState};
pub use engine::{NodeEngine, StoreParams, DEFAULT_BATCH_SIZE, MAX_ON_BATCH_BLOCKS};
pub use node::NebulaNode;
pub use upload::{UploadManager, UploadState};

/// Library version string.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Source revision the library was built from.
pub fn revision() -> &'static str {
    option_env!("NEBULA_REVISION").unwrap_or("unknown")
}
