//! NebulaStore Core Library
//!
//! Core abstractions for the NebulaStore content-addressed storage node.
//! This crate provides:
//! - Multi-codec content identifiers (CIDs) and self-describing hashes
//! - Content-addressed blocks with verification
//! - Merkle trees with keyed compression, inclusion proofs
//! - Dataset manifests and their binary codec
//! - Stream chunking and common error handling

pub mod block;
pub mod chunker;
pub mod cid;
pub mod error;
pub mod manifest;
pub mod merkle;
pub mod poseidon;
pub mod varint;

pub use block::Block;
pub use chunker::{pad_to_block_size, Chunker};
pub use cid::{Cid, DataCodec, HashCodec, MultiHash, CID_VERSION, DIGEST_SIZE};
pub use error::{NebulaError, Result};
pub use manifest::{validate_filename, validate_mimetype, Manifest};
pub use merkle::{compressor_for, CompressKey, Compressor, MerkleTree, Proof};

/// Default leaf size: 64 KiB.
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

/// Largest accepted leaf size: 64 MiB.
pub const MAX_BLOCK_SIZE: usize = 64 * 1024 * 1024;
