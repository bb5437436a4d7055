//! Block store trait
//!
//! Defines the interface that all block repository implementations must
//! follow. Backends implement the synchronous trait; the async trait is
//! what the node engine consumes, with an adapter bridging the two.

use bytes::Bytes;
use nebula_core::block::Block;
use nebula_core::cid::Cid;
use nebula_core::error::Result;
use nebula_core::merkle::Proof;
use std::future::Future;
use std::pin::Pin;

/// Which CIDs a listing returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    /// Only manifest blocks.
    Manifests,
    /// Every stored block.
    All,
}

/// Storage space accounting, served by the space endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpaceReport {
    /// Total number of blocks stored.
    pub total_blocks: u64,

    /// Configured quota in bytes (0 = unlimited).
    pub quota_max_bytes: u64,

    /// Bytes used by block payloads.
    pub quota_used_bytes: u64,

    /// Bytes reserved for dataset metadata (proofs and index entries).
    pub quota_reserved_bytes: u64,
}

impl SpaceReport {
    /// Bytes still available under the quota.
    pub fn bytes_available(&self) -> u64 {
        if self.quota_max_bytes == 0 {
            u64::MAX
        } else {
            self.quota_max_bytes
                .saturating_sub(self.quota_used_bytes + self.quota_reserved_bytes)
        }
    }
}

/// Synchronous block store trait implemented by backends.
pub trait BlockStoreSync: Send + Sync {
    /// Store a block. Idempotent: re-putting an identical CID is a no-op
    /// and does not count against the quota twice.
    fn put(&self, block: &Block) -> Result<()>;

    /// Retrieve a block by CID.
    fn get(&self, cid: &Cid) -> Result<Option<Block>>;

    /// Retrieve a dataset block by `(tree CID, index)`. Only blocks
    /// registered through [`BlockStoreSync::put_cid_and_proof`] resolve.
    fn get_indexed(&self, tree: &Cid, index: u64) -> Result<Option<Block>>;

    /// Check if a block exists.
    fn has(&self, cid: &Cid) -> Result<bool>;

    /// Delete a block. Absent blocks are not an error; returns whether a
    /// block was removed.
    fn delete(&self, cid: &Cid) -> Result<bool>;

    /// Delete a dataset block by `(tree CID, index)`.
    fn delete_indexed(&self, tree: &Cid, index: u64) -> Result<bool>;

    /// Register a dataset block under its tree: maps `(tree, index)` to
    /// the block CID and persists the inclusion proof beside it.
    fn put_cid_and_proof(&self, tree: &Cid, index: u64, cid: &Cid, proof: &Proof) -> Result<()>;

    /// Fetch the stored inclusion proof for `(tree, index)`.
    fn get_proof(&self, tree: &Cid, index: u64) -> Result<Option<Proof>>;

    /// List stored CIDs. Snapshot semantics: a returned CID is fetchable
    /// at least once during the listing's lifetime, modulo concurrent
    /// deletes.
    fn list_blocks(&self, kind: ListKind) -> Result<Vec<Cid>>;

    /// Update TTL metadata for a dataset block.
    fn ensure_expiry(&self, tree: &Cid, index: u64, expiry: i64) -> Result<()>;

    /// Space accounting snapshot.
    fn space(&self) -> Result<SpaceReport>;

    /// Flush any pending writes to disk.
    fn flush(&self) -> Result<()>;
}

/// Async block store trait consumed by the node engine.
///
/// All implementations must be Send + Sync for use in async contexts.
pub trait BlockStore: Send + Sync {
    fn put<'a>(
        &'a self,
        block: Block,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    fn get<'a>(
        &'a self,
        cid: &'a Cid,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Block>>> + Send + 'a>>;

    fn get_indexed<'a>(
        &'a self,
        tree: &'a Cid,
        index: u64,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Block>>> + Send + 'a>>;

    fn has<'a>(
        &'a self,
        cid: &'a Cid,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>>;

    fn delete<'a>(
        &'a self,
        cid: &'a Cid,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>>;

    fn delete_indexed<'a>(
        &'a self,
        tree: &'a Cid,
        index: u64,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>>;

    fn put_cid_and_proof<'a>(
        &'a self,
        tree: &'a Cid,
        index: u64,
        cid: &'a Cid,
        proof: &'a Proof,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    fn get_proof<'a>(
        &'a self,
        tree: &'a Cid,
        index: u64,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Proof>>> + Send + 'a>>;

    fn list_blocks<'a>(
        &'a self,
        kind: ListKind,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Cid>>> + Send + 'a>>;

    fn ensure_expiry<'a>(
        &'a self,
        tree: &'a Cid,
        index: u64,
        expiry: i64,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    fn space<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<SpaceReport>> + Send + 'a>>;

    fn flush<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// Wrapper exposing a sync backend through the async trait.
pub struct AsyncAdapter<T: BlockStoreSync>(pub T);

impl<T: BlockStoreSync + 'static> BlockStore for AsyncAdapter<T> {
    fn put<'a>(
        &'a self,
        block: Block,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move { self.0.put(&block) })
    }

    fn get<'a>(
        &'a self,
        cid: &'a Cid,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Block>>> + Send + 'a>> {
        Box::pin(async move { self.0.get(cid) })
    }

    fn get_indexed<'a>(
        &'a self,
        tree: &'a Cid,
        index: u64,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Block>>> + Send + 'a>> {
        Box::pin(async move { self.0.get_indexed(tree, index) })
    }

    fn has<'a>(
        &'a self,
        cid: &'a Cid,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>> {
        Box::pin(async move { self.0.has(cid) })
    }

    fn delete<'a>(
        &'a self,
        cid: &'a Cid,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>> {
        Box::pin(async move { self.0.delete(cid) })
    }

    fn delete_indexed<'a>(
        &'a self,
        tree: &'a Cid,
        index: u64,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>> {
        Box::pin(async move { self.0.delete_indexed(tree, index) })
    }

    fn put_cid_and_proof<'a>(
        &'a self,
        tree: &'a Cid,
        index: u64,
        cid: &'a Cid,
        proof: &'a Proof,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move { self.0.put_cid_and_proof(tree, index, cid, proof) })
    }

    fn get_proof<'a>(
        &'a self,
        tree: &'a Cid,
        index: u64,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Proof>>> + Send + 'a>> {
        Box::pin(async move { self.0.get_proof(tree, index) })
    }

    fn list_blocks<'a>(
        &'a self,
        kind: ListKind,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Cid>>> + Send + 'a>> {
        Box::pin(async move { self.0.list_blocks(kind) })
    }

    fn ensure_expiry<'a>(
        &'a self,
        tree: &'a Cid,
        index: u64,
        expiry: i64,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move { self.0.ensure_expiry(tree, index, expiry) })
    }

    fn space<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<SpaceReport>> + Send + 'a>> {
        Box::pin(async move { self.0.space() })
    }

    fn flush<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move { self.0.flush() })
    }
}

/// Composite key for dataset index, proof and expiry records:
/// tree digest followed by the big-endian block index.
pub(crate) fn indexed_key(tree: &Cid, index: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(40);
    key.extend_from_slice(tree.hash().digest_bytes());
    key.extend_from_slice(&index.to_be_bytes());
    key
}

/// Reconstruct a block from stored payload bytes. Stored payloads were
/// verified on the way in, so this adopts the CID without rehashing.
pub(crate) fn block_from_stored(cid: Cid, data: Bytes) -> Block {
    Block::trusted(cid, data)
}
