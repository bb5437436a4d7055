//! In-memory block store
//!
//! Used for testing and development. Not persistent.

use crate::backend::{block_from_stored, indexed_key, BlockStoreSync, ListKind, SpaceReport};
use bytes::Bytes;
use nebula_core::block::Block;
use nebula_core::cid::Cid;
use nebula_core::error::{NebulaError, Result};
use nebula_core::merkle::Proof;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// In-memory block store backend.
pub struct MemoryStore {
    /// Block payloads keyed by CID bytes.
    blocks: RwLock<HashMap<Vec<u8>, (Cid, Bytes)>>,

    /// Dataset index: (tree digest, index) -> block CID.
    index: RwLock<HashMap<Vec<u8>, Cid>>,

    /// Inclusion proofs, same keying as the index.
    proofs: RwLock<HashMap<Vec<u8>, Proof>>,

    /// TTL metadata, same keying as the index.
    expiry: RwLock<HashMap<Vec<u8>, i64>>,

    /// Quota in bytes (0 = unlimited).
    quota_max_bytes: u64,

    /// Bytes used by payloads.
    used_bytes: AtomicU64,

    /// Bytes reserved for proofs and index entries.
    reserved_bytes: AtomicU64,
}

impl MemoryStore {
    /// Create an unbounded in-memory store.
    pub fn new() -> Self {
        Self::with_quota(0)
    }

    /// Create with a byte quota.
    pub fn with_quota(quota_max_bytes: u64) -> Self {
        Self {
            blocks: RwLock::new(HashMap::new()),
            index: RwLock::new(HashMap::new()),
            proofs: RwLock::new(HashMap::new()),
            expiry: RwLock::new(HashMap::new()),
            quota_max_bytes,
            used_bytes: AtomicU64::new(0),
            reserved_bytes: AtomicU64::new(0),
        }
    }

    /// Drop everything. Test helper.
    pub fn clear(&self) {
        self.blocks.write().clear();
        self.index.write().clear();
        self.proofs.write().clear();
        self.expiry.write().clear();
        self.used_bytes.store(0, Ordering::SeqCst);
        self.reserved_bytes.store(0, Ordering::SeqCst);
    }

    /// Overwrite a stored payload without touching accounting. Test helper
    /// for simulating on-disk corruption.
    pub fn corrupt(&self, cid: &Cid, data: Bytes) {
        if let Some(entry) = self.blocks.write().get_mut(&cid.to_bytes()) {
            entry.1 = data;
        }
    }

    fn check_quota(&self, requested: u64) -> Result<()> {
        if self.quota_max_bytes == 0 {
            return Ok(());
        }
        let used =
            self.used_bytes.load(Ordering::SeqCst) + self.reserved_bytes.load(Ordering::SeqCst);
        if used + requested > self.quota_max_bytes {
            return Err(NebulaError::QuotaExceeded {
                used,
                requested,
                max: self.quota_max_bytes,
            });
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockStoreSync for MemoryStore {
    fn put(&self, block: &Block) -> Result<()> {
        let key = block.cid().to_bytes();
        let mut blocks = self.blocks.write();

        // Idempotent: an identical CID means identical content.
        if blocks.contains_key(&key) {
            return Ok(());
        }

        self.check_quota(block.len() as u64)?;
        blocks.insert(key, (*block.cid(), block.data().clone()));
        self.used_bytes
            .fetch_add(block.len() as u64, Ordering::SeqCst);
        Ok(())
    }

    fn get(&self, cid: &Cid) -> Result<Option<Block>> {
        let blocks = self.blocks.read();
        Ok(blocks
            .get(&cid.to_bytes())
            .map(|(cid, data)| block_from_stored(*cid, data.clone())))
    }

    fn get_indexed(&self, tree: &Cid, index: u64) -> Result<Option<Block>> {
        let cid = match self.index.read().get(&indexed_key(tree, index)) {
            Some(cid) => *cid,
            None => return Ok(None),
        };
        self.get(&cid)
    }

    fn has(&self, cid: &Cid) -> Result<bool> {
        Ok(self.blocks.read().contains_key(&cid.to_bytes()))
    }

    fn delete(&self, cid: &Cid) -> Result<bool> {
        let mut blocks = self.blocks.write();
        if let Some((_, data)) = blocks.remove(&cid.to_bytes()) {
            self.used_bytes
                .fetch_sub(data.len() as u64, Ordering::SeqCst);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn delete_indexed(&self, tree: &Cid, index: u64) -> Result<bool> {
        let key = indexed_key(tree, index);
        let cid = self.index.write().remove(&key);
        if let Some(proof) = self.proofs.write().remove(&key) {
            self.reserved_bytes
                .fetch_sub(proof.to_bytes().len() as u64, Ordering::SeqCst);
        }
        self.expiry.write().remove(&key);
        match cid {
            Some(cid) => self.delete(&cid),
            None => Ok(false),
        }
    }

    fn put_cid_and_proof(&self, tree: &Cid, index: u64, cid: &Cid, proof: &Proof) -> Result<()> {
        let key = indexed_key(tree, index);
        let proof_len = proof.to_bytes().len() as u64;
        let mut proofs = self.proofs.write();
        if !proofs.contains_key(&key) {
            self.reserved_bytes.fetch_add(proof_len, Ordering::SeqCst);
        }
        proofs.insert(key.clone(), proof.clone());
        self.index.write().insert(key, *cid);
        Ok(())
    }

    fn get_proof(&self, tree: &Cid, index: u64) -> Result<Option<Proof>> {
        Ok(self.proofs.read().get(&indexed_key(tree, index)).cloned())
    }

    fn list_blocks(&self, kind: ListKind) -> Result<Vec<Cid>> {
        let blocks = self.blocks.read();
        Ok(blocks
            .values()
            .filter(|(cid, _)| match kind {
                ListKind::Manifests => cid.is_manifest(),
                ListKind::All => true,
            })
            .map(|(cid, _)| *cid)
            .collect())
    }

    fn ensure_expiry(&self, tree: &Cid, index: u64, expiry: i64) -> Result<()> {
        let key = indexed_key(tree, index);
        let mut map = self.expiry.write();
        let entry = map.entry(key).or_insert(expiry);
        // Expiries only ever move forward.
        if expiry > *entry {
            *entry = expiry;
        }
        Ok(())
    }

    fn space(&self) -> Result<SpaceReport> {
        let blocks = self.blocks.read();
        Ok(SpaceReport {
            total_blocks: blocks.len() as u64,
            quota_max_bytes: self.quota_max_bytes,
            quota_used_bytes: self.used_bytes.load(Ordering::SeqCst),
            quota_reserved_bytes: self.reserved_bytes.load(Ordering::SeqCst),
        })
    }

    fn flush(&self) -> Result<()> {
        // No-op for in-memory storage.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nebula_core::cid::DataCodec;

    fn block(data: &'static [u8]) -> Block {
        Block::new(Bytes::from_static(data), DataCodec::Block)
    }

    #[test]
    fn test_put_get() {
        let store = MemoryStore::new();
        let b = block(b"hello world");

        store.put(&b).unwrap();
        let retrieved = store.get(b.cid()).unwrap().unwrap();
        assert_eq!(retrieved.data(), b.data());
    }

    #[test]
    fn test_put_idempotent() {
        let store = MemoryStore::new();
        let b = block(b"hello");

        store.put(&b).unwrap();
        store.put(&b).unwrap();

        let space = store.space().unwrap();
        assert_eq!(space.total_blocks, 1);
        assert_eq!(space.quota_used_bytes, b.len() as u64);
    }

    #[test]
    fn test_delete_absent_is_ok() {
        let store = MemoryStore::new();
        let b = block(b"never stored");
        assert!(!store.delete(b.cid()).unwrap());
    }

    #[test]
    fn test_quota_enforced() {
        let store = MemoryStore::with_quota(10);
        let small = block(b"12345");
        store.put(&small).unwrap();

        let too_big = block(b"0123456789");
        let result = store.put(&too_big);
        assert!(matches!(result, Err(NebulaError::QuotaExceeded { .. })));
    }

    #[test]
    fn test_indexed_lookup_and_delete() {
        let store = MemoryStore::new();
        let tree = Cid::from_data(
            DataCodec::DatasetRoot,
            nebula_core::cid::HashCodec::Sha256,
            b"tree",
        );
        let b = block(b"leaf data");
        store.put(&b).unwrap();

        let proof = Proof::new(nebula_core::cid::HashCodec::Sha256, 0, 1, Vec::new());
        store.put_cid_and_proof(&tree, 0, b.cid(), &proof).unwrap();

        let fetched = store.get_indexed(&tree, 0).unwrap().unwrap();
        assert_eq!(fetched.cid(), b.cid());
        assert_eq!(store.get_proof(&tree, 0).unwrap().unwrap(), proof);
        assert!(store.space().unwrap().quota_reserved_bytes > 0);

        assert!(store.delete_indexed(&tree, 0).unwrap());
        assert!(store.get_indexed(&tree, 0).unwrap().is_none());
        assert!(!store.has(b.cid()).unwrap());
        assert_eq!(store.space().unwrap().quota_reserved_bytes, 0);
    }

    #[test]
    fn test_list_blocks_filters_manifests() {
        let store = MemoryStore::new();
        let raw = block(b"raw bytes");
        let manifest = Block::new(Bytes::from_static(b"manifest bytes"), DataCodec::Manifest);
        store.put(&raw).unwrap();
        store.put(&manifest).unwrap();

        let all = store.list_blocks(ListKind::All).unwrap();
        assert_eq!(all.len(), 2);

        let manifests = store.list_blocks(ListKind::Manifests).unwrap();
        assert_eq!(manifests, vec![*manifest.cid()]);
    }

    #[test]
    fn test_expiry_moves_forward_only() {
        let store = MemoryStore::new();
        let tree = Cid::from_data(
            DataCodec::DatasetRoot,
            nebula_core::cid::HashCodec::Sha256,
            b"tree",
        );
        store.ensure_expiry(&tree, 0, 100).unwrap();
        store.ensure_expiry(&tree, 0, 50).unwrap();
        store.ensure_expiry(&tree, 0, 200).unwrap();
        assert_eq!(
            *store.expiry.read().get(&indexed_key(&tree, 0)).unwrap(),
            200
        );
    }
}
