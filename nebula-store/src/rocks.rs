//! RocksDB block store
//!
//! Durable block repository using the RocksDB LSM tree. Payloads, the
//! dataset index and inclusion proofs live in separate column families;
//! TTL metadata lives in a sled store beside the database.

use crate::backend::{block_from_stored, indexed_key, BlockStoreSync, ListKind, SpaceReport};
use crate::expiry::ExpiryStore;
use crate::StoreConfig;
use bytes::Bytes;
use nebula_core::block::Block;
use nebula_core::cid::Cid;
use nebula_core::error::{NebulaError, Result};
use nebula_core::merkle::Proof;
use rocksdb::{BlockBasedOptions, Cache, DBCompressionType, Options, WriteOptions, DB};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Column family names
const CF_BLOCKS: &str = "blocks";
const CF_INDEX: &str = "index";
const CF_PROOFS: &str = "proofs";

/// RocksDB-based block store backend.
pub struct RocksStore {
    /// RocksDB instance
    db: DB,

    /// TTL metadata beside the payload database
    expiry: ExpiryStore,

    /// Configuration
    config: StoreConfig,

    /// Accounting, recovered from the column families at open
    block_count: AtomicU64,
    used_bytes: AtomicU64,
    reserved_bytes: AtomicU64,
}

impl RocksStore {
    /// Open or create a block store at the configured path.
    pub fn open(config: StoreConfig) -> Result<Self> {
        info!(path = ?config.path, "Opening block repository");

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        // Tuning for block-sized values with high write throughput
        opts.set_max_open_files(1000);
        opts.set_keep_log_file_num(10);
        opts.set_max_total_wal_size(256 * 1024 * 1024);
        opts.increase_parallelism(config.compaction_threads as i32);
        opts.set_max_background_jobs(config.compaction_threads as i32);

        if config.compression {
            opts.set_compression_type(DBCompressionType::Lz4);
        }

        let cache = Cache::new_lru_cache(config.cache_size);
        let mut block_opts = BlockBasedOptions::default();
        block_opts.set_block_cache(&cache);
        block_opts.set_block_size(64 * 1024);
        block_opts.set_cache_index_and_filter_blocks(true);
        opts.set_block_based_table_factory(&block_opts);

        opts.set_min_write_buffer_number(2);
        opts.set_max_write_buffer_number(4);
        opts.set_write_buffer_size(64 * 1024 * 1024);

        let cf_descriptors = vec![
            rocksdb::ColumnFamilyDescriptor::new(CF_BLOCKS, opts.clone()),
            rocksdb::ColumnFamilyDescriptor::new(CF_INDEX, Options::default()),
            rocksdb::ColumnFamilyDescriptor::new(CF_PROOFS, Options::default()),
        ];

        std::fs::create_dir_all(&config.path).map_err(|e| {
            NebulaError::IoFailure(format!("failed to create repository directory: {}", e))
        })?;

        // Payload database and TTL metadata live in sibling directories.
        let db = DB::open_cf_descriptors(&opts, config.path.join("blocks"), cf_descriptors)
            .map_err(|e| NebulaError::IoFailure(format!("failed to open RocksDB: {}", e)))?;

        let expiry = ExpiryStore::open(config.path.join("meta"))?;

        let store = Self {
            db,
            expiry,
            config,
            block_count: AtomicU64::new(0),
            used_bytes: AtomicU64::new(0),
            reserved_bytes: AtomicU64::new(0),
        };
        store.recover_accounting()?;

        info!(
            blocks = store.block_count.load(Ordering::Relaxed),
            used_bytes = store.used_bytes.load(Ordering::Relaxed),
            "Block repository opened"
        );
        Ok(store)
    }

    /// Open with default configuration at `path`.
    pub fn open_default(path: impl Into<std::path::PathBuf>) -> Result<Self> {
        Self::open(StoreConfig::new(path))
    }

    fn cf_blocks(&self) -> std::sync::Arc<rocksdb::BoundColumnFamily<'_>> {
        self.db
            .cf_handle(CF_BLOCKS)
            .expect("blocks column family should exist")
    }

    fn cf_index(&self) -> std::sync::Arc<rocksdb::BoundColumnFamily<'_>> {
        self.db
            .cf_handle(CF_INDEX)
            .expect("index column family should exist")
    }

    fn cf_proofs(&self) -> std::sync::Arc<rocksdb::BoundColumnFamily<'_>> {
        self.db
            .cf_handle(CF_PROOFS)
            .expect("proofs column family should exist")
    }

    /// Rebuild the quota counters by scanning the column families.
    fn recover_accounting(&self) -> Result<()> {
        let mut count = 0u64;
        let mut used = 0u64;
        for entry in self
            .db
            .iterator_cf(&self.cf_blocks(), rocksdb::IteratorMode::Start)
        {
            let (_, value) =
                entry.map_err(|e| NebulaError::IoFailure(format!("scan failed: {}", e)))?;
            count += 1;
            used += value.len() as u64;
        }

        let mut reserved = 0u64;
        for entry in self
            .db
            .iterator_cf(&self.cf_proofs(), rocksdb::IteratorMode::Start)
        {
            let (key, value) =
                entry.map_err(|e| NebulaError::IoFailure(format!("scan failed: {}", e)))?;
            reserved += (key.len() + value.len()) as u64;
        }

        self.block_count.store(count, Ordering::SeqCst);
        self.used_bytes.store(used, Ordering::SeqCst);
        self.reserved_bytes.store(reserved, Ordering::SeqCst);
        Ok(())
    }

    fn check_quota(&self, requested: u64) -> Result<()> {
        if self.config.quota_max_bytes == 0 {
            return Ok(());
        }
        let used =
            self.used_bytes.load(Ordering::SeqCst) + self.reserved_bytes.load(Ordering::SeqCst);
        if used + requested > self.config.quota_max_bytes {
            return Err(NebulaError::QuotaExceeded {
                used,
                requested,
                max: self.config.quota_max_bytes,
            });
        }
        Ok(())
    }

    /// Compact the database (call periodically for performance).
    pub fn compact(&self) {
        info!("Starting repository compaction");
        self.db
            .compact_range_cf(&self.cf_blocks(), None::<&[u8]>, None::<&[u8]>);
        info!("Repository compaction complete");
    }
}

impl BlockStoreSync for RocksStore {
    fn put(&self, block: &Block) -> Result<()> {
        let key = block.cid().to_bytes();

        // Idempotent: an identical CID means identical content.
        if self.has(block.cid())? {
            return Ok(());
        }
        self.check_quota(block.len() as u64)?;

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(false);

        self.db
            .put_cf_opt(&self.cf_blocks(), &key, block.data(), &write_opts)
            .map_err(|e| NebulaError::IoFailure(format!("write failed: {}", e)))?;

        self.block_count.fetch_add(1, Ordering::SeqCst);
        self.used_bytes
            .fetch_add(block.len() as u64, Ordering::SeqCst);
        debug!(cid = %block.cid(), size = block.len(), "Stored block");
        Ok(())
    }

    fn get(&self, cid: &Cid) -> Result<Option<Block>> {
        let result = self
            .db
            .get_cf(&self.cf_blocks(), cid.to_bytes())
            .map_err(|e| NebulaError::IoFailure(format!("read failed: {}", e)))?;
        Ok(result.map(|data| block_from_stored(*cid, Bytes::from(data))))
    }

    fn get_indexed(&self, tree: &Cid, index: u64) -> Result<Option<Block>> {
        let key = indexed_key(tree, index);
        let cid_bytes = self
            .db
            .get_cf(&self.cf_index(), &key)
            .map_err(|e| NebulaError::IoFailure(format!("index read failed: {}", e)))?;
        match cid_bytes {
            Some(bytes) => {
                let cid = Cid::from_bytes(&bytes)?;
                self.get(&cid)
            }
            None => Ok(None),
        }
    }

    fn has(&self, cid: &Cid) -> Result<bool> {
        let key = cid.to_bytes();

        // Fast path; may_exist can report false positives.
        if !self.db.key_may_exist_cf(&self.cf_blocks(), &key) {
            return Ok(false);
        }
        let result = self
            .db
            .get_cf(&self.cf_blocks(), &key)
            .map_err(|e| NebulaError::IoFailure(format!("exists check failed: {}", e)))?;
        Ok(result.is_some())
    }

    fn delete(&self, cid: &Cid) -> Result<bool> {
        let key = cid.to_bytes();
        let existing = self
            .db
            .get_cf(&self.cf_blocks(), &key)
            .map_err(|e| NebulaError::IoFailure(format!("read failed: {}", e)))?;
        let Some(data) = existing else {
            return Ok(false);
        };

        self.db
            .delete_cf(&self.cf_blocks(), &key)
            .map_err(|e| NebulaError::IoFailure(format!("delete failed: {}", e)))?;

        self.block_count.fetch_sub(1, Ordering::SeqCst);
        self.used_bytes
            .fetch_sub(data.len() as u64, Ordering::SeqCst);
        debug!(cid = %cid, "Deleted block");
        Ok(true)
    }

    fn delete_indexed(&self, tree: &Cid, index: u64) -> Result<bool> {
        let key = indexed_key(tree, index);

        let cid_bytes = self
            .db
            .get_cf(&self.cf_index(), &key)
            .map_err(|e| NebulaError::IoFailure(format!("index read failed: {}", e)))?;

        if let Some(proof) = self
            .db
            .get_cf(&self.cf_proofs(), &key)
            .map_err(|e| NebulaError::IoFailure(format!("proof read failed: {}", e)))?
        {
            self.db
                .delete_cf(&self.cf_proofs(), &key)
                .map_err(|e| NebulaError::IoFailure(format!("proof delete failed: {}", e)))?;
            self.reserved_bytes
                .fetch_sub((key.len() + proof.len()) as u64, Ordering::SeqCst);
        }
        self.db
            .delete_cf(&self.cf_index(), &key)
            .map_err(|e| NebulaError::IoFailure(format!("index delete failed: {}", e)))?;
        self.expiry.remove(&key)?;

        match cid_bytes {
            Some(bytes) => {
                let cid = Cid::from_bytes(&bytes)?;
                self.delete(&cid)
            }
            None => Ok(false),
        }
    }

    fn put_cid_and_proof(&self, tree: &Cid, index: u64, cid: &Cid, proof: &Proof) -> Result<()> {
        let key = indexed_key(tree, index);
        let proof_bytes = proof.to_bytes();

        let already = self
            .db
            .get_cf(&self.cf_proofs(), &key)
            .map_err(|e| NebulaError::IoFailure(format!("proof read failed: {}", e)))?;

        self.db
            .put_cf(&self.cf_index(), &key, cid.to_bytes())
            .map_err(|e| NebulaError::IoFailure(format!("index write failed: {}", e)))?;
        self.db
            .put_cf(&self.cf_proofs(), &key, &proof_bytes)
            .map_err(|e| NebulaError::IoFailure(format!("proof write failed: {}", e)))?;

        if already.is_none() {
            self.reserved_bytes
                .fetch_add((key.len() + proof_bytes.len()) as u64, Ordering::SeqCst);
        }
        Ok(())
    }

    fn get_proof(&self, tree: &Cid, index: u64) -> Result<Option<Proof>> {
        let bytes = self
            .db
            .get_cf(&self.cf_proofs(), indexed_key(tree, index))
            .map_err(|e| NebulaError::IoFailure(format!("proof read failed: {}", e)))?;
        match bytes {
            Some(bytes) => Ok(Some(Proof::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    fn list_blocks(&self, kind: ListKind) -> Result<Vec<Cid>> {
        let mut cids = Vec::new();
        for entry in self
            .db
            .iterator_cf(&self.cf_blocks(), rocksdb::IteratorMode::Start)
        {
            let (key, _) =
                entry.map_err(|e| NebulaError::IoFailure(format!("scan failed: {}", e)))?;
            let Ok(cid) = Cid::from_bytes(&key) else {
                continue;
            };
            match kind {
                ListKind::Manifests if !cid.is_manifest() => continue,
                _ => cids.push(cid),
            }
        }
        Ok(cids)
    }

    fn ensure_expiry(&self, tree: &Cid, index: u64, expiry: i64) -> Result<()> {
        self.expiry.ensure(&indexed_key(tree, index), expiry)
    }

    fn space(&self) -> Result<SpaceReport> {
        Ok(SpaceReport {
            total_blocks: self.block_count.load(Ordering::SeqCst),
            quota_max_bytes: self.config.quota_max_bytes,
            quota_used_bytes: self.used_bytes.load(Ordering::SeqCst),
            quota_reserved_bytes: self.reserved_bytes.load(Ordering::SeqCst),
        })
    }

    fn flush(&self) -> Result<()> {
        self.db
            .flush()
            .map_err(|e| NebulaError::IoFailure(format!("flush failed: {}", e)))?;
        self.expiry.flush()?;
        debug!("Flushed repository to disk");
        Ok(())
    }
}

impl Drop for RocksStore {
    fn drop(&mut self) {
        info!("Closing block repository");
        // RocksDB handles cleanup automatically
    }
}
