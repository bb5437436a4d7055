//! Node engine
//!
//! Orchestrates the data path: chunking an uploaded stream into a dataset,
//! serving retrievals, prefetching datasets in sliding-window batches and
//! deleting datasets. The engine is single-threaded cooperative: it owns
//! handles to the block store and the network exchange and never retries
//! failed blocks itself.

use crate::tracked::TaskSet;
use bytes::Bytes;
use futures::stream::{FuturesUnordered, StreamExt};
use nebula_core::block::Block;
use nebula_core::chunker::{pad_to_block_size, Chunker};
use nebula_core::cid::{Cid, DataCodec, HashCodec, MultiHash};
use nebula_core::error::{NebulaError, Result};
use nebula_core::manifest::{validate_filename, validate_mimetype, Manifest};
use nebula_core::merkle::MerkleTree;
use nebula_store::{BlockStore, ListKind, SpaceReport};
use nebula_net::BlockExchange;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

/// Default sliding-window size for batched fetches.
pub const DEFAULT_BATCH_SIZE: usize = 1024;

/// Upper bound on blocks delivered per `on_batch` invocation.
pub const MAX_ON_BATCH_BLOCKS: usize = 128;

/// Accumulated work between cooperative yields while deleting datasets.
const DELETE_YIELD_EVERY: Duration = Duration::from_millis(100);

/// Hook invoked for every block persisted during a store operation.
pub type OnBlockStored<'a> = &'a (dyn Fn(u64, &Bytes) + Send + Sync);

/// Hook receiving completed blocks during a batched fetch, in completion
/// order. Returning an error fails the whole operation.
pub type OnBatch<'a> = &'a mut (dyn FnMut(Vec<Block>) -> Result<()> + Send);

/// Parameters for a store operation.
#[derive(Debug, Clone)]
pub struct StoreParams {
    pub block_size: usize,
    pub filename: Option<String>,
    pub mimetype: Option<String>,
    pub hash_codec: HashCodec,
}

impl StoreParams {
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size,
            filename: None,
            mimetype: None,
            hash_codec: HashCodec::Sha256,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_mimetype(mut self, mimetype: impl Into<String>) -> Self {
        self.mimetype = Some(mimetype.into());
        self
    }
}

/// The node engine. Owns one-directional handles to the block store and
/// the network exchange; background work is tracked so `stop` can cancel
/// it deterministically.
pub struct NodeEngine {
    store: Arc<dyn BlockStore>,
    network: Arc<dyn BlockExchange>,
    tasks: TaskSet,
    block_ttl: Duration,
}

impl NodeEngine {
    pub fn new(
        store: Arc<dyn BlockStore>,
        network: Arc<dyn BlockExchange>,
        block_ttl: Duration,
    ) -> Self {
        Self {
            store,
            network,
            tasks: TaskSet::new(),
            block_ttl,
        }
    }

    pub fn store_handle(&self) -> &Arc<dyn BlockStore> {
        &self.store
    }

    pub fn network_handle(&self) -> &Arc<dyn BlockExchange> {
        &self.network
    }

    /// Cancel all tracked background work.
    pub fn shutdown(&self) {
        self.tasks.abort_all();
    }

    /// Chunk `reader` into blocks, persist them, build the dataset tree
    /// and manifest, and return the manifest CID.
    ///
    /// Failure aborts without rolling back already-written blocks; orphan
    /// collection is the block store's concern.
    pub async fn store<R: AsyncRead + Unpin>(
        &self,
        reader: R,
        params: StoreParams,
        on_block_stored: Option<OnBlockStored<'_>>,
    ) -> Result<Cid> {
        if let Some(filename) = &params.filename {
            validate_filename(filename)?;
        }
        if let Some(mimetype) = &params.mimetype {
            validate_mimetype(mimetype)?;
        }

        let mut chunker = Chunker::new(reader, params.block_size)?;
        let mut cids: Vec<Cid> = Vec::new();
        let mut leaves: Vec<[u8; 32]> = Vec::new();

        while let Some(chunk) = chunker.next_chunk().await? {
            let block = Block::with_hash_codec(chunk.clone(), DataCodec::Block, params.hash_codec);
            // The algebraic construction hashes uniform-length leaves, so
            // the terminal chunk is padded for the tree only; the stored
            // block and its CID keep the original bytes.
            let leaf = match params.hash_codec {
                HashCodec::Sha256 => *block.cid().hash().digest_bytes(),
                HashCodec::Poseidon2 => {
                    let padded = pad_to_block_size(&chunk, params.block_size);
                    *MultiHash::digest(HashCodec::Poseidon2, &padded).digest_bytes()
                }
            };
            let cid = *block.cid();
            self.store.put(block).await?;
            if let Some(hook) = on_block_stored {
                hook(cids.len() as u64, &chunk);
            }
            cids.push(cid);
            leaves.push(leaf);
        }

        let dataset_size = chunker.offset();
        let tree = MerkleTree::build_offloaded(params.hash_codec, leaves).await?;
        let tree_cid = Cid::new(
            nebula_core::CID_VERSION,
            DataCodec::DatasetRoot,
            MultiHash::from_parts(params.hash_codec, *tree.root()),
        )?;

        let expiry = self.expiry_timestamp();
        for (index, cid) in cids.iter().enumerate() {
            let proof = tree.get_proof(index)?;
            self.store
                .put_cid_and_proof(&tree_cid, index as u64, cid, &proof)
                .await?;
            if let Some(expiry) = expiry {
                self.store
                    .ensure_expiry(&tree_cid, index as u64, expiry)
                    .await?;
            }
        }

        let mut manifest = Manifest::new(tree_cid, dataset_size, params.block_size as u32);
        manifest.filename = params.filename;
        manifest.mimetype = params.mimetype;

        let manifest_block = Block::new(manifest.encode(), DataCodec::Manifest);
        let manifest_cid = *manifest_block.cid();
        self.store.put(manifest_block).await?;

        debug!(
            cid = %manifest_cid,
            dataset_size,
            blocks = cids.len(),
            "Stored dataset"
        );
        Ok(manifest_cid)
    }

    /// Fetch and decode a manifest. Rejects non-manifest CIDs.
    pub async fn fetch_manifest(&self, cid: &Cid) -> Result<Manifest> {
        if !cid.is_manifest() {
            return Err(NebulaError::NotAManifest(cid.to_base58()));
        }
        let block = self.resolve_block(cid, false).await?;
        Manifest::decode(block.data())
    }

    /// Local-only variant of [`NodeEngine::fetch_manifest`].
    pub async fn fetch_manifest_local(&self, cid: &Cid) -> Result<Manifest> {
        if !cid.is_manifest() {
            return Err(NebulaError::NotAManifest(cid.to_base58()));
        }
        let block = self.resolve_block(cid, true).await?;
        Manifest::decode(block.data())
    }

    /// Retrieve content as a lazy byte stream in index order.
    ///
    /// Non-manifest CIDs yield a single block. Manifest CIDs stream every
    /// dataset block, truncating the final one so the total equals the
    /// dataset size. When `local` is false a background prefetch warms the
    /// local store from peers.
    pub async fn retrieve(
        self: &Arc<Self>,
        cid: Cid,
        local: bool,
    ) -> Result<ReceiverStream<Result<Bytes>>> {
        let (tx, rx) = mpsc::channel::<Result<Bytes>>(8);

        if !cid.is_manifest() {
            let block = self.resolve_block(&cid, local).await?;
            let _ = tx.send(Ok(block.data().clone())).await;
            return Ok(ReceiverStream::new(rx));
        }

        let manifest = if local {
            self.fetch_manifest_local(&cid).await?
        } else {
            self.fetch_manifest(&cid).await?
        };

        if !local {
            let engine = Arc::clone(self);
            let warm = manifest.clone();
            self.tasks.spawn(async move {
                if let Err(e) = engine
                    .fetch_batched(&warm, DEFAULT_BATCH_SIZE, false, None)
                    .await
                {
                    debug!(error = %e, "Background dataset warm-up incomplete");
                }
            });
        }

        let engine = Arc::clone(self);
        self.tasks.spawn(async move {
            let blocks = manifest.blocks_count();
            for index in 0..blocks {
                let result = engine.fetch_dataset_block(&manifest, index, local).await;
                let item = result.map(|block| {
                    let want = manifest.block_len(index) as usize;
                    block.data().slice(..want.min(block.len()))
                });
                let failed = item.is_err();
                if tx.send(item).await.is_err() {
                    // Receiver dropped: the retrieval was cancelled.
                    return;
                }
                if failed {
                    return;
                }
            }
        });

        Ok(ReceiverStream::new(rx))
    }

    /// Sliding-window prefetch over the dataset's block indices.
    ///
    /// Keeps up to `batch_size` requests in flight, consumes completions in
    /// completion order, and refills the window once three quarters of it
    /// completed. With `fetch_local == false`, indices already present
    /// locally are skipped before issuance. Individual block failures are
    /// counted and reported in aggregate; nothing is retried here.
    pub async fn fetch_batched(
        &self,
        manifest: &Manifest,
        batch_size: usize,
        fetch_local: bool,
        mut on_batch: Option<OnBatch<'_>>,
    ) -> Result<()> {
        let batch_size = batch_size.max(1);
        let refill_threshold = (batch_size * 3).div_ceil(4).max(1);
        let refill_size = refill_threshold;
        let flush_at = batch_size.min(MAX_ON_BATCH_BLOCKS);

        let mut indices = 0..manifest.blocks_count();
        let mut in_flight: FuturesUnordered<
            Pin<Box<dyn Future<Output = (u64, Result<Block>)> + Send + '_>>,
        > = FuturesUnordered::new();

        for _ in 0..batch_size {
            match self.next_issuable(&mut indices, manifest, fetch_local).await {
                Some(index) => in_flight.push(Box::pin(async move {
                    (index, self.fetch_dataset_block(manifest, index, false).await)
                })),
                None => break,
            }
        }

        let mut completed_in_window = 0usize;
        let mut failures = 0usize;
        let mut buffer: Vec<Block> = Vec::new();

        while let Some((index, result)) = in_flight.next().await {
            match result {
                Ok(block) => {
                    if let Some(hook) = on_batch.as_deref_mut() {
                        buffer.push(block);
                        if buffer.len() >= flush_at {
                            hook(std::mem::take(&mut buffer))?;
                        }
                    }
                }
                Err(e) => {
                    debug!(index, error = %e, "Block fetch failed");
                    failures += 1;
                }
            }

            completed_in_window += 1;
            if completed_in_window >= refill_threshold {
                for _ in 0..refill_size {
                    match self.next_issuable(&mut indices, manifest, fetch_local).await {
                        Some(index) => in_flight.push(Box::pin(async move {
                            (index, self.fetch_dataset_block(manifest, index, false).await)
                        })),
                        None => break,
                    }
                }
                completed_in_window = 0;
            }
        }

        if let Some(hook) = on_batch.as_deref_mut() {
            if !buffer.is_empty() {
                hook(std::mem::take(&mut buffer))?;
            }
        }

        if failures > 0 {
            return Err(NebulaError::failed_blocks(failures));
        }
        Ok(())
    }

    /// Prefetch a whole dataset into the local store.
    pub async fn fetch_dataset(&self, cid: &Cid) -> Result<Manifest> {
        let manifest = self.fetch_manifest(cid).await?;
        self.fetch_batched(&manifest, DEFAULT_BATCH_SIZE, true, None)
            .await?;
        Ok(manifest)
    }

    /// Prefetch a dataset in the background. The task is tracked and
    /// cancelled on shutdown.
    pub fn fetch_dataset_detached(self: &Arc<Self>, cid: Cid) {
        let engine = Arc::clone(self);
        self.tasks.spawn(async move {
            match engine.fetch_dataset(&cid).await {
                Ok(manifest) => debug!(
                    cid = %cid,
                    blocks = manifest.blocks_count(),
                    "Background fetch complete"
                ),
                Err(e) => warn!(cid = %cid, error = %e, "Background fetch failed"),
            }
        });
    }

    /// Delete content. For manifests the whole dataset is removed,
    /// yielding to the scheduler every 100 ms of accumulated work; missing
    /// blocks are tolerated and the first unexpected error is returned.
    pub async fn delete(&self, cid: &Cid) -> Result<()> {
        if !cid.is_manifest() {
            self.store.delete(cid).await?;
            return Ok(());
        }

        let Some(block) = self.store.get(cid).await? else {
            // Not stored locally: deleting is a no-op.
            return Ok(());
        };
        let manifest = Manifest::decode(block.data())?;

        let mut first_error: Option<NebulaError> = None;
        let mut window = tokio::time::Instant::now();
        for index in 0..manifest.blocks_count() {
            if let Err(e) = self.store.delete_indexed(&manifest.tree_cid, index).await {
                debug!(index, error = %e, "Dataset block delete failed");
                first_error.get_or_insert(e);
            }
            if window.elapsed() >= DELETE_YIELD_EVERY {
                tokio::task::yield_now().await;
                window = tokio::time::Instant::now();
            }
        }

        self.store.delete(cid).await?;
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Decode and visit every manifest in the block store.
    pub async fn iterate_manifests(
        &self,
        mut callback: impl FnMut(&Cid, &Manifest),
    ) -> Result<()> {
        let cids = self.store.list_blocks(ListKind::Manifests).await?;
        for cid in cids {
            let Some(block) = self.store.get(&cid).await? else {
                continue; // concurrently deleted
            };
            match Manifest::decode(block.data()) {
                Ok(manifest) => callback(&cid, &manifest),
                Err(e) => warn!(cid = %cid, error = %e, "Skipping undecodable manifest"),
            }
        }
        Ok(())
    }

    /// Local-only presence predicate; never touches the network.
    pub async fn has_local_block(&self, cid: &Cid) -> Result<bool> {
        self.store.has(cid).await
    }

    /// Space accounting snapshot.
    pub async fn space(&self) -> Result<SpaceReport> {
        self.store.space().await
    }

    fn expiry_timestamp(&self) -> Option<i64> {
        if self.block_ttl.is_zero() {
            return None;
        }
        let now = SystemTime::now().duration_since(UNIX_EPOCH).ok()?;
        Some((now + self.block_ttl).as_secs() as i64)
    }

    /// Resolve a block locally, falling back to the network unless
    /// `local` is set. Network hits are verified and cached locally.
    async fn resolve_block(&self, cid: &Cid, local: bool) -> Result<Block> {
        if let Some(block) = self.store.get(cid).await? {
            return Ok(block);
        }
        if !local {
            if let Some(block) = self.network.fetch(cid).await? {
                let (cid, data) = block.into_parts();
                let block = Block::verified(cid, data)?;
                self.store.put(block.clone()).await?;
                return Ok(block);
            }
        }
        Err(NebulaError::NotFound(cid.to_base58()))
    }

    /// Resolve block `index` of a dataset, verifying payload integrity.
    async fn fetch_dataset_block(
        &self,
        manifest: &Manifest,
        index: u64,
        local: bool,
    ) -> Result<Block> {
        let tree = &manifest.tree_cid;
        if let Some(block) = self.store.get_indexed(tree, index).await? {
            let (cid, data) = block.into_parts();
            return Block::verified(cid, data);
        }
        if !local {
            if let Some(block) = self.network.fetch_indexed(tree, index).await? {
                let (cid, data) = block.into_parts();
                let block = Block::verified(cid, data)?;
                self.store.put(block.clone()).await?;
                return Ok(block);
            }
        }
        Err(NebulaError::NotFound(format!(
            "block {} of {}",
            index,
            tree.to_base58()
        )))
    }

    async fn next_issuable(
        &self,
        indices: &mut std::ops::Range<u64>,
        manifest: &Manifest,
        fetch_local: bool,
    ) -> Option<u64> {
        for index in indices.by_ref() {
            if !fetch_local {
                let present = self
                    .store
                    .get_indexed(&manifest.tree_cid, index)
                    .await
                    .ok()
                    .flatten()
                    .is_some();
                if present {
                    continue;
                }
            }
            return Some(index);
        }
        None
    }
}
