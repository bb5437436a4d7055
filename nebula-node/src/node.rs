//! Node object
//!
//! Wires the block repository, network exchange, engine and session
//! managers together and owns the lifecycle: a node is created from a
//! configuration, started, stopped and closed. Creation bootstraps the
//! data directory (owner-only permissions) and the private key file.

use crate::config::{bootstrap_data_dir, NodeConfig};
use crate::download::DownloadManager;
use crate::engine::NodeEngine;
use crate::upload::UploadManager;
use nebula_core::cid::{Cid, HashCodec, MultiHash};
use nebula_core::error::{NebulaError, Result};
use nebula_net::{BlockExchange, LocalOnlyExchange, PeerRecord};
use nebula_store::{AsyncAdapter, RocksStore, StoreConfig};
use rand::RngCore;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// A running NebulaStore node.
pub struct NebulaNode {
    config: NodeConfig,
    engine: Arc<NodeEngine>,
    uploads: UploadManager,
    downloads: DownloadManager,
    peer_id: String,
    started: AtomicBool,
}

impl NebulaNode {
    /// Create a node from its configuration: bootstrap the data
    /// directory, load or create the private key, open the block
    /// repository and wire the engine.
    pub fn new(config: NodeConfig) -> Result<Self> {
        config.validate()?;
        bootstrap_data_dir(&config.data_dir)?;

        let key = load_or_create_key(&config)?;
        let peer_id = derive_peer_id(&key);

        let store_config = StoreConfig::new(config.repo_dir()).with_quota(config.storage_quota);
        let store = Arc::new(AsyncAdapter(RocksStore::open(store_config)?));
        let network: Arc<dyn BlockExchange> = Arc::new(LocalOnlyExchange::new(peer_id.clone()));

        let engine = Arc::new(NodeEngine::new(
            store,
            network,
            Duration::from_secs(config.block_ttl),
        ));

        info!(peer_id = %peer_id, data_dir = ?config.data_dir, "Node created");
        Ok(Self {
            uploads: UploadManager::new(engine.clone()),
            downloads: DownloadManager::new(engine.clone()),
            engine,
            config,
            peer_id,
            started: AtomicBool::new(false),
        })
    }

    /// Start the node. Starting an already-running node is a no-op.
    pub fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Node already running, start ignored");
            return Ok(());
        }
        info!(peer_id = %self.peer_id, "Node started");
        Ok(())
    }

    /// Stop the node, cancelling tracked background work. The node can be
    /// started again afterwards.
    pub fn stop(&self) -> Result<()> {
        if !self.started.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.engine.shutdown();
        info!("Node stopped");
        Ok(())
    }

    /// Release resources before destruction.
    pub async fn close(&self) -> Result<()> {
        self.stop()?;
        self.engine.store_handle().flush().await?;
        info!("Node closed");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn engine(&self) -> &Arc<NodeEngine> {
        &self.engine
    }

    pub fn uploads(&self) -> &UploadManager {
        &self.uploads
    }

    pub fn downloads(&self) -> &DownloadManager {
        &self.downloads
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// The configured data directory.
    pub fn repo(&self) -> String {
        self.config.data_dir.display().to_string()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Storage space accounting as JSON.
    pub async fn space_json(&self) -> Result<serde_json::Value> {
        let space = self.engine.space().await?;
        Ok(json!({
            "totalBlocks": space.total_blocks,
            "quotaMaxBytes": space.quota_max_bytes,
            "quotaUsedBytes": space.quota_used_bytes,
            "quotaReservedBytes": space.quota_reserved_bytes,
        }))
    }

    /// Stored manifests as a JSON array.
    pub async fn list_json(&self) -> Result<serde_json::Value> {
        let mut entries = Vec::new();
        self.engine
            .iterate_manifests(|cid, manifest| {
                let mut value = manifest.to_json();
                value["cid"] = json!(cid.to_base58());
                entries.push(value);
            })
            .await?;
        Ok(serde_json::Value::Array(entries))
    }

    /// Debug information as JSON.
    pub fn debug_json(&self) -> serde_json::Value {
        let network = self.engine.network_handle();
        json!({
            "id": self.peer_id,
            "addrs": self.config.listen_addrs,
            "spr": network.signed_peer_record(),
            "announceAddresses": self.config.listen_addrs,
            "table": network.routing_snapshot(),
        })
    }

    /// Signed peer record string.
    pub fn spr(&self) -> String {
        self.engine.network_handle().signed_peer_record()
    }

    /// Delete content by CID string.
    pub async fn delete(&self, cid: &str) -> Result<()> {
        let cid = Cid::from_base58(cid)?;
        self.engine.delete(&cid).await
    }

    /// Background-fetch a dataset into the local store.
    pub fn fetch(&self, cid: &str) -> Result<()> {
        let cid = Cid::from_base58(cid)?;
        self.engine.fetch_dataset_detached(cid);
        Ok(())
    }

    /// Local-only existence check.
    pub async fn exists(&self, cid: &str) -> Result<bool> {
        let cid = Cid::from_base58(cid)?;
        self.engine.has_local_block(&cid).await
    }

    /// Connect to a peer through the network exchange.
    pub async fn connect(&self, peer_id: &str, addresses: Vec<String>) -> Result<()> {
        let peer = PeerRecord {
            peer_id: peer_id.to_string(),
            addresses,
        };
        self.engine.network_handle().connect(&peer).await
    }
}

/// Load the node's private key, creating it with owner-only permissions
/// on first start.
fn load_or_create_key(config: &NodeConfig) -> Result<[u8; 32]> {
    let path = config.key_path();
    if path.exists() {
        let content = std::fs::read_to_string(&path)?;
        let bytes = hex::decode(content.trim())
            .map_err(|e| NebulaError::InvalidArgument(format!("corrupt key file: {}", e)))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| NebulaError::InvalidArgument("corrupt key file: bad length".to_string()))?;
        return Ok(key);
    }

    let mut key = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut key);
    std::fs::write(&path, hex::encode(key))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
    }
    info!(path = ?path, "Generated private key");
    Ok(key)
}

/// Peer identity derived from the private key.
fn derive_peer_id(key: &[u8; 32]) -> String {
    let digest = MultiHash::digest(HashCodec::Sha256, key);
    bs58::encode(digest.digest_bytes()).into_string()
}
