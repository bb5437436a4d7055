//! NebulaStore Network Layer
//!
//! The peer-to-peer transport and discovery implementation is an external
//! collaborator of the node: this crate defines the contract the engine
//! programs against, plus a local-only implementation used when networking
//! is disabled and in tests.
//!
//! The engine holds a handle to a [`BlockExchange`]; the exchange never
//! holds a reference back into the engine. Retry and backoff for
//! individual blocks belong to the exchange implementation, not to the
//! engine.

use nebula_core::block::Block;
use nebula_core::cid::Cid;
use nebula_core::error::{NebulaError, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// A known peer: identity plus dialable addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    /// Peer identity string.
    pub peer_id: String,

    /// Multiaddress strings the peer listens on.
    pub addresses: Vec<String>,
}

/// Block exchange contract between the node engine and the P2P network.
///
/// `fetch*` methods resolve a block from connected peers, or `Ok(None)`
/// when the block cannot be found within the exchange's search window.
pub trait BlockExchange: Send + Sync {
    /// Fetch a single block by CID from the network.
    fn fetch<'a>(
        &'a self,
        cid: &'a Cid,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Block>>> + Send + 'a>>;

    /// Fetch a dataset block by `(tree CID, index)` from the network.
    fn fetch_indexed<'a>(
        &'a self,
        tree: &'a Cid,
        index: u64,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Block>>> + Send + 'a>>;

    /// Dial a peer by identity, preferring the given addresses.
    fn connect<'a>(
        &'a self,
        peer: &'a PeerRecord,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// This node's own peer record.
    fn local_peer(&self) -> PeerRecord;

    /// Signed peer record for discovery announcements.
    fn signed_peer_record(&self) -> String;

    /// Routing table snapshot for the debug surface.
    fn routing_snapshot(&self) -> serde_json::Value;
}

/// Exchange used when peer-to-peer networking is disabled: every fetch
/// misses and connects are rejected.
pub struct LocalOnlyExchange {
    peer: PeerRecord,
}

impl LocalOnlyExchange {
    pub fn new(peer_id: impl Into<String>) -> Self {
        Self {
            peer: PeerRecord {
                peer_id: peer_id.into(),
                addresses: Vec::new(),
            },
        }
    }
}

impl BlockExchange for LocalOnlyExchange {
    fn fetch<'a>(
        &'a self,
        _cid: &'a Cid,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Block>>> + Send + 'a>> {
        Box::pin(async { Ok(None) })
    }

    fn fetch_indexed<'a>(
        &'a self,
        _tree: &'a Cid,
        _index: u64,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Block>>> + Send + 'a>> {
        Box::pin(async { Ok(None) })
    }

    fn connect<'a>(
        &'a self,
        peer: &'a PeerRecord,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            Err(NebulaError::NetworkFailure(format!(
                "networking disabled, cannot connect to {}",
                peer.peer_id
            )))
        })
    }

    fn local_peer(&self) -> PeerRecord {
        self.peer.clone()
    }

    fn signed_peer_record(&self) -> String {
        String::new()
    }

    fn routing_snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "localNode": self.peer.peer_id,
            "nodes": [],
        })
    }
}
