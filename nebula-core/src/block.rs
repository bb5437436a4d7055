//! Blocks: immutable (CID, bytes) pairs
//!
//! A block is the unit of storage and exchange. The CID must always match
//! the payload; constructors either compute it or verify it.

use crate::cid::{Cid, DataCodec, HashCodec, MultiHash};
use crate::error::{NebulaError, Result};
use bytes::Bytes;

/// An immutable content-addressed block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    cid: Cid,
    data: Bytes,
}

impl Block {
    /// Create a block by hashing `data` under the default hash codec.
    pub fn new(data: impl Into<Bytes>, codec: DataCodec) -> Self {
        Self::with_hash_codec(data, codec, HashCodec::Sha256)
    }

    /// Create a block by hashing `data` under an explicit hash codec.
    pub fn with_hash_codec(data: impl Into<Bytes>, codec: DataCodec, hash_codec: HashCodec) -> Self {
        let data: Bytes = data.into();
        let cid = Cid::from_data(codec, hash_codec, &data);
        Self { cid, data }
    }

    /// Adopt an existing CID after recomputing and comparing the hash.
    /// Fails with `InvalidBlock` on mismatch.
    pub fn verified(cid: Cid, data: impl Into<Bytes>) -> Result<Self> {
        let data: Bytes = data.into();
        let computed = MultiHash::digest(cid.hash().codec(), &data);
        if &computed != cid.hash() {
            return Err(NebulaError::InvalidBlock);
        }
        Ok(Self { cid, data })
    }

    /// Adopt an existing CID without verification. Only for producers that
    /// just computed the hash themselves.
    pub fn trusted(cid: Cid, data: impl Into<Bytes>) -> Self {
        Self {
            cid,
            data: data.into(),
        }
    }

    pub fn cid(&self) -> &Cid {
        &self.cid
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Consume the block, returning its parts.
    pub fn into_parts(self) -> (Cid, Bytes) {
        (self.cid, self.data)
    }
}
