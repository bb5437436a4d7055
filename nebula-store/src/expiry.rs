//! Block TTL metadata store
//!
//! Small sled-backed key-value store tracking when dataset blocks may be
//! garbage collected. Kept separate from the block payload database so
//! expiry sweeps never touch payload files.

use nebula_core::error::{NebulaError, Result};
use std::path::Path;

/// Sled-backed expiry metadata store.
pub struct ExpiryStore {
    db: sled::Db,
}

impl ExpiryStore {
    /// Open or create the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path.as_ref())
            .map_err(|e| NebulaError::IoFailure(format!("failed to open expiry store: {}", e)))?;
        Ok(Self { db })
    }

    /// Record an expiry timestamp, keeping the later of the stored and the
    /// supplied value. Expiries only ever move forward.
    pub fn ensure(&self, key: &[u8], expiry: i64) -> Result<()> {
        self.db
            .update_and_fetch(key, |stored| {
                let current = stored.map(decode).unwrap_or(i64::MIN);
                Some(expiry.max(current).to_be_bytes().to_vec())
            })
            .map_err(|e| NebulaError::IoFailure(format!("expiry write failed: {}", e)))?;
        Ok(())
    }

    /// The stored expiry for `key`, if any.
    pub fn get(&self, key: &[u8]) -> Result<Option<i64>> {
        let value = self
            .db
            .get(key)
            .map_err(|e| NebulaError::IoFailure(format!("expiry read failed: {}", e)))?;
        Ok(value.map(|v| decode(&v)))
    }

    /// Drop the expiry record for `key`.
    pub fn remove(&self, key: &[u8]) -> Result<()> {
        self.db
            .remove(key)
            .map_err(|e| NebulaError::IoFailure(format!("expiry delete failed: {}", e)))?;
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.db
            .flush()
            .map_err(|e| NebulaError::IoFailure(format!("expiry flush failed: {}", e)))?;
        Ok(())
    }
}

fn decode(bytes: &[u8]) -> i64 {
    let mut buf = [0u8; 8];
    if bytes.len() == 8 {
        buf.copy_from_slice(bytes);
    }
    i64::from_be_bytes(buf)
}
