//! Content identifiers
//!
//! CIDs are the fundamental addressing unit in NebulaStore. A CID binds a
//! version, a data codec describing the payload kind, and a self-describing
//! multihash. The binary form is a varint sequence; the text form is `z`
//! followed by the base58 encoding of the binary form.

use crate::error::{NebulaError, Result};
use crate::poseidon;
use crate::varint::{read_uvarint, write_uvarint};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Current CID version.
pub const CID_VERSION: u64 = 1;

/// Size in bytes of every supported digest.
pub const DIGEST_SIZE: usize = 32;

/// Hash codec identifying how a digest was computed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum HashCodec {
    /// SHA-256, 32-byte digest.
    Sha256,
    /// Poseidon over the BN254 scalar field, 32-byte canonical element.
    Poseidon2,
}

impl HashCodec {
    /// Multicodec table value.
    pub fn code(self) -> u64 {
        match self {
            HashCodec::Sha256 => 0x12,
            HashCodec::Poseidon2 => 0xb401,
        }
    }

    /// Look up a codec by its table value.
    pub fn from_code(code: u64) -> Result<Self> {
        match code {
            0x12 => Ok(HashCodec::Sha256),
            0xb401 => Ok(HashCodec::Poseidon2),
            other => Err(NebulaError::UnknownCodec(other)),
        }
    }
}

/// Data codec distinguishing block payload kinds.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum DataCodec {
    /// Raw user bytes.
    Block,
    /// An encoded dataset manifest.
    Manifest,
    /// Merkle root marker for a dataset tree.
    DatasetRoot,
}

impl DataCodec {
    /// Multicodec table value.
    pub fn code(self) -> u64 {
        match self {
            DataCodec::Block => 0x55,
            DataCodec::Manifest => 0xb601,
            DataCodec::DatasetRoot => 0xb602,
        }
    }

    /// Look up a codec by its table value.
    pub fn from_code(code: u64) -> Result<Self> {
        match code {
            0x55 => Ok(DataCodec::Block),
            0xb601 => Ok(DataCodec::Manifest),
            0xb602 => Ok(DataCodec::DatasetRoot),
            other => Err(NebulaError::UnknownCodec(other)),
        }
    }
}

/// A self-describing digest: hash codec plus digest bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MultiHash {
    codec: HashCodec,
    digest: [u8; DIGEST_SIZE],
}

impl MultiHash {
    /// Compute the digest of `data` under `codec`.
    pub fn digest(codec: HashCodec, data: &[u8]) -> Self {
        let digest = match codec {
            HashCodec::Sha256 => {
                let mut out = [0u8; DIGEST_SIZE];
                out.copy_from_slice(&Sha256::digest(data));
                out
            }
            HashCodec::Poseidon2 => poseidon::digest(data),
        };
        Self { codec, digest }
    }

    /// Wrap an existing digest without recomputing it.
    pub fn from_parts(codec: HashCodec, digest: [u8; DIGEST_SIZE]) -> Self {
        Self { codec, digest }
    }

    pub fn codec(&self) -> HashCodec {
        self.codec
    }

    pub fn digest_bytes(&self) -> &[u8; DIGEST_SIZE] {
        &self.digest
    }
}

impl fmt::Debug for MultiHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MultiHash({:?}, {})",
            self.codec,
            &hex_prefix(&self.digest)
        )
    }
}

fn hex_prefix(digest: &[u8; DIGEST_SIZE]) -> String {
    digest[..6].iter().map(|b| format!("{:02x}", b)).collect()
}

/// Content identifier: (version, data codec, multihash).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cid {
    version: u64,
    codec: DataCodec,
    hash: MultiHash,
}

impl Cid {
    /// Create a CID from its parts. Only `CID_VERSION` is accepted.
    pub fn new(version: u64, codec: DataCodec, hash: MultiHash) -> Result<Self> {
        if version != CID_VERSION {
            return Err(NebulaError::InvalidCid(format!(
                "unsupported version {}",
                version
            )));
        }
        Ok(Self {
            version,
            codec,
            hash,
        })
    }

    /// Compute the CID of `data` under the given codecs.
    pub fn from_data(codec: DataCodec, hash_codec: HashCodec, data: &[u8]) -> Self {
        Self {
            version: CID_VERSION,
            codec,
            hash: MultiHash::digest(hash_codec, data),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn codec(&self) -> DataCodec {
        self.codec
    }

    pub fn hash(&self) -> &MultiHash {
        &self.hash
    }

    /// Whether this CID addresses an encoded manifest.
    pub fn is_manifest(&self) -> bool {
        self.codec == DataCodec::Manifest
    }

    /// Binary form: version, data codec, hash codec, digest length, digest.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(DIGEST_SIZE + 8);
        write_uvarint(&mut out, self.version);
        write_uvarint(&mut out, self.codec.code());
        write_uvarint(&mut out, self.hash.codec.code());
        write_uvarint(&mut out, DIGEST_SIZE as u64);
        out.extend_from_slice(&self.hash.digest);
        out
    }

    /// Parse the binary form produced by [`Cid::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut offset = 0;
        let mut next = |buf: &[u8]| -> Result<u64> {
            let (value, used) = read_uvarint(&buf[offset..])?;
            offset += used;
            Ok(value)
        };
        let version = next(bytes)?;
        let codec = DataCodec::from_code(next(bytes)?)?;
        let hash_codec = HashCodec::from_code(next(bytes)?)?;
        let digest_len = next(bytes)? as usize;
        if digest_len != DIGEST_SIZE {
            return Err(NebulaError::InvalidCid(format!(
                "unexpected digest length {}",
                digest_len
            )));
        }
        let rest = &bytes[offset..];
        if rest.len() != DIGEST_SIZE {
            return Err(NebulaError::InvalidCid(format!(
                "expected {} digest bytes, got {}",
                DIGEST_SIZE,
                rest.len()
            )));
        }
        let mut digest = [0u8; DIGEST_SIZE];
        digest.copy_from_slice(rest);
        Cid::new(version, codec, MultiHash::from_parts(hash_codec, digest))
    }

    /// Text form: `z` + base58btc of the binary form.
    pub fn to_base58(&self) -> String {
        format!("z{}", bs58::encode(self.to_bytes()).into_string())
    }

    /// Parse the text form. The leading `z` multibase prefix is optional.
    pub fn from_base58(s: &str) -> Result<Self> {
        let body = s.strip_prefix('z').unwrap_or(s);
        let bytes = bs58::decode(body)
            .into_vec()
            .map_err(|e| NebulaError::InvalidCid(e.to_string()))?;
        Self::from_bytes(&bytes)
    }
}

impl FromStr for Cid {
    type Err = NebulaError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_base58(s)
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base58())
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = self.to_base58();
        write!(f, "Cid({})", &text[..text.len().min(12)])
    }
}

impl Serialize for Cid {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_base58())
    }
}

impl<'de> Deserialize<'de> for Cid {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Cid::from_base58(&s).map_err(serde::de::Error::custom)
    }
}
