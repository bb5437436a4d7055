//! Dataset manifests
//!
//! A manifest binds a Merkle tree root to the dataset attributes needed to
//! retrieve and verify it. Manifests travel as blocks: the encoded record
//! is the block payload and the block CID uses the manifest data codec.
//!
//! The wire format is a length-prefixed record of tagged fields:
//! {1: treeCid, 2: blockSize, 3: datasetSize, 4: codec, 5: hashCodec,
//! 6: cidVersion, 7: filename, 8: mimetype}. Tags 7 and 8 are optional;
//! decoders tolerate their absence and skip unknown tags.

use crate::cid::{Cid, DataCodec, HashCodec, CID_VERSION};
use crate::error::{NebulaError, Result};
use crate::varint::{read_uvarint, write_uvarint};
use serde_json::json;

const TAG_TREE_CID: u64 = 1;
const TAG_BLOCK_SIZE: u64 = 2;
const TAG_DATASET_SIZE: u64 = 3;
const TAG_CODEC: u64 = 4;
const TAG_HASH_CODEC: u64 = 5;
const TAG_CID_VERSION: u64 = 6;
const TAG_FILENAME: u64 = 7;
const TAG_MIMETYPE: u64 = 8;

const WIRE_VARINT: u64 = 0;
const WIRE_BYTES: u64 = 2;

/// Metadata describing one stored dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub tree_cid: Cid,
    pub dataset_size: u64,
    pub block_size: u32,
    pub codec: DataCodec,
    pub hash_codec: HashCodec,
    pub cid_version: u64,
    pub filename: Option<String>,
    pub mimetype: Option<String>,
}

impl Manifest {
    /// Create a manifest for a dataset tree. Codecs default to raw blocks
    /// hashed under the tree CID's hash codec.
    pub fn new(tree_cid: Cid, dataset_size: u64, block_size: u32) -> Self {
        Self {
            hash_codec: tree_cid.hash().codec(),
            tree_cid,
            dataset_size,
            block_size,
            codec: DataCodec::Block,
            cid_version: CID_VERSION,
            filename: None,
            mimetype: None,
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

    /// Number of leaf blocks in the dataset.
    pub fn blocks_count(&self) -> u64 {
        if self.block_size == 0 {
            return 0;
        }
        self.dataset_size.div_ceil(u64::from(self.block_size))
    }

    /// Byte length of the block at `index`, truncating the final block.
    pub fn block_len(&self, index: u64) -> u64 {
        let block_size = u64::from(self.block_size);
        let start = index * block_size;
        if start >= self.dataset_size {
            return 0;
        }
        (self.dataset_size - start).min(block_size)
    }

    /// Encode to the tagged binary form.
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(64);
        let tree_bytes = self.tree_cid.to_bytes();
        write_field_bytes(&mut body, TAG_TREE_CID, &tree_bytes);
        write_field_varint(&mut body, TAG_BLOCK_SIZE, u64::from(self.block_size));
        write_field_varint(&mut body, TAG_DATASET_SIZE, self.dataset_size);
        write_field_varint(&mut body, TAG_CODEC, self.codec.code());
        write_field_varint(&mut body, TAG_HASH_CODEC, self.hash_codec.code());
        write_field_varint(&mut body, TAG_CID_VERSION, self.cid_version);
        if let Some(filename) = &self.filename {
            write_field_bytes(&mut body, TAG_FILENAME, filename.as_bytes());
        }
        if let Some(mimetype) = &self.mimetype {
            write_field_bytes(&mut body, TAG_MIMETYPE, mimetype.as_bytes());
        }

        let mut out = Vec::with_capacity(body.len() + 4);
        write_uvarint(&mut out, body.len() as u64);
        out.extend_from_slice(&body);
        out
    }

    /// Decode the form produced by [`Manifest::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (body_len, used) = read_uvarint(bytes)
            .map_err(|_| NebulaError::MalformedManifest("length prefix"))?;
        let body = bytes
            .get(used..used + body_len as usize)
            .ok_or(NebulaError::MalformedManifest("length prefix"))?;

        let mut tree_cid = None;
        let mut block_size = None;
        let mut dataset_size = None;
        let mut codec = None;
        let mut hash_codec = None;
        let mut cid_version = None;
        let mut filename = None;
        let mut mimetype = None;

        let mut offset = 0;
        while offset < body.len() {
            let (header, used) = read_uvarint(&body[offset..])
                .map_err(|_| NebulaError::MalformedManifest("field header"))?;
            offset += used;
            let tag = header >> 3;
            let wire = header & 0x7;
            match wire {
                WIRE_VARINT => {
                    let (value, used) = read_uvarint(&body[offset..])
                        .map_err(|_| NebulaError::MalformedManifest("varint field"))?;
                    offset += used;
                    match tag {
                        TAG_BLOCK_SIZE => {
                            block_size = Some(u32::try_from(value).map_err(|_| {
                                NebulaError::MalformedManifest("blockSize out of range")
                            })?)
                        }
                        TAG_DATASET_SIZE => dataset_size = Some(value),
                        TAG_CODEC => {
                            codec = Some(
                                DataCodec::from_code(value)
                                    .map_err(|_| NebulaError::MalformedManifest("codec"))?,
                            )
                        }
                        TAG_HASH_CODEC => {
                            hash_codec = Some(
                                HashCodec::from_code(value)
                                    .map_err(|_| NebulaError::MalformedManifest("hashCodec"))?,
                            )
                        }
                        TAG_CID_VERSION => cid_version = Some(value),
                        _ => {} // unknown varint field, skipped
                    }
                }
                WIRE_BYTES => {
                    let (len, used) = read_uvarint(&body[offset..])
                        .map_err(|_| NebulaError::MalformedManifest("field length"))?;
                    offset += used;
                    let end = offset
                        .checked_add(len as usize)
                        .ok_or(NebulaError::MalformedManifest("field length"))?;
                    let value = body
                        .get(offset..end)
                        .ok_or(NebulaError::MalformedManifest("field payload"))?;
                    offset = end;
                    match tag {
                        TAG_TREE_CID => {
                            tree_cid = Some(
                                Cid::from_bytes(value)
                                    .map_err(|_| NebulaError::MalformedManifest("treeCid"))?,
                            )
                        }
                        TAG_FILENAME => {
                            filename = Some(decode_utf8(value, "filename")?);
                        }
                        TAG_MIMETYPE => {
                            mimetype = Some(decode_utf8(value, "mimetype")?);
                        }
                        _ => {} // unknown bytes field, skipped
                    }
                }
                _ => return Err(NebulaError::MalformedManifest("unsupported wire type")),
            }
        }

        Ok(Self {
            tree_cid: tree_cid.ok_or(NebulaError::MalformedManifest("treeCid"))?,
            block_size: block_size.ok_or(NebulaError::MalformedManifest("blockSize"))?,
            dataset_size: dataset_size.ok_or(NebulaError::MalformedManifest("datasetSize"))?,
            codec: codec.ok_or(NebulaError::MalformedManifest("codec"))?,
            hash_codec: hash_codec.ok_or(NebulaError::MalformedManifest("hashCodec"))?,
            cid_version: cid_version.ok_or(NebulaError::MalformedManifest("cidVersion"))?,
            filename,
            mimetype,
        })
    }

    /// JSON projection served by the manifest endpoints.
    pub fn to_json(&self) -> serde_json::Value {
        let mut value = json!({
            "treeCid": self.tree_cid.to_base58(),
            "datasetSize": self.dataset_size,
            "blockSize": self.block_size,
            "protected": false,
        });
        let map = value.as_object_mut().expect("object literal");
        if let Some(filename) = &self.filename {
            map.insert("filename".to_string(), json!(filename));
        }
        if let Some(mimetype) = &self.mimetype {
            map.insert("mimetype".to_string(), json!(mimetype));
        }
        value
    }
}

fn decode_utf8(bytes: &[u8], field: &'static str) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|_| NebulaError::MalformedManifest(field))
}

fn write_field_varint(out: &mut Vec<u8>, tag: u64, value: u64) {
    write_uvarint(out, tag << 3 | WIRE_VARINT);
    write_uvarint(out, value);
}

fn write_field_bytes(out: &mut Vec<u8>, tag: u64, value: &[u8]) {
    write_uvarint(out, tag << 3 | WIRE_BYTES);
    write_uvarint(out, value.len() as u64);
    out.extend_from_slice(value);
}

/// Registered top-level MIME types.
const MIME_TOP_LEVEL: &[&str] = &[
    "application",
    "audio",
    "example",
    "font",
    "image",
    "message",
    "model",
    "multipart",
    "text",
    "video",
];

/// Validate an upload MIME type.
pub fn validate_mimetype(value: &str) -> Result<()> {
    let invalid = || {
        NebulaError::InvalidArgument(format!("The MIME type '{}' is not valid.", value))
    };
    let (top, subtype) = value.split_once('/').ok_or_else(invalid)?;
    if !MIME_TOP_LEVEL.contains(&top) {
        return Err(invalid());
    }
    if subtype.is_empty()
        || !subtype
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '+' | '.' | '_'))
    {
        return Err(invalid());
    }
    Ok(())
}

/// Validate an upload filename: rejects empty names, path separators and
/// control characters.
pub fn validate_filename(value: &str) -> Result<()> {
    if value.is_empty()
        || value.contains(['/', '\\', '\0'])
        || value.chars().any(|c| c.is_control())
    {
        return Err(NebulaError::InvalidArgument(format!(
            "The filename '{}' is not valid.",
            value
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cid::{Cid, DataCodec, HashCodec};

    fn tree_cid() -> Cid {
        Cid::from_data(DataCodec::DatasetRoot, HashCodec::Sha256, b"root")
    }

    #[test]
    fn test_roundtrip_with_metadata() {
        let manifest = Manifest::new(tree_cid(), 123_456, 65_536)
            .with_filename("example.txt")
            .with_mimetype("text/plain");
        let decoded = Manifest::decode(&manifest.encode()).unwrap();
        assert_eq!(decoded, manifest);
    }

    #[test]
    fn test_roundtrip_without_metadata() {
        let manifest = Manifest::new(tree_cid(), 12, 4096);
        let decoded = Manifest::decode(&manifest.encode()).unwrap();
        assert_eq!(decoded, manifest);
        assert_eq!(decoded.filename, None);
        assert_eq!(decoded.mimetype, None);
    }

    #[test]
    fn test_missing_required_field_fails() {
        // Encode only optional fields: no treeCid, no sizes.
        let mut body = Vec::new();
        write_field_bytes(&mut body, TAG_FILENAME, b"file.bin");
        let mut bytes = Vec::new();
        write_uvarint(&mut bytes, body.len() as u64);
        bytes.extend_from_slice(&body);

        assert!(matches!(
            Manifest::decode(&bytes),
            Err(NebulaError::MalformedManifest(_))
        ));
    }

    #[test]
    fn test_unknown_tags_are_skipped() {
        let manifest = Manifest::new(tree_cid(), 100, 10);
        let encoded = manifest.encode();

        // Re-frame with an extra unknown field appended.
        let (len, used) = read_uvarint(&encoded).unwrap();
        let mut body = encoded[used..used + len as usize].to_vec();
        write_field_varint(&mut body, 15, 42);
        write_field_bytes(&mut body, 16, b"future");
        let mut bytes = Vec::new();
        write_uvarint(&mut bytes, body.len() as u64);
        bytes.extend_from_slice(&body);

        assert_eq!(Manifest::decode(&bytes).unwrap(), manifest);
    }

    #[test]
    fn test_blocks_count() {
        let manifest = Manifest::new(tree_cid(), 12, 65_536);
        assert_eq!(manifest.blocks_count(), 1);

        let manifest = Manifest::new(tree_cid(), 65_536 * 2 + 1, 65_536);
        assert_eq!(manifest.blocks_count(), 3);
        assert_eq!(manifest.block_len(0), 65_536);
        assert_eq!(manifest.block_len(2), 1);
        assert_eq!(manifest.block_len(3), 0);
    }

    #[test]
    fn test_json_projection() {
        let manifest = Manifest::new(tree_cid(), 12, 65_536)
            .with_filename("hello_world.txt")
            .with_mimetype("text/plain");
        let json = manifest.to_json();
        assert_eq!(json["datasetSize"], 12);
        assert_eq!(json["blockSize"], 65_536);
        assert_eq!(json["filename"], "hello_world.txt");
        assert_eq!(json["mimetype"], "text/plain");
        assert_eq!(json["protected"], false);
        assert_eq!(
            json["treeCid"].as_str().unwrap(),
            manifest.tree_cid.to_base58()
        );
    }

    #[test]
    fn test_mimetype_validation() {
        assert!(validate_mimetype("text/plain").is_ok());
        assert!(validate_mimetype("application/octet-stream").is_ok());
        assert!(validate_mimetype("image/svg+xml").is_ok());

        let err = validate_mimetype("hello/world").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid argument: The MIME type 'hello/world' is not valid."
        );
        assert!(validate_mimetype("noslash").is_err());
        assert!(validate_mimetype("text/").is_err());
    }

    #[test]
    fn test_filename_validation() {
        assert!(validate_filename("hello_world.txt").is_ok());
        assert!(validate_filename("").is_err());
        assert!(validate_filename("../escape").is_err());
        assert!(validate_filename("nul\0name").is_err());
    }
}
