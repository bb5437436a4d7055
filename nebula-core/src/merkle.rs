//! Merkle trees over block digests
//!
//! The tree is stored flattened, layer by layer: layer 0 holds the leaves,
//! each following layer has `ceil(prev / 2)` nodes, and the top layer holds
//! the root. Nodes are combined with a keyed compression function; an
//! unpaired last node is compressed against the codec zero element with the
//! Odd key variants. Proofs record the sibling path bottom-up and are
//! verified by re-applying the same key policy.

use crate::cid::{HashCodec, DIGEST_SIZE};
use crate::error::{NebulaError, Result};
use crate::poseidon;
use crate::varint::{read_uvarint, write_uvarint};
use sha2::{Digest, Sha256};

/// Leaf counts at or above this build inside `spawn_blocking`.
const OFFLOAD_THRESHOLD: usize = 4096;

/// Key tag passed to the compression function, selecting the layer and
/// odd-child context of the step.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CompressKey {
    None,
    BottomLayer,
    Odd,
    OddAndBottomLayer,
}

impl CompressKey {
    /// Stable single-byte encoding used by keyed compressors.
    pub fn tag(self) -> u8 {
        match self {
            CompressKey::None => 0,
            CompressKey::BottomLayer => 1,
            CompressKey::Odd => 2,
            CompressKey::OddAndBottomLayer => 3,
        }
    }

    fn for_step(bottom: bool, odd: bool) -> Self {
        match (bottom, odd) {
            (true, true) => CompressKey::OddAndBottomLayer,
            (true, false) => CompressKey::BottomLayer,
            (false, true) => CompressKey::Odd,
            (false, false) => CompressKey::None,
        }
    }
}

/// Two-to-one keyed compression over digests.
///
/// Implementations that do not need the key (plain SHA-256 concatenation)
/// ignore it but still accept it.
pub trait Compressor: Send + Sync {
    fn codec(&self) -> HashCodec;

    /// The designated right sibling for unpaired nodes.
    fn zero(&self) -> [u8; DIGEST_SIZE] {
        [0u8; DIGEST_SIZE]
    }

    fn compress(
        &self,
        left: &[u8; DIGEST_SIZE],
        right: &[u8; DIGEST_SIZE],
        key: CompressKey,
    ) -> Result<[u8; DIGEST_SIZE]>;
}

/// SHA-256 concatenation compressor. The key is accepted and ignored.
pub struct Sha256Compressor;

impl Compressor for Sha256Compressor {
    fn codec(&self) -> HashCodec {
        HashCodec::Sha256
    }

    fn compress(
        &self,
        left: &[u8; DIGEST_SIZE],
        right: &[u8; DIGEST_SIZE],
        _key: CompressKey,
    ) -> Result<[u8; DIGEST_SIZE]> {
        let mut hasher = Sha256::new();
        hasher.update(left);
        hasher.update(right);
        let mut out = [0u8; DIGEST_SIZE];
        out.copy_from_slice(&hasher.finalize());
        Ok(out)
    }
}

/// Poseidon compressor over BN254; the key is absorbed as a third element.
pub struct PoseidonCompressor;

impl Compressor for PoseidonCompressor {
    fn codec(&self) -> HashCodec {
        HashCodec::Poseidon2
    }

    fn compress(
        &self,
        left: &[u8; DIGEST_SIZE],
        right: &[u8; DIGEST_SIZE],
        key: CompressKey,
    ) -> Result<[u8; DIGEST_SIZE]> {
        poseidon::compress(left, right, key.tag())
    }
}

static SHA256_COMPRESSOR: Sha256Compressor = Sha256Compressor;
static POSEIDON_COMPRESSOR: PoseidonCompressor = PoseidonCompressor;

/// The compressor for a hash codec.
pub fn compressor_for(codec: HashCodec) -> &'static dyn Compressor {
    match codec {
        HashCodec::Sha256 => &SHA256_COMPRESSOR,
        HashCodec::Poseidon2 => &POSEIDON_COMPRESSOR,
    }
}

/// Node counts per layer, leaves first. A single leaf still gets a
/// compression round, so `nodes_per_level(1) == [1, 1]`.
pub fn nodes_per_level(leaf_count: usize) -> Vec<usize> {
    if leaf_count == 1 {
        return vec![1, 1];
    }
    let mut levels = Vec::new();
    let mut count = leaf_count;
    levels.push(count);
    while count > 1 {
        count = count.div_ceil(2);
        levels.push(count);
    }
    levels
}

/// A Merkle tree with a flattened node buffer.
pub struct MerkleTree {
    codec: HashCodec,
    leaf_count: usize,
    levels: Vec<usize>,
    nodes: Vec<[u8; DIGEST_SIZE]>,
}

impl MerkleTree {
    /// Build a tree over `leaves`. Fails with `InvalidArgument` on an
    /// empty leaf set.
    pub fn build(codec: HashCodec, leaves: &[[u8; DIGEST_SIZE]]) -> Result<Self> {
        if leaves.is_empty() {
            return Err(NebulaError::InvalidArgument(
                "cannot build a Merkle tree over zero leaves".to_string(),
            ));
        }
        let compressor = compressor_for(codec);
        let levels = nodes_per_level(leaves.len());
        let total: usize = levels.iter().sum();
        let mut nodes = Vec::with_capacity(total);
        nodes.extend_from_slice(leaves);

        let zero = compressor.zero();
        let mut level_start = 0;
        for (level, &width) in levels.iter().enumerate() {
            if level + 1 == levels.len() {
                break;
            }
            let bottom = level == 0;
            for pair in 0..levels[level + 1] {
                let left_idx = level_start + pair * 2;
                let left = nodes[left_idx];
                let parent = if pair * 2 + 1 < width {
                    let right = nodes[left_idx + 1];
                    compressor.compress(&left, &right, CompressKey::for_step(bottom, false))?
                } else {
                    compressor.compress(&left, &zero, CompressKey::for_step(bottom, true))?
                };
                nodes.push(parent);
            }
            level_start += width;
        }

        Ok(Self {
            codec,
            leaf_count: leaves.len(),
            levels,
            nodes,
        })
    }

    /// Build on a blocking worker thread when the tree is large.
    ///
    /// The await is not cancellable: dropping the returned future detaches
    /// the worker rather than interrupting it mid-write, so the node buffer
    /// is never freed underneath it. The result is identical to
    /// [`MerkleTree::build`].
    pub async fn build_offloaded(
        codec: HashCodec,
        leaves: Vec<[u8; DIGEST_SIZE]>,
    ) -> Result<Self> {
        if leaves.len() < OFFLOAD_THRESHOLD {
            return Self::build(codec, &leaves);
        }
        tokio::task::spawn_blocking(move || Self::build(codec, &leaves))
            .await
            .map_err(|e| NebulaError::Internal(format!("merkle worker: {}", e)))?
    }

    /// Reconstruct a tree from a previously flattened node buffer.
    pub fn from_nodes(
        codec: HashCodec,
        nodes: Vec<[u8; DIGEST_SIZE]>,
        leaf_count: usize,
    ) -> Result<Self> {
        if leaf_count == 0 {
            return Err(NebulaError::InvalidArgument(
                "leaf count must be positive".to_string(),
            ));
        }
        let levels = nodes_per_level(leaf_count);
        let expected: usize = levels.iter().sum();
        if nodes.len() != expected {
            return Err(NebulaError::InvalidArgument(format!(
                "node buffer holds {} entries, expected {}",
                nodes.len(),
                expected
            )));
        }
        Ok(Self {
            codec,
            leaf_count,
            levels,
            nodes,
        })
    }

    pub fn codec(&self) -> HashCodec {
        self.codec
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    /// The flattened node buffer, leaves first.
    pub fn nodes(&self) -> &[[u8; DIGEST_SIZE]] {
        &self.nodes
    }

    pub fn leaves(&self) -> &[[u8; DIGEST_SIZE]] {
        &self.nodes[..self.leaf_count]
    }

    pub fn root(&self) -> &[u8; DIGEST_SIZE] {
        &self.nodes[self.nodes.len() - 1]
    }

    fn level_slice(&self, level: usize) -> &[[u8; DIGEST_SIZE]] {
        let start: usize = self.levels[..level].iter().sum();
        &self.nodes[start..start + self.levels[level]]
    }

    /// Produce an inclusion proof for the leaf at `index`.
    pub fn get_proof(&self, index: usize) -> Result<Proof> {
        if index >= self.leaf_count {
            return Err(NebulaError::InvalidArgument(format!(
                "leaf index {} out of range for {} leaves",
                index, self.leaf_count
            )));
        }
        let zero = compressor_for(self.codec).zero();
        let mut path = Vec::with_capacity(self.levels.len().saturating_sub(1));
        let mut i = index;
        for level in 0..self.levels.len() {
            let width = self.levels[level];
            if width == 1 {
                break;
            }
            let sibling = i ^ 1;
            if sibling < width {
                path.push(self.level_slice(level)[sibling]);
            } else {
                path.push(zero);
            }
            i >>= 1;
        }
        Ok(Proof {
            codec: self.codec,
            index,
            leaf_count: self.leaf_count,
            path,
        })
    }
}

/// An inclusion proof: leaf index, bottom-up sibling path, and leaf count.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Proof {
    codec: HashCodec,
    index: usize,
    leaf_count: usize,
    path: Vec<[u8; DIGEST_SIZE]>,
}

impl Proof {
    pub fn new(
        codec: HashCodec,
        index: usize,
        leaf_count: usize,
        path: Vec<[u8; DIGEST_SIZE]>,
    ) -> Self {
        Self {
            codec,
            index,
            leaf_count,
            path,
        }
    }

    pub fn codec(&self) -> HashCodec {
        self.codec
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    pub fn path(&self) -> &[[u8; DIGEST_SIZE]] {
        &self.path
    }

    /// Recompute the root implied by `leaf` under this proof.
    pub fn reconstruct_root(&self, leaf: &[u8; DIGEST_SIZE]) -> Result<[u8; DIGEST_SIZE]> {
        let compressor = compressor_for(self.codec);
        if self.index >= self.leaf_count {
            return Err(NebulaError::InvalidArgument(format!(
                "proof index {} out of range for {} leaves",
                self.index, self.leaf_count
            )));
        }
        if self.leaf_count == 1 {
            if !self.path.is_empty() {
                return Err(NebulaError::InvalidArgument(
                    "single-leaf proof must have an empty path".to_string(),
                ));
            }
            let zero = compressor.zero();
            return compressor.compress(leaf, &zero, CompressKey::OddAndBottomLayer);
        }
        let expected_len = nodes_per_level(self.leaf_count).len() - 1;
        if self.path.len() != expected_len {
            return Err(NebulaError::InvalidArgument(format!(
                "proof path holds {} entries, expected {}",
                self.path.len(),
                expected_len
            )));
        }

        let mut current = *leaf;
        let mut i = self.index;
        let mut width = self.leaf_count;
        for (level, sibling) in self.path.iter().enumerate() {
            let odd = width % 2 == 1 && i == width - 1;
            let key = CompressKey::for_step(level == 0, odd);
            current = if i % 2 == 0 {
                compressor.compress(&current, sibling, key)?
            } else {
                compressor.compress(sibling, &current, key)?
            };
            i >>= 1;
            width = width.div_ceil(2);
        }
        Ok(current)
    }

    /// Verify that `leaf` at this proof's index is included under `root`.
    pub fn verify(&self, leaf: &[u8; DIGEST_SIZE], root: &[u8; DIGEST_SIZE]) -> Result<bool> {
        Ok(&self.reconstruct_root(leaf)? == root)
    }

    /// Serialize for persistence beside the dataset index.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + self.path.len() * DIGEST_SIZE);
        write_uvarint(&mut out, self.codec.code());
        write_uvarint(&mut out, self.index as u64);
        write_uvarint(&mut out, self.leaf_count as u64);
        write_uvarint(&mut out, self.path.len() as u64);
        for node in &self.path {
            out.extend_from_slice(node);
        }
        out
    }

    /// Parse the form produced by [`Proof::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut offset = 0;
        let mut next = |buf: &[u8]| -> Result<u64> {
            let (value, used) = read_uvarint(&buf[offset..])?;
            offset += used;
            Ok(value)
        };
        let codec = HashCodec::from_code(next(bytes)?)?;
        let index = next(bytes)? as usize;
        let leaf_count = next(bytes)? as usize;
        let path_len = next(bytes)? as usize;
        let rest = &bytes[offset..];
        if rest.len() != path_len * DIGEST_SIZE {
            return Err(NebulaError::InvalidArgument(
                "truncated proof path".to_string(),
            ));
        }
        let mut path = Vec::with_capacity(path_len);
        for chunk in rest.chunks_exact(DIGEST_SIZE) {
            let mut node = [0u8; DIGEST_SIZE];
            node.copy_from_slice(chunk);
            path.push(node);
        }
        Ok(Self {
            codec,
            index,
            leaf_count,
            path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(n: usize) -> Vec<[u8; DIGEST_SIZE]> {
        (0..n)
            .map(|i| {
                let mut leaf = [0u8; DIGEST_SIZE];
                leaf[..8].copy_from_slice(&(i as u64).to_be_bytes());
                leaf
            })
            .collect()
    }

    #[test]
    fn test_nodes_per_level_shapes() {
        assert_eq!(nodes_per_level(1), vec![1, 1]);
        assert_eq!(nodes_per_level(2), vec![2, 1]);
        assert_eq!(nodes_per_level(3), vec![3, 2, 1]);
        assert_eq!(nodes_per_level(5), vec![5, 3, 2, 1]);
        assert_eq!(nodes_per_level(8), vec![8, 4, 2, 1]);
    }

    #[test]
    fn test_build_determinism() {
        let input = leaves(7);
        let a = MerkleTree::build(HashCodec::Sha256, &input).unwrap();
        let b = MerkleTree::build(HashCodec::Sha256, &input).unwrap();
        assert_eq!(a.root(), b.root());
        assert_eq!(a.nodes(), b.nodes());
    }

    #[tokio::test]
    async fn test_offloaded_build_matches_sync() {
        // Above and below the offload threshold.
        for n in [64usize, OFFLOAD_THRESHOLD + 3] {
            let input = leaves(n);
            let sync = MerkleTree::build(HashCodec::Sha256, &input).unwrap();
            let offloaded = MerkleTree::build_offloaded(HashCodec::Sha256, input)
                .await
                .unwrap();
            assert_eq!(sync.root(), offloaded.root());
            assert_eq!(sync.nodes(), offloaded.nodes());
        }
    }

    #[test]
    fn test_empty_leaf_set_rejected() {
        let result = MerkleTree::build(HashCodec::Sha256, &[]);
        assert!(matches!(result, Err(NebulaError::InvalidArgument(_))));
    }

    #[test]
    fn test_proof_soundness() {
        for n in 1..=9usize {
            let input = leaves(n);
            let tree = MerkleTree::build(HashCodec::Sha256, &input).unwrap();
            for (i, leaf) in input.iter().enumerate() {
                let proof = tree.get_proof(i).unwrap();
                assert!(proof.verify(leaf, tree.root()).unwrap(), "n={} i={}", n, i);

                let mut wrong = *leaf;
                wrong[0] ^= 0xff;
                assert!(!proof.verify(&wrong, tree.root()).unwrap());
            }
        }
    }

    #[test]
    fn test_single_leaf_tree() {
        let input = leaves(1);
        let tree = MerkleTree::build(HashCodec::Sha256, &input).unwrap();
        assert_eq!(tree.nodes().len(), 2);

        // Root is the leaf through one round with the single-node policy.
        let expected = Sha256Compressor
            .compress(&input[0], &[0u8; DIGEST_SIZE], CompressKey::OddAndBottomLayer)
            .unwrap();
        assert_eq!(tree.root(), &expected);

        let proof = tree.get_proof(0).unwrap();
        assert!(proof.path().is_empty());
        assert!(proof.verify(&input[0], tree.root()).unwrap());
    }

    #[test]
    fn test_odd_leaf_from_nodes_rebuild() {
        for n in [3usize, 5, 6, 7, 9] {
            assert!(!n.is_power_of_two());
            let input = leaves(n);
            let tree = MerkleTree::build(HashCodec::Sha256, &input).unwrap();
            let rebuilt =
                MerkleTree::from_nodes(HashCodec::Sha256, tree.nodes().to_vec(), n).unwrap();
            assert_eq!(rebuilt.root(), tree.root());
            for (i, leaf) in input.iter().enumerate() {
                let proof = rebuilt.get_proof(i).unwrap();
                assert!(proof.verify(leaf, rebuilt.root()).unwrap());
            }
        }
    }

    #[test]
    fn test_from_nodes_rejects_bad_buffer() {
        let tree = MerkleTree::build(HashCodec::Sha256, &leaves(4)).unwrap();
        let mut nodes = tree.nodes().to_vec();
        nodes.pop();
        assert!(MerkleTree::from_nodes(HashCodec::Sha256, nodes, 4).is_err());
    }

    #[test]
    fn test_proof_out_of_range() {
        let tree = MerkleTree::build(HashCodec::Sha256, &leaves(4)).unwrap();
        assert!(tree.get_proof(4).is_err());
    }

    #[test]
    fn test_proof_serialization_roundtrip() {
        let tree = MerkleTree::build(HashCodec::Sha256, &leaves(5)).unwrap();
        let proof = tree.get_proof(3).unwrap();
        let decoded = Proof::from_bytes(&proof.to_bytes()).unwrap();
        assert_eq!(decoded, proof);
        assert!(decoded.verify(&leaves(5)[3], tree.root()).unwrap());
    }

    #[test]
    fn test_poseidon_tree_differs_and_verifies() {
        let input = leaves(4);
        let sha = MerkleTree::build(HashCodec::Sha256, &input).unwrap();
        let pos = MerkleTree::build(HashCodec::Poseidon2, &input).unwrap();
        assert_ne!(sha.root(), pos.root());

        let proof = pos.get_proof(2).unwrap();
        assert!(proof.verify(&input[2], pos.root()).unwrap());
        assert!(!proof.verify(&input[2], sha.root()).unwrap());
    }
}
