//! Algebraic hashing over the BN254 scalar field
//!
//! Digests arbitrary byte strings and compresses Merkle nodes with the
//! Poseidon permutation, so tree roots stay representable as single field
//! elements for zero-knowledge consumers.
//!
//! Byte strings are absorbed as 31-byte big-endian limbs (always canonical
//! field elements), with the total byte length absorbed last. Node
//! compression absorbs `(left, right, key)` where `key` is the Merkle
//! layer tag.

use ark_bn254::Fr;
use light_poseidon::{Poseidon, PoseidonBytesHasher};

use crate::cid::DIGEST_SIZE;

/// Limb width used when absorbing raw bytes. 31 bytes is the widest
/// big-endian chunk guaranteed to stay below the BN254 modulus.
const LIMB_SIZE: usize = 31;

/// Digest arbitrary bytes into a canonical field element.
pub fn digest(data: &[u8]) -> [u8; DIGEST_SIZE] {
    let mut hasher =
        Poseidon::<Fr>::new_circom(2).expect("2-input Poseidon parameters should exist");
    let mut state = [0u8; DIGEST_SIZE];
    for limb in data.chunks(LIMB_SIZE) {
        state = hasher
            .hash_bytes_be(&[&state, limb])
            .expect("31-byte limbs are canonical field elements");
    }
    let len_bytes = (data.len() as u64).to_be_bytes();
    hasher
        .hash_bytes_be(&[&state, &len_bytes])
        .expect("length limb is a canonical field element")
}

/// Compress two canonical field elements with a layer key tag.
///
/// Inputs must be canonical (< modulus); digests produced by [`digest`] and
/// the all-zero element always are.
pub fn compress(
    left: &[u8; DIGEST_SIZE],
    right: &[u8; DIGEST_SIZE],
    key: u8,
) -> crate::error::Result<[u8; DIGEST_SIZE]> {
    let mut hasher =
        Poseidon::<Fr>::new_circom(3).expect("3-input Poseidon parameters should exist");
    hasher
        .hash_bytes_be(&[left.as_slice(), right.as_slice(), &[key]])
        .map_err(|e| crate::error::NebulaError::Internal(format!("poseidon compression: {}", e)))
}
