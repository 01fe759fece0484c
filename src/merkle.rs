//! Merkle accumulator used to derive transaction identifiers.
//!
//! The tree uses domain-separated BLAKE2b-256 hashing to combine leaves.  An
//! odd node at any level is promoted unchanged.

use blake2::digest::Digest;

use crate::data::{Blake2b256, SecureHash};

const MERKLE_DOMAIN: &[u8] = b"CROWDFUND_MERKLE";

fn hash_pair(left: &SecureHash, right: &SecureHash) -> SecureHash {
    let mut hasher = Blake2b256::new();
    hasher.update(MERKLE_DOMAIN);
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    SecureHash::finish(hasher)
}

fn hash_leaf(leaf: &SecureHash) -> SecureHash {
    let mut hasher = Blake2b256::new();
    hasher.update(MERKLE_DOMAIN);
    hasher.update([0u8]); // leaf marker
    hasher.update(leaf.as_bytes());
    SecureHash::finish(hasher)
}

fn hash_empty() -> SecureHash {
    let mut hasher = Blake2b256::new();
    hasher.update(MERKLE_DOMAIN);
    hasher.update([1u8]); // empty marker
    SecureHash::finish(hasher)
}

/// Computes the Merkle root for the provided leaf digests.
pub fn merkle_root(leaves: &[SecureHash]) -> SecureHash {
    if leaves.is_empty() {
        return hash_empty();
    }
    let mut level: Vec<SecureHash> = leaves.iter().map(hash_leaf).collect();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for chunk in level.chunks(2) {
            if chunk.len() == 1 {
                next.push(chunk[0]);
            } else {
                next.push(hash_pair(&chunk[0], &chunk[1]));
            }
        }
        level = next;
    }
    level[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(n: u8) -> SecureHash {
        SecureHash::from_bytes([n; 32])
    }

    #[test]
    fn empty_and_single_roots_differ() {
        assert_ne!(merkle_root(&[]), merkle_root(&[leaf(0)]));
    }

    #[test]
    fn root_depends_on_order() {
        let forward = merkle_root(&[leaf(1), leaf(2), leaf(3)]);
        let reversed = merkle_root(&[leaf(3), leaf(2), leaf(1)]);
        assert_ne!(forward, reversed);
        assert_eq!(forward, merkle_root(&[leaf(1), leaf(2), leaf(3)]));
    }
}
