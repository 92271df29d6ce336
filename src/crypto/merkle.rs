//! Append-only SHA-256 Merkle log over evidence payloads.
//!
//! Leaves are `SHA256(0x00 ∥ canonical_json(item))`. Interior nodes are
//! `SHA256(0x01 ∥ left_hex ∥ right_hex)` where the operands are the
//! ASCII-hex encodings of the child hashes, not their raw bytes. External
//! proof verifiers depend on that exact preimage, so it is a fixed wire
//! rule, not an implementation detail.
//!
//! The log survives restarts: callers re-seed it with the leaf hashes
//! persisted in the store (ordered by `merkle_index`) via
//! [`MerkleLog::append_leaf_hash`], after which further appends produce the
//! same roots as an uninterrupted run.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::crypto::canonical::canonical_json;

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

#[derive(Debug, Error)]
pub enum MerkleError {
    #[error("proof index {index} out of range (log has {count} leaves)")]
    IndexOutOfRange { index: usize, count: usize },
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Leaf hash of an evidence item: `SHA256(0x00 ∥ canonical_json(item))`.
pub fn hash_leaf(item: &Value) -> String {
    let canonical = canonical_json(item);
    let mut data = Vec::with_capacity(1 + canonical.len());
    data.push(LEAF_PREFIX);
    data.extend_from_slice(&canonical);
    sha256_hex(&data)
}

/// Interior hash of two sibling hashes: `SHA256(0x01 ∥ left_hex ∥ right_hex)`.
/// The operands are the ASCII-hex strings of the children.
pub fn hash_pair(left: &str, right: &str) -> String {
    let mut data = Vec::with_capacity(1 + left.len() + right.len());
    data.push(NODE_PREFIX);
    data.extend_from_slice(left.as_bytes());
    data.extend_from_slice(right.as_bytes());
    sha256_hex(&data)
}

/// Build all tree levels bottom-up. `levels[0]` is the leaves, the last
/// level holds the single root. Odd-length levels duplicate their last
/// element before pairing.
fn build_levels(leaves: &[String]) -> Vec<Vec<String>> {
    if leaves.is_empty() {
        return Vec::new();
    }
    let mut levels = vec![leaves.to_vec()];
    while levels[levels.len() - 1].len() > 1 {
        let mut current = levels[levels.len() - 1].clone();
        if current.len() % 2 != 0 {
            current.push(current[current.len() - 1].clone());
        }
        let parents = current.chunks(2).map(|pair| hash_pair(&pair[0], &pair[1])).collect();
        levels.push(parents);
    }
    levels
}

/// Which side a proof sibling sits on relative to the running hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiblingPosition {
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    pub hash: String,
    pub position: SiblingPosition,
}

/// Inclusion proof for one leaf, independently verifiable against a root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InclusionProof {
    pub leaf_hash: String,
    pub index: usize,
    pub proof_hashes: Vec<ProofStep>,
    pub root_hash: String,
}

/// Append-only Merkle log. Single writer; never reorders or mutates
/// existing leaves.
#[derive(Debug, Default)]
pub struct MerkleLog {
    leaves: Vec<String>,
}

impl MerkleLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of leaves in the log.
    pub fn count(&self) -> usize {
        self.leaves.len()
    }

    /// Current root, or `None` for an empty log. A single-leaf log's root
    /// equals the leaf hash.
    pub fn root(&self) -> Option<String> {
        let levels = build_levels(&self.leaves);
        levels.last().map(|level| level[0].clone())
    }

    /// Hash `item` as a new leaf, append it, and return the leaf hash.
    pub fn append(&mut self, item: &Value) -> String {
        let leaf = hash_leaf(item);
        self.leaves.push(leaf.clone());
        leaf
    }

    /// Append a pre-computed leaf hash without rehashing. Used when seeding
    /// the log from persisted evidence rows at startup.
    pub fn append_leaf_hash(&mut self, leaf_hash: String) {
        self.leaves.push(leaf_hash);
    }

    /// Remove and return the most recently appended leaf.
    ///
    /// Invoked when persisting the matching evidence row fails, so indices
    /// in the store stay dense and the in-memory log never runs ahead of
    /// durable state.
    pub fn retract_last(&mut self) -> Option<String> {
        self.leaves.pop()
    }

    /// Inclusion proof for the leaf at `index`.
    pub fn get_proof(&self, index: usize) -> Result<InclusionProof, MerkleError> {
        if index >= self.leaves.len() {
            return Err(MerkleError::IndexOutOfRange { index, count: self.leaves.len() });
        }

        let levels = build_levels(&self.leaves);
        let mut proof_hashes = Vec::with_capacity(levels.len().saturating_sub(1));
        let mut idx = index;

        for level in &levels[..levels.len() - 1] {
            let mut padded = level.clone();
            if padded.len() % 2 != 0 {
                padded.push(padded[padded.len() - 1].clone());
            }
            let (sibling_idx, position) = if idx % 2 == 0 {
                (idx + 1, SiblingPosition::Right)
            } else {
                (idx - 1, SiblingPosition::Left)
            };
            proof_hashes.push(ProofStep { hash: padded[sibling_idx].clone(), position });
            idx /= 2;
        }

        Ok(InclusionProof {
            leaf_hash: self.leaves[index].clone(),
            index,
            proof_hashes,
            root_hash: levels[levels.len() - 1][0].clone(),
        })
    }

    /// Verify an inclusion proof: fold the leaf through each sibling step,
    /// taking the recorded position, and compare to `root_hash`.
    pub fn verify_proof(leaf_hash: &str, proof_hashes: &[ProofStep], root_hash: &str) -> bool {
        let mut current = leaf_hash.to_string();
        for step in proof_hashes {
            current = match step.position {
                SiblingPosition::Right => hash_pair(&current, &step.hash),
                SiblingPosition::Left => hash_pair(&step.hash, &current),
            };
        }
        current == root_hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(i: usize) -> Value {
        json!({"control_id": format!("LA.{:02}", (i % 4) + 1), "seq": i, "status": if i % 3 == 0 { "fail" } else { "pass" }})
    }

    #[test]
    fn empty_log_has_no_root() {
        let log = MerkleLog::new();
        assert_eq!(log.count(), 0);
        assert_eq!(log.root(), None);
    }

    #[test]
    fn single_leaf_root_equals_leaf() {
        let mut log = MerkleLog::new();
        let leaf = log.append(&item(0));
        assert_eq!(log.root(), Some(leaf));
    }

    #[test]
    fn interior_nodes_hash_hex_strings_not_raw_bytes() {
        let mut log = MerkleLog::new();
        let left = log.append(&item(0));
        let right = log.append(&item(1));

        let mut preimage = vec![0x01u8];
        preimage.extend_from_slice(left.as_bytes());
        preimage.extend_from_slice(right.as_bytes());
        let expected = hex::encode(Sha256::digest(&preimage));
        assert_eq!(log.root(), Some(expected));

        // The raw-byte optimisation would produce a different root; guard
        // against it explicitly.
        let mut raw_preimage = vec![0x01u8];
        raw_preimage.extend_from_slice(&hex::decode(&left).unwrap());
        raw_preimage.extend_from_slice(&hex::decode(&right).unwrap());
        assert_ne!(log.root(), Some(hex::encode(Sha256::digest(&raw_preimage))));
    }

    #[test]
    fn odd_level_duplicates_last_leaf() {
        let mut log = MerkleLog::new();
        let a = log.append(&item(0));
        let b = log.append(&item(1));
        let c = log.append(&item(2));
        let expected = hash_pair(&hash_pair(&a, &b), &hash_pair(&c, &c));
        assert_eq!(log.root(), Some(expected));
    }

    #[test]
    fn seeding_from_leaf_hashes_reconstructs_the_same_root() {
        for n in 1..=17 {
            let mut original = MerkleLog::new();
            let mut hashes = Vec::new();
            for i in 0..n {
                hashes.push(original.append(&item(i)));
            }

            let mut seeded = MerkleLog::new();
            for h in hashes {
                seeded.append_leaf_hash(h);
            }
            assert_eq!(seeded.count(), original.count());
            assert_eq!(seeded.root(), original.root(), "divergence at n={n}");

            // Appending after a seed continues the same chain.
            let mut resumed = original;
            let mut reseeded = seeded;
            resumed.append(&item(n));
            reseeded.append(&item(n));
            assert_eq!(resumed.root(), reseeded.root());
        }
    }

    #[test]
    fn every_leaf_proves_inclusion() {
        for n in 1..=17 {
            let mut log = MerkleLog::new();
            for i in 0..n {
                log.append(&item(i));
            }
            let root = log.root().unwrap();
            for i in 0..n {
                let proof = log.get_proof(i).unwrap();
                assert_eq!(proof.index, i);
                assert_eq!(proof.root_hash, root);
                assert!(
                    MerkleLog::verify_proof(&proof.leaf_hash, &proof.proof_hashes, &root),
                    "proof failed for leaf {i} of {n}"
                );
            }
        }
    }

    #[test]
    fn any_single_bit_flip_invalidates_the_proof() {
        let mut log = MerkleLog::new();
        for i in 0..7 {
            log.append(&item(i));
        }
        let proof = log.get_proof(3).unwrap();
        let root = log.root().unwrap();

        // Flip one hex nibble of the leaf hash.
        let mut leaf = proof.leaf_hash.clone().into_bytes();
        leaf[0] = if leaf[0] == b'a' { b'b' } else { b'a' };
        assert!(!MerkleLog::verify_proof(
            std::str::from_utf8(&leaf).unwrap(),
            &proof.proof_hashes,
            &root
        ));

        // Flip one nibble of each sibling hash in turn.
        for step in 0..proof.proof_hashes.len() {
            let mut tampered = proof.proof_hashes.clone();
            let mut hash = tampered[step].hash.clone().into_bytes();
            hash[0] = if hash[0] == b'a' { b'b' } else { b'a' };
            tampered[step].hash = String::from_utf8(hash).unwrap();
            assert!(!MerkleLog::verify_proof(&proof.leaf_hash, &tampered, &root));
        }

        // Flip one nibble of the root.
        let mut bad_root = root.clone().into_bytes();
        bad_root[0] = if bad_root[0] == b'a' { b'b' } else { b'a' };
        assert!(!MerkleLog::verify_proof(
            &proof.leaf_hash,
            &proof.proof_hashes,
            std::str::from_utf8(&bad_root).unwrap()
        ));

        // Flipping a recorded position also fails.
        let mut flipped = proof.proof_hashes.clone();
        flipped[0].position = match flipped[0].position {
            SiblingPosition::Left => SiblingPosition::Right,
            SiblingPosition::Right => SiblingPosition::Left,
        };
        assert!(!MerkleLog::verify_proof(&proof.leaf_hash, &flipped, &root));
    }

    #[test]
    fn proof_index_out_of_range() {
        let mut log = MerkleLog::new();
        log.append(&item(0));
        match log.get_proof(1) {
            Err(MerkleError::IndexOutOfRange { index: 1, count: 1 }) => {}
            other => panic!("expected out-of-range error, got {other:?}"),
        }
        assert!(MerkleLog::new().get_proof(0).is_err());
    }

    #[test]
    fn retract_last_restores_previous_root() {
        let mut log = MerkleLog::new();
        log.append(&item(0));
        log.append(&item(1));
        let before = log.root();
        let appended = log.append(&item(2));
        assert_ne!(log.root(), before);
        assert_eq!(log.retract_last(), Some(appended));
        assert_eq!(log.root(), before);
        assert_eq!(log.count(), 2);
    }
}
