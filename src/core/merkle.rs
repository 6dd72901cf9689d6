use crate::error::{BlockchainError, Result};
use crate::utils::sha256_digest;
use serde::{Deserialize, Serialize};

/// Merkle tree over an ordered list of serialized transactions.
///
/// Every item is hashed once to form a leaf; parents are `SHA-256(left ‖ right)`.
/// A level with an odd number of nodes pairs its last node with itself, and
/// this includes a leaf level holding a single leaf, so a one-transaction block
/// commits to `H(H(tx) ‖ H(tx))` rather than to the bare leaf.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerkleTree {
    /// `levels[0]` holds the leaves, the last level holds only the root.
    levels: Vec<Vec<Vec<u8>>>,
}

/// Merkle proof for transaction inclusion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    /// Leaf hash being proven (hash of the serialized transaction)
    pub transaction_hash: Vec<u8>,
    pub merkle_root: Vec<u8>,
    /// Sibling hashes from the leaf level upward
    pub proof_path: Vec<ProofElement>,
    pub transaction_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofElement {
    pub hash: Vec<u8>,
    /// True if the sibling sits to the right of the running hash
    pub is_right: bool,
}

impl MerkleTree {
    /// Builds the tree from raw items (each one is hashed to form a leaf).
    pub fn new(items: &[Vec<u8>]) -> Result<Self> {
        if items.is_empty() {
            return Err(BlockchainError::InvalidBlock(
                "Cannot create Merkle tree from empty transaction list".to_string(),
            ));
        }

        let leaves: Vec<Vec<u8>> = items.iter().map(|item| sha256_digest(item)).collect();
        let mut levels = vec![leaves];

        loop {
            let current = &levels[levels.len() - 1];
            if current.len() == 1 && levels.len() > 1 {
                break;
            }
            let next: Vec<Vec<u8>> = current
                .chunks(2)
                .map(|pair| {
                    let left = &pair[0];
                    let right = pair.get(1).unwrap_or(left);
                    Self::hash_pair(left, right)
                })
                .collect();
            levels.push(next);
        }

        Ok(MerkleTree { levels })
    }

    pub fn get_root_hash(&self) -> &[u8] {
        // new() guarantees a final level with exactly one node
        &self.levels[self.levels.len() - 1][0]
    }

    pub fn leaf_count(&self) -> usize {
        self.levels[0].len()
    }

    pub fn generate_proof(&self, transaction_index: usize) -> Result<MerkleProof> {
        if transaction_index >= self.leaf_count() {
            return Err(BlockchainError::InvalidBlock(format!(
                "Transaction index {} out of bounds (max: {})",
                transaction_index,
                self.leaf_count() - 1
            )));
        }

        let mut proof_path = Vec::with_capacity(self.levels.len() - 1);
        let mut index = transaction_index;
        for level in &self.levels[..self.levels.len() - 1] {
            let is_right = index % 2 == 0;
            let sibling = if is_right { index + 1 } else { index - 1 };
            let hash = level.get(sibling).unwrap_or(&level[index]).clone();
            proof_path.push(ProofElement { hash, is_right });
            index /= 2;
        }

        Ok(MerkleProof {
            transaction_hash: self.levels[0][transaction_index].clone(),
            merkle_root: self.get_root_hash().to_vec(),
            proof_path,
            transaction_index,
        })
    }

    pub fn verify_proof(proof: &MerkleProof) -> bool {
        let computed = proof
            .proof_path
            .iter()
            .fold(proof.transaction_hash.clone(), |current, element| {
                if element.is_right {
                    Self::hash_pair(&current, &element.hash)
                } else {
                    Self::hash_pair(&element.hash, &current)
                }
            });
        computed == proof.merkle_root
    }

    /// Root of `items` without keeping the tree around.
    pub fn calculate_merkle_root(items: &[Vec<u8>]) -> Result<Vec<u8>> {
        Ok(Self::new(items)?.get_root_hash().to_vec())
    }

    fn hash_pair(left: &[u8], right: &[u8]) -> Vec<u8> {
        let mut combined = Vec::with_capacity(left.len() + right.len());
        combined.extend_from_slice(left);
        combined.extend_from_slice(right);
        sha256_digest(&combined)
    }
}
