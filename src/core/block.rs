use crate::core::{MerkleProof, MerkleTree, ProofOfWork, Transaction};
use crate::error::{BlockchainError, Result};
use crate::utils::{current_timestamp, deserialize, serialize};
use data_encoding::HEXLOWER;
use log::info;
use serde::{Deserialize, Serialize};

/// A mined block. Immutable once `new_block` returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Block {
    timestamp: i64,
    pre_block_hash: Vec<u8>,
    transactions: Vec<Transaction>,
    hash: Vec<u8>,
    nonce: i64,
}

impl Block {
    /// Assembles a block on top of `pre_block_hash` and mines it.
    pub fn new_block(
        pre_block_hash: &[u8],
        transactions: &[Transaction],
        target_bits: u32,
    ) -> Result<Block> {
        if transactions.is_empty() {
            return Err(BlockchainError::InvalidBlock(
                "Block must contain at least one transaction".to_string(),
            ));
        }

        let mut block = Block {
            timestamp: current_timestamp()?,
            pre_block_hash: pre_block_hash.to_vec(),
            transactions: transactions.to_vec(),
            hash: vec![],
            nonce: 0,
        };

        info!(
            "Mining block with {} transactions (target bits: {target_bits})",
            transactions.len()
        );
        let (nonce, hash) = ProofOfWork::new(target_bits).run(&block)?;
        block.nonce = nonce;
        block.hash = hash;
        info!(
            "Proof-of-work completed for block {} at nonce {nonce}",
            HEXLOWER.encode(&block.hash)
        );

        Ok(block)
    }

    /// The first block of a chain: no parent, a single coinbase transaction.
    pub fn generate_genesis_block(coinbase: &Transaction, target_bits: u32) -> Result<Block> {
        Block::new_block(&[], std::slice::from_ref(coinbase), target_bits)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Block> {
        deserialize::<Block>(bytes)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn get_transactions(&self) -> &[Transaction] {
        self.transactions.as_slice()
    }

    pub fn get_pre_block_hash(&self) -> &[u8] {
        self.pre_block_hash.as_slice()
    }

    pub fn get_hash(&self) -> &[u8] {
        self.hash.as_slice()
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn get_nonce(&self) -> i64 {
        self.nonce
    }

    pub fn is_genesis(&self) -> bool {
        self.pre_block_hash.is_empty()
    }

    /// Merkle root over the serialized transactions, in block order.
    pub fn hash_transactions(&self) -> Result<Vec<u8>> {
        MerkleTree::calculate_merkle_root(&self.serialized_transactions()?)
    }

    fn serialized_transactions(&self) -> Result<Vec<Vec<u8>>> {
        self.transactions.iter().map(Transaction::serialize).collect()
    }

    pub fn generate_merkle_proof(&self, transaction_index: usize) -> Result<MerkleProof> {
        MerkleTree::new(&self.serialized_transactions()?)?.generate_proof(transaction_index)
    }

    pub fn verify_merkle_proof(&self, proof: &MerkleProof) -> Result<bool> {
        if proof.merkle_root != self.hash_transactions()? {
            return Ok(false);
        }
        Ok(MerkleTree::verify_proof(proof))
    }

    #[cfg(test)]
    pub(crate) fn with_nonce(&self, nonce: i64) -> Block {
        Block {
            nonce,
            ..self.clone()
        }
    }
}
