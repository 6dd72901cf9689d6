use crate::core::Block;
use crate::error::{BlockchainError, Result};
use crate::utils::sha256_digest;
use num_bigint::BigUint;

const MAX_NONCE: i64 = i64::MAX;

/// Fixed-target proof of work. A hash is valid when, read as a big-endian
/// unsigned integer, it is strictly below `2^(256 - target_bits)`.
#[derive(Debug, Clone)]
pub struct ProofOfWork {
    target: BigUint,
    target_bits: u32,
}

impl ProofOfWork {
    pub fn new(target_bits: u32) -> ProofOfWork {
        let target = BigUint::from(1u8) << 256u32.saturating_sub(target_bits);
        ProofOfWork {
            target,
            target_bits,
        }
    }

    pub fn get_target_bits(&self) -> u32 {
        self.target_bits
    }

    /// `prev_hash ‖ merkle_root ‖ hex(timestamp) ‖ hex(target_bits) ‖ hex(nonce)`
    pub fn prepare_data(&self, block: &Block, nonce: i64) -> Result<Vec<u8>> {
        let mut data = self.header_prefix(block)?;
        data.extend(format!("{nonce:x}").as_bytes());
        Ok(data)
    }

    fn header_prefix(&self, block: &Block) -> Result<Vec<u8>> {
        let mut data = vec![];
        data.extend(block.get_pre_block_hash());
        data.extend(block.hash_transactions()?);
        data.extend(format!("{:x}", block.get_timestamp()).as_bytes());
        data.extend(format!("{:x}", self.target_bits).as_bytes());
        Ok(data)
    }

    /// Searches nonces upward from zero and returns the first `(nonce, hash)`
    /// under the target. Blocks until found.
    pub fn run(&self, block: &Block) -> Result<(i64, Vec<u8>)> {
        self.run_bounded(block, MAX_NONCE)
    }

    fn run_bounded(&self, block: &Block, max_nonce: i64) -> Result<(i64, Vec<u8>)> {
        let prefix = self.header_prefix(block)?;
        let mut data = Vec::with_capacity(prefix.len() + 16);

        let mut nonce = 0;
        while nonce < max_nonce {
            data.clear();
            data.extend_from_slice(&prefix);
            data.extend(format!("{nonce:x}").as_bytes());

            let hash = sha256_digest(&data);
            if self.meets_target(&hash) {
                return Ok((nonce, hash));
            }
            nonce += 1;
        }
        Err(BlockchainError::NonceExhausted)
    }

    /// Recomputes the hash from the block's stored nonce and checks it
    /// against the target. A block without transactions never validates.
    pub fn validate(&self, block: &Block) -> bool {
        match self.prepare_data(block, block.get_nonce()) {
            Ok(data) => self.meets_target(&sha256_digest(&data)),
            Err(_) => false,
        }
    }

    fn meets_target(&self, hash: &[u8]) -> bool {
        BigUint::from_bytes_be(hash) < self.target
    }
}
