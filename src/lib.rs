//! # utxo-ledger
//!
//! A single-node UTXO ledger: hash-chained blocks secured by a fixed-target
//! proof of work and a Merkle commitment, ECDSA P-256 signed transactions,
//! and a sled-backed index of unspent outputs.
//!
//! ## Layout
//! - `core/`: blocks, transactions, Merkle tree, proof of work, the chain
//! - `storage/`: the unspent-output index (`chainstate` tree)
//! - `wallet/`: key pairs, Base58Check addresses, the wallet file
//! - `config/`: data directory and chain parameters
//! - `utils/`: hashing, signatures and the bincode codec
//! - `cli/`: argument definitions for the binary
//!
//! ## Typical flow
//! 1. [`Blockchain::create_blockchain`] mines the genesis block.
//! 2. [`UTXOSet::reindex`] builds the index once.
//! 3. [`Transaction::new_utxo_transaction`] selects inputs and signs.
//! 4. [`Blockchain::mine_block`] appends, then [`UTXOSet::update`] folds the
//!    block into the index.

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod storage;
pub mod utils;
pub mod wallet;

pub use cli::{Command, Opt};
pub use config::{Config, GLOBAL_CONFIG};
pub use core::{
    Block, Blockchain, BlockchainIterator, MerkleProof, MerkleTree, ProofOfWork, TXInput,
    TXOutput, Transaction,
};
pub use error::{BlockchainError, ErrorKind, Result};
pub use storage::{IndexedOutput, UTXOSet, UnspentOutputs};
pub use utils::{
    base58_decode, base58_encode, current_timestamp, ecdsa_p256_sha256_sign_digest,
    ecdsa_p256_sha256_sign_verify, new_key_pair, ripemd160_digest, sha256_digest,
};
pub use wallet::{
    address_to_pub_key_hash, convert_address, hash_pub_key, validate_address, Wallet, Wallets,
    ADDRESS_CHECK_SUM_LEN,
};
