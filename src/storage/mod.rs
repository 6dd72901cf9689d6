//! Derived storage kept next to the chain
//!
//! The unspent-output index lives in the same sled database as the blocks
//! and is maintained incrementally or rebuilt from the chain.

pub mod utxo_set;

pub use utxo_set::{IndexedOutput, UTXOSet, UnspentOutputs};
