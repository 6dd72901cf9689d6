//! Configuration management
//!
//! Data directory, node id and the chain parameters (proof-of-work target
//! bits, coinbase subsidy) used when a new chain is created.

pub mod settings;

pub use settings::{Config, DEFAULT_SUBSIDY, DEFAULT_TARGET_BITS, GLOBAL_CONFIG};
