//! Keys and addresses
//!
//! Key-pair generation, Base58Check address encoding and the on-disk
//! wallet collection used by the command-line front-end.

#[allow(clippy::module_inception)]
pub mod wallet;
pub mod wallets;

pub use wallet::{
    address_to_pub_key_hash, convert_address, hash_pub_key, validate_address, Wallet,
    ADDRESS_CHECK_SUM_LEN,
};
pub use wallets::{Wallets, WALLET_FILE};
