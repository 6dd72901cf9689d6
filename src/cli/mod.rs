//! Command-line interface
//!
//! Argument definitions for the `utxo-ledger` binary.

pub mod commands;

pub use commands::{Command, Opt};
