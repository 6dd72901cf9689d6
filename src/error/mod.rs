//! Error handling for the ledger
//!
//! Every fallible operation returns [`Result`]. Signature verification and
//! proof-of-work validation are not errors: they answer with a `bool`.

use thiserror::Error;

/// Result type alias for ledger operations
pub type Result<T> = std::result::Result<T, BlockchainError>;

/// Coarse classification of a [`BlockchainError`], used by callers that
/// decide whether to halt or to report and carry on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The chain or its index is not in the state the operation requires.
    Integrity,
    /// The caller asked for something that cannot be satisfied (funds, addresses).
    Precondition,
    /// The store, the codec or a crypto primitive failed.
    Storage,
    /// Invalid runtime configuration.
    Config,
}

#[derive(Error, Debug, Clone)]
pub enum BlockchainError {
    #[error("Blockchain already exists at {0}")]
    ChainExists(String),

    #[error("No existing blockchain found at {0}. Create one first.")]
    ChainMissing(String),

    #[error("Nonce space exhausted before a valid hash was found")]
    NonceExhausted,

    #[error("Previous transaction not found: {0}")]
    MissingPriorTransaction(String),

    #[error("Output {vout} of transaction {txid} does not exist")]
    InvalidOutputIndex { txid: String, vout: i64 },

    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    #[error("UTXO index out of order: expected parent {expected}, got {actual}")]
    IndexOutOfOrder { expected: String, actual: String },

    #[error("UTXO record not found for transaction {0}")]
    IndexRecordMissing(String),

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: u64, available: u64 },

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Cryptographic error: {0}")]
    Crypto(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BlockchainError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BlockchainError::ChainExists(_)
            | BlockchainError::ChainMissing(_)
            | BlockchainError::NonceExhausted
            | BlockchainError::MissingPriorTransaction(_)
            | BlockchainError::InvalidOutputIndex { .. }
            | BlockchainError::InvalidBlock(_)
            | BlockchainError::IndexOutOfOrder { .. }
            | BlockchainError::IndexRecordMissing(_) => ErrorKind::Integrity,
            BlockchainError::InsufficientFunds { .. }
            | BlockchainError::InvalidAddress(_)
            | BlockchainError::Transaction(_)
            | BlockchainError::Wallet(_) => ErrorKind::Precondition,
            BlockchainError::Database(_)
            | BlockchainError::Serialization(_)
            | BlockchainError::Crypto(_)
            | BlockchainError::Io(_) => ErrorKind::Storage,
            BlockchainError::Config(_) => ErrorKind::Config,
        }
    }
}

impl From<std::io::Error> for BlockchainError {
    fn from(err: std::io::Error) -> Self {
        BlockchainError::Io(err.to_string())
    }
}

impl From<sled::Error> for BlockchainError {
    fn from(err: sled::Error) -> Self {
        BlockchainError::Database(err.to_string())
    }
}

impl From<sled::transaction::TransactionError<BlockchainError>> for BlockchainError {
    fn from(err: sled::transaction::TransactionError<BlockchainError>) -> Self {
        match err {
            sled::transaction::TransactionError::Abort(e) => e,
            sled::transaction::TransactionError::Storage(e) => e.into(),
        }
    }
}

impl From<bincode::error::EncodeError> for BlockchainError {
    fn from(err: bincode::error::EncodeError) -> Self {
        BlockchainError::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for BlockchainError {
    fn from(err: bincode::error::DecodeError) -> Self {
        BlockchainError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy() {
        assert_eq!(
            BlockchainError::ChainExists("data".into()).kind(),
            ErrorKind::Integrity
        );
        assert_eq!(BlockchainError::NonceExhausted.kind(), ErrorKind::Integrity);
        assert_eq!(
            BlockchainError::InsufficientFunds {
                required: 5,
                available: 4
            }
            .kind(),
            ErrorKind::Precondition
        );
        assert_eq!(
            BlockchainError::Database("boom".into()).kind(),
            ErrorKind::Storage
        );
    }

    #[test]
    fn test_transaction_abort_unwraps() {
        let err: BlockchainError = sled::transaction::TransactionError::Abort(
            BlockchainError::IndexRecordMissing("ab".into()),
        )
        .into();
        assert!(matches!(err, BlockchainError::IndexRecordMissing(_)));
    }
}
