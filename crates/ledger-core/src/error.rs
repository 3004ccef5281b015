use thiserror::Error;

/// Contract violations raised by the ledger core.
///
/// Integrity problems found while validating a chain are not errors; see
/// [`crate::chain::Violation`].
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("difficulty {difficulty} is out of range (max {max})")]
    InvalidDifficulty { difficulty: u32, max: u32 },
    #[error("block index {index} is out of range for a chain of {len} blocks")]
    BlockIndexOutOfRange { index: u64, len: usize },
    #[error("a chain needs at least the genesis block")]
    EmptyChain,
    #[error("nonce space exhausted while mining block {index}")]
    NonceSpaceExhausted { index: u64 },
    #[error("transaction serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LedgerError>;
