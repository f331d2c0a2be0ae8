//! Error types shared across the node.
//!
//! Library code returns these typed errors; task loops and the binary wrap
//! them in `anyhow` with context.

use thiserror::Error;

pub use crate::crypto::vrf::VrfError;

/// Failures while transforming a fetched value.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ReducerError {
    #[error("missing key `{0}` in response")]
    MissingKey(String),
    #[error("index {index} out of bounds for array of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },
    #[error("value is not a number: {0}")]
    NotANumber(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("invalid reducer `{name}`: {reason}")]
    InvalidReducer { name: String, reason: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AggregatorError {
    #[error("cannot aggregate an empty set of values")]
    EmptyInput,
    #[error("unknown aggregator `{0}`")]
    UnknownAggregator(String),
    #[error("{0} cannot be rounded to a 64-bit integer")]
    OutOfRange(String),
}

/// Failures talking to the chain or submitting transactions.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("nonce too low")]
    NonceTooLow,
    #[error("transaction underpriced")]
    Underpriced,
    #[error("transaction {0} reverted")]
    Reverted(String),
    #[error("transaction {0} was not mined in time")]
    NotMined(String),
    #[error("decode error: {0}")]
    Decode(String),
}

impl ChainError {
    /// Build a typed error from a JSON-RPC error object, recognising the
    /// node messages that callers react to.
    pub fn from_rpc(code: i64, message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if lower.contains("nonce too low") {
            ChainError::NonceTooLow
        } else if lower.contains("underpriced") || lower.contains("fee too low") {
            ChainError::Underpriced
        } else {
            ChainError::Rpc { code, message }
        }
    }

    /// Whether another attempt at a bumped price may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ChainError::Transport(_)
            | ChainError::NonceTooLow
            | ChainError::Underpriced
            | ChainError::NotMined(_) => true,
            ChainError::Rpc { code, .. } => *code == -32000 || *code == -32603,
            ChainError::Reverted(_) | ChainError::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for ChainError {
    fn from(err: reqwest::Error) -> Self {
        ChainError::Transport(err.to_string())
    }
}

/// Failures fetching an off-chain data source.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("source returned status {0}")]
    Status(u16),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Backend(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("{0} not found")]
    NotFound(String),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}
