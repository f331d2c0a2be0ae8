//! Access to an EVM chain: reading logs and state, and submitting signed
//! transactions.

pub mod abi;
pub mod rpc;
pub mod signer;

use alloy_primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ChainError;

pub use rpc::JsonRpcClient;
pub use signer::{legacy_transaction, SignedTransaction, Wallet};

/// A log entry as returned by `eth_getLogs`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Log {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: u64,
    pub block_hash: B256,
    pub log_index: u64,
    pub transaction_hash: B256,
}

/// Logs emitted by any of `addresses` whose first topic is one of `topics`,
/// within an inclusive block range.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogFilter {
    pub addresses: Vec<Address>,
    pub topics: Vec<B256>,
    pub from_block: u64,
    pub to_block: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub transaction_hash: B256,
    pub block_number: u64,
    pub success: bool,
}

/// What the reporter asks to have signed and sent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    pub to: Address,
    pub data: Bytes,
    pub gas_limit: u64,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn block_number(&self) -> Result<u64, ChainError>;

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<Log>, ChainError>;

    /// `eth_call` against the latest block.
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ChainError>;

    /// Nonce for the next transaction from `address`, counting pending ones.
    async fn transaction_count(&self, address: Address) -> Result<u64, ChainError>;

    async fn gas_price(&self) -> Result<u128, ChainError>;

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256, ChainError>;

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<Receipt>, ChainError>;
}
