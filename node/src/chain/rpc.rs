use std::sync::atomic::{AtomicU64, Ordering};

use alloy_primitives::{Address, Bytes, B256, U128, U64};
use alloy_rpc_types::{Filter, Log as RpcLog, TransactionReceipt};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;

use super::{ChainClient, Log, LogFilter, Receipt};
use crate::error::ChainError;

/// [`ChainClient`] over HTTP JSON-RPC.
pub struct JsonRpcClient {
    rpc_url: String,
    http: Client,
    next_id: AtomicU64,
}

impl TryFrom<RpcLog> for Log {
    type Error = ChainError;

    fn try_from(raw: RpcLog) -> Result<Self, Self::Error> {
        let pending = || ChainError::Decode("log is not part of a block yet".to_string());
        Ok(Log {
            address: raw.inner.address,
            topics: raw.inner.data.topics().to_vec(),
            data: raw.inner.data.data.clone(),
            block_number: raw.block_number.ok_or_else(pending)?,
            block_hash: raw.block_hash.ok_or_else(pending)?,
            log_index: raw.log_index.ok_or_else(pending)?,
            transaction_hash: raw.transaction_hash.ok_or_else(pending)?,
        })
    }
}

impl TryFrom<TransactionReceipt> for Receipt {
    type Error = ChainError;

    fn try_from(raw: TransactionReceipt) -> Result<Self, Self::Error> {
        Ok(Receipt {
            transaction_hash: raw.transaction_hash,
            block_number: raw
                .block_number
                .ok_or_else(|| ChainError::Decode("receipt without a block number".to_string()))?,
            success: raw.status(),
        })
    }
}

fn rpc_filter(filter: &LogFilter) -> Filter {
    Filter::new()
        .address(filter.addresses.clone())
        .event_signature(filter.topics.clone())
        .from_block(filter.from_block)
        .to_block(filter.to_block)
}

impl JsonRpcClient {
    pub fn new(rpc_url: impl Into<String>) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            http: Client::new(),
            next_id: AtomicU64::new(1),
        }
    }

    async fn rpc_call(&self, method: &str, params: Value) -> Result<Value, ChainError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(method, id, "json-rpc request");

        let response = self
            .http
            .post(&self.rpc_url)
            .json(&json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": method,
                "params": params,
            }))
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;

        if let Some(error) = response.get("error") {
            let code = error.pointer("/code").and_then(|v| v.as_i64()).unwrap_or(0);
            let message = error
                .pointer("/message")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown error");
            return Err(ChainError::from_rpc(code, message));
        }

        Ok(response.get("result").cloned().unwrap_or(Value::Null))
    }

    async fn rpc_typed<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, ChainError> {
        let result = self.rpc_call(method, params).await?;
        serde_json::from_value(result).map_err(|err| ChainError::Decode(format!("{method}: {err}")))
    }
}

#[async_trait]
impl ChainClient for JsonRpcClient {
    async fn block_number(&self) -> Result<u64, ChainError> {
        let block: U64 = self.rpc_typed("eth_blockNumber", json!([])).await?;
        Ok(block.to::<u64>())
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<Log>, ChainError> {
        let logs: Vec<RpcLog> = self
            .rpc_typed("eth_getLogs", json!([rpc_filter(filter)]))
            .await?;
        logs.into_iter().map(Log::try_from).collect()
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ChainError> {
        self.rpc_typed("eth_call", json!([{ "to": to, "data": data }, "latest"]))
            .await
    }

    async fn transaction_count(&self, address: Address) -> Result<u64, ChainError> {
        let count: U64 = self
            .rpc_typed("eth_getTransactionCount", json!([address, "pending"]))
            .await?;
        Ok(count.to::<u64>())
    }

    async fn gas_price(&self) -> Result<u128, ChainError> {
        let price: U128 = self.rpc_typed("eth_gasPrice", json!([])).await?;
        Ok(price.to::<u128>())
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256, ChainError> {
        self.rpc_typed("eth_sendRawTransaction", json!([raw])).await
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<Receipt>, ChainError> {
        let receipt: Option<TransactionReceipt> = self
            .rpc_typed("eth_getTransactionReceipt", json!([hash]))
            .await?;
        receipt.map(Receipt::try_from).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_log() -> Value {
        json!({
            "address": "0x5fbdb2315678afecb367f032d93f642f64180aa3",
            "topics": ["0x63373d1c4696214b898952999c9aaec57dac1ee2723cec59bea6888f489a9772"],
            "data": "0x0102",
            "blockNumber": "0x1b4",
            "blockHash": "0x0000000000000000000000000000000000000000000000000000000000000abc",
            "logIndex": "0x2",
            "transactionIndex": "0x0",
            "transactionHash": "0x0000000000000000000000000000000000000000000000000000000000000def",
            "removed": false
        })
    }

    #[test]
    fn rpc_log_decodes_hex_quantities() {
        let log = Log::try_from(serde_json::from_value::<RpcLog>(raw_log()).unwrap()).unwrap();
        assert_eq!(log.block_number, 436);
        assert_eq!(log.log_index, 2);
        assert_eq!(log.data.as_ref(), &[1u8, 2]);
        assert_eq!(log.topics.len(), 1);
    }

    #[test]
    fn pending_logs_are_rejected() {
        let mut raw = raw_log();
        raw["blockNumber"] = Value::Null;
        let log = serde_json::from_value::<RpcLog>(raw).unwrap();
        assert!(matches!(Log::try_from(log), Err(ChainError::Decode(_))));
    }

    #[test]
    fn filter_carries_the_block_range() {
        let filter = rpc_filter(&LogFilter {
            addresses: vec![Address::repeat_byte(0xc0)],
            topics: vec![B256::repeat_byte(1)],
            from_block: 10,
            to_block: 20,
        });
        let encoded = serde_json::to_value(filter).unwrap();
        assert_eq!(encoded["fromBlock"], "0xa");
        assert_eq!(encoded["toBlock"], "0x14");
    }
}
