#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use alloy_consensus::{Transaction, TxEnvelope};
use alloy_eips::eip2718::Decodable2718;
use alloy_primitives::{keccak256, Address, Bytes, LogData, B256, U256};
use alloy_sol_types::{SolEvent, SolValue};
use async_trait::async_trait;
use serde_json::Value;

use oracle_node::chain::abi::{DataRequested, RandomWordsRequested};
use oracle_node::chain::{ChainClient, Log, LogFilter, Receipt};
use oracle_node::config::ListenerSettings;
use oracle_node::crypto::{KeyPair, SecretKey};
use oracle_node::error::{ChainError, FetchError};
use oracle_node::feed::DataSource;

pub const COORDINATOR: Address = Address::repeat_byte(0xc0);
pub const CONSUMER: Address = Address::repeat_byte(0xaa);
pub const CHAIN_ID: u64 = 31337;
pub const REPORTER_KEY: &str = "4646464646464646464646464646464646464646464646464646464646464646";

pub fn vrf_keys() -> KeyPair {
    KeyPair::from_secret(
        SecretKey::from_hex("c9afa9d845ba75166b5c215767b1d6934e50c3db36e89b127b8a622b120f6721")
            .unwrap(),
    )
}

pub fn listener_settings() -> ListenerSettings {
    ListenerSettings {
        poll_interval: Duration::from_millis(10),
        max_block_range: 100,
        confirmations: 0,
    }
}

#[derive(Default)]
struct ChainState {
    block_number: u64,
    logs: Vec<Log>,
    sent: Vec<Bytes>,
    /// Next nonce the chain will accept; everything below is mined.
    confirmed_nonce: u64,
    /// Unmined transactions by nonce. A resend at the same nonce replaces.
    pending: HashMap<u64, B256>,
    receipts: HashMap<B256, Receipt>,
    failing_sends: u32,
    failing_head_queries: u32,
    failing_log_queries: u32,
    reverting: bool,
    unmined: bool,
    call_response: Bytes,
    calls: Vec<(Address, Bytes)>,
}

/// In-process chain: serves scripted logs and call results, accepts raw
/// transactions and mines them immediately unless told otherwise.
pub struct MockChain {
    state: Mutex<ChainState>,
}

impl MockChain {
    pub fn new(block_number: u64) -> Self {
        Self {
            state: Mutex::new(ChainState {
                block_number,
                ..ChainState::default()
            }),
        }
    }

    pub fn set_block_number(&self, block_number: u64) {
        self.state.lock().unwrap().block_number = block_number;
    }

    pub fn add_log(&self, log: Log) {
        self.state.lock().unwrap().logs.push(log);
    }

    /// Fail the next `count` submissions with a transport error.
    pub fn fail_sends(&self, count: u32) {
        self.state.lock().unwrap().failing_sends = count;
    }

    /// Fail the next `count` block number queries with a transport error.
    pub fn fail_head_queries(&self, count: u32) {
        self.state.lock().unwrap().failing_head_queries = count;
    }

    /// Fail the next `count` log queries with a transport error.
    pub fn fail_log_queries(&self, count: u32) {
        self.state.lock().unwrap().failing_log_queries = count;
    }

    pub fn set_reverting(&self, reverting: bool) {
        self.state.lock().unwrap().reverting = reverting;
    }

    pub fn set_unmined(&self, unmined: bool) {
        self.state.lock().unwrap().unmined = unmined;
    }

    pub fn set_call_response(&self, response: Bytes) {
        self.state.lock().unwrap().call_response = response;
    }

    pub fn insert_receipt(&self, hash: B256, success: bool) {
        let mut state = self.state.lock().unwrap();
        let block_number = state.block_number;
        state.receipts.insert(
            hash,
            Receipt {
                transaction_hash: hash,
                block_number,
                success,
            },
        );
    }

    /// Mine the `index`-th sent transaction. Whatever else was pending at
    /// its nonce is dropped.
    pub fn mine_sent(&self, index: usize) {
        let mut state = self.state.lock().unwrap();
        let raw = state.sent[index].clone();
        let nonce = decode_sent(&raw).nonce;
        let hash = keccak256(&raw);
        state.pending.remove(&nonce);
        state.confirmed_nonce = state.confirmed_nonce.max(nonce + 1);
        let block_number = state.block_number;
        let success = !state.reverting;
        state.receipts.insert(
            hash,
            Receipt {
                transaction_hash: hash,
                block_number,
                success,
            },
        );
    }

    /// Another transaction from the same signer is mined at the next nonce.
    pub fn consume_nonce(&self) {
        let mut state = self.state.lock().unwrap();
        let nonce = state.confirmed_nonce;
        state.pending.remove(&nonce);
        state.confirmed_nonce += 1;
    }

    pub fn sent(&self) -> Vec<Bytes> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn calls(&self) -> Vec<(Address, Bytes)> {
        self.state.lock().unwrap().calls.clone()
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn block_number(&self) -> Result<u64, ChainError> {
        let mut state = self.state.lock().unwrap();
        if state.failing_head_queries > 0 {
            state.failing_head_queries -= 1;
            return Err(ChainError::Transport("connection refused".to_string()));
        }
        Ok(state.block_number)
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<Log>, ChainError> {
        let mut state = self.state.lock().unwrap();
        if state.failing_log_queries > 0 {
            state.failing_log_queries -= 1;
            return Err(ChainError::Transport("connection refused".to_string()));
        }
        Ok(state
            .logs
            .iter()
            .filter(|log| {
                (filter.from_block..=filter.to_block).contains(&log.block_number)
                    && filter.addresses.contains(&log.address)
                    && log.topics.first().is_some_and(|t| filter.topics.contains(t))
            })
            .cloned()
            .collect())
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ChainError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push((to, data));
        Ok(state.call_response.clone())
    }

    async fn transaction_count(&self, _address: Address) -> Result<u64, ChainError> {
        let state = self.state.lock().unwrap();
        let next_pending = state.pending.keys().max().map_or(0, |nonce| nonce + 1);
        Ok(state.confirmed_nonce.max(next_pending))
    }

    async fn gas_price(&self) -> Result<u128, ChainError> {
        Ok(1_000_000_000)
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256, ChainError> {
        let mut state = self.state.lock().unwrap();
        if state.failing_sends > 0 {
            state.failing_sends -= 1;
            return Err(ChainError::Transport("connection reset".to_string()));
        }
        let nonce = decode_sent(&raw).nonce;
        if nonce < state.confirmed_nonce {
            return Err(ChainError::NonceTooLow);
        }
        let hash = keccak256(&raw);
        state.sent.push(raw);
        if state.unmined {
            state.pending.insert(nonce, hash);
        } else {
            state.pending.remove(&nonce);
            state.confirmed_nonce = nonce + 1;
            let receipt = Receipt {
                transaction_hash: hash,
                block_number: state.block_number,
                success: !state.reverting,
            };
            state.receipts.insert(hash, receipt);
        }
        Ok(hash)
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<Receipt>, ChainError> {
        Ok(self.state.lock().unwrap().receipts.get(&hash).cloned())
    }
}

/// Fixed JSON responses by URL.
#[derive(Default)]
pub struct FakeSource {
    responses: HashMap<String, Value>,
}

impl FakeSource {
    pub fn with(mut self, url: &str, value: Value) -> Self {
        self.responses.insert(url.to_string(), value);
        self
    }
}

#[async_trait]
impl DataSource for FakeSource {
    async fn fetch(&self, url: &str) -> Result<Value, FetchError> {
        self.responses.get(url).cloned().ok_or(FetchError::Status(404))
    }
}

fn log_from(encoded: LogData, block_number: u64, log_index: u64) -> Log {
    Log {
        address: COORDINATOR,
        topics: encoded.topics().to_vec(),
        data: encoded.data,
        block_number,
        block_hash: B256::with_last_byte(block_number as u8),
        log_index,
        transaction_hash: B256::repeat_byte(log_index as u8 + 1),
    }
}

pub fn vrf_log(key_hash: B256, request_id: u64, block_number: u64, log_index: u64) -> Log {
    let event = RandomWordsRequested {
        keyHash: key_hash,
        requestId: U256::from(request_id),
        preSeed: U256::from(1_000 + request_id),
        accId: 1,
        callbackGasLimit: 500_000,
        numWords: 2,
        sender: CONSUMER,
        isDirectPayment: false,
    };
    log_from(event.encode_log_data(), block_number, log_index)
}

pub fn data_log(items: &[&str], request_id: u64, block_number: u64, log_index: u64) -> Log {
    let items: Vec<String> = items.iter().map(|s| s.to_string()).collect();
    let event = DataRequested {
        requestId: U256::from(request_id),
        jobId: keccak256("request-response-int256"),
        accId: 3,
        callbackGasLimit: 300_000,
        sender: CONSUMER,
        isDirectPayment: true,
        numSubmission: 1,
        data: Bytes::from(items.abi_encode()),
    };
    log_from(event.encode_log_data(), block_number, log_index)
}

/// Fields of a signed legacy transaction.
#[derive(Debug)]
pub struct SentTransaction {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub to: Address,
    pub data: Bytes,
}

pub fn decode_sent(raw: &Bytes) -> SentTransaction {
    let envelope = TxEnvelope::decode_2718(&mut raw.as_ref()).unwrap();
    let tx = envelope.as_legacy().expect("legacy transaction").tx();
    SentTransaction {
        nonce: tx.nonce,
        gas_price: tx.gas_price,
        gas_limit: tx.gas_limit,
        to: tx.to().expect("call transaction"),
        data: tx.input.clone(),
    }
}
