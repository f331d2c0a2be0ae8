//! Polls coordinator contracts for request events and records each new
//! request together with its worker job.
//!
//! The listener keeps its position as a checkpoint in the state store and
//! advances it only after every log in a block range has been recorded, so
//! a restart re-reads at most one range. Re-reading is harmless: requests are
//! deduplicated by id when they are added.

use std::sync::Arc;

use alloy_primitives::{hex, Address, B256};
use alloy_sol_types::{SolCall, SolEvent};
use anyhow::Result;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::chain::abi::{
    decode_data_requested, decode_random_words_requested, fulfillDataRequestInt256Call,
    fulfillRandomWordsCall, DataRequested, RandomWordsRequested,
};
use crate::chain::{ChainClient, Log, LogFilter};
use crate::config::ListenerSettings;
use crate::error::ChainError;
use crate::models::{Checkpoint, Job, PipelineState, Request, RequestPayload, Service};
use crate::store::{checkpoint_key, StateStore};

/// Counts from one poll.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub from_block: u64,
    pub to_block: u64,
    pub logs: usize,
    pub added: usize,
    pub duplicates: usize,
    pub ignored: usize,
}

pub struct Listener {
    service: Service,
    chain_name: String,
    chain: Arc<dyn ChainClient>,
    store: Arc<dyn StateStore>,
    addresses: Vec<Address>,
    settings: ListenerSettings,
    /// VRF requests for other keys are ignored.
    key_hash: Option<B256>,
}

impl Listener {
    pub fn new(
        service: Service,
        chain_name: impl Into<String>,
        chain: Arc<dyn ChainClient>,
        store: Arc<dyn StateStore>,
        addresses: Vec<Address>,
        settings: ListenerSettings,
        key_hash: Option<B256>,
    ) -> Self {
        Self {
            service,
            chain_name: chain_name.into(),
            chain,
            store,
            addresses,
            settings,
            key_hash,
        }
    }

    fn topic(&self) -> B256 {
        match self.service {
            Service::Vrf => RandomWordsRequested::SIGNATURE_HASH,
            _ => DataRequested::SIGNATURE_HASH,
        }
    }

    pub async fn run(self) -> Result<()> {
        if self.addresses.is_empty() {
            warn!(service = %self.service, "listener disabled: no coordinator addresses configured");
            return Ok(());
        }
        info!(service = %self.service, chain = %self.chain_name, contracts = self.addresses.len(), "listener started");

        loop {
            match self.poll_once().await {
                Ok(summary) if summary.logs > 0 => info!(
                    service = %self.service,
                    from_block = summary.from_block,
                    to_block = summary.to_block,
                    added = summary.added,
                    duplicates = summary.duplicates,
                    "listener cycle complete"
                ),
                Ok(summary) => debug!(service = %self.service, to_block = summary.to_block, "no new requests"),
                Err(err) => error!(service = %self.service, error = %err, "listener poll cycle failed"),
            }
            sleep(self.settings.poll_interval).await;
        }
    }

    pub async fn poll_once(&self) -> Result<PollSummary> {
        let latest = self.chain.block_number().await?;
        let head = latest.saturating_sub(self.settings.confirmations);
        let key = checkpoint_key(self.service, &self.chain_name);

        let next_block = match self.store.load_checkpoint(&key).await? {
            Some(checkpoint) => checkpoint.next_block,
            None => {
                self.store
                    .save_checkpoint(&key, Checkpoint { next_block: head })
                    .await?;
                head
            }
        };
        if next_block > head {
            return Ok(PollSummary {
                from_block: next_block,
                to_block: head,
                ..PollSummary::default()
            });
        }

        let to_block = head.min(next_block + self.settings.max_block_range - 1);
        let filter = LogFilter {
            addresses: self.addresses.clone(),
            topics: vec![self.topic()],
            from_block: next_block,
            to_block,
        };
        let mut logs = self.chain.get_logs(&filter).await?;
        logs.sort_by_key(|log| (log.block_number, log.log_index));

        let mut summary = PollSummary {
            from_block: next_block,
            to_block,
            logs: logs.len(),
            ..PollSummary::default()
        };

        for log in &logs {
            let request = match self.normalize(log) {
                Ok(Some(request)) => request,
                Ok(None) => {
                    summary.ignored += 1;
                    continue;
                }
                Err(err) => {
                    error!(
                        service = %self.service,
                        tx_hash = %log.transaction_hash,
                        log_index = log.log_index,
                        error = %err,
                        "undecodable request log"
                    );
                    summary.ignored += 1;
                    continue;
                }
            };

            let request_id = request.request_id.clone();
            let job = Job::new(&request_id, &request)?;
            let state = PipelineState::new(self.service, &request_id, Some(request));
            if self.store.add_request(state, job).await? {
                info!(service = %self.service, request_id = %request_id, block = log.block_number, "request added");
                summary.added += 1;
            } else {
                debug!(service = %self.service, request_id = %request_id, "duplicate request ignored");
                summary.duplicates += 1;
            }
        }

        self.store
            .save_checkpoint(&key, Checkpoint { next_block: to_block + 1 })
            .await?;
        Ok(summary)
    }

    /// Turn a log into a [`Request`]. `None` means the log is valid but not
    /// for this node.
    pub fn normalize(&self, log: &Log) -> Result<Option<Request>, ChainError> {
        match self.service {
            Service::Vrf => {
                let event = decode_random_words_requested(log)?;
                if self.key_hash.is_some_and(|wanted| wanted != event.keyHash) {
                    debug!(key_hash = %event.keyHash, "request for another key");
                    return Ok(None);
                }
                Ok(Some(Request {
                    request_id: event.requestId.to_string(),
                    job_id: event.keyHash,
                    nonce: event.preSeed.to_string(),
                    callback_address: log.address,
                    callback_function_id: hex::encode_prefixed(fulfillRandomWordsCall::SELECTOR),
                    callback_gas_limit: u64::from(event.callbackGasLimit),
                    chain: self.chain_name.clone(),
                    contract_address: log.address,
                    block_number: log.block_number,
                    block_hash: log.block_hash,
                    log_index: log.log_index,
                    tx_hash: log.transaction_hash,
                    payload: RequestPayload::Vrf {
                        key_hash: event.keyHash,
                        seed: event.preSeed,
                        acc_id: event.accId,
                        num_words: event.numWords,
                        sender: event.sender,
                        is_direct_payment: event.isDirectPayment,
                    },
                }))
            }
            Service::RequestResponse => {
                let event = decode_data_requested(log)?;
                Ok(Some(Request {
                    request_id: event.requestId.to_string(),
                    job_id: event.jobId,
                    nonce: event.accId.to_string(),
                    callback_address: log.address,
                    callback_function_id: hex::encode_prefixed(
                        fulfillDataRequestInt256Call::SELECTOR,
                    ),
                    callback_gas_limit: u64::from(event.callbackGasLimit),
                    chain: self.chain_name.clone(),
                    contract_address: log.address,
                    block_number: log.block_number,
                    block_hash: log.block_hash,
                    log_index: log.log_index,
                    tx_hash: log.transaction_hash,
                    payload: RequestPayload::RequestResponse {
                        acc_id: event.accId,
                        sender: event.sender,
                        is_direct_payment: event.isDirectPayment,
                        num_submission: event.numSubmission,
                        data: event.data,
                    },
                }))
            }
            Service::DataFeed => Ok(None),
        }
    }
}
