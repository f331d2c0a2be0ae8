//! Turns queued requests into signed-ready fulfillment transactions.
//!
//! A worker claims a request by moving it from `added` to `processing`.
//! Whoever loses that race drops the job. Once the fulfillment call is
//! built, the request is handed to the reporter in the same store operation
//! that marks it as handed off, so recovery never re-runs it afterwards.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{keccak256, Bytes, B256, I256, U256};
use alloy_sol_types::SolCall;
use anyhow::Result;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::chain::abi::{
    decode_request_items, fulfillDataRequestInt256Call, fulfillRandomWordsCall, DataCommitment,
    VrfCommitment, VrfProof, REQUEST_RESPONSE_FULFILL_GAS_MINIMUM, VRF_FULFILL_GAS_MINIMUM,
    VRF_GAS_PER_WORD,
};
use crate::chain::TransactionRequest;
use crate::crypto::{decode, fast_verify_components, prove, verify, KeyPair, VrfError};
use crate::error::{AggregatorError, ChainError, FetchError, ReducerError, StoreError};
use crate::feed::aggregator::round_half_up;
use crate::feed::fetcher::DataSource;
use crate::feed::reducer::{apply_all, as_number, RequestPlan};
use crate::models::{Job, QueueKind, ReporterJob, Request, RequestPayload, RequestStatus, Service};
use crate::store::StateStore;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("vrf: {0}")]
    Vrf(#[from] VrfError),
    #[error("generated proof did not verify")]
    InvalidProof,
    #[error("no VRF key configured")]
    MissingKey,
    #[error("reducer: {0}")]
    Reducer(#[from] ReducerError),
    #[error("fetch: {0}")]
    Fetch(#[from] FetchError),
    #[error("{0}")]
    Chain(#[from] ChainError),
    #[error("payload does not belong to the {0} service")]
    WrongPayload(Service),
    #[error("invalid request id `{0}`")]
    RequestId(String),
    #[error("aggregate: {0}")]
    Rounding(#[from] AggregatorError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// Fulfillment built and handed to the reporter.
    Done,
    /// The request was marked failed.
    Errored(String),
    /// Another worker owns the request, or it is no longer pending.
    Skipped,
}

/// `keccak256(seed ‖ blockHash)`, the input the coordinator re-derives
/// on-chain before checking the proof.
pub fn vrf_alpha(seed: U256, block_hash: B256) -> [u8; 32] {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(&seed.to_be_bytes::<32>());
    buf[32..].copy_from_slice(block_hash.as_slice());
    keccak256(buf).0
}

fn word(bytes: [u8; 32]) -> U256 {
    U256::from_be_bytes(bytes)
}

pub struct Worker {
    service: Service,
    store: Arc<dyn StateStore>,
    vrf_keys: Option<KeyPair>,
    source: Arc<dyn DataSource>,
    lease: Duration,
    idle_interval: Duration,
}

impl Worker {
    pub fn new(
        service: Service,
        store: Arc<dyn StateStore>,
        vrf_keys: Option<KeyPair>,
        source: Arc<dyn DataSource>,
        lease: Duration,
    ) -> Self {
        Self {
            service,
            store,
            vrf_keys,
            source,
            lease,
            idle_interval: Duration::from_millis(200),
        }
    }

    pub fn service(&self) -> Service {
        self.service
    }

    /// Run `concurrency` consumers of the worker queue.
    pub async fn run(self: Arc<Self>, concurrency: usize) -> Result<()> {
        info!(service = %self.service, concurrency, "worker started");
        let handles: Vec<_> = (0..concurrency.max(1))
            .map(|_| {
                let worker = self.clone();
                tokio::spawn(async move { worker.consume().await })
            })
            .collect();
        for handle in handles {
            handle.await?;
        }
        Ok(())
    }

    async fn consume(&self) {
        loop {
            match self.process_next().await {
                Ok(Some(outcome)) => debug!(service = %self.service, ?outcome, "job processed"),
                Ok(None) => sleep(self.idle_interval).await,
                Err(err) => {
                    error!(service = %self.service, error = %err, "worker queue error");
                    sleep(self.idle_interval).await;
                }
            }
        }
    }

    /// Process one job if one is visible. `None` means the queue was empty.
    pub async fn process_next(&self) -> Result<Option<WorkerOutcome>, StoreError> {
        let Some(job) = self.store.pop(self.service, QueueKind::Worker, self.lease).await? else {
            return Ok(None);
        };
        let outcome = self.process(&job).await?;
        Ok(Some(outcome))
    }

    async fn ack(&self, job: &Job) -> Result<(), StoreError> {
        self.store.ack(self.service, QueueKind::Worker, &job.id).await
    }

    async fn process(&self, job: &Job) -> Result<WorkerOutcome, StoreError> {
        let request: Request = match job.decode() {
            Ok(request) => request,
            Err(err) => {
                let reason = format!("worker: malformed job: {err}");
                error!(service = %self.service, job_id = %job.id, %reason);
                self.store
                    .transition(
                        self.service,
                        &job.id,
                        RequestStatus::Added,
                        RequestStatus::Failed,
                        Some(reason.clone()),
                    )
                    .await?;
                self.ack(job).await?;
                return Ok(WorkerOutcome::Errored(reason));
            }
        };
        let request_id = request.request_id.as_str();

        let claimed = self
            .store
            .transition(
                self.service,
                request_id,
                RequestStatus::Added,
                RequestStatus::Processing,
                None,
            )
            .await?;
        if !claimed {
            debug!(service = %self.service, request_id, "request already claimed");
            self.ack(job).await?;
            return Ok(WorkerOutcome::Skipped);
        }

        match self.fulfillment(&request).await {
            Ok(tx) => {
                let reporter_job = ReporterJob {
                    service: self.service,
                    request_id: request.request_id.clone(),
                    tx,
                };
                let handed = self
                    .store
                    .hand_off(
                        self.service,
                        request_id,
                        Job::new(request_id, &reporter_job)?,
                    )
                    .await?;
                if handed {
                    info!(service = %self.service, request_id, "fulfillment handed to reporter");
                    self.ack(job).await?;
                    Ok(WorkerOutcome::Done)
                } else {
                    // Recovery took the request back; the requeued job is
                    // the same queue entry, so it must not be acked here.
                    warn!(service = %self.service, request_id, "request changed while processing");
                    Ok(WorkerOutcome::Skipped)
                }
            }
            Err(err) => {
                let reason = format!("worker: {err}");
                error!(service = %self.service, request_id, %reason, "request failed");
                let failed = self
                    .store
                    .transition(
                        self.service,
                        request_id,
                        RequestStatus::Processing,
                        RequestStatus::Failed,
                        Some(reason.clone()),
                    )
                    .await?;
                if failed {
                    self.ack(job).await?;
                }
                Ok(WorkerOutcome::Errored(reason))
            }
        }
    }

    /// Build the fulfillment transaction for `request`.
    pub async fn fulfillment(&self, request: &Request) -> Result<TransactionRequest, WorkerError> {
        match (self.service, &request.payload) {
            (Service::Vrf, RequestPayload::Vrf { .. }) => self.fulfill_random_words(request),
            (Service::RequestResponse, RequestPayload::RequestResponse { .. }) => {
                self.fulfill_data_request(request).await
            }
            _ => Err(WorkerError::WrongPayload(self.service)),
        }
    }

    fn fulfill_random_words(&self, request: &Request) -> Result<TransactionRequest, WorkerError> {
        let RequestPayload::Vrf {
            seed,
            acc_id,
            num_words,
            sender,
            is_direct_payment,
            ..
        } = &request.payload
        else {
            return Err(WorkerError::WrongPayload(self.service));
        };
        let keys = self.vrf_keys.as_ref().ok_or(WorkerError::MissingKey)?;

        let alpha = vrf_alpha(*seed, request.block_hash);
        let proof = prove(&keys.secret_key, &alpha)?;
        if !verify(&keys.public_key, &proof, &alpha)?.is_valid() {
            return Err(WorkerError::InvalidProof);
        }
        let components = fast_verify_components(&keys.public_key, &proof, &alpha)?;
        let decoded = decode(&proof)?;

        let call = fulfillRandomWordsCall {
            proof: VrfProof {
                pk: [word(keys.public_key.x()), word(keys.public_key.y())],
                proof: decoded.words().map(word),
                seed: *seed,
                uPoint: [word(components.u.0), word(components.u.1)],
                vComponents: components.v_components().map(word),
            },
            rc: VrfCommitment {
                blockNum: request.block_number,
                accId: *acc_id,
                callbackGasLimit: request.callback_gas_limit as u32,
                numWords: *num_words,
                sender: *sender,
            },
            isDirectPayment: *is_direct_payment,
        };

        Ok(TransactionRequest {
            to: request.callback_address,
            data: Bytes::from(call.abi_encode()),
            gas_limit: request.callback_gas_limit
                + VRF_FULFILL_GAS_MINIMUM
                + VRF_GAS_PER_WORD * u64::from(*num_words),
        })
    }

    async fn fulfill_data_request(&self, request: &Request) -> Result<TransactionRequest, WorkerError> {
        let RequestPayload::RequestResponse {
            acc_id,
            sender,
            is_direct_payment,
            num_submission,
            data,
        } = &request.payload
        else {
            return Err(WorkerError::WrongPayload(self.service));
        };

        let plan = RequestPlan::from_pairs(&decode_request_items(data)?)?;
        let raw = self.source.fetch(&plan.url).await?;
        let value = round_half_up(as_number(&apply_all(&plan.reducers, raw)?)?)?;
        debug!(request_id = %request.request_id, url = %plan.url, value, "data request resolved");

        let request_id = request
            .request_id
            .parse::<U256>()
            .map_err(|_| WorkerError::RequestId(request.request_id.clone()))?;
        // Every i64 fits in int256.
        let response = I256::unchecked_from(value);

        let call = fulfillDataRequestInt256Call {
            requestId: request_id,
            response,
            rc: DataCommitment {
                blockNum: request.block_number,
                accId: *acc_id,
                numSubmission: u32::from(*num_submission),
                callbackGasLimit: request.callback_gas_limit as u32,
                sender: *sender,
            },
            isDirectPayment: *is_direct_payment,
        };

        Ok(TransactionRequest {
            to: request.callback_address,
            data: Bytes::from(call.abi_encode()),
            gas_limit: request.callback_gas_limit + REQUEST_RESPONSE_FULFILL_GAS_MINIMUM,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alpha_commits_to_seed_and_block_hash() {
        let seed = U256::from(7u64);
        let a = vrf_alpha(seed, B256::repeat_byte(1));
        assert_ne!(a, vrf_alpha(seed, B256::repeat_byte(2)));
        assert_ne!(a, vrf_alpha(U256::from(8u64), B256::repeat_byte(1)));

        let mut packed = [0u8; 64];
        packed[31] = 7;
        packed[32..].fill(1);
        assert_eq!(a, keccak256(packed).0);
    }
}
