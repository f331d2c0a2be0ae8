//! Signs and submits fulfillment transactions handed over by the workers.
//!
//! All reporters share one [`Wallet`] behind a mutex, so nonces are assigned
//! and transactions sent in a single order per signer. Every transaction sent
//! for a request is recorded together with its nonce. Before each attempt the
//! reporter re-reads the request state and looks up the receipts of all
//! recorded transactions; a resend, including one after a restart, replaces
//! at the recorded nonce. A fresh nonce is drawn only when the recorded one
//! has been used by a transaction that is not ours, so at most one
//! fulfillment per request can be mined.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::B256;
use anyhow::Result;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::chain::{legacy_transaction, ChainClient, Receipt, Wallet};
use crate::error::{ChainError, StoreError};
use crate::models::{queue_name, QueueKind, ReporterJob, RequestStatus, Service};
use crate::store::StateStore;

#[derive(Clone, Debug)]
pub struct ReporterConfig {
    pub state_name: String,
    pub service: Service,
    pub reporter_queue_name: String,
    /// Clamped to 1: submissions from one signer are serialized.
    pub concurrency: usize,
    pub delegated_fee: bool,
    pub max_attempts: u32,
    pub backoff: Duration,
    pub lease: Duration,
    pub receipt_poll_interval: Duration,
    pub receipt_timeout: Duration,
}

impl ReporterConfig {
    pub fn new(service: Service, max_attempts: u32, backoff: Duration) -> Self {
        Self {
            state_name: format!("{service}-reporter"),
            service,
            reporter_queue_name: queue_name(service, QueueKind::Reporter),
            concurrency: 1,
            delegated_fee: false,
            max_attempts: max_attempts.max(1),
            backoff,
            lease: Duration::from_secs(300),
            receipt_poll_interval: Duration::from_secs(1),
            receipt_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReportOutcome {
    Completed { tx_hash: B256 },
    Failed { reason: String },
    /// The request was no longer waiting for submission.
    Skipped,
}

pub struct Reporter {
    config: ReporterConfig,
    chain: Arc<dyn ChainClient>,
    store: Arc<dyn StateStore>,
    wallet: Arc<Mutex<Wallet>>,
    chain_id: u64,
    idle_interval: Duration,
}

impl Reporter {
    pub fn new(
        mut config: ReporterConfig,
        chain: Arc<dyn ChainClient>,
        store: Arc<dyn StateStore>,
        wallet: Arc<Mutex<Wallet>>,
        chain_id: u64,
    ) -> Self {
        if config.concurrency != 1 {
            warn!(
                reporter = %config.state_name,
                requested = config.concurrency,
                "reporter concurrency clamped to 1"
            );
            config.concurrency = 1;
        }
        Self {
            config,
            chain,
            store,
            wallet,
            chain_id,
            idle_interval: Duration::from_millis(200),
        }
    }

    pub fn config(&self) -> &ReporterConfig {
        &self.config
    }

    pub async fn run(self: Arc<Self>) -> Result<()> {
        info!(
            reporter = %self.config.state_name,
            queue = %self.config.reporter_queue_name,
            delegated_fee = self.config.delegated_fee,
            "reporter started"
        );
        loop {
            match self.process_next().await {
                Ok(Some(outcome)) => debug!(reporter = %self.config.state_name, ?outcome, "job reported"),
                Ok(None) => sleep(self.idle_interval).await,
                Err(err) => {
                    error!(reporter = %self.config.state_name, error = %err, "reporter queue error");
                    sleep(self.idle_interval).await;
                }
            }
        }
    }

    /// Report one job if one is visible. `None` means the queue was empty.
    pub async fn process_next(&self) -> Result<Option<ReportOutcome>, StoreError> {
        let service = self.config.service;
        let Some(job) = self
            .store
            .pop(service, QueueKind::Reporter, self.config.lease)
            .await?
        else {
            return Ok(None);
        };

        let outcome = match job.decode::<ReporterJob>() {
            Ok(reporter_job) => self.report(&reporter_job).await?,
            Err(err) => {
                let reason = format!("reporter: malformed job: {err}");
                self.fail(&job.id, &reason).await?;
                ReportOutcome::Failed { reason }
            }
        };
        self.store.ack(service, QueueKind::Reporter, &job.id).await?;
        Ok(Some(outcome))
    }

    /// Submit `job` until it is mined, reverts or attempts run out.
    pub async fn report(&self, job: &ReporterJob) -> Result<ReportOutcome, StoreError> {
        let service = self.config.service;
        let request_id = job.request_id.as_str();
        let mut attempt = 0;
        // A recorded nonce that some other transaction has used up.
        let mut taken_nonce = None;

        loop {
            let Some(state) = self.store.get(service, request_id).await? else {
                warn!(%service, request_id, "reporter job for unknown request");
                return Ok(ReportOutcome::Skipped);
            };
            if state.status != RequestStatus::Processing {
                debug!(%service, request_id, status = %state.status, "request no longer processing");
                return Ok(ReportOutcome::Skipped);
            }
            attempt = attempt.max(state.attempts);

            let mut sent: Vec<B256> = state
                .tx_hashes
                .iter()
                .chain(state.tx_hash.iter())
                .filter_map(|hash| B256::from_str(hash).ok())
                .collect();
            sent.dedup();
            let lookup = self.find_receipt(&sent).await;
            if let Ok(Some(receipt)) = lookup {
                return self.finish(request_id, receipt).await;
            }

            if attempt >= self.config.max_attempts {
                let reason = format!(
                    "reporter: gave up after {} attempts",
                    self.config.max_attempts
                );
                self.fail(request_id, &reason).await?;
                return Ok(ReportOutcome::Failed { reason });
            }
            attempt += 1;

            let nonce = state.tx_nonce.filter(|nonce| Some(*nonce) != taken_nonce);
            let err = match lookup {
                // Never send blind while an earlier transaction may be mined.
                Err(err) => err,
                Ok(_) => match self.send(job, attempt, nonce).await {
                    Ok((tx_hash, used_nonce)) => {
                        self.store
                            .record_submission(
                                service,
                                request_id,
                                &tx_hash.to_string(),
                                used_nonce,
                                attempt,
                            )
                            .await?;
                        info!(%service, request_id, %tx_hash, nonce = used_nonce, attempt, "fulfillment submitted");
                        sent.push(tx_hash);
                        match self.wait_for_receipt(&sent).await {
                            Ok(receipt) => return self.finish(request_id, receipt).await,
                            Err(err) => err,
                        }
                    }
                    Err(err) => {
                        if matches!(err, ChainError::NonceTooLow) {
                            // Either one of ours was mined, which the next
                            // lookup finds, or the nonce went to another
                            // transaction and a fresh one is needed.
                            taken_nonce = nonce;
                        }
                        err
                    }
                },
            };

            if !err.is_retryable() {
                let reason = format!("reporter: {err}");
                self.fail(request_id, &reason).await?;
                return Ok(ReportOutcome::Failed { reason });
            }
            warn!(%service, request_id, attempt, error = %err, "submission attempt failed");
            if attempt < self.config.max_attempts {
                sleep(self.config.backoff * 2u32.saturating_pow(attempt - 1)).await;
            }
        }
    }

    /// Sign and send at `nonce`, or at the signer's next pending nonce.
    async fn send(
        &self,
        job: &ReporterJob,
        attempt: u32,
        nonce: Option<u64>,
    ) -> Result<(B256, u64), ChainError> {
        let wallet = self.wallet.lock().await;
        let nonce = match nonce {
            Some(nonce) => nonce,
            None => self.chain.transaction_count(wallet.address()).await?,
        };
        let base_price = self.chain.gas_price().await?;
        let gas_price = base_price * u128::from(100 + 10 * (attempt - 1)) / 100;

        let tx = legacy_transaction(&job.tx, nonce, gas_price, self.chain_id);
        let signed = wallet.sign_transaction(tx)?;
        let returned = self.chain.send_raw_transaction(signed.raw).await?;
        if returned != signed.hash {
            warn!(expected = %signed.hash, %returned, "node returned a different transaction hash");
        }
        Ok((signed.hash, nonce))
    }

    /// First receipt found among `hashes`.
    async fn find_receipt(&self, hashes: &[B256]) -> Result<Option<Receipt>, ChainError> {
        for &hash in hashes {
            if let Some(receipt) = self.chain.transaction_receipt(hash).await? {
                return Ok(Some(receipt));
            }
        }
        Ok(None)
    }

    async fn wait_for_receipt(&self, hashes: &[B256]) -> Result<Receipt, ChainError> {
        let deadline = Instant::now() + self.config.receipt_timeout;
        loop {
            if let Some(receipt) = self.find_receipt(hashes).await? {
                return Ok(receipt);
            }
            if Instant::now() >= deadline {
                let latest = hashes.last().map(|h| h.to_string()).unwrap_or_default();
                return Err(ChainError::NotMined(latest));
            }
            sleep(self.config.receipt_poll_interval).await;
        }
    }

    async fn finish(&self, request_id: &str, receipt: Receipt) -> Result<ReportOutcome, StoreError> {
        let service = self.config.service;
        let tx_hash = receipt.transaction_hash;
        if receipt.success {
            self.store
                .transition(
                    service,
                    request_id,
                    RequestStatus::Processing,
                    RequestStatus::Completed,
                    None,
                )
                .await?;
            info!(%service, request_id, %tx_hash, block = receipt.block_number, "request fulfilled");
            Ok(ReportOutcome::Completed { tx_hash })
        } else {
            let reason = format!("reporter: {}", ChainError::Reverted(tx_hash.to_string()));
            self.fail(request_id, &reason).await?;
            Ok(ReportOutcome::Failed { reason })
        }
    }

    async fn fail(&self, request_id: &str, reason: &str) -> Result<(), StoreError> {
        error!(service = %self.config.service, request_id, reason, "fulfillment failed");
        self.store
            .transition(
                self.config.service,
                request_id,
                RequestStatus::Processing,
                RequestStatus::Failed,
                Some(reason.to_string()),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_follow_service() {
        let config = ReporterConfig::new(Service::RequestResponse, 0, Duration::from_secs(1));
        assert_eq!(config.reporter_queue_name, "request-response:reporter");
        assert_eq!(config.state_name, "request-response-reporter");
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.concurrency, 1);
    }
}
