//! Periodic data-feed rounds.
//!
//! Every heartbeat a feed fetches all of its sources, reduces each response
//! to a number, aggregates the numbers and, when the aggregator contract
//! says this operator may submit for the current round, hands a `submit`
//! transaction to the data-feed reporter. Feeds with a deviation threshold
//! are also checked between heartbeats and submit early once the aggregate
//! has moved far enough from the last on-chain answer.

use std::collections::HashMap;
use std::sync::Arc;

use alloy_primitives::{Address, I256, U256};
use alloy_sol_types::SolCall;
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use futures_util::future::join_all;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::chain::abi::{oracleRoundStateCall, submitCall, DATA_FEED_SUBMIT_GAS};
use crate::chain::{ChainClient, TransactionRequest};
use crate::config::feeds::Feed;
use crate::error::AggregatorError;
use crate::feed::aggregator::{aggregate_submissions, AggregateResult, AggregatorSubmission};
use crate::feed::fetcher::DataSource;
use crate::feed::reducer::{apply_all, as_number};
use crate::models::{Job, PipelineState, ReporterJob, RequestStatus, Service};
use crate::store::StateStore;

/// What one round of a feed ended with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoundOutcome {
    Submitted { round_id: u32, value: i64 },
    /// No source produced a value.
    NoData,
    NotEligible { round_id: u32 },
    /// A submission for this round already exists.
    AlreadySubmitted { round_id: u32 },
    /// Between heartbeats and too close to the last on-chain answer.
    WithinThreshold { round_id: u32, value: i64 },
}

pub struct FeedService {
    chain: Arc<dyn ChainClient>,
    store: Arc<dyn StateStore>,
    source: Arc<dyn DataSource>,
    operator: Address,
    feeds: Vec<Feed>,
    latest: Mutex<HashMap<String, AggregateResult>>,
}

impl FeedService {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        store: Arc<dyn StateStore>,
        source: Arc<dyn DataSource>,
        operator: Address,
        feeds: Vec<Feed>,
    ) -> Self {
        Self {
            chain,
            store,
            source,
            operator,
            feeds,
            latest: Mutex::new(HashMap::new()),
        }
    }

    pub fn feeds(&self) -> &[Feed] {
        &self.feeds
    }

    /// Latest aggregate computed for `aggregator_id`.
    pub async fn latest(&self, aggregator_id: &str) -> Option<AggregateResult> {
        self.latest.lock().await.get(aggregator_id).cloned()
    }

    /// Run every feed on its own heartbeat until the tasks stop.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        if self.feeds.is_empty() {
            warn!("data feed service has no feeds configured");
            return Ok(());
        }
        info!(feeds = self.feeds.len(), "data feed service started");

        let handles: Vec<_> = (0..self.feeds.len())
            .map(|index| {
                let service = self.clone();
                tokio::spawn(async move { service.run_feed(index).await })
            })
            .collect();

        for result in join_all(handles).await {
            result.context("data feed task failed")?;
        }
        Ok(())
    }

    async fn run_feed(&self, index: usize) {
        let feed = &self.feeds[index];
        let period = if feed.tracks_deviation() {
            feed.check_interval
        } else {
            feed.heartbeat
        };
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut last_submitted: Option<Instant> = None;

        loop {
            ticker.tick().await;
            let heartbeat_due = last_submitted.map_or(true, |at| at.elapsed() >= feed.heartbeat);
            let result = if heartbeat_due {
                self.run_round(feed).await
            } else {
                self.check_deviation(feed).await
            };
            match result {
                Ok(outcome) => {
                    if matches!(outcome, RoundOutcome::Submitted { .. }) {
                        last_submitted = Some(Instant::now());
                    }
                    debug!(feed = %feed.name, ?outcome, "feed round finished")
                }
                Err(err) => error!(feed = %feed.name, error = %err, "feed round failed"),
            }
        }
    }

    /// Fetch, reduce and aggregate every source of `feed`.
    pub async fn aggregate(&self, feed: &Feed) -> Result<AggregateResult, AggregatorError> {
        let fetches = feed.sources.iter().map(|source| async move {
            let raw = self
                .source
                .fetch(&source.url)
                .await
                .map_err(|err| err.to_string())?;
            let reduced = apply_all(&source.reducers, raw).map_err(|err| err.to_string())?;
            as_number(&reduced).map_err(|err| err.to_string())
        });

        let now = Utc::now();
        let mut submissions = Vec::new();
        for (source, value) in feed.sources.iter().zip(join_all(fetches).await) {
            match value {
                Ok(value) => submissions.push(AggregatorSubmission {
                    aggregator_id: feed.aggregator_id.clone(),
                    oracle_address: self.operator.to_string(),
                    value,
                    timestamp: now,
                }),
                Err(err) => warn!(feed = %feed.name, url = %source.url, error = %err, "source dropped"),
            }
        }

        let result = aggregate_submissions(feed.aggregator, &submissions)?;
        self.latest
            .lock()
            .await
            .insert(feed.aggregator_id.clone(), result.clone());
        Ok(result)
    }

    /// Heartbeat round: submit whenever the operator is eligible.
    pub async fn run_round(&self, feed: &Feed) -> Result<RoundOutcome> {
        self.round(feed, true).await
    }

    /// Between heartbeats: submit only if the aggregate deviates from the
    /// latest on-chain answer by the feed's threshold.
    pub async fn check_deviation(&self, feed: &Feed) -> Result<RoundOutcome> {
        self.round(feed, false).await
    }

    async fn round(&self, feed: &Feed, heartbeat: bool) -> Result<RoundOutcome> {
        let result = match self.aggregate(feed).await {
            Ok(result) => result,
            Err(AggregatorError::EmptyInput) => {
                warn!(feed = %feed.name, "no source produced a value; skipping round");
                return Ok(RoundOutcome::NoData);
            }
            Err(err) => return Err(err.into()),
        };

        let call = oracleRoundStateCall {
            oracle: self.operator,
            queriedRoundId: 0,
        };
        let returned = self
            .chain
            .call(feed.address, call.abi_encode().into())
            .await
            .context("oracleRoundState call")?;
        let state = oracleRoundStateCall::abi_decode_returns(&returned)
            .map_err(|err| anyhow!("decoding oracleRoundState: {err}"))?;

        let round_id = state.roundId;
        if !state.eligibleToSubmit {
            debug!(feed = %feed.name, round_id, "operator not eligible to submit");
            return Ok(RoundOutcome::NotEligible { round_id });
        }
        if !heartbeat {
            // An answer beyond i128 is as far from any i64 as it gets.
            let moved = i128::try_from(state.latestSubmission)
                .map_or(true, |last| feed.deviates(last, result.value));
            if !moved {
                return Ok(RoundOutcome::WithinThreshold {
                    round_id,
                    value: result.value,
                });
            }
            info!(feed = %feed.name, round_id, value = result.value, last = %state.latestSubmission, "deviation threshold crossed");
        }

        let request_id = format!("feed:{}:{}", feed.aggregator_id, round_id);
        if !self
            .store
            .insert_if_absent(PipelineState::new(Service::DataFeed, &request_id, None))
            .await?
        {
            return Ok(RoundOutcome::AlreadySubmitted { round_id });
        }
        self.store
            .transition(
                Service::DataFeed,
                &request_id,
                RequestStatus::Added,
                RequestStatus::Processing,
                None,
            )
            .await?;

        let data = submitCall {
            roundId: U256::from(round_id),
            submission: I256::unchecked_from(result.value),
        }
        .abi_encode();
        let job = ReporterJob {
            service: Service::DataFeed,
            request_id: request_id.clone(),
            tx: TransactionRequest {
                to: feed.address,
                data: data.into(),
                gas_limit: DATA_FEED_SUBMIT_GAS,
            },
        };
        self.store
            .hand_off(Service::DataFeed, &request_id, Job::new(&request_id, &job)?)
            .await?;

        info!(feed = %feed.name, round_id, value = result.value, "feed submission queued");
        Ok(RoundOutcome::Submitted {
            round_id,
            value: result.value,
        })
    }
}
