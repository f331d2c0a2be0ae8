//! Data models shared by the pipeline, the state store and the API.

use std::fmt;
use std::str::FromStr;

use alloy_primitives::{Address, Bytes, B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chain::TransactionRequest;

/// Oracle service a request belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Service {
    Vrf,
    RequestResponse,
    DataFeed,
}

impl Service {
    pub fn as_str(&self) -> &'static str {
        match self {
            Service::Vrf => "vrf",
            Service::RequestResponse => "request-response",
            Service::DataFeed => "data-feed",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Service {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vrf" => Ok(Service::Vrf),
            "request-response" => Ok(Service::RequestResponse),
            "data-feed" => Ok(Service::DataFeed),
            other => Err(format!("unknown service `{other}`")),
        }
    }
}

/// Lifecycle of a request. Statuses only move forward, except the capped
/// `Processing -> Added` requeue performed by recovery.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Added,
    Processing,
    Completed,
    Failed,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Added => "added",
            RequestStatus::Processing => "processing",
            RequestStatus::Completed => "completed",
            RequestStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Failed)
    }

    /// Transitions the state store accepts.
    pub fn can_transition_to(&self, next: RequestStatus) -> bool {
        use RequestStatus::*;
        matches!(
            (self, next),
            (Added, Processing)
                | (Processing, Added)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Added, Failed)
        )
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "added" => Ok(RequestStatus::Added),
            "processing" => Ok(RequestStatus::Processing),
            "completed" => Ok(RequestStatus::Completed),
            "failed" => Ok(RequestStatus::Failed),
            other => Err(format!("unknown status `{other}`")),
        }
    }
}

/// Service-specific fields carried from the request event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RequestPayload {
    #[serde(rename_all = "camelCase")]
    Vrf {
        key_hash: B256,
        seed: U256,
        acc_id: u64,
        num_words: u32,
        sender: Address,
        is_direct_payment: bool,
    },
    #[serde(rename_all = "camelCase")]
    RequestResponse {
        acc_id: u64,
        sender: Address,
        is_direct_payment: bool,
        num_submission: u8,
        data: Bytes,
    },
}

/// An on-chain request, immutable once observed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    /// Decimal string of the on-chain `uint256` id.
    pub request_id: String,
    pub job_id: B256,
    pub nonce: String,
    pub callback_address: Address,
    pub callback_function_id: String,
    pub callback_gas_limit: u64,
    pub chain: String,
    pub contract_address: Address,
    pub block_number: u64,
    pub block_hash: B256,
    pub log_index: u64,
    pub tx_hash: B256,
    pub payload: RequestPayload,
}

/// Per-request record keyed by `(service, request_id)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineState {
    pub service: Service,
    pub request_id: String,
    pub status: RequestStatus,
    pub request: Option<Request>,
    pub requeue_count: u32,
    pub attempts: u32,
    pub reason: Option<String>,
    /// Latest transaction sent for this request.
    pub tx_hash: Option<String>,
    /// Every transaction sent for this request, oldest first. Any of them
    /// may be the one that gets mined.
    #[serde(default)]
    pub tx_hashes: Vec<String>,
    /// Nonce shared by all of `tx_hashes`; resends replace at this nonce.
    pub tx_nonce: Option<u64>,
    pub reporter_enqueued: bool,
    pub added_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl PipelineState {
    pub fn new(service: Service, request_id: impl Into<String>, request: Option<Request>) -> Self {
        Self {
            service,
            request_id: request_id.into(),
            status: RequestStatus::Added,
            request,
            requeue_count: 0,
            attempts: 0,
            reason: None,
            tx_hash: None,
            tx_hashes: Vec::new(),
            tx_nonce: None,
            reporter_enqueued: false,
            added_at: Utc::now(),
            processed_at: None,
            completed_at: None,
            failed_at: None,
        }
    }

    /// Remember a sent transaction.
    pub fn record_submission(&mut self, tx_hash: &str, nonce: u64, attempts: u32) {
        if !self.tx_hashes.iter().any(|h| h == tx_hash) {
            self.tx_hashes.push(tx_hash.to_string());
        }
        self.tx_hash = Some(tx_hash.to_string());
        self.tx_nonce = Some(nonce);
        self.attempts = attempts;
    }

    /// Apply `to` if allowed from the current status, stamping its timestamp.
    /// Returns whether the status changed.
    pub fn apply_transition(
        &mut self,
        from: RequestStatus,
        to: RequestStatus,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> bool {
        if self.status != from || !from.can_transition_to(to) {
            return false;
        }
        self.status = to;
        match to {
            RequestStatus::Added => {}
            RequestStatus::Processing => self.processed_at = Some(now),
            RequestStatus::Completed => self.completed_at = Some(now),
            RequestStatus::Failed => self.failed_at = Some(now),
        }
        if reason.is_some() {
            self.reason = reason;
        }
        true
    }
}

/// Which of a service's two queues a job lives on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueKind {
    Worker,
    Reporter,
}

impl QueueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueKind::Worker => "worker",
            QueueKind::Reporter => "reporter",
        }
    }
}

/// Storage name for `(service, queue)`.
pub fn queue_name(service: Service, queue: QueueKind) -> String {
    format!("{}:{}", service, queue.as_str())
}

/// A queued unit of work. `id` is unique per queue; pushing an id that is
/// already queued replaces it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub payload: serde_json::Value,
}

impl Job {
    pub fn new<T: Serialize>(id: impl Into<String>, payload: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: id.into(),
            payload: serde_json::to_value(payload)?,
        })
    }

    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// What the worker hands to the reporter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReporterJob {
    pub service: Service,
    pub request_id: String,
    pub tx: TransactionRequest,
}

/// Listener position, persisted alongside pipeline state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub next_block: u64,
}

/// API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}
