//! Pipeline state, work queues and listener checkpoints.
//!
//! Every method that touches both a state record and a queue does so
//! atomically, so a crash can never leave a request inserted without its
//! worker job, or handed off twice.

pub mod memory;
pub mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::models::{Checkpoint, Job, PipelineState, QueueKind, RequestStatus, Service};

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

#[async_trait]
pub trait StateStore: Send + Sync {
    /// Insert `state` unless `(service, request_id)` already exists.
    async fn insert_if_absent(&self, state: PipelineState) -> Result<bool, StoreError>;

    /// Insert `state` and push `job` onto the service's worker queue, or do
    /// nothing if the request is already known.
    async fn add_request(&self, state: PipelineState, job: Job) -> Result<bool, StoreError>;

    /// Compare-and-swap the status from `from` to `to`.
    async fn transition(
        &self,
        service: Service,
        request_id: &str,
        from: RequestStatus,
        to: RequestStatus,
        reason: Option<String>,
    ) -> Result<bool, StoreError>;

    /// Mark a `Processing` request as handed to the reporter and push `job`
    /// onto the reporter queue. Fails (returns `false`) if it was already
    /// handed off or is no longer processing.
    async fn hand_off(&self, service: Service, request_id: &str, job: Job) -> Result<bool, StoreError>;

    /// Move a stuck `Processing` request back to `Added` and re-push `job`,
    /// provided it was never handed off and has been requeued fewer than
    /// `max_requeues` times.
    async fn requeue(
        &self,
        service: Service,
        request_id: &str,
        max_requeues: u32,
        job: Job,
    ) -> Result<bool, StoreError>;

    /// Remember a transaction sent for a request and the nonce it used.
    /// Earlier hashes are kept; any of them may still be mined.
    async fn record_submission(
        &self,
        service: Service,
        request_id: &str,
        tx_hash: &str,
        nonce: u64,
        attempts: u32,
    ) -> Result<(), StoreError>;

    async fn get(&self, service: Service, request_id: &str) -> Result<Option<PipelineState>, StoreError>;

    async fn list(
        &self,
        service: Service,
        status: Option<RequestStatus>,
    ) -> Result<Vec<PipelineState>, StoreError>;

    /// `Processing` states whose `processed_at` is before `older_than`.
    async fn stale_processing(
        &self,
        service: Service,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<PipelineState>, StoreError>;

    async fn push(&self, service: Service, queue: QueueKind, job: Job) -> Result<(), StoreError>;

    /// Take the oldest visible job and hide it for `lease`. The job comes
    /// back if it is not acked before the lease runs out.
    async fn pop(
        &self,
        service: Service,
        queue: QueueKind,
        lease: Duration,
    ) -> Result<Option<Job>, StoreError>;

    async fn ack(&self, service: Service, queue: QueueKind, job_id: &str) -> Result<(), StoreError>;

    /// Number of jobs on the queue, leased or not.
    async fn queue_len(&self, service: Service, queue: QueueKind) -> Result<usize, StoreError>;

    async fn load_checkpoint(&self, key: &str) -> Result<Option<Checkpoint>, StoreError>;

    async fn save_checkpoint(&self, key: &str, checkpoint: Checkpoint) -> Result<(), StoreError>;
}

/// Key under which a listener stores its position.
pub fn checkpoint_key(service: Service, chain: &str) -> String {
    format!("{service}:{chain}:checkpoint")
}
