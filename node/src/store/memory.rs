use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::StateStore;
use crate::error::StoreError;
use crate::models::{queue_name, Checkpoint, Job, PipelineState, QueueKind, RequestStatus, Service};

struct QueuedJob {
    job: Job,
    visible_at: Instant,
}

#[derive(Default)]
struct Inner {
    states: HashMap<(Service, String), PipelineState>,
    queues: HashMap<String, VecDeque<QueuedJob>>,
    checkpoints: HashMap<String, Checkpoint>,
}

impl Inner {
    fn push(&mut self, service: Service, queue: QueueKind, job: Job) {
        let jobs = self.queues.entry(queue_name(service, queue)).or_default();
        jobs.retain(|queued| queued.job.id != job.id);
        jobs.push_back(QueuedJob {
            job,
            visible_at: Instant::now(),
        });
    }
}

/// Process-local [`StateStore`]. One lock guards states and queues together,
/// which is what makes the combined operations atomic.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn insert_if_absent(&self, state: PipelineState) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        let key = (state.service, state.request_id.clone());
        if inner.states.contains_key(&key) {
            return Ok(false);
        }
        inner.states.insert(key, state);
        Ok(true)
    }

    async fn add_request(&self, state: PipelineState, job: Job) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        let service = state.service;
        let key = (service, state.request_id.clone());
        if inner.states.contains_key(&key) {
            return Ok(false);
        }
        inner.states.insert(key, state);
        inner.push(service, QueueKind::Worker, job);
        Ok(true)
    }

    async fn transition(
        &self,
        service: Service,
        request_id: &str,
        from: RequestStatus,
        to: RequestStatus,
        reason: Option<String>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.states.get_mut(&(service, request_id.to_string())) {
            Some(state) => Ok(state.apply_transition(from, to, reason, Utc::now())),
            None => Ok(false),
        }
    }

    async fn hand_off(&self, service: Service, request_id: &str, job: Job) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        let Some(state) = inner.states.get_mut(&(service, request_id.to_string())) else {
            return Ok(false);
        };
        if state.status != RequestStatus::Processing || state.reporter_enqueued {
            return Ok(false);
        }
        state.reporter_enqueued = true;
        inner.push(service, QueueKind::Reporter, job);
        Ok(true)
    }

    async fn requeue(
        &self,
        service: Service,
        request_id: &str,
        max_requeues: u32,
        job: Job,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        let Some(state) = inner.states.get_mut(&(service, request_id.to_string())) else {
            return Ok(false);
        };
        if state.status != RequestStatus::Processing
            || state.reporter_enqueued
            || state.requeue_count >= max_requeues
        {
            return Ok(false);
        }
        state.apply_transition(RequestStatus::Processing, RequestStatus::Added, None, Utc::now());
        state.requeue_count += 1;
        inner.push(service, QueueKind::Worker, job);
        Ok(true)
    }

    async fn record_submission(
        &self,
        service: Service,
        request_id: &str,
        tx_hash: &str,
        nonce: u64,
        attempts: u32,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let state = inner
            .states
            .get_mut(&(service, request_id.to_string()))
            .ok_or_else(|| StoreError::NotFound(format!("{service}/{request_id}")))?;
        state.record_submission(tx_hash, nonce, attempts);
        Ok(())
    }

    async fn get(&self, service: Service, request_id: &str) -> Result<Option<PipelineState>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.states.get(&(service, request_id.to_string())).cloned())
    }

    async fn list(
        &self,
        service: Service,
        status: Option<RequestStatus>,
    ) -> Result<Vec<PipelineState>, StoreError> {
        let inner = self.inner.lock().await;
        let mut states: Vec<PipelineState> = inner
            .states
            .values()
            .filter(|s| s.service == service && status.map_or(true, |wanted| s.status == wanted))
            .cloned()
            .collect();
        states.sort_by(|a, b| a.added_at.cmp(&b.added_at).then_with(|| a.request_id.cmp(&b.request_id)));
        Ok(states)
    }

    async fn stale_processing(
        &self,
        service: Service,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<PipelineState>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .states
            .values()
            .filter(|s| {
                s.service == service
                    && s.status == RequestStatus::Processing
                    && s.processed_at.map_or(false, |at| at < older_than)
            })
            .cloned()
            .collect())
    }

    async fn push(&self, service: Service, queue: QueueKind, job: Job) -> Result<(), StoreError> {
        self.inner.lock().await.push(service, queue, job);
        Ok(())
    }

    async fn pop(
        &self,
        service: Service,
        queue: QueueKind,
        lease: Duration,
    ) -> Result<Option<Job>, StoreError> {
        let mut inner = self.inner.lock().await;
        let Some(jobs) = inner.queues.get_mut(&queue_name(service, queue)) else {
            return Ok(None);
        };
        let now = Instant::now();
        Ok(jobs.iter_mut().find(|queued| queued.visible_at <= now).map(|queued| {
            queued.visible_at = now + lease;
            queued.job.clone()
        }))
    }

    async fn ack(&self, service: Service, queue: QueueKind, job_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(jobs) = inner.queues.get_mut(&queue_name(service, queue)) {
            jobs.retain(|queued| queued.job.id != job_id);
        }
        Ok(())
    }

    async fn queue_len(&self, service: Service, queue: QueueKind) -> Result<usize, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .queues
            .get(&queue_name(service, queue))
            .map_or(0, |jobs| jobs.len()))
    }

    async fn load_checkpoint(&self, key: &str) -> Result<Option<Checkpoint>, StoreError> {
        Ok(self.inner.lock().await.checkpoints.get(key).copied())
    }

    async fn save_checkpoint(&self, key: &str, checkpoint: Checkpoint) -> Result<(), StoreError> {
        self.inner
            .lock()
            .await
            .checkpoints
            .insert(key.to_string(), checkpoint);
        Ok(())
    }
}
