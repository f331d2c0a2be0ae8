use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::info;

use super::StateStore;
use crate::error::StoreError;
use crate::models::{
    queue_name, Checkpoint, Job, PipelineState, QueueKind, Request, RequestStatus, Service,
};

/// [`StateStore`] backed by PostgreSQL. Combined operations run inside one
/// transaction; `pop` uses `FOR UPDATE SKIP LOCKED` so concurrent workers
/// never lease the same job.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct StateRow {
    service: String,
    request_id: String,
    status: String,
    request: Option<Json<Request>>,
    requeue_count: i32,
    attempts: i32,
    reason: Option<String>,
    tx_hash: Option<String>,
    tx_hashes: Vec<String>,
    tx_nonce: Option<i64>,
    reporter_enqueued: bool,
    added_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    failed_at: Option<DateTime<Utc>>,
}

impl TryFrom<StateRow> for PipelineState {
    type Error = StoreError;

    fn try_from(row: StateRow) -> Result<Self, Self::Error> {
        Ok(PipelineState {
            service: row.service.parse().map_err(StoreError::Corrupt)?,
            request_id: row.request_id,
            status: row.status.parse().map_err(StoreError::Corrupt)?,
            request: row.request.map(|Json(request)| request),
            requeue_count: row.requeue_count.max(0) as u32,
            attempts: row.attempts.max(0) as u32,
            reason: row.reason,
            tx_hash: row.tx_hash,
            tx_hashes: row.tx_hashes,
            tx_nonce: row.tx_nonce.map(|nonce| nonce.max(0) as u64),
            reporter_enqueued: row.reporter_enqueued,
            added_at: row.added_at,
            processed_at: row.processed_at,
            completed_at: row.completed_at,
            failed_at: row.failed_at,
        })
    }
}

const STATE_COLUMNS: &str = "service, request_id, status, request, requeue_count, attempts, \
     reason, tx_hash, tx_hashes, tx_nonce, reporter_enqueued, added_at, processed_at, \
     completed_at, failed_at";

impl PostgresStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|err| StoreError::Backend(err.into()))?;
        info!("database migrations applied");
        Ok(())
    }

    async fn insert_state(
        tx: &mut Transaction<'_, Postgres>,
        state: &PipelineState,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO pipeline_state (
                service, request_id, status, request, requeue_count, attempts,
                reason, tx_hash, reporter_enqueued, added_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (service, request_id) DO NOTHING
            "#,
        )
        .bind(state.service.as_str())
        .bind(&state.request_id)
        .bind(state.status.as_str())
        .bind(state.request.clone().map(Json))
        .bind(state.requeue_count as i32)
        .bind(state.attempts as i32)
        .bind(&state.reason)
        .bind(&state.tx_hash)
        .bind(state.reporter_enqueued)
        .bind(state.added_at)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn push_job(
        tx: &mut Transaction<'_, Postgres>,
        queue: &str,
        job: &Job,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO queue_jobs (queue, job_id, payload, enqueued_at, visible_at)
            VALUES ($1, $2, $3, NOW(), NOW())
            ON CONFLICT (queue, job_id)
            DO UPDATE SET payload = EXCLUDED.payload, enqueued_at = NOW(), visible_at = NOW()
            "#,
        )
        .bind(queue)
        .bind(&job.id)
        .bind(&job.payload)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for PostgresStore {
    async fn insert_if_absent(&self, state: PipelineState) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        let inserted = Self::insert_state(&mut tx, &state).await?;
        tx.commit().await?;
        Ok(inserted)
    }

    async fn add_request(&self, state: PipelineState, job: Job) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        if !Self::insert_state(&mut tx, &state).await? {
            tx.rollback().await?;
            return Ok(false);
        }
        Self::push_job(&mut tx, &queue_name(state.service, QueueKind::Worker), &job).await?;
        tx.commit().await?;
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
        if !from.can_transition_to(to) {
            return Ok(false);
        }
        let result = sqlx::query(
            r#"
            UPDATE pipeline_state
            SET status = $4,
                processed_at = CASE WHEN $4 = 'processing' THEN NOW() ELSE processed_at END,
                completed_at = CASE WHEN $4 = 'completed' THEN NOW() ELSE completed_at END,
                failed_at = CASE WHEN $4 = 'failed' THEN NOW() ELSE failed_at END,
                reason = COALESCE($5, reason)
            WHERE service = $1 AND request_id = $2 AND status = $3
            "#,
        )
        .bind(service.as_str())
        .bind(request_id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn hand_off(&self, service: Service, request_id: &str, job: Job) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE pipeline_state
            SET reporter_enqueued = TRUE
            WHERE service = $1 AND request_id = $2
              AND status = 'processing' AND NOT reporter_enqueued
            "#,
        )
        .bind(service.as_str())
        .bind(request_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }
        Self::push_job(&mut tx, &queue_name(service, QueueKind::Reporter), &job).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn requeue(
        &self,
        service: Service,
        request_id: &str,
        max_requeues: u32,
        job: Job,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE pipeline_state
            SET status = 'added', requeue_count = requeue_count + 1
            WHERE service = $1 AND request_id = $2
              AND status = 'processing' AND NOT reporter_enqueued
              AND requeue_count < $3
            "#,
        )
        .bind(service.as_str())
        .bind(request_id)
        .bind(max_requeues as i32)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }
        Self::push_job(&mut tx, &queue_name(service, QueueKind::Worker), &job).await?;
        tx.commit().await?;
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
        let result = sqlx::query(
            r#"
            UPDATE pipeline_state
            SET tx_hash = $3,
                tx_hashes = CASE WHEN $3 = ANY(tx_hashes) THEN tx_hashes
                                 ELSE array_append(tx_hashes, $3) END,
                tx_nonce = $4,
                attempts = $5
            WHERE service = $1 AND request_id = $2
            "#,
        )
        .bind(service.as_str())
        .bind(request_id)
        .bind(tx_hash)
        .bind(nonce as i64)
        .bind(attempts as i32)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("{service}/{request_id}")));
        }
        Ok(())
    }

    async fn get(&self, service: Service, request_id: &str) -> Result<Option<PipelineState>, StoreError> {
        let row = sqlx::query_as::<_, StateRow>(&format!(
            "SELECT {STATE_COLUMNS} FROM pipeline_state WHERE service = $1 AND request_id = $2"
        ))
        .bind(service.as_str())
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(PipelineState::try_from).transpose()
    }

    async fn list(
        &self,
        service: Service,
        status: Option<RequestStatus>,
    ) -> Result<Vec<PipelineState>, StoreError> {
        let mut query_builder: sqlx::QueryBuilder<Postgres> =
            sqlx::QueryBuilder::new(format!("SELECT {STATE_COLUMNS} FROM pipeline_state WHERE service = "));
        query_builder.push_bind(service.as_str());

        if let Some(status) = status {
            query_builder.push(" AND status = ");
            query_builder.push_bind(status.as_str());
        }
        query_builder.push(" ORDER BY added_at, request_id");

        let rows = query_builder
            .build_query_as::<StateRow>()
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(PipelineState::try_from).collect()
    }

    async fn stale_processing(
        &self,
        service: Service,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<PipelineState>, StoreError> {
        let rows = sqlx::query_as::<_, StateRow>(&format!(
            "SELECT {STATE_COLUMNS} FROM pipeline_state \
             WHERE service = $1 AND status = 'processing' AND processed_at < $2"
        ))
        .bind(service.as_str())
        .bind(older_than)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(PipelineState::try_from).collect()
    }

    async fn push(&self, service: Service, queue: QueueKind, job: Job) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        Self::push_job(&mut tx, &queue_name(service, queue), &job).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn pop(
        &self,
        service: Service,
        queue: QueueKind,
        lease: Duration,
    ) -> Result<Option<Job>, StoreError> {
        let row: Option<(String, serde_json::Value)> = sqlx::query_as(
            r#"
            UPDATE queue_jobs
            SET visible_at = NOW() + make_interval(secs => $2)
            WHERE queue = $1 AND job_id = (
                SELECT job_id FROM queue_jobs
                WHERE queue = $1 AND visible_at <= NOW()
                ORDER BY enqueued_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING job_id, payload
            "#,
        )
        .bind(queue_name(service, queue))
        .bind(lease.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, payload)| Job { id, payload }))
    }

    async fn ack(&self, service: Service, queue: QueueKind, job_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM queue_jobs WHERE queue = $1 AND job_id = $2")
            .bind(queue_name(service, queue))
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn queue_len(&self, service: Service, queue: QueueKind) -> Result<usize, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM queue_jobs WHERE queue = $1")
            .bind(queue_name(service, queue))
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as usize)
    }

    async fn load_checkpoint(&self, key: &str) -> Result<Option<Checkpoint>, StoreError> {
        let row: Option<(Json<Checkpoint>,)> =
            sqlx::query_as("SELECT value FROM checkpoints WHERE key = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(Json(checkpoint),)| checkpoint))
    }

    async fn save_checkpoint(&self, key: &str, checkpoint: Checkpoint) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO checkpoints (key, value, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(Json(checkpoint))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(service: &str, status: &str) -> StateRow {
        StateRow {
            service: service.to_string(),
            request_id: "42".to_string(),
            status: status.to_string(),
            request: None,
            requeue_count: 1,
            attempts: 2,
            reason: Some("worker: boom".to_string()),
            tx_hash: Some("0xaa".to_string()),
            tx_hashes: vec!["0xbb".to_string(), "0xaa".to_string()],
            tx_nonce: Some(4),
            reporter_enqueued: false,
            added_at: Utc::now(),
            processed_at: None,
            completed_at: None,
            failed_at: None,
        }
    }

    #[test]
    fn rows_convert_to_states() {
        let state = PipelineState::try_from(row("request-response", "failed")).unwrap();
        assert_eq!(state.service, Service::RequestResponse);
        assert_eq!(state.status, RequestStatus::Failed);
        assert_eq!(state.requeue_count, 1);
        assert_eq!(state.attempts, 2);
        assert_eq!(state.tx_hashes, ["0xbb", "0xaa"]);
        assert_eq!(state.tx_nonce, Some(4));
    }

    #[test]
    fn unknown_enums_are_corrupt_rows() {
        assert!(matches!(
            PipelineState::try_from(row("lottery", "added")),
            Err(StoreError::Corrupt(_))
        ));
        assert!(matches!(
            PipelineState::try_from(row("vrf", "paused")),
            Err(StoreError::Corrupt(_))
        ));
    }
}
