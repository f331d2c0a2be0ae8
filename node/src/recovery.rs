//! Finds requests stuck in `processing` after a worker died and either
//! requeues them or gives up on them.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::error::StoreError;
use crate::models::{Job, RequestStatus, Service};
use crate::store::StateStore;

pub const TIMEOUT_REASON: &str = "recovery: processing timeout exceeded";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub requeued: usize,
    pub failed: usize,
}

pub struct RecoverySweeper {
    store: Arc<dyn StateStore>,
    services: Vec<Service>,
    timeout: Duration,
    max_requeues: u32,
}

impl RecoverySweeper {
    pub fn new(
        store: Arc<dyn StateStore>,
        services: Vec<Service>,
        timeout: Duration,
        max_requeues: u32,
    ) -> Self {
        Self {
            store,
            services,
            timeout,
            max_requeues,
        }
    }

    pub async fn run(self) -> Result<()> {
        let period = (self.timeout / 2).max(Duration::from_secs(1));
        info!(timeout_secs = self.timeout.as_secs(), max_requeues = self.max_requeues, "recovery sweeper started");

        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            match self.sweep_once().await {
                Ok(report) if report.requeued + report.failed > 0 => {
                    info!(requeued = report.requeued, failed = report.failed, "recovery sweep")
                }
                Ok(_) => debug!("recovery sweep found nothing"),
                Err(err) => error!(error = %err, "recovery sweep failed"),
            }
        }
    }

    /// Requeue or fail every request that has been processing for longer
    /// than the timeout. Requests already handed to the reporter belong to
    /// it and are left alone.
    pub async fn sweep_once(&self) -> Result<SweepReport, StoreError> {
        let timeout = chrono::Duration::from_std(self.timeout)
            .unwrap_or_else(|_| chrono::Duration::days(36_500));
        let cutoff = Utc::now() - timeout;
        let mut report = SweepReport::default();

        for &service in &self.services {
            for state in self.store.stale_processing(service, cutoff).await? {
                if state.reporter_enqueued {
                    continue;
                }
                let request_id = state.request_id.as_str();

                if let Some(request) = state
                    .request
                    .as_ref()
                    .filter(|_| state.requeue_count < self.max_requeues)
                {
                    let job = Job::new(request_id, request)?;
                    if self
                        .store
                        .requeue(service, request_id, self.max_requeues, job)
                        .await?
                    {
                        warn!(%service, request_id, requeue_count = state.requeue_count + 1, "stuck request requeued");
                        report.requeued += 1;
                    }
                    continue;
                }

                if self
                    .store
                    .transition(
                        service,
                        request_id,
                        RequestStatus::Processing,
                        RequestStatus::Failed,
                        Some(TIMEOUT_REASON.to_string()),
                    )
                    .await?
                {
                    error!(%service, request_id, "request failed after processing timeout");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }
}
