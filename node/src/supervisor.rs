use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, warn};

const MAX_BACKOFF_SECONDS: u64 = 30;

/// Delay before the `restart_count`-th restart.
pub fn restart_backoff(restart_count: u32) -> Duration {
    Duration::from_secs(2u64.saturating_pow(restart_count.min(5)).min(MAX_BACKOFF_SECONDS))
}

/// Run the task built by `make` in the background, rebuilding and restarting
/// it with capped exponential backoff whenever it fails or panics. A task
/// that returns `Ok` is not restarted.
pub fn supervise<F, Fut>(name: &'static str, make: F) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut restart_count: u32 = 0;
        loop {
            let handle = tokio::spawn(make());

            match handle.await {
                Ok(Ok(())) => {
                    info!(task = name, "task exited cleanly; stopping supervisor");
                    break;
                }
                Ok(Err(err)) => error!(task = name, error = %err, "task failed; restarting"),
                Err(join_error) => {
                    if join_error.is_panic() {
                        error!(task = name, "task panicked; restarting");
                    } else {
                        error!(task = name, error = %join_error, "task aborted; restarting");
                    }
                }
            }

            restart_count = restart_count.saturating_add(1);
            let backoff = restart_backoff(restart_count);
            warn!(
                task = name,
                restart_count,
                backoff_seconds = backoff.as_secs(),
                "task restart backoff"
            );
            sleep(backoff).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn backoff_is_capped() {
        assert_eq!(restart_backoff(1), Duration::from_secs(2));
        assert_eq!(restart_backoff(4), Duration::from_secs(16));
        assert_eq!(restart_backoff(5), Duration::from_secs(30));
        assert_eq!(restart_backoff(40), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_tasks_are_restarted_until_they_succeed() {
        let runs = Arc::new(AtomicU32::new(0));
        let counter = runs.clone();
        let handle = supervise("flaky", move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    anyhow::bail!("not yet");
                }
                Ok(())
            }
        });

        handle.await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }
}
