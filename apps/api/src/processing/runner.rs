use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error};
use uuid::Uuid;

/// Something that runs a claimed job to completion.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job_id: Uuid);
}

/// Runs claimed jobs in the background, at most `max_concurrent` at a time.
/// Dispatches beyond the limit wait for a free permit.
#[derive(Clone)]
pub struct JobRunner {
    executor: Arc<dyn JobExecutor>,
    permits: Arc<Semaphore>,
}

impl JobRunner {
    pub fn new(executor: Arc<dyn JobExecutor>, max_concurrent: usize) -> Self {
        Self {
            executor,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn dispatch(&self, job_id: Uuid) -> JoinHandle<()> {
        let executor = self.executor.clone();
        let permits = self.permits.clone();
        tokio::spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!("Job runner is shut down, dropping job {job_id}: {e}");
                    return;
                }
            };
            debug!("Running job {job_id}");
            executor.execute(job_id).await;
        })
    }

    /// Free slots right now; pollers use this to size their batches.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingExecutor {
        running: AtomicUsize,
        peak: AtomicUsize,
        finished: AtomicUsize,
    }

    #[async_trait]
    impl JobExecutor for CountingExecutor {
        async fn execute(&self, _job_id: Uuid) {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_dispatch_respects_concurrency_limit() {
        let executor = Arc::new(CountingExecutor::default());
        let runner = JobRunner::new(executor.clone(), 2);
        assert_eq!(runner.available(), 2);

        let handles: Vec<_> = (0..6).map(|_| runner.dispatch(Uuid::new_v4())).collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(executor.finished.load(Ordering::SeqCst), 6);
        assert!(executor.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(runner.available(), 2);
    }

    #[tokio::test]
    async fn test_zero_limit_still_runs_jobs() {
        let executor = Arc::new(CountingExecutor::default());
        let runner = JobRunner::new(executor.clone(), 0);
        runner.dispatch(Uuid::new_v4()).await.unwrap();
        assert_eq!(executor.finished.load(Ordering::SeqCst), 1);
    }
}
