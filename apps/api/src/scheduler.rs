//! Background polling that claims due jobs and hands them to the runner.
//!
//! Claims are conditional updates, so several replicas can poll the same
//! database without running a job twice.

use std::time::Duration;

use sqlx::PgPool;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SchedulerSettings;
use crate::errors::AppError;
use crate::jobs::service::{self as jobs, EventLevel};
use crate::models::job::JobStatus;
use crate::processing::JobRunner;

pub struct Scheduler {
    db: PgPool,
    runner: JobRunner,
    settings: SchedulerSettings,
}

impl Scheduler {
    pub fn new(db: PgPool, runner: JobRunner, settings: SchedulerSettings) -> Self {
        Self {
            db,
            runner,
            settings,
        }
    }

    /// Fails leftovers from a previous process, then polls until the task is dropped.
    pub async fn run(self) {
        match jobs::fail_interrupted(&self.db).await {
            Ok(ids) if !ids.is_empty() => {
                warn!("Marked {} interrupted job(s) as failed", ids.len());
                for id in ids {
                    if let Err(e) = jobs::record_event(
                        &self.db,
                        id,
                        EventLevel::Error,
                        "Job was interrupted by a service restart",
                    )
                    .await
                    {
                        warn!("Could not record event for job {id}: {e}");
                    }
                }
            }
            Ok(_) => {}
            Err(e) => error!("Could not recover interrupted jobs: {e}"),
        }

        let mut scheduled = interval(Duration::from_secs(self.settings.scheduled_poll_secs.max(1)));
        let mut pending = interval(Duration::from_secs(self.settings.pending_poll_secs.max(1)));
        scheduled.set_missed_tick_behavior(MissedTickBehavior::Delay);
        pending.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Scheduler started (scheduled every {}s, pending every {}s)",
            self.settings.scheduled_poll_secs, self.settings.pending_poll_secs
        );

        loop {
            tokio::select! {
                _ = scheduled.tick() => {
                    if let Err(e) = self.poll(JobStatus::Scheduled).await {
                        error!("Scheduled job poll failed: {e}");
                    }
                }
                _ = pending.tick() => {
                    if let Err(e) = self.poll(JobStatus::Pending).await {
                        error!("Pending job poll failed: {e}");
                    }
                }
            }
        }
    }

    /// Claims up to the runner's free capacity of jobs in `status` and dispatches them.
    async fn poll(&self, status: JobStatus) -> Result<usize, AppError> {
        let capacity = self.runner.available();
        if capacity == 0 {
            debug!("Runner is busy, skipping {} poll", status.as_str());
            return Ok(0);
        }

        let limit = i64::try_from(capacity).unwrap_or(i64::MAX);
        let candidates: Vec<Uuid> = match status {
            JobStatus::Scheduled => jobs::due_scheduled(&self.db, limit).await?,
            _ => jobs::pending(&self.db, limit).await?,
        };
        debug!("{} poll found {} candidate(s)", status.as_str(), candidates.len());

        let mut dispatched = 0;
        for id in candidates {
            // Another replica or a manual start may have claimed it already.
            let claimed = match jobs::claim(&self.db, id, &[status]).await {
                Ok(claimed) => claimed,
                Err(e) => {
                    error!("Could not claim job {id}: {e}");
                    continue;
                }
            };
            if claimed.is_none() {
                continue;
            }
            info!("Scheduler dispatching job {id}");
            self.runner.dispatch(id);
            dispatched += 1;

            let message = format!("Picked up by scheduler from {}", status.as_str());
            if let Err(e) = jobs::record_event(&self.db, id, EventLevel::Info, &message).await {
                warn!("Could not record event for job {id}: {e}");
            }
        }
        Ok(dispatched)
    }
}
