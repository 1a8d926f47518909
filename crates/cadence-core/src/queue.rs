//! Queue workers
//!
//! Two worker pools drain the durable job queues: a small one for
//! `campaign-tick` and a wider one for `email-send`. Workers poll with
//! `FOR UPDATE SKIP LOCKED` claims, so any number of processes can share
//! the queues. Failed jobs retry with exponential backoff until their
//! attempt budget runs out.

use cadence_common::config::WorkerConfig;
use cadence_storage::models::{Job, JobPayload, QUEUE_CAMPAIGN_TICK, QUEUE_EMAIL_SEND};
use cadence_storage::repository::JobRepository;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::scheduler::CampaignScheduler;
use crate::sender::{EmailSender, SendDisposition};

/// Retry backoff base
const BACKOFF_BASE_MS: i64 = 2000;

/// Retry backoff ceiling
const BACKOFF_CAP_MS: i64 = 300_000;

/// Jobs claimed per worker poll
const CLAIM_BATCH: i64 = 10;

/// A job stuck in processing this long is assumed orphaned by a crashed
/// worker and returned to the queue
const STALE_RECLAIM_SECS: i64 = 600;

/// Exponential backoff for the given attempt number (1-based):
/// `2000ms * 2^(attempt-1)`, capped.
pub fn calculate_backoff(attempt: i32) -> ChronoDuration {
    let shift = (attempt - 1).clamp(0, 30) as u32;
    let ms = BACKOFF_BASE_MS.saturating_mul(1i64 << shift).min(BACKOFF_CAP_MS);
    ChronoDuration::milliseconds(ms)
}

/// The two queue worker pools
pub struct QueueWorkers {
    jobs: JobRepository,
    scheduler: Arc<CampaignScheduler>,
    sender: Arc<EmailSender>,
    config: WorkerConfig,
}

impl QueueWorkers {
    pub fn new(
        jobs: JobRepository,
        scheduler: Arc<CampaignScheduler>,
        sender: Arc<EmailSender>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            jobs,
            scheduler,
            sender,
            config,
        }
    }

    /// Spawn every worker task
    pub fn spawn(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        for worker in 0..self.config.tick_workers {
            let workers = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                workers.run_worker(QUEUE_CAMPAIGN_TICK, worker).await;
            }));
        }

        for worker in 0..self.config.send_workers {
            let workers = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                workers.run_worker(QUEUE_EMAIL_SEND, worker).await;
            }));
        }

        let workers = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            workers.run_janitor().await;
        }));

        info!(
            tick_workers = self.config.tick_workers,
            send_workers = self.config.send_workers,
            "Queue workers started"
        );

        handles
    }

    async fn run_worker(&self, queue: &'static str, worker: usize) {
        let mut ticker =
            tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms.max(100)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        debug!(queue, worker, "Worker started");

        loop {
            ticker.tick().await;

            let jobs = match self.jobs.claim_batch(queue, CLAIM_BATCH).await {
                Ok(jobs) => jobs,
                Err(e) => {
                    error!(queue, worker, "Failed to claim jobs: {}", e);
                    continue;
                }
            };

            for job in jobs {
                self.process_job(job).await;
            }
        }
    }

    async fn run_janitor(&self) {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            ticker.tick().await;
            match self.jobs.reclaim_stale(STALE_RECLAIM_SECS).await {
                Ok(0) => {}
                Ok(reclaimed) => warn!(reclaimed, "Reclaimed orphaned jobs"),
                Err(e) => error!("Failed to reclaim stale jobs: {}", e),
            }
        }
    }

    async fn process_job(&self, job: Job) {
        let Some(payload) = job.payload() else {
            error!(job_id = %job.id, "Job payload does not parse, failing it");
            let _ = self.jobs.fail(job.id, "unparseable payload").await;
            return;
        };

        match payload {
            JobPayload::CampaignTick { campaign_id } => {
                match self.scheduler.handle_tick(campaign_id).await {
                    Ok(()) => {
                        if let Err(e) = self.jobs.complete(job.id).await {
                            error!(job_id = %job.id, "Failed to complete job: {}", e);
                        }
                    }
                    Err(e) => {
                        warn!(job_id = %job.id, %campaign_id, "Tick failed: {}", e);
                        self.retry_or_fail(&job, &e.to_string()).await;
                    }
                }
            }
            JobPayload::EmailSend { email_log_id } => {
                match self
                    .sender
                    .execute(email_log_id, job.attempts, job.max_attempts)
                    .await
                {
                    Ok(SendDisposition::Done) => {
                        if let Err(e) = self.jobs.complete(job.id).await {
                            error!(job_id = %job.id, "Failed to complete job: {}", e);
                        }
                    }
                    Ok(SendDisposition::Deferred(at)) => {
                        debug!(job_id = %job.id, %at, "Send deferred to next window");
                        if let Err(e) = self.jobs.defer(job.id, at).await {
                            error!(job_id = %job.id, "Failed to defer job: {}", e);
                        }
                    }
                    Ok(SendDisposition::RetryTransient(reason)) => {
                        self.retry_or_fail(&job, &reason).await;
                    }
                    Err(e) => {
                        warn!(job_id = %job.id, %email_log_id, "Send errored: {}", e);
                        self.retry_or_fail(&job, &e.to_string()).await;
                    }
                }
            }
        }
    }

    async fn retry_or_fail(&self, job: &Job, error: &str) {
        let next_attempt = job.attempts + 1;

        if next_attempt >= job.max_attempts {
            error!(job_id = %job.id, attempts = next_attempt, "Job exhausted retries: {}", error);
            if let Err(e) = self.jobs.fail(job.id, error).await {
                error!(job_id = %job.id, "Failed to mark job failed: {}", e);
            }
            return;
        }

        let at = Utc::now() + calculate_backoff(next_attempt);
        debug!(job_id = %job.id, attempt = next_attempt, %at, "Scheduling retry");
        if let Err(e) = self.jobs.retry_later(job.id, error, at).await {
            error!(job_id = %job.id, "Failed to schedule retry: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculate_backoff_series() {
        assert_eq!(calculate_backoff(1), ChronoDuration::milliseconds(2000));
        assert_eq!(calculate_backoff(2), ChronoDuration::milliseconds(4000));
        assert_eq!(calculate_backoff(3), ChronoDuration::milliseconds(8000));
        assert_eq!(calculate_backoff(4), ChronoDuration::milliseconds(16_000));
    }

    #[test]
    fn test_calculate_backoff_is_capped() {
        assert_eq!(calculate_backoff(10), ChronoDuration::milliseconds(300_000));
        assert_eq!(calculate_backoff(60), ChronoDuration::milliseconds(300_000));
    }

    #[test]
    fn test_calculate_backoff_clamps_low_attempts() {
        assert_eq!(calculate_backoff(0), ChronoDuration::milliseconds(2000));
        assert_eq!(calculate_backoff(-3), ChronoDuration::milliseconds(2000));
    }
}
