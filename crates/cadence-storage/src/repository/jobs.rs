//! Durable job queue repository
//!
//! Backs the `campaign-tick` and `email-send` queues. Jobs support
//! delayed scheduling, keyed de-duplication against live rows, bounded
//! retries and cancellation by campaign.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Job, JobPayload};

/// Job queue repository
#[derive(Clone)]
pub struct JobRepository {
    pool: PgPool,
}

impl JobRepository {
    /// Create a new job repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Enqueue a job. A live job with the same key makes this a no-op,
    /// which is what keeps duplicate ticks idempotent.
    pub async fn enqueue(
        &self,
        queue: &str,
        job_key: &str,
        payload: &JobPayload,
        campaign_id: Option<Uuid>,
        delay_secs: i64,
        max_attempts: i32,
    ) -> Result<Option<Uuid>, sqlx::Error> {
        let id = Uuid::new_v4();
        let payload = serde_json::to_value(payload).unwrap_or_default();
        let scheduled_at = Utc::now() + chrono::Duration::seconds(delay_secs);

        let row: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO jobs (
                id, queue, job_key, payload, max_attempts, campaign_id, scheduled_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (job_key) WHERE status IN ('pending', 'processing') DO NOTHING
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(queue)
        .bind(job_key)
        .bind(&payload)
        .bind(max_attempts)
        .bind(campaign_id)
        .bind(scheduled_at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id,)| id))
    }

    /// Claim due jobs from a queue. Claimed rows move to processing;
    /// `FOR UPDATE SKIP LOCKED` keeps concurrent workers from colliding.
    pub async fn claim_batch(&self, queue: &str, limit: i64) -> Result<Vec<Job>, sqlx::Error> {
        sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs SET status = 'processing', started_at = NOW()
            WHERE id IN (
                SELECT id FROM jobs
                WHERE queue = $1
                  AND status = 'pending'
                  AND scheduled_at <= NOW()
                ORDER BY scheduled_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(queue)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    /// Mark a job as completed
    pub async fn complete(&self, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE jobs SET status = 'completed', completed_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Schedule a retry: bumps the attempt counter and re-enters the
    /// pending state at the given instant.
    pub async fn retry_later(
        &self,
        id: Uuid,
        error: &str,
        scheduled_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE jobs SET
                status = 'pending',
                attempts = attempts + 1,
                last_error = $2,
                scheduled_at = $3,
                started_at = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(scheduled_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Push a job to a later instant without counting an attempt
    /// (office-hours deferral).
    pub async fn defer(&self, id: Uuid, scheduled_at: DateTime<Utc>) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE jobs SET
                status = 'pending',
                scheduled_at = $2,
                started_at = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(scheduled_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Mark a job as failed for good
    pub async fn fail(&self, id: Uuid, error: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE jobs SET
                status = 'failed',
                last_error = $2,
                completed_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Cancel pending jobs for a campaign, optionally restricted to one
    /// queue. In-flight jobs are left to finish.
    pub async fn cancel_by_campaign(
        &self,
        campaign_id: Uuid,
        queue: Option<&str>,
    ) -> Result<u64, sqlx::Error> {
        let result = if let Some(queue) = queue {
            sqlx::query(
                r#"
                UPDATE jobs SET status = 'cancelled', completed_at = NOW()
                WHERE campaign_id = $1 AND queue = $2 AND status = 'pending'
                "#,
            )
            .bind(campaign_id)
            .bind(queue)
            .execute(&self.pool)
            .await?
        } else {
            sqlx::query(
                r#"
                UPDATE jobs SET status = 'cancelled', completed_at = NOW()
                WHERE campaign_id = $1 AND status = 'pending'
                "#,
            )
            .bind(campaign_id)
            .execute(&self.pool)
            .await?
        };

        Ok(result.rows_affected())
    }

    /// Return crashed-worker jobs to the queue: rows stuck in processing
    /// longer than the threshold become pending again and are redelivered.
    pub async fn reclaim_stale(&self, older_than_secs: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET status = 'pending', started_at = NULL
            WHERE status = 'processing'
              AND started_at < NOW() - ($1 * INTERVAL '1 second')
            "#,
        )
        .bind(older_than_secs)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Count jobs in a queue by status
    pub async fn count(&self, queue: &str, status: &str) -> Result<i64, sqlx::Error> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM jobs WHERE queue = $1 AND status = $2")
                .bind(queue)
                .bind(status)
                .fetch_one(&self.pool)
                .await?;
        Ok(count.0)
    }
}
