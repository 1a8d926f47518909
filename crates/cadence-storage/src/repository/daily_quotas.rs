//! Daily quota repository
//!
//! One row per (SMTP account, UTC date). Consumption is an atomic
//! guarded upsert so concurrent senders cannot overshoot the limit.

use chrono::NaiveDate;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{DailyQuota, QuotaDecision};

/// Daily quota repository
#[derive(Clone)]
pub struct DailyQuotaRepository {
    pool: PgPool,
}

impl DailyQuotaRepository {
    /// Create a new daily quota repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Try to consume one unit of quota for the account on the given date.
    /// The increment only happens while the counter is below `limit`.
    pub async fn try_consume(
        &self,
        smtp_account_id: Uuid,
        date: NaiveDate,
        limit: i32,
    ) -> Result<QuotaDecision, sqlx::Error> {
        let row: Option<(i32,)> = sqlx::query_as(
            r#"
            INSERT INTO daily_quotas (smtp_account_id, quota_date, sent_count)
            VALUES ($1, $2, 1)
            ON CONFLICT (smtp_account_id, quota_date)
            DO UPDATE SET sent_count = daily_quotas.sent_count + 1, updated_at = NOW()
            WHERE daily_quotas.sent_count < $3
            RETURNING sent_count
            "#,
        )
        .bind(smtp_account_id)
        .bind(date)
        .bind(limit)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((sent_count,)) => Ok(QuotaDecision {
                granted: true,
                remaining: (limit - sent_count).max(0),
            }),
            None => Ok(QuotaDecision {
                granted: false,
                remaining: 0,
            }),
        }
    }

    /// Return one speculatively consumed unit. Used only when a consumed
    /// send was aborted before transport acceptance.
    pub async fn refund(&self, smtp_account_id: Uuid, date: NaiveDate) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE daily_quotas SET
                sent_count = GREATEST(sent_count - 1, 0),
                updated_at = NOW()
            WHERE smtp_account_id = $1 AND quota_date = $2
            "#,
        )
        .bind(smtp_account_id)
        .bind(date)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get the counter row for an account and date
    pub async fn get(
        &self,
        smtp_account_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<DailyQuota>, sqlx::Error> {
        sqlx::query_as::<_, DailyQuota>(
            "SELECT * FROM daily_quotas WHERE smtp_account_id = $1 AND quota_date = $2",
        )
        .bind(smtp_account_id)
        .bind(date)
        .fetch_optional(&self.pool)
        .await
    }
}
