//! Campaign recipient repository

use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{CampaignRecipient, RecipientStatus};

/// Recipient counts by status for a campaign
#[derive(Debug, Clone, Default)]
pub struct RecipientStatusCounts {
    pub pending: i64,
    pub queued: i64,
    pub sent: i64,
    pub failed: i64,
    pub bounced: i64,
}

impl RecipientStatusCounts {
    pub fn total(&self) -> i64 {
        self.pending + self.queued + self.sent + self.failed + self.bounced
    }
}

/// Campaign recipient repository
#[derive(Clone)]
pub struct RecipientRepository {
    pool: PgPool,
}

impl RecipientRepository {
    /// Create a new recipient repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a recipient by ID
    pub async fn get(&self, id: Uuid) -> Result<Option<CampaignRecipient>, sqlx::Error> {
        sqlx::query_as::<_, CampaignRecipient>("SELECT * FROM campaign_recipients WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// List recipients for a campaign
    pub async fn list_by_campaign(
        &self,
        campaign_id: Uuid,
        status: Option<RecipientStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<CampaignRecipient>, sqlx::Error> {
        if let Some(status) = status {
            sqlx::query_as::<_, CampaignRecipient>(
                r#"
                SELECT * FROM campaign_recipients
                WHERE campaign_id = $1 AND status = $2
                ORDER BY seq ASC
                LIMIT $3 OFFSET $4
                "#,
            )
            .bind(campaign_id)
            .bind(status.to_string())
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, CampaignRecipient>(
                r#"
                SELECT * FROM campaign_recipients
                WHERE campaign_id = $1
                ORDER BY seq ASC
                LIMIT $2 OFFSET $3
                "#,
            )
            .bind(campaign_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
        }
    }

    /// All recipients of a campaign in sequence order (used by duplicate)
    pub async fn list_all_by_campaign(
        &self,
        campaign_id: Uuid,
    ) -> Result<Vec<CampaignRecipient>, sqlx::Error> {
        sqlx::query_as::<_, CampaignRecipient>(
            "SELECT * FROM campaign_recipients WHERE campaign_id = $1 ORDER BY seq ASC",
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await
    }

    /// Claim the next batch of unclaimed recipients: rows in pending or
    /// queued status without a live email log are flipped to queued and
    /// returned in sequence order. Idempotent when `limit` exceeds the
    /// remaining work.
    pub async fn claim_next_batch(
        &self,
        campaign_id: Uuid,
        limit: i64,
    ) -> Result<Vec<CampaignRecipient>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let mut claimed = sqlx::query_as::<_, CampaignRecipient>(
            r#"
            UPDATE campaign_recipients SET status = 'queued', updated_at = NOW()
            WHERE id IN (
                SELECT r.id FROM campaign_recipients r
                WHERE r.campaign_id = $1
                  AND r.status IN ('pending', 'queued')
                  AND NOT EXISTS (
                      SELECT 1 FROM email_logs el
                      WHERE el.recipient_id = r.id
                        AND el.status IN ('pending', 'queued')
                  )
                ORDER BY r.seq ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(campaign_id)
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        // UPDATE .. RETURNING does not guarantee row order
        claimed.sort_by_key(|r| r.seq);
        Ok(claimed)
    }

    /// Count recipients by status for a campaign
    pub async fn status_counts(
        &self,
        campaign_id: Uuid,
    ) -> Result<RecipientStatusCounts, sqlx::Error> {
        use sqlx::Row;

        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending') as pending,
                COUNT(*) FILTER (WHERE status = 'queued') as queued,
                COUNT(*) FILTER (WHERE status = 'sent') as sent,
                COUNT(*) FILTER (WHERE status = 'failed') as failed,
                COUNT(*) FILTER (WHERE status = 'bounced') as bounced
            FROM campaign_recipients
            WHERE campaign_id = $1
            "#,
        )
        .bind(campaign_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(RecipientStatusCounts {
            pending: row.get::<Option<i64>, _>("pending").unwrap_or(0),
            queued: row.get::<Option<i64>, _>("queued").unwrap_or(0),
            sent: row.get::<Option<i64>, _>("sent").unwrap_or(0),
            failed: row.get::<Option<i64>, _>("failed").unwrap_or(0),
            bounced: row.get::<Option<i64>, _>("bounced").unwrap_or(0),
        })
    }

    /// Count all recipients of a campaign
    pub async fn count_by_campaign(&self, campaign_id: Uuid) -> Result<i64, sqlx::Error> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM campaign_recipients WHERE campaign_id = $1")
                .bind(campaign_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count.0)
    }

}
