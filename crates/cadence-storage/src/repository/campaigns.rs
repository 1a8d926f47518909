//! Campaign repository

use cadence_common::types::UserId;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Campaign, CampaignStatus, CreateCampaign};

/// Campaign repository
#[derive(Clone)]
pub struct CampaignRepository {
    pool: PgPool,
}

impl CampaignRepository {
    /// Create a new campaign repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a campaign together with its sender set and recipients in a
    /// single transaction. `total_recipients` is the count of rows actually
    /// inserted.
    pub async fn create(&self, input: CreateCampaign) -> Result<Campaign, sqlx::Error> {
        let id = Uuid::new_v4();
        let settings = serde_json::to_value(&input.settings).unwrap_or_default();

        let mut tx = self.pool.begin().await?;

        let campaign = sqlx::query_as::<_, Campaign>(
            r#"
            INSERT INTO campaigns (
                id, user_id, name, template_id, status, scheduled_at,
                started_at, total_recipients, settings
            )
            VALUES ($1, $2, $3, $4, $5, $6,
                    CASE WHEN $5 = 'running' THEN NOW() END, $7, $8)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(input.user_id)
        .bind(&input.name)
        .bind(input.template_id)
        .bind(input.status.to_string())
        .bind(input.scheduled_at)
        .bind(input.recipients.len() as i32)
        .bind(&settings)
        .fetch_one(&mut *tx)
        .await?;

        for (position, account_id) in input.smtp_account_ids.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO campaign_smtp_accounts (campaign_id, smtp_account_id, position)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(id)
            .bind(account_id)
            .bind(position as i32)
            .execute(&mut *tx)
            .await?;
        }

        for (seq, recipient) in input.recipients.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO campaign_recipients (
                    id, campaign_id, email, first_name, last_name, variables, seq
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(id)
            .bind(&recipient.email)
            .bind(&recipient.first_name)
            .bind(&recipient.last_name)
            .bind(&recipient.variables)
            .bind(seq as i32)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(campaign)
    }

    /// Get a campaign by ID
    pub async fn get(&self, id: Uuid) -> Result<Option<Campaign>, sqlx::Error> {
        sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Get a campaign by ID scoped to its owner
    pub async fn get_by_user(
        &self,
        user_id: UserId,
        id: Uuid,
    ) -> Result<Option<Campaign>, sqlx::Error> {
        sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
    }

    /// List campaigns for a user
    pub async fn list_by_user(
        &self,
        user_id: UserId,
        status: Option<CampaignStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Campaign>, sqlx::Error> {
        if let Some(status) = status {
            sqlx::query_as::<_, Campaign>(
                r#"
                SELECT * FROM campaigns
                WHERE user_id = $1 AND status = $2
                ORDER BY created_at DESC
                LIMIT $3 OFFSET $4
                "#,
            )
            .bind(user_id)
            .bind(status.to_string())
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, Campaign>(
                r#"
                SELECT * FROM campaigns
                WHERE user_id = $1
                ORDER BY created_at DESC
                LIMIT $2 OFFSET $3
                "#,
            )
            .bind(user_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
        }
    }

    /// Compare-and-set status transition: succeeds only when the current
    /// status is in `from`. Timestamps are maintained as a side effect of
    /// the target status.
    pub async fn transition(
        &self,
        id: Uuid,
        from: &[CampaignStatus],
        to: CampaignStatus,
    ) -> Result<Option<Campaign>, sqlx::Error> {
        let from: Vec<String> = from.iter().map(|s| s.to_string()).collect();

        sqlx::query_as::<_, Campaign>(
            r#"
            UPDATE campaigns SET
                status = $2,
                started_at = CASE
                    WHEN $2 = 'running' THEN COALESCE(started_at, NOW())
                    ELSE started_at
                END,
                paused_at = CASE
                    WHEN $2 = 'paused' THEN NOW()
                    WHEN $2 = 'running' THEN NULL
                    ELSE paused_at
                END,
                completed_at = CASE
                    WHEN $2 IN ('completed', 'failed', 'cancelled') THEN NOW()
                    ELSE completed_at
                END,
                updated_at = NOW()
            WHERE id = $1 AND status = ANY($3)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(to.to_string())
        .bind(&from)
        .fetch_optional(&self.pool)
        .await
    }

    /// Reset a finished or paused campaign back to running: all recipients
    /// return to pending, prior email logs are removed, live jobs are
    /// cancelled and counters zeroed, atomically.
    pub async fn restart_reset(&self, id: Uuid) -> Result<Option<Campaign>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let campaign = sqlx::query_as::<_, Campaign>(
            r#"
            UPDATE campaigns SET
                status = 'running',
                started_at = NOW(),
                completed_at = NULL,
                paused_at = NULL,
                sent_count = 0,
                failed_count = 0,
                bounce_count = 0,
                bounce_rate = 0,
                updated_at = NOW()
            WHERE id = $1 AND status IN ('completed', 'failed', 'paused')
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(campaign) = campaign else {
            return Ok(None);
        };

        sqlx::query("DELETE FROM email_logs WHERE campaign_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            UPDATE campaign_recipients SET
                status = 'pending',
                sent_at = NULL,
                failed_reason = NULL,
                smtp_account_id = NULL,
                updated_at = NOW()
            WHERE campaign_id = $1
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE jobs SET status = 'cancelled', completed_at = NOW()
            WHERE campaign_id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(campaign))
    }

    /// Sender account ids attached to a campaign, in position order
    pub async fn account_ids(&self, campaign_id: Uuid) -> Result<Vec<Uuid>, sqlx::Error> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT smtp_account_id FROM campaign_smtp_accounts
            WHERE campaign_id = $1
            ORDER BY position ASC
            "#,
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Scheduled campaigns whose start instant has elapsed
    pub async fn scheduled_due(&self) -> Result<Vec<Campaign>, sqlx::Error> {
        sqlx::query_as::<_, Campaign>(
            r#"
            SELECT * FROM campaigns
            WHERE status = 'scheduled'
              AND scheduled_at IS NOT NULL
              AND scheduled_at <= NOW()
            ORDER BY scheduled_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
    }

    /// Delete a campaign (recipients and email logs cascade)
    pub async fn delete(&self, id: Uuid, user_id: UserId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM campaigns WHERE id = $1 AND user_id = $2 AND status <> 'running'",
        )
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
