//! Email log repository
//!
//! The email log row is the authoritative per-attempt record and the
//! idempotency key for delivery. Outcome recording serializes on the
//! campaign row so the counter invariants hold under concurrent senders.

use chrono::{Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{
    bounce_rate, AttemptOutcome, Campaign, CampaignRecipient, CampaignSnapshot, EmailLog,
    EmailLogStatus, JobPayload, SmtpAccount, Template, QUEUE_EMAIL_SEND,
};

/// One scheduled send produced by a campaign tick
#[derive(Debug, Clone)]
pub struct QueuedSendPlan {
    pub recipient_id: Uuid,
    pub smtp_account_id: Uuid,
    pub send_delay_secs: i64,
}

/// Everything the sender needs to execute one attempt
#[derive(Debug, Clone)]
pub struct SendContext {
    pub email_log: EmailLog,
    pub recipient: CampaignRecipient,
    pub campaign: Campaign,
    pub template: Template,
    pub account: SmtpAccount,
}

/// Email log repository
#[derive(Clone)]
pub struct EmailLogRepository {
    pool: PgPool,
}

impl EmailLogRepository {
    /// Create a new email log repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get an email log by ID
    pub async fn get(&self, id: Uuid) -> Result<Option<EmailLog>, sqlx::Error> {
        sqlx::query_as::<_, EmailLog>("SELECT * FROM email_logs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Materialize queued email logs and their delayed send jobs in one
    /// transaction. A crash leaves either both or neither for every plan.
    pub async fn create_queued_batch(
        &self,
        campaign_id: Uuid,
        max_attempts: i32,
        plans: &[QueuedSendPlan],
    ) -> Result<u64, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();
        let mut count = 0u64;

        for plan in plans {
            let log_id = Uuid::new_v4();

            sqlx::query(
                r#"
                INSERT INTO email_logs (
                    id, campaign_id, recipient_id, smtp_account_id, status, subject
                )
                VALUES ($1, $2, $3, $4, 'queued', '')
                "#,
            )
            .bind(log_id)
            .bind(campaign_id)
            .bind(plan.recipient_id)
            .bind(plan.smtp_account_id)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                UPDATE campaign_recipients SET smtp_account_id = $2, updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(plan.recipient_id)
            .bind(plan.smtp_account_id)
            .execute(&mut *tx)
            .await?;

            let payload = serde_json::to_value(JobPayload::EmailSend {
                email_log_id: log_id,
            })
            .unwrap_or_default();

            sqlx::query(
                r#"
                INSERT INTO jobs (
                    id, queue, job_key, payload, max_attempts, campaign_id, scheduled_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (job_key) WHERE status IN ('pending', 'processing') DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(QUEUE_EMAIL_SEND)
            .bind(crate::models::send_job_key(log_id))
            .bind(&payload)
            .bind(max_attempts)
            .bind(campaign_id)
            .bind(now + Duration::seconds(plan.send_delay_secs))
            .execute(&mut *tx)
            .await?;

            count += 1;
        }

        tx.commit().await?;
        Ok(count)
    }

    /// List attempt logs for a campaign, newest first
    pub async fn list_by_campaign(
        &self,
        campaign_id: Uuid,
        status: Option<EmailLogStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<EmailLog>, sqlx::Error> {
        if let Some(status) = status {
            sqlx::query_as::<_, EmailLog>(
                r#"
                SELECT * FROM email_logs
                WHERE campaign_id = $1 AND status = $2
                ORDER BY created_at DESC
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
            sqlx::query_as::<_, EmailLog>(
                r#"
                SELECT * FROM email_logs
                WHERE campaign_id = $1
                ORDER BY created_at DESC
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

    /// Write the rendered subject snapshot onto the log
    pub async fn set_subject(&self, id: Uuid, subject: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE email_logs SET subject = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(subject)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Resolve the full send context for an attempt. Returns `None` when
    /// any referenced entity has disappeared (stale job).
    pub async fn load_send_context(&self, id: Uuid) -> Result<Option<SendContext>, sqlx::Error> {
        let Some(email_log) = self.get(id).await? else {
            return Ok(None);
        };

        let recipient = sqlx::query_as::<_, CampaignRecipient>(
            "SELECT * FROM campaign_recipients WHERE id = $1",
        )
        .bind(email_log.recipient_id)
        .fetch_optional(&self.pool)
        .await?;

        let campaign = sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE id = $1")
            .bind(email_log.campaign_id)
            .fetch_optional(&self.pool)
            .await?;

        let (Some(recipient), Some(campaign)) = (recipient, campaign) else {
            return Ok(None);
        };

        let template = sqlx::query_as::<_, Template>("SELECT * FROM templates WHERE id = $1")
            .bind(campaign.template_id)
            .fetch_optional(&self.pool)
            .await?;

        let account = sqlx::query_as::<_, SmtpAccount>("SELECT * FROM smtp_accounts WHERE id = $1")
            .bind(email_log.smtp_account_id)
            .fetch_optional(&self.pool)
            .await?;

        let (Some(template), Some(account)) = (template, account) else {
            return Ok(None);
        };

        Ok(Some(SendContext {
            email_log,
            recipient,
            campaign,
            template,
            account,
        }))
    }

    /// Record the terminal outcome of an attempt.
    ///
    /// In one transaction, under a lock on the campaign row: updates the
    /// email log, moves the recipient to its terminal status, bumps the
    /// campaign counters, recomputes the bounce rate and transitions a
    /// finished running campaign to completed. Returns the post-update
    /// campaign snapshot, or `None` when the log no longer exists.
    /// A log already settled makes this a no-op (idempotent redelivery).
    pub async fn record_attempt_outcome(
        &self,
        id: Uuid,
        outcome: AttemptOutcome,
    ) -> Result<Option<CampaignSnapshot>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let email_log =
            sqlx::query_as::<_, EmailLog>("SELECT * FROM email_logs WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;

        let Some(email_log) = email_log else {
            return Ok(None);
        };

        let campaign =
            sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE id = $1 FOR UPDATE")
                .bind(email_log.campaign_id)
                .fetch_optional(&mut *tx)
                .await?;

        let Some(campaign) = campaign else {
            return Ok(None);
        };

        if email_log
            .status()
            .map(|s| s.is_settled())
            .unwrap_or(false)
        {
            tx.commit().await?;
            return Ok(Some(snapshot_of(&campaign)));
        }

        let (sent_inc, failed_inc, bounce_inc) = match &outcome {
            AttemptOutcome::Sent { message_id } => {
                sqlx::query(
                    r#"
                    UPDATE email_logs SET
                        status = 'sent',
                        message_id = $2,
                        sent_at = NOW(),
                        updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(id)
                .bind(message_id)
                .execute(&mut *tx)
                .await?;

                sqlx::query(
                    r#"
                    UPDATE campaign_recipients SET
                        status = 'sent',
                        sent_at = NOW(),
                        updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(email_log.recipient_id)
                .execute(&mut *tx)
                .await?;

                (1, 0, 0)
            }
            AttemptOutcome::Failed {
                error,
                bounced,
                bounce_reason,
            } => {
                sqlx::query(
                    r#"
                    UPDATE email_logs SET
                        status = 'failed',
                        error_message = $2,
                        bounce_reason = $3,
                        failed_at = NOW(),
                        updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(id)
                .bind(error)
                .bind(bounce_reason)
                .execute(&mut *tx)
                .await?;

                let recipient_status = if *bounced { "bounced" } else { "failed" };
                sqlx::query(
                    r#"
                    UPDATE campaign_recipients SET
                        status = $2,
                        failed_reason = $3,
                        updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(email_log.recipient_id)
                .bind(recipient_status)
                .bind(error)
                .execute(&mut *tx)
                .await?;

                (0, 1, if *bounced { 1 } else { 0 })
            }
        };

        let sent_count = campaign.sent_count + sent_inc;
        let failed_count = campaign.failed_count + failed_inc;
        let bounce_count = campaign.bounce_count + bounce_inc;
        let rate = bounce_rate(bounce_count, sent_count, failed_count);

        let finished = campaign.status == "running"
            && sent_count + failed_count >= campaign.total_recipients;

        let snapshot = sqlx::query_as::<_, CampaignSnapshot>(
            r#"
            UPDATE campaigns SET
                sent_count = $2,
                failed_count = $3,
                bounce_count = $4,
                bounce_rate = $5,
                status = CASE WHEN $6 THEN 'completed' ELSE status END,
                completed_at = CASE WHEN $6 THEN NOW() ELSE completed_at END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, status, total_recipients, sent_count, failed_count,
                      bounce_count, bounce_rate
            "#,
        )
        .bind(campaign.id)
        .bind(sent_count)
        .bind(failed_count)
        .bind(bounce_count)
        .bind(rate)
        .bind(finished)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(snapshot))
    }

    /// Release recipients whose queued log lost its job (a pause cancelled
    /// it): the log is removed and the recipient returns to pending so the
    /// next tick can claim it. In-flight sends keep their logs.
    pub async fn release_unclaimed(&self, campaign_id: Uuid) -> Result<u64, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let released: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            DELETE FROM email_logs el
            WHERE el.campaign_id = $1
              AND el.status = 'queued'
              AND NOT EXISTS (
                  SELECT 1 FROM jobs j
                  WHERE j.job_key = 'email-send:' || el.id
                    AND j.status IN ('pending', 'processing')
              )
            RETURNING el.recipient_id
            "#,
        )
        .bind(campaign_id)
        .fetch_all(&mut *tx)
        .await?;

        let recipient_ids: Vec<Uuid> = released.into_iter().map(|(id,)| id).collect();

        if !recipient_ids.is_empty() {
            sqlx::query(
                r#"
                UPDATE campaign_recipients SET status = 'pending', updated_at = NOW()
                WHERE id = ANY($1) AND status = 'queued'
                "#,
            )
            .bind(&recipient_ids)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(recipient_ids.len() as u64)
    }

    /// Count sent logs for an account on a UTC date (quota reconciliation)
    pub async fn count_sent_on_date(
        &self,
        smtp_account_id: Uuid,
        date: chrono::NaiveDate,
    ) -> Result<i64, sqlx::Error> {
        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM email_logs
            WHERE smtp_account_id = $1
              AND status = 'sent'
              AND sent_at >= $2::date
              AND sent_at < ($2::date + INTERVAL '1 day')
            "#,
        )
        .bind(smtp_account_id)
        .bind(date)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.0)
    }
}

fn snapshot_of(campaign: &Campaign) -> CampaignSnapshot {
    CampaignSnapshot {
        id: campaign.id,
        status: campaign.status.clone(),
        total_recipients: campaign.total_recipients,
        sent_count: campaign.sent_count,
        failed_count: campaign.failed_count,
        bounce_count: campaign.bounce_count,
        bounce_rate: campaign.bounce_rate,
    }
}
