//! Campaign service
//!
//! Lifecycle commands over compare-and-set status transitions, so racing
//! operations resolve deterministically, plus the campaign queries.

use cadence_common::config::SendingConfig;
use cadence_common::types::{CampaignId, UserId};
use cadence_common::{Error, Result};
use cadence_storage::db::DatabasePool;
use cadence_storage::models::{
    Campaign, CampaignRecipient, CampaignSettings, CampaignStatus, CreateCampaign, EmailLog,
    EmailLogStatus, NewRecipient, RecipientStatus, QUEUE_EMAIL_SEND,
};
use cadence_storage::repository::{
    CampaignRepository, EmailLogRepository, JobRepository, RecipientRepository,
    SmtpAccountRepository, TemplateRepository,
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::scheduler::CampaignScheduler;
use crate::service::ingest::{self, IngestSummary, RecipientInput};
use crate::smtp::{PoolMetrics, SmtpPool};

/// Create command as the caller provides it
#[derive(Debug, Clone)]
pub struct CreateCampaignCommand {
    pub name: String,
    pub template_id: Uuid,
    pub smtp_account_ids: Vec<Uuid>,
    pub recipients: Vec<RecipientInput>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub settings: Option<CampaignSettings>,
}

/// Aggregated campaign statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct CampaignStats {
    pub campaign_id: CampaignId,
    pub status: String,
    pub total_recipients: i32,
    pub sent_count: i32,
    pub failed_count: i32,
    pub bounce_count: i32,
    pub bounce_rate: f64,
    pub pending: i64,
    pub queued: i64,
    pub progress_percentage: f64,
}

/// Campaign service
pub struct CampaignService {
    campaigns: CampaignRepository,
    recipients: RecipientRepository,
    email_logs: EmailLogRepository,
    accounts: SmtpAccountRepository,
    templates: TemplateRepository,
    jobs: JobRepository,
    scheduler: Arc<CampaignScheduler>,
    pool: Arc<SmtpPool>,
    defaults: SendingConfig,
}

impl CampaignService {
    pub fn new(
        db_pool: &DatabasePool,
        scheduler: Arc<CampaignScheduler>,
        pool: Arc<SmtpPool>,
        defaults: SendingConfig,
    ) -> Self {
        let pg = db_pool.pool().clone();
        Self {
            campaigns: CampaignRepository::new(pg.clone()),
            recipients: RecipientRepository::new(pg.clone()),
            email_logs: EmailLogRepository::new(pg.clone()),
            accounts: SmtpAccountRepository::new(pg.clone()),
            templates: TemplateRepository::new(pg.clone()),
            jobs: JobRepository::new(pg),
            scheduler,
            pool,
            defaults,
        }
    }

    fn default_settings(&self) -> CampaignSettings {
        CampaignSettings {
            delay_between_emails: None,
            batch_size_min: self.defaults.batch_size_min,
            batch_size_max: self.defaults.batch_size_max,
            batch_delay_secs: self.defaults.batch_break_duration,
            max_retries_per_email: self.defaults.max_retries_per_email,
        }
    }

    /// Create a campaign with its recipients atomically. A future
    /// `scheduled_at` creates it scheduled; a past or present one starts
    /// it immediately; none leaves it a draft.
    pub async fn create(
        &self,
        user_id: UserId,
        cmd: CreateCampaignCommand,
    ) -> Result<(Campaign, IngestSummary)> {
        if cmd.name.trim().is_empty() {
            return Err(Error::Validation("Campaign name is required".to_string()));
        }
        if cmd.smtp_account_ids.is_empty() {
            return Err(Error::Validation(
                "At least one SMTP account is required".to_string(),
            ));
        }

        let template = self
            .templates
            .get_by_user(user_id, cmd.template_id)
            .await
            .map_err(|e| Error::Database(e.to_string()))?
            .ok_or_else(|| Error::Validation("Template not found".to_string()))?;
        if !template.active {
            return Err(Error::Validation("Template is not active".to_string()));
        }

        let owned_active = self
            .accounts
            .count_active_owned(user_id, &cmd.smtp_account_ids)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        if owned_active != cmd.smtp_account_ids.len() as i64 {
            return Err(Error::Validation(
                "Every SMTP account must exist, belong to you and be active".to_string(),
            ));
        }

        let (recipients, summary) = ingest::prepare_recipients(cmd.recipients);

        let now = Utc::now();
        let status = match cmd.scheduled_at {
            Some(at) if at > now => CampaignStatus::Scheduled,
            Some(_) => CampaignStatus::Running,
            None => CampaignStatus::Draft,
        };

        if status == CampaignStatus::Running && recipients.is_empty() {
            return Err(Error::Precondition(
                "Campaign has no valid recipients".to_string(),
            ));
        }

        let campaign = self
            .campaigns
            .create(CreateCampaign {
                user_id,
                name: cmd.name,
                template_id: cmd.template_id,
                smtp_account_ids: cmd.smtp_account_ids,
                recipients,
                status,
                scheduled_at: cmd.scheduled_at,
                settings: cmd.settings.unwrap_or_else(|| self.default_settings()),
            })
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        info!(
            campaign_id = %campaign.id,
            status = %campaign.status,
            recipients = campaign.total_recipients,
            "Campaign created"
        );

        if status == CampaignStatus::Running {
            self.scheduler.enqueue_tick(campaign.id).await?;
        }

        Ok((campaign, summary))
    }

    /// Start a draft, scheduled or paused campaign
    pub async fn start(&self, user_id: UserId, id: CampaignId) -> Result<Campaign> {
        let campaign = self.get(user_id, id).await?;

        // idempotent: starting a running campaign is a no-op
        if campaign.status() == Some(CampaignStatus::Running) {
            return Ok(campaign);
        }

        if campaign.total_recipients == 0 {
            return Err(Error::Precondition(
                "Campaign has no recipients".to_string(),
            ));
        }

        let updated = self
            .campaigns
            .transition(
                id,
                &[
                    CampaignStatus::Draft,
                    CampaignStatus::Scheduled,
                    CampaignStatus::Paused,
                ],
                CampaignStatus::Running,
            )
            .await
            .map_err(|e| Error::Database(e.to_string()))?
            .ok_or_else(|| {
                Error::Precondition(format!("Cannot start campaign in status {}", campaign.status))
            })?;

        self.email_logs
            .release_unclaimed(id)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        self.scheduler.enqueue_tick(id).await?;

        info!(campaign_id = %id, "Campaign started");
        Ok(updated)
    }

    /// Pause a running campaign; pending sends are cancelled, in-flight
    /// ones finish.
    pub async fn pause(&self, user_id: UserId, id: CampaignId) -> Result<Campaign> {
        let campaign = self.get(user_id, id).await?;

        // idempotent: pausing a paused campaign is a no-op
        if campaign.status() == Some(CampaignStatus::Paused) {
            return Ok(campaign);
        }

        let updated = self
            .campaigns
            .transition(id, &[CampaignStatus::Running], CampaignStatus::Paused)
            .await
            .map_err(|e| Error::Database(e.to_string()))?
            .ok_or_else(|| {
                Error::Precondition(format!("Cannot pause campaign in status {}", campaign.status))
            })?;

        let cancelled = self
            .jobs
            .cancel_by_campaign(id, Some(QUEUE_EMAIL_SEND))
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        info!(campaign_id = %id, cancelled, "Campaign paused");
        Ok(updated)
    }

    /// Resume a paused campaign: unclaimed queued recipients return to
    /// pending and a fresh tick re-schedules them.
    pub async fn resume(&self, user_id: UserId, id: CampaignId) -> Result<Campaign> {
        let campaign = self.get(user_id, id).await?;

        let updated = self
            .campaigns
            .transition(id, &[CampaignStatus::Paused], CampaignStatus::Running)
            .await
            .map_err(|e| Error::Database(e.to_string()))?
            .ok_or_else(|| {
                Error::Precondition(format!(
                    "Cannot resume campaign in status {}",
                    campaign.status
                ))
            })?;

        let released = self
            .email_logs
            .release_unclaimed(id)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        self.scheduler.enqueue_tick(id).await?;

        info!(campaign_id = %id, released, "Campaign resumed");
        Ok(updated)
    }

    /// Stop a campaign for good
    pub async fn stop(&self, user_id: UserId, id: CampaignId) -> Result<Campaign> {
        let campaign = self.get(user_id, id).await?;

        let updated = self
            .campaigns
            .transition(
                id,
                &[
                    CampaignStatus::Running,
                    CampaignStatus::Paused,
                    CampaignStatus::Scheduled,
                ],
                CampaignStatus::Cancelled,
            )
            .await
            .map_err(|e| Error::Database(e.to_string()))?
            .ok_or_else(|| {
                Error::Precondition(format!("Cannot stop campaign in status {}", campaign.status))
            })?;

        let cancelled = self
            .jobs
            .cancel_by_campaign(id, None)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        info!(campaign_id = %id, cancelled, "Campaign stopped");
        Ok(updated)
    }

    /// Restart a completed, failed or paused campaign from scratch:
    /// recipients reset to pending, prior logs removed, counters zeroed.
    pub async fn restart(&self, user_id: UserId, id: CampaignId) -> Result<Campaign> {
        let campaign = self.get(user_id, id).await?;

        let updated = self
            .campaigns
            .restart_reset(id)
            .await
            .map_err(|e| Error::Database(e.to_string()))?
            .ok_or_else(|| {
                Error::Precondition(format!(
                    "Cannot restart campaign in status {}",
                    campaign.status
                ))
            })?;

        self.scheduler.enqueue_tick(id).await?;

        info!(campaign_id = %id, "Campaign restarted");
        Ok(updated)
    }

    /// Deep-copy a campaign into a fresh draft with pending recipients
    pub async fn duplicate(
        &self,
        user_id: UserId,
        id: CampaignId,
        new_name: String,
    ) -> Result<Campaign> {
        if new_name.trim().is_empty() {
            return Err(Error::Validation("Campaign name is required".to_string()));
        }

        let source = self.get(user_id, id).await?;
        let account_ids = self
            .campaigns
            .account_ids(id)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        let source_recipients = self
            .recipients
            .list_all_by_campaign(id)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        let recipients = source_recipients
            .into_iter()
            .map(|r| NewRecipient {
                email: r.email,
                first_name: r.first_name,
                last_name: r.last_name,
                variables: r.variables,
            })
            .collect();

        let copy = self
            .campaigns
            .create(CreateCampaign {
                user_id,
                name: new_name,
                template_id: source.template_id,
                smtp_account_ids: account_ids,
                recipients,
                status: CampaignStatus::Draft,
                scheduled_at: None,
                settings: source.settings(),
            })
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        info!(source_id = %id, campaign_id = %copy.id, "Campaign duplicated");
        Ok(copy)
    }

    /// Delete a campaign; forbidden while it is running
    pub async fn delete(&self, user_id: UserId, id: CampaignId) -> Result<()> {
        let campaign = self.get(user_id, id).await?;
        if campaign.status() == Some(CampaignStatus::Running) {
            return Err(Error::Precondition(
                "Cannot delete a running campaign".to_string(),
            ));
        }

        self.jobs
            .cancel_by_campaign(id, None)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        let deleted = self
            .campaigns
            .delete(id, user_id)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        if !deleted {
            return Err(Error::NotFound("Campaign not found".to_string()));
        }

        info!(campaign_id = %id, "Campaign deleted");
        Ok(())
    }

    /// Get an owned campaign
    pub async fn get(&self, user_id: UserId, id: CampaignId) -> Result<Campaign> {
        self.campaigns
            .get_by_user(user_id, id)
            .await
            .map_err(|e| Error::Database(e.to_string()))?
            .ok_or_else(|| Error::NotFound("Campaign not found".to_string()))
    }

    /// List campaigns for a user
    pub async fn list(
        &self,
        user_id: UserId,
        status: Option<CampaignStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Campaign>> {
        self.campaigns
            .list_by_user(user_id, status, limit, offset)
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    /// Aggregated statistics for a campaign
    pub async fn stats(&self, user_id: UserId, id: CampaignId) -> Result<CampaignStats> {
        let campaign = self.get(user_id, id).await?;
        let counts = self
            .recipients
            .status_counts(id)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(CampaignStats {
            campaign_id: id,
            status: campaign.status.clone(),
            total_recipients: campaign.total_recipients,
            sent_count: campaign.sent_count,
            failed_count: campaign.failed_count,
            bounce_count: campaign.bounce_count,
            bounce_rate: campaign.bounce_rate,
            pending: counts.pending,
            queued: counts.queued,
            progress_percentage: campaign.progress_percentage(),
        })
    }

    /// Paginated recipient list for a campaign, filterable by status
    pub async fn recipients(
        &self,
        user_id: UserId,
        id: CampaignId,
        status: Option<RecipientStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<CampaignRecipient>> {
        self.get(user_id, id).await?;
        self.recipients
            .list_by_campaign(id, status, limit, offset)
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    /// Paginated attempt log for a campaign, filterable by status
    pub async fn attempt_logs(
        &self,
        user_id: UserId,
        id: CampaignId,
        status: Option<EmailLogStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<EmailLog>> {
        self.get(user_id, id).await?;
        self.email_logs
            .list_by_campaign(id, status, limit, offset)
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    /// SMTP pool metrics per account
    pub fn pool_metrics(&self) -> HashMap<Uuid, PoolMetrics> {
        self.pool.metrics_all()
    }

    /// Recipient variable maps of a campaign keyed by email; used by
    /// exports and the attempt log detail view
    pub async fn recipient_variables(
        &self,
        user_id: UserId,
        id: CampaignId,
    ) -> Result<HashMap<String, Value>> {
        self.get(user_id, id).await?;
        let recipients = self
            .recipients
            .list_all_by_campaign(id)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(recipients
            .into_iter()
            .map(|r| (r.email, r.variables))
            .collect())
    }
}
