//! Campaign scheduler
//!
//! Consumes `campaign-tick` jobs: claims the unclaimed recipients of a
//! running campaign, computes the pacing plan and materializes queued
//! email logs with their delayed send jobs. A 60-second calendar sweep
//! promotes scheduled campaigns whose start instant has elapsed.

use anyhow::Result;
use cadence_common::types::CampaignId;
use cadence_storage::db::DatabasePool;
use cadence_storage::models::{
    tick_job_key, Campaign, CampaignStatus, JobPayload, QUEUE_CAMPAIGN_TICK,
};
use cadence_storage::repository::{
    CampaignRepository, EmailLogRepository, JobRepository, RecipientRepository,
    SmtpAccountRepository,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::pacing::{self, AccountPacing, ClaimedRecipient};

/// Calendar sweep period
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Attempt budget for tick jobs
const TICK_MAX_ATTEMPTS: i32 = 5;

/// Campaign scheduler
pub struct CampaignScheduler {
    campaigns: CampaignRepository,
    recipients: RecipientRepository,
    email_logs: EmailLogRepository,
    accounts: SmtpAccountRepository,
    jobs: JobRepository,
}

impl CampaignScheduler {
    /// Create a new scheduler
    pub fn new(db_pool: &DatabasePool) -> Self {
        let pool = db_pool.pool().clone();
        Self {
            campaigns: CampaignRepository::new(pool.clone()),
            recipients: RecipientRepository::new(pool.clone()),
            email_logs: EmailLogRepository::new(pool.clone()),
            accounts: SmtpAccountRepository::new(pool.clone()),
            jobs: JobRepository::new(pool),
        }
    }

    /// Enqueue a tick for a campaign. A live tick for the same campaign
    /// makes this a no-op.
    pub async fn enqueue_tick(&self, campaign_id: CampaignId) -> Result<()> {
        self.jobs
            .enqueue(
                QUEUE_CAMPAIGN_TICK,
                &tick_job_key(campaign_id),
                &JobPayload::CampaignTick { campaign_id },
                Some(campaign_id),
                0,
                TICK_MAX_ATTEMPTS,
            )
            .await?;
        Ok(())
    }

    /// Advance a campaign: claim its unclaimed recipients and schedule
    /// their sends with precomputed delays.
    pub async fn handle_tick(&self, campaign_id: CampaignId) -> Result<()> {
        let Some(campaign) = self.campaigns.get(campaign_id).await? else {
            debug!(%campaign_id, "Tick for missing campaign, ignoring");
            return Ok(());
        };

        if campaign.status() != Some(CampaignStatus::Running) {
            debug!(%campaign_id, status = %campaign.status, "Tick for non-running campaign, ignoring");
            return Ok(());
        }

        let accounts = self.accounts.list_active_by_campaign(campaign_id).await?;
        if accounts.is_empty() {
            warn!(%campaign_id, "No active SMTP account, failing campaign");
            self.campaigns
                .transition(campaign_id, &[CampaignStatus::Running], CampaignStatus::Failed)
                .await?;
            return Ok(());
        }

        let claimed = self
            .recipients
            .claim_next_batch(campaign_id, campaign.total_recipients.max(1) as i64)
            .await?;

        if claimed.is_empty() {
            // nothing left to schedule; complete the campaign once every
            // attempt has settled
            if let Some(current) = self.campaigns.get(campaign_id).await? {
                if current.status() == Some(CampaignStatus::Running)
                    && current.attempts_completed() >= current.total_recipients
                {
                    if self
                        .campaigns
                        .transition(
                            campaign_id,
                            &[CampaignStatus::Running],
                            CampaignStatus::Completed,
                        )
                        .await?
                        .is_some()
                    {
                        info!(%campaign_id, "Campaign completed");
                    }
                }
            }
            return Ok(());
        }

        let settings = campaign.settings();
        let pacing_accounts: Vec<AccountPacing> = accounts
            .iter()
            .map(|a| AccountPacing {
                id: a.id,
                min_delay_secs: a.min_delay_secs.max(0) as u32,
                max_delay_secs: a.max_delay_secs.max(0) as u32,
            })
            .collect();
        let claimed_refs: Vec<ClaimedRecipient> = claimed
            .iter()
            .map(|r| ClaimedRecipient {
                id: r.id,
                seq: r.seq,
            })
            .collect();

        let plan = pacing::build_plan(
            &claimed_refs,
            &pacing_accounts,
            &settings,
            &mut rand::thread_rng(),
        );

        let scheduled = self
            .email_logs
            .create_queued_batch(campaign_id, settings.max_retries_per_email, &plan)
            .await?;

        info!(
            %campaign_id,
            scheduled,
            accounts = accounts.len(),
            "Tick scheduled sends"
        );

        Ok(())
    }

    /// One calendar sweep pass: promote due scheduled campaigns, fail the
    /// invalid ones.
    pub async fn sweep_once(&self) -> Result<usize> {
        let due = self.campaigns.scheduled_due().await?;
        let mut promoted = 0;

        for campaign in due {
            if self.validate_startable(&campaign).await? {
                if self
                    .campaigns
                    .transition(
                        campaign.id,
                        &[CampaignStatus::Scheduled],
                        CampaignStatus::Running,
                    )
                    .await?
                    .is_some()
                {
                    info!(campaign_id = %campaign.id, "Promoting scheduled campaign");
                    self.enqueue_tick(campaign.id).await?;
                    promoted += 1;
                }
            } else {
                warn!(campaign_id = %campaign.id, "Scheduled campaign is not startable, failing it");
                self.campaigns
                    .transition(
                        campaign.id,
                        &[CampaignStatus::Scheduled],
                        CampaignStatus::Failed,
                    )
                    .await?;
            }
        }

        Ok(promoted)
    }

    async fn validate_startable(&self, campaign: &Campaign) -> Result<bool> {
        if self.recipients.count_by_campaign(campaign.id).await? == 0 {
            return Ok(false);
        }
        let accounts = self.accounts.list_active_by_campaign(campaign.id).await?;
        Ok(!accounts.is_empty())
    }

    /// Periodic calendar sweep task
    pub fn spawn_calendar_sweep(self: &Arc<Self>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            info!("Calendar sweep started");
            loop {
                ticker.tick().await;
                if let Err(e) = scheduler.sweep_once().await {
                    warn!("Calendar sweep failed: {}", e);
                }
            }
        })
    }
}
