//! Email sender
//!
//! Executes one `email-send` job to its terminal per-attempt outcome.
//! The email log row is the idempotency key: a redelivered job whose log
//! has already settled is a no-op. Daily quota is consumed speculatively
//! and refunded on every path that does not end in transport acceptance.

use anyhow::Result;
use cadence_common::types::EmailLogId;
use cadence_storage::db::DatabasePool;
use cadence_storage::models::{
    AttemptOutcome, CampaignSnapshot, CampaignStatus, EmailLogStatus, QUEUE_EMAIL_SEND,
};
use cadence_storage::repository::{
    CampaignRepository, DailyQuotaRepository, EmailLogRepository, JobRepository, SendContext,
    SmtpAccountRepository,
};
use chrono::{DateTime, Utc};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::{Address, AsyncTransport, Message};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bounce::{self, BounceClass};
use crate::crypto::SecretCipher;
use crate::office_hours::OfficeHours;
use crate::render::Renderer;
use crate::smtp::{SmtpPool, TransportSpec, CONNECT_TIMEOUT, SOCKET_TIMEOUT};

const QUOTA_EXCEEDED_MESSAGE: &str = "Daily sending limit exceeded";

/// How an attempt left the sender
#[derive(Debug, Clone)]
pub enum SendDisposition {
    /// Terminal for this job: sent, failed for good, or gated out
    Done,
    /// Outside office hours; rerun the same job at this instant
    Deferred(DateTime<Utc>),
    /// Transient failure; the queue schedules the retry with backoff
    RetryTransient(String),
}

/// Email sender
pub struct EmailSender {
    email_logs: EmailLogRepository,
    campaigns: CampaignRepository,
    accounts: SmtpAccountRepository,
    quotas: DailyQuotaRepository,
    jobs: JobRepository,
    renderer: Renderer,
    cipher: SecretCipher,
    pool: Arc<SmtpPool>,
    office_hours: OfficeHours,
    max_bounce_rate: f64,
}

impl EmailSender {
    pub fn new(
        db_pool: &DatabasePool,
        renderer: Renderer,
        cipher: SecretCipher,
        pool: Arc<SmtpPool>,
        office_hours: OfficeHours,
        max_bounce_rate: f64,
    ) -> Self {
        let pg = db_pool.pool().clone();
        Self {
            email_logs: EmailLogRepository::new(pg.clone()),
            campaigns: CampaignRepository::new(pg.clone()),
            accounts: SmtpAccountRepository::new(pg.clone()),
            quotas: DailyQuotaRepository::new(pg.clone()),
            jobs: JobRepository::new(pg),
            renderer,
            cipher,
            pool,
            office_hours,
            max_bounce_rate,
        }
    }

    /// Execute one delivery attempt. `attempts` is the count of prior
    /// tries for this job; `max_attempts` its budget.
    pub async fn execute(
        &self,
        email_log_id: EmailLogId,
        attempts: i32,
        max_attempts: i32,
    ) -> Result<SendDisposition> {
        let Some(ctx) = self.email_logs.load_send_context(email_log_id).await? else {
            debug!(%email_log_id, "Stale send job, entities are gone");
            return Ok(SendDisposition::Done);
        };

        match ctx.email_log.status() {
            Some(EmailLogStatus::Pending) | Some(EmailLogStatus::Queued) => {}
            _ => {
                debug!(%email_log_id, status = %ctx.email_log.status, "Attempt already settled");
                return Ok(SendDisposition::Done);
            }
        }

        if ctx.campaign.status() != Some(CampaignStatus::Running) {
            debug!(
                %email_log_id,
                campaign_id = %ctx.campaign.id,
                status = %ctx.campaign.status,
                "Campaign is not running, dropping send"
            );
            return Ok(SendDisposition::Done);
        }

        let now = Utc::now();
        if !self.office_hours.contains(now) {
            return Ok(SendDisposition::Deferred(self.office_hours.next_open(now)));
        }

        // quota is consumed against the UTC date of the actual attempt
        let today = now.date_naive();
        let decision = self
            .quotas
            .try_consume(ctx.account.id, today, ctx.account.daily_limit)
            .await?;

        if !decision.granted {
            info!(
                %email_log_id,
                account_id = %ctx.account.id,
                "Daily quota exhausted"
            );
            let snapshot = self
                .email_logs
                .record_attempt_outcome(
                    email_log_id,
                    AttemptOutcome::Failed {
                        error: QUOTA_EXCEEDED_MESSAGE.to_string(),
                        bounced: false,
                        bounce_reason: None,
                    },
                )
                .await?;
            self.after_outcome(snapshot).await?;
            return Ok(SendDisposition::Done);
        }

        let rendered = self.renderer.render(&ctx.template, &ctx.recipient);
        self.email_logs
            .set_subject(email_log_id, &rendered.subject)
            .await?;

        let password = match self.cipher.decrypt(&ctx.account.password_enc) {
            Ok(password) => password,
            Err(e) => {
                self.quotas.refund(ctx.account.id, today).await?;
                return Err(e.into());
            }
        };
        let spec = TransportSpec::from_account(&ctx.account, password);

        let mut transport = match self.pool.acquire(&spec).await {
            Ok(transport) => transport,
            Err(e) => {
                // never reached the transport, give the unit back
                self.quotas.refund(ctx.account.id, today).await?;
                return Ok(SendDisposition::RetryTransient(e.to_string()));
            }
        };

        let message_id = format!("<{}.{}@cadence>", Uuid::new_v4(), now.timestamp());
        let email = match self.build_message(&ctx, &rendered.subject, rendered.html_body.clone()) {
            Ok(email) => email,
            Err(reason) => {
                self.quotas.refund(ctx.account.id, today).await?;
                let snapshot = self
                    .email_logs
                    .record_attempt_outcome(
                        email_log_id,
                        AttemptOutcome::Failed {
                            error: reason,
                            bounced: false,
                            bounce_reason: None,
                        },
                    )
                    .await?;
                self.after_outcome(snapshot).await?;
                return Ok(SendDisposition::Done);
            }
        };

        let send_result =
            tokio::time::timeout(CONNECT_TIMEOUT + SOCKET_TIMEOUT, transport.transport().send(email))
                .await;

        if matches!(send_result, Ok(Ok(_))) {
            transport.mark_message_sent();
        }
        // release the transport before any further store work
        drop(transport);

        match send_result {
            Ok(Ok(_response)) => {
                info!(
                    %email_log_id,
                    campaign_id = %ctx.campaign.id,
                    to = %ctx.recipient.email,
                    "Email sent"
                );

                let snapshot = self
                    .email_logs
                    .record_attempt_outcome(email_log_id, AttemptOutcome::Sent { message_id })
                    .await?;
                self.accounts.touch_last_used(ctx.account.id).await?;
                self.after_outcome(snapshot).await?;
                Ok(SendDisposition::Done)
            }
            Ok(Err(e)) => {
                self.quotas.refund(ctx.account.id, today).await?;
                let error = e.to_string();
                self.handle_transport_failure(email_log_id, &ctx, error, attempts, max_attempts)
                    .await
            }
            Err(_) => {
                self.quotas.refund(ctx.account.id, today).await?;
                warn!(%email_log_id, "SMTP send timed out");
                Ok(SendDisposition::RetryTransient(
                    "SMTP send timed out".to_string(),
                ))
            }
        }
    }

    fn build_message(
        &self,
        ctx: &SendContext,
        subject: &str,
        html_body: String,
    ) -> std::result::Result<Message, String> {
        let from_address = ctx
            .account
            .from_email
            .parse::<Address>()
            .map_err(|e| format!("Invalid from address: {}", e))?;
        let from = Mailbox::new(Some(ctx.account.from_name.clone()), from_address);

        let to_address = ctx
            .recipient
            .email
            .parse::<Address>()
            .map_err(|e| format!("Invalid to address: {}", e))?;
        let to = Mailbox::new(None, to_address);

        Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html_body)
            .map_err(|e| format!("Failed to build email: {}", e))
    }

    async fn handle_transport_failure(
        &self,
        email_log_id: EmailLogId,
        ctx: &SendContext,
        error: String,
        attempts: i32,
        max_attempts: i32,
    ) -> Result<SendDisposition> {
        match bounce::classify(&error) {
            BounceClass::Hard => {
                warn!(
                    %email_log_id,
                    to = %ctx.recipient.email,
                    "Hard bounce: {}", error
                );
                let snapshot = self
                    .email_logs
                    .record_attempt_outcome(
                        email_log_id,
                        AttemptOutcome::Failed {
                            error: error.clone(),
                            bounced: true,
                            bounce_reason: Some(error),
                        },
                    )
                    .await?;
                self.after_outcome(snapshot).await?;
                Ok(SendDisposition::Done)
            }
            BounceClass::Soft | BounceClass::Unknown => {
                if attempts + 1 >= max_attempts {
                    warn!(
                        %email_log_id,
                        attempts = attempts + 1,
                        "Transient failure exhausted retries: {}", error
                    );
                    let snapshot = self
                        .email_logs
                        .record_attempt_outcome(
                            email_log_id,
                            AttemptOutcome::Failed {
                                error,
                                bounced: false,
                                bounce_reason: None,
                            },
                        )
                        .await?;
                    self.after_outcome(snapshot).await?;
                    Ok(SendDisposition::Done)
                } else {
                    debug!(%email_log_id, "Transient failure, will retry: {}", error);
                    Ok(SendDisposition::RetryTransient(error))
                }
            }
        }
    }

    /// Auto-safety: after every outcome, a running campaign whose bounce
    /// rate exceeds the limit with at least 10 completed attempts is
    /// paused and its pending sends cancelled.
    async fn after_outcome(&self, snapshot: Option<CampaignSnapshot>) -> Result<()> {
        let Some(snapshot) = snapshot else {
            return Ok(());
        };

        if snapshot.status() == Some(CampaignStatus::Running)
            && snapshot.attempts_completed() >= 10
            && snapshot.bounce_rate > self.max_bounce_rate
        {
            let paused = self
                .campaigns
                .transition(
                    snapshot.id,
                    &[CampaignStatus::Running],
                    CampaignStatus::Paused,
                )
                .await?;

            if paused.is_some() {
                let cancelled = self
                    .jobs
                    .cancel_by_campaign(snapshot.id, Some(QUEUE_EMAIL_SEND))
                    .await?;
                warn!(
                    campaign_id = %snapshot.id,
                    bounce_rate = snapshot.bounce_rate,
                    cancelled,
                    "Bounce rate exceeded limit, campaign auto-paused"
                );
            }
        }

        Ok(())
    }
}
