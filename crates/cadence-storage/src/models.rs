//! Database models

use cadence_common::types::{
    CampaignId, EmailLogId, JobId, RecipientId, SmtpAccountId, TemplateId, UserId,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// User model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Create user input
#[derive(Debug, Clone)]
pub struct CreateUser {
    pub email: String,
    pub password_hash: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// SMTP account model.
///
/// The password is stored encrypted; the plaintext only ever exists
/// transiently in memory on the send path.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SmtpAccount {
    pub id: SmtpAccountId,
    pub user_id: UserId,
    pub name: String,
    pub host: String,
    pub port: i32,
    pub secure: bool,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_enc: String,
    pub from_name: String,
    pub from_email: String,
    pub daily_limit: i32,
    pub min_delay_secs: i32,
    pub max_delay_secs: i32,
    pub active: bool,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SmtpAccount {
    /// Formatted sender mailbox, `"Name" <email>`
    pub fn from_mailbox(&self) -> String {
        format!("\"{}\" <{}>", self.from_name, self.from_email)
    }
}

/// Create SMTP account input (password already encrypted)
#[derive(Debug, Clone)]
pub struct CreateSmtpAccount {
    pub user_id: UserId,
    pub name: String,
    pub host: String,
    pub port: i32,
    pub secure: bool,
    pub username: String,
    pub password_enc: String,
    pub from_name: String,
    pub from_email: String,
    pub daily_limit: i32,
    pub min_delay_secs: i32,
    pub max_delay_secs: i32,
}

/// Template model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Template {
    pub id: TemplateId,
    pub user_id: UserId,
    pub name: String,
    pub subject: String,
    pub body: String,
    /// Variable names extracted from subject and body, recomputed on write
    pub variables: serde_json::Value,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Template {
    /// Get the declared variable list as a vector
    pub fn variables_vec(&self) -> Vec<String> {
        serde_json::from_value(self.variables.clone()).unwrap_or_default()
    }
}

/// Create template input
#[derive(Debug, Clone)]
pub struct CreateTemplate {
    pub user_id: UserId,
    pub name: String,
    pub subject: String,
    pub body: String,
    pub variables: Vec<String>,
}

/// Update template input
#[derive(Debug, Clone, Default)]
pub struct UpdateTemplate {
    pub name: Option<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub variables: Option<Vec<String>>,
    pub active: Option<bool>,
}

/// Campaign status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl CampaignStatus {
    /// Terminal statuses admit no further transitions except restart
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CampaignStatus::Completed | CampaignStatus::Failed | CampaignStatus::Cancelled
        )
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Scheduled => "scheduled",
            CampaignStatus::Running => "running",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Failed => "failed",
            CampaignStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for CampaignStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(CampaignStatus::Draft),
            "scheduled" => Ok(CampaignStatus::Scheduled),
            "running" => Ok(CampaignStatus::Running),
            "paused" => Ok(CampaignStatus::Paused),
            "completed" => Ok(CampaignStatus::Completed),
            "failed" => Ok(CampaignStatus::Failed),
            "cancelled" => Ok(CampaignStatus::Cancelled),
            other => Err(format!("unknown campaign status: {}", other)),
        }
    }
}

/// Pacing settings stored on the campaign
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignSettings {
    /// Fixed inter-message delay override; when absent the per-account
    /// min/max range is drawn per message
    #[serde(default)]
    pub delay_between_emails: Option<u32>,
    #[serde(default = "default_batch_size_min")]
    pub batch_size_min: u32,
    #[serde(default = "default_batch_size_max")]
    pub batch_size_max: u32,
    #[serde(default = "default_batch_delay")]
    pub batch_delay_secs: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries_per_email: i32,
}

fn default_batch_size_min() -> u32 {
    5
}

fn default_batch_size_max() -> u32 {
    10
}

fn default_batch_delay() -> u32 {
    300
}

fn default_max_retries() -> i32 {
    3
}

impl Default for CampaignSettings {
    fn default() -> Self {
        Self {
            delay_between_emails: None,
            batch_size_min: default_batch_size_min(),
            batch_size_max: default_batch_size_max(),
            batch_delay_secs: default_batch_delay(),
            max_retries_per_email: default_max_retries(),
        }
    }
}

/// Campaign model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub user_id: UserId,
    pub name: String,
    pub template_id: TemplateId,
    pub status: String,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub total_recipients: i32,
    pub sent_count: i32,
    pub failed_count: i32,
    pub bounce_count: i32,
    pub bounce_rate: f64,
    pub settings: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    /// Parsed status enum
    pub fn status(&self) -> Option<CampaignStatus> {
        self.status.parse().ok()
    }

    /// Parsed pacing settings
    pub fn settings(&self) -> CampaignSettings {
        serde_json::from_value(self.settings.clone()).unwrap_or_default()
    }

    /// Attempts that have reached a terminal per-recipient outcome
    pub fn attempts_completed(&self) -> i32 {
        self.sent_count + self.failed_count
    }

    /// Progress percentage over total recipients
    pub fn progress_percentage(&self) -> f64 {
        if self.total_recipients == 0 {
            return 0.0;
        }
        (self.attempts_completed() as f64 / self.total_recipients as f64) * 100.0
    }
}

/// Create campaign input (storage-level, recipients already normalized)
#[derive(Debug, Clone)]
pub struct CreateCampaign {
    pub user_id: UserId,
    pub name: String,
    pub template_id: TemplateId,
    pub smtp_account_ids: Vec<SmtpAccountId>,
    pub recipients: Vec<NewRecipient>,
    pub status: CampaignStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub settings: CampaignSettings,
}

/// Post-update view of a campaign returned from outcome recording
#[derive(Debug, Clone, FromRow)]
pub struct CampaignSnapshot {
    pub id: CampaignId,
    pub status: String,
    pub total_recipients: i32,
    pub sent_count: i32,
    pub failed_count: i32,
    pub bounce_count: i32,
    pub bounce_rate: f64,
}

impl CampaignSnapshot {
    pub fn status(&self) -> Option<CampaignStatus> {
        self.status.parse().ok()
    }

    pub fn attempts_completed(&self) -> i32 {
        self.sent_count + self.failed_count
    }

    pub fn is_complete(&self) -> bool {
        self.attempts_completed() >= self.total_recipients
    }
}

/// Recipient status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipientStatus {
    Pending,
    Queued,
    Sent,
    Failed,
    Bounced,
}

impl std::fmt::Display for RecipientStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RecipientStatus::Pending => "pending",
            RecipientStatus::Queued => "queued",
            RecipientStatus::Sent => "sent",
            RecipientStatus::Failed => "failed",
            RecipientStatus::Bounced => "bounced",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for RecipientStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RecipientStatus::Pending),
            "queued" => Ok(RecipientStatus::Queued),
            "sent" => Ok(RecipientStatus::Sent),
            "failed" => Ok(RecipientStatus::Failed),
            "bounced" => Ok(RecipientStatus::Bounced),
            other => Err(format!("unknown recipient status: {}", other)),
        }
    }
}

/// Campaign recipient model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CampaignRecipient {
    pub id: RecipientId,
    pub campaign_id: CampaignId,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// Opaque per-recipient variable map
    pub variables: serde_json::Value,
    pub status: String,
    /// Insertion-order sequence, stable across tick retries
    pub seq: i32,
    pub sent_at: Option<DateTime<Utc>>,
    pub failed_reason: Option<String>,
    pub smtp_account_id: Option<SmtpAccountId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CampaignRecipient {
    pub fn status(&self) -> Option<RecipientStatus> {
        self.status.parse().ok()
    }
}

/// Normalized recipient input
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecipient {
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub variables: serde_json::Value,
}

/// Email log status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailLogStatus {
    Pending,
    Queued,
    Sent,
    Failed,
}

impl EmailLogStatus {
    pub fn is_settled(&self) -> bool {
        matches!(self, EmailLogStatus::Sent | EmailLogStatus::Failed)
    }
}

impl std::fmt::Display for EmailLogStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EmailLogStatus::Pending => "pending",
            EmailLogStatus::Queued => "queued",
            EmailLogStatus::Sent => "sent",
            EmailLogStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for EmailLogStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EmailLogStatus::Pending),
            "queued" => Ok(EmailLogStatus::Queued),
            "sent" => Ok(EmailLogStatus::Sent),
            "failed" => Ok(EmailLogStatus::Failed),
            other => Err(format!("unknown email log status: {}", other)),
        }
    }
}

/// Per-attempt delivery record, the idempotency key for a send
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct EmailLog {
    pub id: EmailLogId,
    pub campaign_id: CampaignId,
    pub recipient_id: RecipientId,
    pub smtp_account_id: SmtpAccountId,
    pub status: String,
    pub subject: String,
    pub sent_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub message_id: Option<String>,
    pub bounce_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EmailLog {
    pub fn status(&self) -> Option<EmailLogStatus> {
        self.status.parse().ok()
    }
}

/// Terminal outcome of a delivery attempt
#[derive(Debug, Clone)]
pub enum AttemptOutcome {
    Sent {
        message_id: String,
    },
    Failed {
        error: String,
        bounced: bool,
        bounce_reason: Option<String>,
    },
}

/// Per (SMTP account, UTC date) counter of successful sends
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DailyQuota {
    pub id: uuid::Uuid,
    pub smtp_account_id: SmtpAccountId,
    pub quota_date: NaiveDate,
    pub sent_count: i32,
    pub updated_at: DateTime<Utc>,
}

/// Result of a quota consumption attempt
#[derive(Debug, Clone, Copy)]
pub struct QuotaDecision {
    pub granted: bool,
    pub remaining: i32,
}

/// Queue names
pub const QUEUE_CAMPAIGN_TICK: &str = "campaign-tick";
pub const QUEUE_EMAIL_SEND: &str = "email-send";

/// Idempotency key for a campaign tick job
pub fn tick_job_key(campaign_id: CampaignId) -> String {
    format!("campaign-tick:{}", campaign_id)
}

/// Idempotency key for an email send job
pub fn send_job_key(email_log_id: EmailLogId) -> String {
    format!("email-send:{}", email_log_id)
}

/// Job payload, stored as JSONB on the jobs table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobPayload {
    CampaignTick { campaign_id: CampaignId },
    EmailSend { email_log_id: EmailLogId },
}

/// Job queue model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub queue: String,
    pub job_key: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
    pub campaign_id: Option<CampaignId>,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Parse the payload into its typed form
    pub fn payload(&self) -> Option<JobPayload> {
        serde_json::from_value(self.payload.clone()).ok()
    }
}

/// Round a bounce rate to two decimals: `100 * bounces / max(1, attempts)`
pub fn bounce_rate(bounce_count: i32, sent_count: i32, failed_count: i32) -> f64 {
    let attempts = (sent_count + failed_count).max(1) as f64;
    let raw = 100.0 * bounce_count as f64 / attempts;
    (raw * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_campaign_status_roundtrip() {
        for s in [
            CampaignStatus::Draft,
            CampaignStatus::Scheduled,
            CampaignStatus::Running,
            CampaignStatus::Paused,
            CampaignStatus::Completed,
            CampaignStatus::Failed,
            CampaignStatus::Cancelled,
        ] {
            assert_eq!(s.to_string().parse::<CampaignStatus>().unwrap(), s);
        }
        assert!("bogus".parse::<CampaignStatus>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(CampaignStatus::Completed.is_terminal());
        assert!(CampaignStatus::Failed.is_terminal());
        assert!(CampaignStatus::Cancelled.is_terminal());
        assert!(!CampaignStatus::Paused.is_terminal());
        assert!(!CampaignStatus::Running.is_terminal());
    }

    #[test]
    fn test_bounce_rate_rounding() {
        assert_eq!(bounce_rate(0, 0, 0), 0.0);
        assert_eq!(bounce_rate(1, 1, 0), 100.0);
        assert_eq!(bounce_rate(1, 2, 1), 33.33);
        assert_eq!(bounce_rate(2, 4, 2), 33.33);
        // zero attempts guarded by max(1, ..)
        assert_eq!(bounce_rate(3, 0, 0), 300.0);
    }

    #[test]
    fn test_campaign_settings_defaults() {
        let settings: CampaignSettings = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(settings, CampaignSettings::default());
        assert_eq!(settings.batch_size_min, 5);
        assert_eq!(settings.max_retries_per_email, 3);
    }

    #[test]
    fn test_job_payload_roundtrip() {
        let id = uuid::Uuid::new_v4();
        let payload = JobPayload::EmailSend { email_log_id: id };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["type"], "email_send");
        match serde_json::from_value::<JobPayload>(value).unwrap() {
            JobPayload::EmailSend { email_log_id } => assert_eq!(email_log_id, id),
            _ => panic!("expected email_send payload"),
        }
    }

    #[test]
    fn test_job_keys() {
        let id = uuid::Uuid::new_v4();
        assert_eq!(tick_job_key(id), format!("campaign-tick:{}", id));
        assert_eq!(send_job_key(id), format!("email-send:{}", id));
    }
}
