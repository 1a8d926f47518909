//! Repository layer for data access

pub mod campaigns;
pub mod daily_quotas;
pub mod email_logs;
pub mod jobs;
pub mod recipients;
pub mod smtp_accounts;
pub mod templates;
pub mod users;

pub use campaigns::CampaignRepository;
pub use daily_quotas::DailyQuotaRepository;
pub use email_logs::{EmailLogRepository, QueuedSendPlan, SendContext};
pub use jobs::JobRepository;
pub use recipients::RecipientRepository;
pub use smtp_accounts::SmtpAccountRepository;
pub use templates::TemplateRepository;
pub use users::UserRepository;
