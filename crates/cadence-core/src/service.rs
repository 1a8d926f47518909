//! Command and query services
//!
//! The transport-neutral surface the engine exposes. A surrounding HTTP
//! layer maps onto these one-to-one; none of them know anything about
//! requests or sessions.

pub mod auth;
pub mod campaigns;
pub mod ingest;
pub mod smtp_accounts;
pub mod templates;

pub use auth::{AuthService, AuthToken};
pub use campaigns::{CampaignService, CampaignStats, CreateCampaignCommand};
pub use ingest::{IngestSummary, RecipientInput};
pub use smtp_accounts::{CreateSmtpAccountCommand, SmtpAccountService};
pub use templates::TemplateService;
