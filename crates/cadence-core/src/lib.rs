//! Cadence Core - Campaign execution engine
//!
//! This crate implements the engine proper: credential encryption,
//! template rendering, the pooled SMTP transport layer, the durable job
//! queue workers, the campaign scheduler and the sender, plus the
//! transport-neutral command/query services an API layer maps onto.

pub mod bounce;
pub mod crypto;
pub mod office_hours;
pub mod pacing;
pub mod queue;
pub mod render;
pub mod scheduler;
pub mod sender;
pub mod service;
pub mod smtp;

pub use bounce::BounceClass;
pub use crypto::SecretCipher;
pub use render::{Renderer, RenderedEmail};
pub use scheduler::CampaignScheduler;
pub use sender::EmailSender;
pub use smtp::{PoolMetrics, SmtpPool, TransportSpec};
