//! Cadence - campaign engine entry point

use anyhow::Result;
use cadence_common::config::Config;
use cadence_core::office_hours::OfficeHours;
use cadence_core::queue::QueueWorkers;
use cadence_core::{CampaignScheduler, EmailSender, Renderer, SecretCipher, SmtpPool};
use cadence_storage::db::DatabasePool;
use cadence_storage::repository::JobRepository;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    info!("Starting Cadence campaign engine...");

    // Load configuration
    let config = Config::load()?;

    // Initialize database
    let db_pool = DatabasePool::new(&config.database).await?;
    db_pool.migrate().await?;

    // Credential cipher, loaded once from configuration
    let cipher = SecretCipher::new(&config.security.encryption_key)?;

    // SMTP transport pool
    let smtp_pool = SmtpPool::new(config.smtp_pool.clone());
    let reaper_handle = smtp_pool.spawn_reaper();

    // Scheduler and sender
    let scheduler = Arc::new(CampaignScheduler::new(&db_pool));
    let sweep_handle = scheduler.spawn_calendar_sweep();

    let renderer = Renderer::new(config.server.public_host.clone());
    let office_hours = OfficeHours::new(
        config.sending.office_hours_start,
        config.sending.office_hours_end,
    );
    let sender = Arc::new(EmailSender::new(
        &db_pool,
        renderer,
        cipher,
        Arc::clone(&smtp_pool),
        office_hours,
        config.sending.max_bounce_rate,
    ));

    // Queue workers
    let workers = Arc::new(QueueWorkers::new(
        JobRepository::new(db_pool.pool().clone()),
        Arc::clone(&scheduler),
        sender,
        config.workers.clone(),
    ));
    let worker_handles = workers.spawn();

    info!("Cadence started successfully");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    for handle in worker_handles {
        handle.abort();
    }
    sweep_handle.abort();
    reaper_handle.abort();
    smtp_pool.shutdown_all();

    info!("Cadence shutdown complete");

    Ok(())
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,cadence=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_level(true))
        .with(filter)
        .init();
}
