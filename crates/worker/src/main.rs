//! OutcomeSignal Background Worker
//!
//! Handles scheduled jobs:
//! - Trial expiry sweep (hourly)
//! - Monthly usage row rollover (daily at 00:05 UTC)
//! - Heartbeat (every 5 minutes)

use std::sync::Arc;

use outcomesignal_billing::{AccountStore, PgStore, RolloverReport, TrialExpiry, UsageMeter};
use outcomesignal_shared::{create_pool, PgPool};
use time::OffsetDateTime;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

const DEFAULT_EXPIRE_TRIALS_CRON: &str = "0 0 * * * *";
const DEFAULT_USAGE_ROLLOVER_CRON: &str = "0 5 0 * * *";
const HEARTBEAT_CRON: &str = "0 */5 * * * *";

/// Create a database connection pool
async fn create_db_pool() -> anyhow::Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

    let pool = create_pool(&database_url).await?;

    info!("Database pool created");
    Ok(pool)
}

fn cron_from_env(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn log_rollover(report: &RolloverReport) {
    if report.errors > 0 {
        warn!(
            created = report.created,
            already_present = report.already_present,
            errors = report.errors,
            "Usage rollover finished with errors"
        );
    } else {
        info!(
            created = report.created,
            already_present = report.already_present,
            "Usage rollover complete"
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting OutcomeSignal Worker");

    let pool = create_db_pool().await?;
    let store: Arc<dyn AccountStore> = Arc::new(PgStore::new(pool));

    let scheduler = JobScheduler::new().await?;

    // Job 1: Expire trials whose end date has passed
    let expire_cron = cron_from_env("EXPIRE_TRIALS_CRON", DEFAULT_EXPIRE_TRIALS_CRON);
    let expiry = TrialExpiry::new(store.clone());
    scheduler
        .add(Job::new_async(expire_cron.as_str(), move |_uuid, _l| {
            let expiry = expiry.clone();
            Box::pin(async move {
                info!("Running trial expiry sweep");
                if let Err(e) = expiry.run(OffsetDateTime::now_utc()).await {
                    error!(error = %e, "Trial expiry sweep failed");
                }
            })
        })?)
        .await?;
    info!(cron = %expire_cron, "Scheduled: Trial expiry sweep");

    // Job 2: Create this month's usage rows for every subscription
    let rollover_cron = cron_from_env("USAGE_ROLLOVER_CRON", DEFAULT_USAGE_ROLLOVER_CRON);
    let meter = UsageMeter::new(store.clone());
    scheduler
        .add(Job::new_async(rollover_cron.as_str(), move |_uuid, _l| {
            let meter = meter.clone();
            Box::pin(async move {
                info!("Running monthly usage rollover");
                match meter.roll_over(OffsetDateTime::now_utc()).await {
                    Ok(report) => log_rollover(&report),
                    Err(e) => error!(error = %e, "Usage rollover failed"),
                }
            })
        })?)
        .await?;
    info!(cron = %rollover_cron, "Scheduled: Usage rollover");

    // Job 3: Heartbeat
    scheduler
        .add(Job::new_async(HEARTBEAT_CRON, |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat");
            })
        })?)
        .await?;

    info!("Starting job scheduler");
    scheduler.start().await?;
    info!("OutcomeSignal Worker started successfully with {} scheduled jobs", 3);

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    Ok(())
}
