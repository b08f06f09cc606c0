use booking_outbox::clients::{setup_aws_clients, setup_db_pool};
use booking_outbox::config::Config;
use booking_outbox::health::spawn_health_server;
use booking_outbox::publisher::{OutboxPublisher, RetryPolicy};
use booking_outbox::schema::ensure_schema;
use booking_outbox::shutdown::shutdown_signal;
use booking_outbox::telemetry;

use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info};

/// The main function sets up the publisher's state and runs the poll timer.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // --- Configuration ---
    let config = Config::load()?;
    let channels = config.publisher_channels()?;
    let _sentry = telemetry::init(config.sentry_dsn.as_deref());
    info!("Configuration loaded.");

    // 1. Connect to the Database
    info!("Connecting to database...");
    let db_pool = setup_db_pool(&config).await?;
    info!("Database connection established.");
    if config.run_migrations {
        ensure_schema(&db_pool).await?;
    }

    // 2. Setup the AWS clients
    info!("Setting up AWS clients...");
    let aws = setup_aws_clients(&config).await;
    info!("AWS clients established.");

    let publisher = OutboxPublisher::new(
        db_pool.clone(),
        aws.broker(),
        channels,
        RetryPolicy::from_config(&config),
        config.outbox_batch_size,
    );

    let health = spawn_health_server(config.health_port)?;

    // 3. The poll timer. Each batch runs to its commit/rollback before shutdown is observed.
    info!(interval_ms = config.outbox_poll_interval_ms, "outbox-publisher started.");
    let mut interval = time::interval(Duration::from_millis(config.outbox_poll_interval_ms));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = publisher.publish_due_batch().await {
                    error!("Outbox publish cycle failed: {}", e);
                }
            },
            _ = &mut shutdown => {
                break;
            }
        }
    }

    info!("Publisher shutting down.");
    health.stop(true).await;
    db_pool.close().await;
    Ok(())
}
