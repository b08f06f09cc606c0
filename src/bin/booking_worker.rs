use booking_outbox::clients::{setup_aws_clients, setup_db_pool};
use booking_outbox::config::Config;
use booking_outbox::health::spawn_health_server;
use booking_outbox::schema::ensure_schema;
use booking_outbox::shutdown::shutdown_signal;
use booking_outbox::telemetry;
use booking_outbox::worker::{BookingWorker, CapacityMarkerPolicy, QueueSettings, run_consumer};
use booking_outbox::BookingStore;

use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = Config::load()?;
    let _sentry = telemetry::init(config.sentry_dsn.as_deref());
    let settings = QueueSettings {
        queue_url: config.worker_queue_url()?.to_string(),
        max_messages: config.worker_max_messages,
        wait_time_seconds: config.worker_wait_time_seconds,
    };

    info!("Connecting to database...");
    let db_pool = setup_db_pool(&config).await?;
    if config.run_migrations {
        ensure_schema(&db_pool).await?;
    }

    let aws = setup_aws_clients(&config).await;
    let worker = BookingWorker::new(BookingStore::new(db_pool.clone()), CapacityMarkerPolicy::default());

    let health = spawn_health_server(config.health_port)?;

    run_consumer(&worker, &aws.sqs, &settings, shutdown_signal()).await;

    info!("Worker shutting down.");
    health.stop(true).await;
    db_pool.close().await;
    Ok(())
}
