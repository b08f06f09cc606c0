use sqlx::PgPool;
use sqlx::migrate::MigrateError;
use tracing::info;

use crate::MIGRATOR;

/// Brings the booking and outbox tables up to date.
///
/// Safe to call from every process at start-up: the migrator serialises racing
/// instances on a Postgres advisory lock and every statement is `IF NOT EXISTS`.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), MigrateError> {
    info!("Applying schema migrations...");
    MIGRATOR.run(pool).await?;
    info!("Schema is up to date.");
    Ok(())
}
