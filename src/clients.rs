use aws_config::{BehaviorVersion, Region};
use aws_sdk_sns::Client as SnsClient;
use aws_sdk_sqs::Client as SqsClient;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::info;

use crate::config::Config;
use crate::messaging::AwsBroker;

/// Creates and returns a new database connection pool.
pub async fn setup_db_pool(config: &Config) -> Result<PgPool, Box<dyn std::error::Error + Send + Sync>> {
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(config.database_url()?)
        .await?;
    info!(max_connections = config.database_max_connections, "Database pool ready.");
    Ok(pool)
}

/// SQS and SNS clients sharing one region/credential configuration.
#[derive(Debug, Clone)]
pub struct AwsClients {
    pub sqs: SqsClient,
    pub sns: SnsClient,
}

impl AwsClients {
    pub fn broker(&self) -> AwsBroker {
        AwsBroker::new(self.sqs.clone(), self.sns.clone())
    }
}

/// Loads AWS configuration for the configured region and builds the clients.
pub async fn setup_aws_clients(config: &Config) -> AwsClients {
    let aws_config = aws_config::defaults(BehaviorVersion::v2025_08_07())
        .region(Region::new(config.aws_region.clone()))
        .load()
        .await;
    AwsClients {
        sqs: SqsClient::new(&aws_config),
        sns: SnsClient::new(&aws_config),
    }
}
