use serde::Deserialize;

use crate::events::{BOOKING_CANCELLED, BOOKING_CONFIRMED, BOOKING_REJECTED, BOOKING_REQUESTED};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub database_max_connections: u32,
    #[serde(default = "default_true")]
    pub run_migrations: bool,
    pub aws_region: String,
    pub sentry_dsn: Option<String>,
    #[serde(default = "default_health_port")]
    pub health_port: u16,

    #[serde(default = "default_poll_interval")]
    pub outbox_poll_interval_ms: u64,
    #[serde(default = "default_batch_size")]
    pub outbox_batch_size: i64,
    #[serde(default = "default_max_retry_count")]
    pub outbox_max_retry_count: i32,
    #[serde(default = "default_retry_base_delay")]
    pub outbox_retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay")]
    pub outbox_retry_max_delay_ms: u64,
    pub outbox_deadletter_channel: Option<String>,

    pub booking_requested_channel: Option<String>,
    pub booking_confirmed_channel: Option<String>,
    pub booking_rejected_channel: Option<String>,
    pub booking_cancelled_channel: Option<String>,

    pub booking_worker_queue_url: Option<String>,
    #[serde(default = "default_worker_max_messages")]
    pub worker_max_messages: i32,
    #[serde(default = "default_worker_wait_time")]
    pub worker_wait_time_seconds: i32,
}

fn default_max_connections() -> u32 {
    5
}

fn default_true() -> bool {
    true
}

fn default_health_port() -> u16 {
    8080
}

fn default_poll_interval() -> u64 {
    1000 // Default to 1 second
}

fn default_batch_size() -> i64 {
    25
}

fn default_max_retry_count() -> i32 {
    20
}

fn default_retry_base_delay() -> u64 {
    1000
}

fn default_retry_max_delay() -> u64 {
    60_000
}

fn default_worker_max_messages() -> i32 {
    10
}

fn default_worker_wait_time() -> i32 {
    20
}

impl Config {
    pub fn load() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();

        let config = envy::from_env::<Config>()?;
        config.validate()?;
        Ok(config)
    }

    /// Builds a config from explicit key/value pairs, e.g. `("AWS_REGION", "eu-west-1")`.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, envy::Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        envy::from_iter(pairs.into_iter().map(|(k, v)| (k.into(), v.into())))
    }

    fn validate(&self) -> Result<(), envy::Error> {
        // Manually check that DATABASE_URL was loaded for the main app
        if self.database_url.is_none() {
            return Err(envy::Error::MissingValue("DATABASE_URL"));
        }
        if self.outbox_max_retry_count < 1 {
            return Err(envy::Error::Custom(
                "OUTBOX_MAX_RETRY_COUNT must be at least 1".to_string(),
            ));
        }
        if self.outbox_batch_size < 1 {
            return Err(envy::Error::Custom(
                "OUTBOX_BATCH_SIZE must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the database URL, or an error naming the missing variable.
    pub fn database_url(&self) -> Result<&str, envy::Error> {
        self.database_url
            .as_deref()
            .ok_or(envy::Error::MissingValue("DATABASE_URL"))
    }

    pub fn worker_queue_url(&self) -> Result<&str, envy::Error> {
        self.booking_worker_queue_url
            .as_deref()
            .ok_or(envy::Error::MissingValue("BOOKING_WORKER_QUEUE_URL"))
    }

    /// Routing for the publisher. The dead-letter channel is mandatory: without
    /// it an event at the retry ceiling could never reach its terminal state.
    pub fn publisher_channels(&self) -> Result<ChannelMap, envy::Error> {
        let dead_letter = self
            .outbox_deadletter_channel
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or(envy::Error::MissingValue("OUTBOX_DEADLETTER_CHANNEL"))?;
        Ok(ChannelMap {
            requested: self.booking_requested_channel.clone(),
            confirmed: self.booking_confirmed_channel.clone(),
            rejected: self.booking_rejected_channel.clone(),
            cancelled: self.booking_cancelled_channel.clone(),
            dead_letter: dead_letter.to_string(),
        })
    }
}

/// Event type to channel address routing for the publisher.
///
/// A channel address is either an SQS queue URL or `SNS::<topic arn>`.
#[derive(Debug, Clone)]
pub struct ChannelMap {
    pub requested: Option<String>,
    pub confirmed: Option<String>,
    pub rejected: Option<String>,
    pub cancelled: Option<String>,
    pub dead_letter: String,
}

impl ChannelMap {
    pub fn channel_for(&self, event_type: &str) -> Option<&str> {
        let channel = match event_type {
            BOOKING_REQUESTED => &self.requested,
            BOOKING_CONFIRMED => &self.confirmed,
            BOOKING_REJECTED => &self.rejected,
            BOOKING_CANCELLED => &self.cancelled,
            _ => return None,
        };
        channel.as_deref()
    }

    pub fn dead_letter(&self) -> &str {
        &self.dead_letter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applies_defaults_for_publisher_options() {
        let config = Config::from_pairs([("AWS_REGION", "eu-west-1")]).unwrap();
        assert_eq!(config.outbox_poll_interval_ms, 1000);
        assert_eq!(config.outbox_batch_size, 25);
        assert_eq!(config.outbox_max_retry_count, 20);
        assert_eq!(config.outbox_retry_base_delay_ms, 1000);
        assert_eq!(config.outbox_retry_max_delay_ms, 60_000);
        assert_eq!(config.health_port, 8080);
        assert!(config.run_migrations);
        assert!(config.database_url().is_err());
    }

    #[test]
    fn validation_requires_a_database_url() {
        let config = Config::from_pairs([("AWS_REGION", "eu-west-1")]).unwrap();
        assert!(matches!(
            config.validate(),
            Err(envy::Error::MissingValue("DATABASE_URL"))
        ));
    }

    #[test]
    fn validation_rejects_a_zero_retry_ceiling() {
        let config = Config::from_pairs([
            ("AWS_REGION", "eu-west-1"),
            ("DATABASE_URL", "postgres://localhost/booking"),
            ("OUTBOX_MAX_RETRY_COUNT", "0"),
        ])
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn routes_event_types_to_their_channels() {
        let config = Config::from_pairs([
            ("AWS_REGION", "eu-west-1"),
            ("BOOKING_REQUESTED_CHANNEL", "SNS::arn:aws:sns:eu-west-1:000000000000:booking-requested"),
            ("BOOKING_CONFIRMED_CHANNEL", "https://sqs.eu-west-1.amazonaws.com/000000000000/booking-confirmed"),
            ("OUTBOX_DEADLETTER_CHANNEL", "https://sqs.eu-west-1.amazonaws.com/000000000000/booking-deadletter"),
        ])
        .unwrap();
        let channels = config.publisher_channels().unwrap();

        assert!(channels.channel_for(BOOKING_REQUESTED).unwrap().starts_with("SNS::"));
        assert!(channels.channel_for(BOOKING_CONFIRMED).unwrap().ends_with("booking-confirmed"));
        assert_eq!(channels.channel_for(BOOKING_REJECTED), None);
        assert_eq!(channels.channel_for("order.placed"), None);
        assert!(channels.dead_letter().ends_with("booking-deadletter"));
    }

    #[test]
    fn publisher_routing_requires_a_dead_letter_channel() {
        let config = Config::from_pairs([
            ("AWS_REGION", "eu-west-1"),
            ("DATABASE_URL", "postgres://localhost/booking"),
            ("BOOKING_REQUESTED_CHANNEL", "SNS::arn:aws:sns:eu-west-1:000000000000:booking-requested"),
        ])
        .unwrap();
        assert!(config.validate().is_ok());
        assert!(matches!(
            config.publisher_channels(),
            Err(envy::Error::MissingValue("OUTBOX_DEADLETTER_CHANNEL"))
        ));

        let blank = Config::from_pairs([("AWS_REGION", "eu-west-1"), ("OUTBOX_DEADLETTER_CHANNEL", "  ")]).unwrap();
        assert!(blank.publisher_channels().is_err());
    }
}
