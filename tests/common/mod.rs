#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use booking_outbox::BrokerError;
use booking_outbox::config::ChannelMap;
use booking_outbox::messaging::{MessageBroker, OutboundMessage};
use booking_outbox::publisher::{OutboxPublisher, RetryPolicy};
use sqlx::PgPool;

pub const REQUESTED_CHANNEL: &str = "SNS::arn:aws:sns:eu-west-1:000000000000:booking-requested";
pub const CONFIRMED_CHANNEL: &str = "SNS::arn:aws:sns:eu-west-1:000000000000:booking-confirmed";
pub const REJECTED_CHANNEL: &str = "SNS::arn:aws:sns:eu-west-1:000000000000:booking-rejected";
pub const CANCELLED_CHANNEL: &str = "SNS::arn:aws:sns:eu-west-1:000000000000:booking-cancelled";
pub const DEAD_LETTER_CHANNEL: &str = "https://localhost.localstack.cloud:4566/000000000000/booking-deadletter";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub channel: String,
    pub key: String,
    pub deduplication_id: String,
    pub body: String,
}

impl SentMessage {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).expect("sent body is JSON")
    }
}

/// In-memory broker that records deliveries and can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingBroker {
    sent: Mutex<Vec<SentMessage>>,
    fail_all: bool,
    fail_dead_letter: bool,
    failing_keys: Mutex<HashSet<String>>,
}

impl RecordingBroker {
    pub fn failing() -> Self {
        Self {
            fail_all: true,
            ..Self::default()
        }
    }

    /// Fails every send, the dead-letter channel included.
    pub fn unreachable() -> Self {
        Self {
            fail_all: true,
            fail_dead_letter: true,
            ..Self::default()
        }
    }

    pub fn fail_key(&self, key: &str) {
        self.failing_keys.lock().unwrap().insert(key.to_string());
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, channel: &str) -> Vec<SentMessage> {
        self.sent().into_iter().filter(|m| m.channel == channel).collect()
    }
}

impl MessageBroker for RecordingBroker {
    async fn send(&self, channel_address: &str, message: OutboundMessage<'_>) -> Result<(), BrokerError> {
        let fails = if channel_address == DEAD_LETTER_CHANNEL {
            self.fail_dead_letter
        } else {
            self.fail_all || self.failing_keys.lock().unwrap().contains(message.key)
        };
        if fails {
            return Err(BrokerError::Sns("broker unavailable".to_string()));
        }
        self.sent.lock().unwrap().push(SentMessage {
            channel: channel_address.to_string(),
            key: message.key.to_string(),
            deduplication_id: message.deduplication_id.to_string(),
            body: message.body.to_string(),
        });
        Ok(())
    }
}

pub fn channels() -> ChannelMap {
    ChannelMap {
        requested: Some(REQUESTED_CHANNEL.to_string()),
        confirmed: Some(CONFIRMED_CHANNEL.to_string()),
        rejected: Some(REJECTED_CHANNEL.to_string()),
        cancelled: Some(CANCELLED_CHANNEL.to_string()),
        dead_letter: DEAD_LETTER_CHANNEL.to_string(),
    }
}

/// Zero delays so every failed row is due again on the next cycle.
pub fn immediate_retries(max_retry_count: i32) -> RetryPolicy {
    RetryPolicy {
        max_retry_count,
        base_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
    }
}

pub fn publisher(pool: &PgPool, broker: RecordingBroker, policy: RetryPolicy) -> OutboxPublisher<RecordingBroker> {
    OutboxPublisher::new(pool.clone(), broker, channels(), policy, 25)
}
