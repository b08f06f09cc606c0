use std::time::Duration;

use chrono::Utc;
use sqlx::{PgConnection, PgPool};
use tracing::{error, info, instrument, warn, Span};

use crate::config::{ChannelMap, Config};
use crate::error::BrokerError;
use crate::events::{DeadLetterEnvelope, DEAD_LETTER_SOURCE};
use crate::messaging::{MessageBroker, OutboundMessage};
use crate::models::OutboxEvent;
use crate::outbox;

/// Retry ceiling and exponential backoff for failed deliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retry_count: i32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

/// What happens to an event after a failed delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    Retry { retry_count: i32, backoff: Duration },
    DeadLetter { retry_count: i32 },
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retry_count: config.outbox_max_retry_count,
            base_delay: Duration::from_millis(config.outbox_retry_base_delay_ms),
            max_delay: Duration::from_millis(config.outbox_retry_max_delay_ms),
        }
    }

    /// `min(max_delay, base_delay * 2^(retry_count - 1))`.
    pub fn backoff_for(&self, retry_count: i32) -> Duration {
        let exponent = u32::try_from(retry_count.saturating_sub(1)).unwrap_or(0);
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub fn on_failure(&self, previous_retry_count: i32) -> FailureDisposition {
        let retry_count = previous_retry_count.saturating_add(1);
        if retry_count >= self.max_retry_count {
            FailureDisposition::DeadLetter { retry_count }
        } else {
            FailureDisposition::Retry {
                retry_count,
                backoff: self.backoff_for(retry_count),
            }
        }
    }
}

/// Per-cycle tally, logged when the cycle found work.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub leased: usize,
    pub published: usize,
    pub retried: usize,
    pub dead_lettered: usize,
}

#[derive(Debug)]
pub struct OutboxPublisher<B> {
    pool: PgPool,
    broker: B,
    channels: ChannelMap,
    policy: RetryPolicy,
    batch_size: i64,
}

impl<B: MessageBroker> OutboxPublisher<B> {
    pub fn new(pool: PgPool, broker: B, channels: ChannelMap, policy: RetryPolicy, batch_size: i64) -> Self {
        Self {
            pool,
            broker,
            channels,
            policy,
            batch_size,
        }
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    /// Runs one publish cycle: lease due events, deliver each, record each outcome, commit.
    ///
    /// A failed delivery only changes the fate of its own row. A database error
    /// aborts the whole batch (the transaction rolls back on drop) and the rows
    /// are picked up again on a later cycle.
    #[instrument(skip_all, fields(leased = 0))]
    pub async fn publish_due_batch(&self) -> Result<BatchReport, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let events =
            outbox::lease_due_events(&mut tx, self.policy.max_retry_count, self.batch_size).await?;
        let mut report = BatchReport {
            leased: events.len(),
            ..BatchReport::default()
        };
        if events.is_empty() {
            tx.commit().await?;
            return Ok(report);
        }
        Span::current().record("leased", events.len());

        for event in &events {
            match self.deliver(event).await {
                Ok(()) => {
                    outbox::mark_published(&mut tx, event.id).await?;
                    report.published += 1;
                }
                Err(send_error) => {
                    if self.record_failure(&mut tx, event, &send_error).await? {
                        report.dead_lettered += 1;
                    } else {
                        report.retried += 1;
                    }
                }
            }
        }

        tx.commit().await?;
        info!(
            published = report.published,
            retried = report.retried,
            dead_lettered = report.dead_lettered,
            "Outbox batch committed."
        );
        Ok(report)
    }

    async fn deliver(&self, event: &OutboxEvent) -> Result<(), BrokerError> {
        let channel = self
            .channels
            .channel_for(&event.event_type)
            .ok_or_else(|| BrokerError::NoChannel(event.event_type.clone()))?;
        let body = event.payload.to_string();
        let deduplication_id = deduplication_id(event.id);
        let message = OutboundMessage {
            key: &event.event_key,
            deduplication_id: &deduplication_id,
            body: &body,
        };
        self.broker.send(channel, message).await
    }

    /// Returns true when the event reached its terminal dead-lettered state.
    async fn record_failure(
        &self,
        conn: &mut PgConnection,
        event: &OutboxEvent,
        send_error: &BrokerError,
    ) -> Result<bool, sqlx::Error> {
        let message = send_error.to_string();
        match self.policy.on_failure(event.retry_count) {
            FailureDisposition::Retry { retry_count, backoff } => {
                warn!(
                    outbox_event_id = event.id,
                    event_type = %event.event_type,
                    retry_count,
                    backoff_ms = backoff.as_millis() as u64,
                    "Delivery failed: {}. Will retry.", message
                );
                outbox::schedule_retry(conn, event.id, retry_count, &message, backoff).await?;
                Ok(false)
            }
            FailureDisposition::DeadLetter { retry_count } => {
                match self.send_dead_letter(event, retry_count, &message).await {
                    Ok(()) => {
                        error!(
                            outbox_event_id = event.id,
                            event_type = %event.event_type,
                            retry_count,
                            "Delivery failed: {}. Retries exhausted; event dead-lettered.", message
                        );
                        outbox::mark_dead_lettered(conn, event.id, retry_count, &message).await?;
                        Ok(true)
                    }
                    Err(dead_letter_error) => {
                        // Not terminal: keep the count below the ceiling so the row stays leasable.
                        let combined = format!("{message}; dead-letter publish failed: {dead_letter_error}");
                        error!(outbox_event_id = event.id, "{}", combined);
                        outbox::schedule_retry(
                            conn,
                            event.id,
                            event.retry_count,
                            &combined,
                            self.policy.max_delay,
                        )
                        .await?;
                        Ok(false)
                    }
                }
            }
        }
    }

    async fn send_dead_letter(
        &self,
        event: &OutboxEvent,
        retry_count: i32,
        message: &str,
    ) -> Result<(), BrokerError> {
        let channel = self.channels.dead_letter();
        let envelope = DeadLetterEnvelope {
            source: DEAD_LETTER_SOURCE.to_string(),
            outbox_event_id: event.id,
            event_type: event.event_type.clone(),
            event_key: event.event_key.clone(),
            payload: event.payload.clone(),
            retry_count,
            error: message.to_string(),
            dead_lettered_at: Utc::now(),
        };
        let body = serde_json::to_string(&envelope).map_err(|e| BrokerError::Build(e.to_string()))?;
        let deduplication_id = format!("{}-dead-letter", deduplication_id(event.id));
        let message = OutboundMessage {
            key: &event.event_key,
            deduplication_id: &deduplication_id,
            body: &body,
        };
        self.broker.send(channel, message).await
    }
}

/// FIFO deduplication id for an outbox row: a re-send of the same row inside
/// the deduplication window is dropped by the channel.
pub fn deduplication_id(outbox_event_id: i64) -> String {
    format!("outbox-{outbox_event_id}")
}
