use std::future::Future;

use aws_sdk_sqs::Client as SqsClient;
use chrono::Utc;
use serde::Deserialize;
use tracing::{error, info, instrument, warn};

use crate::bookings::{BookingStore, DecisionOutcome};
use crate::error::BookingError;
use crate::events::{BookingRequested, BookingResult};
use crate::messaging::{self, ReceivedMessage};
use crate::models::BookingStatus;
use crate::slot::Slot;

pub const CAPACITY_REASON: &str = "Slot capacity reached";

/// Outcome of the domain rule for one booking request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Confirm,
    Reject { reason: String },
}

/// The rule that turns a booking request into a final decision.
///
/// Must be deterministic in the request: the same event may be delivered more than once.
pub trait BookingPolicy: Send + Sync {
    fn evaluate(&self, request: &BookingRequested, slot: &Slot) -> Decision;
}

/// Rejects resources whose identifier carries a capacity marker (`full` by default).
#[derive(Debug, Clone)]
pub struct CapacityMarkerPolicy {
    marker: String,
}

impl Default for CapacityMarkerPolicy {
    fn default() -> Self {
        Self {
            marker: "full".to_string(),
        }
    }
}

impl BookingPolicy for CapacityMarkerPolicy {
    fn evaluate(&self, _request: &BookingRequested, slot: &Slot) -> Decision {
        if slot.resource_id.to_lowercase().contains(&self.marker) {
            Decision::Reject {
                reason: CAPACITY_REASON.to_string(),
            }
        } else {
            Decision::Confirm
        }
    }
}

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    Applied(BookingStatus),
    AlreadyDecided,
    Stale,
    BookingMissing,
    /// Poison message: logged and dropped, never retried.
    Discarded(String),
}

/// Consumes `booking.requested` events and records the decision for each.
#[derive(Debug, Clone)]
pub struct BookingWorker<P> {
    store: BookingStore,
    policy: P,
}

impl<P: BookingPolicy> BookingWorker<P> {
    pub fn new(store: BookingStore, policy: P) -> Self {
        Self { store, policy }
    }

    /// Handles one raw message body.
    ///
    /// Errors are transient store failures; the caller must leave the message
    /// for redelivery. Anything else, including malformed input, is final.
    #[instrument(skip_all)]
    pub async fn handle_message(&self, body: &str) -> Result<MessageOutcome, BookingError> {
        let (request, slot) = match parse_booking_requested(body) {
            Ok(parsed) => parsed,
            Err(reason) => {
                error!(%reason, "Invalid booking.requested message, skipping.");
                return Ok(MessageOutcome::Discarded(reason));
            }
        };

        let result = self.decide(&request, &slot);
        let outcome = match self.store.record_decision(&result).await? {
            DecisionOutcome::Applied(booking) => {
                info!(booking_id = %booking.booking_id, status = %booking.status, "Processed booking.");
                MessageOutcome::Applied(booking.status)
            }
            DecisionOutcome::AlreadyDecided(booking) => {
                info!(booking_id = %booking.booking_id, status = %booking.status, "Duplicate request; booking already decided.");
                MessageOutcome::AlreadyDecided
            }
            DecisionOutcome::Stale(booking) => {
                warn!(
                    booking_id = %booking.booking_id,
                    status = %booking.status,
                    current_slot = %booking.slot_id,
                    requested_slot = %request.slot_id,
                    "Stale booking request ignored."
                );
                MessageOutcome::Stale
            }
            DecisionOutcome::Missing => {
                warn!(booking_id = %request.booking_id, "Booking not found for request, skipping.");
                MessageOutcome::BookingMissing
            }
        };
        Ok(outcome)
    }

    pub fn decide(&self, request: &BookingRequested, slot: &Slot) -> BookingResult {
        let (status, reason) = match self.policy.evaluate(request, slot) {
            Decision::Confirm => (BookingStatus::Confirmed, None),
            Decision::Reject { reason } => (BookingStatus::Rejected, Some(reason)),
        };
        BookingResult {
            booking_id: request.booking_id,
            user_id: request.user_id.clone(),
            slot_id: request.slot_id.clone(),
            status,
            reason,
            processed_at: Utc::now(),
        }
    }
}

#[derive(Deserialize)]
struct SnsNotification {
    #[serde(rename = "Type")]
    kind: String,
    #[serde(rename = "Message")]
    message: String,
}

/// Parses a `booking.requested` body, unwrapping an SNS notification envelope if present.
pub fn parse_booking_requested(body: &str) -> Result<(BookingRequested, Slot), String> {
    let unwrapped = match serde_json::from_str::<SnsNotification>(body) {
        Ok(notification) if notification.kind == "Notification" => notification.message,
        _ => body.to_string(),
    };
    let request: BookingRequested =
        serde_json::from_str(&unwrapped).map_err(|e| format!("undecodable payload: {e}"))?;
    if request.user_id.trim().is_empty() {
        return Err("missing userId".to_string());
    }
    let slot = Slot::parse(&request.slot_id).map_err(|e| e.to_string())?;
    Ok((request, slot))
}

/// Consumer settings for the worker's queue.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub queue_url: String,
    pub max_messages: i32,
    pub wait_time_seconds: i32,
}

/// Polls the worker queue until `shutdown` resolves.
///
/// A message is deleted only after it was handled (or discarded as poison), so a
/// crash or store failure leaves it for redelivery. Shutdown is observed between
/// receives; a received batch is always finished first.
pub async fn run_consumer<P, F>(
    worker: &BookingWorker<P>,
    sqs_client: &SqsClient,
    settings: &QueueSettings,
    shutdown: F,
) where
    P: BookingPolicy,
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    info!(queue_url = %settings.queue_url, "booking-worker listening.");

    loop {
        let received = tokio::select! {
            received = messaging::receive_messages(
                sqs_client,
                &settings.queue_url,
                settings.max_messages,
                settings.wait_time_seconds,
            ) => received,
            _ = &mut shutdown => break,
        };

        match received {
            Ok(messages) => {
                for message in messages {
                    process_one(worker, sqs_client, &settings.queue_url, message).await;
                }
            }
            Err(e) => {
                error!("Error receiving messages: {}", e);
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        }
    }
    info!("booking-worker consumer stopped.");
}

async fn process_one<P: BookingPolicy>(
    worker: &BookingWorker<P>,
    sqs_client: &SqsClient,
    queue_url: &str,
    message: ReceivedMessage,
) {
    match worker.handle_message(&message.body).await {
        Ok(_) => {
            if let Err(e) = messaging::delete_message(sqs_client, queue_url, &message.receipt_handle).await {
                // The message comes back; handling it again is idempotent.
                warn!("Failed to acknowledge message: {}", e);
            }
        }
        Err(e) => {
            error!("Store update failed: {}. Message left for redelivery.", e);
        }
    }
}
