//! Integration event envelopes. Every topic carries camelCase JSON.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Booking, BookingStatus, NewOutboxEvent};

pub const BOOKING_REQUESTED: &str = "booking.requested";
pub const BOOKING_CONFIRMED: &str = "booking.confirmed";
pub const BOOKING_REJECTED: &str = "booking.rejected";
pub const BOOKING_CANCELLED: &str = "booking.cancelled";

pub const DEAD_LETTER_SOURCE: &str = "outbox-publisher";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequested {
    pub booking_id: Uuid,
    #[serde(alias = "ownerId")]
    pub user_id: String,
    pub slot_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_start: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_end: Option<NaiveDate>,
    #[serde(default = "pending")]
    pub status: BookingStatus,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

fn pending() -> BookingStatus {
    BookingStatus::Pending
}

impl BookingRequested {
    pub fn from_booking(booking: &Booking, requested_at: DateTime<Utc>) -> Self {
        Self {
            booking_id: booking.booking_id,
            user_id: booking.owner_id.clone(),
            slot_id: booking.slot_id.clone(),
            resource_id: Some(booking.resource_id.clone()),
            range_start: Some(booking.range_start),
            range_end: Some(booking.range_end),
            status: BookingStatus::Pending,
            created_at: Some(requested_at),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingResult {
    pub booking_id: Uuid,
    pub user_id: String,
    pub slot_id: String,
    pub status: BookingStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub processed_at: DateTime<Utc>,
}

impl BookingResult {
    pub const fn event_type(&self) -> &'static str {
        match self.status {
            BookingStatus::Rejected => BOOKING_REJECTED,
            _ => BOOKING_CONFIRMED,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingCancelled {
    pub booking_id: Uuid,
    pub user_id: String,
    pub slot_id: String,
    pub status: BookingStatus,
    pub reason: Option<String>,
    pub cancelled_at: DateTime<Utc>,
}

impl BookingCancelled {
    pub fn from_booking(booking: &Booking) -> Self {
        Self {
            booking_id: booking.booking_id,
            user_id: booking.owner_id.clone(),
            slot_id: booking.slot_id.clone(),
            status: booking.status,
            reason: booking.reason.clone(),
            cancelled_at: booking.updated_at,
        }
    }
}

/// What the publisher emits once an outbox row has exhausted its retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterEnvelope {
    pub source: String,
    pub outbox_event_id: i64,
    pub event_type: String,
    pub event_key: String,
    pub payload: serde_json::Value,
    pub retry_count: i32,
    pub error: String,
    pub dead_lettered_at: DateTime<Utc>,
}

pub(crate) fn outbox_event<T: Serialize>(
    event_type: &'static str,
    booking_id: Uuid,
    event: &T,
) -> Result<NewOutboxEvent, serde_json::Error> {
    Ok(NewOutboxEvent {
        event_type,
        event_key: booking_id.to_string(),
        payload: serde_json::to_value(event)?,
    })
}
