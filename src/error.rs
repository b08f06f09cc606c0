use thiserror::Error;

use crate::models::BookingStatus;
use crate::slot::{SLOT_FORMAT_HINT, SlotError};

pub const OVERLAP_CONSTRAINT: &str = "bookings_resource_overlap_excl";
const EXCLUSION_VIOLATION: &str = "23P01";

#[derive(Debug, Error)]
pub enum BookingError {
    #[error(transparent)]
    InvalidSlot(#[from] SlotError),
    #[error("This resource and date range is already booked. Choose another slot ({hint})", hint = SLOT_FORMAT_HINT)]
    SlotConflict,
    #[error("Booking not found")]
    NotFound,
    #[error("Forbidden for this booking")]
    Forbidden,
    #[error("Booking cannot be changed from status {0}")]
    InvalidState(BookingStatus),
    #[error("booking store failure: {0}")]
    Store(sqlx::Error),
    #[error("corrupt booking row: {0}")]
    CorruptRow(String),
    #[error("could not encode event payload: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<sqlx::Error> for BookingError {
    fn from(error: sqlx::Error) -> Self {
        if is_overlap_violation(&error) {
            Self::SlotConflict
        } else {
            Self::Store(error)
        }
    }
}

impl BookingError {
    /// Text safe to hand back to a caller. Infrastructure failures keep only a one-line cause.
    pub fn public_message(&self) -> String {
        match self {
            Self::Store(error) => {
                let cause = error.to_string();
                let first_line = cause.lines().next().unwrap_or_default();
                format!("Could not complete the booking operation. Cause: {first_line}")
            }
            Self::CorruptRow(_) | Self::Encode(_) => "Could not complete the booking operation.".to_string(),
            other => other.to_string(),
        }
    }
}

/// True when Postgres rejected the write because two active bookings would overlap.
pub fn is_overlap_violation(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db) => {
            db.code().as_deref() == Some(EXCLUSION_VIOLATION)
                || db.constraint() == Some(OVERLAP_CONSTRAINT)
        }
        _ => false,
    }
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("no channel configured for event type {0}")]
    NoChannel(String),
    #[error("could not build message: {0}")]
    Build(String),
    #[error("SQS send failed: {0}")]
    Sqs(String),
    #[error("SNS publish failed: {0}")]
    Sns(String),
    #[error("SQS receive failed: {0}")]
    Receive(String),
}
