//! Booking lifecycle with a transactional outbox.
//!
//! - [`bookings::BookingStore`]: create/get/list/cancel/reschedule, each one
//!   transaction that also writes the outbox row announcing the change.
//! - [`publisher::OutboxPublisher`]: leases due outbox rows, delivers them to
//!   SNS/SQS, and tracks retries, backoff and dead-lettering.
//! - [`worker::BookingWorker`]: consumes `booking.requested` and records the
//!   CONFIRMED/REJECTED decision.

pub mod bookings;
pub mod clients;
pub mod config;
pub mod error;
pub mod events;
pub mod health;
pub mod messaging;
pub mod models;
pub mod outbox;
pub mod publisher;
pub mod schema;
pub mod shutdown;
pub mod slot;
pub mod telemetry;
pub mod worker;

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

pub use bookings::{BookingStore, DecisionOutcome};
pub use error::{BookingError, BrokerError};
pub use models::{Booking, BookingStatus};
pub use slot::{Slot, SlotError};
