//! Booking worker decisions end to end: store -> outbox -> publisher -> worker.
//!
//! Requires Postgres running with `DATABASE_URL` set; run with `cargo test -- --ignored`.

mod common;

use booking_outbox::events::{BOOKING_CONFIRMED, BOOKING_REJECTED, BOOKING_REQUESTED};
use booking_outbox::worker::{BookingWorker, CAPACITY_REASON, CapacityMarkerPolicy, MessageOutcome};
use booking_outbox::{BookingError, BookingStatus, BookingStore, outbox};
use common::{CONFIRMED_CHANNEL, REJECTED_CHANNEL, REQUESTED_CHANNEL, RecordingBroker, immediate_retries, publisher};
use sqlx::PgPool;

fn worker(pool: &PgPool) -> BookingWorker<CapacityMarkerPolicy> {
    BookingWorker::new(BookingStore::new(pool.clone()), CapacityMarkerPolicy::default())
}

/// Loads the payload of the latest `booking.requested` row for a booking, as the broker would carry it.
async fn requested_body(pool: &PgPool, booking_id: &str) -> String {
    let events = outbox::events_for_key(pool, booking_id).await.unwrap();
    events
        .iter()
        .rev()
        .find(|e| e.event_type == BOOKING_REQUESTED)
        .map(|e| e.payload.to_string())
        .expect("no booking.requested event")
}

#[sqlx::test(migrator = "booking_outbox::MIGRATOR")]
#[ignore] // Requires Postgres running
async fn confirms_and_enqueues_the_result(pool: PgPool) {
    let store = BookingStore::new(pool.clone());
    let booking = store.create("u1", "room-1:2026-03-01:2026-03-02:g2").await.unwrap();
    let id = booking.booking_id.to_string();

    let outcome = worker(&pool).handle_message(&requested_body(&pool, &id).await).await.unwrap();

    assert_eq!(outcome, MessageOutcome::Applied(BookingStatus::Confirmed));
    let stored = store.get(booking.booking_id, "u1").await.unwrap();
    assert_eq!(stored.status, BookingStatus::Confirmed);
    assert_eq!(stored.reason, None);

    let events = outbox::events_for_key(&pool, &id).await.unwrap();
    let result = events.last().unwrap();
    assert_eq!(result.event_type, BOOKING_CONFIRMED);
    assert_eq!(result.payload["status"], "CONFIRMED");
    assert!(result.payload.get("processedAt").is_some());
}

#[sqlx::test(migrator = "booking_outbox::MIGRATOR")]
#[ignore] // Requires Postgres running
async fn rejects_full_resources_with_a_reason(pool: PgPool) {
    let store = BookingStore::new(pool.clone());
    let booking = store.create("u1", "room-full:2026-03-01:2026-03-02:g2").await.unwrap();
    let id = booking.booking_id.to_string();

    let outcome = worker(&pool).handle_message(&requested_body(&pool, &id).await).await.unwrap();

    assert_eq!(outcome, MessageOutcome::Applied(BookingStatus::Rejected));
    let stored = store.get(booking.booking_id, "u1").await.unwrap();
    assert_eq!(stored.status, BookingStatus::Rejected);
    assert_eq!(stored.reason.as_deref(), Some(CAPACITY_REASON));

    let events = outbox::events_for_key(&pool, &id).await.unwrap();
    assert_eq!(events.last().unwrap().event_type, BOOKING_REJECTED);
    assert_eq!(events.last().unwrap().payload["reason"], CAPACITY_REASON);

    // A rejected booking no longer holds its range.
    store.create("u2", "room-full:2026-03-01:2026-03-02:g2").await.unwrap();
}

#[sqlx::test(migrator = "booking_outbox::MIGRATOR")]
#[ignore] // Requires Postgres running
async fn duplicate_delivery_is_idempotent(pool: PgPool) {
    let store = BookingStore::new(pool.clone());
    let booking = store.create("u1", "room-1:2026-03-01:2026-03-02:g2").await.unwrap();
    let id = booking.booking_id.to_string();
    let body = requested_body(&pool, &id).await;
    let worker = worker(&pool);

    let first = worker.handle_message(&body).await.unwrap();
    let after_first = store.get(booking.booking_id, "u1").await.unwrap();
    let second = worker.handle_message(&body).await.unwrap();
    let after_second = store.get(booking.booking_id, "u1").await.unwrap();

    assert_eq!(first, MessageOutcome::Applied(BookingStatus::Confirmed));
    assert_eq!(second, MessageOutcome::AlreadyDecided);
    assert_eq!(after_first, after_second);
    let results = outbox::events_for_key(&pool, &id)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.event_type == BOOKING_CONFIRMED)
        .count();
    assert_eq!(results, 1);
}

#[sqlx::test(migrator = "booking_outbox::MIGRATOR")]
#[ignore] // Requires Postgres running
async fn late_requests_never_revive_a_cancelled_booking(pool: PgPool) {
    let store = BookingStore::new(pool.clone());
    let booking = store.create("u1", "room-1:2026-03-01:2026-03-02:g2").await.unwrap();
    let id = booking.booking_id.to_string();
    let body = requested_body(&pool, &id).await;
    store.cancel(booking.booking_id, "u1", None).await.unwrap();

    let outcome = worker(&pool).handle_message(&body).await.unwrap();

    assert_eq!(outcome, MessageOutcome::Stale);
    let stored = store.get(booking.booking_id, "u1").await.unwrap();
    assert_eq!(stored.status, BookingStatus::Cancelled);
}

#[sqlx::test(migrator = "booking_outbox::MIGRATOR")]
#[ignore] // Requires Postgres running
async fn requests_for_a_superseded_slot_are_ignored(pool: PgPool) {
    let store = BookingStore::new(pool.clone());
    let booking = store.create("u1", "room-1:2026-03-01:2026-03-02:g2").await.unwrap();
    let id = booking.booking_id.to_string();
    let old_body = requested_body(&pool, &id).await;
    store
        .reschedule(booking.booking_id, "u1", "room-full:2026-03-05:2026-03-06:g2")
        .await
        .unwrap();

    let stale = worker(&pool).handle_message(&old_body).await.unwrap();
    assert_eq!(stale, MessageOutcome::Stale);
    assert_eq!(store.get(booking.booking_id, "u1").await.unwrap().status, BookingStatus::Pending);

    let fresh = worker(&pool).handle_message(&requested_body(&pool, &id).await).await.unwrap();
    assert_eq!(fresh, MessageOutcome::Applied(BookingStatus::Rejected));
}

#[sqlx::test(migrator = "booking_outbox::MIGRATOR")]
#[ignore] // Requires Postgres running
async fn poison_messages_are_dropped(pool: PgPool) {
    let outcome = worker(&pool).handle_message(r#"{"bookingId":"not-a-uuid"}"#).await.unwrap();
    assert!(matches!(outcome, MessageOutcome::Discarded(_)));

    let unknown = serde_json::json!({
        "bookingId": uuid::Uuid::new_v4(),
        "userId": "u1",
        "slotId": "room-1:2026-03-01:2026-03-02:g2",
    })
    .to_string();
    assert_eq!(worker(&pool).handle_message(&unknown).await.unwrap(), MessageOutcome::BookingMissing);
}

#[sqlx::test(migrator = "booking_outbox::MIGRATOR")]
#[ignore] // Requires Postgres running
async fn end_to_end_confirmation_then_conflicting_reschedule(pool: PgPool) {
    let store = BookingStore::new(pool.clone());
    let publisher = publisher(&pool, RecordingBroker::default(), immediate_retries(5));

    // create -> PENDING
    let booking = store.create("u1", "room-1:2026-03-01:2026-03-02:g2").await.unwrap();
    assert_eq!(booking.status, BookingStatus::Pending);

    // publisher delivers booking.requested
    publisher.publish_due_batch().await.unwrap();
    let delivered = publisher.broker().sent_to(REQUESTED_CHANNEL);
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].key, booking.booking_id.to_string());

    // worker confirms
    let outcome = worker(&pool).handle_message(&delivered[0].body).await.unwrap();
    assert_eq!(outcome, MessageOutcome::Applied(BookingStatus::Confirmed));
    let confirmed = store.get(booking.booking_id, "u1").await.unwrap();
    assert_eq!(confirmed.status, BookingStatus::Confirmed);

    // the result is relayed by the publisher
    publisher.publish_due_batch().await.unwrap();
    let results = publisher.broker().sent_to(CONFIRMED_CHANNEL);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].json()["status"], "CONFIRMED");
    assert!(publisher.broker().sent_to(REJECTED_CHANNEL).is_empty());

    // another pending booking on the same resource blocks an overlapping reschedule
    store.create("u2", "room-1:2026-03-05:2026-03-08:g2").await.unwrap();
    let err = store
        .reschedule(booking.booking_id, "u1", "room-1:2026-03-06:2026-03-07:g2")
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::SlotConflict));
    assert_eq!(store.get(booking.booking_id, "u1").await.unwrap(), confirmed);
}
