//! The booking table and its lifecycle.
//!
//! Every mutation runs in one transaction together with the outbox row that
//! announces it, so an event exists exactly when its booking change committed.
//! The no-overlap rule for active bookings is enforced by the
//! `bookings_resource_overlap_excl` exclusion constraint; the explicit checks
//! here only produce clearer errors earlier.

use chrono::Utc;
use sqlx::{PgConnection, PgPool};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::BookingError;
use crate::events::{
    self, BOOKING_CANCELLED, BOOKING_REQUESTED, BookingCancelled, BookingRequested, BookingResult,
};
use crate::models::{Booking, BookingRow, BookingStatus};
use crate::outbox;
use crate::slot::Slot;

const BOOKING_COLUMNS: &str = "id, owner_id, slot_id, resource_id, range_start, range_end, guests, status, reason, created_at, updated_at";
const DEFAULT_CANCEL_REASON: &str = "Cancelled by user";

/// What the worker's decision did to the booking row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecisionOutcome {
    /// The row moved from PENDING to the decided status and a result event was enqueued.
    Applied(Booking),
    /// The row already carries this decision; nothing was written.
    AlreadyDecided(Booking),
    /// The row moved on (cancelled, rescheduled, or decided otherwise) since the request was made.
    Stale(Booking),
    Missing,
}

#[derive(Debug, Clone)]
pub struct BookingStore {
    pool: PgPool,
}

impl BookingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates a PENDING booking and enqueues its `booking.requested` event.
    #[instrument(skip(self))]
    pub async fn create(&self, owner_id: &str, slot_id: &str) -> Result<Booking, BookingError> {
        let slot = Slot::parse(slot_id)?;

        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, BookingRow>(&format!(
            r#"
            INSERT INTO bookings (id, owner_id, slot_id, resource_id, range_start, range_end, guests, status, reason)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'PENDING', NULL)
            RETURNING {BOOKING_COLUMNS}
            "#
        ))
            .bind(Uuid::new_v4())
            .bind(owner_id)
            .bind(slot.slot_id())
            .bind(&slot.resource_id)
            .bind(slot.range_start)
            .bind(slot.range_end)
            .bind(slot.guests)
            .fetch_one(&mut *tx)
            .await?;
        let booking = Booking::try_from(row)?;

        let requested = BookingRequested::from_booking(&booking, booking.created_at);
        let event = events::outbox_event(BOOKING_REQUESTED, booking.booking_id, &requested)?;
        outbox::enqueue(&mut tx, &event).await?;

        tx.commit().await?;
        info!(booking_id = %booking.booking_id, resource_id = %booking.resource_id, "Booking requested.");
        Ok(booking)
    }

    /// Reads one booking on behalf of its owner.
    pub async fn get(&self, booking_id: Uuid, owner_id: &str) -> Result<Booking, BookingError> {
        let row = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1"
        ))
            .bind(booking_id)
            .fetch_optional(&self.pool)
            .await?;

        owned_by(row, owner_id)
    }

    /// Lists the owner's bookings, newest first.
    pub async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Booking>, BookingError> {
        let rows = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE owner_id = $1 ORDER BY created_at DESC, id DESC"
        ))
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Booking::try_from).collect()
    }

    /// Cancels a PENDING or CONFIRMED booking. Re-cancelling returns the record unchanged.
    #[instrument(skip(self, reason))]
    pub async fn cancel(
        &self,
        booking_id: Uuid,
        owner_id: &str,
        reason: Option<&str>,
    ) -> Result<Booking, BookingError> {
        let reason = reason
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_CANCEL_REASON);

        let mut tx = self.pool.begin().await?;
        let current = owned_by(lock_booking(&mut tx, booking_id).await?, owner_id)?;
        match current.status {
            BookingStatus::Cancelled => return Ok(current),
            status if !status.can_cancel() => return Err(BookingError::InvalidState(status)),
            _ => {}
        }

        let row = sqlx::query_as::<_, BookingRow>(&format!(
            r#"
            UPDATE bookings
            SET status = 'CANCELLED', reason = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING {BOOKING_COLUMNS}
            "#
        ))
            .bind(booking_id)
            .bind(reason)
            .fetch_one(&mut *tx)
            .await?;
        let booking = Booking::try_from(row)?;

        let cancelled = BookingCancelled::from_booking(&booking);
        let event = events::outbox_event(BOOKING_CANCELLED, booking.booking_id, &cancelled)?;
        outbox::enqueue(&mut tx, &event).await?;

        tx.commit().await?;
        info!(booking_id = %booking.booking_id, previous_status = %current.status, "Booking cancelled.");
        Ok(booking)
    }

    /// Moves a booking to a new slot and back to PENDING, re-requesting a decision.
    ///
    /// Runs under a row lock on the booking so concurrent cancel/reschedule calls
    /// on it serialise. Any conflict rolls the whole change back.
    #[instrument(skip(self))]
    pub async fn reschedule(
        &self,
        booking_id: Uuid,
        owner_id: &str,
        new_slot_id: &str,
    ) -> Result<Booking, BookingError> {
        let slot = Slot::parse(new_slot_id)?;

        let mut tx = self.pool.begin().await?;
        let current = owned_by(lock_booking(&mut tx, booking_id).await?, owner_id)?;
        if !current.status.can_reschedule() {
            return Err(BookingError::InvalidState(current.status));
        }

        if overlaps_other_active(&mut tx, booking_id, &slot).await? {
            return Err(BookingError::SlotConflict);
        }

        let row = sqlx::query_as::<_, BookingRow>(&format!(
            r#"
            UPDATE bookings
            SET slot_id = $2,
                resource_id = $3,
                range_start = $4,
                range_end = $5,
                guests = $6,
                status = 'PENDING',
                reason = NULL,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {BOOKING_COLUMNS}
            "#
        ))
            .bind(booking_id)
            .bind(slot.slot_id())
            .bind(&slot.resource_id)
            .bind(slot.range_start)
            .bind(slot.range_end)
            .bind(slot.guests)
            .fetch_one(&mut *tx)
            .await?;
        let booking = Booking::try_from(row)?;

        let requested = BookingRequested::from_booking(&booking, Utc::now());
        let event = events::outbox_event(BOOKING_REQUESTED, booking.booking_id, &requested)?;
        outbox::enqueue(&mut tx, &event).await?;

        tx.commit().await?;
        info!(booking_id = %booking.booking_id, slot_id = %booking.slot_id, "Booking rescheduled.");
        Ok(booking)
    }

    /// Applies the worker's decision for a `booking.requested` event and enqueues the result event.
    ///
    /// Only a PENDING row whose slot still matches the request is changed, so
    /// redelivered or outdated requests never override a later state.
    #[instrument(skip(self, result), fields(status = %result.status))]
    pub async fn record_decision(&self, result: &BookingResult) -> Result<DecisionOutcome, BookingError> {
        let mut tx = self.pool.begin().await?;
        let Some(row) = lock_booking(&mut tx, result.booking_id).await? else {
            return Ok(DecisionOutcome::Missing);
        };
        let current = Booking::try_from(row)?;

        if current.slot_id != result.slot_id {
            return Ok(DecisionOutcome::Stale(current));
        }
        match current.status {
            BookingStatus::Pending => {}
            status if status == result.status => return Ok(DecisionOutcome::AlreadyDecided(current)),
            _ => return Ok(DecisionOutcome::Stale(current)),
        }

        let row = sqlx::query_as::<_, BookingRow>(&format!(
            r#"
            UPDATE bookings
            SET status = $2, reason = $3, updated_at = NOW()
            WHERE id = $1
            RETURNING {BOOKING_COLUMNS}
            "#
        ))
            .bind(result.booking_id)
            .bind(result.status.as_str())
            .bind(result.reason.as_deref())
            .fetch_one(&mut *tx)
            .await?;
        let booking = Booking::try_from(row)?;

        let event = events::outbox_event(result.event_type(), booking.booking_id, result)?;
        outbox::enqueue(&mut tx, &event).await?;

        tx.commit().await?;
        Ok(DecisionOutcome::Applied(booking))
    }
}

async fn lock_booking(conn: &mut PgConnection, booking_id: Uuid) -> Result<Option<BookingRow>, sqlx::Error> {
    sqlx::query_as::<_, BookingRow>(&format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1 FOR UPDATE"
    ))
        .bind(booking_id)
        .fetch_optional(conn)
        .await
}

async fn overlaps_other_active(
    conn: &mut PgConnection,
    booking_id: Uuid,
    slot: &Slot,
) -> Result<bool, sqlx::Error> {
    let hit: Option<(i32,)> = sqlx::query_as(
        r#"
        SELECT 1
        FROM bookings
        WHERE resource_id = $1
            AND id <> $4
            AND status IN ('PENDING', 'CONFIRMED')
            AND daterange(range_start, range_end, '[)') && daterange($2::date, $3::date, '[)')
        LIMIT 1
        FOR KEY SHARE
        "#,
    )
        .bind(&slot.resource_id)
        .bind(slot.range_start)
        .bind(slot.range_end)
        .bind(booking_id)
        .fetch_optional(conn)
        .await?;

    Ok(hit.is_some())
}

fn owned_by(row: Option<BookingRow>, owner_id: &str) -> Result<Booking, BookingError> {
    let row = row.ok_or(BookingError::NotFound)?;
    if row.owner_id != owner_id {
        return Err(BookingError::Forbidden);
    }
    Booking::try_from(row)
}
