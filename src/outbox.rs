use std::time::Duration;

use crate::models::{NewOutboxEvent, OutboxEvent};
use sqlx::{PgConnection, PgPool, query_as};

/// Appends an event to the outbox.
///
/// This function must be called inside the transaction of the booking
/// mutation that caused the event, so both commit or neither does.
pub async fn enqueue(conn: &mut PgConnection, event: &NewOutboxEvent) -> Result<i64, sqlx::Error> {
    let (id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO outbox_events (event_type, event_key, payload)
        VALUES ($1, $2, $3)
        RETURNING id
        "#,
    )
        .bind(event.event_type)
        .bind(&event.event_key)
        .bind(&event.payload)
        .fetch_one(conn)
        .await?;

    Ok(id)
}

/// Fetches a batch of due, undelivered events and locks them for update.
///
/// Rows already leased by a concurrent publisher are skipped rather than
/// waited on. This function must be called inside a transaction; the lease
/// lasts until that transaction ends.
pub async fn lease_due_events(
    conn: &mut PgConnection,
    max_retry_count: i32,
    batch_size: i64,
) -> Result<Vec<OutboxEvent>, sqlx::Error> {
    let events = query_as::<_, OutboxEvent>(
        r#"
        SELECT id, event_type, event_key, payload, created_at, next_attempt_at,
               published_at, dead_lettered_at, retry_count, last_error
        FROM outbox_events
        WHERE published_at IS NULL
            AND dead_lettered_at IS NULL
            AND next_attempt_at <= NOW()
            AND retry_count < $1
        ORDER BY created_at, id
        LIMIT $2
        FOR UPDATE SKIP LOCKED
        "#,
    )
        .bind(max_retry_count)
        .bind(batch_size)
        .fetch_all(conn)
        .await?;

    Ok(events)
}

/// Marks an event as delivered. Must run in the transaction that leased it.
pub async fn mark_published(conn: &mut PgConnection, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE outbox_events
        SET published_at = NOW(), last_error = NULL
        WHERE id = $1
        "#,
    )
        .bind(id)
        .execute(conn)
        .await?;

    Ok(())
}

/// Records a failed attempt and pushes the next attempt out by `backoff`.
pub async fn schedule_retry(
    conn: &mut PgConnection,
    id: i64,
    retry_count: i32,
    error: &str,
    backoff: Duration,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE outbox_events
        SET retry_count = GREATEST(retry_count, $2),
            last_error = $3,
            next_attempt_at = NOW() + ($4 * INTERVAL '1 millisecond')
        WHERE id = $1
        "#,
    )
        .bind(id)
        .bind(retry_count)
        .bind(error)
        .bind(millis(backoff))
        .execute(conn)
        .await?;

    Ok(())
}

/// Moves an event to its terminal failure state. The publisher never picks it up again.
pub async fn mark_dead_lettered(
    conn: &mut PgConnection,
    id: i64,
    retry_count: i32,
    error: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE outbox_events
        SET retry_count = GREATEST(retry_count, $2),
            last_error = $3,
            dead_lettered_at = NOW()
        WHERE id = $1
            AND published_at IS NULL
        "#,
    )
        .bind(id)
        .bind(retry_count)
        .bind(error)
        .execute(conn)
        .await?;

    Ok(())
}

/// Counts events that still await delivery (neither published nor dead-lettered).
pub async fn count_undelivered(pool: &PgPool) -> Result<i64, sqlx::Error> {
    let (count,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*)
        FROM outbox_events
        WHERE published_at IS NULL
            AND dead_lettered_at IS NULL
        "#,
    )
        .fetch_one(pool)
        .await?;

    Ok(count)
}

/// Loads every outbox row for one booking, oldest first.
pub async fn events_for_key(pool: &PgPool, event_key: &str) -> Result<Vec<OutboxEvent>, sqlx::Error> {
    query_as::<_, OutboxEvent>(
        r#"
        SELECT id, event_type, event_key, payload, created_at, next_attempt_at,
               published_at, dead_lettered_at, retry_count, last_error
        FROM outbox_events
        WHERE event_key = $1
        ORDER BY created_at, id
        "#,
    )
        .bind(event_key)
        .fetch_all(pool)
        .await
}

fn millis(duration: Duration) -> f64 {
    duration.as_millis() as f64
}
