//! All SQL for the pipeline. Queries are parameterized; idempotent inserts
//! rely on database uniqueness and report via affected-row counts.

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::config::RetryPolicy;
use crate::error::{AppError, Result};
use crate::id::EntityType;
use crate::models::{
    CreateOrder, DeliveryLedgerEntry, DeliveryStatus, NewDelivery, Order, OrderStatus, Provider,
    RetryDescriptor, RetryState, TrustLevel,
};
use crate::util::now;

// ============ Orders ============

fn order_from_row(row: &Row) -> rusqlite::Result<Order> {
    let status: String = row.get("status")?;
    Ok(Order {
        id: row.get("id")?,
        external_reference: row.get("external_reference")?,
        external_order_id: row.get("external_order_id")?,
        status: OrderStatus::from_str(&status).unwrap_or(OrderStatus::Pending),
        payment_id: row.get("payment_id")?,
        shipping_status: row.get("shipping_status")?,
        cancellation_reason: row.get("cancellation_reason")?,
        paid_at: row.get("paid_at")?,
        cancelled_at: row.get("cancelled_at")?,
        refunded_at: row.get("refunded_at")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

/// Create a local order. Idempotent on external_reference: if an order
/// with this reference already exists, it is returned unchanged (the
/// ingestion-path rule: "if local order with this external id exists,
/// no-op").
pub fn create_order(conn: &Connection, input: &CreateOrder) -> Result<Order> {
    let ts = now();
    let id = EntityType::Order.gen_id();
    conn.execute(
        "INSERT OR IGNORE INTO orders (id, external_reference, external_order_id, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, 'pending', ?4, ?4)",
        params![id, input.external_reference, input.external_order_id, ts],
    )?;

    get_order_by_reference(conn, &input.external_reference)?
        .ok_or_else(|| AppError::Internal("order missing after insert".into()))
}

pub fn get_order_by_reference(conn: &Connection, reference: &str) -> Result<Option<Order>> {
    conn.query_row(
        "SELECT * FROM orders WHERE external_reference = ?1",
        params![reference],
        order_from_row,
    )
    .optional()
    .map_err(AppError::from)
}

pub fn get_order_by_id(conn: &Connection, id: &str) -> Result<Option<Order>> {
    conn.query_row("SELECT * FROM orders WHERE id = ?1", params![id], order_from_row)
        .optional()
        .map_err(AppError::from)
}

/// Apply a status transition as a single conditional write scoped by the
/// order's primary key.
///
/// The WHERE clause encodes the transition rule: from `pending` anything
/// is allowed; from a terminal status only a reversal (refund,
/// chargeback) is. Timestamp side-effect fields are set once and never
/// overwritten. Returns the number of affected rows; 0 means the
/// transition was refused (or the row raced away).
pub fn transition_order(
    conn: &Connection,
    order_id: &str,
    new_status: OrderStatus,
    payment_id: Option<&str>,
) -> Result<usize> {
    let ts = now();
    let affected = conn.execute(
        "UPDATE orders SET
            status = ?2,
            payment_id = COALESCE(?3, payment_id),
            paid_at = CASE WHEN ?2 = 'paid' THEN COALESCE(paid_at, ?4) ELSE paid_at END,
            cancelled_at = CASE WHEN ?2 = 'cancelled' THEN COALESCE(cancelled_at, ?4) ELSE cancelled_at END,
            refunded_at = CASE WHEN ?2 IN ('refunded', 'charged_back') THEN COALESCE(refunded_at, ?4) ELSE refunded_at END,
            updated_at = ?4
         WHERE id = ?1 AND (status = 'pending' OR ?2 IN ('refunded', 'charged_back'))",
        params![order_id, new_status.as_str(), payment_id, ts],
    )?;
    Ok(affected)
}

// ============ Delivery ledger ============

fn delivery_from_row(row: &Row) -> rusqlite::Result<DeliveryLedgerEntry> {
    let provider: String = row.get("provider")?;
    let trust: String = row.get("trust")?;
    let status: String = row.get("status")?;
    Ok(DeliveryLedgerEntry {
        id: row.get("id")?,
        provider: Provider::from_str(&provider).unwrap_or(Provider::Payment),
        external_event_id: row.get("external_event_id")?,
        event_type: row.get("event_type")?,
        raw_body: row.get("raw_body")?,
        headers: row.get("headers")?,
        trust: TrustLevel::from_str(&trust).unwrap_or(TrustLevel::Signature),
        status: DeliveryStatus::from_str(&status).unwrap_or(DeliveryStatus::Pending),
        created_at: row.get("created_at")?,
        processed_at: row.get("processed_at")?,
    })
}

/// Idempotent insert keyed by (provider, external_event_id). A second
/// insert for the same key returns the existing row's id without touching
/// its raw body: the first-seen payload is authoritative for audit.
/// Returns (delivery_id, inserted).
pub fn record_delivery(conn: &Connection, input: &NewDelivery) -> Result<(String, bool)> {
    let id = EntityType::Delivery.gen_id();
    let affected = conn.execute(
        "INSERT OR IGNORE INTO webhook_deliveries
            (id, provider, external_event_id, event_type, raw_body, headers, trust, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', ?8)",
        params![
            id,
            input.provider.as_str(),
            input.external_event_id,
            input.event_type,
            input.raw_body,
            input.headers,
            input.trust.as_str(),
            now()
        ],
    )?;

    if affected > 0 {
        return Ok((id, true));
    }

    let existing: String = conn.query_row(
        "SELECT id FROM webhook_deliveries WHERE provider = ?1 AND external_event_id = ?2",
        params![input.provider.as_str(), input.external_event_id],
        |row| row.get(0),
    )?;
    Ok((existing, false))
}

pub fn set_delivery_status(conn: &Connection, id: &str, status: DeliveryStatus) -> Result<()> {
    conn.execute(
        "UPDATE webhook_deliveries SET status = ?2, processed_at = ?3 WHERE id = ?1",
        params![id, status.as_str(), now()],
    )?;
    Ok(())
}

pub fn get_delivery_by_id(conn: &Connection, id: &str) -> Result<Option<DeliveryLedgerEntry>> {
    conn.query_row(
        "SELECT * FROM webhook_deliveries WHERE id = ?1",
        params![id],
        delivery_from_row,
    )
    .optional()
    .map_err(AppError::from)
}

/// Filters for the admin diagnostics listing.
#[derive(Debug, Default)]
pub struct DeliveryFilter {
    pub provider: Option<Provider>,
    pub status: Option<DeliveryStatus>,
    pub since: Option<i64>,
    pub until: Option<i64>,
    pub limit: i64,
}

pub fn list_deliveries(conn: &Connection, filter: &DeliveryFilter) -> Result<Vec<DeliveryLedgerEntry>> {
    let mut sql = String::from("SELECT * FROM webhook_deliveries WHERE 1=1");
    let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(provider) = filter.provider {
        sql.push_str(" AND provider = ?");
        params_vec.push(Box::new(provider.as_str().to_string()));
    }
    if let Some(status) = filter.status {
        sql.push_str(" AND status = ?");
        params_vec.push(Box::new(status.as_str().to_string()));
    }
    if let Some(since) = filter.since {
        sql.push_str(" AND created_at >= ?");
        params_vec.push(Box::new(since));
    }
    if let Some(until) = filter.until {
        sql.push_str(" AND created_at <= ?");
        params_vec.push(Box::new(until));
    }
    sql.push_str(" ORDER BY created_at DESC LIMIT ?");
    params_vec.push(Box::new(if filter.limit > 0 { filter.limit } else { 100 }));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        rusqlite::params_from_iter(params_vec.iter().map(|p| p.as_ref())),
        delivery_from_row,
    )?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

// ============ Replay dedup (durable tier) ============

/// Atomically record an idempotency key, returning true if it was unseen.
/// False means a duplicate delivery within the retention window.
pub fn try_record_replay(conn: &Connection, key: &str, ttl_secs: i64) -> Result<bool> {
    let ts = now();
    let affected = conn.execute(
        "INSERT OR IGNORE INTO replay_records (idempotency_key, first_seen_at, expires_at)
         VALUES (?1, ?2, ?3)",
        params![key, ts, ts + ttl_secs],
    )?;
    Ok(affected > 0)
}

/// Best-effort hygiene; callers swallow failures.
pub fn purge_expired_replay_records(conn: &Connection) -> Result<usize> {
    let deleted = conn.execute(
        "DELETE FROM replay_records WHERE expires_at < ?1",
        params![now()],
    )?;
    Ok(deleted)
}

// ============ Retry queue ============

fn retry_from_row(row: &Row) -> rusqlite::Result<RetryDescriptor> {
    let state: String = row.get("state")?;
    Ok(RetryDescriptor {
        id: row.get("id")?,
        delivery_id: row.get("delivery_id")?,
        last_error: row.get("last_error")?,
        attempt_count: row.get("attempt_count")?,
        next_attempt_at: row.get("next_attempt_at")?,
        state: RetryState::from_str(&state).unwrap_or(RetryState::Scheduled),
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

/// Persist (or bump) the retry descriptor for a delivery. Backoff is
/// exponential from `policy.base_secs` with a ceiling of `policy.cap_secs`;
/// at `policy.max_attempts` the descriptor flips to `exhausted`.
pub fn schedule_retry(
    conn: &Connection,
    policy: &RetryPolicy,
    delivery_id: &str,
    error: &str,
) -> Result<RetryDescriptor> {
    let ts = now();

    let previous: Option<i64> = conn
        .query_row(
            "SELECT attempt_count FROM retry_queue WHERE delivery_id = ?1",
            params![delivery_id],
            |row| row.get(0),
        )
        .optional()?;

    let attempt = previous.unwrap_or(0) + 1;
    let exponent = (attempt - 1).min(30) as u32;
    let delay = policy
        .base_secs
        .saturating_mul(1i64 << exponent)
        .min(policy.cap_secs);
    let state = if attempt >= policy.max_attempts {
        RetryState::Exhausted
    } else {
        RetryState::Scheduled
    };

    let id = EntityType::Retry.gen_id();
    conn.execute(
        "INSERT INTO retry_queue (id, delivery_id, last_error, attempt_count, next_attempt_at, state, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
         ON CONFLICT(delivery_id) DO UPDATE SET
            last_error = excluded.last_error,
            attempt_count = excluded.attempt_count,
            next_attempt_at = excluded.next_attempt_at,
            state = excluded.state,
            updated_at = excluded.updated_at",
        params![
            id,
            delivery_id,
            error,
            attempt,
            ts + delay,
            state.as_str(),
            ts
        ],
    )?;

    get_retry_by_delivery(conn, delivery_id)?
        .ok_or_else(|| AppError::Internal("retry descriptor missing after upsert".into()))
}

pub fn get_retry_by_delivery(conn: &Connection, delivery_id: &str) -> Result<Option<RetryDescriptor>> {
    conn.query_row(
        "SELECT * FROM retry_queue WHERE delivery_id = ?1",
        params![delivery_id],
        retry_from_row,
    )
    .optional()
    .map_err(AppError::from)
}

pub fn due_retries(conn: &Connection, limit: i64) -> Result<Vec<RetryDescriptor>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM retry_queue
         WHERE state = 'scheduled' AND next_attempt_at <= ?1
         ORDER BY next_attempt_at ASC LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![now(), limit], retry_from_row)?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Drop the descriptor after a successful retry.
pub fn complete_retry(conn: &Connection, delivery_id: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM retry_queue WHERE delivery_id = ?1",
        params![delivery_id],
    )?;
    Ok(())
}
