//! Delivery ledger: the durable, idempotent record of every accepted
//! inbound event. Processing always happens against the stored row, never
//! the in-flight request, so retries and manual reprocessing see exactly
//! the bytes the provider sent.

use axum::http::HeaderMap;
use rusqlite::Connection;

use crate::db::queries;
use crate::error::Result;
use crate::models::{DeliveryLedgerEntry, DeliveryStatus, NewDelivery};

/// Serialize request headers to a JSON object with lower-cased names.
/// Multi-valued headers keep the first value; none of the providers send
/// repeats that matter here.
pub fn headers_to_json(headers: &HeaderMap) -> String {
    let mut map = serde_json::Map::new();
    for (name, value) in headers {
        let value = value.to_str().unwrap_or("<non-utf8>");
        map.entry(name.as_str().to_string())
            .or_insert_with(|| serde_json::Value::String(value.to_string()));
    }
    serde_json::Value::Object(map).to_string()
}

/// Record a delivery, returning its ledger id and whether this call
/// created the row. `false` means the event was already on the ledger;
/// the stored first-seen payload wins.
pub fn record(conn: &Connection, input: &NewDelivery) -> Result<(String, bool)> {
    let (id, inserted) = queries::record_delivery(conn, input)?;
    if inserted {
        tracing::info!(
            delivery_id = %id,
            provider = input.provider.as_str(),
            external_event_id = %input.external_event_id,
            event_type = %input.event_type,
            trust = input.trust.as_str(),
            "delivery recorded"
        );
    } else {
        tracing::info!(
            delivery_id = %id,
            provider = input.provider.as_str(),
            external_event_id = %input.external_event_id,
            "duplicate delivery, ledger row already exists"
        );
    }
    Ok((id, inserted))
}

pub fn mark_processed(conn: &Connection, delivery_id: &str) -> Result<()> {
    queries::set_delivery_status(conn, delivery_id, DeliveryStatus::Processed)
}

pub fn mark_failed(conn: &Connection, delivery_id: &str) -> Result<()> {
    queries::set_delivery_status(conn, delivery_id, DeliveryStatus::Failed)
}

pub fn get(conn: &Connection, delivery_id: &str) -> Result<Option<DeliveryLedgerEntry>> {
    queries::get_delivery_by_id(conn, delivery_id)
}
