//! Shared ingestion pipeline for all webhook providers.
//!
//! Order of operations: authenticate, replay-check, ledger, process. A
//! delivery only reaches processing through its ledger row; retries and
//! manual reprocessing run the same `process_delivery` over the stored
//! bytes.
//!
//! Response policy follows what providers do with status codes. 200 means
//! "stop redelivering": admitted, duplicate, and correlation-miss all ack.
//! 401 means the request never authenticated (bad signature, stale
//! timestamp). 500 means "redeliver later": processing failed and a local
//! retry is also scheduled.

use axum::http::{HeaderMap, StatusCode};

use crate::db::AppState;
use crate::error::{AppError, Result};
use crate::handlers::webhooks::{marketplace, payment};
use crate::ledger;
use crate::models::{
    DeliveryLedgerEntry, NewDelivery, NormalizedEvent, ParsedEvent, Provider, ProviderStatus,
    TrustLevel,
};
use crate::processor::{self, ProcessOutcome};
use crate::replay::Admission;
use crate::retry;

/// Status plus a short static body, like providers expect.
pub type WebhookResult = (StatusCode, &'static str);

pub const ACK: WebhookResult = (StatusCode::OK, "ok");
pub const ACK_DUPLICATE: WebhookResult = (StatusCode::OK, "duplicate");
pub const REJECT_UNAUTHORIZED: WebhookResult = (StatusCode::UNAUTHORIZED, "unauthorized");
pub const REJECT_STALE: WebhookResult = (StatusCode::UNAUTHORIZED, "stale timestamp");
pub const REJECT_PAYLOAD: WebhookResult = (StatusCode::BAD_REQUEST, "invalid payload");
pub const PROCESSING_FAILED: WebhookResult =
    (StatusCode::INTERNAL_SERVER_ERROR, "processing failed");

/// An authenticated delivery, ready for the shared pipeline.
pub struct AuthenticatedDelivery<'a> {
    pub event_id: &'a str,
    /// Timestamp token for the staleness check, when the scheme has one.
    pub ts_token: Option<&'a str>,
    pub trust: TrustLevel,
    pub event_type: &'a str,
}

/// Run an authenticated delivery through replay-check, ledger, and
/// processing.
pub async fn ingest(
    state: &AppState,
    provider: Provider,
    headers: &HeaderMap,
    body: &[u8],
    delivery: AuthenticatedDelivery<'_>,
) -> Result<WebhookResult> {
    let key = format!("{}:{}", provider.as_str(), delivery.event_id);

    {
        let conn = state.db.get()?;
        match state.replay.admit(&conn, &key, delivery.ts_token) {
            Admission::Fresh => {}
            Admission::Duplicate => {
                tracing::info!(key = %key, "duplicate delivery acknowledged");
                return Ok(ACK_DUPLICATE);
            }
            Admission::Stale => return Ok(REJECT_STALE),
        }
    }

    let headers_json = ledger::headers_to_json(headers);
    let (delivery_id, inserted) = {
        let conn = state.db.get()?;
        ledger::record(
            &conn,
            &NewDelivery {
                provider,
                external_event_id: delivery.event_id,
                event_type: delivery.event_type,
                raw_body: body,
                headers: &headers_json,
                trust: delivery.trust,
            },
        )?
    };
    if !inserted {
        // Replay guard missed (e.g. dedup records expired) but the ledger
        // still knows this event.
        return Ok(ACK_DUPLICATE);
    }

    let entry = {
        let conn = state.db.get()?;
        ledger::get(&conn, &delivery_id)?
            .ok_or_else(|| AppError::Internal("delivery missing after insert".into()))?
    };

    match process_delivery(state, &entry).await {
        Ok(outcome) => {
            let conn = state.db.get()?;
            ledger::mark_processed(&conn, &delivery_id)?;
            tracing::info!(delivery_id = %delivery_id, ?outcome, "delivery processed");
            Ok(ACK)
        }
        Err(e) => {
            tracing::error!(delivery_id = %delivery_id, error = %e, "delivery processing failed");
            let conn = state.db.get()?;
            ledger::mark_failed(&conn, &delivery_id)?;
            retry::schedule(&conn, &state.retry, &delivery_id, &e.to_string())?;
            Ok(PROCESSING_FAILED)
        }
    }
}

/// Parse and apply a ledger entry's stored payload. Shared by the live
/// path, the retry worker, and admin reprocessing.
pub async fn process_delivery(
    state: &AppState,
    entry: &DeliveryLedgerEntry,
) -> Result<ProcessOutcome> {
    let parsed = match entry.provider {
        Provider::Payment => payment::parse_event(&entry.raw_body)?,
        Provider::Marketplace => marketplace::parse_event(&entry.raw_body)?,
    };

    let event = match parsed {
        ParsedEvent::Ready(event) => event,
        ParsedEvent::NeedsLookup {
            payment_id,
            event_type,
        } => resolve_payment(state, &entry.external_event_id, &payment_id, &event_type).await?,
        ParsedEvent::Ignored => {
            tracing::info!(delivery_id = %entry.id, "event not relevant to order state");
            return Ok(ProcessOutcome::NoOp);
        }
    };

    let conn = state.db.get()?;
    processor::apply_event(&conn, &event, &state.hooks)
}

/// Fetch full payment details for a bare payment notification.
async fn resolve_payment(
    state: &AppState,
    external_event_id: &str,
    payment_id: &str,
    event_type: &str,
) -> Result<NormalizedEvent> {
    let api = state
        .payment_api
        .as_ref()
        .ok_or_else(|| AppError::Internal("payment API not configured".into()))?;

    let details = api.get_payment(payment_id).await?;
    let status = details
        .status
        .as_deref()
        .and_then(ProviderStatus::from_str)
        .ok_or_else(|| {
            AppError::Upstream(format!("payment {payment_id} has unrecognized status"))
        })?;

    Ok(NormalizedEvent {
        provider: Provider::Payment,
        external_event_id: external_event_id.to_string(),
        event_type: event_type.to_string(),
        status,
        external_reference: details.external_reference,
        payment_id: Some(payment_id.to_string()),
    })
}

/// Record an unauthenticated delivery for forensic review, when enabled.
/// Always returns 401; capture failures only log.
pub fn reject_with_forensics(
    state: &AppState,
    provider: Provider,
    event_id: Option<&str>,
    event_type: &str,
    headers: &HeaderMap,
    body: &[u8],
    reason: &str,
) -> WebhookResult {
    tracing::warn!(
        provider = provider.as_str(),
        event_id = event_id.unwrap_or("<unknown>"),
        reason = %reason,
        "webhook rejected"
    );

    if state.forensic_capture {
        let fallback;
        let external_event_id = match event_id {
            Some(id) => id,
            None => {
                fallback = format!("unidentified-{}", uuid::Uuid::new_v4().as_simple());
                &fallback
            }
        };
        let headers_json = ledger::headers_to_json(headers);
        let result = state.db.get().map_err(AppError::from).and_then(|conn| {
            let (id, inserted) = ledger::record(
                &conn,
                &NewDelivery {
                    provider,
                    external_event_id,
                    event_type,
                    raw_body: body,
                    headers: &headers_json,
                    trust: TrustLevel::Forensic,
                },
            )?;
            if inserted {
                ledger::mark_failed(&conn, &id)?;
            } else {
                // An unauthenticated request reusing a recorded event id
                // must never touch the legitimate row
                tracing::warn!(
                    delivery_id = %id,
                    "forensic capture matched an existing delivery, leaving it untouched"
                );
            }
            Ok(())
        });
        if let Err(e) = result {
            tracing::error!(error = %e, "forensic capture failed");
        }
    }

    REJECT_UNAUTHORIZED
}
