//! Admin diagnostics surface: inspect the delivery ledger and re-run
//! processing for a stored delivery.
//!
//! Deliberately read-mostly. The only mutation is reprocessing, which
//! runs the exact same pipeline as a live delivery; there is no endpoint
//! that edits order state directly.

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::db::queries::{self, DeliveryFilter};
use crate::db::AppState;
use crate::error::{AppError, Result};
use crate::handlers::webhooks::process_delivery;
use crate::id::is_valid_prefixed_id;
use crate::ledger;
use crate::models::{
    DeliveryLedgerEntry, DeliveryStatus, Provider, RetryDescriptor, TrustLevel,
};
use crate::processor::ProcessOutcome;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/admin/deliveries", get(list_deliveries))
        .route("/admin/deliveries/{id}", get(get_delivery))
        .route("/admin/deliveries/{id}/reprocess", post(reprocess_delivery))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    provider: Option<String>,
    status: Option<String>,
    since: Option<i64>,
    until: Option<i64>,
    limit: Option<i64>,
}

#[derive(Serialize)]
struct DeliverySummary {
    id: String,
    provider: Provider,
    external_event_id: String,
    event_type: String,
    trust: TrustLevel,
    status: DeliveryStatus,
    created_at: i64,
    processed_at: Option<i64>,
}

impl From<&DeliveryLedgerEntry> for DeliverySummary {
    fn from(entry: &DeliveryLedgerEntry) -> Self {
        Self {
            id: entry.id.clone(),
            provider: entry.provider,
            external_event_id: entry.external_event_id.clone(),
            event_type: entry.event_type.clone(),
            trust: entry.trust,
            status: entry.status,
            created_at: entry.created_at,
            processed_at: entry.processed_at,
        }
    }
}

#[derive(Serialize)]
struct DeliveryDetail {
    #[serde(flatten)]
    summary: DeliverySummary,
    headers: serde_json::Value,
    /// Stored raw body, lossily decoded for display.
    body: String,
    retry: Option<RetryDescriptor>,
}

async fn list_deliveries(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<DeliverySummary>>> {
    let provider = match params.provider.as_deref() {
        Some(raw) => Some(
            Provider::from_str(raw)
                .ok_or_else(|| AppError::BadRequest(format!("unknown provider: {raw}")))?,
        ),
        None => None,
    };
    let status = match params.status.as_deref() {
        Some(raw) => Some(
            DeliveryStatus::from_str(raw)
                .ok_or_else(|| AppError::BadRequest(format!("unknown status: {raw}")))?,
        ),
        None => None,
    };

    let filter = DeliveryFilter {
        provider,
        status,
        since: params.since,
        until: params.until,
        limit: params.limit.unwrap_or(100).clamp(1, 500),
    };

    let conn = state.db.get()?;
    let entries = queries::list_deliveries(&conn, &filter)?;
    Ok(Json(entries.iter().map(DeliverySummary::from).collect()))
}

async fn get_delivery(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeliveryDetail>> {
    if !is_valid_prefixed_id(&id) {
        return Err(AppError::NotFound(format!("delivery {id}")));
    }
    let conn = state.db.get()?;
    let entry = ledger::get(&conn, &id)?
        .ok_or_else(|| AppError::NotFound(format!("delivery {id}")))?;
    let retry = queries::get_retry_by_delivery(&conn, &id)?;

    Ok(Json(DeliveryDetail {
        summary: DeliverySummary::from(&entry),
        headers: serde_json::from_str(&entry.headers).unwrap_or(serde_json::Value::Null),
        body: String::from_utf8_lossy(&entry.raw_body).into_owned(),
        retry,
    }))
}

#[derive(Serialize)]
struct ReprocessResponse {
    delivery_id: String,
    outcome: &'static str,
    status: DeliveryStatus,
}

fn outcome_label(outcome: ProcessOutcome) -> &'static str {
    match outcome {
        ProcessOutcome::Applied(_) => "applied",
        ProcessOutcome::NoOp => "no_op",
        ProcessOutcome::OrderNotFound => "order_not_found",
        ProcessOutcome::Anomaly => "anomaly",
    }
}

async fn reprocess_delivery(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ReprocessResponse>> {
    if !is_valid_prefixed_id(&id) {
        return Err(AppError::NotFound(format!("delivery {id}")));
    }
    let entry = {
        let conn = state.db.get()?;
        ledger::get(&conn, &id)?
            .ok_or_else(|| AppError::NotFound(format!("delivery {id}")))?
    };

    tracing::info!(delivery_id = %id, "manual reprocess requested");

    match process_delivery(&state, &entry).await {
        Ok(outcome) => {
            let conn = state.db.get()?;
            ledger::mark_processed(&conn, &id)?;
            queries::complete_retry(&conn, &id)?;
            Ok(Json(ReprocessResponse {
                delivery_id: id,
                outcome: outcome_label(outcome),
                status: DeliveryStatus::Processed,
            }))
        }
        Err(e) => {
            let conn = state.db.get()?;
            ledger::mark_failed(&conn, &id)?;
            crate::retry::schedule(&conn, &state.retry, &id, &e.to_string())?;
            Err(e)
        }
    }
}
