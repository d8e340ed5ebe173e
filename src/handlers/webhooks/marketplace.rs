//! Marketplace webhook: raw-body HMAC scheme.
//!
//! Notifications arrive as `POST /webhooks/marketplace` with an
//! `x-webhook-signature` hex digest over the exact body bytes, and an
//! optional `x-webhook-timestamp`. Events are self-contained; no API
//! lookup is needed.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;

use crate::db::AppState;
use crate::error::{AppError, Result};
use crate::handlers::webhooks::common::{
    self, AuthenticatedDelivery, WebhookResult, PROCESSING_FAILED, REJECT_PAYLOAD,
};
use crate::models::{
    id_value_to_string, MarketplaceWebhookBody, NormalizedEvent, ParsedEvent, Provider,
    ProviderStatus, TrustLevel,
};
use crate::signature::{verify_body_signature, BODY_TIMESTAMP_HEADER};
use crate::util::client_ip;

pub async fn marketplace_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> WebhookResult {
    let secret = &state.secrets.marketplace;

    let trust = if secret.is_empty() {
        if !state.dev_mode {
            tracing::error!("marketplace webhook secret not configured");
            return common::reject_with_forensics(
                &state,
                Provider::Marketplace,
                None,
                "marketplace",
                &headers,
                &body,
                "secret not configured",
            );
        }
        tracing::warn!("accepting unverified marketplace webhook (dev mode, no secret)");
        TrustLevel::Unverified
    } else if verify_body_signature(secret, &headers, &body) {
        TrustLevel::Signature
    } else if state.allowlist.is_trusted(client_ip(&headers)) {
        tracing::warn!("marketplace webhook admitted via IP allowlist");
        TrustLevel::IpAllowlist
    } else {
        return common::reject_with_forensics(
            &state,
            Provider::Marketplace,
            event_id_hint(&body).as_deref(),
            "marketplace",
            &headers,
            &body,
            "signature mismatch",
        );
    };

    let parsed = match parse_event(&body) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::warn!(error = %e, "unparseable marketplace payload");
            return REJECT_PAYLOAD;
        }
    };
    let (event_id, event_type) = match &parsed {
        ParsedEvent::Ready(event) => (event.external_event_id.clone(), event.event_type.clone()),
        ParsedEvent::NeedsLookup { .. } => unreachable!("marketplace events are self-contained"),
        ParsedEvent::Ignored => match event_id_hint(&body) {
            Some(id) => (id, "marketplace.ignored".to_string()),
            None => return REJECT_PAYLOAD,
        },
    };

    let ts_token = headers
        .get(BODY_TIMESTAMP_HEADER)
        .and_then(|v| v.to_str().ok());

    let delivery = AuthenticatedDelivery {
        event_id: &event_id,
        ts_token,
        trust,
        event_type: &event_type,
    };
    match common::ingest(&state, Provider::Marketplace, &headers, &body, delivery).await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(event_id = %event_id, error = %e, "marketplace webhook pipeline error");
            PROCESSING_FAILED
        }
    }
}

fn event_id_hint(body: &[u8]) -> Option<String> {
    let parsed: serde_json::Value = serde_json::from_slice(body).ok()?;
    parsed.get("id").and_then(id_value_to_string)
}

/// Parse a marketplace notification body. The order status comes from the
/// order object when present, otherwise from the event name suffix
/// (`order/paid`, `order/cancelled`, ...).
pub fn parse_event(body: &[u8]) -> Result<ParsedEvent> {
    let parsed: MarketplaceWebhookBody = serde_json::from_slice(body)?;

    let event_id = parsed
        .id
        .as_ref()
        .and_then(id_value_to_string)
        .ok_or_else(|| AppError::BadRequest("marketplace event missing id".to_string()))?;

    let order = parsed.order.as_ref();
    let status = order
        .and_then(|o| o.status.as_deref())
        .and_then(ProviderStatus::from_str)
        .or_else(|| {
            parsed
                .event
                .rsplit_once('/')
                .and_then(|(_, suffix)| ProviderStatus::from_str(suffix))
        });
    let status = match status {
        Some(status) => status,
        None => {
            tracing::info!(event = %parsed.event, "marketplace event carries no known status");
            return Ok(ParsedEvent::Ignored);
        }
    };

    Ok(ParsedEvent::Ready(NormalizedEvent {
        provider: Provider::Marketplace,
        external_event_id: event_id,
        event_type: parsed.event.clone(),
        status,
        external_reference: order.and_then(|o| o.reference.clone()),
        payment_id: None,
    }))
}
