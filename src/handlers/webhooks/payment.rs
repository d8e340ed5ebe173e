//! Payment provider webhook: canonical-string signature scheme.
//!
//! Notifications arrive as `POST /webhooks/payment?data.id=...` with an
//! `x-signature: ts=...,v1=...` header. Bodies usually carry only the
//! payment id; full details are fetched from the payment API after
//! authentication.

use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::HeaderMap;

use crate::db::AppState;
use crate::error::{AppError, Result};
use crate::handlers::webhooks::common::{
    self, AuthenticatedDelivery, WebhookResult, PROCESSING_FAILED, REJECT_PAYLOAD,
};
use crate::models::{
    id_value_to_string, NormalizedEvent, ParsedEvent, PaymentWebhookBody, Provider,
    ProviderStatus, TrustLevel,
};
use crate::signature::{extract_event_id, verify_payment_signature};
use crate::util::client_ip;

pub async fn payment_webhook(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> WebhookResult {
    let secret = &state.secrets.payment;

    let (event_id, ts_token, trust) = if secret.is_empty() {
        if !state.dev_mode {
            tracing::error!("payment webhook secret not configured");
            return common::reject_with_forensics(
                &state,
                Provider::Payment,
                None,
                "payment",
                &headers,
                &body,
                "secret not configured",
            );
        }
        tracing::warn!("accepting unverified payment webhook (dev mode, no secret)");
        match extract_event_id(&query, &body) {
            Some(id) => (id, None, TrustLevel::Unverified),
            None => return REJECT_PAYLOAD,
        }
    } else {
        let check = verify_payment_signature(secret, &headers, &query, &body);
        if check.valid {
            let event_id = match check.event_id {
                Some(id) => id,
                None => return REJECT_PAYLOAD,
            };
            (event_id, check.ts_token, TrustLevel::Signature)
        } else {
            // Signature inconclusive: fall back to the source-IP
            // allowlist, at a degraded trust level.
            let reason = check.reason.unwrap_or("signature mismatch");
            let event_id = check
                .event_id
                .or_else(|| extract_event_id(&query, &body));
            if state.allowlist.is_trusted(client_ip(&headers)) {
                match event_id {
                    Some(id) => {
                        tracing::warn!(
                            event_id = %id,
                            reason = %reason,
                            "payment webhook admitted via IP allowlist"
                        );
                        (id, check.ts_token, TrustLevel::IpAllowlist)
                    }
                    None => return REJECT_PAYLOAD,
                }
            } else {
                return common::reject_with_forensics(
                    &state,
                    Provider::Payment,
                    event_id.as_deref(),
                    "payment",
                    &headers,
                    &body,
                    reason,
                );
            }
        }
    };

    let parsed = match parse_event(&body) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::warn!(event_id = %event_id, error = %e, "unparseable payment payload");
            return REJECT_PAYLOAD;
        }
    };
    let event_type = match &parsed {
        ParsedEvent::Ready(event) => event.event_type.clone(),
        ParsedEvent::NeedsLookup { event_type, .. } => event_type.clone(),
        ParsedEvent::Ignored => "payment.ignored".to_string(),
    };

    let delivery = AuthenticatedDelivery {
        event_id: &event_id,
        ts_token: ts_token.as_deref(),
        trust,
        event_type: &event_type,
    };
    match common::ingest(&state, Provider::Payment, &headers, &body, delivery).await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(event_id = %event_id, error = %e, "payment webhook pipeline error");
            PROCESSING_FAILED
        }
    }
}

/// Parse a payment notification body.
///
/// Bodies with an inline status and reference become `Ready`; bodies with
/// only a payment id become `NeedsLookup`; non-payment topics are
/// `Ignored`.
pub fn parse_event(body: &[u8]) -> Result<ParsedEvent> {
    let parsed: PaymentWebhookBody = serde_json::from_slice(body)?;

    let event_type = parsed
        .action
        .clone()
        .or(parsed.event_type.clone())
        .unwrap_or_else(|| "payment".to_string());

    let data = match parsed.data {
        Some(data) => data,
        None => {
            // Some topics (plan updates, test pings) carry no data object
            return Ok(ParsedEvent::Ignored);
        }
    };

    let payment_id = data
        .id
        .as_ref()
        .and_then(id_value_to_string)
        .or_else(|| parsed.id.as_ref().and_then(id_value_to_string))
        .ok_or_else(|| AppError::BadRequest("payment event missing id".to_string()))?;

    match data.status.as_deref() {
        Some(raw) => match ProviderStatus::from_str(raw) {
            Some(status) => Ok(ParsedEvent::Ready(NormalizedEvent {
                provider: Provider::Payment,
                external_event_id: payment_id.clone(),
                event_type,
                status,
                external_reference: data.external_reference,
                payment_id: Some(payment_id),
            })),
            None => {
                tracing::warn!(payment_id = %payment_id, status = %raw, "unrecognized payment status");
                Ok(ParsedEvent::Ignored)
            }
        },
        // Bare notification: id only, details live behind the API
        None => Ok(ParsedEvent::NeedsLookup {
            payment_id,
            event_type,
        }),
    }
}
