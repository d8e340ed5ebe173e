//! Webhook signature verification.
//!
//! Two schemes are in play. The payment provider signs a canonical string
//! assembled from the event id, an optional request id, and a timestamp
//! token; providers have shipped several template revisions, so every
//! known template is tried before declaring a mismatch. The marketplace
//! signs the raw body directly.
//!
//! All comparisons are constant-time. Secrets and full digests are never
//! logged; debug lines carry an 8-char digest prefix at most.

use std::collections::HashMap;

use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-signature";
pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const BODY_SIGNATURE_HEADER: &str = "x-webhook-signature";
pub const BODY_TIMESTAMP_HEADER: &str = "x-webhook-timestamp";

/// Outcome of verifying a payment webhook's canonical-string signature.
#[derive(Debug)]
pub struct SignatureCheck {
    pub valid: bool,
    /// Event id the signature was computed over, when one was found.
    pub event_id: Option<String>,
    /// Timestamp token from the signature header, for staleness checks.
    pub ts_token: Option<String>,
    /// Human-readable failure cause. `None` when valid.
    pub reason: Option<&'static str>,
}

impl SignatureCheck {
    fn fail(reason: &'static str) -> Self {
        Self {
            valid: false,
            event_id: None,
            ts_token: None,
            reason: Some(reason),
        }
    }
}

/// Parse a `ts=...,v1=...` signature header into its two parts.
pub fn parse_signature_header(raw: &str) -> Option<(String, String)> {
    let mut ts = None;
    let mut v1 = None;
    for part in raw.split(',') {
        let (key, value) = part.trim().split_once('=')?;
        match key.trim() {
            "ts" => ts = Some(value.trim().to_string()),
            "v1" => v1 = Some(value.trim().to_string()),
            _ => {}
        }
    }
    Some((ts?, v1?))
}

/// Find the event id the provider signed: query string first (`data.id`,
/// then `id`), then the same keys inside the JSON body.
pub fn extract_event_id(query: &HashMap<String, String>, body: &[u8]) -> Option<String> {
    if let Some(id) = query.get("data.id").or_else(|| query.get("id")) {
        if !id.is_empty() {
            return Some(id.clone());
        }
    }

    let parsed: serde_json::Value = serde_json::from_slice(body).ok()?;
    parsed
        .pointer("/data/id")
        .or_else(|| parsed.get("id"))
        .and_then(crate::models::id_value_to_string)
}

/// Every canonical-string template the payment provider has signed with.
/// Request-id variants only apply when the request carried that header.
pub fn canonical_candidates(event_id: &str, request_id: Option<&str>, ts: &str) -> Vec<String> {
    let mut candidates = Vec::with_capacity(6);
    if let Some(rid) = request_id {
        candidates.push(format!("id={event_id};request-id={rid};ts={ts}"));
        candidates.push(format!("data.id={event_id};request-id={rid};ts={ts}"));
        candidates.push(format!("id={event_id}&request-id={rid}&ts={ts}"));
    }
    candidates.push(format!("id={event_id};ts={ts}"));
    candidates.push(format!("data.id={event_id};ts={ts}"));
    candidates.push(format!("id={event_id}&ts={ts}"));
    candidates
}

fn hmac_hex(secret: &str, message: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

fn verify_candidate(secret: &str, message: &str, provided: &[u8]) -> bool {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(message.as_bytes());
    let computed = mac.finalize().into_bytes();
    computed.ct_eq(provided).into()
}

/// Verify a payment webhook signature against every canonical template.
///
/// Deterministic in (secret, headers, query, body); reads no clock and no
/// external state. Staleness of the timestamp token is the replay guard's
/// concern, not this function's.
pub fn verify_payment_signature(
    secret: &str,
    headers: &HeaderMap,
    query: &HashMap<String, String>,
    body: &[u8],
) -> SignatureCheck {
    let raw = match headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) {
        Some(raw) => raw,
        None => return SignatureCheck::fail("missing signature header"),
    };
    let (ts, v1) = match parse_signature_header(raw) {
        Some(parts) => parts,
        None => return SignatureCheck::fail("malformed signature header"),
    };
    let provided = match hex::decode(&v1) {
        Ok(bytes) => bytes,
        Err(_) => return SignatureCheck::fail("malformed signature header"),
    };

    let event_id = match extract_event_id(query, body) {
        Some(id) => id,
        None => return SignatureCheck::fail("no event id in request"),
    };
    let request_id = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok());

    for candidate in canonical_candidates(&event_id, request_id, &ts) {
        if verify_candidate(secret, &candidate, &provided) {
            return SignatureCheck {
                valid: true,
                event_id: Some(event_id),
                ts_token: Some(ts),
                reason: None,
            };
        }
    }

    tracing::debug!(
        event_id = %event_id,
        digest_prefix = &v1[..v1.len().min(8)],
        "signature matched no canonical template"
    );
    SignatureCheck {
        valid: false,
        event_id: Some(event_id),
        ts_token: Some(ts),
        reason: Some("signature mismatch"),
    }
}

/// Verify a raw-body HMAC signature (marketplace scheme). The header
/// carries the hex digest directly.
pub fn verify_body_signature(secret: &str, headers: &HeaderMap, body: &[u8]) -> bool {
    let provided = match headers
        .get(BODY_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| hex::decode(v).ok())
    {
        Some(bytes) => bytes,
        None => return false,
    };

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    let computed = mac.finalize().into_bytes();
    computed.ct_eq(&provided).into()
}

/// Sign a canonical string; exposed for fixtures and the demo seeder.
pub fn sign_canonical(secret: &str, canonical: &str) -> String {
    hmac_hex(secret, canonical.as_bytes())
}

/// Sign a raw body with the marketplace scheme.
pub fn sign_body(secret: &str, body: &[u8]) -> String {
    hmac_hex(secret, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const SECRET: &str = "whsec_test_secret";

    fn headers_with_signature(ts: &str, v1: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            SIGNATURE_HEADER,
            HeaderValue::from_str(&format!("ts={ts},v1={v1}")).unwrap(),
        );
        headers
    }

    #[test]
    fn test_parse_signature_header() {
        let (ts, v1) = parse_signature_header("ts=1700000000,v1=abcdef").unwrap();
        assert_eq!(ts, "1700000000");
        assert_eq!(v1, "abcdef");

        // Whitespace and extra fields are tolerated
        let (ts, v1) = parse_signature_header("ts=17, v1=ab, v2=zz").unwrap();
        assert_eq!(ts, "17");
        assert_eq!(v1, "ab");

        assert!(parse_signature_header("v1=abcdef").is_none());
        assert!(parse_signature_header("garbage").is_none());
    }

    #[test]
    fn test_extract_event_id_prefers_query() {
        let mut query = HashMap::new();
        query.insert("data.id".to_string(), "pay_9".to_string());
        let body = br#"{"data": {"id": "pay_other"}}"#;
        assert_eq!(extract_event_id(&query, body), Some("pay_9".to_string()));
    }

    #[test]
    fn test_extract_event_id_from_body() {
        let query = HashMap::new();
        assert_eq!(
            extract_event_id(&query, br#"{"data": {"id": 12345}}"#),
            Some("12345".to_string())
        );
        assert_eq!(
            extract_event_id(&query, br#"{"id": "evt_1"}"#),
            Some("evt_1".to_string())
        );
        assert_eq!(extract_event_id(&query, br#"{"other": true}"#), None);
        assert_eq!(extract_event_id(&query, b"not json"), None);
    }

    #[test]
    fn test_each_template_verifies() {
        let query: HashMap<String, String> =
            [("data.id".to_string(), "pay_1".to_string())].into();
        let body = b"{}";

        for canonical in canonical_candidates("pay_1", Some("req_7"), "1700000000") {
            let v1 = sign_canonical(SECRET, &canonical);
            let mut headers = headers_with_signature("1700000000", &v1);
            headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("req_7"));

            let check = verify_payment_signature(SECRET, &headers, &query, body);
            assert!(check.valid, "template failed: {canonical}");
            assert_eq!(check.event_id.as_deref(), Some("pay_1"));
            assert_eq!(check.ts_token.as_deref(), Some("1700000000"));
        }
    }

    #[test]
    fn test_verification_is_deterministic() {
        let query: HashMap<String, String> = [("id".to_string(), "pay_2".to_string())].into();
        let v1 = sign_canonical(SECRET, "id=pay_2;ts=1700000000");
        let headers = headers_with_signature("1700000000", &v1);

        for _ in 0..3 {
            assert!(verify_payment_signature(SECRET, &headers, &query, b"{}").valid);
        }
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let query: HashMap<String, String> = [("id".to_string(), "pay_2".to_string())].into();
        let v1 = sign_canonical("other_secret", "id=pay_2;ts=1700000000");
        let headers = headers_with_signature("1700000000", &v1);

        let check = verify_payment_signature(SECRET, &headers, &query, b"{}");
        assert!(!check.valid);
        assert_eq!(check.reason, Some("signature mismatch"));
    }

    #[test]
    fn test_missing_header_and_missing_id() {
        let query = HashMap::new();

        let check = verify_payment_signature(SECRET, &HeaderMap::new(), &query, b"{}");
        assert_eq!(check.reason, Some("missing signature header"));

        let headers = headers_with_signature("1700000000", "00ff");
        let check = verify_payment_signature(SECRET, &headers, &query, b"{}");
        assert_eq!(check.reason, Some("no event id in request"));
    }

    #[test]
    fn test_body_signature() {
        let body = br#"{"id": "evt_1", "event": "order/paid"}"#;
        let digest = sign_body(SECRET, body);

        let mut headers = HeaderMap::new();
        headers.insert(
            BODY_SIGNATURE_HEADER,
            HeaderValue::from_str(&digest).unwrap(),
        );
        assert!(verify_body_signature(SECRET, &headers, body));
        assert!(!verify_body_signature(SECRET, &headers, b"tampered"));
        assert!(!verify_body_signature("wrong", &headers, body));
        assert!(!verify_body_signature(SECRET, &HeaderMap::new(), body));
    }
}
