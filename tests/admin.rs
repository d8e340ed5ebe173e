//! Admin diagnostics endpoint tests: ledger inspection and manual
//! reprocessing.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;

use common::*;
use shophooks::ledger;

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn record_failed_delivery(state: &AppState, event_id: &str, body: &[u8]) -> String {
    let conn = state.db.get().unwrap();
    let (id, _) = ledger::record(
        &conn,
        &NewDelivery {
            provider: Provider::Payment,
            external_event_id: event_id,
            event_type: "payment.updated",
            raw_body: body,
            headers: r#"{"content-type": "application/json"}"#,
            trust: TrustLevel::Signature,
        },
    )
    .unwrap();
    ledger::mark_failed(&conn, &id).unwrap();
    id
}

#[tokio::test]
async fn test_list_deliveries_with_filters() {
    let (state, _dir) = create_test_app_state();
    record_failed_delivery(&state, "pay_1", b"{}");
    {
        let conn = state.db.get().unwrap();
        ledger::record(
            &conn,
            &NewDelivery {
                provider: Provider::Marketplace,
                external_event_id: "evt_1",
                event_type: "order/paid",
                raw_body: b"{}",
                headers: "{}",
                trust: TrustLevel::Signature,
            },
        )
        .unwrap();
    }

    let app = admin_app(state.clone());

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/admin/deliveries")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let all = json_body(response).await;
    assert_eq!(all.as_array().unwrap().len(), 2);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/admin/deliveries?provider=payment&status=failed")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let filtered = json_body(response).await;
    let filtered = filtered.as_array().unwrap();
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0]["external_event_id"], "pay_1");
    assert_eq!(filtered[0]["status"], "failed");

    let response = app
        .oneshot(
            Request::builder()
                .uri("/admin/deliveries?provider=carrier-pigeon")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_delivery_detail() {
    let (state, _dir) = create_test_app_state();
    let id = record_failed_delivery(&state, "pay_1", br#"{"data": {"id": "pay_1"}}"#);
    {
        let conn = state.db.get().unwrap();
        shophooks::retry::schedule(&conn, &state.retry, &id, "boom").unwrap();
    }

    let response = admin_app(state.clone())
        .oneshot(
            Request::builder()
                .uri(format!("/admin/deliveries/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let detail = json_body(response).await;
    assert_eq!(detail["id"], id.as_str());
    assert_eq!(detail["body"], r#"{"data": {"id": "pay_1"}}"#);
    assert_eq!(detail["headers"]["content-type"], "application/json");
    assert_eq!(detail["retry"]["attempt_count"], 1);
    assert_eq!(detail["retry"]["last_error"], "boom");
}

#[tokio::test]
async fn test_get_unknown_delivery_is_404() {
    let (state, _dir) = create_test_app_state();

    let response = admin_app(state.clone())
        .oneshot(
            Request::builder()
                .uri("/admin/deliveries/sh_del_doesnotexist")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_reprocess_applies_stored_event_and_clears_retry() {
    let (state, _dir) = create_test_app_state();
    {
        let conn = state.db.get().unwrap();
        create_test_order(&conn, "ORDER-123");
    }

    let body = serde_json::to_vec(&serde_json::json!({
        "action": "payment.updated",
        "data": {"id": "pay_1", "status": "approved", "external_reference": "ORDER-123"}
    }))
    .unwrap();
    let id = record_failed_delivery(&state, "pay_1", &body);
    {
        let conn = state.db.get().unwrap();
        shophooks::retry::schedule(&conn, &state.retry, &id, "boom").unwrap();
    }

    let response = admin_app(state.clone())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/admin/deliveries/{id}/reprocess"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let result = json_body(response).await;
    assert_eq!(result["outcome"], "applied");
    assert_eq!(result["status"], "processed");

    let conn = state.db.get().unwrap();
    let order = queries::get_order_by_reference(&conn, "ORDER-123")
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::Paid);

    let entry = ledger::get(&conn, &id).unwrap().unwrap();
    assert_eq!(entry.status, DeliveryStatus::Processed);
    assert!(queries::get_retry_by_delivery(&conn, &id).unwrap().is_none());
}
