//! Test utilities and fixtures for shophooks integration tests

#![allow(dead_code)]

use std::sync::Arc;

use axum::routing::post;
use axum::Router;
use hmac::{Hmac, Mac};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use sha2::Sha256;
use tempfile::TempDir;

pub use shophooks::db::{init_db, queries, AppState, ProviderSecrets};
pub use shophooks::handlers;
pub use shophooks::models::*;
pub use shophooks::processor::{TransitionHook, TransitionLogger};
pub use shophooks::replay::{MemoryTtlCache, ReplayGuard};
pub use shophooks::trust::IpAllowlist;

pub const PAYMENT_SECRET: &str = "whsec_payment_test";
pub const MARKETPLACE_SECRET: &str = "whsec_marketplace_test";
pub const TRUSTED_IP: &str = "203.0.113.10";

/// Create an AppState backed by a temp-file database. The TempDir must
/// outlive the state: in-memory SQLite gives each pooled connection its
/// own database.
pub fn create_test_app_state() -> (AppState, TempDir) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = dir.path().join("shophooks-test.db");

    let manager = SqliteConnectionManager::file(&db_path).with_init(|conn| {
        conn.execute_batch("PRAGMA busy_timeout = 5000; PRAGMA foreign_keys = ON;")
    });
    let pool = Pool::builder().max_size(4).build(manager).unwrap();
    {
        let conn = pool.get().unwrap();
        init_db(&conn).unwrap();
    }

    let hooks: Vec<Box<dyn TransitionHook>> = vec![Box::new(TransitionLogger)];

    let state = AppState {
        db: pool,
        secrets: ProviderSecrets {
            payment: PAYMENT_SECRET.to_string(),
            marketplace: MARKETPLACE_SECRET.to_string(),
        },
        allowlist: Arc::new(IpAllowlist::new(vec![TRUSTED_IP.parse().unwrap()])),
        replay: ReplayGuard::new(Arc::new(MemoryTtlCache::default()), 300),
        payment_api: None,
        forensic_capture: false,
        dev_mode: false,
        retry: shophooks::config::RetryPolicy::default(),
        hooks: Arc::new(hooks),
    };

    (state, dir)
}

/// Router with both webhook endpoints.
pub fn webhook_app(state: AppState) -> Router {
    Router::new()
        .route(
            "/webhooks/payment",
            post(handlers::webhooks::payment::payment_webhook),
        )
        .route(
            "/webhooks/marketplace",
            post(handlers::webhooks::marketplace::marketplace_webhook),
        )
        .with_state(state)
}

/// Admin router without the rate limit layer (no peer IP under oneshot).
pub fn admin_app(state: AppState) -> Router {
    handlers::admin::router().with_state(state)
}

pub fn now() -> i64 {
    shophooks::util::now()
}

/// Seed an order in pending status, returning it.
pub fn create_test_order(conn: &Connection, reference: &str) -> Order {
    queries::create_order(
        conn,
        &CreateOrder {
            external_reference: reference.to_string(),
            external_order_id: None,
        },
    )
    .expect("Failed to create test order")
}

fn hmac_hex(secret: &str, message: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

/// Compute the payment provider's `x-signature` header value for an
/// event id and timestamp (the `id=...;ts=...` template).
pub fn payment_signature_header(secret: &str, event_id: &str, ts: i64) -> String {
    let canonical = format!("id={event_id};ts={ts}");
    format!("ts={ts},v1={}", hmac_hex(secret, canonical.as_bytes()))
}

/// Compute the marketplace's raw-body `x-webhook-signature` digest.
pub fn marketplace_signature(secret: &str, body: &[u8]) -> String {
    hmac_hex(secret, body)
}
