pub mod common;
pub mod marketplace;
pub mod payment;

pub use common::{process_delivery, WebhookResult};

use axum::routing::post;
use axum::Router;

use crate::db::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/webhooks/payment", post(payment::payment_webhook))
        .route("/webhooks/marketplace", post(marketplace::marketplace_webhook))
}
