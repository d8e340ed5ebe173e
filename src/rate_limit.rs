//! Rate limiting for the admin diagnostics surface.
//!
//! Limits are applied per peer IP. Webhook ingestion endpoints are not
//! rate limited here: providers batch redeliveries, and throttling them
//! only converts a burst into a redelivery storm.
//!
//! Configure via `ADMIN_RATE_LIMIT_RPM` (default: 60).

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::GovernorLayer;

use crate::db::AppState;

pub fn admin_rpm_from_env() -> u32 {
    std::env::var("ADMIN_RATE_LIMIT_RPM")
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|rpm| *rpm > 0)
        .unwrap_or(60)
}

/// Wrap a router with a per-IP rate limit of `requests_per_minute`.
pub fn with_rate_limit(router: Router<AppState>, requests_per_minute: u32) -> Router<AppState> {
    let period_secs = (60 / requests_per_minute as u64).max(1);
    let config = GovernorConfigBuilder::default()
        .period(Duration::from_secs(period_secs))
        .burst_size(requests_per_minute)
        .finish()
        .expect("Failed to build rate limiter config");

    router.layer(GovernorLayer::new(Arc::new(config)))
}
