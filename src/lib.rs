//! Shophooks: inbound webhook trust and idempotency pipeline for the
//! storefront. Authenticates provider notifications, guards against
//! replays, records every accepted delivery on a durable ledger, and
//! drives order status transitions from the recorded events.

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod id;
pub mod ledger;
pub mod models;
pub mod processor;
pub mod providers;
pub mod rate_limit;
pub mod replay;
pub mod retry;
pub mod signature;
pub mod trust;
pub mod util;
