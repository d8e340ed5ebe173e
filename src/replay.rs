//! Replay protection: staleness window plus two-tier duplicate detection.
//!
//! Tier one is an in-process TTL cache (fast path, lost on restart). Tier
//! two is the durable `replay_records` table. A durable-tier write failure
//! is logged and the delivery admitted: availability over strict dedup,
//! since the ledger's uniqueness constraint still prevents double
//! processing downstream.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rusqlite::Connection;

use crate::db::queries;
use crate::util::now;

/// Tolerated clock skew for timestamps from the future, in seconds.
const FUTURE_SKEW_SECS: i64 = 60;

/// Keyed presence cache with per-entry TTL. The seam exists so the fast
/// dedup tier can move to a shared store without touching the guard.
pub trait KeyedTtlCache: Send + Sync {
    /// Record `key` if absent. Returns false if a live entry already exists.
    fn put_if_absent(&self, key: &str, ttl: Duration) -> bool;
    fn purge_expired(&self);
}

/// Process-local cache tier.
#[derive(Default)]
pub struct MemoryTtlCache {
    entries: Mutex<HashMap<String, Instant>>,
}

impl KeyedTtlCache for MemoryTtlCache {
    fn put_if_absent(&self, key: &str, ttl: Duration) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        if let Some(expires) = entries.get(key) {
            if *expires > now {
                return false;
            }
        }
        entries.insert(key.to_string(), now + ttl);
        true
    }

    fn purge_expired(&self) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        entries.retain(|_, expires| *expires > now);
    }
}

/// Verdict on a delivery's timestamp and idempotency key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// First sighting inside the window; proceed.
    Fresh,
    /// Seen before. Acknowledge without reprocessing.
    Duplicate,
    /// Timestamp outside the acceptance window (or unparseable).
    Stale,
}

#[derive(Clone)]
pub struct ReplayGuard {
    cache: Arc<dyn KeyedTtlCache>,
    window_secs: i64,
}

impl ReplayGuard {
    pub fn new(cache: Arc<dyn KeyedTtlCache>, window_secs: i64) -> Self {
        Self { cache, window_secs }
    }

    /// Decide admission for a delivery.
    ///
    /// `ts_token` is the provider's timestamp (unix seconds or millis);
    /// schemes without one skip the staleness check and rely on dedup
    /// alone. `key` is the idempotency key (`provider:external_event_id`).
    pub fn admit(&self, conn: &Connection, key: &str, ts_token: Option<&str>) -> Admission {
        if let Some(token) = ts_token {
            let ts = match parse_ts_token(token) {
                Some(ts) => ts,
                None => {
                    tracing::warn!(key = %key, "unparseable timestamp token");
                    return Admission::Stale;
                }
            };
            let age = now() - ts;
            if age > self.window_secs || age < -FUTURE_SKEW_SECS {
                tracing::warn!(key = %key, age_secs = age, "timestamp outside acceptance window");
                return Admission::Stale;
            }
        }

        let ttl = Duration::from_secs(self.window_secs.max(0) as u64);
        if !self.cache.put_if_absent(key, ttl) {
            return Admission::Duplicate;
        }

        match queries::try_record_replay(conn, key, self.window_secs) {
            Ok(true) => Admission::Fresh,
            Ok(false) => Admission::Duplicate,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "durable dedup write failed; admitting");
                Admission::Fresh
            }
        }
    }

    /// Drop expired entries from both tiers. Failures are the caller's to
    /// swallow; this is hygiene, not correctness.
    pub fn purge_expired(&self, conn: &Connection) -> crate::error::Result<usize> {
        self.cache.purge_expired();
        queries::purge_expired_replay_records(conn)
    }
}

/// Providers emit unix timestamps in seconds or milliseconds; anything
/// above 100_000_000_000 can only be millis.
fn parse_ts_token(token: &str) -> Option<i64> {
    let raw: i64 = token.trim().parse().ok()?;
    if raw > 100_000_000_000 {
        Some(raw / 1000)
    } else {
        Some(raw)
    }
}
