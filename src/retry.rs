//! Retry scheduling for deliveries that failed processing.
//!
//! Failures here are transient by assumption (database contention, the
//! payment API being down); the raw body is already on the ledger, so a
//! retry replays processing from the stored bytes rather than waiting for
//! the provider to redeliver. Descriptors that exhaust their attempts
//! stay on the queue as `exhausted` for manual intervention.

use std::time::Duration;

use crate::config::RetryPolicy;
use crate::db::{queries, AppState};
use crate::error::Result;
use crate::handlers::webhooks::process_delivery;
use crate::models::{RetryDescriptor, RetryState};

const WORKER_INTERVAL: Duration = Duration::from_secs(30);
const WORKER_BATCH: i64 = 20;

/// Record (or bump) the retry descriptor for a failed delivery.
pub fn schedule(
    conn: &rusqlite::Connection,
    policy: &RetryPolicy,
    delivery_id: &str,
    error: &str,
) -> Result<RetryDescriptor> {
    let descriptor = queries::schedule_retry(conn, policy, delivery_id, error)?;
    match descriptor.state {
        RetryState::Scheduled => tracing::info!(
            delivery_id = %delivery_id,
            attempt = descriptor.attempt_count,
            next_attempt_at = descriptor.next_attempt_at,
            "retry scheduled"
        ),
        RetryState::Exhausted => tracing::error!(
            delivery_id = %delivery_id,
            attempts = descriptor.attempt_count,
            "retry attempts exhausted, manual intervention required"
        ),
    }
    Ok(descriptor)
}

/// Background worker that re-runs processing for due retries.
pub fn spawn_retry_worker(state: AppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(WORKER_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = run_due_retries(&state).await {
                tracing::error!("retry worker pass failed: {}", e);
            }
        }
    })
}

async fn run_due_retries(state: &AppState) -> Result<()> {
    let due = {
        let conn = state.db.get()?;
        queries::due_retries(&conn, WORKER_BATCH)?
    };

    for descriptor in due {
        let entry = {
            let conn = state.db.get()?;
            queries::get_delivery_by_id(&conn, &descriptor.delivery_id)?
        };
        let entry = match entry {
            Some(entry) => entry,
            None => {
                tracing::warn!(delivery_id = %descriptor.delivery_id, "retry points at missing delivery");
                let conn = state.db.get()?;
                queries::complete_retry(&conn, &descriptor.delivery_id)?;
                continue;
            }
        };

        tracing::info!(
            delivery_id = %entry.id,
            attempt = descriptor.attempt_count,
            "retrying delivery"
        );

        match process_delivery(state, &entry).await {
            Ok(outcome) => {
                let conn = state.db.get()?;
                crate::ledger::mark_processed(&conn, &entry.id)?;
                queries::complete_retry(&conn, &entry.id)?;
                tracing::info!(delivery_id = %entry.id, ?outcome, "retry succeeded");
            }
            Err(e) => {
                let conn = state.db.get()?;
                crate::ledger::mark_failed(&conn, &entry.id)?;
                schedule(&conn, &state.retry, &entry.id, &e.to_string())?;
            }
        }
    }

    Ok(())
}
