//! Applies normalized provider events to local order state.
//!
//! Transition rules: from `pending` any provider status applies; from a
//! terminal status only a reversal does (refunds and chargebacks land on
//! paid orders). Any other move off a terminal status — back to pending,
//! or a late `approved` arriving after a refund — is an anomaly: logged,
//! never written.

use rusqlite::Connection;

use crate::db::queries;
use crate::error::Result;
use crate::models::{NormalizedEvent, Order, OrderStatus, ProviderStatus};

/// What applying an event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Applied(OrderStatus),
    /// Event carried no state change (same status, informational type).
    NoOp,
    /// No local order matches the event's correlation key. Acknowledged
    /// so the provider stops redelivering; the ledger keeps the evidence.
    OrderNotFound,
    /// Transition refused by the state machine.
    Anomaly,
}

/// Post-transition side effect (stock release, customer notification).
/// Hook failures are logged and never unwind the transition.
pub trait TransitionHook: Send + Sync {
    fn name(&self) -> &'static str;
    fn after_transition(&self, order: &Order, event: &NormalizedEvent) -> Result<()>;
}

/// Default hook: structured log of every applied transition.
pub struct TransitionLogger;

impl TransitionHook for TransitionLogger {
    fn name(&self) -> &'static str {
        "transition-logger"
    }

    fn after_transition(&self, order: &Order, event: &NormalizedEvent) -> Result<()> {
        tracing::info!(
            order_id = %order.id,
            external_reference = %order.external_reference,
            status = order.status.as_str(),
            provider = event.provider.as_str(),
            event_type = %event.event_type,
            "order transition applied"
        );
        Ok(())
    }
}

/// Map a provider-reported status onto the local order status. `None`
/// means the status carries no order-state meaning.
fn target_status(status: ProviderStatus) -> Option<OrderStatus> {
    match status {
        ProviderStatus::Approved | ProviderStatus::Paid => Some(OrderStatus::Paid),
        ProviderStatus::Rejected => Some(OrderStatus::Rejected),
        ProviderStatus::Cancelled => Some(OrderStatus::Cancelled),
        ProviderStatus::Refunded => Some(OrderStatus::Refunded),
        ProviderStatus::ChargedBack => Some(OrderStatus::ChargedBack),
        ProviderStatus::Pending => Some(OrderStatus::Pending),
        ProviderStatus::Created => None,
    }
}

/// Apply one event. Idempotent: re-applying an already-applied event is a
/// no-op, and `paid_at` is only ever set by the first transition to paid.
pub fn apply_event(
    conn: &Connection,
    event: &NormalizedEvent,
    hooks: &[Box<dyn TransitionHook>],
) -> Result<ProcessOutcome> {
    let target = match target_status(event.status) {
        Some(target) => target,
        None => {
            tracing::info!(
                provider = event.provider.as_str(),
                event_type = %event.event_type,
                "informational event, no order-state effect"
            );
            return Ok(ProcessOutcome::NoOp);
        }
    };

    let reference = match event.external_reference.as_deref() {
        Some(reference) => reference,
        None => {
            tracing::warn!(
                provider = event.provider.as_str(),
                external_event_id = %event.external_event_id,
                "event carries no correlation key"
            );
            return Ok(ProcessOutcome::OrderNotFound);
        }
    };

    let order = match queries::get_order_by_reference(conn, reference)? {
        Some(order) => order,
        None => {
            tracing::warn!(
                external_reference = %reference,
                external_event_id = %event.external_event_id,
                "no local order for correlation key"
            );
            return Ok(ProcessOutcome::OrderNotFound);
        }
    };

    if order.status == target {
        tracing::debug!(order_id = %order.id, status = target.as_str(), "status unchanged");
        return Ok(ProcessOutcome::NoOp);
    }

    if order.status.is_terminal() && !target.is_reversal() {
        tracing::warn!(
            order_id = %order.id,
            current = order.status.as_str(),
            requested = target.as_str(),
            "anomalous transition refused"
        );
        return Ok(ProcessOutcome::Anomaly);
    }

    let affected = queries::transition_order(conn, &order.id, target, event.payment_id.as_deref())?;
    if affected == 0 {
        // Lost a race with a concurrent transition; the row is already
        // terminal. Treat like the anomaly path.
        tracing::warn!(order_id = %order.id, requested = target.as_str(), "transition raced away");
        return Ok(ProcessOutcome::Anomaly);
    }

    if let Some(updated) = queries::get_order_by_id(conn, &order.id)? {
        for hook in hooks {
            if let Err(e) = hook.after_transition(&updated, event) {
                tracing::error!(hook = hook.name(), order_id = %updated.id, error = %e, "transition hook failed");
            }
        }
    }

    Ok(ProcessOutcome::Applied(target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use crate::models::{CreateOrder, Provider};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        conn
    }

    fn seed_order(conn: &Connection) -> Order {
        queries::create_order(
            conn,
            &CreateOrder {
                external_reference: "ORDER-123".to_string(),
                external_order_id: None,
            },
        )
        .unwrap()
    }

    fn event(status: ProviderStatus) -> NormalizedEvent {
        NormalizedEvent {
            provider: Provider::Payment,
            external_event_id: "pay_1".to_string(),
            event_type: "payment.updated".to_string(),
            status,
            external_reference: Some("ORDER-123".to_string()),
            payment_id: Some("pay_1".to_string()),
        }
    }

    #[test]
    fn test_approved_marks_paid_and_sets_paid_at_once() {
        let conn = conn();
        let order = seed_order(&conn);

        let outcome = apply_event(&conn, &event(ProviderStatus::Approved), &[]).unwrap();
        assert_eq!(outcome, ProcessOutcome::Applied(OrderStatus::Paid));

        let paid = queries::get_order_by_id(&conn, &order.id).unwrap().unwrap();
        assert_eq!(paid.status, OrderStatus::Paid);
        assert_eq!(paid.payment_id.as_deref(), Some("pay_1"));
        let first_paid_at = paid.paid_at.unwrap();

        // Re-applying the same terminal event leaves paid_at untouched
        apply_event(&conn, &event(ProviderStatus::Approved), &[]).unwrap();
        let after = queries::get_order_by_id(&conn, &order.id).unwrap().unwrap();
        assert_eq!(after.paid_at, Some(first_paid_at));
    }

    #[test]
    fn test_reapply_same_status_is_noop() {
        let conn = conn();
        seed_order(&conn);

        apply_event(&conn, &event(ProviderStatus::Approved), &[]).unwrap();
        let outcome = apply_event(&conn, &event(ProviderStatus::Approved), &[]).unwrap();
        assert_eq!(outcome, ProcessOutcome::NoOp);
    }

    #[test]
    fn test_terminal_to_terminal_allowed() {
        let conn = conn();
        let order = seed_order(&conn);

        apply_event(&conn, &event(ProviderStatus::Approved), &[]).unwrap();
        let outcome = apply_event(&conn, &event(ProviderStatus::ChargedBack), &[]).unwrap();
        assert_eq!(outcome, ProcessOutcome::Applied(OrderStatus::ChargedBack));

        let row = queries::get_order_by_id(&conn, &order.id).unwrap().unwrap();
        assert_eq!(row.status, OrderStatus::ChargedBack);
        assert!(row.refunded_at.is_some());
    }

    #[test]
    fn test_refunded_order_cannot_return_to_paid() {
        let conn = conn();
        let order = seed_order(&conn);

        apply_event(&conn, &event(ProviderStatus::Approved), &[]).unwrap();
        apply_event(&conn, &event(ProviderStatus::Refunded), &[]).unwrap();
        let refunded = queries::get_order_by_id(&conn, &order.id).unwrap().unwrap();
        let paid_at = refunded.paid_at;

        // A late (or replayed) approval must not resurrect the order
        let outcome = apply_event(&conn, &event(ProviderStatus::Approved), &[]).unwrap();
        assert_eq!(outcome, ProcessOutcome::Anomaly);

        let row = queries::get_order_by_id(&conn, &order.id).unwrap().unwrap();
        assert_eq!(row.status, OrderStatus::Refunded);
        assert_eq!(row.paid_at, paid_at);
    }

    #[test]
    fn test_rejected_order_refuses_cancellation() {
        let conn = conn();
        let order = seed_order(&conn);

        apply_event(&conn, &event(ProviderStatus::Rejected), &[]).unwrap();
        let outcome = apply_event(&conn, &event(ProviderStatus::Cancelled), &[]).unwrap();
        assert_eq!(outcome, ProcessOutcome::Anomaly);

        let row = queries::get_order_by_id(&conn, &order.id).unwrap().unwrap();
        assert_eq!(row.status, OrderStatus::Rejected);
    }

    #[test]
    fn test_terminal_to_pending_is_anomaly() {
        let conn = conn();
        let order = seed_order(&conn);

        apply_event(&conn, &event(ProviderStatus::Approved), &[]).unwrap();
        let outcome = apply_event(&conn, &event(ProviderStatus::Pending), &[]).unwrap();
        assert_eq!(outcome, ProcessOutcome::Anomaly);

        let row = queries::get_order_by_id(&conn, &order.id).unwrap().unwrap();
        assert_eq!(row.status, OrderStatus::Paid);
    }

    #[test]
    fn test_unknown_reference_is_order_not_found() {
        let conn = conn();
        let mut evt = event(ProviderStatus::Approved);
        evt.external_reference = Some("ORDER-999".to_string());
        assert_eq!(
            apply_event(&conn, &evt, &[]).unwrap(),
            ProcessOutcome::OrderNotFound
        );

        let mut evt = event(ProviderStatus::Approved);
        evt.external_reference = None;
        assert_eq!(
            apply_event(&conn, &evt, &[]).unwrap(),
            ProcessOutcome::OrderNotFound
        );
    }

    #[test]
    fn test_created_event_is_informational() {
        let conn = conn();
        seed_order(&conn);
        assert_eq!(
            apply_event(&conn, &event(ProviderStatus::Created), &[]).unwrap(),
            ProcessOutcome::NoOp
        );
    }

    #[test]
    fn test_hook_failure_does_not_unwind_transition() {
        struct Failing(Arc<AtomicUsize>);
        impl TransitionHook for Failing {
            fn name(&self) -> &'static str {
                "failing"
            }
            fn after_transition(&self, _: &Order, _: &NormalizedEvent) -> Result<()> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Err(crate::error::AppError::Internal("hook exploded".into()))
            }
        }

        let conn = conn();
        let order = seed_order(&conn);
        let calls = Arc::new(AtomicUsize::new(0));
        let hooks: Vec<Box<dyn TransitionHook>> = vec![Box::new(Failing(calls.clone()))];

        let outcome = apply_event(&conn, &event(ProviderStatus::Approved), &hooks).unwrap();
        assert_eq!(outcome, ProcessOutcome::Applied(OrderStatus::Paid));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let row = queries::get_order_by_id(&conn, &order.id).unwrap().unwrap();
        assert_eq!(row.status, OrderStatus::Paid);
    }
}
