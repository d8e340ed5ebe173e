//! Ledger idempotency under concurrent delivery of the same event.

mod common;

use std::thread;

use common::*;
use shophooks::ledger;

#[test]
fn test_concurrent_record_of_same_event_yields_one_row() {
    let (state, _dir) = create_test_app_state();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let pool = state.db.clone();
        handles.push(thread::spawn(move || {
            let conn = pool.get().unwrap();
            ledger::record(
                &conn,
                &NewDelivery {
                    provider: Provider::Payment,
                    external_event_id: "pay_race",
                    event_type: "payment.updated",
                    raw_body: b"{}",
                    headers: "{}",
                    trust: TrustLevel::Signature,
                },
            )
            .unwrap()
        }));
    }

    let results: Vec<(String, bool)> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let inserted_count = results.iter().filter(|(_, inserted)| *inserted).count();
    assert_eq!(inserted_count, 1, "exactly one writer must win");

    let winner = &results.iter().find(|(_, inserted)| *inserted).unwrap().0;
    assert!(
        results.iter().all(|(id, _)| id == winner),
        "all writers must observe the same ledger id"
    );

    let conn = state.db.get().unwrap();
    let deliveries = queries::list_deliveries(&conn, &Default::default()).unwrap();
    assert_eq!(deliveries.len(), 1);
}
