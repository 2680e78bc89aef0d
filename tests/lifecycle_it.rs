//! Full position lifecycle on the hotpath: create, increase, partial
//! decrease, full close, reopen — checking versions, statuses, UPI
//! generations, realized P&L, and the price/quantity schedule.

mod common;

use rust_decimal_macros::dec;
use swapbook::{
    domain::{
        event::EventType,
        keys::Direction,
        position::PositionStatus,
        snapshot::ReconciliationStatus,
        trade::TradeType,
        units::{Px, Qty},
        upi::Upi,
    },
    engine::ApplyOutcome,
    store::{SnapshotStore, UpiStore},
};

use common::{ctx_on, date, harness, key_for, trade};

fn applied(outcome: ApplyOutcome) -> swapbook::engine::Applied {
    match outcome {
        ApplyOutcome::Applied(applied) => *applied,
        other => panic!("expected Applied, got {other:?}"),
    }
}

#[tokio::test]
async fn test_create_increase_decrease_close_reopen() {
    let h = harness();
    let key = key_for(Direction::Long);

    // t1: open 1000 @ 50.00
    let t1 = trade("T-LIFECYCLE-001", TradeType::NewTrade, 15, dec!(1000), dec!(50.00));
    let a1 = applied(h.engine.process(&ctx_on(&t1), t1).await.unwrap());
    assert_eq!(a1.event.event_version, 1);
    assert_eq!(a1.event.event_type, EventType::NewTrade);
    assert_eq!(a1.snapshot.status, PositionStatus::Active);
    assert_eq!(a1.snapshot.upi, Upi("T-LIFECYCLE-001".into()));
    assert_eq!(a1.snapshot.summary.total_quantity, Qty(dec!(1000)));

    // t2: increase 500 @ 55.00
    let t2 = trade("T-LIFECYCLE-002", TradeType::Increase, 16, dec!(500), dec!(55.00));
    let a2 = applied(h.engine.process(&ctx_on(&t2), t2).await.unwrap());
    assert_eq!(a2.event.event_version, 2);
    assert_eq!(a2.snapshot.upi, Upi("T-LIFECYCLE-001".into()));
    assert_eq!(a2.snapshot.summary.total_quantity, Qty(dec!(1500)));

    // t3: partial decrease 300 @ 60.00, FIFO takes lot 1.
    let t3 = trade("T-LIFECYCLE-003", TradeType::Decrease, 17, dec!(300), dec!(60.00));
    let a3 = applied(h.engine.process(&ctx_on(&t3), t3).await.unwrap());
    assert_eq!(a3.event.event_version, 3);
    assert_eq!(a3.snapshot.status, PositionStatus::Active);
    assert_eq!(a3.allocation.allocations.len(), 1);
    assert_eq!(a3.allocation.allocations[0].lot_id.0, "T-LIFECYCLE-001");
    assert_eq!(a3.allocation.total_realized_pnl, dec!(3000.00));
    assert_eq!(a3.snapshot.summary.total_quantity, Qty(dec!(1200)));

    // t4: full close 1200 @ 65.00 -> 700 from lot 1 then 500 from lot 2.
    let t4 = trade("T-LIFECYCLE-004", TradeType::Decrease, 18, dec!(1200), dec!(65.00));
    let a4 = applied(h.engine.process(&ctx_on(&t4), t4).await.unwrap());
    assert_eq!(a4.event.event_version, 4);
    assert_eq!(a4.event.event_type, EventType::PositionClosed);
    assert_eq!(a4.snapshot.status, PositionStatus::Terminated);
    assert_eq!(a4.snapshot.upi, Upi("T-LIFECYCLE-001".into()));
    assert_eq!(a4.allocation.allocations.len(), 2);
    assert_eq!(a4.allocation.allocations[0].realized_pnl, Some(dec!(10500.00)));
    assert_eq!(a4.allocation.allocations[1].realized_pnl, Some(dec!(5000.00)));
    assert_eq!(a4.allocation.total_realized_pnl, dec!(15500.00));
    assert_eq!(a4.snapshot.summary.total_quantity, Qty(dec!(0)));
    assert_eq!(
        a4.snapshot.summary.realized_pnl,
        dec!(3000.00) + dec!(15500.00)
    );

    // t5: reopen 2000 @ 70.00 under a fresh UPI generation.
    let t5 = trade("T-LIFECYCLE-005", TradeType::NewTrade, 19, dec!(2000), dec!(70.00));
    let a5 = applied(h.engine.process(&ctx_on(&t5), t5).await.unwrap());
    assert_eq!(a5.event.event_version, 5);
    assert_eq!(a5.snapshot.status, PositionStatus::Active);
    assert_eq!(a5.snapshot.upi, Upi("T-LIFECYCLE-005".into()));
    assert_eq!(a5.snapshot.summary.total_quantity, Qty(dec!(2000)));
    assert_eq!(a5.snapshot.reconciliation_status, ReconciliationStatus::Reconciled);

    // UPI history: generation 1 terminated, generation 2 active.
    let generations = h.upis.generations(&key).await.unwrap();
    assert_eq!(generations.len(), 2);
    assert_eq!(generations[0].upi, Upi("T-LIFECYCLE-001".into()));
    assert!(generations[0].terminated_at.is_some());
    assert_eq!(generations[1].upi, Upi("T-LIFECYCLE-005".into()));
    assert!(generations[1].is_active());
}

#[tokio::test]
async fn test_schedule_tracks_quantity_and_weighted_price() {
    let h = harness();
    let key = key_for(Direction::Long);

    for t in [
        trade("T-1", TradeType::NewTrade, 15, dec!(1000), dec!(50.00)),
        trade("T-2", TradeType::Increase, 16, dec!(500), dec!(55.00)),
        trade("T-3", TradeType::Decrease, 17, dec!(300), dec!(60.00)),
    ] {
        h.engine.process(&ctx_on(&t), t).await.unwrap();
    }

    let snapshot = h.snapshots.load(&key).await.unwrap().unwrap();
    let entries = snapshot.schedule.entries();
    assert_eq!(entries.len(), 3);

    assert_eq!(entries[0].effective_date, date(15));
    assert_eq!(entries[0].quantity, Qty(dec!(1000)));
    assert_eq!(entries[0].price, Px(dec!(50.00)));

    assert_eq!(entries[1].quantity, Qty(dec!(1500)));
    // (1000*50 + 500*55) / 1500 rounded half-even at scale 2.
    assert_eq!(entries[1].price, Px(dec!(51.67)));

    // FIFO took 300 of lot 1: (700*50 + 500*55) / 1200 = 52.083... -> 52.08
    assert_eq!(entries[2].quantity, Qty(dec!(1200)));
    assert_eq!(entries[2].price, Px(dec!(52.08)));
}

#[tokio::test]
async fn test_same_day_events_overwrite_one_schedule_entry() {
    let h = harness();
    let key = key_for(Direction::Long);

    let t1 = trade("T-1", TradeType::NewTrade, 15, dec!(1000), dec!(50.00));
    let t2 = trade("T-2", TradeType::Increase, 15, dec!(500), dec!(55.00));
    h.engine.process(&ctx_on(&t1), t1).await.unwrap();
    h.engine.process(&ctx_on(&t2), t2).await.unwrap();

    let snapshot = h.snapshots.load(&key).await.unwrap().unwrap();
    assert_eq!(snapshot.schedule.len(), 1);
    assert_eq!(
        snapshot.schedule.entries()[0].quantity,
        Qty(dec!(1500))
    );
}
