//! Toggle re-trading and the hedge supervisor
//!
//! A short lot ladder (max_positions = 3) gets a pair to its cap quickly:
//! complete the pair, toggle it once at its locked entry, and the supervisor
//! hedges it on the next tick. The hedge closes together with the pair leg
//! that resolves.

use rung_core::config::{SymbolSettings, HEDGE_MAGIC_BASE};
use rung_core::core::Side;
use rung_core::execution::BrokerAdapter;
use rung_core::testing::{wide_stop_settings, TestRig, TEST_SYMBOL};

fn short_ladder() -> SymbolSettings {
    SymbolSettings {
        lot_sizes: vec![0.01, 0.02, 0.03],
        max_positions: 3,
        ..wide_stop_settings()
    }
}

async fn pair0_to_max(rig: &TestRig) {
    rig.tick(1000.0, 999.8).await; // INIT: B0 (count 1), S1
    rig.tick(985.2, 985.0).await; // bearish expansion: S0 completes pair 0 (count 2)
    rig.tick(1000.2, 1000.0).await; // toggle: buy at the locked 1000.0 entry (count 3)
}

#[tokio::test]
async fn toggle_retrades_at_locked_entry() {
    let dir = tempfile::tempdir().unwrap();
    let rig = TestRig::with_settings(dir.path(), 1000.0, 999.8, short_ladder());
    rig.engine.start().await.unwrap();

    rig.tick(1000.0, 999.8).await;
    rig.tick(985.2, 985.0).await;

    let before = rig.broker.position_count(TEST_SYMBOL);
    rig.tick(1000.2, 1000.0).await;

    let snap = rig.engine.snapshot().await;
    let pair0 = snap.pairs.iter().find(|p| p.index == 0).unwrap();
    assert_eq!(pair0.trade_count, 3, "toggle executed the third trade");
    assert_eq!(pair0.next_action, Side::Sell);
    assert!((pair0.locked_buy_entry - 1000.0).abs() < 1e-9);
    assert_eq!(rig.broker.position_count(TEST_SYMBOL), before + 1);
}

#[tokio::test]
async fn maxed_pair_gets_hedged() {
    let dir = tempfile::tempdir().unwrap();
    let rig = TestRig::with_settings(dir.path(), 1000.0, 999.8, short_ladder());
    rig.engine.start().await.unwrap();
    pair0_to_max(&rig).await;

    // The supervisor sees trade_count == max_positions on the next tick
    rig.tick(1000.2, 1000.0).await;

    let snap = rig.engine.snapshot().await;
    let pair0 = snap.pairs.iter().find(|p| p.index == 0).unwrap();
    assert!(pair0.hedge_active);
    assert_ne!(pair0.hedge_ticket, 0);
    // Odd max_positions on the anchor side hedges with a sell
    assert_eq!(pair0.hedge_direction, Some(Side::Sell));

    let hedges: Vec<_> = rig
        .broker
        .open_positions(TEST_SYMBOL)
        .await
        .into_iter()
        .filter(|p| p.magic == HEDGE_MAGIC_BASE)
        .collect();
    assert_eq!(hedges.len(), 1);
    assert_eq!(hedges[0].side, Side::Sell);

    // Supervisor does not double-hedge
    rig.tick(1000.2, 1000.0).await;
    let hedge_count = rig
        .broker
        .open_positions(TEST_SYMBOL)
        .await
        .into_iter()
        .filter(|p| p.magic == HEDGE_MAGIC_BASE)
        .count();
    assert_eq!(hedge_count, 1);
}

#[tokio::test]
async fn hedge_closes_when_pair_leg_resolves() {
    let dir = tempfile::tempdir().unwrap();
    let rig = TestRig::with_settings(dir.path(), 1000.0, 999.8, short_ladder());
    rig.engine.start().await.unwrap();
    pair0_to_max(&rig).await;
    rig.tick(1000.2, 1000.0).await; // hedge placed

    let snap = rig.engine.snapshot().await;
    let pair0 = snap.pairs.iter().find(|p| p.index == 0).unwrap();
    assert!(pair0.hedge_active);

    // A pair leg disappears (manual close, classified by inference); the
    // hedge must be closed with it
    rig.broker.force_close(pair0.buy_ticket);
    rig.tick(1000.2, 1000.0).await;

    let snap = rig.engine.snapshot().await;
    let pair0 = snap.pairs.iter().find(|p| p.index == 0).unwrap();
    assert!(!pair0.hedge_active);
    assert_eq!(pair0.hedge_ticket, 0);
    assert!(pair0.tp_blocked);

    let hedge_count = rig
        .broker
        .open_positions(TEST_SYMBOL)
        .await
        .into_iter()
        .filter(|p| p.magic == HEDGE_MAGIC_BASE)
        .count();
    assert_eq!(hedge_count, 0, "hedge closed with the pair");
}
