//! Group progression: incomplete-pair TP INIT, the group-0 saturation
//! handoff, the directional guard, and graceful stop

use rung_core::config::SymbolSettings;
use rung_core::core::Trend;
use rung_core::testing::{test_settings, wide_stop_settings, TestRig};

fn sell_tp_only() -> SymbolSettings {
    SymbolSettings {
        buy_tp_pips: 500.0,
        buy_sl_pips: 500.0,
        sell_tp_pips: 20.0,
        sell_sl_pips: 500.0,
        ..test_settings()
    }
}

#[tokio::test]
async fn incomplete_sell_tp_inits_next_group() {
    let dir = tempfile::tempdir().unwrap();
    let rig = TestRig::with_settings(dir.path(), 1000.0, 999.8, sell_tp_only());
    rig.engine.start().await.unwrap();
    rig.tick(1000.0, 999.8).await; // INIT: B0, S1 (tp 979.8)

    // Price falls onto the incomplete sell's TP
    rig.tick(979.5, 979.3).await;

    let snap = rig.engine.snapshot().await;
    let pair1 = snap.pairs.iter().find(|p| p.index == 1).unwrap();
    assert!(pair1.tp_blocked);

    assert_eq!(snap.current_group, 1);
    assert!((snap.anchor_price - 979.8).abs() < 1e-9, "anchor is the TP price");

    let meta = snap.groups.get(&1).unwrap();
    assert_eq!(meta.init_source, Some(Trend::Bearish));
    assert_eq!(meta.pending_retracement, Some(Trend::Bullish));

    let b = snap.pairs.iter().find(|p| p.index == 100).expect("pair 100");
    let s = snap.pairs.iter().find(|p| p.index == 101).expect("pair 101");
    assert!(b.buy_filled && !b.sell_filled);
    assert!(s.sell_filled && !s.buy_filled);
    assert_eq!(b.group_id, 1);
    assert_eq!(s.group_id, 1);
}

#[tokio::test]
async fn directional_guard_blocks_init_source_direction() {
    let dir = tempfile::tempdir().unwrap();
    let rig = TestRig::with_settings(dir.path(), 1000.0, 999.8, sell_tp_only());
    rig.engine.start().await.unwrap();
    rig.tick(1000.0, 999.8).await;
    rig.tick(979.5, 979.3).await; // group 1 INIT, source bearish

    let pairs_before = rig.engine.snapshot().await.pairs.len();

    // Bearish retest reaches pair 100's sell level, but group 1's init was
    // bearish: only the bullish retracement may expand
    rig.tick(964.9, 964.7).await;
    let snap = rig.engine.snapshot().await;
    assert_eq!(snap.pairs.len(), pairs_before, "guard blocked bearish expansion");
    let pair100 = snap.pairs.iter().find(|p| p.index == 100).unwrap();
    assert!(!pair100.sell_filled);

    // The bullish retracement is the allowed direction
    rig.tick(995.0, 994.8).await;
    let snap = rig.engine.snapshot().await;
    let pair101 = snap.pairs.iter().find(|p| p.index == 101).unwrap();
    assert!(pair101.buy_filled, "bullish retracement completes pair 101");
    assert!(
        snap.pairs.iter().any(|p| p.index == 102),
        "atomic expansion seeded pair 102"
    );
}

#[tokio::test]
async fn group0_saturation_forces_artificial_tp_and_init() {
    let dir = tempfile::tempdir().unwrap();
    let rig = TestRig::with_settings(dir.path(), 1000.0, 999.8, wide_stop_settings());
    rig.engine.start().await.unwrap();

    rig.tick(1000.0, 999.8).await; // INIT
    rig.tick(1015.5, 1015.3).await; // expand: pair 1 completes, pair 2 seeded
    rig.tick(1015.5, 1015.3).await; // recount C=1
    rig.tick(1035.5, 1035.3).await; // expand: pair 2 completes, pair 3 seeded
    rig.tick(1035.5, 1035.3).await; // recount C=2
    rig.tick(1055.5, 1055.3).await; // non-atomic third completion

    let before = rig.engine.snapshot().await;
    assert_eq!(before.current_group, 0);
    let pair0_buy_ticket = before.pairs.iter().find(|p| p.index == 0).unwrap().buy_ticket;

    // Next tick recounts C to 3 and the saturation check hands off: the lone
    // incomplete leg (B0) is closed artificially and group 1 initializes
    rig.tick(1055.5, 1055.3).await;

    let snap = rig.engine.snapshot().await;
    assert_eq!(snap.c_highwater.get(&0), Some(&3));
    assert_eq!(snap.current_group, 1);
    assert!(snap.pairs.iter().any(|p| p.index == 100 && p.buy_filled));
    assert!(snap.pairs.iter().any(|p| p.index == 101 && p.sell_filled));
    assert!(
        !snap.tickets.iter().any(|(t, _, _)| *t == pair0_buy_ticket),
        "artificially closed leg left the registry"
    );

    // The handoff fires at most once
    let pairs_after = snap.pairs.len();
    rig.tick(1055.5, 1055.3).await;
    rig.tick(1055.5, 1055.3).await;
    let snap = rig.engine.snapshot().await;
    assert_eq!(snap.current_group, 1);
    assert_eq!(snap.pairs.len(), pairs_after);

    // Accounting invariant: the high-water mark never undercuts live C,
    // where live C counts pairs with both legs still registered as open
    for (group, hw) in &snap.c_highwater {
        let live = snap
            .pairs
            .iter()
            .filter(|p| p.group_id == *group)
            .filter(|p| {
                let has = |leg| {
                    snap.tickets
                        .iter()
                        .any(|(_, info, _)| info.pair_index == p.index && info.leg == leg)
                };
                has(rung_core::core::Side::Buy) && has(rung_core::core::Side::Sell)
            })
            .count() as u32;
        assert!(*hw >= live, "high-water {hw} below live {live} for group {group}");
    }
}

#[tokio::test]
async fn graceful_stop_blocks_new_groups_and_expansion() {
    let dir = tempfile::tempdir().unwrap();
    let rig = TestRig::new(dir.path());
    rig.engine.start().await.unwrap();
    rig.tick(1000.0, 999.8).await;

    rig.engine.stop().await.unwrap();

    // Step triggers are off under graceful stop
    rig.tick(1015.5, 1015.3).await;
    let snap = rig.engine.snapshot().await;
    let pair1 = snap.pairs.iter().find(|p| p.index == 1).unwrap();
    assert!(!pair1.buy_filled);
    assert!(!snap.pairs.iter().any(|p| p.index == 2));

    // An incomplete TP that would normally INIT the next group does nothing
    rig.tick(979.5, 979.3).await;
    let snap = rig.engine.snapshot().await;
    assert_eq!(snap.current_group, 0);
    assert!(!snap.pairs.iter().any(|p| p.index >= 100));
    assert!(snap.graceful_stop);
}
