//! Completion-cap behavior at the boundaries
//!
//! Wide stops keep broker-side TP/SL out of the picture so these tests
//! exercise the cap in isolation: the third completion is non-atomic (no
//! seed), and once the group holds three completed pairs no further step
//! expansion fires.

use rung_core::testing::{wide_stop_settings, TestRig, TEST_SYMBOL};

async fn climb_to_c2(rig: &TestRig) {
    rig.tick(1000.0, 999.8).await; // INIT: pair 0 buy, pair 1 sell
    rig.tick(1015.5, 1015.3).await; // expand 1: pair 1 completes, pair 2 seeded
    rig.tick(1015.5, 1015.3).await; // recount: C=1
    rig.tick(1035.5, 1035.3).await; // expand 2: pair 2 completes, pair 3 seeded
    rig.tick(1035.5, 1035.3).await; // recount: C=2
}

#[tokio::test]
async fn third_completion_is_non_atomic() {
    let dir = tempfile::tempdir().unwrap();
    let rig = TestRig::with_settings(dir.path(), 1000.0, 999.8, wide_stop_settings());
    rig.engine.start().await.unwrap();
    climb_to_c2(&rig).await;

    let before = rig.broker.position_count(TEST_SYMBOL);

    // Pair 3's buy level is 1060; this lands inside the tolerance band
    rig.tick(1055.5, 1055.3).await;

    let snap = rig.engine.snapshot().await;
    let pair3 = snap.pairs.iter().find(|p| p.index == 3).expect("pair 3");
    assert!(pair3.buy_filled && pair3.sell_filled, "pair 3 completed");

    // The completion that takes C from 2 to 3 must not seed pair 4
    assert!(
        !snap.pairs.iter().any(|p| p.index == 4),
        "non-atomic completion seeded a pair"
    );
    assert_eq!(rig.broker.position_count(TEST_SYMBOL), before + 1);
}

#[tokio::test]
async fn no_step_expansion_past_the_cap() {
    let dir = tempfile::tempdir().unwrap();
    let rig = TestRig::with_settings(dir.path(), 1000.0, 999.8, wide_stop_settings());
    rig.engine.start().await.unwrap();
    climb_to_c2(&rig).await;
    rig.tick(1055.5, 1055.3).await; // non-atomic third completion

    let snap = rig.engine.snapshot().await;
    let pairs_before = snap.pairs.len();

    // Keep pushing upward; the group holds the cap, so the ladder must not
    // grow any further (the group-0 saturation handoff may fire, which adds
    // exactly the next group's two INIT pairs and nothing else)
    rig.tick(1075.5, 1075.3).await;
    rig.tick(1095.5, 1095.3).await;

    let snap = rig.engine.snapshot().await;
    let group0_pairs: Vec<_> = snap.pairs.iter().filter(|p| p.group_id == 0).collect();
    assert_eq!(
        group0_pairs.len(),
        pairs_before,
        "group 0 grew past the completion cap"
    );
    assert!(snap.c_highwater.get(&0) == Some(&3));
}

#[tokio::test]
async fn highwater_survives_leg_closures() {
    let dir = tempfile::tempdir().unwrap();
    let rig = TestRig::with_settings(dir.path(), 1000.0, 999.8, wide_stop_settings());
    rig.engine.start().await.unwrap();
    climb_to_c2(&rig).await;

    let snap = rig.engine.snapshot().await;
    let pair1 = snap.pairs.iter().find(|p| p.index == 1).unwrap();

    // Manually close one leg of a completed pair: live C regresses, the
    // high-water mark must not
    rig.broker.force_close(pair1.buy_ticket);
    rig.tick(1035.5, 1035.3).await;
    rig.tick(1035.5, 1035.3).await;

    let snap = rig.engine.snapshot().await;
    assert!(
        snap.c_highwater.get(&0).copied().unwrap_or(0) >= 2,
        "high-water mark regressed"
    );
}
