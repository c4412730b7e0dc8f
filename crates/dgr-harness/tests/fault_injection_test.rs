//! Restarts, stalls and jitter.
//!
//! Slaves must never render an older tick than one they already rendered
//! for the same master, must follow a master that restarted with a new
//! identity, and must come back on their own after a crash or a stall.

mod common;

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use common::{
    Ball, TICK, add_relay, consecutive, direct_master, direct_slave, relayed_master,
    relayed_slave, render_slave, render_slave_into, run_master, run_master_for, run_until, sim,
};
use dgr_core::{LinkHealth, SyncConfig};
use dgr_harness::{SimEnv, spawn_node, tick};
use dgr_node::Tick;
use proptest::prelude::*;

#[test]
fn restarted_slave_picks_up_the_current_tick() {
    let seen = Arc::new(Mutex::new(Vec::new()));

    let mut sim = sim();
    sim.host("master", || run_master(direct_master(), 1, 0));
    let shared = Arc::clone(&seen);
    sim.host("slave", move || render_slave_into(direct_slave(), 2, Arc::clone(&shared)));

    run_until(&mut sim, Duration::from_secs(1));
    let before = seen.lock().unwrap().clone();
    assert!(before.len() > 10);
    assert!(consecutive(&before));

    sim.bounce("slave");
    seen.lock().unwrap().clear();
    run_until(&mut sim, Duration::from_secs(2));

    let after = seen.lock().unwrap().clone();
    assert!(after.len() > 10, "restarted slave rendered {after:?}");
    assert!(consecutive(&after));
    assert!(after[0] > *before.last().unwrap());
}

#[test]
fn slave_follows_a_restarted_master() {
    let seen = Arc::new(Mutex::new(Vec::new()));

    let mut sim = sim();
    add_relay(&mut sim);
    let shared = Arc::clone(&seen);
    sim.host("slave", move || render_slave_into(relayed_slave(), 3, Arc::clone(&shared)));

    sim.client("master", async {
        run_master_for(relayed_master(), 1, 0, 20).await?;
        tokio::time::sleep(Duration::from_millis(200)).await;
        // new process: new node id, sequence numbers start over
        run_master_for(relayed_master(), 2, 1000, 20).await?;
        Ok(())
    });

    sim.run().unwrap();

    let seen = seen.lock().unwrap().clone();
    let split = seen.iter().position(|&v| v >= 1000).expect("second master never rendered");
    let (first, second) = seen.split_at(split);

    assert!(!first.is_empty());
    assert!(first.windows(2).all(|w| w[0] < w[1]));
    assert!(second.windows(2).all(|w| w[0] < w[1]));
    // low sequence numbers from the new master were applied, not held back
    // behind the old master's
    assert!(second[0] < 1005, "second master first rendered at {}", second[0]);
}

#[test]
fn stalled_link_degrades_then_recovers() {
    let mut sim = sim();
    sim.host("master", || run_master(direct_master(), 1, 0));

    sim.client("slave", async {
        tokio::time::sleep(TICK / 2).await;
        let config = SyncConfig { degraded_after: Duration::from_secs(1), ..direct_slave() };
        let mut session = spawn_node(config, SimEnv::with_seed(2)).await?;
        let mut ball = Ball::default();
        let mut health = Vec::new();
        let mut rendered = Vec::new();

        for k in 1u32..=100 {
            tokio::time::sleep(TICK).await;
            if k == 20 {
                turmoil::hold("master", "slave");
            }
            if k == 60 {
                turmoil::release("master", "slave");
            }

            session.set_or_get_value("ball", &mut ball)?;
            let now = match tick(&mut session)? {
                Tick::Applied { .. } => {
                    session.set_or_get_value("ball", &mut ball)?;
                    rendered.push(ball.tick);
                    session.health()
                },
                Tick::Missed { health } => health,
                other => panic!("unexpected {other:?} on a slave"),
            };
            if health.last() != Some(&now) {
                health.push(now);
            }
        }

        assert_eq!(health, vec![LinkHealth::Live, LinkHealth::Degraded, LinkHealth::Live]);
        // held frames are coalesced: the first render after the stall jumps ahead
        assert!(rendered.windows(2).all(|w| w[0] < w[1]));
        assert!(!consecutive(&rendered));
        Ok(())
    });

    sim.run().unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn jitter_never_moves_a_slave_backwards(seed in any::<u64>(), max_latency_ms in 1u64..40) {
        let rendered = Arc::new(Mutex::new(Vec::new()));

        let mut sim = turmoil::Builder::new()
            .simulation_duration(Duration::from_secs(60))
            .min_message_latency(Duration::from_millis(1))
            .max_message_latency(Duration::from_millis(max_latency_ms))
            .rng_seed(seed)
            .build();
        add_relay(&mut sim);
        sim.host("master", || run_master(relayed_master(), 1, 0));

        let shared = Arc::clone(&rendered);
        sim.client("slave", async move {
            let mut session = spawn_node(relayed_slave(), SimEnv::with_seed(seed)).await?;
            let seen = render_slave(&mut session, 40).await?;
            shared.lock().unwrap().extend(seen);
            Ok(())
        });

        sim.run().unwrap();

        let rendered = rendered.lock().unwrap().clone();
        prop_assert!(rendered.len() > 10);
        prop_assert!(rendered.windows(2).all(|w| w[0] < w[1]), "{:?}", rendered);
    }
}
