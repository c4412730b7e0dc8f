//! Shared scenario pieces: the ball variable, node configurations and the
//! master and slave render loops.

#![allow(dead_code)]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use dgr_core::{Role, SyncConfig, SyncError};
use dgr_harness::{SimEnv, SimTransport, spawn_node, tick};
use dgr_node::{SyncSession, Tick};
use dgr_relay::{Relay, RelayConfig};
use turmoil::Sim;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Render tick period.
pub const TICK: Duration = Duration::from_millis(50);

/// Master port, also the relay's master-facing port.
pub const MASTER_PORT: u16 = 5700;

/// Relay's slave-facing port.
pub const SLAVE_PORT: u16 = 5701;

#[derive(Debug, Clone, Copy, Default, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct Ball {
    pub tick: u32,
    pub xpos: f32,
    pub ypos: f32,
}

impl Ball {
    #[allow(clippy::cast_precision_loss)]
    pub fn at(tick: u32) -> Self {
        Self { tick, xpos: tick as f32 * 0.01, ypos: 0.5 }
    }
}

/// Simulation with a fixed 1 ms link latency, so tick timing is exact.
pub fn sim() -> Sim<'static> {
    turmoil::Builder::new()
        .simulation_duration(Duration::from_secs(60))
        .min_message_latency(Duration::from_millis(1))
        .max_message_latency(Duration::from_millis(1))
        .build()
}

/// Master accepting slaves directly.
pub fn direct_master() -> SyncConfig {
    SyncConfig {
        role: Role::Master,
        listen: Some(format!("0.0.0.0:{MASTER_PORT}")),
        ..SyncConfig::default()
    }
}

/// Slave connected straight to host `master`.
pub fn direct_slave() -> SyncConfig {
    SyncConfig {
        role: Role::Slave,
        peer: Some(format!("master:{MASTER_PORT}")),
        ..SyncConfig::default()
    }
}

/// Master publishing through host `relay`.
pub fn relayed_master() -> SyncConfig {
    SyncConfig {
        role: Role::Master,
        relay: Some(format!("relay:{MASTER_PORT}")),
        ..SyncConfig::default()
    }
}

/// Slave subscribed through host `relay`.
pub fn relayed_slave() -> SyncConfig {
    SyncConfig {
        role: Role::Slave,
        relay: Some(format!("relay:{SLAVE_PORT}")),
        ..SyncConfig::default()
    }
}

/// Add a relay host named `relay` on the default ports.
pub fn add_relay(sim: &mut Sim<'_>) {
    sim.host("relay", || async {
        let relay = Relay::bind(RelayConfig::default(), SimTransport).await?;
        relay.run(std::future::pending()).await;
        Ok(())
    });
}

/// Tick a master forever. Tick `k` (at `k * TICK`) publishes `Ball::at(first + k)`.
pub async fn run_master(config: SyncConfig, seed: u64, first: u32) -> turmoil::Result {
    let mut session = spawn_node(config, SimEnv::with_seed(seed)).await?;
    let start = tokio::time::Instant::now();

    for k in 0u32.. {
        tokio::time::sleep_until(start + TICK * k).await;
        let mut ball = Ball::at(first + k);
        session.set_or_get_value("ball", &mut ball)?;
        tick(&mut session)?;
    }
    Ok(())
}

/// Tick a master `ticks` times, then close it.
pub async fn run_master_for(
    config: SyncConfig,
    seed: u64,
    first: u32,
    ticks: u32,
) -> Result<(), SyncError> {
    let mut session = spawn_node(config, SimEnv::with_seed(seed)).await?;
    let start = tokio::time::Instant::now();

    for k in 0..ticks {
        tokio::time::sleep_until(start + TICK * k).await;
        let mut ball = Ball::at(first + k);
        session.set_or_get_value("ball", &mut ball)?;
        tick(&mut session)?;
    }
    session.close("restarting");
    Ok(())
}

/// Render `ticks` slave ticks, the first one `TICK` after the call. Returns
/// the ball values of every applied frame.
pub async fn render_slave(
    session: &mut SyncSession<SimEnv>,
    ticks: u32,
) -> Result<Vec<u32>, SyncError> {
    let start = tokio::time::Instant::now();
    let mut ball = Ball::default();
    let mut seen = Vec::new();

    for k in 1..=ticks {
        tokio::time::sleep_until(start + TICK * k).await;
        session.set_or_get_value("ball", &mut ball)?;
        if let Tick::Applied { .. } = tick(session)? {
            session.set_or_get_value("ball", &mut ball)?;
            seen.push(ball.tick);
        }
    }
    Ok(seen)
}

/// Render forever half a tick out of phase with a master started at the same
/// time, appending every applied ball value to `seen`.
pub async fn render_slave_into(
    config: SyncConfig,
    seed: u64,
    seen: Arc<Mutex<Vec<u32>>>,
) -> turmoil::Result {
    tokio::time::sleep(TICK / 2).await;
    let mut session = spawn_node(config, SimEnv::with_seed(seed)).await?;
    let start = tokio::time::Instant::now();
    let mut ball = Ball::default();

    for k in 1u32.. {
        tokio::time::sleep_until(start + TICK * k).await;
        session.set_or_get_value("ball", &mut ball)?;
        if let Tick::Applied { .. } = tick(&mut session)? {
            session.set_or_get_value("ball", &mut ball)?;
            seen.lock().unwrap().push(ball.tick);
        }
    }
    Ok(())
}

/// Step the simulation until `at` of simulated time has passed.
pub fn run_until(sim: &mut Sim<'_>, at: Duration) {
    while sim.elapsed() < at {
        sim.step().unwrap();
    }
}

/// True if `values` is `first, first + 1, ...` without gaps.
pub fn consecutive(values: &[u32]) -> bool {
    values.windows(2).all(|w| w[1] == w[0] + 1)
}
