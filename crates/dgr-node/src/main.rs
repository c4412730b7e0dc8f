//! Demo node: a ball moving across a shared scene.
//!
//! The master advances a 12-byte `ball` variable every tick; slaves render
//! whatever the master sent. Run one master and any number of slaves:
//!
//! ```bash
//! # master serving slaves directly
//! dgr-ticker --role master --listen 0.0.0.0:5700
//!
//! # slave connecting to it
//! dgr-ticker --role slave --peer master-host:5700
//!
//! # through a relay
//! dgr-ticker --role master --relay relay-host:5700
//! dgr-ticker --role slave --relay relay-host:5701
//! ```
//!
//! Without `--role` the `DGR_*` environment variables are used.

use std::{
    process::ExitCode,
    time::{Duration, Instant},
};

use clap::Parser;
use dgr_core::{Role, SyncConfig};
use dgr_node::{SyncContext, Tick};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// DGR demo node
#[derive(Parser, Debug)]
#[command(name = "dgr-ticker")]
#[command(about = "Synchronized ball demo for DGR")]
#[command(version)]
struct Args {
    /// Role: master, slave or standalone (default: `DGR_MODE`)
    #[arg(short, long)]
    role: Option<String>,

    /// Master: address to accept slaves on
    #[arg(long)]
    listen: Option<String>,

    /// Slave: master address
    #[arg(long)]
    peer: Option<String>,

    /// Relay address (master port for masters, slave port for slaves)
    #[arg(long)]
    relay: Option<String>,

    /// Ticks to run, 0 for no limit
    #[arg(long, default_value = "0")]
    ticks: u64,

    /// Ticks per second
    #[arg(long, default_value = "60")]
    fps: u32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
struct Ball {
    tick: u32,
    xpos: f32,
    ypos: f32,
}

impl Ball {
    fn advance(&mut self) {
        self.tick = self.tick.wrapping_add(1);
        self.xpos = (self.xpos + 0.01) % 1.0;
        self.ypos = 0.5;
    }
}

fn config(args: &Args) -> Result<SyncConfig, Box<dyn std::error::Error>> {
    let Some(role) = &args.role else {
        return Ok(SyncConfig::from_env()?);
    };

    let config = SyncConfig {
        role: role.parse::<Role>()?,
        listen: args.listen.clone(),
        peer: args.peer.clone(),
        relay: args.relay.clone(),
        ..SyncConfig::default()
    };
    config.validate()?;
    Ok(config)
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut dgr = SyncContext::init(config(args)?)?;
    let interval = Duration::from_secs(1) / args.fps.max(1);
    let mut ball = Ball::default();
    let mut tick = 0u64;

    tracing::info!(role = ?dgr.role(), node_id = dgr.node_id(), "ticker started");

    while args.ticks == 0 || tick < args.ticks {
        let started = Instant::now();

        dgr.set_or_get_value("ball", &mut ball)?;
        match dgr.update()? {
            Tick::Applied { sequence, skipped } => {
                dgr.set_or_get_value("ball", &mut ball)?;
                tracing::info!(sequence, skipped, ball = ball.tick, "frame");
            },
            Tick::Missed { health } => tracing::debug!(?health, "no frame"),
            _ => {},
        }

        if dgr.is_master() || !dgr.is_enabled() {
            ball.advance();
            if ball.tick % 60 == 0 {
                tracing::info!(ball = ball.tick, xpos = ball.xpos, "advanced");
            }
        }

        if dgr.role() == Role::Slave && tick % 300 == 0 {
            dgr.report(ball.tick.to_be_bytes().to_vec())?;
        }
        for report in dgr.take_reports() {
            tracing::info!(origin = report.origin, size = report.bytes.len(), "report from slave");
        }

        tick += 1;
        std::thread::sleep(interval.saturating_sub(started.elapsed()));
    }

    dgr.shutdown();
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "ticker failed");
            ExitCode::FAILURE
        },
    }
}
