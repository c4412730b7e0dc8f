//! DGR relay binary.
//!
//! # Usage
//!
//! ```bash
//! dgr-relay --master-listen 0.0.0.0:5700 --slave-listen 0.0.0.0:5701
//! ```
//!
//! Runs until Ctrl-C or SIGTERM, says `BYE` to every connection and exits.

use clap::Parser;
use dgr_core::{TcpTransport, config::DEFAULT_MAX_VARIABLE_SIZE};
use dgr_relay::{Relay, RelayConfig};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// DGR relay
#[derive(Parser, Debug)]
#[command(name = "dgr-relay")]
#[command(about = "Fans DGR master state out to slaves")]
#[command(version)]
struct Args {
    /// Address masters connect to
    #[arg(long, default_value = "0.0.0.0:5700")]
    master_listen: String,

    /// Address slaves connect to
    #[arg(long, default_value = "0.0.0.0:5701")]
    slave_listen: String,

    /// Frames buffered per slave before the oldest is dropped
    #[arg(long, default_value = "8")]
    queue_depth: usize,

    /// Per-variable size limit in bytes; must match every node
    #[arg(long, default_value_t = DEFAULT_MAX_VARIABLE_SIZE)]
    max_variable_size: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn terminated() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let term = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            },
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };
    #[cfg(not(unix))]
    let term = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("interrupted"),
        () = term => tracing::info!("terminated"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = RelayConfig {
        master_listen: args.master_listen,
        slave_listen: args.slave_listen,
        queue_depth: args.queue_depth,
        max_variable_size: args.max_variable_size,
        ..RelayConfig::default()
    };

    let relay = Relay::bind(config, TcpTransport).await?;
    let stats = relay.run(terminated()).await;
    tracing::info!(slaves = stats.slaves_connected, "relay exited");

    Ok(())
}
