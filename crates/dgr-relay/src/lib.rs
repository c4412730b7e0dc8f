//! DGR relay.
//!
//! Brokers a session for nodes that cannot reach each other directly. The
//! master connects to one endpoint, slaves to the other; every `STATE` frame
//! from the master is queued for each slave, and slave `REPORT` frames go
//! back to the master.
//!
//! ## Architecture
//!
//! ```text
//! dgr-relay
//!   ├─ Relay          (two acceptors, task per connection)
//!   ├─ Registry       (master slot, slave queues, counters)
//!   └─ session        (master and slave connection tasks)
//! ```
//!
//! Slow slaves only ever lose their own oldest frames; the master reader and
//! the other slaves never wait on them.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod registry;
mod session;

use std::{future::Future, sync::Arc, time::Duration};

use dgr_core::{
    FramedStream, Listener, Transport,
    config::{DEFAULT_MAX_VARIABLE_SIZE, MAX_VARIABLE_SIZE_LIMIT},
};
use dgr_proto::{Goodbye, Hello, PROTOCOL_VERSION, Payload, PeerRole};
pub use error::RelayError;
pub use registry::{RelayStats, Registry};
use session::SessionContext;
use tokio::task::JoinSet;

/// Pause after a failed `accept` before trying again.
const ACCEPT_RETRY: Duration = Duration::from_millis(100);

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Endpoint the master connects to.
    pub master_listen: String,
    /// Endpoint slaves connect to.
    pub slave_listen: String,
    /// Frames buffered per slave before the oldest is dropped.
    pub queue_depth: usize,
    /// Per-variable size limit; peers must be configured identically.
    pub max_variable_size: usize,
    /// Deadline for a peer's `HELLO`, and for draining at shutdown.
    pub handshake_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            master_listen: "0.0.0.0:5700".to_string(),
            slave_listen: "0.0.0.0:5701".to_string(),
            queue_depth: 8,
            max_variable_size: DEFAULT_MAX_VARIABLE_SIZE,
            handshake_timeout: Duration::from_secs(2),
        }
    }
}

impl RelayConfig {
    /// Check the configuration for values the relay cannot run with.
    pub fn validate(&self) -> Result<(), RelayError> {
        let ephemeral = self.master_listen.rsplit_once(':').is_some_and(|(_, port)| port == "0");
        if self.master_listen == self.slave_listen && !ephemeral {
            return Err(RelayError::Config(format!(
                "master and slave endpoints are both {}",
                self.master_listen
            )));
        }
        if self.queue_depth == 0 {
            return Err(RelayError::Config("queue depth must be at least 1".into()));
        }
        if self.max_variable_size == 0 || self.max_variable_size > MAX_VARIABLE_SIZE_LIMIT {
            return Err(RelayError::Config(format!(
                "max variable size {} out of range",
                self.max_variable_size
            )));
        }
        Ok(())
    }

    fn hello(&self) -> Hello {
        Hello {
            version: PROTOCOL_VERSION,
            role: PeerRole::Relay,
            node_id: 0,
            max_variable_size: u32::try_from(self.max_variable_size).unwrap_or(u32::MAX),
        }
    }
}

/// A bound relay.
pub struct Relay<T: Transport> {
    config: RelayConfig,
    masters: T::Listener,
    slaves: T::Listener,
    registry: Arc<Registry>,
}

impl<T: Transport> std::fmt::Debug for Relay<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Relay<T> {
    /// Validate `config` and bind both endpoints.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The configuration is invalid
    /// - Either endpoint cannot be bound
    pub async fn bind(config: RelayConfig, transport: T) -> Result<Self, RelayError> {
        config.validate()?;

        let bind = |addr: String| {
            let transport = transport.clone();
            async move {
                transport.bind(&addr).await.map_err(|source| RelayError::Bind { addr, source })
            }
        };
        let masters = bind(config.master_listen.clone()).await?;
        let slaves = bind(config.slave_listen.clone()).await?;

        let registry = Arc::new(Registry::new(config.queue_depth));
        Ok(Self { config, masters, slaves, registry })
    }

    /// Bound master and slave addresses.
    pub fn local_addrs(&self) -> Result<(String, String), RelayError> {
        Ok((self.masters.local_addr()?, self.slaves.local_addr()?))
    }

    /// Shared registry, for observing counters while the relay runs.
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Serve until `shutdown` completes, then say `BYE` to every connection.
    ///
    /// Returns the final counters.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> RelayStats {
        let (master_addr, slave_addr) = self.local_addrs().unwrap_or_default();
        tracing::info!(master = %master_addr, slave = %slave_addr, "relay listening");

        let ctx = SessionContext {
            hello: self.config.hello(),
            handshake_timeout: self.config.handshake_timeout,
            registry: Arc::clone(&self.registry),
        };
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => break,

                accepted = self.masters.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracing::debug!(%peer, "accepted on master endpoint");
                        connections.spawn(session::serve_master(
                            FramedStream::new(stream, peer),
                            ctx.clone(),
                        ));
                    },
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed on master endpoint");
                        tokio::time::sleep(ACCEPT_RETRY).await;
                    },
                },

                accepted = self.slaves.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracing::debug!(%peer, "accepted on slave endpoint");
                        connections.spawn(session::serve_slave(
                            FramedStream::new(stream, peer),
                            ctx.clone(),
                        ));
                    },
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed on slave endpoint");
                        tokio::time::sleep(ACCEPT_RETRY).await;
                    },
                },

                Some(_) = connections.join_next(), if !connections.is_empty() => {},
            }
        }

        tracing::info!(connections = connections.len(), "relay shutting down");
        match Payload::Bye(Goodbye::new("relay shutting down"))
            .into_frame(0, 0)
            .and_then(|f| f.to_bytes())
        {
            Ok(bye) => self.registry.close_all(&bye),
            Err(e) => tracing::warn!(error = %e, "cannot encode BYE"),
        }

        let drain = async { while connections.join_next().await.is_some() {} };
        if tokio::time::timeout(self.config.handshake_timeout, drain).await.is_err() {
            tracing::warn!("connections did not drain in time");
            connections.abort_all();
        }

        let stats = self.registry.stats();
        tracing::info!(
            frames_in = stats.frames_in,
            frames_forwarded = stats.frames_forwarded,
            frames_dropped = stats.frames_dropped,
            reports_forwarded = stats.reports_forwarded,
            masters_rejected = stats.masters_rejected,
            "relay stopped"
        );
        stats
    }
}
