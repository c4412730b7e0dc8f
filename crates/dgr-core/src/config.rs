//! Node configuration.
//!
//! Configuration is normally assembled by the application. For drop-in use
//! in existing render loops, [`SyncConfig::from_env`] reads the same kind of
//! environment variables the render loop already uses for display setup:
//!
//! | Variable | Meaning |
//! |---|---|
//! | `DGR_MODE` | `master`, `slave` or `standalone` (unset: standalone) |
//! | `DGR_LISTEN` | master: address to accept direct slaves on |
//! | `DGR_PEER` | slave: master address to connect to |
//! | `DGR_RELAY` | either role: relay address (master port or slave port) |
//! | `DGR_MAX_VARIABLE_SIZE` | per-variable size limit in bytes |
//! | `DGR_RECEIVE_TIMEOUT_MS` | how long a slave tick waits for a frame |

use std::time::Duration;

use dgr_proto::{FrameHeader, PeerRole};
use thiserror::Error;

use crate::{backoff::BackoffConfig, role::Role};

/// Default per-variable size limit.
pub const DEFAULT_MAX_VARIABLE_SIZE: usize = 64 * 1024;

/// Largest accepted per-variable size limit. A variable of this size still
/// fits one frame together with its name and encoding.
pub const MAX_VARIABLE_SIZE_LIMIT: usize = FrameHeader::MAX_PAYLOAD_SIZE - 64 * 1024;

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Unknown role name.
    #[error("invalid role {0:?}, expected master, slave or standalone")]
    InvalidRole(String),

    /// Role needs an endpoint that was not given.
    #[error("{role:?} node needs {hint}")]
    MissingEndpoint {
        /// Configured role.
        role: Role,
        /// Which settings would satisfy it.
        hint: &'static str,
    },

    /// More than one endpoint was given for a role that uses one.
    #[error("{role:?} node has both {first} and {second} configured")]
    ConflictingEndpoints {
        /// Configured role.
        role: Role,
        /// First setting.
        first: &'static str,
        /// Second setting.
        second: &'static str,
    },

    /// A setting has an unusable value.
    #[error("invalid value {value:?} for {key}")]
    InvalidValue {
        /// Setting name.
        key: &'static str,
        /// Offending value.
        value: String,
    },
}

/// What the node's link layer does for the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkPlan {
    /// No networking (standalone).
    Offline,
    /// Accept direct slave connections (master without relay).
    Accept {
        /// Listen address.
        listen: String,
    },
    /// Connect out to a master or relay.
    Connect {
        /// Peer address.
        addr: String,
        /// Role declared in the handshake.
        role: PeerRole,
    },
}

/// Synchronization configuration for one node.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Role of this node.
    pub role: Role,
    /// Master: address to accept direct slaves on.
    pub listen: Option<String>,
    /// Slave: master address to connect to directly.
    pub peer: Option<String>,
    /// Relay address. Masters connect to its master port, slaves to its slave
    /// port.
    pub relay: Option<String>,
    /// Per-variable size limit. Must match on every node of a session.
    pub max_variable_size: usize,
    /// How long a slave tick waits for a frame before rendering stale values.
    pub receive_timeout: Duration,
    /// How long a slave may go without a frame before it is degraded.
    pub degraded_after: Duration,
    /// Deadline for connect plus handshake, and for flushing `BYE` on exit.
    pub handshake_timeout: Duration,
    /// Per-slave outbound queue depth on a master accepting slaves directly.
    pub queue_depth: usize,
    /// Frames the render thread may hand to the I/O thread before dropping.
    pub outbound_capacity: usize,
    /// Reconnect backoff.
    pub backoff: BackoffConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            role: Role::Standalone,
            listen: None,
            peer: None,
            relay: None,
            max_variable_size: DEFAULT_MAX_VARIABLE_SIZE,
            receive_timeout: Duration::from_millis(2),
            degraded_after: Duration::from_secs(2),
            handshake_timeout: Duration::from_secs(2),
            queue_depth: 8,
            outbound_capacity: 4,
            backoff: BackoffConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Read configuration from `DGR_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(mode) = lookup("DGR_MODE") {
            config.role = mode.parse()?;
        }
        config.listen = lookup("DGR_LISTEN").filter(|s| !s.is_empty());
        config.peer = lookup("DGR_PEER").filter(|s| !s.is_empty());
        config.relay = lookup("DGR_RELAY").filter(|s| !s.is_empty());

        if let Some(value) = lookup("DGR_MAX_VARIABLE_SIZE") {
            config.max_variable_size = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue { key: "DGR_MAX_VARIABLE_SIZE", value })?;
        }
        if let Some(value) = lookup("DGR_RECEIVE_TIMEOUT_MS") {
            let millis: u64 = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue { key: "DGR_RECEIVE_TIMEOUT_MS", value })?;
            config.receive_timeout = Duration::from_millis(millis);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_variable_size == 0 || self.max_variable_size > MAX_VARIABLE_SIZE_LIMIT {
            return Err(ConfigError::InvalidValue {
                key: "max_variable_size",
                value: self.max_variable_size.to_string(),
            });
        }
        if self.queue_depth == 0 {
            return Err(ConfigError::InvalidValue { key: "queue_depth", value: "0".into() });
        }
        if self.outbound_capacity == 0 {
            return Err(ConfigError::InvalidValue { key: "outbound_capacity", value: "0".into() });
        }
        self.link_plan().map(|_| ())
    }

    /// Resolve what the link layer must do.
    pub fn link_plan(&self) -> Result<LinkPlan, ConfigError> {
        match self.role {
            Role::Standalone => Ok(LinkPlan::Offline),
            Role::Master => match (&self.relay, &self.listen) {
                (Some(_), Some(_)) => Err(ConfigError::ConflictingEndpoints {
                    role: self.role,
                    first: "relay",
                    second: "listen",
                }),
                (Some(relay), None) => {
                    Ok(LinkPlan::Connect { addr: relay.clone(), role: PeerRole::Master })
                },
                (None, Some(listen)) => Ok(LinkPlan::Accept { listen: listen.clone() }),
                (None, None) => Err(ConfigError::MissingEndpoint {
                    role: self.role,
                    hint: "a listen address or a relay address",
                }),
            },
            Role::Slave => match (&self.relay, &self.peer) {
                (Some(_), Some(_)) => Err(ConfigError::ConflictingEndpoints {
                    role: self.role,
                    first: "relay",
                    second: "peer",
                }),
                (Some(addr), None) | (None, Some(addr)) => {
                    Ok(LinkPlan::Connect { addr: addr.clone(), role: PeerRole::Slave })
                },
                (None, None) => Err(ConfigError::MissingEndpoint {
                    role: self.role,
                    hint: "a peer address or a relay address",
                }),
            },
        }
    }

    /// Per-variable size limit as carried in `HELLO`.
    pub fn wire_max_variable_size(&self) -> u32 {
        u32::try_from(self.max_variable_size).unwrap_or(u32::MAX)
    }
}
