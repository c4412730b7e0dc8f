//! Role Manager
//!
//! Resolves what a node is for the session and tracks whether a slave is
//! actually receiving state.
//!
//! ## Degraded operation
//!
//! A slave that has not received a frame within `degraded_after` enters
//! [`LinkHealth::Degraded`]. It keeps rendering with the last applied values
//! (or its bootstrap defaults) and counts every tick that passes without a
//! frame. The first frame to arrive returns it to [`LinkHealth::Live`].
//!
//! A node whose handshake the peer refused is [`LinkHealth::Rejected`] until
//! a later handshake succeeds.

use std::{
    str::FromStr,
    time::{Duration, Instant},
};

use dgr_proto::PeerRole;

use crate::{config::ConfigError, store::StoreMode};

/// Role of this process for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Holds the authoritative state and transmits it every tick.
    Master,
    /// Mirrors the master's state.
    Slave,
    /// No synchronization; the store is a local pass-through.
    Standalone,
}

impl Role {
    /// True for the master.
    pub fn is_master(self) -> bool {
        self == Self::Master
    }

    /// True when the node takes part in synchronization.
    pub fn is_enabled(self) -> bool {
        self != Self::Standalone
    }

    /// Write mode the store must use for this role.
    pub fn store_mode(self) -> StoreMode {
        match self {
            Self::Master | Self::Standalone => StoreMode::Authoritative,
            Self::Slave => StoreMode::Mirror,
        }
    }

    /// Role declared in handshakes, `None` for standalone nodes.
    pub fn peer_role(self) -> Option<PeerRole> {
        match self {
            Self::Master => Some(PeerRole::Master),
            Self::Slave => Some(PeerRole::Slave),
            Self::Standalone => None,
        }
    }
}

impl FromStr for Role {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "master" => Ok(Self::Master),
            "slave" => Ok(Self::Slave),
            "standalone" | "none" | "" => Ok(Self::Standalone),
            other => Err(ConfigError::InvalidRole(other.to_owned())),
        }
    }
}

/// Whether a slave is currently receiving state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkHealth {
    /// No frame received yet, still within the connect timeout.
    Connecting,
    /// Frames are arriving.
    Live,
    /// No frame within the timeout; rendering last-known-good values.
    Degraded,
    /// The peer refused our handshake.
    Rejected,
}

/// Tracks role and link health.
#[derive(Debug, Clone)]
pub struct RoleManager {
    role: Role,
    health: LinkHealth,
    degraded_after: Duration,
    started_at: Instant,
    last_frame_at: Option<Instant>,
    missed_frames: u64,
}

impl RoleManager {
    /// Create a manager for `role`, starting the connect timer at `now`.
    pub fn new(role: Role, degraded_after: Duration, now: Instant) -> Self {
        let health = if role == Role::Slave { LinkHealth::Connecting } else { LinkHealth::Live };
        Self {
            role,
            health,
            degraded_after,
            started_at: now,
            last_frame_at: None,
            missed_frames: 0,
        }
    }

    /// Role of this node.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Current link health. Masters are `Live` unless rejected; standalone
    /// nodes always are.
    pub fn health(&self) -> LinkHealth {
        self.health
    }

    /// Ticks that passed without a frame while degraded.
    pub fn missed_frames(&self) -> u64 {
        self.missed_frames
    }

    /// Record that a frame was applied at `now`.
    pub fn on_frame(&mut self, now: Instant) {
        if self.health != LinkHealth::Live {
            tracing::info!(
                previous = ?self.health,
                missed = self.missed_frames,
                "receiving state from master"
            );
        }
        self.health = LinkHealth::Live;
        self.last_frame_at = Some(now);
        self.missed_frames = 0;
    }

    /// Record the outcome of the latest handshake: `Some(reason)` if the peer
    /// refused it, `None` once one succeeds.
    pub fn on_handshake(&mut self, rejection: Option<&str>, now: Instant) {
        match rejection {
            Some(reason) => {
                if self.health != LinkHealth::Rejected {
                    tracing::error!(role = ?self.role, reason, "peer refused this node");
                }
                self.health = LinkHealth::Rejected;
            },
            None if self.health == LinkHealth::Rejected => {
                tracing::info!(role = ?self.role, "handshake accepted");
                if self.role == Role::Slave {
                    self.health = LinkHealth::Connecting;
                    self.started_at = now;
                    self.last_frame_at = None;
                } else {
                    self.health = LinkHealth::Live;
                }
            },
            None => {},
        }
    }

    /// Record a slave tick that received no frame.
    ///
    /// Returns the health after the tick.
    pub fn on_missed_tick(&mut self, now: Instant) -> LinkHealth {
        if self.role != Role::Slave || self.health == LinkHealth::Rejected {
            return self.health;
        }

        let since = self.last_frame_at.unwrap_or(self.started_at);
        if now.saturating_duration_since(since) < self.degraded_after {
            return self.health;
        }

        if self.health != LinkHealth::Degraded {
            tracing::warn!(
                timeout = ?self.degraded_after,
                "no state from master, rendering last known values"
            );
            self.health = LinkHealth::Degraded;
        }

        self.missed_frames += 1;
        tracing::debug!(missed = self.missed_frames, "missed frame");

        self.health
    }
}
