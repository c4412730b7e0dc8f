//! Session payloads: handshake and disconnect.

use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

/// Role a peer declares in its `HELLO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum PeerRole {
    /// Authoritative source of state.
    Master = 1,
    /// Mirror of the master's state.
    Slave = 2,
    /// Relay broker (only ever sent in a handshake acceptance).
    Relay = 3,
}

/// Handshake message.
///
/// Sent first by the initiator of every connection. The acceptor answers with
/// its own `Hello` to accept, or with a [`Goodbye`] carrying the rejection
/// reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    /// Protocol version.
    pub version: u8,
    /// Declared role of the sender.
    pub role: PeerRole,
    /// Random per-process id of the sender.
    pub node_id: u64,
    /// Per-variable size limit configured on the sender.
    ///
    /// Nodes with different limits were built or configured differently and
    /// could disagree on which variables are legal, so the acceptor refuses
    /// the connection.
    pub max_variable_size: u32,
}

/// Graceful disconnect.
///
/// Sent by either side before closing. After sending or receiving `Goodbye`,
/// both parties should close the connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goodbye {
    /// Reason for disconnect (for logging).
    pub reason: String,
}

impl Goodbye {
    /// Build a goodbye with the given reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}
