//! State replication payloads.

use serde::{Deserialize, Serialize};

/// Upper bound on the CBOR bytes a [`WireVariable`] adds to its name and
/// value: map and field keys, length prefixes and the generation.
pub const VARIABLE_OVERHEAD: usize = 64;

/// Upper bound on the CBOR bytes of the [`StateSnapshot`] envelope.
pub const SNAPSHOT_OVERHEAD: usize = 32;

/// One variable as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireVariable {
    /// Variable name.
    pub name: String,
    /// Master-side generation counter of the value.
    pub generation: u64,
    /// Raw value bytes, carried as a CBOR byte string.
    #[serde(with = "serde_bytes")]
    pub bytes: Vec<u8>,
}

impl WireVariable {
    /// Largest encoded size of a variable with these name and value lengths.
    pub fn max_encoded_len(name_len: usize, value_len: usize) -> usize {
        name_len.saturating_add(value_len).saturating_add(VARIABLE_OVERHEAD)
    }
}

/// Full snapshot of the master's store for one tick.
///
/// Variables are sorted by name, so two identical stores encode to identical
/// bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Every variable in the master's store.
    pub variables: Vec<WireVariable>,
}

/// Reverse-channel message from a slave.
///
/// The contents are application defined; the relay and the link layer only
/// move them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    /// Opaque application bytes.
    #[serde(with = "serde_bytes")]
    pub bytes: Vec<u8>,
}
