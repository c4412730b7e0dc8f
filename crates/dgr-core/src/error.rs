//! Synchronization error types.

use std::time::Duration;

use dgr_proto::ProtocolError;
use thiserror::Error;

use crate::{config::ConfigError, role::Role, store::StoreError};

/// Errors from the synchronization layer.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Transport connection dropped or could not be established.
    #[error("connection to {peer} lost: {reason}")]
    ConnectionLost {
        /// Address or description of the peer.
        peer: String,
        /// What went wrong.
        reason: String,
    },

    /// Nothing arrived within the allotted time.
    #[error("timed out after {waited:?}")]
    Timeout {
        /// How long the caller waited.
        waited: Duration,
    },

    /// Variable larger than the configured per-variable maximum.
    #[error("variable {name:?} is {size} bytes, limit is {max}")]
    SizeExceeded {
        /// Variable name.
        name: String,
        /// Offered size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Variable size disagrees with the size registered for that name.
    #[error("variable {name:?} registered with {expected} bytes, got {actual}")]
    SchemaMismatch {
        /// Variable name.
        name: String,
        /// Size registered first.
        expected: usize,
        /// Size offered now.
        actual: usize,
    },

    /// Peer sent something the protocol does not allow.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Peer refused our handshake.
    #[error("handshake rejected: {reason}")]
    HandshakeRejected {
        /// Reason given in the peer's `BYE`.
        reason: String,
    },

    /// Operation is not available in this role.
    #[error("{operation} is not available to a {role:?} node")]
    WrongRole {
        /// The attempted operation.
        operation: &'static str,
        /// Role of this node.
        role: Role,
    },

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Local runtime could not be started (thread spawn, socket bind).
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl SyncError {
    /// Returns true if this error is fatal (unrecoverable).
    ///
    /// Fatal errors mean the nodes of a session were built or configured
    /// differently. Everything else is a transient network condition that the
    /// link layer recovers from.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::SizeExceeded { .. }
            | Self::SchemaMismatch { .. }
            | Self::WrongRole { .. }
            | Self::Config(_)
            | Self::Runtime(_) => true,

            Self::ConnectionLost { .. }
            | Self::Timeout { .. }
            | Self::ProtocolViolation(_)
            | Self::HandshakeRejected { .. } => false,
        }
    }

    /// Shorthand for [`SyncError::ConnectionLost`].
    pub fn lost(peer: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::ConnectionLost { peer: peer.into(), reason: reason.to_string() }
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        Self::ProtocolViolation(err.to_string())
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::SizeExceeded { name, size, max } => Self::SizeExceeded { name, size, max },
            StoreError::SchemaMismatch { name, expected, actual } => {
                Self::SchemaMismatch { name, expected, actual }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_errors_are_fatal() {
        let err = SyncError::SchemaMismatch { name: "ball".into(), expected: 12, actual: 8 };
        assert!(err.is_fatal());

        let err = SyncError::SizeExceeded { name: "ball".into(), size: 10, max: 4 };
        assert!(err.is_fatal());
    }

    #[test]
    fn network_errors_are_transient() {
        assert!(!SyncError::Timeout { waited: Duration::from_millis(5) }.is_fatal());
        assert!(!SyncError::lost("relay:5701", "reset").is_fatal());
        assert!(!SyncError::ProtocolViolation("bad magic".into()).is_fatal());
        assert!(!SyncError::HandshakeRejected { reason: "master already connected".into() }
            .is_fatal());
    }

    #[test]
    fn error_display() {
        let err = SyncError::SchemaMismatch { name: "ball".into(), expected: 12, actual: 8 };
        assert_eq!(err.to_string(), "variable \"ball\" registered with 12 bytes, got 8");
    }

    #[test]
    fn protocol_errors_become_violations() {
        let err: SyncError = ProtocolError::UnknownOpcode(0x42).into();
        assert!(matches!(err, SyncError::ProtocolViolation(_)));
    }
}
