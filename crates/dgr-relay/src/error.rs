//! Relay error types.

use std::io;

use thiserror::Error;

/// Errors that can occur starting or running the relay.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Could not bind a listening endpoint
    #[error("cannot listen on {addr}: {source}")]
    Bind {
        /// Address that failed
        addr: String,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Transport/network error
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
}
