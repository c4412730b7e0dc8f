//! DGR synchronization core.
//!
//! Everything a node needs to keep its render state identical to the
//! master's, independent of threads and sockets:
//!
//! - [`store`]: named fixed-size variables with generations
//! - [`role`]: master/slave/standalone and slave link health
//! - [`synchronizer`]: builds and applies sequenced `STATE` frames
//! - [`codec`], [`handshake`], [`transport`]: framed async streams
//! - [`fanout`], [`mailbox`], [`backoff`]: queues and retry policy used by the
//!   node runtime and the relay
//!
//! The store and the synchronizer are Sans-IO: they take frames and return
//! frames. The [`env::Environment`] trait supplies time and randomness so the
//! same code runs under deterministic simulation.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backoff;
pub mod codec;
pub mod config;
pub mod env;
pub mod error;
pub mod fanout;
pub mod handshake;
pub mod mailbox;
pub mod role;
pub mod store;
pub mod synchronizer;
pub mod transport;

pub use backoff::{Backoff, BackoffConfig};
pub use codec::{FrameReader, FrameWriter, FramedStream};
pub use config::{ConfigError, LinkPlan, SyncConfig};
pub use env::Environment;
pub use error::SyncError;
pub use fanout::{FanOut, PushOutcome, SlaveQueue};
pub use mailbox::{Mailbox, Received};
pub use role::{LinkHealth, Role, RoleManager};
pub use store::{Store, StoreError, StoreMode, Variable};
pub use synchronizer::{ApplyOutcome, FrameSynchronizer, SyncPhase};
pub use transport::{Listener, TcpAcceptor, TcpTransport, Transport};
