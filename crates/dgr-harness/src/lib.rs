//! Deterministic simulation harness for DGR.
//!
//! Turmoil-based implementations of the `Environment` and `Transport` traits,
//! so masters, slaves and the relay run unchanged on a simulated network
//! with a virtual clock. Scenarios live in `tests/`.
//!
//! # Example
//!
//! ```rust,ignore
//! use dgr_harness::{SimEnv, spawn_node, tick};
//!
//! let mut sim = turmoil::Builder::new().build();
//!
//! sim.host("master", || async {
//!     let config = SyncConfig {
//!         role: Role::Master,
//!         listen: Some("0.0.0.0:5700".into()),
//!         ..Default::default()
//!     };
//!     let mut session = spawn_node(config, SimEnv::with_seed(1)).await?;
//!     loop {
//!         tick(&mut session)?;
//!         tokio::time::sleep(Duration::from_millis(50)).await;
//!     }
//! });
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod node;
mod sim_env;
mod sim_transport;

pub use node::{spawn_node, tick};
pub use sim_env::SimEnv;
pub use sim_transport::{SimListener, SimTransport};
