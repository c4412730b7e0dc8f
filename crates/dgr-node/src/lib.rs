//! DGR node runtime.
//!
//! Embeds synchronization into a render loop:
//!
//! ```rust,ignore
//! use dgr_node::SyncContext;
//!
//! let mut dgr = SyncContext::from_env()?;
//! loop {
//!     dgr.set_or_get_value("ball", &mut ball)?;
//!     dgr.set_or_get_value("paddleA", &mut paddle_a)?;
//!     dgr.update()?;
//!     if dgr.is_master() || !dgr.is_enabled() {
//!         simulate(&mut ball, &mut paddle_a);
//!     }
//!     render(&ball, &paddle_a);
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! render thread                         dgr-io thread (tokio, current-thread)
//!   SyncContext                           connect_loop  (slave, master via relay)
//!     SyncSession                         accept_loop   (master serving slaves)
//!       Store, FrameSynchronizer,
//!       RoleManager          <-- LinkHandle / LinkEndpoints -->
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod context;
pub mod link;
mod session;
mod system_env;

pub use context::SyncContext;
pub use link::InboundReport;
pub use session::{SyncSession, Tick};
pub use system_env::SystemEnv;
