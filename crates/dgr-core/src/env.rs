//! Environment abstraction for deterministic testing.
//!
//! The `Environment` trait decouples synchronization logic from system
//! resources (time, randomness). This enables:
//!
//! - Deterministic Simulation: Turmoil provides a virtual clock and seeded RNG,
//!   so link timeouts, backoff and degraded-mode detection replay exactly.
//!
//! - Production Runtime: the node runtime uses real system resources without
//!   any change to the store or synchronizer.
//!
//! # Invariants
//!
//! - Monotonicity: `env.now()` must never go backwards
//! - Determinism: Given the same seed, `random_bytes()` produces the same
//!   sequence
//! - Isolation: Implementations must not share global state

use std::time::{Duration, Instant};

/// Abstract environment providing time, randomness, and async sleeping.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Returns the current time.
    ///
    /// Must never return a value smaller than a previous call.
    fn now(&self) -> Instant;

    /// Sleeps for the specified duration.
    ///
    /// Only link drivers sleep (reconnect backoff). The store and the
    /// synchronizer never do.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`.
    ///
    /// Used for node ids, which also tag each master session in `STATE`
    /// frame headers.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}
