//! Production environment: system clock, tokio timers and OS randomness.

use std::time::Duration;

use dgr_core::env::Environment;

/// Production environment using system time and OS randomness.
///
/// - `std::time::Instant::now()` for time
/// - `tokio::time::sleep()` for async sleeping
/// - `getrandom` for node ids
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    fn now(&self) -> std::time::Instant {
        std::time::Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).unwrap_or_else(|e| {
            // Node ids only need to differ between processes of one session;
            // fall back to the clock rather than failing startup.
            tracing::error!("getrandom failed: {}", e);
            let nanos = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map_or(0, |d| d.as_nanos());
            for (byte, source) in buffer.iter_mut().zip(nanos.to_le_bytes().iter().cycle()) {
                *byte = *source;
            }
        });
    }
}
