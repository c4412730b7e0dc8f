//! Single-slot handoff between the I/O thread and the render thread.
//!
//! A slave only ever needs the newest frame: an older frame that was never
//! applied is superseded by the next one. The mailbox therefore holds at most
//! one value and [`Mailbox::put`] replaces whatever is waiting.

use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

/// Result of waiting on a mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received<T> {
    /// A value arrived.
    Ready(T),
    /// Nothing arrived within the timeout.
    Timeout,
    /// The producer side closed and nothing is pending.
    Closed,
}

#[derive(Debug)]
struct Slot<T> {
    value: Option<T>,
    closed: bool,
    overwritten: u64,
}

#[derive(Debug)]
struct Shared<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

/// Most-recent-wins single-value channel.
#[derive(Debug)]
pub struct Mailbox<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Mailbox<T> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Mailbox<T> {
    /// Create an empty mailbox.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                slot: Mutex::new(Slot { value: None, closed: false, overwritten: 0 }),
                ready: Condvar::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.shared.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `value`, replacing any value not yet taken.
    ///
    /// Returns true if a pending value was replaced.
    pub fn put(&self, value: T) -> bool {
        let replaced = {
            let mut slot = self.lock();
            let replaced = slot.value.replace(value).is_some();
            if replaced {
                slot.overwritten += 1;
            }
            replaced
        };
        self.shared.ready.notify_one();
        replaced
    }

    /// Take the pending value without waiting.
    pub fn take(&self) -> Option<T> {
        self.lock().value.take()
    }

    /// Wait up to `timeout` for a value.
    ///
    /// A zero timeout only checks for a pending value. A pending value is
    /// delivered even after the mailbox was closed.
    pub fn recv_timeout(&self, timeout: Duration) -> Received<T> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.lock();

        loop {
            if let Some(value) = slot.value.take() {
                return Received::Ready(value);
            }
            if slot.closed {
                return Received::Closed;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Received::Timeout;
            }

            let (guard, _) = self
                .shared
                .ready
                .wait_timeout(slot, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            slot = guard;
        }
    }

    /// Close the mailbox. Waiters wake up and see [`Received::Closed`] once
    /// any pending value was taken.
    pub fn close(&self) {
        self.lock().closed = true;
        self.shared.ready.notify_all();
    }

    /// True once [`Mailbox::close`] was called.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Values replaced before anyone took them.
    pub fn overwritten(&self) -> u64 {
        self.lock().overwritten
    }
}
