//! Relay connection registry.
//!
//! Holds the single master slot, the per-slave queues and the counters
//! reported as [`RelayStats`]. Shared by every connection task.

use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicU64, Ordering},
};

use bytes::Bytes;
use dgr_core::{FanOut, SlaveQueue};
use tokio::sync::mpsc;

/// Reports the relay may buffer for a master that is slow to read them.
const REPORT_CAPACITY: usize = 64;

/// Relay counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// `STATE` frames received from masters.
    pub frames_in: u64,
    /// Frame copies queued for slaves.
    pub frames_forwarded: u64,
    /// Frame copies dropped because a slave fell behind.
    pub frames_dropped: u64,
    /// Reports forwarded to the master.
    pub reports_forwarded: u64,
    /// Masters turned away because one was already connected.
    pub masters_rejected: u64,
    /// Slaves connected right now.
    pub slaves_connected: u64,
}

struct MasterSlot {
    id: u64,
    reports: mpsc::Sender<Bytes>,
}

/// Shared relay state.
pub struct Registry {
    master: Mutex<Option<MasterSlot>>,
    fanout: FanOut,
    next_id: AtomicU64,
    frames_in: AtomicU64,
    frames_forwarded: AtomicU64,
    frames_dropped: AtomicU64,
    reports_forwarded: AtomicU64,
    masters_rejected: AtomicU64,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("master", &self.master_slot().as_ref().map(|m| m.id))
            .field("slaves", &self.fanout.len())
            .finish_non_exhaustive()
    }
}

impl Registry {
    /// Create an empty registry whose slave queues hold `queue_depth` frames.
    pub fn new(queue_depth: usize) -> Self {
        Self {
            master: Mutex::new(None),
            fanout: FanOut::new(queue_depth),
            next_id: AtomicU64::new(1),
            frames_in: AtomicU64::new(0),
            frames_forwarded: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            reports_forwarded: AtomicU64::new(0),
            masters_rejected: AtomicU64::new(0),
        }
    }

    fn master_slot(&self) -> MutexGuard<'_, Option<MasterSlot>> {
        self.master.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Id for a new connection.
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Claim the master slot for connection `id`.
    ///
    /// Returns the receiver for reports bound to this master, or `None` if a
    /// master is already connected.
    pub fn claim_master(&self, id: u64) -> Option<mpsc::Receiver<Bytes>> {
        let mut slot = self.master_slot();
        if slot.is_some() {
            self.masters_rejected.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        let (tx, rx) = mpsc::channel(REPORT_CAPACITY);
        *slot = Some(MasterSlot { id, reports: tx });
        Some(rx)
    }

    /// Release the master slot if connection `id` still holds it.
    pub fn release_master(&self, id: u64) {
        let mut slot = self.master_slot();
        if slot.as_ref().is_some_and(|m| m.id == id) {
            *slot = None;
        }
    }

    /// True while a master is connected.
    pub fn has_master(&self) -> bool {
        self.master_slot().is_some()
    }

    /// Queue an encoded `STATE` frame for every slave.
    pub fn forward_state(&self, frame: &Bytes) {
        self.frames_in.fetch_add(1, Ordering::Relaxed);
        let totals = self.fanout.broadcast(frame);
        self.frames_forwarded.fetch_add(totals.delivered as u64, Ordering::Relaxed);
        self.frames_dropped.fetch_add(totals.dropped as u64, Ordering::Relaxed);
    }

    /// Pass an encoded `REPORT` frame to the current master.
    ///
    /// Dropped when no master is connected or its report queue is full.
    pub fn forward_report(&self, slave: u64, frame: Bytes) {
        let slot = self.master_slot();
        let Some(master) = slot.as_ref() else {
            tracing::debug!(slave, "no master connected, dropping report");
            return;
        };
        if master.reports.try_send(frame).is_ok() {
            self.reports_forwarded.fetch_add(1, Ordering::Relaxed);
        } else {
            tracing::debug!(slave, master = master.id, "master report queue full, dropping report");
        }
    }

    /// Add a queue for slave `id`.
    pub fn register_slave(&self, id: u64) -> Arc<SlaveQueue> {
        self.fanout.register(id)
    }

    /// Remove slave `id`.
    pub fn unregister_slave(&self, id: u64) {
        self.fanout.unregister(id);
    }

    /// Say `BYE` to every connection and stop accepting frames.
    ///
    /// Slave writers drain their queues (ending with the `BYE`) and finish.
    /// The master's writer sends the `BYE` and finishes once its report
    /// channel closes.
    pub fn close_all(&self, bye: &Bytes) {
        self.fanout.broadcast(bye);
        self.fanout.close_all();

        if let Some(master) = self.master_slot().take() {
            let _ = master.reports.try_send(bye.clone());
        }
    }

    /// Current counters.
    pub fn stats(&self) -> RelayStats {
        RelayStats {
            frames_in: self.frames_in.load(Ordering::Relaxed),
            frames_forwarded: self.frames_forwarded.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            reports_forwarded: self.reports_forwarded.load(Ordering::Relaxed),
            masters_rejected: self.masters_rejected.load(Ordering::Relaxed),
            slaves_connected: self.fanout.len() as u64,
        }
    }
}
