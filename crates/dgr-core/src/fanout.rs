//! Per-slave outbound queues.
//!
//! Every slave connection owns a bounded [`SlaveQueue`]. Broadcasting pushes
//! the encoded frame into each queue and never waits: a full queue drops its
//! oldest frame. A slow or stalled slave therefore loses intermediate frames
//! but never delays the broadcaster or any other slave.
//!
//! Frames are shared as [`Bytes`], so a broadcast encodes once and clones a
//! reference count per slave.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, RwLock,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use bytes::Bytes;
use tokio::sync::Notify;

/// What happened to a pushed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Queued with room to spare.
    Queued,
    /// Queued after dropping the oldest pending frame.
    DroppedOldest,
    /// The queue is closed; the frame was discarded.
    Closed,
}

/// Bounded drop-oldest queue feeding one slave connection.
#[derive(Debug)]
pub struct SlaveQueue {
    id: u64,
    capacity: usize,
    frames: Mutex<VecDeque<Bytes>>,
    closed: AtomicBool,
    dropped: AtomicU64,
    notify: Notify,
}

impl SlaveQueue {
    /// Create a queue holding at most `capacity` frames.
    pub fn new(id: u64, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            id,
            capacity,
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Bytes>> {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Connection id of the slave.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Enqueue a frame without waiting.
    pub fn push(&self, frame: Bytes) -> PushOutcome {
        if self.closed.load(Ordering::Acquire) {
            return PushOutcome::Closed;
        }

        let outcome = {
            let mut frames = self.lock();
            let outcome = if frames.len() >= self.capacity {
                frames.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
                PushOutcome::DroppedOldest
            } else {
                PushOutcome::Queued
            };
            frames.push_back(frame);
            outcome
        };

        self.notify.notify_one();
        outcome
    }

    /// Wait for the next frame. Returns `None` once the queue is closed and
    /// drained.
    pub async fn next(&self) -> Option<Bytes> {
        loop {
            let notified = self.notify.notified();

            if let Some(frame) = self.lock().pop_front() {
                return Some(frame);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }

            notified.await;
        }
    }

    /// Stop accepting frames. Frames already queued are still delivered.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    /// True once closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Frames currently queued.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Frames dropped because the slave fell behind.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Set of slave queues that receive every broadcast frame.
#[derive(Debug)]
pub struct FanOut {
    depth: usize,
    queues: RwLock<HashMap<u64, Arc<SlaveQueue>>>,
}

/// Totals from one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Broadcast {
    /// Queues the frame was pushed into.
    pub delivered: usize,
    /// Queues that had to drop their oldest frame.
    pub dropped: usize,
}

impl FanOut {
    /// Create an empty fan-out whose queues hold `depth` frames each.
    pub fn new(depth: usize) -> Self {
        Self { depth: depth.max(1), queues: RwLock::new(HashMap::new()) }
    }

    /// Add a queue for slave `id`.
    pub fn register(&self, id: u64) -> Arc<SlaveQueue> {
        let queue = Arc::new(SlaveQueue::new(id, self.depth));
        let previous = self
            .queues
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::clone(&queue));
        if let Some(previous) = previous {
            previous.close();
        }
        queue
    }

    /// Remove and close the queue for slave `id`.
    pub fn unregister(&self, id: u64) -> Option<Arc<SlaveQueue>> {
        let queue = self.queues.write().unwrap_or_else(PoisonError::into_inner).remove(&id);
        if let Some(queue) = &queue {
            queue.close();
        }
        queue
    }

    /// Push `frame` to every registered slave.
    pub fn broadcast(&self, frame: &Bytes) -> Broadcast {
        let queues: Vec<Arc<SlaveQueue>> = self
            .queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        let mut totals = Broadcast::default();
        for queue in queues {
            match queue.push(frame.clone()) {
                PushOutcome::Queued => totals.delivered += 1,
                PushOutcome::DroppedOldest => {
                    totals.delivered += 1;
                    totals.dropped += 1;
                    tracing::debug!(slave = queue.id(), "slave behind, dropped oldest frame");
                },
                PushOutcome::Closed => {},
            }
        }
        totals
    }

    /// Number of registered slaves.
    pub fn len(&self) -> usize {
        self.queues.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// True when no slave is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every queue. Writers drain what is queued and then finish.
    pub fn close_all(&self) {
        let queues = self.queues.read().unwrap_or_else(PoisonError::into_inner);
        for queue in queues.values() {
            queue.close();
        }
    }
}
