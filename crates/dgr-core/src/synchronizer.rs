//! Frame Synchronizer
//!
//! Turns the store into `STATE` frames on the master and applies them on
//! slaves. The synchronizer is a pure state machine: it never touches the
//! network, so the link layer decides how frames travel.
//!
//! ## Ordering
//!
//! Every `STATE` frame carries a sequence number that increases by one per
//! master tick, and the master's node id as origin. A slave keeps a watermark
//! (the highest sequence applied) and ignores frames at or below it, so a
//! duplicated or reordered frame can never roll state back. Gaps are normal:
//! a slave that falls behind only sees the newest frame, which is a complete
//! snapshot.
//!
//! A frame from a different origin means the master restarted. Its sequence
//! numbers start over, so the watermark is reset.
//!
//! ## Phases
//!
//! ```text
//! master: Idle -> Gathering -> Transmitting -> Idle
//! slave:  Idle -> Applying -> Idle
//! ```

use dgr_proto::{Frame, Opcode, Payload, ProtocolError, StateSnapshot, WireVariable};

use crate::{
    error::SyncError,
    role::Role,
    store::{Store, Variable},
};

/// Where the synchronizer is within a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Between ticks.
    Idle,
    /// Master: reading the store.
    Gathering,
    /// Master: frame built, waiting to be handed to the link.
    Transmitting,
    /// Slave: waiting for or applying a frame.
    Applying,
}

/// Result of applying a `STATE` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// State was applied.
    Applied {
        /// Sequence number of the frame.
        sequence: u64,
        /// Frames between the previous watermark and this one that were never
        /// seen.
        skipped: u64,
        /// Variables written.
        variables: usize,
    },
    /// Frame was at or below the watermark and was ignored.
    Stale {
        /// Sequence number of the frame.
        sequence: u64,
        /// Current watermark.
        watermark: u64,
    },
}

/// Builds and applies `STATE` frames.
#[derive(Debug, Clone)]
pub struct FrameSynchronizer {
    role: Role,
    node_id: u64,
    phase: SyncPhase,
    next_sequence: u64,
    watermark: Option<u64>,
    origin: Option<u64>,
    skipped: u64,
}

impl FrameSynchronizer {
    /// Create a synchronizer. `node_id` is stamped as origin on every frame a
    /// master produces.
    pub fn new(role: Role, node_id: u64) -> Self {
        Self {
            role,
            node_id,
            phase: SyncPhase::Idle,
            next_sequence: 1,
            watermark: None,
            origin: None,
            skipped: 0,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    /// Highest sequence applied on a slave.
    pub fn watermark(&self) -> Option<u64> {
        self.watermark
    }

    /// Origin of the frames currently being applied.
    pub fn origin(&self) -> Option<u64> {
        self.origin
    }

    /// Frames never seen by this slave since it started.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Sequence number the next gathered frame will carry.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Snapshot the store into the next `STATE` frame.
    ///
    /// Master only. Every call consumes a sequence number, whether or not the
    /// frame reaches anyone.
    pub fn gather(&mut self, store: &Store) -> Result<Frame, SyncError> {
        if !self.role.is_master() {
            return Err(SyncError::WrongRole { operation: "gather", role: self.role });
        }

        self.phase = SyncPhase::Gathering;
        let variables = store
            .snapshot()
            .into_iter()
            .map(|v| WireVariable { name: v.name, generation: v.generation, bytes: v.bytes })
            .collect();

        let sequence = self.next_sequence;
        let encoded =
            Payload::State(StateSnapshot { variables }).into_frame(sequence, self.node_id);
        let frame = match encoded {
            Ok(frame) => frame,
            Err(err) => {
                self.phase = SyncPhase::Idle;
                return Err(match err {
                    ProtocolError::PayloadTooLarge { size, max } => {
                        SyncError::SizeExceeded { name: "snapshot".into(), size, max }
                    },
                    other => other.into(),
                });
            },
        };
        self.next_sequence += 1;
        self.phase = SyncPhase::Transmitting;

        tracing::trace!(sequence, size = frame.encoded_len(), "gathered state");
        Ok(frame)
    }

    /// The gathered frame was handed to the link.
    pub fn transmitted(&mut self) {
        self.phase = SyncPhase::Idle;
    }

    /// A slave tick starts waiting for a frame.
    pub fn begin_receive(&mut self) {
        self.phase = SyncPhase::Applying;
    }

    /// A slave tick ended without a frame.
    pub fn receive_timed_out(&mut self) {
        self.phase = SyncPhase::Idle;
    }

    /// Apply a `STATE` frame to the store.
    ///
    /// # Errors
    ///
    /// - `ProtocolViolation` if the frame is not a decodable `STATE` frame.
    /// - `SizeExceeded` or `SchemaMismatch` if the master's variables do not
    ///   fit this node's store. These are fatal.
    pub fn apply(&mut self, store: &mut Store, frame: &Frame) -> Result<ApplyOutcome, SyncError> {
        self.phase = SyncPhase::Applying;
        let outcome = self.apply_inner(store, frame);
        self.phase = SyncPhase::Idle;
        outcome
    }

    fn apply_inner(&mut self, store: &mut Store, frame: &Frame) -> Result<ApplyOutcome, SyncError> {
        if frame.opcode() != Some(Opcode::State) {
            return Err(SyncError::ProtocolViolation(format!(
                "expected STATE frame, got opcode {}",
                frame.header.opcode()
            )));
        }

        let sequence = frame.header.sequence();
        let origin = frame.header.origin();

        if self.origin.is_some_and(|current| current != origin) {
            tracing::info!(
                previous = self.origin,
                origin,
                "master restarted, resetting sequence watermark"
            );
            self.watermark = None;
        }

        if let Some(watermark) = self.watermark {
            if sequence <= watermark {
                tracing::debug!(sequence, watermark, "ignoring stale frame");
                return Ok(ApplyOutcome::Stale { sequence, watermark });
            }
        }

        let Payload::State(snapshot) = Payload::from_frame(frame)? else {
            return Err(SyncError::ProtocolViolation("STATE frame without state payload".into()));
        };

        let variables: Vec<Variable> = snapshot
            .variables
            .into_iter()
            .map(|v| Variable { name: v.name, bytes: v.bytes, generation: v.generation })
            .collect();
        let written = store.apply_canonical(&variables)?;

        let skipped = self.watermark.map_or(0, |w| sequence - w - 1);
        if skipped > 0 {
            self.skipped += skipped;
            tracing::debug!(sequence, skipped, total = self.skipped, "skipped frames");
        }

        self.watermark = Some(sequence);
        self.origin = Some(origin);

        Ok(ApplyOutcome::Applied { sequence, skipped, variables: written })
    }
}

#[cfg(test)]
mod tests {
    use dgr_proto::{FrameHeader, Goodbye, Report};

    use super::*;
    use crate::store::StoreMode;

    fn master_with_ball(value: u8) -> (FrameSynchronizer, Store) {
        let mut store = Store::new(StoreMode::Authoritative, 64);
        store.set_or_get("ball", &mut [value; 12]).unwrap();
        (FrameSynchronizer::new(Role::Master, 0xA1), store)
    }

    #[test]
    fn sequences_increase_per_gather() {
        let (mut sync, store) = master_with_ball(1);
        let first = sync.gather(&store).unwrap();
        sync.transmitted();
        let second = sync.gather(&store).unwrap();

        assert_eq!(first.header.sequence(), 1);
        assert_eq!(second.header.sequence(), 2);
        assert_eq!(second.header.origin(), 0xA1);
        assert_eq!(sync.phase(), SyncPhase::Transmitting);
    }

    #[test]
    fn oversized_snapshot_is_fatal() {
        let half = FrameHeader::MAX_PAYLOAD_SIZE / 2;
        let mut store = Store::new(StoreMode::Authoritative, half);
        store
            .apply_canonical(&[
                Variable { name: "left".into(), bytes: vec![0xFF; half], generation: 1 },
                Variable { name: "right".into(), bytes: vec![0xFF; half], generation: 1 },
            ])
            .unwrap();
        let mut sync = FrameSynchronizer::new(Role::Master, 0xA1);

        let err = sync.gather(&store).unwrap_err();
        assert!(matches!(err, SyncError::SizeExceeded { .. }));
        assert!(err.is_fatal());
        assert_eq!(sync.phase(), SyncPhase::Idle);
        assert_eq!(sync.next_sequence(), 1);
    }

    #[test]
    fn slave_cannot_gather() {
        let store = Store::new(StoreMode::Mirror, 64);
        let mut sync = FrameSynchronizer::new(Role::Slave, 2);
        assert!(matches!(sync.gather(&store), Err(SyncError::WrongRole { .. })));
    }

    #[test]
    fn apply_copies_master_state() {
        let (mut master, store) = master_with_ball(9);
        let frame = master.gather(&store).unwrap();

        let mut slave_store = Store::new(StoreMode::Mirror, 64);
        let mut slave = FrameSynchronizer::new(Role::Slave, 2);
        let outcome = slave.apply(&mut slave_store, &frame).unwrap();

        assert_eq!(outcome, ApplyOutcome::Applied { sequence: 1, skipped: 0, variables: 1 });
        assert_eq!(slave_store.get("ball"), Some(&[9u8; 12][..]));
        assert_eq!(slave.watermark(), Some(1));
        assert_eq!(slave.phase(), SyncPhase::Idle);
    }

    #[test]
    fn stale_and_duplicate_frames_are_ignored() {
        let (mut master, mut store) = master_with_ball(1);
        let old = master.gather(&store).unwrap();
        store.set_or_get("ball", &mut [2u8; 12]).unwrap();
        let new = master.gather(&store).unwrap();

        let mut slave_store = Store::new(StoreMode::Mirror, 64);
        let mut slave = FrameSynchronizer::new(Role::Slave, 2);
        slave.apply(&mut slave_store, &new).unwrap();

        assert_eq!(
            slave.apply(&mut slave_store, &old).unwrap(),
            ApplyOutcome::Stale { sequence: 1, watermark: 2 }
        );
        assert_eq!(
            slave.apply(&mut slave_store, &new).unwrap(),
            ApplyOutcome::Stale { sequence: 2, watermark: 2 }
        );
        assert_eq!(slave_store.get("ball"), Some(&[2u8; 12][..]));
    }

    #[test]
    fn gaps_are_counted() {
        let (mut master, store) = master_with_ball(1);
        let frames: Vec<_> = (0..5).map(|_| master.gather(&store).unwrap()).collect();

        let mut slave_store = Store::new(StoreMode::Mirror, 64);
        let mut slave = FrameSynchronizer::new(Role::Slave, 2);
        slave.apply(&mut slave_store, &frames[0]).unwrap();

        let outcome = slave.apply(&mut slave_store, &frames[4]).unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied { sequence: 5, skipped: 3, variables: 1 });
        assert_eq!(slave.skipped(), 3);
    }

    #[test]
    fn new_origin_resets_watermark() {
        let (mut first, store) = master_with_ball(1);
        for _ in 0..10 {
            first.gather(&store).unwrap();
        }
        let late = first.gather(&store).unwrap();

        let mut slave_store = Store::new(StoreMode::Mirror, 64);
        let mut slave = FrameSynchronizer::new(Role::Slave, 2);
        slave.apply(&mut slave_store, &late).unwrap();
        assert_eq!(slave.watermark(), Some(11));

        let mut restarted = FrameSynchronizer::new(Role::Master, 0xB2);
        let fresh = restarted.gather(&store).unwrap();

        let outcome = slave.apply(&mut slave_store, &fresh).unwrap();
        assert!(matches!(outcome, ApplyOutcome::Applied { sequence: 1, skipped: 0, .. }));
        assert_eq!(slave.origin(), Some(0xB2));
    }

    #[test]
    fn non_state_frames_are_violations() {
        let mut slave_store = Store::new(StoreMode::Mirror, 64);
        let mut slave = FrameSynchronizer::new(Role::Slave, 2);

        let bye = Payload::Bye(Goodbye::new("x")).into_frame(1, 1).unwrap();
        assert!(matches!(
            slave.apply(&mut slave_store, &bye),
            Err(SyncError::ProtocolViolation(_))
        ));

        let report = Payload::Report(Report { bytes: vec![] }).into_frame(1, 1).unwrap();
        assert!(slave.apply(&mut slave_store, &report).is_err());
        assert_eq!(slave.watermark(), None);
    }

    #[test]
    fn schema_mismatch_is_fatal_and_leaves_watermark() {
        let (mut master, store) = master_with_ball(1);
        let frame = master.gather(&store).unwrap();

        let mut slave_store = Store::new(StoreMode::Mirror, 64);
        slave_store.set_or_get("ball", &mut [0u8; 8]).unwrap();
        let mut slave = FrameSynchronizer::new(Role::Slave, 2);

        let err = slave.apply(&mut slave_store, &frame).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(slave.watermark(), None);
    }
}
