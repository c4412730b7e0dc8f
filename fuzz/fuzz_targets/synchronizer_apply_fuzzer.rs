//! Fuzz target for the slave side of [`FrameSynchronizer`]
//!
//! A slave applies whatever the link hands it. Frames may arrive from
//! restarted masters, out of order, or damaged.
//!
//! # Strategy
//!
//! - Origins: a handful of master ids so restarts are common
//! - Sequences: arbitrary, including repeats and regressions
//! - Variables: names and sizes drawn from a small pool so schema clashes
//!   happen
//! - Garbage: non-STATE opcodes and undecodable payloads
//!
//! # Invariants
//!
//! - NEVER panic
//! - For an unchanged origin the watermark never decreases
//! - A stale frame leaves the store untouched
//! - An applied frame moves the watermark to its sequence
//! - Phase is back to `Idle` after every apply

#![no_main]

use arbitrary::Arbitrary;
use dgr_core::{ApplyOutcome, FrameSynchronizer, Role, Store, StoreMode, SyncPhase};
use dgr_proto::{Frame, FrameHeader, Opcode, Payload, StateSnapshot, WireVariable};
use libfuzzer_sys::fuzz_target;

const NAMES: [&str; 3] = ["ball", "camera", "clock"];

#[derive(Debug, Arbitrary)]
struct FuzzVariable {
    name: u8,
    len: u8,
    fill: u8,
    generation: u64,
}

#[derive(Debug, Arbitrary)]
enum FuzzFrame {
    State { origin: u8, sequence: u16, variables: Vec<FuzzVariable> },
    Garbage { opcode: u8, origin: u8, sequence: u16, payload: Vec<u8> },
}

fn build(frame: &FuzzFrame) -> Frame {
    match frame {
        FuzzFrame::State { origin, sequence, variables } => {
            let variables = variables
                .iter()
                .map(|v| WireVariable {
                    name: NAMES[usize::from(v.name) % NAMES.len()].to_string(),
                    generation: v.generation,
                    bytes: vec![v.fill; usize::from(v.len % 24)],
                })
                .collect();
            Payload::State(StateSnapshot { variables })
                .into_frame(u64::from(*sequence), u64::from(*origin % 4))
                .unwrap()
        },
        FuzzFrame::Garbage { opcode, origin, sequence, payload } => {
            let opcode = match opcode % 4 {
                0 => Opcode::Hello,
                1 => Opcode::State,
                2 => Opcode::Bye,
                _ => Opcode::Report,
            };
            let mut header = FrameHeader::new(opcode);
            header.set_sequence(u64::from(*sequence));
            header.set_origin(u64::from(*origin % 4));
            Frame::new(header, payload.clone())
        },
    }
}

fuzz_target!(|frames: Vec<FuzzFrame>| {
    let mut store = Store::new(StoreMode::Mirror, 16);
    let mut sync = FrameSynchronizer::new(Role::Slave, 0xF00D);

    for fuzzed in &frames {
        let frame = build(fuzzed);
        let origin_before = sync.origin();
        let watermark_before = sync.watermark();
        let snapshot_before = store.snapshot();

        sync.begin_receive();
        let result = sync.apply(&mut store, &frame);
        assert_eq!(sync.phase(), SyncPhase::Idle);

        match result {
            Ok(ApplyOutcome::Applied { sequence, .. }) => {
                assert_eq!(sync.watermark(), Some(sequence));
                assert_eq!(sync.origin(), Some(frame.header.origin()));
                if origin_before == sync.origin() {
                    assert!(watermark_before.is_none_or(|w| sequence > w));
                }
            },
            Ok(ApplyOutcome::Stale { sequence, watermark }) => {
                assert!(sequence <= watermark);
                assert_eq!(store.snapshot(), snapshot_before);
            },
            Err(_) => {
                if origin_before == Some(frame.header.origin()) {
                    assert_eq!(sync.watermark(), watermark_before);
                }
            },
        }
    }
});
