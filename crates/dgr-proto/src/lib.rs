//! # DGR Protocol: Wire Format
//!
//! Binary framing for DGR state replication between master, relay and slave
//! processes.
//!
//! ## Protocol Design
//!
//! - **FrameHeader**: 32 bytes of raw binary (Big Endian) carrying the
//!   opcode, sequence number, origin and a CRC-32 checksum. The relay routes
//!   on the header alone and never decodes a `STATE` payload.
//! - **Payload**: Variable-length CBOR-encoded structured data.
//!
//! ## Frame Types
//!
//! | Opcode | Direction | Payload |
//! |--------|-----------|---------|
//! | `HELLO` | both | role declaration / handshake accept |
//! | `STATE` | master → slaves | full variable snapshot |
//! | `BYE` | both | graceful disconnect or handshake rejection |
//! | `REPORT` | slave → master | opaque reverse-channel message |
//!
//! ## Validation
//!
//! Every decode checks magic, version, opcode, the 16 MiB payload limit and
//! the checksum before any payload byte is handed out. There are no
//! unchecked fast paths.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod errors;
pub mod frame;
pub mod header;
pub mod opcodes;
pub mod payloads;

pub use errors::{ProtocolError, Result};
pub use frame::Frame;
pub use header::FrameHeader;
pub use opcodes::Opcode;
pub use payloads::{
    Goodbye, Hello, Payload, PeerRole, Report, SNAPSHOT_OVERHEAD, StateSnapshot, VARIABLE_OVERHEAD,
    WireVariable,
};

/// Current protocol version carried in every header and `HELLO`.
pub const PROTOCOL_VERSION: u8 = 1;
