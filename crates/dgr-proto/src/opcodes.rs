//! Frame type tags.

/// Frame type carried in byte 5 of the header.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Role declaration (initiator) or handshake acceptance (acceptor).
    Hello = 0x01,
    /// Full variable snapshot for one master tick.
    State = 0x02,
    /// Graceful disconnect; also used to reject a handshake.
    Bye = 0x03,
    /// Reverse-channel message from a slave to the master.
    Report = 0x04,
}

impl Opcode {
    /// Parse an opcode byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Hello),
            0x02 => Some(Self::State),
            0x03 => Some(Self::Bye),
            0x04 => Some(Self::Report),
            _ => None,
        }
    }

    /// Wire representation.
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_byte_mapping_is_stable() {
        for op in [Opcode::Hello, Opcode::State, Opcode::Bye, Opcode::Report] {
            assert_eq!(Opcode::from_u8(op.to_u8()), Some(op));
        }
        assert_eq!(Opcode::from_u8(0x00), None);
        assert_eq!(Opcode::from_u8(0xff), None);
    }
}
