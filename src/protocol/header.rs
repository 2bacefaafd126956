//! MicroProto opcode header
//!
//! Every frame starts with a single header byte; there is no length prefix
//! because the transport already frames messages.

use super::buffer::{ReadBuffer, WriteBuffer};
use super::{Error, Flags, OpCode, Result};

/// One-byte opcode header
///
/// # Wire Format
///
/// ```text
///  7   6   5   4   3   2   1   0
/// +---+---+---+---+---+---+---+---+
/// |  flags (4 bits) | opcode (4)  |
/// +---+---+---+---+---+---+---+---+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpHeader {
    opcode: OpCode,
    flags: Flags,
}

impl OpHeader {
    /// Create a new header
    #[must_use]
    pub const fn new(opcode: OpCode, flags: Flags) -> Self {
        Self { opcode, flags }
    }

    /// Get opcode
    #[must_use]
    pub const fn opcode(&self) -> OpCode {
        self.opcode
    }

    /// Get flags
    #[must_use]
    pub const fn flags(&self) -> Flags {
        self.flags
    }

    /// Pack into the header byte (`opcode | flags << 4`)
    #[must_use]
    pub const fn to_byte(&self) -> u8 {
        self.opcode.as_u8() | (self.flags.as_u8() << 4)
    }

    /// Parse a header byte
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOpcode`] when the low nibble is not a defined
    /// opcode.
    pub fn from_byte(byte: u8) -> Result<Self> {
        let opcode = OpCode::from_u8(byte & 0x0F).ok_or(Error::InvalidOpcode { opcode: byte & 0x0F })?;
        Ok(Self {
            opcode,
            flags: Flags::from_u8(byte >> 4).unwrap_or_default(),
        })
    }

    /// Write the header byte
    pub fn write(&self, out: &mut WriteBuffer<'_>) -> Result<()> {
        out.write_u8(self.to_byte())?;
        Ok(())
    }

    /// Read and parse the header byte
    pub fn read(input: &mut ReadBuffer<'_>) -> Result<Self> {
        let byte = input.read_u8();
        input.status()?;
        Self::from_byte(byte)
    }
}
