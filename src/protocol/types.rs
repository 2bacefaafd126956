//! MicroProto opcodes and flag nibbles

use std::fmt;

/// MicroProto opcodes (low nibble of the header byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// Handshake and resync
    Hello = 0x0,
    /// One-way property value update
    PropertyUpdate = 0x1,
    /// Create or update schema items
    SchemaUpsert = 0x3,
    /// Remove schema items
    SchemaDelete = 0x4,
    /// Remote procedure call
    Rpc = 0x5,
    /// Liveness probe
    Ping = 0x6,
    /// Error report
    Error = 0x7,
    /// Fetch a resource body
    ResourceGet = 0x8,
    /// Create or update a resource
    ResourcePut = 0x9,
    /// Delete a resource
    ResourceDelete = 0xA,
}

impl OpCode {
    /// Every defined opcode, in wire order.
    pub const ALL: [Self; 10] = [
        Self::Hello,
        Self::PropertyUpdate,
        Self::SchemaUpsert,
        Self::SchemaDelete,
        Self::Rpc,
        Self::Ping,
        Self::Error,
        Self::ResourceGet,
        Self::ResourcePut,
        Self::ResourceDelete,
    ];

    /// Convert from the low nibble of a header byte
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(Self::Hello),
            0x1 => Some(Self::PropertyUpdate),
            0x3 => Some(Self::SchemaUpsert),
            0x4 => Some(Self::SchemaDelete),
            0x5 => Some(Self::Rpc),
            0x6 => Some(Self::Ping),
            0x7 => Some(Self::Error),
            0x8 => Some(Self::ResourceGet),
            0x9 => Some(Self::ResourcePut),
            0xA => Some(Self::ResourceDelete),
            _ => None,
        }
    }

    /// Convert to byte
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether the opcode uses flag bit0 to mark responses
    #[must_use]
    pub const fn has_response_form(self) -> bool {
        matches!(
            self,
            Self::Hello
                | Self::Rpc
                | Self::Ping
                | Self::ResourceGet
                | Self::ResourcePut
                | Self::ResourceDelete
        )
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Hello => "HELLO",
            Self::PropertyUpdate => "PROPERTY_UPDATE",
            Self::SchemaUpsert => "SCHEMA_UPSERT",
            Self::SchemaDelete => "SCHEMA_DELETE",
            Self::Rpc => "RPC",
            Self::Ping => "PING",
            Self::Error => "ERROR",
            Self::ResourceGet => "RESOURCE_GET",
            Self::ResourcePut => "RESOURCE_PUT",
            Self::ResourceDelete => "RESOURCE_DELETE",
        };
        write!(f, "{name}")
    }
}

/// Per-opcode flag nibble (high nibble of the header byte)
///
/// Bit meanings depend on the opcode; the named constants below alias the
/// same four bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Flags(u8);

impl Flags {
    /// Valid flag bits mask
    pub const VALID_MASK: u8 = 0x0F;

    /// bit0: HELLO, RPC, PING, RESOURCE_* response marker
    pub const IS_RESPONSE: u8 = 1 << 0;
    /// bit0: PROPERTY_UPDATE, SCHEMA_UPSERT, SCHEMA_DELETE batch marker
    pub const BATCH: u8 = 1 << 0;
    /// bit0: ERROR advisory resync hint
    pub const SCHEMA_MISMATCH: u8 = 1 << 0;

    /// bit1: PROPERTY_UPDATE carries a batch timestamp
    pub const HAS_TIMESTAMP: u8 = 1 << 1;
    /// bit1: RPC request expects a response
    pub const NEEDS_RESPONSE: u8 = 1 << 1;
    /// bit1: RPC response succeeded
    pub const SUCCESS: u8 = 1 << 1;
    /// bit1: RESOURCE_* response carries an error
    pub const STATUS_ERROR: u8 = 1 << 1;
    /// bit1: RESOURCE_PUT request carries a header blob
    pub const UPDATE_HEADER: u8 = 1 << 1;
    /// bit1: ERROR carries a trailing related-opcode byte
    pub const HAS_RELATED_OPCODE: u8 = 1 << 1;

    /// bit2: RPC response carries a return value
    pub const HAS_RETURN_VALUE: u8 = 1 << 2;
    /// bit2: RESOURCE_PUT request carries a body blob
    pub const UPDATE_BODY: u8 = 1 << 2;

    /// Create empty flags
    #[must_use]
    pub const fn new() -> Self {
        Self(0)
    }

    /// Create from the high nibble value (already shifted down)
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        if value & !Self::VALID_MASK == 0 {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Convert to byte
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self.0
    }

    /// Set a flag
    #[must_use]
    pub const fn with(mut self, flag: u8) -> Self {
        debug_assert!(flag & !Self::VALID_MASK == 0, "invalid flag bit");
        self.0 |= flag;
        self
    }

    /// Set a flag when `condition` holds
    #[must_use]
    pub const fn with_if(self, flag: u8, condition: bool) -> Self {
        if condition { self.with(flag) } else { self }
    }

    /// Check if flag is set
    #[must_use]
    pub const fn has(self, flag: u8) -> bool {
        (self.0 & flag) != 0
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06b}", self.0)
    }
}
