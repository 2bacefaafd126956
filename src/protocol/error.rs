//! MicroProto error types

use std::fmt;

use thiserror::Error;

use super::buffer::WireError;
use crate::property::{ResourceError, ValidationError, ValueKind};
use crate::registry::StorageError;
use crate::transport::TransportError;

/// MicroProto errors
#[derive(Error, Debug)]
pub enum Error {
    /// Wire cursor failure
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// Opcode outside the defined set
    #[error("invalid opcode: {opcode:#x}")]
    InvalidOpcode {
        /// Offending opcode nibble
        opcode: u8,
    },

    /// Frame body could not be parsed
    #[error("malformed {opcode:#x} frame: {source}")]
    Malformed {
        /// Opcode of the frame
        opcode: u8,
        /// Underlying cursor error
        source: WireError,
    },

    /// No property registered under this id
    #[error("unknown property id {id}")]
    UnknownProperty {
        /// Requested id
        id: u16,
    },

    /// No RPC function registered under this id
    #[error("unknown function id {id}")]
    UnknownFunction {
        /// Requested id
        id: u16,
    },

    /// Write to a read-only property over the update channel
    #[error("property {id} is read-only")]
    ReadOnly {
        /// Property id
        id: u16,
    },

    /// Operation does not apply to this kind of property
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// Kind the operation needs
        expected: ValueKind,
        /// Kind the property has
        found: ValueKind,
    },

    /// Constraint rejected the value
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Index outside the container bounds
    #[error("index {index} out of range (len {len})")]
    OutOfRange {
        /// Requested index
        index: usize,
        /// Container length
        len: usize,
    },

    /// Value bytes left over after decoding
    #[error("{remaining} trailing bytes after value")]
    TrailingBytes {
        /// Unconsumed byte count
        remaining: usize,
    },

    /// Registry has no free id
    #[error("registry full ({max} properties)")]
    RegistryFull {
        /// Registry capacity
        max: usize,
    },

    /// Flush subscriber slots exhausted
    #[error("subscriber slots exhausted ({max})")]
    SubscribersFull {
        /// Slot count
        max: usize,
    },

    /// Type definition is not usable
    #[error("invalid type definition: {reason}")]
    InvalidSchema {
        /// What is wrong
        reason: &'static str,
    },

    /// Batch encoder was given nothing to encode
    #[error("batch must contain at least one item")]
    EmptyBatch,

    /// Batch encoder was given more items than the count byte can carry
    #[error("batch of {count} items exceeds {max}")]
    BatchTooLarge {
        /// Item count
        count: usize,
        /// Maximum per batch
        max: usize,
    },

    /// Encoded message does not fit the transport MTU
    #[error("message of {size} bytes exceeds MTU {mtu}")]
    ExceedsMtu {
        /// Encoded size
        size: usize,
        /// Transport limit
        mtu: usize,
    },

    /// Resource collection failure
    #[error("resource error: {0}")]
    Resource(#[from] ResourceError),

    /// Persistence backend failure
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Transport failure
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl Error {
    /// Protocol error code reported to peers
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidOpcode { .. } | Self::Malformed { .. } => ErrorCode::InvalidOpcode,
            Self::UnknownProperty { .. } => ErrorCode::InvalidPropertyId,
            Self::UnknownFunction { .. } => ErrorCode::InvalidFunctionId,
            Self::ReadOnly { .. } => ErrorCode::PermissionDenied,
            Self::TypeMismatch { .. } | Self::TrailingBytes { .. } => ErrorCode::TypeMismatch,
            Self::OutOfRange { .. } => ErrorCode::OutOfRange,
            Self::Wire(WireError::Overflow | WireError::LengthOverflow { .. })
            | Self::ExceedsMtu { .. } => ErrorCode::BufferOverflow,
            Self::RegistryFull { .. } | Self::SubscribersFull { .. } => ErrorCode::NotImplemented,
            Self::Wire(_)
            | Self::Validation(_)
            | Self::InvalidSchema { .. }
            | Self::EmptyBatch
            | Self::BatchTooLarge { .. }
            | Self::Resource(_)
            | Self::Storage(_)
            | Self::Transport(_) => ErrorCode::ValidationFailed,
        }
    }

    /// Whether the peer's view is stale and a HELLO resync is indicated
    #[must_use]
    pub const fn requires_resync(&self) -> bool {
        matches!(
            self,
            Self::UnknownProperty { .. }
                | Self::UnknownFunction { .. }
                | Self::ReadOnly { .. }
                | Self::TypeMismatch { .. }
                | Self::TrailingBytes { .. }
        )
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error codes carried by ERROR messages (u16 little-endian)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorCode {
    /// No error
    Success,
    /// Unknown opcode
    InvalidOpcode,
    /// No such property in registry
    InvalidPropertyId,
    /// No such RPC function
    InvalidFunctionId,
    /// Wire tag disagrees with schema
    TypeMismatch,
    /// Constraint rejected value
    ValidationFailed,
    /// Numeric bound rejected value
    OutOfRange,
    /// Write to readonly
    PermissionDenied,
    /// Optional feature absent
    NotImplemented,
    /// Peer speaks another protocol version
    ProtocolVersionMismatch,
    /// Encode would exceed MTU
    BufferOverflow,
    /// Application-specific code (0x000B and above)
    Application(u16),
}

impl ErrorCode {
    /// Convert from the wire value
    #[must_use]
    pub const fn from_u16(value: u16) -> Self {
        match value {
            0x0000 => Self::Success,
            0x0001 => Self::InvalidOpcode,
            0x0002 => Self::InvalidPropertyId,
            0x0003 => Self::InvalidFunctionId,
            0x0004 => Self::TypeMismatch,
            0x0005 => Self::ValidationFailed,
            0x0006 => Self::OutOfRange,
            0x0007 => Self::PermissionDenied,
            0x0008 => Self::NotImplemented,
            0x0009 => Self::ProtocolVersionMismatch,
            0x000A => Self::BufferOverflow,
            other => Self::Application(other),
        }
    }

    /// Convert to the wire value
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        match self {
            Self::Success => 0x0000,
            Self::InvalidOpcode => 0x0001,
            Self::InvalidPropertyId => 0x0002,
            Self::InvalidFunctionId => 0x0003,
            Self::TypeMismatch => 0x0004,
            Self::ValidationFailed => 0x0005,
            Self::OutOfRange => 0x0006,
            Self::PermissionDenied => 0x0007,
            Self::NotImplemented => 0x0008,
            Self::ProtocolVersionMismatch => 0x0009,
            Self::BufferOverflow => 0x000A,
            Self::Application(code) => code,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Success => "success",
            Self::InvalidOpcode => "invalid_opcode",
            Self::InvalidPropertyId => "invalid_property_id",
            Self::InvalidFunctionId => "invalid_function_id",
            Self::TypeMismatch => "type_mismatch",
            Self::ValidationFailed => "validation_failed",
            Self::OutOfRange => "out_of_range",
            Self::PermissionDenied => "permission_denied",
            Self::NotImplemented => "not_implemented",
            Self::ProtocolVersionMismatch => "protocol_version_mismatch",
            Self::BufferOverflow => "buffer_overflow",
            Self::Application(code) => return write!(f, "application({code:#06x})"),
        };
        write!(f, "{name}")
    }
}

/// Status byte inside RESOURCE_* error responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ResourceStatus {
    /// No resource with that id
    NotFound = 1,
    /// Header or body rejected
    InvalidData = 2,
    /// Backend failure
    Error = 3,
    /// No free slot or storage space
    OutOfSpace = 4,
}

impl ResourceStatus {
    /// Convert from byte
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::NotFound),
            2 => Some(Self::InvalidData),
            3 => Some(Self::Error),
            4 => Some(Self::OutOfSpace),
            _ => None,
        }
    }

    /// Convert to byte
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotFound => "not_found",
            Self::InvalidData => "invalid_data",
            Self::Error => "error",
            Self::OutOfSpace => "out_of_space",
        };
        write!(f, "{name}")
    }
}
