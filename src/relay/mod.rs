//! LoRa store-and-forward relay.
//!
//! A second application of the wire cursors: nodes gossip short location
//! and text messages, announce a state hash in periodic beacons, and repair
//! divergence by trading digests and sync requests.
//!
//! ```
//! use microproto::relay::{MessageStore, RelayMessage, StoreConfig};
//!
//! let mut store = MessageStore::new(StoreConfig::default());
//! let msg = RelayMessage::location(0x01, 1, 0, 3, 4);
//! assert!(store.store(msg.clone(), 0)?);
//! assert!(!store.store(msg, 0)?);
//! # Ok::<(), microproto::relay::RelayError>(())
//! ```

mod message;
mod node;
mod store;

use thiserror::Error;

use crate::protocol::WireError;

pub use message::{
    ENTRY_SIZE, MAX_FRAME_SIZE, MAX_MSG_PAYLOAD, MAX_TEXT_LEN, MESSAGE_HEADER_SIZE, MsgType,
    NO_NODE, RelayMessage,
};
pub use node::{NodeConfig, RelayNode};
pub use store::{
    DigestEntry, MAX_DIGEST_SIZE, MAX_SENDERS, MSGS_PER_SENDER, MessageStore, Presence,
    SenderLog, StoreConfig, SyncNeed, SyncNeeds,
};

/// Relay failures
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayError {
    /// Frame shorter than the fixed header
    #[error("relay frame too short: {len} bytes")]
    TooShort {
        /// Frame length
        len: usize,
    },

    /// Payload longer than the frame allows
    #[error("relay payload too large: {len} bytes")]
    PayloadTooLarge {
        /// Payload length
        len: usize,
    },

    /// Unrecognized type byte
    #[error("unknown relay message type {code:#04x}")]
    UnknownType {
        /// Type byte
        code: u8,
    },

    /// Payload does not match its type's layout
    #[error("invalid {kind:?} payload")]
    InvalidPayload {
        /// Message type
        kind: MsgType,
    },

    /// Every sender slot is taken
    #[error("sender table full ({max} senders)")]
    SendersFull {
        /// Slot count
        max: usize,
    },

    /// Cursor failure
    #[error(transparent)]
    Wire(#[from] WireError),
}
