//! Transport-level error types.

use thiserror::Error;

use super::ClientId;

/// Failures reported by a [`Transport`](super::Transport) send.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// No connected client in this slot.
    #[error("client {client} is not connected")]
    NotConnected {
        /// Client slot
        client: ClientId,
    },

    /// Frame is larger than the client's MTU.
    #[error("frame of {len} bytes exceeds MTU {mtu}")]
    FrameTooLarge {
        /// Frame length
        len: usize,
        /// Client MTU
        mtu: usize,
    },

    /// Outbound queue has no room; the frame was not sent.
    #[error("send queue full for client {client}")]
    QueueFull {
        /// Client slot
        client: ClientId,
    },

    /// Every client slot is taken.
    #[error("no free client slot ({max} max)")]
    NoFreeSlot {
        /// Slot count
        max: usize,
    },
}
