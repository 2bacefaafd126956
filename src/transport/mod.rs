//! Transport adapters
//!
//! The core never runs on a driver task. Drivers copy inbound bytes into an
//! [`Inbox`]; the main loop drains it through [`Server::poll`] and the
//! server writes outbound frames through a [`Transport`].

mod config;
mod error;
mod inbox;
mod memory;
mod server;

use bytes::Bytes;

pub use config::{DEFAULT_BROADCAST_INTERVAL, ServerConfig};
pub use error::TransportError;
pub use inbox::{Inbox, InboxEvent};
pub use memory::MemoryTransport;
pub use server::{RpcHandler, Server};

/// Client slot index assigned by the transport driver
pub type ClientId = u8;

/// Outbound half of a framed transport (WebSocket, BLE GATT).
pub trait Transport {
    /// Largest frame `client` accepts
    fn mtu(&self, client: ClientId) -> usize;

    /// Queue one complete frame for `client`
    fn send(&mut self, client: ClientId, frame: Bytes) -> Result<(), TransportError>;
}
