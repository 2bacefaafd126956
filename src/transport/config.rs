//! Server tunables.

use std::time::Duration;

/// Broadcast interval for roughly 15 Hz fan-out.
pub const DEFAULT_BROADCAST_INTERVAL: Duration = Duration::from_millis(67);

/// Build-time server configuration options.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ServerConfig {
    /// Number of client slots.
    pub max_clients: usize,
    /// Largest frame the server encodes or accepts.
    pub tx_buffer_size: usize,
    /// Minimum time between two broadcast flushes.
    pub broadcast_interval: Duration,
    /// Send the HELLO schema as one batched SCHEMA_UPSERT when it fits.
    pub batch_schema: bool,
}

impl ServerConfig {
    /// WebSocket preset: 4 clients, 4 KiB frames, batched schema.
    #[must_use]
    pub const fn websocket() -> Self {
        Self {
            max_clients: 4,
            tx_buffer_size: 4096,
            broadcast_interval: DEFAULT_BROADCAST_INTERVAL,
            batch_schema: true,
        }
    }

    /// BLE preset: 3 clients, 512-byte frames, one schema item per frame.
    #[must_use]
    pub const fn ble() -> Self {
        Self {
            max_clients: 3,
            tx_buffer_size: 512,
            broadcast_interval: DEFAULT_BROADCAST_INTERVAL,
            batch_schema: false,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::websocket()
    }
}
