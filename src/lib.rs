//! MicroProto - typed property and resource protocol for LED controllers
//!
//! A device declares its tunables once as typed properties. The runtime
//! validates writes, tracks what changed, persists what must survive a
//! reboot and keeps every connected client in sync over a compact binary
//! protocol carried by WebSocket or BLE.
//!
//! # Quick Start
//!
//! ```rust
//! use microproto::property::{UiHints, ValueConstraints, Widget};
//! use microproto::{Declaration, PropertySystem, ScalarProperty};
//!
//! let mut system = PropertySystem::new();
//! let brightness = system.register(
//!     Declaration::new("brightness")
//!         .persistent()
//!         .ui(UiHints::new().widget(Widget::SLIDER)),
//!     ScalarProperty::new(128u8).with_constraints(ValueConstraints::new().range(0u8, 255u8)),
//! )?;
//!
//! assert!(system.set(brightness, 200)?);
//! assert_eq!(system.value(brightness), Some(200));
//! # Ok::<(), microproto::Error>(())
//! ```
//!
//! # Layout
//!
//! - [`protocol`]: wire cursors, message codec, routing and metrics
//! - [`property`]: typed property kinds, constraints and type definitions
//! - [`registry`]: the property registry, dirty tracking and persistence
//! - [`store`]: resource body storage
//! - [`transport`]: the per-client server, inbound ring and transports
//! - [`animation`]: the LED engine's properties and shader selection
//! - [`relay`]: the LoRa store-and-forward relay

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod animation;
pub mod property;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod store;
pub mod transport;

pub use property::{Declaration, Handle, Property, PropertyId, ScalarProperty};
pub use protocol::{Error, ErrorCode, Message, PROTOCOL_VERSION, Result};
pub use registry::{Interest, Persistence, PropertySystem};
pub use store::{MemoryBodyStore, ResourceBodyStore};
pub use transport::{Server, ServerConfig, Transport};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
