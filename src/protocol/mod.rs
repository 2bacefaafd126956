//! MicroProto protocol core
//!
//! Wire cursors, opcode header, message types and the frame codec. Nothing
//! in this module touches a transport; frames go in and out as byte slices.

mod buffer;
mod codec;
mod error;
mod header;
mod message;
mod metrics;
mod resource;
mod router;
mod schema;
mod types;
mod update;

pub use buffer::{
    MAX_PROPID, MAX_VARINT_LEN, ReadBuffer, WireError, WriteBuffer, encode_to_vec, propid_len,
    varint_len,
};
pub use codec::{Message, decode, encode};
pub use error::{Error, ErrorCode, ResourceStatus, Result};
pub use header::OpHeader;
pub use message::{ErrorMessage, HelloRequest, HelloResponse, Ping, RpcFailure, RpcRequest, RpcResponse};
pub(crate) use metrics::Direction;
pub use metrics::{Metrics, MetricsSnapshot};
pub use resource::{
    ResourceDeleteResponse, ResourceFailure, ResourceGetResponse, ResourcePayload,
    ResourcePutRequest, ResourcePutResponse, ResourceRequest, ResourceResponse,
};
pub use router::{MessageHandler, Router};
pub use schema::{DeleteItem, ItemKind, SchemaDelete, SchemaItem, SchemaUpsert};
pub use types::{Flags, OpCode};
pub use update::{PackReport, PropertyUpdate, SchemaLookup, UpdateBatch, UpdateItem, pack_updates};

/// Protocol version spoken by this implementation
pub const PROTOCOL_VERSION: u8 = 1;

/// Most items one batched message may carry (count byte stores `n - 1`)
pub const MAX_BATCH_ITEMS: usize = 256;
