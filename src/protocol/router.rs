//! Opcode dispatch
//!
//! [`Router`] decodes a frame and hands the message to the matching
//! [`MessageHandler`] callback. Handlers only override what they serve;
//! everything else is logged and dropped.

use tracing::{debug, warn};

use super::codec::{Message, decode};
use super::message::{ErrorMessage, HelloRequest, Ping, RpcRequest};
use super::resource::{ResourcePutRequest, ResourceRequest};
use super::schema::{SchemaDelete, SchemaUpsert};
use super::update::{PropertyUpdate, SchemaLookup};
use super::{Error, OpCode, OpHeader};

/// Receiver side of a MicroProto connection
pub trait MessageHandler {
    /// Schema used to decode PROPERTY_UPDATE values
    fn schema(&self) -> &dyn SchemaLookup;

    /// HELLO request
    fn on_hello(&mut self, hello: HelloRequest) {
        debug!(device_id = hello.device_id, "HELLO ignored");
    }

    /// PROPERTY_UPDATE
    fn on_property_update(&mut self, update: PropertyUpdate<'_>) {
        debug!(items = update.items.len(), "PROPERTY_UPDATE ignored");
    }

    /// SCHEMA_UPSERT
    fn on_schema_upsert(&mut self, upsert: SchemaUpsert<'_>) {
        debug!(items = upsert.items.len(), "SCHEMA_UPSERT ignored");
    }

    /// SCHEMA_DELETE
    fn on_schema_delete(&mut self, delete: SchemaDelete) {
        debug!(items = delete.items.len(), "SCHEMA_DELETE ignored");
    }

    /// RPC request
    fn on_rpc_request(&mut self, request: RpcRequest<'_>) {
        debug!(function_id = request.function_id, "RPC ignored");
    }

    /// PING request
    fn on_ping(&mut self, ping: Ping) {
        debug!(payload = ping.payload, "PING ignored");
    }

    /// ERROR from the peer
    fn on_error(&mut self, error: ErrorMessage<'_>) {
        warn!(code = %error.code, message = %error.message, "peer reported error");
    }

    /// RESOURCE_GET request
    fn on_resource_get(&mut self, request: ResourceRequest) {
        debug!(property_id = request.property_id, "RESOURCE_GET ignored");
    }

    /// RESOURCE_PUT request
    fn on_resource_put(&mut self, request: ResourcePutRequest<'_>) {
        debug!(property_id = request.property_id, "RESOURCE_PUT ignored");
    }

    /// RESOURCE_DELETE request
    fn on_resource_delete(&mut self, request: ResourceRequest) {
        debug!(property_id = request.property_id, "RESOURCE_DELETE ignored");
    }

    /// Any response-form message
    fn on_response(&mut self, message: Message<'_>) {
        warn!(opcode = %message.opcode(), "unmatched response dropped");
    }

    /// Frame that failed to decode. `opcode` is set when the header byte
    /// was readable.
    fn on_protocol_error(&mut self, error: &Error, opcode: Option<OpCode>) {
        warn!(%error, ?opcode, "frame rejected");
    }
}

/// Stateless frame dispatcher
#[derive(Debug, Clone, Copy, Default)]
pub struct Router;

impl Router {
    /// Create a router
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode `frame` and invoke the matching callback.
    ///
    /// Returns `false` when the frame was rejected through
    /// [`MessageHandler::on_protocol_error`].
    pub fn dispatch<H: MessageHandler + ?Sized>(&self, frame: &[u8], handler: &mut H) -> bool {
        let message = match decode(frame, handler.schema()) {
            Ok(message) => message,
            Err(err) => {
                let opcode = frame
                    .first()
                    .and_then(|byte| OpHeader::from_byte(*byte).ok())
                    .map(|header| header.opcode());
                handler.on_protocol_error(&err, opcode);
                return false;
            }
        };

        match message {
            Message::HelloRequest(hello) => handler.on_hello(hello),
            Message::PropertyUpdate(update) => handler.on_property_update(update),
            Message::SchemaUpsert(upsert) => handler.on_schema_upsert(upsert),
            Message::SchemaDelete(delete) => handler.on_schema_delete(delete),
            Message::RpcRequest(request) => handler.on_rpc_request(request),
            Message::Ping(ping) if !ping.is_response => handler.on_ping(ping),
            Message::Error(error) => handler.on_error(error),
            Message::ResourceGet(request) => handler.on_resource_get(request),
            Message::ResourcePut(request) => handler.on_resource_put(request),
            Message::ResourceDelete(request) => handler.on_resource_delete(request),
            response => handler.on_response(response),
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::TypeDef;

    #[derive(Default)]
    struct Recorder {
        seen: Vec<&'static str>,
        errors: Vec<Option<OpCode>>,
    }

    impl SchemaLookup for Recorder {
        fn type_def(&self, _id: u16) -> Option<&TypeDef> {
            None
        }
    }

    impl MessageHandler for Recorder {
        fn schema(&self) -> &dyn SchemaLookup {
            self
        }

        fn on_ping(&mut self, _ping: Ping) {
            self.seen.push("ping");
        }

        fn on_hello(&mut self, _hello: HelloRequest) {
            self.seen.push("hello");
        }

        fn on_response(&mut self, _message: Message<'_>) {
            self.seen.push("response");
        }

        fn on_protocol_error(&mut self, _error: &Error, opcode: Option<OpCode>) {
            self.errors.push(opcode);
        }
    }

    #[test]
    fn test_dispatch_by_opcode() {
        let router = Router::new();
        let mut handler = Recorder::default();
        assert!(router.dispatch(&[0x06, 0x01], &mut handler));
        assert!(router.dispatch(&[0x00, 0x01, 0x80, 0x04, 0x00], &mut handler));
        assert!(router.dispatch(&[0x16, 0x01], &mut handler));
        assert_eq!(handler.seen, vec!["ping", "hello", "response"]);
    }

    #[test]
    fn test_protocol_errors_report_opcode() {
        let router = Router::new();
        let mut handler = Recorder::default();
        assert!(!router.dispatch(&[0x0F], &mut handler));
        assert!(!router.dispatch(&[0x06], &mut handler));
        assert!(!router.dispatch(&[], &mut handler));
        assert_eq!(handler.errors, vec![None, Some(OpCode::Ping), None]);
    }

    #[test]
    fn test_unhandled_callbacks_use_defaults() {
        let router = Router::new();
        let mut handler = Recorder::default();
        assert!(router.dispatch(&[0x0A, 0x01, 0x02, 0x03], &mut handler));
        assert!(handler.seen.is_empty());
    }
}
