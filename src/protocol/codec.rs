//! MicroProto frame codec (encode/decode)
//!
//! One frame carries exactly one message: the opcode header byte followed
//! by the opcode-specific body. Decoding is zero-copy; strings, blobs and
//! update values borrow from the input frame.

use bytes::Bytes;

use super::buffer::{MAX_GROWABLE_ENCODE, ReadBuffer, WireError, WriteBuffer};
use super::message::{ErrorMessage, HelloRequest, HelloResponse, Ping, RpcRequest, RpcResponse};
use super::resource::{
    ResourceDeleteResponse, ResourceGetResponse, ResourcePutRequest, ResourcePutResponse,
    ResourceRequest,
};
use super::schema::{SchemaDelete, SchemaUpsert};
use super::update::{PropertyUpdate, SchemaLookup};
use super::{Error, Flags, OpCode, OpHeader, Result};

/// Any MicroProto message
#[derive(Debug, Clone, PartialEq)]
pub enum Message<'a> {
    /// HELLO request
    HelloRequest(HelloRequest),
    /// HELLO response
    HelloResponse(HelloResponse),
    /// PROPERTY_UPDATE
    PropertyUpdate(PropertyUpdate<'a>),
    /// SCHEMA_UPSERT
    SchemaUpsert(SchemaUpsert<'a>),
    /// SCHEMA_DELETE
    SchemaDelete(SchemaDelete),
    /// RPC request
    RpcRequest(RpcRequest<'a>),
    /// RPC response
    RpcResponse(RpcResponse<'a>),
    /// PING request or response
    Ping(Ping),
    /// ERROR
    Error(ErrorMessage<'a>),
    /// RESOURCE_GET request
    ResourceGet(ResourceRequest),
    /// RESOURCE_GET response
    ResourceGetResponse(ResourceGetResponse<'a>),
    /// RESOURCE_PUT request
    ResourcePut(ResourcePutRequest<'a>),
    /// RESOURCE_PUT response
    ResourcePutResponse(ResourcePutResponse<'a>),
    /// RESOURCE_DELETE request
    ResourceDelete(ResourceRequest),
    /// RESOURCE_DELETE response
    ResourceDeleteResponse(ResourceDeleteResponse<'a>),
}

impl Message<'_> {
    /// Opcode of this message
    #[must_use]
    pub const fn opcode(&self) -> OpCode {
        match self {
            Self::HelloRequest(_) | Self::HelloResponse(_) => OpCode::Hello,
            Self::PropertyUpdate(_) => OpCode::PropertyUpdate,
            Self::SchemaUpsert(_) => OpCode::SchemaUpsert,
            Self::SchemaDelete(_) => OpCode::SchemaDelete,
            Self::RpcRequest(_) | Self::RpcResponse(_) => OpCode::Rpc,
            Self::Ping(_) => OpCode::Ping,
            Self::Error(_) => OpCode::Error,
            Self::ResourceGet(_) | Self::ResourceGetResponse(_) => OpCode::ResourceGet,
            Self::ResourcePut(_) | Self::ResourcePutResponse(_) => OpCode::ResourcePut,
            Self::ResourceDelete(_) | Self::ResourceDeleteResponse(_) => OpCode::ResourceDelete,
        }
    }

    /// Whether this is the response form of a request/response opcode
    #[must_use]
    pub const fn is_response(&self) -> bool {
        match self {
            Self::Ping(ping) => ping.is_response,
            Self::HelloResponse(_)
            | Self::RpcResponse(_)
            | Self::ResourceGetResponse(_)
            | Self::ResourcePutResponse(_)
            | Self::ResourceDeleteResponse(_) => true,
            _ => false,
        }
    }

    /// Write the frame into `out`
    pub fn encode(&self, out: &mut WriteBuffer<'_>) -> Result<()> {
        match self {
            Self::HelloRequest(m) => m.encode(out),
            Self::HelloResponse(m) => m.encode(out),
            Self::PropertyUpdate(m) => m.encode(out),
            Self::SchemaUpsert(m) => m.encode(out),
            Self::SchemaDelete(m) => m.encode(out),
            Self::RpcRequest(m) => m.encode(out),
            Self::RpcResponse(m) => m.encode(out),
            Self::Ping(m) => m.encode(out),
            Self::Error(m) => m.encode(out),
            Self::ResourceGet(m) => m.encode(OpCode::ResourceGet, out),
            Self::ResourceGetResponse(m) => m.encode(out),
            Self::ResourcePut(m) => m.encode(out),
            Self::ResourcePutResponse(m) => m.encode(out),
            Self::ResourceDelete(m) => m.encode(OpCode::ResourceDelete, out),
            Self::ResourceDeleteResponse(m) => m.encode(out),
        }
    }

    /// Encode into an owned frame no larger than `mtu`
    ///
    /// # Errors
    ///
    /// [`Error::ExceedsMtu`] when the frame would not fit.
    pub fn to_bytes(&self, mtu: usize) -> Result<Bytes> {
        let mut size = 64;
        loop {
            let mut storage = vec![0u8; size];
            let mut out = WriteBuffer::new(&mut storage);
            match self.encode(&mut out) {
                Ok(()) => {
                    let len = out.position();
                    if len > mtu {
                        return Err(Error::ExceedsMtu { size: len, mtu });
                    }
                    storage.truncate(len);
                    return Ok(Bytes::from(storage));
                }
                Err(Error::Wire(WireError::Overflow)) if size < MAX_GROWABLE_ENCODE => size *= 2,
                Err(err) => return Err(err),
            }
        }
    }
}

/// Encode `message` into `buf`, returning the frame length
pub fn encode(message: &Message<'_>, buf: &mut [u8]) -> Result<usize> {
    let mut out = WriteBuffer::new(buf);
    message.encode(&mut out)?;
    Ok(out.finish()?.len())
}

/// Decode one frame
///
/// `schema` supplies the value types PROPERTY_UPDATE needs.
///
/// # Errors
///
/// - [`Error::InvalidOpcode`] for an opcode outside the defined set
/// - [`Error::Malformed`] when the body is truncated or otherwise
///   unparseable
/// - [`Error::TrailingBytes`] when bytes remain after the message
pub fn decode<'a>(frame: &'a [u8], schema: &dyn SchemaLookup) -> Result<Message<'a>> {
    let mut input = ReadBuffer::new(frame);
    let header = OpHeader::read(&mut input)?;
    let opcode = header.opcode();
    let message = decode_body(header, &mut input, schema).map_err(|err| match err {
        Error::Wire(source) => Error::Malformed {
            opcode: opcode.as_u8(),
            source,
        },
        other => other,
    })?;

    let stopped_early = matches!(&message, Message::PropertyUpdate(u) if u.unresolved.is_some());
    if !stopped_early && !input.is_empty() {
        return Err(Error::TrailingBytes {
            remaining: input.remaining(),
        });
    }
    Ok(message)
}

fn decode_body<'a>(
    header: OpHeader,
    input: &mut ReadBuffer<'a>,
    schema: &dyn SchemaLookup,
) -> Result<Message<'a>> {
    let flags = header.flags();
    let response = flags.has(Flags::IS_RESPONSE);
    let message = match header.opcode() {
        OpCode::Hello if response => Message::HelloResponse(HelloResponse::decode(input)?),
        OpCode::Hello => Message::HelloRequest(HelloRequest::decode(input)?),
        OpCode::PropertyUpdate => {
            Message::PropertyUpdate(PropertyUpdate::decode(flags, input, schema)?)
        }
        OpCode::SchemaUpsert => Message::SchemaUpsert(SchemaUpsert::decode(flags, input)?),
        OpCode::SchemaDelete => Message::SchemaDelete(SchemaDelete::decode(flags, input)?),
        OpCode::Rpc if response => Message::RpcResponse(RpcResponse::decode(flags, input)?),
        OpCode::Rpc => Message::RpcRequest(RpcRequest::decode(flags, input)?),
        OpCode::Ping => Message::Ping(Ping::decode(flags, input)?),
        OpCode::Error => Message::Error(ErrorMessage::decode(flags, input)?),
        OpCode::ResourceGet if response => {
            Message::ResourceGetResponse(ResourceGetResponse::decode(flags, input)?)
        }
        OpCode::ResourceGet => Message::ResourceGet(ResourceRequest::decode(input)?),
        OpCode::ResourcePut if response => {
            Message::ResourcePutResponse(ResourcePutResponse::decode(flags, input)?)
        }
        OpCode::ResourcePut => Message::ResourcePut(ResourcePutRequest::decode(flags, input)?),
        OpCode::ResourceDelete if response => {
            Message::ResourceDeleteResponse(ResourceDeleteResponse::decode(flags, input)?)
        }
        OpCode::ResourceDelete => Message::ResourceDelete(ResourceRequest::decode(input)?),
    };
    Ok(message)
}
