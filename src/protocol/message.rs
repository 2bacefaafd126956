//! HELLO, PING, ERROR and RPC messages

use std::borrow::Cow;

use super::buffer::{ReadBuffer, WriteBuffer};
use super::{Error, ErrorCode, Flags, OpCode, OpHeader, PROTOCOL_VERSION, Result};

/// HELLO request: the client asks for a full resync
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HelloRequest {
    /// Protocol version spoken by the client
    pub version: u8,
    /// Largest frame the client accepts
    pub max_packet: u32,
    /// Client device identifier
    pub device_id: u32,
}

impl HelloRequest {
    /// Request for the current protocol version
    #[must_use]
    pub const fn new(max_packet: u32, device_id: u32) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            max_packet,
            device_id,
        }
    }

    /// Write the full message
    pub fn encode(&self, out: &mut WriteBuffer<'_>) -> Result<()> {
        OpHeader::new(OpCode::Hello, Flags::new()).write(out)?;
        out.write_u8(self.version)?;
        out.write_varint(self.max_packet)?;
        out.write_varint(self.device_id)?;
        Ok(())
    }

    pub(crate) fn decode(input: &mut ReadBuffer<'_>) -> Result<Self> {
        let hello = Self {
            version: input.read_u8(),
            max_packet: input.read_varint(),
            device_id: input.read_varint(),
        };
        input.status()?;
        Ok(hello)
    }
}

/// HELLO response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HelloResponse {
    /// Protocol version spoken by the server
    pub version: u8,
    /// Largest frame the server accepts
    pub max_packet: u32,
    /// Session identifier
    pub session_id: u32,
    /// Server uptime in milliseconds
    pub server_timestamp: u32,
}

impl HelloResponse {
    /// Write the full message
    pub fn encode(&self, out: &mut WriteBuffer<'_>) -> Result<()> {
        OpHeader::new(OpCode::Hello, Flags::new().with(Flags::IS_RESPONSE)).write(out)?;
        out.write_u8(self.version)?;
        out.write_varint(self.max_packet)?;
        out.write_varint(self.session_id)?;
        out.write_varint(self.server_timestamp)?;
        Ok(())
    }

    pub(crate) fn decode(input: &mut ReadBuffer<'_>) -> Result<Self> {
        let hello = Self {
            version: input.read_u8(),
            max_packet: input.read_varint(),
            session_id: input.read_varint(),
            server_timestamp: input.read_varint(),
        };
        input.status()?;
        Ok(hello)
    }
}

/// PING request or response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ping {
    /// Response flag
    pub is_response: bool,
    /// Echoed verbatim by the responder
    pub payload: u32,
}

impl Ping {
    /// Response echoing this request
    #[must_use]
    pub const fn reply(&self) -> Self {
        Self {
            is_response: true,
            payload: self.payload,
        }
    }

    /// Write the full message
    pub fn encode(&self, out: &mut WriteBuffer<'_>) -> Result<()> {
        let flags = Flags::new().with_if(Flags::IS_RESPONSE, self.is_response);
        OpHeader::new(OpCode::Ping, flags).write(out)?;
        out.write_varint(self.payload)?;
        Ok(())
    }

    pub(crate) fn decode(flags: Flags, input: &mut ReadBuffer<'_>) -> Result<Self> {
        let payload = input.read_varint();
        input.status()?;
        Ok(Self {
            is_response: flags.has(Flags::IS_RESPONSE),
            payload,
        })
    }
}

/// ERROR message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMessage<'a> {
    /// Machine-readable code
    pub code: ErrorCode,
    /// Human-readable text
    pub message: Cow<'a, str>,
    /// The receiver's view is stale and it should resync with HELLO
    pub schema_mismatch: bool,
    /// Opcode of the frame that caused the error
    pub related_opcode: Option<u8>,
}

impl<'a> ErrorMessage<'a> {
    /// Error without a related opcode
    pub fn new(code: ErrorCode, message: impl Into<Cow<'a, str>>, schema_mismatch: bool) -> Self {
        Self {
            code,
            message: message.into(),
            schema_mismatch,
            related_opcode: None,
        }
    }

    /// Attach the offending opcode
    #[must_use]
    pub fn related(mut self, opcode: u8) -> Self {
        self.related_opcode = Some(opcode);
        self
    }

    /// Write the full message
    pub fn encode(&self, out: &mut WriteBuffer<'_>) -> Result<()> {
        let flags = Flags::new()
            .with_if(Flags::SCHEMA_MISMATCH, self.schema_mismatch)
            .with_if(Flags::HAS_RELATED_OPCODE, self.related_opcode.is_some());
        OpHeader::new(OpCode::Error, flags).write(out)?;
        out.write_u16_le(self.code.as_u16())?;
        out.write_utf8(&self.message)?;
        if let Some(opcode) = self.related_opcode {
            out.write_u8(opcode)?;
        }
        Ok(())
    }

    pub(crate) fn decode(flags: Flags, input: &mut ReadBuffer<'a>) -> Result<Self> {
        let code = ErrorCode::from_u16(input.read_u16_le());
        let message = input.read_utf8();
        let related_opcode = flags
            .has(Flags::HAS_RELATED_OPCODE)
            .then(|| input.read_u8());
        input.status()?;
        Ok(Self {
            code,
            message: Cow::Borrowed(message),
            schema_mismatch: flags.has(Flags::SCHEMA_MISMATCH),
            related_opcode,
        })
    }
}

impl From<&Error> for ErrorMessage<'static> {
    fn from(err: &Error) -> Self {
        Self::new(err.code(), err.to_string(), err.requires_resync())
    }
}

/// RPC request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcRequest<'a> {
    /// Function id
    pub function_id: u16,
    /// Present when a response is expected
    pub call_id: Option<u8>,
    /// Packed parameters
    pub params: &'a [u8],
}

impl<'a> RpcRequest<'a> {
    /// Whether the caller expects a response
    #[must_use]
    pub const fn needs_response(&self) -> bool {
        self.call_id.is_some()
    }

    /// Write the full message
    pub fn encode(&self, out: &mut WriteBuffer<'_>) -> Result<()> {
        let flags = Flags::new().with_if(Flags::NEEDS_RESPONSE, self.call_id.is_some());
        OpHeader::new(OpCode::Rpc, flags).write(out)?;
        out.write_propid(self.function_id)?;
        if let Some(call_id) = self.call_id {
            out.write_u8(call_id)?;
        }
        out.write_bytes(self.params)?;
        Ok(())
    }

    pub(crate) fn decode(flags: Flags, input: &mut ReadBuffer<'a>) -> Result<Self> {
        let function_id = input.read_propid();
        let call_id = flags.has(Flags::NEEDS_RESPONSE).then(|| input.read_u8());
        input.status()?;
        Ok(Self {
            function_id,
            call_id,
            params: input.read_rest(),
        })
    }
}

/// Failed RPC outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcFailure<'a> {
    /// Application error code
    pub code: u8,
    /// Human-readable text
    pub message: Cow<'a, str>,
}

/// RPC response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcResponse<'a> {
    /// Echo of the request's call id
    pub call_id: u8,
    /// Return value on success, failure details otherwise
    pub result: std::result::Result<Option<Cow<'a, [u8]>>, RpcFailure<'a>>,
}

impl<'a> RpcResponse<'a> {
    /// Write the full message
    pub fn encode(&self, out: &mut WriteBuffer<'_>) -> Result<()> {
        let flags = match &self.result {
            Ok(value) => Flags::new()
                .with(Flags::SUCCESS)
                .with_if(Flags::HAS_RETURN_VALUE, value.is_some()),
            Err(_) => Flags::new(),
        };
        OpHeader::new(OpCode::Rpc, flags.with(Flags::IS_RESPONSE)).write(out)?;
        out.write_u8(self.call_id)?;
        match &self.result {
            Ok(Some(value)) => out.write_bytes(value)?,
            Ok(None) => {}
            Err(failure) => {
                out.write_u8(failure.code)?;
                out.write_utf8(&failure.message)?;
            }
        }
        Ok(())
    }

    pub(crate) fn decode(flags: Flags, input: &mut ReadBuffer<'a>) -> Result<Self> {
        let call_id = input.read_u8();
        let result = if flags.has(Flags::SUCCESS) {
            Ok(flags
                .has(Flags::HAS_RETURN_VALUE)
                .then(|| Cow::Borrowed(input.read_rest())))
        } else {
            let code = input.read_u8();
            let message = input.read_utf8();
            Err(RpcFailure {
                code,
                message: Cow::Borrowed(message),
            })
        };
        input.status()?;
        Ok(Self { call_id, result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(f: impl FnOnce(&mut WriteBuffer<'_>) -> Result<()>) -> Vec<u8> {
        let mut buf = [0u8; 64];
        let mut out = WriteBuffer::new(&mut buf);
        f(&mut out).unwrap();
        out.finish().unwrap().to_vec()
    }

    #[test]
    fn test_hello_request_layout() {
        let bytes = encode(|out| HelloRequest::new(4096, 300).encode(out));
        assert_eq!(bytes, vec![0x00, 0x01, 0x80, 0x20, 0xAC, 0x02]);
        let decoded = HelloRequest::decode(&mut ReadBuffer::new(&bytes[1..])).unwrap();
        assert_eq!(decoded, HelloRequest::new(4096, 300));
    }

    #[test]
    fn test_hello_response_roundtrip() {
        let hello = HelloResponse {
            version: 1,
            max_packet: 512,
            session_id: 0xDEAD_BEEF,
            server_timestamp: 12,
        };
        let bytes = encode(|out| hello.encode(out));
        assert_eq!(bytes[0], 0x10);
        assert_eq!(HelloResponse::decode(&mut ReadBuffer::new(&bytes[1..])).unwrap(), hello);
    }

    #[test]
    fn test_ping_reply_echoes_payload() {
        let ping = Ping {
            is_response: false,
            payload: 77,
        };
        let bytes = encode(|out| ping.reply().encode(out));
        assert_eq!(bytes, vec![0x16, 77]);
        let flags = Flags::from_u8(bytes[0] >> 4).unwrap();
        assert_eq!(
            Ping::decode(flags, &mut ReadBuffer::new(&bytes[1..])).unwrap(),
            ping.reply()
        );
    }

    #[test]
    fn test_error_with_related_opcode() {
        let error = ErrorMessage::new(ErrorCode::InvalidOpcode, "malformed frame", false).related(0x2);
        let bytes = encode(|out| error.encode(out));
        assert_eq!(bytes[0], 0x27);
        assert_eq!(&bytes[1..3], &[0x01, 0x00]);
        assert_eq!(bytes[bytes.len() - 1], 0x02);
        let flags = Flags::from_u8(bytes[0] >> 4).unwrap();
        assert_eq!(
            ErrorMessage::decode(flags, &mut ReadBuffer::new(&bytes[1..])).unwrap(),
            error
        );
    }

    #[test]
    fn test_error_from_crate_error() {
        let message = ErrorMessage::from(&Error::UnknownProperty { id: 9 });
        assert_eq!(message.code, ErrorCode::InvalidPropertyId);
        assert!(message.schema_mismatch);
        assert_eq!(message.message, "unknown property id 9");
    }

    #[test]
    fn test_rpc_fire_and_forget_has_no_call_id() {
        let request = RpcRequest {
            function_id: 4,
            call_id: None,
            params: &[9, 9],
        };
        assert_eq!(encode(|out| request.encode(out)), vec![0x05, 0x04, 0x09, 0x09]);
        assert!(!request.needs_response());
    }

    #[test]
    fn test_rpc_response_forms() {
        let ok = RpcResponse {
            call_id: 3,
            result: Ok(Some(Cow::Borrowed(&[1u8, 2][..]))),
        };
        let bytes = encode(|out| ok.encode(out));
        assert_eq!(bytes, vec![0x75, 0x03, 0x01, 0x02]);
        let flags = Flags::from_u8(bytes[0] >> 4).unwrap();
        assert_eq!(RpcResponse::decode(flags, &mut ReadBuffer::new(&bytes[1..])).unwrap(), ok);

        let failed = RpcResponse {
            call_id: 3,
            result: Err(RpcFailure {
                code: 2,
                message: Cow::Borrowed("busy"),
            }),
        };
        let bytes = encode(|out| failed.encode(out));
        assert_eq!(bytes[0], 0x15);
        let flags = Flags::from_u8(bytes[0] >> 4).unwrap();
        assert_eq!(
            RpcResponse::decode(flags, &mut ReadBuffer::new(&bytes[1..])).unwrap(),
            failed
        );
    }
}
