//! RESOURCE_GET, RESOURCE_PUT and RESOURCE_DELETE messages
//!
//! # Wire Format
//!
//! ```text
//! GET/DELETE request   u8 request_id, propid, varint resource_id
//! PUT request          u8 request_id, propid, varint resource_id (0 = create),
//!                      [blob header], [blob body]
//! response, OK         u8 request_id, GET: blob body | PUT: varint resource_id
//! response, error      u8 request_id, u8 status, utf8 message
//! ```

use std::borrow::Cow;

use super::buffer::{ReadBuffer, WriteBuffer};
use super::{Flags, OpCode, OpHeader, ResourceStatus, Result};
use crate::property::ResourceError;

/// GET or DELETE request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceRequest {
    /// Per-client request id, echoed in the response
    pub request_id: u8,
    /// RESOURCE property id
    pub property_id: u16,
    /// Resource id
    pub resource_id: u32,
}

impl ResourceRequest {
    /// Write the full message under `opcode`
    pub fn encode(&self, opcode: OpCode, out: &mut WriteBuffer<'_>) -> Result<()> {
        OpHeader::new(opcode, Flags::new()).write(out)?;
        out.write_u8(self.request_id)?;
        out.write_propid(self.property_id)?;
        out.write_varint(self.resource_id)?;
        Ok(())
    }

    pub(crate) fn decode(input: &mut ReadBuffer<'_>) -> Result<Self> {
        let request = Self {
            request_id: input.read_u8(),
            property_id: input.read_propid(),
            resource_id: input.read_varint(),
        };
        input.status()?;
        Ok(request)
    }
}

/// PUT request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourcePutRequest<'a> {
    /// Per-client request id, echoed in the response
    pub request_id: u8,
    /// RESOURCE property id
    pub property_id: u16,
    /// Resource to update, `0` to create
    pub resource_id: u32,
    /// New header payload
    pub header: Option<&'a [u8]>,
    /// New body
    pub body: Option<&'a [u8]>,
}

impl<'a> ResourcePutRequest<'a> {
    /// Whether this creates a new resource
    #[must_use]
    pub const fn is_create(&self) -> bool {
        self.resource_id == 0
    }

    /// Write the full message
    pub fn encode(&self, out: &mut WriteBuffer<'_>) -> Result<()> {
        let flags = Flags::new()
            .with_if(Flags::UPDATE_HEADER, self.header.is_some())
            .with_if(Flags::UPDATE_BODY, self.body.is_some());
        OpHeader::new(OpCode::ResourcePut, flags).write(out)?;
        out.write_u8(self.request_id)?;
        out.write_propid(self.property_id)?;
        out.write_varint(self.resource_id)?;
        if let Some(header) = self.header {
            out.write_blob(header)?;
        }
        if let Some(body) = self.body {
            out.write_blob(body)?;
        }
        Ok(())
    }

    pub(crate) fn decode(flags: Flags, input: &mut ReadBuffer<'a>) -> Result<Self> {
        let request_id = input.read_u8();
        let property_id = input.read_propid();
        let resource_id = input.read_varint();
        let header = flags.has(Flags::UPDATE_HEADER).then(|| input.read_blob());
        let body = flags.has(Flags::UPDATE_BODY).then(|| input.read_blob());
        input.status()?;
        Ok(Self {
            request_id,
            property_id,
            resource_id,
            header,
            body,
        })
    }
}

/// Error half of a RESOURCE_* response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceFailure<'a> {
    /// Status byte
    pub status: ResourceStatus,
    /// Human-readable text
    pub message: Cow<'a, str>,
}

impl From<ResourceError> for ResourceFailure<'static> {
    fn from(err: ResourceError) -> Self {
        Self {
            status: err.status(),
            message: Cow::Owned(err.to_string()),
        }
    }
}

/// RESOURCE_* response carrying `T` on success
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceResponse<'a, T> {
    /// Echo of the request id
    pub request_id: u8,
    /// Outcome
    pub result: std::result::Result<T, ResourceFailure<'a>>,
}

/// GET response: the body
pub type ResourceGetResponse<'a> = ResourceResponse<'a, Cow<'a, [u8]>>;
/// PUT response: the resource id
pub type ResourcePutResponse<'a> = ResourceResponse<'a, u32>;
/// DELETE response
pub type ResourceDeleteResponse<'a> = ResourceResponse<'a, ()>;

/// Success payload of a RESOURCE_* response
pub trait ResourcePayload<'a>: Sized {
    /// Opcode the payload belongs to
    const OPCODE: OpCode;

    /// Write the payload
    fn encode(&self, out: &mut WriteBuffer<'_>) -> Result<()>;

    /// Read the payload
    fn decode(input: &mut ReadBuffer<'a>) -> Self;
}

impl<'a> ResourcePayload<'a> for Cow<'a, [u8]> {
    const OPCODE: OpCode = OpCode::ResourceGet;

    fn encode(&self, out: &mut WriteBuffer<'_>) -> Result<()> {
        out.write_blob(self)?;
        Ok(())
    }

    fn decode(input: &mut ReadBuffer<'a>) -> Self {
        Cow::Borrowed(input.read_blob())
    }
}

impl<'a> ResourcePayload<'a> for u32 {
    const OPCODE: OpCode = OpCode::ResourcePut;

    fn encode(&self, out: &mut WriteBuffer<'_>) -> Result<()> {
        out.write_varint(*self)?;
        Ok(())
    }

    fn decode(input: &mut ReadBuffer<'a>) -> Self {
        input.read_varint()
    }
}

impl<'a> ResourcePayload<'a> for () {
    const OPCODE: OpCode = OpCode::ResourceDelete;

    fn encode(&self, _out: &mut WriteBuffer<'_>) -> Result<()> {
        Ok(())
    }

    fn decode(_input: &mut ReadBuffer<'a>) -> Self {}
}

impl<'a, T: ResourcePayload<'a>> ResourceResponse<'a, T> {
    /// Successful response
    pub const fn ok(request_id: u8, value: T) -> Self {
        Self {
            request_id,
            result: Ok(value),
        }
    }

    /// Failed response
    pub fn failed(request_id: u8, status: ResourceStatus, message: impl Into<Cow<'a, str>>) -> Self {
        Self {
            request_id,
            result: Err(ResourceFailure {
                status,
                message: message.into(),
            }),
        }
    }

    /// Write the full message
    pub fn encode(&self, out: &mut WriteBuffer<'_>) -> Result<()> {
        let flags = Flags::new()
            .with(Flags::IS_RESPONSE)
            .with_if(Flags::STATUS_ERROR, self.result.is_err());
        OpHeader::new(T::OPCODE, flags).write(out)?;
        out.write_u8(self.request_id)?;
        match &self.result {
            Ok(value) => value.encode(out)?,
            Err(failure) => {
                out.write_u8(failure.status.as_u8())?;
                out.write_utf8(&failure.message)?;
            }
        }
        Ok(())
    }

    pub(crate) fn decode(flags: Flags, input: &mut ReadBuffer<'a>) -> Result<Self> {
        let request_id = input.read_u8();
        let result = if flags.has(Flags::STATUS_ERROR) {
            let status = ResourceStatus::from_u8(input.read_u8()).unwrap_or(ResourceStatus::Error);
            let message = input.read_utf8();
            Err(ResourceFailure {
                status,
                message: Cow::Borrowed(message),
            })
        } else {
            Ok(T::decode(input))
        };
        input.status()?;
        Ok(Self { request_id, result })
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

    fn flags(bytes: &[u8]) -> Flags {
        Flags::from_u8(bytes[0] >> 4).unwrap()
    }

    #[test]
    fn test_put_create_layout() {
        let put = ResourcePutRequest {
            request_id: 7,
            property_id: 2,
            resource_id: 0,
            header: Some(&[0xDE, 0xAD, 0xBE, 0xEF]),
            body: Some(&[1, 2, 3]),
        };
        let bytes = encode(|out| put.encode(out));
        assert_eq!(
            bytes,
            vec![0x69, 7, 2, 0, 4, 0xDE, 0xAD, 0xBE, 0xEF, 3, 1, 2, 3]
        );
        assert!(put.is_create());
        let decoded = ResourcePutRequest::decode(flags(&bytes), &mut ReadBuffer::new(&bytes[1..])).unwrap();
        assert_eq!(decoded, put);
    }

    #[test]
    fn test_body_only_put() {
        let put = ResourcePutRequest {
            request_id: 1,
            property_id: 2,
            resource_id: 5,
            header: None,
            body: Some(b"x"),
        };
        let bytes = encode(|out| put.encode(out));
        assert_eq!(bytes[0], 0x49);
        let decoded = ResourcePutRequest::decode(flags(&bytes), &mut ReadBuffer::new(&bytes[1..])).unwrap();
        assert_eq!(decoded.header, None);
        assert_eq!(decoded.body, Some(&b"x"[..]));
    }

    #[test]
    fn test_get_request_and_responses() {
        let request = ResourceRequest {
            request_id: 9,
            property_id: 130,
            resource_id: 1,
        };
        let bytes = encode(|out| request.encode(OpCode::ResourceGet, out));
        assert_eq!(bytes, vec![0x08, 9, 0x82, 0x01, 1]);
        assert_eq!(ResourceRequest::decode(&mut ReadBuffer::new(&bytes[1..])).unwrap(), request);

        let ok = ResourceGetResponse::ok(9, Cow::Borrowed(&[1u8, 2, 3][..]));
        let bytes = encode(|out| ok.encode(out));
        assert_eq!(bytes, vec![0x18, 9, 3, 1, 2, 3]);
        assert_eq!(
            ResourceGetResponse::decode(flags(&bytes), &mut ReadBuffer::new(&bytes[1..])).unwrap(),
            ok
        );

        let missing = ResourceGetResponse::failed(9, ResourceStatus::NotFound, "no resource 1");
        let bytes = encode(|out| missing.encode(out));
        assert_eq!(&bytes[..3], &[0x38, 9, 1]);
        assert_eq!(
            ResourceGetResponse::decode(flags(&bytes), &mut ReadBuffer::new(&bytes[1..])).unwrap(),
            missing
        );
    }

    #[test]
    fn test_put_and_delete_responses() {
        let put = ResourcePutResponse::ok(4, 300);
        let bytes = encode(|out| put.encode(out));
        assert_eq!(bytes, vec![0x19, 4, 0xAC, 0x02]);

        let deleted = ResourceDeleteResponse::ok(4, ());
        let bytes = encode(|out| deleted.encode(out));
        assert_eq!(bytes, vec![0x1A, 4]);
        assert_eq!(
            ResourceDeleteResponse::decode(flags(&bytes), &mut ReadBuffer::new(&bytes[1..])).unwrap(),
            deleted
        );
    }

    #[test]
    fn test_failure_from_resource_error() {
        let failure = ResourceFailure::from(ResourceError::OutOfSpace);
        assert_eq!(failure.status, ResourceStatus::OutOfSpace);
    }
}
