//! Relay frame codec.
//!
//! ```text
//! [sender_id u8][seq u16 BE][timestamp u32 BE][type u8][payload]
//! ```

use bytes::Bytes;

use crate::protocol::{ReadBuffer, WireError, WriteBuffer};

use super::RelayError;

/// Fixed frame prefix
pub const MESSAGE_HEADER_SIZE: usize = 8;

/// Largest payload
pub const MAX_MSG_PAYLOAD: usize = 100;

/// Largest encoded frame
pub const MAX_FRAME_SIZE: usize = MESSAGE_HEADER_SIZE + MAX_MSG_PAYLOAD;

/// Longest text body; one payload byte carries the length.
pub const MAX_TEXT_LEN: usize = MAX_MSG_PAYLOAD - 1;

/// Size of one digest or sync request entry
pub const ENTRY_SIZE: usize = 5;

/// "No second node" marker in location messages
pub const NO_NODE: u8 = 0xFF;

/// Relay message type byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum MsgType {
    /// Subscriber position between two nodes
    Location = 0x01,
    /// Short text
    Text = 0x02,
    /// Periodic state hash announcement
    Beacon = 0x10,
    /// Per-sender high-water marks
    Digest = 0x11,
    /// Seq ranges wanted from a peer
    SyncRequest = 0x12,
}

impl MsgType {
    /// Parse a type byte
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Location),
            0x02 => Some(Self::Text),
            0x10 => Some(Self::Beacon),
            0x11 => Some(Self::Digest),
            0x12 => Some(Self::SyncRequest),
            _ => None,
        }
    }

    /// Type byte
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Location and text are stored and gossiped; the rest drive sync.
    #[must_use]
    pub const fn is_data(self) -> bool {
        matches!(self, Self::Location | Self::Text)
    }
}

/// One relay frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayMessage {
    /// Originating device
    pub sender_id: u8,
    /// Per-sender sequence number
    pub seq: u16,
    /// Unix seconds at origin, 0 when unknown
    pub timestamp: u32,
    /// Message type
    pub kind: MsgType,
    payload: heapless::Vec<u8, MAX_MSG_PAYLOAD>,
}

impl RelayMessage {
    fn with_payload(
        sender_id: u8,
        seq: u16,
        timestamp: u32,
        kind: MsgType,
        payload: &[u8],
    ) -> Result<Self, RelayError> {
        let payload = heapless::Vec::from_slice(payload)
            .map_err(|()| RelayError::PayloadTooLarge { len: payload.len() })?;
        let msg = Self {
            sender_id,
            seq,
            timestamp,
            kind,
            payload,
        };
        msg.validate()?;
        Ok(msg)
    }

    /// Location between `node_a` and `node_b` ([`NO_NODE`] when at a node)
    #[must_use]
    pub fn location(sender_id: u8, seq: u16, timestamp: u32, node_a: u8, node_b: u8) -> Self {
        let mut payload = heapless::Vec::new();
        payload.extend_from_slice(&[node_a, node_b]).ok();
        Self {
            sender_id,
            seq,
            timestamp,
            kind: MsgType::Location,
            payload,
        }
    }

    /// Text message; bodies longer than [`MAX_TEXT_LEN`] are clamped
    #[must_use]
    pub fn text(sender_id: u8, seq: u16, timestamp: u32, text: &[u8]) -> Self {
        let body = &text[..text.len().min(MAX_TEXT_LEN)];
        let mut payload = heapless::Vec::new();
        payload.push(body.len() as u8).ok();
        payload.extend_from_slice(body).ok();
        Self {
            sender_id,
            seq,
            timestamp,
            kind: MsgType::Text,
            payload,
        }
    }

    /// Beacon announcing `state_hash`
    #[must_use]
    pub fn beacon(sender_id: u8, state_hash: u16, node_type: u8) -> Self {
        let [hi, lo] = state_hash.to_be_bytes();
        let mut payload = heapless::Vec::new();
        payload.extend_from_slice(&[hi, lo, node_type]).ok();
        Self {
            sender_id,
            seq: 0,
            timestamp: 0,
            kind: MsgType::Beacon,
            payload,
        }
    }

    /// Digest frame carrying an encoded digest payload
    pub fn digest(sender_id: u8, payload: &[u8]) -> Result<Self, RelayError> {
        Self::with_payload(sender_id, 0, 0, MsgType::Digest, payload)
    }

    /// Sync request frame carrying encoded needs
    pub fn sync_request(sender_id: u8, payload: &[u8]) -> Result<Self, RelayError> {
        Self::with_payload(sender_id, 0, 0, MsgType::SyncRequest, payload)
    }

    /// Raw payload bytes
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// `(node_a, node_b)` of a location message
    #[must_use]
    pub fn as_location(&self) -> Option<(u8, u8)> {
        match (self.kind, self.payload.as_slice()) {
            (MsgType::Location, &[a, b]) => Some((a, b)),
            _ => None,
        }
    }

    /// Body of a text message
    #[must_use]
    pub fn as_text(&self) -> Option<&[u8]> {
        match self.kind {
            MsgType::Text => self.payload.get(1..),
            _ => None,
        }
    }

    /// `(state_hash, node_type)` of a beacon
    #[must_use]
    pub fn as_beacon(&self) -> Option<(u16, u8)> {
        match (self.kind, self.payload.as_slice()) {
            (MsgType::Beacon, &[hi, lo, node_type]) => Some((u16::from_be_bytes([hi, lo]), node_type)),
            _ => None,
        }
    }

    /// Encoded size
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        MESSAGE_HEADER_SIZE + self.payload.len()
    }

    /// Write the frame
    pub fn encode(&self, out: &mut WriteBuffer<'_>) -> Result<(), WireError> {
        out.write_u8(self.sender_id)?;
        out.write_u16_be(self.seq)?;
        out.write_u32_be(self.timestamp)?;
        out.write_u8(self.kind.as_u8())?;
        out.write_bytes(&self.payload)
    }

    /// Encode into an owned frame
    pub fn to_bytes(&self) -> Result<Bytes, RelayError> {
        let mut buf = [0u8; MAX_FRAME_SIZE];
        let mut out = WriteBuffer::new(&mut buf);
        self.encode(&mut out)?;
        Ok(Bytes::copy_from_slice(out.finish()?))
    }

    /// Parse and validate one frame
    pub fn decode(frame: &[u8]) -> Result<Self, RelayError> {
        if frame.len() < MESSAGE_HEADER_SIZE {
            return Err(RelayError::TooShort { len: frame.len() });
        }
        let mut input = ReadBuffer::new(frame);
        let sender_id = input.read_u8();
        let seq = input.read_u16_be();
        let timestamp = input.read_u32_be();
        let code = input.read_u8();
        let payload = input.read_rest();
        input.status()?;
        let kind = MsgType::from_u8(code).ok_or(RelayError::UnknownType { code })?;
        Self::with_payload(sender_id, seq, timestamp, kind, payload)
    }

    fn validate(&self) -> Result<(), RelayError> {
        let len = self.payload.len();
        let valid = match self.kind {
            MsgType::Location => len == 2,
            MsgType::Text => self.payload.first().is_some_and(|&n| usize::from(n) + 1 == len),
            MsgType::Beacon => len == 3,
            MsgType::Digest | MsgType::SyncRequest => self
                .payload
                .first()
                .is_some_and(|&n| 1 + usize::from(n) * ENTRY_SIZE == len),
        };
        if valid {
            Ok(())
        } else {
            Err(RelayError::InvalidPayload { kind: self.kind })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_layout() {
        let msg = RelayMessage::location(0x05, 0x0102, 0x1122_3344, 3, NO_NODE);
        let frame = msg.to_bytes().unwrap();
        assert_eq!(
            frame.as_ref(),
            &[0x05, 0x01, 0x02, 0x11, 0x22, 0x33, 0x44, 0x01, 3, 0xFF]
        );
        let back = RelayMessage::decode(&frame).unwrap();
        assert_eq!(back.as_location(), Some((3, NO_NODE)));
        assert_eq!(back, msg);
    }

    #[test]
    fn test_text_clamped() {
        let long = [b'x'; 150];
        let msg = RelayMessage::text(1, 1, 0, &long);
        assert_eq!(msg.payload()[0], 99);
        assert_eq!(msg.as_text().unwrap().len(), MAX_TEXT_LEN);
        assert_eq!(msg.encoded_len(), MAX_FRAME_SIZE);

        let back = RelayMessage::decode(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(back.as_text(), Some(&long[..99]));
    }

    #[test]
    fn test_beacon_fields() {
        let msg = RelayMessage::beacon(0x80, 0xABCD, 0);
        let back = RelayMessage::decode(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(back.as_beacon(), Some((0xABCD, 0)));
        assert_eq!(back.as_location(), None);
    }

    #[test]
    fn test_decode_rejects() {
        assert_eq!(
            RelayMessage::decode(&[1, 2, 3]),
            Err(RelayError::TooShort { len: 3 })
        );
        assert_eq!(
            RelayMessage::decode(&[1, 0, 1, 0, 0, 0, 0, 0x7F]),
            Err(RelayError::UnknownType { code: 0x7F })
        );
        // location with one node byte
        assert_eq!(
            RelayMessage::decode(&[1, 0, 1, 0, 0, 0, 0, 0x01, 3]),
            Err(RelayError::InvalidPayload {
                kind: MsgType::Location
            })
        );
        // text length byte disagrees with the payload
        assert_eq!(
            RelayMessage::decode(&[1, 0, 1, 0, 0, 0, 0, 0x02, 5, b'h', b'i']),
            Err(RelayError::InvalidPayload { kind: MsgType::Text })
        );
        let mut oversized = vec![1, 0, 1, 0, 0, 0, 0, 0x02];
        oversized.extend_from_slice(&[0; 101]);
        assert_eq!(
            RelayMessage::decode(&oversized),
            Err(RelayError::PayloadTooLarge { len: 101 })
        );
    }

    #[test]
    fn test_digest_payload_checked() {
        assert!(RelayMessage::digest(1, &[0]).is_ok());
        assert!(RelayMessage::digest(1, &[1, 2, 0, 3, 0, 0]).is_ok());
        assert_eq!(
            RelayMessage::sync_request(1, &[2, 0, 0]),
            Err(RelayError::InvalidPayload {
                kind: MsgType::SyncRequest
            })
        );
    }
}
