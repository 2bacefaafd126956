//! Wire cursors over caller-owned byte buffers.
//!
//! [`WriteBuffer`] and [`ReadBuffer`] never allocate. Both carry a sticky
//! error: once a write overflows or a read runs past the end, every later
//! operation short-circuits and the original error is preserved.
//!
//! # Primitive encodings
//!
//! ```text
//! u8 / i8 / bool      1 byte
//! u16 / u32 / f32     little-endian fixed width
//! varint              LEB128, 1-5 bytes, MSB = continuation
//! propid              0..=127        -> [id]
//!                     128..=32767    -> [0x80 | id & 0x7F, id >> 7]
//! utf8 / blob         varint(len) + bytes
//! ident               u8(len) + bytes
//! ```

use thiserror::Error;

/// Largest value representable by the compact propid encoding.
pub const MAX_PROPID: u16 = 0x7FFF;

/// Maximum encoded length of a varint.
pub const MAX_VARINT_LEN: usize = 5;

/// Errors raised by the wire cursors.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    /// Write past the end of the output buffer.
    #[error("buffer overflow")]
    Overflow,

    /// Read past the end of the input buffer.
    #[error("truncated input")]
    Truncated,

    /// Varint continuation bits extend past five bytes.
    #[error("malformed varint")]
    MalformedVarint,

    /// Property id does not fit the propid encoding.
    #[error("property id {id} exceeds propid range")]
    PropIdOutOfRange {
        /// Offending id
        id: u32,
    },

    /// String payload is not valid UTF-8.
    #[error("invalid UTF-8 string")]
    InvalidUtf8,

    /// Length prefix cannot be represented in its field.
    #[error("length {len} exceeds field limit {max}")]
    LengthOverflow {
        /// Requested length
        len: usize,
        /// Field limit
        max: usize,
    },
}

/// Number of bytes `value` occupies as a varint.
#[must_use]
pub const fn varint_len(value: u32) -> usize {
    match value {
        0..=0x7F => 1,
        0x80..=0x3FFF => 2,
        0x4000..=0x1F_FFFF => 3,
        0x20_0000..=0x0FFF_FFFF => 4,
        _ => 5,
    }
}

/// Number of bytes `id` occupies as a propid.
#[must_use]
pub const fn propid_len(id: u16) -> usize {
    if id <= 0x7F { 1 } else { 2 }
}

/// Largest buffer [`encode_to_vec`] will grow to.
pub const MAX_GROWABLE_ENCODE: usize = 64 * 1024;

/// Run `encode` against a heap buffer, doubling it on overflow.
///
/// For encodes with no natural size bound, such as schema defaults.
pub fn encode_to_vec(
    encode: impl Fn(&mut WriteBuffer<'_>) -> Result<(), WireError>,
) -> Result<Vec<u8>, WireError> {
    let mut size = 64;
    loop {
        let mut storage = vec![0u8; size];
        let mut out = WriteBuffer::new(&mut storage);
        match encode(&mut out) {
            Ok(()) => {
                let len = out.position();
                storage.truncate(len);
                return Ok(storage);
            }
            Err(WireError::Overflow) if size < MAX_GROWABLE_ENCODE => size *= 2,
            Err(err) => return Err(err),
        }
    }
}

/// Append-only cursor over a mutable byte slice.
#[derive(Debug)]
pub struct WriteBuffer<'a> {
    buf: &'a mut [u8],
    pos: usize,
    error: Option<WireError>,
}

impl<'a> WriteBuffer<'a> {
    /// Wrap `buf`; writing starts at offset zero.
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            error: None,
        }
    }

    /// Current write offset.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// Total capacity of the underlying buffer.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes left before the buffer overflows.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Sticky error, if any write failed.
    #[must_use]
    pub const fn error(&self) -> Option<WireError> {
        self.error
    }

    /// `true` while no write has failed.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Bytes written so far. Empty once the buffer has overflowed.
    #[must_use]
    pub fn written(&self) -> &[u8] {
        if self.error.is_some() {
            return &[];
        }
        &self.buf[..self.pos]
    }

    /// Consume the cursor and return the written prefix.
    pub fn finish(self) -> Result<&'a [u8], WireError> {
        let Self { buf, pos, error } = self;
        match error {
            Some(err) => Err(err),
            None => Ok(&buf[..pos]),
        }
    }

    /// Rewind to `pos` and clear the sticky error.
    ///
    /// Used to roll back a partially encoded item.
    pub fn truncate(&mut self, pos: usize) {
        self.pos = pos.min(self.pos);
        self.error = None;
    }

    /// Overwrite a byte that was already written.
    pub fn patch_u8(&mut self, pos: usize, value: u8) -> Result<(), WireError> {
        self.check()?;
        if pos >= self.pos {
            return Err(self.fail(WireError::Overflow));
        }
        self.buf[pos] = value;
        Ok(())
    }

    fn check(&self) -> Result<(), WireError> {
        self.error.map_or(Ok(()), Err)
    }

    fn fail(&mut self, err: WireError) -> WireError {
        self.error = Some(err);
        err
    }

    fn reserve(&mut self, len: usize) -> Result<&mut [u8], WireError> {
        self.check()?;
        if self.remaining() < len {
            return Err(self.fail(WireError::Overflow));
        }
        let start = self.pos;
        self.pos += len;
        Ok(&mut self.buf[start..start + len])
    }

    /// Write a single byte.
    pub fn write_u8(&mut self, value: u8) -> Result<(), WireError> {
        self.reserve(1)?[0] = value;
        Ok(())
    }

    /// Alias of [`write_u8`](Self::write_u8).
    pub fn write_byte(&mut self, value: u8) -> Result<(), WireError> {
        self.write_u8(value)
    }

    /// Write a two's complement byte.
    pub fn write_i8(&mut self, value: i8) -> Result<(), WireError> {
        self.write_u8(value.to_le_bytes()[0])
    }

    /// Write `0` or `1`.
    pub fn write_bool(&mut self, value: bool) -> Result<(), WireError> {
        self.write_u8(u8::from(value))
    }

    /// Write a little-endian `u16`.
    pub fn write_u16_le(&mut self, value: u16) -> Result<(), WireError> {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Write a little-endian `u32`.
    pub fn write_u32_le(&mut self, value: u32) -> Result<(), WireError> {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Write a little-endian `i32`.
    pub fn write_i32_le(&mut self, value: i32) -> Result<(), WireError> {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Write a little-endian IEEE-754 `f32`.
    pub fn write_f32_le(&mut self, value: f32) -> Result<(), WireError> {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Write a big-endian `u16`.
    pub fn write_u16_be(&mut self, value: u16) -> Result<(), WireError> {
        self.write_bytes(&value.to_be_bytes())
    }

    /// Write a big-endian `u32`.
    pub fn write_u32_be(&mut self, value: u32) -> Result<(), WireError> {
        self.write_bytes(&value.to_be_bytes())
    }

    /// Write raw bytes. Nothing is written if they do not all fit.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), WireError> {
        self.reserve(bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }

    /// Write an unsigned LEB128 varint.
    pub fn write_varint(&mut self, value: u32) -> Result<(), WireError> {
        let len = varint_len(value);
        let out = self.reserve(len)?;
        let mut rest = value;
        for (i, byte) in out.iter_mut().enumerate() {
            let low = (rest & 0x7F) as u8;
            rest >>= 7;
            *byte = if i + 1 < len { low | 0x80 } else { low };
        }
        Ok(())
    }

    /// Write a compact 1-2 byte property id.
    pub fn write_propid(&mut self, id: u16) -> Result<(), WireError> {
        if id > MAX_PROPID {
            self.check()?;
            return Err(self.fail(WireError::PropIdOutOfRange { id: u32::from(id) }));
        }
        if id <= 0x7F {
            return self.write_u8(id as u8);
        }
        let out = self.reserve(2)?;
        out[0] = 0x80 | (id & 0x7F) as u8;
        out[1] = (id >> 7) as u8;
        Ok(())
    }

    /// Write `varint(len)` followed by the UTF-8 bytes.
    pub fn write_utf8(&mut self, value: &str) -> Result<(), WireError> {
        self.write_blob(value.as_bytes())
    }

    /// Write `varint(len)` followed by the bytes.
    pub fn write_blob(&mut self, bytes: &[u8]) -> Result<(), WireError> {
        let len = u32::try_from(bytes.len()).map_err(|_| {
            self.fail(WireError::LengthOverflow {
                len: bytes.len(),
                max: u32::MAX as usize,
            })
        })?;
        if self.remaining() < varint_len(len) + bytes.len() {
            self.check()?;
            return Err(self.fail(WireError::Overflow));
        }
        self.write_varint(len)?;
        self.write_bytes(bytes)
    }

    /// Write `u8(len)` followed by the bytes. Used for short identifiers.
    pub fn write_ident(&mut self, value: &str) -> Result<(), WireError> {
        let len = u8::try_from(value.len()).map_err(|_| {
            self.fail(WireError::LengthOverflow {
                len: value.len(),
                max: u8::MAX as usize,
            })
        })?;
        self.reserve(1 + value.len()).map(|out| {
            out[0] = len;
            out[1..].copy_from_slice(value.as_bytes());
        })
    }
}

/// Forward-only cursor over an immutable byte slice.
///
/// Reads return zero (or an empty slice) once the cursor has failed.
#[derive(Debug, Clone)]
pub struct ReadBuffer<'a> {
    buf: &'a [u8],
    pos: usize,
    error: Option<WireError>,
}

impl<'a> ReadBuffer<'a> {
    /// Wrap `buf`; reading starts at offset zero.
    #[must_use]
    pub const fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            error: None,
        }
    }

    /// Current read offset.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// Unread byte count.
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// `true` when every byte has been consumed.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Sticky error, if any read failed.
    #[must_use]
    pub const fn error(&self) -> Option<WireError> {
        self.error
    }

    /// `true` while no read has failed.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Result view of the sticky error.
    pub fn status(&self) -> Result<(), WireError> {
        self.error.map_or(Ok(()), Err)
    }

    /// Bytes consumed between `start` and the current position.
    #[must_use]
    pub fn consumed_since(&self, start: usize) -> &'a [u8] {
        let buf: &'a [u8] = self.buf;
        &buf[start.min(self.pos)..self.pos]
    }

    /// Record `err` unless an earlier error is already latched.
    pub fn fail(&mut self, err: WireError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        if self.error.is_some() {
            return None;
        }
        if self.remaining() < len {
            self.fail(WireError::Truncated);
            return None;
        }
        let buf: &'a [u8] = self.buf;
        let out = &buf[self.pos..self.pos + len];
        self.pos += len;
        Some(out)
    }

    fn take_array<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        if let Some(bytes) = self.take(N) {
            out.copy_from_slice(bytes);
        }
        out
    }

    /// Read one byte.
    pub fn read_u8(&mut self) -> u8 {
        self.take(1).map_or(0, |b| b[0])
    }

    /// Alias of [`read_u8`](Self::read_u8).
    pub fn read_byte(&mut self) -> u8 {
        self.read_u8()
    }

    /// Read a two's complement byte.
    pub fn read_i8(&mut self) -> i8 {
        i8::from_le_bytes([self.read_u8()])
    }

    /// Read a boolean; any non-zero byte is `true`.
    pub fn read_bool(&mut self) -> bool {
        self.read_u8() != 0
    }

    /// Read a little-endian `u16`.
    pub fn read_u16_le(&mut self) -> u16 {
        u16::from_le_bytes(self.take_array())
    }

    /// Read a little-endian `u32`.
    pub fn read_u32_le(&mut self) -> u32 {
        u32::from_le_bytes(self.take_array())
    }

    /// Read a little-endian `i32`.
    pub fn read_i32_le(&mut self) -> i32 {
        i32::from_le_bytes(self.take_array())
    }

    /// Read a little-endian `f32`.
    pub fn read_f32_le(&mut self) -> f32 {
        f32::from_le_bytes(self.take_array())
    }

    /// Read a big-endian `u16`.
    pub fn read_u16_be(&mut self) -> u16 {
        u16::from_be_bytes(self.take_array())
    }

    /// Read a big-endian `u32`.
    pub fn read_u32_be(&mut self) -> u32 {
        u32::from_be_bytes(self.take_array())
    }

    /// Borrow the next `len` bytes.
    pub fn read_bytes(&mut self, len: usize) -> &'a [u8] {
        self.take(len).unwrap_or_default()
    }

    /// Advance past `len` bytes.
    pub fn skip(&mut self, len: usize) {
        let _ = self.take(len);
    }

    /// Borrow everything that is left.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let len = self.remaining();
        self.read_bytes(len)
    }

    /// Read an unsigned LEB128 varint.
    ///
    /// On a truncated or malformed varint the cursor does not advance.
    pub fn read_varint(&mut self) -> u32 {
        if self.error.is_some() {
            return 0;
        }
        let mut value: u32 = 0;
        for i in 0..MAX_VARINT_LEN {
            let Some(&byte) = self.buf.get(self.pos + i) else {
                self.fail(WireError::Truncated);
                return 0;
            };
            if i == MAX_VARINT_LEN - 1 && byte > 0x0F {
                self.fail(WireError::MalformedVarint);
                return 0;
            }
            value |= u32::from(byte & 0x7F) << (7 * i);
            if byte & 0x80 == 0 {
                self.pos += i + 1;
                return value;
            }
        }
        self.fail(WireError::MalformedVarint);
        0
    }

    /// Read a compact 1-2 byte property id.
    pub fn read_propid(&mut self) -> u16 {
        let first = self.read_u8();
        if first & 0x80 == 0 {
            return u16::from(first);
        }
        let second = self.read_u8();
        if self.error.is_some() {
            return 0;
        }
        u16::from(first & 0x7F) | (u16::from(second) << 7)
    }

    /// Read a varint-prefixed blob.
    pub fn read_blob(&mut self) -> &'a [u8] {
        let len = self.read_varint() as usize;
        self.read_bytes(len)
    }

    /// Read a varint-prefixed UTF-8 string.
    pub fn read_utf8(&mut self) -> &'a str {
        let bytes = self.read_blob();
        self.as_str(bytes)
    }

    /// Read a u8-prefixed identifier.
    pub fn read_ident(&mut self) -> &'a str {
        let len = usize::from(self.read_u8());
        let bytes = self.read_bytes(len);
        self.as_str(bytes)
    }

    fn as_str(&mut self, bytes: &'a [u8]) -> &'a str {
        match core::str::from_utf8(bytes) {
            Ok(s) => s,
            Err(_) => {
                self.fail(WireError::InvalidUtf8);
                ""
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(f: impl FnOnce(&mut WriteBuffer<'_>) -> Result<(), WireError>) -> Vec<u8> {
        let mut storage = [0u8; 64];
        let mut out = WriteBuffer::new(&mut storage);
        f(&mut out).unwrap();
        out.written().to_vec()
    }

    #[test]
    fn test_encode_to_vec_grows() {
        let bytes = encode_to_vec(|out| out.write_bytes(&[7u8; 300])).unwrap();
        assert_eq!(bytes.len(), 300);
        assert!(encode_to_vec(|out| out.write_bytes(&[0u8; MAX_GROWABLE_ENCODE + 1])).is_err());
    }

    #[test]
    fn test_varint_boundaries() {
        assert_eq!(encode(|w| w.write_varint(127)), [0x7F]);
        assert_eq!(encode(|w| w.write_varint(128)), [0x80, 0x01]);
        assert_eq!(encode(|w| w.write_varint(1000)), [0xE8, 0x07]);
        assert_eq!(
            encode(|w| w.write_varint(u32::MAX)),
            [0xFF, 0xFF, 0xFF, 0xFF, 0x0F]
        );
    }

    #[test]
    fn test_propid_boundaries() {
        assert_eq!(encode(|w| w.write_propid(127)), [0x7F]);
        assert_eq!(encode(|w| w.write_propid(128)), [0x80, 0x01]);
        assert_eq!(encode(|w| w.write_propid(MAX_PROPID)), [0xFF, 0xFF]);

        let mut storage = [0u8; 4];
        let mut out = WriteBuffer::new(&mut storage);
        assert_eq!(
            out.write_propid(MAX_PROPID + 1),
            Err(WireError::PropIdOutOfRange { id: 32768 })
        );
    }

    #[test]
    fn test_truncated_varint_yields_zero() {
        let mut input = ReadBuffer::new(&[0x80]);
        assert_eq!(input.read_varint(), 0);
        assert_eq!(input.error(), Some(WireError::Truncated));
        assert_eq!(input.position(), 0);
    }

    #[test]
    fn test_malformed_varint() {
        let mut input = ReadBuffer::new(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01]);
        assert_eq!(input.read_varint(), 0);
        assert_eq!(input.error(), Some(WireError::MalformedVarint));
    }

    #[test]
    fn test_overflow_is_sticky() {
        let mut storage = [0u8; 3];
        let mut out = WriteBuffer::new(&mut storage);
        out.write_u16_le(0xBEEF).unwrap();
        assert_eq!(out.write_u32_le(1), Err(WireError::Overflow));
        assert_eq!(out.position(), 2);
        assert!(out.written().is_empty());
        // a byte would fit, but the flag short-circuits
        assert_eq!(out.write_u8(1), Err(WireError::Overflow));
        assert_eq!(out.finish(), Err(WireError::Overflow));
    }

    #[test]
    fn test_truncate_recovers_from_overflow() {
        let mut storage = [0u8; 4];
        let mut out = WriteBuffer::new(&mut storage);
        out.write_u8(1).unwrap();
        let mark = out.position();
        assert!(out.write_blob(&[1, 2, 3, 4]).is_err());
        out.truncate(mark);
        out.write_u8(2).unwrap();
        assert_eq!(out.written(), &[1, 2]);
    }

    #[test]
    fn test_utf8_and_blob() {
        let bytes = encode(|w| {
            w.write_utf8("")?;
            w.write_utf8("hi")?;
            w.write_blob(&[9, 8])
        });
        assert_eq!(bytes, [0x00, 0x02, b'h', b'i', 0x02, 9, 8]);

        let mut input = ReadBuffer::new(&bytes);
        assert_eq!(input.read_utf8(), "");
        assert_eq!(input.read_utf8(), "hi");
        assert_eq!(input.read_blob(), &[9, 8]);
        assert!(input.is_empty());
        assert!(input.is_ok());
    }

    #[test]
    fn test_invalid_utf8_sets_error() {
        let mut input = ReadBuffer::new(&[0x02, 0xC3, 0x28]);
        assert_eq!(input.read_utf8(), "");
        assert_eq!(input.error(), Some(WireError::InvalidUtf8));
    }

    #[test]
    fn test_short_read_does_not_advance() {
        let mut input = ReadBuffer::new(&[1, 2]);
        assert_eq!(input.read_u32_le(), 0);
        assert_eq!(input.position(), 0);
        assert_eq!(input.read_u8(), 0, "error is sticky");
    }

    #[test]
    fn test_fixed_width_little_endian() {
        let bytes = encode(|w| {
            w.write_i8(-1)?;
            w.write_u16_le(0x0102)?;
            w.write_i32_le(-2)?;
            w.write_f32_le(1.5)
        });
        assert_eq!(bytes[0], 0xFF);
        assert_eq!(&bytes[1..3], &[0x02, 0x01]);
        assert_eq!(&bytes[3..7], &[0xFE, 0xFF, 0xFF, 0xFF]);

        let mut input = ReadBuffer::new(&bytes);
        assert_eq!(input.read_i8(), -1);
        assert_eq!(input.read_u16_le(), 0x0102);
        assert_eq!(input.read_i32_le(), -2);
        assert!((input.read_f32_le() - 1.5).abs() < f32::EPSILON);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_varint_roundtrip(value in any::<u32>()) {
                let mut storage = [0u8; MAX_VARINT_LEN];
                let mut out = WriteBuffer::new(&mut storage);
                out.write_varint(value).unwrap();
                let written = out.written().to_vec();

                let bits = 32 - value.leading_zeros() as usize;
                prop_assert_eq!(written.len(), bits.div_ceil(7).clamp(1, MAX_VARINT_LEN));
                prop_assert_eq!(written.len(), varint_len(value));

                let mut input = ReadBuffer::new(&written);
                prop_assert_eq!(input.read_varint(), value);
                prop_assert!(input.is_empty());
            }

            #[test]
            fn prop_propid_roundtrip(id in 0u16..=MAX_PROPID) {
                let mut storage = [0u8; 2];
                let mut out = WriteBuffer::new(&mut storage);
                out.write_propid(id).unwrap();
                let written = out.written().to_vec();
                prop_assert_eq!(written.len(), if id <= 127 { 1 } else { 2 });

                let mut input = ReadBuffer::new(&written);
                prop_assert_eq!(input.read_propid(), id);
                prop_assert!(input.is_ok());
            }

            #[test]
            fn prop_reads_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..32)) {
                let mut input = ReadBuffer::new(&bytes);
                let _ = input.read_varint();
                let _ = input.read_propid();
                let _ = input.read_utf8();
                let _ = input.read_u32_le();
                prop_assert!(input.position() <= bytes.len());
            }
        }
    }
}
