//! Wire format primitives for the protobuf encoding.
//!
//! See <https://protobuf.dev/programming-guides/encoding> for the format
//! itself. Everything here reads from a [`ByteCursor`], which bounds reads by
//! a stack of nested length limits.

use core::num::NonZeroU32;

use crate::error::{DecodeError, InvalidKeyReason};
use crate::leb128::{decode_varint, LebCodec};
use crate::util::{likely, unlikely, CastFrom};

/// Minimum value of a protobuf field number.
pub const MINIMUM_FIELD_NUMBER: u32 = 1;
/// Maximum value of a protobuf field number.
pub const MAXIMUM_FIELD_NUMBER: u32 = (1 << 29) - 1;

/// A decoded field key: field number and [`WireType`].
///
/// The layout mirrors the wire format:
/// * Bits 0-2: wire type (0-5)
/// * Bits 3-31: field number (1 to 2^29-1)
///
/// Field numbers start at 1, so the raw value is never zero.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Tag(NonZeroU32);

crate::util::assert_eq_size!(Tag, Option<Tag>);

#[allow(clippy::as_conversions)]
impl Tag {
    /// Builds a tag from its parts. `field_number` must be in range.
    #[inline]
    pub const fn new(field_number: u32, wire_type: WireType) -> Option<Self> {
        if field_number < MINIMUM_FIELD_NUMBER || field_number > MAXIMUM_FIELD_NUMBER {
            return None;
        }
        match NonZeroU32::new((field_number << 3) | wire_type as u32) {
            Some(raw) => Some(Tag(raw)),
            None => None,
        }
    }

    /// Validates a raw key value read off the wire.
    #[inline(always)]
    pub fn try_from_raw(raw: u32) -> Result<Self, DecodeError> {
        let wire_type = (raw & 0b111) as u8;
        if unlikely(wire_type > WireType::MAX_VAL) {
            return Err(DecodeError::invalid_wire_type(wire_type));
        }
        match NonZeroU32::new(raw) {
            Some(raw) if raw.get() >> 3 != 0 => Ok(Tag(raw)),
            _ => Err(DecodeError::invalid_key(InvalidKeyReason::TagOutOfRange)),
        }
    }

    #[inline(always)]
    pub const fn field_number(self) -> u32 {
        self.0.get() >> 3
    }

    #[inline(always)]
    pub fn wire_type(self) -> WireType {
        // Validated on construction.
        WireType::from_low_bits(self.0.get())
    }

    /// The raw `field_number << 3 | wire_type` value.
    #[inline(always)]
    pub const fn raw(self) -> u32 {
        self.0.get()
    }
}

impl core::fmt::Debug for Tag {
    #[cold]
    #[inline(never)]
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tag")
            .field("field_number", &self.field_number())
            .field("wire_type", &self.wire_type())
            .finish()
    }
}

/// Denotes the type of a field in an encoded protobuf message.
///
/// Protobuf messages are a series of key-value pairs. Each record consists of
/// a field number, a [`WireType`], and a payload. The [`WireType`] indicates
/// how large the payload is.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum WireType {
    /// Variable length integer.
    ///
    /// Used for: `int32`, `int64`, `uint32`, `uint64`, `sint32`, `sint64`, `bool`, `enum`.
    Varint = 0,
    /// 64-bit integer.
    ///
    /// Used for: `fixed64`, `sfixed64`, `double`.
    I64 = 1,
    /// Length-delimited field.
    ///
    /// Used for: `string`, `bytes`, `message`, packed `repeated` fields.
    Len = 2,
    /// Group start.
    SGroup = 3,
    /// Group end.
    EGroup = 4,
    /// 32-bit integer.
    ///
    /// Used for: `fixed32`, `sfixed32`, `float`.
    I32 = 5,
}

crate::util::assert_eq_size!(WireType, Result<WireType, ()>);

#[allow(clippy::as_conversions)]
impl WireType {
    /// Maximum value a [`WireType`] can be.
    pub const MAX_VAL: u8 = WireType::I32 as u8;

    /// Try to decode a [`WireType`] from the provided raw value.
    #[inline(always)]
    pub fn try_from_val(value: u8) -> Result<Self, DecodeError> {
        match value {
            0 => Ok(WireType::Varint),
            1 => Ok(WireType::I64),
            2 => Ok(WireType::Len),
            3 => Ok(WireType::SGroup),
            4 => Ok(WireType::EGroup),
            5 => Ok(WireType::I32),
            other => Err(DecodeError::invalid_wire_type(other)),
        }
    }

    /// Decodes the low three bits of a tag byte. Values above `MAX_VAL` map to `I32`.
    #[inline(always)]
    fn from_low_bits(raw: u32) -> Self {
        match raw & 0b111 {
            0 => WireType::Varint,
            1 => WireType::I64,
            2 => WireType::Len,
            3 => WireType::SGroup,
            4 => WireType::EGroup,
            _ => WireType::I32,
        }
    }

    /// Return the raw value for this [`WireType`].
    #[inline(always)]
    pub const fn into_val(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for WireType {
    type Error = DecodeError;

    #[inline(always)]
    fn try_from(value: u8) -> Result<Self, DecodeError> {
        WireType::try_from_val(value)
    }
}

/// Restores the enclosing limit of a [`ByteCursor`] when popped.
///
/// Produced by [`ByteCursor::push_limit`]. Tokens must be popped in the
/// reverse order they were pushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "a pushed limit must be popped"]
pub struct LimitToken {
    prev_limit: usize,
    limit: usize,
}

/// A forward-only reader over a caller-owned buffer.
///
/// Reads never go past the current limit: the end of the buffer at the top
/// level, or the end of the innermost length-delimited field being parsed.
#[derive(Debug, Clone)]
pub struct ByteCursor<'b> {
    buf: &'b [u8],
    pos: usize,
    limit: usize,
}

impl<'b> ByteCursor<'b> {
    pub fn new(buf: &'b [u8]) -> Self {
        ByteCursor {
            buf,
            pos: 0,
            limit: buf.len(),
        }
    }

    /// Byte offset of the cursor from the start of the buffer.
    #[inline(always)]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Byte offset of the current limit.
    #[inline(always)]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Bytes left before the current limit.
    #[inline(always)]
    pub fn remaining(&self) -> usize {
        self.limit - self.pos
    }

    #[inline(always)]
    pub fn at_limit(&self) -> bool {
        self.pos >= self.limit
    }

    /// The underlying buffer, ignoring the cursor position and limits.
    #[inline(always)]
    pub fn buffer(&self) -> &'b [u8] {
        self.buf
    }

    #[inline(always)]
    fn window(&self) -> &'b [u8] {
        &self.buf[self.pos..self.limit]
    }

    /// Returns the next byte without consuming it.
    #[inline(always)]
    pub fn peek_byte(&self) -> Option<u8> {
        self.window().first().copied()
    }

    /// Reads a field key.
    ///
    /// Keys always fit in a u32: the max field number is `2^29-1` so the max
    /// key value is `(2^29-1) << 3 | 7`, which is `u32::MAX`.
    #[inline]
    pub fn read_tag(&mut self) -> Result<Tag, DecodeError> {
        let window = self.window();
        let raw = match window.first() {
            None => return Err(DecodeError::invalid_key(InvalidKeyReason::EmptyBuffer)),
            Some(&byte) if likely(byte < 0x80) => {
                self.pos += 1;
                u32::cast_from(byte)
            }
            Some(_) => {
                let (value, len) = decode_varint(window)?;
                let raw = u32::try_from(value)
                    .map_err(|_| DecodeError::invalid_key(InvalidKeyReason::KeyOverflow))?;
                self.pos += len;
                raw
            }
        };
        Tag::try_from_raw(raw)
    }

    #[inline]
    pub fn read_varint(&mut self) -> Result<u64, DecodeError> {
        let (value, len) = decode_varint(self.window())?;
        self.pos += len;
        Ok(value)
    }

    /// Reads the length prefix of a length-delimited field.
    ///
    /// Fails if the length runs past the current limit.
    #[inline]
    pub fn read_size(&mut self) -> Result<usize, DecodeError> {
        let window = self.window();
        // Fast path, most lengths fit in one byte.
        let len = match window.first() {
            Some(&byte) if likely(byte < 0x80) => {
                self.pos += 1;
                usize::from(byte)
            }
            _ => {
                let (value, read) = decode_varint(window)?;
                let len =
                    usize::try_from(value).map_err(|_| DecodeError::length_overflow(value))?;
                self.pos += read;
                len
            }
        };
        if unlikely(len > self.remaining()) {
            return Err(DecodeError::unexpected_end_of_buffer());
        }
        Ok(len)
    }

    #[inline]
    pub fn read_fixed32(&mut self) -> Result<u32, DecodeError> {
        let chunk = self
            .window()
            .first_chunk::<4>()
            .ok_or_else(DecodeError::unexpected_end_of_buffer)?;
        self.pos += 4;
        Ok(u32::from_le_bytes(*chunk))
    }

    #[inline]
    pub fn read_fixed64(&mut self) -> Result<u64, DecodeError> {
        let chunk = self
            .window()
            .first_chunk::<8>()
            .ok_or_else(DecodeError::unexpected_end_of_buffer)?;
        self.pos += 8;
        Ok(u64::from_le_bytes(*chunk))
    }

    /// Reads `len` raw bytes, borrowed from the underlying buffer.
    #[inline]
    pub fn read_bytes(&mut self, len: usize) -> Result<&'b [u8], DecodeError> {
        if unlikely(len > self.remaining()) {
            return Err(DecodeError::unexpected_end_of_buffer());
        }
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    #[inline]
    pub fn skip(&mut self, len: usize) -> Result<(), DecodeError> {
        self.read_bytes(len).map(|_| ())
    }

    /// Narrows the readable range to the next `len` bytes.
    pub fn push_limit(&mut self, len: usize) -> Result<LimitToken, DecodeError> {
        if unlikely(len > self.remaining()) {
            return Err(DecodeError::limit_exceeded(len));
        }
        let token = LimitToken {
            prev_limit: self.limit,
            limit: self.pos + len,
        };
        self.limit = token.limit;
        Ok(token)
    }

    /// Restores the limit that was active before `token` was pushed.
    pub fn pop_limit(&mut self, token: LimitToken) -> Result<(), DecodeError> {
        if unlikely(token.limit != self.limit || token.prev_limit < token.limit) {
            return Err(DecodeError::limit_mismatch());
        }
        self.limit = token.prev_limit;
        Ok(())
    }
}

/// Skips over a field's payload based on its wire type.
///
/// Unknown fields are skipped this way to stay compatible with newer schemas.
/// Groups are skipped whole, including nested groups; `depth` is the current
/// nesting depth and exceeding `recursion_limit` fails.
pub fn skip_field(
    tag: Tag,
    cursor: &mut ByteCursor<'_>,
    depth: u32,
    recursion_limit: u32,
) -> Result<(), DecodeError> {
    match tag.wire_type() {
        WireType::Varint => cursor.read_varint().map(|_| ()),
        WireType::I64 => cursor.skip(8),
        WireType::I32 => cursor.skip(4),
        WireType::Len => {
            let len = cursor.read_size()?;
            cursor.skip(len)
        }
        WireType::SGroup => skip_group(tag.field_number(), cursor, depth + 1, recursion_limit),
        WireType::EGroup => Err(DecodeError::unmatched_group_end(None, tag.field_number())),
    }
}

fn skip_group(
    field_number: u32,
    cursor: &mut ByteCursor<'_>,
    depth: u32,
    recursion_limit: u32,
) -> Result<(), DecodeError> {
    if unlikely(depth > recursion_limit) {
        return Err(DecodeError::recursion_limit_exceeded(recursion_limit));
    }
    loop {
        if cursor.at_limit() {
            return Err(DecodeError::unexpected_end_of_buffer());
        }
        let tag = cursor.read_tag()?;
        if tag.wire_type() == WireType::EGroup {
            if tag.field_number() == field_number {
                return Ok(());
            }
            return Err(DecodeError::unmatched_group_end(
                Some(field_number),
                tag.field_number(),
            ));
        }
        skip_field(tag, cursor, depth, recursion_limit)?;
    }
}

/// Zigzag decoding for `sint32`.
#[inline(always)]
#[allow(clippy::as_conversions)]
pub const fn zigzag_decode_32(n: u32) -> i32 {
    ((n >> 1) as i32) ^ -((n & 1) as i32)
}

/// Zigzag decoding for `sint64`.
#[inline(always)]
#[allow(clippy::as_conversions)]
pub const fn zigzag_decode_64(n: u64) -> i64 {
    ((n >> 1) as i64) ^ -((n & 1) as i64)
}

/// Encodes a field key for `field_number` and `wire_type`.
#[inline(always)]
pub fn encode_key<B: bytes::BufMut>(wire_type: WireType, field_number: u32, buf: &mut B) {
    let key = (field_number << 3) | u32::cast_from(wire_type.into_val());
    u32::encode_leb128(key, buf);
}
