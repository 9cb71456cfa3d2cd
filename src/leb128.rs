//! LEB128 variable-length integers, decoded a machine word at a time.
//!
//! The fast path preloads up to eight bytes into a `u64`, finds the varint's
//! length with a carry trick and compacts the payload bits in one go. Only the
//! rare 9 and 10 byte encodings fall back to byte-at-a-time decoding.

// This module uses `as` casts which have been reviewed for correctness.
#![allow(clippy::as_conversions)]

use crate::error::DecodeError;
use crate::util::{likely, unlikely};

/// Maximum number of bytes a 64-bit varint may occupy.
pub const MAX_VARINT_LEN: usize = 10;

/// Mask with the payload bits of every byte in a word set.
const PAYLOAD_MASK: u64 = 0x7f7f_7f7f_7f7f_7f7f;

/// Loads up to eight bytes from the front of `data` as a little-endian word.
///
/// Missing bytes are zero, which reads as a terminating byte. Callers compare
/// the scanned length against `data.len()` to detect truncation.
#[inline(always)]
pub fn load_word(data: &[u8]) -> u64 {
    match data.first_chunk::<8>() {
        Some(chunk) => u64::from_le_bytes(*chunk),
        None => {
            let mut padded = [0u8; 8];
            padded[..data.len()].copy_from_slice(data);
            u64::from_le_bytes(padded)
        }
    }
}

/// Returns how many bytes the varint at the start of `word` occupies.
///
/// Returns 1 through 8, or 9 when every byte of `word` carries a continuation
/// bit and the varint spills past the word.
#[inline(always)]
pub const fn scan_varint_length(word: u64) -> u32 {
    // Every payload bit forced to one. Bytes with a continuation bit become
    // 0xff, so the carry from `+ 1` stops at the first byte whose top bit is clear.
    let cont = word | PAYLOAD_MASK;
    let flipped = cont ^ cont.wrapping_add(1);
    (flipped.count_ones() >> 3) + (cont == u64::MAX) as u32
}

/// Compacts the low `len` bytes of `word` into a right-justified integer,
/// dropping the continuation bit of every byte.
///
/// `len` must be in `1..=8`.
#[inline(always)]
pub fn extract_varint_payload(word: u64, len: u32) -> u64 {
    debug_assert!((1..=8).contains(&len), "invalid varint length {len}");
    let masked = word & (u64::MAX >> (64 - 8 * len));

    #[cfg(all(target_arch = "x86_64", target_feature = "bmi2"))]
    {
        // SAFETY: bmi2 is enabled at compile time.
        unsafe { core::arch::x86_64::_pext_u64(masked, PAYLOAD_MASK) }
    }
    #[cfg(not(all(target_arch = "x86_64", target_feature = "bmi2")))]
    {
        // N.B. Processing all eight chunks is cheaper than branching on `len`.
        (masked & 0x0000_0000_0000_007f)
            | ((masked & 0x0000_0000_0000_7f00) >> 1)
            | ((masked & 0x0000_0000_007f_0000) >> 2)
            | ((masked & 0x0000_0000_7f00_0000) >> 3)
            | ((masked & 0x0000_007f_0000_0000) >> 4)
            | ((masked & 0x0000_7f00_0000_0000) >> 5)
            | ((masked & 0x007f_0000_0000_0000) >> 6)
            | ((masked & 0x7f00_0000_0000_0000) >> 7)
    }
}

/// Decodes a varint from the front of `data`.
///
/// Returns the value and the number of bytes consumed.
#[inline]
pub fn decode_varint(data: &[u8]) -> Result<(u64, usize), DecodeError> {
    let Some(&first) = data.first() else {
        return Err(DecodeError::unexpected_end_of_buffer());
    };
    if likely(first < 0x80) {
        return Ok((u64::from(first), 1));
    }

    let word = load_word(data);
    let len = scan_varint_length(word);
    if likely(len <= 8) {
        let len_bytes = len as usize;
        if unlikely(len_bytes > data.len()) {
            return Err(DecodeError::unexpected_end_of_buffer());
        }
        return Ok((extract_varint_payload(word, len), len_bytes));
    }

    decode_varint_slow(data, word)
}

/// Handles varints of 9 or 10 bytes, the first eight of which are in `word`.
#[cold]
#[inline(never)]
fn decode_varint_slow(data: &[u8], word: u64) -> Result<(u64, usize), DecodeError> {
    let low = extract_varint_payload(word, 8);

    let ninth = *data.get(8).ok_or_else(DecodeError::unexpected_end_of_buffer)?;
    if ninth < 0x80 {
        return Ok((low | (u64::from(ninth) << 56), 9));
    }

    // The tenth byte only has room for bit 63.
    let tenth = *data.get(9).ok_or_else(DecodeError::unexpected_end_of_buffer)?;
    if tenth > 0x01 {
        return Err(DecodeError::invalid_varint());
    }
    let value = low | (u64::from(ninth & 0x7f) << 56) | (u64::from(tenth) << 63);
    Ok((value, MAX_VARINT_LEN))
}

/// Types that can be encoded as a LEB128 variable length integer.
pub trait LebCodec: Sized + Copy {
    /// Encode `self` into the provided buffer, returning the number of bytes written.
    fn encode_leb128<B: bytes::BufMut>(self, buf: &mut B) -> usize;

    /// The number of bytes required to encode this integer.
    fn encoded_leb128_len(self) -> usize;
}

impl LebCodec for u64 {
    #[inline]
    fn encode_leb128<B: bytes::BufMut>(self, buf: &mut B) -> usize {
        let mut value = self;
        let mut written = 1;
        while value >= 0x80 {
            buf.put_u8((value as u8) | 0x80);
            value >>= 7;
            written += 1;
        }
        buf.put_u8(value as u8);
        written
    }

    #[inline(always)]
    fn encoded_leb128_len(self) -> usize {
        // `| 1` so zero still takes a byte.
        let bits = 64 - (self | 1).leading_zeros();
        ((bits + 6) / 7) as usize
    }
}

impl LebCodec for u32 {
    #[inline]
    fn encode_leb128<B: bytes::BufMut>(self, buf: &mut B) -> usize {
        u64::from(self).encode_leb128(buf)
    }

    #[inline(always)]
    fn encoded_leb128_len(self) -> usize {
        u64::from(self).encoded_leb128_len()
    }
}
