//! Packed repeated field decoding.
//!
//! Fixed-width elements are read in chunks of 16 bytes so the loop body is
//! free of per-element bounds checks. Varints go through the SWAR decoder.

use crate::error::DecodeError;
use crate::leb128::decode_varint;
use crate::message::RepeatedField;
use crate::table::FieldFlags;

use super::varint_bits;

/// Appends every fixed-width element of `data` to `dst`.
#[inline]
pub fn decode_packed_fixed(
    data: &[u8],
    flags: FieldFlags,
    dst: &mut RepeatedField<'_>,
) -> Result<(), DecodeError> {
    if flags.contains(FieldFlags::WIDTH64) {
        decode_packed_8byte(data, dst)
    } else {
        decode_packed_4byte(data, dst)
    }
}

fn decode_packed_4byte(data: &[u8], dst: &mut RepeatedField<'_>) -> Result<(), DecodeError> {
    if data.len() % 4 != 0 {
        return Err(DecodeError::invalid_packed_length(4, data.len()));
    }
    dst.reserve(data.len() / 4);

    let mut chunks = data.chunks_exact(16);
    let mut stored = true;
    for chunk in &mut chunks {
        for word in chunk.chunks_exact(4) {
            stored &= dst.push_bits(u64::from(read_u32_le(word)));
        }
    }
    for word in chunks.remainder().chunks_exact(4) {
        stored &= dst.push_bits(u64::from(read_u32_le(word)));
    }
    check_stored(stored)
}

fn decode_packed_8byte(data: &[u8], dst: &mut RepeatedField<'_>) -> Result<(), DecodeError> {
    if data.len() % 8 != 0 {
        return Err(DecodeError::invalid_packed_length(8, data.len()));
    }
    dst.reserve(data.len() / 8);

    let mut chunks = data.chunks_exact(16);
    let mut stored = true;
    for chunk in &mut chunks {
        stored &= dst.push_bits(read_u64_le(&chunk[..8]));
        stored &= dst.push_bits(read_u64_le(&chunk[8..]));
    }
    if let Some(last) = chunks.remainder().first_chunk::<8>() {
        stored &= dst.push_bits(u64::from_le_bytes(*last));
    }
    check_stored(stored)
}

/// Appends every varint of `data` to `dst`, zigzag decoding per `flags`.
///
/// The last varint must end exactly at the end of `data`.
#[inline]
pub fn decode_packed_varint(
    data: &[u8],
    flags: FieldFlags,
    dst: &mut RepeatedField<'_>,
) -> Result<(), DecodeError> {
    // Every varint ends in exactly one byte without the continuation bit.
    dst.reserve(data.iter().filter(|byte| **byte < 0x80).count());

    let mut offset = 0;
    let mut stored = true;
    while offset < data.len() {
        let (raw, read) = decode_varint(&data[offset..])?;
        stored &= dst.push_bits(varint_bits(raw, flags));
        offset += read;
    }
    check_stored(stored)
}

#[inline(always)]
fn check_stored(stored: bool) -> Result<(), DecodeError> {
    if stored {
        Ok(())
    } else {
        Err(DecodeError::programming_error("packed field slot is not scalar"))
    }
}

#[inline(always)]
fn read_u32_le(word: &[u8]) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(word);
    u32::from_le_bytes(bytes)
}

#[inline(always)]
fn read_u64_le(word: &[u8]) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(word);
    u64::from_le_bytes(bytes)
}
