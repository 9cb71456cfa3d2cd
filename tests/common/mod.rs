//! Hand-rolled wire encoding for building test inputs.

#![allow(dead_code)]

use prototab::leb128::LebCodec;
use prototab::wire::{encode_key, WireType};

/// Appends fields to a buffer in wire format.
#[derive(Debug, Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn varint(&mut self, field: u32, value: u64) -> &mut Self {
        encode_key(WireType::Varint, field, &mut self.buf);
        value.encode_leb128(&mut self.buf);
        self
    }

    pub fn sint(&mut self, field: u32, value: i64) -> &mut Self {
        let zigzag = ((value << 1) ^ (value >> 63)) as u64;
        self.varint(field, zigzag)
    }

    pub fn fixed32(&mut self, field: u32, value: u32) -> &mut Self {
        encode_key(WireType::I32, field, &mut self.buf);
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn fixed64(&mut self, field: u32, value: u64) -> &mut Self {
        encode_key(WireType::I64, field, &mut self.buf);
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn bytes(&mut self, field: u32, value: &[u8]) -> &mut Self {
        encode_key(WireType::Len, field, &mut self.buf);
        u64::try_from(value.len()).unwrap().encode_leb128(&mut self.buf);
        self.buf.extend_from_slice(value);
        self
    }

    /// A length-delimited field holding everything `nested` wrote.
    pub fn message(&mut self, field: u32, nested: &Writer) -> &mut Self {
        self.bytes(field, &nested.buf)
    }

    pub fn start_group(&mut self, field: u32) -> &mut Self {
        encode_key(WireType::SGroup, field, &mut self.buf);
        self
    }

    pub fn end_group(&mut self, field: u32) -> &mut Self {
        encode_key(WireType::EGroup, field, &mut self.buf);
        self
    }

    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn finish(&self) -> Vec<u8> {
        self.buf.clone()
    }
}
