//! Deferred UTF-8 validation of `string` fields.

use smallvec::SmallVec;

use crate::error::DecodeError;

/// Queue of string payloads waiting to be checked for UTF-8.
///
/// Payloads are borrowed from the input buffer, so the batch lives no longer
/// than a single parse call.
#[derive(Debug)]
pub struct Utf8Batch<'b> {
    pending: SmallVec<[(&'b [u8], u32); 16]>,
    capacity: usize,
}

impl<'b> Utf8Batch<'b> {
    pub fn new(capacity: usize) -> Self {
        Utf8Batch {
            pending: SmallVec::new(),
            capacity: capacity.max(1),
        }
    }

    /// Queues `bytes` of `field_number`, validating the batch once it is full.
    #[inline]
    pub fn push(&mut self, bytes: &'b [u8], field_number: u32) -> Result<(), DecodeError> {
        self.pending.push((bytes, field_number));
        if self.pending.len() >= self.capacity {
            self.drain()?;
        }
        Ok(())
    }

    /// Validates and forgets every queued payload.
    pub fn drain(&mut self) -> Result<(), DecodeError> {
        let result = self
            .pending
            .iter()
            .find(|(bytes, _)| core::str::from_utf8(bytes).is_err())
            .map_or(Ok(()), |(_, field)| Err(DecodeError::invalid_utf8(*field)));
        self.pending.clear();
        result
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
