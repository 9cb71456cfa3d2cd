use crate::wire::WireType;

/// Error returned when decoding a wire-format buffer fails.
///
/// A failed parse leaves the target message partially populated. Callers
/// must treat it as garbage: clear or discard it, never inspect it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{kind}")]
pub struct DecodeError {
    kind: DecodeErrorKind,
}

// N.B. Errors travel through every frame of the recursive descent, keep them small.
// The largest payload is the `&'static str` of `ProgrammingError`, plus the tag.
static_assertions::const_assert!(core::mem::size_of::<DecodeError>() <= 24);

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeErrorKind {
    #[error("unexpected end of buffer")]
    UnexpectedEndOfBuffer,
    #[error("invalid leb128 varint")]
    InvalidVarInt,
    #[error("invalid 'wire type' value: {value}")]
    InvalidWireType { value: u8 },
    #[error("invalid key: '{reason}'")]
    InvalidKey { reason: InvalidKeyReason },
    #[error("field {field} arrived with unexpected wire type {actual:?}")]
    UnexpectedWireType { field: u32, actual: WireType },
    #[error("end-group tag for field {found} does not match the open group ({expected:?})")]
    UnmatchedGroupEnd { expected: Option<u32>, found: u32 },
    #[error("length prefix {value} exceeds platform addressable memory")]
    LengthOverflow { value: u64 },
    #[error("nested length {len} runs past the enclosing limit")]
    LimitExceeded { len: usize },
    #[error("limit popped out of order")]
    LimitMismatch,
    #[error("invalid UTF-8 in string field {field}")]
    InvalidUtf8 { field: u32 },
    #[error("nesting exceeds the recursion limit of {limit}")]
    RecursionLimitExceeded { limit: u32 },
    #[error("invalid packed field length: {actual} is not a multiple of {expected_multiple}")]
    InvalidPackedLength { expected_multiple: u8, actual: usize },
    #[error("programming error: '{reason}'")]
    ProgrammingError { reason: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidKeyReason {
    EmptyBuffer,
    TagOutOfRange,
    KeyOverflow,
}

impl core::fmt::Display for InvalidKeyReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let reason = match self {
            InvalidKeyReason::EmptyBuffer => "empty buffer",
            InvalidKeyReason::TagOutOfRange => "field number out of range",
            InvalidKeyReason::KeyOverflow => "key does not fit in 32 bits",
        };
        f.write_str(reason)
    }
}

impl DecodeError {
    #[inline]
    pub const fn kind(&self) -> DecodeErrorKind {
        self.kind
    }

    #[cold]
    pub(crate) fn unexpected_end_of_buffer() -> Self {
        DecodeErrorKind::UnexpectedEndOfBuffer.into()
    }

    #[cold]
    pub(crate) fn invalid_varint() -> Self {
        DecodeErrorKind::InvalidVarInt.into()
    }

    #[cold]
    pub(crate) fn invalid_wire_type(value: u8) -> Self {
        DecodeErrorKind::InvalidWireType { value }.into()
    }

    #[cold]
    pub(crate) fn invalid_key(reason: InvalidKeyReason) -> Self {
        DecodeErrorKind::InvalidKey { reason }.into()
    }

    #[cold]
    pub(crate) fn unexpected_wire_type(field: u32, actual: WireType) -> Self {
        DecodeErrorKind::UnexpectedWireType { field, actual }.into()
    }

    #[cold]
    pub(crate) fn unmatched_group_end(expected: Option<u32>, found: u32) -> Self {
        DecodeErrorKind::UnmatchedGroupEnd { expected, found }.into()
    }

    #[cold]
    pub(crate) fn length_overflow(value: u64) -> Self {
        DecodeErrorKind::LengthOverflow { value }.into()
    }

    #[cold]
    pub(crate) fn limit_exceeded(len: usize) -> Self {
        DecodeErrorKind::LimitExceeded { len }.into()
    }

    #[cold]
    pub(crate) fn limit_mismatch() -> Self {
        DecodeErrorKind::LimitMismatch.into()
    }

    #[cold]
    pub(crate) fn invalid_utf8(field: u32) -> Self {
        DecodeErrorKind::InvalidUtf8 { field }.into()
    }

    #[cold]
    pub(crate) fn recursion_limit_exceeded(limit: u32) -> Self {
        DecodeErrorKind::RecursionLimitExceeded { limit }.into()
    }

    #[cold]
    pub(crate) fn invalid_packed_length(expected_multiple: u8, actual: usize) -> Self {
        DecodeErrorKind::InvalidPackedLength {
            expected_multiple,
            actual,
        }
        .into()
    }

    #[cold]
    pub(crate) fn programming_error(reason: &'static str) -> Self {
        DecodeErrorKind::ProgrammingError { reason }.into()
    }
}

impl From<DecodeErrorKind> for DecodeError {
    #[inline]
    fn from(kind: DecodeErrorKind) -> Self {
        DecodeError { kind }
    }
}

/// Errors produced while assembling a [`Schema`](crate::table::Schema).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("message '{message}' declares field {field} more than once")]
    DuplicateFieldNumber { message: String, field: u32 },
    #[error("message '{message}' uses field number {field}, valid range is 1..=536870911")]
    FieldNumberOutOfRange { message: String, field: u32 },
    #[error("message '{message}' was declared but never defined")]
    UndefinedMessage { message: String },
    #[error("table id {id} does not belong to this schema")]
    UnknownTable { id: u32 },
    #[error("field {field} of '{message}' cannot be packed")]
    InvalidPacked { message: String, field: u32 },
    #[error("field {field} of '{message}' uses an invalid map key type")]
    InvalidMapKey { message: String, field: u32 },
    #[error("field {field} of '{message}' has a default value of the wrong type")]
    DefaultTypeMismatch { message: String, field: u32 },
    #[error("field {field} of '{message}' cannot be a oneof member")]
    InvalidOneof { message: String, field: u32 },
    #[error("message '{message}' has too many fields")]
    TooManyFields { message: String },
}
