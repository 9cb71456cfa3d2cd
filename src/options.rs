//! Knobs for a single parse.

/// Options controlling how a buffer is parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOptions {
    /// Maximum nesting depth of messages, groups and map entries.
    pub(crate) recursion_limit: u32,

    /// Number of string fields queued before their UTF-8 is checked.
    pub(crate) utf8_batch_capacity: usize,

    /// Keep the raw bytes of unknown fields on the message.
    pub(crate) preserve_unknown_fields: bool,

    /// Fail on a known field arriving with the wrong wire type, instead of
    /// treating it as unknown.
    pub(crate) strict_wire_types: bool,
}

impl ParseOptions {
    pub const DEFAULT_RECURSION_LIMIT: u32 = 100;
    pub const DEFAULT_UTF8_BATCH_CAPACITY: usize = 10;

    /// Create new options with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum nesting depth.
    pub fn recursion_limit(&mut self, limit: u32) -> &mut Self {
        self.recursion_limit = limit;
        self
    }

    /// Set how many string fields are queued per UTF-8 validation batch.
    ///
    /// A capacity of zero is treated as one.
    pub fn utf8_batch_capacity(&mut self, capacity: usize) -> &mut Self {
        self.utf8_batch_capacity = capacity.max(1);
        self
    }

    /// Keep or drop the raw bytes of unknown fields.
    pub fn preserve_unknown_fields(&mut self, preserve: bool) -> &mut Self {
        self.preserve_unknown_fields = preserve;
        self
    }

    /// Reject known fields that arrive with an unexpected wire type.
    pub fn strict_wire_types(&mut self, strict: bool) -> &mut Self {
        self.strict_wire_types = strict;
        self
    }

    pub fn get_recursion_limit(&self) -> u32 {
        self.recursion_limit
    }

    pub fn get_utf8_batch_capacity(&self) -> usize {
        self.utf8_batch_capacity
    }
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            recursion_limit: Self::DEFAULT_RECURSION_LIMIT,
            utf8_batch_capacity: Self::DEFAULT_UTF8_BATCH_CAPACITY,
            preserve_unknown_fields: true,
            strict_wire_types: false,
        }
    }
}
