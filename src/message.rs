//! Dynamic, table-described message objects that the parser populates.
//!
//! A [`DynamicMessage`] stores one [`Value`] per declared field, addressed by
//! the `slot` of the field's [`FieldEntry`]. Slots are created from the
//! table's [`DefaultInstance`], so a freshly constructed message is a copy
//! of its type's prototype.

use core::ops::{Deref, DerefMut};

use smallvec::SmallVec;

use crate::arena::Arena;
use crate::error::DecodeError;
use crate::options::ParseOptions;
use crate::string::{StringMut, TaggedString};
use crate::table::{Cardinality, FieldEntry, ParseTable, Schema, TableId};

/// Prototype value of a single slot.
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    Bool(bool),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    /// Default contents of a `string` or `bytes` field.
    Bytes(Vec<u8>),
    Message,
    Repeated(RepeatedKind),
    Map,
}

impl DefaultValue {
    fn instantiate<'a>(&self) -> Value<'a> {
        match self {
            DefaultValue::Bool(v) => Value::Bool(*v),
            DefaultValue::I32(v) => Value::I32(*v),
            DefaultValue::U32(v) => Value::U32(*v),
            DefaultValue::I64(v) => Value::I64(*v),
            DefaultValue::U64(v) => Value::U64(*v),
            DefaultValue::F32(v) => Value::F32(*v),
            DefaultValue::F64(v) => Value::F64(*v),
            // Strings start out pointing at the shared default.
            DefaultValue::Bytes(_) => Value::Bytes(TaggedString::new()),
            DefaultValue::Message => Value::Message(None),
            DefaultValue::Repeated(kind) => Value::Repeated(RepeatedField::new(*kind)),
            DefaultValue::Map => Value::Map(MapField::default()),
        }
    }

    /// Whether `self` and `other` describe the same kind of slot.
    pub(crate) fn same_kind(&self, other: &DefaultValue) -> bool {
        core::mem::discriminant(self) == core::mem::discriminant(other)
    }
}

/// Element type of a repeated slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepeatedKind {
    Bool,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    Bytes,
    Message,
}

/// The prototype a message type's instances are constructed from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DefaultInstance {
    values: Vec<DefaultValue>,
}

impl DefaultInstance {
    pub(crate) fn new(values: Vec<DefaultValue>) -> Self {
        DefaultInstance { values }
    }

    pub fn value(&self, slot: usize) -> Option<&DefaultValue> {
        self.values.get(slot)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn instantiate<'a>(&self) -> Vec<Value<'a>> {
        self.values.iter().map(DefaultValue::instantiate).collect()
    }

    fn default_bytes(&self, slot: usize) -> &[u8] {
        match self.values.get(slot) {
            Some(DefaultValue::Bytes(bytes)) => bytes,
            _ => &[],
        }
    }
}

/// Presence bits of a message's singular fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HasBits(SmallVec<[u32; 2]>);

impl HasBits {
    fn with_words(words: usize) -> Self {
        HasBits(SmallVec::from_elem(0, words))
    }

    #[inline]
    pub fn get(&self, idx: u16) -> bool {
        let (word, bit) = Self::locate(idx);
        self.0.get(word).is_some_and(|w| w & bit != 0)
    }

    #[inline]
    pub(crate) fn set(&mut self, idx: u16) {
        let (word, bit) = Self::locate(idx);
        if let Some(w) = self.0.get_mut(word) {
            *w |= bit;
        }
    }

    #[inline]
    pub(crate) fn clear(&mut self, idx: u16) {
        let (word, bit) = Self::locate(idx);
        if let Some(w) = self.0.get_mut(word) {
            *w &= !bit;
        }
    }

    /// The first word, which the parser accumulates in a register.
    #[inline]
    pub(crate) fn first_word(&self) -> u32 {
        self.0.first().copied().unwrap_or(0)
    }

    #[inline]
    pub(crate) fn set_first_word(&mut self, word: u32) {
        if let Some(w) = self.0.first_mut() {
            *w = word;
        }
    }

    fn clear_all(&mut self) {
        self.0.iter_mut().for_each(|w| *w = 0);
    }

    #[inline]
    fn locate(idx: u16) -> (usize, u32) {
        (usize::from(idx / 32), 1 << (idx % 32))
    }
}

/// A decoded field value.
#[derive(Debug, PartialEq)]
pub enum Value<'a> {
    Bool(bool),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Bytes(TaggedString<'a>),
    /// Child messages are created lazily on first encounter.
    Message(Option<MessageBox<'a>>),
    Repeated(RepeatedField<'a>),
    Map(MapField<'a>),
}

#[allow(clippy::as_conversions)]
impl Value<'_> {
    /// Stores raw decoded bits into a scalar slot.
    ///
    /// 32-bit slots keep the low 32 bits, which is how the wire format
    /// narrows `int32` values that were sign-extended to 64 bits. Returns
    /// `false` when the slot is not a scalar.
    #[inline]
    pub fn store_bits(&mut self, bits: u64) -> bool {
        match self {
            Value::Bool(v) => *v = bits != 0,
            Value::I32(v) => *v = bits as u32 as i32,
            Value::U32(v) => *v = bits as u32,
            Value::I64(v) => *v = bits as i64,
            Value::U64(v) => *v = bits,
            Value::F32(v) => *v = f32::from_bits(bits as u32),
            Value::F64(v) => *v = f64::from_bits(bits),
            Value::Bytes(_) | Value::Message(_) | Value::Repeated(_) | Value::Map(_) => {
                return false;
            }
        }
        true
    }
}

/// Storage of a repeated field.
#[derive(Debug, PartialEq)]
pub enum RepeatedField<'a> {
    Bool(Vec<bool>),
    I32(Vec<i32>),
    U32(Vec<u32>),
    I64(Vec<i64>),
    U64(Vec<u64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    Bytes(Vec<TaggedString<'a>>),
    Message(Vec<DynamicMessage<'a>>),
}

#[allow(clippy::as_conversions)]
impl<'a> RepeatedField<'a> {
    pub fn new(kind: RepeatedKind) -> Self {
        match kind {
            RepeatedKind::Bool => RepeatedField::Bool(Vec::new()),
            RepeatedKind::I32 => RepeatedField::I32(Vec::new()),
            RepeatedKind::U32 => RepeatedField::U32(Vec::new()),
            RepeatedKind::I64 => RepeatedField::I64(Vec::new()),
            RepeatedKind::U64 => RepeatedField::U64(Vec::new()),
            RepeatedKind::F32 => RepeatedField::F32(Vec::new()),
            RepeatedKind::F64 => RepeatedField::F64(Vec::new()),
            RepeatedKind::Bytes => RepeatedField::Bytes(Vec::new()),
            RepeatedKind::Message => RepeatedField::Message(Vec::new()),
        }
    }

    /// Appends raw decoded bits, narrowed like [`Value::store_bits`].
    #[inline]
    pub fn push_bits(&mut self, bits: u64) -> bool {
        match self {
            RepeatedField::Bool(v) => v.push(bits != 0),
            RepeatedField::I32(v) => v.push(bits as u32 as i32),
            RepeatedField::U32(v) => v.push(bits as u32),
            RepeatedField::I64(v) => v.push(bits as i64),
            RepeatedField::U64(v) => v.push(bits),
            RepeatedField::F32(v) => v.push(f32::from_bits(bits as u32)),
            RepeatedField::F64(v) => v.push(f64::from_bits(bits)),
            RepeatedField::Bytes(_) | RepeatedField::Message(_) => return false,
        }
        true
    }

    /// Reserves room for `additional` more scalars.
    pub(crate) fn reserve(&mut self, additional: usize) {
        match self {
            RepeatedField::Bool(v) => v.reserve(additional),
            RepeatedField::I32(v) => v.reserve(additional),
            RepeatedField::U32(v) => v.reserve(additional),
            RepeatedField::I64(v) => v.reserve(additional),
            RepeatedField::U64(v) => v.reserve(additional),
            RepeatedField::F32(v) => v.reserve(additional),
            RepeatedField::F64(v) => v.reserve(additional),
            RepeatedField::Bytes(_) | RepeatedField::Message(_) => (),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RepeatedField::Bool(v) => v.len(),
            RepeatedField::I32(v) => v.len(),
            RepeatedField::U32(v) => v.len(),
            RepeatedField::I64(v) => v.len(),
            RepeatedField::U64(v) => v.len(),
            RepeatedField::F32(v) => v.len(),
            RepeatedField::F64(v) => v.len(),
            RepeatedField::Bytes(v) => v.len(),
            RepeatedField::Message(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        match self {
            RepeatedField::Bool(v) => v.clear(),
            RepeatedField::I32(v) => v.clear(),
            RepeatedField::U32(v) => v.clear(),
            RepeatedField::I64(v) => v.clear(),
            RepeatedField::U64(v) => v.clear(),
            RepeatedField::F32(v) => v.clear(),
            RepeatedField::F64(v) => v.clear(),
            RepeatedField::Bytes(v) => v.clear(),
            RepeatedField::Message(v) => v.clear(),
        }
    }
}

/// Key used to look up an entry of a [`MapField`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapKey<'k> {
    Bool(bool),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    Str(&'k str),
}

impl MapKey<'_> {
    fn matches(&self, value: &Value<'_>) -> bool {
        match (self, value) {
            (MapKey::Bool(k), Value::Bool(v)) => k == v,
            (MapKey::I32(k), Value::I32(v)) => k == v,
            (MapKey::U32(k), Value::U32(v)) => k == v,
            (MapKey::I64(k), Value::I64(v)) => k == v,
            (MapKey::U64(k), Value::U64(v)) => k == v,
            (MapKey::Str(k), Value::Bytes(v)) => k.as_bytes() == v.as_bytes(),
            _ => false,
        }
    }
}

/// Storage of a map field: entry messages with slot 0 as key and slot 1 as value.
#[derive(Debug, Default, PartialEq)]
pub struct MapField<'a> {
    entries: Vec<DynamicMessage<'a>>,
}

impl<'a> MapField<'a> {
    /// Adds an entry, replacing any existing entry with the same key.
    pub fn insert(&mut self, entry: DynamicMessage<'a>) {
        let existing = self
            .entries
            .iter_mut()
            .find(|e| e.fields.first() == entry.fields.first());
        match existing {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    pub fn get(&self, key: MapKey<'_>) -> Option<&Value<'a>> {
        self.entries
            .iter()
            .find(|e| e.fields.first().is_some_and(|k| key.matches(k)))
            .and_then(|e| e.fields.get(1))
    }

    /// Iterates `(key, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&Value<'a>, &Value<'a>)> + '_ {
        self.entries
            .iter()
            .filter_map(|e| Some((e.fields.first()?, e.fields.get(1)?)))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Owning pointer to a child message, on the heap or in an arena.
pub enum MessageBox<'a> {
    Heap(Box<DynamicMessage<'a>>),
    Arena(bumpalo::boxed::Box<'a, DynamicMessage<'a>>),
}

impl<'a> MessageBox<'a> {
    pub fn new(msg: DynamicMessage<'a>, arena: Option<&'a Arena>) -> Self {
        match arena {
            Some(arena) => MessageBox::Arena(bumpalo::boxed::Box::new_in(msg, arena.bump())),
            None => MessageBox::Heap(Box::new(msg)),
        }
    }
}

impl<'a> Deref for MessageBox<'a> {
    type Target = DynamicMessage<'a>;

    fn deref(&self) -> &DynamicMessage<'a> {
        match self {
            MessageBox::Heap(msg) => msg,
            MessageBox::Arena(msg) => msg,
        }
    }
}

impl<'a> DerefMut for MessageBox<'a> {
    fn deref_mut(&mut self) -> &mut DynamicMessage<'a> {
        match self {
            MessageBox::Heap(msg) => msg,
            MessageBox::Arena(msg) => msg,
        }
    }
}

impl PartialEq for MessageBox<'_> {
    fn eq(&self, other: &Self) -> bool {
        **self == **other
    }
}

impl core::fmt::Debug for MessageBox<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        (**self).fmt(f)
    }
}

/// A message whose layout is described by a [`ParseTable`].
pub struct DynamicMessage<'a> {
    schema: &'a Schema,
    table_id: TableId,
    table: &'a ParseTable,
    arena: Option<&'a Arena>,
    pub(crate) has_bits: HasBits,
    oneof_case: SmallVec<[u32; 2]>,
    pub(crate) fields: Vec<Value<'a>>,
    pub(crate) unknown: Vec<u8>,
}

impl<'a> DynamicMessage<'a> {
    /// Creates an empty heap-backed message of type `table`.
    ///
    /// # Panics
    ///
    /// If `table` does not belong to `schema`.
    pub fn new(schema: &'a Schema, table: TableId) -> Self {
        Self::from_table(schema, table, schema.table(table), None)
    }

    /// Creates an empty message whose strings and children live in `arena`.
    ///
    /// # Panics
    ///
    /// If `table` does not belong to `schema`.
    pub fn new_in(schema: &'a Schema, table: TableId, arena: &'a Arena) -> Self {
        Self::from_table(schema, table, schema.table(table), Some(arena))
    }

    pub(crate) fn from_table(
        schema: &'a Schema,
        table_id: TableId,
        table: &'a ParseTable,
        arena: Option<&'a Arena>,
    ) -> Self {
        DynamicMessage {
            schema,
            table_id,
            table,
            arena,
            has_bits: HasBits::with_words(table.has_bit_words()),
            oneof_case: SmallVec::from_elem(0, table.oneof_count()),
            fields: table.default_instance().instantiate(),
            unknown: Vec::new(),
        }
    }

    /// Decodes a new message of type `table` from `buf`.
    pub fn decode(
        schema: &'a Schema,
        table: TableId,
        buf: &[u8],
        arena: Option<&'a Arena>,
    ) -> Result<Self, DecodeError> {
        let table_ref = schema
            .get(table)
            .ok_or_else(|| DecodeError::programming_error("table not in schema"))?;
        let mut msg = Self::from_table(schema, table, table_ref, arena);
        msg.merge_from(buf)?;
        Ok(msg)
    }

    /// Parses `buf` into this message, merging with what is already set.
    ///
    /// On failure the message is left partially populated and must be
    /// cleared or dropped.
    pub fn merge_from(&mut self, buf: &[u8]) -> Result<(), DecodeError> {
        crate::parse::parse(self, buf)
    }

    /// Like [`DynamicMessage::merge_from`], with explicit options.
    pub fn merge_from_with_options(
        &mut self,
        buf: &[u8],
        options: &ParseOptions,
    ) -> Result<(), DecodeError> {
        crate::parse::parse_with_options(self, buf, options)
    }

    pub fn schema(&self) -> &'a Schema {
        self.schema
    }

    pub fn table(&self) -> &'a ParseTable {
        self.table
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn arena(&self) -> Option<&'a Arena> {
        self.arena
    }

    pub fn get(&self, field_number: u32) -> Option<&Value<'a>> {
        let entry = self.table.resolve(field_number)?;
        self.fields.get(entry.slot_index())
    }

    /// Whether the field is present.
    ///
    /// Singular fields track presence with has-bits, oneof members by being
    /// the active case, and repeated fields by being non-empty.
    pub fn has(&self, field_number: u32) -> bool {
        let Some(entry) = self.table.resolve(field_number) else {
            return false;
        };
        match entry.flags.cardinality() {
            Cardinality::Singular => self.has_bits.get(entry.has_idx),
            Cardinality::Oneof => {
                self.which_oneof(usize::from(entry.has_idx)) == Some(field_number)
            }
            Cardinality::Repeated => match self.fields.get(entry.slot_index()) {
                Some(Value::Repeated(values)) => !values.is_empty(),
                Some(Value::Map(map)) => !map.is_empty(),
                _ => false,
            },
        }
    }

    /// Field number of the active member of oneof `idx`.
    pub fn which_oneof(&self, idx: usize) -> Option<u32> {
        self.oneof_case.get(idx).copied().filter(|case| *case != 0)
    }

    pub fn get_bool(&self, field_number: u32) -> Option<bool> {
        match self.get(field_number)? {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_i32(&self, field_number: u32) -> Option<i32> {
        match self.get(field_number)? {
            Value::I32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_u32(&self, field_number: u32) -> Option<u32> {
        match self.get(field_number)? {
            Value::U32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_i64(&self, field_number: u32) -> Option<i64> {
        match self.get(field_number)? {
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_u64(&self, field_number: u32) -> Option<u64> {
        match self.get(field_number)? {
            Value::U64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_f32(&self, field_number: u32) -> Option<f32> {
        match self.get(field_number)? {
            Value::F32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_f64(&self, field_number: u32) -> Option<f64> {
        match self.get(field_number)? {
            Value::F64(v) => Some(*v),
            _ => None,
        }
    }

    /// Contents of a `string` or `bytes` field, or its declared default.
    pub fn get_bytes(&self, field_number: u32) -> Option<&[u8]> {
        let entry = self.table.resolve(field_number)?;
        match self.fields.get(entry.slot_index())? {
            Value::Bytes(s) if s.is_default() => Some(
                self.table
                    .default_instance()
                    .default_bytes(entry.slot_index()),
            ),
            Value::Bytes(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    pub fn get_str(&self, field_number: u32) -> Option<&str> {
        core::str::from_utf8(self.get_bytes(field_number)?).ok()
    }

    pub fn get_message(&self, field_number: u32) -> Option<&DynamicMessage<'a>> {
        match self.get(field_number)? {
            Value::Message(Some(msg)) => Some(msg),
            _ => None,
        }
    }

    pub fn repeated(&self, field_number: u32) -> Option<&RepeatedField<'a>> {
        match self.get(field_number)? {
            Value::Repeated(values) => Some(values),
            _ => None,
        }
    }

    pub fn map(&self, field_number: u32) -> Option<&MapField<'a>> {
        match self.get(field_number)? {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Raw bytes of every field that was skipped as unknown, tags included.
    pub fn unknown_fields(&self) -> &[u8] {
        &self.unknown
    }

    /// Mutable access to a field's storage. Marks singular fields present.
    pub fn field_mut(&mut self, field_number: u32) -> Option<&mut Value<'a>> {
        let entry = *self.table.resolve(field_number)?;
        self.mark_present(&entry).ok()?;
        self.fields.get_mut(entry.slot_index())
    }

    /// Sets a `string` or `bytes` field. Returns `false` for other fields.
    pub fn set_bytes(&mut self, field_number: u32, value: &[u8]) -> bool {
        let arena = self.arena;
        match self.field_mut(field_number) {
            Some(Value::Bytes(s)) => {
                s.set(value, arena);
                true
            }
            _ => false,
        }
    }

    /// Writable handle to a `string` or `bytes` field, initialized from its
    /// default when unset.
    pub fn mutable_bytes(&mut self, field_number: u32) -> Option<StringMut<'_, 'a>> {
        let entry = *self.table.resolve(field_number)?;
        let arena = self.arena;
        let table = self.table;
        self.mark_present(&entry).ok()?;
        let default = table.default_instance().default_bytes(entry.slot_index());
        match self.fields.get_mut(entry.slot_index())? {
            Value::Bytes(s) => Some(s.mutable(default, arena)),
            _ => None,
        }
    }

    /// Takes the value of a `string` or `bytes` field, leaving it unset.
    pub fn release_bytes(&mut self, field_number: u32) -> Option<Vec<u8>> {
        let entry = *self.table.resolve(field_number)?;
        let released = match self.fields.get_mut(entry.slot_index())? {
            Value::Bytes(s) => s.release(),
            _ => return None,
        };
        self.mark_absent(&entry);
        released
    }

    /// Adopts `value` as the contents of a `string` or `bytes` field; `None` unsets it.
    pub fn set_allocated_bytes(&mut self, field_number: u32, value: Option<Vec<u8>>) -> bool {
        let Some(entry) = self.table.resolve(field_number).copied() else {
            return false;
        };
        if !matches!(self.fields.get(entry.slot_index()), Some(Value::Bytes(_))) {
            return false;
        }
        if value.is_some() {
            if self.mark_present(&entry).is_err() {
                return false;
            }
        } else {
            self.mark_absent(&entry);
        }
        let arena = self.arena;
        match self.fields.get_mut(entry.slot_index()) {
            Some(Value::Bytes(s)) => s.set_allocated(value, arena),
            _ => return false,
        }
        true
    }

    /// Resets every field to the type's defaults, keeping allocated storage.
    pub fn clear(&mut self) {
        let defaults = self.table.default_instance();
        for (slot, value) in self.fields.iter_mut().enumerate() {
            match value {
                Value::Bytes(s) => s.clear_to_default(defaults.default_bytes(slot)),
                Value::Message(Some(child)) => child.clear(),
                Value::Message(None) => (),
                Value::Repeated(values) => values.clear(),
                Value::Map(map) => map.clear(),
                scalar => {
                    if let Some(default) = defaults.value(slot) {
                        *scalar = default.instantiate();
                    }
                }
            }
        }
        self.has_bits.clear_all();
        self.oneof_case.iter_mut().for_each(|case| *case = 0);
        self.unknown.clear();
    }

    pub(crate) fn slot_mut(&mut self, entry: &FieldEntry) -> Result<&mut Value<'a>, DecodeError> {
        self.fields
            .get_mut(entry.slot_index())
            .ok_or_else(|| DecodeError::programming_error("slot out of range"))
    }

    /// Makes `entry` the active member of its oneof.
    ///
    /// A previously active, different member is reset to its default.
    pub(crate) fn activate_oneof(&mut self, entry: &FieldEntry) -> Result<(), DecodeError> {
        let field_number = entry.field_number();
        let case = self
            .oneof_case
            .get_mut(usize::from(entry.has_idx))
            .ok_or_else(|| DecodeError::programming_error("oneof index out of range"))?;
        let previous = core::mem::replace(case, field_number);
        if previous == 0 || previous == field_number {
            return Ok(());
        }

        let prev_entry = *self
            .table
            .resolve(previous)
            .ok_or_else(|| DecodeError::programming_error("unknown oneof member"))?;
        let slot = prev_entry.slot_index();
        let default = self
            .table
            .default_instance()
            .value(slot)
            .ok_or_else(|| DecodeError::programming_error("slot out of range"))?;
        let reset = default.instantiate();
        *self.slot_mut(&prev_entry)? = reset;
        Ok(())
    }

    /// Fails only when the table does not match the message layout.
    fn mark_present(&mut self, entry: &FieldEntry) -> Result<(), DecodeError> {
        match entry.flags.cardinality() {
            Cardinality::Singular => {
                self.has_bits.set(entry.has_idx);
                Ok(())
            }
            Cardinality::Oneof => self.activate_oneof(entry),
            Cardinality::Repeated => Ok(()),
        }
    }

    fn mark_absent(&mut self, entry: &FieldEntry) {
        match entry.flags.cardinality() {
            Cardinality::Singular => self.has_bits.clear(entry.has_idx),
            Cardinality::Oneof => {
                let field_number = entry.field_number();
                if let Some(case) = self.oneof_case.get_mut(usize::from(entry.has_idx)) {
                    if *case == field_number {
                        *case = 0;
                    }
                }
            }
            Cardinality::Repeated => (),
        }
    }
}

impl PartialEq for DynamicMessage<'_> {
    fn eq(&self, other: &Self) -> bool {
        core::ptr::eq(self.table, other.table)
            && self.has_bits == other.has_bits
            && self.oneof_case == other.oneof_case
            && self.fields == other.fields
            && self.unknown == other.unknown
    }
}

impl core::fmt::Debug for DynamicMessage<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut s = f.debug_struct(self.table.name());
        for entry in self.table.fields() {
            if let Some(value) = self.fields.get(entry.slot_index()) {
                s.field(&entry.field_number().to_string(), value);
            }
        }
        if !self.unknown.is_empty() {
            s.field("unknown", &self.unknown.len());
        }
        s.finish()
    }
}
