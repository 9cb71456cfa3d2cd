//! Per-message descriptor tables that drive the parser.
//!
//! Every message type gets a [`ParseTable`]. Field numbers in
//! `[start_field_num, start_field_num + entry_cutoff)` index straight into
//! the entry array. Anything outside that window goes through a skip map, a
//! sparse index over 16-field blocks (see [`skipmap`]).
//!
//! Tables are normally produced by [`SchemaBuilder`]. The parser trusts them:
//! a table that disagrees with the message it parses into is a programming
//! error, not bad input.

mod builder;
pub mod skipmap;

pub use builder::{FieldSpec, FieldType, MessageSpec, SchemaBuilder};

use crate::message::DefaultInstance;
use crate::util::CastFrom;
use crate::wire::{Tag, WireType};

/// Index of a [`ParseTable`] within a [`Schema`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableId(pub(crate) u32);

impl TableId {
    /// Table ids are created from `Vec` indices, so this never truncates.
    #[inline]
    #[allow(clippy::as_conversions)]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// How a field's payload is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FieldKind {
    /// Hole in the dense part of a table.
    Skip = 0,
    Varint,
    Fixed32,
    Fixed64,
    /// `string` or `bytes`.
    String,
    Message,
    Group,
    Map,
    PackedVarint,
    PackedFixed,
}

/// Decode modifiers of a [`FieldEntry`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FieldFlags(u16);

impl FieldFlags {
    pub const NONE: FieldFlags = FieldFlags(0);
    /// Signed varint using zigzag encoding.
    pub const ZIGZAG: FieldFlags = FieldFlags(1 << 0);
    /// Value is 64 bits wide, otherwise 32.
    pub const WIDTH64: FieldFlags = FieldFlags(1 << 1);
    /// Varint narrowed to a boolean.
    pub const BOOL: FieldFlags = FieldFlags(1 << 2);
    /// String contents must be valid UTF-8.
    pub const UTF8: FieldFlags = FieldFlags(1 << 3);
    pub const REPEATED: FieldFlags = FieldFlags(1 << 4);
    pub const ONEOF: FieldFlags = FieldFlags(1 << 5);
    /// Has-bit index does not fit in the first has-bit word.
    pub const EXCESS_HAS_BIT: FieldFlags = FieldFlags(1 << 6);

    #[inline(always)]
    pub const fn contains(self, other: FieldFlags) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline(always)]
    pub const fn union(self, other: FieldFlags) -> FieldFlags {
        FieldFlags(self.0 | other.0)
    }

    #[inline]
    pub const fn cardinality(self) -> Cardinality {
        if self.contains(FieldFlags::REPEATED) {
            Cardinality::Repeated
        } else if self.contains(FieldFlags::ONEOF) {
            Cardinality::Oneof
        } else {
            Cardinality::Singular
        }
    }

    pub const fn bits(self) -> u16 {
        self.0
    }
}

impl core::ops::BitOr for FieldFlags {
    type Output = FieldFlags;

    fn bitor(self, rhs: FieldFlags) -> FieldFlags {
        self.union(rhs)
    }
}

impl core::ops::BitOrAssign for FieldFlags {
    fn bitor_assign(&mut self, rhs: FieldFlags) {
        *self = self.union(rhs);
    }
}

impl core::fmt::Debug for FieldFlags {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        const NAMES: [(FieldFlags, &str); 7] = [
            (FieldFlags::ZIGZAG, "ZIGZAG"),
            (FieldFlags::WIDTH64, "WIDTH64"),
            (FieldFlags::BOOL, "BOOL"),
            (FieldFlags::UTF8, "UTF8"),
            (FieldFlags::REPEATED, "REPEATED"),
            (FieldFlags::ONEOF, "ONEOF"),
            (FieldFlags::EXCESS_HAS_BIT, "EXCESS_HAS_BIT"),
        ];
        let mut set = f.debug_set();
        for (flag, name) in NAMES {
            if self.contains(flag) {
                set.entry(&format_args!("{name}"));
            }
        }
        set.finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    Singular,
    Repeated,
    Oneof,
}

/// Decode instruction for one field number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldEntry {
    /// The full `field_number << 3 | wire_type` this field is encoded with.
    pub expected_tag: u32,
    /// Storage slot in the target message.
    pub slot: u16,
    /// Has-bit index for singular fields, oneof index for oneof members.
    pub has_idx: u16,
    /// Index into the table's aux entries for message, group and map fields.
    pub aux_idx: u16,
    pub flags: FieldFlags,
    pub kind: FieldKind,
}

static_assertions::const_assert_eq!(core::mem::size_of::<FieldEntry>(), 16);

impl FieldEntry {
    /// `has_idx` of fields without a has-bit.
    pub const NO_HAS_BIT: u16 = u16::MAX;
    pub const NO_AUX: u16 = u16::MAX;

    pub(crate) const SKIP: FieldEntry = FieldEntry {
        expected_tag: 0,
        slot: 0,
        has_idx: FieldEntry::NO_HAS_BIT,
        aux_idx: FieldEntry::NO_AUX,
        flags: FieldFlags::NONE,
        kind: FieldKind::Skip,
    };

    #[inline(always)]
    pub const fn field_number(&self) -> u32 {
        self.expected_tag >> 3
    }

    #[inline(always)]
    pub fn slot_index(&self) -> usize {
        usize::cast_from(self.slot)
    }

    /// The other encoding a repeated scalar may arrive in.
    ///
    /// Repeated scalars are accepted both packed and unpacked regardless of
    /// how the schema declares them.
    #[inline]
    pub fn alternate_wire_type(&self) -> Option<WireType> {
        if !self.flags.contains(FieldFlags::REPEATED) {
            return None;
        }
        let width64 = self.flags.contains(FieldFlags::WIDTH64);
        match self.kind {
            FieldKind::Varint | FieldKind::Fixed32 | FieldKind::Fixed64 => Some(WireType::Len),
            FieldKind::PackedVarint => Some(WireType::Varint),
            FieldKind::PackedFixed if width64 => Some(WireType::I64),
            FieldKind::PackedFixed => Some(WireType::I32),
            _ => None,
        }
    }
}

/// Table-level data for message, group and map fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuxEntry {
    /// Table of the child message.
    pub table: TableId,
}

/// Descriptor table for a single message type.
#[derive(Debug, Clone)]
pub struct ParseTable {
    pub(crate) name: String,
    pub(crate) default_instance: DefaultInstance,
    pub(crate) aux: Vec<AuxEntry>,
    pub(crate) has_bit_words: u16,
    pub(crate) oneof_count: u16,
    pub(crate) start_field_num: u32,
    pub(crate) entry_cutoff: u32,
    pub(crate) entries: Vec<FieldEntry>,
    pub(crate) skip_map: Vec<u16>,
}

impl ParseTable {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Prototype every message of this type is constructed from.
    pub fn default_instance(&self) -> &DefaultInstance {
        &self.default_instance
    }

    pub fn aux(&self, idx: u16) -> Option<&AuxEntry> {
        self.aux.get(usize::cast_from(idx))
    }

    /// Number of `u32` has-bit words a message of this type carries.
    pub fn has_bit_words(&self) -> usize {
        usize::cast_from(self.has_bit_words)
    }

    pub fn oneof_count(&self) -> usize {
        usize::cast_from(self.oneof_count)
    }

    pub fn start_field_num(&self) -> u32 {
        self.start_field_num
    }

    /// Number of field numbers covered by the dense part of the table.
    pub fn entry_cutoff(&self) -> u32 {
        self.entry_cutoff
    }

    /// Every declared field, in slot order.
    pub fn fields(&self) -> impl Iterator<Item = &FieldEntry> + '_ {
        self.entries.iter().filter(|entry| entry.kind != FieldKind::Skip)
    }

    /// Finds the decode instruction for `field_number`.
    #[inline]
    pub fn resolve(&self, field_number: u32) -> Option<&FieldEntry> {
        let dense_idx = field_number.wrapping_sub(self.start_field_num);
        if dense_idx < self.entry_cutoff {
            let entry = &self.entries[usize::cast_from(dense_idx)];
            return (entry.kind != FieldKind::Skip).then_some(entry);
        }
        let idx = skipmap::lookup(&self.skip_map, field_number)?;
        self.entries.get(idx)
    }

    /// Resolves `tag` and checks it against the entry's expected tag.
    #[inline]
    pub fn resolve_tag(&self, tag: Tag) -> Option<&FieldEntry> {
        self.resolve(tag.field_number())
            .filter(|entry| entry.expected_tag == tag.raw())
    }
}

/// A set of [`ParseTable`]s that may refer to one another.
#[derive(Debug, Clone)]
pub struct Schema {
    tables: Vec<ParseTable>,
}

impl Schema {
    pub(crate) fn new(tables: Vec<ParseTable>) -> Self {
        Schema { tables }
    }

    #[inline]
    pub fn get(&self, id: TableId) -> Option<&ParseTable> {
        self.tables.get(id.index())
    }

    /// Returns the table for `id`.
    ///
    /// # Panics
    ///
    /// If `id` was not produced by the builder of this schema.
    pub fn table(&self, id: TableId) -> &ParseTable {
        &self.tables[id.index()]
    }

    /// Looks up a table by message name.
    pub fn find(&self, name: &str) -> Option<TableId> {
        self.tables
            .iter()
            .position(|table| table.name == name)
            .and_then(|idx| u32::try_from(idx).ok())
            .map(TableId)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
