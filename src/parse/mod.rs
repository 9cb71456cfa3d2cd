//! The table-driven parse loop.
//!
//! [`parse_message`] reads one message up to its end marker: the end of the
//! buffer, the end of a length-delimited field, or the end tag of a group.
//! Every tag is resolved against the message's [`ParseTable`]; the resolved
//! [`FieldEntry`] says how to decode the payload and which slot it goes in.
//! Child messages and groups recurse with a narrower end marker.
//!
//! A failed parse leaves the target message partially populated. Callers
//! should clear or drop it.
//!
//! [`ParseTable`]: crate::table::ParseTable

pub mod packed;
pub mod utf8;

use tracing::{debug, trace};

pub use utf8::Utf8Batch;

use crate::arena::Arena;
use crate::error::DecodeError;
use crate::message::{DynamicMessage, MessageBox, RepeatedField, Value};
use crate::options::ParseOptions;
use crate::string::TaggedString;
use crate::table::{Cardinality, FieldEntry, FieldFlags, FieldKind};
use crate::util::{likely, unlikely};
use crate::wire::{skip_field, zigzag_decode_32, zigzag_decode_64, ByteCursor, Tag, WireType};

/// Where the message being parsed ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndMarker {
    /// The end of the input buffer.
    TopLevel,
    /// The end of a length-delimited field, as a buffer offset.
    Limit { end: usize },
    /// The end-group tag of this field number.
    Group(u32),
}

/// State shared by every level of a single parse call.
#[derive(Debug)]
pub struct ParseContext<'a, 'b> {
    arena: Option<&'a Arena>,
    options: ParseOptions,
    depth: u32,
    utf8: Utf8Batch<'b>,
}

impl<'a, 'b> ParseContext<'a, 'b> {
    pub fn new(arena: Option<&'a Arena>, options: &ParseOptions) -> Self {
        ParseContext {
            arena,
            options: options.clone(),
            depth: 0,
            utf8: Utf8Batch::new(options.utf8_batch_capacity),
        }
    }

    /// Current nesting depth, zero at the top level.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Validates any string fields still waiting in the UTF-8 batch.
    pub fn finish(&mut self) -> Result<(), DecodeError> {
        self.utf8.drain()
    }
}

/// Parses `buf` into `msg` with the default [`ParseOptions`].
pub fn parse(msg: &mut DynamicMessage<'_>, buf: &[u8]) -> Result<(), DecodeError> {
    parse_with_options(msg, buf, &ParseOptions::default())
}

/// Parses `buf` into `msg`, merging with the fields already set.
pub fn parse_with_options(
    msg: &mut DynamicMessage<'_>,
    buf: &[u8],
    options: &ParseOptions,
) -> Result<(), DecodeError> {
    let mut cursor = ByteCursor::new(buf);
    let mut ctx = ParseContext::new(msg.arena(), options);

    let result = parse_message(msg, &mut cursor, EndMarker::TopLevel, &mut ctx)
        .and_then(|()| ctx.finish());
    if let Err(err) = &result {
        debug!(
            error = %err,
            offset = cursor.position(),
            table = msg.table().name(),
            "failed to parse message"
        );
    }
    result
}

/// Parses fields into `msg` until `end` is reached.
///
/// Has-bits below 32 are gathered in a local word and stored back once on
/// the way out, whether or not the parse succeeded.
pub fn parse_message<'a, 'b>(
    msg: &mut DynamicMessage<'a>,
    cursor: &mut ByteCursor<'b>,
    end: EndMarker,
    ctx: &mut ParseContext<'a, 'b>,
) -> Result<(), DecodeError> {
    trace!(table = msg.table().name(), depth = ctx.depth, ?end, "enter message");

    let mut has_bits = msg.has_bits.first_word();
    let result = parse_loop(msg, cursor, end, ctx, &mut has_bits);
    msg.has_bits.set_first_word(has_bits);

    trace!(
        table = msg.table().name(),
        offset = cursor.position(),
        ok = result.is_ok(),
        "exit message"
    );
    result
}

fn parse_loop<'a, 'b>(
    msg: &mut DynamicMessage<'a>,
    cursor: &mut ByteCursor<'b>,
    end: EndMarker,
    ctx: &mut ParseContext<'a, 'b>,
    has_bits: &mut u32,
) -> Result<(), DecodeError> {
    loop {
        if cursor.at_limit() {
            return match end {
                EndMarker::TopLevel => Ok(()),
                EndMarker::Limit { end } if end == cursor.position() => Ok(()),
                EndMarker::Limit { .. } => Err(DecodeError::limit_mismatch()),
                // A group must be closed by its end tag.
                EndMarker::Group(_) => Err(DecodeError::unexpected_end_of_buffer()),
            };
        }

        let tag_start = cursor.position();
        let tag = cursor.read_tag()?;
        if unlikely(tag.wire_type() == WireType::EGroup) {
            return match end {
                EndMarker::Group(open) if open == tag.field_number() => Ok(()),
                EndMarker::Group(open) => Err(DecodeError::unmatched_group_end(
                    Some(open),
                    tag.field_number(),
                )),
                _ => Err(DecodeError::unmatched_group_end(None, tag.field_number())),
            };
        }

        let entry = match msg.table().resolve(tag.field_number()) {
            Some(entry) if likely(entry.expected_tag == tag.raw()) => *entry,
            Some(entry) if entry.alternate_wire_type() == Some(tag.wire_type()) => {
                trace!(
                    table = msg.table().name(),
                    field = tag.field_number(),
                    wire_type = ?tag.wire_type(),
                    "repeated field in alternate encoding"
                );
                with_alternate_kind(*entry)
            }
            Some(_) if ctx.options.strict_wire_types => {
                return Err(DecodeError::unexpected_wire_type(
                    tag.field_number(),
                    tag.wire_type(),
                ));
            }
            Some(_) | None => {
                parse_unknown(msg, tag, tag_start, cursor, ctx)?;
                continue;
            }
        };

        parse_field(msg, &entry, cursor, ctx, has_bits)?;
    }
}

/// Decodes one known field's payload into its slot.
#[inline]
fn parse_field<'a, 'b>(
    msg: &mut DynamicMessage<'a>,
    entry: &FieldEntry,
    cursor: &mut ByteCursor<'b>,
    ctx: &mut ParseContext<'a, 'b>,
    has_bits: &mut u32,
) -> Result<(), DecodeError> {
    match entry.kind {
        FieldKind::Varint => {
            let raw = cursor.read_varint()?;
            store_scalar(msg, entry, varint_bits(raw, entry.flags), has_bits)
        }
        FieldKind::Fixed32 => {
            let raw = cursor.read_fixed32()?;
            store_scalar(msg, entry, u64::from(raw), has_bits)
        }
        FieldKind::Fixed64 => {
            let raw = cursor.read_fixed64()?;
            store_scalar(msg, entry, raw, has_bits)
        }
        FieldKind::String => {
            let len = cursor.read_size()?;
            let bytes = cursor.read_bytes(len)?;
            store_string(msg, entry, bytes, ctx.arena, has_bits)?;
            if entry.flags.contains(FieldFlags::UTF8) {
                ctx.utf8.push(bytes, entry.field_number())?;
            }
            Ok(())
        }
        FieldKind::Message => {
            let len = cursor.read_size()?;
            let token = cursor.push_limit(len)?;
            let end = EndMarker::Limit { end: cursor.limit() };
            mark_present(msg, entry, has_bits)?;
            let child = child_message(msg, entry, ctx.arena)?;
            parse_child(child, cursor, end, ctx)?;
            cursor.pop_limit(token)
        }
        FieldKind::Group => {
            mark_present(msg, entry, has_bits)?;
            let child = child_message(msg, entry, ctx.arena)?;
            parse_child(child, cursor, EndMarker::Group(entry.field_number()), ctx)
        }
        FieldKind::Map => {
            let len = cursor.read_size()?;
            let token = cursor.push_limit(len)?;
            let end = EndMarker::Limit { end: cursor.limit() };

            let schema = msg.schema();
            let entry_id = msg
                .table()
                .aux(entry.aux_idx)
                .ok_or_else(|| DecodeError::programming_error("map field without entry table"))?
                .table;
            let entry_table = schema
                .get(entry_id)
                .ok_or_else(|| DecodeError::programming_error("entry table not in schema"))?;
            let mut map_entry = DynamicMessage::from_table(schema, entry_id, entry_table, ctx.arena);
            parse_child(&mut map_entry, cursor, end, ctx)?;
            cursor.pop_limit(token)?;

            match msg.slot_mut(entry)? {
                Value::Map(map) => {
                    map.insert(map_entry);
                    Ok(())
                }
                _ => Err(DecodeError::programming_error("slot does not hold a map")),
            }
        }
        FieldKind::PackedVarint | FieldKind::PackedFixed => {
            let len = cursor.read_size()?;
            let data = cursor.read_bytes(len)?;
            let values = match msg.slot_mut(entry)? {
                Value::Repeated(values) => values,
                _ => return Err(DecodeError::programming_error("slot is not repeated")),
            };
            if entry.kind == FieldKind::PackedVarint {
                packed::decode_packed_varint(data, entry.flags, values)
            } else {
                packed::decode_packed_fixed(data, entry.flags, values)
            }
        }
        FieldKind::Skip => Err(DecodeError::programming_error("resolved a skip entry")),
    }
}

/// Recurses into a child message, enforcing the nesting limit.
fn parse_child<'a, 'b>(
    child: &mut DynamicMessage<'a>,
    cursor: &mut ByteCursor<'b>,
    end: EndMarker,
    ctx: &mut ParseContext<'a, 'b>,
) -> Result<(), DecodeError> {
    let limit = ctx.options.recursion_limit;
    if unlikely(ctx.depth >= limit) {
        return Err(DecodeError::recursion_limit_exceeded(limit));
    }
    ctx.depth += 1;
    let result = parse_message(child, cursor, end, ctx);
    ctx.depth -= 1;
    result
}

/// Skips a field the table does not know, keeping its bytes if configured to.
#[cold]
fn parse_unknown(
    msg: &mut DynamicMessage<'_>,
    tag: Tag,
    tag_start: usize,
    cursor: &mut ByteCursor<'_>,
    ctx: &ParseContext<'_, '_>,
) -> Result<(), DecodeError> {
    trace!(
        table = msg.table().name(),
        field = tag.field_number(),
        wire_type = ?tag.wire_type(),
        "skipping unknown field"
    );
    skip_field(tag, cursor, ctx.depth, ctx.options.recursion_limit)?;
    if ctx.options.preserve_unknown_fields {
        let raw = &cursor.buffer()[tag_start..cursor.position()];
        msg.unknown.extend_from_slice(raw);
    }
    Ok(())
}

/// Interprets a raw varint for a field with `flags`.
#[inline(always)]
#[allow(clippy::as_conversions)]
pub(crate) fn varint_bits(raw: u64, flags: FieldFlags) -> u64 {
    if flags.contains(FieldFlags::BOOL) {
        return u64::from(raw != 0);
    }
    if !flags.contains(FieldFlags::ZIGZAG) {
        return raw;
    }
    if flags.contains(FieldFlags::WIDTH64) {
        zigzag_decode_64(raw) as u64
    } else {
        // sint32 only uses the low 32 bits of the varint.
        zigzag_decode_32(raw as u32) as u32 as u64
    }
}

/// The entry to decode with when a repeated scalar arrives in the encoding
/// it was not declared with.
fn with_alternate_kind(entry: FieldEntry) -> FieldEntry {
    let kind = match entry.kind {
        FieldKind::Varint => FieldKind::PackedVarint,
        FieldKind::Fixed32 | FieldKind::Fixed64 => FieldKind::PackedFixed,
        FieldKind::PackedVarint => FieldKind::Varint,
        FieldKind::PackedFixed if entry.flags.contains(FieldFlags::WIDTH64) => FieldKind::Fixed64,
        FieldKind::PackedFixed => FieldKind::Fixed32,
        other => other,
    };
    FieldEntry { kind, ..entry }
}

/// Records that a singular or oneof field was seen.
#[inline(always)]
fn mark_present(
    msg: &mut DynamicMessage<'_>,
    entry: &FieldEntry,
    has_bits: &mut u32,
) -> Result<(), DecodeError> {
    match entry.flags.cardinality() {
        Cardinality::Singular => {
            if likely(!entry.flags.contains(FieldFlags::EXCESS_HAS_BIT)) {
                *has_bits |= 1u32 << entry.has_idx;
            } else {
                msg.has_bits.set(entry.has_idx);
            }
            Ok(())
        }
        Cardinality::Oneof => msg.activate_oneof(entry),
        Cardinality::Repeated => Ok(()),
    }
}

#[inline(always)]
fn store_scalar(
    msg: &mut DynamicMessage<'_>,
    entry: &FieldEntry,
    bits: u64,
    has_bits: &mut u32,
) -> Result<(), DecodeError> {
    mark_present(msg, entry, has_bits)?;
    let stored = match msg.slot_mut(entry)? {
        Value::Repeated(values) => values.push_bits(bits),
        value => value.store_bits(bits),
    };
    if unlikely(!stored) {
        return Err(DecodeError::programming_error("slot does not hold a scalar"));
    }
    Ok(())
}

#[inline]
fn store_string<'a>(
    msg: &mut DynamicMessage<'a>,
    entry: &FieldEntry,
    bytes: &[u8],
    arena: Option<&'a Arena>,
    has_bits: &mut u32,
) -> Result<(), DecodeError> {
    mark_present(msg, entry, has_bits)?;
    match msg.slot_mut(entry)? {
        Value::Bytes(s) => s.read_from_wire(bytes, arena),
        Value::Repeated(RepeatedField::Bytes(values)) => {
            let mut s = TaggedString::new();
            s.read_from_wire(bytes, arena);
            values.push(s);
        }
        _ => return Err(DecodeError::programming_error("slot does not hold a string")),
    }
    Ok(())
}

/// The child message stored in `entry`'s slot, created on first use.
///
/// Repeated fields get a new element appended.
fn child_message<'m, 'a>(
    msg: &'m mut DynamicMessage<'a>,
    entry: &FieldEntry,
    arena: Option<&'a Arena>,
) -> Result<&'m mut DynamicMessage<'a>, DecodeError> {
    let schema = msg.schema();
    let table_id = msg
        .table()
        .aux(entry.aux_idx)
        .ok_or_else(|| DecodeError::programming_error("message field without aux entry"))?
        .table;
    let table = schema
        .get(table_id)
        .ok_or_else(|| DecodeError::programming_error("child table not in schema"))?;

    match msg.slot_mut(entry)? {
        Value::Message(slot) => {
            let child = slot.get_or_insert_with(|| {
                MessageBox::new(DynamicMessage::from_table(schema, table_id, table, arena), arena)
            });
            Ok(&mut **child)
        }
        Value::Repeated(RepeatedField::Message(values)) => {
            values.push(DynamicMessage::from_table(schema, table_id, table, arena));
            values
                .last_mut()
                .ok_or_else(|| DecodeError::programming_error("repeated message vanished"))
        }
        _ => Err(DecodeError::programming_error("slot does not hold a message")),
    }
}
