//! Assembles [`ParseTable`]s from a description of each message's fields.

use crate::error::SchemaError;
use crate::message::{DefaultInstance, DefaultValue, RepeatedKind};
use crate::table::{skipmap, AuxEntry, FieldEntry, FieldFlags, FieldKind, ParseTable, Schema, TableId};
use crate::util::CastFrom;
use crate::wire::{Tag, WireType, MAXIMUM_FIELD_NUMBER, MINIMUM_FIELD_NUMBER};

/// Declared type of a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Int32,
    Int64,
    UInt32,
    UInt64,
    SInt32,
    SInt64,
    Bool,
    Enum,
    Fixed32,
    Fixed64,
    SFixed32,
    SFixed64,
    Float,
    Double,
    String,
    Bytes,
    Message(TableId),
    Group(TableId),
    /// Sugar for a repeated entry message with the key as field 1 and the
    /// value as field 2.
    Map {
        key: Box<FieldType>,
        value: Box<FieldType>,
    },
}

impl FieldType {
    fn base_kind(&self) -> FieldKind {
        match self {
            FieldType::Int32
            | FieldType::Int64
            | FieldType::UInt32
            | FieldType::UInt64
            | FieldType::SInt32
            | FieldType::SInt64
            | FieldType::Bool
            | FieldType::Enum => FieldKind::Varint,
            FieldType::Fixed32 | FieldType::SFixed32 | FieldType::Float => FieldKind::Fixed32,
            FieldType::Fixed64 | FieldType::SFixed64 | FieldType::Double => FieldKind::Fixed64,
            FieldType::String | FieldType::Bytes => FieldKind::String,
            FieldType::Message(_) => FieldKind::Message,
            FieldType::Group(_) => FieldKind::Group,
            FieldType::Map { .. } => FieldKind::Map,
        }
    }

    fn base_flags(&self) -> FieldFlags {
        match self {
            FieldType::SInt32 => FieldFlags::ZIGZAG,
            FieldType::SInt64 => FieldFlags::ZIGZAG | FieldFlags::WIDTH64,
            FieldType::Int64
            | FieldType::UInt64
            | FieldType::Fixed64
            | FieldType::SFixed64
            | FieldType::Double => FieldFlags::WIDTH64,
            FieldType::Bool => FieldFlags::BOOL,
            _ => FieldFlags::NONE,
        }
    }

    fn is_scalar(&self) -> bool {
        matches!(
            self.base_kind(),
            FieldKind::Varint | FieldKind::Fixed32 | FieldKind::Fixed64
        )
    }

    /// Integral and string types may key a map.
    fn is_map_key(&self) -> bool {
        match self {
            FieldType::Int32
            | FieldType::Int64
            | FieldType::UInt32
            | FieldType::UInt64
            | FieldType::SInt32
            | FieldType::SInt64
            | FieldType::Fixed32
            | FieldType::Fixed64
            | FieldType::SFixed32
            | FieldType::SFixed64
            | FieldType::Bool
            | FieldType::String => true,
            FieldType::Enum
            | FieldType::Float
            | FieldType::Double
            | FieldType::Bytes
            | FieldType::Message(_)
            | FieldType::Group(_)
            | FieldType::Map { .. } => false,
        }
    }

    fn child(&self) -> Option<TableId> {
        match self {
            FieldType::Message(id) | FieldType::Group(id) => Some(*id),
            _ => None,
        }
    }

    fn default_value(&self) -> DefaultValue {
        match self {
            FieldType::Int32 | FieldType::SInt32 | FieldType::SFixed32 | FieldType::Enum => {
                DefaultValue::I32(0)
            }
            FieldType::Int64 | FieldType::SInt64 | FieldType::SFixed64 => DefaultValue::I64(0),
            FieldType::UInt32 | FieldType::Fixed32 => DefaultValue::U32(0),
            FieldType::UInt64 | FieldType::Fixed64 => DefaultValue::U64(0),
            FieldType::Bool => DefaultValue::Bool(false),
            FieldType::Float => DefaultValue::F32(0.0),
            FieldType::Double => DefaultValue::F64(0.0),
            FieldType::String | FieldType::Bytes => DefaultValue::Bytes(Vec::new()),
            FieldType::Message(_) | FieldType::Group(_) => DefaultValue::Message,
            FieldType::Map { .. } => DefaultValue::Map,
        }
    }

    fn repeated_kind(&self) -> RepeatedKind {
        match self.default_value() {
            DefaultValue::Bool(_) => RepeatedKind::Bool,
            DefaultValue::I32(_) => RepeatedKind::I32,
            DefaultValue::U32(_) => RepeatedKind::U32,
            DefaultValue::I64(_) => RepeatedKind::I64,
            DefaultValue::U64(_) => RepeatedKind::U64,
            DefaultValue::F32(_) => RepeatedKind::F32,
            DefaultValue::F64(_) => RepeatedKind::F64,
            DefaultValue::Bytes(_) => RepeatedKind::Bytes,
            DefaultValue::Message | DefaultValue::Repeated(_) | DefaultValue::Map => {
                RepeatedKind::Message
            }
        }
    }
}

/// Declaration of a single field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    number: u32,
    ty: FieldType,
    repeated: bool,
    packed: Option<bool>,
    oneof: Option<u16>,
    validate_utf8: bool,
    default: Option<DefaultValue>,
}

impl FieldSpec {
    pub fn new(number: u32, ty: FieldType) -> Self {
        FieldSpec {
            number,
            validate_utf8: ty == FieldType::String,
            ty,
            repeated: false,
            packed: None,
            oneof: None,
            default: None,
        }
    }

    pub fn repeated(mut self) -> Self {
        self.repeated = true;
        self
    }

    /// Whether a repeated scalar is encoded packed. Defaults to packed.
    pub fn packed(mut self, packed: bool) -> Self {
        self.packed = Some(packed);
        self
    }

    /// Makes the field a member of oneof `idx`.
    pub fn oneof(mut self, idx: u16) -> Self {
        self.oneof = Some(idx);
        self
    }

    /// Whether `string` contents are checked for UTF-8. On by default.
    pub fn validate_utf8(mut self, validate: bool) -> Self {
        self.validate_utf8 = validate;
        self
    }

    pub fn default_value(mut self, value: DefaultValue) -> Self {
        self.default = Some(value);
        self
    }

    pub fn number(&self) -> u32 {
        self.number
    }
}

/// Declaration of a message type.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageSpec {
    name: String,
    fields: Vec<FieldSpec>,
}

impl MessageSpec {
    pub fn new(name: impl Into<String>) -> Self {
        MessageSpec {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    pub fn push_field(&mut self, field: FieldSpec) -> &mut Self {
        self.fields.push(field);
        self
    }
}

/// Builds a [`Schema`].
///
/// Messages are declared first to get a [`TableId`], which lets message
/// types refer to themselves and to each other, then defined.
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    names: Vec<String>,
    specs: Vec<Option<MessageSpec>>,
    error: Option<SchemaError>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves a table for a message named `name`.
    pub fn declare(&mut self, name: impl Into<String>) -> TableId {
        let id = next_id(self.specs.len());
        self.names.push(name.into());
        self.specs.push(None);
        id
    }

    /// Supplies the fields of a declared message.
    pub fn define(&mut self, id: TableId, spec: MessageSpec) -> &mut Self {
        match self.specs.get_mut(id.index()) {
            Some(slot) => *slot = Some(spec),
            None => {
                self.error.get_or_insert(SchemaError::UnknownTable { id: id.0 });
            }
        }
        self
    }

    /// Declares and defines a message in one step.
    pub fn add(&mut self, spec: MessageSpec) -> TableId {
        let id = self.declare(spec.name.clone());
        self.define(id, spec);
        id
    }

    pub fn build(self) -> Result<Schema, SchemaError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        let mut specs = self
            .specs
            .into_iter()
            .zip(self.names)
            .map(|(spec, name)| spec.ok_or(SchemaError::UndefinedMessage { message: name }))
            .collect::<Result<Vec<_>, _>>()?;

        // Map fields append their entry messages, which get compiled in turn.
        let mut tables = Vec::with_capacity(specs.len());
        let mut idx = 0;
        while idx < specs.len() {
            let spec = specs[idx].clone();
            tables.push(compile(&spec, &mut specs)?);
            idx += 1;
        }
        Ok(Schema::new(tables))
    }
}

fn next_id(len: usize) -> TableId {
    TableId(u32::try_from(len).unwrap_or(u32::MAX))
}

/// Compiles one message into its table.
fn compile(spec: &MessageSpec, specs: &mut Vec<MessageSpec>) -> Result<ParseTable, SchemaError> {
    let message = || spec.name.clone();

    let mut fields: Vec<&FieldSpec> = spec.fields.iter().collect();
    fields.sort_by_key(|field| field.number);
    for pair in fields.windows(2) {
        if pair[0].number == pair[1].number {
            return Err(SchemaError::DuplicateFieldNumber {
                message: message(),
                field: pair[0].number,
            });
        }
    }
    if fields.len() >= usize::from(u16::MAX) {
        return Err(SchemaError::TooManyFields { message: message() });
    }

    let mut compiled = Vec::with_capacity(fields.len());
    let mut defaults = Vec::with_capacity(fields.len());
    let mut aux = Vec::new();
    let mut has_bits: u16 = 0;
    let mut oneof_count: u16 = 0;

    for (slot, field) in fields.iter().enumerate() {
        let number = field.number;
        if !(MINIMUM_FIELD_NUMBER..=MAXIMUM_FIELD_NUMBER).contains(&number) {
            return Err(SchemaError::FieldNumberOutOfRange {
                message: message(),
                field: number,
            });
        }
        validate(spec, field, specs.len())?;

        let is_map = matches!(field.ty, FieldType::Map { .. });
        let repeated = field.repeated || is_map;
        let packed = repeated && field.ty.is_scalar() && field.packed.unwrap_or(true);

        let mut flags = field.ty.base_flags();
        if field.validate_utf8 && field.ty == FieldType::String {
            flags |= FieldFlags::UTF8;
        }
        let kind = match field.ty.base_kind() {
            FieldKind::Varint if packed => FieldKind::PackedVarint,
            FieldKind::Fixed32 | FieldKind::Fixed64 if packed => FieldKind::PackedFixed,
            kind => kind,
        };

        let mut has_idx = FieldEntry::NO_HAS_BIT;
        if repeated {
            flags |= FieldFlags::REPEATED;
        } else if let Some(oneof) = field.oneof {
            flags |= FieldFlags::ONEOF;
            has_idx = oneof;
            oneof_count = oneof_count.max(oneof.saturating_add(1));
        } else {
            has_idx = has_bits;
            if has_bits >= 32 {
                flags |= FieldFlags::EXCESS_HAS_BIT;
            }
            has_bits += 1;
        }

        let child = match &field.ty {
            FieldType::Map { key, value } => {
                let entry = MessageSpec::new(format!("{}.Field{}Entry", spec.name, number))
                    .field(FieldSpec::new(1, (**key).clone()))
                    .field(FieldSpec::new(2, (**value).clone()));
                let id = next_id(specs.len());
                specs.push(entry);
                Some(id)
            }
            other => other.child(),
        };
        let aux_idx = match child {
            Some(table) => {
                aux.push(AuxEntry { table });
                u16::try_from(aux.len() - 1)
                    .map_err(|_| SchemaError::TooManyFields { message: message() })?
            }
            None => FieldEntry::NO_AUX,
        };

        let wire_type = match kind {
            FieldKind::Varint => WireType::Varint,
            FieldKind::Fixed32 => WireType::I32,
            FieldKind::Fixed64 => WireType::I64,
            FieldKind::Group => WireType::SGroup,
            _ => WireType::Len,
        };
        let expected_tag = Tag::new(number, wire_type)
            .map(Tag::raw)
            .ok_or_else(|| SchemaError::FieldNumberOutOfRange {
                message: message(),
                field: number,
            })?;

        compiled.push(FieldEntry {
            expected_tag,
            slot: u16::try_from(slot)
                .map_err(|_| SchemaError::TooManyFields { message: message() })?,
            has_idx,
            aux_idx,
            flags,
            kind,
        });

        defaults.push(if repeated && !is_map {
            DefaultValue::Repeated(field.ty.repeated_kind())
        } else {
            field.default.clone().unwrap_or_else(|| field.ty.default_value())
        });
    }

    let numbers: Vec<u32> = compiled.iter().map(FieldEntry::field_number).collect();
    let (start_field_num, entry_cutoff) = dense_window(&numbers);
    let dense_len = usize::cast_from(entry_cutoff);

    let mut entries = vec![FieldEntry::SKIP; dense_len];
    let mut sparse_numbers = Vec::new();
    for entry in &compiled {
        let offset = entry.field_number().wrapping_sub(start_field_num);
        if offset < entry_cutoff {
            entries[usize::cast_from(offset)] = *entry;
        } else {
            sparse_numbers.push(entry.field_number());
            entries.push(*entry);
        }
    }
    let skip_map = skipmap::build(&sparse_numbers, dense_len)
        .ok_or_else(|| SchemaError::TooManyFields { message: message() })?;

    Ok(ParseTable {
        name: spec.name.clone(),
        default_instance: DefaultInstance::new(defaults),
        aux,
        has_bit_words: has_bits.div_ceil(32),
        oneof_count,
        start_field_num,
        entry_cutoff,
        entries,
        skip_map,
    })
}

/// Picks the dense window: the longest prefix of the sorted field numbers
/// that is at least half populated.
fn dense_window(numbers: &[u32]) -> (u32, u32) {
    let Some(&start) = numbers.first() else {
        return (MINIMUM_FIELD_NUMBER, 0);
    };
    let mut cutoff = 0;
    for (idx, number) in numbers.iter().enumerate() {
        let span = u64::from(number - start) + 1;
        let count = u64::try_from(idx + 1).unwrap_or(u64::MAX);
        if span <= 2 * count {
            cutoff = number - start + 1;
        }
    }
    (start, cutoff)
}

fn validate(spec: &MessageSpec, field: &FieldSpec, table_count: usize) -> Result<(), SchemaError> {
    let message = || spec.name.clone();
    let number = field.number;

    if let Some(child) = field.ty.child() {
        if child.index() >= table_count {
            return Err(SchemaError::UnknownTable { id: child.0 });
        }
    }

    let is_map = matches!(field.ty, FieldType::Map { .. });
    if field.packed == Some(true) && !(field.repeated && field.ty.is_scalar()) {
        return Err(SchemaError::InvalidPacked {
            message: message(),
            field: number,
        });
    }

    if let FieldType::Map { key, value } = &field.ty {
        let nested_map = matches!(**value, FieldType::Map { .. });
        let bad_value = value.child().is_some_and(|id| id.index() >= table_count);
        if !key.is_map_key() || nested_map || bad_value || field.repeated {
            return Err(SchemaError::InvalidMapKey {
                message: message(),
                field: number,
            });
        }
    }

    if field.oneof.is_some() && (field.repeated || is_map) {
        return Err(SchemaError::InvalidOneof {
            message: message(),
            field: number,
        });
    }

    if let Some(default) = &field.default {
        let kind_ok = default.same_kind(&field.ty.default_value());
        let has_storage = matches!(default, DefaultValue::Message | DefaultValue::Map);
        if field.repeated || is_map || !kind_ok || has_storage {
            return Err(SchemaError::DefaultTypeMismatch {
                message: message(),
                field: number,
            });
        }
    }
    Ok(())
}
