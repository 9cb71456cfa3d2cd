//! Integration tests for the parse loop against hand-built inputs.

mod common;

use common::Writer;
use proptest::prelude::*;
use proptest::property_test;
use prototab::{
    parse, parse_with_options, Arena, DecodeErrorKind, DynamicMessage, FieldSpec, FieldType,
    MapKey, MessageSpec, ParseOptions, RepeatedField, Schema, SchemaBuilder, StringState,
    TableId, Value,
};

/// `Outer { 1: Inner, 2: int32, 3: group Inner }`, `Inner { 1: int32, 2: string }`.
fn nested_schema() -> (Schema, TableId) {
    let mut builder = SchemaBuilder::new();
    let inner = builder.add(
        MessageSpec::new("Inner")
            .field(FieldSpec::new(1, FieldType::Int32))
            .field(FieldSpec::new(2, FieldType::String)),
    );
    let outer = builder.add(
        MessageSpec::new("Outer")
            .field(FieldSpec::new(1, FieldType::Message(inner)))
            .field(FieldSpec::new(2, FieldType::Int32))
            .field(FieldSpec::new(3, FieldType::Group(inner))),
    );
    (builder.build().unwrap(), outer)
}

/// `Node { 1: Node, 2: int32 }`.
fn recursive_schema() -> (Schema, TableId) {
    let mut builder = SchemaBuilder::new();
    let node = builder.declare("Node");
    builder.define(
        node,
        MessageSpec::new("Node")
            .field(FieldSpec::new(1, FieldType::Message(node)))
            .field(FieldSpec::new(2, FieldType::Int32)),
    );
    (builder.build().unwrap(), node)
}

fn nested_nodes(depth: usize) -> Vec<u8> {
    let mut inner = Writer::new();
    inner.varint(2, 1);
    for _ in 0..depth {
        let mut outer = Writer::new();
        outer.message(1, &inner);
        inner = outer;
    }
    inner.finish()
}

fn error_kind(schema: &Schema, id: TableId, buf: &[u8]) -> DecodeErrorKind {
    let mut msg = DynamicMessage::new(schema, id);
    parse(&mut msg, buf).unwrap_err().kind()
}

#[test]
fn test_nested_message() {
    let (schema, id) = nested_schema();
    let mut inner = Writer::new();
    inner.varint(1, 150).bytes(2, b"testing");
    let buf = Writer::new().message(1, &inner).varint(2, 9).finish();

    let msg = DynamicMessage::decode(&schema, id, &buf, None).unwrap();
    let child = msg.get_message(1).unwrap();
    assert_eq!(child.get_i32(1), Some(150));
    assert_eq!(child.get_str(2), Some("testing"));
    assert!(child.has(1) && child.has(2));
    assert_eq!(msg.get_i32(2), Some(9));
    assert!(msg.has(1));
    assert!(!msg.has(3));
}

#[test]
fn test_nested_length_too_short() {
    let (schema, id) = nested_schema();
    // The child claims one byte, but its varint needs two.
    let buf = [0x0A, 0x02, 0x08, 0x96, 0x01];
    assert_eq!(error_kind(&schema, id, &buf), DecodeErrorKind::UnexpectedEndOfBuffer);

    // Only the tag fits in the child.
    let buf = [0x0A, 0x01, 0x08, 0x01];
    assert_eq!(error_kind(&schema, id, &buf), DecodeErrorKind::UnexpectedEndOfBuffer);
}

#[test]
fn test_nested_length_too_long() {
    let (schema, id) = nested_schema();
    let buf = [0x0A, 0x05, 0x08, 0x01];
    assert_eq!(error_kind(&schema, id, &buf), DecodeErrorKind::UnexpectedEndOfBuffer);
}

#[test]
fn test_group() {
    let (schema, id) = nested_schema();
    let buf = Writer::new()
        .start_group(3)
        .varint(1, 5)
        .end_group(3)
        .varint(2, 1)
        .finish();

    let msg = DynamicMessage::decode(&schema, id, &buf, None).unwrap();
    assert_eq!(msg.get_message(3).unwrap().get_i32(1), Some(5));
    assert_eq!(msg.get_i32(2), Some(1));
    assert!(msg.has(3));
}

#[test]
fn test_group_mismatched_end() {
    let (schema, id) = nested_schema();
    let buf = Writer::new().start_group(3).varint(1, 5).end_group(4).finish();
    assert_eq!(
        error_kind(&schema, id, &buf),
        DecodeErrorKind::UnmatchedGroupEnd {
            expected: Some(3),
            found: 4
        }
    );
}

#[test]
fn test_group_unterminated() {
    let (schema, id) = nested_schema();
    let buf = Writer::new().start_group(3).varint(1, 5).finish();
    assert_eq!(error_kind(&schema, id, &buf), DecodeErrorKind::UnexpectedEndOfBuffer);
}

#[test]
fn test_end_group_inside_length_delimited() {
    let (schema, id) = nested_schema();
    let mut inner = Writer::new();
    inner.varint(1, 5).end_group(1);
    let buf = Writer::new().message(1, &inner).finish();
    assert_eq!(
        error_kind(&schema, id, &buf),
        DecodeErrorKind::UnmatchedGroupEnd {
            expected: None,
            found: 1
        }
    );
}

#[test]
fn test_unknown_group_skipped() {
    let (schema, id) = nested_schema();
    let mut unknown = Writer::new();
    unknown
        .start_group(9)
        .varint(1, 1)
        .start_group(10)
        .bytes(2, b"x")
        .end_group(10)
        .end_group(9);
    let buf = Writer::new().raw(unknown.as_bytes()).varint(2, 3).finish();

    let msg = DynamicMessage::decode(&schema, id, &buf, None).unwrap();
    assert_eq!(msg.get_i32(2), Some(3));
    assert_eq!(msg.unknown_fields(), unknown.as_bytes());
}

#[test]
fn test_sparse_field_lookup() {
    let mut builder = SchemaBuilder::new();
    let id = builder.add(
        MessageSpec::new("Sparse")
            .field(FieldSpec::new(1, FieldType::Int32))
            .field(FieldSpec::new(2, FieldType::Int32))
            .field(FieldSpec::new(3, FieldType::Int32))
            .field(FieldSpec::new(4, FieldType::Int32))
            .field(FieldSpec::new(1000, FieldType::SInt64)),
    );
    let schema = builder.build().unwrap();

    let buf = Writer::new()
        .varint(4, 4)
        .sint(1000, -77)
        .varint(999, 12)
        .finish();
    let msg = DynamicMessage::decode(&schema, id, &buf, None).unwrap();
    assert_eq!(msg.get_i32(4), Some(4));
    assert_eq!(msg.get_i64(1000), Some(-77));
    assert!(msg.has(1000));
    assert!(msg.get(999).is_none());
    assert_eq!(msg.unknown_fields(), Writer::new().varint(999, 12).as_bytes());
}

#[test]
fn test_recursion_limit() {
    let (schema, id) = recursive_schema();
    let buf = nested_nodes(5);

    let mut options = ParseOptions::new();
    options.recursion_limit(5);
    let mut msg = DynamicMessage::new(&schema, id);
    parse_with_options(&mut msg, &buf, &options).unwrap();

    let mut node = &msg;
    for _ in 0..5 {
        node = node.get_message(1).unwrap();
    }
    assert_eq!(node.get_i32(2), Some(1));

    options.recursion_limit(4);
    let mut msg = DynamicMessage::new(&schema, id);
    let err = parse_with_options(&mut msg, &buf, &options).unwrap_err();
    assert_eq!(
        err.kind(),
        DecodeErrorKind::RecursionLimitExceeded { limit: 4 }
    );
}

#[test]
fn test_adversarial_nesting() {
    let (schema, id) = recursive_schema();
    let buf = nested_nodes(1_000);
    assert_eq!(
        error_kind(&schema, id, &buf),
        DecodeErrorKind::RecursionLimitExceeded {
            limit: ParseOptions::DEFAULT_RECURSION_LIMIT
        }
    );

    // Unknown groups are bounded by the same limit.
    let mut buf = Writer::new();
    for _ in 0..1_000 {
        buf.start_group(9);
    }
    assert_eq!(
        error_kind(&schema, id, buf.as_bytes()),
        DecodeErrorKind::RecursionLimitExceeded {
            limit: ParseOptions::DEFAULT_RECURSION_LIMIT
        }
    );
}

#[test]
fn test_oneof() {
    let mut builder = SchemaBuilder::new();
    let inner = builder.add(MessageSpec::new("Inner").field(FieldSpec::new(1, FieldType::Int32)));
    let id = builder.add(
        MessageSpec::new("Choice")
            .field(FieldSpec::new(1, FieldType::Int32).oneof(0))
            .field(FieldSpec::new(2, FieldType::String).oneof(0))
            .field(FieldSpec::new(3, FieldType::Message(inner)).oneof(0))
            .field(FieldSpec::new(4, FieldType::Bool)),
    );
    let schema = builder.build().unwrap();

    let buf = Writer::new().varint(1, 10).bytes(2, b"last").finish();
    let msg = DynamicMessage::decode(&schema, id, &buf, None).unwrap();
    assert_eq!(msg.which_oneof(0), Some(2));
    assert!(!msg.has(1));
    assert_eq!(msg.get_i32(1), Some(0));
    assert_eq!(msg.get_str(2), Some("last"));

    let mut child = Writer::new();
    child.varint(1, 1);
    let buf = Writer::new().bytes(2, b"first").message(3, &child).finish();
    let msg = DynamicMessage::decode(&schema, id, &buf, None).unwrap();
    assert_eq!(msg.which_oneof(0), Some(3));
    assert_eq!(msg.get_str(2), Some(""));
    assert_eq!(msg.get_message(3).unwrap().get_i32(1), Some(1));
    assert!(!msg.has(4));
}

#[test]
fn test_excess_has_bits() {
    let mut spec = MessageSpec::new("Wide");
    for number in 1..=40 {
        spec.push_field(FieldSpec::new(number, FieldType::UInt32));
    }
    let mut builder = SchemaBuilder::new();
    let id = builder.add(spec);
    let schema = builder.build().unwrap();

    let buf = Writer::new()
        .varint(35, 350)
        .varint(1, 10)
        .varint(40, 0)
        .finish();
    let msg = DynamicMessage::decode(&schema, id, &buf, None).unwrap();
    for number in 1..=40 {
        assert_eq!(msg.has(number), [1, 35, 40].contains(&number), "field {number}");
    }
    assert_eq!(msg.get_u32(35), Some(350));
}

#[test]
fn test_unknown_fields_preserved_in_order() {
    let (schema, id) = nested_schema();
    let mut unknown = Writer::new();
    unknown.bytes(7, b"extra").fixed64(8, 42).fixed32(5000, 7);

    let buf = Writer::new()
        .bytes(7, b"extra")
        .varint(2, 1)
        .fixed64(8, 42)
        .fixed32(5000, 7)
        .finish();
    let msg = DynamicMessage::decode(&schema, id, &buf, None).unwrap();
    assert_eq!(msg.get_i32(2), Some(1));
    assert_eq!(msg.unknown_fields(), unknown.as_bytes());
}

#[test]
fn test_merge_semantics() {
    let mut builder = SchemaBuilder::new();
    let inner = builder.add(
        MessageSpec::new("Inner")
            .field(FieldSpec::new(1, FieldType::Int32))
            .field(FieldSpec::new(2, FieldType::Int32)),
    );
    let id = builder.add(
        MessageSpec::new("Merge")
            .field(FieldSpec::new(1, FieldType::Int64))
            .field(FieldSpec::new(2, FieldType::Message(inner)))
            .field(FieldSpec::new(3, FieldType::UInt64).repeated()),
    );
    let schema = builder.build().unwrap();

    let mut first = Writer::new();
    first.varint(1, 1);
    let mut second = Writer::new();
    second.varint(2, 2);

    let mut msg = DynamicMessage::new(&schema, id);
    let buf = Writer::new().varint(1, 5).message(2, &first).varint(3, 1).finish();
    msg.merge_from(&buf).unwrap();
    let buf = Writer::new().varint(1, 6).message(2, &second).varint(3, 2).finish();
    msg.merge_from(&buf).unwrap();

    assert_eq!(msg.get_i64(1), Some(6));
    let child = msg.get_message(2).unwrap();
    assert_eq!((child.get_i32(1), child.get_i32(2)), (Some(1), Some(2)));
    assert_eq!(msg.repeated(3), Some(&RepeatedField::U64(vec![1, 2])));
}

#[test]
fn test_map_fields() {
    let mut builder = SchemaBuilder::new();
    let inner = builder.add(MessageSpec::new("Inner").field(FieldSpec::new(1, FieldType::Int32)));
    let id = builder.add(
        MessageSpec::new("Maps")
            .field(FieldSpec::new(
                1,
                FieldType::Map {
                    key: Box::new(FieldType::String),
                    value: Box::new(FieldType::Int32),
                },
            ))
            .field(FieldSpec::new(
                2,
                FieldType::Map {
                    key: Box::new(FieldType::SInt64),
                    value: Box::new(FieldType::Message(inner)),
                },
            )),
    );
    let schema = builder.build().unwrap();

    let entry = |key: &[u8], value: u64| {
        let mut entry = Writer::new();
        entry.bytes(1, key).varint(2, value);
        entry
    };
    let mut value = Writer::new();
    value.varint(1, 99);
    let mut message_entry = Writer::new();
    message_entry.sint(1, -3).message(2, &value);
    // An entry with only a key maps to the default value.
    let mut key_only = Writer::new();
    key_only.bytes(1, b"c");

    let buf = Writer::new()
        .message(1, &entry(b"a", 1))
        .message(1, &entry(b"b", 2))
        .message(1, &entry(b"a", 3))
        .message(1, &key_only)
        .message(2, &message_entry)
        .finish();
    let msg = DynamicMessage::decode(&schema, id, &buf, None).unwrap();

    let map = msg.map(1).unwrap();
    assert_eq!(map.len(), 3);
    assert_eq!(map.get(MapKey::Str("a")), Some(&Value::I32(3)));
    assert_eq!(map.get(MapKey::Str("b")), Some(&Value::I32(2)));
    assert_eq!(map.get(MapKey::Str("c")), Some(&Value::I32(0)));
    assert!(msg.has(1));

    match msg.map(2).unwrap().get(MapKey::I64(-3)) {
        Some(Value::Message(Some(inner))) => assert_eq!(inner.get_i32(1), Some(99)),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_utf8_validation() {
    let mut builder = SchemaBuilder::new();
    let id = builder.add(
        MessageSpec::new("Text")
            .field(FieldSpec::new(1, FieldType::String))
            .field(FieldSpec::new(2, FieldType::Bytes))
            .field(FieldSpec::new(3, FieldType::String).validate_utf8(false))
            .field(FieldSpec::new(4, FieldType::String).repeated()),
    );
    let schema = builder.build().unwrap();

    let buf = Writer::new()
        .bytes(2, b"\xff\xfe")
        .bytes(3, b"\xff")
        .bytes(1, "ünïcødé".as_bytes())
        .finish();
    let msg = DynamicMessage::decode(&schema, id, &buf, None).unwrap();
    assert_eq!(msg.get_str(1), Some("ünïcødé"));
    assert_eq!(msg.get_bytes(2), Some(&b"\xff\xfe"[..]));
    assert_eq!(msg.get_bytes(3), Some(&b"\xff"[..]));

    let mut buf = Writer::new();
    for _ in 0..25 {
        buf.bytes(4, b"fine");
    }
    buf.bytes(4, b"\xc0");
    assert_eq!(
        error_kind(&schema, id, buf.as_bytes()),
        DecodeErrorKind::InvalidUtf8 { field: 4 }
    );

    // A batch of one reports the failure before later fields are read.
    let buf = Writer::new().bytes(1, b"\xc0").raw(&[0x08]).finish();
    let mut options = ParseOptions::new();
    options.utf8_batch_capacity(1);
    let mut msg = DynamicMessage::new(&schema, id);
    let err = parse_with_options(&mut msg, &buf, &options).unwrap_err();
    assert_eq!(err.kind(), DecodeErrorKind::InvalidUtf8 { field: 1 });
}

#[test]
fn test_arena_backed_parse() {
    let (schema, id) = nested_schema();
    let arena = Arena::new();
    let long = "x".repeat(40);

    let mut inner = Writer::new();
    inner.bytes(2, long.as_bytes());
    let buf = Writer::new().message(1, &inner).finish();

    let mut msg = DynamicMessage::new_in(&schema, id, &arena);
    msg.merge_from(&buf).unwrap();

    let child = msg.get_message(1).unwrap();
    assert!(core::ptr::eq(child.arena().unwrap(), &arena));
    match child.get(2) {
        Some(Value::Bytes(s)) => {
            assert_eq!(s.state(), StringState::ArenaMutable);
            assert_eq!(s.as_bytes(), long.as_bytes());
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(arena.allocated_bytes() > 0);

    let mut short = Writer::new();
    short.bytes(2, b"short");
    let buf = Writer::new().message(3, &short).finish();
    let mut group = Writer::new();
    group.start_group(3).bytes(2, b"short").end_group(3);
    let mut msg = DynamicMessage::new_in(&schema, id, &arena);
    msg.merge_from(group.as_bytes()).unwrap();
    match msg.get_message(3).unwrap().get(2) {
        Some(Value::Bytes(s)) => assert_eq!(s.state(), StringState::ArenaFixed),
        other => panic!("unexpected {other:?}"),
    }
    // Field 3 is a group, so the length-delimited form is unknown.
    let mut msg = DynamicMessage::new_in(&schema, id, &arena);
    msg.merge_from(&buf).unwrap();
    assert!(!msg.has(3));
    assert_eq!(msg.unknown_fields(), &buf[..]);
}

#[test]
fn test_heap_strings_without_arena() {
    let (schema, id) = nested_schema();
    let mut inner = Writer::new();
    inner.bytes(2, b"tiny");
    let buf = Writer::new().message(1, &inner).finish();

    let msg = DynamicMessage::decode(&schema, id, &buf, None).unwrap();
    match msg.get_message(1).unwrap().get(2) {
        Some(Value::Bytes(s)) => assert_eq!(s.state(), StringState::Heap),
        other => panic!("unexpected {other:?}"),
    }
}

fn kitchen_sink() -> (Schema, TableId) {
    let mut builder = SchemaBuilder::new();
    let node = builder.declare("Sink");
    builder.define(
        node,
        MessageSpec::new("Sink")
            .field(FieldSpec::new(1, FieldType::Int32))
            .field(FieldSpec::new(2, FieldType::Fixed64))
            .field(FieldSpec::new(3, FieldType::String))
            .field(FieldSpec::new(4, FieldType::Message(node)))
            .field(FieldSpec::new(5, FieldType::Group(node)))
            .field(FieldSpec::new(6, FieldType::SInt32).repeated())
            .field(FieldSpec::new(7, FieldType::Float).repeated())
            .field(FieldSpec::new(8, FieldType::Bytes).repeated())
            .field(FieldSpec::new(9, FieldType::Message(node)).repeated())
            .field(FieldSpec::new(
                10,
                FieldType::Map {
                    key: Box::new(FieldType::UInt32),
                    value: Box::new(FieldType::String),
                },
            ))
            .field(FieldSpec::new(11, FieldType::Int64).oneof(0))
            .field(FieldSpec::new(12, FieldType::Bytes).oneof(0)),
    );
    (builder.build().unwrap(), node)
}

#[property_test]
fn proptest_arbitrary_input_never_panics(buf: Vec<u8>) {
    let (schema, id) = kitchen_sink();
    let mut msg = DynamicMessage::new(&schema, id);
    let _ = parse(&mut msg, &buf);

    let arena = Arena::new();
    let mut msg = DynamicMessage::new_in(&schema, id, &arena);
    let _ = parse(&mut msg, &buf);
}

#[property_test]
fn proptest_truncation_is_an_error(values: Vec<u32>, cut: usize) {
    let (schema, id) = kitchen_sink();
    let mut writer = Writer::new();
    for value in &values {
        writer.varint(1, u64::from(*value)).bytes(3, b"abc");
    }
    let buf = writer.finish();
    prop_assume!(!buf.is_empty());
    let cut = cut % buf.len();

    let mut msg = DynamicMessage::new(&schema, id);
    let result = parse(&mut msg, &buf[..cut]);
    // Every field is at least two bytes, so a cut lands on a field boundary
    // only after an even split; anything else must fail.
    let mut boundaries = vec![0usize];
    for value in &values {
        let len = Writer::new().varint(1, u64::from(*value)).bytes(3, b"abc").len();
        let last = *boundaries.last().unwrap();
        let varint_end = last + Writer::new().varint(1, u64::from(*value)).len();
        boundaries.push(varint_end);
        boundaries.push(last + len);
    }
    prop_assert_eq!(result.is_ok(), boundaries.contains(&cut));
}
