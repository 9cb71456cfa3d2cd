#![deny(clippy::as_conversions)]

//! A table-driven decoder for the protobuf wire format.
//!
//! Message types are described once with a [`SchemaBuilder`], which compiles
//! each of them into a [`ParseTable`]. The parser walks the input with a
//! single loop per nesting level, resolving every tag against the table and
//! storing the payload into a [`DynamicMessage`]. Strings and child messages
//! can be placed in an [`Arena`].
//!
//! ```
//! use prototab::{DynamicMessage, FieldSpec, FieldType, MessageSpec, SchemaBuilder};
//!
//! let mut builder = SchemaBuilder::new();
//! let id = builder.add(
//!     MessageSpec::new("Point")
//!         .field(FieldSpec::new(1, FieldType::SInt32))
//!         .field(FieldSpec::new(2, FieldType::SInt32)),
//! );
//! let schema = builder.build().unwrap();
//!
//! let point = DynamicMessage::decode(&schema, id, &[0x08, 0x03, 0x10, 0x04], None).unwrap();
//! assert_eq!(point.get_i32(1), Some(-2));
//! assert_eq!(point.get_i32(2), Some(2));
//! ```

mod util;

pub mod arena;
pub mod error;
// Publically export `leb128` because the functions are useful on their own.
pub mod leb128;
pub mod message;
pub mod options;
pub mod parse;
pub mod string;
pub mod table;
pub mod wire;

pub use arena::Arena;
pub use error::{DecodeError, DecodeErrorKind, SchemaError};
pub use message::{DefaultValue, DynamicMessage, MapKey, RepeatedField, Value};
pub use options::ParseOptions;
pub use parse::{parse, parse_with_options};
pub use string::{StringState, TaggedString};
pub use table::{FieldSpec, FieldType, MessageSpec, ParseTable, Schema, SchemaBuilder, TableId};
