//! Zero-copy, fixed-offset message encoding for protobuf-style schemas.
//!
//! Rather than tag-length-value encoding, every message has a _fixed region_
//! whose size and field offsets are computed once from its schema, so that
//! reading a field is a bounds check and a load at a known offset. Data of
//! variable length (strings, bytes, lists, maps) lives in _segments_ placed
//! after the fixed region by a bump allocator, and is located from its field's
//! slot by a 4-byte reference header: a 16-bit offset relative to the header
//! itself, and a 16-bit count. A whole message is therefore limited to
//! `MAX_MESSAGE_LEN` bytes.
//!
//! Typical usage pattern, dynamically:
//!
//! 1. build or deserialize a `MessageSchema` (see the `schema!` macro)
//! 2. plan it into a `Layout` with `Layout::plan`, which rejects cyclic and
//!    otherwise illegal schemas
//! 3. `marshal` a `MessageValue` into a buffer, or `unmarshal` one out of it
//!
//! Or, statically, `#[derive(Message)]` on a struct and use the methods of
//! the `Message` trait. The two paths produce identical bytes.
//!
//! The wire format:
//!
//! - all integers little-endian
//! - `bool`, `i32`, `u32`, enum and `f32` take 4 bytes, `i64`, `u64` and
//!   `f64` take 8
//! - str, bytes, list and map slots hold a reference header; an empty value
//!   has the header `(0, 0)` and no segment
//! - a nested message is inlined into its parent's fixed region
//! - a list segment starts with a 4-byte header holding the element count,
//!   followed by the elements' slots back-to-back
//! - a map segment is its entries back-to-back, each a key slot followed by a
//!   value slot
//! - segments follow the root fixed region in depth-first field order and
//!   never overlap; a buffer whose headers break this is rejected
//! - a oneof is a 4-byte discriminant (0 for unset, otherwise 1 + variant
//!   index) followed by room for its largest variant

pub mod error;
pub mod schema;
pub mod layout;
pub mod buffer;
pub mod value;
pub mod options;
pub mod marshal;
pub mod unmarshal;
pub mod message;

pub use crate::{
    error::{
        Error,
        ErrorKind,
        Result,
    },
    schema::{
        MessageSchema,
        FieldSchema,
        FieldKind,
        ScalarType,
    },
    layout::{
        Layout,
        MessageLayout,
        FieldLayout,
        MessageId,
        Shape,
        Variant,
        struct_size,
    },
    buffer::{
        Buffer,
        Reader,
        Allocation,
        reserve,
        MAX_MESSAGE_LEN,
    },
    value::{
        Value,
        MessageValue,
        ScalarValue,
        MapKey,
        OneofValue,
    },
    options::{
        MarshalOptions,
        MapOrder,
        UnmarshalOptions,
    },
    marshal::{
        marshal,
        marshal_with,
        marshal_to_vec,
        encoded_len,
    },
    unmarshal::{
        unmarshal,
        unmarshal_with,
    },
    message::{
        Slot,
        MapKeySlot,
        Message,
        RecurseStack,
        Bytes,
    },
};
pub use zeropb_derive::Message;
