//! Data types for representing a message schema, and the macro for
//! constructing them with syntactic sugar.
//!
//! A schema is consumed as an already-resolved tree. Field order is the only
//! thing layout cares about: tags are carried along for whoever produced the
//! schema, but never influence where bytes go.

use serde::{Serialize, Deserialize};
use std::fmt::Write;


/// Description of a message type: its name and its fields, in declaration
/// order.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct MessageSchema {
    pub name: String,
    pub fields: Vec<FieldSchema>,
}

/// Item in `MessageSchema::fields`, and in `FieldKind::Oneof`.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    /// Field number as declared by the schema front-end. Irrelevant to
    /// layout.
    pub tag: u32,
    pub kind: FieldKind,
}

/// What kind of data a field holds, and thereby how it is laid out.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    /// Some fixed-width scalar, stored directly in the fixed region.
    Scalar(ScalarType),
    /// Utf8 string, stored in a variable segment.
    Str,
    /// Byte string, stored in a variable segment.
    Bytes,
    /// Nested message. Its fixed region is inlined into the parent's.
    Message(MessageSchema),
    /// Repeated field. Elements are stored in a variable segment.
    List(Box<FieldKind>),
    /// Map field, as (key kind, value kind). Entries are stored in a variable
    /// segment.
    Map(Box<FieldKind>, Box<FieldKind>),
    /// Tagged union of variants, of which at most one is set.
    Oneof(Vec<FieldSchema>),
    /// Recurse type. This allows schema to be self-referential.
    ///
    /// Represents a reference to the message n message-levels above this
    /// field in the schema tree, with `Recurse(1)` being the message the field
    /// belongs to. So for eg, a tree could be represented as:
    ///
    /// ```
    /// use zeropb::schema;
    ///
    /// schema!(message Node {
    ///     (label: str),
    ///     (children: list(recurse(1))),
    /// });
    /// ```
    ///
    /// `Recurse(0)` is illegal. A message which inlines itself through a
    /// chain of non-repeated `Message`/`Recurse` fields is a schema cycle.
    Recurse(usize),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum ScalarType {
    /// Encoded as 4 bytes, 0 or 1.
    Bool,
    /// Encoded little-endian, 4 bytes.
    I32,
    /// Encoded little-endian, 4 bytes.
    U32,
    /// Enum number, encoded like an `I32`.
    Enum,
    /// Encoded little-endian, 4 bytes.
    F32,
    /// Encoded little-endian, 8 bytes.
    I64,
    /// Encoded little-endian, 8 bytes.
    U64,
    /// Encoded little-endian, 8 bytes.
    F64,
}

impl ScalarType {
    /// Number of bytes the scalar occupies in its slot.
    pub const fn size(self) -> u32 {
        match self {
            ScalarType::Bool
            | ScalarType::I32
            | ScalarType::U32
            | ScalarType::Enum
            | ScalarType::F32 => 4,
            ScalarType::I64
            | ScalarType::U64
            | ScalarType::F64 => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, ScalarType::F32 | ScalarType::F64)
    }

    pub(crate) fn display_str(self) -> &'static str {
        match self {
            ScalarType::Bool => "bool",
            ScalarType::I32 => "i32",
            ScalarType::U32 => "u32",
            ScalarType::Enum => "enum",
            ScalarType::F32 => "f32",
            ScalarType::I64 => "i64",
            ScalarType::U64 => "u64",
            ScalarType::F64 => "f64",
        }
    }
}

impl MessageSchema {
    pub fn new<S: Into<String>>(name: S, fields: Vec<FieldSchema>) -> Self {
        MessageSchema {
            name: name.into(),
            fields,
        }
    }

    /// Construct with tags assigned by position, starting at 1.
    pub fn positional<S, F>(name: S, fields: Vec<(F, FieldKind)>) -> Self
    where
        S: Into<String>,
        F: Into<String>,
    {
        let fields = fields
            .into_iter()
            .enumerate()
            .map(|(i, (name, kind))| FieldSchema::new(name, i as u32 + 1, kind))
            .collect();
        MessageSchema::new(name, fields)
    }

    pub fn pretty_fmt(&self) -> String {
        let mut lines = Vec::new();
        let root = ParentNode { name: &self.name, next: None };
        let mut line = String::new();
        write!(&mut line, "- message {}", self.name).unwrap();
        lines.push(line);
        fields_pretty_fmt(&self.fields, &mut lines, 0, &root);
        lines.join("\n")
    }
}

impl FieldSchema {
    pub fn new<S: Into<String>>(name: S, tag: u32, kind: FieldKind) -> Self {
        FieldSchema {
            name: name.into(),
            tag,
            kind,
        }
    }
}

impl FieldKind {
    pub(crate) fn display_str(&self) -> &'static str {
        match self {
            &FieldKind::Scalar(st) => st.display_str(),
            &FieldKind::Str => "str",
            &FieldKind::Bytes => "bytes",
            &FieldKind::Message(_) => "message {..}",
            &FieldKind::List(_) => "list(..)",
            &FieldKind::Map(_, _) => "map(..)(..)",
            &FieldKind::Oneof(_) => "oneof {..}",
            &FieldKind::Recurse(_) => "recurse(_)",
        }
    }
}

struct ParentNode<'a> {
    name: &'a str,
    next: Option<&'a ParentNode<'a>>,
}

fn indent_line(indent: u32) -> String {
    let mut line = String::new();
    for _ in 0..indent {
        line.push_str("    ");
    }
    line
}

fn fields_pretty_fmt(
    fields: &[FieldSchema],
    lines: &mut Vec<String>,
    indent: u32,
    parents: &ParentNode,
) {
    for (i, field) in fields.iter().enumerate() {
        let mut line = indent_line(indent);
        write!(
            &mut line,
            "  field {} (name = {:?}, tag = {}):",
            i, field.name, field.tag,
        ).unwrap();
        lines.push(line);
        kind_pretty_fmt(&field.kind, lines, indent + 1, parents);
    }
}

fn kind_pretty_fmt(
    kind: &FieldKind,
    lines: &mut Vec<String>,
    indent: u32,
    parents: &ParentNode,
) {
    let mut line = indent_line(indent);
    line.push_str("- ");
    match kind {
        &FieldKind::Scalar(st) => {
            line.push_str(st.display_str());
            lines.push(line);
        }
        &FieldKind::Str => {
            line.push_str("str");
            lines.push(line);
        }
        &FieldKind::Bytes => {
            line.push_str("bytes");
            lines.push(line);
        }
        &FieldKind::Message(ref inner) => {
            write!(&mut line, "message {}", inner.name).unwrap();
            lines.push(line);
            let child = ParentNode { name: &inner.name, next: Some(parents) };
            fields_pretty_fmt(&inner.fields, lines, indent, &child);
        }
        &FieldKind::List(ref elem) => {
            line.push_str("list:");
            lines.push(line);
            kind_pretty_fmt(elem, lines, indent + 1, parents);
        }
        &FieldKind::Map(ref key, ref value) => {
            line.push_str("map:");
            lines.push(line);
            let mut line = indent_line(indent);
            line.push_str("  key:");
            lines.push(line);
            kind_pretty_fmt(key, lines, indent + 1, parents);
            let mut line = indent_line(indent);
            line.push_str("  value:");
            lines.push(line);
            kind_pretty_fmt(value, lines, indent + 1, parents);
        }
        &FieldKind::Oneof(ref variants) => {
            line.push_str("oneof");
            lines.push(line);
            for (i, variant) in variants.iter().enumerate() {
                let mut line = indent_line(indent);
                write!(
                    &mut line,
                    "  variant {} (name = {:?}, tag = {}):",
                    i, variant.name, variant.tag,
                ).unwrap();
                lines.push(line);
                kind_pretty_fmt(&variant.kind, lines, indent + 1, parents);
            }
        }
        &FieldKind::Recurse(level) => {
            write!(&mut line, "recurse (level = {})", level).unwrap();
            let mut curr = if level == 0 { None } else { Some(parents) };
            for _ in 1..level {
                curr = curr.and_then(|node| node.next);
            }
            match curr {
                Some(node) => write!(&mut line, " --> {}", node.name).unwrap(),
                None => line.push_str(" --> [beyond root]"),
            }
            lines.push(line);
        }
    }
}


#[macro_export]
macro_rules! schema {
    (@kind bool)=>{ $crate::FieldKind::Scalar($crate::ScalarType::Bool) };
    (@kind i32)=>{ $crate::FieldKind::Scalar($crate::ScalarType::I32) };
    (@kind u32)=>{ $crate::FieldKind::Scalar($crate::ScalarType::U32) };
    (@kind enum)=>{ $crate::FieldKind::Scalar($crate::ScalarType::Enum) };
    (@kind f32)=>{ $crate::FieldKind::Scalar($crate::ScalarType::F32) };
    (@kind i64)=>{ $crate::FieldKind::Scalar($crate::ScalarType::I64) };
    (@kind u64)=>{ $crate::FieldKind::Scalar($crate::ScalarType::U64) };
    (@kind f64)=>{ $crate::FieldKind::Scalar($crate::ScalarType::F64) };
    (@kind str)=>{ $crate::FieldKind::Str };
    (@kind bytes)=>{ $crate::FieldKind::Bytes };
    (@kind message $($inner:tt)*)=>{ $crate::FieldKind::Message($crate::schema!(message $($inner)*)) };
    (@kind list($($elem:tt)*))=>{ $crate::FieldKind::List(::std::boxed::Box::new($crate::schema!(@kind $($elem)*))) };
    (@kind map($($key:tt)*)($($value:tt)*))=>{ $crate::FieldKind::Map(::std::boxed::Box::new($crate::schema!(@kind $($key)*)), ::std::boxed::Box::new($crate::schema!(@kind $($value)*))) };
    (@kind oneof { $(($name:ident: $($variant:tt)*)),*$(,)? })=>{ $crate::FieldKind::Oneof($crate::MessageSchema::positional("", ::std::vec![$( (::core::stringify!($name), $crate::schema!(@kind $($variant)*)), )*]).fields) };
    (@kind recurse($n:expr))=>{ $crate::FieldKind::Recurse($n) };
    (@kind %$kind:expr)=>{ $kind };
    (message $name:ident { $(($field:ident: $($kind:tt)*)),*$(,)? })=>{ $crate::MessageSchema::positional(::core::stringify!($name), ::std::vec![$( (::core::stringify!($field), $crate::schema!(@kind $($kind)*)), )*]) };
}
