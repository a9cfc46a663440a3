//! Dynamic representation of a message conforming to some schema, analogous
//! to `serde_json::Value`.

use crate::{
    layout::{
        Layout,
        MessageId,
        Shape,
    },
    schema::ScalarType,
};
use std::collections::HashMap;


/// A message's field values, in declaration order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MessageValue {
    pub fields: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(ScalarValue),
    Str(String),
    Bytes(Vec<u8>),
    Message(MessageValue),
    List(Vec<Value>),
    /// Iteration order, and thereby the order entries are marshaled in, is
    /// unspecified.
    Map(HashMap<MapKey, Value>),
    /// `None` if no variant is set.
    Oneof(Option<OneofValue>),
}

#[derive(Debug, Copy, Clone, PartialEq, PartialOrd)]
pub enum ScalarValue {
    Bool(bool),
    I32(i32),
    U32(u32),
    Enum(i32),
    F32(f32),
    I64(i64),
    U64(u64),
    F64(f64),
}

/// A value which may be used as a map key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MapKey {
    Bool(bool),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    Str(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OneofValue {
    /// Index of the set variant within the oneof's variants.
    pub variant: usize,
    pub value: Box<Value>,
}


impl MessageValue {
    pub fn new(fields: Vec<Value>) -> Self {
        MessageValue { fields }
    }

    /// The zero value of a message: every field at its kind-appropriate
    /// zero, which marshals to exactly the message's fixed size.
    pub fn zero(layout: &Layout, id: MessageId) -> Self {
        let fields = layout
            .message(id)
            .fields()
            .iter()
            .map(|field| Value::zero(layout, &field.shape))
            .collect();
        MessageValue { fields }
    }
}

impl Value {
    pub fn zero(layout: &Layout, shape: &Shape) -> Self {
        match shape {
            &Shape::Scalar(st) => Value::Scalar(ScalarValue::zero(st)),
            &Shape::Str => Value::Str(String::new()),
            &Shape::Bytes => Value::Bytes(Vec::new()),
            &Shape::Message(id) => Value::Message(MessageValue::zero(layout, id)),
            &Shape::List { .. } => Value::List(Vec::new()),
            &Shape::Map { .. } => Value::Map(HashMap::new()),
            &Shape::Oneof { .. } => Value::Oneof(None),
        }
    }

    pub fn bool(b: bool) -> Self {
        Value::Scalar(ScalarValue::Bool(b))
    }

    pub fn i32(n: i32) -> Self {
        Value::Scalar(ScalarValue::I32(n))
    }

    pub fn i64(n: i64) -> Self {
        Value::Scalar(ScalarValue::I64(n))
    }

    pub fn u32(n: u32) -> Self {
        Value::Scalar(ScalarValue::U32(n))
    }

    pub fn u64(n: u64) -> Self {
        Value::Scalar(ScalarValue::U64(n))
    }

    pub fn str<S: Into<String>>(s: S) -> Self {
        Value::Str(s.into())
    }

    pub fn oneof(variant: usize, value: Value) -> Self {
        Value::Oneof(Some(OneofValue {
            variant,
            value: Box::new(value),
        }))
    }

    pub(crate) fn display_str(&self) -> &'static str {
        match self {
            &Value::Scalar(sv) => sv.scalar_type().display_str(),
            &Value::Str(_) => "str",
            &Value::Bytes(_) => "bytes",
            &Value::Message(_) => "message {..}",
            &Value::List(_) => "list(..)",
            &Value::Map(_) => "map(..)(..)",
            &Value::Oneof(_) => "oneof {..}",
        }
    }
}

impl ScalarValue {
    pub fn zero(st: ScalarType) -> Self {
        match st {
            ScalarType::Bool => ScalarValue::Bool(false),
            ScalarType::I32 => ScalarValue::I32(0),
            ScalarType::U32 => ScalarValue::U32(0),
            ScalarType::Enum => ScalarValue::Enum(0),
            ScalarType::F32 => ScalarValue::F32(0.0),
            ScalarType::I64 => ScalarValue::I64(0),
            ScalarType::U64 => ScalarValue::U64(0),
            ScalarType::F64 => ScalarValue::F64(0.0),
        }
    }

    pub fn scalar_type(self) -> ScalarType {
        match self {
            ScalarValue::Bool(_) => ScalarType::Bool,
            ScalarValue::I32(_) => ScalarType::I32,
            ScalarValue::U32(_) => ScalarType::U32,
            ScalarValue::Enum(_) => ScalarType::Enum,
            ScalarValue::F32(_) => ScalarType::F32,
            ScalarValue::I64(_) => ScalarType::I64,
            ScalarValue::U64(_) => ScalarType::U64,
            ScalarValue::F64(_) => ScalarType::F64,
        }
    }
}

impl MapKey {
    pub fn scalar_type(&self) -> Option<ScalarType> {
        match self {
            &MapKey::Bool(_) => Some(ScalarType::Bool),
            &MapKey::I32(_) => Some(ScalarType::I32),
            &MapKey::U32(_) => Some(ScalarType::U32),
            &MapKey::I64(_) => Some(ScalarType::I64),
            &MapKey::U64(_) => Some(ScalarType::U64),
            &MapKey::Str(_) => None,
        }
    }

    /// Convert a scalar to a key, if its type is legal as a key.
    pub fn from_scalar(value: ScalarValue) -> Option<Self> {
        match value {
            ScalarValue::Bool(b) => Some(MapKey::Bool(b)),
            ScalarValue::I32(n) => Some(MapKey::I32(n)),
            ScalarValue::U32(n) => Some(MapKey::U32(n)),
            ScalarValue::I64(n) => Some(MapKey::I64(n)),
            ScalarValue::U64(n) => Some(MapKey::U64(n)),
            ScalarValue::Enum(_)
            | ScalarValue::F32(_)
            | ScalarValue::F64(_) => None,
        }
    }

    /// Convert a key to the scalar it's stored as. `None` for str keys.
    pub fn to_scalar(&self) -> Option<ScalarValue> {
        match self {
            &MapKey::Bool(b) => Some(ScalarValue::Bool(b)),
            &MapKey::I32(n) => Some(ScalarValue::I32(n)),
            &MapKey::U32(n) => Some(ScalarValue::U32(n)),
            &MapKey::I64(n) => Some(ScalarValue::I64(n)),
            &MapKey::U64(n) => Some(ScalarValue::U64(n)),
            &MapKey::Str(_) => None,
        }
    }
}

impl From<ScalarValue> for Value {
    fn from(value: ScalarValue) -> Self {
        Value::Scalar(value)
    }
}

impl From<MessageValue> for Value {
    fn from(value: MessageValue) -> Self {
        Value::Message(value)
    }
}

impl From<&str> for MapKey {
    fn from(s: &str) -> Self {
        MapKey::Str(s.to_owned())
    }
}
