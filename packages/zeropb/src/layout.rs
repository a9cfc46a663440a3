//! Layout planning: computing, once per schema, the fixed region size and
//! field offsets of every message, so that the codecs are left with nothing
//! but fixed arithmetic and allocator calls.
//!
//! A planned `Layout` is an arena of `MessageLayout`s, root first. Messages
//! refer to each other by `MessageId`, so a schema which recurses through a
//! list or map plans into a finite structure.

use crate::{
    error::{
        Result,
        error,
        bail,
        ensure,
    },
    schema::{
        MessageSchema,
        FieldSchema,
        FieldKind,
        ScalarType,
    },
    buffer::{
        REF_HEADER_LEN,
        ONEOF_TAG_LEN,
    },
};
use sha2::{Sha256, Digest};
use std::collections::{HashMap, HashSet};
use tracing::{debug, trace};


/// Index of a message in its `Layout`.
pub type MessageId = usize;

/// Planned layout of a root message and every message reachable from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    messages: Vec<MessageLayout>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageLayout {
    name: String,
    fixed_size: u32,
    fields: Vec<FieldLayout>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLayout {
    pub name: String,
    pub tag: u32,
    /// Offset of the field's slot from the start of its message's fixed
    /// region.
    pub offset: u32,
    pub shape: Shape,
}

/// How a slot is encoded, with every size needed to encode it resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    Scalar(ScalarType),
    Str,
    Bytes,
    /// Inlined message.
    Message(MessageId),
    List {
        elem: Box<Shape>,
        elem_size: u32,
    },
    Map {
        key: Box<Shape>,
        key_size: u32,
        value: Box<Shape>,
        value_size: u32,
        /// `key_size + value_size`.
        entry_size: u32,
    },
    Oneof {
        variants: Vec<Variant>,
        /// Size of the payload area after the discriminant, which is the
        /// largest variant's size.
        payload_size: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub name: String,
    pub tag: u32,
    pub shape: Shape,
}

impl Layout {
    /// Plan the layout of `schema` and everything reachable from it.
    pub fn plan(schema: &MessageSchema) -> Result<Self> {
        let mut planner = Planner::default();
        let root = ScopeNode { schema, next: None };
        let id = planner.build(&root)?;
        debug_assert_eq!(id, 0);
        let layout = Layout {
            messages: planner.messages,
        };
        debug!(
            message = %schema.name,
            fixed_size = layout.fixed_size(),
            messages = layout.messages.len(),
            "planned layout",
        );
        trace!("schema:\n{}", schema.pretty_fmt());
        Ok(layout)
    }

    pub fn root(&self) -> &MessageLayout {
        &self.messages[0]
    }

    /// Fixed region size of the root message, which is also the size of the
    /// smallest possible encoding.
    pub fn fixed_size(&self) -> u32 {
        self.root().fixed_size
    }

    pub fn message(&self, id: MessageId) -> &MessageLayout {
        &self.messages[id]
    }

    pub fn messages(&self) -> &[MessageLayout] {
        &self.messages
    }

    /// Number of bytes a slot of the given shape occupies in a fixed region.
    pub fn shape_size(&self, shape: &Shape) -> u32 {
        match shape {
            &Shape::Scalar(st) => st.size(),
            &Shape::Str
            | &Shape::Bytes
            | &Shape::List { .. }
            | &Shape::Map { .. } => REF_HEADER_LEN,
            &Shape::Message(id) => self.messages[id].fixed_size,
            &Shape::Oneof { payload_size, .. } => ONEOF_TAG_LEN + payload_size,
        }
    }

    /// SHA-256 digest of the layout's shape: kinds, sizes and offsets, but
    /// not names or tags. Two layouts with equal fingerprints read and write
    /// identical bytes, so peers can compare fingerprints before exchanging
    /// schema-bound buffers.
    pub fn fingerprint(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update((self.messages.len() as u32).to_le_bytes());
        for message in &self.messages {
            hasher.update(message.fixed_size.to_le_bytes());
            hasher.update((message.fields.len() as u32).to_le_bytes());
            for field in &message.fields {
                hasher.update(field.offset.to_le_bytes());
                hash_shape(&mut hasher, &field.shape);
            }
        }
        let mut digest = [0; 32];
        digest.copy_from_slice(&hasher.finalize());
        digest
    }
}

fn hash_shape(hasher: &mut Sha256, shape: &Shape) {
    match shape {
        &Shape::Scalar(st) => hasher.update([0, st as u8]),
        &Shape::Str => hasher.update([1]),
        &Shape::Bytes => hasher.update([2]),
        &Shape::Message(id) => {
            hasher.update([3]);
            hasher.update((id as u32).to_le_bytes());
        }
        &Shape::List { ref elem, elem_size } => {
            hasher.update([4]);
            hasher.update(elem_size.to_le_bytes());
            hash_shape(hasher, elem);
        }
        &Shape::Map { ref key, key_size, ref value, value_size, .. } => {
            hasher.update([5]);
            hasher.update(key_size.to_le_bytes());
            hash_shape(hasher, key);
            hasher.update(value_size.to_le_bytes());
            hash_shape(hasher, value);
        }
        &Shape::Oneof { ref variants, payload_size } => {
            hasher.update([6]);
            hasher.update(payload_size.to_le_bytes());
            hasher.update((variants.len() as u32).to_le_bytes());
            for variant in variants {
                hash_shape(hasher, &variant.shape);
            }
        }
    }
}

impl MessageLayout {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fixed_size(&self) -> u32 {
        self.fixed_size
    }

    pub fn fields(&self) -> &[FieldLayout] {
        &self.fields
    }

    pub fn field_offsets(&self) -> Vec<u32> {
        self.fields.iter().map(|field| field.offset).collect()
    }
}

impl Shape {
    pub(crate) fn display_str(&self) -> &'static str {
        match self {
            &Shape::Scalar(st) => st.display_str(),
            &Shape::Str => "str",
            &Shape::Bytes => "bytes",
            &Shape::Message(_) => "message {..}",
            &Shape::List { .. } => "list(..)",
            &Shape::Map { .. } => "map(..)(..)",
            &Shape::Oneof { .. } => "oneof {..}",
        }
    }
}

/// Fixed region size of a message, computed with the same rules as
/// `Layout::plan`.
pub fn struct_size(schema: &MessageSchema) -> Result<u32> {
    let root = ScopeNode { schema, next: None };
    Planner::default().struct_size(&root)
}


/// A message in the chain of messages enclosing the one being planned, which
/// is what `FieldKind::Recurse` levels count.
struct ScopeNode<'a> {
    schema: &'a MessageSchema,
    next: Option<&'a ScopeNode<'a>>,
}

impl<'a> ScopeNode<'a> {
    fn key(&self) -> usize {
        self.schema as *const MessageSchema as usize
    }

    /// Resolve `Recurse(level)` appearing in a field of this message.
    fn resolve(&'a self, level: usize) -> Result<&'a ScopeNode<'a>> {
        ensure!(level > 0, IllegalSchema, "recurse of level 0");
        let mut curr = self;
        for _ in 1..level {
            curr = curr
                .next
                .ok_or_else(|| error!(IllegalSchema, "recurse past root of schema"))?;
        }
        Ok(curr)
    }
}

#[derive(Default)]
struct Planner {
    /// Memoized fixed sizes, keyed by schema node address.
    sizes: HashMap<usize, u32>,
    /// Messages whose fixed size is currently being computed.
    visiting: HashSet<usize>,
    ids: HashMap<usize, MessageId>,
    messages: Vec<MessageLayout>,
}

impl Planner {
    fn struct_size(&mut self, node: &ScopeNode) -> Result<u32> {
        let key = node.key();
        if let Some(&size) = self.sizes.get(&key) {
            return Ok(size);
        }
        if !self.visiting.insert(key) {
            bail!(
                SchemaCycle,
                "message {} contains itself inline, so its size is unbounded",
                node.schema.name,
            );
        }
        let mut size: u32 = 0;
        for field in &node.schema.fields {
            let field_size = self
                .field_size(&field.kind, node)
                .map_err(|e| e.in_field(&field.name))?;
            size = size
                .checked_add(field_size)
                .ok_or_else(|| error!(
                    IllegalSchema,
                    "fixed size of message {} overflows u32",
                    node.schema.name,
                ))?;
        }
        self.visiting.remove(&key);
        self.sizes.insert(key, size);
        Ok(size)
    }

    /// Fixed size of a slot of the given kind, appearing in a field of
    /// `node`'s message. Only descends into inlined messages.
    fn field_size(&mut self, kind: &FieldKind, node: &ScopeNode) -> Result<u32> {
        Ok(match kind {
            &FieldKind::Scalar(st) => st.size(),
            &FieldKind::Str
            | &FieldKind::Bytes
            | &FieldKind::List(_)
            | &FieldKind::Map(_, _) => REF_HEADER_LEN,
            &FieldKind::Message(ref inner) => {
                let child = ScopeNode { schema: inner, next: Some(node) };
                self.struct_size(&child)?
            }
            &FieldKind::Recurse(level) => {
                let target = node.resolve(level)?;
                self.struct_size(target)?
            }
            &FieldKind::Oneof(ref variants) => {
                let mut payload = 0;
                for variant in variants {
                    let size = self
                        .field_size(&variant.kind, node)
                        .map_err(|e| e.in_field(&variant.name))?;
                    payload = u32::max(payload, size);
                }
                ONEOF_TAG_LEN
                    .checked_add(payload)
                    .ok_or_else(|| error!(IllegalSchema, "oneof size overflows u32"))?
            }
        })
    }

    /// Plan the message at `node`, or look up its id if already planned.
    fn build(&mut self, node: &ScopeNode) -> Result<MessageId> {
        let key = node.key();
        if let Some(&id) = self.ids.get(&key) {
            return Ok(id);
        }
        let fixed_size = self.struct_size(node)?;

        // reserve the id before planning fields, so that recursion through a
        // list or map finds it
        let id = self.messages.len();
        self.ids.insert(key, id);
        self.messages.push(MessageLayout {
            name: node.schema.name.clone(),
            fixed_size,
            fields: Vec::with_capacity(node.schema.fields.len()),
        });

        let mut offset = 0;
        let mut fields = Vec::with_capacity(node.schema.fields.len());
        for field in &node.schema.fields {
            let (shape, size) = self
                .shape(&field.kind, node)
                .map_err(|e| e.in_field(&field.name))?;
            fields.push(FieldLayout {
                name: field.name.clone(),
                tag: field.tag,
                offset,
                shape,
            });
            offset += size;
        }
        debug_assert_eq!(offset, fixed_size);
        self.messages[id].fields = fields;
        Ok(id)
    }

    fn shape(&mut self, kind: &FieldKind, node: &ScopeNode) -> Result<(Shape, u32)> {
        Ok(match kind {
            &FieldKind::Scalar(st) => (Shape::Scalar(st), st.size()),
            &FieldKind::Str => (Shape::Str, REF_HEADER_LEN),
            &FieldKind::Bytes => (Shape::Bytes, REF_HEADER_LEN),
            &FieldKind::Message(ref inner) => {
                let child = ScopeNode { schema: inner, next: Some(node) };
                let id = self.build(&child)?;
                (Shape::Message(id), self.messages[id].fixed_size)
            }
            &FieldKind::Recurse(level) => {
                let target = node.resolve(level)?;
                let id = self.build(target)?;
                (Shape::Message(id), self.messages[id].fixed_size)
            }
            &FieldKind::List(ref elem) => {
                ensure!(
                    !matches!(**elem, FieldKind::Oneof(_)),
                    IllegalSchema,
                    "list element cannot be a oneof",
                );
                let (elem, elem_size) = self.shape(elem, node)?;
                let shape = Shape::List {
                    elem: Box::new(elem),
                    elem_size,
                };
                (shape, REF_HEADER_LEN)
            }
            &FieldKind::Map(ref key, ref value) => {
                validate_map_key(key)?;
                ensure!(
                    !matches!(**value, FieldKind::Oneof(_)),
                    IllegalSchema,
                    "map value cannot be a oneof",
                );
                let (key, key_size) = self.shape(key, node)?;
                let (value, value_size) = self.shape(value, node)?;
                let entry_size = map_entry_size(key_size, value_size)?;
                let shape = Shape::Map {
                    key: Box::new(key),
                    key_size,
                    value: Box::new(value),
                    value_size,
                    entry_size,
                };
                (shape, REF_HEADER_LEN)
            }
            &FieldKind::Oneof(ref variants) => {
                let mut payload_size = 0;
                let mut planned = Vec::with_capacity(variants.len());
                for variant in variants {
                    let (shape, size) = self
                        .variant_shape(variant, node)
                        .map_err(|e| e.in_field(&variant.name))?;
                    payload_size = u32::max(payload_size, size);
                    planned.push(Variant {
                        name: variant.name.clone(),
                        tag: variant.tag,
                        shape,
                    });
                }
                let shape = Shape::Oneof {
                    variants: planned,
                    payload_size,
                };
                (shape, ONEOF_TAG_LEN + payload_size)
            }
        })
    }

    fn variant_shape(
        &mut self,
        variant: &FieldSchema,
        node: &ScopeNode,
    ) -> Result<(Shape, u32)> {
        match &variant.kind {
            &FieldKind::List(_)
            | &FieldKind::Map(_, _)
            | &FieldKind::Oneof(_) => bail!(
                IllegalSchema,
                "oneof variant cannot be a {}",
                variant.kind.display_str(),
            ),
            kind => self.shape(kind, node),
        }
    }
}

/// Size of one map entry: a key slot followed by a value slot.
pub(crate) fn map_entry_size(key_size: u32, value_size: u32) -> Result<u32> {
    key_size
        .checked_add(value_size)
        .ok_or_else(|| error!(
            IllegalSchema,
            "map entry of {} + {} bytes overflows u32",
            key_size,
            value_size,
        ))
}

fn validate_map_key(key: &FieldKind) -> Result<()> {
    match key {
        &FieldKind::Str => Ok(()),
        &FieldKind::Scalar(st) if !st.is_float() && st != ScalarType::Enum => Ok(()),
        key => bail!(
            IllegalSchema,
            "map key cannot be a {}",
            key.display_str(),
        ),
    }
}
