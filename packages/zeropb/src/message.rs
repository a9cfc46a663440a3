//! Types which statically know their schema and slot size, and
//! implementations for common types.
//!
//! This is the static path: `#[derive(Message)]` turns a struct into a
//! message whose field offsets are compile-time constants, so marshaling
//! does no layout lookups at all. The bytes are identical to what the
//! dynamic codecs produce for `Layout::plan(&T::schema())`.

use crate::{
    error::{
        Error,
        ErrorKind,
        Result,
        ensure,
        bail,
    },
    schema::{
        MessageSchema,
        FieldKind,
        ScalarType,
    },
    buffer::{
        Buffer,
        Reader,
        count16,
        reserve,
        REF_HEADER_LEN,
        LIST_HEADER_LEN,
        MAX_MESSAGE_LEN,
    },
    layout::map_entry_size,
    options::UnmarshalOptions,
};
use std::{
    any::{TypeId, type_name},
    collections::{HashMap, BTreeMap},
    hash::Hash,
    ops::Deref,
    fmt::{self, Debug, Formatter},
};
use tracing::debug;


/// Type which can occupy a slot in a message's fixed region.
pub trait Slot: Sized {
    /// Number of bytes the slot occupies in the fixed region.
    const SIZE: u32;

    fn field_kind(stack: RecurseStack) -> FieldKind;

    /// Write into the slot at `at`, allocating any segments needed.
    fn marshal_slot(&self, buf: &mut Buffer, at: u32) -> Result<()>;

    fn unmarshal_slot(reader: &mut Reader, at: u32) -> Result<Self>;

    /// Number of bytes marshaling this allocates outside of its slot.
    fn segment_len(&self) -> u64 {
        0
    }
}

/// Slot type which may be used as a map key.
pub trait MapKeySlot: Slot {}

/// Struct which is marshaled as a message. Usually implemented with
/// `#[derive(Message)]`.
pub trait Message: Slot + 'static {
    /// Schema of this message, given the stack of messages enclosing it.
    fn schema_in(parent_stack: RecurseStack) -> MessageSchema;

    /// Write the fields into the fixed region at `at`.
    fn marshal_fields(&self, buf: &mut Buffer, at: u32) -> Result<()>;

    fn unmarshal_fields(reader: &mut Reader, at: u32) -> Result<Self>;

    fn schema() -> MessageSchema {
        Self::schema_in(RecurseStack::new())
    }

    /// Marshal into `out`, returning the number of bytes written.
    fn marshal_zeropb(&self, out: &mut [u8]) -> Result<u32> {
        let mut buf = Buffer::new(out);
        let root = buf.alloc(Self::SIZE)?;
        self.marshal_fields(&mut buf, root.offset())?;
        let len = buf.allocated();
        debug!(message = type_name::<Self>(), len, "marshaled message");
        Ok(len)
    }

    fn unmarshal_zeropb(buf: &[u8]) -> Result<Self> {
        Self::unmarshal_zeropb_with(buf, &UnmarshalOptions::default())
    }

    fn unmarshal_zeropb_with(buf: &[u8], options: &UnmarshalOptions) -> Result<Self> {
        let mut reader = Reader::new(buf, options.max_depth);
        reader.read_root(Self::SIZE)?;
        let value = Self::unmarshal_fields(&mut reader, 0)?;
        debug!(message = type_name::<Self>(), len = buf.len(), "unmarshaled message");
        Ok(value)
    }

    /// Exact number of bytes `marshal_zeropb` would write.
    fn encoded_len(&self) -> u64 {
        Self::SIZE as u64 + self.segment_len()
    }

    /// Marshal into a fresh buffer of exactly the encoded length.
    fn to_zeropb_vec(&self) -> Result<Vec<u8>> {
        let len = self.encoded_len();
        ensure!(
            len <= MAX_MESSAGE_LEN as u64,
            BufferOverflow,
            "encoded length {} exceeds maximum message length {}",
            len,
            MAX_MESSAGE_LEN,
        );
        let mut out = reserve(len as u32);
        self.marshal_zeropb(&mut out)?;
        Ok(out)
    }
}

/// `Slot::field_kind` for a message type: the message inline, or a
/// `FieldKind::Recurse` if the message is already among those enclosing it.
pub fn message_field_kind<M: Message>(stack: RecurseStack) -> FieldKind {
    match stack.find_type::<M>() {
        Some(level) => FieldKind::Recurse(level + 1),
        None => FieldKind::Message(M::schema_in(stack)),
    }
}


/// Stack of message types enclosing the one whose schema is being built,
/// innermost first.
#[derive(Copy, Clone)]
pub struct RecurseStack<'a>(Option<Node<'a>>);

#[derive(Copy, Clone)]
struct Node<'a> {
    type_id: TypeId,
    dbg: &'static str,
    next: &'a Option<Node<'a>>,
}

impl<'a> Default for RecurseStack<'a> {
    fn default() -> Self {
        RecurseStack::new()
    }
}

impl<'a> RecurseStack<'a> {
    pub fn new() -> Self {
        RecurseStack(None)
    }

    pub fn with_type_layer<'b, T: 'static>(&'b self) -> RecurseStack<'b> {
        RecurseStack(Some(Node {
            type_id: TypeId::of::<T>(),
            dbg: type_name::<T>(),
            next: &self.0,
        }))
    }

    /// How many layers down `T` is, if present.
    pub fn find_type<T: 'static>(&self) -> Option<usize> {
        let type_id = TypeId::of::<T>();
        let mut opt_curr = &self.0;
        let mut level = 0;

        while let &Some(ref curr) = opt_curr {
            if curr.type_id == type_id {
                return Some(level);
            }
            opt_curr = curr.next;
            level += 1;
        }

        None
    }
}

impl<'a> Debug for RecurseStack<'a> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let mut list = f.debug_list();
        let mut opt_curr = &self.0;
        while let &Some(ref curr) = opt_curr {
            list.entry(&curr.dbg);
            opt_curr = curr.next;
        }
        list.finish()
    }
}


macro_rules! scalar_slots {
    ($($t:ident $v:ident,)*)=>{$(
        impl Slot for $t {
            const SIZE: u32 = ScalarType::$v.size();

            fn field_kind(_: RecurseStack) -> FieldKind {
                FieldKind::Scalar(ScalarType::$v)
            }

            fn marshal_slot(&self, buf: &mut Buffer, at: u32) -> Result<()> {
                buf.put_bytes(at, &self.to_le_bytes())
            }

            fn unmarshal_slot(reader: &mut Reader, at: u32) -> Result<Self> {
                reader.read_array(at).map($t::from_le_bytes)
            }
        }
    )*};
}

scalar_slots!(
    i32 I32,
    u32 U32,
    f32 F32,
    i64 I64,
    u64 U64,
    f64 F64,
);

impl Slot for bool {
    const SIZE: u32 = ScalarType::Bool.size();

    fn field_kind(_: RecurseStack) -> FieldKind {
        FieldKind::Scalar(ScalarType::Bool)
    }

    fn marshal_slot(&self, buf: &mut Buffer, at: u32) -> Result<()> {
        buf.put_bool(at, *self)
    }

    fn unmarshal_slot(reader: &mut Reader, at: u32) -> Result<Self> {
        reader.read_bool(at)
    }
}

impl MapKeySlot for bool {}
impl MapKeySlot for i32 {}
impl MapKeySlot for u32 {}
impl MapKeySlot for i64 {}
impl MapKeySlot for u64 {}
impl MapKeySlot for String {}

impl Slot for String {
    const SIZE: u32 = REF_HEADER_LEN;

    fn field_kind(_: RecurseStack) -> FieldKind {
        FieldKind::Str
    }

    fn marshal_slot(&self, buf: &mut Buffer, at: u32) -> Result<()> {
        buf.put_segment_bytes(at, self.as_bytes())
    }

    fn unmarshal_slot(reader: &mut Reader, at: u32) -> Result<Self> {
        let bytes = reader.read_segment_bytes(at)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::new(ErrorKind::MalformedData, e))
    }

    fn segment_len(&self) -> u64 {
        self.len() as u64
    }
}

/// Byte string field. `Vec<u8>` would be a list of one-byte elements, which
/// has no slot type, so bytes fields use this instead.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Bytes(pub Vec<u8>);

impl From<Vec<u8>> for Bytes {
    fn from(v: Vec<u8>) -> Self {
        Bytes(v)
    }
}

impl From<&[u8]> for Bytes {
    fn from(b: &[u8]) -> Self {
        Bytes(b.to_vec())
    }
}

impl Deref for Bytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl Slot for Bytes {
    const SIZE: u32 = REF_HEADER_LEN;

    fn field_kind(_: RecurseStack) -> FieldKind {
        FieldKind::Bytes
    }

    fn marshal_slot(&self, buf: &mut Buffer, at: u32) -> Result<()> {
        buf.put_segment_bytes(at, &self.0)
    }

    fn unmarshal_slot(reader: &mut Reader, at: u32) -> Result<Self> {
        Ok(Bytes(reader.read_segment_bytes(at)?.to_vec()))
    }

    fn segment_len(&self) -> u64 {
        self.0.len() as u64
    }
}

impl<T: Slot> Slot for Vec<T> {
    const SIZE: u32 = REF_HEADER_LEN;

    fn field_kind(stack: RecurseStack) -> FieldKind {
        FieldKind::List(Box::new(T::field_kind(stack)))
    }

    fn marshal_slot(&self, buf: &mut Buffer, at: u32) -> Result<()> {
        let first = buf.alloc_list(at, count16(self.len())?, T::SIZE)?;
        for (i, elem) in self.iter().enumerate() {
            elem.marshal_slot(buf, first + i as u32 * T::SIZE)
                .map_err(|e| e.in_field(&format!("[{}]", i)))?;
        }
        Ok(())
    }

    fn unmarshal_slot(reader: &mut Reader, at: u32) -> Result<Self> {
        reader.enter()?;
        let (first, count) = reader.read_list(at, T::SIZE)?;
        let mut elems = Vec::with_capacity(count as usize);
        for i in 0..count as u32 {
            let elem = T::unmarshal_slot(reader, first + i * T::SIZE)
                .map_err(|e| e.in_field(&format!("[{}]", i)))?;
            elems.push(elem);
        }
        reader.leave();
        Ok(elems)
    }

    fn segment_len(&self) -> u64 {
        if self.is_empty() {
            return 0;
        }
        LIST_HEADER_LEN as u64
            + self.len() as u64 * T::SIZE as u64
            + self.iter().map(Slot::segment_len).sum::<u64>()
    }
}

macro_rules! map_slots {
    ($($c:ident [$($b:tt)*],)*)=>{$(
        impl<K: MapKeySlot + $($b)*, V: Slot> Slot for $c<K, V> {
            const SIZE: u32 = REF_HEADER_LEN;

            fn field_kind(stack: RecurseStack) -> FieldKind {
                FieldKind::Map(
                    Box::new(K::field_kind(stack)),
                    Box::new(V::field_kind(stack)),
                )
            }

            fn marshal_slot(&self, buf: &mut Buffer, at: u32) -> Result<()> {
                let entry_size = map_entry_size(K::SIZE, V::SIZE)?;
                let first = buf.alloc_map(at, count16(self.len())?, entry_size)?;
                for (i, (key, value)) in self.iter().enumerate() {
                    let entry = first + i as u32 * entry_size;
                    key.marshal_slot(buf, entry)
                        .and_then(|()| value.marshal_slot(buf, entry + K::SIZE))
                        .map_err(|e| e.in_field(&format!("[{}]", i)))?;
                }
                Ok(())
            }

            fn unmarshal_slot(reader: &mut Reader, at: u32) -> Result<Self> {
                reader.enter()?;
                let entry_size = map_entry_size(K::SIZE, V::SIZE)?;
                let (first, count) = reader.read_map(at, entry_size)?;
                let mut map = $c::new();
                for i in 0..count as u32 {
                    let entry = first + i * entry_size;
                    let (key, value) = K::unmarshal_slot(reader, entry)
                        .and_then(|key| Ok((key, V::unmarshal_slot(reader, entry + K::SIZE)?)))
                        .map_err(|e| e.in_field(&format!("[{}]", i)))?;
                    if map.insert(key, value).is_some() {
                        bail!(MalformedData, "duplicate key in map entry {}", i);
                    }
                }
                reader.leave();
                Ok(map)
            }

            fn segment_len(&self) -> u64 {
                self.len() as u64 * (K::SIZE as u64 + V::SIZE as u64)
                    + self
                        .iter()
                        .map(|(key, value)| key.segment_len() + value.segment_len())
                        .sum::<u64>()
            }
        }
    )*};
}

map_slots!(
    HashMap [Eq + Hash],
    BTreeMap [Ord],
);
