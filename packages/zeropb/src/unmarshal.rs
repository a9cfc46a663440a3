//! Reading a dynamic `MessageValue` out of a buffer according to a planned
//! `Layout`, mirroring `marshal` field for field.

use crate::{
    error::{
        Error,
        ErrorKind,
        Result,
        error,
        bail,
    },
    buffer::{
        Reader,
        ONEOF_TAG_LEN,
    },
    layout::{
        Layout,
        MessageId,
        Shape,
    },
    options::UnmarshalOptions,
    value::{
        Value,
        MessageValue,
        MapKey,
        OneofValue,
    },
};
use std::collections::HashMap;
use tracing::debug;


/// Unmarshal a message conforming to `layout`'s root message from `buf`.
pub fn unmarshal(layout: &Layout, buf: &[u8]) -> Result<MessageValue> {
    unmarshal_with(layout, buf, &UnmarshalOptions::default())
}

pub fn unmarshal_with(
    layout: &Layout,
    buf: &[u8],
    options: &UnmarshalOptions,
) -> Result<MessageValue> {
    let mut unmarshaler = Unmarshaler {
        layout,
        reader: Reader::new(buf, options.max_depth),
    };
    unmarshaler.reader.read_root(layout.fixed_size())?;
    let value = unmarshaler.message(0, 0)?;
    debug!(message = layout.root().name(), len = buf.len(), "unmarshaled message");
    Ok(value)
}


struct Unmarshaler<'a, 'b> {
    layout: &'a Layout,
    reader: Reader<'b>,
}

impl<'a, 'b> Unmarshaler<'a, 'b> {
    fn message(&mut self, id: MessageId, at: u32) -> Result<MessageValue> {
        let layout = self.layout;
        let message = layout.message(id);
        let mut fields = Vec::with_capacity(message.fields().len());
        for field in message.fields() {
            let value = self
                .slot(&field.shape, at + field.offset)
                .map_err(|e| e.in_field(&field.name))?;
            fields.push(value);
        }
        Ok(MessageValue { fields })
    }

    fn slot(&mut self, shape: &Shape, at: u32) -> Result<Value> {
        Ok(match shape {
            &Shape::Scalar(st) => Value::Scalar(self.reader.read_scalar(at, st)?),
            &Shape::Str => Value::Str(self.str(at)?),
            &Shape::Bytes => Value::Bytes(self.reader.read_segment_bytes(at)?.to_vec()),
            &Shape::Message(id) => Value::Message(self.message(id, at)?),
            &Shape::List { ref elem, elem_size } => {
                self.reader.enter()?;
                let (first, count) = self.reader.read_list(at, elem_size)?;
                let mut elems = Vec::with_capacity(count as usize);
                for i in 0..count as u32 {
                    let elem_value = self
                        .slot(elem, first + i * elem_size)
                        .map_err(|e| e.in_field(&format!("[{}]", i)))?;
                    elems.push(elem_value);
                }
                self.reader.leave();
                Value::List(elems)
            }
            &Shape::Map { ref key, key_size, ref value, entry_size, .. } => {
                self.reader.enter()?;
                let (first, count) = self.reader.read_map(at, entry_size)?;
                let mut entries = HashMap::with_capacity(count as usize);
                for i in 0..count as u32 {
                    let entry = first + i * entry_size;
                    let entry_key = self
                        .map_key(key, entry)
                        .map_err(|e| e.in_field(&format!("[{}]", i)))?;
                    let entry_value = self
                        .slot(value, entry + key_size)
                        .map_err(|e| e.in_field(&format!("[{}]", i)))?;
                    if entries.insert(entry_key, entry_value).is_some() {
                        bail!(MalformedData, "duplicate key in map entry {}", i);
                    }
                }
                self.reader.leave();
                Value::Map(entries)
            }
            &Shape::Oneof { ref variants, .. } => {
                let discriminant = self.reader.read_u32(at)?;
                if discriminant == 0 {
                    return Ok(Value::Oneof(None));
                }
                let variant_idx = discriminant as usize - 1;
                let variant = variants
                    .get(variant_idx)
                    .ok_or_else(|| error!(
                        MalformedData,
                        "unknown oneof discriminant {} for {} variants",
                        discriminant,
                        variants.len(),
                    ))?;
                let value = self
                    .slot(&variant.shape, at + ONEOF_TAG_LEN)
                    .map_err(|e| e.in_field(&variant.name))?;
                Value::Oneof(Some(OneofValue {
                    variant: variant_idx,
                    value: Box::new(value),
                }))
            }
        })
    }

    fn str(&mut self, at: u32) -> Result<String> {
        let bytes = self.reader.read_segment_bytes(at)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::new(ErrorKind::MalformedData, e))
    }

    fn map_key(&mut self, shape: &Shape, at: u32) -> Result<MapKey> {
        match shape {
            &Shape::Str => Ok(MapKey::Str(self.str(at)?)),
            &Shape::Scalar(st) => {
                let sv = self.reader.read_scalar(at, st)?;
                MapKey::from_scalar(sv)
                    .ok_or_else(|| error!(MalformedData, "{:?} cannot be a map key", sv))
            }
            shape => bail!(
                MalformedData,
                "{} cannot be a map key",
                shape.display_str(),
            ),
        }
    }
}
