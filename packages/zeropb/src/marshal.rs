//! Writing a dynamic `MessageValue` into a buffer according to a planned
//! `Layout`.
//!
//! The root message's fixed region is allocated first. Slots are then
//! written in field order, and every variable-length value allocates its
//! segment at the bump cursor the moment its slot is reached, so segments
//! appear in depth-first field order.

use crate::{
    error::{
        Result,
        error,
        bail,
        ensure,
    },
    buffer::{
        Buffer,
        count16,
        reserve,
        LIST_HEADER_LEN,
        ONEOF_TAG_LEN,
        MAX_MESSAGE_LEN,
    },
    layout::{
        Layout,
        MessageId,
        Shape,
    },
    options::{
        MarshalOptions,
        MapOrder,
    },
    value::{
        Value,
        MessageValue,
        MapKey,
    },
};
use tracing::debug;


/// Marshal `value`, which must conform to `layout`'s root message, into
/// `out`. Returns the number of bytes written.
pub fn marshal(layout: &Layout, value: &MessageValue, out: &mut [u8]) -> Result<u32> {
    marshal_with(layout, value, out, &MarshalOptions::default())
}

pub fn marshal_with(
    layout: &Layout,
    value: &MessageValue,
    out: &mut [u8],
    options: &MarshalOptions,
) -> Result<u32> {
    let mut marshaler = Marshaler {
        layout,
        options,
        buf: Buffer::new(out),
    };
    let root = marshaler.buf.alloc(layout.fixed_size())?;
    marshaler.message(0, value, root.offset())?;
    let len = marshaler.buf.allocated();
    debug!(message = layout.root().name(), len, "marshaled message");
    Ok(len)
}

/// Exact number of bytes marshaling `value` would write.
pub fn encoded_len(layout: &Layout, value: &MessageValue) -> Result<u64> {
    Ok(layout.fixed_size() as u64 + message_segments_len(layout, 0, value)?)
}

/// Marshal into a fresh buffer of exactly the encoded length.
pub fn marshal_to_vec(
    layout: &Layout,
    value: &MessageValue,
    options: &MarshalOptions,
) -> Result<Vec<u8>> {
    let len = encoded_len(layout, value)?;
    ensure!(
        len <= MAX_MESSAGE_LEN as u64,
        BufferOverflow,
        "encoded length {} exceeds maximum message length {}",
        len,
        MAX_MESSAGE_LEN,
    );
    let mut out = reserve(len as u32);
    let written = marshal_with(layout, value, &mut out, options)?;
    debug_assert_eq!(written as u64, len);
    Ok(out)
}


struct Marshaler<'a, 'b> {
    layout: &'a Layout,
    options: &'a MarshalOptions,
    buf: Buffer<'b>,
}

impl<'a, 'b> Marshaler<'a, 'b> {
    /// Write a message's fields into its fixed region at `at`.
    fn message(&mut self, id: MessageId, value: &MessageValue, at: u32) -> Result<()> {
        let layout = self.layout;
        let message = layout.message(id);
        check_field_count(message.name(), message.fields().len(), value)?;
        for (field, field_value) in message.fields().iter().zip(&value.fields) {
            self.slot(&field.shape, field_value, at + field.offset)
                .map_err(|e| e.in_field(&field.name))?;
        }
        Ok(())
    }

    fn slot(&mut self, shape: &Shape, value: &Value, at: u32) -> Result<()> {
        match (shape, value) {
            (&Shape::Scalar(st), &Value::Scalar(sv)) if sv.scalar_type() == st => {
                self.buf.put_scalar(at, sv)
            }
            (&Shape::Str, &Value::Str(ref s)) => self.buf.put_segment_bytes(at, s.as_bytes()),
            (&Shape::Bytes, &Value::Bytes(ref b)) => self.buf.put_segment_bytes(at, b),
            (&Shape::Message(id), &Value::Message(ref m)) => self.message(id, m, at),
            (
                &Shape::List { ref elem, elem_size },
                &Value::List(ref elems),
            ) => {
                let count = count16(elems.len())?;
                let first = self.buf.alloc_list(at, count, elem_size)?;
                for (i, elem_value) in elems.iter().enumerate() {
                    self.slot(elem, elem_value, first + i as u32 * elem_size)
                        .map_err(|e| e.in_field(&format!("[{}]", i)))?;
                }
                Ok(())
            }
            (
                &Shape::Map { ref key, key_size, ref value, entry_size, .. },
                &Value::Map(ref entries),
            ) => {
                let count = count16(entries.len())?;
                let first = self.buf.alloc_map(at, count, entry_size)?;
                let mut entries = entries.iter().collect::<Vec<_>>();
                if self.options.map_order == MapOrder::SortedByKey {
                    entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
                }
                for (i, (entry_key, entry_value)) in entries.into_iter().enumerate() {
                    let entry = first + i as u32 * entry_size;
                    self.map_key(key, entry_key, entry)
                        .and_then(|()| self.slot(value, entry_value, entry + key_size))
                        .map_err(|e| e.in_field(&format!("[{}]", i)))?;
                }
                Ok(())
            }
            (&Shape::Oneof { ref variants, .. }, &Value::Oneof(ref choice)) => {
                let choice = match choice {
                    &Some(ref choice) => choice,
                    // the slot is already zero, which reads as unset
                    &None => return Ok(()),
                };
                let variant = variants
                    .get(choice.variant)
                    .ok_or_else(|| error!(
                        SchemaNonConformance,
                        "oneof variant index {} out of range of {} variants",
                        choice.variant,
                        variants.len(),
                    ))?;
                self.buf.put_u32(at, choice.variant as u32 + 1)?;
                self.slot(&variant.shape, &choice.value, at + ONEOF_TAG_LEN)
                    .map_err(|e| e.in_field(&variant.name))
            }
            (shape, value) => bail!(
                SchemaNonConformance,
                "expected {}, got {}",
                shape.display_str(),
                value.display_str(),
            ),
        }
    }

    fn map_key(&mut self, shape: &Shape, key: &MapKey, at: u32) -> Result<()> {
        match (shape, key) {
            (&Shape::Str, &MapKey::Str(ref s)) => self.buf.put_segment_bytes(at, s.as_bytes()),
            (&Shape::Scalar(st), key) if key.scalar_type() == Some(st) => {
                match key.to_scalar() {
                    Some(sv) => self.buf.put_scalar(at, sv),
                    None => bail!(SchemaNonConformance, "map key is not a scalar"),
                }
            }
            (shape, key) => bail!(
                SchemaNonConformance,
                "expected map key {}, got {:?}",
                shape.display_str(),
                key,
            ),
        }
    }
}

fn check_field_count(name: &str, expected: usize, value: &MessageValue) -> Result<()> {
    ensure!(
        value.fields.len() == expected,
        SchemaNonConformance,
        "message {} has {} fields, but value has {}",
        name,
        expected,
        value.fields.len(),
    );
    Ok(())
}

/// Bytes allocated outside the fixed region when marshaling a message,
/// checking conformance along the way.
fn message_segments_len(layout: &Layout, id: MessageId, value: &MessageValue) -> Result<u64> {
    let message = layout.message(id);
    check_field_count(message.name(), message.fields().len(), value)?;
    let mut len = 0;
    for (field, field_value) in message.fields().iter().zip(&value.fields) {
        len += segments_len(layout, &field.shape, field_value)
            .map_err(|e| e.in_field(&field.name))?;
    }
    Ok(len)
}

fn segments_len(layout: &Layout, shape: &Shape, value: &Value) -> Result<u64> {
    Ok(match (shape, value) {
        (&Shape::Scalar(st), &Value::Scalar(sv)) if sv.scalar_type() == st => 0,
        (&Shape::Str, &Value::Str(ref s)) => s.len() as u64,
        (&Shape::Bytes, &Value::Bytes(ref b)) => b.len() as u64,
        (&Shape::Message(id), &Value::Message(ref m)) => message_segments_len(layout, id, m)?,
        (&Shape::List { ref elem, elem_size }, &Value::List(ref elems)) => {
            if elems.is_empty() {
                return Ok(0);
            }
            let mut len = LIST_HEADER_LEN as u64 + elems.len() as u64 * elem_size as u64;
            for (i, elem_value) in elems.iter().enumerate() {
                len += segments_len(layout, elem, elem_value)
                    .map_err(|e| e.in_field(&format!("[{}]", i)))?;
            }
            len
        }
        (
            &Shape::Map { ref key, ref value, entry_size, .. },
            &Value::Map(ref entries),
        ) => {
            let mut len = entries.len() as u64 * entry_size as u64;
            for (i, (entry_key, entry_value)) in entries.iter().enumerate() {
                len += map_key_len(key, entry_key)
                    .and_then(|key_len| Ok(key_len + segments_len(layout, value, entry_value)?))
                    .map_err(|e| e.in_field(&format!("[{}]", i)))?;
            }
            len
        }
        (&Shape::Oneof { ref variants, .. }, &Value::Oneof(ref choice)) => match choice {
            &None => 0,
            &Some(ref choice) => {
                let variant = variants
                    .get(choice.variant)
                    .ok_or_else(|| error!(
                        SchemaNonConformance,
                        "oneof variant index {} out of range of {} variants",
                        choice.variant,
                        variants.len(),
                    ))?;
                segments_len(layout, &variant.shape, &choice.value)
                    .map_err(|e| e.in_field(&variant.name))?
            }
        },
        (shape, value) => bail!(
            SchemaNonConformance,
            "expected {}, got {}",
            shape.display_str(),
            value.display_str(),
        ),
    })
}

fn map_key_len(shape: &Shape, key: &MapKey) -> Result<u64> {
    match (shape, key) {
        (&Shape::Str, &MapKey::Str(ref s)) => Ok(s.len() as u64),
        (&Shape::Scalar(st), key) if key.scalar_type() == Some(st) => Ok(0),
        (shape, key) => bail!(
            SchemaNonConformance,
            "expected map key {}, got {:?}",
            shape.display_str(),
            key,
        ),
    }
}
