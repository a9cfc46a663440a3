//! The byte region a message is marshaled into, with its bump allocator, and
//! the bounds-checked reader used to unmarshal one.
//!
//! Every access is checked. A write which would land outside the allocated
//! part of the buffer is a `BufferOverflow`, and a read outside the source
//! buffer is a `BufferUnderflow`, so no input can make the codecs panic.

use crate::{
    error::{
        Result,
        error,
        ensure,
    },
    schema::ScalarType,
    value::ScalarValue,
};
use tracing::trace;


/// Size of a reference header: `(relative offset: u16, count: u16)`.
pub const REF_HEADER_LEN: u32 = 4;

/// Size of the header at the start of every list segment.
pub const LIST_HEADER_LEN: u32 = 4;

/// Size of the discriminant at the start of a oneof slot.
pub const ONEOF_TAG_LEN: u32 = 4;

/// Upper bound on the length of any single encoded message. Positions,
/// relative offsets and counts are all 16 bits wide.
pub const MAX_MESSAGE_LEN: u32 = u16::MAX as u32;

/// Allocate a zero-initialized region to marshal into.
pub fn reserve(capacity: u32) -> Vec<u8> {
    vec![0; capacity as usize]
}

/// Convert a length into a reference header count.
pub fn count16(len: usize) -> Result<u16> {
    u16::try_from(len)
        .map_err(|_| error!(
            BufferOverflow,
            "count {} does not fit in a reference header",
            len,
        ))
}


/// A byte region being marshaled into, and its bump cursor.
pub struct Buffer<'b> {
    buf: &'b mut [u8],
    capacity: u32,
    allocated: u32,
}

/// A contiguous range of a `Buffer` handed out by its allocator.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Allocation {
    offset: u32,
    len: u32,
}

impl Allocation {
    /// Absolute position of the start of the allocation.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Absolute position of a byte `rel` bytes into the allocation.
    pub fn at(&self, rel: u32) -> u32 {
        self.offset + rel
    }
}

impl<'b> Buffer<'b> {
    /// Wrap caller memory. Capacity is the slice's length, but never more
    /// than `MAX_MESSAGE_LEN`.
    pub fn new(buf: &'b mut [u8]) -> Self {
        let capacity = usize::min(buf.len(), MAX_MESSAGE_LEN as usize) as u32;
        Buffer {
            buf,
            capacity,
            allocated: 0,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of bytes allocated so far. After marshaling, this is the
    /// length of the encoded message.
    pub fn allocated(&self) -> u32 {
        self.allocated
    }

    /// Allocate `size` bytes at the cursor, zero-filled.
    pub fn alloc(&mut self, size: u32) -> Result<Allocation> {
        let offset = self.allocated;
        let end = offset
            .checked_add(size)
            .filter(|&end| end <= self.capacity)
            .ok_or_else(|| error!(
                BufferOverflow,
                "allocating {} bytes at {} exceeds capacity {}",
                size,
                offset,
                self.capacity,
            ))?;
        self.buf[offset as usize..end as usize].fill(0);
        self.allocated = end;
        Ok(Allocation { offset, len: size })
    }

    /// Allocate a variable segment of `size` bytes holding `count` items, and
    /// write the reference header locating it at `owner`.
    ///
    /// A count of zero allocates nothing and writes the header `(0, 0)`.
    pub fn alloc_rel(
        &mut self,
        owner: u32,
        count: u16,
        size: u32,
    ) -> Result<Allocation> {
        if count == 0 {
            self.put_header(owner, 0, 0)?;
            return Ok(Allocation { offset: self.allocated, len: 0 });
        }
        let rel = self.allocated
            .checked_sub(owner)
            .and_then(|rel| u16::try_from(rel).ok())
            .ok_or_else(|| error!(
                BufferOverflow,
                "segment at {} is out of 16 bit range of its header at {}",
                self.allocated,
                owner,
            ))?;
        let segment = self.alloc(size)?;
        self.put_header(owner, rel, count)?;
        trace!(
            owner,
            offset = segment.offset,
            count,
            size,
            "allocated segment",
        );
        Ok(segment)
    }

    /// Allocate a segment for `bytes`, copy them in, and write its header at
    /// `owner`.
    pub fn put_segment_bytes(&mut self, owner: u32, bytes: &[u8]) -> Result<()> {
        let count = count16(bytes.len())?;
        let segment = self.alloc_rel(owner, count, count as u32)?;
        self.put_bytes(segment.offset, bytes)
    }

    /// Allocate a list segment for `count` elements of `elem_size` bytes,
    /// write its header at `owner` and its list header, and return the
    /// position of the first element.
    pub fn alloc_list(
        &mut self,
        owner: u32,
        count: u16,
        elem_size: u32,
    ) -> Result<u32> {
        if count == 0 {
            self.put_header(owner, 0, 0)?;
            return Ok(self.allocated);
        }
        let size = (count as u32)
            .checked_mul(elem_size)
            .and_then(|n| n.checked_add(LIST_HEADER_LEN))
            .ok_or_else(|| error!(
                BufferOverflow,
                "list of {} elements of {} bytes is too large",
                count,
                elem_size,
            ))?;
        let segment = self.alloc_rel(owner, count, size)?;
        self.put_u16(segment.offset, count)?;
        self.put_u16(segment.at(2), 0)?;
        Ok(segment.at(LIST_HEADER_LEN))
    }

    /// Allocate a map segment for `count` entries of `entry_size` bytes,
    /// write its header at `owner`, and return the position of the first
    /// entry.
    pub fn alloc_map(
        &mut self,
        owner: u32,
        count: u16,
        entry_size: u32,
    ) -> Result<u32> {
        let size = (count as u32)
            .checked_mul(entry_size)
            .ok_or_else(|| error!(
                BufferOverflow,
                "map of {} entries of {} bytes is too large",
                count,
                entry_size,
            ))?;
        Ok(self.alloc_rel(owner, count, size)?.offset)
    }

    /// Get the already-allocated bytes `at..at + len` for writing.
    fn slot_mut(&mut self, at: u32, len: u32) -> Result<&mut [u8]> {
        let end = at
            .checked_add(len)
            .filter(|&end| end <= self.allocated)
            .ok_or_else(|| error!(
                BufferOverflow,
                "write of {} bytes at {} outside of {} allocated bytes",
                len,
                at,
                self.allocated,
            ))?;
        Ok(&mut self.buf[at as usize..end as usize])
    }

    pub fn put_bytes(&mut self, at: u32, bytes: &[u8]) -> Result<()> {
        let len = u32::try_from(bytes.len())
            .map_err(|_| error!(BufferOverflow, "{} bytes is too many", bytes.len()))?;
        self.slot_mut(at, len)?.copy_from_slice(bytes);
        Ok(())
    }

    pub fn put_u16(&mut self, at: u32, n: u16) -> Result<()> {
        self.put_bytes(at, &n.to_le_bytes())
    }

    pub fn put_u32(&mut self, at: u32, n: u32) -> Result<()> {
        self.put_bytes(at, &n.to_le_bytes())
    }

    pub fn put_u64(&mut self, at: u32, n: u64) -> Result<()> {
        self.put_bytes(at, &n.to_le_bytes())
    }

    pub fn put_bool(&mut self, at: u32, b: bool) -> Result<()> {
        self.put_u32(at, b as u32)
    }

    pub fn put_scalar(&mut self, at: u32, value: ScalarValue) -> Result<()> {
        match value {
            ScalarValue::Bool(b) => self.put_bool(at, b),
            ScalarValue::I32(n) | ScalarValue::Enum(n) => self.put_bytes(at, &n.to_le_bytes()),
            ScalarValue::U32(n) => self.put_u32(at, n),
            ScalarValue::F32(n) => self.put_u32(at, n.to_bits()),
            ScalarValue::I64(n) => self.put_bytes(at, &n.to_le_bytes()),
            ScalarValue::U64(n) => self.put_u64(at, n),
            ScalarValue::F64(n) => self.put_u64(at, n.to_bits()),
        }
    }

    /// Write a reference header.
    pub fn put_header(&mut self, owner: u32, rel: u16, count: u16) -> Result<()> {
        let mut header = [0; REF_HEADER_LEN as usize];
        header[..2].copy_from_slice(&rel.to_le_bytes());
        header[2..].copy_from_slice(&count.to_le_bytes());
        self.put_bytes(owner, &header)
    }
}


/// Bounds-checked reads from a source buffer.
///
/// Also tracks how deep unmarshaling has descended through lists and maps,
/// since data can nest much deeper than its schema does.
///
/// Segments must be resolved in the order they were allocated, and no two
/// may overlap each other or the root fixed region. Otherwise headers could
/// share segments, and a small buffer could decode to an exponentially large
/// value.
pub struct Reader<'b> {
    buf: &'b [u8],
    depth: usize,
    max_depth: usize,
    /// End of the root fixed region or the last resolved segment.
    cursor: u64,
}

impl<'b> Reader<'b> {
    pub fn new(buf: &'b [u8], max_depth: usize) -> Self {
        Reader {
            buf,
            depth: 0,
            max_depth,
            cursor: 0,
        }
    }

    /// Check that the root fixed region of `size` bytes is present, and
    /// claim it so that no segment may point into it.
    pub fn read_root(&mut self, size: u32) -> Result<()> {
        self.read_bytes(0, size)?;
        self.cursor = u64::max(self.cursor, size as u64);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn read_bytes(&self, at: u32, len: u32) -> Result<&'b [u8]> {
        let end = at as u64 + len as u64;
        ensure!(
            end <= self.buf.len() as u64,
            BufferUnderflow,
            "read of {} bytes at {} outside of {} byte buffer",
            len,
            at,
            self.buf.len(),
        );
        Ok(&self.buf[at as usize..end as usize])
    }

    pub fn read_array<const N: usize>(&self, at: u32) -> Result<[u8; N]> {
        let mut array = [0; N];
        array.copy_from_slice(self.read_bytes(at, N as u32)?);
        Ok(array)
    }

    pub fn read_u16(&self, at: u32) -> Result<u16> {
        self.read_array(at).map(u16::from_le_bytes)
    }

    pub fn read_u32(&self, at: u32) -> Result<u32> {
        self.read_array(at).map(u32::from_le_bytes)
    }

    pub fn read_u64(&self, at: u32) -> Result<u64> {
        self.read_array(at).map(u64::from_le_bytes)
    }

    /// Any nonzero value reads as true.
    pub fn read_bool(&self, at: u32) -> Result<bool> {
        self.read_u32(at).map(|n| n != 0)
    }

    pub fn read_scalar(&self, at: u32, st: ScalarType) -> Result<ScalarValue> {
        Ok(match st {
            ScalarType::Bool => ScalarValue::Bool(self.read_bool(at)?),
            ScalarType::I32 => ScalarValue::I32(i32::from_le_bytes(self.read_array(at)?)),
            ScalarType::U32 => ScalarValue::U32(self.read_u32(at)?),
            ScalarType::Enum => ScalarValue::Enum(i32::from_le_bytes(self.read_array(at)?)),
            ScalarType::F32 => ScalarValue::F32(f32::from_bits(self.read_u32(at)?)),
            ScalarType::I64 => ScalarValue::I64(i64::from_le_bytes(self.read_array(at)?)),
            ScalarType::U64 => ScalarValue::U64(self.read_u64(at)?),
            ScalarType::F64 => ScalarValue::F64(f64::from_bits(self.read_u64(at)?)),
        })
    }

    /// Read the reference header at `owner`, returning `(relative offset,
    /// count)`.
    pub fn read_header(&self, owner: u32) -> Result<(u16, u16)> {
        let header: [u8; REF_HEADER_LEN as usize] = self.read_array(owner)?;
        Ok((
            u16::from_le_bytes([header[0], header[1]]),
            u16::from_le_bytes([header[2], header[3]]),
        ))
    }

    /// Resolve the reference header at `owner` to the absolute position of
    /// its segment and its count, checking that a segment of
    /// `header_len + count * elem_size` bytes lies within the buffer and
    /// after every segment resolved before it.
    pub fn read_segment(
        &mut self,
        owner: u32,
        header_len: u32,
        elem_size: u32,
    ) -> Result<(u32, u16)> {
        let (rel, count) = self.read_header(owner)?;
        if count == 0 {
            return Ok((owner, 0));
        }
        let start = owner as u64 + rel as u64;
        let end = start + header_len as u64 + count as u64 * elem_size as u64;
        ensure!(
            end <= self.buf.len() as u64,
            BufferUnderflow,
            "segment {}..{} referenced at {} outside of {} byte buffer",
            start,
            end,
            owner,
            self.buf.len(),
        );
        ensure!(
            start >= self.cursor,
            MalformedData,
            "segment {}..{} referenced at {} overlaps data before {}",
            start,
            end,
            owner,
            self.cursor,
        );
        self.cursor = end;
        Ok((start as u32, count))
    }

    /// Read the bytes of the str or bytes segment referenced at `owner`.
    pub fn read_segment_bytes(&mut self, owner: u32) -> Result<&'b [u8]> {
        let (start, count) = self.read_segment(owner, 0, 1)?;
        self.read_bytes(start, count as u32)
    }

    /// Resolve the list referenced at `owner`, returning the position of the
    /// first element and the element count.
    pub fn read_list(&mut self, owner: u32, elem_size: u32) -> Result<(u32, u16)> {
        let (start, count) = self.read_segment(owner, LIST_HEADER_LEN, elem_size)?;
        if count == 0 {
            return Ok((start, 0));
        }
        let list_count = self.read_u16(start)?;
        ensure!(
            list_count == count,
            MalformedData,
            "list header count {} disagrees with reference count {}",
            list_count,
            count,
        );
        Ok((start + LIST_HEADER_LEN, count))
    }

    /// Resolve the map referenced at `owner`, returning the position of the
    /// first entry and the entry count.
    pub fn read_map(&mut self, owner: u32, entry_size: u32) -> Result<(u32, u16)> {
        self.read_segment(owner, 0, entry_size)
    }

    /// Descend one level into a list or map.
    pub fn enter(&mut self) -> Result<()> {
        ensure!(
            self.depth < self.max_depth,
            MalformedData,
            "nesting deeper than {} levels",
            self.max_depth,
        );
        self.depth += 1;
        Ok(())
    }

    pub fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }
}
