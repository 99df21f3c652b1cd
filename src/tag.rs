//! Typed fields bound to a byte/bit offset of a record buffer.
//!
//! A [`Tag`] does not own memory: the [`Record`](crate::Record) owns the
//! buffer and hands it to the tag for every access. The tag knows where its
//! bytes live, how they are encoded, and which value it last observed.
//!
//! # Internal encoding
//!
//! - bits use a precomputed mask against their byte
//! - numeric 16/32-bit fields and floats are stored big-endian
//! - `Word16`/`Word32` are stored little-endian, so bit `n` of the word value
//!   sits in byte `n / 8` of the field, matching coupled bit offsets
//!
//! # Transfer encoding
//!
//! [`Tag::read_from`] and [`Tag::write_to`] move a value between an external
//! (wire) buffer and its canonical big-endian form using
//! [`convert_2byte`]/[`convert_4byte`]. Word fields are canonicalised as
//! unsigned big-endian numbers before conversion, so the transfer endian
//! describes how the *value* is laid out on the wire.

use std::sync::Arc;

use crate::datatype::{DataType, Endian, Value};
use crate::structure::{ByteRange, FieldDef};
use crate::utils::{bit_mask, convert_2byte, convert_4byte, get_masked, set_masked};

/// Index of a tag inside its record, resolved once at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagId(pub(crate) usize);

impl TagId {
    /// Position in declaration order.
    pub fn index(self) -> usize {
        self.0
    }
}

/// A single named, typed field bound to a record buffer.
#[derive(Debug, Clone)]
pub struct Tag {
    id: TagId,
    name: Arc<str>,
    data_type: DataType,
    offset: usize,
    mask: u8,
    cached: Value,
}

impl Tag {
    pub(crate) fn new(id: TagId, def: &FieldDef) -> Self {
        Self {
            id,
            name: Arc::from(def.name.as_str()),
            data_type: def.data_type,
            offset: def.byte_offset(),
            mask: bit_mask(def.bit_index()),
            cached: def.data_type.zero(),
        }
    }

    /// Handle of this tag.
    pub fn id(&self) -> TagId {
        self.id
    }

    /// Field name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn shared_name(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    /// Field type.
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// First byte of the field.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Length in bytes (1, 2 or 4).
    pub fn len(&self) -> usize {
        self.data_type.byte_len()
    }

    /// Always `false`; every tag covers at least one byte.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Bytes covered by the field.
    pub fn byte_range(&self) -> ByteRange {
        ByteRange::with_len(self.offset, self.len())
    }

    /// Bit mask inside the byte (meaningful for bits only).
    pub fn mask(&self) -> u8 {
        self.mask
    }

    /// Last value observed by change detection.
    pub fn cached(&self) -> Value {
        self.cached
    }

    pub(crate) fn prime(&mut self, buffer: &[u8]) {
        self.cached = self.decode(buffer);
    }

    /// Decodes the current value from the record buffer.
    pub fn decode(&self, buffer: &[u8]) -> Value {
        let o = self.offset;
        match self.data_type {
            DataType::Bit => Value::Bit(get_masked(buffer[o], self.mask)),
            DataType::Byte => Value::Byte(buffer[o]),
            DataType::Int16 => Value::Int16(i16::from_be_bytes([buffer[o], buffer[o + 1]])),
            DataType::UInt16 => Value::UInt16(u16::from_be_bytes([buffer[o], buffer[o + 1]])),
            DataType::Word16 => Value::Word16(u16::from_le_bytes([buffer[o], buffer[o + 1]])),
            DataType::Int32 => Value::Int32(i32::from_be_bytes(quad(buffer, o))),
            DataType::UInt32 => Value::UInt32(u32::from_be_bytes(quad(buffer, o))),
            DataType::Word32 => Value::Word32(u32::from_le_bytes(quad(buffer, o))),
            DataType::Float32 => Value::Float32(f32::from_be_bytes(quad(buffer, o))),
        }
    }

    /// Encodes `value` into the record buffer. `value` must already be of
    /// this tag's type; mismatched variants are ignored.
    pub(crate) fn encode(&self, buffer: &mut [u8], value: Value) {
        let o = self.offset;
        match (self.data_type, value) {
            (DataType::Bit, Value::Bit(v)) => buffer[o] = set_masked(buffer[o], self.mask, v),
            (DataType::Byte, Value::Byte(v)) => buffer[o] = v,
            (DataType::Int16, Value::Int16(v)) => buffer[o..o + 2].copy_from_slice(&v.to_be_bytes()),
            (DataType::UInt16, Value::UInt16(v)) => {
                buffer[o..o + 2].copy_from_slice(&v.to_be_bytes())
            }
            (DataType::Word16, Value::Word16(v)) => {
                buffer[o..o + 2].copy_from_slice(&v.to_le_bytes())
            }
            (DataType::Int32, Value::Int32(v)) => buffer[o..o + 4].copy_from_slice(&v.to_be_bytes()),
            (DataType::UInt32, Value::UInt32(v)) => {
                buffer[o..o + 4].copy_from_slice(&v.to_be_bytes())
            }
            (DataType::Word32, Value::Word32(v)) => {
                buffer[o..o + 4].copy_from_slice(&v.to_le_bytes())
            }
            (DataType::Float32, Value::Float32(v)) => {
                buffer[o..o + 4].copy_from_slice(&v.to_be_bytes())
            }
            (ty, v) => tracing::debug!(tag = %self.name, %ty, value = ?v, "type mismatch on encode"),
        }
    }

    /// Re-reads the buffer and compares with the cached value. Returns
    /// `(old, new)` and updates the cache only when they differ.
    pub(crate) fn check_change(&mut self, buffer: &[u8]) -> Option<(Value, Value)> {
        let current = self.decode(buffer);
        if current.same_as(&self.cached) {
            return None;
        }
        let old = std::mem::replace(&mut self.cached, current);
        Some((old, current))
    }

    /// Decodes this field from an external buffer laid out in `endian`.
    ///
    /// The external buffer is indexed with the same offsets as the record.
    /// Bits ignore `endian`.
    pub fn read_from(&self, external: &[u8], endian: Endian) -> Value {
        let o = self.offset;
        match self.data_type {
            DataType::Bit => Value::Bit(get_masked(external[o], self.mask)),
            DataType::Byte => Value::Byte(external[o]),
            DataType::Int16 | DataType::UInt16 | DataType::Word16 => {
                let canonical = convert_2byte([external[o], external[o + 1]], endian);
                match self.data_type {
                    DataType::Int16 => Value::Int16(i16::from_be_bytes(canonical)),
                    DataType::UInt16 => Value::UInt16(u16::from_be_bytes(canonical)),
                    _ => Value::Word16(u16::from_be_bytes(canonical)),
                }
            }
            DataType::Int32 | DataType::UInt32 | DataType::Word32 | DataType::Float32 => {
                let canonical = convert_4byte(quad(external, o), endian);
                match self.data_type {
                    DataType::Int32 => Value::Int32(i32::from_be_bytes(canonical)),
                    DataType::UInt32 => Value::UInt32(u32::from_be_bytes(canonical)),
                    DataType::Word32 => Value::Word32(u32::from_be_bytes(canonical)),
                    _ => Value::Float32(f32::from_be_bytes(canonical)),
                }
            }
        }
    }

    /// Encodes the field's current value from `buffer` into `external`
    /// using the wire order `endian`.
    pub fn write_to(&self, buffer: &[u8], external: &mut [u8], endian: Endian) {
        let o = self.offset;
        match self.decode(buffer) {
            Value::Bit(v) => external[o] = set_masked(external[o], self.mask, v),
            Value::Byte(v) => external[o] = v,
            Value::Int16(v) => put(external, o, &convert_2byte(v.to_be_bytes(), endian)),
            Value::UInt16(v) | Value::Word16(v) => {
                put(external, o, &convert_2byte(v.to_be_bytes(), endian))
            }
            Value::Int32(v) => put(external, o, &convert_4byte(v.to_be_bytes(), endian)),
            Value::UInt32(v) | Value::Word32(v) => {
                put(external, o, &convert_4byte(v.to_be_bytes(), endian))
            }
            Value::Float32(v) => put(external, o, &convert_4byte(v.to_be_bytes(), endian)),
        }
    }
}

#[inline]
fn quad(buffer: &[u8], o: usize) -> [u8; 4] {
    [buffer[o], buffer[o + 1], buffer[o + 2], buffer[o + 3]]
}

#[inline]
fn put(external: &mut [u8], o: usize, bytes: &[u8]) {
    external[o..o + bytes.len()].copy_from_slice(bytes);
}
