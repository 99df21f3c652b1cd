//! Server-side register map.
//!
//! Exposes records to Modbus/S7 style servers. Each record is attached at a
//! unit identifier and a base register; register `base + i` covers record
//! bytes `2i..2i+2`. Registers inside combined (`Word16`/`Word32`) fields
//! are little-endian, matching how those fields are stored; every other
//! register is big-endian.
//!
//! | Register content | Byte order |
//! |------------------|------------|
//! | numeric field    | `hi lo` |
//! | combined field   | `lo hi` |
//!
//! Coils start at `base * 16`; coil `base * 16 + n` is bit `n % 8` of record
//! byte `n / 8`.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use pipeline_interlock::{DataType, FieldSpec, Record, RegisterMap, Structure, Value};
//!
//! let structure = Structure::build("s", &[
//!     FieldSpec::new("level", DataType::UInt16, 0).with_init(0x0102u32),
//!     FieldSpec::new("bits", DataType::Word16, 16).with_init(Value::Word16(0x0304)),
//! ]).unwrap();
//! let records = vec![Record::new(Arc::new(structure), "s")];
//!
//! let mut map = RegisterMap::new();
//! map.attach(1, 100, 0usize, &records[0]).unwrap();
//! assert_eq!(map.read_registers(&records, 1, 100, 2).unwrap(), vec![0x0102, 0x0304]);
//! ```

use std::fmt::Debug;

use crate::error::{BuildError, Error, IoError, Result};
use crate::record::Record;

/// Lookup of records by key.
pub trait RecordSource<K> {
    /// Record behind `key`.
    fn record(&self, key: &K) -> Option<&Record>;

    /// Mutable record behind `key`.
    fn record_mut(&mut self, key: &K) -> Option<&mut Record>;
}

impl RecordSource<usize> for Vec<Record> {
    fn record(&self, key: &usize) -> Option<&Record> {
        self.get(*key)
    }

    fn record_mut(&mut self, key: &usize) -> Option<&mut Record> {
        self.get_mut(*key)
    }
}

#[derive(Debug, Clone)]
struct Attachment<K> {
    unit: u8,
    base: u16,
    key: K,
    record: String,
    bytes: usize,
    combined: Vec<bool>,
}

impl<K> Attachment<K> {
    fn registers(&self) -> usize {
        self.bytes.div_ceil(2)
    }

    fn end(&self) -> usize {
        self.base as usize + self.registers()
    }
}

/// Register and coil address translation for attached records.
#[derive(Debug, Clone)]
pub struct RegisterMap<K> {
    attachments: Vec<Attachment<K>>,
}

impl<K> Default for RegisterMap<K> {
    fn default() -> Self {
        Self {
            attachments: Vec::new(),
        }
    }
}

impl<K: Clone + Debug> RegisterMap<K> {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches `record` (found later through `key`) at `base_register` of `unit`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the registers overlap another attachment
    /// of the same unit or run past the 16-bit address space.
    pub fn attach(&mut self, unit: u8, base_register: u16, key: K, record: &Record) -> Result<()> {
        let bytes = record.buffer().len();
        let mut combined = vec![false; bytes.div_ceil(2)];
        for tag in record.tags() {
            if tag.data_type().is_combined() {
                let range = tag.byte_range();
                for reg in (range.start / 2)..range.end.div_ceil(2) {
                    combined[reg] = true;
                }
            }
        }
        let entry = Attachment {
            unit,
            base: base_register,
            key,
            record: record.name().to_string(),
            bytes,
            combined,
        };
        if entry.end() > usize::from(u16::MAX) + 1 {
            return Err(BuildError::invalid_config(format!(
                "record '{}' does not fit above register {}",
                entry.record, base_register
            )));
        }
        if let Some(other) = self.attachments.iter().find(|a| {
            a.unit == unit && (a.base as usize) < entry.end() && (entry.base as usize) < a.end()
        }) {
            return Err(BuildError::invalid_config(format!(
                "record '{}' overlaps '{}' on unit {}",
                entry.record, other.record, unit
            )));
        }
        tracing::debug!(unit, base = base_register, record = %entry.record, "attached");
        self.attachments.push(entry);
        Ok(())
    }

    /// Number of attached records.
    pub fn len(&self) -> usize {
        self.attachments.len()
    }

    /// Whether nothing is attached.
    pub fn is_empty(&self) -> bool {
        self.attachments.is_empty()
    }

    fn find(&self, unit: u8, start: usize, end: usize) -> std::result::Result<&Attachment<K>, IoError> {
        self.attachments
            .iter()
            .find(|a| a.unit == unit && a.base as usize <= start && end <= a.end())
            .ok_or(IoError::OutOfRange { start, end })
    }

    /// Reads `count` holding registers.
    pub fn read_registers<S: RecordSource<K>>(
        &self,
        source: &S,
        unit: u8,
        address: u16,
        count: u16,
    ) -> std::result::Result<Vec<u16>, Error> {
        let start = address as usize;
        let entry = self.find(unit, start, start + count as usize)?;
        let record = lookup(source, &entry.key)?;
        let buffer = record.buffer();
        let first = start - entry.base as usize;
        Ok((first..first + count as usize)
            .map(|reg| {
                let hi = buffer.get(2 * reg).copied().unwrap_or(0);
                let lo = buffer.get(2 * reg + 1).copied().unwrap_or(0);
                if entry.combined[reg] {
                    u16::from_le_bytes([hi, lo])
                } else {
                    u16::from_be_bytes([hi, lo])
                }
            })
            .collect())
    }

    /// Writes holding registers, then re-checks every touched field.
    pub fn write_registers<S: RecordSource<K>>(
        &self,
        source: &mut S,
        unit: u8,
        address: u16,
        values: &[u16],
    ) -> std::result::Result<(), Error> {
        let start = address as usize;
        let entry = self.find(unit, start, start + values.len())?;
        let first = start - entry.base as usize;
        let mut bytes = Vec::with_capacity(values.len() * 2);
        for (i, value) in values.iter().enumerate() {
            if entry.combined[first + i] {
                bytes.extend_from_slice(&value.to_le_bytes());
            } else {
                bytes.extend_from_slice(&value.to_be_bytes());
            }
        }
        // odd-length records expose a padded last register
        bytes.truncate(entry.bytes.saturating_sub(first * 2));
        let record = lookup_mut(source, &entry.key)?;
        record.write_bytes(first * 2, &bytes)?;
        Ok(())
    }

    /// Reads `count` coils.
    pub fn read_coils<S: RecordSource<K>>(
        &self,
        source: &S,
        unit: u8,
        address: u16,
        count: u16,
    ) -> std::result::Result<Vec<bool>, Error> {
        let (entry, first) = self.find_coils(unit, address as usize, count as usize)?;
        let buffer = lookup(source, &entry.key)?.buffer();
        Ok((first..first + count as usize)
            .map(|bit| buffer[bit / 8] & (1 << (bit % 8)) != 0)
            .collect())
    }

    /// Writes one coil.
    pub fn write_coil<S: RecordSource<K>>(
        &self,
        source: &mut S,
        unit: u8,
        address: u16,
        value: bool,
    ) -> std::result::Result<(), Error> {
        let (entry, bit) = self.find_coils(unit, address as usize, 1)?;
        let record = lookup_mut(source, &entry.key)?;
        let byte = crate::utils::set_masked(
            record.buffer()[bit / 8],
            crate::utils::bit_mask((bit % 8) as u8),
            value,
        );
        record.write_bytes(bit / 8, &[byte])?;
        Ok(())
    }

    /// Coils are addressed from the unit's base register times 16.
    fn find_coils(
        &self,
        unit: u8,
        address: usize,
        count: usize,
    ) -> std::result::Result<(&Attachment<K>, usize), IoError> {
        self.attachments
            .iter()
            .filter(|a| a.unit == unit)
            .find_map(|a| {
                let base = a.base as usize * 16;
                let first = address.checked_sub(base)?;
                (first + count <= a.bytes * 8).then_some((a, first))
            })
            .ok_or(IoError::OutOfRange {
                start: address,
                end: address + count,
            })
    }
}

fn lookup<'a, K: Debug, S: RecordSource<K>>(source: &'a S, key: &K) -> Result<&'a Record> {
    source
        .record(key)
        .ok_or_else(|| BuildError::unknown_entity("record", format!("{:?}", key)))
}

fn lookup_mut<'a, K: Debug, S: RecordSource<K>>(
    source: &'a mut S,
    key: &K,
) -> Result<&'a mut Record> {
    source
        .record_mut(key)
        .ok_or_else(|| BuildError::unknown_entity("record", format!("{:?}", key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::{DataType, Value};
    use crate::record::RecordEvent;
    use crate::structure::{FieldSpec, Structure};
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::Arc;

    fn records() -> Vec<Record> {
        let s = Structure::build(
            "s",
            &[
                FieldSpec::new("level", DataType::UInt16, 0),
                FieldSpec::new("state", DataType::Word16, 16).with_coupling(vec![
                    FieldSpec::new("run", DataType::Bit, 0),
                    FieldSpec::new("fault", DataType::Bit, 8),
                ]),
                FieldSpec::new("total", DataType::Int32, 32),
                FieldSpec::new("mask", DataType::Word32, 64),
            ],
        )
        .unwrap();
        vec![Record::new(Arc::new(s), "s")]
    }

    fn map(records: &[Record]) -> RegisterMap<usize> {
        let mut map = RegisterMap::new();
        map.attach(1, 10, 0, &records[0]).unwrap();
        map
    }

    #[test]
    fn test_read_mixed_byte_orders() {
        let mut records = records();
        let map = map(&records);
        records[0].set_by_name("level", Value::UInt16(0xA1B2)).unwrap();
        records[0].set_by_name("state", Value::Word16(0x0101)).unwrap();
        records[0].set_by_name("total", Value::Int32(0x0102_0304)).unwrap();
        records[0].set_by_name("mask", Value::Word32(0x1122_3344)).unwrap();

        let regs = map.read_registers(&records, 1, 10, 6).unwrap();
        assert_eq!(regs, vec![0xA1B2, 0x0101, 0x0102, 0x0304, 0x3344, 0x1122]);
    }

    #[test]
    fn test_write_registers_fires_changes() {
        let mut records = records();
        let map = map(&records);
        let changed = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&changed);
        records[0]
            .subscribe(move |_, e| {
                if let RecordEvent::Changed(c) = e {
                    sink.borrow_mut().push(c.field.to_string());
                }
            })
            .unwrap();

        map.write_registers(&mut records, 1, 11, &[0x0100]).unwrap();
        assert_eq!(records[0].get_by_name("state").unwrap(), Value::Word16(0x0100));
        assert_eq!(*changed.borrow(), ["state", "fault"]);
    }

    #[test]
    fn test_out_of_range() {
        let records = records();
        let map = map(&records);
        assert_eq!(
            map.read_registers(&records, 1, 14, 3),
            Err(Error::Io(IoError::OutOfRange { start: 14, end: 17 }))
        );
        assert!(map.read_registers(&records, 2, 10, 1).is_err());
    }

    #[test]
    fn test_overlapping_attach_rejected() {
        let records = records();
        let mut map = map(&records);
        assert!(map.attach(1, 15, 0, &records[0]).is_err());
        map.attach(1, 16, 0, &records[0]).unwrap();
        map.attach(2, 10, 0, &records[0]).unwrap();
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn test_coils() {
        let mut records = records();
        let map = map(&records);
        // state low byte starts at record byte 2 -> coil 16 from the base
        map.write_coil(&mut records, 1, 160 + 16, true).unwrap();
        assert!(records[0].get_by_name("run").unwrap().as_bool());
        let coils = map.read_coils(&records, 1, 160 + 16, 9).unwrap();
        assert_eq!(coils, [true, false, false, false, false, false, false, false, false]);
        assert!(map.read_coils(&records, 1, 0, 1).is_err());
    }
}
