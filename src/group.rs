//! Field groups: coalesced, endian-aware transfer of a subset of a record.
//!
//! A [`FieldGroup`] keeps its members' byte ranges as a sorted list of
//! disjoint areas. Touching ranges merge, so a group of consecutive fields
//! costs one device write. Boolean sub-fields are transferred through their
//! combined parent word, which keeps every bit in the word in sync.

use crate::datatype::DataType;
use crate::error::{BuildError, Error, Result};
use crate::record::{IoWindow, Record};
use crate::structure::ByteRange;
use crate::tag::TagId;

/// A subset of a record's fields transferred together.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldGroup {
    record: String,
    window: IoWindow,
    fields: Vec<TagId>,
    units: Vec<TagId>,
    areas: Vec<ByteRange>,
}

impl FieldGroup {
    pub(crate) fn new(record: &str, window: IoWindow) -> Self {
        Self {
            record: record.to_string(),
            window,
            fields: Vec::new(),
            units: Vec::new(),
            areas: Vec::new(),
        }
    }

    /// Name of the record this group belongs to.
    pub fn record_name(&self) -> &str {
        &self.record
    }

    /// Fields as added.
    pub fn fields(&self) -> &[TagId] {
        &self.fields
    }

    /// Merged transfer areas, sorted by start offset.
    pub fn areas(&self) -> &[ByteRange] {
        &self.areas
    }

    /// Adds fields by name.
    ///
    /// # Errors
    ///
    /// `UnknownField`, `RangeOutOfWindow`, or `OverlapField` when a range
    /// partially overlaps an existing area.
    pub fn add<'a>(
        &mut self,
        record: &Record,
        names: impl IntoIterator<Item = &'a str>,
    ) -> Result<()> {
        for name in names {
            let id = record.require(name)?;
            if self.fields.contains(&id) {
                continue;
            }
            let unit = transfer_unit(record, id);
            let tag = record.tag(unit);
            let range = tag.byte_range();
            if !self.window.range().contains(&range) {
                return Err(BuildError::RangeOutOfWindow {
                    record: self.record.clone(),
                    start: range.start,
                    end: range.end,
                });
            }
            let lenient = record.tag(id).data_type() == DataType::Bit;
            self.insert_area(range, lenient, name)?;
            self.fields.push(id);
            if !self.units.contains(&unit) {
                self.units.push(unit);
            }
        }
        Ok(())
    }

    fn insert_area(&mut self, range: ByteRange, lenient: bool, name: &str) -> Result<()> {
        let pos = self.areas.partition_point(|a| a.end < range.start);
        let mut end = pos;
        let mut merged = range;
        while end < self.areas.len() && self.areas[end].start <= range.end {
            let area = self.areas[end];
            let touching = area.end == range.start || area.start == range.end;
            let nested = area.contains(&range) || range.contains(&area);
            if !touching && !nested && !lenient {
                return Err(BuildError::overlap_field(
                    name,
                    format!("area {}", area),
                    range.start,
                ));
            }
            merged.start = merged.start.min(area.start);
            merged.end = merged.end.max(area.end);
            end += 1;
        }
        self.areas.splice(pos..end, [merged]);
        Ok(())
    }

    /// Reads the record window and decodes every member into the record.
    ///
    /// Each member is decoded with the window's endian for its type and then
    /// change-checked, so a combined word also notifies its changed bits.
    ///
    /// # Errors
    ///
    /// Returns the device error. On failure no field is touched.
    ///
    /// # Example
    ///
    /// ```
    /// use std::sync::Arc;
    /// use pipeline_interlock::{
    ///     DataType, Endian, FieldSpec, IoWindow, Record, SimulatedPlc, Structure, Value,
    /// };
    ///
    /// let structure = Structure::build("meter", &[
    ///     FieldSpec::new("flow", DataType::Float32, 0),
    ///     FieldSpec::new("total", DataType::UInt32, 32),
    /// ]).unwrap();
    /// let plc = SimulatedPlc::new(16);
    /// plc.poke(0, &[0x00, 0x00, 0x48, 0x42]);
    ///
    /// let mut record = Record::new(Arc::new(structure), "meter-1");
    /// record
    ///     .set_io(plc.shared(), IoWindow::new(0, 0, 8).with_endian(Endian::LE))
    ///     .unwrap();
    /// let group = record.create_group(["flow"]).unwrap();
    /// group.read(&mut record).unwrap();
    /// assert_eq!(record.get_by_name("flow").unwrap(), Value::Float32(50.0));
    /// ```
    pub fn read(&self, record: &mut Record) -> std::result::Result<(), Error> {
        debug_assert_eq!(record.name(), self.record);
        record.io_read_all()?;
        for &unit in &self.units {
            let endian = self.window.endian_for(record.tag(unit).data_type());
            record.load_from_io(unit, endian);
        }
        Ok(())
    }

    /// Encodes every member and writes each merged area.
    ///
    /// One device write is issued per merged area, never per field.
    ///
    /// # Errors
    ///
    /// All areas are attempted; the first failure is returned.
    ///
    /// # Example
    ///
    /// ```
    /// use std::sync::Arc;
    /// use pipeline_interlock::{DataType, FieldSpec, IoWindow, Record, SimulatedPlc, Structure};
    ///
    /// let structure = Structure::build("setpoints", &[
    ///     FieldSpec::new("low", DataType::UInt16, 0),
    ///     FieldSpec::new("high", DataType::UInt16, 16),
    ///     FieldSpec::new("spare", DataType::UInt16, 32),
    ///     FieldSpec::new("mode", DataType::UInt16, 48),
    /// ]).unwrap();
    /// let plc = SimulatedPlc::new(8);
    /// let mut record = Record::new(Arc::new(structure), "sp");
    /// record.set_io(plc.shared(), IoWindow::new(0, 0, 8)).unwrap();
    ///
    /// record.set_by_name("low", 10).unwrap();
    /// record.set_by_name("high", 90).unwrap();
    /// let group = record.create_group(["low", "high", "mode"]).unwrap();
    /// group.write(&mut record).unwrap();
    ///
    /// assert_eq!(plc.writes(), vec![(0, vec![0, 10, 0, 90]), (6, vec![0, 0])]);
    /// ```
    pub fn write(&self, record: &mut Record) -> std::result::Result<(), Error> {
        debug_assert_eq!(record.name(), self.record);
        for &unit in &self.units {
            let endian = self.window.endian_for(record.tag(unit).data_type());
            record.store_to_io(unit, endian);
        }
        let mut result = Ok(());
        for &area in &self.areas {
            if let Err(e) = record.io_write(area) {
                tracing::warn!(record = %self.record, %area, error = %e, "group write failed");
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    /// Copies every member with a same-named field in `other` into `record`.
    ///
    /// Returns how many fields were copied.
    pub fn copy_from(&self, record: &mut Record, other: &Record) -> usize {
        let mut copied = 0;
        for &id in &self.fields {
            let tag = record.tag(id);
            let Some(src) = other.tag_id(tag.name()) else {
                continue;
            };
            match record.set(id, other.get(src)) {
                Ok(_) => copied += 1,
                Err(e) => tracing::warn!(record = %self.record, error = %e, "copy skipped"),
            }
        }
        copied
    }
}

/// Bits nested in a combined word travel with the word.
fn transfer_unit(record: &Record, id: TagId) -> TagId {
    if record.tag(id).data_type() != DataType::Bit {
        return id;
    }
    record
        .structure()
        .fields()
        .get(id.index())
        .and_then(|def| def.parent)
        .filter(|&p| record.tags()[p].data_type().is_combined())
        .map_or(id, |p| record.tags()[p].id())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::{Endian, Value};
    use crate::error::IoError;
    use crate::record::RecordEvent;
    use crate::structure::{FieldSpec, Structure};
    use std::cell::RefCell;
    use std::rc::Rc;
    use crate::transport::SimulatedPlc;
    use std::sync::Arc;

    fn structure() -> Arc<Structure> {
        Arc::new(
            Structure::build(
                "g",
                &[
                    FieldSpec::new("a", DataType::UInt16, 0),
                    FieldSpec::new("b", DataType::UInt16, 16),
                    FieldSpec::new("flags", DataType::Word16, 32).with_coupling(vec![
                        FieldSpec::new("f0", DataType::Bit, 0),
                        FieldSpec::new("f1", DataType::Bit, 1),
                        FieldSpec::new("f9", DataType::Bit, 9),
                    ]),
                    FieldSpec::new("x", DataType::Byte, 48),
                    FieldSpec::new("y", DataType::Byte, 56),
                    FieldSpec::new("flow", DataType::Float32, 64),
                    FieldSpec::new("total", DataType::Int32, 96),
                ],
            )
            .unwrap(),
        )
    }

    fn bound(window: IoWindow) -> (Record, SimulatedPlc) {
        let plc = SimulatedPlc::new(64);
        let mut record = Record::new(structure(), "rec");
        record.set_io(plc.shared(), window).unwrap();
        (record, plc)
    }

    #[test]
    fn test_touching_ranges_merge() {
        let (record, _) = bound(IoWindow::new(0, 0, 16));
        let group = record.create_group(["a", "b"]).unwrap();
        assert_eq!(group.areas(), [ByteRange::new(0, 4)]);
    }

    #[test]
    fn test_gap_keeps_areas_apart_then_fills() {
        let (record, _) = bound(IoWindow::new(0, 0, 16));
        let mut group = record.create_group(["a", "flow"]).unwrap();
        assert_eq!(group.areas(), [ByteRange::new(0, 2), ByteRange::new(8, 12)]);
        group.add(&record, ["flags", "x", "b"]).unwrap();
        assert_eq!(group.areas(), [ByteRange::new(0, 7), ByteRange::new(8, 12)]);
        group.add(&record, ["total"]).unwrap();
        assert_eq!(group.areas(), [ByteRange::new(0, 7), ByteRange::new(8, 16)]);
    }

    #[test]
    fn test_bits_of_same_word_accepted() {
        let (record, _) = bound(IoWindow::new(0, 0, 16));
        let group = record.create_group(["f0", "f1", "f9", "flags"]).unwrap();
        assert_eq!(group.areas(), [ByteRange::new(4, 6)]);
        assert_eq!(group.fields().len(), 4);
    }

    #[test]
    fn test_partial_overlap_rejected() {
        let (record, _) = bound(IoWindow::new(0, 0, 16));
        let mut group = record.create_group(["a"]).unwrap();
        let err = group
            .insert_area(ByteRange::new(1, 3), false, "z")
            .unwrap_err();
        assert!(matches!(err, BuildError::OverlapField { .. }));
        group.insert_area(ByteRange::new(0, 1), false, "z").unwrap();
        assert_eq!(group.areas(), [ByteRange::new(0, 2)]);
    }

    #[test]
    fn test_field_outside_window_rejected() {
        let (record, _) = bound(IoWindow::new(0, 0, 8));
        assert!(matches!(
            record.create_group(["flow"]),
            Err(BuildError::RangeOutOfWindow { .. })
        ));
        assert!(matches!(
            record.create_group(["nope"]),
            Err(BuildError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_read_applies_endians() {
        let window = IoWindow::new(0, 10, 16)
            .with_endian(Endian::LEBS)
            .with_combined_endian(Endian::BE);
        let (mut record, plc) = bound(window);
        let group = record.create_group(["a", "flags", "flow"]).unwrap();

        plc.poke(10, &[0x12, 0x34]);
        plc.poke(14, &[0x02, 0x01]);
        plc.poke(18, &3.5f32.to_be_bytes()[2..]);
        plc.poke(20, &3.5f32.to_be_bytes()[..2]);
        group.read(&mut record).unwrap();

        assert_eq!(record.get_by_name("a").unwrap(), Value::UInt16(0x1234));
        assert_eq!(record.get_by_name("flags").unwrap(), Value::Word16(0x0201));
        assert!(record.get_by_name("f0").unwrap().as_bool());
        assert!(record.get_by_name("f9").unwrap().as_bool());
        assert_eq!(record.get_by_name("flow").unwrap(), Value::Float32(3.5));
    }

    #[test]
    fn test_word_read_notifies_changed_bits() {
        let (mut record, plc) = bound(IoWindow::new(0, 0, 16));
        let group = record.create_group(["flags"]).unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        record
            .subscribe(move |_, event| {
                if let RecordEvent::Changed(c) = event {
                    sink.borrow_mut().push(c.field.to_string());
                }
            })
            .unwrap();

        plc.poke(4, &[0x02, 0x03]);
        group.read(&mut record).unwrap();
        assert_eq!(*seen.borrow(), ["flags", "f0", "f1", "f9"]);

        seen.borrow_mut().clear();
        group.read(&mut record).unwrap();
        assert!(seen.borrow().is_empty());

        plc.poke(4, &[0x02, 0x01]);
        group.read(&mut record).unwrap();
        assert_eq!(*seen.borrow(), ["flags", "f1"]);
    }

    #[test]
    fn test_failed_read_leaves_fields() {
        let (mut record, plc) = bound(IoWindow::new(0, 0, 16));
        let group = record.create_group(["a"]).unwrap();
        plc.poke(0, &[0xFF, 0xFF]);
        plc.set_online(false);
        assert_eq!(group.read(&mut record), Err(Error::Io(IoError::NotConnected)));
        assert_eq!(record.get_by_name("a").unwrap(), Value::UInt16(0));
    }

    #[test]
    fn test_write_one_io_per_area() {
        let (mut record, plc) = bound(IoWindow::new(0, 0, 16).with_endian(Endian::LE));
        let group = record.create_group(["a", "b", "total"]).unwrap();
        record.set_by_name("a", Value::UInt16(0x0102)).unwrap();
        record.set_by_name("b", Value::UInt16(0x0304)).unwrap();
        record.set_by_name("total", Value::Int32(-2)).unwrap();
        group.write(&mut record).unwrap();

        let writes = plc.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].0, 0);
        assert_eq!(hex::encode(&writes[0].1), "02010403");
        assert_eq!(writes[1].0, 12);
        assert_eq!(hex::encode(&writes[1].1), "feffffff");
    }

    #[test]
    fn test_write_reports_failure() {
        let (mut record, plc) = bound(IoWindow::new(0, 0, 16));
        let group = record.create_group(["a", "flow"]).unwrap();
        plc.fail_writes(true);
        assert!(group.write(&mut record).is_err());
    }

    #[test]
    fn test_copy_from_same_named_fields() {
        let (mut record, _) = bound(IoWindow::new(0, 0, 16));
        let group = record.create_group(["a", "flow"]).unwrap();
        let other_structure = Arc::new(
            Structure::build(
                "defaults",
                &[FieldSpec::new("flow", DataType::Float32, 0).with_init(Value::Float32(7.5))],
            )
            .unwrap(),
        );
        let defaults = Record::new(other_structure, "defaults");
        assert_eq!(group.copy_from(&mut record, &defaults), 1);
        assert_eq!(record.get_by_name("flow").unwrap(), Value::Float32(7.5));
    }
}
