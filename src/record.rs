//! Record instances: one buffer, its tags, change notification and I/O binding.
//!
//! A [`Record`] is an instance of a [`Structure`]. It owns the primary buffer
//! holding every field, an I/O staging buffer of the same size used for
//! transfers with a remote device, and one [`Tag`] per flattened field.
//!
//! # Change notification
//!
//! Every write goes through change detection: the new value is committed to
//! the buffer first, then the tag compares it with its cached value and, if
//! different, the record notifies its observers with a [`Change`]. A change
//! also re-checks every coupled field, so writing a bit re-evaluates its
//! parent word and writing a word re-evaluates each of its bits.
//!
//! Observers run synchronously, in registration order, and receive the
//! record itself so they can read sibling fields.
//!
//! # Example
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use std::sync::Arc;
//! use pipeline_interlock::{DataType, FieldSpec, Record, RecordEvent, Structure, Value};
//!
//! let structure = Structure::build("valve", &[
//!     FieldSpec::new("status", DataType::Word16, 0)
//!         .with_coupling(vec![FieldSpec::new("open", DataType::Bit, 0)]),
//! ]).unwrap();
//! let mut record = Record::new(Arc::new(structure), "valve-1");
//!
//! let seen = Rc::new(RefCell::new(Vec::new()));
//! let sink = Rc::clone(&seen);
//! record.subscribe(move |_, event| {
//!     if let RecordEvent::Changed(change) = event {
//!         sink.borrow_mut().push(change.field.to_string());
//!     }
//! }).unwrap();
//!
//! let open = record.tag_id("open").unwrap();
//! record.set_bool(open, true);
//! assert_eq!(*seen.borrow(), ["open", "status"]);
//! assert_eq!(record.get_by_name("status").unwrap(), Value::Word16(1));
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::datatype::{DataType, Endian, Value};
use crate::error::{BuildError, Error, IoError, Result};
use crate::group::FieldGroup;
use crate::structure::{ByteRange, Structure};
use crate::tag::{Tag, TagId};
use crate::transport::SharedDevice;

/// Maximum number of observers per record.
pub const MAX_OBSERVERS: usize = 16;

/// A committed field change.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    /// Tag that changed.
    pub tag: TagId,
    /// Field name.
    pub field: Arc<str>,
    /// Previously observed value.
    pub old: Value,
    /// Value now in the buffer.
    pub new: Value,
}

/// Notification delivered to record observers.
#[derive(Debug, Clone, Copy)]
pub enum RecordEvent<'a> {
    /// A field changed.
    Changed(&'a Change),
    /// Fresh data landed in the I/O staging buffer.
    Data(ByteRange),
}

type Observer = Box<dyn FnMut(&Record, &RecordEvent<'_>)>;

/// Device window bound to a record.
///
/// `start`/`length` locate the window in the record buffer; `remote_start`
/// is the matching byte address on the device. `endian` applies to numeric
/// fields and `combined_endian` to `Word16`/`Word32` fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoWindow {
    /// First record byte covered by the window.
    #[serde(default)]
    pub start: usize,
    /// Device byte address matching `start`.
    #[serde(default)]
    pub remote_start: usize,
    /// Window length in bytes.
    pub length: usize,
    /// Wire order for numeric fields.
    #[serde(default)]
    pub endian: Endian,
    /// Wire order for combined (word) fields.
    #[serde(default)]
    pub combined_endian: Endian,
}

impl IoWindow {
    /// Creates a window with big-endian transfer for every field type.
    pub fn new(start: usize, remote_start: usize, length: usize) -> Self {
        Self {
            start,
            remote_start,
            length,
            endian: Endian::BE,
            combined_endian: Endian::BE,
        }
    }

    /// Sets the wire order for numeric fields.
    pub fn with_endian(mut self, endian: Endian) -> Self {
        self.endian = endian;
        self
    }

    /// Sets the wire order for combined fields.
    pub fn with_combined_endian(mut self, endian: Endian) -> Self {
        self.combined_endian = endian;
        self
    }

    /// Record bytes covered by the window.
    pub fn range(&self) -> ByteRange {
        ByteRange::with_len(self.start, self.length)
    }

    /// Wire order for a field of type `ty`.
    pub fn endian_for(&self, ty: DataType) -> Endian {
        if ty.is_combined() {
            self.combined_endian
        } else {
            self.endian
        }
    }
}

struct IoBinding {
    device: SharedDevice,
    window: IoWindow,
}

/// A typed record backed by one buffer.
pub struct Record {
    name: String,
    structure: Arc<Structure>,
    buffer: Vec<u8>,
    io_buffer: Vec<u8>,
    tags: Vec<Tag>,
    coupling: Vec<Vec<TagId>>,
    observers: Vec<Observer>,
    io: Option<IoBinding>,
}

impl Record {
    /// Instantiates `structure`, writing every field's initial value.
    pub fn new(structure: Arc<Structure>, name: impl Into<String>) -> Self {
        let size = structure.byte_length();
        let mut buffer = vec![0u8; size];
        let mut tags = Vec::with_capacity(structure.fields().len());
        let mut coupling = Vec::with_capacity(structure.fields().len());

        for (i, def) in structure.fields().iter().enumerate() {
            let tag = Tag::new(TagId(i), def);
            tag.encode(&mut buffer, def.init_value);
            tags.push(tag);
            coupling.push(def.coupling.iter().map(|&c| TagId(c)).collect());
        }
        for tag in &mut tags {
            tag.prime(&buffer);
        }

        Self {
            name: name.into(),
            structure,
            io_buffer: vec![0u8; size],
            buffer,
            tags,
            coupling,
            observers: Vec::new(),
            io: None,
        }
    }

    /// Instantiates `structure` and overrides some initial values by name.
    ///
    /// # Errors
    ///
    /// Returns `UnknownField` or `InvalidValue` for a bad initializer.
    pub fn with_values<'a>(
        structure: Arc<Structure>,
        name: impl Into<String>,
        values: impl IntoIterator<Item = (&'a str, Value)>,
    ) -> Result<Self> {
        let mut record = Self::new(structure, name);
        for (field, value) in values {
            let id = record.require(field)?;
            let value = value.coerce(record.tags[id.0].data_type(), field)?;
            record.tags[id.0].encode(&mut record.buffer, value);
        }
        for tag in &mut record.tags {
            tag.prime(&record.buffer);
        }
        Ok(record)
    }

    /// Record name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Layout of this record.
    pub fn structure(&self) -> &Arc<Structure> {
        &self.structure
    }

    /// Primary buffer.
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// I/O staging buffer.
    pub fn io_buffer(&self) -> &[u8] {
        &self.io_buffer
    }

    /// All tags in declaration order.
    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    /// Tag by handle.
    pub fn tag(&self, id: TagId) -> &Tag {
        &self.tags[id.0]
    }

    /// Resolves a field name to its handle.
    pub fn tag_id(&self, field: &str) -> Option<TagId> {
        self.structure.position(field).map(TagId)
    }

    /// Resolves a field name, failing with `UnknownField`.
    pub fn require(&self, field: &str) -> Result<TagId> {
        self.tag_id(field)
            .ok_or_else(|| BuildError::unknown_field(&self.name, field))
    }

    /// Fields coupled to `id`.
    pub fn coupled(&self, id: TagId) -> &[TagId] {
        &self.coupling[id.0]
    }

    /// Registers an observer.
    ///
    /// # Errors
    ///
    /// Returns `TooManyObservers` once [`MAX_OBSERVERS`] are registered.
    pub fn subscribe<F>(&mut self, observer: F) -> Result<()>
    where
        F: FnMut(&Record, &RecordEvent<'_>) + 'static,
    {
        if self.observers.len() >= MAX_OBSERVERS {
            return Err(BuildError::TooManyObservers {
                record: self.name.clone(),
                limit: MAX_OBSERVERS,
            });
        }
        self.observers.push(Box::new(observer));
        Ok(())
    }

    /// Current value of a field.
    pub fn get(&self, id: TagId) -> Value {
        self.tags[id.0].decode(&self.buffer)
    }

    /// Writes a value, then runs change detection.
    ///
    /// The value is coerced to the field type first, so an integer literal
    /// can be written to any integer or word field it fits.
    ///
    /// # Arguments
    ///
    /// * `id` - Field handle from [`tag_id`](Self::tag_id) or [`require`](Self::require)
    /// * `value` - New value
    ///
    /// # Returns
    ///
    /// Whether the field changed. Observers and coupled fields are notified
    /// before this returns.
    ///
    /// # Errors
    ///
    /// Returns `InvalidValue` if `value` does not fit the field type.
    ///
    /// # Example
    ///
    /// ```
    /// use std::sync::Arc;
    /// use pipeline_interlock::{DataType, FieldSpec, Record, Structure, Value};
    ///
    /// let structure = Structure::build("valve", &[
    ///     FieldSpec::new("status", DataType::Word16, 0)
    ///         .with_coupling(vec![FieldSpec::new("open", DataType::Bit, 8)]),
    ///     FieldSpec::new("position", DataType::Byte, 16),
    /// ]).unwrap();
    /// let mut record = Record::new(Arc::new(structure), "valve-1");
    ///
    /// let status = record.require("status").unwrap();
    /// assert!(record.set(status, Value::UInt32(0x0100)).unwrap());
    /// assert!(!record.set(status, Value::Word16(0x0100)).unwrap());
    /// assert!(record.get_by_name("open").unwrap().as_bool());
    ///
    /// let position = record.require("position").unwrap();
    /// assert!(record.set(position, Value::Int32(300)).is_err());
    /// ```
    pub fn set(&mut self, id: TagId, value: Value) -> Result<bool> {
        let tag = &self.tags[id.0];
        let value = value.coerce(tag.data_type(), tag.name())?;
        tag.encode(&mut self.buffer, value);
        Ok(self.check(id))
    }

    /// Reads a field by name.
    pub fn get_by_name(&self, field: &str) -> Result<Value> {
        Ok(self.get(self.require(field)?))
    }

    /// Writes a field by name.
    pub fn set_by_name(&mut self, field: &str, value: impl Into<Value>) -> Result<bool> {
        let id = self.require(field)?;
        self.set(id, value.into())
    }

    /// Field truthiness.
    pub fn get_bool(&self, id: TagId) -> bool {
        self.get(id).as_bool()
    }

    /// Field as `f32`.
    pub fn get_f32(&self, id: TagId) -> f32 {
        self.get(id).as_f64() as f32
    }

    /// Field as `u32` (negative values clamp to 0).
    pub fn get_u32(&self, id: TagId) -> u32 {
        let v = self.get(id);
        v.as_i64()
            .unwrap_or_else(|| v.as_f64() as i64)
            .clamp(0, i64::from(u32::MAX)) as u32
    }

    /// Writes a boolean; returns whether the field changed.
    pub fn set_bool(&mut self, id: TagId, value: bool) -> bool {
        self.set_logged(id, Value::Bit(value))
    }

    /// Writes an `f32`; returns whether the field changed.
    pub fn set_f32(&mut self, id: TagId, value: f32) -> bool {
        self.set_logged(id, Value::Float32(value))
    }

    /// Writes a `u32`; returns whether the field changed.
    pub fn set_u32(&mut self, id: TagId, value: u32) -> bool {
        self.set_logged(id, Value::UInt32(value))
    }

    /// Writes an `i32`; returns whether the field changed.
    pub fn set_i32(&mut self, id: TagId, value: i32) -> bool {
        self.set_logged(id, Value::Int32(value))
    }

    fn set_logged(&mut self, id: TagId, value: Value) -> bool {
        match self.set(id, value) {
            Ok(changed) => changed,
            Err(e) => {
                tracing::warn!(record = %self.name, error = %e, "rejected write");
                false
            }
        }
    }

    /// Runs change detection on a field by name. Unknown names are logged and ignored.
    pub fn check_tag(&mut self, field: &str) -> bool {
        match self.tag_id(field) {
            Some(id) => self.check(id),
            None => {
                tracing::warn!(record = %self.name, field, "check on unknown field");
                false
            }
        }
    }

    /// Runs change detection on `id`, notifying observers and re-checking
    /// coupled fields if it changed.
    pub fn check(&mut self, id: TagId) -> bool {
        let Some((old, new)) = self.tags[id.0].check_change(&self.buffer) else {
            return false;
        };
        let change = Change {
            tag: id,
            field: self.tags[id.0].shared_name(),
            old,
            new,
        };
        tracing::trace!(record = %self.name, field = %change.field, %old, %new, "field changed");
        self.emit(&RecordEvent::Changed(&change));

        for k in 0..self.coupling[id.0].len() {
            let coupled = self.coupling[id.0][k];
            self.check(coupled);
        }
        true
    }

    fn emit(&mut self, event: &RecordEvent<'_>) {
        if self.observers.is_empty() {
            return;
        }
        let mut observers = std::mem::take(&mut self.observers);
        for observer in observers.iter_mut() {
            observer(self, event);
        }
        self.observers = observers;
    }

    /// Writes raw bytes at `offset` and re-checks every field they touch.
    ///
    /// # Errors
    ///
    /// Returns `RangeOutOfWindow` if the bytes run past the buffer.
    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        let range = ByteRange::with_len(offset, bytes.len());
        if range.end > self.buffer.len() {
            return Err(BuildError::RangeOutOfWindow {
                record: self.name.clone(),
                start: range.start,
                end: range.end,
            });
        }
        self.buffer[range.start..range.end].copy_from_slice(bytes);
        self.check_range(range);
        Ok(())
    }

    fn check_range(&mut self, range: ByteRange) {
        for i in 0..self.tags.len() {
            if self.tags[i].byte_range().overlaps(&range) {
                self.check(TagId(i));
            }
        }
    }

    /// Copies a named structure group from `other` into this record.
    ///
    /// # Errors
    ///
    /// Returns `UnknownGroup` if either record lacks the group, or
    /// `InvalidConfig` if the two groups differ in size.
    pub fn copy_group_from(&mut self, other: &Record, group: &str) -> Result<()> {
        let unknown = || BuildError::UnknownGroup {
            name: group.to_string(),
        };
        let dst = self.structure.group(group).ok_or_else(unknown)?;
        let src = other.structure.group(group).ok_or_else(unknown)?;
        if dst.len() != src.len() {
            return Err(BuildError::invalid_config(format!(
                "group '{}' is {} bytes in '{}' but {} in '{}'",
                group,
                dst.len(),
                self.name,
                src.len(),
                other.name
            )));
        }
        self.buffer[dst.start..dst.end].copy_from_slice(&other.buffer[src.start..src.end]);
        self.check_range(dst);
        Ok(())
    }

    /// Field name and value pairs in declaration order.
    pub fn to_map(&self) -> Vec<(&str, Value)> {
        self.tags
            .iter()
            .map(|t| (t.name(), t.decode(&self.buffer)))
            .collect()
    }

    /// Binds this record to a device window.
    ///
    /// # Errors
    ///
    /// Returns `RangeOutOfWindow` if the window does not fit the record.
    pub fn set_io(&mut self, device: SharedDevice, window: IoWindow) -> Result<()> {
        if window.length == 0 || window.range().end > self.buffer.len() {
            return Err(BuildError::RangeOutOfWindow {
                record: self.name.clone(),
                start: window.start,
                end: window.range().end,
            });
        }
        self.io = Some(IoBinding { device, window });
        Ok(())
    }

    /// Bound window, if any.
    pub fn io_window(&self) -> Option<IoWindow> {
        self.io.as_ref().map(|b| b.window)
    }

    /// Whether the bound device reports a live connection.
    pub fn is_connected(&self) -> bool {
        self.io
            .as_ref()
            .is_some_and(|b| b.device.borrow().is_connected())
    }

    fn binding(&self) -> Result<&IoBinding> {
        self.io.as_ref().ok_or_else(|| BuildError::NotBound {
            record: self.name.clone(),
        })
    }

    fn window_check(&self, range: ByteRange) -> Result<(&IoBinding, usize)> {
        let binding = self.binding()?;
        if range.is_empty() || !binding.window.range().contains(&range) {
            return Err(BuildError::RangeOutOfWindow {
                record: self.name.clone(),
                start: range.start,
                end: range.end,
            });
        }
        let remote = binding.window.remote_start + (range.start - binding.window.start);
        Ok((binding, remote))
    }

    /// Reads the whole window into the staging buffer.
    pub fn io_read_all(&mut self) -> std::result::Result<(), Error> {
        let window = self.binding()?.window;
        self.io_read(window.range())
    }

    /// Reads part of the window into the staging buffer.
    ///
    /// # Errors
    ///
    /// Configuration errors for a bad range or missing binding; transient
    /// errors when the device is offline or the read fails.
    pub fn io_read(&mut self, range: ByteRange) -> std::result::Result<(), Error> {
        let (binding, remote) = self.window_check(range)?;
        let data = {
            let mut device = binding.device.borrow_mut();
            if !device.is_connected() {
                return Err(IoError::NotConnected.into());
            }
            device.read(remote, range.len())?
        };
        if data.len() < range.len() {
            return Err(IoError::ShortRead {
                expected: range.len(),
                received: data.len(),
            }
            .into());
        }
        self.io_buffer[range.start..range.end].copy_from_slice(&data[..range.len()]);
        self.emit(&RecordEvent::Data(range));
        Ok(())
    }

    /// Writes part of the staging buffer to the device.
    pub fn io_write(&mut self, range: ByteRange) -> std::result::Result<(), Error> {
        let (binding, remote) = self.window_check(range)?;
        let mut device = binding.device.borrow_mut();
        if !device.is_connected() {
            return Err(IoError::NotConnected.into());
        }
        device.write(remote, &self.io_buffer[range.start..range.end])?;
        Ok(())
    }

    /// Decodes a field from the staging buffer and commits it.
    pub fn load_from_io(&mut self, id: TagId, endian: Endian) -> bool {
        let tag = &self.tags[id.0];
        let value = tag.read_from(&self.io_buffer, endian);
        tag.encode(&mut self.buffer, value);
        self.check(id)
    }

    /// Encodes a field into the staging buffer.
    pub fn store_to_io(&mut self, id: TagId, endian: Endian) {
        self.tags[id.0].write_to(&self.buffer, &mut self.io_buffer, endian);
    }

    /// Creates a field group over this record's window.
    ///
    /// # Errors
    ///
    /// `NotBound` without a window, `UnknownField` for a bad name,
    /// `RangeOutOfWindow` or `OverlapField` for fields that cannot join.
    pub fn create_group<'a>(
        &self,
        fields: impl IntoIterator<Item = &'a str>,
    ) -> Result<FieldGroup> {
        let window = self.binding()?.window;
        let mut group = FieldGroup::new(&self.name, window);
        group.add(self, fields)?;
        Ok(group)
    }

    /// Creates a group spanning the whole record, for local copies only.
    pub fn create_local_group<'a>(
        &self,
        fields: impl IntoIterator<Item = &'a str>,
    ) -> Result<FieldGroup> {
        let window = IoWindow::new(0, 0, self.buffer.len());
        let mut group = FieldGroup::new(&self.name, window);
        group.add(self, fields)?;
        Ok(group)
    }
}

impl std::fmt::Debug for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Record")
            .field("name", &self.name)
            .field("structure", &self.structure.name())
            .field("bytes", &self.buffer.len())
            .field("observers", &self.observers.len())
            .field("io", &self.io_window())
            .finish()
    }
}
