//! Record layouts: field specifications and the structure builder.
//!
//! A layout is described as an ordered list of [`FieldSpec`]s. Each spec
//! places one typed field at a bit offset, optionally with *coupled*
//! sub-fields (bits or bytes packed inside a word) or a block of *included*
//! specs spliced in at the spec's offset. [`StructureBuilder`] flattens the
//! description into absolute offsets and validates it, producing an immutable
//! [`Structure`] shared by every [`Record`](crate::Record) of that type.
//!
//! # Layout rules
//!
//! - every flattened field name is unique
//! - non-bit fields start on a byte boundary; fields wider than a byte start
//!   on an even byte
//! - no two fields share bytes, except bits in distinct bit positions and
//!   sub-fields nested via coupling inside their parent
//! - only `Word16` and `Word32` fields take coupled sub-fields; their offsets
//!   count from bit 0 of the parent word value, so bit 8 is the least
//!   significant bit of the high byte
//!
//! # Example
//!
//! ```
//! use pipeline_interlock::{DataType, FieldSpec, StructureBuilder};
//!
//! let structure = StructureBuilder::new("pump")
//!     .field(
//!         FieldSpec::new("status", DataType::Word16, 0).with_coupling(vec![
//!             FieldSpec::new("running", DataType::Bit, 0),
//!             FieldSpec::new("fault", DataType::Bit, 9),
//!         ]),
//!     )
//!     .field(FieldSpec::new("speed", DataType::Float32, 32))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(structure.byte_length(), 8);
//! let fault = structure.field("fault").unwrap();
//! assert_eq!((fault.byte_offset(), fault.bit_index()), (1, 1));
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::datatype::{DataType, Value};
use crate::error::{BuildError, Result};

/// Half-open byte range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ByteRange {
    /// First byte.
    pub start: usize,
    /// One past the last byte.
    pub end: usize,
}

impl ByteRange {
    /// Creates a range from `start` and `end`.
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Creates a range from `start` and `len`.
    pub fn with_len(start: usize, len: usize) -> Self {
        Self {
            start,
            end: start + len,
        }
    }

    /// Number of bytes in the range.
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    /// Whether the range is empty.
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Whether the two ranges share at least one byte.
    pub fn overlaps(&self, other: &ByteRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Whether `other` lies entirely inside this range.
    pub fn contains(&self, other: &ByteRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

impl std::fmt::Display for ByteRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Configuration-time description of one field (or of an included block).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Field name, unique within the structure after flattening.
    pub name: String,
    /// Primitive type. May be omitted for include blocks.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<DataType>,
    /// Offset in bits, relative to the enclosing block or parent word.
    #[serde(default)]
    pub offset: usize,
    /// Declared length in bits. Must match the type when given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,
    /// Value written at record creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_value: Option<Value>,
    /// Sub-fields packed inside this field.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub coupling: Vec<FieldSpec>,
    /// Reusable block spliced in at this spec's offset.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub includes: Vec<FieldSpec>,
    /// Prefix prepended to the names of included fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

impl FieldSpec {
    /// Creates a field spec at `offset` bits.
    pub fn new(name: impl Into<String>, data_type: DataType, offset: usize) -> Self {
        Self {
            name: name.into(),
            data_type: Some(data_type),
            offset,
            length: None,
            init_value: None,
            coupling: Vec::new(),
            includes: Vec::new(),
            prefix: None,
        }
    }

    /// Creates an include block placing `specs` at `offset` bits.
    pub fn include(name: impl Into<String>, offset: usize, specs: Vec<FieldSpec>) -> Self {
        Self {
            name: name.into(),
            data_type: None,
            offset,
            length: None,
            init_value: None,
            coupling: Vec::new(),
            includes: specs,
            prefix: None,
        }
    }

    /// Sets the initial value.
    pub fn with_init(mut self, value: impl Into<Value>) -> Self {
        self.init_value = Some(value.into());
        self
    }

    /// Sets the coupled sub-fields.
    pub fn with_coupling(mut self, sub_fields: Vec<FieldSpec>) -> Self {
        self.coupling = sub_fields;
        self
    }

    /// Sets the name prefix for an include block.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Sets an explicit bit length.
    pub fn with_length(mut self, bits: usize) -> Self {
        self.length = Some(bits);
        self
    }
}

/// A flattened field with its absolute position.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    /// Flattened name.
    pub name: String,
    /// Primitive type.
    pub data_type: DataType,
    /// Absolute bit offset from the start of the structure.
    pub bit_offset: usize,
    /// Initial value, already coerced to `data_type`.
    pub init_value: Value,
    /// Parent word for coupled sub-fields.
    pub parent: Option<usize>,
    /// Coupled fields: children for a parent word, the parent for a sub-field.
    pub coupling: Vec<usize>,
}

impl FieldDef {
    /// Byte holding the first bit of the field.
    pub fn byte_offset(&self) -> usize {
        self.bit_offset / 8
    }

    /// Bit position inside the first byte (0 for non-bit fields).
    pub fn bit_index(&self) -> u8 {
        (self.bit_offset % 8) as u8
    }

    /// Bytes covered by the field.
    pub fn byte_range(&self) -> ByteRange {
        ByteRange::with_len(self.byte_offset(), self.data_type.byte_len())
    }

    fn conflicts_with(&self, other: &FieldDef, self_idx: usize, other_idx: usize) -> bool {
        if self.parent == Some(other_idx) || other.parent == Some(self_idx) {
            return false;
        }
        if self.data_type == DataType::Bit && other.data_type == DataType::Bit {
            return self.bit_offset == other.bit_offset;
        }
        self.byte_range().overlaps(&other.byte_range())
    }
}

/// Flattened and validated record layout.
#[derive(Debug, Clone)]
pub struct Structure {
    name: String,
    fields: Vec<FieldDef>,
    index: HashMap<String, usize>,
    bit_length: usize,
    groups: Vec<(String, ByteRange)>,
}

impl Structure {
    /// Builds a structure from a list of specs with no named groups.
    pub fn build(name: impl Into<String>, specs: &[FieldSpec]) -> Result<Self> {
        StructureBuilder::new(name).fields(specs.iter().cloned()).build()
    }

    /// Structure name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Flattened fields in declaration order.
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Looks up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.index.get(name).map(|&i| &self.fields[i])
    }

    /// Index of a field by name.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Total length in bits.
    pub fn bit_length(&self) -> usize {
        self.bit_length
    }

    /// Total length in whole bytes.
    pub fn byte_length(&self) -> usize {
        self.bit_length.div_ceil(8)
    }

    /// Named byte range used for bulk copies.
    pub fn group(&self, name: &str) -> Option<ByteRange> {
        self.groups
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, range)| *range)
    }

    /// All named byte ranges.
    pub fn groups(&self) -> &[(String, ByteRange)] {
        &self.groups
    }
}

/// Builder flattening [`FieldSpec`]s into a [`Structure`].
#[derive(Debug, Clone)]
pub struct StructureBuilder {
    name: String,
    specs: Vec<FieldSpec>,
    groups: Vec<(String, ByteRange)>,
}

impl StructureBuilder {
    /// Starts an empty structure.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            specs: Vec::new(),
            groups: Vec::new(),
        }
    }

    /// Parses a JSON array of field specs (the structure description format).
    ///
    /// # Errors
    ///
    /// Returns `BuildError::InvalidConfig` if the document does not parse.
    pub fn from_json(name: impl Into<String>, json: &str) -> Result<Self> {
        let specs: Vec<FieldSpec> = serde_json::from_str(json)?;
        Ok(Self::new(name).fields(specs))
    }

    /// Appends one spec.
    pub fn field(mut self, spec: FieldSpec) -> Self {
        self.specs.push(spec);
        self
    }

    /// Appends several specs.
    pub fn fields(mut self, specs: impl IntoIterator<Item = FieldSpec>) -> Self {
        self.specs.extend(specs);
        self
    }

    /// Declares a named byte range.
    pub fn group(mut self, name: impl Into<String>, range: ByteRange) -> Self {
        self.groups.push((name.into(), range));
        self
    }

    /// Flattens and validates the layout.
    ///
    /// # Errors
    ///
    /// - `DuplicateField` if two flattened fields share a name
    /// - `BadAlignment` if a field breaks the alignment rules
    /// - `OverlapField` if two unrelated fields share bytes
    /// - `InvalidLength`, `InvalidValue` or `InvalidConfig` for malformed specs
    pub fn build(self) -> Result<Structure> {
        let mut structure = Structure {
            name: self.name,
            fields: Vec::new(),
            index: HashMap::new(),
            bit_length: 0,
            groups: Vec::new(),
        };
        flatten(&mut structure, &self.specs, 0, "", None)?;

        for (name, range) in self.groups {
            if range.is_empty() || range.end > structure.byte_length() {
                return Err(BuildError::invalid_config(format!(
                    "group '{}' range {} exceeds structure '{}' ({} bytes)",
                    name,
                    range,
                    structure.name,
                    structure.byte_length()
                )));
            }
            structure.groups.push((name, range));
        }
        Ok(structure)
    }
}

fn flatten(
    structure: &mut Structure,
    specs: &[FieldSpec],
    base: usize,
    prefix: &str,
    parent: Option<usize>,
) -> Result<()> {
    for spec in specs {
        let offset = base + spec.offset;

        if !spec.includes.is_empty() {
            if !spec.coupling.is_empty() || parent.is_some() {
                return Err(BuildError::invalid_config(format!(
                    "'{}' mixes includes with coupling",
                    spec.name
                )));
            }
            let nested = format!("{}{}", prefix, spec.prefix.as_deref().unwrap_or(""));
            flatten(structure, &spec.includes, offset, &nested, None)?;
            continue;
        }

        let name = format!("{}{}", prefix, spec.name);
        let data_type = spec.data_type.ok_or_else(|| {
            BuildError::invalid_config(format!("field '{}' has no type", name))
        })?;
        if let Some(declared) = spec.length {
            if declared != data_type.bit_len() {
                return Err(BuildError::InvalidLength {
                    name,
                    declared,
                    expected: data_type.bit_len(),
                });
            }
        }
        if let Some(p) = parent {
            let parent_def = &structure.fields[p];
            if spec.offset + data_type.bit_len() > parent_def.data_type.bit_len() {
                return Err(BuildError::invalid_config(format!(
                    "coupled field '{}' does not fit inside '{}'",
                    name, parent_def.name
                )));
            }
        }
        let init_value = match spec.init_value {
            Some(v) => v.coerce(data_type, &name)?,
            None => data_type.zero(),
        };

        let idx = register(structure, name, data_type, offset, init_value, parent)?;
        if let Some(p) = parent {
            structure.fields[p].coupling.push(idx);
            structure.fields[idx].coupling.push(p);
        }
        if !spec.coupling.is_empty() {
            if !data_type.is_combined() {
                return Err(BuildError::invalid_config(format!(
                    "'{}' has coupled fields but is not a word type",
                    structure.fields[idx].name
                )));
            }
            flatten(structure, &spec.coupling, offset, prefix, Some(idx))?;
        }
    }
    Ok(())
}

fn register(
    structure: &mut Structure,
    name: String,
    data_type: DataType,
    bit_offset: usize,
    init_value: Value,
    parent: Option<usize>,
) -> Result<usize> {
    if structure.index.contains_key(&name) {
        return Err(BuildError::duplicate_field(name));
    }
    if data_type != DataType::Bit && bit_offset % 8 != 0 {
        return Err(BuildError::bad_alignment(
            name,
            bit_offset,
            "field must start on a byte boundary",
        ));
    }
    if data_type.needs_word_alignment() && (bit_offset / 8) % 2 != 0 {
        return Err(BuildError::bad_alignment(
            name,
            bit_offset,
            "word-sized field must start on an even byte",
        ));
    }

    let idx = structure.fields.len();
    let def = FieldDef {
        name,
        data_type,
        bit_offset,
        init_value,
        parent,
        coupling: Vec::new(),
    };
    if let Some((_, other)) = structure
        .fields
        .iter()
        .enumerate()
        .find(|(i, other)| def.conflicts_with(other, idx, *i))
    {
        let offset = def.byte_offset();
        return Err(BuildError::overlap_field(def.name, other.name.clone(), offset));
    }

    structure.bit_length = structure.bit_length.max(bit_offset + data_type.bit_len());
    structure.index.insert(def.name.clone(), idx);
    structure.fields.push(def);
    Ok(idx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_block() -> Vec<FieldSpec> {
        vec![
            FieldSpec::new("id", DataType::UInt16, 0),
            FieldSpec::new("kind", DataType::Byte, 16),
            FieldSpec::new("online", DataType::Bit, 24),
        ]
    }

    #[test]
    fn test_simple_layout() {
        let s = Structure::build(
            "s",
            &[
                FieldSpec::new("a", DataType::Int16, 0),
                FieldSpec::new("b", DataType::Float32, 32),
            ],
        )
        .unwrap();
        assert_eq!(s.fields().len(), 2);
        assert_eq!(s.field("b").unwrap().byte_range(), ByteRange::new(4, 8));
        assert_eq!(s.byte_length(), 8);
    }

    #[test]
    fn test_include_block_at_base_offset() {
        let s = Structure::build(
            "s",
            &[
                FieldSpec::new("flow", DataType::Float32, 0),
                FieldSpec::include("header", 160, header_block()),
            ],
        )
        .unwrap();
        assert_eq!(s.field("id").unwrap().bit_offset, 160);
        assert_eq!(s.field("kind").unwrap().bit_offset, 176);
        assert_eq!(s.field("online").unwrap().bit_offset, 184);
        assert_eq!(s.byte_length(), 24);
    }

    #[test]
    fn test_include_prefix() {
        let s = Structure::build(
            "s",
            &[
                FieldSpec::include("a", 0, header_block()).with_prefix("a_"),
                FieldSpec::include("b", 32, header_block()).with_prefix("b_"),
            ],
        )
        .unwrap();
        assert!(s.field("a_id").is_some());
        assert_eq!(s.field("b_online").unwrap().bit_offset, 56);
    }

    #[test]
    fn test_include_twice_without_prefix_is_duplicate() {
        let err = Structure::build(
            "s",
            &[
                FieldSpec::include("a", 0, header_block()),
                FieldSpec::include("b", 32, header_block()),
            ],
        )
        .unwrap_err();
        assert_eq!(err, BuildError::duplicate_field("id"));
    }

    #[test]
    fn test_declaration_order_is_depth_first() {
        let s = Structure::build(
            "s",
            &[
                FieldSpec::new("w", DataType::Word16, 0)
                    .with_coupling(vec![FieldSpec::new("w0", DataType::Bit, 0)]),
                FieldSpec::include("h", 32, header_block()),
                FieldSpec::new("tail", DataType::Byte, 64),
            ],
        )
        .unwrap();
        let names: Vec<&str> = s.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["w", "w0", "id", "kind", "online", "tail"]);
    }

    #[test]
    fn test_coupling_is_bidirectional() {
        let s = Structure::build(
            "s",
            &[FieldSpec::new("status", DataType::Word16, 16).with_coupling(vec![
                FieldSpec::new("lo", DataType::Bit, 0),
                FieldSpec::new("hi", DataType::Bit, 8),
            ])],
        )
        .unwrap();
        let status = s.position("status").unwrap();
        let lo = s.position("lo").unwrap();
        let hi = s.position("hi").unwrap();
        assert_eq!(s.fields()[status].coupling, vec![lo, hi]);
        assert_eq!(s.fields()[lo].coupling, vec![status]);
        assert_eq!(s.fields()[hi].parent, Some(status));
        assert_eq!(s.fields()[hi].byte_offset(), 3);
        assert_eq!(s.fields()[hi].bit_index(), 0);
    }

    #[test]
    fn test_overlap_rejected() {
        let err = Structure::build(
            "s",
            &[
                FieldSpec::new("a", DataType::UInt32, 0),
                FieldSpec::new("b", DataType::UInt16, 16),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, BuildError::OverlapField { ref name, .. } if name == "b"));
    }

    #[test]
    fn test_same_range_rejected() {
        let err = Structure::build(
            "s",
            &[
                FieldSpec::new("a", DataType::Int16, 0),
                FieldSpec::new("b", DataType::UInt16, 0),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, BuildError::OverlapField { .. }));
    }

    #[test]
    fn test_bits_share_a_byte() {
        let s = Structure::build(
            "s",
            &[
                FieldSpec::new("a", DataType::Bit, 0),
                FieldSpec::new("b", DataType::Bit, 1),
            ],
        )
        .unwrap();
        assert_eq!(s.byte_length(), 1);

        let err = Structure::build(
            "s",
            &[
                FieldSpec::new("a", DataType::Bit, 3),
                FieldSpec::new("b", DataType::Bit, 3),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, BuildError::OverlapField { .. }));
    }

    #[test]
    fn test_uncoupled_bit_inside_word_rejected() {
        let err = Structure::build(
            "s",
            &[
                FieldSpec::new("w", DataType::Word16, 0),
                FieldSpec::new("b", DataType::Bit, 3),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, BuildError::OverlapField { .. }));
    }

    #[test]
    fn test_alignment_rules() {
        let err = Structure::build("s", &[FieldSpec::new("w", DataType::Word16, 8)]).unwrap_err();
        assert!(matches!(err, BuildError::BadAlignment { .. }));

        let err = Structure::build("s", &[FieldSpec::new("b", DataType::Byte, 3)]).unwrap_err();
        assert!(matches!(err, BuildError::BadAlignment { .. }));

        assert!(Structure::build("s", &[FieldSpec::new("b", DataType::Byte, 8)]).is_ok());
        assert!(Structure::build("s", &[FieldSpec::new("x", DataType::Bit, 13)]).is_ok());
    }

    #[test]
    fn test_declared_length_must_match() {
        let err = Structure::build("s", &[FieldSpec::new("a", DataType::Int16, 0).with_length(32)])
            .unwrap_err();
        assert_eq!(
            err,
            BuildError::InvalidLength {
                name: "a".into(),
                declared: 32,
                expected: 16
            }
        );
    }

    #[test]
    fn test_coupled_field_must_fit_parent() {
        let err = Structure::build(
            "s",
            &[FieldSpec::new("w", DataType::Word16, 0)
                .with_coupling(vec![FieldSpec::new("b", DataType::Bit, 16)])],
        )
        .unwrap_err();
        assert!(matches!(err, BuildError::InvalidConfig { .. }));
    }

    #[test]
    fn test_coupling_requires_word_parent() {
        let err = Structure::build(
            "s",
            &[FieldSpec::new("n", DataType::UInt16, 0)
                .with_coupling(vec![FieldSpec::new("hi0", DataType::Bit, 8)])],
        )
        .unwrap_err();
        assert!(matches!(err, BuildError::InvalidConfig { ref reason } if reason.contains("'n'")));

        let s = Structure::build(
            "s",
            &[FieldSpec::new("n", DataType::Word16, 0)
                .with_coupling(vec![FieldSpec::new("hi0", DataType::Bit, 8)])],
        )
        .unwrap();
        let hi0 = s.field("hi0").unwrap();
        assert_eq!((hi0.byte_offset(), hi0.bit_index()), (1, 0));
    }

    #[test]
    fn test_init_value_out_of_range() {
        let err = Structure::build(
            "s",
            &[FieldSpec::new("a", DataType::Byte, 0).with_init(Value::Int32(400))],
        )
        .unwrap_err();
        assert!(matches!(err, BuildError::InvalidValue { .. }));
    }

    #[test]
    fn test_from_json() {
        let json = r#"[
            {"name": "status", "type": "word", "offset": 0, "coupling": [
                {"name": "run", "type": "bool", "offset": 0},
                {"name": "fault", "type": "bool", "offset": 1, "init_value": true}
            ]},
            {"name": "flow", "type": "real", "offset": 32, "length": 32, "init_value": 1.5},
            {"name": "hdr", "offset": 64, "includes": [
                {"name": "id", "type": "uint16", "offset": 0}
            ]}
        ]"#;
        let s = StructureBuilder::from_json("node", json).unwrap().build().unwrap();
        assert_eq!(s.field("fault").unwrap().init_value, Value::Bit(true));
        assert_eq!(s.field("flow").unwrap().init_value, Value::Float32(1.5));
        assert_eq!(s.field("id").unwrap().bit_offset, 64);
    }

    #[test]
    fn test_groups() {
        let s = StructureBuilder::new("s")
            .field(FieldSpec::new("a", DataType::UInt32, 0))
            .field(FieldSpec::new("b", DataType::UInt32, 32))
            .group("params", ByteRange::new(4, 8))
            .build()
            .unwrap();
        assert_eq!(s.group("params"), Some(ByteRange::new(4, 8)));
        assert_eq!(s.group("missing"), None);

        let err = StructureBuilder::new("s")
            .field(FieldSpec::new("a", DataType::UInt32, 0))
            .group("params", ByteRange::new(2, 9))
            .build()
            .unwrap_err();
        assert!(matches!(err, BuildError::InvalidConfig { .. }));
    }

    #[test]
    fn test_byte_range_helpers() {
        let r = ByteRange::new(2, 6);
        assert_eq!(r.len(), 4);
        assert!(r.overlaps(&ByteRange::new(5, 7)));
        assert!(!r.overlaps(&ByteRange::new(6, 8)));
        assert!(r.contains(&ByteRange::new(3, 5)));
        assert!(!r.contains(&ByteRange::new(3, 7)));
        assert_eq!(r.to_string(), "2..6");
    }
}
