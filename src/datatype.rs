//! Primitive field types, transfer byte orders and typed values.
//!
//! # Field types
//!
//! | Type | Bytes | Internal storage | Combined |
//! |------|:-----:|------------------|:--------:|
//! | [`DataType::Bit`] | 1 (one bit) | masked bit | |
//! | [`DataType::Byte`] | 1 | raw | |
//! | [`DataType::Int16`] | 2 | big-endian | |
//! | [`DataType::UInt16`] | 2 | big-endian | |
//! | [`DataType::Word16`] | 2 | little-endian | ✓ |
//! | [`DataType::Int32`] | 4 | big-endian | |
//! | [`DataType::UInt32`] | 4 | big-endian | |
//! | [`DataType::Word32`] | 4 | little-endian | ✓ |
//! | [`DataType::Float32`] | 4 | big-endian IEEE-754 | |
//!
//! Word types are "combined" fields: aggregates of bits and bytes laid out in
//! declaration order, not numeric magnitudes. They are stored little-endian so
//! that bit `n` of the word value lives in byte `n / 8` of the field.
//!
//! # Example
//!
//! ```
//! use pipeline_interlock::{DataType, Value};
//!
//! assert_eq!(DataType::Float32.byte_len(), 4);
//! assert!(DataType::Word16.is_combined());
//!
//! let v = Value::from(300).coerce(DataType::UInt16, "setpoint").unwrap();
//! assert_eq!(v, Value::UInt16(300));
//! assert!(Value::from(300).coerce(DataType::Byte, "mode").is_err());
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{BuildError, Result};

/// Primitive type of a structure field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Single bit.
    #[serde(alias = "bool")]
    Bit,
    /// Unsigned 8-bit value.
    #[serde(alias = "usint", alias = "sint")]
    Byte,
    /// Signed 16-bit integer.
    #[serde(alias = "int")]
    Int16,
    /// Unsigned 16-bit integer.
    #[serde(alias = "uint")]
    UInt16,
    /// 16-bit bit/byte aggregate.
    #[serde(alias = "word")]
    Word16,
    /// Signed 32-bit integer.
    #[serde(alias = "dint")]
    Int32,
    /// Unsigned 32-bit integer.
    #[serde(alias = "udint")]
    UInt32,
    /// 32-bit bit/byte aggregate.
    #[serde(alias = "dword")]
    Word32,
    /// IEEE-754 single precision float.
    #[serde(alias = "real")]
    Float32,
}

impl DataType {
    /// Number of bytes occupied in the buffer (a bit occupies its whole byte).
    pub fn byte_len(self) -> usize {
        match self {
            DataType::Bit | DataType::Byte => 1,
            DataType::Int16 | DataType::UInt16 | DataType::Word16 => 2,
            DataType::Int32 | DataType::UInt32 | DataType::Word32 | DataType::Float32 => 4,
        }
    }

    /// Number of bits the field covers.
    pub fn bit_len(self) -> usize {
        match self {
            DataType::Bit => 1,
            other => other.byte_len() * 8,
        }
    }

    /// Whether the field is a bit/byte aggregate transferred with the combined endian.
    pub fn is_combined(self) -> bool {
        matches!(self, DataType::Word16 | DataType::Word32)
    }

    /// Whether the field must start on an even byte.
    pub fn needs_word_alignment(self) -> bool {
        !matches!(self, DataType::Bit | DataType::Byte)
    }

    /// Zero value of this type.
    pub fn zero(self) -> Value {
        match self {
            DataType::Bit => Value::Bit(false),
            DataType::Byte => Value::Byte(0),
            DataType::Int16 => Value::Int16(0),
            DataType::UInt16 => Value::UInt16(0),
            DataType::Word16 => Value::Word16(0),
            DataType::Int32 => Value::Int32(0),
            DataType::UInt32 => Value::UInt32(0),
            DataType::Word32 => Value::Word32(0),
            DataType::Float32 => Value::Float32(0.0),
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DataType::Bit => "bit",
            DataType::Byte => "byte",
            DataType::Int16 => "int16",
            DataType::UInt16 => "uint16",
            DataType::Word16 => "word16",
            DataType::Int32 => "int32",
            DataType::UInt32 => "uint32",
            DataType::Word32 => "word32",
            DataType::Float32 => "float32",
        };
        f.write_str(name)
    }
}

/// Byte order used on the wire when transferring a field.
///
/// All four conversions are involutions: applying the same conversion twice
/// restores the original bytes, so one transform serves both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Endian {
    /// Big-endian, the canonical internal order. No conversion.
    #[default]
    #[serde(alias = "big", alias = "be")]
    BE,
    /// Little-endian. Full byte reverse.
    #[serde(alias = "little", alias = "le")]
    LE,
    /// Big-endian with bytes swapped inside each 16-bit half.
    #[serde(alias = "bebs")]
    BEBS,
    /// Little-endian word order: the two 16-bit halves swap as units.
    #[serde(alias = "lebs")]
    LEBS,
}

impl std::fmt::Display for Endian {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Endian::BE => "BE",
            Endian::LE => "LE",
            Endian::BEBS => "BEBS",
            Endian::LEBS => "LEBS",
        };
        f.write_str(name)
    }
}

/// A decoded field value.
///
/// Each variant matches one [`DataType`]. Values read from configuration
/// arrive as whichever variant `serde` picks and are normalised with
/// [`Value::coerce`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Bit value.
    Bit(bool),
    /// Byte value.
    Byte(u8),
    /// Signed 16-bit value.
    Int16(i16),
    /// Unsigned 16-bit value.
    UInt16(u16),
    /// 16-bit aggregate.
    Word16(u16),
    /// Signed 32-bit value.
    Int32(i32),
    /// Unsigned 32-bit value.
    UInt32(u32),
    /// 32-bit aggregate.
    Word32(u32),
    /// Float value.
    Float32(f32),
}

impl Value {
    /// The type this value belongs to.
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Bit(_) => DataType::Bit,
            Value::Byte(_) => DataType::Byte,
            Value::Int16(_) => DataType::Int16,
            Value::UInt16(_) => DataType::UInt16,
            Value::Word16(_) => DataType::Word16,
            Value::Int32(_) => DataType::Int32,
            Value::UInt32(_) => DataType::UInt32,
            Value::Word32(_) => DataType::Word32,
            Value::Float32(_) => DataType::Float32,
        }
    }

    /// Truthiness: non-zero numbers are `true`.
    pub fn as_bool(&self) -> bool {
        match *self {
            Value::Bit(b) => b,
            Value::Float32(f) => f != 0.0,
            other => other.as_i64().map_or(false, |v| v != 0),
        }
    }

    /// Integer view. Floats are not converted.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Bit(b) => Some(i64::from(b)),
            Value::Byte(v) => Some(i64::from(v)),
            Value::Int16(v) => Some(i64::from(v)),
            Value::UInt16(v) | Value::Word16(v) => Some(i64::from(v)),
            Value::Int32(v) => Some(i64::from(v)),
            Value::UInt32(v) | Value::Word32(v) => Some(i64::from(v)),
            Value::Float32(_) => None,
        }
    }

    /// Floating point view of any numeric value.
    pub fn as_f64(&self) -> f64 {
        match *self {
            Value::Float32(f) => f64::from(f),
            other => other.as_i64().unwrap_or(0) as f64,
        }
    }

    /// Compares two values for change detection. Floats compare by bit
    /// pattern so that a stored NaN does not report a change on every check.
    pub fn same_as(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Float32(a), Value::Float32(b)) => a.to_bits() == b.to_bits(),
            (a, b) => a == b,
        }
    }

    /// Converts this value into the variant for `ty`, checking range.
    ///
    /// `field` is only used to name the field in the error.
    ///
    /// # Errors
    ///
    /// Returns `BuildError::InvalidValue` if the value does not fit, or if a
    /// non-integral float is given for an integer type.
    pub fn coerce(self, ty: DataType, field: &str) -> Result<Value> {
        if self.data_type() == ty {
            return Ok(self);
        }
        let out_of_range = || BuildError::invalid_value(field, format!("{:?} does not fit {}", self, ty));

        if ty == DataType::Bit {
            return Ok(Value::Bit(self.as_bool()));
        }
        if ty == DataType::Float32 {
            return Ok(Value::Float32(self.as_f64() as f32));
        }

        let int = match self {
            Value::Float32(f) if f.fract() == 0.0 && f.is_finite() => f as i64,
            Value::Float32(_) => return Err(out_of_range()),
            other => other.as_i64().unwrap_or(0),
        };

        let value = match ty {
            DataType::Byte => Value::Byte(u8::try_from(int).map_err(|_| out_of_range())?),
            DataType::Int16 => Value::Int16(i16::try_from(int).map_err(|_| out_of_range())?),
            DataType::UInt16 => Value::UInt16(u16::try_from(int).map_err(|_| out_of_range())?),
            DataType::Word16 => Value::Word16(u16::try_from(int).map_err(|_| out_of_range())?),
            DataType::Int32 => Value::Int32(i32::try_from(int).map_err(|_| out_of_range())?),
            DataType::UInt32 => Value::UInt32(u32::try_from(int).map_err(|_| out_of_range())?),
            DataType::Word32 => Value::Word32(u32::try_from(int).map_err(|_| out_of_range())?),
            DataType::Bit | DataType::Float32 => unreachable!("handled above"),
        };
        Ok(value)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bit(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::UInt32(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float32(v)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Bit(v) => write!(f, "{}", v),
            Value::Byte(v) => write!(f, "{}", v),
            Value::Int16(v) => write!(f, "{}", v),
            Value::UInt16(v) => write!(f, "{}", v),
            Value::Word16(v) => write!(f, "0x{:04X}", v),
            Value::Int32(v) => write!(f, "{}", v),
            Value::UInt32(v) => write!(f, "{}", v),
            Value::Word32(v) => write!(f, "0x{:08X}", v),
            Value::Float32(v) => write!(f, "{}", v),
        }
    }
}
