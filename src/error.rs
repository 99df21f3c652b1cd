//! Error types for the register engine and control loop.
//!
//! Errors fall into two classes:
//!
//! - [`BuildError`] - configuration errors detected while building a
//!   structure, a record, a field group or the topology. These are fatal by
//!   policy: an embedding application should refuse to start rather than run
//!   with an inconsistent memory layout.
//! - [`IoError`] - transient errors talking to a remote device. These are
//!   recovered locally and surface as `comm_OK = false` on the affected entity.
//!
//! [`Error`] wraps both for call sites that can produce either.

use thiserror::Error;

/// Result type alias for configuration-time operations.
pub type Result<T> = std::result::Result<T, BuildError>;

/// Configuration errors detected at build time.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BuildError {
    /// Two fields share a name after flattening.
    #[error("duplicate field '{name}'")]
    DuplicateField {
        /// Name of the duplicated field.
        name: String,
    },

    /// Two fields occupy the same bytes and are not coupled.
    #[error("field '{name}' at byte {offset} overlaps field '{other}'")]
    OverlapField {
        /// Field being registered.
        name: String,
        /// Field already occupying the range.
        other: String,
        /// Byte offset of the new field.
        offset: usize,
    },

    /// A field does not start on the boundary its type requires.
    #[error("field '{name}' at bit offset {bit_offset} is misaligned: {reason}")]
    BadAlignment {
        /// Name of the field.
        name: String,
        /// Absolute bit offset of the field.
        bit_offset: usize,
        /// Which alignment rule was broken.
        reason: &'static str,
    },

    /// Declared bit length disagrees with the field type.
    #[error("field '{name}' declares {declared} bits, type needs {expected}")]
    InvalidLength {
        /// Name of the field.
        name: String,
        /// Declared length in bits.
        declared: usize,
        /// Length implied by the type.
        expected: usize,
    },

    /// A value cannot be represented by the field type.
    #[error("invalid value for '{name}': {reason}")]
    InvalidValue {
        /// Name of the field.
        name: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// A field name is not part of the structure.
    #[error("unknown field '{name}' in '{record}'")]
    UnknownField {
        /// Record or structure searched.
        record: String,
        /// Missing field name.
        name: String,
    },

    /// An I/O range lies outside the window bound with `set_io`.
    #[error("range {start}..{end} is outside the I/O window of '{record}'")]
    RangeOutOfWindow {
        /// Record name.
        record: String,
        /// First byte of the requested range.
        start: usize,
        /// One past the last byte of the requested range.
        end: usize,
    },

    /// Record has no device bound.
    #[error("record '{record}' has no I/O binding")]
    NotBound {
        /// Record name.
        record: String,
    },

    /// Named structure group does not exist.
    #[error("unknown group '{name}'")]
    UnknownGroup {
        /// Group name.
        name: String,
    },

    /// A topology reference names a node, section or line that does not exist.
    #[error("unknown {kind} '{name}'")]
    UnknownEntity {
        /// Entity kind (`node`, `section`, `line`).
        kind: &'static str,
        /// Referenced name.
        name: String,
    },

    /// A node references a device that was not supplied.
    #[error("unknown device '{name}'")]
    UnknownDevice {
        /// Device name.
        name: String,
    },

    /// The record observer list is full.
    #[error("record '{record}' already has {limit} observers")]
    TooManyObservers {
        /// Record name.
        record: String,
        /// Observer limit.
        limit: usize,
    },

    /// Malformed configuration document.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Parser or validation message.
        reason: String,
    },
}

impl BuildError {
    /// Creates a new `DuplicateField` error.
    pub fn duplicate_field(name: impl Into<String>) -> Self {
        Self::DuplicateField { name: name.into() }
    }

    /// Creates a new `OverlapField` error.
    pub fn overlap_field(name: impl Into<String>, other: impl Into<String>, offset: usize) -> Self {
        Self::OverlapField {
            name: name.into(),
            other: other.into(),
            offset,
        }
    }

    /// Creates a new `BadAlignment` error.
    pub fn bad_alignment(name: impl Into<String>, bit_offset: usize, reason: &'static str) -> Self {
        Self::BadAlignment {
            name: name.into(),
            bit_offset,
            reason,
        }
    }

    /// Creates a new `InvalidValue` error.
    ///
    /// # Example
    ///
    /// ```
    /// use pipeline_interlock::BuildError;
    ///
    /// let err = BuildError::invalid_value("flow", "expected a number");
    /// assert_eq!(err.to_string(), "invalid value for 'flow': expected a number");
    /// ```
    pub fn invalid_value(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new `UnknownField` error.
    pub fn unknown_field(record: impl Into<String>, name: impl Into<String>) -> Self {
        Self::UnknownField {
            record: record.into(),
            name: name.into(),
        }
    }

    /// Creates a new `UnknownEntity` error.
    pub fn unknown_entity(kind: &'static str, name: impl Into<String>) -> Self {
        Self::UnknownEntity {
            kind,
            name: name.into(),
        }
    }

    /// Creates a new `InvalidConfig` error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for BuildError {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_config(err.to_string())
    }
}

/// Transient errors raised while exchanging data with a remote device.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IoError {
    /// The device link is not connected.
    #[error("device not connected")]
    NotConnected,

    /// The device did not answer in time.
    #[error("communication timeout")]
    Timeout,

    /// The device returned fewer bytes than requested.
    #[error("short read: expected {expected} bytes, received {received}")]
    ShortRead {
        /// Requested length.
        expected: usize,
        /// Received length.
        received: usize,
    },

    /// The device rejected an address range.
    #[error("range {start}..{end} is outside the device image")]
    OutOfRange {
        /// First byte requested.
        start: usize,
        /// One past the last byte requested.
        end: usize,
    },

    /// Protocol-level failure reported by the driver.
    #[error("device error: {reason}")]
    Device {
        /// Driver message.
        reason: String,
    },
}

impl IoError {
    /// Creates a new `Device` error.
    pub fn device(reason: impl Into<String>) -> Self {
        Self::Device {
            reason: reason.into(),
        }
    }
}

/// Either class of error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Configuration error.
    #[error(transparent)]
    Build(#[from] BuildError),
    /// Transient I/O error.
    #[error(transparent)]
    Io(#[from] IoError),
}
