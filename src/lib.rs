//! # Pipeline Interlock
//!
//! A typed register engine and the leak-detection / pump-interlock control
//! loop built on it, for pipeline SCADA stations.
//!
//! The crate has two layers:
//!
//! - **Register engine**: byte-exact memory images ([`Structure`]) with typed
//!   field accessors ([`Tag`]), change notification ([`Record::subscribe`]),
//!   coalesced transfers to and from a device ([`FieldGroup`]) and
//!   per-window byte orders ([`Endian`]).
//! - **Control loop**: [`control::Node`], [`control::Section`] and
//!   [`control::Line`] processors, wired together by a [`Topology`] and
//!   driven by a [`Controller`] on a fixed tick with debounced outputs.
//!
//! The crate performs no I/O scheduling of its own. Devices implement
//! [`Device`]; [`Link`] adds connect/reconnect supervision around any
//! [`Driver`]. The embedding application calls [`Controller::tick`] and
//! [`Controller::poll`] from its own timer.
//!
//! ## Quick Start
//!
//! ```
//! use pipeline_interlock::{DataType, FieldSpec, Record, StructureBuilder, Value};
//! use std::sync::Arc;
//!
//! fn main() -> pipeline_interlock::Result<()> {
//!     let structure = StructureBuilder::new("station")
//!         .field(FieldSpec::new("status", DataType::Word16, 0).with_coupling(vec![
//!             FieldSpec::new("run", DataType::Bit, 0),
//!             FieldSpec::new("fault", DataType::Bit, 1),
//!         ]))
//!         .field(FieldSpec::new("flow", DataType::Float32, 32))
//!         .build()?;
//!
//!     let mut record = Record::new(Arc::new(structure), "station-1");
//!     record.set_by_name("flow", 12.5f32)?;
//!     record.set_by_name("fault", true)?;
//!
//!     assert_eq!(record.get_by_name("status")?, Value::Word16(0x0002));
//!     assert_eq!(record.get_by_name("flow")?, Value::Float32(12.5));
//!     Ok(())
//! }
//! ```
//!
//! ## Byte Order
//!
//! Numeric fields are held big-endian in the record buffer; `Word16` and
//! `Word32` fields are held little-endian so that bit `n` of the word is bit
//! `n % 8` of byte `n / 8`. Each I/O window declares the wire order of both
//! classes separately:
//!
//! | Endian | 2 bytes `[a b]` | 4 bytes `[a b c d]` |
//! |--------|-----------------|---------------------|
//! | `BE`   | `[a b]` | `[a b c d]` |
//! | `LE`   | `[b a]` | `[d c b a]` |
//! | `BEBS` | `[b a]` | `[b a d c]` |
//! | `LEBS` | `[a b]` | `[c d a b]` |
//!
//! ## Control Loop
//!
//! Each tick runs every node, then every section, then every line. Nodes
//! read their device inputs and track communication health; sections
//! aggregate their nodes, time flow-difference alarms and raise pump
//! interlocks; lines aggregate their sections. Command words and line
//! fields are written after a quiet period so that bursts of changes
//! collapse into one write.
//!
//! ## Error Handling
//!
//! Configuration problems are [`BuildError`]s and are fatal: build the
//! [`Topology`] at startup and refuse to run if it fails. Device problems
//! are [`IoError`]s; the control loop absorbs them and reports them as
//! `comm_OK = false` on the affected node. Operations that can fail either
//! way return [`Error`].
//!
//! ```
//! use pipeline_interlock::{BuildError, ControllerConfig};
//!
//! let err = ControllerConfig::from_json("{\"nodes\": 1}").unwrap_err();
//! assert!(matches!(err, BuildError::InvalidConfig { .. }));
//! ```
//!
//! ## Logging
//!
//! The crate logs through [`tracing`] and installs no subscriber.

#![warn(clippy::all)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod control;
mod datatype;
mod debounce;
mod error;
mod group;
pub mod layouts;
mod record;
mod registers;
mod structure;
mod tag;
mod topology;
mod transport;
pub mod utils;

// Public re-exports
pub use control::{CommandMask, Line, LineField, LineId, Node, NodeId, Section, SectionId};
pub use datatype::{DataType, Endian, Value};
pub use debounce::Debouncer;
pub use error::{BuildError, Error, IoError, Result};
pub use group::FieldGroup;
pub use record::{Change, IoWindow, Record, RecordEvent, MAX_OBSERVERS};
pub use registers::{RecordSource, RegisterMap};
pub use structure::{ByteRange, FieldDef, FieldSpec, Structure, StructureBuilder};
pub use tag::{Tag, TagId};
pub use topology::{
    Controller, ControllerConfig, EntityKind, EntityRef, LineConfig, NodeConfig, SectionConfig,
    Topology, DEFAULT_COMMAND_DEBOUNCE, DEFAULT_COMMAND_RETRY_TICKS, DEFAULT_LINE_DEBOUNCE,
    DEFAULT_TICK_PERIOD,
};
pub use transport::{
    Device, Driver, Link, LinkConfig, LinkEvent, LinkState, SharedDevice, SimulatedPlc,
    DEFAULT_MAX_BACKOFF, DEFAULT_RECONNECT_BACKOFF,
};
