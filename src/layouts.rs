//! Built-in record layouts for nodes, sections and lines.
//!
//! # Node (26 bytes, device window `0..16`)
//!
//! | Byte | Field | Type |
//! |------|-------|------|
//! | 0 | `status` (`pump_run`, `pump_change_F`, `press_warning_F`, `press_alarm_F`, `press_interlock_EN`, `work_OK`) | Word16 |
//! | 2 | `fault_code` | UInt16 |
//! | 4 | `flow` | Float32 |
//! | 8 | `pressure` | Float32 |
//! | 12 | `command.commands` (`command.stop_pumps`, `command.start_pumps`, `command.reset`, `command.horn`) | Word16 |
//! | 16 | `local` (`comm_OK`, `delay_protect`, `has_commands`) | Word16 |
//! | 20 | `disconnect_time` (ms) | UInt32 |
//! | 24 | `command_ticks` | UInt16 |
//!
//! # Section (48 bytes)
//!
//! `status` is a Word32 of flags at byte 0, followed by flow sums, timers
//! and the `parameters` group at `28..48`.
//!
//! # Line (4 bytes)
//!
//! `status` flags and the id of the section that triggered a line stop.

use crate::datatype::{DataType, Value};
use crate::error::Result;
use crate::structure::{ByteRange, FieldSpec, Structure, StructureBuilder};

/// Length of the node payload exchanged with the device.
pub const NODE_WINDOW: usize = 16;

/// Section parameter bytes.
pub const SECTION_PARAMETERS: ByteRange = ByteRange { start: 28, end: 48 };

/// Section status bytes.
pub const SECTION_STATUS: ByteRange = ByteRange { start: 0, end: 28 };

/// Node fields read from the device each tick.
pub const NODE_INPUTS: [&str; 5] = ["status", "fault_code", "flow", "pressure", "command.commands"];

/// Node fields written when a command is dispatched.
pub const NODE_OUTPUTS: [&str; 1] = ["command.commands"];

/// Section fields copied by a parameter reset.
pub const SECTION_PARAMETER_FIELDS: [&str; 5] = [
    "flow_diff_WH",
    "flow_diff_WH_delay",
    "flow_diff_AH",
    "flow_diff_AH_delay",
    "action_time",
];

fn bits(names: &[&str]) -> Vec<FieldSpec> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| FieldSpec::new(*name, DataType::Bit, i))
        .collect()
}

/// Node layout.
pub fn node() -> Result<Structure> {
    StructureBuilder::new("node")
        .field(FieldSpec::new("status", DataType::Word16, 0).with_coupling(bits(&[
            "pump_run",
            "pump_change_F",
            "press_warning_F",
            "press_alarm_F",
            "press_interlock_EN",
            "work_OK",
        ])))
        .field(FieldSpec::new("fault_code", DataType::UInt16, 16))
        .field(FieldSpec::new("flow", DataType::Float32, 32))
        .field(FieldSpec::new("pressure", DataType::Float32, 64))
        .field(
            FieldSpec::include(
                "command",
                96,
                vec![FieldSpec::new("commands", DataType::Word16, 0).with_coupling(bits(&[
                    "stop_pumps",
                    "start_pumps",
                    "reset",
                    "horn",
                ]))],
            )
            .with_prefix("command."),
        )
        .field(
            FieldSpec::new("local", DataType::Word16, 128)
                .with_coupling(bits(&["comm_OK", "delay_protect", "has_commands"])),
        )
        .field(FieldSpec::new("disconnect_time", DataType::UInt32, 160))
        .field(FieldSpec::new("command_ticks", DataType::UInt16, 192))
        .build()
}

/// Section layout.
pub fn section() -> Result<Structure> {
    StructureBuilder::new("section")
        .field(FieldSpec::new("status", DataType::Word32, 0).with_coupling(bits(&[
            "comm_OK",
            "work_OK",
            "press_warning_F",
            "press_alarm_F",
            "pump_run",
            "pump_change_F",
            "protect_F",
            "flow_warning_F",
            "flow_alarm_F",
            "alarm_F",
            "pre_stop_notice",
            "action_F",
            "autoStopCmd",
            "manStopCmd",
            "stop_pumps",
            "bypass",
            "manual_hangon",
            "line_action_source",
        ])))
        .field(FieldSpec::new("flow_begin", DataType::Float32, 32))
        .field(FieldSpec::new("flow_end", DataType::Float32, 64))
        .field(FieldSpec::new("flow_diff", DataType::Float32, 96))
        .field(FieldSpec::new("warning_time", DataType::UInt32, 128))
        .field(FieldSpec::new("alarm_time", DataType::UInt32, 160))
        .field(FieldSpec::new("action_countdown", DataType::Int32, 192))
        .field(FieldSpec::new("flow_diff_WH", DataType::Float32, 224))
        .field(FieldSpec::new("flow_diff_WH_delay", DataType::UInt32, 256))
        .field(FieldSpec::new("flow_diff_AH", DataType::Float32, 288))
        .field(FieldSpec::new("flow_diff_AH_delay", DataType::UInt32, 320))
        .field(FieldSpec::new("action_time", DataType::UInt32, 352))
        .group("status", SECTION_STATUS)
        .group("parameters", SECTION_PARAMETERS)
        .build()
}

/// Line layout.
pub fn line() -> Result<Structure> {
    StructureBuilder::new("line")
        .field(FieldSpec::new("status", DataType::Word16, 0).with_coupling(bits(&[
            "pump_run",
            "alarm_F",
            "pre_stop_notice",
            "autoStopCmd",
            "manStopCmd",
        ])))
        .field(FieldSpec::new("action_section", DataType::UInt16, 16).with_init(Value::UInt16(0)))
        .build()
}
