//! Node processor: one instrument or pump station behind a device.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::control::{millis, NodeId};
use crate::error::{Error, Result};
use crate::group::FieldGroup;
use crate::layouts::{NODE_INPUTS, NODE_OUTPUTS};
use crate::record::{Record, RecordEvent};
use crate::structure::Structure;
use crate::tag::TagId;
use crate::topology::NodeConfig;
use crate::transport::SharedDevice;
use crate::utils::format_hex;

/// Command bits accepted from the device image.
///
/// Bits outside the mask are cleared after every read, for firmware that
/// leaves unsupported command bits set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandMask(pub u16);

impl CommandMask {
    /// Accepts every bit.
    pub const ALL: Self = Self(0xFFFF);

    /// Applies the mask.
    pub fn apply(self, commands: u16) -> u16 {
        commands & self.0
    }
}

impl Default for CommandMask {
    fn default() -> Self {
        Self::ALL
    }
}

#[derive(Debug, Clone, Copy)]
struct NodeTags {
    pump_run: TagId,
    pump_change: TagId,
    press_warning: TagId,
    press_alarm: TagId,
    press_interlock_en: TagId,
    work_ok: TagId,
    flow: TagId,
    commands: TagId,
    stop_pumps: TagId,
    comm_ok: TagId,
    delay_protect: TagId,
    has_commands: TagId,
    disconnect_time: TagId,
    command_ticks: TagId,
}

impl NodeTags {
    fn resolve(r: &Record) -> Result<Self> {
        Ok(Self {
            pump_run: r.require("pump_run")?,
            pump_change: r.require("pump_change_F")?,
            press_warning: r.require("press_warning_F")?,
            press_alarm: r.require("press_alarm_F")?,
            press_interlock_en: r.require("press_interlock_EN")?,
            work_ok: r.require("work_OK")?,
            flow: r.require("flow")?,
            commands: r.require("command.commands")?,
            stop_pumps: r.require("command.stop_pumps")?,
            comm_ok: r.require("comm_OK")?,
            delay_protect: r.require("delay_protect")?,
            has_commands: r.require("has_commands")?,
            disconnect_time: r.require("disconnect_time")?,
            command_ticks: r.require("command_ticks")?,
        })
    }
}

/// A device-backed node.
pub struct Node {
    id: NodeId,
    record: Record,
    tags: NodeTags,
    inputs: FieldGroup,
    outputs: FieldGroup,
    command_mask: CommandMask,
    delay_protect_time: Duration,
    retry_ticks: u32,
    stop_request: Option<bool>,
    dirty: Rc<Cell<bool>>,
    muted: Rc<Cell<bool>>,
}

impl Node {
    /// Creates a node bound to `device`.
    ///
    /// # Errors
    ///
    /// Configuration errors from the window binding or the layout.
    pub fn new(
        id: NodeId,
        config: &NodeConfig,
        structure: Arc<Structure>,
        device: SharedDevice,
        retry_ticks: u32,
    ) -> Result<Self> {
        let mut record = Record::new(structure, config.name.clone());
        record.set_io(device, config.window)?;
        let tags = NodeTags::resolve(&record)?;
        let inputs = record.create_group(NODE_INPUTS)?;
        let outputs = record.create_group(NODE_OUTPUTS)?;

        let dirty = Rc::new(Cell::new(false));
        let muted = Rc::new(Cell::new(false));
        let mut watched = record.coupled(tags.commands).to_vec();
        watched.push(tags.commands);
        {
            let dirty = Rc::clone(&dirty);
            let muted = Rc::clone(&muted);
            record.subscribe(move |_, event| {
                if let RecordEvent::Changed(c) = event {
                    if !muted.get() && watched.contains(&c.tag) {
                        dirty.set(true);
                    }
                }
            })?;
        }

        Ok(Self {
            id,
            record,
            tags,
            inputs,
            outputs,
            command_mask: config.command_mask,
            delay_protect_time: Duration::from_millis(config.delay_protect_time_ms),
            retry_ticks: retry_ticks.max(1),
            stop_request: None,
            dirty,
            muted,
        })
    }

    /// Node handle.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Node name.
    pub fn name(&self) -> &str {
        self.record.name()
    }

    /// Backing record.
    pub fn record(&self) -> &Record {
        &self.record
    }

    /// Mutable backing record.
    pub fn record_mut(&mut self) -> &mut Record {
        &mut self.record
    }

    /// Communication healthy on the last tick.
    pub fn comm_ok(&self) -> bool {
        self.record.get_bool(self.tags.comm_ok)
    }

    /// Device reports itself healthy.
    pub fn work_ok(&self) -> bool {
        self.record.get_bool(self.tags.work_ok)
    }

    /// Pump running.
    pub fn pump_run(&self) -> bool {
        self.record.get_bool(self.tags.pump_run)
    }

    /// Pump changeover in progress.
    pub fn pump_change(&self) -> bool {
        self.record.get_bool(self.tags.pump_change)
    }

    /// Pressure warning flag.
    pub fn press_warning(&self) -> bool {
        self.record.get_bool(self.tags.press_warning)
    }

    /// Pressure alarm, honoured only when the node enables the pressure interlock.
    pub fn press_interlock(&self) -> bool {
        self.record.get_bool(self.tags.press_alarm)
            && self.record.get_bool(self.tags.press_interlock_en)
    }

    /// Flow reading.
    pub fn flow(&self) -> f32 {
        self.record.get_f32(self.tags.flow)
    }

    /// Within the protection window after a disconnect.
    pub fn delay_protect(&self) -> bool {
        self.record.get_bool(self.tags.delay_protect)
    }

    /// Unacknowledged command bits present.
    pub fn has_commands(&self) -> bool {
        self.record.get_bool(self.tags.has_commands)
    }

    /// Sets the stop command bit. Returns whether it changed.
    pub fn set_stop_command(&mut self, stop: bool) -> bool {
        self.record.set_bool(self.tags.stop_pumps, stop)
    }

    /// Votes on the stop command for this tick. A node shared by several
    /// sections stops if any of them asks.
    pub fn request_stop(&mut self, stop: bool) {
        self.stop_request = Some(self.stop_request.unwrap_or(false) || stop);
    }

    /// Commits the votes collected by [`request_stop`](Self::request_stop).
    /// Without votes the command bit is left alone. Returns whether it changed.
    pub fn apply_stop_request(&mut self) -> bool {
        match self.stop_request.take() {
            Some(stop) => self.set_stop_command(stop),
            None => false,
        }
    }

    /// Stop command bit.
    pub fn stop_command(&self) -> bool {
        self.record.get_bool(self.tags.stop_pumps)
    }

    /// Returns and clears the pending-dispatch flag.
    pub fn take_dirty(&self) -> bool {
        self.dirty.replace(false)
    }

    /// One control period.
    pub fn tick(&mut self, dt: Duration) {
        let comm = self.record.is_connected() && self.read_inputs();
        let t = self.tags;

        if comm {
            self.mask_commands();
            self.record.set_u32(t.disconnect_time, 0);
            self.record.set_bool(t.delay_protect, true);

            let pending = self.record.get_u32(t.commands) != 0;
            self.record.set_bool(t.has_commands, pending);
            if pending {
                let ticks = self.record.get_u32(t.command_ticks) + 1;
                if ticks >= self.retry_ticks {
                    tracing::warn!(node = %self.name(), ticks, "command not acknowledged, re-sending");
                    self.dirty.set(true);
                    self.record.set_u32(t.command_ticks, 0);
                } else {
                    self.record.set_u32(t.command_ticks, ticks);
                }
            } else {
                self.record.set_u32(t.command_ticks, 0);
            }
        } else {
            let elapsed = self.record.get_u32(t.disconnect_time).saturating_add(millis(dt));
            self.record.set_u32(t.disconnect_time, elapsed);
            if elapsed > millis(self.delay_protect_time) && self.record.set_bool(t.delay_protect, false) {
                tracing::info!(node = %self.name(), elapsed_ms = elapsed, "delay protection expired");
            }
        }

        if self.record.set_bool(t.comm_ok, comm) {
            if comm {
                tracing::info!(node = %self.name(), "communication restored");
            } else {
                tracing::warn!(node = %self.name(), "communication lost");
            }
        }
    }

    fn read_inputs(&mut self) -> bool {
        self.muted.set(true);
        let result = self.inputs.read(&mut self.record);
        self.muted.set(false);
        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(node = %self.name(), error = %e, "read failed");
                false
            }
        }
    }

    fn mask_commands(&mut self) {
        let raw = self.record.get_u32(self.tags.commands) as u16;
        let masked = self.command_mask.apply(raw);
        if masked != raw {
            self.muted.set(true);
            self.record.set_u32(self.tags.commands, u32::from(masked));
            self.muted.set(false);
        }
    }

    /// Writes the command word to the device.
    pub fn dispatch(&mut self) -> std::result::Result<(), Error> {
        match self.outputs.write(&mut self.record) {
            Ok(()) => {
                tracing::debug!(
                    node = %self.name(),
                    commands = %format_hex(self.record.get_u32(self.tags.commands) as u16),
                    "commands dispatched"
                );
                self.record.set_u32(self.tags.command_ticks, 0);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(node = %self.name(), error = %e, "command dispatch failed");
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("record", &self.record)
            .field("command_mask", &self.command_mask)
            .finish()
    }
}
