//! Configuration, the owned entity registry and the tick driver.
//!
//! A [`ControllerConfig`] describes nodes, sections and lines. Building it
//! against a set of named devices yields a [`Topology`], which owns every
//! entity and resolves names and numeric ids. A [`Controller`] drives the
//! topology: [`Controller::tick`] once per period, [`Controller::poll`] as
//! often as convenient to fire debounced work.
//!
//! # Example
//!
//! ```
//! use std::collections::HashMap;
//! use std::time::{Duration, Instant};
//! use pipeline_interlock::{
//!     Controller, ControllerConfig, LineConfig, NodeConfig, SectionConfig, SharedDevice,
//!     SimulatedPlc,
//! };
//!
//! let plc = SimulatedPlc::new(64);
//! let mut devices: HashMap<String, SharedDevice> = HashMap::new();
//! devices.insert("plc".into(), plc.shared());
//!
//! let config = ControllerConfig::new()
//!     .with_node(NodeConfig::new("pump-station", "plc"))
//!     .with_node(NodeConfig::new("terminal", "plc").with_remote_start(32))
//!     .with_section(
//!         SectionConfig::new("s1", "main")
//!             .with_begin_nodes(["pump-station"])
//!             .with_end_nodes(["terminal"])
//!             .with_pump_nodes(["pump-station"]),
//!     )
//!     .with_line(LineConfig::new("main"));
//!
//! let mut controller = Controller::new(&config, &devices).unwrap();
//! let t0 = Instant::now();
//! controller.tick(t0);
//! controller.poll(t0 + Duration::from_millis(100));
//! assert!(controller.topology().node("pump-station").unwrap().comm_ok());
//! ```

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::control::{
    CommandMask, Line, LineField, LineId, Node, NodeId, Section, SectionId, SectionNodes,
};
use crate::debounce::Debouncer;
use crate::error::{BuildError, Result};
use crate::layouts;
use crate::record::{IoWindow, Record};
use crate::registers::{RecordSource, RegisterMap};
use crate::transport::SharedDevice;

/// Default control period.
pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_millis(500);

/// Default quiet period before a command is written.
pub const DEFAULT_COMMAND_DEBOUNCE: Duration = Duration::from_millis(100);

/// Default quiet period before a line field is updated.
pub const DEFAULT_LINE_DEBOUNCE: Duration = Duration::from_millis(50);

/// Default number of ticks a command may stay unacknowledged.
pub const DEFAULT_COMMAND_RETRY_TICKS: u32 = 3;

fn default_window() -> IoWindow {
    IoWindow::new(0, 0, layouts::NODE_WINDOW)
}

fn default_delay_protect() -> u64 {
    10_000
}

/// Node configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique name.
    pub name: String,
    /// Numeric id, unique among nodes. Defaults to the position in the list.
    #[serde(default)]
    pub id: Option<u16>,
    /// Name of the device the node lives on.
    pub device: String,
    /// Device window holding the node payload, with its byte orders.
    #[serde(default = "default_window")]
    pub window: IoWindow,
    /// How long after a disconnect the protection flag stays set.
    #[serde(default = "default_delay_protect")]
    pub delay_protect_time_ms: u64,
    /// Command bits accepted from the device.
    #[serde(default)]
    pub command_mask: CommandMask,
}

impl NodeConfig {
    /// Creates a node on `device` with default settings.
    pub fn new(name: impl Into<String>, device: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            device: device.into(),
            window: default_window(),
            delay_protect_time_ms: default_delay_protect(),
            command_mask: CommandMask::ALL,
        }
    }

    /// Sets the numeric id.
    pub fn with_id(mut self, id: u16) -> Self {
        self.id = Some(id);
        self
    }

    /// Sets the device window.
    pub fn with_window(mut self, window: IoWindow) -> Self {
        self.window = window;
        self
    }

    /// Moves the window to another device address.
    pub fn with_remote_start(mut self, remote_start: usize) -> Self {
        self.window.remote_start = remote_start;
        self
    }

    /// Sets the delay protection time.
    pub fn with_delay_protect_time(mut self, time: Duration) -> Self {
        self.delay_protect_time_ms = time.as_millis() as u64;
        self
    }

    /// Sets the command mask.
    pub fn with_command_mask(mut self, mask: CommandMask) -> Self {
        self.command_mask = mask;
        self
    }
}

/// Section configuration. Durations are in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionConfig {
    /// Unique name.
    pub name: String,
    /// Numeric id, unique among sections. Defaults to the position in the list.
    #[serde(default)]
    pub id: Option<u16>,
    /// Parent line name.
    pub line: String,
    /// Upstream node names.
    #[serde(default)]
    pub begin_nodes: Vec<String>,
    /// Downstream node names.
    #[serde(default)]
    pub end_nodes: Vec<String>,
    /// Pump-capable node names.
    #[serde(default)]
    pub pump_nodes: Vec<String>,
    /// Flow difference warning threshold.
    #[serde(rename = "flow_diff_WH", default = "defaults::warning")]
    pub flow_diff_wh: f32,
    /// Time above the warning threshold before the warning flag sets.
    #[serde(rename = "flow_diff_WH_delay", default = "defaults::warning_delay")]
    pub flow_diff_wh_delay: u32,
    /// Flow difference alarm threshold.
    #[serde(rename = "flow_diff_AH", default = "defaults::alarm")]
    pub flow_diff_ah: f32,
    /// Time above the alarm threshold before the alarm flag sets.
    #[serde(rename = "flow_diff_AH_delay", default = "defaults::alarm_delay")]
    pub flow_diff_ah_delay: u32,
    /// Countdown from flow alarm to line stop.
    #[serde(default = "defaults::action_time")]
    pub action_time: u32,
}

mod defaults {
    pub fn warning() -> f32 {
        10.0
    }

    pub fn warning_delay() -> u32 {
        30_000
    }

    pub fn alarm() -> f32 {
        20.0
    }

    pub fn alarm_delay() -> u32 {
        60_000
    }

    pub fn action_time() -> u32 {
        60_000
    }
}

impl SectionConfig {
    /// Creates a section of `line` with default thresholds and no nodes.
    pub fn new(name: impl Into<String>, line: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            line: line.into(),
            begin_nodes: Vec::new(),
            end_nodes: Vec::new(),
            pump_nodes: Vec::new(),
            flow_diff_wh: defaults::warning(),
            flow_diff_wh_delay: defaults::warning_delay(),
            flow_diff_ah: defaults::alarm(),
            flow_diff_ah_delay: defaults::alarm_delay(),
            action_time: defaults::action_time(),
        }
    }

    /// Sets the numeric id.
    pub fn with_id(mut self, id: u16) -> Self {
        self.id = Some(id);
        self
    }

    /// Sets the upstream nodes.
    pub fn with_begin_nodes<'a>(mut self, names: impl IntoIterator<Item = &'a str>) -> Self {
        self.begin_nodes = names.into_iter().map(String::from).collect();
        self
    }

    /// Sets the downstream nodes.
    pub fn with_end_nodes<'a>(mut self, names: impl IntoIterator<Item = &'a str>) -> Self {
        self.end_nodes = names.into_iter().map(String::from).collect();
        self
    }

    /// Sets the pump-capable nodes.
    pub fn with_pump_nodes<'a>(mut self, names: impl IntoIterator<Item = &'a str>) -> Self {
        self.pump_nodes = names.into_iter().map(String::from).collect();
        self
    }

    /// Sets the warning threshold and delay (ms).
    pub fn with_flow_warning(mut self, limit: f32, delay_ms: u32) -> Self {
        self.flow_diff_wh = limit;
        self.flow_diff_wh_delay = delay_ms;
        self
    }

    /// Sets the alarm threshold and delay (ms).
    pub fn with_flow_alarm(mut self, limit: f32, delay_ms: u32) -> Self {
        self.flow_diff_ah = limit;
        self.flow_diff_ah_delay = delay_ms;
        self
    }

    /// Sets the action countdown (ms).
    pub fn with_action_time(mut self, ms: u32) -> Self {
        self.action_time = ms;
        self
    }
}

/// Line configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineConfig {
    /// Unique name.
    pub name: String,
    /// Numeric id, unique among lines. Defaults to the position in the list.
    #[serde(default)]
    pub id: Option<u16>,
}

impl LineConfig {
    /// Creates a line.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
        }
    }

    /// Sets the numeric id.
    pub fn with_id(mut self, id: u16) -> Self {
        self.id = Some(id);
        self
    }
}

/// Controller configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Control period.
    pub tick_period_ms: u64,
    /// Command debounce window.
    pub command_debounce_ms: u64,
    /// Line update debounce window.
    pub line_debounce_ms: u64,
    /// Ticks a command may stay unacknowledged before it is re-sent.
    pub command_retry_ticks: u32,
    /// Nodes.
    pub nodes: Vec<NodeConfig>,
    /// Sections.
    pub sections: Vec<SectionConfig>,
    /// Lines.
    pub lines: Vec<LineConfig>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            tick_period_ms: DEFAULT_TICK_PERIOD.as_millis() as u64,
            command_debounce_ms: DEFAULT_COMMAND_DEBOUNCE.as_millis() as u64,
            line_debounce_ms: DEFAULT_LINE_DEBOUNCE.as_millis() as u64,
            command_retry_ticks: DEFAULT_COMMAND_RETRY_TICKS,
            nodes: Vec::new(),
            sections: Vec::new(),
            lines: Vec::new(),
        }
    }
}

impl ControllerConfig {
    /// Creates an empty configuration with default timing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` on malformed input.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Sets the control period.
    pub fn with_tick_period(mut self, period: Duration) -> Self {
        self.tick_period_ms = period.as_millis() as u64;
        self
    }

    /// Sets the command debounce window.
    pub fn with_command_debounce(mut self, window: Duration) -> Self {
        self.command_debounce_ms = window.as_millis() as u64;
        self
    }

    /// Sets the line debounce window.
    pub fn with_line_debounce(mut self, window: Duration) -> Self {
        self.line_debounce_ms = window.as_millis() as u64;
        self
    }

    /// Sets the command retry tick count.
    pub fn with_command_retry_ticks(mut self, ticks: u32) -> Self {
        self.command_retry_ticks = ticks;
        self
    }

    /// Adds a node.
    pub fn with_node(mut self, node: NodeConfig) -> Self {
        self.nodes.push(node);
        self
    }

    /// Adds a section.
    pub fn with_section(mut self, section: SectionConfig) -> Self {
        self.sections.push(section);
        self
    }

    /// Adds a line.
    pub fn with_line(mut self, line: LineConfig) -> Self {
        self.lines.push(line);
        self
    }
}

/// Entity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// A node.
    Node,
    /// A section.
    Section,
    /// A line.
    Line,
}

/// Reference to any entity of a topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityRef {
    /// A node.
    Node(NodeId),
    /// A section.
    Section(SectionId),
    /// A line.
    Line(LineId),
}

impl EntityRef {
    /// Kind of the entity.
    pub fn kind(self) -> EntityKind {
        match self {
            EntityRef::Node(_) => EntityKind::Node,
            EntityRef::Section(_) => EntityKind::Section,
            EntityRef::Line(_) => EntityKind::Line,
        }
    }
}

/// Every entity, built once from configuration.
#[derive(Debug)]
pub struct Topology {
    nodes: Vec<Node>,
    sections: Vec<Section>,
    lines: Vec<Line>,
    names: HashMap<String, EntityRef>,
    ids: HashMap<(EntityKind, u16), EntityRef>,
}

impl Topology {
    /// Builds every entity.
    ///
    /// # Errors
    ///
    /// `UnknownDevice` for a node on a missing device, `UnknownEntity` for a
    /// dangling node or line reference, `InvalidConfig` for duplicate names
    /// or ids, plus any layout or binding error.
    pub fn build(config: &ControllerConfig, devices: &HashMap<String, SharedDevice>) -> Result<Self> {
        let node_layout = Arc::new(layouts::node()?);
        let section_layout = Arc::new(layouts::section()?);
        let line_layout = Arc::new(layouts::line()?);

        let mut topology = Self {
            nodes: Vec::with_capacity(config.nodes.len()),
            sections: Vec::with_capacity(config.sections.len()),
            lines: Vec::with_capacity(config.lines.len()),
            names: HashMap::new(),
            ids: HashMap::new(),
        };

        for (i, cfg) in config.nodes.iter().enumerate() {
            let device = devices
                .get(&cfg.device)
                .ok_or_else(|| BuildError::UnknownDevice {
                    name: cfg.device.clone(),
                })?;
            let id = NodeId(i);
            topology.register(&cfg.name, cfg.id, i, EntityRef::Node(id))?;
            topology.nodes.push(Node::new(
                id,
                cfg,
                Arc::clone(&node_layout),
                Rc::clone(device),
                config.command_retry_ticks,
            )?);
        }

        for (i, cfg) in config.lines.iter().enumerate() {
            topology.register(&cfg.name, cfg.id, i, EntityRef::Line(LineId(i)))?;
        }

        let mut members: Vec<Vec<SectionId>> = vec![Vec::new(); config.lines.len()];
        for (i, cfg) in config.sections.iter().enumerate() {
            let id = SectionId(i);
            let line = topology.line_id(&cfg.line)?;
            let nodes = SectionNodes {
                begin: topology.node_ids(&cfg.begin_nodes)?,
                end: topology.node_ids(&cfg.end_nodes)?,
                pumps: topology.node_ids(&cfg.pump_nodes)?,
            };
            topology.register(&cfg.name, cfg.id, i, EntityRef::Section(id))?;
            topology.sections.push(Section::new(
                id,
                cfg,
                line,
                nodes,
                Arc::clone(&section_layout),
            )?);
            members[line.index()].push(id);
        }

        for ((i, cfg), sections) in config.lines.iter().enumerate().zip(members) {
            topology.lines.push(Line::new(
                LineId(i),
                cfg,
                sections,
                Arc::clone(&line_layout),
            )?);
        }

        tracing::info!(
            nodes = topology.nodes.len(),
            sections = topology.sections.len(),
            lines = topology.lines.len(),
            "topology built"
        );
        Ok(topology)
    }

    fn register(&mut self, name: &str, id: Option<u16>, index: usize, entity: EntityRef) -> Result<()> {
        let id = id.unwrap_or_else(|| u16::try_from(index).unwrap_or(u16::MAX));
        if self.names.insert(name.to_string(), entity).is_some() {
            return Err(BuildError::invalid_config(format!("duplicate entity name '{}'", name)));
        }
        if self.ids.insert((entity.kind(), id), entity).is_some() {
            return Err(BuildError::invalid_config(format!(
                "duplicate {:?} id {} ('{}')",
                entity.kind(),
                id,
                name
            )));
        }
        Ok(())
    }

    fn node_ids(&self, names: &[String]) -> Result<Vec<NodeId>> {
        names
            .iter()
            .map(|name| match self.names.get(name) {
                Some(EntityRef::Node(id)) => Ok(*id),
                _ => Err(BuildError::unknown_entity("node", name.as_str())),
            })
            .collect()
    }

    fn line_id(&self, name: &str) -> Result<LineId> {
        match self.names.get(name) {
            Some(EntityRef::Line(id)) => Ok(*id),
            _ => Err(BuildError::unknown_entity("line", name)),
        }
    }

    /// Resolves a name.
    pub fn lookup(&self, name: &str) -> Option<EntityRef> {
        self.names.get(name).copied()
    }

    /// Resolves a numeric id.
    pub fn lookup_id(&self, kind: EntityKind, id: u16) -> Option<EntityRef> {
        self.ids.get(&(kind, id)).copied()
    }

    /// All nodes.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// All sections.
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// All lines.
    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    /// Node by name.
    pub fn node(&self, name: &str) -> Option<&Node> {
        match self.lookup(name)? {
            EntityRef::Node(id) => self.nodes.get(id.index()),
            _ => None,
        }
    }

    /// Section by name.
    pub fn section(&self, name: &str) -> Option<&Section> {
        match self.lookup(name)? {
            EntityRef::Section(id) => self.sections.get(id.index()),
            _ => None,
        }
    }

    /// Mutable section by name.
    pub fn section_mut(&mut self, name: &str) -> Option<&mut Section> {
        match self.lookup(name)? {
            EntityRef::Section(id) => self.sections.get_mut(id.index()),
            _ => None,
        }
    }

    /// Line by name.
    pub fn line(&self, name: &str) -> Option<&Line> {
        match self.lookup(name)? {
            EntityRef::Line(id) => self.lines.get(id.index()),
            _ => None,
        }
    }

    /// Mutable line by name.
    pub fn line_mut(&mut self, name: &str) -> Option<&mut Line> {
        match self.lookup(name)? {
            EntityRef::Line(id) => self.lines.get_mut(id.index()),
            _ => None,
        }
    }

    /// Exposes every record to a register server: nodes on `unit`, sections
    /// on `unit + 1`, lines on `unit + 2`. An entity with numeric id `n`
    /// starts at register `n * registers_per_record`.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if an id pushes a record past the address space.
    pub fn register_map(&self, unit: u8) -> Result<RegisterMap<EntityRef>> {
        let mut map = RegisterMap::new();
        let mut ids: Vec<(&(EntityKind, u16), &EntityRef)> = self.ids.iter().collect();
        ids.sort_by_key(|((kind, id), _)| (*kind as u8, *id));
        for (&(kind, id), &entity) in ids {
            let Some(record) = self.record(&entity) else {
                continue;
            };
            let stride = u32::try_from(record.buffer().len().div_ceil(2)).unwrap_or(u32::MAX);
            let base = u16::try_from(u32::from(id).saturating_mul(stride)).map_err(|_| {
                BuildError::invalid_config(format!("id {} of '{}' is out of register range", id, record.name()))
            })?;
            map.attach(unit.wrapping_add(kind as u8), base, entity, record)?;
        }
        Ok(map)
    }
}

impl RecordSource<EntityRef> for Topology {
    fn record(&self, key: &EntityRef) -> Option<&Record> {
        match *key {
            EntityRef::Node(id) => self.nodes.get(id.index()).map(Node::record),
            EntityRef::Section(id) => self.sections.get(id.index()).map(Section::record),
            EntityRef::Line(id) => self.lines.get(id.index()).map(Line::record),
        }
    }

    fn record_mut(&mut self, key: &EntityRef) -> Option<&mut Record> {
        match *key {
            EntityRef::Node(id) => self.nodes.get_mut(id.index()).map(Node::record_mut),
            EntityRef::Section(id) => self.sections.get_mut(id.index()).map(Section::record_mut),
            EntityRef::Line(id) => self.lines.get_mut(id.index()).map(Line::record_mut),
        }
    }
}

/// Periodic driver: nodes, then sections, then lines.
#[derive(Debug)]
pub struct Controller {
    topology: Topology,
    period: Duration,
    commands: Debouncer<NodeId>,
    line_updates: Debouncer<(LineId, LineField)>,
    ticks: u64,
}

impl Controller {
    /// Builds the topology and the controller.
    pub fn new(config: &ControllerConfig, devices: &HashMap<String, SharedDevice>) -> Result<Self> {
        Ok(Self::with_topology(Topology::build(config, devices)?, config))
    }

    /// Drives an existing topology with the timing of `config`.
    pub fn with_topology(topology: Topology, config: &ControllerConfig) -> Self {
        Self {
            topology,
            period: Duration::from_millis(config.tick_period_ms),
            commands: Debouncer::new(Duration::from_millis(config.command_debounce_ms)),
            line_updates: Debouncer::new(Duration::from_millis(config.line_debounce_ms)),
            ticks: 0,
        }
    }

    /// The topology.
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Mutable topology, for operator inputs between ticks.
    pub fn topology_mut(&mut self) -> &mut Topology {
        &mut self.topology
    }

    /// Control period.
    pub fn tick_period(&self) -> Duration {
        self.period
    }

    /// Ticks run so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Earliest pending debounced action.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.commands.next_deadline(), self.line_updates.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Runs one control period.
    ///
    /// Nodes are read first, then sections and lines are recomputed. Command
    /// words that changed are queued for [`poll`](Self::poll) rather than
    /// written here.
    ///
    /// # Arguments
    ///
    /// * `now` - Current time, used as the start of every debounce window
    ///
    /// # Example
    ///
    /// ```
    /// use std::collections::HashMap;
    /// use std::time::{Duration, Instant};
    /// use pipeline_interlock::{
    ///     Controller, ControllerConfig, LineConfig, NodeConfig, SectionConfig, SharedDevice,
    ///     SimulatedPlc,
    /// };
    ///
    /// let plc = SimulatedPlc::new(16);
    /// // pump_run, press_alarm_F, press_interlock_EN, work_OK
    /// plc.poke(0, &[0x00, 0x39]);
    /// let mut devices: HashMap<String, SharedDevice> = HashMap::new();
    /// devices.insert("plc".into(), plc.shared());
    ///
    /// let config = ControllerConfig::new()
    ///     .with_node(NodeConfig::new("station", "plc"))
    ///     .with_section(
    ///         SectionConfig::new("s1", "main")
    ///             .with_begin_nodes(["station"])
    ///             .with_pump_nodes(["station"]),
    ///     )
    ///     .with_line(LineConfig::new("main"));
    /// let mut controller = Controller::new(&config, &devices).unwrap();
    ///
    /// let t0 = Instant::now();
    /// controller.tick(t0);
    /// assert!(controller.topology().section("s1").unwrap().stop_pumps());
    /// assert_eq!(plc.peek(12, 2), [0, 0]);
    ///
    /// controller.poll(t0 + Duration::from_millis(100));
    /// assert_eq!(plc.peek(12, 2), [0, 1]);
    /// ```
    pub fn tick(&mut self, now: Instant) {
        let dt = self.period;
        let Topology {
            nodes,
            sections,
            lines,
            ..
        } = &mut self.topology;

        for node in nodes.iter_mut() {
            node.tick(dt);
        }
        for section in sections.iter_mut() {
            let line = &mut lines[section.line().index()];
            section.tick(nodes, line, dt);
        }
        for node in nodes.iter_mut() {
            node.apply_stop_request();
        }
        for line in lines.iter_mut() {
            line.tick(sections, now, &mut self.line_updates);
        }

        self.ticks += 1;
        self.collect_commands(now);
        tracing::trace!(tick = self.ticks, "tick complete");
    }

    /// Fires debounced command writes and line updates that are due.
    pub fn poll(&mut self, now: Instant) {
        self.collect_commands(now);
        for id in self.commands.poll(now) {
            if let Some(node) = self.topology.nodes.get_mut(id.index()) {
                // failures are logged by the node; the next read re-arms the command
                let _ = node.dispatch();
            }
        }
        for (id, field) in self.line_updates.poll(now) {
            if let Some(line) = self.topology.lines.get_mut(id.index()) {
                line.apply(field);
            }
        }
    }

    fn collect_commands(&mut self, now: Instant) {
        for node in &self.topology.nodes {
            if node.take_dirty() {
                self.commands.trigger(node.id(), now);
            }
        }
    }
}
