//! Section processor: a monitored pipeline segment between nodes.
//!
//! Every tick recomputes the section record from its member nodes:
//!
//! - `comm_OK`, `work_OK`: AND over all members
//! - `press_warning_F`, `press_alarm_F`, `pump_change_F`: OR over begin nodes
//! - `pump_run`: OR over pump nodes
//! - `protect_F`: communication and devices healthy, no pump changeover,
//!   no bypass and no manual hang-on
//! - `flow_diff = Σ flow(begin) - Σ flow(end)`, with independent warning and
//!   alarm timers that reset whenever the difference drops back under the
//!   threshold
//!
//! A sustained flow alarm while protected and pumping starts the action
//! countdown; on expiry the parent line is stopped. A pressure interlock
//! stops this section's own pumps at once.

use std::sync::Arc;
use std::time::Duration;

use crate::control::{millis, Line, LineId, Node, NodeId, SectionId};
use crate::datatype::Value;
use crate::error::{BuildError, Result};
use crate::group::FieldGroup;
use crate::layouts::SECTION_PARAMETER_FIELDS;
use crate::record::Record;
use crate::structure::Structure;
use crate::tag::TagId;
use crate::topology::SectionConfig;

#[derive(Debug, Clone, Copy)]
struct SectionTags {
    comm_ok: TagId,
    work_ok: TagId,
    press_warning: TagId,
    press_alarm: TagId,
    pump_run: TagId,
    pump_change: TagId,
    protect: TagId,
    flow_warning: TagId,
    flow_alarm: TagId,
    alarm: TagId,
    pre_stop_notice: TagId,
    action: TagId,
    auto_stop: TagId,
    man_stop: TagId,
    stop_pumps: TagId,
    bypass: TagId,
    manual_hangon: TagId,
    line_action_source: TagId,
    flow_begin: TagId,
    flow_end: TagId,
    flow_diff: TagId,
    warning_time: TagId,
    alarm_time: TagId,
    action_countdown: TagId,
    warning_limit: TagId,
    warning_delay: TagId,
    alarm_limit: TagId,
    alarm_delay: TagId,
    action_time: TagId,
}

impl SectionTags {
    fn resolve(r: &Record) -> Result<Self> {
        Ok(Self {
            comm_ok: r.require("comm_OK")?,
            work_ok: r.require("work_OK")?,
            press_warning: r.require("press_warning_F")?,
            press_alarm: r.require("press_alarm_F")?,
            pump_run: r.require("pump_run")?,
            pump_change: r.require("pump_change_F")?,
            protect: r.require("protect_F")?,
            flow_warning: r.require("flow_warning_F")?,
            flow_alarm: r.require("flow_alarm_F")?,
            alarm: r.require("alarm_F")?,
            pre_stop_notice: r.require("pre_stop_notice")?,
            action: r.require("action_F")?,
            auto_stop: r.require("autoStopCmd")?,
            man_stop: r.require("manStopCmd")?,
            stop_pumps: r.require("stop_pumps")?,
            bypass: r.require("bypass")?,
            manual_hangon: r.require("manual_hangon")?,
            line_action_source: r.require("line_action_source")?,
            flow_begin: r.require("flow_begin")?,
            flow_end: r.require("flow_end")?,
            flow_diff: r.require("flow_diff")?,
            warning_time: r.require("warning_time")?,
            alarm_time: r.require("alarm_time")?,
            action_countdown: r.require("action_countdown")?,
            warning_limit: r.require("flow_diff_WH")?,
            warning_delay: r.require("flow_diff_WH_delay")?,
            alarm_limit: r.require("flow_diff_AH")?,
            alarm_delay: r.require("flow_diff_AH_delay")?,
            action_time: r.require("action_time")?,
        })
    }
}

/// Member nodes of a section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionNodes {
    /// Upstream nodes.
    pub begin: Vec<NodeId>,
    /// Downstream nodes.
    pub end: Vec<NodeId>,
    /// Nodes able to run a pump.
    pub pumps: Vec<NodeId>,
}

impl SectionNodes {
    fn all(&self) -> Vec<NodeId> {
        let mut all: Vec<NodeId> = self
            .begin
            .iter()
            .chain(&self.end)
            .chain(&self.pumps)
            .copied()
            .collect();
        all.sort_unstable();
        all.dedup();
        all
    }
}

/// A pipeline section.
pub struct Section {
    id: SectionId,
    line: LineId,
    nodes: SectionNodes,
    members: Vec<NodeId>,
    record: Record,
    tags: SectionTags,
    defaults: Record,
    parameters: FieldGroup,
}

impl Section {
    /// Creates a section and seeds its parameters from `config`.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` for a section without nodes, or layout errors.
    pub fn new(
        id: SectionId,
        config: &SectionConfig,
        line: LineId,
        nodes: SectionNodes,
        structure: Arc<Structure>,
    ) -> Result<Self> {
        if nodes.begin.is_empty() && nodes.end.is_empty() {
            return Err(BuildError::invalid_config(format!(
                "section '{}' has neither begin nor end nodes",
                config.name
            )));
        }
        let defaults = Record::with_values(
            Arc::clone(&structure),
            format!("{}.defaults", config.name),
            [
                ("flow_diff_WH", Value::Float32(config.flow_diff_wh)),
                ("flow_diff_WH_delay", Value::UInt32(config.flow_diff_wh_delay)),
                ("flow_diff_AH", Value::Float32(config.flow_diff_ah)),
                ("flow_diff_AH_delay", Value::UInt32(config.flow_diff_ah_delay)),
                ("action_time", Value::UInt32(config.action_time)),
            ],
        )?;
        let record = Record::new(structure, config.name.clone());
        let tags = SectionTags::resolve(&record)?;
        let parameters = record.create_local_group(SECTION_PARAMETER_FIELDS)?;

        let mut section = Self {
            id,
            line,
            members: nodes.all(),
            nodes,
            record,
            tags,
            defaults,
            parameters,
        };
        section.reset_parameters();
        Ok(section)
    }

    /// Section handle.
    pub fn id(&self) -> SectionId {
        self.id
    }

    /// Section name.
    pub fn name(&self) -> &str {
        self.record.name()
    }

    /// Parent line.
    pub fn line(&self) -> LineId {
        self.line
    }

    /// Member nodes.
    pub fn nodes(&self) -> &SectionNodes {
        &self.nodes
    }

    /// Backing record.
    pub fn record(&self) -> &Record {
        &self.record
    }

    /// Mutable backing record, for operator inputs.
    pub fn record_mut(&mut self) -> &mut Record {
        &mut self.record
    }

    /// Restores the configured parameters.
    pub fn reset_parameters(&mut self) {
        let copied = self.parameters.copy_from(&mut self.record, &self.defaults);
        tracing::debug!(section = %self.name(), copied, "parameters reset");
    }

    /// Pumps running in this section.
    pub fn pump_run(&self) -> bool {
        self.record.get_bool(self.tags.pump_run)
    }

    /// Flow or pressure alarm active.
    pub fn alarm(&self) -> bool {
        self.record.get_bool(self.tags.alarm)
    }

    /// Action countdown running.
    pub fn pre_stop_notice(&self) -> bool {
        self.record.get_bool(self.tags.pre_stop_notice)
    }

    /// Interlock action latched.
    pub fn action(&self) -> bool {
        self.record.get_bool(self.tags.action)
    }

    /// Stop requested for this section's pumps.
    pub fn stop_pumps(&self) -> bool {
        self.record.get_bool(self.tags.stop_pumps)
    }

    /// One control period.
    ///
    /// # Arguments
    ///
    /// * `nodes` - The whole topology's node list, already ticked this period
    /// * `line` - The parent line, which receives the flow interlock stop
    /// * `dt` - Length of the period
    ///
    /// Stop requests for pump nodes are only collected here; the caller
    /// commits them with [`Node::apply_stop_request`] once every section
    /// has ticked.
    ///
    /// # Example
    ///
    /// ```
    /// use std::sync::Arc;
    /// use std::time::Duration;
    /// use pipeline_interlock::control::SectionNodes;
    /// use pipeline_interlock::{
    ///     layouts, Line, LineConfig, LineId, Node, NodeConfig, NodeId, Section, SectionConfig,
    ///     SectionId, SimulatedPlc,
    /// };
    ///
    /// fn main() -> pipeline_interlock::Result<()> {
    ///     // pump_run, press_alarm_F, press_interlock_EN, work_OK
    ///     let plc = SimulatedPlc::new(16);
    ///     plc.poke(0, &[0x00, 0x39]);
    ///
    ///     let node_layout = Arc::new(layouts::node()?);
    ///     let mut nodes =
    ///         vec![Node::new(NodeId(0), &NodeConfig::new("n0", "plc"), node_layout, plc.shared(), 3)?];
    ///     let mut line = Line::new(
    ///         LineId(0),
    ///         &LineConfig::new("main"),
    ///         vec![SectionId(0)],
    ///         Arc::new(layouts::line()?),
    ///     )?;
    ///     let members = SectionNodes {
    ///         begin: vec![NodeId(0)],
    ///         end: Vec::new(),
    ///         pumps: vec![NodeId(0)],
    ///     };
    ///     let mut section = Section::new(
    ///         SectionId(0),
    ///         &SectionConfig::new("s1", "main"),
    ///         LineId(0),
    ///         members,
    ///         Arc::new(layouts::section()?),
    ///     )?;
    ///
    ///     let dt = Duration::from_millis(500);
    ///     nodes[0].tick(dt);
    ///     section.tick(&mut nodes, &mut line, dt);
    ///     nodes[0].apply_stop_request();
    ///
    ///     assert!(section.alarm());
    ///     assert!(section.stop_pumps());
    ///     assert!(nodes[0].stop_command());
    ///     Ok(())
    /// }
    /// ```
    pub fn tick(&mut self, nodes: &mut [Node], line: &mut Line, dt: Duration) {
        let t = self.tags;
        let dt_ms = millis(dt);
        let node = |id: &NodeId| &nodes[id.index()];

        let comm = self.members.iter().all(|id| node(id).comm_ok());
        let work = self.members.iter().all(|id| node(id).work_ok());
        let press_warning = self.nodes.begin.iter().any(|id| node(id).press_warning());
        let press_alarm = self.nodes.begin.iter().any(|id| node(id).press_interlock());
        let pump_run = self.nodes.pumps.iter().any(|id| node(id).pump_run());
        let pump_change = self.nodes.begin.iter().any(|id| node(id).pump_change());
        let flow_begin: f32 = self.nodes.begin.iter().map(|id| node(id).flow()).sum();
        let flow_end: f32 = self.nodes.end.iter().map(|id| node(id).flow()).sum();
        let flow_diff = flow_begin - flow_end;

        let r = &mut self.record;
        r.set_bool(t.comm_ok, comm);
        r.set_bool(t.work_ok, work);
        r.set_bool(t.press_warning, press_warning);
        r.set_bool(t.press_alarm, press_alarm);
        r.set_bool(t.pump_run, pump_run);
        r.set_bool(t.pump_change, pump_change);

        let protect = comm
            && work
            && !pump_change
            && !r.get_bool(t.bypass)
            && !r.get_bool(t.manual_hangon);
        r.set_bool(t.protect, protect);

        r.set_f32(t.flow_begin, flow_begin);
        r.set_f32(t.flow_end, flow_end);
        r.set_f32(t.flow_diff, flow_diff);

        let above = flow_diff > r.get_f32(t.warning_limit);
        let delay = r.get_u32(t.warning_delay);
        let warning = accumulate(r, t.warning_time, above, dt_ms, delay);
        r.set_bool(t.flow_warning, warning);
        let above = flow_diff > r.get_f32(t.alarm_limit);
        let delay = r.get_u32(t.alarm_delay);
        let flow_alarm = accumulate(r, t.alarm_time, above, dt_ms, delay);
        r.set_bool(t.flow_alarm, flow_alarm);
        let alarm = flow_alarm || press_alarm;
        r.set_bool(t.alarm, alarm);

        // action countdown
        let counting = flow_alarm && protect && pump_run;
        let action_time = i64::from(r.get_u32(t.action_time));
        let remaining = if counting {
            let from = if r.get_bool(t.pre_stop_notice) {
                r.get(t.action_countdown).as_i64().unwrap_or(action_time)
            } else {
                action_time
            };
            (from - i64::from(dt_ms)).max(0)
        } else {
            action_time
        };
        r.set_i32(
            t.action_countdown,
            remaining.clamp(0, i64::from(i32::MAX)) as i32,
        );
        r.set_bool(t.pre_stop_notice, counting);

        if press_alarm && pump_run && r.set_bool(t.auto_stop, true) {
            tracing::warn!(section = %r.name(), "pressure interlock: stopping section pumps");
        }
        if counting && remaining == 0 {
            r.set_bool(t.line_action_source, true);
            if line.request_auto_stop(self.id) {
                tracing::warn!(section = %r.name(), "flow interlock: stopping line");
            }
        }
        if r.get_bool(t.auto_stop) || r.get_bool(t.line_action_source) {
            r.set_bool(t.action, true);
        }

        if !pump_run {
            r.set_bool(t.auto_stop, false);
        }
        if r.get_bool(t.action)
            && pump_run
            && !alarm
            && !r.get_bool(t.auto_stop)
            && !line.auto_stop()
        {
            r.set_bool(t.action, false);
            r.set_bool(t.line_action_source, false);
            tracing::info!(section = %r.name(), "interlock action released");
        }

        let stop = (r.get_bool(t.auto_stop)
            || r.get_bool(t.man_stop)
            || line.auto_stop()
            || line.man_stop())
            && pump_run;
        r.set_bool(t.stop_pumps, stop);

        for id in &self.nodes.pumps {
            let n = &mut nodes[id.index()];
            let node_stop = stop && n.pump_run();
            n.request_stop(node_stop);
        }
    }
}

/// Advances a threshold timer. Returns whether it has run for `delay_ms`.
fn accumulate(record: &mut Record, timer: TagId, above: bool, dt_ms: u32, delay_ms: u32) -> bool {
    let elapsed = if above {
        record.get_u32(timer).saturating_add(dt_ms)
    } else {
        0
    };
    record.set_u32(timer, elapsed);
    above && elapsed >= delay_ms
}

impl std::fmt::Debug for Section {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Section")
            .field("id", &self.id)
            .field("line", &self.line)
            .field("nodes", &self.nodes)
            .field("record", &self.record)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layouts;
    use crate::record::IoWindow;
    use crate::topology::{LineConfig, NodeConfig};
    use crate::transport::SimulatedPlc;

    const PERIOD: Duration = Duration::from_millis(500);

    // status bits on the wire (BE word)
    const PUMP_RUN: u16 = 0x01;
    const PUMP_CHANGE: u16 = 0x02;
    const PRESS_WARNING: u16 = 0x04;
    const PRESS_ALARM: u16 = 0x08;
    const INTERLOCK_EN: u16 = 0x10;
    const WORK_OK: u16 = 0x20;

    struct Rig {
        plcs: Vec<SimulatedPlc>,
        nodes: Vec<Node>,
        section: Section,
        line: Line,
    }

    impl Rig {
        fn new(config: SectionConfig) -> Self {
            let structure = Arc::new(layouts::node().unwrap());
            let mut plcs = Vec::new();
            let mut nodes = Vec::new();
            for i in 0..3 {
                let plc = SimulatedPlc::new(32);
                let cfg = NodeConfig::new(format!("n{i}"), "plc")
                    .with_window(IoWindow::new(0, 0, layouts::NODE_WINDOW));
                nodes.push(Node::new(NodeId(i), &cfg, Arc::clone(&structure), plc.shared(), 3).unwrap());
                plcs.push(plc);
            }
            let members = SectionNodes {
                begin: vec![NodeId(0), NodeId(1)],
                end: vec![NodeId(2)],
                pumps: vec![NodeId(0)],
            };
            let section = Section::new(
                SectionId(0),
                &config,
                LineId(0),
                members,
                Arc::new(layouts::section().unwrap()),
            )
            .unwrap();
            let line = Line::new(
                LineId(0),
                &LineConfig::new("l1"),
                vec![SectionId(0)],
                Arc::new(layouts::line().unwrap()),
            )
            .unwrap();
            Self {
                plcs,
                nodes,
                section,
                line,
            }
        }

        fn status(&self, node: usize, bits: u16) {
            self.plcs[node].poke(0, &bits.to_be_bytes());
        }

        fn flow(&self, node: usize, flow: f32) {
            self.plcs[node].poke(4, &flow.to_be_bytes());
        }

        fn tick(&mut self) {
            for n in &mut self.nodes {
                n.tick(PERIOD);
            }
            self.section.tick(&mut self.nodes, &mut self.line, PERIOD);
            for n in &mut self.nodes {
                n.apply_stop_request();
            }
        }

        fn flag(&self, name: &str) -> bool {
            self.section.record().get_by_name(name).unwrap().as_bool()
        }
    }

    fn config() -> SectionConfig {
        SectionConfig::new("s1", "l1")
            .with_flow_warning(20.0, 3000)
            .with_flow_alarm(40.0, 2000)
            .with_action_time(1000)
    }

    #[test]
    fn test_parameters_seeded_from_config() {
        let rig = Rig::new(config());
        let r = rig.section.record();
        assert_eq!(r.get_by_name("flow_diff_WH").unwrap(), Value::Float32(20.0));
        assert_eq!(r.get_by_name("flow_diff_WH_delay").unwrap(), Value::UInt32(3000));
        assert_eq!(r.get_by_name("action_time").unwrap(), Value::UInt32(1000));
    }

    #[test]
    fn test_reset_parameters_restores_defaults() {
        let mut rig = Rig::new(config());
        rig.section
            .record_mut()
            .set_by_name("flow_diff_WH", Value::Float32(99.0))
            .unwrap();
        rig.section.reset_parameters();
        assert_eq!(
            rig.section.record().get_by_name("flow_diff_WH").unwrap(),
            Value::Float32(20.0)
        );
    }

    #[test]
    fn test_aggregation() {
        let mut rig = Rig::new(config());
        for i in 0..3 {
            rig.status(i, WORK_OK);
        }
        rig.status(0, WORK_OK | PUMP_RUN);
        rig.tick();
        assert!(rig.flag("comm_OK"));
        assert!(rig.flag("work_OK"));
        assert!(rig.flag("pump_run"));
        assert!(rig.flag("protect_F"));

        rig.status(2, 0);
        rig.tick();
        assert!(!rig.flag("work_OK"));
        assert!(!rig.flag("protect_F"));

        rig.status(2, WORK_OK);
        rig.plcs[1].set_online(false);
        rig.tick();
        assert!(!rig.flag("comm_OK"));
        assert!(!rig.flag("protect_F"));
    }

    #[test]
    fn test_bypass_drops_protection() {
        let mut rig = Rig::new(config());
        for i in 0..3 {
            rig.status(i, WORK_OK);
        }
        rig.section.record_mut().set_by_name("bypass", true).unwrap();
        rig.tick();
        assert!(!rig.flag("protect_F"));
    }

    #[test]
    fn test_flow_warning_after_delay() {
        let mut rig = Rig::new(config().with_flow_alarm(1000.0, 2000));
        rig.flow(0, 100.0);
        rig.flow(1, 100.0);
        rig.flow(2, 150.0);
        for tick in 1..=5 {
            rig.tick();
            assert!(!rig.flag("flow_warning_F"), "tick {tick}");
        }
        assert_eq!(
            rig.section.record().get_by_name("flow_diff").unwrap(),
            Value::Float32(50.0)
        );
        rig.tick();
        assert!(rig.flag("flow_warning_F"));

        rig.flow(2, 190.0);
        rig.tick();
        assert!(!rig.flag("flow_warning_F"));
        assert_eq!(
            rig.section.record().get_by_name("warning_time").unwrap(),
            Value::UInt32(0)
        );
    }

    #[test]
    fn test_pressure_interlock_stops_pumps() {
        let mut rig = Rig::new(config());
        rig.status(0, WORK_OK | PUMP_RUN | PRESS_ALARM | INTERLOCK_EN);
        rig.status(1, WORK_OK);
        rig.status(2, WORK_OK);
        rig.tick();
        assert!(rig.flag("press_alarm_F"));
        assert!(rig.flag("autoStopCmd"));
        assert!(rig.flag("action_F"));

        rig.tick();
        assert!(rig.flag("stop_pumps"));
        assert!(rig.nodes[0].stop_command());
        assert!(!rig.nodes[1].stop_command());
    }

    #[test]
    fn test_pressure_alarm_needs_interlock_enable() {
        let mut rig = Rig::new(config());
        rig.status(0, WORK_OK | PUMP_RUN | PRESS_ALARM);
        rig.tick();
        assert!(!rig.flag("press_alarm_F"));
        assert!(!rig.flag("autoStopCmd"));
    }

    #[test]
    fn test_flow_alarm_countdown_stops_line() {
        let mut rig = Rig::new(config());
        for i in 0..3 {
            rig.status(i, WORK_OK);
        }
        rig.status(0, WORK_OK | PUMP_RUN);
        rig.flow(0, 100.0);
        rig.flow(2, 50.0);

        // alarm after 2000 ms, then 1000 ms countdown
        for _ in 0..4 {
            rig.tick();
        }
        assert!(rig.flag("flow_alarm_F"));
        assert!(rig.flag("pre_stop_notice"));
        assert!(!rig.line.auto_stop());
        assert_eq!(
            rig.section.record().get_by_name("action_countdown").unwrap(),
            Value::Int32(500)
        );

        rig.tick();
        assert!(rig.line.auto_stop());
        assert!(rig.flag("line_action_source"));
        assert!(rig.flag("action_F"));
        assert!(rig.flag("stop_pumps"));
        assert!(rig.nodes[0].stop_command());
    }

    #[test]
    fn test_action_latched_until_clean_restart() {
        let mut rig = Rig::new(config());
        rig.status(0, WORK_OK | PUMP_RUN | PRESS_ALARM | INTERLOCK_EN);
        rig.status(1, WORK_OK);
        rig.status(2, WORK_OK);
        rig.tick();
        assert!(rig.flag("action_F"));

        // pump stops, alarm still present
        rig.status(0, WORK_OK | PRESS_ALARM | INTERLOCK_EN);
        rig.tick();
        assert!(rig.flag("action_F"));
        assert!(!rig.flag("autoStopCmd"));
        assert!(!rig.flag("stop_pumps"));
        assert!(!rig.nodes[0].stop_command());

        // clean restart
        rig.status(0, WORK_OK | PUMP_RUN);
        rig.tick();
        assert!(!rig.flag("action_F"));
        assert!(!rig.flag("stop_pumps"));
    }

    #[test]
    fn test_manual_stops_reach_running_pumps() {
        let mut rig = Rig::new(config());
        for i in 0..3 {
            rig.status(i, WORK_OK);
        }
        rig.status(0, WORK_OK | PUMP_RUN);
        rig.tick();
        assert!(!rig.flag("stop_pumps"));

        rig.section.record_mut().set_by_name("manStopCmd", true).unwrap();
        rig.tick();
        assert!(rig.flag("stop_pumps"));
        assert!(rig.nodes[0].stop_command());
        assert!(!rig.flag("action_F"));

        rig.section.record_mut().set_by_name("manStopCmd", false).unwrap();
        rig.tick();
        assert!(!rig.flag("stop_pumps"));
        assert!(!rig.nodes[0].stop_command());

        rig.line.record_mut().set_by_name("manStopCmd", true).unwrap();
        rig.tick();
        assert!(rig.flag("stop_pumps"));
        assert!(rig.nodes[0].stop_command());

        // nothing left to stop once the pump is off
        rig.status(0, WORK_OK);
        rig.tick();
        assert!(!rig.flag("stop_pumps"));
        assert!(!rig.nodes[0].stop_command());
    }

    #[test]
    fn test_hangon_and_pump_change_drop_protection() {
        let mut rig = Rig::new(config());
        for i in 0..3 {
            rig.status(i, WORK_OK);
        }
        rig.tick();
        assert!(rig.flag("protect_F"));

        rig.section.record_mut().set_by_name("manual_hangon", true).unwrap();
        rig.tick();
        assert!(!rig.flag("protect_F"));

        rig.section.record_mut().set_by_name("manual_hangon", false).unwrap();
        rig.status(1, WORK_OK | PUMP_CHANGE);
        rig.tick();
        assert!(rig.flag("pump_change_F"));
        assert!(!rig.flag("protect_F"));

        rig.status(1, WORK_OK);
        rig.tick();
        assert!(!rig.flag("pump_change_F"));
        assert!(rig.flag("protect_F"));
    }

    #[test]
    fn test_press_warning_from_begin_nodes_only() {
        let mut rig = Rig::new(config());
        for i in 0..3 {
            rig.status(i, WORK_OK);
        }
        rig.status(2, WORK_OK | PRESS_WARNING);
        rig.tick();
        assert!(!rig.flag("press_warning_F"));

        rig.status(1, WORK_OK | PRESS_WARNING);
        rig.tick();
        assert!(rig.flag("press_warning_F"));
        assert!(!rig.flag("alarm_F"));
    }

    #[test]
    fn test_bypass_blocks_flow_countdown() {
        let mut rig = Rig::new(config());
        for i in 0..3 {
            rig.status(i, WORK_OK);
        }
        rig.status(0, WORK_OK | PUMP_RUN);
        rig.flow(0, 100.0);
        rig.flow(2, 50.0);
        rig.section.record_mut().set_by_name("bypass", true).unwrap();

        for _ in 0..10 {
            rig.tick();
        }
        assert!(rig.flag("flow_alarm_F"));
        assert!(rig.flag("alarm_F"));
        assert!(!rig.flag("pre_stop_notice"));
        assert_eq!(
            rig.section.record().get_by_name("action_countdown").unwrap(),
            Value::Int32(1000)
        );
        assert!(!rig.line.auto_stop());
        assert!(!rig.flag("stop_pumps"));
    }
}
