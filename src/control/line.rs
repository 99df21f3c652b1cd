//! Line processor: aggregation over sections plus the line-wide stop.

use std::sync::Arc;
use std::time::Instant;

use crate::control::{LineId, Section, SectionId};
use crate::debounce::Debouncer;
use crate::error::Result;
use crate::record::Record;
use crate::structure::Structure;
use crate::tag::TagId;
use crate::topology::LineConfig;

/// Line fields aggregated from sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LineField {
    /// OR of section `pump_run`.
    PumpRun,
    /// OR of section `alarm_F`.
    Alarm,
    /// OR of section `pre_stop_notice`.
    PreStopNotice,
}

impl LineField {
    const ALL: [LineField; 3] = [LineField::PumpRun, LineField::Alarm, LineField::PreStopNotice];

    fn slot(self) -> usize {
        self as usize
    }
}

/// A pipeline line.
pub struct Line {
    id: LineId,
    record: Record,
    sections: Vec<SectionId>,
    aggregated: [TagId; 3],
    auto_stop: TagId,
    man_stop: TagId,
    action_section: TagId,
    pending: [Option<bool>; 3],
}

impl Line {
    /// Creates a line over `sections`.
    pub fn new(
        id: LineId,
        config: &LineConfig,
        sections: Vec<SectionId>,
        structure: Arc<Structure>,
    ) -> Result<Self> {
        let record = Record::new(structure, config.name.clone());
        Ok(Self {
            id,
            aggregated: [
                record.require("pump_run")?,
                record.require("alarm_F")?,
                record.require("pre_stop_notice")?,
            ],
            auto_stop: record.require("autoStopCmd")?,
            man_stop: record.require("manStopCmd")?,
            action_section: record.require("action_section")?,
            record,
            sections,
            pending: [None; 3],
        })
    }

    /// Line handle.
    pub fn id(&self) -> LineId {
        self.id
    }

    /// Line name.
    pub fn name(&self) -> &str {
        self.record.name()
    }

    /// Member sections.
    pub fn sections(&self) -> &[SectionId] {
        &self.sections
    }

    /// Backing record.
    pub fn record(&self) -> &Record {
        &self.record
    }

    /// Mutable backing record, for operator inputs.
    pub fn record_mut(&mut self) -> &mut Record {
        &mut self.record
    }

    /// Current value of an aggregated field.
    pub fn get(&self, field: LineField) -> bool {
        self.record.get_bool(self.aggregated[field.slot()])
    }

    /// Automatic line stop requested.
    pub fn auto_stop(&self) -> bool {
        self.record.get_bool(self.auto_stop)
    }

    /// Manual line stop requested.
    pub fn man_stop(&self) -> bool {
        self.record.get_bool(self.man_stop)
    }

    /// Section that requested the automatic stop (`id + 1`, 0 for none).
    pub fn action_section(&self) -> Option<SectionId> {
        match self.record.get_u32(self.action_section) {
            0 => None,
            n => Some(SectionId(n as usize - 1)),
        }
    }

    /// Requests an automatic line stop on behalf of `section`.
    /// Returns `true` if the stop was not already requested.
    pub fn request_auto_stop(&mut self, section: SectionId) -> bool {
        let changed = self.record.set_bool(self.auto_stop, true);
        if changed {
            let tag = u32::try_from(section.index() + 1).unwrap_or(0);
            self.record.set_u32(self.action_section, tag);
        }
        changed
    }

    /// One control period. Aggregated fields that differ from the record
    /// are scheduled through `debouncer` and committed by [`apply`](Self::apply).
    pub fn tick(
        &mut self,
        sections: &[Section],
        now: Instant,
        debouncer: &mut Debouncer<(LineId, LineField)>,
    ) {
        let members = || self.sections.iter().map(|id| &sections[id.index()]);
        let targets = [
            members().any(Section::pump_run),
            members().any(Section::alarm),
            members().any(Section::pre_stop_notice),
        ];

        for field in LineField::ALL {
            let target = targets[field.slot()];
            let key = (self.id, field);
            if self.get(field) == target {
                self.pending[field.slot()] = None;
                debouncer.cancel(&key);
            } else if self.pending[field.slot()] != Some(target) {
                self.pending[field.slot()] = Some(target);
                debouncer.trigger(key, now);
            }
        }

        if !targets[LineField::PumpRun.slot()] && self.auto_stop() {
            self.record.set_bool(self.auto_stop, false);
            self.record.set_u32(self.action_section, 0);
            tracing::info!(line = %self.name(), "line stop completed");
        }
    }

    /// Commits a debounced update.
    pub fn apply(&mut self, field: LineField) {
        if let Some(value) = self.pending[field.slot()].take() {
            self.record.set_bool(self.aggregated[field.slot()], value);
            tracing::debug!(line = %self.name(), ?field, value, "line updated");
        }
    }
}

impl std::fmt::Debug for Line {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Line")
            .field("id", &self.id)
            .field("sections", &self.sections)
            .field("record", &self.record)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layouts;
    use std::time::Duration;

    fn line() -> Line {
        Line::new(
            LineId(0),
            &LineConfig::new("l1"),
            Vec::new(),
            Arc::new(layouts::line().unwrap()),
        )
        .unwrap()
    }

    #[test]
    fn test_request_auto_stop_records_source() {
        let mut l = line();
        assert_eq!(l.action_section(), None);
        assert!(l.request_auto_stop(SectionId(4)));
        assert!(!l.request_auto_stop(SectionId(2)));
        assert!(l.auto_stop());
        assert_eq!(l.action_section(), Some(SectionId(4)));
    }

    #[test]
    fn test_auto_stop_clears_when_pumps_stop() {
        let mut l = line();
        let mut d = Debouncer::new(Duration::from_millis(50));
        l.request_auto_stop(SectionId(0));
        l.tick(&[], Instant::now(), &mut d);
        assert!(!l.auto_stop());
        assert_eq!(l.action_section(), None);
    }

    #[test]
    fn test_apply_without_pending_is_noop() {
        let mut l = line();
        l.apply(LineField::Alarm);
        assert!(!l.get(LineField::Alarm));
    }
}
