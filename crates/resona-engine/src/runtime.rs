//! Audio-thread-side state every context-attached object carries.

use std::collections::HashMap;
use std::sync::Arc;

use crate::automation::{AutomationTimeline, EventTimeline};
use crate::events::{EventKind, EventSender};
use crate::objects::{Handle, ObjectCommon};
use crate::properties::{PropertyKind, PropertyValue};

/// Shared runtime bookkeeping: automation timelines per property, the
/// scheduled-event timeline, and linger state.
pub struct RuntimeCommon {
    pub common: Arc<ObjectCommon>,
    pub automation: HashMap<u32, AutomationTimeline>,
    pub events: EventTimeline,
    pub lingering: bool,
}

impl RuntimeCommon {
    pub fn new(common: Arc<ObjectCommon>) -> Self {
        Self {
            common,
            automation: HashMap::new(),
            events: EventTimeline::new(),
            lingering: false,
        }
    }

    pub fn handle(&self) -> Handle {
        self.common.handle()
    }

    /// Tick every automation timeline and the event timeline at `time`
    /// seconds, applying produced values to the property bag (flagged as
    /// changed so DSP reacts) and firing scheduled user events.
    pub fn tick_automation(&mut self, time: f64, events: &EventSender, context: Handle) {
        let bag = self.common.bag();
        for (&property, timeline) in self.automation.iter_mut() {
            timeline.tick(time);
            let Some(values) = timeline.value() else {
                continue;
            };
            let Ok(def) = bag.def(property) else {
                continue;
            };
            let value = match def.kind {
                PropertyKind::Double { min, max } => {
                    PropertyValue::Double(values[0].clamp(min, max))
                }
                PropertyKind::Double3 => {
                    PropertyValue::Double3([values[0], values[1], values[2]])
                }
                PropertyKind::Double6 => PropertyValue::Double6(values),
                // Only scalar and vector doubles are automatable.
                _ => continue,
            };
            let _ = bag.write(property, value, true);
        }
        self.automation.retain(|_, timeline| !timeline.is_finished());

        let source = self.common.handle();
        self.events.tick(time, |param| {
            events.enqueue_simple(EventKind::UserAutomation { param }, source, context);
        });
    }
}
