//! Property automation timelines and scheduled user events.
//!
//! A timeline is a sorted sequence of points ticked with monotonically
//! increasing audio-thread time. Evaluation keeps a cursor at the next
//! point to cross; before the first point and after the terminal value has
//! been emitted, the timeline yields no value and the property is left
//! alone. Adding a point only flags a resort, which happens on the next
//! tick on the audio thread.

use crate::objects::Handle;

/// How the value travels from the previous point to this one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum InterpolationKind {
    /// Jump to this point's value on crossing it.
    None = 0,
    /// Linear in every dimension.
    Linear = 1,
}

impl InterpolationKind {
    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(Self::None),
            1 => Some(Self::Linear),
            _ => None,
        }
    }
}

/// One automation point; up to 6 dimensions to cover every property type.
#[derive(Debug, Clone, Copy)]
pub struct AutomationPoint {
    pub time: f64,
    pub interpolation: InterpolationKind,
    pub values: [f64; 6],
}

/// When the cursor has consumed this many points, the spent prefix is
/// dropped so long-running sessions stay bounded.
const COPY_BACK_THRESHOLD: usize = 128;

/// A per-property automation timeline.
#[derive(Debug, Default)]
pub struct AutomationTimeline {
    points: Vec<AutomationPoint>,
    /// The next point we may need to cross.
    next_point: usize,
    finished: bool,
    needs_sort: bool,
    current_value: Option<[f64; 6]>,
}

impl AutomationTimeline {
    pub fn new() -> Self {
        Self {
            points: Vec::new(),
            next_point: 0,
            finished: true,
            needs_sort: false,
            current_value: None,
        }
    }

    /// Add a point. Only flags that a resort is needed; sorting happens on
    /// the next tick.
    pub fn add_point(&mut self, point: AutomationPoint) {
        self.points.push(point);
        self.needs_sort = true;
        self.finished = false;
    }

    pub fn clear(&mut self) {
        self.points.clear();
        self.next_point = 0;
        self.finished = true;
        self.needs_sort = false;
        self.current_value = None;
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Value at the most recent tick, if the timeline is active.
    pub fn value(&self) -> Option<[f64; 6]> {
        self.current_value
    }

    fn resort_if_needed(&mut self) {
        if !self.needs_sort {
            return;
        }
        self.needs_sort = false;
        self.points
            .sort_by(|a, b| a.time.partial_cmp(&b.time).unwrap_or(std::cmp::Ordering::Equal));
    }

    /// Advance to `time` (seconds, monotonically increasing) and update the
    /// current value.
    ///
    /// The terminal point's value is emitted exactly once, on the first
    /// tick past it; afterwards the timeline is finished and yields
    /// nothing.
    pub fn tick(&mut self, time: f64) {
        self.resort_if_needed();

        if self.finished {
            self.current_value = None;
            return;
        }

        // Walk forward; it is almost always the very next point.
        while self.next_point < self.points.len() && self.points[self.next_point].time <= time {
            self.next_point += 1;
        }

        if self.next_point >= self.points.len() {
            // Always land on the final value so the property ends in a
            // known state, then go quiet.
            self.current_value = self.points.last().map(|p| p.values);
            self.finished = true;
            return;
        }

        // Exactly at the first point: start there. This is the common case
        // of timelines beginning at the current time.
        if self.points[0].time == time {
            self.current_value = Some(self.points[0].values);
        }

        if self.next_point == 0 {
            // Not yet reached the first point.
            self.current_value = None;
            return;
        }

        let last_point = self.next_point - 1;
        let p1 = self.points[last_point];
        let p2 = self.points[self.next_point];

        // Crossing a jump point, or finishing a ramp into one: land on the
        // previous point's value. Jumping to the same value twice is
        // harmless.
        if p1.interpolation == InterpolationKind::None
            || p2.interpolation == InterpolationKind::None
        {
            self.current_value = Some(p1.values);
        }

        // A linear next point is interpolated toward continuously.
        if p2.interpolation == InterpolationKind::Linear {
            let span = p2.time - p1.time;
            let w2 = (time - p1.time) / span;
            let w1 = 1.0 - w2;
            let mut value = [0.0; 6];
            for (i, slot) in value.iter_mut().enumerate() {
                *slot = w1 * p1.values[i] + w2 * p2.values[i];
            }
            self.current_value = Some(value);
        }

        // Drop the spent prefix once it grows past the threshold.
        if last_point > COPY_BACK_THRESHOLD {
            self.points.drain(..last_point);
            self.next_point = 1;
        }
    }
}

/// One scheduled user event on an object's timeline.
#[derive(Debug, Clone, Copy)]
pub struct ScheduledEvent {
    pub time: f64,
    pub param: u64,
}

/// A sorted queue of scheduled user events, fired as audio time passes
/// them.
#[derive(Debug, Default)]
pub struct EventTimeline {
    events: Vec<ScheduledEvent>,
    needs_sort: bool,
}

impl EventTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, event: ScheduledEvent) {
        self.events.push(event);
        self.needs_sort = true;
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Fire every event whose time has passed.
    pub fn tick(&mut self, time: f64, mut fire: impl FnMut(u64)) {
        if self.needs_sort {
            self.needs_sort = false;
            self.events
                .sort_by(|a, b| a.time.partial_cmp(&b.time).unwrap_or(std::cmp::Ordering::Equal));
        }
        let mut fired = 0;
        for event in &self.events {
            if event.time <= time {
                fire(event.param);
                fired += 1;
            } else {
                break;
            }
        }
        self.events.drain(..fired);
    }
}

/// One command inside an automation batch.
#[derive(Debug, Clone)]
pub enum BatchItem {
    AppendPoint {
        target: Handle,
        property: u32,
        point: AutomationPoint,
    },
    ClearProperty {
        target: Handle,
        property: u32,
    },
    ClearAllProperties {
        target: Handle,
    },
    SendUserEvent {
        target: Handle,
        time: f64,
        param: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use resona_core::config::{BLOCK_SIZE, SR};

    fn point(time: f64, interpolation: InterpolationKind, value: f64) -> AutomationPoint {
        AutomationPoint {
            time,
            interpolation,
            values: [value; 6],
        }
    }

    /// The normative curve: two linear points, a jump point, then a linear
    /// tail, ticked at block boundaries.
    #[test]
    fn interpolates_the_reference_curve() {
        let mut timeline = AutomationTimeline::new();
        timeline.add_point(point(0.0, InterpolationKind::Linear, 1.0));
        timeline.add_point(point(0.01, InterpolationKind::Linear, 0.5));
        timeline.add_point(point(0.02, InterpolationKind::None, 0.1));
        timeline.add_point(point(0.05, InterpolationKind::Linear, 0.0));

        let expected = [
            1.0, 0.709751, 0.5, 0.5, 0.089267, 0.069917, 0.050567, 0.031217, 0.011867, 0.0,
        ];
        let block_seconds = BLOCK_SIZE as f64 / SR as f64;
        for (i, want) in expected.iter().enumerate() {
            timeline.tick(i as f64 * block_seconds);
            let got = timeline.value().expect("value expected at tick {i}")[0];
            assert!(
                (got - want).abs() < 1e-6,
                "tick {i}: got {got}, want {want}"
            );
        }

        // Past the end: terminal value was emitted once; now silent.
        timeline.tick(10.0 * block_seconds);
        assert!(timeline.value().is_none());
        assert!(timeline.is_finished());
    }

    #[test]
    fn silent_before_first_point() {
        let mut timeline = AutomationTimeline::new();
        timeline.add_point(point(1.0, InterpolationKind::Linear, 5.0));
        timeline.tick(0.5);
        assert!(timeline.value().is_none());
        assert!(!timeline.is_finished());
    }

    #[test]
    fn unsorted_points_are_sorted_on_tick() {
        let mut timeline = AutomationTimeline::new();
        timeline.add_point(point(0.2, InterpolationKind::Linear, 2.0));
        timeline.add_point(point(0.0, InterpolationKind::Linear, 0.0));
        timeline.tick(0.1);
        let value = timeline.value().unwrap()[0];
        assert!((value - 1.0).abs() < 1e-9);
    }

    #[test]
    fn copy_back_keeps_memory_bounded() {
        let mut timeline = AutomationTimeline::new();
        for i in 0..1000 {
            timeline.add_point(point(i as f64 * 0.001, InterpolationKind::Linear, i as f64));
        }
        timeline.tick(0.5);
        assert!(timeline.points.len() < 1000);
        // Still evaluates correctly after compaction.
        timeline.tick(0.6005);
        let value = timeline.value().unwrap()[0];
        assert!((value - 600.5).abs() < 0.01, "{value}");
    }

    #[test]
    fn event_timeline_fires_in_order() {
        let mut timeline = EventTimeline::new();
        timeline.schedule(ScheduledEvent {
            time: 0.2,
            param: 2,
        });
        timeline.schedule(ScheduledEvent {
            time: 0.1,
            param: 1,
        });
        let mut fired = Vec::new();
        timeline.tick(0.15, |p| fired.push(p));
        assert_eq!(fired, vec![1]);
        timeline.tick(0.3, |p| fired.push(p));
        assert_eq!(fired, vec![1, 2]);
        timeline.tick(10.0, |p| fired.push(p));
        assert_eq!(fired, vec![1, 2]);
    }
}
