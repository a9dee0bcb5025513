//! Gain fading in block time.
//!
//! The engine pattern is to reconfigure a fader whenever a property of
//! interest moves, then ask the driver for this block's gain ramp. The
//! ramp is handed out as a `(start, per_sample_step)` pair so the DSP loop
//! computes `start + step * i` with no branch on whether a fade is active.

use resona_core::config::BLOCK_SIZE;

/// A linear fade between two values over a span of blocks.
#[derive(Debug, Clone, Copy)]
pub struct LinearFader {
    start_time: u64,
    start_value: f32,
    end_time: u64,
    end_value: f32,
}

impl LinearFader {
    pub fn constant(value: f32) -> Self {
        Self {
            start_time: 0,
            start_value: value,
            end_time: 0,
            end_value: value,
        }
    }

    pub fn new(start_time: u64, start_value: f32, end_time: u64, end_value: f32) -> Self {
        Self {
            start_time,
            start_value,
            end_time,
            end_value,
        }
    }

    pub fn value(&self, time: u64) -> f32 {
        if time >= self.end_time {
            self.end_value
        } else if time <= self.start_time {
            self.start_value
        } else {
            let progress =
                (time - self.start_time) as f32 / (self.end_time - self.start_time) as f32;
            self.start_value + (self.end_value - self.start_value) * progress
        }
    }

    pub fn is_fading(&self, time: u64) -> bool {
        time < self.end_time
    }
}

/// Drives a value toward targets with a fixed fade length.
#[derive(Debug, Clone)]
pub struct FadeDriver {
    fader: LinearFader,
    fade_time_in_blocks: u64,
}

impl FadeDriver {
    pub fn new(start_value: f32, fade_time_in_blocks: u64) -> Self {
        debug_assert!(fade_time_in_blocks >= 1);
        Self {
            fader: LinearFader::constant(start_value),
            fade_time_in_blocks,
        }
    }

    /// Begin fading from the current value toward `new_value`.
    pub fn set_value(&mut self, time: u64, new_value: f32) {
        self.fader = LinearFader::new(
            time,
            self.fader.value(time),
            time + self.fade_time_in_blocks,
            new_value,
        );
    }

    /// The `(start, per_sample_step)` gain ramp for the block at `time`.
    pub fn block_ramp(&self, time: u64) -> (f32, f32) {
        if self.fader.is_fading(time) {
            let start = self.fader.value(time);
            let end = self.fader.value(time + 1);
            (start, (end - start) / BLOCK_SIZE as f32)
        } else {
            (self.fader.value(time), 0.0)
        }
    }

    pub fn is_fading(&self, time: u64) -> bool {
        self.fader.is_fading(time)
    }
}
