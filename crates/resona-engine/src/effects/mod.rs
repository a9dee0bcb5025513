//! Global effects.
//!
//! A global effect owns a mono-or-stereo input accumulator; sources add
//! into it through their routes during the source pass. The effect pass
//! then filters the accumulator, applies the effect gain fade, runs the
//! effect kind, and adds the result to the stereo output bus.

mod echo;
mod fdn;

pub use echo::{EchoEffect, EchoTapConfig};
pub use fdn::FdnReverbEffect;

use std::sync::Arc;

use resona_core::config::BLOCK_SIZE;
use resona_dsp::CrossfadingBiquad;

use crate::fade::FadeDriver;
use crate::objects::ObjectCommon;
use crate::pause::Pausable;
use crate::properties::ids;
use crate::runtime::RuntimeCommon;

/// The closed set of effect implementations.
pub enum EffectKind {
    Echo(EchoEffect),
    FdnReverb(FdnReverbEffect),
}

impl EffectKind {
    fn input_channels(&self) -> usize {
        match self {
            EffectKind::Echo(_) => 2,
            EffectKind::FdnReverb(_) => 1,
        }
    }
}

/// Audio-thread state of one global effect.
pub struct GlobalEffectState {
    pub rt: RuntimeCommon,
    pub kind: EffectKind,
    /// Route destination; sources add into this during the source pass.
    input: Box<[f32]>,
    channels: usize,
    filter_input: CrossfadingBiquad,
    gain_driver: FadeDriver,
    pause: Pausable,
    time_in_blocks: u64,
}

impl GlobalEffectState {
    pub fn new(common: Arc<ObjectCommon>, kind: EffectKind) -> Self {
        let channels = kind.input_channels();
        Self {
            rt: RuntimeCommon::new(common),
            kind,
            input: vec![0.0; BLOCK_SIZE * channels].into_boxed_slice(),
            channels,
            filter_input: CrossfadingBiquad::new(),
            gain_driver: FadeDriver::new(1.0, 1),
            pause: Pausable::new(),
            time_in_blocks: 0,
        }
    }

    pub fn input_channels(&self) -> usize {
        self.channels
    }

    /// The accumulator routes write into.
    pub fn input_mut(&mut self) -> &mut [f32] {
        &mut self.input
    }

    pub fn play(&mut self) {
        self.pause.play();
    }

    pub fn pause(&mut self) {
        self.pause.pause();
    }

    pub fn reset(&mut self) {
        match &mut self.kind {
            EffectKind::Echo(echo) => echo.reset(),
            EffectKind::FdnReverb(reverb) => reverb.reset(),
        }
        self.filter_input.reset();
        self.input.fill(0.0);
    }

    /// Run one block: consume the input accumulator and add into the
    /// stereo output bus.
    pub fn run(&mut self, output: &mut [f32], block_time: u64) {
        let bag = self.rt.common.bag();

        if let Some(def) = bag.acquire_biquad(ids::FILTER_INPUT) {
            self.filter_input.configure(def);
        }
        if let Some(gain) = bag.acquire_double(ids::GAIN) {
            self.gain_driver.set_value(block_time, gain as f32);
        }

        if self.pause.is_paused() {
            self.input.fill(0.0);
            self.pause.tick();
            return;
        }

        self.filter_input
            .process_block(&mut self.input, self.channels);

        let (gain_start, gain_step) = self.gain_driver.block_ramp(block_time);
        let (pause_start, pause_step) = self.pause.block_ramp();
        for i in 0..BLOCK_SIZE {
            let gain =
                (gain_start + gain_step * i as f32) * (pause_start + pause_step * i as f32);
            for ch in 0..self.channels {
                self.input[i * self.channels + ch] *= gain;
            }
        }

        match &mut self.kind {
            EffectKind::Echo(echo) => {
                echo.run(self.time_in_blocks, self.channels, &self.input, output)
            }
            EffectKind::FdnReverb(reverb) => {
                reverb.run(self.time_in_blocks, self.channels, &self.input, output)
            }
        }

        self.input.fill(0.0);
        self.pause.tick();
        self.time_in_blocks += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::{ObjectCommon, ObjectType};

    fn echo_state() -> GlobalEffectState {
        let common = Arc::new(ObjectCommon::new(900, ObjectType::GlobalEcho));
        GlobalEffectState::new(common, EffectKind::Echo(EchoEffect::new()))
    }

    #[test]
    fn input_accumulator_is_cleared_after_each_run() {
        let mut state = echo_state();
        state.input_mut().fill(0.5);
        let mut bus = vec![0.0f32; BLOCK_SIZE * 2];
        state.run(&mut bus, 0);
        assert!(state.input_mut().iter().all(|&s| s == 0.0));
    }

    #[test]
    fn paused_effect_is_silent() {
        let mut state = echo_state();
        let mut taps = Vec::new();
        taps.push(EchoTapConfig {
            delay: 0,
            gain_l: 1.0,
            gain_r: 1.0,
        });
        match &mut state.kind {
            EffectKind::Echo(echo) => echo.push_config(taps),
            _ => unreachable!(),
        }
        state.pause();
        state.run(&mut vec![0.0f32; BLOCK_SIZE * 2], 0);

        state.input_mut().fill(0.5);
        let mut bus = vec![0.0f32; BLOCK_SIZE * 2];
        state.run(&mut bus, 1);
        assert!(bus.iter().all(|&s| s == 0.0));
    }
}
