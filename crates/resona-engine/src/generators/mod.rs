//! Generators: the leaves of the audio graph.
//!
//! Each generator adds one block of audio into a destination at its own
//! channel count. The kinds are a closed set dispatched through an enum;
//! all of them share the gain fade driver, pause machinery, and the
//! finished/looped event plumbing handled here.

mod buffer;
mod noise;
mod sine_bank;
mod streaming;

pub use buffer::BufferGenerator;
pub use noise::NoiseGeneratorState;
pub use sine_bank::SineBankGenerator;
pub use streaming::{StreamingGenerator, spawn_streaming};

use std::sync::Arc;

use resona_core::config::{BLOCK_SIZE, SR};

use crate::events::{EventKind, EventSender};
use crate::fade::FadeDriver;
use crate::objects::{Handle, ObjectCommon};
use crate::pause::Pausable;
use crate::properties::ids;
use crate::runtime::RuntimeCommon;

/// What a generator did this block, for event bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorOutput {
    /// Nothing to play right now (no buffer, underrun, paused).
    Silent,
    /// Audio was produced.
    Produced,
    /// Audio was produced and the generator wrapped its loop.
    Looped,
    /// The generator ran out of audio for good.
    Finished,
}

pub enum GeneratorKind {
    Buffer(BufferGenerator),
    Streaming(StreamingGenerator),
    SineBank(SineBankGenerator),
    Noise(NoiseGeneratorState),
}

/// Audio-thread state of one generator.
pub struct GeneratorState {
    pub rt: RuntimeCommon,
    pub kind: GeneratorKind,
    gain_driver: FadeDriver,
    pause: Pausable,
    finished_sent: bool,
}

impl GeneratorState {
    pub fn new(common: Arc<ObjectCommon>, kind: GeneratorKind) -> Self {
        Self {
            rt: RuntimeCommon::new(common),
            kind,
            gain_driver: FadeDriver::new(1.0, 1),
            pause: Pausable::new(),
            finished_sent: false,
        }
    }

    pub fn handle(&self) -> Handle {
        self.rt.handle()
    }

    /// Channel count this block. May change as properties do.
    pub fn channels(&self) -> usize {
        match &self.kind {
            GeneratorKind::Buffer(g) => g.channels(),
            GeneratorKind::Streaming(g) => g.channels(),
            GeneratorKind::SineBank(_) => 1,
            GeneratorKind::Noise(g) => g.channels(),
        }
    }

    pub fn play(&mut self) {
        self.pause.play();
    }

    pub fn pause(&mut self) {
        self.pause.pause();
    }

    /// How long this generator will keep producing if asked to linger, in
    /// seconds. `None` means "no natural end" (loops, noise).
    pub fn natural_linger_time(&self) -> Option<f64> {
        match &self.kind {
            GeneratorKind::Buffer(g) => g.remaining_seconds(),
            GeneratorKind::Streaming(g) => g.remaining_seconds(),
            // A couple of blocks to let the fade to silence land.
            GeneratorKind::SineBank(_) | GeneratorKind::Noise(_) => {
                Some(2.0 * BLOCK_SIZE as f64 / SR as f64)
            }
        }
    }

    /// Add one block into `out` (`BLOCK_SIZE * channels()` interleaved),
    /// emitting finished/looped events as appropriate.
    pub fn generate_block(
        &mut self,
        block_time: u64,
        out: &mut [f32],
        events: &EventSender,
        context: Handle,
    ) {
        if self.pause.is_paused() {
            self.pause.tick();
            return;
        }

        let bag = self.rt.common.bag();
        if let Some(gain) = bag.acquire_double(ids::GAIN) {
            self.gain_driver.set_value(block_time, gain as f32);
        }

        let (gain_start, gain_step) = self.gain_driver.block_ramp(block_time);
        let (pause_start, pause_step) = self.pause.block_ramp();
        let gain = move |i: usize| {
            (gain_start + gain_step * i as f32) * (pause_start + pause_step * i as f32)
        };

        let bag = self.rt.common.bag();
        let output = match &mut self.kind {
            GeneratorKind::Buffer(g) => g.generate(bag, block_time, out, &gain),
            GeneratorKind::Streaming(g) => g.generate(bag, out, &gain),
            GeneratorKind::SineBank(g) => g.generate(bag, out, &gain),
            GeneratorKind::Noise(g) => g.generate(bag, out, &gain),
        };

        match output {
            GeneratorOutput::Looped => {
                events.enqueue_simple(EventKind::Looped, self.rt.handle(), context);
            }
            GeneratorOutput::Finished => {
                if !self.finished_sent {
                    self.finished_sent = true;
                    events.enqueue_simple(EventKind::Finished, self.rt.handle(), context);
                }
            }
            GeneratorOutput::Silent | GeneratorOutput::Produced => {
                self.finished_sent = false;
            }
        }

        self.pause.tick();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::ObjectType;
    use resona_dsp::SineWaveConfig;

    fn sine_state() -> GeneratorState {
        let common = Arc::new(ObjectCommon::new(40, ObjectType::SineBankGenerator));
        GeneratorState::new(
            common,
            GeneratorKind::SineBank(SineBankGenerator::new(
                440.0,
                vec![SineWaveConfig::new(1.0, 0.0, 1.0)],
            )),
        )
    }

    #[test]
    fn paused_generator_is_silent_after_fade() {
        let mut state = sine_state();
        let events = EventSender::new();
        let mut out = vec![0.0f32; BLOCK_SIZE];

        state.pause();
        state.generate_block(0, &mut out, &events, 1);
        // Next block is fully paused.
        out.fill(0.0);
        state.generate_block(1, &mut out, &events, 1);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn gain_property_fades_in_one_block() {
        let mut state = sine_state();
        let events = EventSender::new();
        state
            .rt
            .common
            .bag()
            .write(ids::GAIN, crate::properties::PropertyValue::Double(0.0), true)
            .unwrap();

        let mut out = vec![0.0f32; BLOCK_SIZE];
        state.generate_block(0, &mut out, &events, 1);
        // Gain target 0 with a one-block fade from the default 1.0: the
        // block may ring, the next one is silent.
        out.fill(0.0);
        state.generate_block(1, &mut out, &events, 1);
        assert!(out.iter().all(|&s| s == 0.0));
    }
}
