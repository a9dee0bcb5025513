//! Sine bank generator: a thin property wrapper over the DSP bank.

use resona_core::config::BLOCK_SIZE;
use resona_dsp::{FastSineBank, SineWaveConfig};

use crate::properties::{PropertyBag, ids};

use super::GeneratorOutput;

pub struct SineBankGenerator {
    bank: FastSineBank,
    scratch: Box<[f32]>,
}

impl SineBankGenerator {
    pub fn new(frequency: f64, waves: Vec<SineWaveConfig>) -> Self {
        let mut bank = FastSineBank::new(frequency);
        for wave in waves {
            bank.add_wave(wave);
        }
        Self {
            bank,
            scratch: vec![0.0; BLOCK_SIZE].into_boxed_slice(),
        }
    }

    pub fn generate(
        &mut self,
        bag: &PropertyBag,
        out: &mut [f32],
        gain: &impl Fn(usize) -> f32,
    ) -> GeneratorOutput {
        if let Some(frequency) = bag.acquire_double(ids::FREQUENCY) {
            self.bank.set_frequency(frequency);
        }

        self.scratch.fill(0.0);
        self.bank.fill_block(&mut self.scratch);
        for (i, &sample) in self.scratch.iter().enumerate() {
            out[i] += sample * gain(i);
        }
        GeneratorOutput::Produced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::{ObjectCommon, ObjectType};

    #[test]
    fn produces_a_tone_at_the_property_frequency() {
        let common = ObjectCommon::new(1, ObjectType::SineBankGenerator);
        let bag = common.bag();
        let mut generator =
            SineBankGenerator::new(440.0, vec![SineWaveConfig::new(1.0, 0.0, 1.0)]);

        let mut out = vec![0.0f32; BLOCK_SIZE];
        let output = generator.generate(bag, &mut out, &|_| 1.0);
        assert_eq!(output, GeneratorOutput::Produced);
        // A 440 Hz sine crosses zero well within a block and peaks near 1.
        let peak = out.iter().fold(0.0f32, |a, &s| a.max(s.abs()));
        assert!(peak > 0.9 && peak <= 1.0001, "peak {peak}");
    }
}
