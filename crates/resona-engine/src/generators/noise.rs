//! Noise generator: one independent noise kernel per channel.

use resona_core::config::BLOCK_SIZE;
use resona_dsp::{NoiseGenerator, NoiseType};

use crate::properties::{PropertyBag, ids};

use super::GeneratorOutput;

pub struct NoiseGeneratorState {
    kernels: Vec<NoiseGenerator>,
    scratch: Box<[f32]>,
}

impl NoiseGeneratorState {
    pub fn new(channels: usize, seed: u64) -> Self {
        let kernels = (0..channels)
            .map(|ch| NoiseGenerator::new(seed.wrapping_add(ch as u64).wrapping_mul(0x9e3779b9)))
            .collect();
        Self {
            kernels,
            scratch: vec![0.0; BLOCK_SIZE * channels].into_boxed_slice(),
        }
    }

    pub fn channels(&self) -> usize {
        self.kernels.len()
    }

    pub fn generate(
        &mut self,
        bag: &PropertyBag,
        out: &mut [f32],
        gain: &impl Fn(usize) -> f32,
    ) -> GeneratorOutput {
        if let Some(value) = bag.acquire_int(ids::NOISE_TYPE) {
            if let Some(noise_type) = NoiseType::from_i32(value as i32) {
                for kernel in &mut self.kernels {
                    kernel.set_noise_type(noise_type);
                }
            }
        }

        let channels = self.kernels.len();
        self.scratch.fill(0.0);
        for (ch, kernel) in self.kernels.iter_mut().enumerate() {
            kernel.generate_block(BLOCK_SIZE, &mut self.scratch[ch..], channels);
        }
        for i in 0..BLOCK_SIZE {
            let g = gain(i);
            for ch in 0..channels {
                out[i * channels + ch] += g * self.scratch[i * channels + ch];
            }
        }
        GeneratorOutput::Produced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::{ObjectCommon, ObjectType};
    use crate::properties::PropertyValue;

    #[test]
    fn channels_are_independent_and_bounded() {
        let common = ObjectCommon::new(1, ObjectType::NoiseGenerator);
        let bag = common.bag();
        let mut generator = NoiseGeneratorState::new(2, 1234);

        let mut out = vec![0.0f32; BLOCK_SIZE * 2];
        generator.generate(bag, &mut out, &|_| 1.0);
        assert!(out.iter().all(|&s| s.abs() <= 1.5));
        // Two seeds, two different streams.
        assert!((0..BLOCK_SIZE).any(|i| out[i * 2] != out[i * 2 + 1]));
    }

    #[test]
    fn noise_type_switches_apply() {
        let common = ObjectCommon::new(1, ObjectType::NoiseGenerator);
        let bag = common.bag();
        bag.write(
            ids::NOISE_TYPE,
            PropertyValue::Int(NoiseType::FilteredBrown as i64),
            true,
        )
        .unwrap();
        let mut generator = NoiseGeneratorState::new(1, 99);
        let mut out = vec![0.0f32; BLOCK_SIZE];
        generator.generate(bag, &mut out, &|_| 1.0);
        // Brown noise is heavily lowpassed; successive samples move
        // little.
        let max_step = out
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).abs())
            .fold(0.0f32, f32::max);
        assert!(max_step < 0.2, "max step {max_step}");
    }
}
