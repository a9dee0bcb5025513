//! Noise kernels.
//!
//! Three colors:
//! - Uniform: white noise straight from the RNG, mapped to [-1, 1].
//! - Voss-McCartney: a stack of uniform generators where generator k is
//!   updated every 2^k samples (selected by the trailing-zero count of a
//!   counter), giving an approximate 1/f spectrum.
//! - Filtered brown: uniform noise through a one-pole lowpass and a DC
//!   blocker.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::filter_design::BiquadDef;
use crate::iir::IirFilter;

/// Noise color. Values are stable for the C ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i32)]
pub enum NoiseType {
    #[default]
    Uniform = 0,
    Vm = 1,
    FilteredBrown = 2,
}

impl NoiseType {
    pub const COUNT: i32 = 3;

    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(Self::Uniform),
            1 => Some(Self::Vm),
            2 => Some(Self::FilteredBrown),
            _ => None,
        }
    }
}

/// Number of stacked generators for Voss-McCartney.
const VM_GENERATOR_COUNT: usize = 14;

/// Ors the counter so trailing_zeros never sees 0 and never exceeds the
/// last array index. -2 accounts for the always-run generator.
const VM_MASK: u32 = !((1u32 << (VM_GENERATOR_COUNT - 2)) - 1);

pub struct NoiseGenerator {
    rng: SmallRng,
    noise_type: NoiseType,

    vm_values: [f32; VM_GENERATOR_COUNT - 1],
    vm_accumulator: f32,
    vm_counter: u32,

    brown_lowpass: IirFilter<1>,
    brown_dc_blocker: IirFilter<1>,
}

impl NoiseGenerator {
    pub fn new(seed: u64) -> Self {
        let mut generator = Self {
            rng: SmallRng::seed_from_u64(seed),
            noise_type: NoiseType::Uniform,
            vm_values: [0.0; VM_GENERATOR_COUNT - 1],
            vm_accumulator: 0.0,
            vm_counter: 0,
            brown_lowpass: IirFilter::with_coeffs(BiquadDef::one_pole(0.99)),
            brown_dc_blocker: IirFilter::with_coeffs(BiquadDef::dc_blocker(0.995)),
        };
        generator.init_vm();
        generator
    }

    pub fn noise_type(&self) -> NoiseType {
        self.noise_type
    }

    pub fn set_noise_type(&mut self, noise_type: NoiseType) {
        self.noise_type = noise_type;
        match noise_type {
            NoiseType::Vm => self.init_vm(),
            NoiseType::FilteredBrown => {
                self.brown_lowpass.reset();
                self.brown_dc_blocker.reset();
            }
            NoiseType::Uniform => {}
        }
    }

    /// Add `size` samples of noise to `block` at the given lane stride.
    pub fn generate_block(&mut self, size: usize, block: &mut [f32], stride: usize) {
        match self.noise_type {
            NoiseType::Uniform => {
                for i in 0..size {
                    block[i * stride] += self.sample_uniform();
                }
            }
            NoiseType::Vm => {
                for i in 0..size {
                    block[i * stride] += self.sample_vm();
                }
            }
            NoiseType::FilteredBrown => {
                for i in 0..size {
                    block[i * stride] += self.sample_brown();
                }
            }
        }
    }

    pub fn generate_sample(&mut self) -> f32 {
        match self.noise_type {
            NoiseType::Uniform => self.sample_uniform(),
            NoiseType::Vm => self.sample_vm(),
            NoiseType::FilteredBrown => self.sample_brown(),
        }
    }

    #[inline]
    fn sample_uniform(&mut self) -> f32 {
        self.rng.random::<f32>() * 2.0 - 1.0
    }

    fn init_vm(&mut self) {
        self.vm_accumulator = 0.0;
        self.vm_counter = 0;
        for value in &mut self.vm_values {
            *value = self.rng.random::<f32>() * 2.0 - 1.0;
            self.vm_accumulator += *value;
        }
    }

    #[inline]
    fn sample_vm(&mut self) -> f32 {
        let index = (self.vm_counter | VM_MASK).trailing_zeros() as usize;
        self.vm_counter = self.vm_counter.wrapping_add(1);
        self.vm_accumulator -= self.vm_values[index];
        self.vm_values[index] = self.sample_uniform();
        self.vm_accumulator += self.vm_values[index];
        // One generator runs every sample and is not stored.
        (self.vm_accumulator + self.sample_uniform()) * (1.0 / VM_GENERATOR_COUNT as f32)
    }

    #[inline]
    fn sample_brown(&mut self) -> f32 {
        let white = self.sample_uniform();
        let low = self.brown_lowpass.process_sample(white);
        self.brown_dc_blocker.process_sample(low)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vm_index_never_exceeds_array() {
        // The mask guarantees trailing_zeros stays within the value array.
        for counter in 0..100_000u32 {
            let index = (counter | VM_MASK).trailing_zeros() as usize;
            assert!(index < VM_GENERATOR_COUNT - 1);
        }
    }

    #[test]
    fn all_colors_bounded() {
        for noise_type in [NoiseType::Uniform, NoiseType::Vm, NoiseType::FilteredBrown] {
            let mut generator = NoiseGenerator::new(0xfeed);
            generator.set_noise_type(noise_type);
            for _ in 0..100_000 {
                let s = generator.generate_sample();
                assert!(s.abs() <= 1.5, "{noise_type:?} produced {s}");
            }
        }
    }

    #[test]
    fn generate_block_adds_with_stride() {
        let mut generator = NoiseGenerator::new(7);
        let mut block = vec![1.0f32; 32];
        generator.generate_block(16, &mut block, 2);
        // Odd indices untouched.
        for i in (1..32).step_by(2) {
            assert_eq!(block[i], 1.0);
        }
        // Even indices changed with overwhelming probability.
        assert!(block.iter().step_by(2).any(|&s| s != 1.0));
    }

    #[test]
    fn uniform_has_roughly_zero_mean() {
        let mut generator = NoiseGenerator::new(42);
        let mut sum = 0.0f64;
        const N: usize = 1 << 18;
        for _ in 0..N {
            sum += generator.generate_sample() as f64;
        }
        assert!((sum / N as f64).abs() < 0.01);
    }
}
