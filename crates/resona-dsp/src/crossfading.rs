//! User-facing biquad with crossfade-on-reconfigure.
//!
//! Client-visible filter properties reconfigure at arbitrary times;
//! swapping coefficients mid-stream produces an audible discontinuity. The
//! filter therefore keeps an active and an inactive IIR instance: a
//! reconfigure loads the inactive one and the next block linearly blends
//! active into inactive before the swap.

use resona_core::config::{BLOCK_SIZE, MAX_CHANNELS};

use crate::filter_design::BiquadDef;
use crate::iir::DynIirFilter;

pub struct CrossfadingBiquad {
    active: DynIirFilter,
    inactive: DynIirFilter,
    current_def: BiquadDef,
    crossfade_pending: bool,
    scratch: Box<[f32]>,
}

impl Default for CrossfadingBiquad {
    fn default() -> Self {
        Self::new()
    }
}

impl CrossfadingBiquad {
    pub fn new() -> Self {
        Self {
            active: DynIirFilter::new(),
            inactive: DynIirFilter::new(),
            current_def: BiquadDef::identity(),
            crossfade_pending: false,
            scratch: vec![0.0; BLOCK_SIZE * MAX_CHANNELS].into_boxed_slice(),
        }
    }

    /// Install a new filter configuration; takes effect with a one-block
    /// crossfade on the next `process_block` call.
    pub fn configure(&mut self, def: BiquadDef) {
        if def == self.current_def {
            return;
        }
        self.current_def = def;
        self.inactive.set_coeffs(def);
        self.inactive.reset();
        self.crossfade_pending = true;
    }

    /// True once the filter has no pending crossfade.
    pub fn is_steady(&self) -> bool {
        !self.crossfade_pending
    }

    pub fn reset(&mut self) {
        self.active.reset();
        self.inactive.reset();
        self.crossfade_pending = false;
    }

    /// Filter one interleaved block of `channels` lanes in place.
    pub fn process_block(&mut self, data: &mut [f32], channels: usize) {
        debug_assert_eq!(data.len(), BLOCK_SIZE * channels);

        if !self.crossfade_pending {
            self.active.process_block(data, channels);
            return;
        }

        let scratch = &mut self.scratch[..BLOCK_SIZE * channels];
        scratch.copy_from_slice(data);

        self.active.process_block(data, channels);
        self.inactive.process_block(scratch, channels);

        let step = 1.0 / BLOCK_SIZE as f32;
        for i in 0..BLOCK_SIZE {
            let w_new = i as f32 * step;
            let w_old = 1.0 - w_new;
            for ch in 0..channels {
                let idx = i * channels + ch;
                data[idx] = data[idx] * w_old + scratch[idx] * w_new;
            }
        }

        std::mem::swap(&mut self.active, &mut self.inactive);
        self.crossfade_pending = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter_design::DEFAULT_Q;

    #[test]
    fn identity_is_exact() {
        let mut filter = CrossfadingBiquad::new();
        let input: Vec<f32> = (0..BLOCK_SIZE).map(|i| (i as f32 * 0.11).sin()).collect();
        let mut data = input.clone();
        filter.process_block(&mut data, 1);
        assert_eq!(data, input);
    }

    #[test]
    fn reconfigure_crossfades_over_one_block() {
        let mut filter = CrossfadingBiquad::new();
        // Settle on identity first.
        let mut data = vec![1.0f32; BLOCK_SIZE];
        filter.process_block(&mut data, 1);

        filter.configure(BiquadDef::lowpass(1000.0, DEFAULT_Q));
        assert!(!filter.is_steady());

        // During the crossfade block the first sample is still the old
        // (identity) output and the output never jumps.
        let mut data = vec![1.0f32; BLOCK_SIZE];
        filter.process_block(&mut data, 1);
        assert!(filter.is_steady());
        assert!((data[0] - 1.0).abs() < 1e-6);
        for pair in data.windows(2) {
            assert!((pair[1] - pair[0]).abs() < 0.1, "discontinuity: {pair:?}");
        }
    }

    #[test]
    fn reconfigure_to_same_config_is_a_no_op() {
        let mut filter = CrossfadingBiquad::new();
        filter.configure(BiquadDef::identity());
        assert!(filter.is_steady());
    }
}
