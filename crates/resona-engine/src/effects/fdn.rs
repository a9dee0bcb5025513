//! Feedback delay network reverb.
//!
//! Eight delay lines mixed by a householder reflection about the all-ones
//! vector. Line lengths are distinct primes chosen around the mean free
//! path so the network stays untuned; the diffusion control spreads
//! successive line pairs symmetrically toward 0 and twice the mean free
//! path. Per-line gains are chosen so every path decays by 60 dB over t60
//! seconds regardless of its length.
//!
//! Parameter changes set a recompute flag; the model is rebuilt at the
//! start of the next block without clearing the lines, so a running tail
//! transitions instead of cutting out.

use resona_core::config::{BLOCK_SIZE, SR};
use resona_core::{closest_prime_excluding, db_to_gain, next_multiple_of};
use resona_dsp::delay_line::{BlockDelayLine, DelayAccess, ModView};

/// Number of delay lines.
const LINES: usize = 8;

/// Longest delay any line can be assigned, in frames.
const MAX_DELAY: usize = next_multiple_of(SR as usize * 5, BLOCK_SIZE);

pub struct FdnReverbEffect {
    lines: BlockDelayLine,
    delays: [u32; LINES],
    gains: [f32; LINES],

    t60: f64,
    mean_free_path: f64,
    late_reflections_diffusion: f64,
    recompute_model: bool,
}

impl Default for FdnReverbEffect {
    fn default() -> Self {
        Self::new()
    }
}

impl FdnReverbEffect {
    pub fn new() -> Self {
        Self {
            lines: BlockDelayLine::new(LINES, MAX_DELAY / BLOCK_SIZE),
            delays: [0; LINES],
            gains: [0.5; LINES],
            t60: 0.3,
            mean_free_path: 0.1,
            late_reflections_diffusion: 1.0,
            recompute_model: true,
        }
    }

    pub fn set_t60(&mut self, t60: f64) {
        self.t60 = t60;
        self.recompute_model = true;
    }

    pub fn set_mean_free_path(&mut self, mean_free_path: f64) {
        self.mean_free_path = mean_free_path;
        self.recompute_model = true;
    }

    pub fn set_late_reflections_diffusion(&mut self, diffusion: f64) {
        self.late_reflections_diffusion = diffusion;
        self.recompute_model = true;
    }

    pub fn reset(&mut self) {
        self.lines.clear();
    }

    /// Pick delays and gains from the current parameters.
    ///
    /// The first two lines sit at the mean free path; each following pair
    /// moves symmetrically toward 0 and 2x the mean free path by a factor
    /// of `1 / (1 + 0.4 * diffusion)^k`. All chosen primes are distinct.
    fn recompute(&mut self) {
        let mean_free_path_samples = (self.mean_free_path * SR as f64) as u32;
        let limit = (MAX_DELAY - BLOCK_SIZE) as u32;

        self.delays[0] = closest_prime_excluding(mean_free_path_samples, &[]);
        self.delays[1] = closest_prime_excluding(mean_free_path_samples, &self.delays[..1]);

        let diffusion_base = 1.0 + 0.4 * self.late_reflections_diffusion;
        for i in (2..LINES).step_by(2) {
            let iteration = (i / 2 + 1) as i32;
            let fraction = 1.0 / diffusion_base.powi(iteration);
            self.delays[i] = closest_prime_excluding(
                (mean_free_path_samples as f64 * fraction) as u32,
                &self.delays[..i],
            );
            self.delays[i + 1] = closest_prime_excluding(
                (mean_free_path_samples as f64 * (2.0 - fraction)) as u32,
                &self.delays[..i + 1],
            );
        }

        for delay in &mut self.delays {
            *delay = (*delay).min(limit);
        }

        // Keep the lines sorted shortest to longest to minimize artifacts
        // when the model shifts under a running tail.
        self.delays.sort_unstable();

        // Every path must decay 60 dB over t60 seconds, so each line's
        // gain is its length times the per-sample decay.
        let decay_per_sample_db = -60.0 / self.t60 / SR as f64;
        for (gain, delay) in self.gains.iter_mut().zip(self.delays.iter()) {
            let decay_db = *delay as f64 * decay_per_sample_db;
            *gain = db_to_gain(decay_db) as f32;
            debug_assert!(*gain < 1.0, "FDN would feed back forever");
        }
    }

    pub fn run(
        &mut self,
        _time_in_blocks: u64,
        input_channels: usize,
        input: &[f32],
        output: &mut [f32],
    ) {
        if self.recompute_model {
            self.recompute();
            self.recompute_model = false;
        }

        let max_delay = self.delays.iter().copied().max().unwrap_or(0) as usize;
        let delays = &self.delays;
        let gains = &self.gains;

        match self.lines.mod_view(max_delay) {
            ModView::Contiguous(mut view) => {
                run_network(&mut view, delays, gains, input_channels, input, output);
            }
            ModView::Wrapping(mut view) => {
                run_network(&mut view, delays, gains, input_channels, input, output);
            }
        }
        self.lines.advance_block();
    }
}

fn run_network<V: DelayAccess>(
    view: &mut V,
    delays: &[u32; LINES],
    gains: &[f32; LINES],
    input_channels: usize,
    input: &[f32],
    output: &mut [f32],
) {
    let input_norm = 1.0 / input_channels as f32;
    for i in 0..BLOCK_SIZE {
        // Mono downmix of this frame of input.
        let mut input_sample = 0.0f32;
        for ch in 0..input_channels {
            input_sample += input[i * input_channels + ch];
        }
        input_sample *= input_norm;

        // Householder reflection about <1, 1, ...>: y = x - (2/N) * sum(x).
        let mut values = [0.0f32; LINES];
        let mut sum = 0.0f32;
        for (lane, value) in values.iter_mut().enumerate() {
            *value = view.read(lane, delays[lane] as usize);
            sum += *value;
        }
        sum *= 2.0 / LINES as f32;

        let input_per_line = input_sample * (1.0 / LINES as f32);
        for lane in 0..LINES {
            view.write(lane, gains[lane] * (values[lane] - sum + input_per_line));
        }

        // Two mostly decorrelated channels: alternate lines left/right.
        let left = values[0] + values[2] + values[4] + values[6];
        let right = values[1] + values[3] + values[5] + values[7];
        output[i * 2] += left;
        output[i * 2 + 1] += right;
        view.step();
    }
}
