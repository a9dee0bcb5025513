//! Stereo multi-tap echo.
//!
//! A 2-lane delay line sized for five seconds. Tap configurations arrive
//! whole; installing one ramps the new tap set's contribution linearly
//! from zero over the block, which is a one-block crossfade of the entire
//! configuration and keeps reconfiguration pop-free.

use resona_core::config::{BLOCK_SIZE, SR};
use resona_core::next_multiple_of;
use resona_dsp::channels::mix_channels;
use resona_dsp::delay_line::{BlockDelayLine, DelayAccess, ModView};

/// Longest supported tap delay, in frames.
pub const MAX_DELAY: usize = next_multiple_of(SR as usize * 5, BLOCK_SIZE);

/// One echo tap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EchoTapConfig {
    /// Delay in samples.
    pub delay: u32,
    pub gain_l: f32,
    pub gain_r: f32,
}

pub struct EchoEffect {
    line: BlockDelayLine,
    taps: Vec<EchoTapConfig>,
    max_delay_tap: u32,
    /// Installed at the start of the next run; the last pushed config
    /// wins.
    pending: Option<Vec<EchoTapConfig>>,
}

impl Default for EchoEffect {
    fn default() -> Self {
        Self::new()
    }
}

impl EchoEffect {
    pub fn new() -> Self {
        Self {
            line: BlockDelayLine::new(2, MAX_DELAY / BLOCK_SIZE),
            taps: Vec::new(),
            max_delay_tap: 0,
            pending: None,
        }
    }

    /// Replace the tap configuration. Takes effect on the next block with
    /// a crossfade. Delays are clamped to the line length.
    pub fn push_config(&mut self, taps: Vec<EchoTapConfig>) {
        self.pending = Some(taps);
    }

    pub fn reset(&mut self) {
        self.line.clear();
    }

    pub fn run(
        &mut self,
        _time_in_blocks: u64,
        input_channels: usize,
        input: &[f32],
        output: &mut [f32],
    ) {
        // Mix the input to stereo straight into the line.
        let block = self.line.next_block();
        mix_channels(BLOCK_SIZE, input, input_channels, block, 2);

        let crossfade = if let Some(new_taps) = self.pending.take() {
            self.taps = new_taps;
            let limit = (MAX_DELAY - BLOCK_SIZE) as u32;
            for tap in &mut self.taps {
                tap.delay = tap.delay.min(limit);
            }
            self.max_delay_tap = self.taps.iter().map(|t| t.delay).max().unwrap_or(0);
            true
        } else {
            false
        };

        let taps = &self.taps;
        let max_delay = self.max_delay_tap as usize;
        match self.line.mod_view(max_delay) {
            ModView::Contiguous(mut view) => {
                run_taps(&mut view, taps, crossfade, output);
            }
            ModView::Wrapping(mut view) => {
                run_taps(&mut view, taps, crossfade, output);
            }
        }
        self.line.advance_block();
    }
}

fn run_taps<V: DelayAccess>(
    view: &mut V,
    taps: &[EchoTapConfig],
    crossfade: bool,
    output: &mut [f32],
) {
    if crossfade {
        for i in 0..BLOCK_SIZE {
            let ramp = i as f32 / BLOCK_SIZE as f32;
            for tap in taps {
                let left = view.read(0, tap.delay as usize);
                let right = view.read(1, tap.delay as usize);
                output[i * 2] += left * tap.gain_l * ramp;
                output[i * 2 + 1] += right * tap.gain_r * ramp;
            }
            view.step();
        }
    } else {
        for i in 0..BLOCK_SIZE {
            for tap in taps {
                let left = view.read(0, tap.delay as usize);
                let right = view.read(1, tap.delay as usize);
                output[i * 2] += left * tap.gain_l;
                output[i * 2 + 1] += right * tap.gain_r;
            }
            view.step();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_silent_blocks(echo: &mut EchoEffect, count: usize) -> Vec<f32> {
        let input = vec![0.0f32; BLOCK_SIZE * 2];
        let mut collected = Vec::new();
        for _ in 0..count {
            let mut out = vec![0.0f32; BLOCK_SIZE * 2];
            echo.run(0, 2, &input, &mut out);
            collected.extend(out);
        }
        collected
    }

    #[test]
    fn no_taps_means_silence() {
        let mut echo = EchoEffect::new();
        let input = vec![0.3f32; BLOCK_SIZE * 2];
        let mut out = vec![0.0f32; BLOCK_SIZE * 2];
        echo.run(0, 2, &input, &mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn tap_echoes_at_configured_delay() {
        let mut echo = EchoEffect::new();
        let delay = BLOCK_SIZE as u32 * 2 + 10;
        echo.push_config(vec![EchoTapConfig {
            delay,
            gain_l: 0.5,
            gain_r: 0.25,
        }]);

        // Impulse at the head of the first block.
        let mut input = vec![0.0f32; BLOCK_SIZE * 2];
        input[0] = 1.0;
        input[1] = 1.0;
        let mut out = vec![0.0f32; BLOCK_SIZE * 2];
        echo.run(0, 2, &input, &mut out);
        let mut all = out;
        all.extend(run_silent_blocks(&mut echo, 3));

        // Echo lands `delay` frames after the impulse.
        let frame = delay as usize;
        assert!((all[frame * 2] - 0.5).abs() < 1e-6, "left at {frame}");
        assert!((all[frame * 2 + 1] - 0.25).abs() < 1e-6, "right at {frame}");
        // Nothing else is nonzero.
        let nonzero = all.iter().filter(|&&s| s != 0.0).count();
        assert_eq!(nonzero, 2);
    }

    #[test]
    fn new_config_fades_in_over_one_block() {
        let mut echo = EchoEffect::new();
        // Prime the line with a constant DC signal, no taps yet.
        let input = vec![1.0f32; BLOCK_SIZE * 2];
        let mut out = vec![0.0f32; BLOCK_SIZE * 2];
        for _ in 0..4 {
            echo.run(0, 2, &input, &mut out);
            out.fill(0.0);
        }

        echo.push_config(vec![EchoTapConfig {
            delay: BLOCK_SIZE as u32,
            gain_l: 1.0,
            gain_r: 1.0,
        }]);
        let mut out = vec![0.0f32; BLOCK_SIZE * 2];
        echo.run(0, 2, &input, &mut out);

        // The tap reads DC 1.0; the output must ramp 0 -> 1 linearly.
        assert_eq!(out[0], 0.0);
        let expected_mid = (BLOCK_SIZE / 2) as f32 / BLOCK_SIZE as f32;
        assert!((out[BLOCK_SIZE] - expected_mid).abs() < 1e-5);

        // Next block: full contribution.
        let mut out = vec![0.0f32; BLOCK_SIZE * 2];
        echo.run(0, 2, &input, &mut out);
        assert!((out[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn last_pushed_config_wins() {
        let mut echo = EchoEffect::new();
        echo.push_config(vec![EchoTapConfig {
            delay: 100,
            gain_l: 1.0,
            gain_r: 1.0,
        }]);
        echo.push_config(Vec::new());
        let input = vec![1.0f32; BLOCK_SIZE * 2];
        let mut out = vec![0.0f32; BLOCK_SIZE * 2];
        echo.run(0, 2, &input, &mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }
}
