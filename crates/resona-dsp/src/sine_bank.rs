//! Fast sine bank.
//!
//! Built on the angle addition identities
//!
//! ```text
//! sin(a + b) = sin(a) cos(b) + cos(a) sin(b)
//! cos(a + b) = cos(a) cos(b) - sin(a) sin(b)
//! ```
//!
//! Holding b (the per-sample phase increment) constant steps every wave
//! with two multiplies and an add, with no trig call in the inner loop.
//! The recurrence drifts in f32, so the bank re-seeds from true sin/cos at
//! the start of every block, bounding the error per block.

use std::f64::consts::PI;

use resona_core::config::{BLOCK_SIZE, SR};

/// Configuration for one wave in the bank.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SineWaveConfig {
    /// Frequency as a multiplier of the bank's base frequency; 1.0 is the
    /// fundamental, 2.0 the first harmonic.
    pub freq_mul: f64,
    /// Phase in the range 0.0 to 1.0.
    pub phase: f64,
    pub gain: f64,
}

impl SineWaveConfig {
    pub fn new(freq_mul: f64, phase: f64, gain: f64) -> Self {
        Self {
            freq_mul,
            phase,
            gain,
        }
    }
}

/// A bank of sine waves sharing a fundamental frequency.
pub struct FastSineBank {
    waves: Vec<SineWaveConfig>,
    /// Bank time in the range 0.0 to 1.0.
    time: f64,
    frequency: f64,
}

impl FastSineBank {
    pub fn new(frequency: f64) -> Self {
        Self {
            waves: Vec::new(),
            time: 0.0,
            frequency,
        }
    }

    pub fn add_wave(&mut self, wave: SineWaveConfig) {
        self.waves.push(wave);
    }

    pub fn clear_waves(&mut self) {
        self.waves.clear();
    }

    pub fn set_frequency(&mut self, frequency: f64) {
        self.frequency = frequency;
    }

    /// Add one block of output into `out`.
    pub fn fill_block(&mut self, out: &mut [f32]) {
        debug_assert!(out.len() >= BLOCK_SIZE);

        for wave in &self.waves {
            let freq = wave.freq_mul * self.frequency;
            let t = 2.0 * PI * (freq * self.time + wave.phase);
            let mut sa = t.sin() as f32;
            let mut ca = t.cos() as f32;
            // Radians advanced per sample.
            let b = 2.0 * PI * freq / SR as f64;
            let sb = b.sin() as f32;
            let cb = b.cos() as f32;
            let gain = wave.gain as f32;

            for sample in out.iter_mut().take(BLOCK_SIZE) {
                *sample += gain * sa;
                let new_sa = sa * cb + ca * sb;
                let new_ca = ca * cb - sa * sb;
                sa = new_sa;
                ca = new_ca;
            }
        }

        self.time = (self.time + BLOCK_SIZE as f64 / SR as f64) % 1.0;
    }
}

/// Apply the Lanczos sigma approximation to an ordered harmonic series.
///
/// Multiplying each term's gain by sinc(n·π / 2m) damps the Gibbs
/// oscillation when a waveform is approximated by a truncated Fourier
/// series.
fn sigma_approximate(waves: &mut [SineWaveConfig]) {
    let m = waves
        .last()
        .map(|w| w.freq_mul + 1.0)
        .expect("series must be non-empty");
    for wave in waves.iter_mut() {
        let n = wave.freq_mul;
        wave.gain *= (PI * n / (2.0 * m)).sin();
    }
}

/// Scale gains so they sum to 1.
fn normalize_series(waves: &mut [SineWaveConfig]) {
    let sum: f64 = waves.iter().map(|w| w.gain).sum();
    let norm = 1.0 / sum;
    for wave in waves.iter_mut() {
        wave.gain *= norm;
    }
}

/// Odd harmonics at 1/(2k+1), sigma-approximated and normalized.
pub fn square_series(partials: usize) -> Vec<SineWaveConfig> {
    let mut out: Vec<SineWaveConfig> = (0..partials.max(1))
        .map(|p| SineWaveConfig::new((p * 2 + 1) as f64, 0.0, 1.0 / (2 * p + 1) as f64))
        .collect();
    sigma_approximate(&mut out);
    normalize_series(&mut out);
    out
}

/// Odd harmonics at 1/n² with alternating sign, sigma-approximated and
/// normalized.
pub fn triangle_series(partials: usize) -> Vec<SineWaveConfig> {
    let mut out: Vec<SineWaveConfig> = (0..partials.max(1))
        .map(|p| {
            let n = (p * 2 + 1) as f64;
            let sign = if p % 2 == 0 { 1.0 } else { -1.0 };
            SineWaveConfig::new(n, 0.0, sign / (n * n))
        })
        .collect();
    sigma_approximate(&mut out);
    let sum: f64 = out.iter().map(|w| w.gain.abs()).sum();
    for wave in out.iter_mut() {
        wave.gain /= sum;
    }
    out
}

/// All harmonics at 1/n, sigma-approximated and normalized.
pub fn saw_series(partials: usize) -> Vec<SineWaveConfig> {
    let mut out: Vec<SineWaveConfig> = (0..partials.max(1))
        .map(|p| SineWaveConfig::new((p + 1) as f64, 0.0, 1.0 / (p + 1) as f64))
        .collect();
    sigma_approximate(&mut out);
    normalize_series(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reference bank evaluating true f64 sin per sample.
    fn reference_block(
        waves: &[SineWaveConfig],
        frequency: f64,
        start_time: f64,
        out: &mut [f64],
    ) {
        for (i, sample) in out.iter_mut().enumerate() {
            let t = start_time + i as f64 / SR as f64;
            let mut acc = 0.0;
            for w in waves {
                acc += w.gain * (2.0 * PI * (w.freq_mul * frequency * t + w.phase)).sin();
            }
            *sample = acc;
        }
    }

    /// The recurrence bank must track the trig-per-sample reference bank
    /// closely over a long run.
    #[test]
    fn tracks_reference_bank() {
        let waves = [
            SineWaveConfig::new(1.0, 0.0, 0.5),
            SineWaveConfig::new(2.0, 0.1, 0.2),
            SineWaveConfig::new(3.0, 0.03, 0.2),
            SineWaveConfig::new(4.0, 0.0, 0.01),
        ];
        let mut bank = FastSineBank::new(300.0);
        for w in waves {
            bank.add_wave(w);
        }

        let mut max_err = 0.0f64;
        let mut time = 0.0;
        let mut block = [0.0f32; BLOCK_SIZE];
        let mut reference = [0.0f64; BLOCK_SIZE];
        for _ in 0..2000 {
            block.fill(0.0);
            bank.fill_block(&mut block);
            reference_block(&waves, 300.0, time, &mut reference);
            for i in 0..BLOCK_SIZE {
                max_err = max_err.max((block[i] as f64 - reference[i]).abs());
            }
            // Track time the way the bank does, mod 1 second, so both
            // accumulate the same rounding.
            time = (time + BLOCK_SIZE as f64 / SR as f64) % 1.0;
        }
        assert!(max_err < 2e-4, "max error {max_err}");
    }

    #[test]
    fn square_series_shape() {
        let series = square_series(4);
        assert_eq!(series.len(), 4);
        assert_eq!(series[1].freq_mul, 3.0);
        assert_eq!(series[3].freq_mul, 7.0);
        // Normalized: gains sum to 1.
        let sum: f64 = series.iter().map(|w| w.gain).sum();
        assert!((sum - 1.0).abs() < 1e-12);
        // Sigma approximation keeps the series monotonically decreasing.
        for pair in series.windows(2) {
            assert!(pair[0].gain > pair[1].gain);
        }
    }

    #[test]
    fn bank_output_is_additive() {
        let mut bank = FastSineBank::new(100.0);
        bank.add_wave(SineWaveConfig::new(1.0, 0.25, 1.0));
        let mut block = [1.0f32; BLOCK_SIZE];
        bank.fill_block(&mut block);
        // Phase 0.25 starts at sin(pi/2) = 1; output adds to the existing 1.
        assert!((block[0] - 2.0).abs() < 1e-6);
    }
}
