//! Constant-power stereo panner.

use std::f32::consts::PI;

use resona_core::config::BLOCK_SIZE;

pub struct StereoPanner {
    input: Box<[f32]>,
    gain_l: f32,
    gain_r: f32,
}

impl Default for StereoPanner {
    fn default() -> Self {
        Self::new()
    }
}

impl StereoPanner {
    pub fn new() -> Self {
        let mut panner = Self {
            input: vec![0.0; BLOCK_SIZE].into_boxed_slice(),
            gain_l: 0.0,
            gain_r: 0.0,
        };
        panner.set_panning_scalar(0.0);
        panner
    }

    /// Mono input block, refilled by the owner every tick.
    pub fn input_buffer(&mut self) -> &mut [f32] {
        &mut self.input
    }

    /// Project (azimuth, elevation) onto the pan scalar. Azimuth is
    /// clockwise of forward; we want clockwise of left, dropping the wrap.
    pub fn set_panning_angles(&mut self, azimuth: f64, _elevation: f64) {
        let angle = (90.0 + azimuth).rem_euclid(360.0);
        let scalar = if angle <= 180.0 {
            -1.0 + 2.0 * (angle / 180.0)
        } else {
            1.0 - 2.0 * (angle - 180.0) / 180.0
        };
        self.set_panning_scalar(scalar);
    }

    /// Constant-power pan from a scalar in [-1, 1].
    ///
    /// Maps onto [0, 90] degrees and uses cos/sin so that squared gains
    /// always sum to 1.
    pub fn set_panning_scalar(&mut self, scalar: f64) {
        debug_assert!((-1.0..=1.0).contains(&scalar));
        let angle = ((1.0 + scalar) / 2.0 * 90.0) as f32 * (PI / 180.0);
        self.gain_l = angle.cos();
        self.gain_r = angle.sin();
    }

    /// Add the panned input into an interleaved stereo block.
    pub fn run(&mut self, output: &mut [f32]) {
        debug_assert!(output.len() >= BLOCK_SIZE * 2);
        for (i, &sample) in self.input.iter().enumerate() {
            output[i * 2] += self.gain_l * sample;
            output[i * 2 + 1] += self.gain_r * sample;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn gains_for_scalar(scalar: f64) -> (f32, f32) {
        let mut panner = StereoPanner::new();
        panner.set_panning_scalar(scalar);
        panner.input_buffer().fill(1.0);
        let mut out = vec![0.0; BLOCK_SIZE * 2];
        panner.run(&mut out);
        (out[0], out[1])
    }

    #[test]
    fn center_is_equal_power() {
        let (l, r) = gains_for_scalar(0.0);
        assert_relative_eq!(l, r, epsilon = 1e-6);
        assert_relative_eq!(l * l + r * r, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn extremes_are_one_sided() {
        let (l, r) = gains_for_scalar(-1.0);
        assert_relative_eq!(l, 1.0, epsilon = 1e-6);
        assert!(r.abs() < 1e-6);

        let (l, r) = gains_for_scalar(1.0);
        assert!(l.abs() < 1e-6);
        assert_relative_eq!(r, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn power_is_constant_everywhere() {
        for i in 0..=20 {
            let scalar = -1.0 + i as f64 * 0.1;
            let (l, r) = gains_for_scalar(scalar);
            assert_relative_eq!(l * l + r * r, 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn angles_project_to_sides() {
        let mut panner = StereoPanner::new();
        panner.set_panning_angles(90.0, 0.0);
        panner.input_buffer().fill(1.0);
        let mut out = vec![0.0; BLOCK_SIZE * 2];
        panner.run(&mut out);
        // Hard right.
        assert!(out[0].abs() < 1e-6);
        assert_relative_eq!(out[1], 1.0, epsilon = 1e-6);

        let mut panner = StereoPanner::new();
        panner.set_panning_angles(270.0, 0.0);
        panner.input_buffer().fill(1.0);
        let mut out = vec![0.0; BLOCK_SIZE * 2];
        panner.run(&mut out);
        // Hard left.
        assert_relative_eq!(out[0], 1.0, epsilon = 1e-6);
        assert!(out[1].abs() < 1e-6);
    }
}
