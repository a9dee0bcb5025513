//! The HRTF panner: crossfaded HRIR convolution plus an ITD stage.
//!
//! Two delay lines are involved:
//! 1. The input line holds the source's mono input, long enough for the
//!    convolution lookback plus a block.
//! 2. The ITD line holds the stereo convolution output, long enough for the
//!    maximum interaural delay plus one sample of interpolation headroom.
//!
//! When the panning angles move, the previous and current HRIR pairs are
//! both convolved for the first CROSSFADE_SAMPLES of the block and linearly
//! blended; the per-ear delays interpolate from their previous values over
//! the same window.

use resona_core::config::{BLOCK_SIZE, CROSSFADE_SAMPLES, HRTF_MAX_ITD};
use resona_dsp::delay_line::{BlockDelayLine, DelayAccess, ModView};

use super::{
    HrirDataset, IMPULSE_LENGTH, builtin_dataset, compute_hrtf_impulses,
    interaural_time_difference,
};

pub struct HrtfPanner {
    input_line: BlockDelayLine,
    itd_line: BlockDelayLine,

    /// Two stereo-interleaved HRIR sets; `current_hrir` indexes the live
    /// one and flips on every angle change.
    hrirs: [f32; IMPULSE_LENGTH * 2 * 2],
    current_hrir: usize,

    prev_itd_l: f32,
    prev_itd_r: f32,

    azimuth: f64,
    elevation: f64,
    moved: bool,

    dataset: &'static HrirDataset,
}

impl Default for HrtfPanner {
    fn default() -> Self {
        Self::new()
    }
}

impl HrtfPanner {
    pub fn new() -> Self {
        Self::with_dataset(builtin_dataset())
    }

    pub fn with_dataset(dataset: &'static HrirDataset) -> Self {
        Self {
            // Two blocks each: enough history for the convolution lookback
            // (input) and the maximum ITD plus one sample (output).
            input_line: BlockDelayLine::new(1, 2),
            itd_line: BlockDelayLine::new(2, 2),
            hrirs: [0.0; IMPULSE_LENGTH * 2 * 2],
            current_hrir: 0,
            prev_itd_l: 0.0,
            prev_itd_r: 0.0,
            azimuth: 0.0,
            elevation: 0.0,
            moved: true,
            dataset,
        }
    }

    /// Mono input block for this tick; fill it before calling [`run`].
    ///
    /// [`run`]: HrtfPanner::run
    pub fn input_buffer(&mut self) -> &mut [f32] {
        self.input_line.next_block()
    }

    pub fn set_panning_angles(&mut self, azimuth: f64, elevation: f64) {
        self.moved = self.moved || self.azimuth != azimuth || self.elevation != elevation;
        self.azimuth = azimuth;
        self.elevation = elevation;
    }

    pub fn set_panning_scalar(&mut self, scalar: f64) {
        debug_assert!((-1.0..=1.0).contains(&scalar));
        if scalar >= 0.0 {
            self.set_panning_angles(90.0 * scalar, 0.0);
        } else {
            self.set_panning_angles(360.0 + 90.0 * scalar, 0.0);
        }
    }

    /// Convolve and delay one block, adding interleaved stereo into
    /// `output`.
    pub fn run(&mut self, output: &mut [f32]) {
        debug_assert!(output.len() >= BLOCK_SIZE * 2);

        let crossfade = self.moved;
        self.moved = false;

        let prev_base = self.current_hrir * IMPULSE_LENGTH * 2;
        if crossfade {
            self.current_hrir ^= 1;
            let base = self.current_hrir * IMPULSE_LENGTH * 2;
            let mut left = [0.0f32; IMPULSE_LENGTH];
            let mut right = [0.0f32; IMPULSE_LENGTH];
            compute_hrtf_impulses(
                self.dataset,
                self.azimuth,
                self.elevation,
                &mut left,
                1,
                &mut right,
                1,
            );
            for j in 0..IMPULSE_LENGTH {
                self.hrirs[base + 2 * j] = left[j];
                self.hrirs[base + 2 * j + 1] = right[j];
            }
        }
        let cur_base = self.current_hrir * IMPULSE_LENGTH * 2;

        let crossfade_samples = if crossfade { CROSSFADE_SAMPLES } else { 0 };

        // Convolution stage: input line -> ITD line.
        {
            let hrirs = &self.hrirs;
            let itd_block = self.itd_line.next_block();
            match self.input_line.mod_view(IMPULSE_LENGTH - 1) {
                ModView::Contiguous(mut view) => convolve_block(
                    &mut view,
                    hrirs,
                    prev_base,
                    cur_base,
                    crossfade_samples,
                    itd_block,
                ),
                ModView::Wrapping(mut view) => convolve_block(
                    &mut view,
                    hrirs,
                    prev_base,
                    cur_base,
                    crossfade_samples,
                    itd_block,
                ),
            }
            self.input_line.advance_block();
        }

        // ITD stage: ITD line -> output, with linear-interpolated
        // fractional delays.
        let (itd_l, itd_r) = interaural_time_difference(self.azimuth, self.elevation);
        let itd = (itd_l as f32, itd_r as f32);
        let prev_itd = (self.prev_itd_l, self.prev_itd_r);
        match self.itd_line.mod_view(HRTF_MAX_ITD + 1) {
            ModView::Contiguous(mut view) => {
                apply_itd(&mut view, output, crossfade_samples, prev_itd, itd)
            }
            ModView::Wrapping(mut view) => {
                apply_itd(&mut view, output, crossfade_samples, prev_itd, itd)
            }
        }
        self.itd_line.advance_block();

        self.prev_itd_l = itd.0;
        self.prev_itd_r = itd.1;
    }

    pub fn reset(&mut self) {
        self.input_line.clear();
        self.itd_line.clear();
        self.prev_itd_l = 0.0;
        self.prev_itd_r = 0.0;
        self.moved = true;
    }
}

/// One convolution step at the view cursor: the dot product of the last
/// IMPULSE_LENGTH input samples with a stereo-interleaved HRIR.
#[inline(always)]
fn step_convolution<V: DelayAccess>(view: &V, hrir: &[f32]) -> (f32, f32) {
    #[cfg(feature = "simd")]
    {
        use wide::f32x4;
        let mut acc_l = f32x4::ZERO;
        let mut acc_r = f32x4::ZERO;
        let mut j = 0;
        while j < IMPULSE_LENGTH {
            let x = f32x4::new([
                view.read(0, j),
                view.read(0, j + 1),
                view.read(0, j + 2),
                view.read(0, j + 3),
            ]);
            let hrir_l = f32x4::new([
                hrir[2 * j],
                hrir[2 * (j + 1)],
                hrir[2 * (j + 2)],
                hrir[2 * (j + 3)],
            ]);
            let hrir_r = f32x4::new([
                hrir[2 * j + 1],
                hrir[2 * (j + 1) + 1],
                hrir[2 * (j + 2) + 1],
                hrir[2 * (j + 3) + 1],
            ]);
            acc_l += x * hrir_l;
            acc_r += x * hrir_r;
            j += 4;
        }
        (acc_l.reduce_add(), acc_r.reduce_add())
    }
    #[cfg(not(feature = "simd"))]
    {
        let mut acc_l = 0.0f32;
        let mut acc_r = 0.0f32;
        for j in 0..IMPULSE_LENGTH {
            let sample = view.read(0, j);
            acc_l += sample * hrir[2 * j];
            acc_r += sample * hrir[2 * j + 1];
        }
        (acc_l, acc_r)
    }
}

fn convolve_block<V: DelayAccess>(
    view: &mut V,
    hrirs: &[f32],
    prev_base: usize,
    cur_base: usize,
    crossfade_samples: usize,
    itd_block: &mut [f32],
) {
    let prev = &hrirs[prev_base..prev_base + IMPULSE_LENGTH * 2];
    let cur = &hrirs[cur_base..cur_base + IMPULSE_LENGTH * 2];

    for i in 0..crossfade_samples {
        let (l_old, r_old) = step_convolution(view, prev);
        let (l_new, r_new) = step_convolution(view, cur);
        let w_new = i as f32 / CROSSFADE_SAMPLES as f32;
        let w_old = 1.0 - w_new;
        itd_block[2 * i] = l_old * w_old + l_new * w_new;
        itd_block[2 * i + 1] = r_old * w_old + r_new * w_new;
        view.step();
    }
    for i in crossfade_samples..BLOCK_SIZE {
        let (l, r) = step_convolution(view, cur);
        itd_block[2 * i] = l;
        itd_block[2 * i + 1] = r;
        view.step();
    }
}

fn apply_itd<V: DelayAccess>(
    view: &mut V,
    output: &mut [f32],
    crossfade_samples: usize,
    prev_itd: (f32, f32),
    itd: (f32, f32),
) {
    for i in 0..crossfade_samples {
        let fraction = i as f32 / CROSSFADE_SAMPLES as f32;
        let left = itd.0 * fraction + prev_itd.0 * (1.0 - fraction);
        let right = itd.1 * fraction + prev_itd.1 * (1.0 - fraction);

        let left_i = left as usize;
        let right_i = right as usize;
        let w_late_l = left - left_i as f32;
        let w_late_r = right - right_i as f32;

        let l_early = view.read(0, left_i);
        let l_late = view.read(0, left_i + 1);
        let r_early = view.read(1, right_i);
        let r_late = view.read(1, right_i + 1);

        output[2 * i] += l_late * w_late_l + l_early * (1.0 - w_late_l);
        output[2 * i + 1] += r_late * w_late_r + r_early * (1.0 - w_late_r);
        view.step();
    }

    let itd_l_i = itd.0 as usize;
    let itd_r_i = itd.1 as usize;
    let w_late_l = itd.0 - itd_l_i as f32;
    let w_early_l = 1.0 - w_late_l;
    let w_late_r = itd.1 - itd_r_i as f32;
    let w_early_r = 1.0 - w_late_r;

    for i in crossfade_samples..BLOCK_SIZE {
        output[2 * i] += w_early_l * view.read(0, itd_l_i) + w_late_l * view.read(0, itd_l_i + 1);
        output[2 * i + 1] +=
            w_early_r * view.read(1, itd_r_i) + w_late_r * view.read(1, itd_r_i + 1);
        view.step();
    }
}
