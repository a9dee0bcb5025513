//! HRIR dataset, interpolated lookup, and interaural time difference.
//!
//! The dataset is a set of elevation bands, each holding impulses on an
//! equidistant azimuth grid for the LEFT ear; the right ear is obtained by
//! mirroring azimuth as `360 - az`. ITD is computed analytically from the
//! angles with the Woodworth formula rather than being baked into the
//! impulses, which keeps interpolation between neighboring impulses
//! phase-coherent.

mod panner;

pub use panner::HrtfPanner;

use once_cell::sync::Lazy;

use resona_core::config::{HRTF_MAX_ITD, SR};

/// Taps per head-related impulse response.
pub const IMPULSE_LENGTH: usize = 32;

/// Physical parameters for the ITD model. SI units.
#[derive(Debug, Clone, Copy)]
pub struct HrirParameters {
    pub head_radius: f64,
    pub speed_of_sound: f64,
}

impl Default for HrirParameters {
    fn default() -> Self {
        Self {
            head_radius: 0.08,
            speed_of_sound: 343.0,
        }
    }
}

/// One elevation band of the dataset.
#[derive(Debug, Clone, Copy)]
pub struct ElevationBand {
    /// Elevation angle of the band in degrees.
    pub angle: f64,
    /// Number of equidistant azimuths in this band.
    pub azimuth_count: usize,
    /// Index of this band's first impulse in the impulse table.
    pub azimuth_start: usize,
}

/// A left-ear HRIR dataset.
pub struct HrirDataset {
    pub elevations: Vec<ElevationBand>,
    pub impulses: Vec<[f32; IMPULSE_LENGTH]>,
}

/// Compute the interaural time difference for a source at (azimuth,
/// elevation) degrees.
///
/// Returns (left_delay, right_delay) in fractional samples; one side is
/// always 0 and the other is clamped to [`HRTF_MAX_ITD`]. Uses the
/// Woodworth formula `ITD = (r / c)(θ + sin θ)` where θ is the angle
/// between the median plane and the source direction.
pub fn interaural_time_difference(azimuth: f64, elevation: f64) -> (f64, f64) {
    interaural_time_difference_with(azimuth, elevation, &HrirParameters::default())
}

pub fn interaural_time_difference_with(
    azimuth: f64,
    elevation: f64,
    params: &HrirParameters,
) -> (f64, f64) {
    let az_r = azimuth.to_radians();
    let elev_r = elevation.to_radians();

    // The x (rightward) component of the unit direction vector; azimuth is
    // clockwise of forward (+y).
    let x = az_r.sin() * elev_r.cos();

    // Angle between the median plane and the direction, folded into
    // [0, pi/2]: the head is front-back symmetric.
    let angle = std::f64::consts::FRAC_PI_2 - x.abs().acos();

    let itd_s = (params.head_radius / params.speed_of_sound) * (angle + angle.sin());
    let itd = (itd_s * SR as f64).min(HRTF_MAX_ITD as f64);

    // For 0 <= az < 180 the source is right of the head and the LEFT ear is
    // delayed.
    let intervals = (az_r / std::f64::consts::PI) as u64;
    let source_is_left = intervals % 2 == 1;
    if source_is_left {
        (0.0, itd)
    } else {
        (itd, 0.0)
    }
}

/// Weights for linear interpolation of `val` between `start` and `end`.
fn linear_weights(val: f64, start: f64, end: f64) -> (f64, f64) {
    if start == end {
        return (0.5, 0.5);
    }
    let val = val.clamp(start, end);
    let w1 = (val - start) / (end - start);
    (1.0 - w1, w1)
}

fn compute_impulse_single_channel(
    dataset: &HrirDataset,
    azimuth: f64,
    elevation: f64,
    lower: &ElevationBand,
    upper: &ElevationBand,
    out: &mut [f32],
    out_stride: usize,
) {
    let mut weights = [0.0f64; 4];
    let mut impulses: [&[f32; IMPULSE_LENGTH]; 4] = [&dataset.impulses[0]; 4];
    let mut weight_count = 0;

    let (e0, e1) = if lower.azimuth_start == upper.azimuth_start {
        (1.0, 0.0)
    } else {
        linear_weights(elevation, lower.angle, upper.angle)
    };
    let bands = [(lower, e0), (upper, e1)];

    for (band, elev_weight) in bands {
        if elev_weight == 0.0 && weight_count > 0 {
            break;
        }
        let step = 360.0 / band.azimuth_count as f64;
        // Unwrapped azimuth index, which keeps the interpolation math
        // simple; the modulo happens when fetching impulses.
        let i = (azimuth / step) as usize;
        let i1 = i % band.azimuth_count;
        let i2 = (i1 + 1) % band.azimuth_count;

        if i1 == i2 {
            impulses[weight_count] = &dataset.impulses[band.azimuth_start + i1];
            weights[weight_count] = elev_weight;
            weight_count += 1;
        } else {
            let (w1, w2) = linear_weights(azimuth, i as f64 * step, (i + 1) as f64 * step);
            impulses[weight_count] = &dataset.impulses[band.azimuth_start + i1];
            impulses[weight_count + 1] = &dataset.impulses[band.azimuth_start + i2];
            weights[weight_count] = w1 * elev_weight;
            weights[weight_count + 1] = w2 * elev_weight;
            weight_count += 2;
        }
    }

    for i in 0..IMPULSE_LENGTH {
        out[i * out_stride] = impulses[0][i] * weights[0] as f32;
    }
    for c in 1..weight_count {
        let weight = weights[c] as f32;
        for i in 0..IMPULSE_LENGTH {
            out[i * out_stride] += impulses[c][i] * weight;
        }
    }
}

/// Bilinearly interpolate the dataset at (azimuth, elevation) and write the
/// left/right impulses at the given strides.
pub fn compute_hrtf_impulses(
    dataset: &HrirDataset,
    azimuth: f64,
    elevation: f64,
    left: &mut [f32],
    left_stride: usize,
    right: &mut [f32],
    right_stride: usize,
) {
    debug_assert!((0.0..=360.0).contains(&azimuth));
    debug_assert!((-90.0..=90.0).contains(&elevation));

    let mut lower: Option<&ElevationBand> = None;
    let mut upper: Option<&ElevationBand> = None;
    for band in &dataset.elevations {
        if band.angle <= elevation {
            lower = Some(band);
        } else {
            upper = Some(band);
            break;
        }
    }
    let lower = lower.or(upper).expect("dataset has elevation bands");
    let upper = upper.unwrap_or(lower);
    let elevation = elevation.clamp(lower.angle, upper.angle);

    compute_impulse_single_channel(dataset, azimuth, elevation, lower, upper, left, left_stride);
    compute_impulse_single_channel(
        dataset,
        (360.0 - azimuth).rem_euclid(360.0),
        elevation,
        lower,
        upper,
        right,
        right_stride,
    );
}

/// The built-in synthetic dataset.
///
/// A simple geometric model: per-ear level difference from the lateral
/// component of the direction vector, an elevation-dependent notch, and a
/// head-shadow one-pole on the far ear. A measured dataset can replace this
/// by constructing [`HrirDataset`] directly.
pub fn builtin_dataset() -> &'static HrirDataset {
    static DATASET: Lazy<HrirDataset> = Lazy::new(build_synthetic_dataset);
    &DATASET
}

fn build_synthetic_dataset() -> HrirDataset {
    const AZIMUTH_COUNT: usize = 24;
    let mut elevations = Vec::new();
    let mut impulses = Vec::new();

    let mut elevation = -40.0f64;
    while elevation <= 90.0 {
        elevations.push(ElevationBand {
            angle: elevation,
            azimuth_count: AZIMUTH_COUNT,
            azimuth_start: impulses.len(),
        });
        for az_index in 0..AZIMUTH_COUNT {
            let azimuth = az_index as f64 * 360.0 / AZIMUTH_COUNT as f64;
            impulses.push(synthesize_left_impulse(azimuth, elevation));
        }
        elevation += 10.0;
    }

    HrirDataset {
        elevations,
        impulses,
    }
}

fn synthesize_left_impulse(azimuth: f64, elevation: f64) -> [f32; IMPULSE_LENGTH] {
    let az_r = azimuth.to_radians();
    let el_r = elevation.to_radians();

    // Lateral component: positive x is right of the head, so the left ear
    // gets quieter as x grows.
    let x = az_r.sin() * el_r.cos();
    let gain = (0.5 * (1.0 - x)).sqrt() as f32;

    let mut impulse = [0.0f32; IMPULSE_LENGTH];

    // Gaussian main lobe near the start of the response.
    let center = 2.0;
    let sigma = 1.1;
    for (i, tap) in impulse.iter_mut().enumerate() {
        let d = (i as f64 - center) / sigma;
        *tap = gain * (-0.5 * d * d).exp() as f32;
    }

    // A crude pinna cue: a small negative echo whose position tracks
    // elevation.
    let notch_pos = 8 + ((elevation + 40.0) / 130.0 * 12.0) as usize;
    if notch_pos < IMPULSE_LENGTH {
        impulse[notch_pos] -= 0.15 * gain;
    }

    // Head shadow: the more the source sits to the right, the duller the
    // left ear.
    if x > 0.0 {
        let coefficient = 1.0 - 0.7 * x as f32;
        let mut state = 0.0f32;
        for tap in &mut impulse {
            state = state * (1.0 - coefficient) + *tap * coefficient;
            *tap = state;
        }
    }

    impulse
}
