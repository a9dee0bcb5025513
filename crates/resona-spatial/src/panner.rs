//! Panner strategy dispatch.
//!
//! Panners are a closed set, so the dispatch is a plain enum. Panners are
//! constructed on the audio thread so a context-wide default strategy
//! applies consistently to sources created before and after it changes.

use resona_core::config::BLOCK_SIZE;

use crate::hrtf::HrtfPanner;
use crate::stereo::StereoPanner;

/// Which panner a panned source uses. Values are stable for the C ABI.
///
/// `Delegate` is only meaningful on sources: it defers to the context's
/// default strategy, which is how the context-wide default applies to
/// sources created before and after it changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i32)]
pub enum PannerStrategy {
    #[default]
    Delegate = 0,
    Hrtf = 1,
    Stereo = 2,
}

impl PannerStrategy {
    pub const COUNT: i32 = 3;

    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(Self::Delegate),
            1 => Some(Self::Hrtf),
            2 => Some(Self::Stereo),
            _ => None,
        }
    }
}

pub enum Panner {
    Stereo(StereoPanner),
    Hrtf(Box<HrtfPanner>),
}

impl Panner {
    pub fn new(strategy: PannerStrategy) -> Self {
        match strategy {
            // An unresolved delegate falls back to the cheap panner.
            PannerStrategy::Delegate | PannerStrategy::Stereo => {
                Panner::Stereo(StereoPanner::new())
            }
            PannerStrategy::Hrtf => Panner::Hrtf(Box::new(HrtfPanner::new())),
        }
    }

    pub fn strategy(&self) -> PannerStrategy {
        match self {
            Panner::Stereo(_) => PannerStrategy::Stereo,
            Panner::Hrtf(_) => PannerStrategy::Hrtf,
        }
    }

    /// Mono input block for this tick. Overwrite it fully before [`run`].
    ///
    /// [`run`]: Panner::run
    pub fn input_buffer(&mut self) -> &mut [f32] {
        match self {
            Panner::Stereo(p) => p.input_buffer(),
            Panner::Hrtf(p) => p.input_buffer(),
        }
    }

    pub fn set_panning_angles(&mut self, azimuth: f64, elevation: f64) {
        match self {
            Panner::Stereo(p) => p.set_panning_angles(azimuth, elevation),
            Panner::Hrtf(p) => p.set_panning_angles(azimuth, elevation),
        }
    }

    pub fn set_panning_scalar(&mut self, scalar: f64) {
        match self {
            Panner::Stereo(p) => p.set_panning_scalar(scalar),
            Panner::Hrtf(p) => p.set_panning_scalar(scalar),
        }
    }

    /// Add one panned block into interleaved stereo `output`.
    pub fn run(&mut self, output: &mut [f32]) {
        debug_assert!(output.len() >= BLOCK_SIZE * 2);
        match self {
            Panner::Stereo(p) => p.run(output),
            Panner::Hrtf(p) => p.run(output),
        }
    }
}
