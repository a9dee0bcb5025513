//! resona-spatial: panning for the Resona engine
//!
//! Two panning strategies behind one dispatch type:
//! - Stereo constant-power panning from a scalar or projected angles
//! - HRTF panning: crossfaded HRIR convolution plus a fractional-sample
//!   interaural time difference stage
//!
//! Angles follow HRIR dataset conventions: degrees, azimuth clockwise of
//! forward in [0, 360), elevation in [-90, 90].

pub mod hrtf;
mod panner;
mod stereo;

pub use panner::{Panner, PannerStrategy};
pub use stereo::StereoPanner;
