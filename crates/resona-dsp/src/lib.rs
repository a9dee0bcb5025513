//! resona-dsp: DSP kernels for the Resona engine
//!
//! ## Modules
//! - `delay_line` - Multi-lane block delay line with modulo-eliding reader views
//! - `filter_design` - Audio-EQ-Cookbook biquad designers
//! - `iir` - Fixed-lane IIR runner (f64 accumulation over f32 I/O)
//! - `crossfading` - User-facing biquad with crossfade-on-reconfigure
//! - `sine_bank` - Trig-recurrence sine bank and waveform partial builders
//! - `noise` - Uniform, Voss-McCartney pink, and filtered brown noise
//! - `channels` - Channel count conversion (up/downmix)
//! - `resampler` - Fixed-output-block polyphase sinc resampling (rubato)

pub mod channels;
pub mod crossfading;
pub mod delay_line;
pub mod filter_design;
pub mod iir;
pub mod noise;
pub mod resampler;
pub mod sine_bank;

pub use crossfading::CrossfadingBiquad;
pub use delay_line::{BlockDelayLine, DelayAccess, ModView};
pub use filter_design::BiquadDef;
pub use iir::IirFilter;
pub use noise::{NoiseGenerator, NoiseType};
pub use sine_bank::{FastSineBank, SineWaveConfig};
