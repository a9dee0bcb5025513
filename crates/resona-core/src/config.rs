//! Fixed engine configuration.
//!
//! The sample rate and block size are compile-time constants so that every
//! DSP component can size its state statically and the hot loops never
//! branch on either value. External code only observes them through sample
//! counts and seconds.

/// Internal sample rate of the engine, in Hz.
///
/// Device output at other rates goes through the output resampler; decoders
/// at other rates are resampled on their background threads.
pub const SR: u32 = 44100;

/// Frames processed per audio tick. A power of two, multiple of 16.
pub const BLOCK_SIZE: usize = 256;

/// Length of internal crossfades (HRTF movement, filter reconfiguration),
/// in samples. Must be a multiple of 4 and less than [`BLOCK_SIZE`].
pub const CROSSFADE_SAMPLES: usize = 64;

/// Maximum channel count the engine will mix. Generators reporting more
/// channels are truncated.
pub const MAX_CHANNELS: usize = 16;

/// Maximum interaural time delay in samples.
///
/// Derived from the Woodworth formula's maximum for an 8.5 cm head radius
/// at [`SR`], rounded up to a power of two.
pub const HRTF_MAX_ITD: usize = 64;

/// Frames per chunk of decoded buffer storage.
pub const BUFFER_CHUNK_SIZE: usize = 1 << 14;

/// Seconds in one block.
#[inline]
pub fn block_duration() -> f64 {
    BLOCK_SIZE as f64 / SR as f64
}
