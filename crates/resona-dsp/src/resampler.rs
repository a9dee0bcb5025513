//! Polyphase sinc resampling wrappers.
//!
//! Two shapes, both over rubato's sinc resamplers:
//! - [`BlockResampler`] (fixed output) feeds the streaming decode path: it
//!   asks for however much decoder-rate input it needs and emits exactly
//!   one engine-rate block per call.
//! - [`StreamResampler`] (fixed input) feeds the device output path: it
//!   consumes engine-rate blocks and emits whatever the device rate
//!   requires.
//!
//! rubato works on planar buffers; these wrappers own the planar scratch
//! and expose interleaved audio, which is what the rest of the engine
//! speaks.

use rubato::{
    Resampler, SincFixedIn, SincFixedOut, SincInterpolationParameters, SincInterpolationType,
    WindowFunction,
};

use resona_core::{EngineError, EngineResult};

fn sinc_params() -> SincInterpolationParameters {
    SincInterpolationParameters {
        sinc_len: 128,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 128,
        window: WindowFunction::BlackmanHarris2,
    }
}

fn construction_error(e: impl std::fmt::Display) -> EngineError {
    EngineError::Internal(format!("resampler construction failed: {e}"))
}

fn process_error(e: impl std::fmt::Display) -> EngineError {
    EngineError::Internal(format!("resampling failed: {e}"))
}

/// Fixed-output-size resampler: emits exactly `chunk_out` frames per call.
pub struct BlockResampler {
    inner: SincFixedOut<f32>,
    input: Vec<Vec<f32>>,
    output: Vec<Vec<f32>>,
    channels: usize,
    chunk_out: usize,
}

impl BlockResampler {
    pub fn new(in_rate: u32, out_rate: u32, channels: usize, chunk_out: usize) -> EngineResult<Self> {
        let inner = SincFixedOut::<f32>::new(
            out_rate as f64 / in_rate as f64,
            1.0,
            sinc_params(),
            chunk_out,
            channels,
        )
        .map_err(construction_error)?;
        let input = inner.input_buffer_allocate(true);
        let output = inner.output_buffer_allocate(true);
        Ok(Self {
            inner,
            input,
            output,
            channels,
            chunk_out,
        })
    }

    /// Frames of input the next `process_interleaved` call consumes.
    pub fn needed_input_frames(&self) -> usize {
        self.inner.input_frames_next()
    }

    /// Resample `needed_input_frames()` interleaved frames into exactly
    /// `chunk_out` interleaved frames.
    pub fn process_interleaved(&mut self, input: &[f32], output: &mut [f32]) -> EngineResult<()> {
        let in_frames = self.inner.input_frames_next();
        debug_assert_eq!(input.len(), in_frames * self.channels);
        debug_assert_eq!(output.len(), self.chunk_out * self.channels);

        for (ch, lane) in self.input.iter_mut().enumerate() {
            lane.clear();
            lane.extend((0..in_frames).map(|i| input[i * self.channels + ch]));
        }

        let (_, out_frames) = self
            .inner
            .process_into_buffer(&self.input, &mut self.output, None)
            .map_err(process_error)?;
        debug_assert_eq!(out_frames, self.chunk_out);

        for i in 0..out_frames {
            for ch in 0..self.channels {
                output[i * self.channels + ch] = self.output[ch][i];
            }
        }
        Ok(())
    }
}

/// Fixed-input-size resampler: consumes `chunk_in` frames per call.
pub struct StreamResampler {
    inner: SincFixedIn<f32>,
    input: Vec<Vec<f32>>,
    output: Vec<Vec<f32>>,
    channels: usize,
    chunk_in: usize,
}

impl StreamResampler {
    pub fn new(in_rate: u32, out_rate: u32, channels: usize, chunk_in: usize) -> EngineResult<Self> {
        let inner = SincFixedIn::<f32>::new(
            out_rate as f64 / in_rate as f64,
            1.0,
            sinc_params(),
            chunk_in,
            channels,
        )
        .map_err(construction_error)?;
        let input = inner.input_buffer_allocate(true);
        let output = inner.output_buffer_allocate(true);
        Ok(Self {
            inner,
            input,
            output,
            channels,
            chunk_in,
        })
    }

    /// Resample one interleaved chunk, appending interleaved output frames
    /// to `output`. Returns the number of frames appended.
    pub fn process_interleaved(&mut self, input: &[f32], output: &mut Vec<f32>) -> EngineResult<usize> {
        debug_assert_eq!(input.len(), self.chunk_in * self.channels);

        for (ch, lane) in self.input.iter_mut().enumerate() {
            lane.clear();
            lane.extend((0..self.chunk_in).map(|i| input[i * self.channels + ch]));
        }

        let (_, out_frames) = self
            .inner
            .process_into_buffer(&self.input, &mut self.output, None)
            .map_err(process_error)?;

        for i in 0..out_frames {
            for ch in 0..self.channels {
                output.push(self.output[ch][i]);
            }
        }
        Ok(out_frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_out_emits_exact_blocks() {
        let mut rs = BlockResampler::new(48000, 44100, 2, 256).unwrap();
        let mut out = vec![0.0f32; 256 * 2];
        for _ in 0..20 {
            let needed = rs.needed_input_frames();
            let input = vec![0.25f32; needed * 2];
            rs.process_interleaved(&input, &mut out).unwrap();
        }
        // After filter warm-up, a constant input yields the same constant.
        for &s in &out {
            assert!((s - 0.25).abs() < 1e-3, "sample {s}");
        }
    }

    #[test]
    fn fixed_in_rate_conversion_ratio() {
        let mut rs = StreamResampler::new(44100, 22050, 1, 256).unwrap();
        let mut produced = Vec::new();
        for _ in 0..100 {
            let input = vec![0.0f32; 256];
            rs.process_interleaved(&input, &mut produced).unwrap();
        }
        let expected = 100.0 * 256.0 * (22050.0 / 44100.0);
        let got = produced.len() as f64;
        assert!((got - expected).abs() / expected < 0.05, "{got} vs {expected}");
    }
}
