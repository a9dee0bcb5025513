//! Decoded audio buffers.
//!
//! Buffers hold immutable 16-bit PCM at the engine sample rate, stored in
//! fixed-size chunks rather than one contiguous allocation. Chunking keeps
//! large buffers friendly to paged allocators and means the raw audio
//! cannot be lifted out of a process image as one block. A
//! [`BufferReader`] caches the chunk it last touched, so sequential reads
//! almost never re-resolve the chunk index; it deliberately does not own
//! the data, because generators reference buffers weakly.

use std::sync::Arc;

use resona_core::config::{BUFFER_CHUNK_SIZE, MAX_CHANNELS, SR};
use resona_core::{EngineError, EngineResult};
use resona_dsp::resampler::StreamResampler;

use crate::decoding::AudioDecoder;

/// Immutable decoded audio data.
pub struct BufferData {
    channels: usize,
    frames: usize,
    /// `BUFFER_CHUNK_SIZE * channels` samples per chunk; the last chunk may
    /// be partial.
    chunks: Vec<Box<[i16]>>,
}

impl BufferData {
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Length in frames at the engine sample rate.
    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn duration_seconds(&self) -> f64 {
        self.frames as f64 / SR as f64
    }

    /// Build from interleaved f32 frames already at the engine rate.
    pub fn from_interleaved(channels: usize, samples: &[f32]) -> EngineResult<Arc<Self>> {
        if channels == 0 || channels > MAX_CHANNELS {
            return Err(EngineError::Validation(format!(
                "buffer channel count {channels} out of range"
            )));
        }
        let frames = samples.len() / channels;
        let mut chunks = Vec::with_capacity(frames.div_ceil(BUFFER_CHUNK_SIZE));
        let mut cursor = 0;
        while cursor < frames {
            let chunk_frames = (frames - cursor).min(BUFFER_CHUNK_SIZE);
            let mut chunk = vec![0i16; chunk_frames * channels].into_boxed_slice();
            for (slot, &sample) in chunk
                .iter_mut()
                .zip(&samples[cursor * channels..(cursor + chunk_frames) * channels])
            {
                *slot = quantize(sample);
            }
            chunks.push(chunk);
            cursor += chunk_frames;
        }
        Ok(Arc::new(Self {
            channels,
            frames,
            chunks,
        }))
    }

    /// Decode an entire stream, resampling to the engine rate as needed.
    pub fn from_decoder(mut decoder: Box<dyn AudioDecoder>) -> EngineResult<Arc<Self>> {
        let channels = decoder.channels();
        if channels == 0 || channels > MAX_CHANNELS {
            return Err(EngineError::UnsupportedFormat(format!(
                "cannot buffer {channels}-channel audio"
            )));
        }
        let source_rate = decoder.sample_rate();

        const READ_FRAMES: usize = 4096;
        let mut scratch = vec![0.0f32; READ_FRAMES * channels];
        let mut samples = Vec::new();

        if source_rate == SR {
            loop {
                let got = decoder.write_frames_interleaved(READ_FRAMES, &mut scratch)?;
                if got == 0 {
                    break;
                }
                samples.extend_from_slice(&scratch[..got * channels]);
            }
        } else {
            let mut resampler = StreamResampler::new(source_rate, SR, channels, READ_FRAMES)?;
            loop {
                let got = decoder.write_frames_interleaved(READ_FRAMES, &mut scratch)?;
                if got == 0 {
                    break;
                }
                // Zero-pad a partial final read to the fixed chunk size.
                scratch[got * channels..].fill(0.0);
                resampler.process_interleaved(&scratch, &mut samples)?;
                if got < READ_FRAMES {
                    break;
                }
                scratch.fill(0.0);
            }
        }

        Self::from_interleaved(channels, &samples)
    }
}

#[inline]
fn quantize(sample: f32) -> i16 {
    (sample as f64 * 32768.0).round().clamp(-32768.0, 32767.0) as i16
}

#[inline]
fn dequantize(sample: i16) -> f32 {
    sample as f32 * (1.0 / 32768.0)
}

/// Chunk-cache cursor over a [`BufferData`].
///
/// Holds no reference to the data; the caller passes it per read, which
/// lets the owner hold the buffer weakly. The cache is only trusted when
/// the same data is passed back.
#[derive(Default)]
pub struct BufferReader {
    cached_start: usize,
    cached_end: usize,
    cached_chunk: usize,
    valid: bool,
}

impl BufferReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invalidate the cache (call when the underlying buffer changes).
    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    fn load_chunk(&mut self, data: &BufferData, frame: usize) {
        let chunk_index = frame / BUFFER_CHUNK_SIZE;
        let start = chunk_index * BUFFER_CHUNK_SIZE;
        self.cached_start = start;
        self.cached_end = (start + BUFFER_CHUNK_SIZE).min(data.frames);
        self.cached_chunk = chunk_index;
        self.valid = true;
    }

    /// Read one frame into `out`. Positions at or past the end read
    /// silence (the implicit zero frame).
    pub fn read_frame(&mut self, data: &BufferData, frame: usize, out: &mut [f32]) {
        let channels = data.channels;
        if frame >= data.frames {
            out[..channels].fill(0.0);
            return;
        }
        if !self.valid || frame < self.cached_start || frame >= self.cached_end {
            self.load_chunk(data, frame);
        }
        let chunk = &data.chunks[self.cached_chunk];
        let offset = (frame - self.cached_start) * channels;
        for ch in 0..channels {
            out[ch] = dequantize(chunk[offset + ch]);
        }
    }

    /// Read up to `count` frames starting at `frame`, stopping at a chunk
    /// boundary or the end of the buffer. Returns frames read.
    pub fn read_frames(
        &mut self,
        data: &BufferData,
        frame: usize,
        count: usize,
        out: &mut [f32],
    ) -> usize {
        let channels = data.channels;
        if frame >= data.frames {
            return 0;
        }
        if !self.valid || frame < self.cached_start || frame >= self.cached_end {
            self.load_chunk(data, frame);
        }
        let available = self.cached_end - frame;
        let got = count.min(available);
        let chunk = &data.chunks[self.cached_chunk];
        let offset = (frame - self.cached_start) * channels;
        for (slot, &sample) in out[..got * channels]
            .iter_mut()
            .zip(&chunk[offset..offset + got * channels])
        {
            *slot = dequantize(sample);
        }
        got
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_array_round_trips_within_quantization() {
        let frames = 3000;
        let samples: Vec<f32> = (0..frames * 2)
            .map(|i| ((i as f32 * 0.013).sin() * 0.9).clamp(-1.0, 1.0))
            .collect();
        let data = BufferData::from_interleaved(2, &samples).unwrap();
        assert_eq!(data.frames(), frames);

        let mut reader = BufferReader::new();
        let mut frame = [0.0f32; 2];
        for i in 0..frames {
            reader.read_frame(&data, i, &mut frame);
            for ch in 0..2 {
                let original = samples[i * 2 + ch];
                assert!(
                    (frame[ch] - original).abs() <= 1.0 / 32768.0,
                    "frame {i} ch {ch}: {} vs {original}",
                    frame[ch]
                );
            }
        }
    }

    #[test]
    fn reads_cross_chunk_boundaries() {
        let frames = BUFFER_CHUNK_SIZE + 100;
        let samples: Vec<f32> = (0..frames).map(|i| (i % 128) as f32 / 128.0).collect();
        let data = BufferData::from_interleaved(1, &samples).unwrap();
        let mut reader = BufferReader::new();

        let mut out = vec![0.0f32; frames];
        let mut pos = 0;
        while pos < frames {
            let got = reader.read_frames(&data, pos, frames - pos, &mut out[pos..]);
            assert!(got > 0);
            pos += got;
        }
        for i in 0..frames {
            assert!((out[i] - samples[i]).abs() <= 1.0 / 32768.0);
        }
    }

    #[test]
    fn past_end_reads_silence() {
        let data = BufferData::from_interleaved(1, &[0.5; 10]).unwrap();
        let mut reader = BufferReader::new();
        let mut frame = [1.0f32];
        reader.read_frame(&data, 10, &mut frame);
        assert_eq!(frame[0], 0.0);
        assert_eq!(reader.read_frames(&data, 10, 4, &mut [0.0; 4]), 0);
    }

    #[test]
    fn rejects_bad_channel_counts() {
        assert!(BufferData::from_interleaved(0, &[]).is_err());
        assert!(BufferData::from_interleaved(MAX_CHANNELS + 1, &[0.0; 64]).is_err());
    }

    #[test]
    fn decode_path_preserves_same_rate_audio() {
        use crate::decoding::RawFloatDecoder;
        let samples: Vec<f32> = (0..1000).map(|i| (i as f32 * 0.01).sin()).collect();
        let decoder = RawFloatDecoder::new(SR, 1, samples.clone());
        let data = BufferData::from_decoder(Box::new(decoder)).unwrap();
        assert_eq!(data.frames(), 1000);
        let mut reader = BufferReader::new();
        let mut frame = [0.0f32];
        for (i, &original) in samples.iter().enumerate() {
            reader.read_frame(&data, i, &mut frame);
            assert!((frame[0] - original).abs() <= 1.0 / 32768.0);
        }
    }
}
