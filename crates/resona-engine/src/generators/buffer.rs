//! Buffer playback generator.
//!
//! Tracks its read position in fixed point (16 fractional bits) so pitch
//! bend can step by fractional samples without losing precision over long
//! playback. The no-pitch-bend path copies whole runs of frames through
//! the reader; the pitch-bend path walks sample by sample with linear
//! interpolation. Non-looping interpolation reads the implicit zero frame
//! one past the end rather than clamping.

use std::sync::Weak;

use resona_core::config::{BLOCK_SIZE, MAX_CHANNELS, SR};

use crate::buffer::{BufferData, BufferReader};
use crate::properties::{PropertyBag, PropertyValue, ids};

use super::GeneratorOutput;

/// Fixed-point scale for playback positions.
const POS_ONE: u64 = 1 << 16;

pub struct BufferGenerator {
    buffer: Weak<BufferData>,
    reader: BufferReader,
    /// Position in 48.16 fixed-point samples.
    position: u64,
    channels: usize,
    finished: bool,
}

impl Default for BufferGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferGenerator {
    pub fn new() -> Self {
        Self {
            buffer: Weak::new(),
            reader: BufferReader::new(),
            position: 0,
            channels: 0,
            finished: false,
        }
    }

    /// Install a new buffer (weakly). Resets the position.
    pub fn set_buffer(&mut self, buffer: Weak<BufferData>) {
        self.channels = buffer.upgrade().map(|b| b.channels()).unwrap_or(0);
        self.buffer = buffer;
        self.reader.invalidate();
        self.position = 0;
        self.finished = false;
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Seconds of audio left at unity pitch, for lingering.
    pub fn remaining_seconds(&self) -> Option<f64> {
        let buffer = self.buffer.upgrade()?;
        let pos_frames = (self.position / POS_ONE) as f64;
        Some((buffer.frames() as f64 - pos_frames).max(0.0) / SR as f64)
    }

    pub fn generate(
        &mut self,
        bag: &PropertyBag,
        _block_time: u64,
        out: &mut [f32],
        gain: &impl Fn(usize) -> f32,
    ) -> GeneratorOutput {
        if let Some(PropertyValue::Double(seconds)) = bag.acquire(ids::PLAYBACK_POSITION) {
            self.position = (seconds * SR as f64 * POS_ONE as f64).round() as u64;
            self.finished = false;
        }
        let pitch_bend = bag.get_double(ids::PITCH_BEND);
        let looping = bag.get_int(ids::LOOPING) != 0;

        let Some(buffer) = self.buffer.upgrade() else {
            return GeneratorOutput::Silent;
        };
        if buffer.frames() == 0 {
            return GeneratorOutput::Silent;
        }
        self.channels = buffer.channels();

        let output = if (1.0 - pitch_bend).abs() > 0.001 {
            self.generate_pitch_bend(&buffer, out, gain, pitch_bend, looping)
        } else {
            self.generate_straight(&buffer, out, gain, looping)
        };

        // The audio thread owns this value; writing it back must not look
        // like a client write.
        let _ = bag.write(
            ids::PLAYBACK_POSITION,
            PropertyValue::Double((self.position / POS_ONE) as f64 / SR as f64),
            false,
        );
        output
    }

    fn generate_straight(
        &mut self,
        buffer: &BufferData,
        out: &mut [f32],
        gain: &impl Fn(usize) -> f32,
        looping: bool,
    ) -> GeneratorOutput {
        let channels = buffer.channels();
        let mut workspace = [0.0f32; BLOCK_SIZE * MAX_CHANNELS];

        let mut pos = (self.position / POS_ONE) as usize;
        let mut written = 0;
        let mut looped = false;

        while written < BLOCK_SIZE {
            let got = self.reader.read_frames(
                buffer,
                pos,
                BLOCK_SIZE - written,
                &mut workspace[..(BLOCK_SIZE - written) * channels],
            );
            for i in 0..got {
                let g = gain(written + i);
                for ch in 0..channels {
                    out[(written + i) * channels + ch] += g * workspace[i * channels + ch];
                }
            }
            written += got;
            pos += got;
            if written < BLOCK_SIZE {
                if !looping {
                    break;
                }
                pos = 0;
                looped = true;
            }
        }

        self.position = pos as u64 * POS_ONE;

        if looped {
            GeneratorOutput::Looped
        } else if !looping && written < BLOCK_SIZE {
            if self.finished {
                GeneratorOutput::Silent
            } else {
                self.finished = true;
                GeneratorOutput::Finished
            }
        } else {
            GeneratorOutput::Produced
        }
    }

    fn generate_pitch_bend(
        &mut self,
        buffer: &BufferData,
        out: &mut [f32],
        gain: &impl Fn(usize) -> f32,
        pitch_bend: f64,
        looping: bool,
    ) -> GeneratorOutput {
        let channels = buffer.channels();
        let frames = buffer.frames() as u64;
        let length_fp = frames * POS_ONE;
        let delta = (pitch_bend * POS_ONE as f64).round() as u64;

        let mut f1 = [0.0f32; MAX_CHANNELS];
        let mut f2 = [0.0f32; MAX_CHANNELS];
        let mut pos = self.position;
        let mut looped = false;
        let mut ended = false;

        for i in 0..BLOCK_SIZE {
            if pos >= length_fp {
                if looping {
                    pos %= length_fp;
                    looped = true;
                } else {
                    ended = true;
                    break;
                }
            }
            let lower = (pos / POS_ONE) as usize;
            let upper = if looping {
                (lower + 1) % buffer.frames()
            } else {
                // Reads past the end hit the implicit zero frame.
                lower + 1
            };
            let w2 = (pos & (POS_ONE - 1)) as f32 / POS_ONE as f32;
            let w1 = 1.0 - w2;
            self.reader.read_frame(buffer, lower, &mut f1);
            self.reader.read_frame(buffer, upper, &mut f2);
            let g = gain(i);
            for ch in 0..channels {
                out[i * channels + ch] += g * (f1[ch] * w1 + f2[ch] * w2);
            }
            pos += delta;
        }

        self.position = pos.min(length_fp);

        if looped {
            GeneratorOutput::Looped
        } else if ended {
            if self.finished {
                GeneratorOutput::Silent
            } else {
                self.finished = true;
                GeneratorOutput::Finished
            }
        } else {
            GeneratorOutput::Produced
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::objects::{ObjectCommon, ObjectType};

    fn test_bag() -> &'static PropertyBag {
        let common = Box::leak(Box::new(ObjectCommon::new(
            1,
            ObjectType::BufferGenerator,
        )));
        common.bag()
    }

    fn ramp_buffer(frames: usize) -> Arc<BufferData> {
        let samples: Vec<f32> = (0..frames).map(|i| (i % 100) as f32 / 200.0).collect();
        BufferData::from_interleaved(1, &samples).unwrap()
    }

    #[test]
    fn straight_playback_reads_in_order() {
        let bag = test_bag();
        let buffer = ramp_buffer(BLOCK_SIZE * 3);
        let mut generator = BufferGenerator::new();
        generator.set_buffer(Arc::downgrade(&buffer));

        let unity = |_: usize| 1.0f32;
        let mut reader = BufferReader::new();
        for block in 0..3 {
            let mut out = vec![0.0f32; BLOCK_SIZE];
            let output = generator.generate(bag, 0, &mut out, &unity);
            assert_eq!(output, GeneratorOutput::Produced);
            let mut expected = [0.0f32];
            for i in 0..BLOCK_SIZE {
                reader.read_frame(&buffer, block * BLOCK_SIZE + i, &mut expected);
                assert_eq!(out[i], expected[0], "block {block} sample {i}");
            }
        }
        // Buffer exhausted: finished exactly once, then silent.
        let mut out = vec![0.0f32; BLOCK_SIZE];
        assert_eq!(
            generator.generate(bag, 0, &mut out, &unity),
            GeneratorOutput::Finished
        );
        assert_eq!(
            generator.generate(bag, 0, &mut out, &unity),
            GeneratorOutput::Silent
        );
    }

    #[test]
    fn looping_wraps_and_reports() {
        let bag = test_bag();
        bag.write(ids::LOOPING, PropertyValue::Int(1), true).unwrap();
        let buffer = ramp_buffer(100);
        let mut generator = BufferGenerator::new();
        generator.set_buffer(Arc::downgrade(&buffer));

        let unity = |_: usize| 1.0f32;
        let mut out = vec![0.0f32; BLOCK_SIZE];
        let output = generator.generate(bag, 0, &mut out, &unity);
        assert_eq!(output, GeneratorOutput::Looped);
        // 100-frame buffer wraps inside the block: sample 100 is sample 0.
        assert_eq!(out[100], out[0]);
    }

    #[test]
    fn dead_buffer_goes_silent() {
        let bag = test_bag();
        let buffer = ramp_buffer(1000);
        let mut generator = BufferGenerator::new();
        generator.set_buffer(Arc::downgrade(&buffer));
        drop(buffer);

        let unity = |_: usize| 1.0f32;
        let mut out = vec![0.0f32; BLOCK_SIZE];
        assert_eq!(
            generator.generate(bag, 0, &mut out, &unity),
            GeneratorOutput::Silent
        );
    }

    #[test]
    fn pitch_bend_halves_speed() {
        let bag = test_bag();
        bag.write(ids::PITCH_BEND, PropertyValue::Double(0.5), true)
            .unwrap();
        let buffer = ramp_buffer(BLOCK_SIZE * 2);
        let mut generator = BufferGenerator::new();
        generator.set_buffer(Arc::downgrade(&buffer));

        let unity = |_: usize| 1.0f32;
        let mut out = vec![0.0f32; BLOCK_SIZE];
        generator.generate(bag, 0, &mut out, &unity);

        // After one block at half speed the position advanced half a block.
        let position = bag.get_double(ids::PLAYBACK_POSITION);
        let expected = (BLOCK_SIZE / 2) as f64 / SR as f64;
        assert!((position - expected).abs() < 1.0 / SR as f64);

        // Midway samples are interpolated between neighbors.
        let mut a = [0.0f32];
        let mut b = [0.0f32];
        let mut reader = BufferReader::new();
        reader.read_frame(&buffer, 10, &mut a);
        reader.read_frame(&buffer, 11, &mut b);
        let expected_sample = (a[0] + b[0]) * 0.5;
        assert!((out[21] - expected_sample).abs() < 1e-5);
    }

    #[test]
    fn position_property_seeks() {
        let bag = test_bag();
        let buffer = ramp_buffer(BLOCK_SIZE * 4);
        let mut generator = BufferGenerator::new();
        generator.set_buffer(Arc::downgrade(&buffer));

        let seek_seconds = BLOCK_SIZE as f64 * 2.0 / SR as f64;
        bag.write(
            ids::PLAYBACK_POSITION,
            PropertyValue::Double(seek_seconds),
            true,
        )
        .unwrap();

        let unity = |_: usize| 1.0f32;
        let mut out = vec![0.0f32; BLOCK_SIZE];
        generator.generate(bag, 0, &mut out, &unity);

        let mut expected = [0.0f32];
        let mut reader = BufferReader::new();
        reader.read_frame(&buffer, BLOCK_SIZE * 2, &mut expected);
        assert_eq!(out[0], expected[0]);
    }
}
