//! Audio decoding behind the [`AudioDecoder`] trait.
//!
//! The engine consumes decoders as iterators of interleaved f32 frames at
//! the decoder's native rate; rate conversion happens downstream. The
//! production implementation wraps symphonia over a [`ByteStream`]; a raw
//! float decoder covers in-memory data and tests.

use log::warn;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

use resona_core::{EngineError, EngineResult};

use crate::bytestream::{ByteStream, ByteStreamIo};

/// A source of interleaved f32 frames at some native sample rate.
pub trait AudioDecoder: Send {
    fn channels(&self) -> usize;
    fn sample_rate(&self) -> u32;

    /// Write up to `frames` frames; returns frames written, 0 at end of
    /// stream.
    fn write_frames_interleaved(&mut self, frames: usize, out: &mut [f32]) -> EngineResult<usize>;

    fn supports_seek(&self) -> bool;
    fn seek_seconds(&mut self, position: f64) -> EngineResult<()>;

    /// Total length in seconds, when the container knows it.
    fn duration_seconds(&self) -> Option<f64> {
        None
    }
}

impl MediaSource for ByteStreamIo {
    fn is_seekable(&self) -> bool {
        self.supports_seek()
    }

    fn byte_len(&self) -> Option<u64> {
        self.stream_len()
    }
}

/// Symphonia-backed decoder over a byte stream.
pub struct SymphoniaDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    channels: usize,
    sample_rate: u32,
    seekable: bool,
    duration: Option<f64>,

    /// Interleaved samples decoded but not yet handed out.
    pending: Vec<f32>,
    pending_offset: usize,
    finished: bool,
}

impl SymphoniaDecoder {
    /// Probe and open the stream. `hint_extension` helps the probe when
    /// the source has a known file extension.
    pub fn open(stream: Box<dyn ByteStream>, hint_extension: Option<&str>) -> EngineResult<Self> {
        let seekable = stream.supports_seek();
        let source = ByteStreamIo::new(stream);
        let mss = MediaSourceStream::new(Box::new(source), Default::default());

        let mut hint = Hint::new();
        if let Some(extension) = hint_extension {
            hint.with_extension(extension);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| EngineError::UnsupportedFormat(e.to_string()))?;
        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| {
                EngineError::UnsupportedFormat("no decodable track in stream".to_string())
            })?;
        let track_id = track.id;
        let params = &track.codec_params;

        let channels = params
            .channels
            .map(|c| c.count())
            .ok_or_else(|| EngineError::UnsupportedFormat("unknown channel count".to_string()))?;
        let sample_rate = params
            .sample_rate
            .ok_or_else(|| EngineError::UnsupportedFormat("unknown sample rate".to_string()))?;
        let duration = match (params.n_frames, params.time_base) {
            (Some(frames), Some(time_base)) => {
                let time = time_base.calc_time(frames);
                Some(time.seconds as f64 + time.frac)
            }
            _ => None,
        };

        let decoder = symphonia::default::get_codecs()
            .make(params, &DecoderOptions::default())
            .map_err(|e| EngineError::UnsupportedFormat(e.to_string()))?;

        Ok(Self {
            format,
            decoder,
            track_id,
            channels,
            sample_rate,
            seekable,
            duration,
            pending: Vec::new(),
            pending_offset: 0,
            finished: false,
        })
    }

    /// Decode packets until at least one sample lands in `pending`, or the
    /// stream ends.
    fn refill(&mut self) -> EngineResult<()> {
        self.pending.clear();
        self.pending_offset = 0;

        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    self.finished = true;
                    return Ok(());
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.finished = true;
                    return Ok(());
                }
                Err(e) => {
                    return Err(EngineError::UnsupportedFormat(e.to_string()));
                }
            };
            if packet.track_id() != self.track_id {
                continue;
            }
            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    if decoded.frames() == 0 {
                        continue;
                    }
                    let mut sample_buf =
                        SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
                    sample_buf.copy_interleaved_ref(decoded);
                    self.pending.extend_from_slice(sample_buf.samples());
                    return Ok(());
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    // Recoverable corruption: skip the packet.
                    warn!("skipping undecodable packet: {e}");
                    continue;
                }
                Err(e) => {
                    return Err(EngineError::UnsupportedFormat(e.to_string()));
                }
            }
        }
    }
}

impl AudioDecoder for SymphoniaDecoder {
    fn channels(&self) -> usize {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn write_frames_interleaved(&mut self, frames: usize, out: &mut [f32]) -> EngineResult<usize> {
        let mut written = 0;
        while written < frames {
            if self.pending_offset >= self.pending.len() {
                if self.finished {
                    break;
                }
                self.refill()?;
                if self.pending.is_empty() {
                    break;
                }
            }
            let want = (frames - written) * self.channels;
            let available = self.pending.len() - self.pending_offset;
            let take = want.min(available);
            // Partial frames never happen: packets hold whole frames.
            out[written * self.channels..written * self.channels + take]
                .copy_from_slice(&self.pending[self.pending_offset..self.pending_offset + take]);
            self.pending_offset += take;
            written += take / self.channels;
        }
        Ok(written)
    }

    fn supports_seek(&self) -> bool {
        self.seekable
    }

    fn seek_seconds(&mut self, position: f64) -> EngineResult<()> {
        if !self.seekable {
            return Err(EngineError::ByteStreamUnsupportedOperation("seek"));
        }
        self.format
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time: Time::from(position.max(0.0)),
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| EngineError::UnsupportedFormat(e.to_string()))?;
        self.decoder.reset();
        self.pending.clear();
        self.pending_offset = 0;
        self.finished = false;
        Ok(())
    }

    fn duration_seconds(&self) -> Option<f64> {
        self.duration
    }
}

/// Decoder over raw interleaved f32 samples held in memory.
pub struct RawFloatDecoder {
    channels: usize,
    sample_rate: u32,
    samples: Vec<f32>,
    /// Position in frames.
    position: usize,
}

impl RawFloatDecoder {
    pub fn new(sample_rate: u32, channels: usize, samples: Vec<f32>) -> Self {
        Self {
            channels,
            sample_rate,
            samples,
            position: 0,
        }
    }

    fn total_frames(&self) -> usize {
        self.samples.len() / self.channels
    }
}

impl AudioDecoder for RawFloatDecoder {
    fn channels(&self) -> usize {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn write_frames_interleaved(&mut self, frames: usize, out: &mut [f32]) -> EngineResult<usize> {
        let remaining = self.total_frames() - self.position;
        let got = frames.min(remaining);
        let start = self.position * self.channels;
        out[..got * self.channels]
            .copy_from_slice(&self.samples[start..start + got * self.channels]);
        self.position += got;
        Ok(got)
    }

    fn supports_seek(&self) -> bool {
        true
    }

    fn seek_seconds(&mut self, position: f64) -> EngineResult<()> {
        let frame = (position.max(0.0) * self.sample_rate as f64).round() as usize;
        self.position = frame.min(self.total_frames());
        Ok(())
    }

    fn duration_seconds(&self) -> Option<f64> {
        Some(self.total_frames() as f64 / self.sample_rate as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_decoder_reads_and_seeks() {
        let samples: Vec<f32> = (0..100).map(|i| i as f32).collect();
        let mut decoder = RawFloatDecoder::new(50, 2, samples);
        assert_eq!(decoder.channels(), 2);
        assert_eq!(decoder.duration_seconds(), Some(1.0));

        let mut out = [0.0f32; 20];
        assert_eq!(decoder.write_frames_interleaved(10, &mut out).unwrap(), 10);
        assert_eq!(out[0], 0.0);
        assert_eq!(out[19], 19.0);

        decoder.seek_seconds(0.5).unwrap();
        assert_eq!(decoder.write_frames_interleaved(10, &mut out).unwrap(), 10);
        assert_eq!(out[0], 50.0);

        // Draining past the end returns short counts, then zero.
        decoder.seek_seconds(0.9).unwrap();
        assert_eq!(decoder.write_frames_interleaved(10, &mut out).unwrap(), 5);
        assert_eq!(decoder.write_frames_interleaved(10, &mut out).unwrap(), 0);
    }
}
