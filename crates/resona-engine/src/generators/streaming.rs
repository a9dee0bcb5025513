//! Streaming generator.
//!
//! A dedicated background thread owns the decoder and fills block-sized
//! command slots; the audio thread recycles slots through a pair of
//! bounded channels. The ring is sized for roughly 100 ms of lead-in so
//! normal operation never starves, and the audio thread refuses to start
//! consuming until the lead-in has been decoded. Decoder errors stop the
//! worker; the generator then reports finished.

use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded};
use log::warn;
use std::sync::Arc;
use std::thread;

use resona_core::config::{BLOCK_SIZE, SR};
use resona_core::{EngineResult, next_multiple_of};
use resona_dsp::resampler::BlockResampler;

use crate::decoding::AudioDecoder;
use crate::objects::ObjectCommon;
use crate::properties::{PropertyBag, PropertyValue, ids};

use super::GeneratorOutput;

/// Slots in flight between the audio thread and the decode thread.
const STREAM_BLOCKS: usize = next_multiple_of(SR as usize / 10, BLOCK_SIZE) / BLOCK_SIZE;

/// One recycled decode command.
struct StreamBlock {
    /// `BLOCK_SIZE * channels` interleaved samples.
    data: Vec<f32>,
    /// Seek request carried to the worker.
    seek: Option<f64>,
    /// Decoder position after filling this block, in seconds.
    final_position: f64,
    /// The decoder wrapped its loop while filling this block.
    looped: bool,
    /// The stream produced no data at all for this block and is not
    /// looping.
    ended: bool,
}

pub struct StreamingGenerator {
    to_worker: Sender<StreamBlock>,
    from_worker: Receiver<StreamBlock>,
    channels: usize,
    duration: Option<f64>,
    leadin_done: bool,
    finished: bool,
    pending_seek: Option<f64>,
}

impl StreamingGenerator {
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Seconds left when the total duration is known.
    pub fn remaining_seconds(&self) -> Option<f64> {
        None
    }

    pub fn generate(
        &mut self,
        bag: &PropertyBag,
        out: &mut [f32],
        gain: &impl Fn(usize) -> f32,
    ) -> GeneratorOutput {
        if let Some(PropertyValue::Double(seconds)) = bag.acquire(ids::PLAYBACK_POSITION) {
            self.pending_seek = Some(seconds);
        }

        if !self.leadin_done {
            if self.from_worker.len() < STREAM_BLOCKS {
                return GeneratorOutput::Silent;
            }
            self.leadin_done = true;
        }

        let mut block = match self.from_worker.try_recv() {
            Ok(block) => block,
            Err(TryRecvError::Empty) => return GeneratorOutput::Silent,
            Err(TryRecvError::Disconnected) => {
                if self.finished {
                    return GeneratorOutput::Silent;
                }
                self.finished = true;
                return GeneratorOutput::Finished;
            }
        };

        let channels = self.channels;
        for i in 0..BLOCK_SIZE {
            let g = gain(i);
            for ch in 0..channels {
                out[i * channels + ch] += g * block.data[i * channels + ch];
            }
        }

        let looped = block.looped;
        let ended = block.ended;
        let _ = bag.write(
            ids::PLAYBACK_POSITION,
            PropertyValue::Double(block.final_position),
            false,
        );

        // Recycle the slot, carrying any seek request.
        block.seek = self.pending_seek.take();
        block.looped = false;
        block.ended = false;
        if self.to_worker.send(block).is_err() && !self.finished {
            self.finished = true;
            return GeneratorOutput::Finished;
        }

        if looped {
            self.finished = false;
            GeneratorOutput::Looped
        } else if ended {
            if self.finished {
                GeneratorOutput::Silent
            } else {
                self.finished = true;
                GeneratorOutput::Finished
            }
        } else {
            self.finished = false;
            GeneratorOutput::Produced
        }
    }

    pub fn duration_seconds(&self) -> Option<f64> {
        self.duration
    }
}

/// Create the generator and start its decode thread.
///
/// The worker reads the looping property straight from the shared bag, so
/// looping toggles take effect on the next decoded block.
pub fn spawn_streaming(
    decoder: Box<dyn AudioDecoder>,
    common: Arc<ObjectCommon>,
) -> EngineResult<StreamingGenerator> {
    let channels = decoder.channels();
    let source_rate = decoder.sample_rate();
    let duration = decoder.duration_seconds();

    let resampler = if source_rate != SR {
        Some(BlockResampler::new(source_rate, SR, channels, BLOCK_SIZE)?)
    } else {
        None
    };

    let (to_worker, work_rx) = bounded::<StreamBlock>(STREAM_BLOCKS + 1);
    let (done_tx, from_worker) = bounded::<StreamBlock>(STREAM_BLOCKS + 1);

    for _ in 0..STREAM_BLOCKS {
        let _ = to_worker.send(StreamBlock {
            data: vec![0.0; BLOCK_SIZE * channels],
            seek: None,
            final_position: 0.0,
            looped: false,
            ended: false,
        });
    }

    thread::Builder::new()
        .name("resona-stream-decode".to_string())
        .spawn(move || {
            let mut worker = StreamWorker {
                decoder,
                resampler,
                common,
                channels,
                position: 0.0,
                scratch: Vec::new(),
            };
            for mut block in work_rx.iter() {
                if let Err(e) = worker.fill(&mut block) {
                    warn!("streaming decode thread stopping: {e}");
                    break;
                }
                if done_tx.send(block).is_err() {
                    break;
                }
            }
        })
        .map_err(resona_core::EngineError::Io)?;

    Ok(StreamingGenerator {
        to_worker,
        from_worker,
        channels,
        duration,
        leadin_done: false,
        finished: false,
        pending_seek: None,
    })
}

struct StreamWorker {
    decoder: Box<dyn AudioDecoder>,
    resampler: Option<BlockResampler>,
    common: Arc<ObjectCommon>,
    channels: usize,
    position: f64,
    scratch: Vec<f32>,
}

impl StreamWorker {
    fn fill(&mut self, block: &mut StreamBlock) -> EngineResult<()> {
        let looping = self.common.bag().get_int(ids::LOOPING) != 0;

        if let Some(seek) = block.seek.take() {
            if self.decoder.supports_seek() {
                self.decoder.seek_seconds(seek)?;
                self.position = seek;
            }
        }

        block.looped = false;
        block.ended = false;
        match &mut self.resampler {
            None => {
                block.data.fill(0.0);
                self.position = fill_from_decoder(
                    &mut *self.decoder,
                    BLOCK_SIZE,
                    self.channels,
                    &mut block.data,
                    looping,
                    self.position,
                    &mut block.looped,
                    &mut block.ended,
                )?;
            }
            Some(resampler) => {
                let needed = resampler.needed_input_frames();
                self.scratch.clear();
                self.scratch.resize(needed * self.channels, 0.0);
                self.position = fill_from_decoder(
                    &mut *self.decoder,
                    needed,
                    self.channels,
                    &mut self.scratch,
                    looping,
                    self.position,
                    &mut block.looped,
                    &mut block.ended,
                )?;
                resampler.process_interleaved(&self.scratch, &mut block.data)?;
            }
        }

        block.final_position = self.position;
        Ok(())
    }
}

/// Pull exactly `frames` frames from the decoder, seeking back to the
/// start on end-of-stream when looping. Returns the new position in
/// seconds; the remainder is zero-filled when the stream runs dry.
fn fill_from_decoder(
    decoder: &mut dyn AudioDecoder,
    frames: usize,
    channels: usize,
    dest: &mut [f32],
    looping: bool,
    mut position: f64,
    looped: &mut bool,
    ended: &mut bool,
) -> EngineResult<f64> {
    let rate = decoder.sample_rate() as f64;
    let mut needed = frames;
    let mut cursor = 0;
    // Guards against a zero-length stream looping forever: only one seek
    // per dry read.
    let mut just_looped = false;
    let mut got_any = false;

    while needed > 0 {
        let got =
            decoder.write_frames_interleaved(needed, &mut dest[cursor * channels..])?;
        cursor += got;
        needed -= got;
        position += got as f64 / rate;
        if got > 0 {
            just_looped = false;
            got_any = true;
        }
        if needed > 0 {
            if looping && !just_looped && decoder.supports_seek() {
                decoder.seek_seconds(0.0)?;
                position = 0.0;
                just_looped = true;
                *looped = true;
            } else {
                break;
            }
        }
    }

    dest[cursor * channels..frames * channels].fill(0.0);
    *ended = !looping && !got_any;
    Ok(position)
}
