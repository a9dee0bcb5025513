//! Device output.
//!
//! The engine thread renders blocks at the engine rate, resamples to the
//! device rate, and pushes interleaved stereo frames into a lock-free ring
//! the device callback drains. The callback never blocks and never sees
//! the engine; an underrun plays silence.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use log::{info, warn};
use rtrb::RingBuffer;

use resona_core::config::{BLOCK_SIZE, SR};
use resona_core::{EngineError, EngineResult};
use resona_dsp::resampler::StreamResampler;

use crate::context::ContextShared;
use crate::engine::Engine;

/// Frames of device-rate audio buffered ahead of the callback.
const RING_FRAMES: usize = 8192;

pub fn spawn_device_thread(
    engine: Engine,
    shared: Arc<ContextShared>,
) -> EngineResult<JoinHandle<()>> {
    // Resolve the device on the caller so construction errors are
    // synchronous.
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| EngineError::AudioDevice("no default output device".to_string()))?;
    let config = device
        .default_output_config()
        .map_err(|e| EngineError::AudioDevice(e.to_string()))?;
    let device_rate = config.sample_rate();
    let device_channels = config.channels() as usize;
    info!("opening output device at {device_rate} Hz, {device_channels} channels");

    thread::Builder::new()
        .name("resona-context".to_string())
        .spawn(move || {
            if let Err(e) =
                device_main(engine, shared, device, config.into(), device_rate, device_channels)
            {
                warn!("context thread exiting: {e}");
            }
        })
        .map_err(EngineError::Io)
}

fn device_main(
    mut engine: Engine,
    shared: Arc<ContextShared>,
    device: cpal::Device,
    config: cpal::StreamConfig,
    device_rate: u32,
    device_channels: usize,
) -> EngineResult<()> {
    let (mut producer, mut consumer) = RingBuffer::<f32>::new(RING_FRAMES * 2);

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                // Stereo frames out of the ring, mapped onto however many
                // channels the device wants.
                for frame in data.chunks_mut(device_channels) {
                    let left = consumer.pop().unwrap_or(0.0);
                    let right = consumer.pop().unwrap_or(0.0);
                    match frame.len() {
                        1 => frame[0] = (left + right) * 0.5,
                        _ => {
                            frame[0] = left;
                            frame[1] = right;
                            for sample in frame.iter_mut().skip(2) {
                                *sample = 0.0;
                            }
                        }
                    }
                }
            },
            |e| warn!("output stream error: {e}"),
            None,
        )
        .map_err(|e| EngineError::AudioDevice(e.to_string()))?;
    stream
        .play()
        .map_err(|e| EngineError::AudioDevice(e.to_string()))?;

    let mut resampler = if device_rate != SR {
        Some(StreamResampler::new(SR, device_rate, 2, BLOCK_SIZE)?)
    } else {
        None
    };

    let mut block = vec![0.0f32; BLOCK_SIZE * 2];
    let mut resampled = Vec::with_capacity(BLOCK_SIZE * 4);
    let mut pending: Vec<f32> = Vec::new();

    while !shared.is_shut_down() {
        // Flush whatever the ring would not take last time.
        if !pending.is_empty() {
            let taken = push_samples(&mut producer, &pending);
            pending.drain(..taken);
            if !pending.is_empty() {
                thread::sleep(Duration::from_millis(1));
                continue;
            }
        }

        // Keep roughly a block of headroom in the ring; otherwise sleep a
        // moment and let commands pile up for the next block.
        if producer.slots() < BLOCK_SIZE * 2 {
            thread::sleep(Duration::from_millis(1));
            continue;
        }

        engine.run_block(&mut block);

        match &mut resampler {
            None => {
                let taken = push_samples(&mut producer, &block);
                pending.extend_from_slice(&block[taken..]);
            }
            Some(resampler) => {
                resampled.clear();
                resampler.process_interleaved(&block, &mut resampled)?;
                let taken = push_samples(&mut producer, &resampled);
                pending.extend_from_slice(&resampled[taken..]);
            }
        }
    }

    drop(stream);
    Ok(())
}

fn push_samples(producer: &mut rtrb::Producer<f32>, samples: &[f32]) -> usize {
    let mut pushed = 0;
    for &sample in samples {
        if producer.push(sample).is_err() {
            break;
        }
        pushed += 1;
    }
    pushed
}
