//! Commands from client threads to the context thread.
//!
//! All mutation of DSP state travels through a bounded channel of message
//! variants; the context thread drains it at the top of every block.
//! Ordering is FIFO per producer. The queue is sized so that it
//! effectively never fills; a full queue parks the producer briefly
//! rather than dropping the command.

use std::sync::{Arc, Weak};

use crossbeam_channel::{Receiver, Sender, bounded};
use resona_dsp::BiquadDef;
use resona_dsp::SineWaveConfig;

use crate::automation::BatchItem;
use crate::buffer::BufferData;
use crate::effects::EchoTapConfig;
use crate::generators::StreamingGenerator;
use crate::objects::{Handle, ObjectCommon};
use crate::properties::PropertyValue;

/// Commands the queue is sized for; overflow blocks the producer.
pub const COMMAND_QUEUE_DEPTH: usize = 1024;

pub fn command_queue() -> (Sender<Command>, Receiver<Command>) {
    bounded(COMMAND_QUEUE_DEPTH)
}

/// Audio-thread construction recipe for a freshly registered object.
pub enum NewObject {
    BufferGenerator,
    /// The decode thread is already running; the audio thread just adopts
    /// the channel ends.
    StreamingGenerator(Box<StreamingGenerator>),
    SineBankGenerator {
        frequency: f64,
        waves: Vec<SineWaveConfig>,
    },
    NoiseGenerator {
        channels: usize,
    },
    DirectSource,
    AngularPannedSource,
    ScalarPannedSource,
    Source3D,
    GlobalEcho,
    GlobalFdnReverb,
}

pub enum Command {
    /// Apply an already-validated property write.
    SetProperty {
        target: Handle,
        property: u32,
        value: PropertyValue,
    },
    /// Install a buffer on a buffer generator; resolved to a weak data
    /// reference at the ABI boundary so the audio thread never touches the
    /// handle table.
    SetBuffer {
        target: Handle,
        buffer: Weak<BufferData>,
    },
    Play {
        target: Handle,
    },
    Pause {
        target: Handle,
    },
    AddGenerator {
        source: Handle,
        generator: Handle,
    },
    RemoveGenerator {
        source: Handle,
        generator: Handle,
    },
    /// Install a new object into the audio graph.
    RegisterObject {
        common: Arc<ObjectCommon>,
        init: NewObject,
    },
    /// The object's last external reference dropped; linger or die.
    FinalizeHandle {
        target: Handle,
    },
    ConfigureRoute {
        writer: Handle,
        reader: Handle,
        gain: f32,
        fade_in: u32,
        filter: BiquadDef,
    },
    RemoveRoute {
        writer: Handle,
        reader: Handle,
        fade_out: u32,
    },
    RemoveAllRoutes {
        writer: Handle,
        fade_out: u32,
    },
    /// Apply a whole automation batch at one instant of audio time.
    ExecuteBatch {
        items: Vec<BatchItem>,
    },
    SetEchoTaps {
        target: Handle,
        taps: Vec<EchoTapConfig>,
    },
    ResetEffect {
        target: Handle,
    },
}
