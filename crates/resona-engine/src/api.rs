//! The embedding surface: everything the C ABI wraps, callable from Rust.
//!
//! These functions run on client threads. They validate inputs
//! synchronously against the handle table and property schemas, then hand
//! the actual mutation to the owning context's command queue. A failing
//! call leaves all engine state unchanged.

use std::sync::Arc;

use resona_core::{EngineError, EngineResult};
use resona_dsp::{BiquadDef, SineWaveConfig, sine_bank};

use crate::automation::{AutomationPoint, BatchItem};
use crate::buffer::BufferData;
use crate::bytestream::{ByteStream, MemoryByteStream};
use crate::commands::{Command, NewObject};
use crate::context::Context;
use crate::decoding::{AudioDecoder, RawFloatDecoder, SymphoniaDecoder};
use crate::events::Event;
use crate::generators::spawn_streaming;
use crate::library::{
    AutomationBatchObject, BufferObject, Library, ObjectRef, StreamHandleObject,
};
use crate::objects::{Handle, ObjectCommon, ObjectType};
use crate::properties::{PropertyValue, ids};

// ---- Contexts ----

pub fn create_context(library: &Library) -> EngineResult<Handle> {
    let handle = library.allocate_handle();
    let context = Context::new_with_device(handle)?;
    library.register(handle, ObjectRef::Context(context));
    Ok(handle)
}

pub fn create_context_headless(library: &Library) -> EngineResult<Handle> {
    let handle = library.allocate_handle();
    let context = Context::new_headless(handle);
    library.register(handle, ObjectRef::Context(context));
    Ok(handle)
}

fn get_context(library: &Library, handle: Handle) -> EngineResult<Arc<Context>> {
    match library.get(handle)? {
        ObjectRef::Context(context) => Ok(context),
        other => Err(EngineError::HandleType(format!(
            "expected a context, got {:?}",
            other.object_type()
        ))),
    }
}

/// Headless contexts hand blocks straight to the caller.
pub fn context_get_block(library: &Library, context: Handle, output: &mut [f32]) -> EngineResult<()> {
    get_context(library, context)?.get_block(output)
}

pub fn context_enable_events(library: &Library, context: Handle) -> EngineResult<()> {
    get_context(library, context)?
        .shared()
        .events()
        .set_enabled(true);
    Ok(())
}

/// Dequeue the next event whose referenced handles are all still alive.
pub fn context_get_next_event(library: &Library, context: Handle) -> EngineResult<Option<Event>> {
    let context = get_context(library, context)?;
    Ok(context
        .shared()
        .events()
        .next_event(|handle| library.is_alive(handle)))
}

// ---- Object creation ----

fn create_attached(
    library: &Library,
    context: Handle,
    object_type: ObjectType,
    init: impl FnOnce(&Arc<ObjectCommon>) -> EngineResult<NewObject>,
) -> EngineResult<Handle> {
    let context = get_context(library, context)?;
    let handle = library.allocate_handle();
    let common = Arc::new(ObjectCommon::new(handle, object_type));
    let init = init(&common)?;
    library.register(handle, ObjectRef::Attached(common.clone(), context.clone()));
    if let Err(e) = context.enqueue(Command::RegisterObject { common, init }) {
        let _ = library.dec_ref(handle);
        return Err(e);
    }
    Ok(handle)
}

pub fn create_buffer_generator(library: &Library, context: Handle) -> EngineResult<Handle> {
    create_attached(library, context, ObjectType::BufferGenerator, |_| {
        Ok(NewObject::BufferGenerator)
    })
}

pub fn create_sine_bank_generator(
    library: &Library,
    context: Handle,
    frequency: f64,
    waves: Vec<SineWaveConfig>,
) -> EngineResult<Handle> {
    if waves.is_empty() {
        return Err(EngineError::Validation(
            "a sine bank needs at least one wave".to_string(),
        ));
    }
    let handle = create_attached(library, context, ObjectType::SineBankGenerator, |common| {
        common
            .bag()
            .write(ids::FREQUENCY, PropertyValue::Double(frequency), true)?;
        Ok(NewObject::SineBankGenerator { frequency, waves })
    })?;
    Ok(handle)
}

/// Convenience: a single pure sine.
pub fn create_sine_wave_generator(
    library: &Library,
    context: Handle,
    frequency: f64,
) -> EngineResult<Handle> {
    create_sine_bank_generator(
        library,
        context,
        frequency,
        vec![SineWaveConfig::new(1.0, 0.0, 1.0)],
    )
}

/// Square approximation with sigma-smoothed partials.
pub fn create_square_bank_generator(
    library: &Library,
    context: Handle,
    frequency: f64,
    partials: usize,
) -> EngineResult<Handle> {
    create_sine_bank_generator(library, context, frequency, sine_bank::square_series(partials))
}

pub fn create_noise_generator(
    library: &Library,
    context: Handle,
    channels: usize,
) -> EngineResult<Handle> {
    if channels == 0 || channels > resona_core::config::MAX_CHANNELS {
        return Err(EngineError::Validation(format!(
            "noise generator channel count {channels} out of range"
        )));
    }
    create_attached(library, context, ObjectType::NoiseGenerator, |_| {
        Ok(NewObject::NoiseGenerator { channels })
    })
}

/// Streaming generator over an arbitrary decoder. The decode thread
/// starts immediately and begins pre-rolling.
pub fn create_streaming_generator_from_decoder(
    library: &Library,
    context: Handle,
    decoder: Box<dyn AudioDecoder>,
) -> EngineResult<Handle> {
    create_attached(
        library,
        context,
        ObjectType::StreamingGenerator,
        |common| {
            let generator = spawn_streaming(decoder, common.clone())?;
            Ok(NewObject::StreamingGenerator(Box::new(generator)))
        },
    )
}

pub fn create_streaming_generator_from_stream_params(
    library: &Library,
    context: Handle,
    protocol: &str,
    path: &str,
    param: u64,
) -> EngineResult<Handle> {
    let stream = library.protocols.open(protocol, path, param)?;
    let decoder = SymphoniaDecoder::open(stream, extension_of(path))?;
    create_streaming_generator_from_decoder(library, context, Box::new(decoder))
}

pub fn create_streaming_generator_from_file(
    library: &Library,
    context: Handle,
    path: &str,
) -> EngineResult<Handle> {
    create_streaming_generator_from_stream_params(library, context, "file", path, 0)
}

pub fn create_streaming_generator_from_stream_handle(
    library: &Library,
    context: Handle,
    stream: Handle,
) -> EngineResult<Handle> {
    let stream = take_stream(library, stream)?;
    let decoder = SymphoniaDecoder::open(stream, None)?;
    create_streaming_generator_from_decoder(library, context, Box::new(decoder))
}

pub fn create_direct_source(library: &Library, context: Handle) -> EngineResult<Handle> {
    create_attached(library, context, ObjectType::DirectSource, |_| {
        Ok(NewObject::DirectSource)
    })
}

pub fn create_angular_panned_source(library: &Library, context: Handle) -> EngineResult<Handle> {
    create_attached(library, context, ObjectType::AngularPannedSource, |_| {
        Ok(NewObject::AngularPannedSource)
    })
}

pub fn create_scalar_panned_source(library: &Library, context: Handle) -> EngineResult<Handle> {
    create_attached(library, context, ObjectType::ScalarPannedSource, |_| {
        Ok(NewObject::ScalarPannedSource)
    })
}

pub fn create_source_3d(library: &Library, context: Handle) -> EngineResult<Handle> {
    create_attached(library, context, ObjectType::Source3D, |_| {
        Ok(NewObject::Source3D)
    })
}

pub fn create_global_echo(library: &Library, context: Handle) -> EngineResult<Handle> {
    create_attached(library, context, ObjectType::GlobalEcho, |_| {
        Ok(NewObject::GlobalEcho)
    })
}

pub fn create_global_fdn_reverb(library: &Library, context: Handle) -> EngineResult<Handle> {
    create_attached(library, context, ObjectType::GlobalFdnReverb, |_| {
        Ok(NewObject::GlobalFdnReverb)
    })
}

// ---- Buffers and streams ----

fn register_buffer(library: &Library, data: Arc<BufferData>) -> Handle {
    let handle = library.allocate_handle();
    library.register(
        handle,
        ObjectRef::Buffer(Arc::new(BufferObject {
            common: ObjectCommon::new(handle, ObjectType::Buffer),
            data,
        })),
    );
    handle
}

pub fn create_buffer_from_float_array(
    library: &Library,
    sample_rate: u32,
    channels: usize,
    samples: &[f32],
) -> EngineResult<Handle> {
    let data = if sample_rate == resona_core::config::SR {
        BufferData::from_interleaved(channels, samples)?
    } else {
        BufferData::from_decoder(Box::new(RawFloatDecoder::new(
            sample_rate,
            channels,
            samples.to_vec(),
        )))?
    };
    Ok(register_buffer(library, data))
}

pub fn create_buffer_from_encoded_data(library: &Library, bytes: &[u8]) -> EngineResult<Handle> {
    let stream = MemoryByteStream::new(bytes.to_vec().into());
    let decoder = SymphoniaDecoder::open(Box::new(stream), None)?;
    let data = BufferData::from_decoder(Box::new(decoder))?;
    Ok(register_buffer(library, data))
}

pub fn create_buffer_from_stream_params(
    library: &Library,
    protocol: &str,
    path: &str,
    param: u64,
) -> EngineResult<Handle> {
    let stream = library.protocols.open(protocol, path, param)?;
    let decoder = SymphoniaDecoder::open(stream, extension_of(path))?;
    let data = BufferData::from_decoder(Box::new(decoder))?;
    Ok(register_buffer(library, data))
}

pub fn create_buffer_from_file(library: &Library, path: &str) -> EngineResult<Handle> {
    create_buffer_from_stream_params(library, "file", path, 0)
}

pub fn create_buffer_from_stream_handle(library: &Library, stream: Handle) -> EngineResult<Handle> {
    let stream = take_stream(library, stream)?;
    let decoder = SymphoniaDecoder::open(stream, None)?;
    let data = BufferData::from_decoder(Box::new(decoder))?;
    Ok(register_buffer(library, data))
}

fn get_buffer(library: &Library, handle: Handle) -> EngineResult<Arc<BufferObject>> {
    match library.get(handle)? {
        ObjectRef::Buffer(buffer) => Ok(buffer),
        other => Err(EngineError::HandleType(format!(
            "expected a buffer, got {:?}",
            other.object_type()
        ))),
    }
}

pub fn buffer_get_channels(library: &Library, handle: Handle) -> EngineResult<usize> {
    Ok(get_buffer(library, handle)?.data.channels())
}

pub fn buffer_get_length_in_samples(library: &Library, handle: Handle) -> EngineResult<usize> {
    Ok(get_buffer(library, handle)?.data.frames())
}

pub fn buffer_get_length_in_seconds(library: &Library, handle: Handle) -> EngineResult<f64> {
    Ok(get_buffer(library, handle)?.data.duration_seconds())
}

/// Wrap an already-open byte stream in a handle.
pub fn create_stream_handle(library: &Library, stream: Box<dyn ByteStream>) -> Handle {
    let handle = library.allocate_handle();
    library.register(
        handle,
        ObjectRef::Stream(Arc::new(StreamHandleObject {
            common: ObjectCommon::new(handle, ObjectType::StreamHandle),
            stream: parking_lot::Mutex::new(Some(stream)),
        })),
    );
    handle
}

pub fn create_stream_handle_from_memory(library: &Library, bytes: &[u8]) -> Handle {
    create_stream_handle(
        library,
        Box::new(MemoryByteStream::new(bytes.to_vec().into())),
    )
}

pub fn create_stream_handle_from_file(library: &Library, path: &str) -> EngineResult<Handle> {
    let stream = library.protocols.open("file", path, 0)?;
    Ok(create_stream_handle(library, stream))
}

pub fn create_stream_handle_from_stream_params(
    library: &Library,
    protocol: &str,
    path: &str,
    param: u64,
) -> EngineResult<Handle> {
    let stream = library.protocols.open(protocol, path, param)?;
    Ok(create_stream_handle(library, stream))
}

fn take_stream(library: &Library, handle: Handle) -> EngineResult<Box<dyn ByteStream>> {
    match library.get(handle)? {
        ObjectRef::Stream(stream) => stream.stream.lock().take().ok_or_else(|| {
            EngineError::Validation("stream handle was already consumed".to_string())
        }),
        other => Err(EngineError::HandleType(format!(
            "expected a stream handle, got {:?}",
            other.object_type()
        ))),
    }
}

// ---- Properties ----

fn attached_target(library: &Library, handle: Handle) -> EngineResult<(Arc<ObjectCommon>, Arc<Context>)> {
    match library.get(handle)? {
        ObjectRef::Attached(common, context) => Ok((common, context)),
        ObjectRef::Context(context) => {
            Ok((context.shared().common().clone(), context))
        }
        other => Err(EngineError::HandleType(format!(
            "{:?} has no properties",
            other.object_type()
        ))),
    }
}

/// Validate and enqueue a property write. Fails synchronously on range or
/// type errors, leaving state untouched.
pub fn set_property(
    library: &Library,
    target: Handle,
    property: u32,
    value: PropertyValue,
) -> EngineResult<()> {
    let (common, context) = attached_target(library, target)?;

    if property == ids::CURRENT_TIME || property == ids::SUGGESTED_AUTOMATION_TIME {
        return Err(EngineError::NotSupported(
            "time properties are read-only".to_string(),
        ));
    }

    // The buffer property must resolve through the handle table on this
    // thread; the audio thread only ever sees the weak data reference.
    if property == ids::BUFFER {
        let PropertyValue::ObjectHandle(buffer_handle) = value else {
            return Err(EngineError::PropertyType(
                "buffer property takes an object handle".to_string(),
            ));
        };
        common.validate_property(property, &value)?;
        let weak = if buffer_handle == 0 {
            std::sync::Weak::new()
        } else {
            Arc::downgrade(&get_buffer(library, buffer_handle)?.data)
        };
        context.enqueue(Command::SetProperty {
            target,
            property,
            value,
        })?;
        return context.enqueue(Command::SetBuffer {
            target,
            buffer: weak,
        });
    }

    common.validate_property(property, &value)?;
    context.enqueue(Command::SetProperty {
        target,
        property,
        value,
    })
}

/// Read a property's last-applied value from any thread.
pub fn get_property(library: &Library, target: Handle, property: u32) -> EngineResult<PropertyValue> {
    let (common, context) = attached_target(library, target)?;
    match property {
        ids::CURRENT_TIME => Ok(PropertyValue::Double(context.shared().current_time())),
        ids::SUGGESTED_AUTOMATION_TIME => Ok(PropertyValue::Double(
            context.shared().suggested_automation_time(),
        )),
        _ => common.bag().read(property),
    }
}

// ---- Transport ----

pub fn play(library: &Library, target: Handle) -> EngineResult<()> {
    let (_, context) = attached_target(library, target)?;
    context.enqueue(Command::Play { target })
}

pub fn pause(library: &Library, target: Handle) -> EngineResult<()> {
    let (_, context) = attached_target(library, target)?;
    context.enqueue(Command::Pause { target })
}

// ---- Sources ----

pub fn source_add_generator(
    library: &Library,
    source: Handle,
    generator: Handle,
) -> EngineResult<()> {
    let (source_common, context) = attached_target(library, source)?;
    if !source_common.object_type().is_source() {
        return Err(EngineError::HandleType(
            "add_generator target is not a source".to_string(),
        ));
    }
    let (generator_common, _) = attached_target(library, generator)?;
    if !generator_common.object_type().is_generator() {
        return Err(EngineError::HandleType(
            "add_generator argument is not a generator".to_string(),
        ));
    }
    context.enqueue(Command::AddGenerator { source, generator })
}

pub fn source_remove_generator(
    library: &Library,
    source: Handle,
    generator: Handle,
) -> EngineResult<()> {
    let (_, context) = attached_target(library, source)?;
    context.enqueue(Command::RemoveGenerator { source, generator })
}

// ---- Routing ----

/// The configurable half of a route.
#[derive(Debug, Clone, Copy)]
pub struct RouteConfig {
    pub gain: f64,
    pub fade_time_blocks: u32,
    pub filter: BiquadDef,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            gain: 1.0,
            fade_time_blocks: 1,
            filter: BiquadDef::identity(),
        }
    }
}

fn routing_endpoints(
    library: &Library,
    source: Handle,
    effect: Handle,
) -> EngineResult<Arc<Context>> {
    let (source_common, context) = attached_target(library, source)?;
    if !source_common.object_type().is_source() {
        return Err(EngineError::HandleType(
            "route writer is not a source".to_string(),
        ));
    }
    let (effect_common, _) = attached_target(library, effect)?;
    if !effect_common.object_type().is_effect() {
        return Err(EngineError::HandleType(
            "route reader is not a global effect".to_string(),
        ));
    }
    Ok(context)
}

pub fn routing_config_route(
    library: &Library,
    _context: Handle,
    source: Handle,
    effect: Handle,
    config: RouteConfig,
) -> EngineResult<()> {
    let context = routing_endpoints(library, source, effect)?;
    context.enqueue(Command::ConfigureRoute {
        writer: source,
        reader: effect,
        gain: config.gain as f32,
        fade_in: config.fade_time_blocks,
        filter: config.filter,
    })
}

pub fn routing_remove_route(
    library: &Library,
    _context: Handle,
    source: Handle,
    effect: Handle,
    fade_out_blocks: u32,
) -> EngineResult<()> {
    let context = routing_endpoints(library, source, effect)?;
    context.enqueue(Command::RemoveRoute {
        writer: source,
        reader: effect,
        fade_out: fade_out_blocks,
    })
}

pub fn routing_remove_all_routes(
    library: &Library,
    source: Handle,
    fade_out_blocks: u32,
) -> EngineResult<()> {
    let (_, context) = attached_target(library, source)?;
    context.enqueue(Command::RemoveAllRoutes {
        writer: source,
        fade_out: fade_out_blocks,
    })
}

// ---- Effects ----

pub fn global_echo_set_taps(
    library: &Library,
    effect: Handle,
    taps: Vec<crate::effects::EchoTapConfig>,
) -> EngineResult<()> {
    let (common, context) = attached_target(library, effect)?;
    if common.object_type() != ObjectType::GlobalEcho {
        return Err(EngineError::HandleType(
            "set_taps target is not an echo".to_string(),
        ));
    }
    context.enqueue(Command::SetEchoTaps {
        target: effect,
        taps,
    })
}

pub fn effect_reset(library: &Library, effect: Handle) -> EngineResult<()> {
    let (common, context) = attached_target(library, effect)?;
    if !common.object_type().is_effect() {
        return Err(EngineError::HandleType(
            "reset target is not an effect".to_string(),
        ));
    }
    context.enqueue(Command::ResetEffect { target: effect })
}

// ---- Automation batches ----

pub fn create_automation_batch(library: &Library, context: Handle) -> EngineResult<Handle> {
    let context = get_context(library, context)?;
    let handle = library.allocate_handle();
    library.register(
        handle,
        ObjectRef::Batch(Arc::new(AutomationBatchObject {
            common: ObjectCommon::new(handle, ObjectType::AutomationBatch),
            context,
            items: parking_lot::Mutex::new(Vec::new()),
        })),
    );
    Ok(handle)
}

fn get_batch(library: &Library, handle: Handle) -> EngineResult<Arc<AutomationBatchObject>> {
    match library.get(handle)? {
        ObjectRef::Batch(batch) => Ok(batch),
        other => Err(EngineError::HandleType(format!(
            "expected an automation batch, got {:?}",
            other.object_type()
        ))),
    }
}

/// Append a point to a property's timeline through a batch.
pub fn batch_append_property(
    library: &Library,
    batch: Handle,
    target: Handle,
    property: u32,
    point: AutomationPoint,
) -> EngineResult<()> {
    let batch = get_batch(library, batch)?;
    let (common, _) = attached_target(library, target)?;
    // The property must exist and be automatable on this object.
    common.bag().def(property)?;
    batch.items.lock().push(BatchItem::AppendPoint {
        target,
        property,
        point,
    });
    Ok(())
}

pub fn batch_clear_property(
    library: &Library,
    batch: Handle,
    target: Handle,
    property: u32,
) -> EngineResult<()> {
    let batch = get_batch(library, batch)?;
    batch
        .items
        .lock()
        .push(BatchItem::ClearProperty { target, property });
    Ok(())
}

pub fn batch_clear_all_properties(
    library: &Library,
    batch: Handle,
    target: Handle,
) -> EngineResult<()> {
    let batch = get_batch(library, batch)?;
    batch
        .items
        .lock()
        .push(BatchItem::ClearAllProperties { target });
    Ok(())
}

pub fn batch_send_user_event(
    library: &Library,
    batch: Handle,
    target: Handle,
    time: f64,
    param: u64,
) -> EngineResult<()> {
    let batch = get_batch(library, batch)?;
    batch
        .items
        .lock()
        .push(BatchItem::SendUserEvent {
            target,
            time,
            param,
        });
    Ok(())
}

/// Execute the batch atomically at the start of a block.
pub fn batch_execute(library: &Library, batch: Handle) -> EngineResult<()> {
    let batch = get_batch(library, batch)?;
    let items = std::mem::take(&mut *batch.items.lock());
    batch.context.enqueue(Command::ExecuteBatch { items })
}

// ---- Delete behavior ----

pub fn config_delete_behavior(
    library: &Library,
    target: Handle,
    linger: bool,
    timeout: f64,
) -> EngineResult<()> {
    let object = library.get(target)?;
    let common = object
        .common()
        .ok_or_else(|| EngineError::HandleType("object has no delete behavior".to_string()))?;
    common.configure_delete_behavior(linger, timeout);
    Ok(())
}

fn extension_of(path: &str) -> Option<&str> {
    std::path::Path::new(path).extension().and_then(|e| e.to_str())
}
