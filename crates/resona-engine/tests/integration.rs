//! Full-stack scenarios driven through the embedding API against headless
//! contexts.

use std::sync::Arc;

use resona_core::config::{BLOCK_SIZE, SR};
use resona_engine::api;
use resona_engine::decoding::AudioDecoder;
use resona_engine::events::EventKind;
use resona_engine::library::{Library, ObjectRef};
use resona_engine::properties::{PropertyValue, ids};
use resona_engine::{Handle, ObjectType};

fn context_of(library: &Library, handle: Handle) -> Arc<resona_engine::Context> {
    match library.get(handle).unwrap() {
        ObjectRef::Context(context) => context,
        _ => panic!("not a context"),
    }
}

fn tick(library: &Library, context: Handle) -> Vec<f32> {
    let mut block = vec![0.0f32; BLOCK_SIZE * 2];
    api::context_get_block(library, context, &mut block).unwrap();
    block
}

#[test]
fn silent_context_stays_silent() {
    let library = Library::new();
    let context = api::create_context_headless(&library).unwrap();
    for _ in 0..10 {
        let block = tick(&library, context);
        assert!(block.iter().all(|&s| s == 0.0));
    }
}

#[test]
fn property_write_is_visible_after_one_block() {
    let library = Library::new();
    let context = api::create_context_headless(&library).unwrap();
    let source = api::create_source_3d(&library, context).unwrap();

    api::set_property(
        &library,
        source,
        ids::POSITION,
        PropertyValue::Double3([1.0, 0.0, 0.0]),
    )
    .unwrap();
    tick(&library, context);

    match api::get_property(&library, source, ids::POSITION).unwrap() {
        PropertyValue::Double3(position) => assert_eq!(position, [1.0, 0.0, 0.0]),
        other => panic!("unexpected value {other:?}"),
    }
}

#[test]
fn out_of_range_property_write_fails_and_preserves_state() {
    let library = Library::new();
    let context = api::create_context_headless(&library).unwrap();
    let source = api::create_scalar_panned_source(&library, context).unwrap();

    // Endpoints succeed.
    for value in [-1.0, 1.0] {
        api::set_property(
            &library,
            source,
            ids::PANNING_SCALAR,
            PropertyValue::Double(value),
        )
        .unwrap();
    }
    // Out of range fails without touching the last value.
    let error = api::set_property(
        &library,
        source,
        ids::PANNING_SCALAR,
        PropertyValue::Double(1.5),
    )
    .unwrap_err();
    assert!(matches!(error, resona_core::EngineError::Range { .. }));
    tick(&library, context);
    match api::get_property(&library, source, ids::PANNING_SCALAR).unwrap() {
        PropertyValue::Double(value) => assert_eq!(value, 1.0),
        other => panic!("unexpected value {other:?}"),
    }
}

#[test]
fn sine_through_panned_source_reaches_the_bus() {
    let library = Library::new();
    let context = api::create_context_headless(&library).unwrap();
    let generator = api::create_sine_wave_generator(&library, context, 440.0).unwrap();
    let source = api::create_scalar_panned_source(&library, context).unwrap();
    api::set_property(
        &library,
        source,
        ids::PANNING_SCALAR,
        PropertyValue::Double(-1.0),
    )
    .unwrap();
    api::source_add_generator(&library, source, generator).unwrap();

    // First block applies the registration commands.
    tick(&library, context);
    let block = tick(&library, context);
    let left_energy: f64 = block.chunks_exact(2).map(|f| (f[0] as f64).powi(2)).sum();
    let right_energy: f64 = block.chunks_exact(2).map(|f| (f[1] as f64).powi(2)).sum();
    assert!(left_energy > 0.01, "left energy {left_energy}");
    assert!(right_energy < 1e-9, "right energy {right_energy}");
}

#[test]
fn buffer_round_trip_through_the_handle_table() {
    let library = Library::new();
    let frames = 2048;
    let samples: Vec<f32> = (0..frames * 2)
        .map(|i| ((i as f32) * 0.01).sin() * 0.5)
        .collect();
    let buffer = api::create_buffer_from_float_array(&library, SR, 2, &samples).unwrap();

    assert_eq!(api::buffer_get_channels(&library, buffer).unwrap(), 2);
    assert_eq!(
        api::buffer_get_length_in_samples(&library, buffer).unwrap(),
        frames
    );
    let seconds = api::buffer_get_length_in_seconds(&library, buffer).unwrap();
    assert!((seconds - frames as f64 / SR as f64).abs() < 1e-12);
}

#[test]
fn buffer_generator_plays_and_finishes() {
    let library = Library::new();
    let context = api::create_context_headless(&library).unwrap();
    api::context_enable_events(&library, context).unwrap();

    // Half a second of DC so the output is easy to recognize.
    let frames = BLOCK_SIZE * 4;
    let samples = vec![0.5f32; frames];
    let buffer = api::create_buffer_from_float_array(&library, SR, 1, &samples).unwrap();

    let generator = api::create_buffer_generator(&library, context).unwrap();
    let source = api::create_direct_source(&library, context).unwrap();
    api::source_add_generator(&library, source, generator).unwrap();
    api::set_property(
        &library,
        generator,
        ids::BUFFER,
        PropertyValue::ObjectHandle(buffer),
    )
    .unwrap();

    tick(&library, context);
    let block = tick(&library, context);
    // DC 0.5 mono fans out to both channels (quantization-bounded).
    for frame in block.chunks_exact(2) {
        assert!((frame[0] - 0.5).abs() < 1e-3, "{}", frame[0]);
        assert_eq!(frame[0], frame[1]);
    }

    // Drain the buffer; a Finished event for the generator must arrive.
    let mut finished = false;
    for _ in 0..8 {
        tick(&library, context);
        while let Some(event) = api::context_get_next_event(&library, context).unwrap() {
            if event.kind == EventKind::Finished && event.source == generator {
                finished = true;
            }
        }
    }
    assert!(finished, "no Finished event for the buffer generator");
}

#[test]
fn effect_connect_churn_converges_to_zero_routes() {
    let library = Library::new();
    let context = api::create_context_headless(&library).unwrap();
    let sources: Vec<Handle> = (0..3)
        .map(|_| api::create_direct_source(&library, context).unwrap())
        .collect();
    let reverbs: Vec<Handle> = (0..2)
        .map(|_| api::create_global_fdn_reverb(&library, context).unwrap())
        .collect();

    let ctx = context_of(&library, context);
    for iteration in 0..10_000 {
        for &source in &sources {
            for &reverb in &reverbs {
                if iteration % 2 == 0 {
                    api::routing_config_route(
                        &library,
                        context,
                        source,
                        reverb,
                        api::RouteConfig {
                            gain: 1.0,
                            fade_time_blocks: 1,
                            filter: resona_dsp_identity(),
                        },
                    )
                    .unwrap();
                } else {
                    api::routing_remove_route(&library, context, source, reverb, 1).unwrap();
                }
            }
        }
        let block = tick(&library, context);
        assert!(block.iter().all(|&s| s == 0.0));
    }

    // Quiesce: remove everything, run the fades and sweeps out.
    for &source in &sources {
        api::routing_remove_all_routes(&library, source, 1).unwrap();
    }
    for _ in 0..32 {
        tick(&library, context);
    }
    let routes = ctx
        .with_engine(|engine| engine.router().routes().len())
        .unwrap();
    assert_eq!(routes, 0);
}

fn resona_dsp_identity() -> resona_dsp::BiquadDef {
    resona_dsp::BiquadDef::identity()
}

/// A decoder producing silence slowly, like a laggy disk or codec.
struct SlowSilentDecoder {
    delay: std::time::Duration,
}

impl AudioDecoder for SlowSilentDecoder {
    fn channels(&self) -> usize {
        2
    }

    fn sample_rate(&self) -> u32 {
        SR
    }

    fn write_frames_interleaved(
        &mut self,
        frames: usize,
        out: &mut [f32],
    ) -> resona_core::EngineResult<usize> {
        std::thread::sleep(self.delay);
        out[..frames * 2].fill(0.0);
        Ok(frames)
    }

    fn supports_seek(&self) -> bool {
        false
    }

    fn seek_seconds(&mut self, _position: f64) -> resona_core::EngineResult<()> {
        Ok(())
    }
}

/// A starving decoder must never surface garbage: underruns are exact
/// silence.
#[test]
fn streaming_underrun_is_clean_silence() {
    let library = Library::new();
    let context = api::create_context_headless(&library).unwrap();
    let decoder = SlowSilentDecoder {
        delay: std::time::Duration::from_millis(5),
    };
    let generator =
        api::create_streaming_generator_from_decoder(&library, context, Box::new(decoder))
            .unwrap();
    let source = api::create_direct_source(&library, context).unwrap();
    api::source_add_generator(&library, source, generator).unwrap();

    // One block is 5.8 ms of audio and each decode takes 5 ms, so the
    // decoder barely keeps up; drive a couple of seconds as fast as the
    // test can.
    let blocks = 2 * SR as usize / BLOCK_SIZE;
    for _ in 0..blocks {
        let block = tick(&library, context);
        for &sample in &block {
            assert!(
                sample.abs() <= 1e-6,
                "underrun leaked a sample: {sample}"
            );
        }
    }
}

#[test]
fn dec_ref_removes_object_from_graph() {
    let library = Library::new();
    let context = api::create_context_headless(&library).unwrap();
    let generator = api::create_sine_wave_generator(&library, context, 220.0).unwrap();
    let source = api::create_direct_source(&library, context).unwrap();
    api::source_add_generator(&library, source, generator).unwrap();
    tick(&library, context);

    let ctx = context_of(&library, context);
    assert_eq!(ctx.with_engine(|e| e.generator_count()), Some(1));
    assert_eq!(ctx.with_engine(|e| e.source_count()), Some(1));

    library.dec_ref(generator).unwrap();
    assert!(!library.is_alive(generator));
    tick(&library, context);
    assert_eq!(ctx.with_engine(|e| e.generator_count()), Some(0));

    // The source survives, now silent.
    let block = tick(&library, context);
    assert!(block.iter().all(|&s| s == 0.0));
    assert_eq!(ctx.with_engine(|e| e.source_count()), Some(1));
}

#[test]
fn lingering_source_outlives_its_handle_then_finishes() {
    let library = Library::new();
    let context = api::create_context_headless(&library).unwrap();
    api::context_enable_events(&library, context).unwrap();

    let generator = api::create_sine_wave_generator(&library, context, 330.0).unwrap();
    let source = api::create_scalar_panned_source(&library, context).unwrap();
    api::source_add_generator(&library, source, generator).unwrap();
    api::config_delete_behavior(&library, source, true, 0.05).unwrap();
    tick(&library, context);

    // Handle dies; the source lingers, still audible.
    library.dec_ref(source).unwrap();
    tick(&library, context);
    let block = tick(&library, context);
    assert!(block.iter().any(|&s| s != 0.0), "lingering source is silent");

    // After the timeout the source leaves the graph.
    let ctx = context_of(&library, context);
    let linger_blocks = (0.05 * SR as f64 / BLOCK_SIZE as f64).ceil() as usize + 4;
    for _ in 0..linger_blocks {
        tick(&library, context);
    }
    assert_eq!(ctx.with_engine(|e| e.source_count()), Some(0));
}

#[test]
fn automation_batch_drives_a_property() {
    use resona_engine::automation::{AutomationPoint, InterpolationKind};

    let library = Library::new();
    let context = api::create_context_headless(&library).unwrap();
    let source = api::create_direct_source(&library, context).unwrap();
    tick(&library, context);

    let batch = api::create_automation_batch(&library, context).unwrap();
    let start = 2.0 * BLOCK_SIZE as f64 / SR as f64;
    let end = start + 0.1;
    api::batch_append_property(
        &library,
        batch,
        source,
        ids::GAIN,
        AutomationPoint {
            time: start,
            interpolation: InterpolationKind::Linear,
            values: [1.0; 6],
        },
    )
    .unwrap();
    api::batch_append_property(
        &library,
        batch,
        source,
        ids::GAIN,
        AutomationPoint {
            time: end,
            interpolation: InterpolationKind::Linear,
            values: [0.0; 6],
        },
    )
    .unwrap();
    api::batch_execute(&library, batch).unwrap();

    // Mid-envelope the gain sits strictly between the endpoints.
    let mid_blocks = ((start + 0.05) * SR as f64 / BLOCK_SIZE as f64) as usize;
    for _ in 0..mid_blocks {
        tick(&library, context);
    }
    let mid = match api::get_property(&library, source, ids::GAIN).unwrap() {
        PropertyValue::Double(v) => v,
        other => panic!("unexpected value {other:?}"),
    };
    assert!(mid > 0.1 && mid < 0.9, "mid-envelope gain {mid}");

    // Past the end it lands exactly on the terminal value.
    for _ in 0..mid_blocks {
        tick(&library, context);
    }
    let final_gain = match api::get_property(&library, source, ids::GAIN).unwrap() {
        PropertyValue::Double(v) => v,
        other => panic!("unexpected value {other:?}"),
    };
    assert_eq!(final_gain, 0.0);
}

#[test]
fn scheduled_user_events_fire_at_their_time() {
    let library = Library::new();
    let context = api::create_context_headless(&library).unwrap();
    api::context_enable_events(&library, context).unwrap();
    let source = api::create_direct_source(&library, context).unwrap();
    tick(&library, context);

    let batch = api::create_automation_batch(&library, context).unwrap();
    let fire_at = 5.0 * BLOCK_SIZE as f64 / SR as f64;
    api::batch_send_user_event(&library, batch, source, fire_at, 7).unwrap();
    api::batch_execute(&library, batch).unwrap();

    let mut fired_at_block = None;
    for block in 0..20u64 {
        tick(&library, context);
        if let Some(event) = api::context_get_next_event(&library, context).unwrap() {
            assert_eq!(event.kind, EventKind::UserAutomation { param: 7 });
            assert_eq!(event.source, source);
            fired_at_block = Some(block);
            break;
        }
    }
    let fired = fired_at_block.expect("scheduled event never fired");
    assert!(fired >= 4 && fired <= 7, "fired at block {fired}");
}

#[test]
fn object_type_introspection() {
    let library = Library::new();
    let context = api::create_context_headless(&library).unwrap();
    let source = api::create_source_3d(&library, context).unwrap();
    let echo = api::create_global_echo(&library, context).unwrap();

    assert_eq!(
        library.get(context).unwrap().object_type(),
        ObjectType::Context
    );
    assert_eq!(
        library.get(source).unwrap().object_type(),
        ObjectType::Source3D
    );
    assert_eq!(
        library.get(echo).unwrap().object_type(),
        ObjectType::GlobalEcho
    );
}
