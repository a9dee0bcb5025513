//! The audio-thread engine: owns every piece of DSP state and runs the
//! block pipeline.
//!
//! Per block, in order: drain the command queue, tick automation on every
//! object, run sources (which pull their generators and feed routes), run
//! global effects, advance the router, retire lingering objects, and
//! publish the new block time. Output generation is strictly additive into
//! a zeroed stereo bus.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};
use std::sync::Arc;
use std::sync::atomic::Ordering;

use log::warn;

use resona_core::config::{BLOCK_SIZE, SR};

use crate::automation::{AutomationTimeline, BatchItem, ScheduledEvent};
use crate::commands::{Command, NewObject};
use crate::context::ContextShared;
use crate::effects::{EchoEffect, EffectKind, FdnReverbEffect, GlobalEffectState};
use crate::events::EventKind;
use crate::fade::FadeDriver;
use crate::generators::{
    BufferGenerator, GeneratorKind, GeneratorState, NoiseGeneratorState, SineBankGenerator,
};
use crate::objects::Handle;
use crate::properties::ids;
use crate::router::Router;
use crate::runtime::RuntimeCommon;
use crate::sources::{SourceRunResult, SourceState};

pub struct Engine {
    shared: Arc<ContextShared>,
    ctx_rt: RuntimeCommon,
    ctx_gain_driver: FadeDriver,

    generators: BTreeMap<Handle, GeneratorState>,
    sources: BTreeMap<Handle, SourceState>,
    effects: BTreeMap<Handle, GlobalEffectState>,
    router: Router,

    /// Lingering objects by deadline block.
    linger_queue: BinaryHeap<Reverse<(u64, Handle)>>,
    block_time: u64,
    noise_seed: u64,
}

impl Engine {
    pub fn new(shared: Arc<ContextShared>) -> Self {
        let ctx_rt = RuntimeCommon::new(shared.common().clone());
        Self {
            shared,
            ctx_rt,
            ctx_gain_driver: FadeDriver::new(1.0, 1),
            generators: BTreeMap::new(),
            sources: BTreeMap::new(),
            effects: BTreeMap::new(),
            router: Router::new(),
            linger_queue: BinaryHeap::new(),
            block_time: 0,
            noise_seed: 0x5eed,
        }
    }

    pub fn block_time(&self) -> u64 {
        self.block_time
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn generator_count(&self) -> usize {
        self.generators.len()
    }

    fn time_seconds(&self) -> f64 {
        self.block_time as f64 * BLOCK_SIZE as f64 / SR as f64
    }

    /// Generate exactly one stereo block into `output`
    /// (`BLOCK_SIZE * 2` samples, overwritten).
    pub fn run_block(&mut self, output: &mut [f32]) {
        debug_assert!(output.len() >= BLOCK_SIZE * 2);
        output[..BLOCK_SIZE * 2].fill(0.0);

        self.drain_commands();
        self.tick_automation();
        self.run_sources(output);
        self.run_effects(output);
        self.apply_context_gain(output);

        self.router.finish_block();
        self.retire_lingering();

        self.block_time += 1;
        self.shared
            .block_time
            .store(self.block_time, Ordering::Release);
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.shared.command_rx.try_recv() {
            self.apply_command(command);
        }
    }

    fn apply_command(&mut self, command: Command) {
        match command {
            Command::SetProperty {
                target,
                property,
                value,
            } => {
                let Some(common) = self.common_of(target) else {
                    return;
                };
                if let Err(e) = common.bag().write(property, value, true) {
                    // Validated at the boundary; a failure here means the
                    // object's table changed under us.
                    warn!("property write failed on audio thread: {e}");
                }
            }
            Command::SetBuffer { target, buffer } => {
                if let Some(state) = self.generators.get_mut(&target) {
                    if let GeneratorKind::Buffer(generator) = &mut state.kind {
                        generator.set_buffer(buffer);
                    }
                }
            }
            Command::Play { target } => {
                if target == self.shared.handle() {
                    for source in self.sources.values_mut() {
                        source.play();
                    }
                } else if let Some(generator) = self.generators.get_mut(&target) {
                    generator.play();
                } else if let Some(source) = self.sources.get_mut(&target) {
                    source.play();
                } else if let Some(effect) = self.effects.get_mut(&target) {
                    effect.play();
                }
            }
            Command::Pause { target } => {
                if target == self.shared.handle() {
                    for source in self.sources.values_mut() {
                        source.pause();
                    }
                } else if let Some(generator) = self.generators.get_mut(&target) {
                    generator.pause();
                } else if let Some(source) = self.sources.get_mut(&target) {
                    source.pause();
                } else if let Some(effect) = self.effects.get_mut(&target) {
                    effect.pause();
                }
            }
            Command::AddGenerator { source, generator } => {
                if let Some(state) = self.sources.get_mut(&source) {
                    state.add_generator(generator);
                }
            }
            Command::RemoveGenerator { source, generator } => {
                if let Some(state) = self.sources.get_mut(&source) {
                    state.remove_generator(generator);
                }
            }
            Command::RegisterObject { common, init } => {
                let handle = common.handle();
                match init {
                    NewObject::BufferGenerator => {
                        self.generators.insert(
                            handle,
                            GeneratorState::new(
                                common,
                                GeneratorKind::Buffer(BufferGenerator::new()),
                            ),
                        );
                    }
                    NewObject::StreamingGenerator(generator) => {
                        self.generators.insert(
                            handle,
                            GeneratorState::new(common, GeneratorKind::Streaming(*generator)),
                        );
                    }
                    NewObject::SineBankGenerator { frequency, waves } => {
                        self.generators.insert(
                            handle,
                            GeneratorState::new(
                                common,
                                GeneratorKind::SineBank(SineBankGenerator::new(frequency, waves)),
                            ),
                        );
                    }
                    NewObject::NoiseGenerator { channels } => {
                        self.noise_seed = self.noise_seed.wrapping_add(1);
                        self.generators.insert(
                            handle,
                            GeneratorState::new(
                                common,
                                GeneratorKind::Noise(NoiseGeneratorState::new(
                                    channels,
                                    self.noise_seed,
                                )),
                            ),
                        );
                    }
                    NewObject::DirectSource
                    | NewObject::AngularPannedSource
                    | NewObject::ScalarPannedSource
                    | NewObject::Source3D => {
                        if matches!(init, NewObject::Source3D) {
                            self.copy_default_distance_params(&common);
                        }
                        self.sources.insert(handle, SourceState::new(common));
                    }
                    NewObject::GlobalEcho => {
                        self.effects.insert(
                            handle,
                            GlobalEffectState::new(common, EffectKind::Echo(EchoEffect::new())),
                        );
                    }
                    NewObject::GlobalFdnReverb => {
                        self.effects.insert(
                            handle,
                            GlobalEffectState::new(
                                common,
                                EffectKind::FdnReverb(FdnReverbEffect::new()),
                            ),
                        );
                    }
                }
            }
            Command::FinalizeHandle { target } => self.begin_death(target),
            Command::ConfigureRoute {
                writer,
                reader,
                gain,
                fade_in,
                filter,
            } => {
                self.router
                    .configure_route(writer, reader, gain, fade_in, filter);
            }
            Command::RemoveRoute {
                writer,
                reader,
                fade_out,
            } => {
                self.router.remove_route(writer, reader, fade_out);
            }
            Command::RemoveAllRoutes { writer, fade_out } => {
                self.router.remove_all_routes(writer, fade_out);
            }
            Command::ExecuteBatch { items } => {
                for item in items {
                    self.apply_batch_item(item);
                }
            }
            Command::SetEchoTaps { target, taps } => {
                if let Some(effect) = self.effects.get_mut(&target) {
                    if let EffectKind::Echo(echo) = &mut effect.kind {
                        echo.push_config(taps);
                    }
                }
            }
            Command::ResetEffect { target } => {
                if let Some(effect) = self.effects.get_mut(&target) {
                    effect.reset();
                }
            }
        }
    }

    fn apply_batch_item(&mut self, item: BatchItem) {
        match item {
            BatchItem::AppendPoint {
                target,
                property,
                point,
            } => {
                if let Some(rt) = self.runtime_of(target) {
                    rt.automation
                        .entry(property)
                        .or_insert_with(AutomationTimeline::new)
                        .add_point(point);
                }
            }
            BatchItem::ClearProperty { target, property } => {
                if let Some(rt) = self.runtime_of(target) {
                    rt.automation.remove(&property);
                }
            }
            BatchItem::ClearAllProperties { target } => {
                if let Some(rt) = self.runtime_of(target) {
                    rt.automation.clear();
                }
            }
            BatchItem::SendUserEvent {
                target,
                time,
                param,
            } => {
                if let Some(rt) = self.runtime_of(target) {
                    rt.events.schedule(ScheduledEvent { time, param });
                }
            }
        }
    }

    /// New 3D sources pick up the context's default distance model at
    /// creation time, on the audio thread.
    fn copy_default_distance_params(&self, common: &Arc<crate::objects::ObjectCommon>) {
        let context_bag = self.shared.common().bag();
        let bag = common.bag();
        let pairs = [
            (ids::DEFAULT_DISTANCE_MODEL, ids::DISTANCE_MODEL),
            (ids::DEFAULT_DISTANCE_REF, ids::DISTANCE_REF),
            (ids::DEFAULT_DISTANCE_MAX, ids::DISTANCE_MAX),
            (ids::DEFAULT_ROLLOFF, ids::ROLLOFF),
            (ids::DEFAULT_CLOSENESS_BOOST, ids::CLOSENESS_BOOST),
            (
                ids::DEFAULT_CLOSENESS_BOOST_DISTANCE,
                ids::CLOSENESS_BOOST_DISTANCE,
            ),
        ];
        for (from, to) in pairs {
            if let Ok(value) = context_bag.read(from) {
                let _ = bag.write(to, value, true);
            }
        }
    }

    fn common_of(&self, handle: Handle) -> Option<&Arc<crate::objects::ObjectCommon>> {
        if handle == self.shared.handle() {
            return Some(self.shared.common());
        }
        if let Some(g) = self.generators.get(&handle) {
            return Some(&g.rt.common);
        }
        if let Some(s) = self.sources.get(&handle) {
            return Some(&s.rt.common);
        }
        if let Some(e) = self.effects.get(&handle) {
            return Some(&e.rt.common);
        }
        None
    }

    fn runtime_of(&mut self, handle: Handle) -> Option<&mut RuntimeCommon> {
        if handle == self.shared.handle() {
            return Some(&mut self.ctx_rt);
        }
        if let Some(g) = self.generators.get_mut(&handle) {
            return Some(&mut g.rt);
        }
        if let Some(s) = self.sources.get_mut(&handle) {
            return Some(&mut s.rt);
        }
        if let Some(e) = self.effects.get_mut(&handle) {
            return Some(&mut e.rt);
        }
        None
    }

    fn tick_automation(&mut self) {
        let time = self.time_seconds();
        let context = self.shared.handle();
        let events = &self.shared.events;
        self.ctx_rt.tick_automation(time, events, context);
        for generator in self.generators.values_mut() {
            generator.rt.tick_automation(time, events, context);
        }
        for source in self.sources.values_mut() {
            source.rt.tick_automation(time, events, context);
        }
        for effect in self.effects.values_mut() {
            effect.rt.tick_automation(time, events, context);
        }
    }

    fn run_sources(&mut self, output: &mut [f32]) {
        let Engine {
            shared,
            generators,
            sources,
            effects,
            router,
            block_time,
            ..
        } = self;
        let context = shared.handle();
        let context_bag = shared.common().bag();

        let mut finalize = Vec::new();
        for (&handle, source) in sources.iter_mut() {
            let result = source.run(
                *block_time,
                generators,
                router,
                effects,
                context_bag,
                &shared.events,
                context,
                output,
            );
            if result == SourceRunResult::Finalize {
                finalize.push(handle);
            }
        }
        for handle in finalize {
            self.finalize_object(handle);
        }
    }

    fn run_effects(&mut self, output: &mut [f32]) {
        for effect in self.effects.values_mut() {
            effect.run(output, self.block_time);
        }
    }

    fn apply_context_gain(&mut self, output: &mut [f32]) {
        if let Some(gain) = self.shared.common().bag().acquire_double(ids::GAIN) {
            self.ctx_gain_driver.set_value(self.block_time, gain as f32);
        }
        let (start, step) = self.ctx_gain_driver.block_ramp(self.block_time);
        if start == 1.0 && step == 0.0 {
            return;
        }
        for i in 0..BLOCK_SIZE {
            let g = start + step * i as f32;
            output[i * 2] *= g;
            output[i * 2 + 1] *= g;
        }
    }

    /// Refcount hit zero: either start lingering or remove right away.
    fn begin_death(&mut self, handle: Handle) {
        let Some(common) = self.common_of(handle) else {
            return;
        };
        let common = common.clone();

        if !common.linger_enabled() {
            self.finalize_object(handle);
            return;
        }

        let configured = common.linger_timeout();
        let natural = if let Some(generator) = self.generators.get(&handle) {
            generator.natural_linger_time()
        } else {
            // Sources linger until their generators finish.
            None
        };

        // Effective timeout: the smaller of the configured cap and the
        // object's own remaining life, when both exist.
        let timeout = match (configured > 0.0, natural) {
            (true, Some(n)) => Some(configured.min(n)),
            (true, None) => Some(configured),
            (false, Some(n)) => Some(n),
            (false, None) => None,
        };

        if let Some(rt) = self.runtime_of(handle) {
            rt.lingering = true;
        }
        if let Some(seconds) = timeout {
            let blocks = (seconds * SR as f64 / BLOCK_SIZE as f64).ceil() as u64;
            self.linger_queue
                .push(Reverse((self.block_time + blocks.max(1), handle)));
        }
        // With no deadline the object dies through its own bookkeeping
        // (source linger countdown once generators are gone).
    }

    fn retire_lingering(&mut self) {
        while let Some(&Reverse((deadline, handle))) = self.linger_queue.peek() {
            if deadline > self.block_time {
                break;
            }
            self.linger_queue.pop();
            self.finalize_object(handle);
        }
    }

    /// Remove an object from the graph and tell listeners it is done.
    fn finalize_object(&mut self, handle: Handle) {
        let context = self.shared.handle();
        let mut removed = false;

        if self.generators.remove(&handle).is_some() {
            removed = true;
            // Sources prune dead generator refs at their next block.
        }
        if self.sources.remove(&handle).is_some() {
            self.router.unregister_writer(handle);
            removed = true;
        }
        if self.effects.remove(&handle).is_some() {
            self.router.unregister_reader(handle);
            removed = true;
        }

        if removed {
            self.shared
                .events
                .enqueue_simple(EventKind::Finished, handle, context);
        }
    }
}
