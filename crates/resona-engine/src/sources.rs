//! Sources: mix generators, filter, pan, and feed routes.
//!
//! Every source mixes its generators into an internal scratch whose
//! channel count is recomputed per block from the live generator set (it
//! is never latched). The mixed block runs through the full-path filter,
//! then forks: one copy through the direct-path filter to the output bus
//! (panned or not), one copy through the effects-path filter into each
//! outgoing route's input accumulator at the route's faded gain.

use std::collections::BTreeMap;
use std::sync::Arc;

use resona_core::config::{BLOCK_SIZE, MAX_CHANNELS};
use resona_core::{DistanceModel, DistanceParams, Vec3, gain_from_distance};
use resona_dsp::CrossfadingBiquad;
use resona_dsp::channels::mix_channels_add;
use resona_spatial::{Panner, PannerStrategy};

use crate::effects::GlobalEffectState;
use crate::events::EventSender;
use crate::fade::FadeDriver;
use crate::generators::GeneratorState;
use crate::objects::{Handle, ObjectCommon, ObjectType};
use crate::pause::Pausable;
use crate::properties::{PropertyBag, ids};
use crate::router::Router;
use crate::runtime::RuntimeCommon;

/// Blocks a lingering source keeps running after its last generator ends,
/// letting panner and filter tails drain.
const LINGER_BLOCKS: u32 = 3;

pub enum SourceKind {
    Direct,
    AngularPanned(PannedState),
    ScalarPanned(PannedState),
    Source3D(PannedState),
}

pub struct PannedState {
    /// Built lazily on the audio thread so the context-wide default
    /// strategy applies no matter when the source was created.
    panner: Option<Panner>,
}

impl PannedState {
    fn new() -> Self {
        Self { panner: None }
    }
}

/// What the caller should do with the source after a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceRunResult {
    Keep,
    /// Lingering finished; remove the source from the graph.
    Finalize,
}

pub struct SourceState {
    pub rt: RuntimeCommon,
    pub kind: SourceKind,
    pub generators: Vec<Handle>,
    pause: Pausable,
    gain_driver: FadeDriver,
    filter: CrossfadingBiquad,
    filter_direct: CrossfadingBiquad,
    filter_effects: CrossfadingBiquad,
    gain_3d: f64,
    last_gain: f64,
    last_driver_target: f64,
    linger_countdown: u32,

    block: Box<[f32]>,
    gen_scratch: Box<[f32]>,
    effects_scratch: Box<[f32]>,
    route_scratch: Box<[f32]>,
}

impl SourceState {
    pub fn new(common: Arc<ObjectCommon>) -> Self {
        let kind = match common.object_type() {
            ObjectType::DirectSource => SourceKind::Direct,
            ObjectType::AngularPannedSource => SourceKind::AngularPanned(PannedState::new()),
            ObjectType::ScalarPannedSource => SourceKind::ScalarPanned(PannedState::new()),
            ObjectType::Source3D => SourceKind::Source3D(PannedState::new()),
            other => unreachable!("{other:?} is not a source type"),
        };
        Self {
            rt: RuntimeCommon::new(common),
            kind,
            generators: Vec::new(),
            pause: Pausable::new(),
            gain_driver: FadeDriver::new(1.0, 1),
            filter: CrossfadingBiquad::new(),
            filter_direct: CrossfadingBiquad::new(),
            filter_effects: CrossfadingBiquad::new(),
            gain_3d: 1.0,
            last_gain: 1.0,
            last_driver_target: 1.0,
            linger_countdown: LINGER_BLOCKS,
            block: vec![0.0; BLOCK_SIZE * MAX_CHANNELS].into_boxed_slice(),
            gen_scratch: vec![0.0; BLOCK_SIZE * MAX_CHANNELS].into_boxed_slice(),
            effects_scratch: vec![0.0; BLOCK_SIZE * MAX_CHANNELS].into_boxed_slice(),
            route_scratch: vec![0.0; BLOCK_SIZE * MAX_CHANNELS].into_boxed_slice(),
        }
    }

    pub fn handle(&self) -> Handle {
        self.rt.handle()
    }

    pub fn play(&mut self) {
        self.pause.play();
    }

    pub fn pause(&mut self) {
        self.pause.pause();
    }

    pub fn add_generator(&mut self, generator: Handle) {
        if !self.generators.contains(&generator) {
            self.generators.push(generator);
        }
    }

    pub fn remove_generator(&mut self, generator: Handle) {
        self.generators.retain(|&h| h != generator);
    }

    fn is_panned(&self) -> bool {
        !matches!(self.kind, SourceKind::Direct)
    }

    /// Run one block.
    #[allow(clippy::too_many_arguments)]
    pub fn run(
        &mut self,
        block_time: u64,
        generators: &mut BTreeMap<Handle, GeneratorState>,
        router: &mut Router,
        effects: &mut BTreeMap<Handle, GlobalEffectState>,
        context_bag: &PropertyBag,
        events: &EventSender,
        context: Handle,
        output: &mut [f32],
    ) -> SourceRunResult {
        if self.pause.is_paused() {
            self.pause.tick();
            return SourceRunResult::Keep;
        }

        // Drop references to generators the engine has already removed.
        self.generators.retain(|h| generators.contains_key(h));

        // 3D sources recompute angles and distance gain before mixing.
        if let SourceKind::Source3D(_) = self.kind {
            self.update_3d(context_bag);
        }

        let bag = self.rt.common.bag();
        if let Some(def) = bag.acquire_biquad(ids::FILTER) {
            self.filter.configure(def);
        }
        if let Some(def) = bag.acquire_biquad(ids::FILTER_DIRECT) {
            self.filter_direct.configure(def);
        }
        if let Some(def) = bag.acquire_biquad(ids::FILTER_EFFECTS) {
            self.filter_effects.configure(def);
        }

        // Gain target is the property gain times the 3D distance gain;
        // retarget the fader whenever either moves.
        if let Some(gain) = bag.acquire_double(ids::GAIN) {
            self.last_gain = gain;
        }
        let target = self.last_gain * self.gain_3d;
        if (target - self.last_driver_target).abs() > 1e-9 {
            self.last_driver_target = target;
            self.gain_driver.set_value(block_time, target as f32);
        }

        // Mix generators at this block's channel count.
        let channels = self.mix_generators(block_time, generators, events, context);
        if channels == 0 {
            return self.after_block(router);
        }

        // Gain and pause trajectories multiply per sample.
        let (gain_start, gain_step) = self.gain_driver.block_ramp(block_time);
        let (pause_start, pause_step) = self.pause.block_ramp();
        for i in 0..BLOCK_SIZE {
            let g = (gain_start + gain_step * i as f32) * (pause_start + pause_step * i as f32);
            for ch in 0..channels {
                self.block[i * channels + ch] *= g;
            }
        }

        self.filter
            .process_block(&mut self.block[..BLOCK_SIZE * channels], channels);

        // Effects-path copy, filtered independently.
        self.effects_scratch[..BLOCK_SIZE * channels]
            .copy_from_slice(&self.block[..BLOCK_SIZE * channels]);
        self.filter_effects
            .process_block(&mut self.effects_scratch[..BLOCK_SIZE * channels], channels);

        // Direct path.
        self.filter_direct
            .process_block(&mut self.block[..BLOCK_SIZE * channels], channels);
        match &mut self.kind {
            SourceKind::Direct => {
                mix_channels_add(
                    BLOCK_SIZE,
                    &self.block[..BLOCK_SIZE * channels],
                    channels,
                    output,
                    2,
                );
            }
            SourceKind::AngularPanned(panned)
            | SourceKind::ScalarPanned(panned)
            | SourceKind::Source3D(panned) => {
                let bag = self.rt.common.bag();
                let panner = ensure_panner(panned, bag, context_bag);
                panner
                    .input_buffer()
                    .copy_from_slice(&self.block[..BLOCK_SIZE]);
                panner.run(output);
            }
        }

        // Route the effects-path copy to every outgoing route.
        self.feed_routes(channels, router, effects);

        self.after_block(router)
    }

    /// Mix all generators into `self.block`, returning the channel count
    /// used (0 if nothing played). Panned sources fold everything to mono.
    fn mix_generators(
        &mut self,
        block_time: u64,
        generators: &mut BTreeMap<Handle, GeneratorState>,
        events: &EventSender,
        context: Handle,
    ) -> usize {
        let panned = self.is_panned();
        let mut channels = if panned { 1 } else { 0 };

        // The scratch covers the widest generator; recomputed every block.
        if !panned {
            for handle in &self.generators {
                let generator = &generators[handle];
                channels = channels.max(generator.channels().min(MAX_CHANNELS));
            }
        }
        if channels == 0 && self.generators.is_empty() {
            return 0;
        }
        let channels = channels.max(1);

        self.block[..BLOCK_SIZE * channels].fill(0.0);
        for handle in &self.generators {
            let Some(generator) = generators.get_mut(handle) else {
                continue;
            };
            let gen_channels = generator.channels().min(MAX_CHANNELS);
            if gen_channels == 0 {
                continue;
            }
            let scratch = &mut self.gen_scratch[..BLOCK_SIZE * gen_channels];
            scratch.fill(0.0);
            generator.generate_block(block_time, scratch, events, context);
            mix_channels_add(
                BLOCK_SIZE,
                scratch,
                gen_channels,
                &mut self.block[..BLOCK_SIZE * channels],
                channels,
            );
        }
        channels
    }

    /// Source3D: listener-relative spherical position drives the panner
    /// angles, the distance model drives an extra gain.
    fn update_3d(&mut self, context_bag: &PropertyBag) {
        let bag = self.rt.common.bag();
        let position = Vec3::from_array(bag.get_double3(ids::POSITION));
        let listener_position = Vec3::from_array(context_bag.get_double3(ids::POSITION));
        let orientation = context_bag.get_double6(ids::ORIENTATION);
        let listener_at = Vec3::new(orientation[0], orientation[1], orientation[2]);
        let listener_up = Vec3::new(orientation[3], orientation[4], orientation[5]);

        let relative = position - listener_position;
        let at = listener_at.normalized().unwrap_or(Vec3::new(0.0, 1.0, 0.0));
        let right = listener_at
            .cross(listener_up)
            .normalized()
            .unwrap_or(Vec3::new(1.0, 0.0, 0.0));
        let up = right.cross(at);

        // Coordinates where +y is forward, +x right, +z up.
        let distance = relative.magnitude();
        let (x, y, z) = if distance == 0.0 {
            // At the center of the head: arbitrarily forward.
            (0.0, 1.0, 0.0)
        } else {
            (
                right.dot(relative) / distance,
                at.dot(relative) / distance,
                up.dot(relative) / distance,
            )
        };

        let azimuth = (x.atan2(y).to_degrees() + 360.0) % 360.0;
        let elevation = z.atan2((x * x + y * y).sqrt()).to_degrees();

        if let SourceKind::Source3D(panned) = &mut self.kind {
            // The panner is built lazily in the direct-path stage; on the
            // very first block these angles land one block late.
            if let Some(panner) = panned.panner.as_mut() {
                panner.set_panning_angles(
                    azimuth.clamp(0.0, 360.0),
                    elevation.clamp(-90.0, 90.0),
                );
            }
        }
        let params = DistanceParams {
            distance,
            distance_ref: bag.get_double(ids::DISTANCE_REF),
            distance_max: bag.get_double(ids::DISTANCE_MAX),
            rolloff: bag.get_double(ids::ROLLOFF),
            closeness_boost: bag.get_double(ids::CLOSENESS_BOOST),
            closeness_boost_distance: bag.get_double(ids::CLOSENESS_BOOST_DISTANCE),
            distance_model: DistanceModel::from_i32(bag.get_int(ids::DISTANCE_MODEL) as i32)
                .unwrap_or_default(),
        };
        self.gain_3d = gain_from_distance(&params);
    }

    fn feed_routes(
        &mut self,
        channels: usize,
        router: &mut Router,
        effects: &mut BTreeMap<Handle, GlobalEffectState>,
    ) {
        let handle = self.handle();
        let time = router.time();
        for index in router.run_for_writer_indices(handle) {
            let route = router.route_at(index);
            let Some((gain_start, gain_step)) = route.block_gain(time) else {
                continue;
            };
            let Some(effect) = effects.get_mut(&route.reader) else {
                continue;
            };

            let scratch = &mut self.route_scratch[..BLOCK_SIZE * channels];
            scratch.copy_from_slice(&self.effects_scratch[..BLOCK_SIZE * channels]);
            route.filter.process_block(scratch, channels);
            for i in 0..BLOCK_SIZE {
                let g = gain_start + gain_step * i as f32;
                for ch in 0..channels {
                    scratch[i * channels + ch] *= g;
                }
            }
            let effect_input_channels = effect.input_channels();
            mix_channels_add(
                BLOCK_SIZE,
                scratch,
                channels,
                effect.input_mut(),
                effect_input_channels,
            );
        }
    }

    fn after_block(&mut self, router: &Router) -> SourceRunResult {
        self.pause.tick();

        if self.rt.lingering {
            let routes_live = !router.run_for_writer(self.handle()).is_empty();
            if self.generators.is_empty() && !routes_live {
                if self.linger_countdown == 0 {
                    return SourceRunResult::Finalize;
                }
                self.linger_countdown -= 1;
            }
        }
        SourceRunResult::Keep
    }
}

/// Build the panner on first use, honoring the source's strategy property
/// and falling back to the context default. Re-reads the strategy property
/// so changing it rebuilds the panner, then applies the panning
/// properties.
fn ensure_panner<'a>(
    panned: &'a mut PannedState,
    bag: &PropertyBag,
    context_bag: &PropertyBag,
) -> &'a mut Panner {
    let mut strategy = PannerStrategy::from_i32(bag.get_int(ids::PANNER_STRATEGY) as i32)
        .unwrap_or_default();
    if strategy == PannerStrategy::Delegate {
        strategy =
            PannerStrategy::from_i32(context_bag.get_int(ids::DEFAULT_PANNER_STRATEGY) as i32)
                .unwrap_or(PannerStrategy::Stereo);
    }
    if strategy == PannerStrategy::Delegate {
        strategy = PannerStrategy::Stereo;
    }
    if let Some(panner) = &panned.panner {
        if panner.strategy() != strategy {
            panned.panner = None;
        }
    }
    let panner = panned
        .panner
        .get_or_insert_with(|| Panner::new(strategy));

    // Apply the panning properties for this source type.
    if bag.def(ids::AZIMUTH).is_ok() {
        panner.set_panning_angles(
            bag.get_double(ids::AZIMUTH),
            bag.get_double(ids::ELEVATION),
        );
    } else if bag.def(ids::PANNING_SCALAR).is_ok() {
        panner.set_panning_scalar(bag.get_double(ids::PANNING_SCALAR));
    }
    panner
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generators::{GeneratorKind, SineBankGenerator};
    use crate::properties::PropertyValue;
    use resona_dsp::SineWaveConfig;

    fn sine_generator(handle: Handle) -> GeneratorState {
        let common = Arc::new(ObjectCommon::new(handle, ObjectType::SineBankGenerator));
        GeneratorState::new(
            common,
            GeneratorKind::SineBank(SineBankGenerator::new(
                440.0,
                vec![SineWaveConfig::new(1.0, 0.0, 1.0)],
            )),
        )
    }

    struct Fixture {
        generators: BTreeMap<Handle, GeneratorState>,
        effects: BTreeMap<Handle, GlobalEffectState>,
        router: Router,
        context_common: ObjectCommon,
        events: EventSender,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                generators: BTreeMap::new(),
                effects: BTreeMap::new(),
                router: Router::new(),
                context_common: ObjectCommon::new(1, ObjectType::Context),
                events: EventSender::new(),
            }
        }

        fn run(&mut self, source: &mut SourceState, block_time: u64, output: &mut [f32]) {
            source.run(
                block_time,
                &mut self.generators,
                &mut self.router,
                &mut self.effects,
                self.context_common.bag(),
                &self.events,
                1,
                output,
            );
        }
    }

    #[test]
    fn direct_source_mixes_to_both_channels() {
        let mut fixture = Fixture::new();
        fixture.generators.insert(10, sine_generator(10));

        let common = Arc::new(ObjectCommon::new(20, ObjectType::DirectSource));
        let mut source = SourceState::new(common);
        source.add_generator(10);

        let mut output = vec![0.0f32; BLOCK_SIZE * 2];
        fixture.run(&mut source, 0, &mut output);

        assert!(output.iter().any(|&s| s != 0.0));
        // Mono generator duplicated to both channels.
        for frame in output.chunks_exact(2) {
            assert_eq!(frame[0], frame[1]);
        }
    }

    #[test]
    fn scalar_panned_source_respects_pan() {
        let mut fixture = Fixture::new();
        fixture.generators.insert(10, sine_generator(10));

        let common = Arc::new(ObjectCommon::new(20, ObjectType::ScalarPannedSource));
        common
            .bag()
            .write(ids::PANNING_SCALAR, PropertyValue::Double(-1.0), true)
            .unwrap();
        let mut source = SourceState::new(common);
        source.add_generator(10);

        let mut output = vec![0.0f32; BLOCK_SIZE * 2];
        fixture.run(&mut source, 0, &mut output);
        // Hard left: right channel silent.
        assert!(output.chunks_exact(2).all(|f| f[1].abs() < 1e-6));
        assert!(output.chunks_exact(2).any(|f| f[0].abs() > 0.01));
    }

    #[test]
    fn source3d_attenuates_with_distance() {
        let mut fixture = Fixture::new();
        fixture.generators.insert(10, sine_generator(10));

        let common = Arc::new(ObjectCommon::new(20, ObjectType::Source3D));
        let mut source = SourceState::new(common.clone());
        source.add_generator(10);

        let energy_at = |source: &mut SourceState, fixture: &mut Fixture, pos: f64| {
            common
                .bag()
                .write(ids::POSITION, PropertyValue::Double3([0.0, pos, 0.0]), true)
                .unwrap();
            // Give the gain fade a couple of blocks to settle.
            let mut output = vec![0.0f32; BLOCK_SIZE * 2];
            for t in 0..3 {
                output.fill(0.0);
                fixture.run(source, t, &mut output);
            }
            output.iter().map(|&s| (s as f64).powi(2)).sum::<f64>()
        };

        let near = energy_at(&mut source, &mut fixture, 1.0);
        let far = energy_at(&mut source, &mut fixture, 40.0);
        assert!(near > far * 2.0, "near {near} far {far}");
    }

    #[test]
    fn routes_accumulate_into_effect_inputs() {
        use crate::effects::{EchoEffect, EffectKind};

        let mut fixture = Fixture::new();
        fixture.generators.insert(10, sine_generator(10));
        let effect_common = Arc::new(ObjectCommon::new(30, ObjectType::GlobalEcho));
        fixture.effects.insert(
            30,
            GlobalEffectState::new(effect_common, EffectKind::Echo(EchoEffect::new())),
        );

        let common = Arc::new(ObjectCommon::new(20, ObjectType::DirectSource));
        let mut source = SourceState::new(common);
        source.add_generator(10);

        fixture.router.configure_route(
            20,
            30,
            1.0,
            0,
            resona_dsp::BiquadDef::identity(),
        );

        let mut output = vec![0.0f32; BLOCK_SIZE * 2];
        fixture.run(&mut source, 0, &mut output);

        let effect = fixture.effects.get_mut(&30).unwrap();
        assert!(effect.input_mut().iter().any(|&s| s != 0.0));
    }

    #[test]
    fn lingering_source_finalizes_after_generators_end(){
        let mut fixture = Fixture::new();
        let common = Arc::new(ObjectCommon::new(20, ObjectType::DirectSource));
        let mut source = SourceState::new(common);
        source.rt.lingering = true;

        let mut output = vec![0.0f32; BLOCK_SIZE * 2];
        let mut finalized_at = None;
        for t in 0..10 {
            let result = source.run(
                t,
                &mut fixture.generators,
                &mut fixture.router,
                &mut fixture.effects,
                fixture.context_common.bag(),
                &fixture.events,
                1,
                &mut output,
            );
            if result == SourceRunResult::Finalize {
                finalized_at = Some(t);
                break;
            }
        }
        assert_eq!(finalized_at, Some(LINGER_BLOCKS as u64));
    }
}
