//! Source-to-effect routing.
//!
//! A route connects one writer (a source) to one reader (a global effect).
//! Routes live in a vector sorted by `(writer, reader)` so lookups and
//! per-writer runs are bisections. Every route carries fade state; gain is
//! applied on the writer's side from the ramp this module computes, which
//! guarantees no gain discontinuity on configure, reconfigure, or removal.

use resona_core::config::BLOCK_SIZE;
use resona_dsp::CrossfadingBiquad;
use resona_dsp::filter_design::BiquadDef;

use crate::objects::Handle;

/// How often, in blocks, the router sweeps out dead routes on its own.
const FILTER_BLOCK_COUNT: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteState {
    /// Created and fading in.
    FadeIn,
    /// At steady gain.
    Steady,
    /// Gain changed; crossfading from the previous gain over one block.
    GainChanged,
    /// Fading out; will die.
    FadeOut,
    /// Dead; removed at the next sweep.
    Dead,
}

pub struct Route {
    pub writer: Handle,
    pub reader: Handle,
    pub state: RouteState,
    /// Router-time block of the last state transition.
    pub last_state_changed: u64,
    pub fade_in_blocks: u32,
    pub fade_out_blocks: u32,
    pub gain: f32,
    pub prev_gain: f32,
    /// Per-route filter applied to audio flowing through this route.
    pub filter: CrossfadingBiquad,
}

impl Route {
    /// Whether configuration changes should still take effect; a dying
    /// route refuses them.
    fn can_configure(&self) -> bool {
        self.state != RouteState::Dead && self.state != RouteState::FadeOut
    }

    fn set_state(&mut self, state: RouteState, time: u64) {
        self.state = state;
        self.last_state_changed = time;
    }

    fn set_gain(&mut self, gain: f32, time: u64) {
        if self.state == RouteState::FadeIn || self.state == RouteState::GainChanged {
            self.gain = gain;
            return;
        }
        self.prev_gain = self.gain;
        self.gain = gain;
        self.set_state(RouteState::GainChanged, time);
    }

    /// The `(start, per_sample_step)` gain ramp for the block at router
    /// time `time`, or `None` when no audio should flow.
    pub fn block_gain(&self, time: u64) -> Option<(f32, f32)> {
        let elapsed = time.saturating_sub(self.last_state_changed);
        match self.state {
            RouteState::Dead => None,
            RouteState::Steady => Some((self.gain, 0.0)),
            RouteState::FadeIn => {
                let fade = self.fade_in_blocks.max(1) as f32;
                let p0 = (elapsed as f32 / fade).min(1.0);
                let p1 = ((elapsed + 1) as f32 / fade).min(1.0);
                let start = self.gain * p0;
                Some((start, (self.gain * p1 - start) / BLOCK_SIZE as f32))
            }
            RouteState::GainChanged => {
                // One-block crossfade from the previous gain.
                let start = self.prev_gain;
                Some((start, (self.gain - start) / BLOCK_SIZE as f32))
            }
            RouteState::FadeOut => {
                let fade = self.fade_out_blocks.max(1) as f32;
                let p0 = (elapsed as f32 / fade).min(1.0);
                let p1 = ((elapsed + 1) as f32 / fade).min(1.0);
                let start = self.gain * (1.0 - p0);
                Some((start, (self.gain * (1.0 - p1) - start) / BLOCK_SIZE as f32))
            }
        }
    }
}

/// The routing table.
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
    time: u64,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn time(&self) -> u64 {
        self.time
    }

    fn position_for(&self, writer: Handle, reader: Handle) -> Result<usize, usize> {
        self.routes
            .binary_search_by(|route| (route.writer, route.reader).cmp(&(writer, reader)))
    }

    /// Declarative configure: create the route fading in, or update its
    /// gain with a one-block crossfade if it already exists.
    pub fn configure_route(
        &mut self,
        writer: Handle,
        reader: Handle,
        gain: f32,
        fade_in: u32,
        filter: BiquadDef,
    ) {
        match self.position_for(writer, reader) {
            Ok(index) => {
                let time = self.time;
                let route = &mut self.routes[index];
                if route.can_configure() {
                    route.set_gain(gain, time);
                    route.filter.configure(filter);
                    return;
                }
                // Dying route: replace it outright, fading back in.
                let mut route = Route {
                    writer,
                    reader,
                    state: RouteState::FadeIn,
                    last_state_changed: time,
                    fade_in_blocks: fade_in,
                    fade_out_blocks: 1,
                    gain,
                    prev_gain: 0.0,
                    filter: CrossfadingBiquad::new(),
                };
                route.filter.configure(filter);
                if fade_in == 0 {
                    route.set_state(RouteState::Steady, time);
                }
                self.routes[index] = route;
            }
            Err(index) => {
                let mut route = Route {
                    writer,
                    reader,
                    state: if fade_in == 0 {
                        RouteState::Steady
                    } else {
                        RouteState::FadeIn
                    },
                    last_state_changed: self.time,
                    fade_in_blocks: fade_in,
                    fade_out_blocks: 1,
                    gain,
                    prev_gain: 0.0,
                    filter: CrossfadingBiquad::new(),
                };
                route.filter.configure(filter);
                self.routes.insert(index, route);
            }
        }
    }

    /// Begin removing a route; no-op if absent.
    pub fn remove_route(&mut self, writer: Handle, reader: Handle, fade_out: u32) {
        let time = self.time;
        if let Ok(index) = self.position_for(writer, reader) {
            Self::deprovision(&mut self.routes[index], fade_out, time);
        }
    }

    /// Begin removing every route for a writer.
    pub fn remove_all_routes(&mut self, writer: Handle, fade_out: u32) {
        let time = self.time;
        for route in self.run_for_writer_mut(writer) {
            Self::deprovision(route, fade_out, time);
        }
    }

    fn deprovision(route: &mut Route, fade_out: u32, time: u64) {
        if route.can_configure() {
            route.set_state(
                if fade_out != 0 {
                    RouteState::FadeOut
                } else {
                    RouteState::Dead
                },
                time,
            );
            route.fade_out_blocks = fade_out;
        }
    }

    /// All live routes whose writer is `writer`, in reader order.
    pub fn run_for_writer(&self, writer: Handle) -> &[Route] {
        let start = self.routes.partition_point(|r| r.writer < writer);
        let end = self.routes.partition_point(|r| r.writer <= writer);
        &self.routes[start..end]
    }

    fn run_for_writer_mut(&mut self, writer: Handle) -> &mut [Route] {
        let start = self.routes.partition_point(|r| r.writer < writer);
        let end = self.routes.partition_point(|r| r.writer <= writer);
        &mut self.routes[start..end]
    }

    pub fn run_for_writer_indices(&self, writer: Handle) -> std::ops::Range<usize> {
        let start = self.routes.partition_point(|r| r.writer < writer);
        let end = self.routes.partition_point(|r| r.writer <= writer);
        start..end
    }

    pub fn route_at(&mut self, index: usize) -> &mut Route {
        &mut self.routes[index]
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// A reader (effect) disappeared: drop its routes immediately.
    pub fn unregister_reader(&mut self, reader: Handle) {
        self.routes
            .retain(|r| r.reader != reader && r.state != RouteState::Dead);
    }

    /// A writer (source) disappeared: drop its routes immediately.
    pub fn unregister_writer(&mut self, writer: Handle) {
        self.routes
            .retain(|r| r.writer != writer && r.state != RouteState::Dead);
    }

    /// Advance router time, progress fade state machines, and periodically
    /// sweep out dead routes.
    pub fn finish_block(&mut self) {
        self.time += 1;
        let time = self.time;
        for route in &mut self.routes {
            let elapsed = time.saturating_sub(route.last_state_changed);
            match route.state {
                RouteState::FadeIn if elapsed >= route.fade_in_blocks.max(1) as u64 => {
                    route.set_state(RouteState::Steady, time);
                }
                RouteState::GainChanged if elapsed >= 1 => {
                    route.prev_gain = route.gain;
                    route.set_state(RouteState::Steady, time);
                }
                RouteState::FadeOut if elapsed >= route.fade_out_blocks.max(1) as u64 => {
                    route.set_state(RouteState::Dead, time);
                }
                _ => {}
            }
        }
        if self.time % FILTER_BLOCK_COUNT == 0 {
            self.routes.retain(|r| r.state != RouteState::Dead);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> BiquadDef {
        BiquadDef::identity()
    }

    #[test]
    fn configure_creates_sorted_routes() {
        let mut router = Router::new();
        router.configure_route(2, 10, 1.0, 1, identity());
        router.configure_route(1, 11, 1.0, 1, identity());
        router.configure_route(1, 10, 1.0, 1, identity());

        let keys: Vec<_> = router.routes().iter().map(|r| (r.writer, r.reader)).collect();
        assert_eq!(keys, vec![(1, 10), (1, 11), (2, 10)]);
        assert_eq!(router.run_for_writer(1).len(), 2);
        assert_eq!(router.run_for_writer(2).len(), 1);
        assert_eq!(router.run_for_writer(3).len(), 0);
    }

    #[test]
    fn fade_in_ramps_from_zero() {
        let mut router = Router::new();
        router.configure_route(1, 10, 0.8, 2, identity());
        let route = &router.run_for_writer(1)[0];
        let (start, step) = route.block_gain(router.time()).unwrap();
        assert_eq!(start, 0.0);
        assert!(step > 0.0);

        router.finish_block();
        router.finish_block();
        let route = &router.run_for_writer(1)[0];
        assert_eq!(route.state, RouteState::Steady);
        assert_eq!(route.block_gain(router.time()), Some((0.8, 0.0)));
    }

    #[test]
    fn reconfigure_crossfades_gain() {
        let mut router = Router::new();
        router.configure_route(1, 10, 1.0, 0, identity());
        assert_eq!(router.run_for_writer(1)[0].state, RouteState::Steady);

        router.configure_route(1, 10, 0.5, 0, identity());
        let route = &router.run_for_writer(1)[0];
        assert_eq!(route.state, RouteState::GainChanged);
        let (start, step) = route.block_gain(router.time()).unwrap();
        assert_eq!(start, 1.0);
        let end = start + step * BLOCK_SIZE as f32;
        assert!((end - 0.5).abs() < 1e-6);

        router.finish_block();
        assert_eq!(router.run_for_writer(1)[0].state, RouteState::Steady);
    }

    #[test]
    fn remove_all_routes_dies_within_fade_plus_one() {
        let mut router = Router::new();
        for reader in 10..15 {
            router.configure_route(1, reader, 1.0, 1, identity());
        }
        router.finish_block();

        let fade_out = 3;
        router.remove_all_routes(1, fade_out);
        for _ in 0..fade_out + 1 {
            router.finish_block();
        }
        for route in router.routes() {
            assert!(
                route.writer != 1 || route.state == RouteState::Dead,
                "route to {} still {:?}",
                route.reader,
                route.state
            );
        }
    }

    #[test]
    fn dead_routes_are_swept_periodically() {
        let mut router = Router::new();
        router.configure_route(1, 10, 1.0, 1, identity());
        router.remove_route(1, 10, 0);
        assert_eq!(router.routes().len(), 1);
        for _ in 0..FILTER_BLOCK_COUNT {
            router.finish_block();
        }
        assert_eq!(router.routes().len(), 0);
    }

    #[test]
    fn dying_routes_refuse_configuration() {
        let mut router = Router::new();
        router.configure_route(1, 10, 1.0, 1, identity());
        router.remove_route(1, 10, 4);
        let state_before = router.run_for_writer(1)[0].state;
        assert_eq!(state_before, RouteState::FadeOut);
        // Reconfiguring a fading-out route replaces it with a fresh one.
        router.configure_route(1, 10, 0.7, 1, identity());
        let route = &router.run_for_writer(1)[0];
        assert_eq!(route.state, RouteState::FadeIn);
        assert_eq!(route.gain, 0.7);
    }

    #[test]
    fn unregister_drops_immediately() {
        let mut router = Router::new();
        router.configure_route(1, 10, 1.0, 1, identity());
        router.configure_route(2, 10, 1.0, 1, identity());
        router.configure_route(2, 11, 1.0, 1, identity());
        router.unregister_reader(10);
        assert_eq!(router.routes().len(), 1);
        router.unregister_writer(2);
        assert_eq!(router.routes().len(), 0);
    }
}
