//! The pause state machine.
//!
//! ```text
//! Playing -> Pausing -> Paused      (pause)
//! Paused -> Unpausing -> Playing    (play)
//! ```
//!
//! The two intermediate states exist to introduce one-block gain fades.
//! Their ramps are handed out as `(start, per_sample_step)` pairs which
//! the owner multiplies into its own gain trajectory; pausing never
//! replaces a gain fade, the two trajectories multiply.

use resona_core::config::BLOCK_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PauseState {
    #[default]
    Playing,
    Pausing,
    Paused,
    Unpausing,
}

#[derive(Debug, Default)]
pub struct Pausable {
    state: PauseState,
}

impl Pausable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> PauseState {
        self.state
    }

    /// Fully paused objects short-circuit their processing.
    pub fn is_paused(&self) -> bool {
        self.state == PauseState::Paused
    }

    pub fn play(&mut self) {
        self.state = match self.state {
            PauseState::Paused | PauseState::Pausing => PauseState::Unpausing,
            other => other,
        };
    }

    pub fn pause(&mut self) {
        self.state = match self.state {
            PauseState::Playing | PauseState::Unpausing => PauseState::Pausing,
            other => other,
        };
    }

    /// This block's pause gain ramp, multiplied into the object's own gain
    /// per sample.
    pub fn block_ramp(&self) -> (f32, f32) {
        let step = 1.0 / BLOCK_SIZE as f32;
        match self.state {
            PauseState::Playing => (1.0, 0.0),
            PauseState::Paused => (0.0, 0.0),
            PauseState::Pausing => (1.0, -step),
            PauseState::Unpausing => (0.0, step),
        }
    }

    /// Advance the machine; call at the end of every audio tick.
    pub fn tick(&mut self) {
        self.state = match self.state {
            PauseState::Pausing => PauseState::Paused,
            PauseState::Unpausing => PauseState::Playing,
            other => other,
        };
    }
}
