//! Contexts: one per audio device (or headless).
//!
//! The context owns the command queue, the event queue, and the audio
//! thread. A device-backed context runs its engine on a dedicated thread
//! that feeds the output device through a lock-free ring with a sinc
//! resampler in between; a headless context hands blocks to the caller
//! synchronously through [`Context::get_block`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use resona_core::config::{BLOCK_SIZE, SR};
use resona_core::{EngineError, EngineResult};

use crate::commands::{Command, command_queue};
use crate::engine::Engine;
use crate::events::EventSender;
use crate::objects::{Handle, ObjectCommon, ObjectType};

/// The half of a context every thread may touch.
pub struct ContextShared {
    common: Arc<ObjectCommon>,
    pub(crate) command_rx: Receiver<Command>,
    command_tx: Sender<Command>,
    pub(crate) events: EventSender,
    /// Mirrored by the audio thread after every block.
    pub(crate) block_time: AtomicU64,
    shutdown: AtomicBool,
}

impl ContextShared {
    pub fn handle(&self) -> Handle {
        self.common.handle()
    }

    pub fn common(&self) -> &Arc<ObjectCommon> {
        &self.common
    }

    pub fn events(&self) -> &EventSender {
        &self.events
    }

    /// Audio-thread time in seconds.
    pub fn current_time(&self) -> f64 {
        self.block_time.load(Ordering::Acquire) as f64 * BLOCK_SIZE as f64 / SR as f64
    }

    /// A time slightly ahead of now, safe to base fresh automation on.
    pub fn suggested_automation_time(&self) -> f64 {
        self.current_time() + 2.0 * BLOCK_SIZE as f64 / SR as f64
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

enum ContextBody {
    /// The engine runs inline under a lock; the caller pulls blocks.
    Headless(Mutex<Engine>),
    /// The engine runs on its own thread against a device.
    Device(Mutex<Option<JoinHandle<()>>>),
}

pub struct Context {
    shared: Arc<ContextShared>,
    body: ContextBody,
}

fn new_shared(handle: Handle) -> Arc<ContextShared> {
    let (command_tx, command_rx) = command_queue();
    Arc::new(ContextShared {
        common: Arc::new(ObjectCommon::new(handle, ObjectType::Context)),
        command_rx,
        command_tx,
        events: EventSender::new(),
        block_time: AtomicU64::new(0),
        shutdown: AtomicBool::new(false),
    })
}

impl Context {
    /// A context with no device; the application pulls stereo blocks.
    pub fn new_headless(handle: Handle) -> Arc<Self> {
        let shared = new_shared(handle);
        let engine = Engine::new(shared.clone());
        Arc::new(Self {
            shared,
            body: ContextBody::Headless(Mutex::new(engine)),
        })
    }

    /// A context driving the default output device.
    pub fn new_with_device(handle: Handle) -> EngineResult<Arc<Self>> {
        let shared = new_shared(handle);
        let engine = Engine::new(shared.clone());
        let thread = crate::device::spawn_device_thread(engine, shared.clone())?;
        Ok(Arc::new(Self {
            shared,
            body: ContextBody::Device(Mutex::new(Some(thread))),
        }))
    }

    pub fn shared(&self) -> &Arc<ContextShared> {
        &self.shared
    }

    pub fn handle(&self) -> Handle {
        self.shared.handle()
    }

    pub fn is_headless(&self) -> bool {
        matches!(self.body, ContextBody::Headless(_))
    }

    /// Enqueue a command for the audio thread. Parks briefly if the queue
    /// is momentarily full; it is sized so this effectively never happens.
    pub fn enqueue(&self, command: Command) -> EngineResult<()> {
        if self.shared.is_shut_down() {
            return Err(EngineError::Uninitialized);
        }
        self.shared
            .command_tx
            .send(command)
            .map_err(|_| EngineError::Internal("context command queue closed".to_string()))
    }

    /// Headless only: generate the next stereo block into `output`
    /// (`BLOCK_SIZE * 2` interleaved samples).
    pub fn get_block(&self, output: &mut [f32]) -> EngineResult<()> {
        if output.len() < BLOCK_SIZE * 2 {
            return Err(EngineError::Validation(format!(
                "output needs {} samples, got {}",
                BLOCK_SIZE * 2,
                output.len()
            )));
        }
        match &self.body {
            ContextBody::Headless(engine) => {
                engine.lock().run_block(output);
                Ok(())
            }
            ContextBody::Device(_) => Err(EngineError::NotSupported(
                "get_block requires a headless context".to_string(),
            )),
        }
    }

    /// Headless only: run `f` against the engine between blocks. Lets an
    /// embedder inspect graph state while driving blocks synchronously.
    pub fn with_engine<R>(&self, f: impl FnOnce(&mut Engine) -> R) -> Option<R> {
        match &self.body {
            ContextBody::Headless(engine) => Some(f(&mut engine.lock())),
            ContextBody::Device(_) => None,
        }
    }

    /// Stop the audio thread and drain the queues. Idempotent.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        if let ContextBody::Device(thread) = &self.body {
            if let Some(handle) = thread.lock().take() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A silent graph must output exact zeros forever.
    #[test]
    fn silent_context_outputs_zeros() {
        let context = Context::new_headless(1);
        let mut block = vec![1.0f32; BLOCK_SIZE * 2];
        for _ in 0..10 {
            context.get_block(&mut block).unwrap();
            assert!(block.iter().all(|&s| s == 0.0));
        }
        assert_eq!(context.shared().block_time.load(Ordering::Acquire), 10);
    }

    #[test]
    fn get_block_validates_output_length() {
        let context = Context::new_headless(1);
        let mut short = vec![0.0f32; 10];
        assert!(context.get_block(&mut short).is_err());
    }

    #[test]
    fn current_time_tracks_blocks() {
        let context = Context::new_headless(1);
        let mut block = vec![0.0f32; BLOCK_SIZE * 2];
        for _ in 0..5 {
            context.get_block(&mut block).unwrap();
        }
        let expected = 5.0 * BLOCK_SIZE as f64 / SR as f64;
        assert!((context.shared().current_time() - expected).abs() < 1e-12);
        assert!(context.shared().suggested_automation_time() > expected);
    }
}
