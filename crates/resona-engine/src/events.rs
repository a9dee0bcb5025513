//! Events out of the engine.
//!
//! The audio thread enqueues events onto a lock-free queue; client threads
//! dequeue them through the C ABI. Every pending event carries the set of
//! handles it references; at dequeue time the reader re-checks that all of
//! them are still alive and silently drops the event otherwise, so user
//! callbacks never observe a dangling handle. Handles are never reused,
//! which makes a handle-table lookup a sound liveness check.

use crossbeam_channel::{Receiver, Sender, unbounded};
use smallvec::SmallVec;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::objects::Handle;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A generator or source ran out of audio.
    Finished,
    /// A looping generator wrapped around.
    Looped,
    /// A scheduled user automation event fired.
    UserAutomation { param: u64 },
}

/// A fired event.
#[derive(Debug, Clone, Copy)]
pub struct Event {
    pub kind: EventKind,
    pub source: Handle,
    pub context: Handle,
}

pub(crate) type HandleRefs = SmallVec<[Handle; 4]>;

struct PendingEvent {
    event: Event,
    referenced: HandleRefs,
}

/// The queue half-pair plus the enabled flag. Events are dropped at the
/// door while disabled so an application that never reads them cannot leak
/// queue memory.
pub struct EventSender {
    tx: Sender<PendingEvent>,
    rx: Receiver<PendingEvent>,
    enabled: AtomicBool,
}

impl Default for EventSender {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSender {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            enabled: AtomicBool::new(false),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Enqueue an event referencing the given handles (the source and
    /// context at minimum).
    pub(crate) fn enqueue(&self, event: Event, referenced: HandleRefs) {
        if !self.is_enabled() {
            return;
        }
        let _ = self.tx.send(PendingEvent { event, referenced });
    }

    pub(crate) fn enqueue_simple(&self, kind: EventKind, source: Handle, context: Handle) {
        let mut referenced = HandleRefs::new();
        referenced.push(source);
        referenced.push(context);
        self.enqueue(
            Event {
                kind,
                source,
                context,
            },
            referenced,
        );
    }

    /// Dequeue the next event whose referenced handles are all still alive
    /// per `is_alive`. Dead-referencing events are discarded.
    pub fn next_event(&self, is_alive: impl Fn(Handle) -> bool) -> Option<Event> {
        while let Ok(pending) = self.rx.try_recv() {
            if pending.referenced.iter().all(|&h| is_alive(h)) {
                return Some(pending.event);
            }
        }
        None
    }
}
