//! The library instance: handle table and process-wide registries.
//!
//! The handle table is the single source of truth for object identity.
//! Handles are 64-bit, allocated monotonically, and never reused; entries
//! carry a reference count. Dropping the last reference removes the entry
//! immediately (the handle dies) and, for context-attached objects, asks
//! the owning context to take the object out of the audio graph, possibly
//! after a linger. The object's memory lives until the graph lets go of
//! its last strong reference.
//!
//! The C ABI forwards to one process-wide instance, but nothing in here
//! assumes that; embedders can hold several libraries.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use resona_core::{EngineError, EngineResult};

use crate::automation::BatchItem;
use crate::buffer::BufferData;
use crate::bytestream::{ByteStream, StreamProtocolRegistry};
use crate::commands::Command;
use crate::context::Context;
use crate::objects::{Handle, ObjectCommon, ObjectType};

/// A decoded buffer plus its handle identity.
pub struct BufferObject {
    pub common: ObjectCommon,
    pub data: Arc<BufferData>,
}

/// An opened byte stream waiting to be consumed by a decoder. One-shot:
/// taking the stream leaves the husk behind.
pub struct StreamHandleObject {
    pub common: ObjectCommon,
    pub stream: Mutex<Option<Box<dyn ByteStream>>>,
}

/// A batch of automation commands under construction.
pub struct AutomationBatchObject {
    pub common: ObjectCommon,
    pub context: Arc<Context>,
    pub items: Mutex<Vec<BatchItem>>,
}

/// What a handle refers to.
#[derive(Clone)]
pub enum ObjectRef {
    Context(Arc<Context>),
    Buffer(Arc<BufferObject>),
    Stream(Arc<StreamHandleObject>),
    Batch(Arc<AutomationBatchObject>),
    /// A context-attached DSP object (generator, source, effect).
    Attached(Arc<ObjectCommon>, Arc<Context>),
}

impl ObjectRef {
    pub fn object_type(&self) -> ObjectType {
        match self {
            ObjectRef::Context(_) => ObjectType::Context,
            ObjectRef::Buffer(_) => ObjectType::Buffer,
            ObjectRef::Stream(_) => ObjectType::StreamHandle,
            ObjectRef::Batch(_) => ObjectType::AutomationBatch,
            ObjectRef::Attached(common, _) => common.object_type(),
        }
    }

    pub fn common(&self) -> Option<&ObjectCommon> {
        match self {
            ObjectRef::Context(context) => Some(context.shared().common()),
            ObjectRef::Buffer(buffer) => Some(&buffer.common),
            ObjectRef::Stream(stream) => Some(&stream.common),
            ObjectRef::Batch(batch) => Some(&batch.common),
            ObjectRef::Attached(common, _) => Some(common),
        }
    }

    /// The context an attached object belongs to.
    pub fn context(&self) -> Option<&Arc<Context>> {
        match self {
            ObjectRef::Context(context) => Some(context),
            ObjectRef::Attached(_, context) => Some(context),
            ObjectRef::Batch(batch) => Some(&batch.context),
            _ => None,
        }
    }
}

struct HandleEntry {
    refcount: AtomicU64,
    object: ObjectRef,
}

/// A library instance.
pub struct Library {
    handles: RwLock<HashMap<Handle, HandleEntry>>,
    next_handle: AtomicU64,
    pub protocols: StreamProtocolRegistry,
}

impl Default for Library {
    fn default() -> Self {
        Self::new()
    }
}

impl Library {
    pub fn new() -> Self {
        Self {
            handles: RwLock::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            protocols: StreamProtocolRegistry::new(),
        }
    }

    /// Allocate a fresh handle; never reused for the library's lifetime.
    pub fn allocate_handle(&self) -> Handle {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }

    /// Install an object under a handle with refcount 1.
    pub fn register(&self, handle: Handle, object: ObjectRef) {
        let mut handles = self.handles.write();
        let previous = handles.insert(
            handle,
            HandleEntry {
                refcount: AtomicU64::new(1),
                object,
            },
        );
        debug_assert!(previous.is_none(), "handle {handle} reused");
    }

    pub fn get(&self, handle: Handle) -> EngineResult<ObjectRef> {
        let handles = self.handles.read();
        handles
            .get(&handle)
            .map(|entry| entry.object.clone())
            .ok_or(EngineError::InvalidHandle(handle))
    }

    pub fn is_alive(&self, handle: Handle) -> bool {
        self.handles.read().contains_key(&handle)
    }

    pub fn inc_ref(&self, handle: Handle) -> EngineResult<()> {
        let handles = self.handles.read();
        let entry = handles
            .get(&handle)
            .ok_or(EngineError::InvalidHandle(handle))?;
        entry.refcount.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Drop one reference. On the last one the handle dies and the object
    /// is scheduled out of its graph.
    pub fn dec_ref(&self, handle: Handle) -> EngineResult<()> {
        let object = {
            let mut handles = self.handles.write();
            let entry = handles
                .get(&handle)
                .ok_or(EngineError::InvalidHandle(handle))?;
            if entry.refcount.fetch_sub(1, Ordering::AcqRel) > 1 {
                return Ok(());
            }
            handles.remove(&handle).map(|entry| entry.object)
        };

        match object {
            Some(ObjectRef::Attached(common, context)) => {
                let _ = context.enqueue(Command::FinalizeHandle {
                    target: common.handle(),
                });
            }
            Some(ObjectRef::Context(context)) => {
                context.shutdown();
            }
            // Buffers, streams, and batches die with their Arc.
            _ => {}
        }
        Ok(())
    }

    /// Tear everything down: contexts are shut down and joined, every
    /// handle is released.
    pub fn shutdown(&self) {
        let entries: Vec<ObjectRef> = {
            let mut handles = self.handles.write();
            handles.drain().map(|(_, entry)| entry.object).collect()
        };
        for object in &entries {
            if let ObjectRef::Context(context) = object {
                context.shutdown();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer_object(library: &Library) -> Handle {
        let handle = library.allocate_handle();
        let data = BufferData::from_interleaved(1, &[0.0; 64]).unwrap();
        library.register(
            handle,
            ObjectRef::Buffer(Arc::new(BufferObject {
                common: ObjectCommon::new(handle, ObjectType::Buffer),
                data,
            })),
        );
        handle
    }

    #[test]
    fn handles_are_never_reused() {
        let library = Library::new();
        let a = library.allocate_handle();
        let b = library.allocate_handle();
        assert_ne!(a, b);
    }

    #[test]
    fn ref_counting_releases_on_last_dec() {
        let library = Library::new();
        let handle = buffer_object(&library);

        // One inc, two decs: alive in between, gone at the end.
        library.inc_ref(handle).unwrap();
        library.dec_ref(handle).unwrap();
        assert!(library.is_alive(handle));
        library.dec_ref(handle).unwrap();
        assert!(!library.is_alive(handle));
        assert!(matches!(
            library.dec_ref(handle),
            Err(EngineError::InvalidHandle(_))
        ));
    }

    #[test]
    fn n_incs_need_n_plus_one_decs() {
        let library = Library::new();
        let handle = buffer_object(&library);
        const N: usize = 7;
        for _ in 0..N {
            library.inc_ref(handle).unwrap();
        }
        for _ in 0..N {
            library.dec_ref(handle).unwrap();
            assert!(library.is_alive(handle));
        }
        library.dec_ref(handle).unwrap();
        assert!(!library.is_alive(handle));
    }

    #[test]
    fn unknown_handles_error() {
        let library = Library::new();
        assert!(matches!(
            library.get(12345),
            Err(EngineError::InvalidHandle(12345))
        ));
        assert!(library.inc_ref(12345).is_err());
    }
}
