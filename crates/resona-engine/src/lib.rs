//! resona-engine: the Resona audio engine
//!
//! Everything above the DSP kernels: the property/automation system, the
//! command queue, generators, sources, the router, global effects, the
//! context block pipeline, device output, the handle table, and the C ABI.
//!
//! ## Threading model
//! - The context thread exclusively owns all DSP state.
//! - Client threads talk to it through the bounded command queue and read
//!   properties through lock-free cells.
//! - Each streaming generator runs one background decode thread.
//!
//! The embedding surface for Rust callers is [`api`]; the C surface lives
//! in [`ffi`].

pub mod api;
pub mod automation;
pub mod buffer;
pub mod bytestream;
pub mod commands;
pub mod context;
pub mod decoding;
pub mod device;
pub mod effects;
pub mod engine;
pub mod events;
pub mod fade;
pub mod ffi;
pub mod generators;
pub mod library;
pub mod objects;
pub mod pause;
pub mod properties;
pub mod router;
pub mod runtime;
pub mod sources;

pub use context::Context;
pub use events::{Event, EventKind};
pub use library::Library;
pub use objects::{Handle, ObjectType};
pub use properties::{PropertyValue, ids};
