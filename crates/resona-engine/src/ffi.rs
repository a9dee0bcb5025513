//! C ABI.
//!
//! Thin wrappers over [`crate::api`]: every function returns an integer
//! error code (0 on success) and stashes the failure message in
//! thread-local storage for `rsn_get_last_error_message`. Out-parameters
//! are written only on success; a failing create writes handle 0.
//!
//! The ABI forwards to one process-wide [`Library`] created by
//! `rsn_initialize`, but the engine itself never assumes a singleton.

#![allow(clippy::not_unsafe_ptr_arg_deref)] // FFI functions receive raw pointers from C

use parking_lot::RwLock;
use std::cell::RefCell;
use std::ffi::{CStr, c_char};
use std::sync::Arc;

use resona_core::{EngineError, EngineResult};
use resona_dsp::filter_design::{BiquadDef, DEFAULT_Q};

use crate::api::{self, RouteConfig};
use crate::automation::{AutomationPoint, InterpolationKind};
use crate::bytestream::ByteStream;
use crate::effects::EchoTapConfig;
use crate::events::EventKind;
use crate::library::Library;
use crate::objects::Handle;
use crate::properties::PropertyValue;

static LIBRARY: RwLock<Option<Arc<Library>>> = RwLock::new(None);

thread_local! {
    static LAST_ERROR: RefCell<Option<(i32, String)>> = const { RefCell::new(None) };
}

fn library() -> EngineResult<Arc<Library>> {
    LIBRARY
        .read()
        .clone()
        .ok_or(EngineError::Uninitialized)
}

/// Translate a result into an error code, stashing the message.
fn translate<T>(result: EngineResult<T>, out: impl FnOnce(T)) -> i32 {
    match result {
        Ok(value) => {
            out(value);
            0
        }
        Err(e) => {
            let code = e.code();
            LAST_ERROR.with(|slot| *slot.borrow_mut() = Some((code, e.to_string())));
            code
        }
    }
}

fn cstr_arg(ptr: *const c_char, name: &str) -> EngineResult<String> {
    if ptr.is_null() {
        return Err(EngineError::Validation(format!("{name} must not be null")));
    }
    let s = unsafe { CStr::from_ptr(ptr) };
    s.to_str()
        .map(|s| s.to_string())
        .map_err(|_| EngineError::Validation(format!("{name} is not valid UTF-8")))
}

unsafe fn write_out<T>(out: *mut T, value: T) {
    if !out.is_null() {
        unsafe { *out = value };
    }
}

// ---- Library lifecycle ----

#[unsafe(no_mangle)]
pub extern "C" fn rsn_initialize() -> i32 {
    let mut library = LIBRARY.write();
    if library.is_none() {
        *library = Some(Arc::new(Library::new()));
    }
    0
}

pub const RSN_LOG_LEVEL_ERROR: i32 = 0;
pub const RSN_LOG_LEVEL_WARN: i32 = 1;
pub const RSN_LOG_LEVEL_INFO: i32 = 2;
pub const RSN_LOG_LEVEL_DEBUG: i32 = 3;

/// Library-wide configuration applied at initialization.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RsnLibraryConfig {
    pub log_level: i32,
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_initialize_with_config(config: *const RsnLibraryConfig) -> i32 {
    if !config.is_null() {
        let config = unsafe { *config };
        let level = match config.log_level {
            RSN_LOG_LEVEL_ERROR => log::LevelFilter::Error,
            RSN_LOG_LEVEL_WARN => log::LevelFilter::Warn,
            RSN_LOG_LEVEL_INFO => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        };
        log::set_max_level(level);
    }
    rsn_initialize()
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_shutdown() -> i32 {
    if let Some(library) = LIBRARY.write().take() {
        library.shutdown();
    }
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_get_last_error_code() -> i32 {
    LAST_ERROR.with(|slot| slot.borrow().as_ref().map(|(code, _)| *code).unwrap_or(0))
}

/// Pointer is valid until the next failing call on this thread.
#[unsafe(no_mangle)]
pub extern "C" fn rsn_get_last_error_message(
    out: *mut *const c_char,
    out_len: *mut usize,
) -> i32 {
    LAST_ERROR.with(|slot| {
        let borrowed = slot.borrow();
        let message = borrowed.as_ref().map(|(_, m)| m.as_str()).unwrap_or("");
        unsafe {
            write_out(out, message.as_ptr() as *const c_char);
            write_out(out_len, message.len());
        }
    });
    0
}

// ---- Handles ----

#[unsafe(no_mangle)]
pub extern "C" fn rsn_handle_inc_ref(handle: u64) -> i32 {
    translate(library().and_then(|l| l.inc_ref(handle)), |_| {})
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_handle_dec_ref(handle: u64) -> i32 {
    translate(library().and_then(|l| l.dec_ref(handle)), |_| {})
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_handle_get_object_type(out: *mut i32, handle: u64) -> i32 {
    translate(
        library().and_then(|l| l.get(handle)).map(|o| o.object_type()),
        |t| unsafe { write_out(out, t as i32) },
    )
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_handle_get_userdata(out: *mut u64, handle: u64) -> i32 {
    translate(
        library().and_then(|l| {
            let object = l.get(handle)?;
            let common = object
                .common()
                .ok_or_else(|| EngineError::HandleType("object has no userdata".to_string()))?;
            Ok(common.userdata())
        }),
        |u| unsafe { write_out(out, u) },
    )
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_handle_set_userdata(handle: u64, userdata: u64) -> i32 {
    translate(
        library().and_then(|l| {
            let object = l.get(handle)?;
            let common = object
                .common()
                .ok_or_else(|| EngineError::HandleType("object has no userdata".to_string()))?;
            common.set_userdata(userdata);
            Ok(())
        }),
        |_| {},
    )
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_config_delete_behavior(handle: u64, linger: i32, linger_timeout: f64) -> i32 {
    translate(
        library().and_then(|l| api::config_delete_behavior(&l, handle, linger != 0, linger_timeout)),
        |_| {},
    )
}

// ---- Contexts ----

#[unsafe(no_mangle)]
pub extern "C" fn rsn_create_context(out: *mut u64) -> i32 {
    unsafe { write_out(out, 0) };
    translate(library().and_then(|l| api::create_context(&l)), |h| unsafe {
        write_out(out, h)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_create_context_headless(out: *mut u64) -> i32 {
    unsafe { write_out(out, 0) };
    translate(
        library().and_then(|l| api::create_context_headless(&l)),
        |h| unsafe { write_out(out, h) },
    )
}

/// Headless only: render the next block of interleaved stereo floats.
/// `block` must hold `2 * BLOCK_SIZE` samples.
#[unsafe(no_mangle)]
pub extern "C" fn rsn_context_get_block(context: u64, block: *mut f32) -> i32 {
    translate(
        library().and_then(|l| {
            if block.is_null() {
                return Err(EngineError::Validation("block must not be null".to_string()));
            }
            let out = unsafe {
                std::slice::from_raw_parts_mut(block, resona_core::config::BLOCK_SIZE * 2)
            };
            api::context_get_block(&l, context, out)
        }),
        |_| {},
    )
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_context_enable_events(context: u64) -> i32 {
    translate(
        library().and_then(|l| api::context_enable_events(&l, context)),
        |_| {},
    )
}

/// One delivered event. `event_type` 0 means "no event pending".
#[repr(C)]
#[derive(Default, Clone, Copy)]
pub struct RsnEvent {
    pub event_type: i32,
    pub source: u64,
    pub context: u64,
    /// Parameter of a user automation event.
    pub param: u64,
}

pub const RSN_EVENT_TYPE_INVALID: i32 = 0;
pub const RSN_EVENT_TYPE_FINISHED: i32 = 1;
pub const RSN_EVENT_TYPE_LOOPED: i32 = 2;
pub const RSN_EVENT_TYPE_USER_AUTOMATION: i32 = 3;

#[unsafe(no_mangle)]
pub extern "C" fn rsn_context_get_next_event(out: *mut RsnEvent, context: u64) -> i32 {
    unsafe { write_out(out, RsnEvent::default()) };
    translate(
        library().and_then(|l| {
            let event = api::context_get_next_event(&l, context)?;
            Ok(event.map(|event| {
                // The receiver owns a reference on every named handle
                // until rsn_event_deinit.
                let _ = l.inc_ref(event.source);
                let _ = l.inc_ref(event.context);
                let (event_type, param) = match event.kind {
                    EventKind::Finished => (RSN_EVENT_TYPE_FINISHED, 0),
                    EventKind::Looped => (RSN_EVENT_TYPE_LOOPED, 0),
                    EventKind::UserAutomation { param } => {
                        (RSN_EVENT_TYPE_USER_AUTOMATION, param)
                    }
                };
                RsnEvent {
                    event_type,
                    source: event.source,
                    context: event.context,
                    param,
                }
            }))
        }),
        |event| {
            if let Some(event) = event {
                unsafe { write_out(out, event) };
            }
        },
    )
}

/// Release the handle references an event carries.
#[unsafe(no_mangle)]
pub extern "C" fn rsn_event_deinit(event: *mut RsnEvent) -> i32 {
    if event.is_null() {
        return 0;
    }
    let event = unsafe { &mut *event };
    if event.event_type == RSN_EVENT_TYPE_INVALID {
        return 0;
    }
    if let Ok(library) = library() {
        let _ = library.dec_ref(event.source);
        let _ = library.dec_ref(event.context);
    }
    event.event_type = RSN_EVENT_TYPE_INVALID;
    0
}

// ---- Properties ----

#[unsafe(no_mangle)]
pub extern "C" fn rsn_set_i(target: u64, property: u32, value: i64) -> i32 {
    translate(
        library().and_then(|l| api::set_property(&l, target, property, PropertyValue::Int(value))),
        |_| {},
    )
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_get_i(out: *mut i64, target: u64, property: u32) -> i32 {
    translate(
        library().and_then(|l| match api::get_property(&l, target, property)? {
            PropertyValue::Int(v) => Ok(v),
            _ => Err(EngineError::PropertyType("property is not an int".to_string())),
        }),
        |v| unsafe { write_out(out, v) },
    )
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_set_d(target: u64, property: u32, value: f64) -> i32 {
    translate(
        library()
            .and_then(|l| api::set_property(&l, target, property, PropertyValue::Double(value))),
        |_| {},
    )
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_get_d(out: *mut f64, target: u64, property: u32) -> i32 {
    translate(
        library().and_then(|l| match api::get_property(&l, target, property)? {
            PropertyValue::Double(v) => Ok(v),
            _ => Err(EngineError::PropertyType(
                "property is not a double".to_string(),
            )),
        }),
        |v| unsafe { write_out(out, v) },
    )
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_set_d3(target: u64, property: u32, x: f64, y: f64, z: f64) -> i32 {
    translate(
        library().and_then(|l| {
            api::set_property(&l, target, property, PropertyValue::Double3([x, y, z]))
        }),
        |_| {},
    )
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_get_d3(
    out_x: *mut f64,
    out_y: *mut f64,
    out_z: *mut f64,
    target: u64,
    property: u32,
) -> i32 {
    translate(
        library().and_then(|l| match api::get_property(&l, target, property)? {
            PropertyValue::Double3(v) => Ok(v),
            _ => Err(EngineError::PropertyType(
                "property is not a double3".to_string(),
            )),
        }),
        |v| unsafe {
            write_out(out_x, v[0]);
            write_out(out_y, v[1]);
            write_out(out_z, v[2]);
        },
    )
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_set_d6(target: u64, property: u32, values: *const f64) -> i32 {
    translate(
        library().and_then(|l| {
            if values.is_null() {
                return Err(EngineError::Validation("values must not be null".to_string()));
            }
            let values = unsafe { std::slice::from_raw_parts(values, 6) };
            let mut array = [0.0; 6];
            array.copy_from_slice(values);
            api::set_property(&l, target, property, PropertyValue::Double6(array))
        }),
        |_| {},
    )
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_get_d6(out: *mut f64, target: u64, property: u32) -> i32 {
    translate(
        library().and_then(|l| match api::get_property(&l, target, property)? {
            PropertyValue::Double6(v) => Ok(v),
            _ => Err(EngineError::PropertyType(
                "property is not a double6".to_string(),
            )),
        }),
        |v| {
            if !out.is_null() {
                let out = unsafe { std::slice::from_raw_parts_mut(out, 6) };
                out.copy_from_slice(&v);
            }
        },
    )
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_set_o(target: u64, property: u32, object: u64) -> i32 {
    translate(
        library().and_then(|l| {
            api::set_property(&l, target, property, PropertyValue::ObjectHandle(object))
        }),
        |_| {},
    )
}

/// Biquad configuration as it crosses the ABI.
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct RsnBiquadConfig {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl From<RsnBiquadConfig> for BiquadDef {
    fn from(config: RsnBiquadConfig) -> Self {
        BiquadDef {
            b0: config.b0,
            b1: config.b1,
            b2: config.b2,
            a1: config.a1,
            a2: config.a2,
        }
    }
}

impl From<BiquadDef> for RsnBiquadConfig {
    fn from(def: BiquadDef) -> Self {
        Self {
            b0: def.b0,
            b1: def.b1,
            b2: def.b2,
            a1: def.a1,
            a2: def.a2,
        }
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_set_biquad(target: u64, property: u32, config: *const RsnBiquadConfig) -> i32 {
    translate(
        library().and_then(|l| {
            if config.is_null() {
                return Err(EngineError::Validation("config must not be null".to_string()));
            }
            let config = unsafe { *config };
            api::set_property(&l, target, property, PropertyValue::Biquad(config.into()))
        }),
        |_| {},
    )
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_get_biquad(out: *mut RsnBiquadConfig, target: u64, property: u32) -> i32 {
    translate(
        library().and_then(|l| match api::get_property(&l, target, property)? {
            PropertyValue::Biquad(def) => Ok(def),
            _ => Err(EngineError::PropertyType(
                "property is not a biquad".to_string(),
            )),
        }),
        |def| unsafe { write_out(out, def.into()) },
    )
}

// ---- Biquad designers ----

#[unsafe(no_mangle)]
pub extern "C" fn rsn_biquad_design_identity(out: *mut RsnBiquadConfig) -> i32 {
    unsafe { write_out(out, BiquadDef::identity().into()) };
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_biquad_design_lowpass(out: *mut RsnBiquadConfig, frequency: f64, q: f64) -> i32 {
    let q = if q > 0.0 { q } else { DEFAULT_Q };
    unsafe { write_out(out, BiquadDef::lowpass(frequency, q).into()) };
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_biquad_design_highpass(
    out: *mut RsnBiquadConfig,
    frequency: f64,
    q: f64,
) -> i32 {
    let q = if q > 0.0 { q } else { DEFAULT_Q };
    unsafe { write_out(out, BiquadDef::highpass(frequency, q).into()) };
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_biquad_design_bandpass(
    out: *mut RsnBiquadConfig,
    frequency: f64,
    bandwidth: f64,
) -> i32 {
    unsafe { write_out(out, BiquadDef::bandpass(frequency, bandwidth).into()) };
    0
}

// ---- Streams ----

/// Custom stream callbacks, C flavored. `read` returns bytes read through
/// `wrote`; `seek` is optional; `close` and `destroy` are optional.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RsnCustomStreamDef {
    pub read_cb: Option<
        extern "C" fn(wrote: *mut u64, requested: u64, dst: *mut u8, userdata: *mut std::ffi::c_void) -> i32,
    >,
    pub seek_cb:
        Option<extern "C" fn(pos: u64, userdata: *mut std::ffi::c_void) -> i32>,
    pub close_cb: Option<extern "C" fn(userdata: *mut std::ffi::c_void) -> i32>,
    /// Total length in bytes, or -1 when unknown.
    pub length: i64,
    pub userdata: *mut std::ffi::c_void,
}

struct CustomStream {
    def: RsnCustomStreamDef,
}

// The callback contract requires the callbacks to be callable from any
// thread; the userdata pointer travels with them.
unsafe impl Send for CustomStream {}
unsafe impl Sync for CustomStream {}

impl Drop for CustomStream {
    fn drop(&mut self) {
        if let Some(close) = self.def.close_cb {
            close(self.def.userdata);
        }
    }
}

impl ByteStream for CustomStream {
    fn read(&mut self, buf: &mut [u8]) -> EngineResult<usize> {
        let read = self
            .def
            .read_cb
            .ok_or_else(|| EngineError::Validation("stream has no read callback".to_string()))?;
        let mut wrote = 0u64;
        let code = read(
            &mut wrote,
            buf.len() as u64,
            buf.as_mut_ptr(),
            self.def.userdata,
        );
        if code != 0 {
            return Err(EngineError::ByteStreamCustom(format!(
                "read callback failed with code {code}"
            )));
        }
        Ok(wrote as usize)
    }

    fn seek(&mut self, pos: u64) -> EngineResult<()> {
        let seek = self
            .def
            .seek_cb
            .ok_or(EngineError::ByteStreamUnsupportedOperation("seek"))?;
        let code = seek(pos, self.def.userdata);
        if code != 0 {
            return Err(EngineError::ByteStreamCustom(format!(
                "seek callback failed with code {code}"
            )));
        }
        Ok(())
    }

    fn supports_seek(&self) -> bool {
        self.def.seek_cb.is_some() && self.def.length >= 0
    }

    fn len(&self) -> Option<u64> {
        (self.def.length >= 0).then_some(self.def.length as u64)
    }
}

/// Protocol opener: fills `def` for `(protocol, path, param)`; returns 0
/// on success.
pub type RsnProtocolOpenCallback = extern "C" fn(
    def: *mut RsnCustomStreamDef,
    protocol: *const c_char,
    path: *const c_char,
    param: u64,
    userdata: *mut std::ffi::c_void,
) -> i32;

/// Userdata pointer handed to a protocol opener; the registrant promises
/// thread safety.
struct ProtocolUserdata(*mut std::ffi::c_void);
unsafe impl Send for ProtocolUserdata {}
unsafe impl Sync for ProtocolUserdata {}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_register_stream_protocol(
    name: *const c_char,
    open_cb: RsnProtocolOpenCallback,
    userdata: *mut std::ffi::c_void,
) -> i32 {
    translate(
        library().and_then(|l| {
            let name = cstr_arg(name, "name")?;
            let protocol_name = name.clone();
            let userdata = ProtocolUserdata(userdata);
            l.protocols.register(
                &name,
                Box::new(move |path, param| {
                    let userdata = &userdata;
                    let protocol = std::ffi::CString::new(protocol_name.as_str())
                        .map_err(|_| EngineError::Validation("bad protocol name".to_string()))?;
                    let path = std::ffi::CString::new(path)
                        .map_err(|_| EngineError::Validation("path contains NUL".to_string()))?;
                    let mut def = RsnCustomStreamDef {
                        read_cb: None,
                        seek_cb: None,
                        close_cb: None,
                        length: -1,
                        userdata: std::ptr::null_mut(),
                    };
                    let code = open_cb(
                        &mut def,
                        protocol.as_ptr(),
                        path.as_ptr(),
                        param,
                        userdata.0,
                    );
                    if code != 0 {
                        return Err(EngineError::ByteStreamCustom(format!(
                            "protocol open callback failed with code {code}"
                        )));
                    }
                    Ok(Box::new(CustomStream { def }) as Box<dyn ByteStream>)
                }),
            );
            Ok(())
        }),
        |_| {},
    )
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_create_stream_handle_from_custom_stream(
    out: *mut u64,
    def: *const RsnCustomStreamDef,
) -> i32 {
    unsafe { write_out(out, 0) };
    translate(
        library().and_then(|l| {
            if def.is_null() {
                return Err(EngineError::Validation("def must not be null".to_string()));
            }
            let def = unsafe { *def };
            Ok(api::create_stream_handle(&l, Box::new(CustomStream { def })))
        }),
        |h| unsafe { write_out(out, h) },
    )
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_create_stream_handle_from_memory(
    out: *mut u64,
    data: *const u8,
    length: u64,
) -> i32 {
    unsafe { write_out(out, 0) };
    translate(
        library().and_then(|l| {
            if data.is_null() {
                return Err(EngineError::Validation("data must not be null".to_string()));
            }
            let bytes = unsafe { std::slice::from_raw_parts(data, length as usize) };
            Ok(api::create_stream_handle_from_memory(&l, bytes))
        }),
        |h| unsafe { write_out(out, h) },
    )
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_create_stream_handle_from_file(out: *mut u64, path: *const c_char) -> i32 {
    unsafe { write_out(out, 0) };
    translate(
        library().and_then(|l| {
            let path = cstr_arg(path, "path")?;
            api::create_stream_handle_from_file(&l, &path)
        }),
        |h| unsafe { write_out(out, h) },
    )
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_create_stream_handle_from_stream_params(
    out: *mut u64,
    protocol: *const c_char,
    path: *const c_char,
    param: u64,
) -> i32 {
    unsafe { write_out(out, 0) };
    translate(
        library().and_then(|l| {
            let protocol = cstr_arg(protocol, "protocol")?;
            let path = cstr_arg(path, "path")?;
            api::create_stream_handle_from_stream_params(&l, &protocol, &path, param)
        }),
        |h| unsafe { write_out(out, h) },
    )
}

// ---- Buffers ----

#[unsafe(no_mangle)]
pub extern "C" fn rsn_create_buffer_from_float_array(
    out: *mut u64,
    sample_rate: u32,
    channels: u32,
    frames: u64,
    data: *const f32,
) -> i32 {
    unsafe { write_out(out, 0) };
    translate(
        library().and_then(|l| {
            if data.is_null() {
                return Err(EngineError::Validation("data must not be null".to_string()));
            }
            let samples = unsafe {
                std::slice::from_raw_parts(data, frames as usize * channels as usize)
            };
            api::create_buffer_from_float_array(&l, sample_rate, channels as usize, samples)
        }),
        |h| unsafe { write_out(out, h) },
    )
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_create_buffer_from_encoded_data(
    out: *mut u64,
    data: *const u8,
    length: u64,
) -> i32 {
    unsafe { write_out(out, 0) };
    translate(
        library().and_then(|l| {
            if data.is_null() {
                return Err(EngineError::Validation("data must not be null".to_string()));
            }
            let bytes = unsafe { std::slice::from_raw_parts(data, length as usize) };
            api::create_buffer_from_encoded_data(&l, bytes)
        }),
        |h| unsafe { write_out(out, h) },
    )
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_create_buffer_from_file(out: *mut u64, path: *const c_char) -> i32 {
    unsafe { write_out(out, 0) };
    translate(
        library().and_then(|l| {
            let path = cstr_arg(path, "path")?;
            api::create_buffer_from_file(&l, &path)
        }),
        |h| unsafe { write_out(out, h) },
    )
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_create_buffer_from_stream_params(
    out: *mut u64,
    protocol: *const c_char,
    path: *const c_char,
    param: u64,
) -> i32 {
    unsafe { write_out(out, 0) };
    translate(
        library().and_then(|l| {
            let protocol = cstr_arg(protocol, "protocol")?;
            let path = cstr_arg(path, "path")?;
            api::create_buffer_from_stream_params(&l, &protocol, &path, param)
        }),
        |h| unsafe { write_out(out, h) },
    )
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_create_buffer_from_stream_handle(out: *mut u64, stream: u64) -> i32 {
    unsafe { write_out(out, 0) };
    translate(
        library().and_then(|l| api::create_buffer_from_stream_handle(&l, stream)),
        |h| unsafe { write_out(out, h) },
    )
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_buffer_get_channels(out: *mut u32, buffer: u64) -> i32 {
    translate(
        library().and_then(|l| api::buffer_get_channels(&l, buffer)),
        |v| unsafe { write_out(out, v as u32) },
    )
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_buffer_get_length_in_samples(out: *mut u64, buffer: u64) -> i32 {
    translate(
        library().and_then(|l| api::buffer_get_length_in_samples(&l, buffer)),
        |v| unsafe { write_out(out, v as u64) },
    )
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_buffer_get_length_in_seconds(out: *mut f64, buffer: u64) -> i32 {
    translate(
        library().and_then(|l| api::buffer_get_length_in_seconds(&l, buffer)),
        |v| unsafe { write_out(out, v) },
    )
}

// ---- Generators ----

#[unsafe(no_mangle)]
pub extern "C" fn rsn_create_buffer_generator(out: *mut u64, context: u64) -> i32 {
    unsafe { write_out(out, 0) };
    translate(
        library().and_then(|l| api::create_buffer_generator(&l, context)),
        |h| unsafe { write_out(out, h) },
    )
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_create_sine_bank_generator(
    out: *mut u64,
    context: u64,
    initial_frequency: f64,
) -> i32 {
    unsafe { write_out(out, 0) };
    translate(
        library().and_then(|l| api::create_sine_wave_generator(&l, context, initial_frequency)),
        |h| unsafe { write_out(out, h) },
    )
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_create_square_bank_generator(
    out: *mut u64,
    context: u64,
    initial_frequency: f64,
    partials: u32,
) -> i32 {
    unsafe { write_out(out, 0) };
    translate(
        library().and_then(|l| {
            api::create_square_bank_generator(&l, context, initial_frequency, partials as usize)
        }),
        |h| unsafe { write_out(out, h) },
    )
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_create_noise_generator(out: *mut u64, context: u64, channels: u32) -> i32 {
    unsafe { write_out(out, 0) };
    translate(
        library().and_then(|l| api::create_noise_generator(&l, context, channels as usize)),
        |h| unsafe { write_out(out, h) },
    )
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_create_streaming_generator_from_file(
    out: *mut u64,
    context: u64,
    path: *const c_char,
) -> i32 {
    unsafe { write_out(out, 0) };
    translate(
        library().and_then(|l| {
            let path = cstr_arg(path, "path")?;
            api::create_streaming_generator_from_file(&l, context, &path)
        }),
        |h| unsafe { write_out(out, h) },
    )
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_create_streaming_generator_from_stream_params(
    out: *mut u64,
    context: u64,
    protocol: *const c_char,
    path: *const c_char,
    param: u64,
) -> i32 {
    unsafe { write_out(out, 0) };
    translate(
        library().and_then(|l| {
            let protocol = cstr_arg(protocol, "protocol")?;
            let path = cstr_arg(path, "path")?;
            api::create_streaming_generator_from_stream_params(&l, context, &protocol, &path, param)
        }),
        |h| unsafe { write_out(out, h) },
    )
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_create_streaming_generator_from_stream_handle(
    out: *mut u64,
    context: u64,
    stream: u64,
) -> i32 {
    unsafe { write_out(out, 0) };
    translate(
        library().and_then(|l| api::create_streaming_generator_from_stream_handle(&l, context, stream)),
        |h| unsafe { write_out(out, h) },
    )
}

// ---- Sources ----

#[unsafe(no_mangle)]
pub extern "C" fn rsn_create_direct_source(out: *mut u64, context: u64) -> i32 {
    unsafe { write_out(out, 0) };
    translate(
        library().and_then(|l| api::create_direct_source(&l, context)),
        |h| unsafe { write_out(out, h) },
    )
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_create_angular_panned_source(out: *mut u64, context: u64) -> i32 {
    unsafe { write_out(out, 0) };
    translate(
        library().and_then(|l| api::create_angular_panned_source(&l, context)),
        |h| unsafe { write_out(out, h) },
    )
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_create_scalar_panned_source(out: *mut u64, context: u64) -> i32 {
    unsafe { write_out(out, 0) };
    translate(
        library().and_then(|l| api::create_scalar_panned_source(&l, context)),
        |h| unsafe { write_out(out, h) },
    )
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_create_source_3d(out: *mut u64, context: u64) -> i32 {
    unsafe { write_out(out, 0) };
    translate(
        library().and_then(|l| api::create_source_3d(&l, context)),
        |h| unsafe { write_out(out, h) },
    )
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_source_add_generator(source: u64, generator: u64) -> i32 {
    translate(
        library().and_then(|l| api::source_add_generator(&l, source, generator)),
        |_| {},
    )
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_source_remove_generator(source: u64, generator: u64) -> i32 {
    translate(
        library().and_then(|l| api::source_remove_generator(&l, source, generator)),
        |_| {},
    )
}

// ---- Effects and routing ----

#[unsafe(no_mangle)]
pub extern "C" fn rsn_create_global_echo(out: *mut u64, context: u64) -> i32 {
    unsafe { write_out(out, 0) };
    translate(
        library().and_then(|l| api::create_global_echo(&l, context)),
        |h| unsafe { write_out(out, h) },
    )
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_create_global_fdn_reverb(out: *mut u64, context: u64) -> i32 {
    unsafe { write_out(out, 0) };
    translate(
        library().and_then(|l| api::create_global_fdn_reverb(&l, context)),
        |h| unsafe { write_out(out, h) },
    )
}

/// One echo tap as it crosses the ABI; delay is in seconds.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RsnEchoTapConfig {
    pub delay: f64,
    pub gain_l: f32,
    pub gain_r: f32,
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_global_echo_set_taps(
    effect: u64,
    tap_count: u32,
    taps: *const RsnEchoTapConfig,
) -> i32 {
    translate(
        library().and_then(|l| {
            if tap_count > 0 && taps.is_null() {
                return Err(EngineError::Validation("taps must not be null".to_string()));
            }
            let taps = if tap_count == 0 {
                Vec::new()
            } else {
                unsafe { std::slice::from_raw_parts(taps, tap_count as usize) }
                    .iter()
                    .map(|tap| EchoTapConfig {
                        delay: (tap.delay * resona_core::config::SR as f64) as u32,
                        gain_l: tap.gain_l,
                        gain_r: tap.gain_r,
                    })
                    .collect()
            };
            api::global_echo_set_taps(&l, effect, taps)
        }),
        |_| {},
    )
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_effect_reset(effect: u64) -> i32 {
    translate(library().and_then(|l| api::effect_reset(&l, effect)), |_| {})
}

/// Route configuration as it crosses the ABI.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RsnRouteConfig {
    pub gain: f64,
    /// Fade time in seconds; rounded up to whole blocks, minimum one.
    pub fade_time: f64,
    pub filter: RsnBiquadConfig,
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_init_route_config(out: *mut RsnRouteConfig) -> i32 {
    unsafe {
        write_out(
            out,
            RsnRouteConfig {
                gain: 1.0,
                fade_time: 0.03,
                filter: BiquadDef::identity().into(),
            },
        )
    };
    0
}

fn seconds_to_blocks(seconds: f64) -> u32 {
    use resona_core::config::{BLOCK_SIZE, SR};
    ((seconds * SR as f64 / BLOCK_SIZE as f64).ceil() as u32).max(1)
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_routing_config_route(
    context: u64,
    source: u64,
    effect: u64,
    config: *const RsnRouteConfig,
) -> i32 {
    translate(
        library().and_then(|l| {
            let config = if config.is_null() {
                RouteConfig::default()
            } else {
                let config = unsafe { *config };
                RouteConfig {
                    gain: config.gain,
                    fade_time_blocks: seconds_to_blocks(config.fade_time),
                    filter: config.filter.into(),
                }
            };
            api::routing_config_route(&l, context, source, effect, config)
        }),
        |_| {},
    )
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_routing_remove_route(
    context: u64,
    source: u64,
    effect: u64,
    fade_out: f64,
) -> i32 {
    translate(
        library().and_then(|l| {
            api::routing_remove_route(&l, context, source, effect, seconds_to_blocks(fade_out))
        }),
        |_| {},
    )
}

// ---- Automation ----

pub const RSN_AUTOMATION_APPEND_PROPERTY: i32 = 0;
pub const RSN_AUTOMATION_CLEAR_PROPERTY: i32 = 1;
pub const RSN_AUTOMATION_CLEAR_ALL_PROPERTIES: i32 = 2;
pub const RSN_AUTOMATION_SEND_USER_EVENT: i32 = 3;

/// One automation point as it crosses the ABI.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RsnAutomationPoint {
    pub time: f64,
    /// 0 = none (jump), 1 = linear.
    pub interpolation_type: i32,
    pub values: [f64; 6],
}

/// One batch command, tagged by `command_type`; unused fields are ignored.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RsnAutomationCommand {
    pub command_type: i32,
    pub target: u64,
    pub property: u32,
    pub point: RsnAutomationPoint,
    pub event_time: f64,
    pub event_param: u64,
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_create_automation_batch(out: *mut u64, context: u64) -> i32 {
    unsafe { write_out(out, 0) };
    translate(
        library().and_then(|l| api::create_automation_batch(&l, context)),
        |h| unsafe { write_out(out, h) },
    )
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_automation_batch_add_commands(
    batch: u64,
    command_count: u64,
    commands: *const RsnAutomationCommand,
) -> i32 {
    translate(
        library().and_then(|l| {
            if command_count == 0 {
                return Ok(());
            }
            if commands.is_null() {
                return Err(EngineError::Validation(
                    "commands must not be null".to_string(),
                ));
            }
            let commands =
                unsafe { std::slice::from_raw_parts(commands, command_count as usize) };
            for command in commands {
                add_batch_command(&l, batch, command)?;
            }
            Ok(())
        }),
        |_| {},
    )
}

fn add_batch_command(
    library: &Library,
    batch: Handle,
    command: &RsnAutomationCommand,
) -> EngineResult<()> {
    match command.command_type {
        RSN_AUTOMATION_APPEND_PROPERTY => {
            let interpolation = InterpolationKind::from_i32(command.point.interpolation_type)
                .ok_or_else(|| {
                    EngineError::Validation(format!(
                        "unknown interpolation type {}",
                        command.point.interpolation_type
                    ))
                })?;
            api::batch_append_property(
                library,
                batch,
                command.target,
                command.property,
                AutomationPoint {
                    time: command.point.time,
                    interpolation,
                    values: command.point.values,
                },
            )
        }
        RSN_AUTOMATION_CLEAR_PROPERTY => {
            api::batch_clear_property(library, batch, command.target, command.property)
        }
        RSN_AUTOMATION_CLEAR_ALL_PROPERTIES => {
            api::batch_clear_all_properties(library, batch, command.target)
        }
        RSN_AUTOMATION_SEND_USER_EVENT => api::batch_send_user_event(
            library,
            batch,
            command.target,
            command.event_time,
            command.event_param,
        ),
        other => Err(EngineError::Validation(format!(
            "unknown automation command type {other}"
        ))),
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_automation_batch_execute(batch: u64) -> i32 {
    translate(library().and_then(|l| api::batch_execute(&l, batch)), |_| {})
}

// ---- Transport ----

#[unsafe(no_mangle)]
pub extern "C" fn rsn_play(target: u64) -> i32 {
    translate(library().and_then(|l| api::play(&l, target)), |_| {})
}

#[unsafe(no_mangle)]
pub extern "C" fn rsn_pause(target: u64) -> i32 {
    translate(library().and_then(|l| api::pause(&l, target)), |_| {})
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One test covers the whole global lifecycle: the library is
    /// process-wide state, so the pieces must run in sequence.
    #[test]
    fn library_lifecycle_round_trip() {
        rsn_initialize();

        // Unknown handle: error code is returned and retrievable.
        let code = rsn_handle_inc_ref(999_999);
        assert_ne!(code, 0);
        assert_eq!(rsn_get_last_error_code(), code);
        let mut message: *const c_char = std::ptr::null();
        let mut length = 0usize;
        rsn_get_last_error_message(&mut message, &mut length);
        assert!(length > 0);

        // Headless context create, type introspection, silent block.
        let mut context = 0u64;
        assert_eq!(rsn_create_context_headless(&mut context), 0);
        assert_ne!(context, 0);
        let mut object_type = 0i32;
        assert_eq!(rsn_handle_get_object_type(&mut object_type, context), 0);
        assert_eq!(object_type, crate::objects::ObjectType::Context as i32);
        let mut block = vec![0.0f32; resona_core::config::BLOCK_SIZE * 2];
        assert_eq!(rsn_context_get_block(context, block.as_mut_ptr()), 0);
        assert!(block.iter().all(|&s| s == 0.0));

        assert_eq!(rsn_handle_dec_ref(context), 0);
        rsn_shutdown();
    }

    #[test]
    fn biquad_designers_fill_configs() {
        let mut config = RsnBiquadConfig::default();
        rsn_biquad_design_identity(&mut config);
        assert_eq!(config.b0, 1.0);
        rsn_biquad_design_lowpass(&mut config, 1000.0, 0.0);
        assert!(config.b0 > 0.0 && config.b0 < 1.0);
    }
}
