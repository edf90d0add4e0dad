// C-compatible FFI bindings for hosts without their own collector.
//
// Safety requirements:
// - All pointers must be non-null unless documented otherwise
// - All handles must be created by this module and not fabricated
// - String parameters must be valid UTF-8
// - Caller must call the corresponding _destroy/_release function for each
//   handle it receives
// - Handles are not thread-safe; use each one from a single thread

use std::ffi::{CStr, CString, c_char};

use crate::config::{EngineConfig, MAX_BLOCK_LEN};
use crate::ops::register_standard_operators;
use crate::registry::{OperatorArgs, OperatorRegistry};
use crate::sound::Sound;
use crate::table::TableRef;

use log::{debug, error, warn};

// Logger subsystem identifier
#[cfg(feature = "ios")]
const LOG_SUBSYSTEM: &str = "org.sndflow.engine";

// ═══════════════════════════════════════════════════════════════════════════
// Logger Initialization
// ═══════════════════════════════════════════════════════════════════════════

/// Initialize logging.
///
/// Call once at startup. With the `ios` feature, logs go to unified logging
/// (Console.app, Xcode); otherwise to stderr, filtered by `RUST_LOG`.
#[unsafe(no_mangle)]
pub extern "C" fn sndflow_init_logger() {
    #[cfg(feature = "ios")]
    {
        oslog::OsLogger::new(LOG_SUBSYSTEM)
            .level_filter(log::LevelFilter::Debug)
            .init()
            .ok();
    }
    #[cfg(not(feature = "ios"))]
    {
        env_logger::try_init().ok();
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Opaque Handle Types
// ═══════════════════════════════════════════════════════════════════════════

/// Opaque handle to an operator registry.
pub struct SndflowRegistry {
    inner: OperatorRegistry,
}

/// Opaque handle to a sound cursor.
pub struct SndflowSound {
    inner: Sound,
}

/// Opaque handle to a shared table.
pub struct SndflowTable {
    inner: TableRef,
}

// ═══════════════════════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════════════════════

/// Engine limits.
#[repr(C)]
pub struct SndflowConfig {
    /// Longest sound `sound_to_table` will materialize, in samples.
    pub table_stop_bound: i64,
    /// Sample rate operators default to.
    pub default_sample_rate: f64,
}

impl Default for SndflowConfig {
    fn default() -> Self {
        let cfg = EngineConfig::default();
        Self {
            table_stop_bound: cfg.table_stop_bound,
            default_sample_rate: cfg.default_sample_rate,
        }
    }
}

impl From<&SndflowConfig> for EngineConfig {
    fn from(c: &SndflowConfig) -> Self {
        EngineConfig::default()
            .with_table_stop_bound(c.table_stop_bound)
            .with_default_sample_rate(c.default_sample_rate)
    }
}

/// Get the default configuration values.
#[unsafe(no_mangle)]
pub extern "C" fn sndflow_default_config() -> SndflowConfig {
    SndflowConfig::default()
}

// ═══════════════════════════════════════════════════════════════════════════
// Registry Functions
// ═══════════════════════════════════════════════════════════════════════════

/// Create a registry holding the standard operators.
///
/// Returns an opaque pointer that must be freed with `registry_destroy`.
#[unsafe(no_mangle)]
pub extern "C" fn registry_create() -> *mut SndflowRegistry {
    let mut registry = OperatorRegistry::new();
    register_standard_operators(&mut registry);
    Box::into_raw(Box::new(SndflowRegistry { inner: registry }))
}

/// Destroy a registry. Sounds made from it stay valid.
///
/// # Safety
/// `registry` must be a valid pointer returned by `registry_create`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn registry_destroy(registry: *mut SndflowRegistry) {
    if !registry.is_null() {
        unsafe { drop(Box::from_raw(registry)) };
    }
}

/// Get the number of registered operators.
///
/// # Safety
/// `registry` must be NULL or a valid pointer returned by `registry_create`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn registry_count(registry: *const SndflowRegistry) -> u32 {
    if registry.is_null() {
        return 0;
    }
    unsafe { (*registry).inner.len() as u32 }
}

// ═══════════════════════════════════════════════════════════════════════════
// Sound Functions
// ═══════════════════════════════════════════════════════════════════════════

/// Build a sound from a registered operator.
///
/// Inputs are copied, so the caller keeps ownership of its input handles.
/// Returns NULL (and logs the reason) on failure. A non-positive `sr` selects
/// the default sample rate.
///
/// # Safety
/// - `registry` must be valid and `name` a null-terminated UTF-8 string
/// - `params` must point to `num_params` doubles (or be NULL if 0)
/// - `inputs` must point to `num_inputs` valid sound handles (or be NULL if 0)
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sound_make(
    registry: *const SndflowRegistry,
    name: *const c_char,
    params: *const f64,
    num_params: u32,
    inputs: *const *const SndflowSound,
    num_inputs: u32,
    t0: f64,
    sr: f64,
) -> *mut SndflowSound {
    if registry.is_null() || name.is_null() {
        return std::ptr::null_mut();
    }
    if (params.is_null() && num_params > 0) || (inputs.is_null() && num_inputs > 0) {
        return std::ptr::null_mut();
    }

    let registry = unsafe { &(*registry).inner };
    let Ok(name) = (unsafe { CStr::from_ptr(name) }).to_str() else {
        warn!("sound_make: operator name is not UTF-8");
        return std::ptr::null_mut();
    };

    let sr = if sr > 0.0 { sr } else { EngineConfig::default().default_sample_rate };
    let mut args = OperatorArgs::new(t0, sr);
    if num_params > 0 {
        let params = unsafe { std::slice::from_raw_parts(params, num_params as usize) };
        args.params.extend_from_slice(params);
    }
    if num_inputs > 0 {
        let inputs = unsafe { std::slice::from_raw_parts(inputs, num_inputs as usize) };
        for input in inputs {
            if input.is_null() {
                return std::ptr::null_mut();
            }
            args.inputs.push(unsafe { (**input).inner.clone() });
        }
    }

    match registry.make(name, args) {
        Ok(snd) => {
            debug!("sound_make: {}", name);
            Box::into_raw(Box::new(SndflowSound { inner: snd }))
        }
        Err(e) => {
            error!("sound_make {}: {}", name, e);
            std::ptr::null_mut()
        }
    }
}

/// Copy a cursor. The copy shares all computed samples.
///
/// # Safety
/// `snd` must be NULL or a valid sound handle. The copy must be released
/// with `sound_destroy`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sound_copy(snd: *const SndflowSound) -> *mut SndflowSound {
    if snd.is_null() {
        return std::ptr::null_mut();
    }
    let inner = unsafe { (*snd).inner.clone() };
    Box::into_raw(Box::new(SndflowSound { inner }))
}

/// Release a cursor.
///
/// # Safety
/// `snd` must be a valid pointer returned by this module.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sound_destroy(snd: *mut SndflowSound) {
    if !snd.is_null() {
        unsafe { drop(Box::from_raw(snd)) };
    }
}

/// Copy the next chunk of scaled samples into `output`.
///
/// Returns the number of samples written, 0 once the sound has ended, or -1
/// if the arguments are invalid. `capacity` must be at least the maximum
/// block length (1020).
///
/// # Safety
/// `output` must have space for `capacity` floats.
/// `snd` must be NULL or a valid sound handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sound_get_next(
    snd: *mut SndflowSound,
    output: *mut f32,
    capacity: u32,
) -> i32 {
    if snd.is_null() || output.is_null() || (capacity as usize) < MAX_BLOCK_LEN {
        return -1;
    }
    let snd = unsafe { &mut (*snd).inner };
    let out = unsafe { std::slice::from_raw_parts_mut(output, capacity as usize) };

    let chunk = snd.get_next();
    let scale = snd.scale();
    for (o, s) in out.iter_mut().zip(chunk.samples()) {
        *o = s * scale;
    }
    chunk.len as i32
}

/// Value at time `t`, or 0 if the request is invalid.
///
/// # Safety
/// `snd` must be NULL or a valid sound handle, not used concurrently.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sound_sref(snd: *mut SndflowSound, t: f64) -> f64 {
    if snd.is_null() {
        return 0.0;
    }
    match unsafe { (*snd).inner.sref(t) } {
        Ok(v) => v,
        Err(e) => {
            warn!("sound_sref: {}", e);
            0.0
        }
    }
}

/// Sample rate of a sound, or 0 for NULL.
///
/// # Safety
/// `snd` must be NULL or a valid sound handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sound_srate(snd: *const SndflowSound) -> f64 {
    if snd.is_null() {
        return 0.0;
    }
    unsafe { (*snd).inner.srate() }
}

/// Start time of a sound, or 0 for NULL.
///
/// # Safety
/// `snd` must be NULL or a valid sound handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sound_t0(snd: *const SndflowSound) -> f64 {
    if snd.is_null() {
        return 0.0;
    }
    unsafe { (*snd).inner.t0() }
}

/// Materialize a sound. Returns NULL if it does not end within
/// `config.table_stop_bound` samples. `config` may be NULL for defaults.
///
/// # Safety
/// The returned table must be released with `table_release`.
/// `snd` must be NULL or a valid sound handle and `config` NULL or valid.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sound_to_table(
    snd: *mut SndflowSound,
    config: *const SndflowConfig,
) -> *mut SndflowTable {
    if snd.is_null() {
        return std::ptr::null_mut();
    }
    let cfg = if config.is_null() {
        EngineConfig::default()
    } else {
        EngineConfig::from(unsafe { &*config })
    };
    match unsafe { (*snd).inner.to_table(&cfg) } {
        Ok(table) => Box::into_raw(Box::new(SndflowTable { inner: table })),
        Err(e) => {
            error!("sound_to_table: {}", e);
            std::ptr::null_mut()
        }
    }
}

/// Debug dump of the operator tree behind a sound.
///
/// # Safety
/// The returned string must be freed with `sndflow_string_free`.
/// `snd` must be NULL or a valid sound handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sound_print_tree(snd: *const SndflowSound) -> *mut c_char {
    if snd.is_null() {
        return std::ptr::null_mut();
    }
    let text = unsafe { (*snd).inner.print_tree() };
    match CString::new(text) {
        Ok(s) => s.into_raw(),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Free a string returned by this module.
///
/// # Safety
/// `s` must be NULL or a string returned by this module, freed only once.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sndflow_string_free(s: *mut c_char) {
    if !s.is_null() {
        unsafe { drop(CString::from_raw(s)) };
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Table Functions
// ═══════════════════════════════════════════════════════════════════════════

/// Take another reference to a table.
///
/// # Safety
/// `table` must be NULL or a valid table handle. The new handle must be
/// released with `table_release`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn table_acquire(table: *const SndflowTable) -> *mut SndflowTable {
    if table.is_null() {
        return std::ptr::null_mut();
    }
    let inner = unsafe { (*table).inner.acquire() };
    Box::into_raw(Box::new(SndflowTable { inner }))
}

/// Release a table reference.
///
/// # Safety
/// `table` must be NULL or a valid table handle, released only once.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn table_release(table: *mut SndflowTable) {
    if !table.is_null() {
        unsafe { Box::from_raw(table).inner.release() };
    }
}

/// Length of a table in samples, or 0 for NULL.
///
/// # Safety
/// `table` must be NULL or a valid table handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn table_length(table: *const SndflowTable) -> f64 {
    if table.is_null() {
        return 0.0;
    }
    unsafe { (*table).inner.length() }
}

/// Borrow the table's samples. Valid while the handle is.
///
/// # Safety
/// `table` must be NULL or a valid table handle and `out_len` NULL or
/// writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn table_samples(table: *const SndflowTable, out_len: *mut u32) -> *const f32 {
    if table.is_null() {
        return std::ptr::null();
    }
    let samples = unsafe { (*table).inner.samples() };
    if !out_len.is_null() {
        unsafe { *out_len = samples.len() as u32 };
    }
    samples.as_ptr()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_round_trip() {
        unsafe {
            let registry = registry_create();
            assert_eq!(registry_count(registry), 4);

            let name = CString::new("const").unwrap();
            let params = [0.25, 100.0];
            let snd = sound_make(registry, name.as_ptr(), params.as_ptr(), 2, std::ptr::null(), 0, 0.0, 10.0);
            assert!(!snd.is_null());

            let copy = sound_copy(snd);
            let mut buf = vec![0.0f32; MAX_BLOCK_LEN];
            assert_eq!(sound_get_next(copy, buf.as_mut_ptr(), buf.len() as u32), 100);
            assert_eq!(buf[99], 0.25);
            assert_eq!(sound_get_next(copy, buf.as_mut_ptr(), buf.len() as u32), 0);
            assert_eq!(sound_get_next(copy, buf.as_mut_ptr(), 16), -1);

            let table = sound_to_table(snd, std::ptr::null());
            assert_eq!(table_length(table), 100.0);
            let extra = table_acquire(table);
            let mut len = 0;
            let samples = table_samples(extra, &mut len);
            assert_eq!(len, 100);
            assert_eq!(*samples, 0.25);

            table_release(extra);
            table_release(table);
            sound_destroy(copy);
            sound_destroy(snd);
            registry_destroy(registry);
        }
    }

    #[test]
    fn mixing_handles() {
        unsafe {
            let registry = registry_create();
            let konst = CString::new("const").unwrap();
            let add = CString::new("add").unwrap();
            let params = [1.0, 10.0];
            let a = sound_make(registry, konst.as_ptr(), params.as_ptr(), 2, std::ptr::null(), 0, 0.0, 10.0);
            let inputs = [a as *const SndflowSound, a as *const SndflowSound];
            let sum = sound_make(registry, add.as_ptr(), std::ptr::null(), 0, inputs.as_ptr(), 2, 0.0, 10.0);
            assert!(!sum.is_null());
            assert_eq!(sound_sref(sum, 0.5), 2.0);

            let tree = sound_print_tree(sum);
            assert!(CStr::from_ptr(tree).to_str().unwrap().contains("add"));
            sndflow_string_free(tree);

            let bogus = CString::new("bogus").unwrap();
            assert!(sound_make(registry, bogus.as_ptr(), std::ptr::null(), 0, std::ptr::null(), 0, 0.0, 1.0).is_null());

            sound_destroy(sum);
            sound_destroy(a);
            registry_destroy(registry);
        }
    }

    #[test]
    fn infinite_sound_does_not_materialize() {
        unsafe {
            let registry = registry_create();
            let osc = CString::new("osc").unwrap();
            let params = [440.0];
            let snd = sound_make(registry, osc.as_ptr(), params.as_ptr(), 1, std::ptr::null(), 0, 0.0, 0.0);
            assert_eq!(sound_srate(snd), 44100.0);
            let cfg = SndflowConfig {
                table_stop_bound: 5000,
                ..sndflow_default_config()
            };
            assert!(sound_to_table(snd, &cfg).is_null());
            sound_destroy(snd);
            registry_destroy(registry);
        }
    }
}
