//! FFI bindings for Persona Flux
//!
//! C-compatible functions for replaying recorded sessions from other
//! languages. All functions take null-terminated C strings and return
//! allocated memory that must be freed by the caller using
//! `persona_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use crate::config::PersonaConfig;
use crate::pipeline::{replay_session, ReplayProcessor};
use crate::schema::SessionReader;

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Caller must free the result
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

// ============================================================================
// Stateless API
// ============================================================================

/// Replay a recorded session (JSON or NDJSON) and return the report JSON.
///
/// # Safety
/// - `session` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `persona_free_string`.
/// - Returns NULL on error; call `persona_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn persona_replay_session(session: *const c_char) -> *mut c_char {
    clear_last_error();

    let Some(input) = cstr_to_string(session) else {
        set_last_error("Invalid session string pointer");
        return ptr::null_mut();
    };

    match replay_session(&input) {
        Ok(report) => string_to_cstr(&report),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Validate a recorded session and return a JSON array of problems (empty when
/// the session is replayable).
///
/// # Safety
/// - `session` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `persona_free_string`.
/// - Returns NULL when the session cannot be parsed at all.
#[no_mangle]
pub unsafe extern "C" fn persona_validate_session(session: *const c_char) -> *mut c_char {
    clear_last_error();

    let Some(input) = cstr_to_string(session) else {
        set_last_error("Invalid session string pointer");
        return ptr::null_mut();
    };

    let parsed = match SessionReader::parse(&input) {
        Ok(parsed) => parsed,
        Err(e) => {
            set_last_error(&e.to_string());
            return ptr::null_mut();
        }
    };

    let problems: Vec<serde_json::Value> = SessionReader::validate(&parsed)
        .into_iter()
        .map(|r| {
            serde_json::json!({
                "index": r.index,
                "kind": r.kind,
                "error": r.error.to_string(),
            })
        })
        .collect();
    string_to_cstr(&serde_json::Value::Array(problems).to_string())
}

// ============================================================================
// Stateful Processor API
// ============================================================================

/// Opaque handle to a ReplayProcessor
pub struct PersonaProcessorHandle {
    processor: ReplayProcessor,
}

/// Create a new ReplayProcessor.
///
/// # Safety
/// - `config` may be NULL for the default classifier config, otherwise it must
///   be a valid null-terminated C string holding a JSON config.
/// - Returns a pointer to a newly allocated processor that must be freed with
///   `persona_processor_free`.
/// - Returns NULL on error.
#[no_mangle]
pub unsafe extern "C" fn persona_processor_new(config: *const c_char) -> *mut PersonaProcessorHandle {
    clear_last_error();

    let processor = if config.is_null() {
        ReplayProcessor::new()
    } else {
        let Some(json) = cstr_to_string(config) else {
            set_last_error("Invalid config string pointer");
            return ptr::null_mut();
        };
        match PersonaConfig::from_json(&json) {
            Ok(config) => ReplayProcessor::with_config(config),
            Err(e) => {
                set_last_error(&e.to_string());
                return ptr::null_mut();
            }
        }
    };

    Box::into_raw(Box::new(PersonaProcessorHandle { processor }))
}

/// Free a ReplayProcessor.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `persona_processor_new`.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn persona_processor_free(processor: *mut PersonaProcessorHandle) {
    if !processor.is_null() {
        drop(Box::from_raw(processor));
    }
}

/// Replay a session with a stateful processor; storage carries over to the
/// next call.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `persona_processor_new`.
/// - `session` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `persona_free_string`.
/// - Returns NULL on error; call `persona_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn persona_processor_replay(
    processor: *mut PersonaProcessorHandle,
    session: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if processor.is_null() {
        set_last_error("Null processor pointer");
        return ptr::null_mut();
    }

    let handle = &mut *processor;

    let Some(input) = cstr_to_string(session) else {
        set_last_error("Invalid session string pointer");
        return ptr::null_mut();
    };

    match handle.processor.replay(&input) {
        Ok(report) => string_to_cstr(&report),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Save processor storage to JSON.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `persona_processor_new`.
/// - Returns a newly allocated string that must be freed with `persona_free_string`.
/// - Returns NULL on error; call `persona_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn persona_processor_save_storage(
    processor: *mut PersonaProcessorHandle,
) -> *mut c_char {
    clear_last_error();

    if processor.is_null() {
        set_last_error("Null processor pointer");
        return ptr::null_mut();
    }

    let handle = &*processor;

    match handle.processor.save_storage() {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Load processor storage from JSON.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `persona_processor_new`.
/// - `json` must be a valid null-terminated C string.
/// - Returns 0 on success, non-zero on error.
/// - On error, call `persona_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn persona_processor_load_storage(
    processor: *mut PersonaProcessorHandle,
    json: *const c_char,
) -> i32 {
    clear_last_error();

    if processor.is_null() {
        set_last_error("Null processor pointer");
        return -1;
    }

    let handle = &mut *processor;

    let Some(json_str) = cstr_to_string(json) else {
        set_last_error("Invalid JSON string pointer");
        return -1;
    };

    match handle.processor.load_storage(&json_str) {
        Ok(()) => 0,
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by a `persona_*` function.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a `persona_*` function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn persona_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next `persona_*` call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn persona_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

/// Get the library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn persona_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}
