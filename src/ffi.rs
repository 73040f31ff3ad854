//! C ABI consumed by compiler-generated code. One call per instrumentation
//! event; every entry point routes through the global profiler.

use crate::errors::{ProfileError, Result};
use crate::logging::ProfilerLogger;
use crate::profiler;
use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_uint};

static LOGGER: ProfilerLogger = ProfilerLogger::new("laneprof::ffi");

/// Borrow a caller string. Null and non UTF-8 input are rejected.
unsafe fn c_str<'a>(ptr: *const c_char, what: &str) -> Result<&'a str> {
    if ptr.is_null() {
        return Err(ProfileError::InvalidArgument(format!("{} is null", what)));
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map_err(|e| ProfileError::InvalidArgument(format!("{} is not UTF-8: {}", what, e)))
}

/// Log soft errors; stop the process on fatal ones.
fn settle<T>(operation: &str, result: Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            LOGGER.log_error(operation, &e);
            if e.is_fatal() {
                log::logger().flush();
                std::process::abort();
            }
            None
        }
    }
}

/// # Safety
/// `origin` must be null or point to a NUL-terminated string valid for the
/// duration of the call.
#[no_mangle]
pub unsafe extern "C" fn laneprof_init(
    origin: *const c_char,
    declared_line: c_int,
    lane_width: c_int,
    flags: c_uint,
) {
    crate::ensure_logging();
    let thread = std::thread::current().id();
    let result = c_str(origin, "origin")
        .and_then(|origin| profiler::global().init(thread, origin, declared_line, lane_width, flags));
    settle("init", result);
}

/// # Safety
/// `origin` must be null or point to a NUL-terminated string valid for the
/// duration of the call.
#[no_mangle]
pub unsafe extern "C" fn laneprof_start_region(
    origin: *const c_char,
    region_kind: c_int,
    start_line: c_int,
    end_line_hint: c_int,
    task_id: c_int,
    mask: u64,
) {
    crate::ensure_logging();
    let thread = std::thread::current().id();
    let result = c_str(origin, "origin").and_then(|origin| {
        profiler::global().start_region(
            thread,
            origin,
            region_kind,
            start_line,
            end_line_hint,
            task_id,
            mask,
        )
    });
    settle("start_region", result);
}

#[no_mangle]
pub extern "C" fn laneprof_end_region(region_kind: c_int, end_line: c_int) {
    crate::ensure_logging();
    let thread = std::thread::current().id();
    settle(
        "end_region",
        profiler::global().end_region(thread, region_kind, end_line),
    );
}

/// # Safety
/// `note` must be null or point to a NUL-terminated string valid for the
/// duration of the call.
#[no_mangle]
pub unsafe extern "C" fn laneprof_iteration(
    note: *const c_char,
    line: c_int,
    mask: u64,
    region_kind: c_int,
) {
    crate::ensure_logging();
    let thread = std::thread::current().id();
    let note = c_str(note, "note").unwrap_or("");
    settle(
        "iteration",
        profiler::global().iteration(thread, note, line, mask, region_kind),
    );
}

/// # Safety
/// `note` must be null or point to a NUL-terminated string valid for the
/// duration of the call.
#[no_mangle]
pub unsafe extern "C" fn laneprof_if_branch(
    note: *const c_char,
    line: c_int,
    mask: u64,
    region_kind: c_int,
) {
    crate::ensure_logging();
    let thread = std::thread::current().id();
    let note = c_str(note, "note").unwrap_or("");
    settle(
        "if_branch",
        profiler::global().if_branch(thread, note, line, mask, region_kind),
    );
}

#[no_mangle]
pub extern "C" fn laneprof_complete() {
    crate::ensure_logging();
    let thread = std::thread::current().id();
    if let Some(path) = settle("complete", profiler::global().complete(thread)) {
        LOGGER.log_info("complete", &format!("profile written to {}", path.display()));
    }
}
