//! Thread names on Windows.
//!
//! Debugger-aware code names a thread by raising exception `0x406D1388` with
//! a `THREADNAME_INFO` payload. A vectored handler copies the name into
//! [`NAMES`] and lets the exception continue to the next handler. Threads
//! named through `SetThreadDescription` are found with
//! `GetThreadDescription` instead.

use std::ffi::CStr;
use std::mem;
use std::os::raw::c_char;
use std::ptr;
use std::slice;
use std::sync::Once;

use threadtrace_types::{ThreadName, Tid};
use tracing::warn;
use windows_sys::Win32::Foundation::{CloseHandle, LocalFree};
use windows_sys::Win32::System::Diagnostics::Debug::{
    AddVectoredExceptionHandler, EXCEPTION_POINTERS,
};
use windows_sys::Win32::System::Threading::{
    GetCurrentThreadId, GetThreadDescription, OpenThread, THREAD_QUERY_LIMITED_INFORMATION,
};

use crate::name_table::NameTable;

const SET_THREAD_NAME_EXCEPTION: i32 = 0x406D_1388;
const EXCEPTION_CONTINUE_SEARCH: i32 = 0;

/// Payload of the set-thread-name exception.
#[repr(C)]
struct ThreadNameInfo {
    kind: u32,
    name: *const c_char,
    thread_id: u32,
    flags: u32,
}

/// Exception parameters spanned by a [`ThreadNameInfo`].
const PAYLOAD_WORDS: usize = mem::size_of::<ThreadNameInfo>().div_ceil(mem::size_of::<usize>());

static NAMES: NameTable = NameTable::new();
static INSTALL: Once = Once::new();

/// Registers the vectored handler. Later calls do nothing.
pub(crate) fn install_name_listener() {
    INSTALL.call_once(|| {
        // SAFETY: the handler is a plain `extern "system"` fn that lives for
        // the whole program.
        let handle = unsafe { AddVectoredExceptionHandler(1, Some(on_exception)) };
        if handle.is_null() {
            warn!("failed to register thread-name exception handler");
        }
    });
}

unsafe extern "system" fn on_exception(pointers: *mut EXCEPTION_POINTERS) -> i32 {
    // SAFETY: the OS hands us valid exception pointers for the duration of
    // the call; the payload layout is fixed by the naming convention.
    unsafe {
        let Some(record) = pointers.as_ref().and_then(|p| p.ExceptionRecord.as_ref()) else {
            return EXCEPTION_CONTINUE_SEARCH;
        };
        if record.ExceptionCode != SET_THREAD_NAME_EXCEPTION {
            return EXCEPTION_CONTINUE_SEARCH;
        }
        if (record.NumberParameters as usize) < PAYLOAD_WORDS {
            return EXCEPTION_CONTINUE_SEARCH;
        }
        let info = &*(record.ExceptionInformation.as_ptr() as *const ThreadNameInfo);
        if info.kind != 0x1000 || info.name.is_null() {
            return EXCEPTION_CONTINUE_SEARCH;
        }
        let thread_id = if info.thread_id == u32::MAX {
            GetCurrentThreadId()
        } else {
            info.thread_id
        };
        let name = CStr::from_ptr(info.name);
        NAMES.set(
            Tid::new(u64::from(thread_id)),
            ThreadName::from_bytes_truncated(name.to_bytes()),
        );
    }
    EXCEPTION_CONTINUE_SEARCH
}

pub(crate) fn lookup(id: Tid) -> Option<ThreadName> {
    NAMES.get(id).or_else(|| description(id))
}

fn description(id: Tid) -> Option<ThreadName> {
    // SAFETY: the handle is closed below; the returned wide string is owned
    // by us and released with LocalFree.
    unsafe {
        let handle = OpenThread(THREAD_QUERY_LIMITED_INFORMATION, 0, id.get() as u32);
        if handle == 0 {
            return None;
        }
        let mut wide = ptr::null_mut();
        let result = GetThreadDescription(handle, &mut wide);
        CloseHandle(handle);
        if result < 0 || wide.is_null() {
            return None;
        }
        let mut len = 0;
        while *wide.add(len) != 0 {
            len += 1;
        }
        let decoded = String::from_utf16_lossy(slice::from_raw_parts(wide, len));
        LocalFree(wide as _);
        let name = ThreadName::from_str_truncated(&decoded);
        (!name.is_empty()).then_some(name)
    }
}
