//! Suspend-and-walk stack capture.
//!
//! Each target is suspended, its register context read and its stack walked
//! from the requesting thread, then resumed. While a target is suspended
//! nothing here allocates or logs, since the target may hold the heap lock.

use std::mem;
use std::time::Instant;

use threadtrace_types::{FrameBuffer, ThreadRecord, Tid};
use windows_sys::Win32::Foundation::{CloseHandle, HANDLE};
use windows_sys::Win32::System::Diagnostics::Debug::{
    CONTEXT, GetThreadContext, RtlCaptureContext,
};
use windows_sys::Win32::System::Threading::{
    GetCurrentThreadId, OpenThread, ResumeThread, SuspendThread, THREAD_GET_CONTEXT,
    THREAD_QUERY_INFORMATION, THREAD_SUSPEND_RESUME,
};

use crate::CaptureOptions;

#[cfg(target_arch = "x86_64")]
use windows_sys::Win32::System::Diagnostics::Debug::CONTEXT_FULL_AMD64 as CONTEXT_FULL;
#[cfg(target_arch = "aarch64")]
use windows_sys::Win32::System::Diagnostics::Debug::CONTEXT_FULL_ARM64 as CONTEXT_FULL;

/// Frames are recorded from the interrupted pc onwards; nothing to skip.
pub(crate) const SKIPPED_FRAMES: usize = 0;

struct ThreadHandle(HANDLE);

impl ThreadHandle {
    fn open(id: Tid) -> Option<Self> {
        let access = THREAD_SUSPEND_RESUME | THREAD_GET_CONTEXT | THREAD_QUERY_INFORMATION;
        // SAFETY: OpenThread has no memory-safety preconditions.
        let handle = unsafe { OpenThread(access, 0, id.get() as u32) };
        (handle != 0).then_some(Self(handle))
    }

    fn suspend(&self) -> Option<Suspended<'_>> {
        // SAFETY: valid handle opened with THREAD_SUSPEND_RESUME.
        if unsafe { SuspendThread(self.0) } == u32::MAX {
            return None;
        }
        Some(Suspended(self))
    }
}

impl Drop for ThreadHandle {
    fn drop(&mut self) {
        // SAFETY: the handle came from a successful OpenThread.
        unsafe { CloseHandle(self.0) };
    }
}

/// Resumes the thread when dropped, on every exit path.
struct Suspended<'a>(&'a ThreadHandle);

impl Drop for Suspended<'_> {
    fn drop(&mut self) {
        // SAFETY: paired with the successful SuspendThread in `suspend`.
        unsafe { ResumeThread(self.0.0) };
    }
}

/// Walks each record's thread in turn. Threads not reached before
/// `options.timeout` elapses are left without frames.
pub(crate) fn walk_all(records: &mut [ThreadRecord], options: &CaptureOptions) -> usize {
    let deadline = Instant::now() + options.timeout;
    // SAFETY: no preconditions.
    let current = Tid::new(u64::from(unsafe { GetCurrentThreadId() }));
    let mut reported = 0;

    for record in records.iter_mut() {
        if Instant::now() >= deadline {
            break;
        }
        let id = record.id();
        let frames = record.frames_mut();
        if id == current {
            walk_current(frames);
        } else {
            walk_other(id, frames);
        }
        if !frames.is_empty() {
            reported += 1;
        }
    }
    reported
}

#[inline(never)]
fn walk_current(frames: &mut FrameBuffer) {
    // SAFETY: CONTEXT is plain data; RtlCaptureContext fills it in place.
    unsafe {
        let mut context: CONTEXT = mem::zeroed();
        RtlCaptureContext(&mut context);
        walk_context(&mut context, frames);
    }
}

fn walk_other(id: Tid, frames: &mut FrameBuffer) {
    let Some(handle) = ThreadHandle::open(id) else {
        return;
    };
    let Some(_suspended) = handle.suspend() else {
        return;
    };
    // SAFETY: the thread stays suspended until `_suspended` drops, after the
    // walk. CONTEXT is declared 16-byte aligned.
    unsafe {
        let mut context: CONTEXT = mem::zeroed();
        context.ContextFlags = CONTEXT_FULL;
        if GetThreadContext(handle.0, &mut context) == 0 {
            return;
        }
        walk_context(&mut context, frames);
    }
}

/// Unwinds with the OS function tables until the walk fails, runs out of
/// room or comes back to where it started.
///
/// # Safety
///
/// `context` must describe a thread that cannot run during the walk.
#[cfg(target_arch = "x86_64")]
unsafe fn walk_context(context: &mut CONTEXT, frames: &mut FrameBuffer) {
    use std::ptr;
    use windows_sys::Win32::System::Diagnostics::Debug::{
        RtlLookupFunctionEntry, RtlVirtualUnwind,
    };

    frames.clear();
    let start = context.Rip;
    while context.Rip != 0 {
        if !frames.push(context.Rip as usize) {
            break;
        }
        let (rip, rsp) = (context.Rip, context.Rsp);

        let mut image_base = 0u64;
        // SAFETY: lookups against loaded module tables.
        let entry = unsafe { RtlLookupFunctionEntry(rip, &mut image_base, ptr::null_mut()) };
        if entry.is_null() {
            // Leaf function: the return address sits at the top of the stack.
            if rsp == 0 {
                break;
            }
            // SAFETY: rsp points into the suspended thread's stack.
            context.Rip = unsafe { *(rsp as *const u64) };
            context.Rsp = rsp.wrapping_add(8);
        } else {
            let mut handler_data = ptr::null_mut();
            let mut establisher_frame = 0u64;
            // SAFETY: `entry` came from RtlLookupFunctionEntry for `rip`.
            unsafe {
                RtlVirtualUnwind(
                    0, // UNW_FLAG_NHANDLER
                    image_base,
                    rip,
                    entry,
                    context,
                    &mut handler_data,
                    &mut establisher_frame,
                    ptr::null_mut(),
                );
            }
        }

        if context.Rip == start || (context.Rip == rip && context.Rsp == rsp) {
            break;
        }
    }
}

/// Follows the frame-pointer chain, which ARM64 Windows code always keeps.
///
/// # Safety
///
/// `context` must describe a thread that cannot run during the walk.
#[cfg(target_arch = "aarch64")]
unsafe fn walk_context(context: &mut CONTEXT, frames: &mut FrameBuffer) {
    frames.clear();
    let start = context.Pc;
    if start == 0 || !frames.push(start as usize) {
        return;
    }
    // SAFETY: reading the named view of the register union.
    let mut fp = unsafe { context.Anonymous.Anonymous.Fp } as usize;
    while fp != 0 && fp % mem::align_of::<usize>() == 0 {
        // SAFETY: fp points at a {previous fp, return address} pair on the
        // suspended thread's stack.
        let (next, ret) = unsafe {
            let record = fp as *const usize;
            (*record, *record.add(1))
        };
        if ret == 0 || ret as u64 == start || !frames.push(ret) {
            break;
        }
        if next <= fp {
            break;
        }
        fp = next;
    }
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
const CONTEXT_FULL: u32 = 0;

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
unsafe fn walk_context(_context: &mut CONTEXT, frames: &mut FrameBuffer) {
    frames.clear();
}
