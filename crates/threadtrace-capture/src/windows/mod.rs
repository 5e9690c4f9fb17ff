//! Windows backend: toolhelp snapshots for enumeration, suspend-and-walk for
//! stacks, CPU-time deltas for run state.

mod names;
mod toolhelp;
mod walker;

use std::mem;

use threadtrace_types::{RunState, ThreadName, ThreadRecord, Tid};
use windows_sys::Win32::Foundation::{CloseHandle, FILETIME};
use windows_sys::Win32::System::Threading::{
    GetCurrentThreadId, GetThreadTimes, OpenThread, THREAD_QUERY_LIMITED_INFORMATION,
};

use crate::cpu_time::CpuTimeTable;
use crate::{Blacklist, CaptureError, CaptureOptions, StackWalker, ThreadEnumerator, ThreadMetadata};

pub struct WindowsPlatform {
    cpu_times: CpuTimeTable,
}

impl WindowsPlatform {
    /// Also registers the process-wide thread-name listener, so names raised
    /// before the first arm are still seen.
    pub fn new(options: &CaptureOptions) -> Self {
        names::install_name_listener();
        Self {
            cpu_times: CpuTimeTable::new(options.max_threads),
        }
    }
}

fn filetime_ticks(time: &FILETIME) -> u64 {
    (u64::from(time.dwHighDateTime) << 32) | u64::from(time.dwLowDateTime)
}

/// User plus kernel time of `id`, in 100ns ticks.
fn cpu_time(id: Tid) -> Option<u64> {
    // SAFETY: plain Win32 calls; the handle is closed before returning.
    unsafe {
        let handle = OpenThread(THREAD_QUERY_LIMITED_INFORMATION, 0, id.get() as u32);
        if handle == 0 {
            return None;
        }
        let mut creation: FILETIME = mem::zeroed();
        let mut exit: FILETIME = mem::zeroed();
        let mut kernel: FILETIME = mem::zeroed();
        let mut user: FILETIME = mem::zeroed();
        let ok = GetThreadTimes(handle, &mut creation, &mut exit, &mut kernel, &mut user);
        CloseHandle(handle);
        (ok != 0).then(|| filetime_ticks(&kernel) + filetime_ticks(&user))
    }
}

impl ThreadEnumerator for WindowsPlatform {
    fn current_thread(&self) -> Tid {
        // SAFETY: no preconditions.
        Tid::new(u64::from(unsafe { GetCurrentThreadId() }))
    }

    fn enumerate(&self, include_self: bool, blacklist: &Blacklist, out: &mut [Tid]) -> usize {
        let exclude = (!include_self).then(|| self.current_thread());
        toolhelp::enumerate(exclude, blacklist, out)
    }
}

impl ThreadMetadata for WindowsPlatform {
    fn read_name(&self, id: Tid) -> Option<ThreadName> {
        names::lookup(id)
    }

    fn read_state(&self, id: Tid) -> RunState {
        match cpu_time(id) {
            Some(ticks) => self.cpu_times.observe(id, ticks),
            None => RunState::Unknown,
        }
    }
}

impl StackWalker for WindowsPlatform {
    const SKIPPED_FRAMES: usize = walker::SKIPPED_FRAMES;

    fn arm(&self) -> Result<(), CaptureError> {
        Ok(())
    }

    fn disarm(&self) -> Result<(), CaptureError> {
        Ok(())
    }

    fn walk(&self, records: &mut [ThreadRecord], options: &CaptureOptions) -> usize {
        walker::walk_all(records, options)
    }
}
