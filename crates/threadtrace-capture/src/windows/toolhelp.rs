use std::mem;

use threadtrace_types::Tid;
use windows_sys::Win32::Foundation::{CloseHandle, HANDLE, INVALID_HANDLE_VALUE};
use windows_sys::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, TH32CS_SNAPTHREAD, THREADENTRY32, Thread32First, Thread32Next,
};
use windows_sys::Win32::System::Threading::GetCurrentProcessId;

use crate::Blacklist;

/// Closes the snapshot handle on every exit path.
struct Snapshot(HANDLE);

impl Drop for Snapshot {
    fn drop(&mut self) {
        // SAFETY: the handle came from a successful CreateToolhelp32Snapshot.
        unsafe { CloseHandle(self.0) };
    }
}

/// Lists the threads of this process from a system-wide toolhelp snapshot.
pub(crate) fn enumerate(exclude: Option<Tid>, blacklist: &Blacklist, out: &mut [Tid]) -> usize {
    // SAFETY: plain Win32 calls; the entry struct is sized before first use.
    unsafe {
        let handle = CreateToolhelp32Snapshot(TH32CS_SNAPTHREAD, 0);
        if handle == INVALID_HANDLE_VALUE {
            return 0;
        }
        let snapshot = Snapshot(handle);
        let process = GetCurrentProcessId();

        let mut entry: THREADENTRY32 = mem::zeroed();
        entry.dwSize = mem::size_of::<THREADENTRY32>() as u32;
        if Thread32First(snapshot.0, &mut entry) == 0 {
            return 0;
        }

        let mut count = 0;
        loop {
            if count == out.len() {
                break;
            }
            if entry.th32OwnerProcessID == process {
                let id = Tid::new(u64::from(entry.th32ThreadID));
                if Some(id) != exclude && !blacklist.contains(id) {
                    out[count] = id;
                    count += 1;
                }
            }
            entry.dwSize = mem::size_of::<THREADENTRY32>() as u32;
            if Thread32Next(snapshot.0, &mut entry) == 0 {
                break;
            }
        }
        count
    }
}
