//! Linux backend: `/proc/self/task` for enumeration and metadata, a
//! real-time signal plus `tgkill` for stack walks.

mod procfs;
mod signal;

use parking_lot::Mutex;
use threadtrace_types::{RunState, ThreadName, ThreadRecord, Tid};
use tracing::debug;

use crate::{Blacklist, CaptureError, CaptureOptions, StackWalker, ThreadEnumerator, ThreadMetadata};

use self::procfs::ProcTasks;

pub struct LinuxPlatform {
    tasks: ProcTasks,
    signal: libc::c_int,
    previous: Mutex<Option<libc::sigaction>>,
}

impl LinuxPlatform {
    pub fn new(options: &CaptureOptions) -> Self {
        Self {
            tasks: ProcTasks::current_process(),
            signal: options.signal,
            previous: Mutex::new(None),
        }
    }

    pub fn signal(&self) -> libc::c_int {
        self.signal
    }
}

impl ThreadEnumerator for LinuxPlatform {
    fn current_thread(&self) -> Tid {
        signal::current_tid()
    }

    fn enumerate(&self, include_self: bool, blacklist: &Blacklist, out: &mut [Tid]) -> usize {
        let exclude = (!include_self).then(|| self.current_thread());
        self.tasks.enumerate(exclude, blacklist, out)
    }
}

impl ThreadMetadata for LinuxPlatform {
    fn read_name(&self, id: Tid) -> Option<ThreadName> {
        self.tasks.read_name(id)
    }

    fn read_state(&self, id: Tid) -> RunState {
        self.tasks.read_state(id)
    }
}

impl StackWalker for LinuxPlatform {
    const SKIPPED_FRAMES: usize = signal::SKIPPED_FRAMES;

    fn arm(&self) -> Result<(), CaptureError> {
        let mut previous = self.previous.lock();
        if previous.is_some() {
            return Ok(());
        }
        *previous = Some(signal::install(self.signal)?);
        debug!(signal = self.signal, "installed capture signal handler");
        Ok(())
    }

    fn disarm(&self) -> Result<(), CaptureError> {
        let mut previous = self.previous.lock();
        let Some(action) = previous.as_ref() else {
            return Ok(());
        };
        signal::restore(self.signal, action)?;
        *previous = None;
        debug!(signal = self.signal, "restored previous signal disposition");
        Ok(())
    }

    fn walk(&self, records: &mut [ThreadRecord], options: &CaptureOptions) -> usize {
        signal::collect(self.signal, records, options)
    }
}
