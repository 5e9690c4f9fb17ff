//! Capability traits implemented once per platform.
//!
//! The coordinator is written against these; the concrete implementation is
//! picked at build time (`crate::NativePlatform`).

use threadtrace_types::{RunState, ThreadName, ThreadRecord, Tid};

use crate::{Blacklist, CaptureError, CaptureOptions};

pub trait ThreadEnumerator {
    fn current_thread(&self) -> Tid;

    /// Writes the IDs of live threads into `out` and returns how many were
    /// written. Skips the calling thread unless `include_self`, skips every
    /// blacklisted thread and stops silently when `out` is full. Returns 0
    /// when the thread list cannot be read at all.
    fn enumerate(&self, include_self: bool, blacklist: &Blacklist, out: &mut [Tid]) -> usize;
}

pub trait ThreadMetadata {
    fn read_name(&self, id: Tid) -> Option<ThreadName>;

    fn read_state(&self, id: Tid) -> RunState;
}

pub trait StackWalker {
    /// Leading raw frames of every record that belong to the capture
    /// machinery (handler and trampoline) rather than to the thread.
    const SKIPPED_FRAMES: usize;

    /// Installs whatever the platform needs to walk other threads.
    fn arm(&self) -> Result<(), CaptureError>;

    /// Undoes [`StackWalker::arm`].
    fn disarm(&self) -> Result<(), CaptureError>;

    /// Fills the frame buffer of every record, giving up on threads that do
    /// not report within `options.timeout`. Returns how many reported.
    fn walk(&self, records: &mut [ThreadRecord], options: &CaptureOptions) -> usize;
}

pub trait Platform: ThreadEnumerator + ThreadMetadata + StackWalker + Send + Sync {}

impl<T> Platform for T where T: ThreadEnumerator + ThreadMetadata + StackWalker + Send + Sync {}
