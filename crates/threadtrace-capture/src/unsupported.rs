//! Fallback for targets with neither backend: nothing to enumerate, and
//! arming reports the platform as unsupported.

use threadtrace_types::{RunState, ThreadName, ThreadRecord, Tid};

use crate::{Blacklist, CaptureError, CaptureOptions, StackWalker, ThreadEnumerator, ThreadMetadata};

pub struct UnsupportedPlatform;

impl UnsupportedPlatform {
    pub fn new(_options: &CaptureOptions) -> Self {
        Self
    }
}

impl ThreadEnumerator for UnsupportedPlatform {
    fn current_thread(&self) -> Tid {
        Tid::default()
    }

    fn enumerate(&self, _include_self: bool, _blacklist: &Blacklist, _out: &mut [Tid]) -> usize {
        0
    }
}

impl ThreadMetadata for UnsupportedPlatform {
    fn read_name(&self, _id: Tid) -> Option<ThreadName> {
        None
    }

    fn read_state(&self, _id: Tid) -> RunState {
        RunState::Unknown
    }
}

impl StackWalker for UnsupportedPlatform {
    const SKIPPED_FRAMES: usize = 0;

    fn arm(&self) -> Result<(), CaptureError> {
        Err(CaptureError::UnsupportedPlatform {
            target_os: std::env::consts::OS,
        })
    }

    fn disarm(&self) -> Result<(), CaptureError> {
        Ok(())
    }

    fn walk(&self, _records: &mut [ThreadRecord], _options: &CaptureOptions) -> usize {
        0
    }
}
