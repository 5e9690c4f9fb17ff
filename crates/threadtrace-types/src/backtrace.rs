use crate::{RunState, ThreadRecord, Tid};

/// Maps a public frame index onto a raw frame buffer slot.
///
/// `index` may be negative, counting back from the outermost visible frame
/// (`-1` is the last one). `visible` is the number of frames left after the
/// leading `skip` handler frames. Returns `None` when out of range.
pub fn normalize_frame_index(index: isize, visible: usize, skip: usize) -> Option<usize> {
    let resolved = if index < 0 {
        visible.checked_sub(index.unsigned_abs())?
    } else {
        let index = index as usize;
        if index >= visible {
            return None;
        }
        index
    };
    skip.checked_add(resolved)
}

/// Immutable multi-thread snapshot produced by one successful capture.
///
/// Threads are kept in enumeration order. Frames are stored raw; the first
/// `skipped_frames` entries of each thread belong to the capture machinery and
/// every accessor hides them.
#[derive(Debug, Clone)]
pub struct Backtrace {
    threads: Vec<ThreadRecord>,
    skipped_frames: usize,
}

impl Backtrace {
    pub fn new(threads: Vec<ThreadRecord>, skipped_frames: usize) -> Self {
        Self {
            threads,
            skipped_frames,
        }
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    pub fn threads(&self) -> impl ExactSizeIterator<Item = &ThreadRecord> + '_ {
        self.threads.iter()
    }

    pub fn thread(&self, thread: usize) -> &ThreadRecord {
        &self.threads[thread]
    }

    pub fn thread_id(&self, thread: usize) -> Tid {
        self.threads[thread].id()
    }

    pub fn thread_name(&self, thread: usize) -> Option<&str> {
        self.threads[thread].name()
    }

    pub fn thread_state(&self, thread: usize) -> RunState {
        self.threads[thread].state()
    }

    pub fn is_running(&self, thread: usize) -> bool {
        self.threads[thread].is_running()
    }

    /// Index of the thread with `id`. `hint` is tried first, so callers that
    /// track the same thread across snapshots usually avoid the scan.
    pub fn find_thread_by_id(&self, id: Tid, hint: usize) -> Option<usize> {
        if self.threads.get(hint).is_some_and(|t| t.id() == id) {
            return Some(hint);
        }
        self.threads.iter().position(|t| t.id() == id)
    }

    pub fn skipped_frames(&self) -> usize {
        self.skipped_frames
    }

    pub fn frame_count(&self, thread: usize) -> usize {
        self.threads[thread]
            .raw_frames()
            .len()
            .saturating_sub(self.skipped_frames)
    }

    /// Visible frames of `thread`, innermost first.
    pub fn frames(&self, thread: usize) -> &[usize] {
        let raw = self.threads[thread].raw_frames();
        &raw[self.skipped_frames.min(raw.len())..]
    }

    /// # Panics
    ///
    /// Panics when `frame` falls outside `-frame_count..frame_count`.
    pub fn frame_address(&self, thread: usize, frame: isize) -> usize {
        let visible = self.frame_count(thread);
        let Some(raw_index) = normalize_frame_index(frame, visible, self.skipped_frames) else {
            panic!(
                "invariant violated: frame index {frame} out of range for thread {thread} with {visible} frames"
            );
        };
        self.threads[thread].raw_frames()[raw_index]
    }

    pub fn into_threads(self) -> Vec<ThreadRecord> {
        self.threads
    }
}
