use std::fmt;

use crate::BoundedStr;

/// Capacity of a thread's frame buffer.
pub const MAX_FRAMES: usize = 256;

/// Byte capacity of a thread name.
pub const MAX_THREAD_NAME_LEN: usize = 32;

pub type ThreadName = BoundedStr<MAX_THREAD_NAME_LEN>;

/// OS-level thread identifier: a kernel TID on Linux, a thread ID on Windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Tid(u64);

impl Tid {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    Running,
    /// Known and not running: sleeping, stopped, waiting on I/O, ...
    Other,
    #[default]
    Unknown,
}

impl RunState {
    /// Maps the single state character of `/proc/<pid>/task/<tid>/stat`.
    pub fn from_proc_state(state: u8) -> Self {
        match state {
            b'R' => Self::Running,
            b'S' | b'D' | b'T' | b't' | b'Z' | b'X' | b'x' | b'I' | b'W' | b'P' | b'K' => {
                Self::Other
            }
            _ => Self::Unknown,
        }
    }

    pub fn is_running(self) -> bool {
        matches!(self, Self::Running)
    }
}

/// Fixed-capacity list of raw return addresses, innermost first.
///
/// Never reallocates, so it can be written from a signal handler.
#[derive(Clone)]
pub struct FrameBuffer {
    addrs: [usize; MAX_FRAMES],
    len: usize,
}

impl FrameBuffer {
    pub const fn new() -> Self {
        Self {
            addrs: [0; MAX_FRAMES],
            len: 0,
        }
    }

    /// Appends `addr`; returns `false` once the buffer is full.
    #[inline]
    pub fn push(&mut self, addr: usize) -> bool {
        if self.len >= MAX_FRAMES {
            return false;
        }
        self.addrs[self.len] = addr;
        self.len += 1;
        true
    }

    #[inline]
    pub fn clear(&mut self) {
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len >= MAX_FRAMES
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.addrs[..self.len]
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.as_slice().iter().copied().map(HexAddr))
            .finish()
    }
}

struct HexAddr(usize);

impl fmt::Debug for HexAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// One thread's share of a capture.
///
/// Name and state are filled on the requesting thread before any stack is
/// walked; `frames` is filled by the walker. The stored frames are raw: the
/// owning [`crate::Backtrace`] applies the platform's handler-frame skip.
#[derive(Debug, Clone)]
pub struct ThreadRecord {
    id: Tid,
    name: Option<ThreadName>,
    state: RunState,
    frames: FrameBuffer,
}

impl ThreadRecord {
    pub fn new(id: Tid) -> Self {
        Self {
            id,
            name: None,
            state: RunState::Unknown,
            frames: FrameBuffer::new(),
        }
    }

    pub fn id(&self) -> Tid {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_ref().and_then(|name| name.non_empty())
    }

    pub fn set_name(&mut self, name: Option<ThreadName>) {
        self.name = name;
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn set_state(&mut self, state: RunState) {
        self.state = state;
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    pub fn raw_frames(&self) -> &[usize] {
        self.frames.as_slice()
    }

    pub fn frames_mut(&mut self) -> &mut FrameBuffer {
        &mut self.frames
    }
}
