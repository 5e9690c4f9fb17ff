//! Platform-independent data model for multi-thread backtrace snapshots.
//!
//! Everything here is plain data. Types that the capture machinery writes
//! from signal or exception handler context ([`FrameBuffer`], [`BoundedStr`])
//! have fixed capacity and never allocate.

mod address;
mod backtrace;
mod bounded;
mod report;
mod thread;

pub use address::{AddressField, AddressInfo, MAX_ADDRESS_FIELD_LEN};
pub use backtrace::{Backtrace, normalize_frame_index};
pub use bounded::BoundedStr;
pub use report::{BacktraceReport, ThreadReport};
pub use thread::{FrameBuffer, MAX_FRAMES, MAX_THREAD_NAME_LEN, RunState, ThreadName, ThreadRecord, Tid};
