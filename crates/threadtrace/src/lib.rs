//! Snapshots of every thread's call stack, taken from inside the process.
//!
//! ```no_run
//! threadtrace::init();
//! if threadtrace::start() {
//!     if let Some(backtrace) = threadtrace::capture(true) {
//!         for thread in 0..backtrace.thread_count() {
//!             println!("thread {} {:?}", backtrace.thread_id(thread), backtrace.thread_name(thread));
//!             for &address in backtrace.frames(thread) {
//!                 let (info, _found) = threadtrace::resolve_address(address);
//!                 println!("    {info}");
//!             }
//!         }
//!         threadtrace::free(backtrace);
//!     }
//!     threadtrace::stop();
//! }
//! ```
//!
//! Capture must be armed with [`start`] before [`capture`] returns anything;
//! arming is reference counted, so independent users can nest
//! [`start`]/[`stop`] pairs.

use tracing::debug;

pub use threadtrace_capture::{
    CaptureError, CaptureOptions, DEFAULT_DENYLIST, current_thread, is_armed,
};
pub use threadtrace_symbolize::{Merge, Resolver, ResolverOptions, SymbolSource, SymbolizeError};
pub use threadtrace_types::{
    AddressInfo, Backtrace, BacktraceReport, RunState, ThreadRecord, ThreadReport, Tid,
};

/// One-time setup with default options: the capture coordinator and the
/// address resolver. Safe to call more than once.
pub fn init() {
    init_with(CaptureOptions::default(), ResolverOptions::default());
}

/// Like [`init`], with explicit options. Only the first initialization
/// decides the options.
pub fn init_with(capture: CaptureOptions, resolver: ResolverOptions) {
    threadtrace_capture::init_with(capture);
    threadtrace_symbolize::init_with(resolver);
    debug!("threadtrace initialized");
}

/// Arms capture. Returns `false` when this platform cannot capture or
/// [`init`] was never called.
pub fn start() -> bool {
    threadtrace_capture::start()
}

/// Undoes one successful [`start`].
pub fn stop() {
    threadtrace_capture::stop()
}

/// Captures every live thread, skipping the caller unless
/// `include_current_thread`. `None` when not armed or when no thread
/// produced a stack.
pub fn capture(include_current_thread: bool) -> Option<Backtrace> {
    threadtrace_capture::capture(include_current_thread)
}

/// Releases a snapshot. Dropping it has the same effect.
pub fn free(backtrace: Backtrace) {
    drop(backtrace);
}

/// Symbolizes one address. Addresses are treated as return addresses, so
/// pass a function's entry plus one rather than the entry itself.
pub fn resolve_address(address: usize) -> (AddressInfo, bool) {
    threadtrace_symbolize::resolve_address(address)
}

/// Renders a snapshot as JSON: thread id, name, running flag and visible
/// frame addresses per thread.
pub fn to_json(backtrace: &Backtrace) -> Result<String, String> {
    facet_json::to_string(&backtrace.report()).map_err(|e| format!("encode backtrace: {e}"))
}
