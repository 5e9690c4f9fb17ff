//! In-process stack capture for every thread of the running process.
//!
//! On Linux each target thread is interrupted with a dedicated real-time
//! signal and unwinds its own stack from the handler; on Windows targets are
//! suspended and walked from the requesting thread. Both sit behind the
//! traits in [`backend`] and share one [`Coordinator`].
//!
//! The process-wide entry points ([`init`], [`start`], [`stop`], [`capture`])
//! drive a single global coordinator over the native backend.

mod backend;
mod blacklist;
mod coordinator;
#[cfg_attr(not(windows), allow(dead_code))]
mod cpu_time;
mod error;
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
mod handshake;
#[cfg_attr(not(windows), allow(dead_code))]
mod name_table;
mod options;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(not(any(target_os = "linux", windows)))]
mod unsupported;
#[cfg(windows)]
mod windows;

use std::sync::OnceLock;

use threadtrace_types::{Backtrace, Tid};
use tracing::{debug, warn};

pub use backend::{Platform, StackWalker, ThreadEnumerator, ThreadMetadata};
pub use blacklist::Blacklist;
pub use coordinator::Coordinator;
pub use error::CaptureError;
pub use options::{CaptureOptions, DEFAULT_DENYLIST};

#[cfg(target_os = "linux")]
pub use linux::LinuxPlatform as NativePlatform;
#[cfg(not(any(target_os = "linux", windows)))]
pub use unsupported::UnsupportedPlatform as NativePlatform;
#[cfg(windows)]
pub use windows::WindowsPlatform as NativePlatform;

static COORDINATOR: OnceLock<Coordinator<NativePlatform>> = OnceLock::new();

/// Sets up the global coordinator with default options. Idempotent.
pub fn init() -> &'static Coordinator<NativePlatform> {
    init_with(CaptureOptions::default())
}

/// Sets up the global coordinator. Only the first call's options take
/// effect; later calls return the existing coordinator.
pub fn init_with(options: CaptureOptions) -> &'static Coordinator<NativePlatform> {
    if let Some(existing) = COORDINATOR.get() {
        debug!("capture subsystem already initialized; ignoring new options");
        return existing;
    }
    COORDINATOR.get_or_init(|| {
        debug!(?options, "initializing capture subsystem");
        Coordinator::new(NativePlatform::new(&options), options)
    })
}

pub fn coordinator() -> Result<&'static Coordinator<NativePlatform>, CaptureError> {
    COORDINATOR.get().ok_or(CaptureError::NotInitialized)
}

/// Arms capture (reference counted). `false` when the subsystem cannot be
/// used on this platform or [`init`] has not run.
pub fn start() -> bool {
    match coordinator() {
        Ok(coordinator) => coordinator.start(),
        Err(error) => {
            warn!(%error, "cannot start thread capture");
            false
        }
    }
}

/// Releases one [`start`].
pub fn stop() {
    match coordinator() {
        Ok(coordinator) => coordinator.stop(),
        Err(error) => warn!(%error, "cannot stop thread capture"),
    }
}

/// ID of the calling thread, once [`init`] has run.
pub fn current_thread() -> Option<Tid> {
    COORDINATOR
        .get()
        .map(|coordinator| coordinator.platform().current_thread())
}

pub fn is_armed() -> bool {
    COORDINATOR.get().is_some_and(Coordinator::is_armed)
}

/// Snapshots every live thread's stack. `None` unless armed, or when no
/// thread produced any frames.
pub fn capture(include_current_thread: bool) -> Option<Backtrace> {
    COORDINATOR.get()?.capture(include_current_thread)
}
