use std::time::Duration;

/// Thread names that are never signalled. Both run library internals that
/// are known to misbehave when interrupted: glib's main-context worker and
/// PulseAudio's mainloop thread.
pub const DEFAULT_DENYLIST: &[&str] = &["gmain", "threaded-ml"];

/// Fixed for the lifetime of the capture subsystem; passed to `init_with`.
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// Upper bound on how long a capture waits for threads to report.
    pub timeout: Duration,
    /// Granularity of the completion poll.
    pub poll_interval: Duration,
    /// Enumeration stops silently after this many threads.
    pub max_threads: usize,
    /// Signal reserved for stack capture. Only used on Linux.
    pub signal: i32,
    /// Threads whose name matches one of these exactly are blacklisted at arm time.
    pub denylist: Vec<String>,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(50),
            poll_interval: Duration::from_millis(1),
            max_threads: 256,
            signal: default_signal(),
            denylist: DEFAULT_DENYLIST.iter().map(|name| (*name).to_owned()).collect(),
        }
    }
}

#[cfg(target_os = "linux")]
fn default_signal() -> i32 {
    libc::SIGRTMIN() + 3
}

#[cfg(not(target_os = "linux"))]
fn default_signal() -> i32 {
    0
}
