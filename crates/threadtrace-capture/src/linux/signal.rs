//! Signal-driven stack capture.
//!
//! The requester publishes a [`Session`] through [`SESSION`] and sends the
//! capture signal to each target with `tgkill`. Every target runs
//! [`on_capture_signal`], finds its own record and unwinds into it. Nothing
//! here allocates or takes a blocking lock on the handler side.

use std::ffi::c_void;
use std::io;
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use libc::c_int;
use threadtrace_types::{FrameBuffer, ThreadRecord, Tid};

use crate::handshake::{Handoff, wait_until_zero};
use crate::{CaptureError, CaptureOptions};

/// Raw frames recorded ahead of the interrupted code: the handler entry and
/// the kernel's signal-return trampoline.
pub(crate) const SKIPPED_FRAMES: usize = 2;

/// State shared with handlers for the duration of one capture. Lives on the
/// requester's stack; only reachable through [`SESSION`].
struct Session {
    ids: *const Tid,
    records: *mut ThreadRecord,
    reported: *const AtomicBool,
    len: usize,
    remaining: AtomicUsize,
}

static SESSION: Handoff<Session> = Handoff::new();

pub(crate) fn current_tid() -> Tid {
    // SAFETY: gettid has no preconditions and is async-signal-safe.
    Tid::new(unsafe { libc::syscall(libc::SYS_gettid) } as u64)
}

pub(crate) fn install(signal: c_int) -> Result<libc::sigaction, CaptureError> {
    // SAFETY: plain sigaction(2) calls on zero-initialized structs.
    unsafe {
        let mut action: libc::sigaction = mem::zeroed();
        action.sa_sigaction = on_capture_signal as *const () as usize;
        action.sa_flags = libc::SA_SIGINFO | libc::SA_RESTART;
        libc::sigemptyset(&mut action.sa_mask);

        let mut previous: libc::sigaction = mem::zeroed();
        if libc::sigaction(signal, &action, &mut previous) != 0 {
            return Err(CaptureError::InstallHandler {
                signal,
                source: io::Error::last_os_error(),
            });
        }
        Ok(previous)
    }
}

pub(crate) fn restore(signal: c_int, previous: &libc::sigaction) -> Result<(), CaptureError> {
    // SAFETY: `previous` came out of a successful sigaction(2) call.
    if unsafe { libc::sigaction(signal, previous, ptr::null_mut()) } != 0 {
        return Err(CaptureError::RestoreHandler {
            signal,
            source: io::Error::last_os_error(),
        });
    }
    Ok(())
}

/// Blocks `signal` on the calling thread until dropped, so a late delivery
/// cannot land on the requester while it holds the handshake exclusively.
struct BlockedSignal {
    previous: libc::sigset_t,
}

impl BlockedSignal {
    fn new(signal: c_int) -> Self {
        // SAFETY: sigset manipulation on locally owned sets.
        unsafe {
            let mut set: libc::sigset_t = mem::zeroed();
            let mut previous: libc::sigset_t = mem::zeroed();
            libc::sigemptyset(&mut set);
            libc::sigaddset(&mut set, signal);
            libc::pthread_sigmask(libc::SIG_BLOCK, &set, &mut previous);
            Self { previous }
        }
    }
}

impl Drop for BlockedSignal {
    fn drop(&mut self) {
        // SAFETY: restores the mask saved in `new`.
        unsafe {
            libc::pthread_sigmask(libc::SIG_SETMASK, &self.previous, ptr::null_mut());
        }
    }
}

/// Signals every record's thread and waits, bounded by `options.timeout`,
/// for them to fill their frame buffers. Returns how many reported.
pub(crate) fn collect(signal: c_int, records: &mut [ThreadRecord], options: &CaptureOptions) -> usize {
    let ids: Vec<Tid> = records.iter().map(ThreadRecord::id).collect();
    let reported: Vec<AtomicBool> = ids.iter().map(|_| AtomicBool::new(false)).collect();
    let session = Session {
        ids: ids.as_ptr(),
        records: records.as_mut_ptr(),
        reported: reported.as_ptr(),
        len: ids.len(),
        remaining: AtomicUsize::new(ids.len()),
    };

    {
        let _blocked = BlockedSignal::new(signal);
        SESSION.publish(&session);
    }

    // SAFETY: getpid has no preconditions.
    let pid = unsafe { libc::getpid() };
    for id in &ids {
        // SAFETY: tgkill only targets threads of our own thread group.
        let sent = unsafe {
            libc::syscall(libc::SYS_tgkill, pid, id.get() as libc::pid_t, signal)
        };
        if sent != 0 {
            // The thread exited after enumeration; nobody will report for it.
            session.remaining.fetch_sub(1, Ordering::AcqRel);
        }
    }

    wait_until_zero(&session.remaining, options.timeout, options.poll_interval);

    {
        let _blocked = BlockedSignal::new(signal);
        SESSION.retract();
    }

    reported
        .iter()
        .filter(|flag| flag.load(Ordering::Acquire))
        .count()
}

extern "C" fn on_capture_signal(_signal: c_int, _info: *mut libc::siginfo_t, context: *mut c_void) {
    // SAFETY: errno is thread-local; saved and restored around the handler.
    let saved_errno = unsafe { *libc::__errno_location() };
    let id = current_tid();

    SESSION.read(|session| {
        if let Some(session) = session {
            // SAFETY: the session and everything it points to stay alive
            // while we hold the read side of the hand-off.
            unsafe { record_own_stack(session, id, context) };
        }
    });

    // SAFETY: see above.
    unsafe { *libc::__errno_location() = saved_errno };
}

/// # Safety
///
/// Must run inside [`on_capture_signal`] while `session` is published.
unsafe fn record_own_stack(session: &Session, id: Tid, context: *mut c_void) {
    // SAFETY: `ids` has `len` entries and is never written while published.
    let ids = unsafe { std::slice::from_raw_parts(session.ids, session.len) };
    let Some(index) = ids.iter().position(|&candidate| candidate == id) else {
        return;
    };

    // A signal left over from an earlier capture may already have reported.
    // SAFETY: index < len.
    let reported = unsafe { &*session.reported.add(index) };
    if reported.swap(true, Ordering::AcqRel) {
        return;
    }

    // SAFETY: only this thread's handler touches record `index`, and the
    // requester does not read any record until the session is retracted.
    let record = unsafe { &mut *session.records.add(index) };
    unwind_into(record.frames_mut(), interrupted_pc(context));

    session.remaining.fetch_sub(1, Ordering::Release);
}

/// Unwinds the current (handler) stack into `frames`.
///
/// The stored layout is `[handler, trampoline, interrupted pc, callers...]`,
/// which is what [`SKIPPED_FRAMES`] hides. Unwinder-internal frames above the
/// handler are dropped once the interrupted pc is found; if it never is, the
/// raw unwinder output is kept as is.
fn unwind_into(frames: &mut FrameBuffer, interrupted: Option<usize>) {
    frames.clear();
    let mut previous = 0usize;
    let mut synced = interrupted.is_none();

    // SAFETY: we are the only code touching this thread's stack walk; the
    // callback neither allocates nor panics.
    unsafe {
        backtrace::trace_unsynchronized(|frame| {
            let ip = frame.ip() as usize;
            // End of stack.
            if ip == 0 {
                return false;
            }
            if !synced && Some(ip) == interrupted {
                frames.clear();
                frames.push(on_capture_signal as *const () as usize);
                frames.push(previous);
                synced = true;
            }
            previous = ip;
            frames.push(ip)
        });
    }
}

#[cfg(target_arch = "x86_64")]
fn interrupted_pc(context: *mut c_void) -> Option<usize> {
    if context.is_null() {
        return None;
    }
    // SAFETY: the kernel passes a ucontext_t as the third handler argument.
    let context = unsafe { &*(context as *const libc::ucontext_t) };
    Some(context.uc_mcontext.gregs[libc::REG_RIP as usize] as usize)
}

#[cfg(target_arch = "aarch64")]
fn interrupted_pc(context: *mut c_void) -> Option<usize> {
    if context.is_null() {
        return None;
    }
    // SAFETY: the kernel passes a ucontext_t as the third handler argument.
    let context = unsafe { &*(context as *const libc::ucontext_t) };
    Some(context.uc_mcontext.pc as usize)
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
fn interrupted_pc(_context: *mut c_void) -> Option<usize> {
    None
}
