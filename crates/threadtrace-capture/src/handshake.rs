//! Pointer hand-off between a requesting thread and signal handlers.
//!
//! The requester publishes a pointer to its in-flight session; handlers
//! running on arbitrary threads read it. Handler context cannot block on an
//! ordinary lock, so the hand-off is guarded by a single atomic integer:
//!
//! - `0`: free
//! - `-1`: held exclusively by the requester while it swaps the pointer
//! - `n > 0`: `n` handlers are currently reading
//!
//! Readers never wait on each other. The writer spins until the count drains
//! back to zero, so once [`Handoff::retract`] returns no handler can still be
//! touching the retracted session.

use std::hint::spin_loop;
use std::ptr;
use std::sync::atomic::{AtomicI32, AtomicPtr, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

const FREE: i32 = 0;
const EXCLUSIVE: i32 = -1;

pub(crate) struct HandshakeLock {
    state: AtomicI32,
}

impl HandshakeLock {
    pub(crate) const fn new() -> Self {
        Self {
            state: AtomicI32::new(FREE),
        }
    }

    pub(crate) fn lock_exclusive(&self) {
        while self
            .state
            .compare_exchange_weak(FREE, EXCLUSIVE, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            spin_loop();
        }
    }

    pub(crate) fn unlock_exclusive(&self) {
        let previous = self.state.swap(FREE, Ordering::Release);
        debug_assert_eq!(previous, EXCLUSIVE, "handshake released without being held");
    }

    /// Async-signal-safe.
    pub(crate) fn lock_shared(&self) {
        loop {
            let current = self.state.load(Ordering::Relaxed);
            if current >= FREE
                && self
                    .state
                    .compare_exchange_weak(
                        current,
                        current + 1,
                        Ordering::Acquire,
                        Ordering::Relaxed,
                    )
                    .is_ok()
            {
                return;
            }
            spin_loop();
        }
    }

    /// Async-signal-safe.
    pub(crate) fn unlock_shared(&self) {
        self.state.fetch_sub(1, Ordering::Release);
    }

    #[cfg(test)]
    fn raw(&self) -> i32 {
        self.state.load(Ordering::Acquire)
    }
}

/// A published, non-owning pointer guarded by a [`HandshakeLock`].
pub(crate) struct Handoff<T> {
    lock: HandshakeLock,
    target: AtomicPtr<T>,
}

impl<T> Handoff<T> {
    pub(crate) const fn new() -> Self {
        Self {
            lock: HandshakeLock::new(),
            target: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// The caller must keep `*target` alive until the matching `retract`.
    pub(crate) fn publish(&self, target: *const T) {
        self.lock.lock_exclusive();
        self.target.store(target.cast_mut(), Ordering::Release);
        self.lock.unlock_exclusive();
    }

    /// Waits for every in-flight reader to leave, then clears the pointer.
    pub(crate) fn retract(&self) {
        self.lock.lock_exclusive();
        self.target.store(ptr::null_mut(), Ordering::Release);
        self.lock.unlock_exclusive();
    }

    /// Runs `f` on the published target, if any, under the read side of the
    /// lock. Async-signal-safe as long as `f` is.
    pub(crate) fn read<R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
        self.lock.lock_shared();
        let target = self.target.load(Ordering::Acquire);
        // SAFETY: a non-null target stays alive until `retract`, which cannot
        // complete while we hold a shared slot.
        let result = f(unsafe { target.as_ref() });
        self.lock.unlock_shared();
        result
    }
}

/// Polls `remaining` every `poll` until it reaches zero or `timeout` elapses.
/// Returns `true` when every thread reported in time.
pub(crate) fn wait_until_zero(remaining: &AtomicUsize, timeout: Duration, poll: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if remaining.load(Ordering::Acquire) == 0 {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        std::thread::sleep(poll.min(deadline - now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn readers_share_and_writer_excludes() {
        let lock = HandshakeLock::new();
        lock.lock_shared();
        lock.lock_shared();
        assert_eq!(lock.raw(), 2);
        lock.unlock_shared();
        lock.unlock_shared();
        assert_eq!(lock.raw(), 0);
        lock.lock_exclusive();
        assert_eq!(lock.raw(), -1);
        lock.unlock_exclusive();
        assert_eq!(lock.raw(), 0);
    }

    #[test]
    fn read_sees_published_target_until_retract() {
        let handoff = Handoff::<u32>::new();
        assert_eq!(handoff.read(|t| t.copied()), None);
        let value = 17u32;
        handoff.publish(&value);
        assert_eq!(handoff.read(|t| t.copied()), Some(17));
        handoff.retract();
        assert_eq!(handoff.read(|t| t.copied()), None);
    }

    #[test]
    fn retract_waits_for_in_flight_reader() {
        let handoff = Arc::new(Handoff::<u32>::new());
        let value = Box::leak(Box::new(5u32));
        handoff.publish(value);

        let entered = Arc::new(AtomicBool::new(false));
        let release = Arc::new(AtomicBool::new(false));
        let reader = {
            let handoff = Arc::clone(&handoff);
            let entered = Arc::clone(&entered);
            let release = Arc::clone(&release);
            std::thread::spawn(move || {
                handoff.read(|t| {
                    entered.store(true, Ordering::Release);
                    while !release.load(Ordering::Acquire) {
                        spin_loop();
                    }
                    t.copied()
                })
            })
        };
        while !entered.load(Ordering::Acquire) {
            spin_loop();
        }

        let retracted = Arc::new(AtomicBool::new(false));
        let writer = {
            let handoff = Arc::clone(&handoff);
            let retracted = Arc::clone(&retracted);
            std::thread::spawn(move || {
                handoff.retract();
                retracted.store(true, Ordering::Release);
            })
        };

        std::thread::sleep(Duration::from_millis(20));
        assert!(!retracted.load(Ordering::Acquire));
        release.store(true, Ordering::Release);

        assert_eq!(reader.join().unwrap(), Some(5));
        writer.join().unwrap();
        assert!(retracted.load(Ordering::Acquire));
    }

    #[test]
    fn concurrent_publishers_never_overlap() {
        let handoff = Arc::new(Handoff::<usize>::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let workers: Vec<_> = (0..4)
            .map(|worker| {
                let handoff = Arc::clone(&handoff);
                let inside = Arc::clone(&inside);
                std::thread::spawn(move || {
                    for _ in 0..1_000 {
                        handoff.lock.lock_exclusive();
                        assert_eq!(inside.fetch_add(1, Ordering::AcqRel), 0);
                        handoff.target.store(worker as *mut usize, Ordering::Release);
                        inside.fetch_sub(1, Ordering::AcqRel);
                        handoff.lock.unlock_exclusive();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
    }

    #[test]
    fn wait_returns_early_and_times_out() {
        let done = AtomicUsize::new(0);
        assert!(wait_until_zero(&done, Duration::from_millis(50), Duration::from_millis(1)));

        let stuck = AtomicUsize::new(1);
        let started = Instant::now();
        assert!(!wait_until_zero(&stuck, Duration::from_millis(30), Duration::from_millis(1)));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(30));
        assert!(elapsed < Duration::from_millis(500), "waited {elapsed:?}");
    }
}
