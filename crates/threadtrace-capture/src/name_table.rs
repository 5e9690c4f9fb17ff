//! Process-wide table of thread names reported out of band.
//!
//! Written from exception-handler context, so it is a fixed ring guarded by a
//! bare spinlock: no allocation, no blocking lock. When full the oldest entry
//! is overwritten. Lookups walk from the newest entry backwards, so the last
//! name set for a thread wins.

use std::cell::UnsafeCell;
use std::hint::spin_loop;
use std::sync::atomic::{AtomicBool, Ordering};

use threadtrace_types::{ThreadName, Tid};

pub(crate) const MAX_NAMED_THREADS: usize = 256;

struct Ring {
    entries: [(Tid, ThreadName); MAX_NAMED_THREADS],
    next: usize,
    len: usize,
}

pub(crate) struct NameTable {
    locked: AtomicBool,
    ring: UnsafeCell<Ring>,
}

// SAFETY: `ring` is only reached through `with_ring`, which holds `locked`.
unsafe impl Sync for NameTable {}

impl NameTable {
    pub(crate) const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
            ring: UnsafeCell::new(Ring {
                entries: [(Tid::new(0), ThreadName::new()); MAX_NAMED_THREADS],
                next: 0,
                len: 0,
            }),
        }
    }

    fn with_ring<R>(&self, f: impl FnOnce(&mut Ring) -> R) -> R {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            spin_loop();
        }
        // SAFETY: the spinlock above gives us exclusive access.
        let result = f(unsafe { &mut *self.ring.get() });
        self.locked.store(false, Ordering::Release);
        result
    }

    pub(crate) fn set(&self, id: Tid, name: ThreadName) {
        self.with_ring(|ring| {
            ring.entries[ring.next] = (id, name);
            ring.next = (ring.next + 1) % MAX_NAMED_THREADS;
            ring.len = (ring.len + 1).min(MAX_NAMED_THREADS);
        });
    }

    pub(crate) fn get(&self, id: Tid) -> Option<ThreadName> {
        self.with_ring(|ring| {
            (0..ring.len)
                .map(|back| (ring.next + MAX_NAMED_THREADS - 1 - back) % MAX_NAMED_THREADS)
                .map(|slot| &ring.entries[slot])
                .find(|(entry_id, _)| *entry_id == id)
                .map(|(_, name)| *name)
        })
    }
}
