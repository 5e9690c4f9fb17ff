//! Running-state heuristic for platforms without a per-thread state flag:
//! a thread counts as running when its accumulated CPU time advanced since
//! the previous capture that saw it.

use parking_lot::Mutex;
use threadtrace_types::{RunState, Tid};

pub(crate) struct CpuTimeTable {
    samples: Mutex<Vec<(Tid, u64)>>,
    capacity: usize,
}

impl CpuTimeTable {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            samples: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    /// Records `cpu_time` for `id` and classifies the thread. A thread seen
    /// for the first time has nothing to compare against and is `Unknown`.
    pub(crate) fn observe(&self, id: Tid, cpu_time: u64) -> RunState {
        let mut samples = self.samples.lock();
        if let Some(entry) = samples.iter_mut().find(|(entry_id, _)| *entry_id == id) {
            let advanced = cpu_time > entry.1;
            entry.1 = cpu_time;
            return if advanced {
                RunState::Running
            } else {
                RunState::Other
            };
        }
        if self.capacity == 0 {
            return RunState::Unknown;
        }
        if samples.len() >= self.capacity {
            samples.remove(0);
        }
        samples.push((id, cpu_time));
        RunState::Unknown
    }
}
