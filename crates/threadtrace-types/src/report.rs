use facet::Facet;

use crate::Backtrace;

/// Owned, serializable view of a [`Backtrace`]: one entry per thread with
/// its visible frame addresses.
#[derive(Facet, Debug, Clone, PartialEq, Eq)]
pub struct BacktraceReport {
    pub threads: Vec<ThreadReport>,
}

#[derive(Facet, Debug, Clone, PartialEq, Eq)]
pub struct ThreadReport {
    pub id: u64,
    pub name: Option<String>,
    pub running: bool,
    pub frames: Vec<u64>,
}

impl Backtrace {
    pub fn report(&self) -> BacktraceReport {
        let threads = (0..self.thread_count())
            .map(|thread| ThreadReport {
                id: self.thread_id(thread).get(),
                name: self.thread_name(thread).map(str::to_owned),
                running: self.is_running(thread),
                frames: self.frames(thread).iter().map(|&addr| addr as u64).collect(),
            })
            .collect();
        BacktraceReport { threads }
    }
}
