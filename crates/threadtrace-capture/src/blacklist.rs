use threadtrace_types::Tid;

/// Threads that must never be signalled or suspended.
///
/// Rebuilt every time the subsystem goes from disarmed to armed; only ever
/// touched outside handler context.
#[derive(Debug, Clone, Default)]
pub struct Blacklist {
    ids: Vec<Tid>,
    capacity: usize,
}

impl Blacklist {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ids: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Returns `false` when the set is full or already holds `id`.
    pub fn insert(&mut self, id: Tid) -> bool {
        if self.ids.len() >= self.capacity || self.contains(id) {
            return false;
        }
        self.ids.push(id);
        true
    }

    pub fn contains(&self, id: Tid) -> bool {
        self.ids.contains(&id)
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[Tid] {
        &self.ids
    }
}
