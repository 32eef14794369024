use parking_lot::{Mutex, MutexGuard};

/// Sub-database-wide lock serializing the structural phase of enum-store and
/// multi-value compaction across attribute vectors. Shared by every vector
/// the manager owns.
pub struct Interlock {
    mutex: Mutex<()>,
}

impl Interlock {
    pub fn new() -> Self {
        Interlock { mutex: Mutex::new(()) }
    }

    pub fn guard(&self) -> MutexGuard<'_, ()> {
        self.mutex.lock()
    }
}

impl Default for Interlock {
    fn default() -> Self {
        Self::new()
    }
}
