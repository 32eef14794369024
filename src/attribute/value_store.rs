use crossbeam::atomic::AtomicCell;
use parking_lot::RwLock;
use std::sync::Arc;

use crate::core::config::GrowStrategy;
use crate::core::types::Lid;
use crate::memory::generation::GenerationHandler;

/// Fixed-capacity lid-indexed cell array. Cells are atomic so the single
/// writer can publish values while readers load them without locks.
pub struct ValueBuffer<T: Copy> {
    cells: Box<[AtomicCell<T>]>,
}

impl<T: Copy + Default> ValueBuffer<T> {
    fn with_capacity(capacity: u32) -> Self {
        let cells: Vec<AtomicCell<T>> =
            (0..capacity).map(|_| AtomicCell::new(T::default())).collect();
        ValueBuffer { cells: cells.into_boxed_slice() }
    }
}

impl<T: Copy> ValueBuffer<T> {
    pub fn load(&self, lid: Lid) -> T {
        self.cells[lid as usize].load()
    }

    pub fn get(&self, lid: Lid) -> Option<T> {
        self.cells.get(lid as usize).map(|c| c.load())
    }

    pub fn capacity(&self) -> u32 {
        self.cells.len() as u32
    }
}

/// Growable single-writer / multi-reader columnar storage. Readers capture
/// an `Arc` view once per guard and then do plain atomic loads; growth swaps
/// in a larger buffer and retires the old one through the generation holder.
pub struct ValueStore<T: Copy + Default + Send + Sync + 'static> {
    buf: RwLock<Arc<ValueBuffer<T>>>,
    grow: GrowStrategy,
}

impl<T: Copy + Default + Send + Sync + 'static> ValueStore<T> {
    pub fn new(grow: GrowStrategy) -> Self {
        let initial = grow.initial_docs.max(1);
        ValueStore {
            buf: RwLock::new(Arc::new(ValueBuffer::with_capacity(initial))),
            grow,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.buf.read().capacity()
    }

    /// Grows storage so `wanted` lids fit. The old buffer stays readable for
    /// every guard that captured it and is freed by a later reclaim pass.
    pub fn ensure_capacity(&self, wanted: u32, generations: &GenerationHandler) {
        let current = self.capacity();
        if wanted <= current {
            return;
        }
        let new_capacity = self.grow.next_capacity(current, wanted);
        self.replace_buffer(new_capacity, generations);
    }

    /// Reallocates down to `limit` cells (used after lid-space compaction).
    pub fn shrink(&self, limit: u32, generations: &GenerationHandler) {
        let limit = limit.max(1);
        if limit >= self.capacity() {
            return;
        }
        self.replace_buffer(limit, generations);
    }

    fn replace_buffer(&self, new_capacity: u32, generations: &GenerationHandler) {
        let old = self.view();
        let new_buf = ValueBuffer::with_capacity(new_capacity);
        let copy = old.capacity().min(new_capacity);
        for lid in 0..copy {
            new_buf.cells[lid as usize].store(old.load(lid));
        }
        {
            let mut slot = self.buf.write();
            *slot = Arc::new(new_buf);
        }
        generations.hold(Box::new(old));
    }

    pub fn store(&self, lid: Lid, value: T) {
        self.buf.read().cells[lid as usize].store(value);
    }

    pub fn load(&self, lid: Lid) -> T {
        self.buf.read().load(lid)
    }

    /// Snapshot view for read guards and search contexts.
    pub fn view(&self) -> Arc<ValueBuffer<T>> {
        self.buf.read().clone()
    }

    pub fn memory_used(&self) -> usize {
        self.capacity() as usize * std::mem::size_of::<T>()
    }
}
