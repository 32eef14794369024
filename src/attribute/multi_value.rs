use crossbeam::atomic::AtomicCell;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::config::{CompactionStrategy, GrowStrategy};
use crate::core::types::Lid;
use crate::memory::generation::GenerationHandler;

const CHUNK_ENTRIES: usize = 4096;

/// Packed multi-value reference: chunk index (16 bits), start offset within
/// the chunk (24 bits), entry count (24 bits). Zero is the empty ref.
pub const EMPTY_REF: u64 = 0;

fn pack_ref(chunk: usize, start: usize, len: usize) -> u64 {
    debug_assert!(chunk < (1 << 16) && start < (1 << 24) && len < (1 << 24));
    ((chunk as u64) << 48) | ((start as u64) << 24) | len as u64
}

fn unpack_ref(r: u64) -> (usize, usize, usize) {
    (
        (r >> 48) as usize,
        ((r >> 24) & 0xff_ffff) as usize,
        (r & 0xff_ffff) as usize,
    )
}

struct Chunk<T: Copy> {
    values: Box<[AtomicCell<T>]>,
    weights: Box<[AtomicCell<i32>]>,
}

impl<T: Copy + Default> Chunk<T> {
    fn with_capacity(capacity: usize) -> Self {
        Chunk {
            values: (0..capacity).map(|_| AtomicCell::new(T::default())).collect(),
            weights: (0..capacity).map(|_| AtomicCell::new(0)).collect(),
        }
    }

    fn capacity(&self) -> usize {
        self.values.len()
    }
}

struct Arena<T: Copy> {
    chunks: Vec<Arc<Chunk<T>>>,
}

struct WritePos {
    chunk: usize,
    offset: usize,
}

use crate::attribute::value_store::{ValueBuffer, ValueStore};

struct MultiState<T: Copy> {
    refs: Arc<ValueBuffer<u64>>,
    arena: Arc<Arena<T>>,
}

struct MultiInner<T: Copy + Default + Send + Sync + 'static> {
    refs: ValueStore<u64>,
    state_arena: RwLock<Arc<Arena<T>>>,
    write: Mutex<WritePos>,
    dead_entries: AtomicU64,
    live_entries: AtomicU64,
}

/// Lid -> (values, weights) indirection for array and weighted-set
/// collections. Entries live in an append-only chunked arena; a replaced
/// ref's old entries stay readable until the generation that replaced them
/// has been reclaimed (then a prune pass drops the dead chunks).
pub struct MultiValueMapping<T: Copy + Default + Send + Sync + 'static> {
    inner: Arc<MultiInner<T>>,
}

impl<T: Copy + Default + Send + Sync + 'static> MultiValueMapping<T> {
    pub fn new(grow: GrowStrategy) -> Self {
        MultiValueMapping {
            inner: Arc::new(MultiInner {
                refs: ValueStore::new(grow),
                state_arena: RwLock::new(Arc::new(Arena { chunks: Vec::new() })),
                write: Mutex::new(WritePos { chunk: 0, offset: 0 }),
                dead_entries: AtomicU64::new(0),
                live_entries: AtomicU64::new(0),
            }),
        }
    }

    pub fn ensure_capacity(&self, wanted: u32, generations: &GenerationHandler) {
        self.inner.refs.ensure_capacity(wanted, generations);
    }

    pub fn shrink(&self, limit: u32, generations: &GenerationHandler) {
        self.inner.refs.shrink(limit, generations);
    }

    /// Replaces the entry list of one lid. The old entries become dead and
    /// are reclaimed by a later compaction.
    pub fn replace(&self, lid: Lid, entries: &[(T, i32)]) {
        let new_ref = if entries.is_empty() { EMPTY_REF } else { self.append(entries) };
        let old_ref = self.inner.refs.load(lid);
        self.inner.refs.store(lid, new_ref);
        let (_, _, old_len) = unpack_ref(old_ref);
        if old_len > 0 {
            self.inner.dead_entries.fetch_add(old_len as u64, Ordering::Relaxed);
            self.inner.live_entries.fetch_sub(old_len as u64, Ordering::Relaxed);
        }
    }

    fn append(&self, entries: &[(T, i32)]) -> u64 {
        let mut pos = self.inner.write.lock();
        let arena = self.inner.state_arena.read().clone();
        let needs_new_chunk = match arena.chunks.get(pos.chunk) {
            Some(chunk) => chunk.capacity() - pos.offset < entries.len(),
            None => true,
        };
        let (chunk_idx, chunk) = if needs_new_chunk {
            let capacity = entries.len().max(CHUNK_ENTRIES);
            let chunk = Arc::new(Chunk::with_capacity(capacity));
            let mut chunks = arena.chunks.clone();
            chunks.push(chunk.clone());
            let idx = chunks.len() - 1;
            *self.inner.state_arena.write() = Arc::new(Arena { chunks });
            pos.chunk = idx;
            pos.offset = 0;
            (idx, chunk)
        } else {
            (pos.chunk, arena.chunks[pos.chunk].clone())
        };
        let start = pos.offset;
        for (i, (value, weight)) in entries.iter().enumerate() {
            chunk.values[start + i].store(*value);
            chunk.weights[start + i].store(*weight);
        }
        pos.offset = start + entries.len();
        self.inner.live_entries.fetch_add(entries.len() as u64, Ordering::Relaxed);
        pack_ref(chunk_idx, start, entries.len())
    }

    pub fn get(&self, lid: Lid) -> Vec<(T, i32)> {
        self.view().get(lid)
    }

    pub fn view(&self) -> MultiValueView<T> {
        MultiValueView {
            snapshot: Arc::new(MultiState {
                refs: self.inner.refs.view(),
                arena: self.inner.state_arena.read().clone(),
            }),
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn dead_ratio(&self) -> f64 {
        let dead = self.inner.dead_entries.load(Ordering::Relaxed) as f64;
        let live = self.inner.live_entries.load(Ordering::Relaxed) as f64;
        if dead + live == 0.0 { 0.0 } else { dead / (dead + live) }
    }

    pub fn needs_compaction(&self, strategy: &CompactionStrategy) -> bool {
        self.dead_ratio() > strategy.max_dead_ratio as f64
    }

    /// Rewrites live entries into fresh chunks and schedules the dead ones
    /// for pruning once no read guard can still reach a stale ref. The
    /// caller serializes structural compaction through the interlock.
    pub fn compact(&self, docid_limit: u32, generations: &GenerationHandler) {
        let stale_chunks: Vec<usize> = {
            let arena = self.inner.state_arena.read();
            (0..arena.chunks.len()).collect()
        };
        // Start a fresh write chunk so copies never land in a stale chunk
        {
            let mut pos = self.inner.write.lock();
            pos.chunk = usize::MAX;
            pos.offset = 0;
        }
        for lid in 0..docid_limit {
            let old_ref = self.inner.refs.load(lid);
            let (_, _, len) = unpack_ref(old_ref);
            if len == 0 {
                continue;
            }
            let entries = self.get(lid);
            let new_ref = self.append(&entries);
            self.inner.refs.store(lid, new_ref);
            self.inner.dead_entries.fetch_add(len as u64, Ordering::Relaxed);
            self.inner.live_entries.fetch_sub(len as u64, Ordering::Relaxed);
        }
        generations.hold(Box::new(PruneHold {
            inner: Arc::clone(&self.inner),
            stale_chunks,
        }));
    }

    pub fn live_entries(&self) -> u64 {
        self.inner.live_entries.load(Ordering::Relaxed)
    }

    pub fn memory_used(&self) -> usize {
        let arena = self.inner.state_arena.read();
        let entry_size = std::mem::size_of::<T>() + std::mem::size_of::<i32>();
        arena.chunks.iter().map(|c| c.capacity() * entry_size).sum::<usize>()
            + self.inner.refs.memory_used()
    }
}

/// Replaces stale chunks with empty ones once the retiring generation has
/// been reclaimed; dropping the hold is the prune.
struct PruneHold<T: Copy + Default + Send + Sync + 'static> {
    inner: Arc<MultiInner<T>>,
    stale_chunks: Vec<usize>,
}

impl<T: Copy + Default + Send + Sync + 'static> Drop for PruneHold<T> {
    fn drop(&mut self) {
        let mut guard = self.inner.state_arena.write();
        let mut chunks = guard.chunks.clone();
        let mut pruned_entries = 0u64;
        for idx in &self.stale_chunks {
            if let Some(slot) = chunks.get_mut(*idx) {
                pruned_entries += slot.capacity() as u64;
                *slot = Arc::new(Chunk::with_capacity(0));
            }
        }
        *guard = Arc::new(Arena { chunks });
        drop(guard);
        let dead = self.inner.dead_entries.load(Ordering::Relaxed);
        self.inner
            .dead_entries
            .store(dead.saturating_sub(pruned_entries), Ordering::Relaxed);
    }
}

/// Reader view: a refs buffer + arena snapshot. A ref published after the
/// snapshot was taken resolves through the current state instead (same
/// memory-safety contract as reading a current cell value).
pub struct MultiValueView<T: Copy + Default + Send + Sync + 'static> {
    snapshot: Arc<MultiState<T>>,
    inner: Arc<MultiInner<T>>,
}

impl<T: Copy + Default + Send + Sync + 'static> MultiValueView<T> {
    pub fn get(&self, lid: Lid) -> Vec<(T, i32)> {
        let r = match self.snapshot.refs.get(lid) {
            Some(r) => r,
            None => match self.inner.refs.view().get(lid) {
                Some(r) => r,
                None => return Vec::new(),
            },
        };
        if let Some(entries) = read_entries(&self.snapshot.arena, r) {
            return entries;
        }
        // The ref is newer than the arena snapshot; resolve it in the
        // current arena.
        let current = self.inner.state_arena.read().clone();
        read_entries(&current, r).unwrap_or_default()
    }

    pub fn values(&self, lid: Lid) -> Vec<T> {
        self.get(lid).into_iter().map(|(v, _)| v).collect()
    }
}

fn read_entries<T: Copy + Default>(arena: &Arena<T>, r: u64) -> Option<Vec<(T, i32)>> {
    let (chunk_idx, start, len) = unpack_ref(r);
    if len == 0 {
        return Some(Vec::new());
    }
    let chunk = arena.chunks.get(chunk_idx)?;
    if start + len > chunk.capacity() {
        return None;
    }
    Some(
        (0..len)
            .map(|i| (chunk.values[start + i].load(), chunk.weights[start + i].load()))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping() -> (MultiValueMapping<i32>, Arc<GenerationHandler>) {
        let generations = GenerationHandler::new();
        let m = MultiValueMapping::new(GrowStrategy::default());
        m.ensure_capacity(64, &generations);
        (m, generations)
    }

    #[test]
    fn replace_and_get() {
        let (m, _g) = mapping();
        m.replace(1, &[(10, 1), (20, 2)]);
        assert_eq!(m.get(1), vec![(10, 1), (20, 2)]);
        m.replace(1, &[(30, 5)]);
        assert_eq!(m.get(1), vec![(30, 5)]);
        assert_eq!(m.get(2), Vec::new());
        m.replace(1, &[]);
        assert_eq!(m.get(1), Vec::new());
    }

    #[test]
    fn stale_view_reads_old_entries() {
        let (m, _g) = mapping();
        m.replace(1, &[(1, 1)]);
        let view = m.view();
        m.replace(1, &[(2, 2)]);
        // A stale refs cell would still resolve; the captured view reads
        // whatever ref it observes, and both targets stay mapped.
        let entries = view.get(1);
        assert!(entries == vec![(1, 1)] || entries == vec![(2, 2)]);
    }

    #[test]
    fn compaction_preserves_live_entries() {
        let (m, generations) = mapping();
        for lid in 1..20u32 {
            m.replace(lid, &[(lid as i32, 1), (lid as i32 * 2, 2)]);
        }
        for lid in 1..20u32 {
            m.replace(lid, &[(lid as i32 + 100, 7)]);
        }
        assert!(m.dead_ratio() > 0.5);
        let view_before = m.view();
        m.compact(20, &generations);
        for lid in 1..20u32 {
            assert_eq!(m.get(lid), vec![(lid as i32 + 100, 7)]);
        }
        // Stale view still resolves (prune deferred until reclaim)
        assert_eq!(view_before.get(5), vec![(105, 7)]);
        drop(view_before);
        generations.bump();
        generations.reclaim();
        for lid in 1..20u32 {
            assert_eq!(m.get(lid), vec![(lid as i32 + 100, 7)]);
        }
        assert!(m.dead_ratio() < 0.6);
    }

    #[test]
    fn oversized_entry_lists_get_dedicated_chunks() {
        let (m, generations) = mapping();
        let big: Vec<(i32, i32)> = (0..(CHUNK_ENTRIES as i32 + 10)).map(|i| (i, 1)).collect();
        m.replace(1, &big);
        assert_eq!(m.get(1).len(), CHUNK_ENTRIES + 10);
        m.replace(2, &[(5, 1)]);
        assert_eq!(m.get(2), vec![(5, 1)]);
        let _ = generations;
    }
}
