use parking_lot::Mutex;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// A generation number. The writer bumps it after publishing a consistent
/// state; readers pin the generation that was current when they started.
pub type Generation = u64;

struct GenInner {
    /// generation -> number of live guards pinning it
    guards: BTreeMap<Generation, usize>,
    /// buffers retired by the writer, tagged with the generation that was
    /// current when they were retired
    hold: Vec<(Generation, Box<dyn Any + Send>)>,
}

/// Tracks reader generations and holds retired buffers until no reader can
/// still observe them (invariant: a value reachable from a reader is never
/// destroyed until the oldest live generation exceeds the generation at
/// which the reader acquired it).
pub struct GenerationHandler {
    current: AtomicU64,
    inner: Mutex<GenInner>,
}

impl GenerationHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(GenerationHandler {
            current: AtomicU64::new(1),
            inner: Mutex::new(GenInner { guards: BTreeMap::new(), hold: Vec::new() }),
        })
    }

    pub fn current(&self) -> Generation {
        self.current.load(Ordering::Acquire)
    }

    /// Pins the current generation for the lifetime of the returned guard.
    pub fn take_guard(self: &Arc<Self>) -> GenerationGuard {
        let mut inner = self.inner.lock();
        // Read under the lock so a concurrent bump cannot slip between the
        // load and the registration.
        let generation = self.current.load(Ordering::Acquire);
        *inner.guards.entry(generation).or_insert(0) += 1;
        GenerationGuard { handler: Arc::clone(self), generation }
    }

    /// Writer side: publish a new generation after all mutations of the
    /// previous one are visible.
    pub fn bump(&self) -> Generation {
        self.current.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Writer side: retire a buffer that readers of the current generation
    /// may still reference.
    pub fn hold(&self, item: Box<dyn Any + Send>) {
        let generation = self.current.load(Ordering::Acquire);
        self.inner.lock().hold.push((generation, item));
    }

    /// Oldest generation any live guard pins; one past current when no
    /// guards exist.
    pub fn oldest_used(&self) -> Generation {
        let inner = self.inner.lock();
        inner
            .guards
            .keys()
            .next()
            .copied()
            .unwrap_or_else(|| self.current.load(Ordering::Acquire) + 1)
    }

    /// Drops retired buffers no live guard can reach.
    pub fn reclaim(&self) {
        let mut freed: Vec<Box<dyn Any + Send>> = Vec::new();
        {
            let mut inner = self.inner.lock();
            let oldest = inner
                .guards
                .keys()
                .next()
                .copied()
                .unwrap_or_else(|| self.current.load(Ordering::Acquire) + 1);
            let mut kept = Vec::with_capacity(inner.hold.len());
            for (generation, item) in inner.hold.drain(..) {
                if generation < oldest {
                    freed.push(item);
                } else {
                    kept.push((generation, item));
                }
            }
            inner.hold = kept;
        }
        // Buffers drop outside the lock
        drop(freed);
    }

    pub fn held_count(&self) -> usize {
        self.inner.lock().hold.len()
    }

    fn release(&self, generation: Generation) {
        let mut inner = self.inner.lock();
        if let Some(count) = inner.guards.get_mut(&generation) {
            *count -= 1;
            if *count == 0 {
                inner.guards.remove(&generation);
            }
        }
    }
}

/// Pins one generation; dropped when the reader is done.
pub struct GenerationGuard {
    handler: Arc<GenerationHandler>,
    generation: Generation,
}

impl GenerationGuard {
    pub fn generation(&self) -> Generation {
        self.generation
    }
}

impl Drop for GenerationGuard {
    fn drop(&mut self) {
        self.handler.release(self.generation);
    }
}
