use parking_lot::{RwLock, RwLockReadGuard};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use crate::core::types::EnumId;
use crate::memory::generation::GenerationHandler;

/// A value storable in an enum store. The key defines dictionary order;
/// strings order by their case-folded form first.
pub trait EnumValue: Clone + Send + Sync + 'static {
    type Key: Ord + Clone + Send + Sync + 'static;

    fn to_key(&self) -> Self::Key;
}

macro_rules! impl_integer_enum_value {
    ($($t:ty),*) => {
        $(
            impl EnumValue for $t {
                type Key = $t;

                fn to_key(&self) -> $t {
                    *self
                }
            }
        )*
    };
}

impl_integer_enum_value!(i8, i16, i32, i64, u8);

/// Total-order wrapper so floats can key a btree dictionary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FloatKey(pub f64);

impl Eq for FloatKey {}

impl PartialOrd for FloatKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FloatKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl EnumValue for f32 {
    type Key = FloatKey;

    fn to_key(&self) -> FloatKey {
        FloatKey(*self as f64)
    }
}

impl EnumValue for f64 {
    type Key = FloatKey;

    fn to_key(&self) -> FloatKey {
        FloatKey(*self)
    }
}

/// Dictionary key for strings: compares folded form first, raw form as a
/// tie breaker so distinct cased values stay distinct.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct FoldedKey {
    pub folded: String,
    pub raw: String,
}

impl FoldedKey {
    pub fn fold(s: &str) -> String {
        s.to_lowercase()
    }

    pub fn new(raw: &str) -> Self {
        FoldedKey { folded: Self::fold(raw), raw: raw.to_string() }
    }

    /// Smallest key whose folded form starts with `prefix`.
    pub fn prefix_floor(prefix: &str) -> Self {
        FoldedKey { folded: Self::fold(prefix), raw: String::new() }
    }
}

impl EnumValue for String {
    type Key = FoldedKey;

    fn to_key(&self) -> FoldedKey {
        FoldedKey::new(self)
    }
}

struct Entry<V> {
    value: V,
    refcount: u32,
}

struct Inner<V: EnumValue> {
    entries: Vec<Option<Entry<V>>>,
    dict: BTreeMap<V::Key, EnumId>,
    free: Vec<u32>,
    /// Ids whose refcount reached zero since the last commit; released
    /// through the generation holder so guarded readers keep resolving them.
    pending_free: Vec<EnumId>,
}

/// Ordered dictionary mapping unique values to stable 32-bit enum ids and
/// back, with per-id reference counts. Freed ids stay resolvable until the
/// generation that retired them has been reclaimed.
pub struct EnumStore<V: EnumValue> {
    inner: RwLock<Inner<V>>,
}

impl<V: EnumValue> EnumStore<V> {
    pub fn new() -> Arc<Self> {
        Arc::new(EnumStore {
            inner: RwLock::new(Inner {
                entries: Vec::new(),
                dict: BTreeMap::new(),
                free: Vec::new(),
                pending_free: Vec::new(),
            }),
        })
    }

    /// Interns a value. Returns the id and whether a new entry was created.
    /// The reference count is not touched; pair with `inc_ref`.
    pub fn insert(&self, value: &V) -> (EnumId, bool) {
        let key = value.to_key();
        let mut inner = self.inner.write();
        if let Some(id) = inner.dict.get(&key) {
            return (*id, false);
        }
        let id = match inner.free.pop() {
            Some(slot) => {
                inner.entries[slot as usize] = Some(Entry { value: value.clone(), refcount: 0 });
                EnumId(slot)
            }
            None => {
                inner.entries.push(Some(Entry { value: value.clone(), refcount: 0 }));
                EnumId((inner.entries.len() - 1) as u32)
            }
        };
        inner.dict.insert(key, id);
        (id, true)
    }

    pub fn lookup(&self, value: &V) -> Option<EnumId> {
        let key = value.to_key();
        self.inner.read().dict.get(&key).copied()
    }

    pub fn value_of(&self, id: EnumId) -> Option<V> {
        if !id.valid() {
            return None;
        }
        let inner = self.inner.read();
        inner
            .entries
            .get(id.0 as usize)
            .and_then(|e| e.as_ref())
            .map(|e| e.value.clone())
    }

    pub fn inc_ref(&self, id: EnumId) {
        if !id.valid() {
            return;
        }
        let mut inner = self.inner.write();
        if let Some(Some(entry)) = inner.entries.get_mut(id.0 as usize) {
            entry.refcount += 1;
        }
    }

    /// Drops one reference. An entry reaching zero leaves the dictionary at
    /// once and its id is parked until `defer_frees` hands it to the
    /// generation holder.
    pub fn dec_ref(&self, id: EnumId) {
        if !id.valid() {
            return;
        }
        let mut inner = self.inner.write();
        let emptied = match inner.entries.get_mut(id.0 as usize) {
            Some(Some(entry)) => {
                entry.refcount = entry.refcount.saturating_sub(1);
                entry.refcount == 0
            }
            _ => false,
        };
        if emptied {
            let key = inner.entries[id.0 as usize]
                .as_ref()
                .map(|e| e.value.to_key());
            if let Some(key) = key {
                inner.dict.remove(&key);
            }
            inner.pending_free.push(id);
        }
    }

    /// Moves ids freed since the last call into the generation hold list of
    /// the owning vector. Their slots are recycled only after reclaim.
    pub fn defer_frees(self: &Arc<Self>, generations: &GenerationHandler) {
        let freed: Vec<EnumId> = {
            let mut inner = self.inner.write();
            std::mem::take(&mut inner.pending_free)
        };
        if !freed.is_empty() {
            generations.hold(Box::new(EnumHold { store: Arc::clone(self), ids: freed }));
        }
    }

    fn release_ids(&self, ids: &[EnumId]) {
        let mut inner = self.inner.write();
        for id in ids {
            if let Some(slot) = inner.entries.get_mut(id.0 as usize) {
                // The value may have been re-interned into the same slot in
                // the meantime; only clear slots still at refcount zero.
                let clear = matches!(slot, Some(e) if e.refcount == 0);
                if clear {
                    *slot = None;
                    inner.free.push(id.0);
                }
            }
        }
    }

    pub fn num_unique(&self) -> usize {
        self.inner.read().dict.len()
    }

    pub fn snapshot(&self) -> DictionarySnapshot<'_, V> {
        DictionarySnapshot { guard: self.inner.read() }
    }
}

struct EnumHold<V: EnumValue> {
    store: Arc<EnumStore<V>>,
    ids: Vec<EnumId>,
}

impl<V: EnumValue> Drop for EnumHold<V> {
    fn drop(&mut self) {
        self.store.release_ids(&self.ids);
    }
}

/// Read snapshot of the dictionary. Count answers are consistent with the
/// dictionary state at capture time for the lifetime of the snapshot.
pub struct DictionarySnapshot<'a, V: EnumValue> {
    guard: RwLockReadGuard<'a, Inner<V>>,
}

impl<'a, V: EnumValue> DictionarySnapshot<'a, V> {
    pub fn count(&self, key: &V::Key) -> usize {
        usize::from(self.guard.dict.contains_key(key))
    }

    pub fn count_in_range(&self, lo: Bound<&V::Key>, hi: Bound<&V::Key>) -> usize {
        self.guard.dict.range((lo, hi)).count()
    }

    pub fn num_unique(&self) -> usize {
        self.guard.dict.len()
    }

    pub fn ids_in_range(&self, lo: Bound<&V::Key>, hi: Bound<&V::Key>) -> Vec<(EnumId, V)> {
        self.guard
            .dict
            .range((lo, hi))
            .filter_map(|(_, id)| {
                self.guard.entries[id.0 as usize]
                    .as_ref()
                    .map(|e| (*id, e.value.clone()))
            })
            .collect()
    }

    /// All entries matching `pred`, scanned in dictionary order starting at
    /// `lo`; the scan stops once `until` says the ordered run has ended.
    pub fn scan_from(
        &self,
        lo: Bound<&V::Key>,
        mut until: impl FnMut(&V::Key) -> bool,
        mut pred: impl FnMut(&V) -> bool,
    ) -> Vec<(EnumId, V)> {
        let mut out = Vec::new();
        for (key, id) in self.guard.dict.range((lo, Bound::Unbounded)) {
            if !until(key) {
                break;
            }
            if let Some(entry) = self.guard.entries[id.0 as usize].as_ref() {
                if pred(&entry.value) {
                    out.push((*id, entry.value.clone()));
                }
            }
        }
        out
    }

    /// Full-dictionary scan; used by regex/fuzzy terms when no usable
    /// dictionary prefix exists.
    pub fn scan_all(&self, mut pred: impl FnMut(&V) -> bool) -> Vec<(EnumId, V)> {
        self.guard
            .dict
            .iter()
            .filter_map(|(_, id)| {
                self.guard.entries[id.0 as usize].as_ref().and_then(|e| {
                    if pred(&e.value) { Some((*id, e.value.clone())) } else { None }
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_lookup_and_order() {
        let store: Arc<EnumStore<i32>> = EnumStore::new();
        let (a, inserted_a) = store.insert(&10);
        let (b, inserted_b) = store.insert(&5);
        let (a2, inserted_a2) = store.insert(&10);
        assert!(inserted_a && inserted_b && !inserted_a2);
        assert_eq!(a, a2);
        assert_eq!(store.lookup(&5), Some(b));
        assert_eq!(store.lookup(&7), None);

        let snap = store.snapshot();
        assert_eq!(snap.count_in_range(Bound::Included(&0), Bound::Included(&100)), 2);
        assert_eq!(snap.count_in_range(Bound::Excluded(&5), Bound::Unbounded), 1);
        let ids = snap.ids_in_range(Bound::Unbounded, Bound::Unbounded);
        assert_eq!(ids.iter().map(|(_, v)| *v).collect::<Vec<_>>(), vec![5, 10]);
    }

    #[test]
    fn refcount_gc_waits_for_guards() {
        let generations = GenerationHandler::new();
        let store: Arc<EnumStore<String>> = EnumStore::new();
        let (id, _) = store.insert(&"foo".to_string());
        store.inc_ref(id);
        store.dec_ref(id);
        assert_eq!(store.lookup(&"foo".to_string()), None);

        let guard = generations.take_guard();
        store.defer_frees(&generations);
        generations.bump();
        generations.reclaim();
        // Guarded readers still resolve the id
        assert_eq!(store.value_of(id), Some("foo".to_string()));
        drop(guard);
        generations.reclaim();
        assert_eq!(store.value_of(id), None);
    }

    #[test]
    fn folded_ordering_and_prefix_floor() {
        let store: Arc<EnumStore<String>> = EnumStore::new();
        for s in ["Banana", "apple", "apricot", "cherry"] {
            store.insert(&s.to_string());
        }
        let snap = store.snapshot();
        let floor = FoldedKey::prefix_floor("ap");
        let hits = snap.scan_from(
            Bound::Included(&floor),
            |key| key.folded.starts_with("ap"),
            |_| true,
        );
        let values: Vec<String> = hits.into_iter().map(|(_, v)| v).collect();
        assert_eq!(values, vec!["apple".to_string(), "apricot".to_string()]);
    }

    #[test]
    fn float_keys_total_order() {
        let store: Arc<EnumStore<f64>> = EnumStore::new();
        store.insert(&1.5);
        store.insert(&-0.5);
        store.insert(&2.25);
        let snap = store.snapshot();
        assert_eq!(
            snap.count_in_range(Bound::Included(&FloatKey(0.0)), Bound::Included(&FloatKey(2.0))),
            1
        );
    }
}
