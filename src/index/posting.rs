use parking_lot::RwLock;
use roaring::RoaringBitmap;
use std::collections::HashMap;
use std::sync::Arc;

use crate::core::types::{EnumId, Lid};

/// Posting lists for a fast-search attribute: enum id -> set of lids whose
/// committed value maps to that id. Bitmaps are copy-on-write so an iterator
/// handed out to a reader never observes in-place mutation.
pub struct PostingStore {
    map: RwLock<HashMap<EnumId, Arc<RoaringBitmap>>>,
}

impl PostingStore {
    pub fn new() -> Self {
        PostingStore { map: RwLock::new(HashMap::new()) }
    }

    pub fn add(&self, id: EnumId, lid: Lid) {
        if !id.valid() {
            return;
        }
        let mut map = self.map.write();
        let bitmap = map.entry(id).or_insert_with(|| Arc::new(RoaringBitmap::new()));
        Arc::make_mut(bitmap).insert(lid);
    }

    pub fn remove(&self, id: EnumId, lid: Lid) {
        if !id.valid() {
            return;
        }
        let mut map = self.map.write();
        if let Some(bitmap) = map.get_mut(&id) {
            Arc::make_mut(bitmap).remove(lid);
            if bitmap.is_empty() {
                map.remove(&id);
            }
        }
    }

    /// Snapshot of one posting list; cheap Arc clone.
    pub fn get(&self, id: EnumId) -> Option<Arc<RoaringBitmap>> {
        self.map.read().get(&id).cloned()
    }

    /// Snapshots for a set of enum ids, skipping empty lists.
    pub fn fetch(&self, ids: &[EnumId]) -> Vec<Arc<RoaringBitmap>> {
        let map = self.map.read();
        ids.iter().filter_map(|id| map.get(id).cloned()).collect()
    }

    pub fn approximate_hits(&self, ids: &[EnumId]) -> u64 {
        let map = self.map.read();
        ids.iter()
            .filter_map(|id| map.get(id))
            .map(|b| b.len())
            .sum()
    }

    /// Drops every posting for lids >= limit; used by lid-space compaction.
    pub fn truncate_lid_space(&self, limit: Lid) {
        let mut map = self.map.write();
        map.retain(|_, bitmap| {
            let b = Arc::make_mut(bitmap);
            b.remove_range(limit..=Lid::MAX);
            !b.is_empty()
        });
    }

    pub fn clear(&self) {
        self.map.write().clear();
    }
}

impl Default for PostingStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_remove_and_snapshot_isolation() {
        let store = PostingStore::new();
        let id = EnumId(3);
        store.add(id, 1);
        store.add(id, 2);
        let snapshot = store.get(id).unwrap();
        store.remove(id, 1);
        // The earlier snapshot is unaffected by the removal
        assert!(snapshot.contains(1));
        assert_eq!(store.get(id).unwrap().len(), 1);
        store.remove(id, 2);
        assert!(store.get(id).is_none());
    }

    #[test]
    fn truncate_lid_space_drops_high_lids() {
        let store = PostingStore::new();
        store.add(EnumId(1), 5);
        store.add(EnumId(1), 50);
        store.add(EnumId(2), 80);
        store.truncate_lid_space(10);
        assert_eq!(store.get(EnumId(1)).unwrap().len(), 1);
        assert!(store.get(EnumId(2)).is_none());
    }
}
