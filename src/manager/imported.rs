use lru::LruCache;
use parking_lot::Mutex;
use roaring::RoaringBitmap;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use crate::attribute::AttributeVectorSP;

const SEARCH_CACHE_ENTRIES: usize = 128;

/// Read-only alias of an attribute vector owned by a sibling sub-database,
/// with a per-attribute cache of resolved search results. The cache is
/// cleared on every force-commit since committed state may have moved.
pub struct ImportedAttribute {
    attr: AttributeVectorSP,
    search_cache: Mutex<LruCache<String, Arc<RoaringBitmap>>>,
}

impl ImportedAttribute {
    pub fn new(attr: AttributeVectorSP) -> Self {
        ImportedAttribute {
            attr,
            search_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(SEARCH_CACHE_ENTRIES).unwrap(),
            )),
        }
    }

    pub fn attribute(&self) -> &AttributeVectorSP {
        &self.attr
    }

    pub fn cached_search(&self, term: &str) -> Option<Arc<RoaringBitmap>> {
        self.search_cache.lock().get(term).cloned()
    }

    pub fn cache_search(&self, term: &str, hits: Arc<RoaringBitmap>) {
        self.search_cache.lock().put(term.to_string(), hits);
    }

    pub fn clear_search_cache(&self) {
        self.search_cache.lock().clear();
    }
}

/// The repository of imported attributes exposed by a manager. Imported
/// attributes never appear in flush-target or writable lists and must not
/// be written.
#[derive(Default)]
pub struct ImportedAttributesRepo {
    map: HashMap<String, Arc<ImportedAttribute>>,
}

impl ImportedAttributesRepo {
    pub fn new() -> Self {
        ImportedAttributesRepo { map: HashMap::new() }
    }

    pub fn add(&mut self, name: impl Into<String>, attr: AttributeVectorSP) {
        self.map.insert(name.into(), Arc::new(ImportedAttribute::new(attr)));
    }

    pub fn get(&self, name: &str) -> Option<Arc<ImportedAttribute>> {
        self.map.get(name).cloned()
    }

    pub fn get_all(&self) -> Vec<Arc<ImportedAttribute>> {
        self.map.values().cloned().collect()
    }

    pub fn size(&self) -> usize {
        self.map.len()
    }

    pub fn clear_search_caches(&self) {
        for imported in self.map.values() {
            imported.clear_search_cache();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::factory::AttributeFactory;
    use crate::core::config::{AttributeConfig, BasicType};

    #[test]
    fn cache_cleared_on_demand() {
        let factory = AttributeFactory::new();
        let attr = factory
            .create("parent_price", &AttributeConfig::single(BasicType::Int32))
            .unwrap();
        factory.setup_empty(attr.as_ref(), 1).unwrap();
        let mut repo = ImportedAttributesRepo::new();
        repo.add("parent_price", attr);

        let imported = repo.get("parent_price").unwrap();
        let mut hits = RoaringBitmap::new();
        hits.insert(4);
        imported.cache_search("[1;10]", Arc::new(hits));
        assert!(imported.cached_search("[1;10]").is_some());
        repo.clear_search_caches();
        assert!(imported.cached_search("[1;10]").is_none());
    }
}
