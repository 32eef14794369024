use roaring::RoaringBitmap;
use std::sync::Arc;

use crate::core::types::{EnumId, Lid};
use crate::index::posting::PostingStore;
use crate::search::iterator::{
    EmptyIterator, HitListIterator, PostingIterator, ScanIterator, SearchIterator, Seek,
};

/// Matcher closure over committed state captured at context creation:
/// returns (matched, weight) for one lid.
pub type LidMatcher = Arc<dyn Fn(Lid) -> (bool, i32) + Send + Sync>;

/// Element-level matcher for multi-value attributes.
pub type ElementMatcher = Arc<dyn Fn(Lid, u32) -> (bool, i32) + Send + Sync>;

/// Per-query handle exposed to the match engine: element matching, iterator
/// creation, cardinality estimation, posting prefetch.
pub trait SearchContext: Send {
    /// Document-level matcher: (matched, weight of the matching element).
    fn matches(&self, lid: Lid) -> (bool, i32);

    /// Element-level matcher for the scoring framework; single-value
    /// attributes treat every element index as element 0.
    fn matches_element(&self, lid: Lid, element: u32) -> (bool, i32) {
        let _ = element;
        self.matches(lid)
    }

    /// Iterator over `[0, committed_docid_limit)` yielding matching lids.
    fn create_iterator(&self, strict: bool) -> Box<dyn SearchIterator>;

    /// Cardinality estimate for the query planner.
    fn approximate_hits(&self) -> u32;

    /// Precomputes posting-list resources; a no-op unless the attribute is
    /// fast-search.
    fn fetch_postings(&mut self);
}

pub struct EmptySearchContext;

impl SearchContext for EmptySearchContext {
    fn matches(&self, _lid: Lid) -> (bool, i32) {
        (false, 0)
    }

    fn create_iterator(&self, _strict: bool) -> Box<dyn SearchIterator> {
        Box::new(EmptyIterator)
    }

    fn approximate_hits(&self) -> u32 {
        0
    }

    fn fetch_postings(&mut self) {}
}

/// Context backed by a value scan; used when the attribute keeps no posting
/// lists for the term.
pub struct ScanSearchContext {
    matcher: LidMatcher,
    element_matcher: Option<ElementMatcher>,
    docid_limit: Lid,
    range_limit: Option<i64>,
}

impl ScanSearchContext {
    pub fn new(docid_limit: Lid, matcher: LidMatcher) -> Self {
        ScanSearchContext { matcher, element_matcher: None, docid_limit, range_limit: None }
    }

    pub fn with_element_matcher(mut self, matcher: ElementMatcher) -> Self {
        self.element_matcher = Some(matcher);
        self
    }

    pub fn with_range_limit(mut self, limit: Option<i64>) -> Self {
        self.range_limit = limit;
        self
    }

    fn collect(&self) -> Vec<Lid> {
        (1..self.docid_limit).filter(|lid| (self.matcher)(*lid).0).collect()
    }
}

impl SearchContext for ScanSearchContext {
    fn matches(&self, lid: Lid) -> (bool, i32) {
        (self.matcher)(lid)
    }

    fn matches_element(&self, lid: Lid, element: u32) -> (bool, i32) {
        match &self.element_matcher {
            Some(m) => m(lid, element),
            None => self.matches(lid),
        }
    }

    fn create_iterator(&self, strict: bool) -> Box<dyn SearchIterator> {
        if self.range_limit.is_some() {
            return Box::new(HitListIterator::new(self.collect(), self.range_limit, strict));
        }
        let matcher = Arc::clone(&self.matcher);
        Box::new(ScanIterator::new(
            self.docid_limit,
            strict,
            Box::new(move |lid| matcher(lid).0),
        ))
    }

    fn approximate_hits(&self) -> u32 {
        // No postings: the scan bound is the docid limit
        self.docid_limit
    }

    fn fetch_postings(&mut self) {}
}

/// Context for enumerated fast-search attributes: the dictionary range scan
/// has already produced the matching enum ids, the iterator unions their
/// posting lists. A zero unique-value count short-circuits to empty.
pub struct PostingSearchContext {
    matcher: LidMatcher,
    element_matcher: Option<ElementMatcher>,
    store: Arc<PostingStore>,
    matched_ids: Vec<EnumId>,
    postings: Option<Vec<Arc<RoaringBitmap>>>,
    docid_limit: Lid,
    range_limit: Option<i64>,
}

impl PostingSearchContext {
    pub fn new(
        docid_limit: Lid,
        matcher: LidMatcher,
        store: Arc<PostingStore>,
        matched_ids: Vec<EnumId>,
    ) -> Self {
        PostingSearchContext {
            matcher,
            element_matcher: None,
            store,
            matched_ids,
            postings: None,
            docid_limit,
            range_limit: None,
        }
    }

    pub fn with_element_matcher(mut self, matcher: ElementMatcher) -> Self {
        self.element_matcher = Some(matcher);
        self
    }

    pub fn with_range_limit(mut self, limit: Option<i64>) -> Self {
        self.range_limit = limit;
        self
    }

    pub fn unique_values(&self) -> usize {
        self.matched_ids.len()
    }

    fn postings_or_fetch(&self) -> Vec<Arc<RoaringBitmap>> {
        match &self.postings {
            Some(p) => p.clone(),
            None => self.store.fetch(&self.matched_ids),
        }
    }
}

impl SearchContext for PostingSearchContext {
    fn matches(&self, lid: Lid) -> (bool, i32) {
        (self.matcher)(lid)
    }

    fn matches_element(&self, lid: Lid, element: u32) -> (bool, i32) {
        match &self.element_matcher {
            Some(m) => m(lid, element),
            None => self.matches(lid),
        }
    }

    fn create_iterator(&self, strict: bool) -> Box<dyn SearchIterator> {
        if self.matched_ids.is_empty() {
            return Box::new(EmptyIterator);
        }
        let postings = self.postings_or_fetch();
        if self.range_limit.is_some() {
            let mut it = PostingIterator::new(&postings, self.docid_limit, true);
            let mut hits = Vec::new();
            let mut target = 1;
            while let Seek::Hit(lid) = it.seek(target) {
                hits.push(lid);
                target = lid + 1;
            }
            return Box::new(HitListIterator::new(hits, self.range_limit, strict));
        }
        Box::new(PostingIterator::new(&postings, self.docid_limit, strict))
    }

    fn approximate_hits(&self) -> u32 {
        if self.matched_ids.is_empty() {
            return 0;
        }
        self.store
            .approximate_hits(&self.matched_ids)
            .min(self.docid_limit as u64) as u32
    }

    fn fetch_postings(&mut self) {
        if self.postings.is_none() {
            self.postings = Some(self.store.fetch(&self.matched_ids));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::iterator::collect_hits;

    #[test]
    fn scan_context_matches_and_iterates() {
        let values = Arc::new(vec![0i64, 7, -3, 0]);
        let v = Arc::clone(&values);
        let ctx = ScanSearchContext::new(
            values.len() as Lid,
            Arc::new(move |lid| (v[lid as usize] != 0, 1)),
        );
        assert_eq!(ctx.matches(1), (true, 1));
        assert_eq!(ctx.matches(3), (false, 1));
        let mut it = ctx.create_iterator(true);
        assert_eq!(collect_hits(it.as_mut(), 4), vec![1, 2]);
    }

    #[test]
    fn posting_context_empty_hint() {
        let store = Arc::new(PostingStore::new());
        let mut ctx = PostingSearchContext::new(10, Arc::new(|_| (false, 0)), store, Vec::new());
        ctx.fetch_postings();
        assert_eq!(ctx.approximate_hits(), 0);
        let mut it = ctx.create_iterator(true);
        assert_eq!(it.seek(1), Seek::End);
    }

    #[test]
    fn posting_context_iterates_union() {
        let store = Arc::new(PostingStore::new());
        store.add(EnumId(1), 2);
        store.add(EnumId(2), 5);
        store.add(EnumId(3), 9);
        let ctx = PostingSearchContext::new(
            8,
            Arc::new(|_| (true, 1)),
            Arc::clone(&store),
            vec![EnumId(1), EnumId(2)],
        );
        assert!(ctx.approximate_hits() >= 2);
        let mut it = ctx.create_iterator(true);
        // lid 9 excluded: wrong enum id and past the docid limit
        assert_eq!(collect_hits(it.as_mut(), 8), vec![2, 5]);
    }
}
