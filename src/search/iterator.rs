use roaring::RoaringBitmap;
use std::sync::Arc;

use crate::core::types::Lid;

/// Result of one seek.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seek {
    /// A matching lid; for strict iterators the first one >= the target,
    /// for non-strict iterators the target itself.
    Hit(Lid),
    /// Non-strict only: the target does not match.
    Miss,
    /// No matching lid at or after the target.
    End,
}

/// Iterator over matching lids in `[1, docid_limit)`. Strict iterators
/// advance past gaps on their own; non-strict ones only verify the target.
pub trait SearchIterator: Send {
    fn seek(&mut self, target: Lid) -> Seek;
    fn strict(&self) -> bool;
}

/// Drains an iterator into the full hit list; test and populator helper.
pub fn collect_hits(it: &mut dyn SearchIterator, docid_limit: Lid) -> Vec<Lid> {
    let mut hits = Vec::new();
    if it.strict() {
        let mut target = 1;
        while target < docid_limit {
            match it.seek(target) {
                Seek::Hit(lid) => {
                    hits.push(lid);
                    target = lid + 1;
                }
                Seek::Miss => target += 1,
                Seek::End => break,
            }
        }
    } else {
        for target in 1..docid_limit {
            if let Seek::Hit(lid) = it.seek(target) {
                hits.push(lid);
            }
        }
    }
    hits
}

pub struct EmptyIterator;

impl SearchIterator for EmptyIterator {
    fn seek(&mut self, _target: Lid) -> Seek {
        Seek::End
    }

    fn strict(&self) -> bool {
        true
    }
}

/// Verifies lids one by one through a matcher closure; strict mode scans
/// forward to the next hit.
pub struct ScanIterator {
    matcher: Box<dyn Fn(Lid) -> bool + Send>,
    docid_limit: Lid,
    strict: bool,
}

impl ScanIterator {
    pub fn new(docid_limit: Lid, strict: bool, matcher: Box<dyn Fn(Lid) -> bool + Send>) -> Self {
        ScanIterator { matcher, docid_limit, strict }
    }
}

impl SearchIterator for ScanIterator {
    fn seek(&mut self, target: Lid) -> Seek {
        // Lid 0 never holds a user document
        let start = target.max(1);
        if start >= self.docid_limit {
            return Seek::End;
        }
        if self.strict {
            for lid in start..self.docid_limit {
                if (self.matcher)(lid) {
                    return Seek::Hit(lid);
                }
            }
            Seek::End
        } else if (self.matcher)(start) {
            Seek::Hit(start)
        } else {
            Seek::Miss
        }
    }

    fn strict(&self) -> bool {
        self.strict
    }
}

/// Iterates the union of posting-list bitmaps captured by fetch_postings.
pub struct PostingIterator {
    merged: RoaringBitmap,
    docid_limit: Lid,
    strict: bool,
}

impl PostingIterator {
    pub fn new(postings: &[Arc<RoaringBitmap>], docid_limit: Lid, strict: bool) -> Self {
        let mut merged = RoaringBitmap::new();
        for bitmap in postings {
            merged |= bitmap.as_ref();
        }
        merged.remove_range(docid_limit..=Lid::MAX);
        merged.remove(0);
        PostingIterator { merged, docid_limit, strict }
    }

    fn next_at_or_after(&self, target: Lid) -> Option<Lid> {
        let preceding = if target == 0 { 0 } else { self.merged.rank(target - 1) };
        self.merged.select(preceding as u32)
    }
}

impl SearchIterator for PostingIterator {
    fn seek(&mut self, target: Lid) -> Seek {
        let target = target.max(1);
        if target >= self.docid_limit {
            return Seek::End;
        }
        if self.strict {
            match self.next_at_or_after(target) {
                Some(lid) => Seek::Hit(lid),
                None => Seek::End,
            }
        } else if self.merged.contains(target) {
            Seek::Hit(target)
        } else {
            Seek::Miss
        }
    }

    fn strict(&self) -> bool {
        self.strict
    }
}

/// Precomputed hit list; used for range-limited terms where only the k
/// first or last hits survive.
pub struct HitListIterator {
    hits: Vec<Lid>,
    pos: usize,
    strict: bool,
}

impl HitListIterator {
    pub fn new(mut hits: Vec<Lid>, range_limit: Option<i64>, strict: bool) -> Self {
        if let Some(limit) = range_limit {
            if limit >= 0 {
                hits.truncate(limit as usize);
            } else {
                let keep = (-limit) as usize;
                if hits.len() > keep {
                    hits.drain(..hits.len() - keep);
                }
            }
        }
        HitListIterator { hits, pos: 0, strict }
    }
}

impl SearchIterator for HitListIterator {
    fn seek(&mut self, target: Lid) -> Seek {
        while self.pos < self.hits.len() && self.hits[self.pos] < target {
            self.pos += 1;
        }
        match self.hits.get(self.pos) {
            None => Seek::End,
            Some(&lid) => {
                if self.strict || lid == target {
                    Seek::Hit(lid)
                } else {
                    Seek::Miss
                }
            }
        }
    }

    fn strict(&self) -> bool {
        self.strict
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_iterator_strict_and_verify() {
        let matcher = |lid: Lid| lid % 2 == 0;
        let mut it = ScanIterator::new(10, true, Box::new(matcher));
        assert_eq!(collect_hits(&mut it, 10), vec![2, 4, 6, 8]);

        let mut it = ScanIterator::new(10, false, Box::new(matcher));
        assert_eq!(it.seek(4), Seek::Hit(4));
        assert_eq!(it.seek(5), Seek::Miss);
        assert_eq!(it.seek(11), Seek::End);
    }

    #[test]
    fn posting_iterator_unions_and_clips() {
        let mut a = RoaringBitmap::new();
        a.insert(0); // reserved lid never surfaces
        a.insert(2);
        a.insert(90);
        let mut b = RoaringBitmap::new();
        b.insert(5);
        let postings = vec![Arc::new(a), Arc::new(b)];
        let mut it = PostingIterator::new(&postings, 50, true);
        assert_eq!(collect_hits(&mut it, 50), vec![2, 5]);
    }

    #[test]
    fn hit_list_range_limit() {
        let hits = vec![1, 3, 5, 7, 9];
        let mut first2 = HitListIterator::new(hits.clone(), Some(2), true);
        assert_eq!(collect_hits(&mut first2, 100), vec![1, 3]);
        let mut last2 = HitListIterator::new(hits, Some(-2), true);
        assert_eq!(collect_hits(&mut last2, 100), vec![7, 9]);
    }
}
