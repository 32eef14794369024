use parking_lot::Mutex;
use std::sync::Arc;

use crate::attribute::changes::{
    ChangeOp, ChangeVector, apply_weight_op, apply_wset_append,
};
use crate::attribute::multi_value::MultiValueMapping;
use crate::attribute::single_numeric::{NumericCellValue, bound_as_ref};
use crate::attribute::{
    AttributeBase, AttributeReadGuard, AttributeVector, ClosureReadGuard, CommitParam,
};
use crate::core::config::{AttributeConfig, CollectionType};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{EnumId, FieldValue, Lid, ValueUpdate};
use crate::index::enum_store::EnumStore;
use crate::index::posting::PostingStore;
use crate::search::context::{
    EmptySearchContext, PostingSearchContext, ScanSearchContext, SearchContext,
};
use crate::search::term::{SearchParams, parse_numeric_term};
use crate::storage::save::{AttributeHeader, SnapshotData};

/// Array or weighted-set numeric attribute over the multi-value mapping.
pub struct MultiNumericAttribute<T: NumericCellValue> {
    base: AttributeBase,
    mapping: MultiValueMapping<T>,
    changes: Mutex<ChangeVector<T>>,
    enum_store: Option<Arc<EnumStore<T>>>,
    postings: Option<Arc<PostingStore>>,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct MultiNumericPayload<T> {
    documents: Vec<Vec<(T, i32)>>,
}

impl<T: NumericCellValue> MultiNumericAttribute<T> {
    pub fn new(name: impl Into<String>, config: AttributeConfig) -> Self {
        debug_assert!(config.collection.is_multi_value());
        let fast_search = config.fast_search;
        let grow = config.grow;
        MultiNumericAttribute {
            base: AttributeBase::new(name, config),
            mapping: MultiValueMapping::new(grow),
            changes: Mutex::new(ChangeVector::new()),
            enum_store: fast_search.then(EnumStore::new),
            postings: fast_search.then(|| Arc::new(PostingStore::new())),
        }
    }

    fn wset_flags(&self) -> (bool, bool) {
        match self.base.config().collection {
            CollectionType::WeightedSet { create_if_nonexistent, remove_if_zero } => {
                (create_if_nonexistent, remove_if_zero)
            }
            _ => (false, false),
        }
    }

    fn is_array(&self) -> bool {
        matches!(self.base.config().collection, CollectionType::Array)
    }

    fn convert(&self, value: &FieldValue) -> Result<T> {
        T::from_field_value(value).ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidInput,
                format!("value {:?} not assignable to attribute '{}'", value, self.base.name()),
            )
        })
    }

    fn convert_entries(&self, value: &FieldValue) -> Result<Vec<(T, i32)>> {
        match value {
            FieldValue::Array(values) => values
                .iter()
                .map(|v| self.convert(v).map(|c| (c, 1)))
                .collect(),
            FieldValue::WeightedSet(entries) => entries
                .iter()
                .map(|(v, w)| self.convert(v).map(|c| (c, *w)))
                .collect(),
            other => Ok(vec![(self.convert(other)?, 1)]),
        }
    }

    fn account_entries(&self, lid: Lid, entries: &[(T, i32)], add: bool) {
        if let (Some(store), Some(postings)) = (&self.enum_store, &self.postings) {
            for (value, _) in entries {
                if add {
                    let (id, _) = store.insert(value);
                    store.inc_ref(id);
                    postings.add(id, lid);
                } else if let Some(id) = store.lookup(value) {
                    postings.remove(id, lid);
                    store.dec_ref(id);
                }
            }
        }
    }

    fn replace_entries(&self, lid: Lid, entries: Vec<(T, i32)>) {
        let old = self.mapping.get(lid);
        self.account_entries(lid, &old, false);
        self.account_entries(lid, &entries, true);
        self.mapping.replace(lid, &entries);
    }

    fn do_commit(&self, param: CommitParam) {
        if !self.base.commit_gate(&param) {
            return;
        }
        let (create_if_nonexistent, remove_if_zero) = self.wset_flags();
        let is_array = self.is_array();
        let changes = self.changes.lock().take();
        for change in changes {
            let lid = change.lid;
            let mut entries = self.mapping.get(lid);
            match change.op {
                ChangeOp::AssignMulti(new_entries) => {
                    entries = new_entries;
                }
                ChangeOp::Assign(v) => {
                    entries = vec![(v, 1)];
                }
                ChangeOp::Clear => {
                    entries = Vec::new();
                }
                ChangeOp::Append { value, weight } => {
                    if is_array {
                        // Appends into arrays are non-idempotent
                        entries.push((value, weight));
                    } else {
                        apply_wset_append(
                            &mut entries,
                            &value,
                            weight,
                            create_if_nonexistent,
                            remove_if_zero,
                        );
                    }
                }
                ChangeOp::Remove(value) => {
                    entries.retain(|(v, _)| *v != value);
                }
                ChangeOp::AdjustWeight { value, op } => {
                    apply_weight_op(&mut entries, &value, op, remove_if_zero);
                }
                ChangeOp::Arith(op, operand) => {
                    let mut dropped = false;
                    entries = entries
                        .into_iter()
                        .map(|(v, w)| match v.arith(op, operand) {
                            Some(next) => (next, w),
                            None => {
                                dropped = true;
                                (v, w)
                            }
                        })
                        .collect();
                    if dropped {
                        self.base.note_divide_by_zero();
                    }
                }
            }
            self.replace_entries(lid, entries);
        }
        if let Some(store) = &self.enum_store {
            store.defer_frees(self.base.generations());
        }
        self.base.finish_commit(&param);
    }

    fn entries_to_field_value(&self, entries: &[(T, i32)]) -> FieldValue {
        if self.is_array() {
            FieldValue::Array(entries.iter().map(|(v, _)| v.to_field_value()).collect())
        } else {
            FieldValue::WeightedSet(
                entries.iter().map(|(v, w)| (v.to_field_value(), *w)).collect(),
            )
        }
    }
}

impl<T: NumericCellValue> AttributeVector for MultiNumericAttribute<T> {
    fn base(&self) -> &AttributeBase {
        &self.base
    }

    fn add_doc(&self) -> Result<Lid> {
        let lid = self.base.alloc_lid();
        self.mapping.ensure_capacity(lid + 1, self.base.generations());
        Ok(lid)
    }

    fn put(&self, lid: Lid, value: &FieldValue) -> Result<()> {
        self.base.check_writable_lid(lid)?;
        let entries = self.convert_entries(value)?;
        self.changes.lock().push(lid, ChangeOp::AssignMulti(entries));
        Ok(())
    }

    fn append(&self, lid: Lid, value: &FieldValue, weight: i32) -> Result<()> {
        self.base.check_writable_lid(lid)?;
        let v = self.convert(value)?;
        self.changes.lock().push(lid, ChangeOp::Append { value: v, weight });
        Ok(())
    }

    fn remove_value(&self, lid: Lid, value: &FieldValue) -> Result<()> {
        self.base.check_writable_lid(lid)?;
        let v = self.convert(value)?;
        self.changes.lock().push(lid, ChangeOp::Remove(v));
        Ok(())
    }

    fn apply_update(&self, lid: Lid, update: &ValueUpdate) -> Result<()> {
        self.base.check_writable_lid(lid)?;
        match update {
            ValueUpdate::Assign(v) => self.put(lid, v),
            ValueUpdate::Clear => self.clear_doc(lid),
            ValueUpdate::Arithmetic(op, operand) => {
                self.changes.lock().push(lid, ChangeOp::Arith(*op, *operand));
                Ok(())
            }
            ValueUpdate::Add(entries) => {
                for (value, weight) in entries {
                    self.append(lid, value, *weight)?;
                }
                Ok(())
            }
            ValueUpdate::Remove(values) => {
                for value in values {
                    self.remove_value(lid, value)?;
                }
                Ok(())
            }
            ValueUpdate::AdjustWeight(value, op) => {
                let v = self.convert(value)?;
                self.changes.lock().push(lid, ChangeOp::AdjustWeight { value: v, op: *op });
                Ok(())
            }
        }
    }

    fn clear_doc(&self, lid: Lid) -> Result<()> {
        self.base.check_writable_lid(lid)?;
        self.changes.lock().push(lid, ChangeOp::Clear);
        Ok(())
    }

    fn commit(&self, param: CommitParam) {
        self.do_commit(param);
    }

    fn commit_if_change_vector_too_large(&self) {
        if self.changes.lock().too_large() {
            self.do_commit(CommitParam::internal());
        }
    }

    fn reclaim_unused_memory(&self) {
        if self.mapping.needs_compaction(&self.base.config().compaction) {
            // Structural compaction across vectors is serialized by the
            // sub-database interlock.
            let interlock = self.base.interlock();
            let _guard = interlock.as_ref().map(|i| i.guard());
            self.mapping
                .compact(self.base.committed_docid_limit(), self.base.generations());
        }
        self.base.generations().reclaim();
    }

    fn compact_lid_space(&self, limit: u32) {
        let committed = self.base.committed_docid_limit();
        if limit >= committed {
            return;
        }
        for lid in limit..committed {
            let entries = self.mapping.get(lid);
            self.account_entries(lid, &entries, false);
            self.mapping.replace(lid, &[]);
        }
        if let Some(store) = &self.enum_store {
            store.defer_frees(self.base.generations());
        }
        if let Some(postings) = &self.postings {
            postings.truncate_lid_space(limit);
        }
        self.base.set_lid_space(limit);
    }

    fn shrink_lid_space(&self) {
        self.mapping
            .shrink(self.base.committed_docid_limit(), self.base.generations());
        self.base.clear_compacted_flag();
    }

    fn get(&self, lid: Lid) -> FieldValue {
        if lid >= self.base.committed_docid_limit() {
            return self.entries_to_field_value(&[]);
        }
        self.entries_to_field_value(&self.mapping.get(lid))
    }

    fn get_multi(&self, lid: Lid) -> Vec<(FieldValue, i32)> {
        if lid >= self.base.committed_docid_limit() {
            return Vec::new();
        }
        self.mapping
            .get(lid)
            .into_iter()
            .map(|(v, w)| (v.to_field_value(), w))
            .collect()
    }

    fn find_enum(&self, value: &FieldValue) -> Option<EnumId> {
        let store = self.enum_store.as_ref()?;
        let v = T::from_field_value(value)?;
        store.lookup(&v)
    }

    fn make_read_guard(&self, _stable_enum: bool) -> Box<dyn AttributeReadGuard> {
        let guard = self.base.generations().take_guard();
        let docid_limit = self.base.committed_docid_limit();
        let view = self.mapping.view();
        let view2 = self.mapping.view();
        let is_array = self.is_array();
        Box::new(ClosureReadGuard::new(
            guard,
            docid_limit,
            Box::new(move |lid| {
                let entries = view.get(lid);
                if is_array {
                    FieldValue::Array(entries.iter().map(|(v, _)| v.to_field_value()).collect())
                } else {
                    FieldValue::WeightedSet(
                        entries.iter().map(|(v, w)| (v.to_field_value(), *w)).collect(),
                    )
                }
            }),
            Box::new(move |lid| {
                view2.get(lid).into_iter().map(|(v, w)| (v.to_field_value(), w)).collect()
            }),
        ))
    }

    fn create_search_context(
        &self,
        term: &str,
        _params: &SearchParams,
    ) -> Result<Box<dyn SearchContext>> {
        let range = parse_numeric_term(term)?;
        let docid_limit = self.base.committed_docid_limit();
        let is_array = self.is_array();
        let view = self.mapping.view();
        let match_range = range.clone();
        let matcher: crate::search::context::LidMatcher = Arc::new(move |lid| {
            let entries = view.get(lid);
            let mut matched = 0;
            let mut weight = 0;
            for (v, w) in &entries {
                if match_range.contains_f64(v.to_f64()) {
                    if matched == 0 {
                        weight = *w;
                    }
                    matched += 1;
                }
            }
            if matched == 0 {
                (false, 0)
            } else if is_array {
                (true, matched)
            } else {
                (true, weight)
            }
        });
        let element_view = self.mapping.view();
        let element_range = range.clone();
        let element_matcher: crate::search::context::ElementMatcher =
            Arc::new(move |lid, element| {
                match element_view.get(lid).get(element as usize) {
                    Some((v, w)) => (element_range.contains_f64(v.to_f64()), *w),
                    None => (false, 0),
                }
            });
        if let (Some(store), Some(postings)) = (&self.enum_store, &self.postings) {
            let ids: Vec<EnumId> = match T::key_bounds(&range) {
                Some((lo, hi)) => store
                    .snapshot()
                    .ids_in_range(bound_as_ref(&lo), bound_as_ref(&hi))
                    .into_iter()
                    .map(|(id, _)| id)
                    .collect(),
                None => Vec::new(),
            };
            if ids.is_empty() {
                return Ok(Box::new(EmptySearchContext));
            }
            return Ok(Box::new(
                PostingSearchContext::new(docid_limit, matcher, Arc::clone(postings), ids)
                    .with_element_matcher(element_matcher)
                    .with_range_limit(range.range_limit),
            ));
        }
        Ok(Box::new(
            ScanSearchContext::new(docid_limit, matcher)
                .with_element_matcher(element_matcher)
                .with_range_limit(range.range_limit),
        ))
    }

    fn save_snapshot(&self) -> Result<SnapshotData> {
        let limit = self.base.committed_docid_limit();
        let view = self.mapping.view();
        let documents: Vec<Vec<(T, i32)>> = (0..limit).map(|lid| view.get(lid)).collect();
        let config = self.base.config();
        let header = AttributeHeader {
            name: self.base.name().to_string(),
            basic_type: config.basic_type,
            collection: config.collection,
            tensor_type: None,
            predicate_params: None,
            create_serial: self.base.create_serial(),
            docid_limit: limit,
        };
        let payload = bincode::serialize(&MultiNumericPayload { documents })?;
        Ok(SnapshotData { header, payload })
    }

    fn load_snapshot(&self, data: &SnapshotData) -> Result<()> {
        let payload: MultiNumericPayload<T> = bincode::deserialize(&data.payload)?;
        let limit = payload.documents.len() as u32;
        self.mapping.ensure_capacity(limit.max(1), self.base.generations());
        for (lid, entries) in payload.documents.iter().enumerate() {
            self.account_entries(lid as Lid, entries, true);
            self.mapping.replace(lid as Lid, entries);
        }
        self.base.set_create_serial(data.header.create_serial);
        self.base.set_loaded_lid_space(limit);
        Ok(())
    }

    fn estimated_save_bytes(&self) -> u64 {
        self.mapping.live_entries() * (std::mem::size_of::<T>() as u64 + 4) + 256
    }

    fn memory_used(&self) -> usize {
        self.mapping.memory_used()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::BasicType;
    use crate::search::iterator::collect_hits;

    fn array_attr() -> MultiNumericAttribute<i32> {
        let config = AttributeConfig::new(BasicType::Int32, CollectionType::Array);
        let attr = MultiNumericAttribute::new("scores", config);
        attr.add_doc().unwrap();
        attr.commit(CommitParam::internal());
        attr
    }

    fn wset_attr(fast_search: bool) -> MultiNumericAttribute<i64> {
        let mut config = AttributeConfig::new(
            BasicType::Int64,
            CollectionType::WeightedSet { create_if_nonexistent: true, remove_if_zero: true },
        );
        if fast_search {
            config = config.with_fast_search();
        }
        let attr = MultiNumericAttribute::new("tags", config);
        attr.add_doc().unwrap();
        attr.commit(CommitParam::internal());
        attr
    }

    #[test]
    fn array_append_allows_duplicates() {
        let attr = array_attr();
        attr.add_doc().unwrap();
        attr.append(1, &FieldValue::Int(5), 1).unwrap();
        attr.append(1, &FieldValue::Int(5), 1).unwrap();
        attr.append(1, &FieldValue::Int(9), 1).unwrap();
        attr.commit(CommitParam::new(1));
        assert_eq!(
            attr.get(1),
            FieldValue::Array(vec![FieldValue::Int(5), FieldValue::Int(5), FieldValue::Int(9)])
        );
        attr.remove_value(1, &FieldValue::Int(5)).unwrap();
        attr.commit(CommitParam::new(2));
        assert_eq!(attr.get(1), FieldValue::Array(vec![FieldValue::Int(9)]));
    }

    #[test]
    fn wset_append_accumulates_and_removes_at_zero() {
        let attr = wset_attr(false);
        attr.add_doc().unwrap();
        attr.append(1, &FieldValue::Int(7), 5).unwrap();
        attr.append(1, &FieldValue::Int(7), 3).unwrap();
        attr.commit(CommitParam::new(1));
        assert_eq!(attr.get_multi(1), vec![(FieldValue::Int(7), 8)]);
        attr.append(1, &FieldValue::Int(7), -8).unwrap();
        attr.commit(CommitParam::new(2));
        assert_eq!(attr.get_multi(1), Vec::new());
    }

    #[test]
    fn multi_range_search_with_postings() {
        let attr = wset_attr(true);
        for _ in 0..3 {
            attr.add_doc().unwrap();
        }
        attr.put(
            1,
            &FieldValue::WeightedSet(vec![(FieldValue::Int(5), 2), (FieldValue::Int(40), 1)]),
        )
        .unwrap();
        attr.put(2, &FieldValue::WeightedSet(vec![(FieldValue::Int(8), 4)])).unwrap();
        attr.commit(CommitParam::new(1));
        let ctx = attr.create_search_context("[4;9]", &SearchParams::default()).unwrap();
        let mut it = ctx.create_iterator(true);
        assert_eq!(collect_hits(it.as_mut(), 4), vec![1, 2]);
        assert_eq!(ctx.matches(1), (true, 2));
        assert_eq!(ctx.matches_element(1, 1), (false, 1));
        let ctx = attr.create_search_context("[100;200]", &SearchParams::default()).unwrap();
        assert_eq!(ctx.approximate_hits(), 0);
    }

    #[test]
    fn multi_snapshot_round_trip() {
        let attr = wset_attr(true);
        attr.add_doc().unwrap();
        attr.append(1, &FieldValue::Int(11), 3).unwrap();
        attr.commit(CommitParam::new(4));
        let snap = attr.save_snapshot().unwrap();
        let restored = wset_attr(true);
        restored.load_snapshot(&snap).unwrap();
        assert_eq!(restored.get_multi(1), vec![(FieldValue::Int(11), 3)]);
        let ctx = restored.create_search_context("11", &SearchParams::default()).unwrap();
        let mut it = ctx.create_iterator(true);
        assert_eq!(collect_hits(it.as_mut(), 2), vec![1]);
    }

    #[test]
    fn arithmetic_applies_to_every_element() {
        let attr = array_attr();
        attr.add_doc().unwrap();
        attr.put(1, &FieldValue::Array(vec![FieldValue::Int(2), FieldValue::Int(3)])).unwrap();
        attr.commit(CommitParam::new(1));
        attr.apply_update(1, &ValueUpdate::Arithmetic(crate::core::types::ArithOp::Mul, 10.0))
            .unwrap();
        attr.commit(CommitParam::new(2));
        assert_eq!(
            attr.get(1),
            FieldValue::Array(vec![FieldValue::Int(20), FieldValue::Int(30)])
        );
    }
}
