use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

use crate::attribute::changes::{
    ChangeOp, ChangeVector, apply_weight_op, apply_wset_append,
};
use crate::attribute::multi_value::MultiValueMapping;
use crate::attribute::single_string::matching_enum_ids;
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
use crate::search::string_helper::StringSearchHelper;
use crate::search::term::SearchParams;
use crate::storage::save::{AttributeHeader, SnapshotData};

/// Array or weighted-set string attribute: the mapping stores enum ids, the
/// enum store owns the unique strings.
pub struct MultiStringAttribute {
    base: AttributeBase,
    mapping: MultiValueMapping<u32>,
    changes: Mutex<ChangeVector<String>>,
    enum_store: Arc<EnumStore<String>>,
    postings: Option<Arc<PostingStore>>,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct MultiStringPayload {
    documents: Vec<Vec<(String, i32)>>,
}

impl MultiStringAttribute {
    pub fn new(name: impl Into<String>, config: AttributeConfig) -> Self {
        debug_assert!(config.collection.is_multi_value());
        let fast_search = config.fast_search;
        let grow = config.grow;
        MultiStringAttribute {
            base: AttributeBase::new(name, config),
            mapping: MultiValueMapping::new(grow),
            changes: Mutex::new(ChangeVector::new()),
            enum_store: EnumStore::new(),
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

    fn convert(&self, value: &FieldValue) -> Result<String> {
        value.as_str().map(|s| s.to_string()).ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidInput,
                format!("value {:?} not assignable to attribute '{}'", value, self.base.name()),
            )
        })
    }

    fn convert_entries(&self, value: &FieldValue) -> Result<Vec<(String, i32)>> {
        match value {
            FieldValue::Array(values) => values
                .iter()
                .map(|v| self.convert(v).map(|s| (s, 1)))
                .collect(),
            FieldValue::WeightedSet(entries) => entries
                .iter()
                .map(|(v, w)| self.convert(v).map(|s| (s, *w)))
                .collect(),
            other => Ok(vec![(self.convert(other)?, 1)]),
        }
    }

    /// Current entries of one lid as strings.
    fn resolved(&self, lid: Lid) -> Vec<(String, i32)> {
        self.mapping
            .get(lid)
            .into_iter()
            .map(|(id, w)| (self.enum_store.value_of(EnumId(id)).unwrap_or_default(), w))
            .collect()
    }

    /// Installs a new entry list, maintaining refcounts and postings.
    fn install(&self, lid: Lid, entries: &[(String, i32)]) {
        let old = self.mapping.get(lid);
        let new_ids: Vec<(u32, i32)> = entries
            .iter()
            .map(|(s, w)| {
                let (id, _) = self.enum_store.insert(s);
                self.enum_store.inc_ref(id);
                if let Some(postings) = &self.postings {
                    postings.add(id, lid);
                }
                (id.0, *w)
            })
            .collect();
        for (id, _) in &old {
            if let Some(postings) = &self.postings {
                if !new_ids.iter().any(|(n, _)| n == id) {
                    postings.remove(EnumId(*id), lid);
                }
            }
            self.enum_store.dec_ref(EnumId(*id));
        }
        // An id present both before and after must stay in the postings
        if let Some(postings) = &self.postings {
            for (id, _) in &new_ids {
                postings.add(EnumId(*id), lid);
            }
        }
        self.mapping.replace(lid, &new_ids);
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
            let mut entries = self.resolved(lid);
            match change.op {
                ChangeOp::AssignMulti(new_entries) => entries = new_entries,
                ChangeOp::Assign(s) => entries = vec![(s, 1)],
                ChangeOp::Clear => entries = Vec::new(),
                ChangeOp::Append { value, weight } => {
                    if is_array {
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
                ChangeOp::Remove(value) => entries.retain(|(v, _)| *v != value),
                ChangeOp::AdjustWeight { value, op } => {
                    apply_weight_op(&mut entries, &value, op, remove_if_zero);
                }
                ChangeOp::Arith(..) => {}
            }
            self.install(lid, &entries);
        }
        self.enum_store.defer_frees(self.base.generations());
        self.base.finish_commit(&param);
    }

    fn entries_to_field_value(&self, entries: &[(String, i32)]) -> FieldValue {
        if self.is_array() {
            FieldValue::Array(entries.iter().map(|(s, _)| FieldValue::Str(s.clone())).collect())
        } else {
            FieldValue::WeightedSet(
                entries.iter().map(|(s, w)| (FieldValue::Str(s.clone()), *w)).collect(),
            )
        }
    }
}

impl AttributeVector for MultiStringAttribute {
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
        let s = self.convert(value)?;
        self.changes.lock().push(lid, ChangeOp::Append { value: s, weight });
        Ok(())
    }

    fn remove_value(&self, lid: Lid, value: &FieldValue) -> Result<()> {
        self.base.check_writable_lid(lid)?;
        let s = self.convert(value)?;
        self.changes.lock().push(lid, ChangeOp::Remove(s));
        Ok(())
    }

    fn apply_update(&self, lid: Lid, update: &ValueUpdate) -> Result<()> {
        self.base.check_writable_lid(lid)?;
        match update {
            ValueUpdate::Assign(v) => self.put(lid, v),
            ValueUpdate::Clear => self.clear_doc(lid),
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
                let s = self.convert(value)?;
                self.changes.lock().push(lid, ChangeOp::AdjustWeight { value: s, op: *op });
                Ok(())
            }
            ValueUpdate::Arithmetic(..) => Err(Error::new(
                ErrorKind::InvalidArgument,
                "arithmetic update on string attribute",
            )),
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
            for (id, _) in self.mapping.get(lid) {
                if let Some(postings) = &self.postings {
                    postings.remove(EnumId(id), lid);
                }
                self.enum_store.dec_ref(EnumId(id));
            }
            self.mapping.replace(lid, &[]);
        }
        self.enum_store.defer_frees(self.base.generations());
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
        self.entries_to_field_value(&self.resolved(lid))
    }

    fn get_multi(&self, lid: Lid) -> Vec<(FieldValue, i32)> {
        if lid >= self.base.committed_docid_limit() {
            return Vec::new();
        }
        self.resolved(lid)
            .into_iter()
            .map(|(s, w)| (FieldValue::Str(s), w))
            .collect()
    }

    fn find_enum(&self, value: &FieldValue) -> Option<EnumId> {
        let s = value.as_str()?.to_string();
        self.enum_store.lookup(&s)
    }

    fn make_read_guard(&self, _stable_enum: bool) -> Box<dyn AttributeReadGuard> {
        let guard = self.base.generations().take_guard();
        let docid_limit = self.base.committed_docid_limit();
        let view = self.mapping.view();
        let view2 = self.mapping.view();
        let store = Arc::clone(&self.enum_store);
        let store2 = Arc::clone(&self.enum_store);
        let is_array = self.is_array();
        Box::new(ClosureReadGuard::new(
            guard,
            docid_limit,
            Box::new(move |lid| {
                let entries: Vec<(FieldValue, i32)> = view
                    .get(lid)
                    .into_iter()
                    .map(|(id, w)| {
                        (FieldValue::Str(store.value_of(EnumId(id)).unwrap_or_default()), w)
                    })
                    .collect();
                if is_array {
                    FieldValue::Array(entries.into_iter().map(|(v, _)| v).collect())
                } else {
                    FieldValue::WeightedSet(entries)
                }
            }),
            Box::new(move |lid| {
                view2
                    .get(lid)
                    .into_iter()
                    .map(|(id, w)| {
                        (FieldValue::Str(store2.value_of(EnumId(id)).unwrap_or_default()), w)
                    })
                    .collect()
            }),
        ))
    }

    fn create_search_context(
        &self,
        term: &str,
        params: &SearchParams,
    ) -> Result<Box<dyn SearchContext>> {
        let helper = StringSearchHelper::new(term, params, self.base.config().cased)?;
        let matched = matching_enum_ids(&self.enum_store, &helper);
        if matched.is_empty() {
            return Ok(Box::new(EmptySearchContext));
        }
        let matched_set: HashSet<u32> = matched.iter().map(|id| id.0).collect();
        let docid_limit = self.base.committed_docid_limit();
        let is_array = self.is_array();
        let view = self.mapping.view();
        let set = matched_set.clone();
        let matcher: crate::search::context::LidMatcher = Arc::new(move |lid| {
            let entries = view.get(lid);
            let mut matched_count = 0;
            let mut weight = 0;
            for (id, w) in &entries {
                if set.contains(id) {
                    if matched_count == 0 {
                        weight = *w;
                    }
                    matched_count += 1;
                }
            }
            if matched_count == 0 {
                (false, 0)
            } else if is_array {
                (true, matched_count)
            } else {
                (true, weight)
            }
        });
        let element_view = self.mapping.view();
        let element_set = matched_set;
        let element_matcher: crate::search::context::ElementMatcher =
            Arc::new(move |lid, element| {
                match element_view.get(lid).get(element as usize) {
                    Some((id, w)) => (element_set.contains(id), *w),
                    None => (false, 0),
                }
            });
        match &self.postings {
            Some(postings) => Ok(Box::new(
                PostingSearchContext::new(docid_limit, matcher, Arc::clone(postings), matched)
                    .with_element_matcher(element_matcher),
            )),
            None => Ok(Box::new(
                ScanSearchContext::new(docid_limit, matcher).with_element_matcher(element_matcher),
            )),
        }
    }

    fn save_snapshot(&self) -> Result<SnapshotData> {
        let limit = self.base.committed_docid_limit();
        let documents: Vec<Vec<(String, i32)>> = (0..limit).map(|lid| self.resolved(lid)).collect();
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
        let payload = bincode::serialize(&MultiStringPayload { documents })?;
        Ok(SnapshotData { header, payload })
    }

    fn load_snapshot(&self, data: &SnapshotData) -> Result<()> {
        let payload: MultiStringPayload = bincode::deserialize(&data.payload)?;
        let limit = payload.documents.len() as u32;
        self.mapping.ensure_capacity(limit.max(1), self.base.generations());
        for (lid, entries) in payload.documents.iter().enumerate() {
            self.install(lid as Lid, entries);
        }
        self.base.set_create_serial(data.header.create_serial);
        self.base.set_loaded_lid_space(limit);
        Ok(())
    }

    fn estimated_save_bytes(&self) -> u64 {
        self.mapping.live_entries() * 20 + 256
    }

    fn memory_used(&self) -> usize {
        self.mapping.memory_used() + self.enum_store.num_unique() * 32
    }
}
