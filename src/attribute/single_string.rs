use parking_lot::Mutex;
use std::collections::HashSet;
use std::ops::Bound;
use std::sync::Arc;

use crate::attribute::changes::{ChangeOp, ChangeVector};
use crate::attribute::value_store::ValueStore;
use crate::attribute::{
    AttributeBase, AttributeReadGuard, AttributeVector, ClosureReadGuard, CommitParam,
};
use crate::core::config::AttributeConfig;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{EnumId, FieldValue, Lid, ValueUpdate};
use crate::index::enum_store::{EnumStore, FoldedKey};
use crate::index::posting::PostingStore;
use crate::search::context::{
    EmptySearchContext, PostingSearchContext, ScanSearchContext, SearchContext,
};
use crate::search::string_helper::StringSearchHelper;
use crate::search::term::SearchParams;
use crate::storage::save::{AttributeHeader, SnapshotData};

/// Collects the enum ids whose value matches the compiled term, scanning
/// the ordered dictionary from the folded prefix floor. Shared by the
/// single- and multi-value string attributes.
pub(crate) fn matching_enum_ids(
    store: &EnumStore<String>,
    helper: &StringSearchHelper,
) -> Vec<EnumId> {
    let snapshot = store.snapshot();
    let prefix = helper.dictionary_prefix().to_string();
    if prefix.is_empty() {
        return snapshot
            .scan_all(|v| helper.is_match(v))
            .into_iter()
            .map(|(id, _)| id)
            .collect();
    }
    // The dictionary orders by folded keys, so the scan range is bounded by
    // the folded form of the term prefix even for cased terms.
    let folded_prefix = FoldedKey::fold(&prefix);
    let floor = FoldedKey::prefix_floor(&prefix);
    snapshot
        .scan_from(
            Bound::Included(&floor),
            |key| key.folded.starts_with(folded_prefix.as_str()),
            |v| helper.is_match(v),
        )
        .into_iter()
        .map(|(id, _)| id)
        .collect()
}

/// Single-value string attribute; always enumerated. The cells hold enum
/// ids, the enum store owns the unique values, and fast_search adds per-id
/// posting lists.
pub struct SingleStringAttribute {
    base: AttributeBase,
    ids: ValueStore<u32>,
    changes: Mutex<ChangeVector<String>>,
    enum_store: Arc<EnumStore<String>>,
    postings: Option<Arc<PostingStore>>,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct StringPayload {
    values: Vec<String>,
}

impl SingleStringAttribute {
    pub fn new(name: impl Into<String>, config: AttributeConfig) -> Self {
        let fast_search = config.fast_search;
        let grow = config.grow;
        SingleStringAttribute {
            base: AttributeBase::new(name, config),
            ids: ValueStore::new(grow),
            changes: Mutex::new(ChangeVector::new()),
            enum_store: EnumStore::new(),
            postings: fast_search.then(|| Arc::new(PostingStore::new())),
        }
    }

    fn convert(&self, value: &FieldValue) -> Result<String> {
        value.as_str().map(|s| s.to_string()).ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidInput,
                format!("value {:?} not assignable to attribute '{}'", value, self.base.name()),
            )
        })
    }

    /// First assignment of a freshly committed lid; the cell holds no valid
    /// id yet.
    fn account_new_lid(&self, lid: Lid, value: &String) {
        let (id, _) = self.enum_store.insert(value);
        self.enum_store.inc_ref(id);
        if let Some(postings) = &self.postings {
            postings.add(id, lid);
        }
        self.ids.store(lid, id.0);
    }

    fn write_value(&self, lid: Lid, value: &String) {
        let old_id = EnumId(self.ids.load(lid));
        let (new_id, _) = self.enum_store.insert(value);
        if new_id == old_id {
            return;
        }
        self.enum_store.inc_ref(new_id);
        if let Some(postings) = &self.postings {
            postings.remove(old_id, lid);
            postings.add(new_id, lid);
        }
        self.ids.store(lid, new_id.0);
        self.enum_store.dec_ref(old_id);
    }

    fn resolve(&self, id: u32) -> String {
        self.enum_store.value_of(EnumId(id)).unwrap_or_default()
    }

    fn do_commit(&self, param: CommitParam) {
        if !self.base.commit_gate(&param) {
            return;
        }
        let empty = String::new();
        for lid in self.base.committed_docid_limit()..self.base.num_docs() {
            self.account_new_lid(lid, &empty);
        }
        let changes = self.changes.lock().take();
        for change in changes {
            match change.op {
                ChangeOp::Assign(s) => self.write_value(change.lid, &s),
                ChangeOp::Clear => self.write_value(change.lid, &empty),
                _ => {}
            }
        }
        self.enum_store.defer_frees(self.base.generations());
        self.base.finish_commit(&param);
    }
}

impl AttributeVector for SingleStringAttribute {
    fn base(&self) -> &AttributeBase {
        &self.base
    }

    fn add_doc(&self) -> Result<Lid> {
        let lid = self.base.alloc_lid();
        self.ids.ensure_capacity(lid + 1, self.base.generations());
        Ok(lid)
    }

    fn put(&self, lid: Lid, value: &FieldValue) -> Result<()> {
        self.base.check_writable_lid(lid)?;
        let s = self.convert(value)?;
        self.changes.lock().push(lid, ChangeOp::Assign(s));
        Ok(())
    }

    fn append(&self, _lid: Lid, _value: &FieldValue, _weight: i32) -> Result<()> {
        Err(Error::new(ErrorKind::InvalidArgument, "append on single-value attribute"))
    }

    fn remove_value(&self, _lid: Lid, _value: &FieldValue) -> Result<()> {
        Err(Error::new(ErrorKind::InvalidArgument, "remove on single-value attribute"))
    }

    fn apply_update(&self, lid: Lid, update: &ValueUpdate) -> Result<()> {
        self.base.check_writable_lid(lid)?;
        match update {
            ValueUpdate::Assign(v) => self.put(lid, v),
            ValueUpdate::Clear => self.clear_doc(lid),
            _ => Err(Error::new(
                ErrorKind::InvalidArgument,
                "unsupported update on single string attribute",
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

    fn compact_lid_space(&self, limit: u32) {
        let committed = self.base.committed_docid_limit();
        if limit >= committed {
            return;
        }
        for lid in limit..committed {
            let id = EnumId(self.ids.load(lid));
            if let Some(postings) = &self.postings {
                postings.remove(id, lid);
            }
            self.enum_store.dec_ref(id);
        }
        self.enum_store.defer_frees(self.base.generations());
        if let Some(postings) = &self.postings {
            postings.truncate_lid_space(limit);
        }
        self.base.set_lid_space(limit);
    }

    fn shrink_lid_space(&self) {
        self.ids
            .shrink(self.base.committed_docid_limit(), self.base.generations());
        self.base.clear_compacted_flag();
    }

    fn get(&self, lid: Lid) -> FieldValue {
        if lid >= self.base.committed_docid_limit() {
            return FieldValue::Str(String::new());
        }
        FieldValue::Str(self.resolve(self.ids.load(lid)))
    }

    fn get_multi(&self, lid: Lid) -> Vec<(FieldValue, i32)> {
        vec![(self.get(lid), 1)]
    }

    fn get_enum(&self, lid: Lid) -> Option<EnumId> {
        if lid >= self.base.committed_docid_limit() {
            return None;
        }
        Some(EnumId(self.ids.view().get(lid)?))
    }

    fn find_enum(&self, value: &FieldValue) -> Option<EnumId> {
        let s = value.as_str()?.to_string();
        self.enum_store.lookup(&s)
    }

    fn make_read_guard(&self, _stable_enum: bool) -> Box<dyn AttributeReadGuard> {
        let guard = self.base.generations().take_guard();
        let docid_limit = self.base.committed_docid_limit();
        let view = self.ids.view();
        let view2 = Arc::clone(&view);
        let store = Arc::clone(&self.enum_store);
        let store2 = Arc::clone(&store);
        Box::new(ClosureReadGuard::new(
            guard,
            docid_limit,
            Box::new(move |lid| {
                let value = view
                    .get(lid)
                    .and_then(|id| store.value_of(EnumId(id)))
                    .unwrap_or_default();
                FieldValue::Str(value)
            }),
            Box::new(move |lid| {
                let value = view2
                    .get(lid)
                    .and_then(|id| store2.value_of(EnumId(id)))
                    .unwrap_or_default();
                vec![(FieldValue::Str(value), 1)]
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
        let view = self.ids.view();
        let matcher: crate::search::context::LidMatcher = Arc::new(move |lid| {
            match view.get(lid) {
                Some(id) => (matched_set.contains(&id), 1),
                None => (false, 0),
            }
        });
        match &self.postings {
            Some(postings) => Ok(Box::new(PostingSearchContext::new(
                docid_limit,
                matcher,
                Arc::clone(postings),
                matched,
            ))),
            None => Ok(Box::new(ScanSearchContext::new(docid_limit, matcher))),
        }
    }

    fn save_snapshot(&self) -> Result<SnapshotData> {
        let limit = self.base.committed_docid_limit();
        let view = self.ids.view();
        let values: Vec<String> = (0..limit)
            .map(|lid| {
                view.get(lid)
                    .and_then(|id| self.enum_store.value_of(EnumId(id)))
                    .unwrap_or_default()
            })
            .collect();
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
        let payload = bincode::serialize(&StringPayload { values })?;
        Ok(SnapshotData { header, payload })
    }

    fn load_snapshot(&self, data: &SnapshotData) -> Result<()> {
        let payload: StringPayload = bincode::deserialize(&data.payload)?;
        let limit = payload.values.len() as u32;
        self.ids.ensure_capacity(limit.max(1), self.base.generations());
        for (lid, value) in payload.values.iter().enumerate() {
            self.account_new_lid(lid as Lid, value);
        }
        self.base.set_create_serial(data.header.create_serial);
        self.base.set_loaded_lid_space(limit);
        Ok(())
    }

    fn estimated_save_bytes(&self) -> u64 {
        self.base.committed_docid_limit() as u64 * 16 + 256
    }

    fn memory_used(&self) -> usize {
        self.ids.memory_used() + self.enum_store.num_unique() * 32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::BasicType;
    use crate::search::iterator::collect_hits;

    fn string_attr(fast_search: bool) -> SingleStringAttribute {
        let mut config = AttributeConfig::single(BasicType::String);
        if fast_search {
            config = config.with_fast_search();
        }
        let attr = SingleStringAttribute::new("title", config);
        attr.add_doc().unwrap();
        attr.commit(CommitParam::internal());
        attr
    }

    fn fill(attr: &SingleStringAttribute, values: &[&str], serial: u64) {
        for v in values {
            let lid = attr.add_doc().unwrap();
            attr.put(lid, &FieldValue::Str(v.to_string())).unwrap();
        }
        attr.commit(CommitParam::new(serial));
    }

    #[test]
    fn put_get_and_enum_ids() {
        let attr = string_attr(false);
        fill(&attr, &["foo", "bar", "foo"], 1);
        assert_eq!(attr.get(1), FieldValue::Str("foo".into()));
        assert_eq!(attr.get(2), FieldValue::Str("bar".into()));
        // same value, same enum id
        assert_eq!(attr.get_enum(1), attr.get_enum(3));
        assert_ne!(attr.get_enum(1), attr.get_enum(2));
        assert_eq!(attr.find_enum(&FieldValue::Str("bar".into())), attr.get_enum(2));
        assert_eq!(attr.find_enum(&FieldValue::Str("baz".into())), None);
    }

    #[test]
    fn overwrite_releases_unreferenced_value() {
        let attr = string_attr(false);
        fill(&attr, &["only"], 1);
        attr.put(1, &FieldValue::Str("next".into())).unwrap();
        attr.commit(CommitParam::new(2));
        assert_eq!(attr.get(1), FieldValue::Str("next".into()));
        // "only" lost its last reference and left the dictionary
        assert_eq!(attr.find_enum(&FieldValue::Str("only".into())), None);
    }

    #[test]
    fn exact_prefix_regex_fuzzy_search() {
        let attr = string_attr(true);
        fill(&attr, &["Hello", "help", "world", "hello"], 1);

        let ctx = attr.create_search_context("hello", &SearchParams::default()).unwrap();
        let mut it = ctx.create_iterator(true);
        assert_eq!(collect_hits(it.as_mut(), 5), vec![1, 4]);

        let ctx = attr.create_search_context("hel*", &SearchParams::default()).unwrap();
        let mut it = ctx.create_iterator(true);
        assert_eq!(collect_hits(it.as_mut(), 5), vec![1, 2, 4]);

        let ctx = attr.create_search_context("^hel.o$", &SearchParams::regex()).unwrap();
        let mut it = ctx.create_iterator(true);
        assert_eq!(collect_hits(it.as_mut(), 5), vec![1, 4]);

        let ctx = attr.create_search_context("hellp", &SearchParams::fuzzy(1, 3)).unwrap();
        let mut it = ctx.create_iterator(true);
        assert_eq!(collect_hits(it.as_mut(), 5), vec![1, 2, 4]);

        // enum hint: no dictionary entry in range
        let ctx = attr.create_search_context("zzz*", &SearchParams::default()).unwrap();
        assert_eq!(ctx.approximate_hits(), 0);
    }

    #[test]
    fn cased_attribute_distinguishes_case() {
        let mut config = AttributeConfig::single(BasicType::String);
        config.cased = true;
        let attr = SingleStringAttribute::new("sym", config);
        attr.add_doc().unwrap();
        attr.commit(CommitParam::internal());
        fill(&attr, &["Foo", "foo"], 1);
        let ctx = attr.create_search_context("Foo", &SearchParams::default()).unwrap();
        let mut it = ctx.create_iterator(true);
        assert_eq!(collect_hits(it.as_mut(), 3), vec![1]);
    }

    #[test]
    fn string_snapshot_round_trip() {
        let attr = string_attr(true);
        fill(&attr, &["alpha", "beta", "alpha"], 3);
        let snap = attr.save_snapshot().unwrap();
        let restored = string_attr(true);
        restored.load_snapshot(&snap).unwrap();
        assert_eq!(restored.get(1), FieldValue::Str("alpha".into()));
        assert_eq!(restored.get(3), FieldValue::Str("alpha".into()));
        assert_eq!(restored.get_enum(1), restored.get_enum(3));
        let ctx = restored.create_search_context("beta", &SearchParams::default()).unwrap();
        let mut it = ctx.create_iterator(true);
        assert_eq!(collect_hits(it.as_mut(), 4), vec![2]);
    }
}
