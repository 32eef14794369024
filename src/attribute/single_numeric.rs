use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::ops::Bound;
use std::sync::Arc;

use crate::attribute::changes::{ChangeOp, ChangeVector};
use crate::attribute::value_store::ValueStore;
use crate::attribute::{
    AttributeBase, AttributeReadGuard, AttributeVector, ClosureReadGuard, CommitParam,
};
use crate::core::config::AttributeConfig;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{ArithOp, EnumId, FieldValue, Lid, ValueUpdate};
use crate::index::enum_store::{EnumStore, EnumValue, FloatKey};
use crate::index::posting::PostingStore;
use crate::search::context::{
    EmptySearchContext, PostingSearchContext, ScanSearchContext, SearchContext,
};
use crate::search::term::{NumericRange, SearchParams, parse_numeric_term};
use crate::storage::save::{AttributeHeader, SnapshotData};

pub(crate) fn bound_as_ref<K>(bound: &Bound<K>) -> Bound<&K> {
    match bound {
        Bound::Included(k) => Bound::Included(k),
        Bound::Excluded(k) => Bound::Excluded(k),
        Bound::Unbounded => Bound::Unbounded,
    }
}

/// A numeric cell type storable in a single- or multi-value attribute.
pub trait NumericCellValue:
    Copy
    + Default
    + PartialEq
    + Send
    + Sync
    + EnumValue
    + Serialize
    + DeserializeOwned
    + 'static
{
    fn to_f64(self) -> f64;
    fn from_f64(v: f64) -> Self;
    fn from_field_value(value: &FieldValue) -> Option<Self>;
    fn to_field_value(self) -> FieldValue;
    fn integral() -> bool;

    /// Dictionary bounds for a parsed range; None when the range is empty
    /// in this type's domain.
    fn key_bounds(range: &NumericRange) -> Option<(Bound<Self::Key>, Bound<Self::Key>)>;

    /// Applies an arithmetic update; None means the update is dropped
    /// (integer division by zero).
    fn arith(self, op: ArithOp, operand: f64) -> Option<Self> {
        if Self::integral() && op == ArithOp::Div && operand == 0.0 {
            return None;
        }
        let lhs = self.to_f64();
        let result = match op {
            ArithOp::Add => lhs + operand,
            ArithOp::Sub => lhs - operand,
            ArithOp::Mul => lhs * operand,
            ArithOp::Div => lhs / operand,
        };
        Some(Self::from_f64(result))
    }
}

macro_rules! impl_integer_cell {
    ($($t:ty),*) => {
        $(
            impl NumericCellValue for $t {
                fn to_f64(self) -> f64 {
                    self as f64
                }

                fn from_f64(v: f64) -> Self {
                    v as $t
                }

                fn from_field_value(value: &FieldValue) -> Option<Self> {
                    value.as_i64().map(|v| v as $t)
                }

                fn to_field_value(self) -> FieldValue {
                    FieldValue::Int(self as i64)
                }

                fn integral() -> bool {
                    true
                }

                fn key_bounds(range: &NumericRange) -> Option<(Bound<$t>, Bound<$t>)> {
                    let (lo, hi) = range.integer_bounds()?;
                    let lo = lo.clamp(<$t>::MIN as i64, <$t>::MAX as i64) as $t;
                    let hi = hi.clamp(<$t>::MIN as i64, <$t>::MAX as i64) as $t;
                    if (lo as i64) > (hi as i64) {
                        return None;
                    }
                    Some((Bound::Included(lo), Bound::Included(hi)))
                }
            }
        )*
    };
}

impl_integer_cell!(i8, i16, i32, i64);

macro_rules! impl_float_cell {
    ($($t:ty),*) => {
        $(
            impl NumericCellValue for $t {
                fn to_f64(self) -> f64 {
                    self as f64
                }

                fn from_f64(v: f64) -> Self {
                    v as $t
                }

                fn from_field_value(value: &FieldValue) -> Option<Self> {
                    value.as_f64().map(|v| v as $t)
                }

                fn to_field_value(self) -> FieldValue {
                    FieldValue::Float(self as f64)
                }

                fn integral() -> bool {
                    false
                }

                fn key_bounds(range: &NumericRange) -> Option<(Bound<FloatKey>, Bound<FloatKey>)> {
                    let lo = match range.lo {
                        None => Bound::Unbounded,
                        Some(v) if range.lo_inclusive => Bound::Included(FloatKey(v)),
                        Some(v) => Bound::Excluded(FloatKey(v)),
                    };
                    let hi = match range.hi {
                        None => Bound::Unbounded,
                        Some(v) if range.hi_inclusive => Bound::Included(FloatKey(v)),
                        Some(v) => Bound::Excluded(FloatKey(v)),
                    };
                    Some((lo, hi))
                }
            }
        )*
    };
}

impl_float_cell!(f32, f64);

#[derive(serde::Serialize, serde::Deserialize)]
struct NumericPayload<T> {
    values: Vec<T>,
}

/// Single-value numeric attribute. With fast_search it additionally keeps
/// an enum store (ordered dictionary over the committed values) and posting
/// lists keyed by enum id.
pub struct SingleNumericAttribute<T: NumericCellValue> {
    base: AttributeBase,
    values: ValueStore<T>,
    changes: Mutex<ChangeVector<T>>,
    enum_store: Option<Arc<EnumStore<T>>>,
    postings: Option<Arc<PostingStore>>,
}

impl<T: NumericCellValue> SingleNumericAttribute<T> {
    pub fn new(name: impl Into<String>, config: AttributeConfig) -> Self {
        let fast_search = config.fast_search;
        let grow = config.grow;
        SingleNumericAttribute {
            base: AttributeBase::new(name, config),
            values: ValueStore::new(grow),
            changes: Mutex::new(ChangeVector::new()),
            enum_store: fast_search.then(EnumStore::new),
            postings: fast_search.then(|| Arc::new(PostingStore::new())),
        }
    }

    fn convert(&self, value: &FieldValue) -> Result<T> {
        T::from_field_value(value).ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidInput,
                format!("value {:?} not assignable to attribute '{}'", value, self.base.name()),
            )
        })
    }

    /// Registers a committed value in the dictionary and posting lists.
    fn account_value(&self, lid: Lid, value: T) {
        if let (Some(store), Some(postings)) = (&self.enum_store, &self.postings) {
            let (id, _) = store.insert(&value);
            store.inc_ref(id);
            postings.add(id, lid);
        }
    }

    fn unaccount_value(&self, lid: Lid, value: T) {
        if let (Some(store), Some(postings)) = (&self.enum_store, &self.postings) {
            if let Some(id) = store.lookup(&value) {
                postings.remove(id, lid);
                store.dec_ref(id);
            }
        }
    }

    fn write_value(&self, lid: Lid, value: T) {
        let old = self.values.load(lid);
        if old == value {
            return;
        }
        self.unaccount_value(lid, old);
        self.values.store(lid, value);
        self.account_value(lid, value);
    }

    fn do_commit(&self, param: CommitParam) {
        if !self.base.commit_gate(&param) {
            return;
        }
        // Lids allocated since the last commit enter the dictionary with
        // their default value before queued changes overwrite them.
        let old_limit = self.base.committed_docid_limit();
        for lid in old_limit..self.base.num_docs() {
            self.account_value(lid, T::default());
        }
        let changes = self.changes.lock().take();
        for change in changes {
            match change.op {
                ChangeOp::Assign(v) => self.write_value(change.lid, v),
                ChangeOp::Clear => self.write_value(change.lid, T::default()),
                ChangeOp::Arith(op, operand) => {
                    let current = self.values.load(change.lid);
                    match current.arith(op, operand) {
                        Some(next) => self.write_value(change.lid, next),
                        None => self.base.note_divide_by_zero(),
                    }
                }
                _ => {}
            }
        }
        if let Some(store) = &self.enum_store {
            store.defer_frees(self.base.generations());
        }
        self.base.finish_commit(&param);
    }
}

impl<T: NumericCellValue> AttributeVector for SingleNumericAttribute<T> {
    fn base(&self) -> &AttributeBase {
        &self.base
    }

    fn add_doc(&self) -> Result<Lid> {
        let lid = self.base.alloc_lid();
        self.values.ensure_capacity(lid + 1, self.base.generations());
        Ok(lid)
    }

    fn put(&self, lid: Lid, value: &FieldValue) -> Result<()> {
        self.base.check_writable_lid(lid)?;
        let v = self.convert(value)?;
        self.changes.lock().push(lid, ChangeOp::Assign(v));
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
            ValueUpdate::Arithmetic(op, operand) => {
                self.changes.lock().push(lid, ChangeOp::Arith(*op, *operand));
                Ok(())
            }
            _ => Err(Error::new(
                ErrorKind::InvalidArgument,
                "collection update on single-value attribute",
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
            let value = self.values.load(lid);
            self.unaccount_value(lid, value);
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
        self.values
            .shrink(self.base.committed_docid_limit(), self.base.generations());
        self.base.clear_compacted_flag();
    }

    fn get(&self, lid: Lid) -> FieldValue {
        self.values.view().get(lid).unwrap_or_default().to_field_value()
    }

    fn get_multi(&self, lid: Lid) -> Vec<(FieldValue, i32)> {
        vec![(self.get(lid), 1)]
    }

    fn get_enum(&self, lid: Lid) -> Option<EnumId> {
        let store = self.enum_store.as_ref()?;
        let value = self.values.view().get(lid)?;
        store.lookup(&value)
    }

    fn find_enum(&self, value: &FieldValue) -> Option<EnumId> {
        let store = self.enum_store.as_ref()?;
        let v = T::from_field_value(value)?;
        store.lookup(&v)
    }

    fn make_read_guard(&self, _stable_enum: bool) -> Box<dyn AttributeReadGuard> {
        let guard = self.base.generations().take_guard();
        let view = self.values.view();
        let view2 = Arc::clone(&view);
        Box::new(ClosureReadGuard::new(
            guard,
            self.base.committed_docid_limit(),
            Box::new(move |lid| view.get(lid).unwrap_or_default().to_field_value()),
            Box::new(move |lid| vec![(view2.get(lid).unwrap_or_default().to_field_value(), 1)]),
        ))
    }

    fn create_search_context(
        &self,
        term: &str,
        _params: &SearchParams,
    ) -> Result<Box<dyn SearchContext>> {
        let range = parse_numeric_term(term)?;
        let docid_limit = self.base.committed_docid_limit();
        let view = self.values.view();
        let match_range = range.clone();
        let matcher: crate::search::context::LidMatcher = Arc::new(move |lid| {
            match view.get(lid) {
                Some(v) => (match_range.contains_f64(v.to_f64()), 1),
                None => (false, 0),
            }
        });
        if let (Some(store), Some(postings)) = (&self.enum_store, &self.postings) {
            let ids: Vec<EnumId> = match T::key_bounds(&range) {
                Some((lo, hi)) => {
                    let snapshot = store.snapshot();
                    snapshot
                        .ids_in_range(bound_as_ref(&lo), bound_as_ref(&hi))
                        .into_iter()
                        .map(|(id, _)| id)
                        .collect()
                }
                None => Vec::new(),
            };
            if ids.is_empty() {
                // Zero unique values in the query range: nothing can match
                return Ok(Box::new(EmptySearchContext));
            }
            return Ok(Box::new(
                PostingSearchContext::new(docid_limit, matcher, Arc::clone(postings), ids)
                    .with_range_limit(range.range_limit),
            ));
        }
        Ok(Box::new(
            ScanSearchContext::new(docid_limit, matcher).with_range_limit(range.range_limit),
        ))
    }

    fn save_snapshot(&self) -> Result<SnapshotData> {
        let limit = self.base.committed_docid_limit();
        let view = self.values.view();
        let values: Vec<T> = (0..limit).map(|lid| view.get(lid).unwrap_or_default()).collect();
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
        let payload = bincode::serialize(&NumericPayload { values })?;
        Ok(SnapshotData { header, payload })
    }

    fn load_snapshot(&self, data: &SnapshotData) -> Result<()> {
        let payload: NumericPayload<T> = bincode::deserialize(&data.payload)?;
        let limit = payload.values.len() as u32;
        self.values.ensure_capacity(limit.max(1), self.base.generations());
        for (lid, value) in payload.values.iter().enumerate() {
            self.values.store(lid as Lid, *value);
            self.account_value(lid as Lid, *value);
        }
        self.base.set_create_serial(data.header.create_serial);
        self.base.set_loaded_lid_space(limit);
        Ok(())
    }

    fn estimated_save_bytes(&self) -> u64 {
        self.base.committed_docid_limit() as u64 * std::mem::size_of::<T>() as u64 + 256
    }

    fn memory_used(&self) -> usize {
        self.values.memory_used()
    }
}
