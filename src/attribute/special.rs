use std::any::Any;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::attribute::changes::ChangeVector;
use crate::attribute::multi_value::MultiValueMapping;
use crate::attribute::single_string::SingleStringAttribute;
use crate::attribute::{
    AttributeBase, AttributeReadGuard, AttributeVector, ClosureReadGuard, CommitParam,
};
use crate::core::config::AttributeConfig;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{FieldValue, Lid, ValueUpdate};
use crate::search::context::SearchContext;
use crate::search::term::SearchParams;
use crate::storage::save::{AttributeHeader, SnapshotData};

/// Change record for tensor cells; the change vector stores whole tensors.
type TensorChange = ChangeVector<Vec<f32>>;

/// Result of the read-only prepare step of a two-phase tensor put: the
/// extracted cells plus the insert candidate built off the writer lane.
pub struct PreparedTensor {
    pub cells: Option<Vec<f32>>,
}

/// Dense tensor attribute. The hnsw parameters select two-phase puts and
/// the elevated replay cost; graph maintenance itself is an external
/// collaborator fed through prepare/complete.
pub struct TensorAttribute {
    base: AttributeBase,
    cells: MultiValueMapping<f32>,
    changes: Mutex<TensorChange>,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct TensorPayload {
    documents: Vec<Vec<f32>>,
}

impl TensorAttribute {
    pub fn new(name: impl Into<String>, config: AttributeConfig) -> Self {
        let grow = config.grow;
        TensorAttribute {
            base: AttributeBase::new(name, config),
            cells: MultiValueMapping::new(grow),
            changes: Mutex::new(ChangeVector::new()),
        }
    }

    fn convert(&self, value: &FieldValue) -> Result<Vec<f32>> {
        match value {
            FieldValue::Tensor(cells) => Ok(cells.clone()),
            other => Err(Error::new(
                ErrorKind::InvalidInput,
                format!("value {:?} not assignable to attribute '{}'", other, self.base.name()),
            )),
        }
    }

    fn do_commit(&self, param: CommitParam) {
        if !self.base.commit_gate(&param) {
            return;
        }
        let changes = self.changes.lock().take();
        for change in changes {
            match change.op {
                crate::attribute::changes::ChangeOp::Assign(cells) => {
                    let entries: Vec<(f32, i32)> = cells.into_iter().map(|c| (c, 0)).collect();
                    self.cells.replace(change.lid, &entries);
                }
                crate::attribute::changes::ChangeOp::Clear => {
                    self.cells.replace(change.lid, &[]);
                }
                _ => {}
            }
        }
        self.base.finish_commit(&param);
    }
}

impl AttributeVector for TensorAttribute {
    fn base(&self) -> &AttributeBase {
        &self.base
    }

    fn add_doc(&self) -> Result<Lid> {
        let lid = self.base.alloc_lid();
        self.cells.ensure_capacity(lid + 1, self.base.generations());
        Ok(lid)
    }

    fn put(&self, lid: Lid, value: &FieldValue) -> Result<()> {
        self.base.check_writable_lid(lid)?;
        let cells = self.convert(value)?;
        self.changes
            .lock()
            .push(lid, crate::attribute::changes::ChangeOp::Assign(cells));
        Ok(())
    }

    fn append(&self, _lid: Lid, _value: &FieldValue, _weight: i32) -> Result<()> {
        Err(Error::new(ErrorKind::InvalidArgument, "append on tensor attribute"))
    }

    fn remove_value(&self, _lid: Lid, _value: &FieldValue) -> Result<()> {
        Err(Error::new(ErrorKind::InvalidArgument, "remove on tensor attribute"))
    }

    fn apply_update(&self, lid: Lid, update: &ValueUpdate) -> Result<()> {
        match update {
            ValueUpdate::Assign(v) => self.put(lid, v),
            ValueUpdate::Clear => self.clear_doc(lid),
            _ => Err(Error::new(ErrorKind::InvalidArgument, "unsupported tensor update")),
        }
    }

    fn clear_doc(&self, lid: Lid) -> Result<()> {
        self.base.check_writable_lid(lid)?;
        self.changes.lock().push(lid, crate::attribute::changes::ChangeOp::Clear);
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
            self.cells.replace(lid, &[]);
        }
        self.base.set_lid_space(limit);
    }

    fn shrink_lid_space(&self) {
        self.cells
            .shrink(self.base.committed_docid_limit(), self.base.generations());
        self.base.clear_compacted_flag();
    }

    fn get(&self, lid: Lid) -> FieldValue {
        if lid >= self.base.committed_docid_limit() {
            return FieldValue::Tensor(Vec::new());
        }
        FieldValue::Tensor(self.cells.get(lid).into_iter().map(|(c, _)| c).collect())
    }

    fn get_multi(&self, lid: Lid) -> Vec<(FieldValue, i32)> {
        vec![(self.get(lid), 1)]
    }

    fn make_read_guard(&self, _stable_enum: bool) -> Box<dyn AttributeReadGuard> {
        let guard = self.base.generations().take_guard();
        let view = self.cells.view();
        let view2 = self.cells.view();
        Box::new(ClosureReadGuard::new(
            guard,
            self.base.committed_docid_limit(),
            Box::new(move |lid| {
                FieldValue::Tensor(view.get(lid).into_iter().map(|(c, _)| c).collect())
            }),
            Box::new(move |lid| {
                vec![(FieldValue::Tensor(view2.get(lid).into_iter().map(|(c, _)| c).collect()), 1)]
            }),
        ))
    }

    fn create_search_context(
        &self,
        _term: &str,
        _params: &SearchParams,
    ) -> Result<Box<dyn SearchContext>> {
        // Nearest-neighbor search runs through the external index, not the
        // attribute term interface.
        Err(Error::new(ErrorKind::UnsupportedQuery, "tensor attributes have no term search"))
    }

    fn save_snapshot(&self) -> Result<SnapshotData> {
        let limit = self.base.committed_docid_limit();
        let view = self.cells.view();
        let documents: Vec<Vec<f32>> = (0..limit)
            .map(|lid| view.get(lid).into_iter().map(|(c, _)| c).collect())
            .collect();
        let config = self.base.config();
        let header = AttributeHeader {
            name: self.base.name().to_string(),
            basic_type: config.basic_type,
            collection: config.collection,
            tensor_type: config.tensor_type.clone(),
            predicate_params: None,
            create_serial: self.base.create_serial(),
            docid_limit: limit,
        };
        let payload = bincode::serialize(&TensorPayload { documents })?;
        Ok(SnapshotData { header, payload })
    }

    fn load_snapshot(&self, data: &SnapshotData) -> Result<()> {
        let payload: TensorPayload = bincode::deserialize(&data.payload)?;
        let limit = payload.documents.len() as u32;
        self.cells.ensure_capacity(limit.max(1), self.base.generations());
        for (lid, cells) in payload.documents.iter().enumerate() {
            let entries: Vec<(f32, i32)> = cells.iter().map(|c| (*c, 0)).collect();
            self.cells.replace(lid as Lid, &entries);
        }
        self.base.set_create_serial(data.header.create_serial);
        self.base.set_loaded_lid_space(limit);
        Ok(())
    }

    fn estimated_save_bytes(&self) -> u64 {
        self.cells.live_entries() * 4 + 256
    }

    fn memory_used(&self) -> usize {
        self.cells.memory_used()
    }

    fn prepare_set_value(
        &self,
        _lid: Lid,
        value: Option<&FieldValue>,
    ) -> Result<Box<dyn Any + Send>> {
        let cells = match value {
            Some(v) => Some(self.convert(v)?),
            None => None,
        };
        Ok(Box::new(PreparedTensor { cells }))
    }

    fn complete_set_value(&self, lid: Lid, prepared: Box<dyn Any + Send>) -> Result<()> {
        let prepared = prepared
            .downcast::<PreparedTensor>()
            .map_err(|_| Error::new(ErrorKind::Internal, "unexpected prepared value type"))?;
        match prepared.cells {
            Some(cells) => self.put(lid, &FieldValue::Tensor(cells)),
            None => self.clear_doc(lid),
        }
    }
}

/// Predicate attribute: stores the serialized predicate expression per
/// document. The interval-index used for predicate search is an external
/// codec concern.
pub struct PredicateAttribute {
    inner: SingleStringAttribute,
}

impl PredicateAttribute {
    pub fn new(name: impl Into<String>, config: AttributeConfig) -> Self {
        PredicateAttribute { inner: SingleStringAttribute::new(name, config) }
    }
}

impl AttributeVector for PredicateAttribute {
    fn base(&self) -> &AttributeBase {
        self.inner.base()
    }

    fn add_doc(&self) -> Result<Lid> {
        self.inner.add_doc()
    }

    fn put(&self, lid: Lid, value: &FieldValue) -> Result<()> {
        self.inner.put(lid, value)
    }

    fn append(&self, lid: Lid, value: &FieldValue, weight: i32) -> Result<()> {
        self.inner.append(lid, value, weight)
    }

    fn remove_value(&self, lid: Lid, value: &FieldValue) -> Result<()> {
        self.inner.remove_value(lid, value)
    }

    fn apply_update(&self, lid: Lid, update: &ValueUpdate) -> Result<()> {
        self.inner.apply_update(lid, update)
    }

    fn clear_doc(&self, lid: Lid) -> Result<()> {
        self.inner.clear_doc(lid)
    }

    fn commit(&self, param: CommitParam) {
        self.inner.commit(param);
    }

    fn commit_if_change_vector_too_large(&self) {
        self.inner.commit_if_change_vector_too_large();
    }

    fn compact_lid_space(&self, limit: u32) {
        self.inner.compact_lid_space(limit);
    }

    fn shrink_lid_space(&self) {
        self.inner.shrink_lid_space();
    }

    fn get(&self, lid: Lid) -> FieldValue {
        match self.inner.get(lid) {
            FieldValue::Str(s) => FieldValue::Predicate(s),
            other => other,
        }
    }

    fn get_multi(&self, lid: Lid) -> Vec<(FieldValue, i32)> {
        vec![(self.get(lid), 1)]
    }

    fn make_read_guard(&self, stable_enum: bool) -> Box<dyn AttributeReadGuard> {
        self.inner.make_read_guard(stable_enum)
    }

    fn create_search_context(
        &self,
        _term: &str,
        _params: &SearchParams,
    ) -> Result<Box<dyn SearchContext>> {
        Err(Error::new(
            ErrorKind::UnsupportedQuery,
            "predicate attributes are searched through the predicate interface",
        ))
    }

    fn save_snapshot(&self) -> Result<SnapshotData> {
        let mut snapshot = self.inner.save_snapshot()?;
        snapshot.header.predicate_params = self.base().config().predicate_params;
        Ok(snapshot)
    }

    fn load_snapshot(&self, data: &SnapshotData) -> Result<()> {
        self.inner.load_snapshot(data)
    }

    fn estimated_save_bytes(&self) -> u64 {
        self.inner.estimated_save_bytes()
    }

    fn memory_used(&self) -> usize {
        self.inner.memory_used()
    }
}

/// Reference attribute: holds the target document id of each document;
/// exact-match searchable like a string.
pub struct ReferenceAttribute {
    inner: SingleStringAttribute,
}

impl ReferenceAttribute {
    pub fn new(name: impl Into<String>, config: AttributeConfig) -> Self {
        ReferenceAttribute { inner: SingleStringAttribute::new(name, config) }
    }
}

impl AttributeVector for ReferenceAttribute {
    fn base(&self) -> &AttributeBase {
        self.inner.base()
    }

    fn add_doc(&self) -> Result<Lid> {
        self.inner.add_doc()
    }

    fn put(&self, lid: Lid, value: &FieldValue) -> Result<()> {
        self.inner.put(lid, value)
    }

    fn append(&self, lid: Lid, value: &FieldValue, weight: i32) -> Result<()> {
        self.inner.append(lid, value, weight)
    }

    fn remove_value(&self, lid: Lid, value: &FieldValue) -> Result<()> {
        self.inner.remove_value(lid, value)
    }

    fn apply_update(&self, lid: Lid, update: &ValueUpdate) -> Result<()> {
        self.inner.apply_update(lid, update)
    }

    fn clear_doc(&self, lid: Lid) -> Result<()> {
        self.inner.clear_doc(lid)
    }

    fn commit(&self, param: CommitParam) {
        self.inner.commit(param);
    }

    fn commit_if_change_vector_too_large(&self) {
        self.inner.commit_if_change_vector_too_large();
    }

    fn compact_lid_space(&self, limit: u32) {
        self.inner.compact_lid_space(limit);
    }

    fn shrink_lid_space(&self) {
        self.inner.shrink_lid_space();
    }

    fn get(&self, lid: Lid) -> FieldValue {
        match self.inner.get(lid) {
            FieldValue::Str(s) => FieldValue::Reference(s),
            other => other,
        }
    }

    fn get_multi(&self, lid: Lid) -> Vec<(FieldValue, i32)> {
        vec![(self.get(lid), 1)]
    }

    fn get_enum(&self, lid: Lid) -> Option<crate::core::types::EnumId> {
        self.inner.get_enum(lid)
    }

    fn find_enum(&self, value: &FieldValue) -> Option<crate::core::types::EnumId> {
        self.inner.find_enum(value)
    }

    fn make_read_guard(&self, stable_enum: bool) -> Box<dyn AttributeReadGuard> {
        self.inner.make_read_guard(stable_enum)
    }

    fn create_search_context(
        &self,
        term: &str,
        params: &SearchParams,
    ) -> Result<Box<dyn SearchContext>> {
        self.inner.create_search_context(term, params)
    }

    fn save_snapshot(&self) -> Result<SnapshotData> {
        self.inner.save_snapshot()
    }

    fn load_snapshot(&self, data: &SnapshotData) -> Result<()> {
        self.inner.load_snapshot(data)
    }

    fn estimated_save_bytes(&self) -> u64 {
        self.inner.estimated_save_bytes()
    }

    fn memory_used(&self) -> usize {
        self.inner.memory_used()
    }
}
