use crossbeam::channel::bounded;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::attribute::{AttributeVector, AttributeVectorSP, CommitParam};
use crate::core::error::Result;
use crate::core::types::{Document, DocumentUpdate, Lid, SerialNum};
use crate::manager::imported::ImportedAttributesRepo;
use crate::writer::executor::{ExecutorId, SequencedTaskExecutor, SharedExecutor, Task};
use crate::writer::gate::{Gate, OnDone};

/// What the writer needs from its attribute manager: the writable vectors,
/// the executors, and the imported-attribute repo whose search caches a
/// force-commit clears.
pub trait WriterBackend: Send + Sync {
    fn writable_attributes(&self) -> Vec<AttributeVectorSP>;
    fn field_writer(&self) -> Arc<SequencedTaskExecutor>;
    fn shared_executor(&self) -> Arc<SharedExecutor>;
    fn imported_attributes(&self) -> Option<Arc<ImportedAttributesRepo>>;
}

/// Pads a vector with cleared documents up to `docid_limit`, committing
/// every 1024 allocations to bound the change queue.
pub fn pad_attribute(attr: &dyn AttributeVector, docid_limit: u32) -> Result<()> {
    let mut uncommitted = 0u32;
    while attr.base().num_docs() < docid_limit {
        let lid = attr.add_doc()?;
        attr.clear_doc(lid)?;
        uncommitted += 1;
        if uncommitted >= 1024 {
            uncommitted = 0;
            attr.commit(CommitParam::internal());
        }
    }
    if uncommitted > 0 {
        attr.commit(CommitParam::internal());
    }
    Ok(())
}

fn ensure_lid_space(serial: SerialNum, lid: Lid, attr: &dyn AttributeVector) {
    if attr.base().last_serial() < serial {
        if let Err(e) = pad_attribute(attr, lid + 1) {
            warn!(attribute = attr.base().name(), error = %e, "could not pad attribute");
        }
    }
}

fn apply_put(serial: SerialNum, value: Option<&crate::core::types::FieldValue>, lid: Lid, attr: &dyn AttributeVector) {
    ensure_lid_space(serial, lid, attr);
    let outcome = match value {
        Some(v) => attr.put(lid, v),
        None => attr.clear_doc(lid),
    };
    if let Err(e) = outcome {
        // Unsupported extraction or wrong type: the document gets the
        // type-specific undefined sentinel
        debug!(attribute = attr.base().name(), lid, error = %e, "put fell back to clear");
        let _ = attr.clear_doc(lid);
    }
    attr.commit_if_change_vector_too_large();
}

struct WriteField {
    attr: AttributeVectorSP,
    struct_field: bool,
    two_phase: bool,
}

/// One group of fields routed to the same lane; a put becomes at most one
/// task per context.
struct WriteContext {
    executor_id: ExecutorId,
    fields: Vec<WriteField>,
    has_struct_field: bool,
    two_phase: bool,
}

impl WriteContext {
    fn new(executor_id: ExecutorId) -> Self {
        WriteContext { executor_id, fields: Vec::new(), has_struct_field: false, two_phase: false }
    }

    fn add(&mut self, attr: AttributeVectorSP, two_phase: bool) {
        let struct_field = attr.base().is_struct_field();
        self.fields.push(WriteField { attr, struct_field, two_phase });
        self.has_struct_field |= struct_field;
        if two_phase {
            // A two-phase field owns its context
            debug_assert_eq!(self.fields.len(), 1);
            self.two_phase = true;
        }
    }
}

struct AttributeWithInfo {
    attr: AttributeVectorSP,
    executor_id: ExecutorId,
    two_phase_assign: bool,
}

/// Serializes writes across attribute vectors by partitioning fields to
/// executor lanes. For any single vector, the effective operation order is
/// its lane submission order; nothing is ordered across lanes.
pub struct AttributeWriter {
    backend: Arc<dyn WriterBackend>,
    executor: Arc<SequencedTaskExecutor>,
    shared: Arc<SharedExecutor>,
    write_contexts: Vec<WriteContext>,
    attr_map: HashMap<String, AttributeWithInfo>,
    has_struct_field_attribute: bool,
}

impl AttributeWriter {
    pub fn new(backend: Arc<dyn WriterBackend>) -> Self {
        let executor = backend.field_writer();
        let shared = backend.shared_executor();
        let mut writer = AttributeWriter {
            backend,
            executor,
            shared,
            write_contexts: Vec::new(),
            attr_map: HashMap::new(),
            has_struct_field_attribute: false,
        };
        writer.setup_write_contexts();
        writer.setup_attribute_mapping();
        writer
    }

    fn setup_write_contexts(&mut self) {
        let mut field_contexts: Vec<(ExecutorId, String, AttributeVectorSP, bool)> = self
            .backend
            .writable_attributes()
            .into_iter()
            .map(|attr| {
                let id = self.executor.executor_id_from_name(attr.base().name_prefix());
                let two_phase = attr.base().config().use_two_phase_put();
                (id, attr.base().name().to_string(), attr, two_phase)
            })
            .collect();
        field_contexts.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));
        for (id, _, attr, two_phase) in &field_contexts {
            if *two_phase {
                continue;
            }
            if self.write_contexts.last().map(|wc| wc.executor_id) != Some(*id) {
                self.write_contexts.push(WriteContext::new(*id));
            }
            self.write_contexts.last_mut().unwrap().add(Arc::clone(attr), false);
        }
        for (id, _, attr, two_phase) in field_contexts {
            if two_phase {
                let mut wc = WriteContext::new(id);
                wc.add(attr, true);
                self.write_contexts.push(wc);
            }
        }
        self.has_struct_field_attribute =
            self.write_contexts.iter().any(|wc| wc.has_struct_field);
    }

    fn setup_attribute_mapping(&mut self) {
        for attr in self.backend.writable_attributes() {
            let executor_id = self.executor.executor_id_from_name(attr.base().name_prefix());
            let two_phase_assign = attr.base().config().use_two_phase_put();
            self.attr_map.insert(
                attr.base().name().to_string(),
                AttributeWithInfo { attr, executor_id, two_phase_assign },
            );
        }
    }

    pub fn has_struct_field_attribute(&self) -> bool {
        self.has_struct_field_attribute
    }

    fn two_phase_put(
        &self,
        wc: &WriteContext,
        serial: SerialNum,
        doc: &Arc<Document>,
        lid: Lid,
        on_done: OnDone,
    ) {
        let attr = Arc::clone(&wc.fields[0].attr);
        let complete_attr = Arc::clone(&attr);
        let name = attr.base().name().to_string();
        let doc = Arc::clone(doc);
        let (sender, receiver) = bounded::<Result<Box<dyn Any + Send>>>(1);
        self.shared.execute(move || {
            if attr.base().last_serial() < serial {
                let value = doc.get_field_path(&name);
                let _ = sender.send(attr.prepare_set_value(lid, value));
            }
            // A gated prepare drops the sender; complete sees a closed
            // channel and skips.
        });
        self.executor.execute_fn(wc.executor_id, move || {
            if complete_attr.base().last_serial() < serial {
                ensure_lid_space(serial, lid, complete_attr.as_ref());
                match receiver.recv() {
                    Ok(Ok(prepared)) => {
                        if let Err(e) = complete_attr.complete_set_value(lid, prepared) {
                            warn!(error = %e, "two-phase put completion failed");
                        }
                    }
                    Ok(Err(e)) => {
                        debug!(error = %e, "two-phase prepare failed; clearing document");
                        let _ = complete_attr.clear_doc(lid);
                    }
                    Err(_) => {}
                }
            }
            let _ = &on_done;
        });
    }

    fn internal_put(
        &self,
        serial: SerialNum,
        doc: &Arc<Document>,
        lid: Lid,
        all_attributes: bool,
        on_done: OnDone,
    ) {
        for wc in &self.write_contexts {
            if wc.two_phase {
                self.two_phase_put(wc, serial, doc, lid, on_done.clone());
                continue;
            }
            if !(all_attributes || wc.has_struct_field) {
                continue;
            }
            let doc = Arc::clone(doc);
            let attrs: Vec<AttributeVectorSP> = wc
                .fields
                .iter()
                .filter(|f| all_attributes || f.struct_field)
                .map(|f| Arc::clone(&f.attr))
                .collect();
            let on_done = on_done.clone();
            let task: Task = Box::new(move || {
                for attr in &attrs {
                    if attr.base().last_serial() < serial {
                        let value = doc.get_field_path(attr.base().name());
                        apply_put(serial, value, lid, attr.as_ref());
                    }
                }
                let _ = &on_done;
            });
            self.executor.execute(wc.executor_id, task);
        }
    }

    /// Applies every attribute field of the document.
    pub fn put(&self, serial: SerialNum, doc: Arc<Document>, lid: Lid, on_done: OnDone) {
        self.internal_put(serial, &doc, lid, true, on_done);
    }

    /// Applies only struct-field attributes; used when a nested document
    /// change re-derives them.
    pub fn update_document(&self, serial: SerialNum, doc: Arc<Document>, lid: Lid, on_done: OnDone) {
        self.internal_put(serial, &doc, lid, false, on_done);
    }

    /// Applies a field-update document to the subset of fields that have
    /// attributes. `on_field` reports whether each named field resolved to
    /// a writable attribute.
    pub fn update(
        &self,
        serial: SerialNum,
        update: Arc<DocumentUpdate>,
        lid: Lid,
        on_done: OnDone,
        mut on_field: impl FnMut(&str, bool),
    ) {
        let mut batches: HashMap<ExecutorId, Vec<(AttributeVectorSP, usize)>> = HashMap::new();
        for (idx, field_update) in update.field_updates.iter().enumerate() {
            let info = self.attr_map.get(&field_update.field);
            on_field(&field_update.field, info.is_some());
            let Some(info) = info else {
                debug!(field = %field_update.field, "no attribute for updated field");
                continue;
            };
            if info.attr.base().last_serial() >= serial {
                continue;
            }
            if info.two_phase_assign && field_update.is_single_assign() {
                let value = field_update.single_assign_value().cloned();
                let attr = Arc::clone(&info.attr);
                let complete_attr = Arc::clone(&attr);
                let (sender, receiver) = bounded::<Result<Box<dyn Any + Send>>>(1);
                self.shared.execute(move || {
                    if attr.base().last_serial() < serial {
                        let _ = sender.send(attr.prepare_set_value(lid, value.as_ref()));
                    }
                });
                let on_done = on_done.clone();
                self.executor.execute_fn(info.executor_id, move || {
                    if complete_attr.base().last_serial() < serial {
                        ensure_lid_space(serial, lid, complete_attr.as_ref());
                        if let Ok(Ok(prepared)) = receiver.recv() {
                            if let Err(e) = complete_attr.complete_set_value(lid, prepared) {
                                warn!(error = %e, "two-phase assign update failed");
                            }
                        }
                    }
                    let _ = &on_done;
                });
                continue;
            }
            batches
                .entry(info.executor_id)
                .or_default()
                .push((Arc::clone(&info.attr), idx));
        }
        for (executor_id, entries) in batches {
            let update = Arc::clone(&update);
            let on_done = on_done.clone();
            self.executor.execute_fn(executor_id, move || {
                for (attr, idx) in &entries {
                    if attr.base().last_serial() >= serial {
                        continue;
                    }
                    ensure_lid_space(serial, lid, attr.as_ref());
                    for value_update in &update.field_updates[*idx].updates {
                        if let Err(e) = attr.apply_update(lid, value_update) {
                            debug!(
                                attribute = attr.base().name(),
                                lid,
                                error = %e,
                                "dropped unsupported update"
                            );
                        }
                    }
                    attr.commit_if_change_vector_too_large();
                }
                let _ = &on_done;
            });
        }
    }

    pub fn remove(&self, serial: SerialNum, lid: Lid, on_done: OnDone) {
        for wc in &self.write_contexts {
            let attrs: Vec<AttributeVectorSP> =
                wc.fields.iter().map(|f| Arc::clone(&f.attr)).collect();
            let on_done = on_done.clone();
            self.executor.execute_fn(wc.executor_id, move || {
                for attr in &attrs {
                    // <= so lid moves replayed at the same serial still clear
                    if attr.base().last_serial() <= serial {
                        ensure_lid_space(serial, lid, attr.as_ref());
                        let _ = attr.clear_doc(lid);
                    }
                }
                let _ = &on_done;
            });
        }
    }

    pub fn remove_batch(&self, serial: SerialNum, lids: Vec<Lid>, on_done: OnDone) {
        for wc in &self.write_contexts {
            let attrs: Vec<AttributeVectorSP> =
                wc.fields.iter().map(|f| Arc::clone(&f.attr)).collect();
            let lids = lids.clone();
            let on_done = on_done.clone();
            self.executor.execute_fn(wc.executor_id, move || {
                for attr in &attrs {
                    if attr.base().last_serial() < serial {
                        for lid in &lids {
                            ensure_lid_space(serial, *lid, attr.as_ref());
                            let _ = attr.clear_doc(*lid);
                        }
                    }
                }
                let _ = &on_done;
            });
        }
    }

    /// Advances the sync token of idle vectors so stale memory can be
    /// reclaimed even when nothing is being fed.
    pub fn heartbeat(&self, serial: SerialNum, on_done: OnDone) {
        for info in self.attr_map.values() {
            let attr = Arc::clone(&info.attr);
            let on_done = on_done.clone();
            self.executor.execute_fn(info.executor_id, move || {
                attr.reclaim_unused_memory();
                attr.commit(CommitParam::new(serial));
                let _ = &on_done;
            });
        }
    }

    /// Broadcast commit barrier: the callback fires only after every prior
    /// write on every lane is committed at a serial <= `serial`. Also drops
    /// imported-attribute search caches.
    pub fn force_commit(&self, serial: SerialNum, on_done: OnDone) {
        if let Some(imported) = self.backend.imported_attributes() {
            imported.clear_search_caches();
        }
        for wc in &self.write_contexts {
            let attrs: Vec<AttributeVectorSP> =
                wc.fields.iter().map(|f| Arc::clone(&f.attr)).collect();
            let on_done = on_done.clone();
            self.executor.execute_fn(wc.executor_id, move || {
                for attr in &attrs {
                    let param = if serial <= attr.base().create_serial() {
                        CommitParam::new(serial).force_stats()
                    } else {
                        CommitParam::new(serial)
                    };
                    attr.commit(param);
                }
                let _ = &on_done;
            });
        }
        self.executor.wakeup();
    }

    /// After transaction-log replay: pad every vector to the final docid
    /// limit and release the slack. Blocks until done.
    pub fn on_replay_done(&self, docid_limit: u32) {
        let gate = Gate::new();
        {
            let token = gate.callback();
            for info in self.attr_map.values() {
                let attr = Arc::clone(&info.attr);
                let token = token.clone();
                self.executor.execute_fn(info.executor_id, move || {
                    if let Err(e) = pad_attribute(attr.as_ref(), docid_limit) {
                        warn!(attribute = attr.base().name(), error = %e, "replay padding failed");
                    }
                    attr.compact_lid_space(docid_limit);
                    attr.shrink_lid_space();
                    let _ = &token;
                });
            }
        }
        gate.await_done();
    }

    /// Shrinks the lid space of every vector to `limit`. Blocks until done.
    pub fn compact_lid_space(&self, limit: u32, serial: SerialNum) {
        let gate = Gate::new();
        {
            let token = gate.callback();
            for info in self.attr_map.values() {
                let attr = Arc::clone(&info.attr);
                let token = token.clone();
                self.executor.execute_fn(info.executor_id, move || {
                    if attr.base().last_serial() <= serial {
                        attr.commit(CommitParam::internal());
                        if limit <= attr.base().committed_docid_limit() {
                            attr.compact_lid_space(limit);
                        }
                        attr.commit(CommitParam::new(serial));
                    }
                    let _ = &token;
                });
            }
        }
        gate.await_done();
    }

    /// Enqueues a sentinel on every lane; the callback fires when every
    /// lane has drained. Does not force anything to disk.
    pub fn drain(&self, on_done: OnDone) {
        for wc in &self.write_contexts {
            let on_done = on_done.clone();
            self.executor.execute_fn(wc.executor_id, move || {
                let _ = &on_done;
            });
        }
    }
}

impl Drop for AttributeWriter {
    fn drop(&mut self) {
        let gate = Gate::new();
        self.drain(gate.callback());
        gate.await_done();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::factory::AttributeFactory;
    use crate::core::config::{AttributeConfig, BasicType, CollectionType, HnswParams, TensorType};
    use crate::core::types::{FieldUpdate, FieldValue, ValueUpdate, WeightOp};
    use crate::manager::manager::AttributeManager;
    use crate::manager::spec::AttributeSpec;
    use crate::memory::interlock::Interlock;
    use crate::writer::executor::{SequencedTaskExecutor, SharedExecutor};

    struct Fixture {
        _tmp: tempfile::TempDir,
        mgr: Arc<AttributeManager>,
    }

    impl Fixture {
        fn new(specs: Vec<AttributeSpec>) -> Self {
            let tmp = tempfile::tempdir().unwrap();
            let mgr = AttributeManager::new(
                tmp.path().join("attributes"),
                "test.ready",
                Arc::new(AttributeFactory::new()),
                Arc::new(Interlock::new()),
                Arc::new(SequencedTaskExecutor::new(4, 200)),
                Arc::new(SharedExecutor::new(2)),
            )
            .unwrap();
            for spec in specs {
                mgr.add_attribute(spec, 1).unwrap();
            }
            Fixture { _tmp: tmp, mgr }
        }

        fn writer(&self) -> AttributeWriter {
            AttributeWriter::new(Arc::clone(&self.mgr) as Arc<dyn WriterBackend>)
        }

        fn force_commit(&self, writer: &AttributeWriter, serial: SerialNum) {
            let gate = Gate::new();
            writer.force_commit(serial, gate.callback());
            gate.await_done();
        }
    }

    fn doc(fields: &[(&str, FieldValue)]) -> Arc<Document> {
        let mut doc = Document::new();
        for (name, value) in fields {
            doc.set_field(*name, value.clone());
        }
        Arc::new(doc)
    }

    #[test]
    fn put_applies_all_fields_and_commit_barrier_waits() {
        let fixture = Fixture::new(vec![
            AttributeSpec::new("price", AttributeConfig::single(BasicType::Int32)),
            AttributeSpec::new("title", AttributeConfig::single(BasicType::String)),
        ]);
        let writer = fixture.writer();
        writer.put(
            10,
            doc(&[("price", FieldValue::Int(7)), ("title", FieldValue::Str("hello".into()))]),
            1,
            crate::writer::gate::noop_done(),
        );
        fixture.force_commit(&writer, 10);
        let price = fixture.mgr.find_attribute("price").unwrap();
        let title = fixture.mgr.find_attribute("title").unwrap();
        assert_eq!(price.get(1), FieldValue::Int(7));
        assert_eq!(title.get(1), FieldValue::Str("hello".into()));
        assert_eq!(price.last_serial(), 10);
        assert_eq!(title.last_serial(), 10);
    }

    #[test]
    fn missing_field_clears_to_default() {
        let fixture = Fixture::new(vec![
            AttributeSpec::new("price", AttributeConfig::single(BasicType::Int32)),
        ]);
        let writer = fixture.writer();
        writer.put(5, doc(&[("price", FieldValue::Int(3))]), 1, crate::writer::gate::noop_done());
        fixture.force_commit(&writer, 5);
        // next put has no value for the field
        writer.put(6, doc(&[]), 1, crate::writer::gate::noop_done());
        fixture.force_commit(&writer, 6);
        let price = fixture.mgr.find_attribute("price").unwrap();
        assert_eq!(price.get(1), FieldValue::Int(0));
    }

    #[test]
    fn replay_is_idempotent() {
        let fixture = Fixture::new(vec![
            AttributeSpec::new("price", AttributeConfig::single(BasicType::Int32)),
        ]);
        let writer = fixture.writer();
        let feed = |writer: &AttributeWriter| {
            writer.put(10, doc(&[("price", FieldValue::Int(1))]), 1, crate::writer::gate::noop_done());
            writer.put(11, doc(&[("price", FieldValue::Int(2))]), 2, crate::writer::gate::noop_done());
            writer.remove(12, 1, crate::writer::gate::noop_done());
        };
        feed(&writer);
        fixture.force_commit(&writer, 12);
        let price = fixture.mgr.find_attribute("price").unwrap();
        let before: Vec<FieldValue> = (1..=2).map(|lid| price.get(lid)).collect();
        // a restart resumes from an older serial: the same ops replay
        feed(&writer);
        fixture.force_commit(&writer, 12);
        let after: Vec<FieldValue> = (1..=2).map(|lid| price.get(lid)).collect();
        assert_eq!(before, after);
        assert_eq!(price.get(1), FieldValue::Int(0));
        assert_eq!(price.get(2), FieldValue::Int(2));
    }

    #[test]
    fn update_routes_only_to_attribute_fields() {
        let fixture = Fixture::new(vec![
            AttributeSpec::new(
                "tags",
                AttributeConfig::new(
                    BasicType::String,
                    CollectionType::WeightedSet {
                        create_if_nonexistent: true,
                        remove_if_zero: true,
                    },
                ),
            ),
        ]);
        let writer = fixture.writer();
        writer.put(
            1,
            doc(&[(
                "tags",
                FieldValue::WeightedSet(vec![
                    (FieldValue::Str("a".into()), 5),
                    (FieldValue::Str("b".into()), 3),
                ]),
            )]),
            1,
            crate::writer::gate::noop_done(),
        );
        fixture.force_commit(&writer, 1);

        let update = DocumentUpdate::new()
            .push(FieldUpdate::new("tags").push(ValueUpdate::AdjustWeight(
                FieldValue::Str("a".into()),
                WeightOp::Set(0),
            )))
            .push(FieldUpdate::new("unknown").push(ValueUpdate::Clear));
        let mut seen = Vec::new();
        writer.update(2, Arc::new(update), 1, crate::writer::gate::noop_done(), |name, found| {
            seen.push((name.to_string(), found));
        });
        fixture.force_commit(&writer, 2);
        assert_eq!(
            seen,
            vec![("tags".to_string(), true), ("unknown".to_string(), false)]
        );
        let tags = fixture.mgr.find_attribute("tags").unwrap();
        assert_eq!(tags.get_multi(1), vec![(FieldValue::Str("b".into()), 3)]);
    }

    #[test]
    fn lane_isolation_outcome_is_deterministic() {
        let fixture = Fixture::new(vec![
            AttributeSpec::new("alpha", AttributeConfig::single(BasicType::Int32)),
            AttributeSpec::new("beta", AttributeConfig::single(BasicType::Int64)),
        ]);
        let writer = fixture.writer();
        for i in 0..200u32 {
            writer.put(
                (i + 1) as SerialNum,
                doc(&[
                    ("alpha", FieldValue::Int(i as i64)),
                    ("beta", FieldValue::Int(i as i64 * 2)),
                ]),
                1,
                crate::writer::gate::noop_done(),
            );
        }
        fixture.force_commit(&writer, 200);
        let alpha = fixture.mgr.find_attribute("alpha").unwrap();
        let beta = fixture.mgr.find_attribute("beta").unwrap();
        // regardless of lane interleaving, the per-vector submission order
        // decides the final value
        assert_eq!(alpha.get(1), FieldValue::Int(199));
        assert_eq!(beta.get(1), FieldValue::Int(398));
    }

    #[test]
    fn two_phase_put_for_hnsw_tensor() {
        let mut config = AttributeConfig::single(BasicType::Tensor);
        config.tensor_type = Some(TensorType("tensor<float>(x[2])".into()));
        config.hnsw = Some(HnswParams::default());
        assert!(config.use_two_phase_put());
        let fixture = Fixture::new(vec![AttributeSpec::new("embedding", config)]);
        let writer = fixture.writer();
        writer.put(
            3,
            doc(&[("embedding", FieldValue::Tensor(vec![0.25, 0.75]))]),
            1,
            crate::writer::gate::noop_done(),
        );
        fixture.force_commit(&writer, 3);
        let attr = fixture.mgr.find_attribute("embedding").unwrap();
        assert_eq!(attr.get(1), FieldValue::Tensor(vec![0.25, 0.75]));

        // single-assign update also takes the two-phase path
        let update = DocumentUpdate::new().push(
            FieldUpdate::new("embedding").push(ValueUpdate::Assign(FieldValue::Tensor(vec![1.0, 0.0]))),
        );
        writer.update(4, Arc::new(update), 1, crate::writer::gate::noop_done(), |_, _| {});
        fixture.force_commit(&writer, 4);
        assert_eq!(attr.get(1), FieldValue::Tensor(vec![1.0, 0.0]));
    }

    #[test]
    fn heartbeat_advances_idle_vectors() {
        let fixture = Fixture::new(vec![
            AttributeSpec::new("price", AttributeConfig::single(BasicType::Int32)),
        ]);
        let writer = fixture.writer();
        let gate = Gate::new();
        writer.heartbeat(77, gate.callback());
        gate.await_done();
        let price = fixture.mgr.find_attribute("price").unwrap();
        assert_eq!(price.last_serial(), 77);
        assert_eq!(price.get(0), FieldValue::Int(0));
    }

    #[test]
    fn batch_remove_clears_all_lids() {
        let fixture = Fixture::new(vec![
            AttributeSpec::new("price", AttributeConfig::single(BasicType::Int32)),
        ]);
        let writer = fixture.writer();
        for lid in 1..=3u32 {
            writer.put(
                lid as SerialNum,
                doc(&[("price", FieldValue::Int(lid as i64 * 10))]),
                lid,
                crate::writer::gate::noop_done(),
            );
        }
        fixture.force_commit(&writer, 3);
        writer.remove_batch(4, vec![1, 3], crate::writer::gate::noop_done());
        fixture.force_commit(&writer, 4);
        let price = fixture.mgr.find_attribute("price").unwrap();
        assert_eq!(price.get(1), FieldValue::Int(0));
        assert_eq!(price.get(2), FieldValue::Int(20));
        assert_eq!(price.get(3), FieldValue::Int(0));
    }

    #[test]
    fn on_replay_done_pads_and_shrinks() {
        let fixture = Fixture::new(vec![
            AttributeSpec::new("price", AttributeConfig::single(BasicType::Int32)),
        ]);
        let writer = fixture.writer();
        writer.put(1, doc(&[("price", FieldValue::Int(1))]), 1, crate::writer::gate::noop_done());
        fixture.force_commit(&writer, 1);
        writer.on_replay_done(500);
        let price = fixture.mgr.find_attribute("price").unwrap();
        assert_eq!(price.num_docs(), 500);
        assert_eq!(price.committed_docid_limit(), 500);
        assert_eq!(price.get(1), FieldValue::Int(1));
    }

    #[test]
    fn compact_lid_space_through_writer() {
        let fixture = Fixture::new(vec![
            AttributeSpec::new("price", AttributeConfig::single(BasicType::Int32)),
        ]);
        let writer = fixture.writer();
        for lid in 1..=50u32 {
            writer.put(
                lid as SerialNum,
                doc(&[("price", FieldValue::Int(lid as i64))]),
                lid,
                crate::writer::gate::noop_done(),
            );
        }
        fixture.force_commit(&writer, 50);
        writer.compact_lid_space(10, 51);
        let price = fixture.mgr.find_attribute("price").unwrap();
        assert_eq!(price.committed_docid_limit(), 10);
        assert!(price.base().compacted_since_shrink());
        assert_eq!(price.last_serial(), 51);
    }
}
