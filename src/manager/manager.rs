use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use crate::attribute::factory::AttributeFactory;
use crate::attribute::{AttributeReadGuard, AttributeVector, AttributeVectorSP};
use crate::core::error::Result;
use crate::core::types::SerialNum;
use crate::flush::flushable::FlushableAttribute;
use crate::flush::shrink::ShrinkTarget;
use crate::flush::target::FlushTarget;
use crate::manager::imported::ImportedAttributesRepo;
use crate::manager::initializer::{AttributeInitializer, consider_pad_attribute};
use crate::manager::spec::{AttributeCollectionSpec, AttributeSpec};
use crate::manager::status::StatusRegistry;
use crate::memory::interlock::Interlock;
use crate::storage::disk_layout::DiskLayout;
use crate::writer::attribute_writer::{WriterBackend, pad_attribute};
use crate::writer::executor::{SequencedTaskExecutor, SharedExecutor};
use crate::writer::gate::Gate;

#[derive(Clone)]
struct AttributeWrap {
    attr: AttributeVectorSP,
    is_extra: bool,
}

#[derive(Clone)]
struct FlushableWrap {
    flusher: Arc<FlushableAttribute>,
    shrinker: Arc<ShrinkTarget>,
}

/// Pins one attribute vector for use by a reader.
pub struct AttributeGuard {
    attr: AttributeVectorSP,
}

impl AttributeGuard {
    pub fn attribute(&self) -> &AttributeVectorSP {
        &self.attr
    }
}

/// Owns the set of attribute vectors for one document sub-database:
/// lifecycle, reconfiguration, flush targets, reader interfaces.
pub struct AttributeManager {
    attributes: RwLock<HashMap<String, AttributeWrap>>,
    flushables: RwLock<HashMap<String, FlushableWrap>>,
    writable: RwLock<Vec<AttributeVectorSP>>,
    disk_layout: Arc<DiskLayout>,
    sub_db_name: String,
    factory: Arc<AttributeFactory>,
    interlock: Arc<Interlock>,
    field_writer: Arc<SequencedTaskExecutor>,
    shared: Arc<SharedExecutor>,
    imported: RwLock<Option<Arc<ImportedAttributesRepo>>>,
    status: Arc<StatusRegistry>,
}

impl AttributeManager {
    pub fn new(
        base_dir: impl Into<PathBuf>,
        sub_db_name: impl Into<String>,
        factory: Arc<AttributeFactory>,
        interlock: Arc<Interlock>,
        field_writer: Arc<SequencedTaskExecutor>,
        shared: Arc<SharedExecutor>,
    ) -> Result<Arc<Self>> {
        Ok(Arc::new(AttributeManager {
            attributes: RwLock::new(HashMap::new()),
            flushables: RwLock::new(HashMap::new()),
            writable: RwLock::new(Vec::new()),
            disk_layout: DiskLayout::create(base_dir)?,
            sub_db_name: sub_db_name.into(),
            factory,
            interlock,
            field_writer,
            shared,
            imported: RwLock::new(None),
            status: Arc::new(StatusRegistry::new()),
        }))
    }

    fn clone_for_reconfig(&self) -> AttributeManager {
        AttributeManager {
            attributes: RwLock::new(HashMap::new()),
            flushables: RwLock::new(HashMap::new()),
            writable: RwLock::new(Vec::new()),
            disk_layout: Arc::clone(&self.disk_layout),
            sub_db_name: self.sub_db_name.clone(),
            factory: Arc::clone(&self.factory),
            interlock: Arc::clone(&self.interlock),
            field_writer: Arc::clone(&self.field_writer),
            shared: Arc::clone(&self.shared),
            imported: RwLock::new(None),
            status: Arc::clone(&self.status),
        }
    }

    pub fn sub_db_name(&self) -> &str {
        &self.sub_db_name
    }

    pub fn disk_layout(&self) -> &Arc<DiskLayout> {
        &self.disk_layout
    }

    pub fn status(&self) -> &Arc<StatusRegistry> {
        &self.status
    }

    pub fn interlock(&self) -> &Arc<Interlock> {
        &self.interlock
    }

    fn register_attribute(&self, attr: AttributeVectorSP, is_extra: bool) {
        let name = attr.name().to_string();
        debug!(sub_db = %self.sub_db_name, attribute = %name, "adding attribute vector");
        attr.set_interlock(Arc::clone(&self.interlock));
        if !is_extra {
            let dir = self.disk_layout.create_attribute_dir(&name);
            let flusher = Arc::new(FlushableAttribute::new(
                &attr,
                Arc::clone(&dir),
                Arc::clone(&self.field_writer),
            ));
            let shrinker =
                Arc::new(ShrinkTarget::new(&attr, dir, Arc::clone(&self.field_writer)));
            self.flushables
                .write()
                .insert(name.clone(), FlushableWrap { flusher, shrinker });
            self.writable.write().push(Arc::clone(&attr));
        }
        self.attributes.write().insert(name, AttributeWrap { attr, is_extra });
    }

    /// Creates or loads one attribute. The spec's serial becomes the
    /// create serial for a fresh vector.
    pub fn add_attribute(
        &self,
        spec: AttributeSpec,
        serial: SerialNum,
    ) -> Result<AttributeVectorSP> {
        let dir = self.disk_layout.create_attribute_dir(&spec.name);
        let initializer = AttributeInitializer::new(
            dir,
            self.sub_db_name.clone(),
            spec,
            Some(serial),
            Arc::clone(&self.factory),
            Arc::clone(&self.status),
        );
        let attr = initializer.init()?;
        self.register_attribute(Arc::clone(&attr), false);
        Ok(attr)
    }

    /// Registers an attribute whose flushing is handled elsewhere (e.g. the
    /// document meta store).
    pub fn add_extra_attribute(&self, attr: AttributeVectorSP) {
        self.register_attribute(attr, true);
    }

    /// Reuses every existing vector whose config is type-compatible with
    /// its new spec; flag changes are applied on the vector's lane. Returns
    /// the specs still to be initialized.
    fn transfer_existing_attributes(
        &self,
        current: &AttributeManager,
        specs: Vec<AttributeSpec>,
    ) -> Vec<AttributeSpec> {
        let mut to_be_added = Vec::new();
        let gate = Gate::new();
        {
            let token = gate.callback();
            for spec in specs {
                let existing = current.find_attribute(&spec.name);
                match existing {
                    Some(attr) if attr.config().types_match(&spec.config) => {
                        debug!(
                            attribute = %spec.name,
                            docs = attr.num_docs(),
                            serial = attr.last_serial(),
                            "transferring attribute vector from current manager"
                        );
                        self.register_attribute(Arc::clone(&attr), false);
                        let id = self.field_writer.executor_id_from_name(attr.name_prefix());
                        let config = spec.config;
                        let token = token.clone();
                        self.field_writer.execute_fn(id, move || {
                            attr.update_config(config);
                            let _ = &token;
                        });
                    }
                    _ => to_be_added.push(spec),
                }
            }
        }
        gate.await_done();
        to_be_added
    }

    fn transfer_extra_attributes(&self, current: &AttributeManager) {
        for wrap in current.attributes.read().values() {
            if wrap.is_extra {
                self.register_attribute(Arc::clone(&wrap.attr), true);
            }
        }
    }

    /// Computes the next manager for a new collection spec: transferable
    /// vectors are reused in place, the rest are initialized from disk (or
    /// created empty). The returned handle finishes the switch.
    pub fn prepare_create(
        self: &Arc<Self>,
        mut spec: AttributeCollectionSpec,
    ) -> Result<ReconfigHandle> {
        let new_mgr = Arc::new(self.clone_for_reconfig());
        let specs: Vec<AttributeSpec> = spec
            .attributes
            .drain(..)
            .filter(|s| !s.delay_add)
            .collect();
        let to_be_added = new_mgr.transfer_existing_attributes(self, specs);
        let mut loaded = Vec::new();
        for attr_spec in to_be_added {
            let dir = new_mgr.disk_layout.create_attribute_dir(&attr_spec.name);
            let initializer = AttributeInitializer::new(
                dir,
                new_mgr.sub_db_name.clone(),
                attr_spec,
                spec.current_serial,
                Arc::clone(&new_mgr.factory),
                Arc::clone(&new_mgr.status),
            );
            let attr = initializer.init()?;
            new_mgr.register_attribute(Arc::clone(&attr), false);
            loaded.push(attr);
        }
        new_mgr.transfer_extra_attributes(self);
        Ok(ReconfigHandle {
            new_mgr,
            loaded,
            current_serial: spec.current_serial.unwrap_or(0),
        })
    }

    /// Convenience: prepare and finish a reconfig in one step.
    pub fn create(self: &Arc<Self>, spec: AttributeCollectionSpec) -> Result<Arc<AttributeManager>> {
        let docid_limit = spec.docid_limit;
        let serial = spec.current_serial;
        let handle = self.prepare_create(spec)?;
        Ok(handle.create(docid_limit, serial.unwrap_or(0)))
    }

    pub fn find_attribute(&self, name: &str) -> Option<AttributeVectorSP> {
        self.attributes.read().get(name).map(|w| Arc::clone(&w.attr))
    }

    pub fn get_attribute(&self, name: &str) -> Option<AttributeGuard> {
        self.find_attribute(name).map(|attr| AttributeGuard { attr })
    }

    pub fn get_attribute_read_guard(
        &self,
        name: &str,
        stable_enum: bool,
    ) -> Option<Box<dyn AttributeReadGuard>> {
        self.find_attribute(name).map(|attr| attr.make_read_guard(stable_enum))
    }

    pub fn get_writable_attribute(&self, name: &str) -> Option<AttributeVectorSP> {
        let attributes = self.attributes.read();
        attributes
            .get(name)
            .filter(|w| !w.is_extra)
            .map(|w| Arc::clone(&w.attr))
    }

    pub fn attribute_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .attributes
            .read()
            .iter()
            .filter(|(_, w)| !w.is_extra)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Resolves a native attribute first, then the imported repo.
    pub fn readable_attribute(&self, name: &str) -> Option<AttributeVectorSP> {
        if let Some(attr) = self.find_attribute(name) {
            return Some(attr);
        }
        self.imported
            .read()
            .as_ref()
            .and_then(|repo| repo.get(name))
            .map(|imported| Arc::clone(imported.attribute()))
    }

    pub fn get_num_docs(&self) -> u32 {
        self.attributes
            .read()
            .values()
            .next()
            .map(|w| w.attr.num_docs())
            .unwrap_or(0)
    }

    pub fn set_imported_attributes(&self, repo: Arc<ImportedAttributesRepo>) {
        *self.imported.write() = Some(repo);
    }

    pub fn get_imported_attributes(&self) -> Option<Arc<ImportedAttributesRepo>> {
        self.imported.read().clone()
    }

    pub fn create_context(self: &Arc<Self>) -> AttributeContext {
        AttributeContext { mgr: Arc::clone(self), guards: Mutex::new(HashMap::new()) }
    }

    // -- flush integration --

    pub fn flush_targets(&self) -> Vec<Arc<dyn FlushTarget>> {
        let flushables = self.flushables.read();
        let mut targets: Vec<Arc<dyn FlushTarget>> = Vec::with_capacity(flushables.len() * 2);
        for wrap in flushables.values() {
            targets.push(Arc::clone(&wrap.flusher) as Arc<dyn FlushTarget>);
            targets.push(Arc::clone(&wrap.shrinker) as Arc<dyn FlushTarget>);
        }
        targets
    }

    /// Runs every ready flush target synchronously; used by tests and by
    /// the populator's final pass.
    pub fn flush_all(&self, current_serial: SerialNum) {
        for target in self.flush_targets() {
            if let Some(task) = target.init_flush(current_serial) {
                task.run();
            }
        }
    }

    pub fn get_flushed_serial_num(&self, name: &str) -> SerialNum {
        self.flushables
            .read()
            .get(name)
            .map(|w| w.flusher.flushed_serial_num())
            .unwrap_or(0)
    }

    pub fn get_oldest_flushed_serial_num(&self) -> SerialNum {
        self.flushables
            .read()
            .values()
            .map(|w| w.flusher.flushed_serial_num())
            .min()
            .unwrap_or(0)
    }

    pub fn get_newest_flushed_serial_num(&self) -> SerialNum {
        self.flushables
            .read()
            .values()
            .map(|w| w.flusher.flushed_serial_num())
            .max()
            .unwrap_or(0)
    }

    /// Removes on-disk directories for fields no longer in configuration,
    /// plus their status entries.
    pub fn prune_removed_fields(&self, serial: SerialNum) -> Result<()> {
        for name in self.disk_layout.list_attributes() {
            if self.attributes.read().contains_key(&name) {
                continue;
            }
            self.disk_layout.remove_attribute_dir(&name, serial)?;
            self.status.remove(&name);
        }
        Ok(())
    }

    // -- lane dispatch --

    /// Runs `func` on the lane of every non-extra vector; single-threaded
    /// access per vector is guaranteed by the lane.
    pub fn async_for_each_attribute(
        &self,
        func: Arc<dyn Fn(&dyn AttributeVector) + Send + Sync>,
    ) {
        for wrap in self.attributes.read().values() {
            if wrap.is_extra {
                continue;
            }
            let attr = Arc::clone(&wrap.attr);
            let id = self.field_writer.executor_id_from_name(attr.name_prefix());
            let func = Arc::clone(&func);
            self.field_writer.execute_fn(id, move || func(attr.as_ref()));
        }
    }

    pub fn async_for_attribute(
        &self,
        name: &str,
        func: Box<dyn FnOnce(&dyn AttributeVector) + Send>,
    ) {
        let Some(attr) = self.get_writable_attribute(name) else {
            return;
        };
        let id = self.field_writer.executor_id_from_name(attr.name_prefix());
        self.field_writer.execute_fn(id, move || func(attr.as_ref()));
    }

    pub fn get_exclusive_read_accessor(&self, name: &str) -> Option<ExclusiveReadAccessor> {
        self.find_attribute(name).map(|attr| ExclusiveReadAccessor {
            attr,
            executor: Arc::clone(&self.field_writer),
        })
    }

    pub fn pad_attribute(attr: &dyn AttributeVector, docid_limit: u32) -> Result<()> {
        pad_attribute(attr, docid_limit)
    }
}

/// Runs a reader function on the vector's own lane, excluding writers for
/// its duration; used by consistency checks and state dumps.
pub struct ExclusiveReadAccessor {
    attr: AttributeVectorSP,
    executor: Arc<SequencedTaskExecutor>,
}

impl ExclusiveReadAccessor {
    pub fn read(&self, func: Box<dyn FnOnce(&dyn AttributeVector) + Send>) {
        let gate = Gate::new();
        {
            let token = gate.callback();
            let attr = Arc::clone(&self.attr);
            let id = self.executor.executor_id_from_name(attr.name_prefix());
            self.executor.execute_fn(id, move || {
                func(attr.as_ref());
                let _ = &token;
            });
        }
        gate.await_done();
    }
}

impl WriterBackend for AttributeManager {
    fn writable_attributes(&self) -> Vec<AttributeVectorSP> {
        self.writable.read().clone()
    }

    fn field_writer(&self) -> Arc<SequencedTaskExecutor> {
        Arc::clone(&self.field_writer)
    }

    fn shared_executor(&self) -> Arc<SharedExecutor> {
        Arc::clone(&self.shared)
    }

    fn imported_attributes(&self) -> Option<Arc<ImportedAttributesRepo>> {
        self.get_imported_attributes()
    }
}

/// Result of `prepare_create`: the new manager with vectors installed.
/// `create` pads lagging vectors to the target docid limit and hands the
/// manager over. Once this exists the switch cannot be cancelled.
pub struct ReconfigHandle {
    new_mgr: Arc<AttributeManager>,
    loaded: Vec<AttributeVectorSP>,
    current_serial: SerialNum,
}

impl ReconfigHandle {
    pub fn create(self, docid_limit: u32, serial: SerialNum) -> Arc<AttributeManager> {
        let serial = if serial != 0 { serial } else { self.current_serial };
        for attr in &self.loaded {
            if let Err(e) = consider_pad_attribute(attr.as_ref(), serial, docid_limit) {
                tracing::warn!(attribute = attr.name(), error = %e, "could not pad attribute");
            }
        }
        self.new_mgr
    }
}

/// Reader-facing attribute lookup with per-context pinning: a vector
/// resolved once stays pinned (and its enum ids stable) until the context
/// is dropped or enum guards are released.
pub struct AttributeContext {
    mgr: Arc<AttributeManager>,
    guards: Mutex<HashMap<String, AttributeVectorSP>>,
}

impl AttributeContext {
    pub fn get_attribute(&self, name: &str) -> Option<AttributeVectorSP> {
        let mut guards = self.guards.lock();
        if let Some(attr) = guards.get(name) {
            return Some(Arc::clone(attr));
        }
        let attr = self.mgr.readable_attribute(name)?;
        guards.insert(name.to_string(), Arc::clone(&attr));
        Some(attr)
    }

    pub fn get_attribute_stable_enum(&self, name: &str) -> Option<AttributeVectorSP> {
        self.get_attribute(name)
    }

    pub fn get_attribute_list(&self) -> Vec<AttributeVectorSP> {
        self.mgr
            .attribute_names()
            .iter()
            .filter_map(|name| self.get_attribute(name))
            .collect()
    }

    pub fn release_enum_guards(&self) {
        self.guards.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::CommitParam;
    use crate::core::config::{AttributeConfig, BasicType};
    use crate::core::types::FieldValue;

    fn make_manager(dir: &std::path::Path) -> Arc<AttributeManager> {
        AttributeManager::new(
            dir.join("attributes"),
            "test.ready",
            Arc::new(AttributeFactory::new()),
            Arc::new(Interlock::new()),
            Arc::new(SequencedTaskExecutor::new(2, 100)),
            Arc::new(SharedExecutor::new(2)),
        )
        .unwrap()
    }

    fn int32_spec(name: &str) -> AttributeSpec {
        AttributeSpec::new(name, AttributeConfig::single(BasicType::Int32))
    }

    #[test]
    fn add_and_lookup() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = make_manager(tmp.path());
        mgr.add_attribute(int32_spec("price"), 1).unwrap();
        assert!(mgr.get_attribute("price").is_some());
        assert!(mgr.get_attribute("missing").is_none());
        assert!(mgr.get_writable_attribute("price").is_some());
        assert_eq!(mgr.attribute_names(), vec!["price".to_string()]);
        // a flusher and a shrinker per attribute
        assert_eq!(mgr.flush_targets().len(), 2);
    }

    #[test]
    fn type_compatible_reconfig_transfers_in_place() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = make_manager(tmp.path());
        let attr = mgr.add_attribute(int32_spec("price"), 1).unwrap();
        attr.add_doc().unwrap();
        attr.put(1, &FieldValue::Int(11)).unwrap();
        attr.commit(CommitParam::new(42));

        let guard = attr.make_read_guard(false);

        // same type, changed grow strategy
        let mut new_config = AttributeConfig::single(BasicType::Int32);
        new_config.grow.initial_docs = 4096;
        new_config.fast_access = true;
        let spec = AttributeCollectionSpec::new(
            vec![AttributeSpec::new("price", new_config.clone())],
            2,
            Some(50),
        );
        let new_mgr = mgr.create(spec).unwrap();
        let transferred = new_mgr.find_attribute("price").unwrap();
        // same vector, values and serials preserved, no reload
        assert!(Arc::ptr_eq(&attr, &transferred));
        assert_eq!(transferred.last_serial(), 42);
        assert_eq!(transferred.get(1), FieldValue::Int(11));
        assert_eq!(transferred.config().grow.initial_docs, 4096);
        assert!(transferred.config().fast_access);
        // live reader guards stay valid
        assert_eq!(guard.get(1), FieldValue::Int(11));
    }

    #[test]
    fn incompatible_reconfig_reinitializes() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = make_manager(tmp.path());
        let attr = mgr.add_attribute(int32_spec("price"), 1).unwrap();
        attr.add_doc().unwrap();
        attr.put(1, &FieldValue::Int(11)).unwrap();
        attr.commit(CommitParam::new(42));

        let spec = AttributeCollectionSpec::new(
            vec![AttributeSpec::new("price", AttributeConfig::single(BasicType::Int64))],
            2,
            Some(50),
        );
        let new_mgr = mgr.create(spec).unwrap();
        let replacement = new_mgr.find_attribute("price").unwrap();
        assert!(!Arc::ptr_eq(&attr, &replacement));
        // nothing flushed: the replacement starts empty and gets padded
        assert_eq!(replacement.get(1), FieldValue::Int(0));
        assert_eq!(replacement.num_docs(), 2);
    }

    #[test]
    fn delayed_add_is_not_materialized() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = make_manager(tmp.path());
        let spec = AttributeCollectionSpec::new(
            vec![
                int32_spec("kept"),
                AttributeSpec::delayed_add("later", AttributeConfig::single(BasicType::Int32)),
            ],
            1,
            Some(5),
        );
        let new_mgr = mgr.create(spec).unwrap();
        assert!(new_mgr.find_attribute("kept").is_some());
        assert!(new_mgr.find_attribute("later").is_none());
    }

    #[test]
    fn prune_removes_dropped_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = make_manager(tmp.path());
        let attr = mgr.add_attribute(int32_spec("price"), 1).unwrap();
        attr.commit(CommitParam::new(10));
        mgr.flush_all(10);
        assert!(mgr.disk_layout().get_attribute_dir("price").is_some());

        // new config without the attribute
        let spec = AttributeCollectionSpec::new(vec![], 1, Some(20));
        let new_mgr = mgr.create(spec).unwrap();
        new_mgr.prune_removed_fields(20).unwrap();
        assert!(new_mgr.disk_layout().get_attribute_dir("price").is_none());
    }

    #[test]
    fn context_pins_and_releases() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = make_manager(tmp.path());
        mgr.add_attribute(int32_spec("price"), 1).unwrap();
        let ctx = mgr.create_context();
        assert!(ctx.get_attribute("price").is_some());
        assert_eq!(ctx.get_attribute_list().len(), 1);
        ctx.release_enum_guards();
        assert!(ctx.get_attribute("price").is_some());
    }

    #[test]
    fn async_for_attribute_runs_on_lane() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = make_manager(tmp.path());
        mgr.add_attribute(int32_spec("price"), 1).unwrap();
        let gate = Gate::new();
        let token = gate.callback();
        mgr.async_for_attribute(
            "price",
            Box::new(move |attr| {
                assert_eq!(attr.base().name(), "price");
                let _ = &token;
            }),
        );
        gate.await_done();
    }

    #[test]
    fn flush_and_reload_across_managers() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let mgr = make_manager(tmp.path());
            let attr = mgr.add_attribute(int32_spec("price"), 1).unwrap();
            for _ in 0..100 {
                attr.add_doc().unwrap();
            }
            for lid in 1..=100u32 {
                attr.put(lid, &FieldValue::Int(lid as i64)).unwrap();
            }
            attr.commit(CommitParam::new(100));
            mgr.flush_all(100);
            assert_eq!(mgr.get_flushed_serial_num("price"), 100);
        }
        // a fresh manager on the same disk finds and loads the snapshot
        let mgr = make_manager(tmp.path());
        let attr = mgr.add_attribute(int32_spec("price"), 100).unwrap();
        assert_eq!(attr.last_serial(), 100);
        assert_eq!(attr.committed_docid_limit(), 101);
        assert_eq!(attr.get(42), FieldValue::Int(42));
        assert_eq!(attr.get(100), FieldValue::Int(100));
    }

    #[test]
    fn flushed_serial_bookkeeping() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = make_manager(tmp.path());
        let a = mgr.add_attribute(int32_spec("a"), 1).unwrap();
        let b = mgr.add_attribute(int32_spec("b"), 1).unwrap();
        a.add_doc().unwrap();
        a.put(1, &FieldValue::Int(1)).unwrap();
        a.commit(CommitParam::new(30));
        b.commit(CommitParam::new(20));
        mgr.flush_all(0);
        assert_eq!(mgr.get_flushed_serial_num("a"), 30);
        assert_eq!(mgr.get_flushed_serial_num("b"), 20);
        assert_eq!(mgr.get_oldest_flushed_serial_num(), 20);
        assert_eq!(mgr.get_newest_flushed_serial_num(), 30);
    }
}
