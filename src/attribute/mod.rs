pub mod changes;
pub mod factory;
pub mod multi_numeric;
pub mod multi_string;
pub mod multi_value;
pub mod single_numeric;
pub mod single_string;
pub mod small_numeric;
pub mod special;
pub mod value_store;

use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use crate::core::config::AttributeConfig;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{EnumId, FieldValue, Lid, SerialNum, ValueUpdate};
use crate::memory::generation::{GenerationGuard, GenerationHandler};
use crate::memory::interlock::Interlock;
use crate::search::context::SearchContext;
use crate::search::term::SearchParams;
use crate::storage::save::SnapshotData;

/// Commit parameters. A `None` serial is an internal commit (auto-commit,
/// padding): it applies the queue without advancing the sync token.
#[derive(Debug, Clone, Copy)]
pub struct CommitParam {
    pub serial: Option<SerialNum>,
    pub force_update_stats: bool,
}

impl CommitParam {
    pub fn new(serial: SerialNum) -> Self {
        CommitParam { serial: Some(serial), force_update_stats: false }
    }

    pub fn internal() -> Self {
        CommitParam { serial: None, force_update_stats: false }
    }

    pub fn force_stats(mut self) -> Self {
        self.force_update_stats = true;
        self
    }
}

/// Lid-indexed view over committed values, valid at least for the lifetime
/// of the guard (the pinned generation keeps every captured buffer alive).
pub trait AttributeReadGuard: Send + Sync {
    fn docid_limit(&self) -> u32;
    fn get(&self, lid: Lid) -> FieldValue;
    fn get_multi(&self, lid: Lid) -> Vec<(FieldValue, i32)>;
}

pub(crate) struct ClosureReadGuard {
    _guard: GenerationGuard,
    docid_limit: u32,
    get: Box<dyn Fn(Lid) -> FieldValue + Send + Sync>,
    get_multi: Box<dyn Fn(Lid) -> Vec<(FieldValue, i32)> + Send + Sync>,
}

impl ClosureReadGuard {
    pub(crate) fn new(
        guard: GenerationGuard,
        docid_limit: u32,
        get: Box<dyn Fn(Lid) -> FieldValue + Send + Sync>,
        get_multi: Box<dyn Fn(Lid) -> Vec<(FieldValue, i32)> + Send + Sync>,
    ) -> Self {
        ClosureReadGuard { _guard: guard, docid_limit, get, get_multi }
    }
}

impl AttributeReadGuard for ClosureReadGuard {
    fn docid_limit(&self) -> u32 {
        self.docid_limit
    }

    fn get(&self, lid: Lid) -> FieldValue {
        (self.get)(lid)
    }

    fn get_multi(&self, lid: Lid) -> Vec<(FieldValue, i32)> {
        (self.get_multi)(lid)
    }
}

/// State common to every attribute implementation: identity, configuration,
/// lid accounting, sync tokens, generation tracking, interlock wiring.
pub struct AttributeBase {
    name: String,
    config: RwLock<AttributeConfig>,
    num_docs: AtomicU32,
    committed_docid_limit: AtomicU32,
    last_serial: AtomicU64,
    create_serial: AtomicU64,
    generations: Arc<GenerationHandler>,
    interlock: Mutex<Option<Arc<Interlock>>>,
    divide_by_zero_dropped: AtomicU64,
    compacted_since_shrink: AtomicBool,
}

impl AttributeBase {
    pub fn new(name: impl Into<String>, config: AttributeConfig) -> Self {
        AttributeBase {
            name: name.into(),
            config: RwLock::new(config),
            num_docs: AtomicU32::new(0),
            committed_docid_limit: AtomicU32::new(0),
            last_serial: AtomicU64::new(0),
            create_serial: AtomicU64::new(0),
            generations: GenerationHandler::new(),
            interlock: Mutex::new(None),
            divide_by_zero_dropped: AtomicU64::new(0),
            compacted_since_shrink: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lane routing key: the name up to the first dot, so struct-field
    /// attributes of one field share a lane.
    pub fn name_prefix(&self) -> &str {
        self.name.split('.').next().unwrap_or(&self.name)
    }

    pub fn is_struct_field(&self) -> bool {
        self.name.contains('.')
    }

    pub fn config(&self) -> AttributeConfig {
        self.config.read().clone()
    }

    pub fn set_config(&self, config: AttributeConfig) {
        *self.config.write() = config;
    }

    pub fn num_docs(&self) -> u32 {
        self.num_docs.load(Ordering::Acquire)
    }

    pub fn committed_docid_limit(&self) -> u32 {
        self.committed_docid_limit.load(Ordering::Acquire)
    }

    pub fn last_serial(&self) -> SerialNum {
        self.last_serial.load(Ordering::Acquire)
    }

    pub fn create_serial(&self) -> SerialNum {
        self.create_serial.load(Ordering::Acquire)
    }

    pub fn set_create_serial(&self, serial: SerialNum) {
        self.create_serial.store(serial, Ordering::Release);
    }

    pub fn generations(&self) -> &Arc<GenerationHandler> {
        &self.generations
    }

    pub fn set_interlock(&self, interlock: Arc<Interlock>) {
        *self.interlock.lock() = Some(interlock);
    }

    pub fn interlock(&self) -> Option<Arc<Interlock>> {
        self.interlock.lock().clone()
    }

    pub fn note_divide_by_zero(&self) {
        self.divide_by_zero_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn divide_by_zero_dropped(&self) -> u64 {
        self.divide_by_zero_dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn alloc_lid(&self) -> Lid {
        self.num_docs.fetch_add(1, Ordering::AcqRel)
    }

    pub(crate) fn check_writable_lid(&self, lid: Lid) -> Result<()> {
        if lid == crate::core::types::RESERVED_LID {
            return Err(Error::new(ErrorKind::InvalidArgument, "lid 0 is reserved"));
        }
        if lid >= self.num_docs() {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("lid {} outside allocated range {}", lid, self.num_docs()),
            ));
        }
        Ok(())
    }

    /// Idempotence gate: a serial commit at or below the sync token is a
    /// no-op, which makes transaction-log replay safe.
    pub(crate) fn commit_gate(&self, param: &CommitParam) -> bool {
        match param.serial {
            Some(serial) => serial > self.last_serial(),
            None => true,
        }
    }

    /// Publishes the committed state: docid limit advances to cover every
    /// allocated lid, the sync token moves, and a new generation begins.
    pub(crate) fn finish_commit(&self, param: &CommitParam) {
        self.committed_docid_limit
            .store(self.num_docs(), Ordering::Release);
        if let Some(serial) = param.serial {
            self.last_serial.fetch_max(serial, Ordering::AcqRel);
        }
        self.generations.bump();
    }

    /// Called by a snapshot load: the loaded value count defines both the
    /// allocated and the committed lid space.
    pub(crate) fn set_loaded_lid_space(&self, limit: u32) {
        self.num_docs.store(limit, Ordering::Release);
        self.committed_docid_limit.store(limit, Ordering::Release);
    }

    pub(crate) fn set_lid_space(&self, limit: u32) {
        self.num_docs.store(limit, Ordering::Release);
        self.committed_docid_limit.store(limit, Ordering::Release);
        self.compacted_since_shrink.store(true, Ordering::Release);
        self.generations.bump();
    }

    pub fn compacted_since_shrink(&self) -> bool {
        self.compacted_since_shrink.load(Ordering::Acquire)
    }

    pub(crate) fn clear_compacted_flag(&self) {
        self.compacted_since_shrink.store(false, Ordering::Release);
    }
}

/// One attribute vector: a column of per-document values together with its
/// change queue, optional enum store, and search surface. All write methods
/// are called from the vector's field-writer lane only; side effects become
/// visible to readers at commit.
pub trait AttributeVector: Send + Sync + 'static {
    fn base(&self) -> &AttributeBase;

    // -- write API (lane thread) --

    /// Allocates a new lid at or above `num_docs`, growing storage if
    /// needed.
    fn add_doc(&self) -> Result<Lid>;

    /// Enqueues a full-value assignment. Array/weighted-set values replace
    /// the whole collection.
    fn put(&self, lid: Lid, value: &FieldValue) -> Result<()>;

    /// Multi-value only: enqueue one element append.
    fn append(&self, lid: Lid, value: &FieldValue, weight: i32) -> Result<()>;

    /// Multi-value only: enqueue one element removal.
    fn remove_value(&self, lid: Lid, value: &FieldValue) -> Result<()>;

    fn apply_update(&self, lid: Lid, update: &ValueUpdate) -> Result<()>;

    /// Enqueues a reset to the type default.
    fn clear_doc(&self, lid: Lid) -> Result<()>;

    /// Atomically applies the queued changes; see `CommitParam` for the
    /// serial/internal distinction.
    fn commit(&self, param: CommitParam);

    fn commit_if_change_vector_too_large(&self);

    fn reclaim_unused_memory(&self) {
        self.base().generations().reclaim();
    }

    /// Shrinks the committed lid space to `limit`; storage is released by a
    /// later `shrink_lid_space`.
    fn compact_lid_space(&self, limit: u32);

    fn shrink_lid_space(&self);

    // -- read API --

    fn get(&self, lid: Lid) -> FieldValue;

    fn get_multi(&self, lid: Lid) -> Vec<(FieldValue, i32)>;

    fn get_enum(&self, lid: Lid) -> Option<EnumId> {
        let _ = lid;
        None
    }

    fn find_enum(&self, value: &FieldValue) -> Option<EnumId> {
        let _ = value;
        None
    }

    /// `stable_enum` additionally pins enum-id resolution; freed ids stay
    /// resolvable for the guard's lifetime either way because frees are
    /// generation-held.
    fn make_read_guard(&self, stable_enum: bool) -> Box<dyn AttributeReadGuard>;

    // -- search API --

    fn create_search_context(
        &self,
        term: &str,
        params: &SearchParams,
    ) -> Result<Box<dyn SearchContext>>;

    // -- persistence --

    fn save_snapshot(&self) -> Result<SnapshotData>;

    fn load_snapshot(&self, data: &SnapshotData) -> Result<()>;

    fn estimated_save_bytes(&self) -> u64;

    fn memory_used(&self) -> usize;

    // -- two-phase put --

    /// Read-only preparation for a two-phase put, runnable on the shared
    /// compute pool. The default packages the value for `complete_set_value`.
    fn prepare_set_value(
        &self,
        lid: Lid,
        value: Option<&FieldValue>,
    ) -> Result<Box<dyn Any + Send>> {
        let _ = lid;
        Ok(Box::new(value.cloned()))
    }

    /// Installs a prepared value on the vector's lane.
    fn complete_set_value(&self, lid: Lid, prepared: Box<dyn Any + Send>) -> Result<()> {
        match prepared.downcast::<Option<FieldValue>>() {
            Ok(value) => match *value {
                Some(v) => self.put(lid, &v),
                None => self.clear_doc(lid),
            },
            Err(_) => Err(Error::new(ErrorKind::Internal, "unexpected prepared value type")),
        }
    }
}

// Convenience accessors shared by every implementation.
impl dyn AttributeVector {
    pub fn name(&self) -> &str {
        self.base().name()
    }

    pub fn name_prefix(&self) -> &str {
        self.base().name_prefix()
    }

    pub fn config(&self) -> AttributeConfig {
        self.base().config()
    }

    /// Applied on the vector's lane during a type-compatible reconfig:
    /// flags and grow strategy may change, the type may not.
    pub fn update_config(&self, config: AttributeConfig) {
        debug_assert!(self.base().config().types_match(&config));
        self.base().set_config(config);
    }

    pub fn num_docs(&self) -> u32 {
        self.base().num_docs()
    }

    pub fn committed_docid_limit(&self) -> u32 {
        self.base().committed_docid_limit()
    }

    pub fn last_serial(&self) -> SerialNum {
        self.base().last_serial()
    }

    pub fn create_serial(&self) -> SerialNum {
        self.base().create_serial()
    }

    pub fn set_interlock(&self, interlock: Arc<Interlock>) {
        self.base().set_interlock(interlock);
    }
}

pub type AttributeVectorSP = Arc<dyn AttributeVector>;
