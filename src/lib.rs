pub mod attribute;
pub mod core;
pub mod flush;
pub mod index;
pub mod manager;
pub mod memory;
pub mod search;
pub mod storage;
pub mod writer;

/*
┌──────────────────────────────────────────────────────────────────────────┐
│                       ATTRSTORE STRUCT ARCHITECTURE                      │
└──────────────────────────────────────────────────────────────────────────┘

┌──────────────────────────────── MANAGER ─────────────────────────────────┐
│  struct AttributeManager                                                 │
│  • attributes: RwLock<HashMap<String, AttributeWrap>>                    │
│  • flushables: RwLock<HashMap<String, FlushableWrap>>   (flusher+shrink) │
│  • writable:   RwLock<Vec<Arc<dyn AttributeVector>>>                     │
│  • disk_layout: Arc<DiskLayout>      • factory: Arc<AttributeFactory>    │
│  • field_writer: Arc<SequencedTaskExecutor>  • shared: SharedExecutor    │
│  • interlock: Arc<Interlock>         • imported: ImportedAttributesRepo  │
│                                                                          │
│  reconfig: prepare_create(spec) ─> ReconfigHandle ─> create(limit, s)    │
│  transfer rule: types_match ─> reuse in place + update_config on lane    │
└──────────────────────────────────────────────────────────────────────────┘

┌──────────────────────────────── VECTORS ─────────────────────────────────┐
│  trait AttributeVector (read / write / search / save)                    │
│  • SingleNumericAttribute<T>      • MultiNumericAttribute<T>             │
│  • SingleSmallNumericAttribute    • MultiStringAttribute                 │
│  • SingleStringAttribute          • Tensor / Predicate / Reference       │
│                                                                          │
│  AttributeBase: num_docs, committed_docid_limit, last_serial,            │
│                 create_serial, GenerationHandler, change queue           │
│  ValueStore<T>: Arc-swapped AtomicCell buffers, grown by GrowStrategy    │
│  MultiValueMapping<T>: chunked arena + packed refs (chunk:start:len)     │
│  EnumStore<V>: ordered dictionary, refcounts, folded string keys         │
│  PostingStore: enum id -> RoaringBitmap of lids (fast_search)            │
└──────────────────────────────────────────────────────────────────────────┘

┌──────────────────────────────── WRITER ──────────────────────────────────┐
│  AttributeWriter: fields hashed to lanes (name prefix), one task per     │
│  lane per put; two-phase put for hnsw tensors (prepare on shared pool,   │
│  complete on lane); force_commit broadcasts a commit barrier             │
│  SequencedTaskExecutor: N single-threaded lanes, bounded queues          │
└──────────────────────────────────────────────────────────────────────────┘

┌─────────────────────────────── DURABILITY ───────────────────────────────┐
│  DiskLayout ──owns──> AttributeDirectory ──registry──> meta-info.txt     │
│  FlushableAttribute ──(writer guard)──> snapshot-<serial>/<name>.dat     │
│  protocol: invalid entry -> write -> fsync dir+parent -> mark valid      │
│  recovery: prune invalid/unmarked snapshots; best valid = flushed serial │
│  ShrinkTarget: GC after lid-space compaction                             │
└──────────────────────────────────────────────────────────────────────────┘

┌──────────────────────────────── SEARCH ──────────────────────────────────┐
│  create_search_context(term, params) -> SearchContext                    │
│  • numeric: nom-parsed ranges [lo;hi;limit], open bounds                 │
│  • string: exact/prefix folding, regex, fuzzy DFA with prefix lock      │
│  • enum hint: zero unique dictionary values -> empty iterator            │
│  iterators: scan (strict/verify), posting union, hit-list (range limit)  │
└──────────────────────────────────────────────────────────────────────────┘
*/
