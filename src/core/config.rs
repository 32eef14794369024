use serde::{Deserialize, Serialize};

/// Value type stored by an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BasicType {
    Bool,
    UInt2,
    UInt4,
    Int8,
    Int16,
    Int32,
    Int64,
    Float,
    Double,
    String,
    Predicate,
    Tensor,
    Reference,
}

impl BasicType {
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            BasicType::Int8
                | BasicType::Int16
                | BasicType::Int32
                | BasicType::Int64
                | BasicType::Float
                | BasicType::Double
        )
    }

    pub fn is_small_numeric(&self) -> bool {
        matches!(self, BasicType::Bool | BasicType::UInt2 | BasicType::UInt4)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BasicType::Bool => "bool",
            BasicType::UInt2 => "uint2",
            BasicType::UInt4 => "uint4",
            BasicType::Int8 => "int8",
            BasicType::Int16 => "int16",
            BasicType::Int32 => "int32",
            BasicType::Int64 => "int64",
            BasicType::Float => "float",
            BasicType::Double => "double",
            BasicType::String => "string",
            BasicType::Predicate => "predicate",
            BasicType::Tensor => "tensor",
            BasicType::Reference => "reference",
        }
    }
}

/// Collection kind of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollectionType {
    Single,
    Array,
    WeightedSet {
        create_if_nonexistent: bool,
        remove_if_zero: bool,
    },
}

impl CollectionType {
    pub fn is_multi_value(&self) -> bool {
        !matches!(self, CollectionType::Single)
    }

    /// Collection kinds match when the variant matches; weighted-set flags
    /// must also match for persisted state to be reusable.
    pub fn matches(&self, other: &CollectionType) -> bool {
        self == other
    }
}

/// Dense tensor type spec, e.g. "tensor<float>(x[128])".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorType(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredicateParams {
    pub arity: u32,
    pub lower_bound: i64,
    pub upper_bound: i64,
    pub dense_posting_list_threshold: f64,
}

impl Default for PredicateParams {
    fn default() -> Self {
        PredicateParams {
            arity: 8,
            lower_bound: i64::MIN,
            upper_bound: i64::MAX,
            dense_posting_list_threshold: 0.4,
        }
    }
}

impl Eq for PredicateParams {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistanceMetric {
    Euclidean,
    Angular,
    Dotproduct,
    Hamming,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HnswParams {
    pub max_links_per_node: u32,
    pub neighbors_to_explore_at_insert: u32,
    pub multi_threaded_indexing: bool,
    pub distance_metric: DistanceMetric,
}

impl Default for HnswParams {
    fn default() -> Self {
        HnswParams {
            max_links_per_node: 16,
            neighbors_to_explore_at_insert: 200,
            multi_threaded_indexing: true,
            distance_metric: DistanceMetric::Euclidean,
        }
    }
}

/// Growth policy for lid-indexed buffers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GrowStrategy {
    pub initial_docs: u32,
    pub grow_factor: f32,
    pub grow_bias: u32,
    pub multi_value_grow_factor: f32,
}

impl Default for GrowStrategy {
    fn default() -> Self {
        GrowStrategy {
            initial_docs: 1024,
            grow_factor: 0.2,
            grow_bias: 1,
            multi_value_grow_factor: 0.2,
        }
    }
}

impl GrowStrategy {
    pub fn next_capacity(&self, current: u32, wanted: u32) -> u32 {
        let grown = current
            .saturating_add((current as f32 * self.grow_factor) as u32)
            .saturating_add(self.grow_bias);
        grown.max(wanted).max(self.initial_docs)
    }
}

/// When to rewrite storage to squeeze out dead entries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompactionStrategy {
    pub max_dead_ratio: f32,
    pub max_dead_address_space_ratio: f32,
}

impl Default for CompactionStrategy {
    fn default() -> Self {
        CompactionStrategy {
            max_dead_ratio: 0.2,
            max_dead_address_space_ratio: 0.2,
        }
    }
}

/// Full configuration of one attribute field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeConfig {
    pub basic_type: BasicType,
    pub collection: CollectionType,
    pub fast_search: bool,
    pub fast_access: bool,
    pub paged: bool,
    pub enumerated: bool,
    pub cased: bool,
    pub grow: GrowStrategy,
    pub compaction: CompactionStrategy,
    pub tensor_type: Option<TensorType>,
    pub predicate_params: Option<PredicateParams>,
    pub hnsw: Option<HnswParams>,
    pub enabled_only_bitvector: bool,
}

impl AttributeConfig {
    pub fn new(basic_type: BasicType, collection: CollectionType) -> Self {
        AttributeConfig {
            basic_type,
            collection,
            fast_search: false,
            fast_access: false,
            paged: false,
            // Strings are always stored through an enum store
            enumerated: basic_type == BasicType::String,
            cased: false,
            grow: GrowStrategy::default(),
            compaction: CompactionStrategy::default(),
            tensor_type: None,
            predicate_params: if basic_type == BasicType::Predicate {
                Some(PredicateParams::default())
            } else {
                None
            },
            hnsw: None,
            enabled_only_bitvector: false,
        }
    }

    pub fn single(basic_type: BasicType) -> Self {
        Self::new(basic_type, CollectionType::Single)
    }

    pub fn with_fast_search(mut self) -> Self {
        self.fast_search = true;
        self.enumerated = true;
        self
    }

    pub fn with_fast_access(mut self) -> Self {
        self.fast_access = true;
        self
    }

    /// An attribute needs a dictionary when configured for fast search or
    /// when the type is stored through an enum store regardless.
    pub fn uses_enum_store(&self) -> bool {
        self.enumerated || self.fast_search || self.basic_type == BasicType::String
    }

    /// Two configs are type-compatible iff basic type, collection (including
    /// weighted-set flags), tensor type and predicate params match. Only
    /// compatible configs permit live transfer across a reconfig; a `paged`
    /// flip also forces a reload.
    pub fn types_match(&self, other: &AttributeConfig) -> bool {
        if self.basic_type != other.basic_type || !self.collection.matches(&other.collection) {
            return false;
        }
        if self.basic_type == BasicType::Tensor && self.tensor_type != other.tensor_type {
            return false;
        }
        if self.basic_type == BasicType::Predicate && self.predicate_params != other.predicate_params {
            return false;
        }
        if self.paged != other.paged {
            return false;
        }
        true
    }

    /// True for types where single-document partial updates are cheap.
    /// Removing the attribute aspect from such a field reprocesses unless a
    /// string index can rebuild it.
    pub fn fast_partial_updates(&self) -> bool {
        !matches!(
            self.basic_type,
            BasicType::Predicate | BasicType::Tensor | BasicType::Reference
        )
    }

    /// Two-phase puts apply to tensor fields whose index is built
    /// multi-threaded.
    pub fn use_two_phase_put(&self) -> bool {
        self.basic_type == BasicType::Tensor
            && self.hnsw.map(|h| h.multi_threaded_indexing).unwrap_or(false)
    }
}

/// One entry of the attributes config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributesConfigEntry {
    pub name: String,
    pub config: AttributeConfig,
}

/// The desired attribute set for one sub-database, as read from config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributesConfig {
    pub attribute: Vec<AttributesConfigEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexFieldType {
    String,
    Int64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexFieldEntry {
    pub name: String,
    pub datatype: IndexFieldType,
}

/// The index field list; used to classify string-indexed fields when the
/// specs builder decides whether an aspect removal reprocesses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexschemaConfig {
    pub indexfield: Vec<IndexFieldEntry>,
}

/// Allocation tuning shared by all attributes of a sub-database.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AllocConfig {
    pub initial_docs: u32,
    pub grow_factor: f32,
    pub grow_bias: u32,
    pub multi_value_grow_factor: f32,
    pub max_dead_ratio: f32,
    pub max_dead_address_space_ratio: f32,
    pub active_buffer_ratio: f32,
    pub amortize_count: u32,
    pub redundancy: u32,
    pub searchable_copies: u32,
}

impl Default for AllocConfig {
    fn default() -> Self {
        AllocConfig {
            initial_docs: 1024,
            grow_factor: 0.2,
            grow_bias: 1,
            multi_value_grow_factor: 0.2,
            max_dead_ratio: 0.2,
            max_dead_address_space_ratio: 0.2,
            active_buffer_ratio: 0.1,
            amortize_count: 10000,
            redundancy: 1,
            searchable_copies: 1,
        }
    }
}

impl AllocConfig {
    pub fn make_grow_strategy(&self) -> GrowStrategy {
        GrowStrategy {
            initial_docs: self.initial_docs,
            grow_factor: self.grow_factor,
            grow_bias: self.grow_bias,
            multi_value_grow_factor: self.multi_value_grow_factor,
        }
    }

    pub fn make_compaction_strategy(&self) -> CompactionStrategy {
        CompactionStrategy {
            max_dead_ratio: self.max_dead_ratio,
            max_dead_address_space_ratio: self.max_dead_address_space_ratio,
        }
    }
}

impl AttributesConfig {
    /// Applies the sub-database alloc tuning to every attribute that still
    /// carries the default grow/compaction strategies.
    pub fn with_alloc(mut self, alloc: &AllocConfig) -> Self {
        let grow = alloc.make_grow_strategy();
        let compaction = alloc.make_compaction_strategy();
        for entry in &mut self.attribute {
            if entry.config.grow == GrowStrategy::default() {
                entry.config.grow = grow;
            }
            if entry.config.compaction == CompactionStrategy::default() {
                entry.config.compaction = compaction;
            }
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizeFor {
    Latency,
    Throughput,
    Adaptive,
}

/// Executor sizing for one document database.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ThreadingConfig {
    pub indexing_threads: u32,
    pub master_task_limit: u32,
    /// Negative means a hard limit; positive limits are advisory and may be
    /// exceeded while draining.
    pub default_task_limit: i32,
    pub optimize: OptimizeFor,
    pub watermark: f32,
    pub reaction_time_ms: u64,
}

impl Default for ThreadingConfig {
    fn default() -> Self {
        ThreadingConfig {
            indexing_threads: 1,
            master_task_limit: 1000,
            default_task_limit: 500,
            optimize: OptimizeFor::Latency,
            watermark: 0.9,
            reaction_time_ms: 1,
        }
    }
}

impl ThreadingConfig {
    pub fn num_field_writer_lanes(&self) -> usize {
        let threads = self.indexing_threads.max(1) as usize;
        threads.min(num_cpus::get().max(1))
    }

    pub fn task_limit(&self) -> usize {
        self.default_task_limit.unsigned_abs() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_compatibility() {
        let a = AttributeConfig::single(BasicType::Int32);
        let mut b = a.clone();
        b.fast_access = true;
        b.grow.initial_docs = 4;
        // Flag changes keep configs compatible
        assert!(a.types_match(&b));

        let c = AttributeConfig::single(BasicType::Int64);
        assert!(!a.types_match(&c));

        let ws1 = AttributeConfig::new(
            BasicType::String,
            CollectionType::WeightedSet { create_if_nonexistent: true, remove_if_zero: true },
        );
        let ws2 = AttributeConfig::new(
            BasicType::String,
            CollectionType::WeightedSet { create_if_nonexistent: false, remove_if_zero: true },
        );
        assert!(!ws1.types_match(&ws2));

        let mut paged = a.clone();
        paged.paged = true;
        assert!(!a.types_match(&paged));
    }

    #[test]
    fn tensor_type_must_match() {
        let mut a = AttributeConfig::single(BasicType::Tensor);
        a.tensor_type = Some(TensorType("tensor<float>(x[64])".into()));
        let mut b = a.clone();
        assert!(a.types_match(&b));
        b.tensor_type = Some(TensorType("tensor<float>(x[128])".into()));
        assert!(!a.types_match(&b));
    }

    #[test]
    fn alloc_config_fills_default_strategies() {
        let mut custom = AttributeConfig::single(BasicType::Int32);
        custom.grow.initial_docs = 7;
        let config = AttributesConfig {
            attribute: vec![
                AttributesConfigEntry {
                    name: "a".into(),
                    config: AttributeConfig::single(BasicType::Int32),
                },
                AttributesConfigEntry { name: "b".into(), config: custom },
            ],
        };
        let alloc = AllocConfig { initial_docs: 4096, ..AllocConfig::default() };
        let adjusted = config.with_alloc(&alloc);
        assert_eq!(adjusted.attribute[0].config.grow.initial_docs, 4096);
        // explicitly tuned attributes keep their strategy
        assert_eq!(adjusted.attribute[1].config.grow.initial_docs, 7);
    }

    #[test]
    fn grow_strategy_capacity() {
        let g = GrowStrategy { initial_docs: 16, grow_factor: 0.5, grow_bias: 1, multi_value_grow_factor: 0.2 };
        assert_eq!(g.next_capacity(0, 1), 16);
        assert_eq!(g.next_capacity(16, 17), 25);
        assert!(g.next_capacity(100, 400) >= 400);
    }
}
