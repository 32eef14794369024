use std::sync::Arc;

use crate::attribute::multi_numeric::MultiNumericAttribute;
use crate::attribute::multi_string::MultiStringAttribute;
use crate::attribute::single_numeric::SingleNumericAttribute;
use crate::attribute::single_string::SingleStringAttribute;
use crate::attribute::small_numeric::SingleSmallNumericAttribute;
use crate::attribute::special::{PredicateAttribute, ReferenceAttribute, TensorAttribute};
use crate::attribute::{AttributeVector, AttributeVectorSP, CommitParam};
use crate::core::config::{AttributeConfig, BasicType, CollectionType};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::SerialNum;

/// Creates the concrete vector implementation for a type config.
pub struct AttributeFactory;

impl AttributeFactory {
    pub fn new() -> Self {
        AttributeFactory
    }

    pub fn create(&self, name: &str, config: &AttributeConfig) -> Result<AttributeVectorSP> {
        let config = config.clone();
        let single = matches!(config.collection, CollectionType::Single);
        let attr: AttributeVectorSP = match (config.basic_type, single) {
            (BasicType::Bool | BasicType::UInt2 | BasicType::UInt4, true) => {
                Arc::new(SingleSmallNumericAttribute::new(name, config))
            }
            (BasicType::Int8, true) => Arc::new(SingleNumericAttribute::<i8>::new(name, config)),
            (BasicType::Int16, true) => Arc::new(SingleNumericAttribute::<i16>::new(name, config)),
            (BasicType::Int32, true) => Arc::new(SingleNumericAttribute::<i32>::new(name, config)),
            (BasicType::Int64, true) => Arc::new(SingleNumericAttribute::<i64>::new(name, config)),
            (BasicType::Float, true) => Arc::new(SingleNumericAttribute::<f32>::new(name, config)),
            (BasicType::Double, true) => Arc::new(SingleNumericAttribute::<f64>::new(name, config)),
            (BasicType::String, true) => Arc::new(SingleStringAttribute::new(name, config)),
            (BasicType::Int8, false) => Arc::new(MultiNumericAttribute::<i8>::new(name, config)),
            (BasicType::Int16, false) => Arc::new(MultiNumericAttribute::<i16>::new(name, config)),
            (BasicType::Int32, false) => Arc::new(MultiNumericAttribute::<i32>::new(name, config)),
            (BasicType::Int64, false) => Arc::new(MultiNumericAttribute::<i64>::new(name, config)),
            (BasicType::Float, false) => Arc::new(MultiNumericAttribute::<f32>::new(name, config)),
            (BasicType::Double, false) => Arc::new(MultiNumericAttribute::<f64>::new(name, config)),
            (BasicType::String, false) => Arc::new(MultiStringAttribute::new(name, config)),
            (BasicType::Tensor, true) => Arc::new(TensorAttribute::new(name, config)),
            (BasicType::Predicate, true) => Arc::new(PredicateAttribute::new(name, config)),
            (BasicType::Reference, true) => Arc::new(ReferenceAttribute::new(name, config)),
            (basic_type, false) => {
                return Err(Error::new(
                    ErrorKind::Config,
                    format!("{} attributes have no multi-value collection", basic_type.as_str()),
                ));
            }
        };
        Ok(attr)
    }

    /// Brings a freshly created vector into the Loaded state with nothing in
    /// it: the reserved lid is allocated and an initial commit publishes the
    /// empty state.
    pub fn setup_empty(&self, attr: &dyn AttributeVector, create_serial: SerialNum) -> Result<()> {
        attr.base().set_create_serial(create_serial);
        if attr.base().num_docs() == 0 {
            attr.add_doc()?;
        }
        attr.commit(CommitParam::internal());
        Ok(())
    }
}

impl Default for AttributeFactory {
    fn default() -> Self {
        Self::new()
    }
}
