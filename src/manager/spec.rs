use crate::core::config::AttributeConfig;
use crate::core::types::SerialNum;

/// The desired shape of one attribute, possibly carrying a delayed-aspect
/// marker produced by the specs builder.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeSpec {
    pub name: String,
    pub config: AttributeConfig,
    /// The aspect was added in the new config but delayed to avoid
    /// reprocessing; the attribute is not materialized yet.
    pub delay_add: bool,
    /// The aspect was removed in the new config but the attribute is kept
    /// until reprocessing has rebuilt the field elsewhere.
    pub delay_remove: bool,
}

impl AttributeSpec {
    pub fn new(name: impl Into<String>, config: AttributeConfig) -> Self {
        AttributeSpec { name: name.into(), config, delay_add: false, delay_remove: false }
    }

    pub fn delayed_add(name: impl Into<String>, config: AttributeConfig) -> Self {
        AttributeSpec { name: name.into(), config, delay_add: true, delay_remove: false }
    }

    pub fn delayed_remove(name: impl Into<String>, config: AttributeConfig) -> Self {
        AttributeSpec { name: name.into(), config, delay_add: false, delay_remove: true }
    }
}

/// The desired set of attributes for one sub-database at one config serial;
/// an immutable input to the manager.
#[derive(Debug, Clone, Default)]
pub struct AttributeCollectionSpec {
    pub attributes: Vec<AttributeSpec>,
    pub docid_limit: u32,
    pub current_serial: Option<SerialNum>,
}

impl AttributeCollectionSpec {
    pub fn new(
        attributes: Vec<AttributeSpec>,
        docid_limit: u32,
        current_serial: Option<SerialNum>,
    ) -> Self {
        AttributeCollectionSpec { attributes, docid_limit, current_serial }
    }

    pub fn get(&self, name: &str) -> Option<&AttributeSpec> {
        self.attributes.iter().find(|s| s.name == name)
    }
}
