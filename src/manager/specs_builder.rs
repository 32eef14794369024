use std::collections::{HashMap, HashSet};

use crate::core::config::{
    AttributeConfig, AttributesConfig, AttributesConfigEntry, IndexFieldType, IndexschemaConfig,
};
use crate::manager::spec::AttributeSpec;

/// Answers whether a field's document type is unchanged between the old and
/// new configuration; only unchanged fields are candidates for delayed
/// aspect changes.
pub trait DocumentTypeInspector {
    fn has_unchanged_field(&self, name: &str) -> bool;
}

/// Inspector backed by an explicit field set; the document model supplies a
/// richer implementation in production.
pub struct SimpleDocumentTypeInspector {
    unchanged: HashSet<String>,
}

impl SimpleDocumentTypeInspector {
    pub fn new(unchanged: impl IntoIterator<Item = String>) -> Self {
        SimpleDocumentTypeInspector { unchanged: unchanged.into_iter().collect() }
    }
}

impl DocumentTypeInspector for SimpleDocumentTypeInspector {
    fn has_unchanged_field(&self, name: &str) -> bool {
        self.unchanged.contains(name)
    }
}

fn fast_partial_update_attribute(config: &AttributeConfig) -> bool {
    config.fast_partial_updates()
}

fn is_string_index(index_config: &HashMap<&str, IndexFieldType>, name: &str) -> bool {
    index_config.get(name) == Some(&IndexFieldType::String)
}

/// Removing the attribute aspect reprocesses unless a string index can
/// rebuild the field.
fn will_trigger_reprocess_on_attribute_aspect_removal(
    config: &AttributeConfig,
    index_config: &HashMap<&str, IndexFieldType>,
    name: &str,
) -> bool {
    fast_partial_update_attribute(config) && !is_string_index(index_config, name)
}

fn index_hash(config: &IndexschemaConfig) -> HashMap<&str, IndexFieldType> {
    config
        .indexfield
        .iter()
        .map(|f| (f.name.as_str(), f.datatype))
        .collect()
}

fn attribute_hash(config: &AttributesConfig) -> HashMap<&str, &AttributesConfigEntry> {
    config.attribute.iter().map(|a| (a.name.as_str(), a)).collect()
}

/// Computes the attribute specs and the adjusted attributes config from an
/// old and new configuration, delaying aspect changes that would otherwise
/// trigger a reprocessing storm.
pub struct AttributeSpecsBuilder {
    specs: Vec<AttributeSpec>,
    config: AttributesConfig,
}

impl AttributeSpecsBuilder {
    pub fn new() -> Self {
        AttributeSpecsBuilder { specs: Vec::new(), config: AttributesConfig::default() }
    }

    pub fn specs(&self) -> &[AttributeSpec] {
        &self.specs
    }

    pub fn into_parts(self) -> (Vec<AttributeSpec>, AttributesConfig) {
        (self.specs, self.config)
    }

    pub fn attributes_config(&self) -> &AttributesConfig {
        &self.config
    }

    /// Bootstrap path: no old config exists, everything passes through.
    pub fn setup(&mut self, new_config: &AttributesConfig) {
        for attr in &new_config.attribute {
            self.specs.push(AttributeSpec::new(&attr.name, attr.config.clone()));
        }
        self.config = new_config.clone();
    }

    /// Reconfig path: adjusts the new config against the old one.
    pub fn setup_delta(
        &mut self,
        old_config: &AttributesConfig,
        new_config: &AttributesConfig,
        old_indexschema: &IndexschemaConfig,
        inspector: &dyn DocumentTypeInspector,
    ) {
        let old_indexes = index_hash(old_indexschema);
        self.handle_new_attributes(old_config, new_config, &old_indexes, inspector);
        self.handle_old_attributes(old_config, new_config, &old_indexes, inspector);
    }

    fn handle_new_attributes(
        &mut self,
        old_config: &AttributesConfig,
        new_config: &AttributesConfig,
        old_indexes: &HashMap<&str, IndexFieldType>,
        inspector: &dyn DocumentTypeInspector,
    ) {
        let old_attrs = attribute_hash(old_config);
        for new_attr in &new_config.attribute {
            let new_cfg = new_attr.config.clone();
            if !inspector.has_unchanged_field(&new_attr.name) {
                // The field type changed; reprocessing happens anyway, so
                // the new config passes through untouched.
                self.specs.push(AttributeSpec::new(&new_attr.name, new_cfg));
                self.config.attribute.push(new_attr.clone());
                continue;
            }
            match old_attrs.get(new_attr.name.as_str()) {
                Some(old_attr) => {
                    let old_cfg = &old_attr.config;
                    let removal_reprocesses = will_trigger_reprocess_on_attribute_aspect_removal(
                        old_cfg,
                        old_indexes,
                        &new_attr.name,
                    );
                    if removal_reprocesses || !old_cfg.fast_access {
                        // Delay the fast-access flag change
                        let mut adjusted = new_cfg;
                        adjusted.fast_access = old_cfg.fast_access;
                        self.specs.push(AttributeSpec::new(&new_attr.name, adjusted.clone()));
                        self.config.attribute.push(AttributesConfigEntry {
                            name: new_attr.name.clone(),
                            config: adjusted,
                        });
                    } else {
                        // fast_access true -> false with a removal that does
                        // not reprocess passes through
                        self.specs.push(AttributeSpec::new(&new_attr.name, new_cfg));
                        self.config.attribute.push(new_attr.clone());
                    }
                }
                None => {
                    // Adding the attribute aspect to an existing unchanged
                    // field is delayed until reprocessing has populated it
                    self.specs.push(AttributeSpec::delayed_add(&new_attr.name, new_cfg));
                }
            }
        }
    }

    fn handle_old_attributes(
        &mut self,
        old_config: &AttributesConfig,
        new_config: &AttributesConfig,
        old_indexes: &HashMap<&str, IndexFieldType>,
        inspector: &dyn DocumentTypeInspector,
    ) {
        let new_attrs = attribute_hash(new_config);
        for old_attr in &old_config.attribute {
            if !inspector.has_unchanged_field(&old_attr.name) {
                continue;
            }
            if new_attrs.contains_key(old_attr.name.as_str()) {
                continue;
            }
            // The aspect was removed; keep the attribute when dropping it
            // now would force reprocessing
            if will_trigger_reprocess_on_attribute_aspect_removal(
                &old_attr.config,
                old_indexes,
                &old_attr.name,
            ) {
                self.specs
                    .push(AttributeSpec::delayed_remove(&old_attr.name, old_attr.config.clone()));
                self.config.attribute.push(old_attr.clone());
            }
        }
    }
}

impl Default for AttributeSpecsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{BasicType, IndexFieldEntry};

    fn entry(name: &str, config: AttributeConfig) -> AttributesConfigEntry {
        AttributesConfigEntry { name: name.to_string(), config }
    }

    fn inspector(names: &[&str]) -> SimpleDocumentTypeInspector {
        SimpleDocumentTypeInspector::new(names.iter().map(|s| s.to_string()))
    }

    #[test]
    fn bootstrap_passes_through() {
        let mut builder = AttributeSpecsBuilder::new();
        let config = AttributesConfig {
            attribute: vec![entry("a", AttributeConfig::single(BasicType::Int32))],
        };
        builder.setup(&config);
        assert_eq!(builder.specs().len(), 1);
        assert!(!builder.specs()[0].delay_add && !builder.specs()[0].delay_remove);
    }

    #[test]
    fn aspect_addition_on_unchanged_field_is_delayed() {
        let mut builder = AttributeSpecsBuilder::new();
        let old = AttributesConfig::default();
        let new = AttributesConfig {
            attribute: vec![entry("fresh", AttributeConfig::single(BasicType::Int32))],
        };
        builder.setup_delta(&old, &new, &IndexschemaConfig::default(), &inspector(&["fresh"]));
        assert_eq!(builder.specs().len(), 1);
        assert!(builder.specs()[0].delay_add);
        // not materialized in the adjusted config yet
        assert!(builder.attributes_config().attribute.is_empty());
    }

    #[test]
    fn aspect_addition_on_changed_field_passes_through() {
        let mut builder = AttributeSpecsBuilder::new();
        let old = AttributesConfig::default();
        let new = AttributesConfig {
            attribute: vec![entry("fresh", AttributeConfig::single(BasicType::Int32))],
        };
        builder.setup_delta(&old, &new, &IndexschemaConfig::default(), &inspector(&[]));
        assert!(!builder.specs()[0].delay_add);
        assert_eq!(builder.attributes_config().attribute.len(), 1);
    }

    #[test]
    fn aspect_removal_that_reprocesses_is_delayed() {
        let mut builder = AttributeSpecsBuilder::new();
        // fast-partial-update type, no string index: removal reprocesses
        let old = AttributesConfig {
            attribute: vec![entry("gone", AttributeConfig::single(BasicType::Int32))],
        };
        let new = AttributesConfig::default();
        builder.setup_delta(&old, &new, &IndexschemaConfig::default(), &inspector(&["gone"]));
        assert_eq!(builder.specs().len(), 1);
        assert!(builder.specs()[0].delay_remove);
        assert_eq!(builder.attributes_config().attribute.len(), 1);
    }

    #[test]
    fn aspect_removal_with_string_index_is_immediate() {
        let mut builder = AttributeSpecsBuilder::new();
        let old = AttributesConfig {
            attribute: vec![entry("title", AttributeConfig::single(BasicType::String))],
        };
        let new = AttributesConfig::default();
        let indexschema = IndexschemaConfig {
            indexfield: vec![IndexFieldEntry {
                name: "title".to_string(),
                datatype: IndexFieldType::String,
            }],
        };
        builder.setup_delta(&old, &new, &indexschema, &inspector(&["title"]));
        assert!(builder.specs().is_empty());
        assert!(builder.attributes_config().attribute.is_empty());
    }

    #[test]
    fn fast_access_downgrade_is_delayed_when_removal_reprocesses() {
        let mut builder = AttributeSpecsBuilder::new();
        let old = AttributesConfig {
            attribute: vec![entry(
                "price",
                AttributeConfig::single(BasicType::Int32).with_fast_access(),
            )],
        };
        let new = AttributesConfig {
            attribute: vec![entry("price", AttributeConfig::single(BasicType::Int32))],
        };
        builder.setup_delta(&old, &new, &IndexschemaConfig::default(), &inspector(&["price"]));
        assert_eq!(builder.specs().len(), 1);
        // the downgrade is delayed: fast_access stays on
        assert!(builder.specs()[0].config.fast_access);
        assert!(builder.attributes_config().attribute[0].config.fast_access);
    }

    #[test]
    fn unrelated_changes_pass_through() {
        let mut builder = AttributeSpecsBuilder::new();
        let mut old_cfg = AttributeConfig::single(BasicType::Int32);
        old_cfg.grow.initial_docs = 16;
        let mut new_cfg = AttributeConfig::single(BasicType::Int32);
        new_cfg.grow.initial_docs = 64;
        let old = AttributesConfig { attribute: vec![entry("price", old_cfg)] };
        let new = AttributesConfig { attribute: vec![entry("price", new_cfg.clone())] };
        builder.setup_delta(&old, &new, &IndexschemaConfig::default(), &inspector(&["price"]));
        assert_eq!(builder.specs()[0].config.grow.initial_docs, 64);
    }
}
