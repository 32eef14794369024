use chrono::{DateTime, Utc};
use std::sync::{Arc, Weak};

use crate::attribute::AttributeVector;
use crate::core::types::SerialNum;
use crate::flush::target::{FlushComponent, FlushTarget, FlushTask, FlushType};
use crate::storage::directory::AttributeDirectory;
use crate::writer::executor::SequencedTaskExecutor;

/// The per-attribute GC target: releases backing storage after lid-space
/// compaction. Runs only when the vector has been compacted since its last
/// shrink.
pub struct ShrinkTarget {
    target_name: String,
    attr: Weak<dyn AttributeVector>,
    attr_dir: Arc<AttributeDirectory>,
    executor: Arc<SequencedTaskExecutor>,
}

impl ShrinkTarget {
    pub fn new(
        attr: &Arc<dyn AttributeVector>,
        attr_dir: Arc<AttributeDirectory>,
        executor: Arc<SequencedTaskExecutor>,
    ) -> Self {
        ShrinkTarget {
            target_name: format!("attribute.shrink.{}", attr.name()),
            attr: Arc::downgrade(attr),
            attr_dir,
            executor,
        }
    }
}

impl FlushTarget for ShrinkTarget {
    fn name(&self) -> &str {
        &self.target_name
    }

    fn flush_type(&self) -> FlushType {
        FlushType::Gc
    }

    fn component(&self) -> FlushComponent {
        FlushComponent::Attribute
    }

    fn flushed_serial_num(&self) -> SerialNum {
        match self.attr.upgrade() {
            Some(attr) => attr.last_serial().max(attr.create_serial().saturating_sub(1)),
            None => 0,
        }
    }

    fn last_flush_time(&self) -> Option<DateTime<Utc>> {
        self.attr_dir.last_flush_time()
    }

    fn memory_gain(&self) -> u64 {
        match self.attr.upgrade() {
            Some(attr) if attr.base().compacted_since_shrink() => attr.memory_used() as u64 / 2,
            _ => 0,
        }
    }

    fn approx_bytes_to_write(&self) -> u64 {
        0
    }

    fn init_flush(&self, _current_serial: SerialNum) -> Option<Box<dyn FlushTask>> {
        let attr = self.attr.upgrade()?;
        if !attr.base().compacted_since_shrink() {
            return None;
        }
        Some(Box::new(ShrinkTask {
            attr,
            executor: Arc::clone(&self.executor),
        }))
    }
}

struct ShrinkTask {
    attr: Arc<dyn AttributeVector>,
    executor: Arc<SequencedTaskExecutor>,
}

impl FlushTask for ShrinkTask {
    fn flush_serial(&self) -> SerialNum {
        self.attr.last_serial()
    }

    fn run(self: Box<Self>) {
        let attr = self.attr;
        let executor_id = self.executor.executor_id_from_name(attr.name_prefix());
        let gate = crate::writer::gate::Gate::new();
        {
            let token = gate.callback();
            self.executor.execute_fn(executor_id, move || {
                attr.shrink_lid_space();
                let _ = &token;
            });
        }
        gate.await_done();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::factory::AttributeFactory;
    use crate::core::config::{AttributeConfig, BasicType};
    use crate::core::types::FieldValue;
    use crate::storage::disk_layout::DiskLayout;

    #[test]
    fn shrink_runs_only_after_compaction() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = DiskLayout::create(tmp.path().join("attributes")).unwrap();
        let dir = layout.create_attribute_dir("price");
        let executor = Arc::new(SequencedTaskExecutor::new(1, 100));
        let factory = AttributeFactory::new();
        let attr = factory
            .create("price", &AttributeConfig::single(BasicType::Int32))
            .unwrap();
        factory.setup_empty(attr.as_ref(), 1).unwrap();
        let target = ShrinkTarget::new(&attr, dir, Arc::clone(&executor));

        assert!(target.init_flush(10).is_none());

        for _ in 0..100 {
            attr.add_doc().unwrap();
        }
        attr.put(1, &FieldValue::Int(3)).unwrap();
        attr.commit(crate::attribute::CommitParam::new(5));
        attr.compact_lid_space(10);
        let task = target.init_flush(10).expect("compacted vector must shrink");
        task.run();
        assert!(!attr.base().compacted_since_shrink());
        assert!(target.init_flush(10).is_none());
    }
}
