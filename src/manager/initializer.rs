use std::sync::Arc;
use tracing::{info, warn};

use crate::attribute::factory::AttributeFactory;
use crate::attribute::{AttributeVector, AttributeVectorSP, CommitParam};
use crate::core::error::Result;
use crate::core::types::SerialNum;
use crate::manager::spec::AttributeSpec;
use crate::manager::status::StatusRegistry;
use crate::storage::directory::AttributeDirectory;
use crate::storage::save::{AttributeHeader, read_header, read_snapshot_file};
use crate::writer::attribute_writer::pad_attribute;

/// Loads one attribute from its newest valid snapshot, or creates it empty
/// when the directory is empty or the snapshot cannot serve the configured
/// state (wrong type, too new, too old, unreadable).
pub struct AttributeInitializer {
    attr_dir: Arc<AttributeDirectory>,
    sub_db_name: String,
    spec: AttributeSpec,
    current_serial: Option<SerialNum>,
    factory: Arc<AttributeFactory>,
    status: Arc<StatusRegistry>,
    header: Option<AttributeHeader>,
    header_ok: bool,
}

impl AttributeInitializer {
    pub fn new(
        attr_dir: Arc<AttributeDirectory>,
        sub_db_name: impl Into<String>,
        spec: AttributeSpec,
        current_serial: Option<SerialNum>,
        factory: Arc<AttributeFactory>,
        status: Arc<StatusRegistry>,
    ) -> Self {
        let mut initializer = AttributeInitializer {
            attr_dir,
            sub_db_name: sub_db_name.into(),
            spec,
            current_serial,
            factory,
            status,
            header: None,
            header_ok: false,
        };
        if initializer.current_serial.is_some() {
            initializer.read_header();
        }
        initializer.status.register(&initializer.spec.name);
        initializer
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    fn read_header(&mut self) {
        if self.attr_dir.empty() {
            return;
        }
        let flushed_serial = self.attr_dir.flushed_serial_num();
        if flushed_serial == 0 {
            return;
        }
        let path = self.attr_dir.attribute_file_path(flushed_serial);
        match read_header(&path) {
            Ok(header) => {
                let current = self.current_serial.unwrap_or(0);
                self.header_ok = header.create_serial <= current
                    && header.type_matches(&self.spec.config)
                    && flushed_serial >= current;
                self.header = Some(header);
            }
            Err(e) => {
                warn!(
                    attribute = %self.spec.name,
                    file = %path.display(),
                    error = %e,
                    "could not read snapshot header"
                );
            }
        }
    }

    fn log_header_mismatch(&self, flushed_serial: SerialNum) {
        let current = self.current_serial.unwrap_or(0);
        if let Some(header) = &self.header {
            if header.create_serial > current {
                info!(
                    attribute = %self.spec.name,
                    create_serial = header.create_serial,
                    current_serial = current,
                    "attribute snapshot is too new"
                );
            }
            if flushed_serial < current {
                info!(
                    attribute = %self.spec.name,
                    flushed_serial,
                    current_serial = current,
                    "attribute snapshot is too old"
                );
            }
            if !header.type_matches(&self.spec.config) {
                info!(
                    attribute = %self.spec.name,
                    expected = self.spec.config.basic_type.as_str(),
                    got = header.basic_type.as_str(),
                    "attribute snapshot has the wrong type"
                );
            }
        }
        info!(attribute = %self.spec.name, "returning empty attribute vector");
    }

    fn setup_empty(&self, attr: &dyn AttributeVector) -> Result<()> {
        self.factory.setup_empty(attr, self.current_serial.unwrap_or(0))
    }

    fn try_load(&self, attr: &AttributeVectorSP) -> Result<()> {
        let flushed_serial = self.attr_dir.flushed_serial_num();
        if flushed_serial == 0 || self.header.is_none() {
            return self.setup_empty(attr.as_ref());
        }
        if !self.header_ok {
            self.log_header_mismatch(flushed_serial);
            self.setup_empty(attr.as_ref())?;
            attr.commit(CommitParam::new(flushed_serial));
            return Ok(());
        }
        self.status.mark_loading(&self.spec.name);
        info!(
            sub_db = %self.sub_db_name,
            attribute = %self.spec.name,
            serial = flushed_serial,
            "loading attribute"
        );
        let path = self.attr_dir.attribute_file_path(flushed_serial);
        let load_outcome = read_snapshot_file(&path).and_then(|data| attr.load_snapshot(&data));
        match load_outcome {
            Ok(()) => {
                attr.commit(CommitParam::new(flushed_serial));
                info!(
                    sub_db = %self.sub_db_name,
                    attribute = %self.spec.name,
                    docid_limit = attr.committed_docid_limit(),
                    "attribute loaded"
                );
            }
            Err(e) => {
                warn!(
                    attribute = %self.spec.name,
                    error = %e,
                    "could not load attribute from disk; returning empty attribute vector"
                );
                self.setup_empty(attr.as_ref())?;
            }
        }
        Ok(())
    }

    /// Rough extra memory needed while loading, used for load admission.
    pub fn transient_memory_usage(&self) -> u64 {
        if self.header_ok {
            self.header
                .as_ref()
                .map(|h| h.docid_limit as u64 * 8)
                .unwrap_or(0)
        } else {
            0
        }
    }

    pub fn init(&self) -> Result<AttributeVectorSP> {
        let attr = self.factory.create(&self.spec.name, &self.spec.config)?;
        if self.attr_dir.empty() {
            self.setup_empty(attr.as_ref())?;
        } else {
            self.try_load(&attr)?;
        }
        self.status.mark_done(&self.spec.name);
        Ok(attr)
    }
}

/// Pads a transferred or loaded vector up to the new docid limit when it
/// lags behind the current serial.
pub fn consider_pad_attribute(
    attr: &dyn AttributeVector,
    current_serial: SerialNum,
    new_docid_limit: u32,
) -> Result<()> {
    if attr.base().last_serial() < current_serial {
        pad_attribute(attr, new_docid_limit)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::CommitParam;
    use crate::core::config::{AttributeConfig, BasicType};
    use crate::core::types::FieldValue;
    use crate::flush::flushable::FlushableAttribute;
    use crate::flush::target::FlushTarget;
    use crate::storage::disk_layout::DiskLayout;
    use crate::writer::executor::SequencedTaskExecutor;

    struct Fixture {
        _tmp: tempfile::TempDir,
        layout: Arc<DiskLayout>,
        factory: Arc<AttributeFactory>,
        status: Arc<StatusRegistry>,
        executor: Arc<SequencedTaskExecutor>,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = tempfile::tempdir().unwrap();
            Fixture {
                layout: DiskLayout::create(tmp.path().join("attributes")).unwrap(),
                _tmp: tmp,
                factory: Arc::new(AttributeFactory::new()),
                status: Arc::new(StatusRegistry::new()),
                executor: Arc::new(SequencedTaskExecutor::new(1, 100)),
            }
        }

        fn initializer(&self, spec: AttributeSpec, serial: SerialNum) -> AttributeInitializer {
            AttributeInitializer::new(
                self.layout.create_attribute_dir(&spec.name),
                "test.ready",
                spec,
                Some(serial),
                Arc::clone(&self.factory),
                Arc::clone(&self.status),
            )
        }

        fn flush(&self, attr: &AttributeVectorSP, serial: SerialNum) {
            let dir = self.layout.create_attribute_dir(attr.name());
            let target = FlushableAttribute::new(attr, dir, Arc::clone(&self.executor));
            let task = target.init_flush(serial).expect("flush task");
            task.run();
        }
    }

    fn int32_spec() -> AttributeSpec {
        AttributeSpec::new("price", AttributeConfig::single(BasicType::Int32))
    }

    #[test]
    fn empty_directory_creates_empty_vector() {
        let fixture = Fixture::new();
        let attr = fixture.initializer(int32_spec(), 10).init().unwrap();
        assert_eq!(attr.num_docs(), 1);
        assert_eq!(attr.committed_docid_limit(), 1);
        assert_eq!(attr.create_serial(), 10);
    }

    #[test]
    fn load_from_best_snapshot() {
        let fixture = Fixture::new();
        let attr = fixture.initializer(int32_spec(), 0).init().unwrap();
        for _ in 0..3 {
            attr.add_doc().unwrap();
        }
        attr.put(1, &FieldValue::Int(7)).unwrap();
        attr.put(2, &FieldValue::Int(-3)).unwrap();
        attr.commit(CommitParam::new(100));
        fixture.flush(&attr, 100);
        drop(attr);

        let restored = fixture.initializer(int32_spec(), 100).init().unwrap();
        assert_eq!(restored.last_serial(), 100);
        assert_eq!(restored.committed_docid_limit(), 4);
        assert_eq!(restored.get(1), FieldValue::Int(7));
        assert_eq!(restored.get(2), FieldValue::Int(-3));
        assert_eq!(restored.get(3), FieldValue::Int(0));
    }

    #[test]
    fn wrong_type_creates_empty_vector() {
        let fixture = Fixture::new();
        let attr = fixture.initializer(int32_spec(), 0).init().unwrap();
        attr.add_doc().unwrap();
        attr.put(1, &FieldValue::Int(1)).unwrap();
        attr.commit(CommitParam::new(50));
        fixture.flush(&attr, 50);
        drop(attr);

        let spec = AttributeSpec::new("price", AttributeConfig::single(BasicType::Int64));
        let restored = fixture.initializer(spec, 50).init().unwrap();
        // wrong type: the snapshot is ignored
        assert_eq!(restored.num_docs(), 1);
        assert_eq!(restored.get(1), FieldValue::Int(0));
    }

    #[test]
    fn too_old_snapshot_creates_empty_vector() {
        let fixture = Fixture::new();
        let attr = fixture.initializer(int32_spec(), 0).init().unwrap();
        attr.add_doc().unwrap();
        attr.put(1, &FieldValue::Int(9)).unwrap();
        attr.commit(CommitParam::new(20));
        fixture.flush(&attr, 20);
        drop(attr);

        // current serial is past the snapshot: the replayed transaction log
        // no longer covers the gap, so the vector starts empty
        let restored = fixture.initializer(int32_spec(), 30).init().unwrap();
        assert_eq!(restored.num_docs(), 1);
    }

    #[test]
    fn pad_attribute_fills_lid_space() {
        let fixture = Fixture::new();
        let attr = fixture.initializer(int32_spec(), 0).init().unwrap();
        attr.commit(CommitParam::new(5));
        consider_pad_attribute(attr.as_ref(), 10, 2000).unwrap();
        assert_eq!(attr.num_docs(), 2000);
        assert_eq!(attr.committed_docid_limit(), 2000);
    }
}
