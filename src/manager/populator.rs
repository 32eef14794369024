use std::sync::Arc;
use tracing::info;

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{Document, Lid, SerialNum};
use crate::manager::manager::AttributeManager;
use crate::writer::attribute_writer::AttributeWriter;
use crate::writer::gate::Gate;

/// Rebuilds attribute contents from the document store when a late-added
/// aspect needs data from existing documents. Documents are fed in lid
/// order with synthetic serials in `(init_serial, config_serial]`; each one
/// is committed through a force-commit barrier, and the final pass flushes
/// every target so all snapshots land exactly at the config serial.
pub struct AttributePopulator {
    writer: AttributeWriter,
    mgr: Arc<AttributeManager>,
    init_serial: SerialNum,
    current_serial: SerialNum,
    config_serial: SerialNum,
    sub_db_name: String,
}

impl AttributePopulator {
    pub fn new(
        mgr: Arc<AttributeManager>,
        init_serial: SerialNum,
        sub_db_name: impl Into<String>,
        config_serial: SerialNum,
    ) -> Self {
        let sub_db_name = sub_db_name.into();
        let names: Vec<String> = mgr
            .attribute_names()
            .iter()
            .map(|n| format!("{}.attribute.{}", sub_db_name, n))
            .collect();
        info!(attributes = ?names, "populating attributes");
        AttributePopulator {
            writer: AttributeWriter::new(Arc::clone(&mgr) as Arc<dyn crate::writer::attribute_writer::WriterBackend>),
            mgr,
            init_serial,
            current_serial: init_serial,
            config_serial,
            sub_db_name,
        }
    }

    fn next_serial(&mut self) -> Result<SerialNum> {
        if self.current_serial >= self.config_serial {
            return Err(Error::new(
                ErrorKind::InvalidState,
                format!(
                    "populator serial space exhausted ({} >= {})",
                    self.current_serial, self.config_serial
                ),
            ));
        }
        self.current_serial += 1;
        Ok(self.current_serial)
    }

    /// Feeds one existing document; blocks until its writes are committed.
    pub fn handle_existing(&mut self, lid: Lid, doc: Arc<Document>) -> Result<()> {
        let serial = self.next_serial()?;
        let gate = Gate::new();
        self.writer.put(serial, doc, lid, gate.callback());
        gate.await_done();
        let commit_gate = Gate::new();
        self.writer.force_commit(serial, commit_gate.callback());
        commit_gate.await_done();
        Ok(())
    }

    /// Final pass: every flush target runs exactly once so each snapshot's
    /// flushed serial equals the config serial.
    pub fn done(self) -> Result<()> {
        let operations = self.current_serial - self.init_serial;
        for target in self.mgr.flush_targets() {
            debug_assert!(target.flushed_serial_num() < self.config_serial);
            if let Some(task) = target.init_flush(self.config_serial) {
                task.run();
            }
        }
        info!(
            sub_db = %self.sub_db_name,
            operations,
            config_serial = self.config_serial,
            "attribute population complete"
        );
        Ok(())
    }
}
