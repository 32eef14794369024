use chrono::{DateTime, Utc};
use crossbeam::channel::bounded;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

use crate::attribute::{AttributeVector, CommitParam};
use crate::core::config::BasicType;
use crate::core::types::SerialNum;
use crate::flush::target::{FlushComponent, FlushTarget, FlushTask, FlushType};
use crate::storage::directory::AttributeDirectory;
use crate::storage::save::{SnapshotData, write_snapshot_file};
use crate::writer::executor::SequencedTaskExecutor;

/// Replaying into an hnsw-indexed tensor is far more expensive than reading
/// from the transaction log, so its flushes are prioritized after restarts.
const HNSW_REPLAY_COST: f64 = 400.0;

/// The per-attribute SYNC flush target: writes a consistent snapshot to
/// disk under the directory writer guard, updating the snapshot registry
/// atomically. Holds the directory strongly and the vector weakly so a
/// removed attribute can finish target teardown without extending the
/// vector's lifetime.
pub struct FlushableAttribute {
    target_name: String,
    attr: Weak<dyn AttributeVector>,
    attr_dir: Arc<AttributeDirectory>,
    executor: Arc<SequencedTaskExecutor>,
    replay_cost: f64,
}

impl FlushableAttribute {
    pub fn new(
        attr: &Arc<dyn AttributeVector>,
        attr_dir: Arc<AttributeDirectory>,
        executor: Arc<SequencedTaskExecutor>,
    ) -> Self {
        let config = attr.config();
        let replay_cost = if config.basic_type == BasicType::Tensor && config.hnsw.is_some() {
            HNSW_REPLAY_COST
        } else {
            1.0
        };
        FlushableAttribute {
            target_name: format!("attribute.flush.{}", attr.name()),
            attr: Arc::downgrade(attr),
            attr_dir,
            executor,
            replay_cost,
        }
    }

    /// Runs on the vector's lane while the caller waits: commits at the
    /// sync token and captures the snapshot payload.
    fn internal_init_flush(
        attr: &Arc<dyn AttributeVector>,
        attr_dir: &Arc<AttributeDirectory>,
        current_serial: SerialNum,
    ) -> Option<Flusher> {
        attr.reclaim_unused_memory();
        let sync_token = current_serial.max(attr.last_serial());
        let writer = attr_dir.try_get_writer()?;
        if sync_token <= attr_dir.flushed_serial_num() {
            debug!(
                attribute = attr.name(),
                sync_token, "nothing to flush; refreshing last flush time"
            );
            writer.set_last_flush_time(Utc::now());
            return None;
        }
        attr.commit(CommitParam::new(sync_token));
        let snapshot = match attr.save_snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(attribute = attr.name(), error = %e, "could not serialize attribute for flush");
                return None;
            }
        };
        drop(writer);
        Some(Flusher {
            attr_dir: Arc::clone(attr_dir),
            snapshot,
            sync_token,
        })
    }
}

impl FlushTarget for FlushableAttribute {
    fn name(&self) -> &str {
        &self.target_name
    }

    fn flush_type(&self) -> FlushType {
        FlushType::Sync
    }

    fn component(&self) -> FlushComponent {
        FlushComponent::Attribute
    }

    fn flushed_serial_num(&self) -> SerialNum {
        self.attr_dir.flushed_serial_num()
    }

    fn last_flush_time(&self) -> Option<DateTime<Utc>> {
        self.attr_dir.last_flush_time()
    }

    fn memory_gain(&self) -> u64 {
        self.attr.upgrade().map(|a| a.memory_used() as u64).unwrap_or(0)
    }

    fn approx_bytes_to_write(&self) -> u64 {
        self.attr.upgrade().map(|a| a.estimated_save_bytes()).unwrap_or(0)
    }

    fn replay_operation_cost(&self) -> f64 {
        self.replay_cost
    }

    fn init_flush(&self, current_serial: SerialNum) -> Option<Box<dyn FlushTask>> {
        let attr = self.attr.upgrade()?;
        let attr_dir = Arc::clone(&self.attr_dir);
        let executor_id = self.executor.executor_id_from_name(attr.name_prefix());
        let (sender, receiver) = bounded(1);
        self.executor.execute_fn(executor_id, move || {
            let _ = sender.send(FlushableAttribute::internal_init_flush(
                &attr,
                &attr_dir,
                current_serial,
            ));
        });
        receiver
            .recv()
            .ok()
            .flatten()
            .map(|flusher| Box::new(flusher) as Box<dyn FlushTask>)
    }
}

/// Task performing the actual write to disk.
struct Flusher {
    attr_dir: Arc<AttributeDirectory>,
    snapshot: SnapshotData,
    sync_token: SerialNum,
}

impl FlushTask for Flusher {
    fn flush_serial(&self) -> SerialNum {
        self.sync_token
    }

    fn run(self: Box<Self>) {
        let Some(writer) = self.attr_dir.try_get_writer() else {
            return;
        };
        if self.sync_token <= writer.flushed_serial_num() {
            // another flusher produced an equal or better snapshot
            return;
        }
        if let Err(e) = writer.create_invalid_snapshot(self.sync_token) {
            warn!(serial = self.sync_token, error = %e, "could not create snapshot directory");
            return;
        }
        let file = writer.attribute_file_path(self.sync_token);
        if let Err(e) = write_snapshot_file(&file, &self.snapshot) {
            warn!(file = %file.display(), error = %e, "could not write attribute snapshot");
            let _ = writer.remove_invalid_snapshots();
            return;
        }
        if let Err(e) = writer.mark_valid_snapshot(self.sync_token) {
            warn!(serial = self.sync_token, error = %e, "could not validate attribute snapshot");
            let _ = writer.remove_invalid_snapshots();
            return;
        }
        writer.set_last_flush_time(Utc::now());
        writer.invalidate_snapshots_older_than_best();
        if let Err(e) = writer.remove_invalid_snapshots() {
            warn!(error = %e, "could not prune old snapshots");
        }
    }
}
