use crossbeam::channel::{Receiver, Sender, bounded};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::thread::JoinHandle;

use crate::core::config::ThreadingConfig;
use crate::writer::gate::Gate;

pub type Task = Box<dyn FnOnce() + Send>;

/// Identifies one single-threaded lane of the field-writer executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExecutorId(pub usize);

struct Lane {
    sender: Sender<Task>,
    handle: Option<JoinHandle<()>>,
}

/// The field-writer executor: N lanes, each a dedicated worker thread
/// consuming a bounded queue. A vector is permanently assigned to one lane
/// by hashing its name prefix, which is what serializes all writes to it.
/// Bounded queues provide backpressure toward the master thread.
pub struct SequencedTaskExecutor {
    lanes: Vec<Lane>,
}

fn lane_worker(receiver: Receiver<Task>) {
    while let Ok(task) = receiver.recv() {
        task();
    }
}

impl SequencedTaskExecutor {
    pub fn new(num_lanes: usize, task_limit: usize) -> Self {
        let num_lanes = num_lanes.max(1);
        let task_limit = task_limit.max(1);
        let lanes = (0..num_lanes)
            .map(|i| {
                let (sender, receiver) = bounded::<Task>(task_limit);
                let handle = std::thread::Builder::new()
                    .name(format!("field-writer-{}", i))
                    .spawn(move || lane_worker(receiver))
                    .expect("spawn field writer lane");
                Lane { sender, handle: Some(handle) }
            })
            .collect();
        SequencedTaskExecutor { lanes }
    }

    pub fn from_config(config: &ThreadingConfig) -> Self {
        Self::new(config.num_field_writer_lanes(), config.task_limit())
    }

    pub fn num_lanes(&self) -> usize {
        self.lanes.len()
    }

    /// Stable lane assignment from an attribute's name prefix.
    pub fn executor_id_from_name(&self, name_prefix: &str) -> ExecutorId {
        let mut hasher = DefaultHasher::new();
        name_prefix.hash(&mut hasher);
        ExecutorId(hasher.finish() as usize % self.lanes.len())
    }

    /// Enqueues a task on one lane; blocks when the lane is at its task
    /// limit (backpressure).
    pub fn execute(&self, id: ExecutorId, task: Task) {
        let _ = self.lanes[id.0].sender.send(task);
    }

    pub fn execute_fn(&self, id: ExecutorId, f: impl FnOnce() + Send + 'static) {
        self.execute(id, Box::new(f));
    }

    /// Releases lanes idling in a commit-coalescing window. Workers here
    /// block on their queue, so delivery is immediate; the hook is kept for
    /// the writer's commit contract.
    pub fn wakeup(&self) {}

    /// Blocks until every task submitted before this call has run.
    pub fn sync_all(&self) {
        let gate = Gate::new();
        {
            let token = gate.callback();
            for lane in &self.lanes {
                let token = token.clone();
                let _ = lane.sender.send(Box::new(move || {
                    let _ = &token;
                }));
            }
        }
        gate.await_done();
    }
}

impl Drop for SequencedTaskExecutor {
    fn drop(&mut self) {
        for lane in &mut self.lanes {
            // Closing the channel lets the worker drain and exit
            let (empty_sender, _) = bounded::<Task>(1);
            let old = std::mem::replace(&mut lane.sender, empty_sender);
            drop(old);
        }
        for lane in &mut self.lanes {
            if let Some(handle) = lane.handle.take() {
                let _ = handle.join();
            }
        }
    }
}

/// Shared compute pool for CPU-heavy prepare tasks and attribute loads.
pub struct SharedExecutor {
    pool: rayon::ThreadPool,
}

impl SharedExecutor {
    pub fn new(num_threads: usize) -> Self {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads.max(1))
            .thread_name(|i| format!("shared-compute-{}", i))
            .build()
            .expect("build shared compute pool");
        SharedExecutor { pool }
    }

    pub fn execute(&self, task: impl FnOnce() + Send + 'static) {
        self.pool.spawn(task);
    }
}

impl Default for SharedExecutor {
    fn default() -> Self {
        Self::new(num_cpus::get().max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn tasks_on_one_lane_run_in_submission_order() {
        let executor = SequencedTaskExecutor::new(2, 100);
        let id = executor.executor_id_from_name("field");
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for i in 0..100 {
            let seen = Arc::clone(&seen);
            executor.execute_fn(id, move || seen.lock().push(i));
        }
        executor.sync_all();
        let seen = seen.lock();
        assert_eq!(*seen, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn lane_assignment_is_stable() {
        let executor = SequencedTaskExecutor::new(4, 10);
        let a = executor.executor_id_from_name("title");
        let b = executor.executor_id_from_name("title");
        assert_eq!(a, b);
    }

    #[test]
    fn sync_all_waits_for_every_lane() {
        let executor = SequencedTaskExecutor::new(3, 10);
        let count = Arc::new(AtomicUsize::new(0));
        for lane in 0..3 {
            let count = Arc::clone(&count);
            executor.execute_fn(ExecutorId(lane), move || {
                std::thread::sleep(std::time::Duration::from_millis(10));
                count.fetch_add(1, Ordering::SeqCst);
            });
        }
        executor.sync_all();
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn shared_executor_runs_tasks() {
        let executor = SharedExecutor::new(2);
        let gate = crate::writer::gate::Gate::new();
        let token = gate.callback();
        executor.execute(move || {
            let _ = &token;
        });
        gate.await_done();
    }
}
