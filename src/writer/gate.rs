use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

/// Countdown-of-one synchronization point: `await_done` blocks until some
/// completion token opens the gate.
pub struct Gate {
    inner: Arc<GateInner>,
}

struct GateInner {
    done: Mutex<bool>,
    cv: Condvar,
}

impl Gate {
    pub fn new() -> Self {
        Gate {
            inner: Arc::new(GateInner { done: Mutex::new(false), cv: Condvar::new() }),
        }
    }

    /// A completion token that opens the gate when its last clone drops.
    pub fn callback(&self) -> OnDone {
        let inner = Arc::clone(&self.inner);
        on_done(move || {
            *inner.done.lock() = true;
            inner.cv.notify_all();
        })
    }

    pub fn await_done(&self) {
        let mut done = self.inner.done.lock();
        while !*done {
            self.inner.cv.wait(&mut done);
        }
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

/// Completion tracking in destructor style: clone the token into every task
/// of an operation; the closure fires when the final clone is dropped, i.e.
/// when every task has finished (or been abandoned).
pub type OnDone = Arc<DestructorCallback>;

pub struct DestructorCallback {
    callback: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Drop for DestructorCallback {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.lock().take() {
            callback();
        }
    }
}

pub fn on_done(callback: impl FnOnce() + Send + 'static) -> OnDone {
    Arc::new(DestructorCallback { callback: Mutex::new(Some(Box::new(callback))) })
}

/// A token that does nothing on completion.
pub fn noop_done() -> OnDone {
    Arc::new(DestructorCallback { callback: Mutex::new(None) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn fires_when_last_clone_drops() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let token = on_done(move || flag.store(true, Ordering::SeqCst));
        let clone = Arc::clone(&token);
        drop(token);
        assert!(!fired.load(Ordering::SeqCst));
        drop(clone);
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn gate_opens_from_another_thread() {
        let gate = Gate::new();
        let token = gate.callback();
        let handle = std::thread::spawn(move || {
            drop(token);
        });
        gate.await_done();
        handle.join().unwrap();
    }
}
