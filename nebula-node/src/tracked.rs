//! Tracked background tasks
//!
//! Long-running background work (dataset prefetch, retrieval producers) is
//! collected in a set so that shutdown can cancel it deterministically.

use parking_lot::Mutex;
use std::future::Future;
use tokio::task::JoinHandle;

/// A set of abortable background tasks.
pub struct TaskSet {
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskSet {
    pub fn new() -> Self {
        Self {
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn and track a task. Finished handles are pruned on the way in.
    pub fn spawn(&self, fut: impl Future<Output = ()> + Send + 'static) {
        let mut handles = self.handles.lock();
        handles.retain(|h| !h.is_finished());
        handles.push(tokio::spawn(fut));
    }

    /// Abort every tracked task.
    pub fn abort_all(&self) {
        let mut handles = self.handles.lock();
        for handle in handles.drain(..) {
            handle.abort();
        }
    }

    /// Number of tasks still running.
    pub fn active(&self) -> usize {
        self.handles.lock().iter().filter(|h| !h.is_finished()).count()
    }
}

impl Default for TaskSet {
    fn default() -> Self {
        Self::new()
    }
}
