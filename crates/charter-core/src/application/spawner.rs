//! Dispatch seam for chained work
//!
//! Chained next-stage initiation must never block the caller of
//! `apply_completion`. In production it is detached onto the runtime; in the
//! simulation and in tests it is queued and drained explicitly so time can be
//! advanced deterministically instead of racing real timers.

use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Spawns detached units of work
pub trait TaskSpawner: Send + Sync {
    /// Dispatch a task; must not block the caller
    fn spawn(&self, task: BoxFuture<'static, ()>);
}

/// Production spawner: detaches onto the tokio runtime
pub struct TokioSpawner;

impl TaskSpawner for TokioSpawner {
    fn spawn(&self, task: BoxFuture<'static, ()>) {
        tokio::spawn(task);
    }
}

/// Deterministic spawner: queues tasks until `drain` is called
///
/// Used by the simulation engine so each tick runs queued chain work to
/// completion before the next tick observes state.
pub struct QueueSpawner {
    queue: Mutex<VecDeque<BoxFuture<'static, ()>>>,
}

impl QueueSpawner {
    /// Create an empty queue spawner
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Run all queued tasks to completion, in dispatch order.
    /// Tasks spawned while draining are drained too.
    pub async fn drain(&self) {
        loop {
            let task = {
                let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
                queue.pop_front()
            };
            match task {
                Some(task) => task.await,
                None => break,
            }
        }
    }

    /// Number of tasks waiting
    pub fn pending(&self) -> usize {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Default for QueueSpawner {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskSpawner for QueueSpawner {
    fn spawn(&self, task: BoxFuture<'static, ()>) {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(task);
    }
}
