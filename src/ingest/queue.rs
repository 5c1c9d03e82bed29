//! Blocking work queue shared by the import workers.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use super::ImportTask;

struct Inner {
    tasks: VecDeque<ImportTask>,
    closed: bool,
}

/// Multi-producer, multi-consumer queue. `pop` blocks until a task is
/// available or the queue is closed and drained.
pub struct TaskQueue {
    inner: Mutex<Inner>,
    ready: Condvar,
}

impl TaskQueue {
    pub fn new() -> Self {
        TaskQueue {
            inner: Mutex::new(Inner {
                tasks: VecDeque::new(),
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    pub fn push(&self, task: ImportTask) {
        let mut inner = lock_clean(&self.inner);
        inner.tasks.push_back(task);
        drop(inner);
        self.ready.notify_one();
    }

    /// Signal that no more tasks will arrive. Wakes all blocked consumers.
    pub fn close(&self) {
        let mut inner = lock_clean(&self.inner);
        inner.closed = true;
        drop(inner);
        self.ready.notify_all();
    }

    /// Take the next task, blocking while the queue is open and empty.
    /// Returns `None` once the queue is closed and fully drained.
    pub fn pop(&self) -> Option<ImportTask> {
        let mut inner = lock_clean(&self.inner);
        loop {
            if let Some(task) = inner.tasks.pop_front() {
                return Some(task);
            }
            if inner.closed {
                return None;
            }
            inner = match self.ready.wait(inner) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

fn lock_clean(mutex: &Mutex<Inner>) -> std::sync::MutexGuard<'_, Inner> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
