//! The ready-queue seam.
//!
//! Which waiting task goes to which requesting worker is not this crate's
//! decision: the broker talks to an external ready-queue through the
//! [`TaskHeap`] trait and re-validates everything it hands back against
//! the status store (heap contents may lag behind status in both
//! directions).
//!
//! [`ReadyQueue`] is the reference implementation: FIFO per routing group,
//! no fairness policy beyond arrival order.

use std::collections::VecDeque;
use std::sync::Mutex;

use foreman_types::TaskId;

/// External ready-queue holding ids of waiting tasks.
///
/// Implementations must be safe for concurrent use; the broker calls in
/// from submission, assignment, retry, and purge paths simultaneously.
pub trait TaskHeap: Send + Sync {
    /// Offers a waiting task for dispatch.
    fn insert(&self, task_id: TaskId, task_type: i32, user_id: &str);

    /// Removes and returns up to `max.min(available_space)` candidate ids
    /// whose task type is in `groups` (an empty `groups` matches all).
    fn poll(&self, max: usize, available_space: usize, groups: &[i32]) -> Vec<TaskId>;

    /// Drops a task from the queue, if present.
    fn remove(&self, task_id: TaskId);

    /// Number of queued candidates.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
struct ReadyEntry {
    task_id: TaskId,
    task_type: i32,
    #[allow(dead_code)]
    user_id: String,
}

/// FIFO ready-queue, one arrival order across all groups.
#[derive(Debug, Default)]
pub struct ReadyQueue {
    entries: Mutex<VecDeque<ReadyEntry>>,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskHeap for ReadyQueue {
    fn insert(&self, task_id: TaskId, task_type: i32, user_id: &str) {
        self.entries
            .lock()
            .expect("ready queue lock poisoned")
            .push_back(ReadyEntry {
                task_id,
                task_type,
                user_id: user_id.to_string(),
            });
    }

    fn poll(&self, max: usize, available_space: usize, groups: &[i32]) -> Vec<TaskId> {
        let limit = max.min(available_space);
        let mut picked = Vec::new();
        if limit == 0 {
            return picked;
        }

        self.entries
            .lock()
            .expect("ready queue lock poisoned")
            .retain(|entry| {
                let wanted = groups.is_empty() || groups.contains(&entry.task_type);
                if wanted && picked.len() < limit {
                    picked.push(entry.task_id);
                    false
                } else {
                    true
                }
            });
        picked
    }

    fn remove(&self, task_id: TaskId) {
        self.entries
            .lock()
            .expect("ready queue lock poisoned")
            .retain(|entry| entry.task_id != task_id);
    }

    fn len(&self) -> usize {
        self.entries.lock().expect("ready queue lock poisoned").len()
    }
}
