//! Replicated status edits.
//!
//! A [`StatusEdit`] is the unit of replication: a typed record describing a
//! single atomic mutation of broker status. The leader serializes edits into
//! the log, which assigns each a [`SequenceNumber`]; every replica applies
//! the same edits in the same order and converges to identical state.
//!
//! Edit kinds:
//! - [`AddTask`](StatusEdit::AddTask) - client submission accepted
//! - [`AssignTaskToWorker`](StatusEdit::AssignTaskToWorker) - task dispatched
//! - [`TaskStatusChange`](StatusEdit::TaskStatusChange) - outcome, retry, or expiry
//! - [`WorkerConnected`](StatusEdit::WorkerConnected) - worker announced itself
//! - [`WorkerDisconnected`](StatusEdit::WorkerDisconnected) - transport lost
//! - [`WorkerDied`](StatusEdit::WorkerDied) - worker declared dead

use serde::{Deserialize, Serialize};

use crate::{TaskId, TaskStatus, Timestamp};

/// A single atomic mutation of broker status, replicated through the log.
///
/// Every field that depends on the wall clock is stamped at construction
/// time on the leader and carried in the edit, so replay is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusEdit {
    /// Accept a new task in `Waiting` state.
    AddTask {
        task_id: TaskId,
        task_type: i32,
        user_id: String,
        parameter: String,
        max_attempts: u32,
        execution_deadline: Option<Timestamp>,
        /// Optional cluster-wide deduplication key.
        slot: Option<String>,
        created_at: Timestamp,
    },

    /// Dispatch a waiting task to a worker.
    AssignTaskToWorker {
        task_id: TaskId,
        worker_id: String,
        /// The dispatch count after this assignment.
        attempt: u32,
    },

    /// Move a task to a new status, recording its result.
    ///
    /// `worker_id`, when present, must match the task's assigned worker;
    /// a mismatch means the status machine and the log have diverged.
    TaskStatusChange {
        task_id: TaskId,
        worker_id: Option<String>,
        status: TaskStatus,
        result: Option<String>,
    },

    /// Record a worker connection (upserts the worker).
    WorkerConnected {
        worker_id: String,
        process_id: String,
        location: String,
        timestamp: Timestamp,
    },

    /// Record a worker disconnection (upserts the worker).
    WorkerDisconnected { worker_id: String, timestamp: Timestamp },

    /// Record a worker death (upserts the worker).
    WorkerDied { worker_id: String, timestamp: Timestamp },
}

impl StatusEdit {
    /// Returns the edit kind as a static name, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            StatusEdit::AddTask { .. } => "AddTask",
            StatusEdit::AssignTaskToWorker { .. } => "AssignTaskToWorker",
            StatusEdit::TaskStatusChange { .. } => "TaskStatusChange",
            StatusEdit::WorkerConnected { .. } => "WorkerConnected",
            StatusEdit::WorkerDisconnected { .. } => "WorkerDisconnected",
            StatusEdit::WorkerDied { .. } => "WorkerDied",
        }
    }

    /// Returns the slot name for a slot-bearing `AddTask`, if any.
    pub fn slot(&self) -> Option<&str> {
        match self {
            StatusEdit::AddTask { slot, .. } => slot.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_accessor_only_covers_add_task() {
        let add = StatusEdit::AddTask {
            task_id: TaskId::new(1),
            task_type: 1,
            user_id: "u".to_string(),
            parameter: "p".to_string(),
            max_attempts: 0,
            execution_deadline: None,
            slot: Some("backup".to_string()),
            created_at: Timestamp::new(1),
        };
        assert_eq!(add.slot(), Some("backup"));

        let change = StatusEdit::TaskStatusChange {
            task_id: TaskId::new(1),
            worker_id: None,
            status: TaskStatus::Finished,
            result: None,
        };
        assert_eq!(change.slot(), None);
    }

    #[test]
    fn edits_round_trip_through_json() {
        let edit = StatusEdit::WorkerConnected {
            worker_id: "w1".to_string(),
            process_id: "pid-9".to_string(),
            location: "10.0.0.4:7000".to_string(),
            timestamp: Timestamp::new(42),
        };

        let json = serde_json::to_string(&edit).expect("serialize");
        let back: StatusEdit = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, edit);
    }
}
