//! Checkpoint snapshots.
//!
//! A snapshot is a self-contained serialization of broker status at a
//! specific log sequence number. The log uses it as a truncation point;
//! recovery installs it verbatim and replays only the tail beyond it.

use serde::{Deserialize, Serialize};

use crate::{SequenceNumber, Task, TaskId, Worker};

/// Self-contained broker status at `last_sequence`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StatusSnapshot {
    /// Highest task id ever assigned at snapshot time.
    pub max_task_id: TaskId,
    /// Sequence number of the last edit reflected in this snapshot.
    pub last_sequence: SequenceNumber,
    pub tasks: Vec<Task>,
    pub workers: Vec<Worker>,
}

impl StatusSnapshot {
    /// Returns the snapshot of a broker that has never applied an edit.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns true if this snapshot carries no state at all.
    pub fn is_empty(&self) -> bool {
        self.last_sequence == SequenceNumber::ZERO
            && self.tasks.is_empty()
            && self.workers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{TaskStatus, Timestamp, WorkerStatus};

    #[test]
    fn empty_snapshot_is_empty() {
        assert!(StatusSnapshot::empty().is_empty());
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let snapshot = StatusSnapshot {
            max_task_id: TaskId::new(7),
            last_sequence: SequenceNumber::new(19),
            tasks: vec![Task {
                task_id: TaskId::new(7),
                task_type: 2,
                user_id: "u".to_string(),
                parameter: "p".to_string(),
                result: Some("ok".to_string()),
                created_at: Timestamp::new(1000),
                execution_deadline: None,
                max_attempts: 3,
                attempts: 1,
                worker_id: Some("w1".to_string()),
                slot: None,
                status: TaskStatus::Finished,
            }],
            workers: vec![Worker {
                worker_id: "w1".to_string(),
                location: "10.0.0.4:7000".to_string(),
                process_id: "pid-9".to_string(),
                last_connection_at: Timestamp::new(900),
                status: WorkerStatus::Connected,
            }],
        };

        let json = serde_json::to_string(&snapshot).expect("serialize");
        let back: StatusSnapshot = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, snapshot);
        assert!(!back.is_empty());
    }
}
