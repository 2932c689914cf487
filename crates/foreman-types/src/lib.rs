//! # foreman-types: Core types for Foreman
//!
//! This crate contains shared types used across the Foreman broker:
//! - Entity IDs ([`TaskId`], [`SequenceNumber`])
//! - Temporal types ([`Timestamp`])
//! - Status enums ([`TaskStatus`], [`WorkerStatus`])
//! - Broker records ([`Task`], [`Worker`])
//! - Replicated edits ([`StatusEdit`])
//! - Checkpoint snapshots ([`StatusSnapshot`])

use std::fmt::Display;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

mod edit;
mod snapshot;

pub use edit::StatusEdit;
pub use snapshot::StatusSnapshot;

// ============================================================================
// Entity IDs - All Copy (cheap 8-byte values)
// ============================================================================

/// Unique identifier for a task within a broker cluster.
///
/// Task ids are minted monotonically by the leader and never reused within
/// a cluster lifetime. The id `0` is never assigned to a real task.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct TaskId(u64);

impl TaskId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the id as a `u64`.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TaskId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<TaskId> for u64 {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

/// Position of an edit in the replicated status log.
///
/// Sequence numbers are issued by the log, are strictly increasing, and are
/// opaque to the status machine beyond their total order. `ZERO` means
/// "nothing applied yet" and is never assigned to a persisted edit.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    pub const ZERO: SequenceNumber = SequenceNumber(0);

    pub fn new(seq: u64) -> Self {
        Self(seq)
    }

    /// Returns the sequence number as a `u64`.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Display for SequenceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SequenceNumber {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<SequenceNumber> for u64 {
    fn from(seq: SequenceNumber) -> Self {
        seq.0
    }
}

// ============================================================================
// Timestamps
// ============================================================================

/// A wall-clock instant in milliseconds since the Unix epoch.
///
/// Timestamps enter the system only at edit-construction time on the leader
/// and are carried inside the edit itself, so replay on any replica observes
/// the same values. The edit applier never reads the clock.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Timestamp(u64);

impl Timestamp {
    pub fn new(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the current wall-clock time.
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since the epoch.
    pub fn as_millis(self) -> u64 {
        self.0
    }

    /// Returns true if this instant lies strictly before `other`.
    pub fn is_before(self, other: Timestamp) -> bool {
        self.0 < other.0
    }

    /// Returns this timestamp moved `millis` into the past, saturating at zero.
    pub fn minus_millis(self, millis: u64) -> Self {
        Self(self.0.saturating_sub(millis))
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Timestamp {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Timestamp> for u64 {
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}

// ============================================================================
// Status Enums
// ============================================================================

/// Lifecycle state of a task.
///
/// Clients see tasks by numeric code, so the codes are part of the wire
/// contract and must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Submitted, not yet dispatched (or re-queued for retry).
    Waiting,
    /// Dispatched to a worker.
    Running,
    /// Terminal: completed successfully.
    Finished,
    /// Terminal: failed, attempt budget exhausted or deadline passed.
    Error,
}

impl TaskStatus {
    /// Returns the stable numeric code exposed to clients.
    pub fn code(self) -> u8 {
        match self {
            TaskStatus::Waiting => 0,
            TaskStatus::Running => 1,
            TaskStatus::Finished => 2,
            TaskStatus::Error => 3,
        }
    }

    /// Resolves a numeric code back to a status.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(TaskStatus::Waiting),
            1 => Some(TaskStatus::Running),
            2 => Some(TaskStatus::Finished),
            3 => Some(TaskStatus::Error),
            _ => None,
        }
    }

    /// Returns true for `Finished` and `Error`.
    ///
    /// A terminal task never runs again; the retry path re-queues from
    /// `Running` to `Waiting`, never out of a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Finished | TaskStatus::Error)
    }
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Connection state of a worker node as last reported to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkerStatus {
    Connected,
    Disconnected,
    Dead,
}

impl WorkerStatus {
    /// Returns the stable numeric code exposed to clients.
    pub fn code(self) -> u8 {
        match self {
            WorkerStatus::Connected => 0,
            WorkerStatus::Disconnected => 1,
            WorkerStatus::Dead => 2,
        }
    }

    /// Resolves a numeric code back to a status.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(WorkerStatus::Connected),
            1 => Some(WorkerStatus::Disconnected),
            2 => Some(WorkerStatus::Dead),
            _ => None,
        }
    }

    /// Renders a numeric worker-status code for clients.
    ///
    /// Unknown codes render as `?<n>` rather than failing, so a newer
    /// broker talking to an older client degrades gracefully.
    pub fn label(code: u8) -> String {
        match Self::from_code(code) {
            Some(status) => status.to_string(),
            None => format!("?{code}"),
        }
    }
}

impl Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WorkerStatus::Connected => "CONNECTED",
            WorkerStatus::Disconnected => "DISCONNECTED",
            WorkerStatus::Dead => "DEAD",
        };
        write!(f, "{name}")
    }
}

// ============================================================================
// Broker Records
// ============================================================================

/// A unit of work tracked by the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    /// Routing key for the ready-queue (matched against worker groups).
    pub task_type: i32,
    /// Secondary routing key.
    pub user_id: String,
    /// Opaque payload handed to the executing worker.
    pub parameter: String,
    /// Opaque outcome, set on status transitions.
    pub result: Option<String>,
    pub created_at: Timestamp,
    /// Instant after which the task may no longer be dispatched.
    /// `None` means no deadline.
    pub execution_deadline: Option<Timestamp>,
    /// Dispatch budget; `0` means unlimited.
    pub max_attempts: u32,
    /// Number of dispatches so far.
    pub attempts: u32,
    /// Worker currently (or last) responsible for the task.
    pub worker_id: Option<String>,
    /// Optional cluster-wide deduplication key.
    pub slot: Option<String>,
    pub status: TaskStatus,
}

impl Task {
    /// Returns true if the execution deadline has passed at `now`.
    pub fn deadline_expired(&self, now: Timestamp) -> bool {
        self.execution_deadline
            .is_some_and(|deadline| deadline.is_before(now))
    }
}

/// A known execution node.
///
/// Workers are created lazily on the first edit that mentions them and are
/// never removed from the status map for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    pub worker_id: String,
    /// Transport-level address, as last announced.
    pub location: String,
    pub process_id: String,
    pub last_connection_at: Timestamp,
    pub status: WorkerStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0, Some(TaskStatus::Waiting))]
    #[test_case(1, Some(TaskStatus::Running))]
    #[test_case(2, Some(TaskStatus::Finished))]
    #[test_case(3, Some(TaskStatus::Error))]
    #[test_case(4, None)]
    #[test_case(255, None)]
    fn task_status_codes_round_trip(code: u8, expected: Option<TaskStatus>) {
        assert_eq!(TaskStatus::from_code(code), expected);
        if let Some(status) = expected {
            assert_eq!(status.code(), code);
        }
    }

    #[test]
    fn terminal_statuses() {
        assert!(!TaskStatus::Waiting.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Finished.is_terminal());
        assert!(TaskStatus::Error.is_terminal());
    }

    #[test_case(0, "CONNECTED")]
    #[test_case(1, "DISCONNECTED")]
    #[test_case(2, "DEAD")]
    #[test_case(7, "?7")]
    fn worker_status_labels(code: u8, expected: &str) {
        assert_eq!(WorkerStatus::label(code), expected);
    }

    #[test]
    fn deadline_expiry_is_strict() {
        let task = Task {
            task_id: TaskId::new(1),
            task_type: 1,
            user_id: "u".to_string(),
            parameter: String::new(),
            result: None,
            created_at: Timestamp::new(0),
            execution_deadline: Some(Timestamp::new(100)),
            max_attempts: 0,
            attempts: 0,
            worker_id: None,
            slot: None,
            status: TaskStatus::Waiting,
        };

        assert!(!task.deadline_expired(Timestamp::new(99)));
        assert!(!task.deadline_expired(Timestamp::new(100)));
        assert!(task.deadline_expired(Timestamp::new(101)));
    }

    #[test]
    fn no_deadline_never_expires() {
        let task = Task {
            task_id: TaskId::new(1),
            task_type: 1,
            user_id: "u".to_string(),
            parameter: String::new(),
            result: None,
            created_at: Timestamp::new(0),
            execution_deadline: None,
            max_attempts: 0,
            attempts: 0,
            worker_id: None,
            slot: None,
            status: TaskStatus::Waiting,
        };

        assert!(!task.deadline_expired(Timestamp::new(u64::MAX)));
    }

    #[test]
    fn timestamp_minus_millis_saturates() {
        assert_eq!(Timestamp::new(50).minus_millis(100), Timestamp::new(0));
        assert_eq!(Timestamp::new(500).minus_millis(100), Timestamp::new(400));
    }
}
