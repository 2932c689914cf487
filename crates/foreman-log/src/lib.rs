//! # foreman-log: Status log abstraction for Foreman
//!
//! The status log is the single source of truth for edit ordering. The
//! broker core consumes it through the [`StatusLog`] trait: the leader
//! appends edits and receives their sequence numbers, followers tail the
//! stream, recovery replays the tail past a snapshot, and checkpoints give
//! the log a truncation point.
//!
//! Leader election itself lives inside the log implementation; the core
//! only observes roles through [`StatusLog::is_leader`] and friends.
//!
//! [`MemoryLog`] is the in-process implementation used by tests and
//! single-node development.

use foreman_types::{SequenceNumber, StatusEdit, StatusSnapshot};

mod memory;

pub use memory::MemoryLog;

/// Callback receiving replayed or tailed edits, in sequence order.
///
/// Returning an error stops the stream and surfaces the error to the
/// caller of [`StatusLog::follow_the_leader`] / [`StatusLog::recovery`].
pub type EditSink<'a> = &'a mut dyn FnMut(SequenceNumber, StatusEdit) -> Result<(), LogError>;

/// An ordered, durable stream of status edits with snapshot support.
///
/// # Ordering contract
///
/// The broker appends *outside* its status write lock and relies entirely
/// on the log for ordering. Every implementation must linearize concurrent
/// [`log_status_edit`](StatusLog::log_status_edit) calls and hand out
/// strictly increasing sequence numbers; edits must be made visible to
/// followers and replay in exactly that order.
pub trait StatusLog: Send + Sync {
    /// Durably appends `edit` and returns its assigned sequence number.
    ///
    /// Fails with [`LogError::Unavailable`] if the edit cannot be durably
    /// accepted (IO error, loss of leadership, quorum loss).
    fn log_status_edit(&self, edit: &StatusEdit) -> Result<SequenceNumber, LogError>;

    /// Streams edits with sequence greater than `from` to `apply`,
    /// blocking at the tail.
    ///
    /// Returns `Ok(())` when this replica acquires leadership or the log
    /// is closed.
    fn follow_the_leader(&self, from: SequenceNumber, apply: EditSink<'_>) -> Result<(), LogError>;

    /// Replays the durable tail with sequence greater than `from`,
    /// returning when it is exhausted.
    fn recovery(&self, from: SequenceNumber, apply: EditSink<'_>) -> Result<(), LogError>;

    /// Arms the leader append path. Only valid once elected.
    fn start_writing(&self) -> Result<(), LogError>;

    /// Returns the newest durable snapshot, or an empty one.
    fn load_snapshot(&self) -> Result<StatusSnapshot, LogError>;

    /// Atomically records `snapshot` as the new truncation point.
    fn checkpoint(&self, snapshot: &StatusSnapshot) -> Result<(), LogError>;

    /// True once this replica has been elected leader.
    fn is_leader(&self) -> bool;

    /// True when the leader append path is armed.
    fn is_writable(&self) -> bool;

    /// True once the log has been closed.
    fn is_closed(&self) -> bool;

    /// Closes the log, unblocking any follower.
    fn close(&self);
}

/// Errors surfaced by a status log.
#[derive(thiserror::Error, Debug)]
pub enum LogError {
    /// The log cannot durably accept writes right now: IO failure, loss
    /// of leadership, or quorum loss.
    #[error("status log unavailable: {reason}")]
    Unavailable { reason: String },

    /// A persisted entry could not be decoded.
    #[error("log entry {sequence} is corrupt: {reason}")]
    Corrupt {
        sequence: SequenceNumber,
        reason: String,
    },

    /// The apply callback rejected an entry; the stream stops there.
    #[error("apply rejected log entry {sequence}: {reason}")]
    ApplyRejected {
        sequence: SequenceNumber,
        reason: String,
    },
}

impl LogError {
    /// Shorthand for [`LogError::Unavailable`].
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }
}
