//! Broker error types.

use foreman_log::LogError;
use foreman_status::ApplyError;
use foreman_types::{TaskId, TaskStatus};

/// Errors surfaced by the broker's public operations.
#[derive(thiserror::Error, Debug)]
pub enum BrokerError {
    /// The status log cannot accept writes right now. Submissions fail
    /// upward; slot pre-reservations have already been undone.
    #[error(transparent)]
    Log(#[from] LogError),

    /// The status machine is inconsistent with the log. The replica must
    /// stop: continuing would diverge from the rest of the cluster. The
    /// long-lived broker threads abort the process on this; embedders
    /// driving the broker directly must treat it the same way.
    #[error("replica diverged from the log: {0}")]
    Diverged(#[from] ApplyError),

    #[error("task {task_id} not found")]
    TaskNotFound { task_id: TaskId },

    /// `task_finished` only accepts terminal outcomes from workers.
    #[error("task {task_id} cannot finish with non-final status {status:?}")]
    IllegalFinalStatus { task_id: TaskId, status: TaskStatus },
}
