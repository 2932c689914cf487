//! The edit applier - deterministic state transition for each edit kind.
//!
//! The applier is a pure function of (pre-state, edit): no IO, no clocks,
//! no randomness. Every replica feeds it the same edits in the same log
//! order and reaches identical state.
//!
//! An `Err` from the applier is never environmental. It means the status
//! machine is inconsistent with the log and this replica has diverged;
//! the replication driver escalates it to a process abort. Benign no-ops
//! (a slot already reserved during replay, a redundant terminal
//! transition) apply cleanly.

use foreman_types::{SequenceNumber, StatusEdit, Task, TaskId, TaskStatus, Worker, WorkerStatus};

use crate::slots::SlotBoard;
use crate::store::StatusState;

/// Applies one edit to the state, under the store's write lock.
///
/// `seq` must be the next sequence in log order; `last_sequence` is
/// advanced before the edit is dispatched. Returns the created id for
/// `AddTask`, `None` for every other kind.
pub(crate) fn apply_edit(
    state: &mut StatusState,
    slots: &SlotBoard,
    seq: SequenceNumber,
    edit: &StatusEdit,
) -> Result<Option<TaskId>, ApplyError> {
    // Replay and follower streams deliver in strictly increasing order.
    // Concurrent leader appends may reach the write lock slightly out of
    // order; the log's sequence numbers, not this field, are what order
    // the replicated history.
    state.last_sequence = seq;

    match edit {
        StatusEdit::AddTask {
            task_id,
            task_type,
            user_id,
            parameter,
            max_attempts,
            execution_deadline,
            slot,
            created_at,
        } => {
            let task = Task {
                task_id: *task_id,
                task_type: *task_type,
                user_id: user_id.clone(),
                parameter: parameter.clone(),
                result: None,
                created_at: *created_at,
                execution_deadline: *execution_deadline,
                max_attempts: *max_attempts,
                attempts: 0,
                worker_id: None,
                slot: slot.clone(),
                status: TaskStatus::Waiting,
            };
            state.tasks.insert(*task_id, task);

            if *task_id > state.max_task_id {
                state.max_task_id = *task_id;
            }

            // Replay and follower apply re-establish the reservation here;
            // on the leader it is already held from the submission path.
            if let Some(slot) = slot {
                slots.assign(slot);
            }

            Ok(Some(*task_id))
        }

        StatusEdit::AssignTaskToWorker {
            task_id,
            worker_id,
            attempt,
        } => {
            let task = state.tasks.get_mut(task_id).ok_or(ApplyError::TaskNotFound {
                task_id: *task_id,
                kind: "AssignTaskToWorker",
            })?;

            task.status = TaskStatus::Running;
            task.worker_id = Some(worker_id.clone());
            task.attempts = *attempt;

            Ok(None)
        }

        StatusEdit::TaskStatusChange {
            task_id,
            worker_id,
            status,
            result,
        } => {
            let task = state.tasks.get_mut(task_id).ok_or(ApplyError::TaskNotFound {
                task_id: *task_id,
                kind: "TaskStatusChange",
            })?;

            if let Some(reported) = worker_id {
                if task.worker_id.as_deref() != Some(reported.as_str()) {
                    return Err(ApplyError::WorkerMismatch {
                        task_id: *task_id,
                        assigned: task.worker_id.clone(),
                        reported: reported.clone(),
                    });
                }
            }

            task.status = *status;
            task.result = result.clone();

            if status.is_terminal() {
                if let Some(slot) = &task.slot {
                    slots.release(slot);
                }
            }

            Ok(None)
        }

        StatusEdit::WorkerConnected {
            worker_id,
            process_id,
            location,
            timestamp,
        } => {
            let worker = upsert_worker(state, worker_id);
            worker.status = WorkerStatus::Connected;
            worker.location = location.clone();
            worker.process_id = process_id.clone();
            worker.last_connection_at = *timestamp;
            Ok(None)
        }

        StatusEdit::WorkerDisconnected { worker_id, .. } => {
            upsert_worker(state, worker_id).status = WorkerStatus::Disconnected;
            Ok(None)
        }

        StatusEdit::WorkerDied { worker_id, .. } => {
            upsert_worker(state, worker_id).status = WorkerStatus::Dead;
            Ok(None)
        }
    }
}

/// Looks up a worker, creating it lazily on first mention.
fn upsert_worker<'a>(state: &'a mut StatusState, worker_id: &str) -> &'a mut Worker {
    state
        .workers
        .entry(worker_id.to_string())
        .or_insert_with(|| Worker {
            worker_id: worker_id.to_string(),
            location: String::new(),
            process_id: String::new(),
            last_connection_at: foreman_types::Timestamp::new(0),
            status: WorkerStatus::Disconnected,
        })
}

/// Invariant violations detected while applying an edit.
///
/// Any of these means the replica's status machine no longer matches the
/// log. The only safe response in a long-lived replica is to stop; the
/// replication driver takes care of that.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ApplyError {
    #[error("{kind} references task {task_id}, which does not exist")]
    TaskNotFound { task_id: TaskId, kind: &'static str },

    #[error("task {task_id} is assigned to {assigned:?}, but {reported} reported its completion")]
    WorkerMismatch {
        task_id: TaskId,
        assigned: Option<String>,
        reported: String,
    },
}
