//! Task lifecycle controller.
//!
//! The broker is the surface the rest of the system calls: task
//! submission, dispatch to workers, completion and retry, worker state
//! transitions, and the background purge and checkpoint passes. Every
//! mutation is expressed as a [`StatusEdit`] and funneled through the
//! replication driver; nothing here touches the status maps directly.

use std::sync::Arc;

use foreman_log::StatusLog;
use foreman_status::{PurgeSweep, StatusStore};
use foreman_types::{StatusEdit, TaskId, TaskStatus, Timestamp};

use crate::config::BrokerConfig;
use crate::error::BrokerError;
use crate::heap::TaskHeap;
use crate::replication::Replicator;

/// Result string recorded when a task's execution deadline passes.
const DEADLINE_EXPIRED: &str = "deadline_expired";

/// A client's task submission.
#[derive(Debug, Clone)]
pub struct TaskSubmission {
    /// Routing key matched against worker groups.
    pub task_type: i32,
    pub user_id: String,
    /// Opaque payload handed to the executing worker.
    pub parameter: String,
    /// Dispatch budget; `0` means unlimited.
    pub max_attempts: u32,
    /// `None` means no deadline.
    pub execution_deadline: Option<Timestamp>,
    /// Optional cluster-wide deduplication key.
    pub slot: Option<String>,
}

/// The broker core: lifecycle controller over a replicated status store.
pub struct Broker<L: StatusLog, H: TaskHeap> {
    replicator: Replicator<L>,
    heap: H,
    config: BrokerConfig,
}

impl<L: StatusLog, H: TaskHeap> Broker<L, H> {
    pub fn new(log: L, heap: H, config: BrokerConfig) -> Self {
        Self {
            replicator: Replicator::new(Arc::new(StatusStore::new()), log),
            heap,
            config,
        }
    }

    pub fn replicator(&self) -> &Replicator<L> {
        &self.replicator
    }

    pub fn store(&self) -> &StatusStore {
        self.replicator.store().as_ref()
    }

    pub fn heap(&self) -> &H {
        &self.heap
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Accepts a task submission.
    ///
    /// Returns the new task id, or `None` when the submission named a slot
    /// that is currently held (the duplicate is dropped silently, without
    /// a log append or a ready-queue entry).
    pub fn add_task(&self, submission: TaskSubmission) -> Result<Option<TaskId>, BrokerError> {
        // Cheap pre-check before minting an id; the authoritative
        // reservation happens atomically on the append path, so a race
        // here costs at most a skipped id, never a duplicate.
        if let Some(slot) = &submission.slot {
            if self.store().slots().is_held(slot) {
                tracing::debug!(slot, "duplicate slot submission dropped");
                return Ok(None);
            }
        }

        let task_id = self.store().mint_task_id();
        let edit = StatusEdit::AddTask {
            task_id,
            task_type: submission.task_type,
            user_id: submission.user_id.clone(),
            parameter: submission.parameter,
            max_attempts: submission.max_attempts,
            execution_deadline: submission.execution_deadline,
            slot: submission.slot,
            created_at: Timestamp::now(),
        };

        let created = self.replicator.apply_modification(edit)?;
        if let Some(task_id) = created {
            // The ready-queue learns about the task after the status store
            // does; dispatch re-validates against status, so the window is
            // harmless.
            self.heap
                .insert(task_id, submission.task_type, &submission.user_id);
            tracing::debug!(%task_id, task_type = submission.task_type, "task accepted");
        }
        Ok(created)
    }

    /// Hands out up to `max` waiting tasks to `worker_id`.
    ///
    /// Candidates come from the ready-queue; each is re-checked against
    /// the status store. Tasks whose deadline has passed are transitioned
    /// to `Error("deadline_expired")` instead of being dispatched, and
    /// stale queue entries (task already terminal or running) are skipped.
    pub fn assign_tasks_to_worker(
        &self,
        max: usize,
        available_space: usize,
        groups: &[i32],
        worker_id: &str,
    ) -> Result<Vec<TaskId>, BrokerError> {
        let candidates = self.heap.poll(max, available_space, groups);
        let now = Timestamp::now();
        let mut assigned = Vec::with_capacity(candidates.len());

        for task_id in candidates {
            let Some(task) = self.store().task(task_id) else {
                continue;
            };
            if task.status != TaskStatus::Waiting {
                continue;
            }

            if task.deadline_expired(now) {
                self.replicator.apply_modification(StatusEdit::TaskStatusChange {
                    task_id,
                    worker_id: None,
                    status: TaskStatus::Error,
                    result: Some(DEADLINE_EXPIRED.to_string()),
                })?;
                tracing::debug!(%task_id, "task expired at dispatch");
                continue;
            }

            self.replicator.apply_modification(StatusEdit::AssignTaskToWorker {
                task_id,
                worker_id: worker_id.to_string(),
                attempt: task.attempts + 1,
            })?;
            assigned.push(task_id);
        }

        Ok(assigned)
    }

    /// Records a worker-reported outcome for a running task.
    ///
    /// `Finished` is terminal. `Error` consults the retry policy: the task
    /// goes back to `Waiting` (and into the ready-queue) unless its attempt
    /// budget is exhausted or its deadline has passed. `Waiting` and
    /// `Running` are not outcomes and fail hard.
    pub fn task_finished(
        &self,
        worker_id: &str,
        task_id: TaskId,
        final_status: TaskStatus,
        result: impl Into<String>,
    ) -> Result<(), BrokerError> {
        let task = self
            .store()
            .task(task_id)
            .ok_or(BrokerError::TaskNotFound { task_id })?;

        match final_status {
            TaskStatus::Finished => {
                self.replicator.apply_modification(StatusEdit::TaskStatusChange {
                    task_id,
                    worker_id: Some(worker_id.to_string()),
                    status: TaskStatus::Finished,
                    result: Some(result.into()),
                })?;
                Ok(())
            }
            TaskStatus::Error => {
                let now = Timestamp::now();
                let budget_exhausted =
                    task.max_attempts > 0 && task.attempts >= task.max_attempts;
                let terminal = budget_exhausted || task.deadline_expired(now);

                let next_status = if terminal { TaskStatus::Error } else { TaskStatus::Waiting };
                self.replicator.apply_modification(StatusEdit::TaskStatusChange {
                    task_id,
                    worker_id: Some(worker_id.to_string()),
                    status: next_status,
                    result: Some(result.into()),
                })?;

                if !terminal {
                    self.heap.insert(task_id, task.task_type, &task.user_id);
                    tracing::debug!(%task_id, attempts = task.attempts, "task re-queued for retry");
                }
                Ok(())
            }
            TaskStatus::Waiting | TaskStatus::Running => Err(BrokerError::IllegalFinalStatus {
                task_id,
                status: final_status,
            }),
        }
    }

    /// Fails a running task because its worker died.
    pub fn task_needs_recovery_due_to_worker_death(
        &self,
        task_id: TaskId,
        worker_id: &str,
    ) -> Result<(), BrokerError> {
        self.task_finished(
            worker_id,
            task_id,
            TaskStatus::Error,
            format!("worker {worker_id} died"),
        )
    }

    /// Records a worker connection.
    pub fn worker_connected(
        &self,
        worker_id: &str,
        process_id: &str,
        location: &str,
    ) -> Result<(), BrokerError> {
        self.replicator
            .apply_modification(StatusEdit::WorkerConnected {
                worker_id: worker_id.to_string(),
                process_id: process_id.to_string(),
                location: location.to_string(),
                timestamp: Timestamp::now(),
            })
            .map(|_| ())
    }

    /// Records a worker disconnection.
    pub fn declare_worker_disconnected(&self, worker_id: &str) -> Result<(), BrokerError> {
        self.replicator
            .apply_modification(StatusEdit::WorkerDisconnected {
                worker_id: worker_id.to_string(),
                timestamp: Timestamp::now(),
            })
            .map(|_| ())
    }

    /// Declares a worker dead.
    pub fn declare_worker_dead(&self, worker_id: &str) -> Result<(), BrokerError> {
        self.replicator
            .apply_modification(StatusEdit::WorkerDied {
                worker_id: worker_id.to_string(),
                timestamp: Timestamp::now(),
            })
            .map(|_| ())
    }

    /// One purge pass.
    ///
    /// Drops terminal tasks past retention from memory (the log keeps
    /// them until the next checkpoint truncation), then expires waiting
    /// tasks whose deadline has passed - the expiry edits are emitted
    /// after the write lock is released.
    pub fn purge_tasks(&self) -> Result<PurgeSweep, BrokerError> {
        let sweep = self.store().sweep_for_purge(
            Timestamp::now(),
            self.config.finished_tasks_retention_ms,
            self.config.max_expired_tasks_per_cycle,
        );

        for task_id in &sweep.expired {
            self.replicator.apply_modification(StatusEdit::TaskStatusChange {
                task_id: *task_id,
                worker_id: None,
                status: TaskStatus::Error,
                result: Some(DEADLINE_EXPIRED.to_string()),
            })?;
            self.heap.remove(*task_id);
        }

        if sweep.purged > 0 || !sweep.expired.is_empty() {
            tracing::debug!(
                purged = sweep.purged,
                expired = sweep.expired.len(),
                "purge pass complete"
            );
        }
        Ok(sweep)
    }

    /// Builds a snapshot and records it with the log as a checkpoint.
    pub fn checkpoint(&self) -> Result<(), BrokerError> {
        let snapshot = self.store().snapshot();
        self.replicator.log().checkpoint(&snapshot)?;
        self.store().bump_checkpoints();
        tracing::info!(
            last_sequence = %snapshot.last_sequence,
            tasks = snapshot.tasks.len(),
            "checkpoint complete"
        );
        Ok(())
    }

    /// Rehydrates the ready-queue from the status store.
    ///
    /// Called once when this replica starts serving as leader; waiting
    /// tasks accumulated through recovery and following become
    /// dispatchable again.
    pub fn seed_heap(&self) {
        let mut seeded = 0usize;
        for task in self.store().tasks_at_boot() {
            if task.status == TaskStatus::Waiting {
                self.heap.insert(task.task_id, task.task_type, &task.user_id);
                seeded += 1;
            }
        }
        if seeded > 0 {
            tracing::info!(seeded, "ready-queue rehydrated from status");
        }
    }
}
