//! Status store.
//!
//! The authoritative in-memory view of tasks and workers, shared by every
//! component of the broker. A single readers-writer lock guards the maps:
//! the edit applier (and recovery, purge, and the start-writing barrier)
//! mutate under the write lock, queries run concurrently under the read
//! lock and never block on IO.
//!
//! Queries hand out *structural copies* ([`TaskView`], [`WorkerView`]) -
//! the store never exposes live references to its internal records.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use foreman_types::{
    SequenceNumber, StatusEdit, StatusSnapshot, Task, TaskId, TaskStatus, Timestamp, Worker,
    WorkerStatus,
};

use crate::apply::{self, ApplyError};
use crate::slots::SlotBoard;

/// The lock-guarded part of the store.
#[derive(Debug, Default)]
pub(crate) struct StatusState {
    pub(crate) tasks: HashMap<TaskId, Task>,
    pub(crate) workers: HashMap<String, Worker>,
    /// Highest task id ever observed; never decreases.
    pub(crate) max_task_id: TaskId,
    /// Sequence number of the last applied edit.
    pub(crate) last_sequence: SequenceNumber,
    pub(crate) checkpoints_count: u64,
}

/// Authoritative in-memory map of tasks and workers.
///
/// All mutation is serialized through [`StatusStore::apply`] in log order;
/// the `next_task_id` counter is an atomic readable without the lock so the
/// submission path can mint ids concurrently.
#[derive(Debug)]
pub struct StatusStore {
    state: RwLock<StatusState>,
    slots: SlotBoard,
    next_task_id: AtomicU64,
}

impl Default for StatusStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusStore {
    /// Creates an empty store. The first minted task id is `1`.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StatusState::default()),
            slots: SlotBoard::new(),
            next_task_id: AtomicU64::new(1),
        }
    }

    /// The slot arbiter shared between the applier and the leader
    /// submission path.
    pub fn slots(&self) -> &SlotBoard {
        &self.slots
    }

    /// Mints the next task id.
    pub fn mint_task_id(&self) -> TaskId {
        TaskId::new(self.next_task_id.fetch_add(1, Ordering::SeqCst))
    }

    /// The id the next `mint_task_id` call will return.
    pub fn next_task_id(&self) -> TaskId {
        TaskId::new(self.next_task_id.load(Ordering::SeqCst))
    }

    /// Applies one edit under the write lock.
    ///
    /// `seq` must be the next sequence in log order. Returns the created id
    /// for an `AddTask` edit, `None` otherwise. An error means the status
    /// machine is inconsistent with the log: the caller must treat the
    /// replica as diverged (see the replication driver).
    pub fn apply(&self, seq: SequenceNumber, edit: &StatusEdit) -> Result<Option<TaskId>, ApplyError> {
        let mut state = self.state.write().expect("status lock poisoned");
        apply::apply_edit(&mut state, &self.slots, seq, edit)
    }

    /// Runs `f` while holding the write lock, without touching the maps.
    ///
    /// Used as a barrier by the replication driver when arming the leader
    /// append path: no apply can interleave with `f`.
    pub fn with_exclusive<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.state.write().expect("status lock poisoned");
        f()
    }

    // ========================================================================
    // Queries (read lock, structural copies)
    // ========================================================================

    /// Looks up a single task.
    pub fn task(&self, task_id: TaskId) -> Option<TaskView> {
        let state = self.state.read().expect("status lock poisoned");
        state.tasks.get(&task_id).map(TaskView::from)
    }

    /// All tasks currently in memory, ordered by id.
    pub fn tasks(&self) -> Vec<TaskView> {
        let state = self.state.read().expect("status lock poisoned");
        let mut views: Vec<TaskView> = state.tasks.values().map(TaskView::from).collect();
        views.sort_by_key(|t| t.task_id);
        views
    }

    /// Looks up a single worker.
    pub fn worker(&self, worker_id: &str) -> Option<WorkerView> {
        let state = self.state.read().expect("status lock poisoned");
        state.workers.get(worker_id).map(WorkerView::from)
    }

    /// All known workers, ordered by id.
    pub fn workers(&self) -> Vec<WorkerView> {
        let state = self.state.read().expect("status lock poisoned");
        let mut views: Vec<WorkerView> = state.workers.values().map(WorkerView::from).collect();
        views.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        views
    }

    /// One-shot startup view of all tasks, used to rehydrate external
    /// structures (the ready-queue). Valid at call time only.
    pub fn tasks_at_boot(&self) -> Vec<TaskView> {
        self.tasks()
    }

    /// One-shot startup view of all workers.
    pub fn workers_at_boot(&self) -> Vec<WorkerView> {
        self.workers()
    }

    /// Sequence number of the last applied edit.
    pub fn last_sequence(&self) -> SequenceNumber {
        self.state
            .read()
            .expect("status lock poisoned")
            .last_sequence
    }

    /// Highest task id ever observed.
    pub fn max_task_id(&self) -> TaskId {
        self.state.read().expect("status lock poisoned").max_task_id
    }

    /// Number of checkpoints taken since startup.
    pub fn checkpoints_count(&self) -> u64 {
        self.state
            .read()
            .expect("status lock poisoned")
            .checkpoints_count
    }

    /// Records a completed checkpoint.
    pub fn bump_checkpoints(&self) {
        self.state
            .write()
            .expect("status lock poisoned")
            .checkpoints_count += 1;
    }

    // ========================================================================
    // Snapshots and recovery
    // ========================================================================

    /// Builds a self-contained snapshot under the read lock.
    ///
    /// Tasks and workers are sorted by id so two replicas with equal maps
    /// produce identical snapshots.
    pub fn snapshot(&self) -> StatusSnapshot {
        let state = self.state.read().expect("status lock poisoned");
        let mut tasks: Vec<Task> = state.tasks.values().cloned().collect();
        tasks.sort_by_key(|t| t.task_id);
        let mut workers: Vec<Worker> = state.workers.values().cloned().collect();
        workers.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        StatusSnapshot {
            max_task_id: state.max_task_id,
            last_sequence: state.last_sequence,
            tasks,
            workers,
        }
    }

    /// Installs a snapshot verbatim under the write lock.
    ///
    /// Re-establishes slot reservations for non-terminal slotted tasks and
    /// re-bases the task id counter past `max_task_id`. Existing state is
    /// discarded; this is the first step of recovery.
    pub fn install_snapshot(&self, snapshot: StatusSnapshot) {
        let mut state = self.state.write().expect("status lock poisoned");
        state.tasks = snapshot
            .tasks
            .into_iter()
            .map(|t| (t.task_id, t))
            .collect();
        state.workers = snapshot
            .workers
            .into_iter()
            .map(|w| (w.worker_id.clone(), w))
            .collect();
        state.max_task_id = snapshot.max_task_id;
        state.last_sequence = snapshot.last_sequence;

        for task in state.tasks.values() {
            if let Some(slot) = &task.slot {
                if !task.status.is_terminal() {
                    self.slots.assign(slot);
                }
            }
        }

        self.next_task_id
            .store(state.max_task_id.as_u64() + 1, Ordering::SeqCst);
    }

    /// Moves the task id counter past `max_task_id`.
    ///
    /// Called after tail replay: the tail may have produced tasks beyond
    /// the snapshot's high-water mark.
    pub fn rebase_next_task_id(&self) {
        let max = self.max_task_id();
        self.next_task_id.store(max.as_u64() + 1, Ordering::SeqCst);
    }

    // ========================================================================
    // Purge support
    // ========================================================================

    /// One write-locked purge sweep.
    ///
    /// Removes terminal tasks created strictly before `now - retention_ms`
    /// from memory (the log is untouched; recovery may resurrect them until
    /// the next checkpoint). Collects up to `max_expired` waiting tasks
    /// whose deadline has passed; the caller emits their expiry edits after
    /// releasing the lock.
    pub fn sweep_for_purge(
        &self,
        now: Timestamp,
        retention_ms: u64,
        max_expired: usize,
    ) -> PurgeSweep {
        let mut state = self.state.write().expect("status lock poisoned");
        let cutoff = now.minus_millis(retention_ms);

        let mut expired = Vec::new();
        let mut purgeable = Vec::new();
        for task in state.tasks.values() {
            match task.status {
                TaskStatus::Waiting => {
                    if expired.len() < max_expired && task.deadline_expired(now) {
                        expired.push(task.task_id);
                    }
                }
                TaskStatus::Finished | TaskStatus::Error => {
                    if task.created_at.is_before(cutoff) {
                        purgeable.push(task.task_id);
                    }
                }
                TaskStatus::Running => {}
            }
        }

        for task_id in &purgeable {
            state.tasks.remove(task_id);
        }

        PurgeSweep {
            expired,
            purged: purgeable.len(),
        }
    }
}

/// Outcome of one [`StatusStore::sweep_for_purge`] pass.
#[derive(Debug, Default)]
pub struct PurgeSweep {
    /// Waiting tasks whose deadline has passed; the lifecycle controller
    /// emits a terminal `deadline_expired` edit for each.
    pub expired: Vec<TaskId>,
    /// Number of terminal tasks dropped from memory.
    pub purged: usize,
}

// ============================================================================
// Views - structural copies handed to clients
// ============================================================================

/// Structural copy of a task, safe to hand outside the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskView {
    pub task_id: TaskId,
    pub task_type: i32,
    pub user_id: String,
    pub parameter: String,
    pub result: Option<String>,
    pub created_at: Timestamp,
    pub execution_deadline: Option<Timestamp>,
    pub max_attempts: u32,
    pub attempts: u32,
    pub worker_id: Option<String>,
    pub slot: Option<String>,
    pub status: TaskStatus,
}

impl TaskView {
    /// Returns true if the execution deadline has passed at `now`.
    pub fn deadline_expired(&self, now: Timestamp) -> bool {
        self.execution_deadline
            .is_some_and(|deadline| deadline.is_before(now))
    }
}

impl From<&Task> for TaskView {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.task_id,
            task_type: task.task_type,
            user_id: task.user_id.clone(),
            parameter: task.parameter.clone(),
            result: task.result.clone(),
            created_at: task.created_at,
            execution_deadline: task.execution_deadline,
            max_attempts: task.max_attempts,
            attempts: task.attempts,
            worker_id: task.worker_id.clone(),
            slot: task.slot.clone(),
            status: task.status,
        }
    }
}

/// Structural copy of a worker, safe to hand outside the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerView {
    pub worker_id: String,
    pub location: String,
    pub process_id: String,
    pub last_connection_at: Timestamp,
    pub status: WorkerStatus,
}

impl From<&Worker> for WorkerView {
    fn from(worker: &Worker) -> Self {
        Self {
            worker_id: worker.worker_id.clone(),
            location: worker.location.clone(),
            process_id: worker.process_id.clone(),
            last_connection_at: worker.last_connection_at,
            status: worker.status,
        }
    }
}
