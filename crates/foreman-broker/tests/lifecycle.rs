//! End-to-end lifecycle tests over an in-process log and ready-queue.

use foreman_broker::{Broker, BrokerConfig, BrokerError, ReadyQueue, TaskHeap, TaskSubmission};
use foreman_log::{MemoryLog, StatusLog};
use foreman_status::ApplyError;
use foreman_types::{StatusEdit, TaskId, TaskStatus, Timestamp, WorkerStatus};

fn leader_broker() -> Broker<MemoryLog, ReadyQueue> {
    let broker = Broker::new(MemoryLog::leader(), ReadyQueue::new(), BrokerConfig::default());
    broker
        .replicator()
        .start_writing()
        .expect("arm leader append path");
    broker
}

fn submission(task_type: i32, user_id: &str) -> TaskSubmission {
    TaskSubmission {
        task_type,
        user_id: user_id.to_string(),
        parameter: "p".to_string(),
        max_attempts: 3,
        execution_deadline: None,
        slot: None,
    }
}

#[test]
fn submit_assign_finish() {
    let broker = leader_broker();

    let task_id = broker
        .add_task(submission(1, "u"))
        .expect("submission")
        .expect("task created");
    assert_eq!(task_id, TaskId::new(1));
    assert_eq!(broker.heap().len(), 1);

    let assigned = broker
        .assign_tasks_to_worker(10, usize::MAX, &[1], "w1")
        .expect("assignment");
    assert_eq!(assigned, vec![TaskId::new(1)]);

    let task = broker.store().task(task_id).expect("task exists");
    assert_eq!(task.status, TaskStatus::Running);
    assert_eq!(task.worker_id.as_deref(), Some("w1"));
    assert_eq!(task.attempts, 1);

    broker
        .task_finished("w1", task_id, TaskStatus::Finished, "ok")
        .expect("completion");

    let task = broker.store().task(task_id).expect("task exists");
    assert_eq!(task.status, TaskStatus::Finished);
    assert_eq!(task.result.as_deref(), Some("ok"));
}

#[test]
fn duplicate_slot_is_dropped_silently() {
    let broker = leader_broker();

    let with_slot = || TaskSubmission {
        slot: Some("S".to_string()),
        ..submission(1, "u")
    };

    let first = broker.add_task(with_slot()).expect("submission");
    assert_eq!(first, Some(TaskId::new(1)));

    // Duplicate while the slot is held: no id, no log entry, no heap entry.
    let duplicate = broker.add_task(with_slot()).expect("submission");
    assert_eq!(duplicate, None);
    assert_eq!(broker.store().tasks().len(), 1);
    assert_eq!(broker.heap().len(), 1);
    assert_eq!(broker.replicator().log().entry_count(), 1);

    // Terminal transition releases the slot; the next submission wins it
    // again without a gap in the id sequence.
    broker
        .assign_tasks_to_worker(10, usize::MAX, &[], "w1")
        .expect("assignment");
    broker
        .task_finished("w1", TaskId::new(1), TaskStatus::Finished, "ok")
        .expect("completion");

    let third = broker.add_task(with_slot()).expect("submission");
    assert_eq!(third, Some(TaskId::new(2)));
}

#[test]
fn error_retries_until_the_attempt_budget_is_spent() {
    let broker = leader_broker();
    let task_id = broker
        .add_task(TaskSubmission {
            max_attempts: 2,
            ..submission(1, "u")
        })
        .expect("submission")
        .expect("task created");

    // First attempt fails: back to Waiting, re-queued.
    broker
        .assign_tasks_to_worker(10, usize::MAX, &[], "w1")
        .expect("assignment");
    assert_eq!(broker.store().task(task_id).expect("task").attempts, 1);
    broker
        .task_finished("w1", task_id, TaskStatus::Error, "x")
        .expect("completion");

    let task = broker.store().task(task_id).expect("task");
    assert_eq!(task.status, TaskStatus::Waiting);
    assert_eq!(broker.heap().len(), 1);

    // Second attempt fails: budget spent, terminal.
    broker
        .assign_tasks_to_worker(10, usize::MAX, &[], "w2")
        .expect("assignment");
    assert_eq!(broker.store().task(task_id).expect("task").attempts, 2);
    broker
        .task_finished("w2", task_id, TaskStatus::Error, "y")
        .expect("completion");

    let task = broker.store().task(task_id).expect("task");
    assert_eq!(task.status, TaskStatus::Error);
    assert_eq!(task.result.as_deref(), Some("y"));
    assert_eq!(broker.heap().len(), 0);
}

#[test]
fn expired_task_is_not_dispatched() {
    let broker = leader_broker();
    let task_id = broker
        .add_task(TaskSubmission {
            execution_deadline: Some(Timestamp::new(1)),
            ..submission(1, "u")
        })
        .expect("submission")
        .expect("task created");

    let assigned = broker
        .assign_tasks_to_worker(10, usize::MAX, &[], "w1")
        .expect("assignment");
    assert!(assigned.is_empty());

    let task = broker.store().task(task_id).expect("task");
    assert_eq!(task.status, TaskStatus::Error);
    assert_eq!(task.result.as_deref(), Some("deadline_expired"));
}

#[test]
fn completion_from_the_wrong_worker_is_divergence() {
    let broker = leader_broker();
    let task_id = broker
        .add_task(submission(1, "u"))
        .expect("submission")
        .expect("task created");
    broker
        .assign_tasks_to_worker(10, usize::MAX, &[], "w1")
        .expect("assignment");

    let result = broker.task_finished("w2", task_id, TaskStatus::Finished, "ok");
    assert!(matches!(
        result,
        Err(BrokerError::Diverged(ApplyError::WorkerMismatch { .. }))
    ));
}

#[test]
fn only_terminal_outcomes_are_accepted() {
    let broker = leader_broker();
    let task_id = broker
        .add_task(submission(1, "u"))
        .expect("submission")
        .expect("task created");
    broker
        .assign_tasks_to_worker(10, usize::MAX, &[], "w1")
        .expect("assignment");

    for status in [TaskStatus::Waiting, TaskStatus::Running] {
        let result = broker.task_finished("w1", task_id, status, "nope");
        assert!(matches!(
            result,
            Err(BrokerError::IllegalFinalStatus { .. })
        ));
    }
}

#[test]
fn worker_death_fails_the_running_task() {
    let broker = leader_broker();
    let task_id = broker
        .add_task(TaskSubmission {
            max_attempts: 1,
            ..submission(1, "u")
        })
        .expect("submission")
        .expect("task created");
    broker
        .assign_tasks_to_worker(10, usize::MAX, &[], "w1")
        .expect("assignment");

    broker
        .task_needs_recovery_due_to_worker_death(task_id, "w1")
        .expect("worker death handling");

    let task = broker.store().task(task_id).expect("task");
    assert_eq!(task.status, TaskStatus::Error);
    assert_eq!(task.result.as_deref(), Some("worker w1 died"));
}

#[test]
fn worker_transitions_are_recorded() {
    let broker = leader_broker();

    broker
        .worker_connected("w1", "pid-9", "10.0.0.4:7000")
        .expect("connect");
    let worker = broker.store().worker("w1").expect("worker");
    assert_eq!(worker.status, WorkerStatus::Connected);
    assert_eq!(worker.location, "10.0.0.4:7000");

    broker
        .declare_worker_disconnected("w1")
        .expect("disconnect");
    assert_eq!(
        broker.store().worker("w1").expect("worker").status,
        WorkerStatus::Disconnected
    );

    broker.declare_worker_dead("w1").expect("death");
    assert_eq!(
        broker.store().worker("w1").expect("worker").status,
        WorkerStatus::Dead
    );
    // Workers are never forgotten.
    assert_eq!(broker.store().workers().len(), 1);
}

#[test]
fn purge_drops_old_terminal_tasks_and_expires_stale_waiting_ones() {
    let broker = leader_broker();

    // An old task, submitted directly so its created_at is in the distant
    // past, then finished.
    broker
        .replicator()
        .apply_modification(StatusEdit::AddTask {
            task_id: TaskId::new(1),
            task_type: 1,
            user_id: "u".to_string(),
            parameter: "p".to_string(),
            max_attempts: 0,
            execution_deadline: None,
            slot: None,
            created_at: Timestamp::new(1_000),
        })
        .expect("old task");
    broker
        .replicator()
        .apply_modification(StatusEdit::AssignTaskToWorker {
            task_id: TaskId::new(1),
            worker_id: "w1".to_string(),
            attempt: 1,
        })
        .expect("assign");
    broker
        .task_finished("w1", TaskId::new(1), TaskStatus::Finished, "ok")
        .expect("completion");

    // A fresh waiting task whose deadline has long passed.
    broker
        .replicator()
        .apply_modification(StatusEdit::AddTask {
            task_id: TaskId::new(2),
            task_type: 1,
            user_id: "u".to_string(),
            parameter: "p".to_string(),
            max_attempts: 0,
            execution_deadline: Some(Timestamp::new(2_000)),
            slot: None,
            created_at: Timestamp::now(),
        })
        .expect("stale task");
    broker.heap().insert(TaskId::new(2), 1, "u");

    let sweep = broker.purge_tasks().expect("purge");
    assert_eq!(sweep.purged, 1);
    assert_eq!(sweep.expired, vec![TaskId::new(2)]);

    // The old terminal task is gone from memory; the stale one is now
    // terminal and out of the ready-queue.
    assert!(broker.store().task(TaskId::new(1)).is_none());
    let stale = broker.store().task(TaskId::new(2)).expect("task");
    assert_eq!(stale.status, TaskStatus::Error);
    assert_eq!(stale.result.as_deref(), Some("deadline_expired"));
    assert_eq!(broker.heap().len(), 0);
}

#[test]
fn checkpoint_records_a_snapshot_with_the_log() {
    let broker = leader_broker();
    broker
        .add_task(submission(1, "u"))
        .expect("submission")
        .expect("task created");

    broker.checkpoint().expect("checkpoint");
    assert_eq!(broker.store().checkpoints_count(), 1);

    let snapshot = broker
        .replicator()
        .log()
        .load_snapshot()
        .expect("snapshot");
    assert_eq!(snapshot.last_sequence, broker.store().last_sequence());
    assert_eq!(snapshot.tasks.len(), 1);
}
