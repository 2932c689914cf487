//! Replication driver.
//!
//! The driver owns the traffic between the status log and the status
//! store. On the leader it runs the append path: slot gate, log append,
//! then apply. On followers it runs the tail-and-apply loop. Recovery
//! rebuilds the store from the newest snapshot plus the log tail.
//!
//! The append deliberately happens *outside* the status write lock - only
//! the apply step takes it. Ordering across concurrent appenders is the
//! log's contract (see [`StatusLog`]), not the lock's.

use std::sync::Arc;

use foreman_log::{LogError, StatusLog};
use foreman_status::{ApplyError, StatusStore};
use foreman_types::{StatusEdit, TaskId};

use crate::error::BrokerError;

/// Drives edits between the log and the status store.
pub struct Replicator<L: StatusLog> {
    store: Arc<StatusStore>,
    log: L,
}

impl<L: StatusLog> Replicator<L> {
    pub fn new(store: Arc<StatusStore>, log: L) -> Self {
        Self { store, log }
    }

    pub fn store(&self) -> &Arc<StatusStore> {
        &self.store
    }

    pub fn log(&self) -> &L {
        &self.log
    }

    /// Leader append path: persists `edit` and applies it locally.
    ///
    /// Slot-bearing `AddTask` edits are gated through the slot arbiter
    /// first; a duplicate submission returns `Ok(None)` without writing
    /// anything to the log. A failed append releases the pre-reservation
    /// before propagating.
    pub fn apply_modification(&self, edit: StatusEdit) -> Result<Option<TaskId>, BrokerError> {
        if let Some(slot) = edit.slot() {
            if !self.store.slots().assign(slot) {
                tracing::debug!(slot, "duplicate slot submission dropped");
                return Ok(None);
            }
            let sequence = match self.log.log_status_edit(&edit) {
                Ok(sequence) => sequence,
                Err(err) => {
                    self.store.slots().release(slot);
                    return Err(err.into());
                }
            };
            return self.store.apply(sequence, &edit).map_err(BrokerError::from);
        }

        let sequence = self.log.log_status_edit(&edit)?;
        self.store.apply(sequence, &edit).map_err(BrokerError::from)
    }

    /// Follower loop: tails the log and applies every edit, resuming from
    /// the last applied sequence after each stream ends.
    ///
    /// Returns `Ok(())` once this replica is elected leader or the log is
    /// closed. Any error is fatal to the replica: an unavailable log
    /// leaves no way to stay current, and an apply failure means the
    /// status machine has diverged.
    pub fn follow_the_leader(&self) -> Result<(), BrokerError> {
        while !self.log.is_leader() && !self.log.is_closed() {
            let from = self.store.last_sequence();
            tracing::debug!(%from, "following the leader");
            self.stream_into_store(|log, sink| log.follow_the_leader(from, sink))?;
        }
        Ok(())
    }

    /// Cold-start recovery: installs the newest snapshot, replays the log
    /// tail, and re-bases the task id counter past everything replayed.
    pub fn recover(&self) -> Result<(), BrokerError> {
        let snapshot = self.log.load_snapshot()?;
        let from = snapshot.last_sequence;
        self.store.install_snapshot(snapshot);

        self.stream_into_store(|log, sink| log.recovery(from, sink))?;
        self.store.rebase_next_task_id();

        tracing::info!(
            last_sequence = %self.store.last_sequence(),
            max_task_id = %self.store.max_task_id(),
            "recovery complete"
        );
        Ok(())
    }

    /// Arms the log's leader append path, with the write lock held as a
    /// barrier so no apply interleaves with the role change.
    pub fn start_writing(&self) -> Result<(), BrokerError> {
        self.store
            .with_exclusive(|| self.log.start_writing())
            .map_err(BrokerError::from)
    }

    /// Runs a log streaming call with the store's applier as the sink,
    /// keeping the original [`ApplyError`] when the sink is what failed.
    fn stream_into_store(
        &self,
        stream: impl FnOnce(&L, foreman_log::EditSink<'_>) -> Result<(), LogError>,
    ) -> Result<(), BrokerError> {
        let mut divergence: Option<ApplyError> = None;
        let result = stream(&self.log, &mut |sequence, edit| {
            match self.store.apply(sequence, &edit) {
                Ok(_) => Ok(()),
                Err(err) => {
                    let rejection = LogError::ApplyRejected {
                        sequence,
                        reason: err.to_string(),
                    };
                    divergence = Some(err);
                    Err(rejection)
                }
            }
        });

        if let Some(err) = divergence {
            return Err(BrokerError::Diverged(err));
        }
        result.map_err(BrokerError::from)
    }
}
