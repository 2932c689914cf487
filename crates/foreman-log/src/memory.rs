//! In-process status log.
//!
//! [`MemoryLog`] keeps postcard-encoded entries in a mutex'd vector shared
//! by every handle; the entries mutex is what linearizes concurrent
//! appends, satisfying the ordering contract of [`StatusLog`]. A condvar
//! wakes followers on append, promotion, and close.
//!
//! Not suitable for production - entries live in memory and are lost on
//! restart. It exists for tests and single-node development, and as the
//! reference for the trait's blocking semantics.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use bytes::Bytes;

use foreman_types::{SequenceNumber, StatusEdit, StatusSnapshot};

use crate::{EditSink, LogError, StatusLog};

/// State shared by every handle onto the same log.
struct LogCore {
    /// Encoded edits; the entry at index `i` has sequence `i + 1`.
    /// Never truncated, so sequence numbers stay stable for replay.
    entries: Mutex<Vec<Bytes>>,
    appended: Condvar,
    snapshot: Mutex<Option<Bytes>>,
    closed: AtomicBool,
}

/// One replica's handle onto a shared in-process log.
///
/// Role is per-handle: a handle created by [`MemoryLog::leader`] is
/// already elected, one created by [`MemoryLog::follower`] tails until
/// [`MemoryLog::promote`] is called on it.
pub struct MemoryLog {
    core: Arc<LogCore>,
    elected: AtomicBool,
    writable: AtomicBool,
}

impl MemoryLog {
    /// Creates a fresh log whose first handle is already elected leader.
    pub fn leader() -> Self {
        Self {
            core: Arc::new(LogCore {
                entries: Mutex::new(Vec::new()),
                appended: Condvar::new(),
                snapshot: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
            elected: AtomicBool::new(true),
            writable: AtomicBool::new(false),
        }
    }

    /// Creates a follower handle onto the same log.
    pub fn follower(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            elected: AtomicBool::new(false),
            writable: AtomicBool::new(false),
        }
    }

    /// Elects this handle leader, unblocking its follower loop.
    pub fn promote(&self) {
        // Taking the entries lock orders the flag flip against a follower
        // that is between its exit check and its condvar wait.
        let _entries = self.core.entries.lock().expect("log lock poisoned");
        self.elected.store(true, Ordering::SeqCst);
        self.core.appended.notify_all();
    }

    /// Number of entries ever appended.
    pub fn entry_count(&self) -> usize {
        self.core.entries.lock().expect("log lock poisoned").len()
    }

    fn decode(sequence: SequenceNumber, bytes: &Bytes) -> Result<StatusEdit, LogError> {
        postcard::from_bytes(bytes).map_err(|e| LogError::Corrupt {
            sequence,
            reason: e.to_string(),
        })
    }

    /// Clones entries with sequence greater than `from`, without holding
    /// the lock while the caller applies them.
    fn pending_after(&self, from: u64) -> Vec<(u64, Bytes)> {
        let entries = self.core.entries.lock().expect("log lock poisoned");
        entries
            .iter()
            .enumerate()
            .skip(from as usize)
            .map(|(i, bytes)| (i as u64 + 1, bytes.clone()))
            .collect()
    }
}

impl StatusLog for MemoryLog {
    fn log_status_edit(&self, edit: &StatusEdit) -> Result<SequenceNumber, LogError> {
        if self.is_closed() {
            return Err(LogError::unavailable("log is closed"));
        }
        if !self.writable.load(Ordering::SeqCst) {
            return Err(LogError::unavailable("append path not armed on this replica"));
        }

        let encoded = postcard::to_allocvec(edit)
            .map_err(|e| LogError::unavailable(format!("could not encode edit: {e}")))?;

        let mut entries = self.core.entries.lock().expect("log lock poisoned");
        entries.push(Bytes::from(encoded));
        let sequence = SequenceNumber::new(entries.len() as u64);
        self.core.appended.notify_all();
        Ok(sequence)
    }

    fn follow_the_leader(&self, from: SequenceNumber, apply: EditSink<'_>) -> Result<(), LogError> {
        let mut next = from.as_u64();
        loop {
            let pending = self.pending_after(next);
            for (seq, bytes) in pending {
                let edit = Self::decode(SequenceNumber::new(seq), &bytes)?;
                apply(SequenceNumber::new(seq), edit)?;
                next = seq;
            }

            let entries = self.core.entries.lock().expect("log lock poisoned");
            if entries.len() as u64 > next {
                // More arrived while we were applying.
                continue;
            }
            if self.elected.load(Ordering::SeqCst) || self.core.closed.load(Ordering::SeqCst) {
                return Ok(());
            }
            drop(
                self.core
                    .appended
                    .wait(entries)
                    .expect("log lock poisoned"),
            );
        }
    }

    fn recovery(&self, from: SequenceNumber, apply: EditSink<'_>) -> Result<(), LogError> {
        for (seq, bytes) in self.pending_after(from.as_u64()) {
            let edit = Self::decode(SequenceNumber::new(seq), &bytes)?;
            apply(SequenceNumber::new(seq), edit)?;
        }
        Ok(())
    }

    fn start_writing(&self) -> Result<(), LogError> {
        if self.is_closed() {
            return Err(LogError::unavailable("log is closed"));
        }
        if !self.elected.load(Ordering::SeqCst) {
            return Err(LogError::unavailable("this replica is not the leader"));
        }
        self.writable.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn load_snapshot(&self) -> Result<StatusSnapshot, LogError> {
        let snapshot = self.core.snapshot.lock().expect("log lock poisoned");
        match snapshot.as_ref() {
            Some(bytes) => postcard::from_bytes(bytes).map_err(|e| LogError::Corrupt {
                sequence: SequenceNumber::ZERO,
                reason: format!("snapshot: {e}"),
            }),
            None => Ok(StatusSnapshot::empty()),
        }
    }

    fn checkpoint(&self, snapshot: &StatusSnapshot) -> Result<(), LogError> {
        if self.is_closed() {
            return Err(LogError::unavailable("log is closed"));
        }
        let encoded = postcard::to_allocvec(snapshot)
            .map_err(|e| LogError::unavailable(format!("could not encode snapshot: {e}")))?;
        *self.core.snapshot.lock().expect("log lock poisoned") = Some(Bytes::from(encoded));
        tracing::debug!(
            last_sequence = %snapshot.last_sequence,
            tasks = snapshot.tasks.len(),
            workers = snapshot.workers.len(),
            "checkpoint recorded"
        );
        Ok(())
    }

    fn is_leader(&self) -> bool {
        self.elected.load(Ordering::SeqCst)
    }

    fn is_writable(&self) -> bool {
        self.writable.load(Ordering::SeqCst) && !self.is_closed()
    }

    fn is_closed(&self) -> bool {
        self.core.closed.load(Ordering::SeqCst)
    }

    fn close(&self) {
        let _entries = self.core.entries.lock().expect("log lock poisoned");
        self.core.closed.store(true, Ordering::SeqCst);
        self.core.appended.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use foreman_types::{TaskId, Timestamp};

    fn edit(n: u64) -> StatusEdit {
        StatusEdit::WorkerConnected {
            worker_id: format!("w{n}"),
            process_id: format!("pid-{n}"),
            location: "127.0.0.1:7000".to_string(),
            timestamp: Timestamp::new(n),
        }
    }

    fn armed_leader() -> MemoryLog {
        let log = MemoryLog::leader();
        log.start_writing().expect("arm leader");
        log
    }

    #[test]
    fn appends_assign_increasing_sequences() {
        let log = armed_leader();
        assert_eq!(log.log_status_edit(&edit(1)).expect("append"), SequenceNumber::new(1));
        assert_eq!(log.log_status_edit(&edit(2)).expect("append"), SequenceNumber::new(2));
        assert_eq!(log.entry_count(), 2);
    }

    #[test]
    fn append_requires_an_armed_leader() {
        let log = MemoryLog::leader();
        // Elected but not armed.
        assert!(matches!(
            log.log_status_edit(&edit(1)),
            Err(LogError::Unavailable { .. })
        ));

        let follower = armed_leader().follower();
        assert!(matches!(
            follower.log_status_edit(&edit(1)),
            Err(LogError::Unavailable { .. })
        ));
    }

    #[test]
    fn start_writing_requires_election() {
        let leader = MemoryLog::leader();
        let follower = leader.follower();
        assert!(matches!(
            follower.start_writing(),
            Err(LogError::Unavailable { .. })
        ));

        follower.promote();
        follower.start_writing().expect("promoted follower can arm");
    }

    #[test]
    fn recovery_replays_past_the_given_sequence() {
        let log = armed_leader();
        for n in 1..=4 {
            log.log_status_edit(&edit(n)).expect("append");
        }

        let mut seen = Vec::new();
        log.recovery(SequenceNumber::new(2), &mut |seq, e| {
            seen.push((seq, e.kind()));
            Ok(())
        })
        .expect("recovery");

        assert_eq!(
            seen,
            vec![
                (SequenceNumber::new(3), "WorkerConnected"),
                (SequenceNumber::new(4), "WorkerConnected"),
            ]
        );
    }

    #[test]
    fn follower_streams_everything_then_returns_on_promotion() {
        let leader = armed_leader();
        for n in 1..=3 {
            leader.log_status_edit(&edit(n)).expect("append");
        }

        let follower = Arc::new(leader.follower());
        let tail = Arc::clone(&follower);
        let handle = std::thread::spawn(move || {
            let mut count = 0usize;
            tail.follow_the_leader(SequenceNumber::ZERO, &mut |_seq, _e| {
                count += 1;
                Ok(())
            })
            .map(|()| count)
        });

        // Two more appends race with the tailing thread, then promotion
        // ends the follow loop after everything has been delivered.
        leader.log_status_edit(&edit(4)).expect("append");
        leader.log_status_edit(&edit(5)).expect("append");
        follower.promote();

        let delivered = handle.join().expect("thread").expect("follow");
        assert_eq!(delivered, 5);
        assert!(follower.is_leader());
    }

    #[test]
    fn close_unblocks_a_waiting_follower() {
        let leader = armed_leader();
        let follower = Arc::new(leader.follower());
        let tail = Arc::clone(&follower);
        let handle = std::thread::spawn(move || {
            tail.follow_the_leader(SequenceNumber::ZERO, &mut |_s, _e| Ok(()))
        });

        leader.close();
        handle.join().expect("thread").expect("follow returns");
        assert!(follower.is_closed());
    }

    #[test]
    fn closed_log_rejects_appends_and_checkpoints() {
        let log = armed_leader();
        log.close();
        assert!(matches!(
            log.log_status_edit(&edit(1)),
            Err(LogError::Unavailable { .. })
        ));
        assert!(matches!(
            log.checkpoint(&StatusSnapshot::empty()),
            Err(LogError::Unavailable { .. })
        ));
        assert!(!log.is_writable());
    }

    #[test]
    fn checkpoint_round_trips() {
        let log = armed_leader();
        assert!(log.load_snapshot().expect("no snapshot yet").is_empty());

        let snapshot = StatusSnapshot {
            max_task_id: TaskId::new(3),
            last_sequence: SequenceNumber::new(9),
            tasks: Vec::new(),
            workers: Vec::new(),
        };
        log.checkpoint(&snapshot).expect("checkpoint");

        let loaded = log.load_snapshot().expect("load");
        assert_eq!(loaded, snapshot);

        // Follower handles share the snapshot.
        assert_eq!(log.follower().load_snapshot().expect("load"), snapshot);
    }

    #[test]
    fn apply_rejection_stops_the_stream() {
        let log = armed_leader();
        for n in 1..=3 {
            log.log_status_edit(&edit(n)).expect("append");
        }

        let mut seen = 0;
        let result = log.recovery(SequenceNumber::ZERO, &mut |seq, _e| {
            seen += 1;
            if seen == 2 {
                Err(LogError::ApplyRejected {
                    sequence: seq,
                    reason: "test rejection".to_string(),
                })
            } else {
                Ok(())
            }
        });

        assert!(matches!(result, Err(LogError::ApplyRejected { .. })));
        assert_eq!(seen, 2);
    }
}
