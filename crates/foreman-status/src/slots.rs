//! Slot arbiter.
//!
//! A slot is an application-supplied string that deduplicates task
//! submissions cluster-wide: at any instant at most one non-terminal task
//! holds a given slot name. The board is consulted on the leader submission
//! path (pre-reservation before the log append) and by the edit applier
//! (re-establishing reservations during replay, releasing them on terminal
//! transitions).
//!
//! The board has its own leaf-level lock, orthogonal to the status store's
//! readers-writer lock. It is never held across another lock or any IO.

use std::collections::HashSet;
use std::sync::Mutex;

/// Set of currently-held slot names.
#[derive(Debug, Default)]
pub struct SlotBoard {
    held: Mutex<HashSet<String>>,
}

impl SlotBoard {
    /// Creates an empty board.
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically reserves `slot`.
    ///
    /// Returns `true` iff the slot was absent. A `false` return during
    /// replay is benign: the reservation already exists.
    pub fn assign(&self, slot: &str) -> bool {
        self.held
            .lock()
            .expect("slot board lock poisoned")
            .insert(slot.to_string())
    }

    /// Releases `slot`. Idempotent.
    pub fn release(&self, slot: &str) {
        self.held
            .lock()
            .expect("slot board lock poisoned")
            .remove(slot);
    }

    /// Returns true if `slot` is currently reserved.
    pub fn is_held(&self, slot: &str) -> bool {
        self.held
            .lock()
            .expect("slot board lock poisoned")
            .contains(slot)
    }

    /// Number of held slots.
    pub fn held_count(&self) -> usize {
        self.held.lock().expect("slot board lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assign_is_exclusive() {
        let board = SlotBoard::new();
        assert!(board.assign("backup-tenant-1"));
        assert!(!board.assign("backup-tenant-1"));
        assert!(board.assign("backup-tenant-2"));
        assert_eq!(board.held_count(), 2);
    }

    #[test]
    fn release_is_idempotent() {
        let board = SlotBoard::new();
        assert!(board.assign("s"));
        board.release("s");
        board.release("s");
        assert!(!board.is_held("s"));
        assert!(board.assign("s"));
    }

    #[test]
    fn concurrent_assign_admits_exactly_one() {
        use std::sync::Arc;

        let board = Arc::new(SlotBoard::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let board = Arc::clone(&board);
            handles.push(std::thread::spawn(move || board.assign("contended")));
        }

        let winners = handles
            .into_iter()
            .map(|h| h.join().expect("thread panicked"))
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
