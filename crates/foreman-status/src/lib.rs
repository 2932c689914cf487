//! # foreman-status: Replicated status machine for Foreman
//!
//! The status machine is the deterministic heart of the broker. It receives
//! edits already ordered by the log and applies them to an in-memory map of
//! tasks and workers.
//!
//! ## Key Principles
//!
//! - **No IO**: the applier never touches disk or network
//! - **No clocks**: timestamps are carried inside each edit, stamped on the
//!   leader at construction time
//! - **Single writer**: all mutation happens under the store's write lock,
//!   in log order
//! - **Deterministic**: the same edits in the same order produce the same
//!   state on every replica
//!
//! ## Architecture
//!
//! - [`store`]: the [`StatusStore`] - task/worker maps behind a
//!   readers-writer lock, plus the id counters
//! - [`apply`]: the edit applier - one deterministic transition per
//!   [`StatusEdit`](foreman_types::StatusEdit) kind
//! - [`slots`]: the [`SlotBoard`] - cluster-unique reservation of named
//!   submission slots

pub mod apply;
pub mod slots;
pub mod store;


pub use apply::ApplyError;
pub use slots::SlotBoard;
pub use store::{PurgeSweep, StatusStore, TaskView, WorkerView};
