//! # foreman-broker: Replication driver and task lifecycle controller
//!
//! This crate ties the Foreman core together. External calls enter the
//! [`Broker`] (the lifecycle controller), which expresses every mutation
//! as a typed edit and hands it to the [`Replicator`]. On the leader the
//! replicator gates slot-bearing submissions through the slot arbiter,
//! appends to the status log, and applies under the status write lock;
//! followers run the same applier from the log's tail stream.
//!
//! ## Architecture
//!
//! - [`broker`]: task submission, dispatch, completion and retry, worker
//!   transitions, purge, checkpoint
//! - [`replication`]: leader append path, follower loop, recovery
//! - [`heap`]: the ready-queue seam ([`TaskHeap`]) and its reference
//!   implementation ([`ReadyQueue`])
//! - [`life`]: the long-lived replica threads
//! - [`config`]: tunables and their layered loader
//!
//! ## Example
//!
//! ```ignore
//! use foreman_broker::{Broker, BrokerConfig, BrokerLife, ReadyQueue, TaskSubmission};
//! use foreman_log::MemoryLog;
//!
//! let broker = Arc::new(Broker::new(MemoryLog::leader(), ReadyQueue::new(), BrokerConfig::default()));
//! let life = BrokerLife::start(Arc::clone(&broker));
//!
//! let task_id = broker.add_task(TaskSubmission { ... })?;
//! // ... dispatch, completion, shutdown:
//! life.stop();
//! ```

pub mod broker;
pub mod config;
pub mod error;
pub mod heap;
pub mod life;
pub mod replication;

pub use broker::{Broker, TaskSubmission};
pub use config::{BrokerConfig, ConfigLoader};
pub use error::BrokerError;
pub use heap::{ReadyQueue, TaskHeap};
pub use life::BrokerLife;
pub use replication::Replicator;
