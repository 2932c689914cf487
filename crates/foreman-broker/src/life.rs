//! Broker lifetime threads.
//!
//! [`BrokerLife`] owns the three long-lived threads of a replica:
//!
//! - **broker-life**: recovery, then the follower loop, then - once this
//!   replica is elected - the armed leader steady state. A plain state
//!   machine: `Following -> Writable -> Stopped`.
//! - **checkpointer**: periodic snapshot + checkpoint.
//! - **purger**: periodic purge pass, leader only.
//!
//! Schedulers sleep on a condvar so shutdown wakes them immediately.
//! Fatal conditions (log unavailable while following, apply divergence)
//! abort the process: a replica that cannot stay consistent with the log
//! must not keep serving.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use foreman_log::StatusLog;

use crate::broker::Broker;
use crate::error::BrokerError;
use crate::heap::TaskHeap;

/// How often the leader steady state re-checks for shutdown.
const LEADER_IDLE_TICK: Duration = Duration::from_millis(500);

/// Shutdown flag the scheduler threads sleep against.
#[derive(Debug, Default)]
struct ShutdownSignal {
    stopped: Mutex<bool>,
    changed: Condvar,
}

impl ShutdownSignal {
    /// Sleeps for at most `period`. Returns true once shutdown is
    /// requested, immediately if it already was.
    fn sleep(&self, period: Duration) -> bool {
        let stopped = self.stopped.lock().expect("shutdown lock poisoned");
        if *stopped {
            return true;
        }
        let (stopped, _timeout) = self
            .changed
            .wait_timeout(stopped, period)
            .expect("shutdown lock poisoned");
        *stopped
    }

    fn is_triggered(&self) -> bool {
        *self.stopped.lock().expect("shutdown lock poisoned")
    }

    fn trigger(&self) {
        *self.stopped.lock().expect("shutdown lock poisoned") = true;
        self.changed.notify_all();
    }
}

/// Handle over a running replica's threads.
pub struct BrokerLife<L: StatusLog + 'static, H: TaskHeap + 'static> {
    broker: Arc<Broker<L, H>>,
    shutdown: Arc<ShutdownSignal>,
    threads: Vec<JoinHandle<()>>,
}

impl<L: StatusLog + 'static, H: TaskHeap + 'static> BrokerLife<L, H> {
    /// Starts the replica's three threads. Recovery runs first, on the
    /// broker-life thread, before the follower loop begins.
    pub fn start(broker: Arc<Broker<L, H>>) -> Self {
        let shutdown = Arc::new(ShutdownSignal::default());
        let mut threads = Vec::with_capacity(3);

        threads.push(spawn_thread("broker-life", {
            let broker = Arc::clone(&broker);
            let shutdown = Arc::clone(&shutdown);
            move || broker_life(&broker, &shutdown)
        }));

        threads.push(spawn_thread("broker-checkpointer", {
            let broker = Arc::clone(&broker);
            let shutdown = Arc::clone(&shutdown);
            move || checkpointer(&broker, &shutdown)
        }));

        threads.push(spawn_thread("broker-purger", {
            let broker = Arc::clone(&broker);
            let shutdown = Arc::clone(&shutdown);
            move || purger(&broker, &shutdown)
        }));

        Self {
            broker,
            shutdown,
            threads,
        }
    }

    pub fn broker(&self) -> &Arc<Broker<L, H>> {
        &self.broker
    }

    /// Stops all threads: closes the log (unblocking the follower loop),
    /// wakes the schedulers, and joins everything.
    pub fn stop(mut self) {
        self.shutdown.trigger();
        self.broker.replicator().log().close();
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                tracing::warn!("broker thread panicked during shutdown");
            }
        }
        tracing::info!("broker stopped");
    }
}

fn spawn_thread(name: &str, body: impl FnOnce() + Send + 'static) -> JoinHandle<()> {
    thread::Builder::new()
        .name(name.to_string())
        .spawn(body)
        .expect("failed to spawn broker thread")
}

/// `Following -> Writable -> Stopped`.
fn broker_life<L: StatusLog, H: TaskHeap>(broker: &Broker<L, H>, shutdown: &ShutdownSignal) {
    if let Err(err) = broker.replicator().recover() {
        fatal("recovery failed", &err);
    }

    // Following: blocks until this replica is elected or the log closes.
    if let Err(err) = broker.replicator().follow_the_leader() {
        fatal("follower loop failed", &err);
    }
    if broker.replicator().log().is_closed() || shutdown.is_triggered() {
        return;
    }

    // Writable.
    if let Err(err) = broker.replicator().start_writing() {
        fatal("could not arm leader append path", &err);
    }
    broker.seed_heap();
    tracing::info!(
        last_sequence = %broker.store().last_sequence(),
        "replica is leader, append path armed"
    );

    while !shutdown.sleep(LEADER_IDLE_TICK) {
        if broker.replicator().log().is_closed() {
            break;
        }
    }
}

fn checkpointer<L: StatusLog, H: TaskHeap>(broker: &Broker<L, H>, shutdown: &ShutdownSignal) {
    let period = broker.config().checkpoint_period();
    while !shutdown.sleep(period) {
        if broker.replicator().log().is_closed() {
            break;
        }
        if let Err(err) = broker.checkpoint() {
            tracing::warn!(error = %err, "periodic checkpoint failed");
        }
    }
}

fn purger<L: StatusLog, H: TaskHeap>(broker: &Broker<L, H>, shutdown: &ShutdownSignal) {
    let period = broker.config().purge_period();
    while !shutdown.sleep(period) {
        if broker.replicator().log().is_closed() {
            break;
        }
        // Expiry edits can only be appended by the leader; a promoted
        // replica catches up on its first pass.
        if !broker.replicator().log().is_writable() {
            continue;
        }
        match broker.purge_tasks() {
            Ok(_) => {}
            Err(err @ BrokerError::Diverged(_)) => fatal("purge apply failed", &err),
            Err(err) => tracing::warn!(error = %err, "purge pass failed"),
        }
    }
}

/// The replica cannot continue without diverging from the cluster.
fn fatal(context: &str, err: &BrokerError) -> ! {
    tracing::error!(error = %err, "{context}; aborting replica");
    std::process::abort();
}
