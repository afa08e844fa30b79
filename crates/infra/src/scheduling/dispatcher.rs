//! Webhook-triggered sync dispatch.
//!
//! The inbound webhook handler only enqueues; a worker drains the queue and
//! runs sync passes with bounded parallelism. A connection that already has a
//! request waiting is not queued twice. A request that arrives while a pass
//! for the same connection is running marks it for one more pass once the
//! current one finishes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use calsync_core::SyncEngine;
use calsync_domain::{CalSyncError, Result, SyncSummary, SyncTrigger};
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::scheduling::error::{SchedulerError, SchedulerResult};

/// Passes refused with `LeaseBusy` are retried this many times.
const LEASE_BUSY_RETRIES: u32 = 3;
const LEASE_BUSY_BACKOFF: Duration = Duration::from_millis(500);

/// Connection id -> whether another pass was requested while one runs.
type InFlight = Arc<DashMap<String, bool>>;

/// Runs one webhook-triggered pass for a connection.
#[async_trait]
pub trait SyncTarget: Send + Sync {
    async fn sync_from_notification(&self, connection_id: &str) -> Result<SyncSummary>;
}

#[async_trait]
impl SyncTarget for SyncEngine {
    async fn sync_from_notification(&self, connection_id: &str) -> Result<SyncSummary> {
        self.sync_connection(connection_id, SyncTrigger::Webhook).await
    }
}

/// What happened to an enqueue request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// A request for the connection is already waiting.
    Coalesced,
    /// The queue is full or the worker has stopped; reconciliation will catch up.
    Dropped,
}

/// Cloneable handle used by request handlers.
#[derive(Clone)]
pub struct SyncDispatcher {
    sender: mpsc::Sender<String>,
    pending: Arc<DashSet<String>>,
}

impl SyncDispatcher {
    /// Spawn the worker. The returned [`DispatcherWorker`] must be shut down
    /// explicitly.
    pub fn spawn(
        target: Arc<dyn SyncTarget>,
        capacity: usize,
        max_concurrent: usize,
    ) -> (Self, DispatcherWorker) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let pending = Arc::new(DashSet::new());
        let cancellation = CancellationToken::new();

        let handle = tokio::spawn(run_worker(
            receiver,
            target,
            pending.clone(),
            max_concurrent.max(1),
            cancellation.clone(),
        ));

        (Self { sender, pending }, DispatcherWorker { handle: Some(handle), cancellation })
    }

    pub fn enqueue(&self, connection_id: &str) -> EnqueueOutcome {
        if !self.pending.insert(connection_id.to_string()) {
            debug!(connection_id, "Sync request coalesced");
            return EnqueueOutcome::Coalesced;
        }
        match self.sender.try_send(connection_id.to_string()) {
            Ok(()) => EnqueueOutcome::Queued,
            Err(err) => {
                self.pending.remove(connection_id);
                warn!(connection_id, error = %err, "Sync request dropped");
                EnqueueOutcome::Dropped
            }
        }
    }

    /// Connections with a request waiting to start.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Owns the worker task.
pub struct DispatcherWorker {
    handle: Option<JoinHandle<()>>,
    cancellation: CancellationToken,
}

impl DispatcherWorker {
    /// Stop accepting work and wait for in-flight passes.
    pub async fn shutdown(&mut self, timeout: Duration) -> SchedulerResult<()> {
        self.cancellation.cancel();
        if let Some(handle) = self.handle.take() {
            tokio::time::timeout(timeout, handle)
                .await
                .map_err(|source| SchedulerError::Timeout { duration: timeout, source })??;
        }
        info!("Sync dispatcher stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for DispatcherWorker {
    fn drop(&mut self) {
        if self.is_running() {
            warn!("DispatcherWorker dropped while running; cancelling");
            self.cancellation.cancel();
        }
    }
}

async fn run_worker(
    mut receiver: mpsc::Receiver<String>,
    target: Arc<dyn SyncTarget>,
    pending: Arc<DashSet<String>>,
    max_concurrent: usize,
    cancellation: CancellationToken,
) {
    let permits = Arc::new(Semaphore::new(max_concurrent));
    let in_flight: InFlight = Arc::new(DashMap::new());
    let mut running = JoinSet::new();

    loop {
        let connection_id = tokio::select! {
            () = cancellation.cancelled() => break,
            next = receiver.recv() => match next {
                Some(id) => id,
                None => break,
            },
        };
        match in_flight.entry(connection_id.clone()) {
            Entry::Occupied(mut rerun) => {
                debug!(connection_id = %connection_id, "Pass in progress; rerun requested");
                *rerun.get_mut() = true;
                pending.remove(&connection_id);
                continue;
            }
            Entry::Vacant(slot) => {
                slot.insert(false);
            }
        }

        let Ok(permit) = permits.clone().acquire_owned().await else {
            in_flight.remove(&connection_id);
            break;
        };
        // Later notifications for this connection queue a fresh request.
        pending.remove(&connection_id);

        let target = target.clone();
        let in_flight = in_flight.clone();
        let cancellation = cancellation.clone();
        running.spawn(async move {
            let _permit = permit;
            run_passes(target.as_ref(), &connection_id, &in_flight, &cancellation).await;
        });

        while running.try_join_next().is_some() {}
    }

    receiver.close();
    while running.join_next().await.is_some() {}
    debug!("Sync dispatcher worker exited");
}

/// Run passes for one connection until no rerun is pending.
async fn run_passes(
    target: &dyn SyncTarget,
    connection_id: &str,
    in_flight: &DashMap<String, bool>,
    cancellation: &CancellationToken,
) {
    let mut busy_retries = 0;
    loop {
        match target.sync_from_notification(connection_id).await {
            Ok(summary) => {
                busy_retries = 0;
                debug!(
                    connection_id,
                    events_synced = summary.events_synced,
                    skipped = ?summary.skipped,
                    "Webhook sync finished"
                );
            }
            Err(CalSyncError::LeaseBusy(_)) if busy_retries < LEASE_BUSY_RETRIES => {
                busy_retries += 1;
                debug!(connection_id, attempt = busy_retries, "Connection busy; retrying pass");
                if let Some(mut rerun) = in_flight.get_mut(connection_id) {
                    *rerun = true;
                }
                tokio::time::sleep(LEASE_BUSY_BACKOFF).await;
            }
            Err(err) => warn!(connection_id, error = %err, "Webhook sync failed"),
        }

        // The entry lock makes "check rerun, else leave" atomic with the
        // worker's "mark rerun, else start".
        match in_flight.entry(connection_id.to_string()) {
            Entry::Occupied(mut rerun) if *rerun.get() && !cancellation.is_cancelled() => {
                *rerun.get_mut() = false;
            }
            Entry::Occupied(done) => {
                done.remove();
                return;
            }
            Entry::Vacant(_) => return,
        }
    }
}
