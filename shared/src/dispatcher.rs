//! The write-queue state machine.
//!
//! Writes go straight to the executor while online. Offline writes are
//! appended to a persisted FIFO queue and replayed, one request at a time,
//! when connectivity returns or the user asks for a sync. The queue is
//! written through to the store after every mutation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, RwLock};
use tracing::{error, info, instrument, warn};

use crate::config::ServiceConfig;
use crate::connectivity::{ConnectivityEvent, ConnectivityMonitor, ListenerHandle};
use crate::error::Locale;
use crate::event::{Notification, Notifier};
use crate::executor::{ExecutionOutcome, ExecutorError, RequestExecutor};
use crate::offline_store::QueueStore;
use crate::outbox::{
    FailureOutcome, HiveOperation, OutboxError, QueuedRequest, RequestId, RequestQueue,
};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error("queue error: {0}")]
    Queue(#[from] OutboxError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DispatcherState {
    Idle,
    Draining,
}

/// Result of a submit: applied remotely right away, or parked in the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Applied(ExecutionOutcome),
    Queued(RequestId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DrainStop {
    /// The queue was drained empty.
    Emptied,
    /// An entry failed and was moved to the tail.
    RetryScheduled,
    WentOffline,
    AlreadyDraining,
    Offline,
    NothingQueued,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    pub synced: usize,
    pub evicted: usize,
    pub remaining: usize,
    pub stopped: DrainStop,
}

impl DrainReport {
    fn stopped(stopped: DrainStop, remaining: usize) -> Self {
        Self {
            synced: 0,
            evicted: 0,
            remaining,
            stopped,
        }
    }
}

/// Holds the draining flag for the lifetime of one pass.
struct DrainGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> DrainGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

struct Inner {
    queue: RwLock<RequestQueue>,
    store: QueueStore,
    executor: Arc<dyn RequestExecutor>,
    monitor: Arc<ConnectivityMonitor>,
    notifier: Notifier,
    draining: AtomicBool,
    max_retries: u32,
    request_timeout: Duration,
    locale: Locale,
}

#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("state", &self.state())
            .field("max_retries", &self.inner.max_retries)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Builds a dispatcher and restores whatever the store holds.
    pub fn new(
        store: QueueStore,
        executor: Arc<dyn RequestExecutor>,
        monitor: Arc<ConnectivityMonitor>,
        notifier: Notifier,
        config: &ServiceConfig,
    ) -> Self {
        let restored = store.load();
        if !restored.is_empty() {
            info!(count = restored.len(), "restored pending requests");
        }

        Self {
            inner: Arc::new(Inner {
                queue: RwLock::new(RequestQueue::from_entries(restored)),
                store,
                executor,
                monitor,
                notifier,
                draining: AtomicBool::new(false),
                max_retries: config.max_retries,
                request_timeout: config.request_timeout(),
                locale: config.locale,
            }),
        }
    }

    pub fn state(&self) -> DispatcherState {
        if self.inner.draining.load(Ordering::Acquire) {
            DispatcherState::Draining
        } else {
            DispatcherState::Idle
        }
    }

    pub fn is_online(&self) -> bool {
        self.inner.monitor.is_online()
    }

    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.inner.monitor
    }

    pub fn notifier(&self) -> &Notifier {
        &self.inner.notifier
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.inner.notifier.subscribe()
    }

    pub async fn queue_len(&self) -> usize {
        self.inner.queue.read().await.len()
    }

    pub async fn snapshot(&self) -> Vec<QueuedRequest> {
        self.inner.queue.read().await.snapshot()
    }

    /// Runs `operation` now when online, otherwise queues it.
    #[instrument(skip(self, operation), fields(kind = %operation.kind()))]
    pub async fn submit(&self, operation: HiveOperation) -> Result<SubmitOutcome, DispatchError> {
        if self.is_online() {
            let outcome = self.execute(&operation).await?;
            return Ok(SubmitOutcome::Applied(outcome));
        }

        let entry = QueuedRequest::new(operation, self.inner.max_retries);
        let id = entry.id.clone();
        let kind = entry.kind();
        {
            let mut queue = self.inner.queue.write().await;
            if let Err(e) = queue.push_back(entry) {
                warn!(error = %e, pending = queue.len(), "refusing to queue request");
                return Err(e.into());
            }
            self.inner.store.save(&queue.snapshot());
            info!(request_id = %id, pending = queue.len(), "queued while offline");
        }

        self.inner.notifier.emit(Notification::Enqueued {
            operation: kind,
            id: id.clone(),
        });
        Ok(SubmitOutcome::Queued(id))
    }

    /// Replays the queue head-first until it empties, an entry is requeued
    /// for retry, or connectivity drops. A call while a pass is running
    /// returns immediately.
    #[instrument(skip(self))]
    pub async fn drain(&self) -> DrainReport {
        let Some(_guard) = DrainGuard::acquire(&self.inner.draining) else {
            info!("drain already in progress");
            return DrainReport::stopped(DrainStop::AlreadyDraining, self.queue_len().await);
        };

        let pending = self.queue_len().await;
        if !self.is_online() {
            return DrainReport::stopped(DrainStop::Offline, pending);
        }
        if pending == 0 {
            return DrainReport::stopped(DrainStop::NothingQueued, 0);
        }

        info!(pending, "draining queue");
        self.inner
            .notifier
            .emit(Notification::SyncStarted { pending });

        let mut report = DrainReport::stopped(DrainStop::Emptied, pending);
        loop {
            if !self.is_online() {
                report.stopped = DrainStop::WentOffline;
                break;
            }

            let Some(head) = self.inner.queue.read().await.head().cloned() else {
                report.stopped = DrainStop::Emptied;
                break;
            };

            let result = self.execute(&head.operation).await;

            let mut queue = self.inner.queue.write().await;
            match result {
                Ok(outcome) => {
                    queue.remove(&head.id);
                    self.inner.store.save(&queue.snapshot());
                    drop(queue);

                    info!(request_id = %head.id, hive_id = %outcome.hive_id(), "replayed");
                    report.synced += 1;
                    self.inner.notifier.emit(Notification::Synced {
                        operation: head.kind(),
                        id: head.id,
                    });
                }
                Err(err) => match queue.fail(&head.id) {
                    Ok(FailureOutcome::Evicted(entry)) => {
                        self.inner.store.save(&queue.snapshot());
                        drop(queue);

                        error!(
                            request_id = %entry.id,
                            attempts = entry.retry_count,
                            category = err.category().code(),
                            error = %err,
                            "giving up on request"
                        );
                        report.evicted += 1;
                        self.inner.notifier.emit(Notification::SyncFailed {
                            operation: entry.kind(),
                            id: entry.id,
                            message: err.user_message(self.inner.locale),
                        });
                    }
                    Ok(FailureOutcome::Requeued(entry)) => {
                        self.inner.store.save(&queue.snapshot());
                        drop(queue);

                        warn!(
                            request_id = %entry.id,
                            attempt = entry.retry_count,
                            max = entry.max_retries,
                            category = err.category().code(),
                            error = %err,
                            "replay failed, moved to tail"
                        );
                        self.inner.notifier.emit(Notification::RetryScheduled {
                            operation: entry.kind(),
                            id: entry.id,
                            attempt: entry.retry_count,
                            max: entry.max_retries,
                            message: err.user_message(self.inner.locale),
                        });
                        report.stopped = DrainStop::RetryScheduled;
                        break;
                    }
                    // Cleared while the request was in flight.
                    Err(OutboxError::NotFound(_)) => {}
                    Err(e) => {
                        warn!(error = %e, "queue rejected failure bookkeeping");
                    }
                },
            }
        }

        report.remaining = self.queue_len().await;
        info!(
            synced = report.synced,
            evicted = report.evicted,
            remaining = report.remaining,
            stopped = ?report.stopped,
            "drain finished"
        );
        if report.stopped == DrainStop::Emptied {
            self.inner.notifier.emit(Notification::AllSynchronized);
        }
        report
    }

    /// User-triggered sync. An empty queue only reports that there is
    /// nothing to do.
    #[instrument(skip(self))]
    pub async fn manual_drain(&self) -> DrainReport {
        if self.queue_len().await == 0 {
            self.inner.notifier.emit(Notification::NothingToSync);
            return DrainReport::stopped(DrainStop::NothingQueued, 0);
        }
        self.drain().await
    }

    /// Drops every pending request. Returns how many were removed.
    pub async fn clear(&self) -> usize {
        let mut queue = self.inner.queue.write().await;
        let removed = queue.clear();
        self.inner.store.save(&queue.snapshot());
        drop(queue);
        if removed > 0 {
            warn!(removed, "cleared pending requests");
            self.inner
                .notifier
                .emit(Notification::QueueCleared { removed });
        }
        removed
    }

    /// Listens for connectivity transitions until the handle is dropped.
    pub fn attach(&self) -> ListenerHandle {
        let mut events = self.inner.monitor.subscribe();
        let dispatcher = self.clone();

        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(ConnectivityEvent::BecameOnline) => dispatcher.on_online().await,
                    Ok(ConnectivityEvent::BecameOffline) => dispatcher.on_offline(),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "missed connectivity events, resyncing");
                        if dispatcher.is_online() {
                            dispatcher.on_online().await;
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        ListenerHandle::new(task)
    }

    async fn on_online(&self) {
        let pending = self.queue_len().await;
        self.inner
            .notifier
            .emit(Notification::ConnectionRestored { pending });
        if pending > 0 {
            self.drain().await;
        }
    }

    fn on_offline(&self) {
        self.inner.notifier.emit(Notification::ConnectionLost);
    }

    async fn execute(&self, operation: &HiveOperation) -> Result<ExecutionOutcome, ExecutorError> {
        let timeout = self.inner.request_timeout;
        match tokio::time::timeout(timeout, self.inner.executor.execute(operation)).await {
            Ok(result) => result,
            Err(_) => Err(ExecutorError::Timeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }
}
