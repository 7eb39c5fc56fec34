//! RequestQueue - bounded, prioritized, retrying scheduler for async
//! operations.
//!
//! # Flow
//! 1. `enqueue()` stores a record (Queued) and inserts its id into the
//!    pending order.
//! 2. `pump()` moves the head of the pending order to Running while a slot
//!    is free and spawns the attempt.
//! 3. When an attempt ends the slot is released at once. The record either
//!    settles (Completed / Failed) or waits out a backoff timer
//!    (RetryScheduled) and goes back to the pending order.
//!
//! All state lives behind one mutex. Every mutation happens in a short
//! critical section with no `.await` inside; subscribers run after the lock
//! is released.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

use super::operation::{Operation, QueuedOperation, Settlement, Ticket};
use super::pending::{PendingEntry, PendingQueue};
use super::record::RequestRecord;
use super::{RequestState, RetryPolicy, lock};
use crate::config::QueueConfig;
use crate::domain::RequestId;
use crate::error::ConfigError;
use crate::observability::{PendingView, QueueSnapshot, Subscribers, Subscription};
use crate::ports::{IdGenerator, SystemClock, UlidGenerator};
use crate::status::{QueuePosition, RequestStatus};

/// Per-request options for `enqueue`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnqueueOptions {
    /// Higher runs sooner. Default 0.
    pub priority: i32,

    /// Free-form name that shows up in log events and snapshots.
    pub label: Option<String>,
}

impl EnqueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

#[derive(Default)]
struct QueueState {
    /// Arena of live requests (single source of truth).
    records: HashMap<RequestId, RequestRecord>,

    /// Ids waiting for a slot, in run order.
    pending: PendingQueue,

    /// Requests holding a slot.
    running: usize,

    /// Requests in RetryScheduled.
    backing_off: usize,

    next_seq: u64,
    version: u64,
}

impl QueueState {
    fn insert_pending(&mut self, record: RequestRecord) {
        self.pending.insert(PendingEntry {
            priority: record.priority,
            seq: record.seq,
            id: record.id,
        });
        self.records.insert(record.id, record);
    }

    fn position(&self, id: RequestId) -> QueuePosition {
        if let Some(index) = self.pending.position(id) {
            return QueuePosition::Pending(index + 1);
        }
        match self.records.get(&id).map(|record| record.state) {
            Some(RequestState::Running) => QueuePosition::Running,
            Some(RequestState::RetryScheduled) => QueuePosition::BackingOff,
            _ => QueuePosition::Unknown,
        }
    }

    /// Counts are O(1). `with_pending` adds the per-request list, which
    /// costs O(pending).
    fn snapshot(&self, with_pending: bool) -> QueueSnapshot {
        let pending = if with_pending {
            self.pending
                .iter()
                .filter_map(|entry| self.records.get(&entry.id))
                .map(|record| PendingView {
                    id: record.id,
                    priority: record.priority,
                    retry_count: record.retry_count,
                    label: record.label.clone(),
                })
                .collect()
        } else {
            Vec::new()
        };

        QueueSnapshot {
            version: self.version,
            pending_count: self.pending.len(),
            running_count: self.running,
            backing_off_count: self.backing_off,
            pending,
        }
    }
}

struct Inner {
    config: QueueConfig,
    policy: RetryPolicy,
    ids: Box<dyn IdGenerator>,
    state: Mutex<QueueState>,
    subscribers: Arc<Subscribers>,
    snapshots: watch::Sender<QueueSnapshot>,
}

impl Inner {
    /// Record a state change: bump the version and refresh the watch channel.
    /// Returns the snapshot to hand to subscribers once the lock is dropped.
    ///
    /// The pending list is only built while someone is listening.
    fn commit(&self, state: &mut QueueState) -> QueueSnapshot {
        state.version += 1;
        let observed = !self.subscribers.is_empty() || self.snapshots.receiver_count() > 0;
        let snapshot = state.snapshot(observed);
        self.snapshots.send_replace(snapshot.clone());
        snapshot
    }

    fn publish(&self, snapshot: &QueueSnapshot) {
        self.subscribers.notify(snapshot);
    }

    /// Fill free slots from the head of the pending order.
    fn pump(inner: &Arc<Inner>) {
        loop {
            let (id, attempt, operation, snapshot) = {
                let mut guard = lock(&inner.state);
                let state = &mut *guard;
                if state.running >= inner.config.max_concurrent || state.pending.is_empty() {
                    return;
                }
                let Some(entry) = state.pending.pop_front() else {
                    return;
                };
                let Some(record) = state.records.get_mut(&entry.id) else {
                    continue;
                };
                let Some(operation) = record.start_attempt() else {
                    continue;
                };
                let attempt = record.attempts;
                debug!(
                    request = %entry.id,
                    attempt,
                    priority = record.priority,
                    label = record.label.as_deref(),
                    "dispatching request"
                );
                state.running += 1;
                (entry.id, attempt, operation, inner.commit(state))
            };

            inner.publish(&snapshot);
            tokio::spawn(Inner::run_attempt(Arc::clone(inner), id, attempt, operation));
        }
    }

    async fn run_attempt(
        inner: Arc<Inner>,
        id: RequestId,
        attempt: u32,
        mut operation: Box<dyn Operation>,
    ) {
        let result = AssertUnwindSafe(operation.attempt()).catch_unwind().await;
        match result {
            Ok(result) => Inner::finish_attempt(&inner, id, operation, result),
            Err(_) => {
                error!(request = %id, attempt, "operation panicked");
                Inner::abandon(&inner, id, operation);
            }
        }
    }

    /// Release the slot and decide: settle, or retry after a backoff delay.
    fn finish_attempt(
        inner: &Arc<Inner>,
        id: RequestId,
        operation: Box<dyn Operation>,
        result: Result<(), String>,
    ) {
        let (settle, snapshot) = {
            let mut guard = lock(&inner.state);
            let state = &mut *guard;
            state.running = state.running.saturating_sub(1);

            let settle = match (state.records.remove(&id), result) {
                (None, _) => Some(operation),
                (Some(mut record), Ok(())) => {
                    record.mark_completed();
                    debug!(
                        request = %id,
                        attempts = record.attempts,
                        waited_ms = u64::try_from(record.enqueued_at.elapsed().as_millis())
                            .unwrap_or(u64::MAX),
                        "request completed"
                    );
                    Some(operation)
                }
                (Some(mut record), Err(error)) if inner.policy.should_retry(record.retry_count) => {
                    let retry = record.retry_count + 1;
                    let delay = inner.policy.next_delay(retry);
                    let priority = inner.policy.boosted_priority(record.base_priority, retry);
                    warn!(
                        request = %id,
                        retry,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        priority,
                        %error,
                        "request failed; retry scheduled"
                    );
                    record.schedule_retry(operation, error, priority);
                    let timer = tokio::spawn(Inner::backoff(Arc::clone(inner), id, delay));
                    record.backoff = Some(timer.abort_handle());
                    state.records.insert(id, record);
                    state.backing_off += 1;
                    None
                }
                (Some(mut record), Err(error)) => {
                    warn!(
                        request = %id,
                        attempts = record.attempts,
                        %error,
                        "request failed; retries exhausted"
                    );
                    record.mark_failed(error);
                    Some(operation)
                }
            };
            (settle, inner.commit(state))
        };

        if let Some(operation) = settle {
            operation.settle(Settlement::Deliver);
        }
        inner.publish(&snapshot);
        Inner::pump(inner);
    }

    /// The operation panicked: release the slot and fail the request for good.
    fn abandon(inner: &Arc<Inner>, id: RequestId, operation: Box<dyn Operation>) {
        let snapshot = {
            let mut guard = lock(&inner.state);
            let state = &mut *guard;
            state.running = state.running.saturating_sub(1);
            if let Some(mut record) = state.records.remove(&id) {
                record.mark_failed("operation panicked".to_string());
            }
            inner.commit(state)
        };

        operation.settle(Settlement::Abort);
        inner.publish(&snapshot);
        Inner::pump(inner);
    }

    /// Wait out the delay, then put the request back in the pending order.
    async fn backoff(inner: Arc<Inner>, id: RequestId, delay: Duration) {
        tokio::time::sleep(delay).await;

        let snapshot = {
            let mut guard = lock(&inner.state);
            let state = &mut *guard;
            // cancelled while waiting
            let Some(record) = state.records.get_mut(&id) else {
                return;
            };
            if !record.requeue() {
                return;
            }
            state.backing_off = state.backing_off.saturating_sub(1);
            debug!(
                request = %id,
                retry = record.retry_count,
                priority = record.priority,
                "request requeued after backoff"
            );
            state.pending.insert(PendingEntry {
                priority: record.priority,
                seq: record.seq,
                id,
            });
            inner.commit(state)
        };

        inner.publish(&snapshot);
        Inner::pump(&inner);
    }
}

/// In-memory request queue.
///
/// Cloning is cheap and every clone drives the same queue, so one instance
/// can be shared by a whole application while tests build their own.
///
/// Must be used from within a Tokio runtime: attempts and backoff timers run
/// as spawned tasks.
#[derive(Clone)]
pub struct RequestQueue {
    inner: Arc<Inner>,
}

impl RequestQueue {
    pub fn new(config: QueueConfig) -> Result<Self, ConfigError> {
        Self::with_id_generator(config, Box::new(UlidGenerator::new(SystemClock)))
    }

    pub fn with_id_generator(
        config: QueueConfig,
        ids: Box<dyn IdGenerator>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_parts(config, ids))
    }

    fn from_parts(config: QueueConfig, ids: Box<dyn IdGenerator>) -> Self {
        let (snapshots, _) = watch::channel(QueueSnapshot::default());
        Self {
            inner: Arc::new(Inner {
                policy: config.retry_policy(),
                config,
                ids,
                state: Mutex::new(QueueState::default()),
                subscribers: Arc::new(Subscribers::default()),
                snapshots,
            }),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Submit an operation.
    ///
    /// `operation` is called once per attempt. The returned ticket resolves
    /// with the first successful result, or with the error of the last
    /// attempt once retries are exhausted.
    pub fn enqueue<F, Fut, T, E>(&self, operation: F, options: EnqueueOptions) -> Ticket<T, E>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let id = self.inner.ids.generate_request_id();
        let operation = Box::new(QueuedOperation::new(operation, reply_tx));

        let snapshot = {
            let mut guard = lock(&self.inner.state);
            let state = &mut *guard;
            let seq = state.next_seq;
            state.next_seq += 1;

            debug!(
                request = %id,
                priority = options.priority,
                label = options.label.as_deref(),
                pending = state.pending.len(),
                "request enqueued"
            );
            state.insert_pending(RequestRecord::new(
                id,
                options.label,
                options.priority,
                seq,
                operation,
            ));
            self.inner.commit(state)
        };

        self.inner.publish(&snapshot);
        Inner::pump(&self.inner);
        Ticket::new(id, reply_rx)
    }

    pub fn position(&self, id: RequestId) -> QueuePosition {
        lock(&self.inner.state).position(id)
    }

    /// 1-based position while pending, 0 while in flight, -1 when unknown.
    pub fn position_in_queue(&self, id: RequestId) -> i64 {
        self.position(id).as_index()
    }

    /// True iff the request is Running right now.
    pub fn is_processing(&self, id: RequestId) -> bool {
        self.position(id) == QueuePosition::Running
    }

    pub fn status(&self, id: RequestId) -> Option<RequestStatus> {
        let state = lock(&self.inner.state);
        let position = state.position(id);
        if position == QueuePosition::Unknown {
            return None;
        }
        let retry_count = state.records.get(&id).map_or(0, |record| record.retry_count);
        Some(RequestStatus {
            id,
            position,
            total: state.pending.len() + state.running + state.backing_off,
            retry_count,
        })
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        lock(&self.inner.state).snapshot(true)
    }

    /// Register `callback`. It is called right away with the current
    /// snapshot, then after every state change until unsubscribed.
    ///
    /// Callbacks run synchronously on whichever task changed the queue and
    /// must not block. A panicking callback is logged and skipped.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&QueueSnapshot) + Send + Sync + 'static,
    {
        let id = self.inner.ids.generate_subscriber_id();
        // register under the queue lock so no commit falls between the
        // current snapshot and the first notification
        let (entry, current) = {
            let state = lock(&self.inner.state);
            let entry = self.inner.subscribers.add(id, callback);
            (entry, state.snapshot(true))
        };
        debug!(subscriber = %id, version = current.version, "subscriber registered");

        entry.deliver(&current);
        Subscription::new(id, Arc::downgrade(&self.inner.subscribers))
    }

    /// Snapshots as a watch channel (latest value wins).
    pub fn watch(&self) -> watch::Receiver<QueueSnapshot> {
        let state = lock(&self.inner.state);
        // the stored value may lack the pending list if nobody was watching
        self.inner.snapshots.send_replace(state.snapshot(true));
        self.inner.snapshots.subscribe()
    }

    /// Cancel every request that is not running: pending ones and ones
    /// waiting out a backoff delay. Their tickets resolve with
    /// `RequestError::Cancelled`. Running requests are left alone.
    ///
    /// Returns how many requests were cancelled.
    pub fn clear_queue(&self) -> usize {
        let (cancelled, snapshot) = {
            let mut guard = lock(&self.inner.state);
            let state = &mut *guard;

            state.pending.clear();
            let ids: Vec<RequestId> = state
                .records
                .values()
                .filter(|record| record.state.is_cancellable())
                .map(|record| record.id)
                .collect();

            let cancelled: Vec<Box<dyn Operation>> = ids
                .iter()
                .filter_map(|id| state.records.remove(id))
                .filter_map(|mut record| record.mark_cancelled())
                .collect();
            state.backing_off = 0;
            info!(cancelled = cancelled.len(), "queue cleared");
            (cancelled, self.inner.commit(state))
        };

        let count = cancelled.len();
        for operation in cancelled {
            operation.settle(Settlement::Cancel);
        }
        self.inner.publish(&snapshot);
        count
    }
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::from_parts(
            QueueConfig::default(),
            Box::new(UlidGenerator::new(SystemClock)),
        )
    }
}

impl fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("RequestQueue")
            .field("config", &self.inner.config)
            .field("pending", &snapshot.pending_count)
            .field("running", &snapshot.running_count)
            .field("backing_off", &snapshot.backing_off_count)
            .field("subscribers", &self.inner.subscribers)
            .finish()
    }
}
