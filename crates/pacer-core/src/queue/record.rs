//! Request record: the arena entry for one enqueued request.

use std::fmt;

use tokio::task::AbortHandle;
use tokio::time::Instant;

use super::RequestState;
use super::operation::Operation;
use crate::domain::RequestId;

/// Metadata + operation for a request in the queue.
///
/// Design:
/// - This is the single source of truth for request state.
/// - The pending order holds ids only.
/// - All state transitions happen here.
pub(crate) struct RequestRecord {
    pub id: RequestId,
    pub label: Option<String>,
    pub state: RequestState,

    /// Priority the caller asked for.
    pub base_priority: i32,

    /// Priority used for ordering (base + retry boost).
    pub priority: i32,

    /// Retries consumed so far.
    pub retry_count: u32,

    /// Attempts started so far (including the one in flight).
    pub attempts: u32,

    /// Enqueue order; FIFO tie-breaker within one priority.
    pub seq: u64,
    pub enqueued_at: Instant,

    pub last_error: Option<String>,

    /// The operation, while no attempt is executing it.
    pub operation: Option<Box<dyn Operation>>,

    /// Backoff timer, while RetryScheduled.
    pub backoff: Option<AbortHandle>,
}

impl RequestRecord {
    pub fn new(
        id: RequestId,
        label: Option<String>,
        priority: i32,
        seq: u64,
        operation: Box<dyn Operation>,
    ) -> Self {
        Self {
            id,
            label,
            state: RequestState::Queued,
            base_priority: priority,
            priority,
            retry_count: 0,
            attempts: 0,
            seq,
            enqueued_at: Instant::now(),
            last_error: None,
            operation: Some(operation),
            backoff: None,
        }
    }

    /// Queued -> Running. Hands the operation to the caller.
    pub fn start_attempt(&mut self) -> Option<Box<dyn Operation>> {
        let operation = self.operation.take()?;
        self.state = RequestState::Running;
        self.attempts += 1;
        Some(operation)
    }

    /// Running -> RetryScheduled. Takes the operation back.
    pub fn schedule_retry(&mut self, operation: Box<dyn Operation>, error: String, priority: i32) {
        self.state = RequestState::RetryScheduled;
        self.retry_count += 1;
        self.priority = priority;
        self.last_error = Some(error);
        self.operation = Some(operation);
    }

    /// RetryScheduled -> Queued.
    pub fn requeue(&mut self) -> bool {
        if self.state != RequestState::RetryScheduled {
            return false;
        }
        self.state = RequestState::Queued;
        self.backoff = None;
        true
    }

    pub fn mark_completed(&mut self) {
        self.state = RequestState::Completed;
    }

    pub fn mark_failed(&mut self, error: String) {
        self.state = RequestState::Failed;
        self.last_error = Some(error);
    }

    /// Queued | RetryScheduled -> Cancelled. Stops a pending backoff timer and
    /// returns the operation so its ticket can be rejected.
    pub fn mark_cancelled(&mut self) -> Option<Box<dyn Operation>> {
        if let Some(backoff) = self.backoff.take() {
            backoff.abort();
        }
        self.state = RequestState::Cancelled;
        self.operation.take()
    }
}

impl fmt::Debug for RequestRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestRecord")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("state", &self.state)
            .field("priority", &self.priority)
            .field("retry_count", &self.retry_count)
            .field("attempts", &self.attempts)
            .field("seq", &self.seq)
            .field("last_error", &self.last_error)
            .finish_non_exhaustive()
    }
}
