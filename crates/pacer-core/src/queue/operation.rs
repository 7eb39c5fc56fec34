//! Operation - the unit of work a request carries.
//!
//! Two layers:
//! - **Typed**: `QueuedOperation<F, T, E>` owns the caller's closure and the
//!   reply channel of its `Ticket`.
//! - **Erased**: `dyn Operation` is what the queue stores, so one queue can
//!   carry operations with different result types.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::domain::RequestId;
use crate::error::RequestError;

/// How the queue settles a request's ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Settlement {
    /// Hand over the result of the last attempt (success or failure).
    Deliver,
    /// Queue was cleared before the request ran to completion.
    Cancel,
    /// The operation panicked.
    Abort,
}

/// Object-safe view of a queued operation.
#[async_trait]
pub(crate) trait Operation: Send {
    /// Run one attempt. Keeps the result for `settle`; on failure returns the
    /// error rendered for logs.
    async fn attempt(&mut self) -> Result<(), String>;

    /// Resolve the caller's ticket. Consumes the operation, so a ticket is
    /// settled at most once.
    fn settle(self: Box<Self>, settlement: Settlement);
}

pub(crate) struct QueuedOperation<F, T, E> {
    factory: F,
    last: Option<Result<T, E>>,
    reply: oneshot::Sender<Result<T, RequestError<E>>>,
}

impl<F, T, E> QueuedOperation<F, T, E> {
    pub fn new(factory: F, reply: oneshot::Sender<Result<T, RequestError<E>>>) -> Self {
        Self {
            factory,
            last: None,
            reply,
        }
    }
}

#[async_trait]
impl<F, Fut, T, E> Operation for QueuedOperation<F, T, E>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: fmt::Display + Send + 'static,
{
    async fn attempt(&mut self) -> Result<(), String> {
        let result = (self.factory)().await;
        let summary = match &result {
            Ok(_) => Ok(()),
            Err(err) => Err(err.to_string()),
        };
        self.last = Some(result);
        summary
    }

    fn settle(self: Box<Self>, settlement: Settlement) {
        let QueuedOperation { last, reply, .. } = *self;
        let outcome = match (settlement, last) {
            (Settlement::Deliver, Some(Ok(value))) => Ok(value),
            (Settlement::Deliver, Some(Err(err))) => Err(RequestError::Failed(err)),
            (Settlement::Cancel, _) => Err(RequestError::Cancelled),
            (Settlement::Abort, _) | (Settlement::Deliver, None) => Err(RequestError::Aborted),
        };
        // the caller may have dropped its ticket
        let _ = reply.send(outcome);
    }
}

/// Handle returned by `RequestQueue::enqueue`.
///
/// Await it to get the final outcome of the request. Retries are invisible
/// here except as delay. Dropping a ticket does not cancel the request.
#[must_use = "a ticket does nothing unless awaited; dropping it does not cancel the request"]
pub struct Ticket<T, E> {
    id: RequestId,
    reply: oneshot::Receiver<Result<T, RequestError<E>>>,
}

impl<T, E> Ticket<T, E> {
    pub(crate) fn new(id: RequestId, reply: oneshot::Receiver<Result<T, RequestError<E>>>) -> Self {
        Self { id, reply }
    }

    /// Id to use with `position`, `is_processing` and `status`.
    pub fn id(&self) -> RequestId {
        self.id
    }
}

impl<T, E> fmt::Debug for Ticket<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ticket").field("id", &self.id).finish()
    }
}

impl<T, E> Future for Ticket<T, E> {
    type Output = Result<T, RequestError<E>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.reply).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            // sender dropped without settling
            Poll::Ready(Err(_)) => Poll::Ready(Err(RequestError::Aborted)),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn ticket_pair<T, E>() -> (
        oneshot::Sender<Result<T, RequestError<E>>>,
        Ticket<T, E>,
    ) {
        let (tx, rx) = oneshot::channel();
        (tx, Ticket::new(RequestId::from_ulid(Ulid::new()), rx))
    }

    #[tokio::test]
    async fn deliver_hands_over_the_last_success() {
        let (tx, ticket) = ticket_pair::<u32, String>();
        let mut op = Box::new(QueuedOperation::new(|| async { Ok::<u32, String>(7) }, tx));

        assert_eq!(op.attempt().await, Ok(()));
        op.settle(Settlement::Deliver);

        assert_eq!(ticket.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn deliver_hands_over_the_last_error_unwrapped() {
        let (tx, ticket) = ticket_pair::<u32, String>();
        let mut calls = 0;
        let mut op = Box::new(QueuedOperation::new(
            move || {
                calls += 1;
                let attempt = calls;
                async move { Err::<u32, String>(format!("attempt {attempt}")) }
            },
            tx,
        ));

        assert_eq!(op.attempt().await, Err("attempt 1".to_string()));
        assert_eq!(op.attempt().await, Err("attempt 2".to_string()));
        op.settle(Settlement::Deliver);

        let err = ticket.await.unwrap_err();
        assert_eq!(err.into_failure(), Some("attempt 2".to_string()));
    }

    #[tokio::test]
    async fn cancel_overrides_any_result() {
        let (tx, ticket) = ticket_pair::<u32, String>();
        let op = Box::new(QueuedOperation::new(|| async { Ok::<u32, String>(1) }, tx));
        op.settle(Settlement::Cancel);

        assert!(ticket.await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn dropped_operation_aborts_the_ticket() {
        let (tx, ticket) = ticket_pair::<u32, String>();
        drop(QueuedOperation::new(|| async { Ok::<u32, String>(1) }, tx));

        assert!(matches!(ticket.await, Err(RequestError::Aborted)));
    }
}
