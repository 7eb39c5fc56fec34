//! Request state machine.

use serde::{Deserialize, Serialize};

/// Request state.
///
/// State transitions:
/// - Queued -> Running -> Completed
/// - Queued -> Running -> RetryScheduled -> Queued (until the retry limit)
/// - Queued -> Running -> Failed (retry limit reached)
/// - Queued | RetryScheduled -> Cancelled (queue cleared)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    /// Waiting for a concurrency slot.
    Queued,

    /// Operation in flight; holds a slot.
    Running,

    /// Waiting out a backoff delay; holds no slot.
    RetryScheduled,

    Completed,

    /// Retries exhausted.
    Failed,

    Cancelled,
}

impl RequestState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestState::Completed | RequestState::Failed | RequestState::Cancelled
        )
    }

    /// Can `clear_queue` cancel a request in this state?
    pub fn is_cancellable(self) -> bool {
        matches!(self, RequestState::Queued | RequestState::RetryScheduled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(RequestState::Completed.is_terminal());
        assert!(RequestState::Failed.is_terminal());
        assert!(RequestState::Cancelled.is_terminal());
        assert!(!RequestState::Running.is_terminal());
        assert!(!RequestState::RetryScheduled.is_terminal());
    }

    #[test]
    fn running_requests_are_not_cancellable() {
        assert!(RequestState::Queued.is_cancellable());
        assert!(RequestState::RetryScheduled.is_cancellable());
        assert!(!RequestState::Running.is_cancellable());
    }
}
