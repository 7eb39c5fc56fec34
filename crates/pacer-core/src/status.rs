//! Status - per-request feedback for a UI.
//!
//! Answers "where is my request?" with a position and a short message, the
//! way a queue indicator next to a search box would show it.

use std::fmt;

use serde::Serialize;

use crate::domain::RequestId;

/// Above this many requests in flight the queue counts as crowded.
pub const CROWDED_THRESHOLD: usize = 5;

/// Where a request currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "position", rename_all = "snake_case")]
pub enum QueuePosition {
    /// Waiting for a slot; 1-based position in run order.
    Pending(usize),
    Running,
    /// Waiting out a retry delay.
    BackingOff,
    /// Finished, cancelled, or never enqueued.
    Unknown,
}

impl QueuePosition {
    /// Numeric form: `n >= 1` pending, `0` in flight, `-1` unknown.
    ///
    /// A request backing off counts as in flight.
    pub fn as_index(self) -> i64 {
        match self {
            QueuePosition::Pending(n) => i64::try_from(n).unwrap_or(i64::MAX),
            QueuePosition::Running | QueuePosition::BackingOff => 0,
            QueuePosition::Unknown => -1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestStatus {
    pub id: RequestId,
    pub position: QueuePosition,
    /// Requests pending, running or backing off.
    pub total: usize,
    pub retry_count: u32,
}

impl RequestStatus {
    pub fn is_processing(&self) -> bool {
        self.position == QueuePosition::Running
    }

    /// `None` when there is nothing to show.
    pub fn phase(&self) -> Option<StatusPhase> {
        let phase = match self.position {
            QueuePosition::Running => StatusPhase::Processing,
            QueuePosition::BackingOff => StatusPhase::Retrying {
                retry: self.retry_count,
            },
            QueuePosition::Pending(1) => StatusPhase::Next,
            QueuePosition::Pending(position) if self.total > CROWDED_THRESHOLD => {
                StatusPhase::Crowded {
                    position,
                    total: self.total,
                }
            }
            QueuePosition::Pending(position) => StatusPhase::Waiting {
                position,
                total: self.total,
            },
            QueuePosition::Unknown => return None,
        };
        Some(phase)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum StatusPhase {
    Processing,
    Next,
    Crowded { position: usize, total: usize },
    Waiting { position: usize, total: usize },
    Retrying { retry: u32 },
}

impl fmt::Display for StatusPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusPhase::Processing => write!(f, "your request is being processed"),
            StatusPhase::Next => write!(f, "you are next in line"),
            StatusPhase::Crowded { position, total } => {
                write!(f, "many requests right now: position {position} of {total}")
            }
            StatusPhase::Waiting { position, total } => {
                write!(f, "waiting in line: position {position} of {total}")
            }
            StatusPhase::Retrying { retry } => {
                write!(f, "temporary failure, retrying (retry {retry})")
            }
        }
    }
}
