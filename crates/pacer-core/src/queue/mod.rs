//! Queue module: state machine, retry policy, pending order and the
//! `RequestQueue` scheduler.

mod operation;
mod pending;
mod record;
mod request_queue;
mod retry;
mod state;

pub use operation::Ticket;
pub use request_queue::{EnqueueOptions, RequestQueue};
pub use retry::RetryPolicy;
pub use state::RequestState;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a std mutex, recovering the data if a previous holder panicked.
///
/// Queue state is only mutated in short, non-panicking critical sections, so
/// the data behind a poisoned lock is still consistent.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
