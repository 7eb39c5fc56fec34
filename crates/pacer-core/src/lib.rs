//! pacer-core
//!
//! In-process request queue for outbound API calls: bounded concurrency,
//! priority ordering, retries with exponential backoff, and observable state.
//!
//! # Modules
//! - **domain**: ids (`RequestId`, `SubscriberId`)
//! - **ports**: `Clock`, `IdGenerator`
//! - **queue**: `RequestQueue` + state machine, retry policy, pending order
//! - **observability**: `QueueSnapshot`, subscriptions
//! - **status**: per-request position / phase views
//! - **config**: `QueueConfig` (TOML)
//! - **error**: `RequestError`, `ConfigError`
//!
//! # Example
//! ```no_run
//! use pacer_core::{EnqueueOptions, QueueConfig, RequestQueue};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = RequestQueue::new(QueueConfig::default())?;
//! let ticket = queue.enqueue(
//!     || async { Ok::<_, std::io::Error>("profile") },
//!     EnqueueOptions::new().priority(5),
//! );
//! println!("position: {}", queue.position_in_queue(ticket.id()));
//! let profile = ticket.await?;
//! # let _ = profile;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod domain;
pub mod error;
pub mod observability;
pub mod ports;
pub mod queue;
pub mod status;

pub use config::QueueConfig;
pub use domain::{RequestId, SubscriberId};
pub use error::{ConfigError, RequestError};
pub use observability::{PendingView, QueueSnapshot, Subscription};
pub use queue::{EnqueueOptions, RequestQueue, RequestState, RetryPolicy, Ticket};
pub use status::{QueuePosition, RequestStatus, StatusPhase};
