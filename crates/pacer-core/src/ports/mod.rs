//! Ports - seams the queue depends on.
//!
//! Time and id generation sit behind traits so a queue can be built with a
//! deterministic clock in tests.

pub mod clock;
pub mod id_generator;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
