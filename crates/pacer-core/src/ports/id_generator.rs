//! IdGenerator port - id minting behind a trait.
//!
//! # Implementations
//! - **UlidGenerator**: clock timestamp + random bits (default)

use crate::domain::ids::{RequestId, SubscriberId};
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator mints ids for requests and subscribers.
///
/// `Send + Sync` because one generator is shared by every clone of a queue.
pub trait IdGenerator: Send + Sync {
    fn generate_request_id(&self) -> RequestId;

    fn generate_subscriber_id(&self) -> SubscriberId;
}

/// UlidGenerator builds ULIDs from the clock time and random bits.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = u64::try_from(self.clock.now().timestamp_millis()).unwrap_or(0);
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_request_id(&self) -> RequestId {
        RequestId::from(self.next_ulid())
    }

    fn generate_subscriber_id(&self) -> SubscriberId {
        SubscriberId::from(self.next_ulid())
    }
}
