//! Domain model.

pub mod ids;

pub use self::ids::{Id, IdMarker, RequestId, SubscriberId};
