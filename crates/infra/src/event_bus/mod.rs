//! Event bus backends for terminal job events.
//!
//! The bus abstraction and the in-process bus live in `forgecrm-events`. The
//! Redis pub/sub bus lets several API processes share one event feed.

#[cfg(feature = "redis")]
pub mod redis_pubsub;

#[cfg(feature = "redis")]
pub use redis_pubsub::{DEFAULT_CHANNEL, RedisBusError, RedisPubSubEventBus};
