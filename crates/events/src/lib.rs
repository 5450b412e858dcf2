//! Lifecycle events and the pub/sub mechanics that carry them.

pub mod bus;
pub mod in_memory_bus;
pub mod job_event;

pub use bus::{EventBus, Subscription};
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use job_event::{JOB_FINISHED_TOPIC, JobTerminalEvent};
