//! Job lifecycle events and the pub/sub mechanics used to distribute them.
//!
//! The Manifest Store is the source of truth; events are published only after
//! the transition they describe has been durably written.

pub mod bus;
pub mod in_memory_bus;
pub mod job_event;

pub use bus::{EventBus, Subscription};
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use job_event::JobEvent;
