//! Domain events and their distribution mechanics.
//!
//! Business crates define concrete event enums implementing [`Event`]; the
//! [`EventBus`] moves [`EventEnvelope`]s to whoever is listening (notification,
//! reporting). Delivery guarantees belong to the bus implementation.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
