//! Domain events and their transport mechanics.
//!
//! - [`Event`]: the contract every domain event enum implements.
//! - [`EventEnvelope`]: tenant/stream metadata wrapped around a payload.
//! - [`EventBus`] / [`InMemoryEventBus`]: pub/sub fan-out to read models.
//! - [`execute`]: decide + apply for an aggregate, without storage.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use handler::execute;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
