//! Append-only event store boundary.
//!
//! Tenant-scoped event streams, one per aggregate instance. Only the in-memory
//! backend ships here; the trait keeps the dispatcher independent of it.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
