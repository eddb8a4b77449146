//! Append-only event store boundary.
//!
//! Storage-agnostic abstraction for loading aggregate streams and appending to
//! one or more of them atomically.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, StreamAppend, UncommittedEvent};
