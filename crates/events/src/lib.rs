//! Event primitives: the `Event` contract, publication envelopes and a
//! transport-agnostic pub/sub bus.
//!
//! Committed ledger entries are facts; after a commit they are wrapped in an
//! [`EventEnvelope`] and published so downstream consumers (reporting, sync,
//! notifications) never have to poll the store.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
