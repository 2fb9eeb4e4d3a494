//! Storage boundary for the registry and the ledger.
//!
//! `InMemoryInventoryStore` backs tests/dev; `PostgresInventoryStore` is the
//! durable implementation.

pub mod in_memory;
pub mod postgres;
pub mod query;
pub mod r#trait;

pub use in_memory::InMemoryInventoryStore;
pub use postgres::{PostgresInventoryStore, PostgresReferenceData};
pub use query::{InstanceFilter, MovementFilter, MovementStats, Page, Pagination};
pub use r#trait::{InventoryStore, StoreError};
