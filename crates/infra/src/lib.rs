//! Infrastructure layer: storage, reference data, configuration and the
//! registry/ledger services built on them.

pub mod config;
pub mod error;
pub mod ledger;
pub mod locks;
pub mod reference;
pub mod registry;
pub mod store;


pub use config::{DatabaseConfig, InventoryConfig};
pub use error::{ErrorKind, InventoryError, InventoryResult};
pub use ledger::{MOVEMENT_STREAM_TYPE, MovementLedger};
pub use locks::InstanceLocks;
pub use reference::{InMemoryReferenceData, ReferenceData};
pub use registry::{BulkImport, ImportReport, InstanceRegistry};
pub use store::{
    InMemoryInventoryStore, InstanceFilter, InventoryStore, MovementFilter, MovementStats, Page,
    Pagination, PostgresInventoryStore, PostgresReferenceData, StoreError,
};
