//! Equipment inventory domain: serialized instances, stock movements and the
//! transition policy that links them.
//!
//! This crate contains business rules only, implemented as deterministic
//! domain logic (no IO, no clock, no storage).

pub mod catalog;
pub mod import;
pub mod instance;
pub mod movement;
pub mod policy;

pub use catalog::{EquipmentCatalogEntry, StockLevel, StockSummary};
pub use import::parse_serials;
pub use instance::{
    Condition, EquipmentInstance, InstanceRecord, InstanceState, InstanceStatus, NewInstance,
};
pub use movement::{
    MovementDirection, MovementRequest, MovementType, StockMovement, UncommittedMovement,
};
pub use policy::{
    ClientOutcome, FieldRule, LocationOutcome, MovementRule, StatusOutcome, Transition,
    TransitionPolicy,
};
