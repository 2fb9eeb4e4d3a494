use std::sync::Arc;

use thiserror::Error;

use equiptrack_core::{EquipmentTypeId, ExpectedVersion, InstanceId, MovementId};
use equiptrack_inventory::{EquipmentInstance, MovementType, StockMovement, UncommittedMovement};

use super::query::{InstanceFilter, MovementFilter, Page, Pagination};

/// Storage operation error.
///
/// These are **infrastructure errors** (races, uniqueness, backend failures) as
/// opposed to domain errors (validation, illegal transitions).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The instance version moved underneath the caller.
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    /// Serial numbers (or IMEIs) already held by live instances. Lists every collision.
    #[error("serial number already registered: {}", serials.join(", "))]
    Duplicate { serials: Vec<String> },

    #[error("not found: {0}")]
    NotFound(String),

    /// Connection, query, decoding or lock-poisoning failures.
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Storage boundary for the instance registry and the movement ledger.
///
/// ## Atomicity
///
/// Every mutating call is a single unit of work: either everything it was
/// handed becomes visible or nothing does.
///
/// - `insert_instances` is an insert-if-absent on serial number and IMEI among
///   live (non-retired) instances. One collision rejects the whole batch.
/// - `commit_movement` appends one movement and replaces one instance, guarded
///   by the instance's expected version.
///
/// ## Ordering
///
/// The store assigns each committed movement a ledger-wide `sequence`
/// (strictly increasing). Movement listings are ordered by `created_at`
/// descending, then `sequence` descending.
pub trait InventoryStore: Send + Sync {
    /// Insert new instances, plus the movements that accompany them (e.g. the
    /// purchase entries of a bulk import). Returns the committed movements.
    fn insert_instances(
        &self,
        instances: Vec<EquipmentInstance>,
        movements: Vec<UncommittedMovement>,
    ) -> Result<Vec<StockMovement>, StoreError>;

    /// Load an instance by id, including retired ones.
    fn load_instance(&self, id: InstanceId) -> Result<Option<EquipmentInstance>, StoreError>;

    /// Replace an instance without writing a movement (retirement).
    fn update_instance(
        &self,
        instance: &EquipmentInstance,
        expected_version: ExpectedVersion,
    ) -> Result<(), StoreError>;

    /// Append `movement` and replace its instance with `instance` atomically.
    fn commit_movement(
        &self,
        movement: UncommittedMovement,
        instance: &EquipmentInstance,
        expected_version: ExpectedVersion,
    ) -> Result<StockMovement, StoreError>;

    fn load_movement(&self, id: MovementId) -> Result<Option<StockMovement>, StoreError>;

    /// Most recent movement of an instance (highest sequence).
    fn latest_movement(&self, instance_id: InstanceId) -> Result<Option<StockMovement>, StoreError>;

    /// Full history of an instance in ledger order (ascending sequence).
    fn instance_movements(&self, instance_id: InstanceId) -> Result<Vec<StockMovement>, StoreError>;

    fn query_movements(
        &self,
        filter: &MovementFilter,
        pagination: Pagination,
    ) -> Result<Page<StockMovement>, StoreError>;

    /// Number of movements per type matching `filter` (types with no match omitted).
    fn movement_counts(&self, filter: &MovementFilter) -> Result<Vec<(MovementType, u64)>, StoreError>;

    fn query_instances(
        &self,
        filter: &InstanceFilter,
        pagination: Pagination,
    ) -> Result<Page<EquipmentInstance>, StoreError>;

    /// Every live instance of one equipment type (stock summaries).
    fn instances_of_type(
        &self,
        equipment_type_id: EquipmentTypeId,
    ) -> Result<Vec<EquipmentInstance>, StoreError>;
}

impl<S> InventoryStore for Arc<S>
where
    S: InventoryStore + ?Sized,
{
    fn insert_instances(
        &self,
        instances: Vec<EquipmentInstance>,
        movements: Vec<UncommittedMovement>,
    ) -> Result<Vec<StockMovement>, StoreError> {
        (**self).insert_instances(instances, movements)
    }

    fn load_instance(&self, id: InstanceId) -> Result<Option<EquipmentInstance>, StoreError> {
        (**self).load_instance(id)
    }

    fn update_instance(
        &self,
        instance: &EquipmentInstance,
        expected_version: ExpectedVersion,
    ) -> Result<(), StoreError> {
        (**self).update_instance(instance, expected_version)
    }

    fn commit_movement(
        &self,
        movement: UncommittedMovement,
        instance: &EquipmentInstance,
        expected_version: ExpectedVersion,
    ) -> Result<StockMovement, StoreError> {
        (**self).commit_movement(movement, instance, expected_version)
    }

    fn load_movement(&self, id: MovementId) -> Result<Option<StockMovement>, StoreError> {
        (**self).load_movement(id)
    }

    fn latest_movement(&self, instance_id: InstanceId) -> Result<Option<StockMovement>, StoreError> {
        (**self).latest_movement(instance_id)
    }

    fn instance_movements(&self, instance_id: InstanceId) -> Result<Vec<StockMovement>, StoreError> {
        (**self).instance_movements(instance_id)
    }

    fn query_movements(
        &self,
        filter: &MovementFilter,
        pagination: Pagination,
    ) -> Result<Page<StockMovement>, StoreError> {
        (**self).query_movements(filter, pagination)
    }

    fn movement_counts(&self, filter: &MovementFilter) -> Result<Vec<(MovementType, u64)>, StoreError> {
        (**self).movement_counts(filter)
    }

    fn query_instances(
        &self,
        filter: &InstanceFilter,
        pagination: Pagination,
    ) -> Result<Page<EquipmentInstance>, StoreError> {
        (**self).query_instances(filter, pagination)
    }

    fn instances_of_type(
        &self,
        equipment_type_id: EquipmentTypeId,
    ) -> Result<Vec<EquipmentInstance>, StoreError> {
        (**self).instances_of_type(equipment_type_id)
    }
}
