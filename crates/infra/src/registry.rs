//! Instance registry: authoritative current state of every serialized unit.
//!
//! Registration and bulk import write through the store's atomic
//! insert-if-absent; state changes arrive only from the movement ledger
//! (`apply_transition`) or from retirement.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use equiptrack_auth::{Actor, Permission, authorize};
use equiptrack_core::{
    AggregateRoot, Clock, EquipmentTypeId, ExpectedVersion, InstanceId, MovementId, SystemClock,
    WarehouseId,
};
use equiptrack_inventory::{
    Condition, EquipmentCatalogEntry, EquipmentInstance, InstanceStatus, MovementRequest,
    MovementType, NewInstance, StockMovement, StockSummary, Transition, TransitionPolicy,
    UncommittedMovement, parse_serials,
};

use crate::config::InventoryConfig;
use crate::error::{ErrorKind, InventoryError, InventoryResult};
use crate::locks::InstanceLocks;
use crate::reference::ReferenceData;
use crate::store::{InstanceFilter, InventoryStore, Page, Pagination};

/// Bulk registration of one equipment type into one warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkImport {
    pub equipment_type_id: EquipmentTypeId,
    pub warehouse_id: WarehouseId,
    pub status: InstanceStatus,
    pub condition: Condition,
    /// One serial number per line; blank lines are ignored.
    pub serials_text: String,
}

impl BulkImport {
    pub fn new(
        equipment_type_id: EquipmentTypeId,
        warehouse_id: WarehouseId,
        serials_text: impl Into<String>,
    ) -> Self {
        Self {
            equipment_type_id,
            warehouse_id,
            status: InstanceStatus::Available,
            condition: Condition::New,
            serials_text: serials_text.into(),
        }
    }
}

/// What a bulk import committed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportReport {
    pub instances: Vec<EquipmentInstance>,
    pub movements: Vec<StockMovement>,
}

impl ImportReport {
    pub fn imported(&self) -> usize {
        self.instances.len()
    }
}

#[derive(Debug)]
pub struct InstanceRegistry<S, R, C = SystemClock> {
    pub(crate) store: S,
    reference: R,
    pub(crate) locks: InstanceLocks,
    pub(crate) clock: C,
    pub(crate) config: InventoryConfig,
}

impl<S, R> InstanceRegistry<S, R, SystemClock> {
    pub fn new(store: S, reference: R, config: InventoryConfig) -> Self {
        Self::with_clock(store, reference, SystemClock, config)
    }
}

impl<S, R, C> InstanceRegistry<S, R, C> {
    pub fn with_clock(store: S, reference: R, clock: C, config: InventoryConfig) -> Self {
        Self {
            store,
            reference,
            locks: InstanceLocks::new(),
            clock,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn reference(&self) -> &R {
        &self.reference
    }

    pub fn config(&self) -> &InventoryConfig {
        &self.config
    }
}

impl<S, R, C> InstanceRegistry<S, R, C>
where
    S: InventoryStore,
    R: ReferenceData,
    C: Clock,
{
    /// Register one unit. Does not write a movement.
    #[instrument(
        skip(self, actor, new),
        fields(serial_number = %new.serial_number.trim(), actor = %actor.actor_id),
        err
    )]
    pub fn register(&self, actor: &Actor, new: NewInstance) -> InventoryResult<EquipmentInstance> {
        authorize(actor, &Permission::INVENTORY_MANAGE)?;
        self.require_catalog_entry(new.equipment_type_id)?;
        self.require_warehouse(new.warehouse_id)?;

        let instance = EquipmentInstance::register(InstanceId::new(), new, self.clock.now())?;
        self.store
            .insert_instances(vec![instance.clone()], Vec::new())
            .map_err(|e| InventoryError::from(e).with_instance(instance.id()))?;

        info!(instance_id = %instance.id(), status = %instance.status(), "instance registered");
        Ok(instance)
    }

    /// Register every serial in `import` and record one `purchase` movement per
    /// unit, all in one atomic batch.
    #[instrument(
        skip(self, actor, import),
        fields(
            equipment_type_id = %import.equipment_type_id,
            warehouse_id = %import.warehouse_id,
            actor = %actor.actor_id
        ),
        err
    )]
    pub fn import_serials(&self, actor: &Actor, import: BulkImport) -> InventoryResult<ImportReport> {
        authorize(actor, &Permission::INVENTORY_MANAGE)?;
        let entry = self.require_catalog_entry(import.equipment_type_id)?;
        self.require_warehouse(import.warehouse_id)?;

        if import.status != InstanceStatus::Available {
            // The purchase entry each unit receives always lands it in `available`.
            return Err(InventoryError::new(
                ErrorKind::Validation,
                format!("bulk import registers available units only (got '{}')", import.status),
            )
            .with_movement_type(MovementType::Purchase));
        }

        let serials = parse_serials(&import.serials_text)?;
        let at = self.clock.now();

        let mut instances = Vec::with_capacity(serials.len());
        let mut movements = Vec::with_capacity(serials.len());
        for serial in serials {
            let (instance, movement) = self.purchased_unit(actor, &import, &entry, serial, at)?;
            instances.push(instance);
            movements.push(movement);
        }

        let movements = self.store.insert_instances(instances.clone(), movements)?;

        info!(count = instances.len(), "bulk import committed");
        Ok(ImportReport { instances, movements })
    }

    fn purchased_unit(
        &self,
        actor: &Actor,
        import: &BulkImport,
        entry: &EquipmentCatalogEntry,
        serial: String,
        at: chrono::DateTime<chrono::Utc>,
    ) -> InventoryResult<(EquipmentInstance, UncommittedMovement)> {
        let reason = format!("bulk import - {} S/N: {}", entry.name, serial);
        let new = NewInstance::new(import.equipment_type_id, serial, import.warehouse_id)
            .with_status(import.status)
            .with_condition(import.condition);
        let registered = EquipmentInstance::register(InstanceId::new(), new, at)?;

        let request = MovementRequest::new(registered.id(), MovementType::Purchase, reason)
            .to_warehouse(import.warehouse_id);
        let transition = TransitionPolicy::decide(&request, &registered.state(), false)?;
        let instance = registered.with_transition(&transition, at)?;
        let movement = UncommittedMovement::from_request(
            MovementId::new(),
            request,
            actor.actor_id,
            &transition,
            instance.version(),
            at,
        );
        Ok((instance, movement))
    }

    /// Live instance by id.
    pub fn get(&self, instance_id: InstanceId) -> InventoryResult<EquipmentInstance> {
        match self.store.load_instance(instance_id)? {
            Some(instance) if !instance.is_retired() => Ok(instance),
            _ => Err(InventoryError::not_found(format!("instance {instance_id}")).with_instance(instance_id)),
        }
    }

    /// Apply a policy-approved transition and append its movement as one unit.
    ///
    /// Only the ledger calls this, while holding the instance lock.
    pub(crate) fn apply_transition(
        &self,
        current: &EquipmentInstance,
        transition: &Transition,
        movement: UncommittedMovement,
    ) -> InventoryResult<(StockMovement, EquipmentInstance)> {
        let next = current.with_transition(transition, movement.created_at)?;
        if movement.instance_version != next.version() {
            return Err(InventoryError::new(
                ErrorKind::InvariantViolation,
                format!(
                    "movement targets version {} but the instance would be at {}",
                    movement.instance_version,
                    next.version()
                ),
            ));
        }

        let committed = self
            .store
            .commit_movement(movement, &next, ExpectedVersion::Exact(current.version()))?;
        Ok((committed, next))
    }

    /// Soft-delete a sold or defective unit.
    #[instrument(skip(self, actor), fields(actor = %actor.actor_id), err)]
    pub fn retire(&self, actor: &Actor, instance_id: InstanceId) -> InventoryResult<EquipmentInstance> {
        authorize(actor, &Permission::INVENTORY_MANAGE)
            .map_err(|e| InventoryError::from(e).with_instance(instance_id))?;

        let retired = self.locks.with_lock(instance_id, || -> InventoryResult<EquipmentInstance> {
            let current = self.get(instance_id)?;
            let retired = current.retired(self.clock.now())?;
            self.store
                .update_instance(&retired, ExpectedVersion::Exact(current.version()))?;
            Ok(retired)
        })?;

        let retired = retired.inspect_err(|e| debug!(error = %e, "retire rejected"))
            .map_err(|e| e.with_instance(instance_id))?;
        info!(%instance_id, "instance retired");
        Ok(retired)
    }

    /// Instances ordered by serial number.
    pub fn list_instances(
        &self,
        filter: &InstanceFilter,
        pagination: Pagination,
    ) -> InventoryResult<Page<EquipmentInstance>> {
        Ok(self.store.query_instances(filter, self.config.paginate(pagination))?)
    }

    /// Per-status counts for one equipment type, graded against its stock thresholds.
    pub fn stock_summary(&self, equipment_type_id: EquipmentTypeId) -> InventoryResult<StockSummary> {
        let entry = self.require_catalog_entry(equipment_type_id)?;
        let instances = self.store.instances_of_type(equipment_type_id)?;
        Ok(StockSummary::from_instances(&entry, &instances))
    }

    fn require_catalog_entry(&self, id: EquipmentTypeId) -> InventoryResult<EquipmentCatalogEntry> {
        self.reference
            .catalog_entry(id)?
            .ok_or_else(|| InventoryError::not_found(format!("equipment type {id}")))
    }

    pub(crate) fn require_warehouse(&self, id: WarehouseId) -> InventoryResult<()> {
        if self.reference.warehouse_exists(id)? {
            Ok(())
        } else {
            Err(InventoryError::not_found(format!("warehouse {id}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use equiptrack_core::ActorId;
    use equiptrack_inventory::StockLevel;

    use super::*;
    use crate::reference::InMemoryReferenceData;
    use crate::store::InMemoryInventoryStore;

    struct Fixture {
        registry: InstanceRegistry<Arc<InMemoryInventoryStore>, Arc<InMemoryReferenceData>>,
        manager: Actor,
        router: EquipmentTypeId,
        warehouse: WarehouseId,
    }

    fn fixture() -> Fixture {
        let reference = Arc::new(InMemoryReferenceData::new());
        let router = EquipmentTypeId::new();
        let warehouse = WarehouseId::new();
        reference.add_catalog_entry(EquipmentCatalogEntry {
            id: router,
            name: "Router AX3000".to_string(),
            category: "network".to_string(),
            subcategory: None,
            price: 89_990,
            minimum_stock: 3,
            critical_stock: 1,
        });
        reference.add_warehouse(warehouse);

        Fixture {
            registry: InstanceRegistry::new(
                Arc::new(InMemoryInventoryStore::new()),
                reference,
                InventoryConfig::default(),
            ),
            manager: Actor::manager(ActorId::new()),
            router,
            warehouse,
        }
    }

    #[test]
    fn register_requires_known_references() {
        let f = fixture();

        let unknown_type = NewInstance::new(EquipmentTypeId::new(), "S-1", f.warehouse);
        let err = f.registry.register(&f.manager, unknown_type).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);

        let unknown_warehouse = NewInstance::new(f.router, "S-1", WarehouseId::new());
        let err = f.registry.register(&f.manager, unknown_warehouse).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[test]
    fn register_requires_manage_permission() {
        let f = fixture();
        let technician = Actor::technician(ActorId::new());

        let err = f
            .registry
            .register(&technician, NewInstance::new(f.router, "S-1", f.warehouse))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unauthorized);
    }

    #[test]
    fn get_hides_retired_instances() {
        let f = fixture();
        let defective = f
            .registry
            .register(
                &f.manager,
                NewInstance::new(f.router, "S-1", f.warehouse).with_status(InstanceStatus::Defective),
            )
            .unwrap();

        f.registry.retire(&f.manager, defective.id()).unwrap();

        let err = f.registry.get(defective.id()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert_eq!(err.instance_id, Some(defective.id()));
    }

    #[test]
    fn retire_rejects_units_still_in_service() {
        let f = fixture();
        let available = f
            .registry
            .register(&f.manager, NewInstance::new(f.router, "S-1", f.warehouse))
            .unwrap();

        let err = f.registry.retire(&f.manager, available.id()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidTransition);
        assert_eq!(f.registry.get(available.id()).unwrap(), available);
    }

    #[test]
    fn import_rejects_non_available_status() {
        let f = fixture();
        let mut import = BulkImport::new(f.router, f.warehouse, "A\nB");
        import.status = InstanceStatus::Maintenance;

        let err = f.registry.import_serials(&f.manager, import).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[test]
    fn stock_summary_grades_available_units() {
        let f = fixture();
        let report = f
            .registry
            .import_serials(&f.manager, BulkImport::new(f.router, f.warehouse, "A\nB"))
            .unwrap();
        assert_eq!(report.imported(), 2);

        let summary = f.registry.stock_summary(f.router).unwrap();
        assert_eq!(summary.available, 2);
        assert_eq!(summary.level, StockLevel::Low);
    }
}
