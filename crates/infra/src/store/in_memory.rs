use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use equiptrack_core::{AggregateRoot, EquipmentTypeId, ExpectedVersion, InstanceId, MovementId};
use equiptrack_inventory::{EquipmentInstance, MovementType, StockMovement, UncommittedMovement};

use super::query::{InstanceFilter, MovementFilter, Page, Pagination};
use super::r#trait::{InventoryStore, StoreError};

#[derive(Debug, Default)]
struct State {
    instances: HashMap<InstanceId, EquipmentInstance>,
    /// Serial number -> live instance.
    serials: HashMap<String, InstanceId>,
    /// IMEI -> live instance.
    imeis: HashMap<String, InstanceId>,
    /// Append-only; index + 1 == sequence.
    movements: Vec<StockMovement>,
    movement_index: HashMap<MovementId, usize>,
}

impl State {
    fn next_sequence(&self) -> u64 {
        self.movements.len() as u64 + 1
    }

    fn index(&mut self, instance: &EquipmentInstance) {
        self.serials.insert(instance.serial_number().to_string(), instance.id());
        if let Some(imei) = instance.imei() {
            self.imeis.insert(imei.to_string(), instance.id());
        }
    }

    fn unindex(&mut self, instance: &EquipmentInstance) {
        self.serials.remove(instance.serial_number());
        if let Some(imei) = instance.imei() {
            self.imeis.remove(imei);
        }
    }

    fn append(&mut self, movement: UncommittedMovement) -> StockMovement {
        let committed = movement.commit(self.next_sequence());
        self.movement_index.insert(committed.id, self.movements.len());
        self.movements.push(committed.clone());
        committed
    }

    /// Replace a stored instance, keeping the uniqueness indexes in step with retirement.
    fn replace(
        &mut self,
        instance: &EquipmentInstance,
        expected_version: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let current = self
            .instances
            .get(&instance.id())
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("instance {}", instance.id())))?;

        let version = current.version();
        if !expected_version.matches(version) {
            return Err(StoreError::Concurrency(format!(
                "instance {}: expected {expected_version:?}, found {version}",
                instance.id()
            )));
        }

        if !current.is_retired() && instance.is_retired() {
            self.unindex(&current);
        }
        self.instances.insert(instance.id(), instance.clone());
        Ok(())
    }
}

/// In-memory inventory store.
///
/// Intended for tests/dev. One `RwLock` guards all state, so every write is
/// trivially atomic.
#[derive(Debug, Default)]
pub struct InMemoryInventoryStore {
    state: RwLock<State>,
}

impl InMemoryInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    /// Number of committed movements (whole ledger).
    pub fn movement_count(&self) -> Result<usize, StoreError> {
        Ok(self.read()?.movements.len())
    }
}

impl InventoryStore for InMemoryInventoryStore {
    fn insert_instances(
        &self,
        instances: Vec<EquipmentInstance>,
        movements: Vec<UncommittedMovement>,
    ) -> Result<Vec<StockMovement>, StoreError> {
        let mut state = self.write()?;

        // Collisions against live instances and within the batch itself.
        let mut collisions = Vec::new();
        let mut batch_serials = HashMap::new();
        let mut batch_imeis = HashMap::new();
        for instance in &instances {
            let serial = instance.serial_number();
            let serial_taken = state.serials.contains_key(serial)
                || batch_serials.insert(serial.to_string(), instance.id()).is_some();
            let imei_taken = instance.imei().is_some_and(|imei| {
                state.imeis.contains_key(imei)
                    || batch_imeis.insert(imei.to_string(), instance.id()).is_some()
            });
            if serial_taken || imei_taken {
                collisions.push(serial.to_string());
            }
        }
        if !collisions.is_empty() {
            return Err(StoreError::Duplicate { serials: collisions });
        }

        for movement in &movements {
            if !batch_serials.values().any(|id| *id == movement.equipment_instance_id) {
                return Err(StoreError::NotFound(format!(
                    "movement {} references instance {} outside the batch",
                    movement.id, movement.equipment_instance_id
                )));
            }
        }

        for instance in instances {
            state.index(&instance);
            state.instances.insert(instance.id(), instance);
        }
        Ok(movements.into_iter().map(|m| state.append(m)).collect())
    }

    fn load_instance(&self, id: InstanceId) -> Result<Option<EquipmentInstance>, StoreError> {
        Ok(self.read()?.instances.get(&id).cloned())
    }

    fn update_instance(
        &self,
        instance: &EquipmentInstance,
        expected_version: ExpectedVersion,
    ) -> Result<(), StoreError> {
        self.write()?.replace(instance, expected_version)
    }

    fn commit_movement(
        &self,
        movement: UncommittedMovement,
        instance: &EquipmentInstance,
        expected_version: ExpectedVersion,
    ) -> Result<StockMovement, StoreError> {
        if movement.equipment_instance_id != instance.id() {
            return Err(StoreError::Backend(format!(
                "movement {} targets instance {}, not {}",
                movement.id,
                movement.equipment_instance_id,
                instance.id()
            )));
        }

        let mut state = self.write()?;
        state.replace(instance, expected_version)?;
        Ok(state.append(movement))
    }

    fn load_movement(&self, id: MovementId) -> Result<Option<StockMovement>, StoreError> {
        let state = self.read()?;
        Ok(state
            .movement_index
            .get(&id)
            .and_then(|idx| state.movements.get(*idx))
            .cloned())
    }

    fn latest_movement(&self, instance_id: InstanceId) -> Result<Option<StockMovement>, StoreError> {
        let state = self.read()?;
        Ok(state
            .movements
            .iter()
            .rev()
            .find(|m| m.equipment_instance_id == instance_id)
            .cloned())
    }

    fn instance_movements(&self, instance_id: InstanceId) -> Result<Vec<StockMovement>, StoreError> {
        let state = self.read()?;
        Ok(state
            .movements
            .iter()
            .filter(|m| m.equipment_instance_id == instance_id)
            .cloned()
            .collect())
    }

    fn query_movements(
        &self,
        filter: &MovementFilter,
        pagination: Pagination,
    ) -> Result<Page<StockMovement>, StoreError> {
        let state = self.read()?;
        let mut matching: Vec<StockMovement> = state
            .movements
            .iter()
            .filter(|m| filter.matches(m))
            .cloned()
            .collect();
        matching.sort_by(|a, b| (b.created_at, b.sequence).cmp(&(a.created_at, a.sequence)));
        Ok(Page::from_ordered(matching, pagination))
    }

    fn movement_counts(&self, filter: &MovementFilter) -> Result<Vec<(MovementType, u64)>, StoreError> {
        let state = self.read()?;
        let mut counts: HashMap<MovementType, u64> = HashMap::new();
        for movement in state.movements.iter().filter(|m| filter.matches(m)) {
            *counts.entry(movement.movement_type).or_default() += 1;
        }
        Ok(MovementType::ALL
            .into_iter()
            .filter_map(|ty| counts.get(&ty).map(|n| (ty, *n)))
            .collect())
    }

    fn query_instances(
        &self,
        filter: &InstanceFilter,
        pagination: Pagination,
    ) -> Result<Page<EquipmentInstance>, StoreError> {
        let state = self.read()?;
        let mut matching: Vec<EquipmentInstance> = state
            .instances
            .values()
            .filter(|i| filter.matches(i))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            a.serial_number()
                .cmp(b.serial_number())
                .then_with(|| a.id().cmp(&b.id()))
        });
        Ok(Page::from_ordered(matching, pagination))
    }

    fn instances_of_type(
        &self,
        equipment_type_id: EquipmentTypeId,
    ) -> Result<Vec<EquipmentInstance>, StoreError> {
        let state = self.read()?;
        Ok(state
            .instances
            .values()
            .filter(|i| !i.is_retired() && i.equipment_type_id() == equipment_type_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use equiptrack_core::{ActorId, ClientId, WarehouseId};
    use equiptrack_inventory::{
        InstanceStatus, MovementRequest, NewInstance, TransitionPolicy,
    };

    use super::*;

    fn instance(serial: &str, warehouse: WarehouseId) -> EquipmentInstance {
        EquipmentInstance::register(
            InstanceId::new(),
            NewInstance::new(EquipmentTypeId::new(), serial, warehouse),
            Utc::now(),
        )
        .unwrap()
    }

    fn install(current: &EquipmentInstance, client: ClientId) -> (UncommittedMovement, EquipmentInstance) {
        let request = MovementRequest::new(current.id(), MovementType::ClientInstallation, "site")
            .client(client);
        let transition = TransitionPolicy::decide(&request, &current.state(), false).unwrap();
        let now = Utc::now();
        let next = current.with_transition(&transition, now).unwrap();
        let movement = UncommittedMovement {
            id: MovementId::new(),
            equipment_instance_id: current.id(),
            movement_type: request.movement_type,
            quantity: 1,
            from_warehouse_id: None,
            to_warehouse_id: None,
            client_id: Some(client),
            service_order_id: None,
            reason: request.reason,
            performed_by: ActorId::new(),
            previous_status: current.status(),
            resulting: next.state(),
            instance_version: next.version(),
            created_at: now,
        };
        (movement, next)
    }

    #[test]
    fn batch_insert_is_all_or_nothing() {
        let store = InMemoryInventoryStore::new();
        let w = WarehouseId::new();
        store.insert_instances(vec![instance("A", w)], vec![]).unwrap();

        let err = store
            .insert_instances(vec![instance("B", w), instance("A", w), instance("C", w), instance("C", w)], vec![])
            .unwrap_err();
        assert_eq!(err, StoreError::Duplicate { serials: vec!["A".into(), "C".into()] });

        let page = store.query_instances(&InstanceFilter::default(), Pagination::default()).unwrap();
        assert_eq!(page.total, 1);
    }

    #[test]
    fn imei_collision_is_reported_by_serial() {
        let store = InMemoryInventoryStore::new();
        let w = WarehouseId::new();
        let first = EquipmentInstance::register(
            InstanceId::new(),
            NewInstance::new(EquipmentTypeId::new(), "A", w).with_imei("356938035643809"),
            Utc::now(),
        )
        .unwrap();
        let second = EquipmentInstance::register(
            InstanceId::new(),
            NewInstance::new(EquipmentTypeId::new(), "B", w).with_imei("356938035643809"),
            Utc::now(),
        )
        .unwrap();
        store.insert_instances(vec![first], vec![]).unwrap();

        let err = store.insert_instances(vec![second], vec![]).unwrap_err();
        assert_eq!(err, StoreError::Duplicate { serials: vec!["B".into()] });
    }

    #[test]
    fn commit_rejects_stale_version_without_writing() {
        let store = InMemoryInventoryStore::new();
        let current = instance("A", WarehouseId::new());
        store.insert_instances(vec![current.clone()], vec![]).unwrap();

        let (movement, next) = install(&current, ClientId::new());
        let err = store
            .commit_movement(movement, &next, ExpectedVersion::Exact(current.version() + 1))
            .unwrap_err();
        assert!(matches!(err, StoreError::Concurrency(_)));
        assert_eq!(store.movement_count().unwrap(), 0);
        assert_eq!(store.load_instance(current.id()).unwrap().unwrap(), current);
    }

    #[test]
    fn commit_assigns_sequence_and_replaces_instance() {
        let store = InMemoryInventoryStore::new();
        let current = instance("A", WarehouseId::new());
        store.insert_instances(vec![current.clone()], vec![]).unwrap();

        let (movement, next) = install(&current, ClientId::new());
        let committed = store
            .commit_movement(movement, &next, ExpectedVersion::Exact(current.version()))
            .unwrap();

        assert_eq!(committed.sequence, 1);
        assert_eq!(store.latest_movement(current.id()).unwrap(), Some(committed.clone()));
        assert_eq!(store.load_movement(committed.id).unwrap(), Some(committed));
        let stored = store.load_instance(current.id()).unwrap().unwrap();
        assert_eq!(stored.status(), InstanceStatus::Installed);
    }

    #[test]
    fn retired_serials_can_be_reused() {
        let store = InMemoryInventoryStore::new();
        let w = WarehouseId::new();
        let defective = EquipmentInstance::register(
            InstanceId::new(),
            NewInstance::new(EquipmentTypeId::new(), "A", w).with_status(InstanceStatus::Defective),
            Utc::now(),
        )
        .unwrap();
        store.insert_instances(vec![defective.clone()], vec![]).unwrap();

        let retired = defective.retired(Utc::now()).unwrap();
        store
            .update_instance(&retired, ExpectedVersion::Exact(defective.version()))
            .unwrap();

        store.insert_instances(vec![instance("A", w)], vec![]).unwrap();
        let all = InstanceFilter { include_retired: true, ..Default::default() };
        assert_eq!(store.query_instances(&all, Pagination::default()).unwrap().total, 2);
        assert_eq!(store.query_instances(&InstanceFilter::default(), Pagination::default()).unwrap().total, 1);
    }
}
