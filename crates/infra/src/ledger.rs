//! Movement ledger: the only path by which an instance changes state.
//!
//! ## Recording a movement
//!
//! ```text
//! MovementRequest
//!   ↓
//! 1. Authorize the actor (inventory.manage)
//!   ↓
//! 2. Under the instance lock: load state, consult the transition policy
//!    (sold/retired first, then request shape, then allowed-from status)
//!   ↓
//! 3. Reference lookups (warehouses, client)
//!   ↓
//! 4. Commit movement + updated instance in one store call (expected version)
//!   ↓
//! 5. Publish the committed movement on the bus
//! ```
//!
//! A rejection at any step before 4 writes nothing. Any movement against a
//! sold or retired instance fails with `InvalidTransition`, whatever else is
//! wrong with the request. A lost version race at step 4 re-runs steps 2-3 up
//! to `max_conflict_retries` times.
//!
//! Publication happens strictly after the commit. A failed publish is logged
//! and the call still succeeds: the movement is durable and consumers can
//! catch up from `list_movements`.

use serde_json::Value as JsonValue;
use tracing::{debug, info, instrument, warn};

use equiptrack_auth::{Actor, Permission, authorize};
use equiptrack_core::{AggregateRoot, Clock, InstanceId, MovementId, SystemClock};
use equiptrack_events::{EventBus, EventEnvelope};
use equiptrack_inventory::{
    InstanceState, MovementRequest, StockMovement, TransitionPolicy, UncommittedMovement,
};

use crate::error::{ErrorKind, InventoryError, InventoryResult};
use crate::reference::ReferenceData;
use crate::registry::{BulkImport, ImportReport, InstanceRegistry};
use crate::store::{InventoryStore, MovementFilter, MovementStats, Page, Pagination};

/// Stream type stamped on every published movement envelope.
pub const MOVEMENT_STREAM_TYPE: &str = "inventory.equipment_instance";

#[derive(Debug)]
pub struct MovementLedger<S, R, B, C = SystemClock> {
    registry: InstanceRegistry<S, R, C>,
    bus: B,
}

impl<S, R, B, C> MovementLedger<S, R, B, C> {
    pub fn new(registry: InstanceRegistry<S, R, C>, bus: B) -> Self {
        Self { registry, bus }
    }

    pub fn registry(&self) -> &InstanceRegistry<S, R, C> {
        &self.registry
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn into_parts(self) -> (InstanceRegistry<S, R, C>, B) {
        (self.registry, self.bus)
    }
}

impl<S, R, B, C> MovementLedger<S, R, B, C>
where
    S: InventoryStore,
    R: ReferenceData,
    B: EventBus<EventEnvelope<JsonValue>>,
    C: Clock,
{
    /// Validate and commit one movement, updating the instance atomically.
    #[instrument(
        skip(self, actor, request),
        fields(
            instance_id = %request.equipment_instance_id,
            movement_type = %request.movement_type,
            actor = %actor.actor_id,
            sequence = tracing::field::Empty
        ),
        err
    )]
    pub fn record_movement(&self, actor: &Actor, request: MovementRequest) -> InventoryResult<StockMovement> {
        let instance_id = request.equipment_instance_id;
        let movement_type = request.movement_type;
        let with_context = |e: InventoryError| e.with_instance(instance_id).with_movement_type(movement_type);

        authorize(actor, &Permission::INVENTORY_MANAGE).map_err(|e| with_context(e.into()))?;
        let movement = self.commit_with_retry(actor, &request).map_err(with_context)?;

        tracing::Span::current().record("sequence", movement.sequence);
        info!(
            movement_id = %movement.id,
            status = %movement.resulting.status,
            instance_version = movement.instance_version,
            "movement committed"
        );

        self.publish(&movement);
        Ok(movement)
    }

    fn check_references(&self, request: &MovementRequest) -> InventoryResult<()> {
        for warehouse_id in [request.from_warehouse_id, request.to_warehouse_id].into_iter().flatten() {
            self.registry.require_warehouse(warehouse_id)?;
        }
        if let Some(client_id) = request.client_id {
            if !self.registry.reference().client_exists(client_id)? {
                return Err(InventoryError::not_found(format!("client {client_id}")));
            }
        }
        Ok(())
    }

    fn commit_with_retry(&self, actor: &Actor, request: &MovementRequest) -> InventoryResult<StockMovement> {
        let instance_id = request.equipment_instance_id;
        let max_retries = self.registry.config.max_conflict_retries;
        let mut attempt = 0;

        loop {
            let result = self
                .registry
                .locks
                .with_lock(instance_id, || self.try_record(actor, request))?;

            match result {
                Err(e) if e.is_retryable() && attempt < max_retries => {
                    attempt += 1;
                    warn!(attempt, max_retries, error = %e, "movement lost a version race; retrying");
                }
                other => return other,
            }
        }
    }

    /// One read → decide → commit pass. Caller holds the instance lock.
    fn try_record(&self, actor: &Actor, request: &MovementRequest) -> InventoryResult<StockMovement> {
        let instance_id = request.equipment_instance_id;
        let current = self
            .registry
            .store
            .load_instance(instance_id)?
            .ok_or_else(|| InventoryError::not_found(format!("instance {instance_id}")))?;

        let transition = TransitionPolicy::decide(request, &current.state(), current.is_retired())
            .inspect_err(|e| debug!(error = %e, status = %current.status(), "movement rejected"))?;
        self.check_references(request)?;

        let movement = UncommittedMovement::from_request(
            MovementId::new(),
            request.clone(),
            actor.actor_id,
            &transition,
            current.version() + 1,
            self.registry.clock.now(),
        );

        let (committed, _) = self.registry.apply_transition(&current, &transition, movement)?;
        Ok(committed)
    }

    fn publish(&self, movement: &StockMovement) {
        let envelope = match EventEnvelope::from_typed(
            *movement.id.as_uuid(),
            *movement.equipment_instance_id.as_uuid(),
            MOVEMENT_STREAM_TYPE,
            movement.instance_version,
            movement,
        ) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(movement_id = %movement.id, error = %e, "movement envelope could not be built");
                return;
            }
        };

        if let Err(e) = self.bus.publish(envelope) {
            warn!(movement_id = %movement.id, error = %e, "movement committed but not published");
        }
    }

    /// Bulk import through the registry, publishing every purchase movement.
    pub fn import_serials(&self, actor: &Actor, import: BulkImport) -> InventoryResult<ImportReport> {
        let report = self.registry.import_serials(actor, import)?;
        for movement in &report.movements {
            self.publish(movement);
        }
        Ok(report)
    }

    /// Movements newest first (`created_at` desc, then `sequence` desc).
    pub fn list_movements(
        &self,
        filter: &MovementFilter,
        pagination: Pagination,
    ) -> InventoryResult<Page<StockMovement>> {
        let pagination = self.registry.config.paginate(pagination);
        Ok(self.registry.store.query_movements(filter, pagination)?)
    }

    pub fn get_movement(&self, movement_id: MovementId) -> InventoryResult<StockMovement> {
        self.registry
            .store
            .load_movement(movement_id)?
            .ok_or_else(|| InventoryError::not_found(format!("movement {movement_id}")))
    }

    pub fn latest_movement(&self, instance_id: InstanceId) -> InventoryResult<Option<StockMovement>> {
        Ok(self.registry.store.latest_movement(instance_id)?)
    }

    /// Inbound/outbound/internal counts for the movements matching `filter`.
    pub fn movement_stats(&self, filter: &MovementFilter) -> InventoryResult<MovementStats> {
        let counts = self.registry.store.movement_counts(filter)?;
        Ok(MovementStats::from_counts(counts))
    }

    /// Check that an instance agrees with its ledger history.
    ///
    /// The movement chain must link (each `previous_status` is the prior
    /// movement's resulting status, versions strictly increase), replaying the
    /// whole chain through the policy (starting from the first movement's
    /// prior state) must reproduce every recorded outcome, and the
    /// latest resulting state must equal the stored instance state. Instances
    /// with no movements verify trivially.
    #[instrument(skip(self), err)]
    pub fn verify_instance(&self, instance_id: InstanceId) -> InventoryResult<InstanceState> {
        let instance = self
            .registry
            .store
            .load_instance(instance_id)?
            .ok_or_else(|| InventoryError::not_found(format!("instance {instance_id}")).with_instance(instance_id))?;
        let history = self.registry.store.instance_movements(instance_id)?;

        let Some(first) = history.first() else {
            return Ok(instance.state());
        };

        let violation = |message: String| {
            InventoryError::new(ErrorKind::InvariantViolation, message).with_instance(instance_id)
        };

        for pair in history.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            if next.previous_status != prev.resulting.status {
                return Err(violation(format!(
                    "movement {} starts from '{}' but the prior movement left '{}'",
                    next.id, next.previous_status, prev.resulting.status
                ))
                .with_movement_type(next.movement_type));
            }
            if next.instance_version <= prev.instance_version {
                return Err(violation(format!(
                    "movement {} does not advance the instance version ({} after {})",
                    next.id, next.instance_version, prev.instance_version
                ))
                .with_movement_type(next.movement_type));
            }
        }

        // The first entry is re-decided too, from the state it was recorded against.
        let replayed = TransitionPolicy::replay(first.prior_state(), &history)
            .map_err(|e| violation(format!("ledger history does not replay: {e}")))?;

        if replayed != instance.state() {
            return Err(violation(format!(
                "stored state {:?} disagrees with ledger state {:?}",
                instance.state(),
                replayed
            )));
        }

        debug!(movements = history.len(), "instance verified against ledger");
        Ok(replayed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use equiptrack_core::{ActorId, ClientId, EquipmentTypeId, WarehouseId};
    use equiptrack_events::InMemoryEventBus;
    use chrono::Utc;
    use equiptrack_inventory::{
        EquipmentCatalogEntry, EquipmentInstance, InstanceStatus, MovementType, NewInstance, Transition,
    };

    use super::*;
    use crate::config::InventoryConfig;
    use crate::reference::InMemoryReferenceData;
    use crate::store::InMemoryInventoryStore;

    type Ledger = MovementLedger<
        Arc<InMemoryInventoryStore>,
        Arc<InMemoryReferenceData>,
        Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>,
    >;

    fn ledger() -> (Ledger, EquipmentTypeId, WarehouseId, ClientId) {
        let reference = Arc::new(InMemoryReferenceData::new());
        let router = EquipmentTypeId::new();
        let warehouse = WarehouseId::new();
        let client = ClientId::new();
        reference.add_catalog_entry(EquipmentCatalogEntry {
            id: router,
            name: "Router".to_string(),
            category: "network".to_string(),
            subcategory: None,
            price: 0,
            minimum_stock: 0,
            critical_stock: 0,
        });
        reference.add_warehouse(warehouse);
        reference.add_client(client);

        let registry = InstanceRegistry::new(
            Arc::new(InMemoryInventoryStore::new()),
            reference,
            InventoryConfig::default(),
        );
        (
            MovementLedger::new(registry, Arc::new(InMemoryEventBus::new())),
            router,
            warehouse,
            client,
        )
    }

    #[test]
    fn unknown_client_is_not_found_and_writes_nothing() {
        let (ledger, router, warehouse, _) = ledger();
        let manager = Actor::manager(ActorId::new());
        let unit = ledger
            .registry()
            .register(&manager, NewInstance::new(router, "S-1", warehouse))
            .unwrap();

        let request = MovementRequest::new(unit.id(), MovementType::ClientInstallation, "install")
            .client(ClientId::new());
        let err = ledger.record_movement(&manager, request).unwrap_err();

        assert_eq!(err.kind, ErrorKind::NotFound);
        assert_eq!(err.movement_type, Some(MovementType::ClientInstallation));
        assert_eq!(ledger.latest_movement(unit.id()).unwrap(), None);
    }

    #[test]
    fn committed_movement_is_published_once() {
        let (ledger, router, warehouse, client) = ledger();
        let manager = Actor::manager(ActorId::new());
        let subscription = ledger.bus().subscribe();
        let unit = ledger
            .registry()
            .register(&manager, NewInstance::new(router, "S-1", warehouse))
            .unwrap();

        let movement = ledger
            .record_movement(
                &manager,
                MovementRequest::new(unit.id(), MovementType::ClientInstallation, "install").client(client),
            )
            .unwrap();

        let published = subscription.drain();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].event_type(), "inventory.movement.client_installation");
        assert_eq!(published[0].stream_type(), MOVEMENT_STREAM_TYPE);
        assert_eq!(published[0].decode::<StockMovement>().unwrap(), movement);
    }

    #[test]
    fn verify_accepts_a_consistent_history() {
        let (ledger, router, warehouse, client) = ledger();
        let manager = Actor::manager(ActorId::new());
        let unit = ledger
            .registry()
            .register(&manager, NewInstance::new(router, "S-1", warehouse))
            .unwrap();

        ledger
            .record_movement(
                &manager,
                MovementRequest::new(unit.id(), MovementType::InternalLoan, "bench test").from_warehouse(warehouse),
            )
            .unwrap();
        ledger
            .record_movement(
                &manager,
                MovementRequest::new(unit.id(), MovementType::WarrantyReturn, "repaired").to_warehouse(warehouse),
            )
            .unwrap();
        ledger
            .record_movement(
                &manager,
                MovementRequest::new(unit.id(), MovementType::ClientInstallation, "install").client(client),
            )
            .unwrap();

        let state = ledger.verify_instance(unit.id()).unwrap();
        assert_eq!(state.status, InstanceStatus::Installed);
        assert_eq!(state.assigned_client_id, Some(client));
    }

    #[test]
    fn verify_redecides_the_first_movement() {
        let (ledger, router, warehouse, _) = ledger();
        let at = Utc::now();
        let unit = EquipmentInstance::register(
            InstanceId::new(),
            NewInstance::new(router, "S-TAMPERED", warehouse),
            at,
        )
        .unwrap();

        // A loan recorded as leaving the unit defective in the warehouse.
        let forged = Transition {
            movement_type: MovementType::InternalLoan,
            previous: unit.state(),
            next: InstanceState::in_warehouse(InstanceStatus::Defective, warehouse),
        };
        let stored = unit.with_transition(&forged, at).unwrap();
        let movement = UncommittedMovement::from_request(
            MovementId::new(),
            MovementRequest::new(unit.id(), MovementType::InternalLoan, "bench test").from_warehouse(warehouse),
            ActorId::new(),
            &forged,
            stored.version(),
            at,
        );
        ledger
            .registry()
            .store()
            .insert_instances(vec![stored], vec![movement])
            .unwrap();

        let err = ledger.verify_instance(unit.id()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvariantViolation);
        assert_eq!(err.instance_id, Some(unit.id()));
    }
}
