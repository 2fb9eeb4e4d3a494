use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use equiptrack_core::{
    ActorId, ClientId, DomainError, Entity, InstanceId, MovementId, ServiceOrderId, WarehouseId,
};
use equiptrack_events::Event;

use crate::instance::{InstanceState, InstanceStatus};
use crate::policy::Transition;

/// Kind of stock movement. Determines required fields and the resulting state
/// (see [`crate::policy::TransitionPolicy`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    Purchase,
    WarrantyReturn,
    InventoryAdjustment,
    ClientInstallation,
    InternalLoan,
    WarrantyReplacement,
    Obsolescence,
    WarehouseTransfer,
    Sale,
}

/// Coarse grouping used for ledger statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementDirection {
    /// Units entering warehouse stock.
    Inbound,
    /// Units leaving available stock (clients, loans, write-offs, sales).
    Outbound,
    /// Units moving between warehouses.
    Internal,
}

impl MovementType {
    pub const ALL: [MovementType; 9] = [
        MovementType::Purchase,
        MovementType::WarrantyReturn,
        MovementType::InventoryAdjustment,
        MovementType::ClientInstallation,
        MovementType::InternalLoan,
        MovementType::WarrantyReplacement,
        MovementType::Obsolescence,
        MovementType::WarehouseTransfer,
        MovementType::Sale,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Purchase => "purchase",
            MovementType::WarrantyReturn => "warranty_return",
            MovementType::InventoryAdjustment => "inventory_adjustment",
            MovementType::ClientInstallation => "client_installation",
            MovementType::InternalLoan => "internal_loan",
            MovementType::WarrantyReplacement => "warranty_replacement",
            MovementType::Obsolescence => "obsolescence",
            MovementType::WarehouseTransfer => "warehouse_transfer",
            MovementType::Sale => "sale",
        }
    }

    pub fn direction(&self) -> MovementDirection {
        match self {
            MovementType::Purchase
            | MovementType::WarrantyReturn
            | MovementType::InventoryAdjustment => MovementDirection::Inbound,
            MovementType::ClientInstallation
            | MovementType::InternalLoan
            | MovementType::WarrantyReplacement
            | MovementType::Obsolescence
            | MovementType::Sale => MovementDirection::Outbound,
            MovementType::WarehouseTransfer => MovementDirection::Internal,
        }
    }

    /// Stable event name used when a committed movement is published.
    pub fn event_type(&self) -> &'static str {
        match self {
            MovementType::Purchase => "inventory.movement.purchase",
            MovementType::WarrantyReturn => "inventory.movement.warranty_return",
            MovementType::InventoryAdjustment => "inventory.movement.inventory_adjustment",
            MovementType::ClientInstallation => "inventory.movement.client_installation",
            MovementType::InternalLoan => "inventory.movement.internal_loan",
            MovementType::WarrantyReplacement => "inventory.movement.warranty_replacement",
            MovementType::Obsolescence => "inventory.movement.obsolescence",
            MovementType::WarehouseTransfer => "inventory.movement.warehouse_transfer",
            MovementType::Sale => "inventory.movement.sale",
        }
    }
}

impl core::fmt::Display for MovementType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for MovementType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MovementType::ALL
            .into_iter()
            .find(|ty| ty.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown movement type '{s}'")))
    }
}

/// A caller's request to move one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRequest {
    pub equipment_instance_id: InstanceId,
    pub movement_type: MovementType,
    /// Always 1 for serialized units.
    pub quantity: u32,
    pub from_warehouse_id: Option<WarehouseId>,
    pub to_warehouse_id: Option<WarehouseId>,
    pub client_id: Option<ClientId>,
    pub service_order_id: Option<ServiceOrderId>,
    pub reason: String,
}

impl MovementRequest {
    pub fn new(
        equipment_instance_id: InstanceId,
        movement_type: MovementType,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            equipment_instance_id,
            movement_type,
            quantity: 1,
            from_warehouse_id: None,
            to_warehouse_id: None,
            client_id: None,
            service_order_id: None,
            reason: reason.into(),
        }
    }

    pub fn from_warehouse(mut self, warehouse_id: WarehouseId) -> Self {
        self.from_warehouse_id = Some(warehouse_id);
        self
    }

    pub fn to_warehouse(mut self, warehouse_id: WarehouseId) -> Self {
        self.to_warehouse_id = Some(warehouse_id);
        self
    }

    pub fn client(mut self, client_id: ClientId) -> Self {
        self.client_id = Some(client_id);
        self
    }

    pub fn service_order(mut self, service_order_id: ServiceOrderId) -> Self {
        self.service_order_id = Some(service_order_id);
        self
    }
}

/// A validated movement that has not been committed to the ledger yet
/// (no ledger sequence assigned).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedMovement {
    pub id: MovementId,
    pub equipment_instance_id: InstanceId,
    pub movement_type: MovementType,
    pub quantity: u32,
    pub from_warehouse_id: Option<WarehouseId>,
    pub to_warehouse_id: Option<WarehouseId>,
    pub client_id: Option<ClientId>,
    pub service_order_id: Option<ServiceOrderId>,
    pub reason: String,
    pub performed_by: ActorId,
    pub previous_status: InstanceStatus,
    pub resulting: InstanceState,
    /// Instance version produced by applying this movement.
    pub instance_version: u64,
    pub created_at: DateTime<Utc>,
}

impl UncommittedMovement {
    /// Build the ledger entry for a policy-approved request.
    ///
    /// `instance_version` is the version the instance reaches once this
    /// movement is applied.
    pub fn from_request(
        id: MovementId,
        request: MovementRequest,
        performed_by: ActorId,
        transition: &Transition,
        instance_version: u64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            equipment_instance_id: request.equipment_instance_id,
            movement_type: request.movement_type,
            quantity: request.quantity,
            from_warehouse_id: request.from_warehouse_id,
            to_warehouse_id: request.to_warehouse_id,
            client_id: request.client_id,
            service_order_id: request.service_order_id,
            reason: request.reason.trim().to_string(),
            performed_by,
            previous_status: transition.previous.status,
            resulting: transition.next,
            instance_version,
            created_at,
        }
    }

    /// Assign the ledger position.
    pub fn commit(self, sequence: u64) -> StockMovement {
        StockMovement {
            id: self.id,
            sequence,
            equipment_instance_id: self.equipment_instance_id,
            movement_type: self.movement_type,
            quantity: self.quantity,
            from_warehouse_id: self.from_warehouse_id,
            to_warehouse_id: self.to_warehouse_id,
            client_id: self.client_id,
            service_order_id: self.service_order_id,
            reason: self.reason,
            performed_by: self.performed_by,
            previous_status: self.previous_status,
            resulting: self.resulting,
            instance_version: self.instance_version,
            created_at: self.created_at,
        }
    }
}

/// An immutable, committed ledger entry.
///
/// ## Ordering
///
/// `sequence` is assigned by the store on commit and is strictly increasing
/// across the whole ledger. Per instance, `instance_version` is strictly
/// increasing as well. Listings order by `created_at` then `sequence`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: MovementId,
    pub sequence: u64,
    pub equipment_instance_id: InstanceId,
    pub movement_type: MovementType,
    pub quantity: u32,
    pub from_warehouse_id: Option<WarehouseId>,
    pub to_warehouse_id: Option<WarehouseId>,
    pub client_id: Option<ClientId>,
    pub service_order_id: Option<ServiceOrderId>,
    pub reason: String,
    pub performed_by: ActorId,
    pub previous_status: InstanceStatus,
    pub resulting: InstanceState,
    pub instance_version: u64,
    pub created_at: DateTime<Utc>,
}

impl StockMovement {
    /// Rebuild the request this movement was accepted from (used for replay).
    pub fn to_request(&self) -> MovementRequest {
        MovementRequest {
            equipment_instance_id: self.equipment_instance_id,
            movement_type: self.movement_type,
            quantity: self.quantity,
            from_warehouse_id: self.from_warehouse_id,
            to_warehouse_id: self.to_warehouse_id,
            client_id: self.client_id,
            service_order_id: self.service_order_id,
            reason: self.reason.clone(),
        }
    }

    /// The instance state this movement was decided against, as far as the
    /// policy reads it.
    ///
    /// The recorded `previous_status` fixes the status. A warehouse-bound unit
    /// sat at `from_warehouse_id` (every movement that keeps the location
    /// requires it) and held no client. Location and client of an installed
    /// unit never feed into a decision's outcome.
    pub fn prior_state(&self) -> InstanceState {
        let in_warehouse = self.previous_status.is_warehouse_bound();
        InstanceState {
            status: self.previous_status,
            location_warehouse_id: if in_warehouse { self.from_warehouse_id } else { None },
            assigned_client_id: None,
        }
    }

    /// Whether this movement touches the warehouse on either side.
    pub fn involves_warehouse(&self, warehouse_id: WarehouseId) -> bool {
        self.from_warehouse_id == Some(warehouse_id) || self.to_warehouse_id == Some(warehouse_id)
    }
}

impl Entity for StockMovement {
    type Id = MovementId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Event for StockMovement {
    fn event_type(&self) -> &'static str {
        self.movement_type.event_type()
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn movement_type_parses_its_wire_name() {
        for ty in MovementType::ALL {
            assert_eq!(ty.as_str().parse::<MovementType>().unwrap(), ty);
        }
        assert!(matches!(
            "transfer".parse::<MovementType>(),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn only_transfers_are_internal() {
        let internal: Vec<_> = MovementType::ALL
            .into_iter()
            .filter(|ty| ty.direction() == MovementDirection::Internal)
            .collect();
        assert_eq!(internal, vec![MovementType::WarehouseTransfer]);
        assert_eq!(MovementType::Purchase.direction(), MovementDirection::Inbound);
        assert_eq!(MovementType::Sale.direction(), MovementDirection::Outbound);
    }

    #[test]
    fn request_builder_defaults_quantity_to_one() {
        let request = MovementRequest::new(InstanceId::new(), MovementType::Purchase, "restock")
            .to_warehouse(WarehouseId::new());
        assert_eq!(request.quantity, 1);
        assert!(request.to_warehouse_id.is_some());
        assert!(request.from_warehouse_id.is_none());
    }
}
