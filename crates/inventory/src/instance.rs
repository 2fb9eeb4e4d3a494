use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use equiptrack_core::{
    AggregateRoot, ClientId, DomainError, DomainResult, EquipmentTypeId, InstanceId, WarehouseId,
};

use crate::movement::MovementType;
use crate::policy::Transition;

/// Lifecycle status of a serialized unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Available,
    Installed,
    Maintenance,
    Defective,
    Sold,
}

impl InstanceStatus {
    pub const ALL: [InstanceStatus; 5] = [
        InstanceStatus::Available,
        InstanceStatus::Installed,
        InstanceStatus::Maintenance,
        InstanceStatus::Defective,
        InstanceStatus::Sold,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Available => "available",
            InstanceStatus::Installed => "installed",
            InstanceStatus::Maintenance => "maintenance",
            InstanceStatus::Defective => "defective",
            InstanceStatus::Sold => "sold",
        }
    }

    /// Statuses in which the unit physically sits in a warehouse.
    pub fn is_warehouse_bound(&self) -> bool {
        matches!(
            self,
            InstanceStatus::Available | InstanceStatus::Maintenance | InstanceStatus::Defective
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, InstanceStatus::Sold)
    }
}

impl core::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for InstanceStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InstanceStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown instance status '{s}'")))
    }
}

/// Physical condition of a unit (informational; movements do not change it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    New,
    Good,
    Fair,
    Poor,
    Broken,
}

impl Condition {
    pub const ALL: [Condition; 5] = [
        Condition::New,
        Condition::Good,
        Condition::Fair,
        Condition::Poor,
        Condition::Broken,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Condition::New => "new",
            Condition::Good => "good",
            Condition::Fair => "fair",
            Condition::Poor => "poor",
            Condition::Broken => "broken",
        }
    }
}

impl core::fmt::Display for Condition {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for Condition {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Condition::ALL
            .into_iter()
            .find(|condition| condition.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown condition '{s}'")))
    }
}

/// The part of an instance that movements change: where it is and who has it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceState {
    pub status: InstanceStatus,
    pub location_warehouse_id: Option<WarehouseId>,
    pub assigned_client_id: Option<ClientId>,
}

impl InstanceState {
    pub fn in_warehouse(status: InstanceStatus, warehouse_id: WarehouseId) -> Self {
        Self {
            status,
            location_warehouse_id: Some(warehouse_id),
            assigned_client_id: None,
        }
    }

    /// Enforce the status/location/client consistency rules.
    pub fn check(&self) -> DomainResult<()> {
        let location = self.location_warehouse_id.is_some();
        let client = self.assigned_client_id.is_some();

        match self.status {
            InstanceStatus::Installed if !client => Err(DomainError::invariant(
                "installed instance must be assigned to a client",
            )),
            InstanceStatus::Installed if location => Err(DomainError::invariant(
                "installed instance cannot also be located in a warehouse",
            )),
            status if status.is_warehouse_bound() && !location => Err(DomainError::invariant(
                format!("{status} instance must be located in a warehouse"),
            )),
            status if status.is_warehouse_bound() && client => Err(DomainError::invariant(
                format!("{status} instance cannot be assigned to a client"),
            )),
            InstanceStatus::Sold if location || client => Err(DomainError::invariant(
                "sold instance must not reference a warehouse or client",
            )),
            _ => Ok(()),
        }
    }
}

/// Registration input for a new serialized unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewInstance {
    pub equipment_type_id: EquipmentTypeId,
    pub serial_number: String,
    pub imei: Option<String>,
    pub warehouse_id: WarehouseId,
    pub status: InstanceStatus,
    pub condition: Condition,
    pub warranty_expiry: Option<NaiveDate>,
}

impl NewInstance {
    /// Available, new-condition unit in the given warehouse.
    pub fn new(
        equipment_type_id: EquipmentTypeId,
        serial_number: impl Into<String>,
        warehouse_id: WarehouseId,
    ) -> Self {
        Self {
            equipment_type_id,
            serial_number: serial_number.into(),
            imei: None,
            warehouse_id,
            status: InstanceStatus::Available,
            condition: Condition::New,
            warranty_expiry: None,
        }
    }

    pub fn with_imei(mut self, imei: impl Into<String>) -> Self {
        self.imei = Some(imei.into());
        self
    }

    pub fn with_status(mut self, status: InstanceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = condition;
        self
    }

    pub fn with_warranty_expiry(mut self, date: NaiveDate) -> Self {
        self.warranty_expiry = Some(date);
        self
    }
}

/// One physical, serially-identified unit of an equipment type.
///
/// Fields are private: state changes only happen through [`EquipmentInstance::with_transition`]
/// (driven by the movement ledger) and [`EquipmentInstance::retired`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EquipmentInstance {
    id: InstanceId,
    equipment_type_id: EquipmentTypeId,
    serial_number: String,
    imei: Option<String>,
    status: InstanceStatus,
    condition: Condition,
    location_warehouse_id: Option<WarehouseId>,
    assigned_client_id: Option<ClientId>,
    installation_date: Option<DateTime<Utc>>,
    warranty_expiry: Option<NaiveDate>,
    last_maintenance_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
    version: u64,
}

/// Flat, persistence-friendly view of an [`EquipmentInstance`].
///
/// Storage backends build one of these from a row and convert it back with
/// `TryFrom`, which re-validates the state invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub id: InstanceId,
    pub equipment_type_id: EquipmentTypeId,
    pub serial_number: String,
    pub imei: Option<String>,
    pub status: InstanceStatus,
    pub condition: Condition,
    pub location_warehouse_id: Option<WarehouseId>,
    pub assigned_client_id: Option<ClientId>,
    pub installation_date: Option<DateTime<Utc>>,
    pub warranty_expiry: Option<NaiveDate>,
    pub last_maintenance_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub version: u64,
}

fn normalize_serial(value: &str, field: &str) -> DomainResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DomainError::missing_field(field));
    }
    Ok(trimmed.to_string())
}

impl EquipmentInstance {
    /// Validate registration input and build the initial (version 1) instance.
    pub fn register(id: InstanceId, new: NewInstance, at: DateTime<Utc>) -> DomainResult<Self> {
        let serial_number = normalize_serial(&new.serial_number, "serial_number")?;
        let imei = match new.imei.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(imei) => Some(imei.to_string()),
        };

        if !new.status.is_warehouse_bound() {
            return Err(DomainError::validation(format!(
                "instances must be registered into a warehouse status, got '{}'",
                new.status
            )));
        }

        let state = InstanceState::in_warehouse(new.status, new.warehouse_id);
        state.check()?;

        Ok(Self {
            id,
            equipment_type_id: new.equipment_type_id,
            serial_number,
            imei,
            status: state.status,
            condition: new.condition,
            location_warehouse_id: state.location_warehouse_id,
            assigned_client_id: state.assigned_client_id,
            installation_date: None,
            warranty_expiry: new.warranty_expiry,
            last_maintenance_at: None,
            created_at: at,
            updated_at: at,
            deleted_at: None,
            version: 1,
        })
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn equipment_type_id(&self) -> EquipmentTypeId {
        self.equipment_type_id
    }

    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    pub fn imei(&self) -> Option<&str> {
        self.imei.as_deref()
    }

    pub fn status(&self) -> InstanceStatus {
        self.status
    }

    pub fn condition(&self) -> Condition {
        self.condition
    }

    pub fn location_warehouse_id(&self) -> Option<WarehouseId> {
        self.location_warehouse_id
    }

    pub fn assigned_client_id(&self) -> Option<ClientId> {
        self.assigned_client_id
    }

    pub fn installation_date(&self) -> Option<DateTime<Utc>> {
        self.installation_date
    }

    pub fn warranty_expiry(&self) -> Option<NaiveDate> {
        self.warranty_expiry
    }

    pub fn last_maintenance_at(&self) -> Option<DateTime<Utc>> {
        self.last_maintenance_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }

    pub fn is_retired(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn state(&self) -> InstanceState {
        InstanceState {
            status: self.status,
            location_warehouse_id: self.location_warehouse_id,
            assigned_client_id: self.assigned_client_id,
        }
    }

    /// Produce the next version of this instance with a policy-approved transition applied.
    ///
    /// Pure: `self` is untouched, so a failed commit leaves nothing to roll back.
    pub fn with_transition(&self, transition: &Transition, at: DateTime<Utc>) -> DomainResult<Self> {
        if self.is_retired() {
            return Err(DomainError::invariant("cannot transition a retired instance"));
        }
        if transition.previous != self.state() {
            return Err(DomainError::invariant(
                "transition was decided against a stale instance state",
            ));
        }
        transition.next.check()?;

        let mut next = self.clone();
        next.status = transition.next.status;
        next.location_warehouse_id = transition.next.location_warehouse_id;
        next.assigned_client_id = transition.next.assigned_client_id;

        if transition.movement_type == MovementType::ClientInstallation {
            next.installation_date = Some(at);
        }
        if next.status == InstanceStatus::Maintenance && self.status != InstanceStatus::Maintenance {
            next.last_maintenance_at = Some(at);
        }

        next.updated_at = at;
        next.version += 1;
        Ok(next)
    }

    /// Soft-delete. Only units that left active stock (`sold`/`defective`) may be retired.
    pub fn retired(&self, at: DateTime<Utc>) -> DomainResult<Self> {
        if self.is_retired() {
            return Err(DomainError::invalid_transition("instance is already retired"));
        }
        if !matches!(self.status, InstanceStatus::Sold | InstanceStatus::Defective) {
            return Err(DomainError::invalid_transition(format!(
                "only sold or defective instances can be retired (status: {})",
                self.status
            )));
        }

        let mut next = self.clone();
        next.deleted_at = Some(at);
        next.updated_at = at;
        next.version += 1;
        Ok(next)
    }

    pub fn to_record(&self) -> InstanceRecord {
        InstanceRecord::from(self.clone())
    }
}

impl AggregateRoot for EquipmentInstance {
    type Id = InstanceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl From<EquipmentInstance> for InstanceRecord {
    fn from(value: EquipmentInstance) -> Self {
        Self {
            id: value.id,
            equipment_type_id: value.equipment_type_id,
            serial_number: value.serial_number,
            imei: value.imei,
            status: value.status,
            condition: value.condition,
            location_warehouse_id: value.location_warehouse_id,
            assigned_client_id: value.assigned_client_id,
            installation_date: value.installation_date,
            warranty_expiry: value.warranty_expiry,
            last_maintenance_at: value.last_maintenance_at,
            created_at: value.created_at,
            updated_at: value.updated_at,
            deleted_at: value.deleted_at,
            version: value.version,
        }
    }
}

impl TryFrom<InstanceRecord> for EquipmentInstance {
    type Error = DomainError;

    fn try_from(value: InstanceRecord) -> Result<Self, Self::Error> {
        let serial_number = normalize_serial(&value.serial_number, "serial_number")?;
        if value.version == 0 {
            return Err(DomainError::invariant("stored instance has version 0"));
        }

        let instance = Self {
            id: value.id,
            equipment_type_id: value.equipment_type_id,
            serial_number,
            imei: value.imei,
            status: value.status,
            condition: value.condition,
            location_warehouse_id: value.location_warehouse_id,
            assigned_client_id: value.assigned_client_id,
            installation_date: value.installation_date,
            warranty_expiry: value.warranty_expiry,
            last_maintenance_at: value.last_maintenance_at,
            created_at: value.created_at,
            updated_at: value.updated_at,
            deleted_at: value.deleted_at,
            version: value.version,
        };
        instance.state().check()?;
        Ok(instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::TransitionPolicy;
    use crate::MovementRequest;

    fn registered(warehouse: WarehouseId) -> EquipmentInstance {
        EquipmentInstance::register(
            InstanceId::new(),
            NewInstance::new(EquipmentTypeId::new(), "  S-1001 ", warehouse),
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn register_trims_serial_and_starts_at_version_one() {
        let warehouse = WarehouseId::new();
        let instance = registered(warehouse);

        assert_eq!(instance.serial_number(), "S-1001");
        assert_eq!(instance.version(), 1);
        assert_eq!(
            instance.state(),
            InstanceState::in_warehouse(InstanceStatus::Available, warehouse)
        );
    }

    #[test]
    fn register_rejects_blank_serial() {
        let err = EquipmentInstance::register(
            InstanceId::new(),
            NewInstance::new(EquipmentTypeId::new(), "   ", WarehouseId::new()),
            Utc::now(),
        )
        .unwrap_err();
        assert_eq!(err, DomainError::MissingField("serial_number".to_string()));
    }

    #[test]
    fn register_rejects_client_facing_status() {
        let new = NewInstance::new(EquipmentTypeId::new(), "S-1", WarehouseId::new())
            .with_status(InstanceStatus::Installed);
        let err = EquipmentInstance::register(InstanceId::new(), new, Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn blank_imei_is_treated_as_absent() {
        let new = NewInstance::new(EquipmentTypeId::new(), "S-1", WarehouseId::new()).with_imei(" ");
        let instance = EquipmentInstance::register(InstanceId::new(), new, Utc::now()).unwrap();
        assert_eq!(instance.imei(), None);
    }

    #[test]
    fn state_invariant_rejects_inconsistent_combinations() {
        let warehouse = Some(WarehouseId::new());
        let client = Some(ClientId::new());

        let bad = [
            (InstanceStatus::Installed, None, None),
            (InstanceStatus::Installed, warehouse, client),
            (InstanceStatus::Available, None, None),
            (InstanceStatus::Maintenance, warehouse, client),
            (InstanceStatus::Sold, warehouse, None),
            (InstanceStatus::Sold, None, client),
        ];
        for (status, location, client) in bad {
            let state = InstanceState {
                status,
                location_warehouse_id: location,
                assigned_client_id: client,
            };
            assert!(
                matches!(state.check(), Err(DomainError::InvariantViolation(_))),
                "{state:?} should be rejected"
            );
        }
    }

    #[test]
    fn with_transition_sets_installation_date_and_bumps_version() {
        let instance = registered(WarehouseId::new());
        let client = ClientId::new();
        let request = MovementRequest::new(
            instance.id(),
            MovementType::ClientInstallation,
            "new client site",
        )
        .client(client);
        let transition = TransitionPolicy::decide(&request, &instance.state(), false).unwrap();

        let at = Utc::now();
        let next = instance.with_transition(&transition, at).unwrap();

        assert_eq!(next.status(), InstanceStatus::Installed);
        assert_eq!(next.assigned_client_id(), Some(client));
        assert_eq!(next.location_warehouse_id(), None);
        assert_eq!(next.installation_date(), Some(at));
        assert_eq!(next.version(), 2);
        // Source value is untouched.
        assert_eq!(instance.status(), InstanceStatus::Available);
    }

    #[test]
    fn retire_requires_sold_or_defective() {
        let instance = registered(WarehouseId::new());
        let err = instance.retired(Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));

        let defective = EquipmentInstance::register(
            InstanceId::new(),
            NewInstance::new(EquipmentTypeId::new(), "S-2", WarehouseId::new())
                .with_status(InstanceStatus::Defective),
            Utc::now(),
        )
        .unwrap();
        let retired = defective.retired(Utc::now()).unwrap();
        assert!(retired.is_retired());
        assert!(matches!(
            retired.retired(Utc::now()),
            Err(DomainError::InvalidTransition(_))
        ));
    }

    #[test]
    fn record_round_trip_revalidates_invariant() {
        let instance = registered(WarehouseId::new());
        let restored = EquipmentInstance::try_from(instance.to_record()).unwrap();
        assert_eq!(restored, instance);

        let mut corrupted = instance.to_record();
        corrupted.location_warehouse_id = None;
        assert!(matches!(
            EquipmentInstance::try_from(corrupted),
            Err(DomainError::InvariantViolation(_))
        ));
    }
}
