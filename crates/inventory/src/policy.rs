//! Transition policy: which movements are legal from which states, and what
//! state results.
//!
//! Pure lookup + validation. No IO, no clock, no storage.

use equiptrack_core::{DomainError, DomainResult};

use crate::instance::{InstanceState, InstanceStatus};
use crate::movement::{MovementRequest, MovementType, StockMovement};

/// How a companion reference field is treated for a movement type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRule {
    Required,
    /// May be supplied; when supplied it must match the instance's current location.
    Optional,
    Forbidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusOutcome {
    Set(InstanceStatus),
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationOutcome {
    /// Location becomes the request's `to_warehouse_id`.
    ToWarehouse,
    Cleared,
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientOutcome {
    /// Assignment becomes the request's `client_id`.
    FromRequest,
    Cleared,
    Unchanged,
}

/// One row of the policy table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MovementRule {
    pub from_warehouse: FieldRule,
    pub to_warehouse: FieldRule,
    pub client: FieldRule,
    pub allowed_from: &'static [InstanceStatus],
    pub status: StatusOutcome,
    pub location: LocationOutcome,
    pub assigned_client: ClientOutcome,
}

const ANY_ACTIVE: &[InstanceStatus] = &[
    InstanceStatus::Available,
    InstanceStatus::Installed,
    InstanceStatus::Maintenance,
    InstanceStatus::Defective,
];
const IN_WAREHOUSE: &[InstanceStatus] = &[
    InstanceStatus::Available,
    InstanceStatus::Maintenance,
    InstanceStatus::Defective,
];

/// Outcome of a successful policy decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub movement_type: MovementType,
    pub previous: InstanceState,
    pub next: InstanceState,
}

pub struct TransitionPolicy;

impl TransitionPolicy {
    pub fn rule(movement_type: MovementType) -> MovementRule {
        use ClientOutcome as C;
        use FieldRule::{Forbidden, Optional, Required};
        use InstanceStatus as S;
        use LocationOutcome as L;

        match movement_type {
            MovementType::Purchase => MovementRule {
                from_warehouse: Forbidden,
                to_warehouse: Required,
                client: Forbidden,
                allowed_from: &[S::Available],
                status: StatusOutcome::Set(S::Available),
                location: L::ToWarehouse,
                assigned_client: C::Cleared,
            },
            MovementType::WarrantyReturn => MovementRule {
                from_warehouse: Forbidden,
                to_warehouse: Required,
                client: Forbidden,
                allowed_from: &[S::Maintenance, S::Defective],
                status: StatusOutcome::Set(S::Available),
                location: L::ToWarehouse,
                assigned_client: C::Cleared,
            },
            MovementType::InventoryAdjustment => MovementRule {
                from_warehouse: Forbidden,
                to_warehouse: Required,
                client: Forbidden,
                allowed_from: ANY_ACTIVE,
                status: StatusOutcome::Set(S::Available),
                location: L::ToWarehouse,
                assigned_client: C::Cleared,
            },
            MovementType::ClientInstallation => MovementRule {
                from_warehouse: Optional,
                to_warehouse: Forbidden,
                client: Required,
                allowed_from: &[S::Available],
                status: StatusOutcome::Set(S::Installed),
                location: L::Cleared,
                assigned_client: C::FromRequest,
            },
            MovementType::InternalLoan => MovementRule {
                from_warehouse: Required,
                to_warehouse: Forbidden,
                client: Forbidden,
                allowed_from: &[S::Available],
                status: StatusOutcome::Set(S::Maintenance),
                location: L::Unchanged,
                assigned_client: C::Unchanged,
            },
            MovementType::WarrantyReplacement => MovementRule {
                from_warehouse: Required,
                to_warehouse: Forbidden,
                client: Forbidden,
                allowed_from: &[S::Available, S::Maintenance],
                status: StatusOutcome::Set(S::Defective),
                location: L::Unchanged,
                assigned_client: C::Unchanged,
            },
            MovementType::Obsolescence => MovementRule {
                from_warehouse: Required,
                to_warehouse: Forbidden,
                client: Forbidden,
                allowed_from: IN_WAREHOUSE,
                status: StatusOutcome::Set(S::Defective),
                location: L::Unchanged,
                assigned_client: C::Cleared,
            },
            MovementType::WarehouseTransfer => MovementRule {
                from_warehouse: Required,
                to_warehouse: Required,
                client: Forbidden,
                allowed_from: IN_WAREHOUSE,
                status: StatusOutcome::Unchanged,
                location: L::ToWarehouse,
                assigned_client: C::Unchanged,
            },
            MovementType::Sale => MovementRule {
                from_warehouse: Optional,
                to_warehouse: Forbidden,
                client: Required,
                allowed_from: &[S::Available, S::Installed],
                status: StatusOutcome::Set(S::Sold),
                location: L::Cleared,
                assigned_client: C::Cleared,
            },
        }
    }

    /// Shape checks that need no instance state: reason, quantity, and the
    /// required/forbidden companion fields.
    pub fn validate_request(request: &MovementRequest) -> DomainResult<()> {
        if request.reason.trim().is_empty() {
            return Err(DomainError::missing_field("reason"));
        }
        if request.quantity != 1 {
            return Err(DomainError::validation(format!(
                "serialized movements move exactly one unit (quantity: {})",
                request.quantity
            )));
        }

        let ty = request.movement_type;
        let rule = Self::rule(ty);
        check_field(ty, "from_warehouse_id", rule.from_warehouse, request.from_warehouse_id.is_some())?;
        check_field(ty, "to_warehouse_id", rule.to_warehouse, request.to_warehouse_id.is_some())?;
        check_field(ty, "client_id", rule.client, request.client_id.is_some())?;

        if ty == MovementType::WarehouseTransfer && request.from_warehouse_id == request.to_warehouse_id {
            return Err(DomainError::validation(
                "warehouse_transfer must move to a different warehouse",
            ));
        }
        Ok(())
    }

    /// Decide the resulting state for `request` against the instance's `current` state.
    ///
    /// Rejections never carry partial effects: this function only computes.
    pub fn decide(
        request: &MovementRequest,
        current: &InstanceState,
        retired: bool,
    ) -> DomainResult<Transition> {
        let ty = request.movement_type;

        if retired {
            return Err(DomainError::invalid_transition(format!(
                "{ty} is not permitted on a retired instance"
            )));
        }
        if current.status.is_terminal() {
            return Err(DomainError::invalid_transition(format!(
                "{ty} is not permitted: instance is {} (terminal)",
                current.status
            )));
        }

        Self::validate_request(request)?;

        let rule = Self::rule(ty);
        if !rule.allowed_from.contains(&current.status) {
            return Err(DomainError::invalid_transition(format!(
                "{ty} is not permitted for a {} instance",
                current.status
            )));
        }
        if let Some(from) = request.from_warehouse_id {
            if current.location_warehouse_id != Some(from) {
                return Err(DomainError::invalid_transition(format!(
                    "{ty} from warehouse {from}, but the instance is not located there"
                )));
            }
        }

        let next = InstanceState {
            status: match rule.status {
                StatusOutcome::Set(status) => status,
                StatusOutcome::Unchanged => current.status,
            },
            location_warehouse_id: match rule.location {
                LocationOutcome::ToWarehouse => request.to_warehouse_id,
                LocationOutcome::Cleared => None,
                LocationOutcome::Unchanged => current.location_warehouse_id,
            },
            assigned_client_id: match rule.assigned_client {
                ClientOutcome::FromRequest => request.client_id,
                ClientOutcome::Cleared => None,
                ClientOutcome::Unchanged => current.assigned_client_id,
            },
        };
        next.check()?;

        Ok(Transition {
            movement_type: ty,
            previous: *current,
            next,
        })
    }

    /// Fold committed movements (in `created_at`, `sequence` order) over the
    /// state an instance was registered with, re-deciding each one.
    ///
    /// Fails with `InvariantViolation` if any movement recorded a resulting
    /// state the policy would not produce.
    pub fn replay<'a, I>(initial: InstanceState, movements: I) -> DomainResult<InstanceState>
    where
        I: IntoIterator<Item = &'a StockMovement>,
    {
        let mut ordered: Vec<&StockMovement> = movements.into_iter().collect();
        ordered.sort_by_key(|m| (m.created_at, m.sequence));

        let mut state = initial;
        for movement in ordered {
            let transition = Self::decide(&movement.to_request(), &state, false)?;
            if transition.next != movement.resulting {
                return Err(DomainError::invariant(format!(
                    "movement {} recorded {:?} but the policy yields {:?}",
                    movement.id, movement.resulting, transition.next
                )));
            }
            state = transition.next;
        }
        Ok(state)
    }
}

fn check_field(ty: MovementType, name: &str, rule: FieldRule, present: bool) -> DomainResult<()> {
    match (rule, present) {
        (FieldRule::Required, false) => Err(DomainError::missing_field(format!(
            "{name} is required for {ty}"
        ))),
        (FieldRule::Forbidden, true) => Err(DomainError::validation(format!(
            "{name} is not allowed for {ty}"
        ))),
        _ => Ok(()),
    }
}
