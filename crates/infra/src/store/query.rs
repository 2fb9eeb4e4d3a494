//! Read-side query types: pagination, filters and paged results.
//!
//! Listings are read-only and never take instance locks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use equiptrack_core::{ClientId, EquipmentTypeId, InstanceId, WarehouseId};
use equiptrack_inventory::{
    EquipmentInstance, InstanceStatus, MovementDirection, MovementType, StockMovement,
};

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Offset/limit pagination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Maximum number of items to return.
    pub limit: u32,
    /// Offset for pagination (0-based).
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }
}

impl Pagination {
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self::bounded(limit, offset, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE)
    }

    /// Like [`Pagination::new`] with explicit default and cap. A zero limit
    /// means "use the default".
    pub fn bounded(limit: Option<u32>, offset: Option<u32>, default_limit: u32, max_limit: u32) -> Self {
        let limit = match limit {
            None | Some(0) => default_limit,
            Some(limit) => limit,
        };
        Self {
            limit: limit.min(max_limit).max(1),
            offset: offset.unwrap_or(0),
        }
    }

    /// Re-apply a cap to caller-built pagination.
    pub fn capped(self, default_limit: u32, max_limit: u32) -> Self {
        Self::bounded(Some(self.limit), Some(self.offset), default_limit, max_limit)
    }
}

/// A page of results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Total number of matches (across all pages).
    pub total: u64,
    pub pagination: Pagination,
    pub has_more: bool,
}

impl<T> Page<T> {
    /// Slice an already ordered, already filtered result set.
    pub fn from_ordered(all: Vec<T>, pagination: Pagination) -> Self {
        let total = all.len() as u64;
        let items: Vec<T> = all
            .into_iter()
            .skip(pagination.offset as usize)
            .take(pagination.limit as usize)
            .collect();
        Self::new(items, total, pagination)
    }

    pub fn new(items: Vec<T>, total: u64, pagination: Pagination) -> Self {
        let has_more = total > u64::from(pagination.offset) + u64::from(pagination.limit);
        Self {
            items,
            total,
            pagination,
            has_more,
        }
    }
}

/// Filter criteria for ledger listings. All fields are optional and combine with AND.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementFilter {
    pub instance_id: Option<InstanceId>,
    /// Matches movements leaving from or arriving at this warehouse.
    pub warehouse_id: Option<WarehouseId>,
    pub client_id: Option<ClientId>,
    pub movement_type: Option<MovementType>,
    /// Inclusive lower bound on `created_at`.
    pub created_after: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `created_at`.
    pub created_before: Option<DateTime<Utc>>,
}

impl MovementFilter {
    pub fn for_instance(instance_id: InstanceId) -> Self {
        Self {
            instance_id: Some(instance_id),
            ..Default::default()
        }
    }

    pub fn matches(&self, movement: &StockMovement) -> bool {
        self.instance_id.is_none_or(|id| movement.equipment_instance_id == id)
            && self.warehouse_id.is_none_or(|w| movement.involves_warehouse(w))
            && self.client_id.is_none_or(|c| movement.client_id == Some(c))
            && self.movement_type.is_none_or(|t| movement.movement_type == t)
            && self.created_after.is_none_or(|t| movement.created_at >= t)
            && self.created_before.is_none_or(|t| movement.created_at <= t)
    }
}

/// Filter criteria for instance listings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceFilter {
    pub equipment_type_id: Option<EquipmentTypeId>,
    pub status: Option<InstanceStatus>,
    pub warehouse_id: Option<WarehouseId>,
    pub client_id: Option<ClientId>,
    #[serde(default)]
    pub include_retired: bool,
}

impl InstanceFilter {
    pub fn matches(&self, instance: &EquipmentInstance) -> bool {
        (self.include_retired || !instance.is_retired())
            && self.equipment_type_id.is_none_or(|t| instance.equipment_type_id() == t)
            && self.status.is_none_or(|s| instance.status() == s)
            && self.warehouse_id.is_none_or(|w| instance.location_warehouse_id() == Some(w))
            && self.client_id.is_none_or(|c| instance.assigned_client_id() == Some(c))
    }
}

/// Movement counts grouped by direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementStats {
    pub inbound: u64,
    pub outbound: u64,
    pub internal: u64,
}

impl MovementStats {
    pub fn from_counts<I>(counts: I) -> Self
    where
        I: IntoIterator<Item = (MovementType, u64)>,
    {
        counts.into_iter().fold(Self::default(), |mut stats, (ty, n)| {
            match ty.direction() {
                MovementDirection::Inbound => stats.inbound += n,
                MovementDirection::Outbound => stats.outbound += n,
                MovementDirection::Internal => stats.internal += n,
            }
            stats
        })
    }

    pub fn total(&self) -> u64 {
        self.inbound + self.outbound + self.internal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_defaults_and_caps() {
        assert_eq!(Pagination::new(None, None), Pagination { limit: 50, offset: 0 });
        assert_eq!(Pagination::new(Some(5000), Some(10)).limit, 1000);
        assert_eq!(Pagination::new(Some(0), None).limit, 50);
        assert_eq!(Pagination { limit: 9000, offset: 3 }.capped(50, 200), Pagination { limit: 200, offset: 3 });
    }

    #[test]
    fn page_reports_remaining_items() {
        let page = Page::from_ordered((0..7).collect::<Vec<_>>(), Pagination { limit: 3, offset: 3 });
        assert_eq!(page.items, vec![3, 4, 5]);
        assert_eq!(page.total, 7);
        assert!(page.has_more);

        let last = Page::from_ordered((0..7).collect::<Vec<_>>(), Pagination { limit: 3, offset: 6 });
        assert_eq!(last.items, vec![6]);
        assert!(!last.has_more);
    }

    #[test]
    fn stats_group_by_direction() {
        let stats = MovementStats::from_counts([
            (MovementType::Purchase, 4),
            (MovementType::WarrantyReturn, 1),
            (MovementType::ClientInstallation, 2),
            (MovementType::Sale, 1),
            (MovementType::WarehouseTransfer, 3),
        ]);
        assert_eq!(stats, MovementStats { inbound: 5, outbound: 3, internal: 3 });
        assert_eq!(stats.total(), 11);
    }
}
