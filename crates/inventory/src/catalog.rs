use serde::{Deserialize, Serialize};

use equiptrack_core::EquipmentTypeId;

use crate::instance::{EquipmentInstance, InstanceStatus};

/// Catalog entry for an equipment type (reference data).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquipmentCatalogEntry {
    pub id: EquipmentTypeId,
    pub name: String,
    pub category: String,
    pub subcategory: Option<String>,
    /// Price in smallest currency unit.
    pub price: u64,
    pub minimum_stock: u32,
    pub critical_stock: u32,
}

/// Availability compared to the catalog thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockLevel {
    Ok,
    Low,
    Critical,
}

impl StockLevel {
    pub fn classify(available: u64, minimum_stock: u32, critical_stock: u32) -> Self {
        if available <= u64::from(critical_stock) {
            StockLevel::Critical
        } else if available <= u64::from(minimum_stock) {
            StockLevel::Low
        } else {
            StockLevel::Ok
        }
    }
}

/// Per-type count of live (non-retired) instances by status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockSummary {
    pub equipment_type_id: EquipmentTypeId,
    pub available: u64,
    pub installed: u64,
    pub maintenance: u64,
    pub defective: u64,
    pub sold: u64,
    pub level: StockLevel,
}

impl StockSummary {
    pub fn from_instances<'a, I>(entry: &EquipmentCatalogEntry, instances: I) -> Self
    where
        I: IntoIterator<Item = &'a EquipmentInstance>,
    {
        let mut summary = Self {
            equipment_type_id: entry.id,
            available: 0,
            installed: 0,
            maintenance: 0,
            defective: 0,
            sold: 0,
            level: StockLevel::Ok,
        };

        for instance in instances {
            if instance.is_retired() || instance.equipment_type_id() != entry.id {
                continue;
            }
            match instance.status() {
                InstanceStatus::Available => summary.available += 1,
                InstanceStatus::Installed => summary.installed += 1,
                InstanceStatus::Maintenance => summary.maintenance += 1,
                InstanceStatus::Defective => summary.defective += 1,
                InstanceStatus::Sold => summary.sold += 1,
            }
        }

        summary.level = StockLevel::classify(summary.available, entry.minimum_stock, entry.critical_stock);
        summary
    }

    /// Units still owned and tracked (everything except sold).
    pub fn on_hand(&self) -> u64 {
        self.available + self.installed + self.maintenance + self.defective
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_uses_inclusive_thresholds() {
        assert_eq!(StockLevel::classify(2, 5, 2), StockLevel::Critical);
        assert_eq!(StockLevel::classify(5, 5, 2), StockLevel::Low);
        assert_eq!(StockLevel::classify(6, 5, 2), StockLevel::Ok);
        assert_eq!(StockLevel::classify(0, 0, 0), StockLevel::Critical);
    }
}
