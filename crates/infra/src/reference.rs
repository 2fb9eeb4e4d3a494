//! Reference data consulted for existence checks: equipment catalog,
//! warehouses and clients. Owned elsewhere; the inventory only reads it.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use equiptrack_core::{ClientId, EquipmentTypeId, WarehouseId};
use equiptrack_inventory::EquipmentCatalogEntry;

use crate::store::StoreError;

pub trait ReferenceData: Send + Sync {
    fn catalog_entry(&self, id: EquipmentTypeId) -> Result<Option<EquipmentCatalogEntry>, StoreError>;

    fn warehouse_exists(&self, id: WarehouseId) -> Result<bool, StoreError>;

    fn client_exists(&self, id: ClientId) -> Result<bool, StoreError>;
}

impl<R> ReferenceData for Arc<R>
where
    R: ReferenceData + ?Sized,
{
    fn catalog_entry(&self, id: EquipmentTypeId) -> Result<Option<EquipmentCatalogEntry>, StoreError> {
        (**self).catalog_entry(id)
    }

    fn warehouse_exists(&self, id: WarehouseId) -> Result<bool, StoreError> {
        (**self).warehouse_exists(id)
    }

    fn client_exists(&self, id: ClientId) -> Result<bool, StoreError> {
        (**self).client_exists(id)
    }
}

#[derive(Debug, Default)]
struct Tables {
    catalog: HashMap<EquipmentTypeId, EquipmentCatalogEntry>,
    warehouses: HashSet<WarehouseId>,
    clients: HashSet<ClientId>,
}

/// In-memory reference data for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryReferenceData {
    tables: RwLock<Tables>,
}

impl InMemoryReferenceData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_catalog_entry(&self, entry: EquipmentCatalogEntry) {
        if let Ok(mut tables) = self.tables.write() {
            tables.catalog.insert(entry.id, entry);
        }
    }

    pub fn add_warehouse(&self, id: WarehouseId) {
        if let Ok(mut tables) = self.tables.write() {
            tables.warehouses.insert(id);
        }
    }

    pub fn add_client(&self, id: ClientId) {
        if let Ok(mut tables) = self.tables.write() {
            tables.clients.insert(id);
        }
    }

    fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> Result<T, StoreError> {
        let tables = self
            .tables
            .read()
            .map_err(|_| StoreError::Backend("reference data lock poisoned".to_string()))?;
        Ok(f(&tables))
    }
}

impl ReferenceData for InMemoryReferenceData {
    fn catalog_entry(&self, id: EquipmentTypeId) -> Result<Option<EquipmentCatalogEntry>, StoreError> {
        self.read(|t| t.catalog.get(&id).cloned())
    }

    fn warehouse_exists(&self, id: WarehouseId) -> Result<bool, StoreError> {
        self.read(|t| t.warehouses.contains(&id))
    }

    fn client_exists(&self, id: ClientId) -> Result<bool, StoreError> {
        self.read(|t| t.clients.contains(&id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_reflect_added_rows() {
        let reference = InMemoryReferenceData::new();
        let w = WarehouseId::new();
        reference.add_warehouse(w);

        assert!(reference.warehouse_exists(w).unwrap());
        assert!(!reference.warehouse_exists(WarehouseId::new()).unwrap());
        assert!(!reference.client_exists(ClientId::new()).unwrap());
        assert_eq!(reference.catalog_entry(EquipmentTypeId::new()).unwrap(), None);
    }
}
