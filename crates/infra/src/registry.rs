//! Warehouse lifecycle, guarded by stock presence.
//!
//! Stock mutations hold an `ActiveWarehouses` read guard from the moment they check the
//! warehouses until their batch is committed. `soft_delete_warehouse` takes the write
//! side before it looks at stock, so a warehouse cannot be deactivated between a
//! movement's check and its commit.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use tracing::{info, instrument};

use stockbook_core::{Entity, ItemId, StockError, StockResult, WarehouseId};
use stockbook_inventory::{NewWarehouse, Warehouse, WarehouseUpdate, normalize_code};

use crate::store::StockStore;

#[derive(Debug, Default)]
struct RegistryState {
    warehouses: HashMap<WarehouseId, Warehouse>,
}

impl RegistryState {
    fn ensure_code_free(&self, code: &str, except: Option<WarehouseId>) -> StockResult<()> {
        let code = normalize_code(code);
        let taken = self
            .warehouses
            .values()
            .any(|w| Some(w.id) != except && w.code == code);
        if taken {
            return Err(StockError::validation(format!("warehouse code '{code}' is already in use")));
        }
        Ok(())
    }

    fn get(&self, id: WarehouseId) -> StockResult<&Warehouse> {
        self.warehouses
            .get(&id)
            .ok_or_else(|| StockError::not_found(format!("warehouse {id}")))
    }

    fn get_mut(&mut self, id: WarehouseId) -> StockResult<&mut Warehouse> {
        self.warehouses
            .get_mut(&id)
            .ok_or_else(|| StockError::not_found(format!("warehouse {id}")))
    }
}

/// Registry of warehouses.
#[derive(Debug, Default)]
pub struct WarehouseRegistry {
    state: RwLock<RegistryState>,
}

fn poisoned() -> StockError {
    StockError::persistence("warehouse registry lock poisoned")
}

impl WarehouseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from previously stored warehouses.
    pub fn from_warehouses(warehouses: impl IntoIterator<Item = Warehouse>) -> Self {
        Self {
            state: RwLock::new(RegistryState {
                warehouses: warehouses.into_iter().map(|w| (*w.id(), w)).collect(),
            }),
        }
    }

    fn read(&self) -> StockResult<RwLockReadGuard<'_, RegistryState>> {
        self.state.read().map_err(|_| poisoned())
    }

    fn write(&self) -> StockResult<RwLockWriteGuard<'_, RegistryState>> {
        self.state.write().map_err(|_| poisoned())
    }

    #[instrument(skip(self, request), fields(code = %request.code))]
    pub fn create_warehouse(&self, request: NewWarehouse) -> StockResult<Warehouse> {
        request.validate()?;
        let mut state = self.write()?;
        state.ensure_code_free(&request.code, None)?;
        let warehouse = Warehouse::create(WarehouseId::new(), request, Utc::now())?;
        state.warehouses.insert(*warehouse.id(), warehouse.clone());
        info!(warehouse_id = %warehouse.id, "warehouse created");
        Ok(warehouse)
    }

    #[instrument(skip(self, update))]
    pub fn update_warehouse(&self, id: WarehouseId, update: WarehouseUpdate) -> StockResult<Warehouse> {
        update.validate()?;
        let mut state = self.write()?;
        if let Some(code) = &update.code {
            state.ensure_code_free(code, Some(id))?;
        }
        let warehouse = state.get_mut(id)?;
        warehouse.apply_update(update, Utc::now())?;
        Ok(warehouse.clone())
    }

    /// Deactivate a warehouse that holds no stock. Deactivating the default also clears
    /// the default.
    #[instrument(skip(self, store))]
    pub fn soft_delete_warehouse<S: StockStore + ?Sized>(&self, id: WarehouseId, store: &S) -> StockResult<Warehouse> {
        let mut state = self.write()?;
        state.get(id)?;

        let items: Vec<ItemId> = store
            .records_for_warehouse(id)?
            .into_iter()
            .filter(|r| r.quantity > 0)
            .map(|r| r.item_id)
            .collect();
        if !items.is_empty() {
            return Err(StockError::StockExists {
                warehouse_id: id,
                items,
            });
        }

        let warehouse = state.get_mut(id)?;
        warehouse.deactivate(Utc::now());
        info!(warehouse_id = %id, "warehouse deactivated");
        Ok(warehouse.clone())
    }

    #[instrument(skip(self))]
    pub fn reactivate_warehouse(&self, id: WarehouseId) -> StockResult<Warehouse> {
        let mut state = self.write()?;
        let warehouse = state.get_mut(id)?;
        warehouse.reactivate(Utc::now());
        info!(warehouse_id = %id, "warehouse reactivated");
        Ok(warehouse.clone())
    }

    /// Make `id` the only default warehouse. The switch happens under one write guard, so
    /// readers see exactly one default before and after.
    #[instrument(skip(self))]
    pub fn set_default_warehouse(&self, id: WarehouseId) -> StockResult<Warehouse> {
        let mut state = self.write()?;
        if !state.get(id)?.is_active {
            return Err(StockError::validation(format!(
                "warehouse {id} is inactive and cannot be the default"
            )));
        }
        let now = Utc::now();
        for warehouse in state.warehouses.values_mut() {
            let is_default = warehouse.id == id;
            if warehouse.is_default != is_default {
                warehouse.is_default = is_default;
                warehouse.updated_at = now;
            }
        }
        Ok(state.get(id)?.clone())
    }

    pub fn get(&self, id: WarehouseId) -> StockResult<Warehouse> {
        Ok(self.read()?.get(id)?.clone())
    }

    /// Warehouses ordered by name.
    pub fn list(&self, active_only: bool) -> StockResult<Vec<Warehouse>> {
        let state = self.read()?;
        let mut warehouses: Vec<Warehouse> = state
            .warehouses
            .values()
            .filter(|w| !active_only || w.is_active)
            .cloned()
            .collect();
        warehouses.sort_by(|a, b| a.name.cmp(&b.name).then(a.code.cmp(&b.code)));
        Ok(warehouses)
    }

    pub fn default_warehouse(&self) -> StockResult<Option<Warehouse>> {
        Ok(self.read()?.warehouses.values().find(|w| w.is_default).cloned())
    }

    /// Hold the registry's read guard after checking that every warehouse in `ids`
    /// exists and is active.
    ///
    /// The caller must not call back into the registry while the guard is alive.
    pub fn guard_active(&self, ids: &[WarehouseId]) -> StockResult<ActiveWarehouses<'_>> {
        let state = self.read()?;
        for id in ids {
            let warehouse = state.get(*id)?;
            if !warehouse.is_active {
                return Err(StockError::validation(format!(
                    "warehouse {} ({}) is inactive",
                    warehouse.code, id
                )));
            }
        }
        Ok(ActiveWarehouses { _state: state })
    }
}

/// Read guard over the registry; the checked warehouses stay active while it lives.
pub struct ActiveWarehouses<'a> {
    _state: RwLockReadGuard<'a, RegistryState>,
}
