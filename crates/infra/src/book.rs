//! `StockBook`: the stock core as one object.
//!
//! Wires the store, catalog, lock table, registry and transfer store into the services
//! and exposes the operations other modules call.

use std::sync::Arc;

use tracing::{info, instrument};

use stockbook_core::{ItemId, StockResult, WarehouseId};
use stockbook_inventory::{StockKey, StockLedgerEntry, StockRecord, StockSettings, Warehouse};

use crate::catalog::ItemCatalog;
use crate::config::StockBookConfig;
use crate::ledger::StockLedger;
use crate::locks::KeyLocks;
use crate::movement::{StockMovement, StockMovements};
use crate::query::{DistributionRow, StockQueryService};
use crate::registry::WarehouseRegistry;
use crate::store::{InMemoryStockStore, StockStore};
use crate::transfer::{InMemoryTransferStore, TransferEngine, TransferStore};

/// Stock ledger and transfer engine over shared stores.
pub struct StockBook<S: ?Sized, C: ?Sized, T: ?Sized> {
    store: Arc<S>,
    locks: Arc<KeyLocks>,
    registry: Arc<WarehouseRegistry>,
    movements: StockMovements<Arc<S>, Arc<C>>,
    transfers: TransferEngine<Arc<S>, Arc<C>, Arc<T>>,
    queries: StockQueryService<Arc<S>, Arc<C>>,
    ledger: StockLedger<Arc<S>>,
}

impl<C: ItemCatalog + ?Sized> StockBook<InMemoryStockStore, C, InMemoryTransferStore> {
    /// Everything in memory except the catalog.
    pub fn in_memory(catalog: Arc<C>, config: StockBookConfig) -> Self {
        Self::new(
            Arc::new(InMemoryStockStore::new()),
            catalog,
            Arc::new(InMemoryTransferStore::new()),
            Arc::new(WarehouseRegistry::new()),
            config,
        )
    }
}

impl<S, C, T> StockBook<S, C, T>
where
    S: StockStore + ?Sized,
    C: ItemCatalog + ?Sized,
    T: TransferStore + ?Sized,
{
    pub fn new(
        store: Arc<S>,
        catalog: Arc<C>,
        transfers: Arc<T>,
        registry: Arc<WarehouseRegistry>,
        config: StockBookConfig,
    ) -> Self {
        let locks = Arc::new(KeyLocks::new(config.lock_timeout));
        Self {
            movements: StockMovements::new(
                Arc::clone(&store),
                Arc::clone(&catalog),
                Arc::clone(&locks),
                Arc::clone(&registry),
            ),
            transfers: TransferEngine::new(
                Arc::clone(&store),
                Arc::clone(&catalog),
                transfers,
                Arc::clone(&locks),
                Arc::clone(&registry),
                config,
            ),
            queries: StockQueryService::new(Arc::clone(&store), catalog, Arc::clone(&registry)),
            ledger: StockLedger::new(Arc::clone(&store)),
            store,
            locks,
            registry,
        }
    }

    /// Apply one movement; see `StockMovements::apply`.
    pub fn apply_stock_movement(&self, movement: StockMovement) -> StockResult<StockLedgerEntry> {
        self.movements.apply(movement)
    }

    /// Set a position's thresholds and location note. Quantity and ledger are untouched.
    #[instrument(skip(self, settings))]
    pub fn configure_stock_record(&self, key: StockKey, settings: StockSettings) -> StockResult<StockRecord> {
        let _locks = self.locks.acquire([key])?;
        let warehouses: Vec<WarehouseId> = key.warehouse_id.into_iter().collect();
        let _active = self.registry.guard_active(&warehouses)?;
        let record = self.store.save_settings(&key, settings)?;
        info!(%key, "stock record configured");
        Ok(record)
    }

    /// Deactivate a warehouse, refusing while it holds stock.
    pub fn soft_delete_warehouse(&self, id: WarehouseId) -> StockResult<Warehouse> {
        self.registry.soft_delete_warehouse(id, &*self.store)
    }

    pub fn get_quantity(&self, item_id: ItemId, warehouse_id: Option<WarehouseId>) -> StockResult<i64> {
        self.store.quantity(&StockKey {
            item_id,
            warehouse_id,
        })
    }

    pub fn list_distribution(&self, item_id: ItemId) -> StockResult<Vec<DistributionRow>> {
        self.queries.get_distribution(item_id)
    }

    pub fn transfers(&self) -> &TransferEngine<Arc<S>, Arc<C>, Arc<T>> {
        &self.transfers
    }

    /// Create/update/reactivate/default go straight to the registry; soft delete goes
    /// through `soft_delete_warehouse` so it can see the stock store.
    pub fn warehouses(&self) -> &WarehouseRegistry {
        &self.registry
    }

    pub fn queries(&self) -> &StockQueryService<Arc<S>, Arc<C>> {
        &self.queries
    }

    pub fn ledger(&self) -> &StockLedger<Arc<S>> {
        &self.ledger
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}
