//! Single-line stock movements raised by invoicing, purchasing and manual adjustments.

use std::sync::Arc;

use tracing::{info, instrument};

use stockbook_core::{ItemId, StockError, StockResult, WarehouseId};
use stockbook_inventory::{EntryUnit, StockKey, StockLedgerEntry, TransactionType, packaging_delta};

use crate::batch::{EntryDetails, StockBatch};
use crate::catalog::ItemCatalog;
use crate::locks::KeyLocks;
use crate::registry::WarehouseRegistry;
use crate::store::StockStore;

/// Request: change one position's quantity.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StockMovement {
    pub item_id: ItemId,
    /// `None` moves the item-level position.
    pub warehouse_id: Option<WarehouseId>,
    /// Signed change, expressed in `unit`.
    pub quantity: i64,
    #[serde(default)]
    pub unit: EntryUnit,
    pub transaction_type: TransactionType,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
    pub notes: Option<String>,
}

impl StockMovement {
    pub fn new(
        item_id: ItemId,
        warehouse_id: Option<WarehouseId>,
        quantity: i64,
        transaction_type: TransactionType,
    ) -> Self {
        Self {
            item_id,
            warehouse_id,
            quantity,
            unit: EntryUnit::Packaging,
            transaction_type,
            reference_type: None,
            reference_id: None,
            notes: None,
        }
    }

    /// The quantity is in the item's base unit and is converted on apply.
    pub fn in_base_units(mut self) -> Self {
        self.unit = EntryUnit::Base;
        self
    }

    pub fn referencing(mut self, reference_type: impl Into<String>, reference_id: impl Into<String>) -> Self {
        self.reference_type = Some(reference_type.into());
        self.reference_id = Some(reference_id.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn key(&self) -> StockKey {
        StockKey {
            item_id: self.item_id,
            warehouse_id: self.warehouse_id,
        }
    }

    fn check_shape(&self) -> StockResult<()> {
        if self.transaction_type.is_transfer() {
            return Err(StockError::validation(format!(
                "{} entries are written only by stock transfers",
                self.transaction_type
            )));
        }
        if self.quantity == 0 {
            return Err(StockError::validation("movement quantity cannot be zero"));
        }
        if self.quantity.checked_abs().is_none() {
            return Err(StockError::validation(format!(
                "movement quantity {} is out of range",
                self.quantity
            )));
        }
        if !self.transaction_type.accepts(self.quantity) {
            let direction = if self.quantity > 0 { "increase" } else { "decrease" };
            return Err(StockError::validation(format!(
                "{} cannot {direction} stock",
                self.transaction_type
            )));
        }
        Ok(())
    }
}

/// Applies `StockMovement`s: one position, one ledger entry, one commit.
pub struct StockMovements<S, C> {
    store: S,
    catalog: C,
    locks: Arc<KeyLocks>,
    registry: Arc<WarehouseRegistry>,
}

impl<S: StockStore, C: ItemCatalog> StockMovements<S, C> {
    pub fn new(store: S, catalog: C, locks: Arc<KeyLocks>, registry: Arc<WarehouseRegistry>) -> Self {
        Self {
            store,
            catalog,
            locks,
            registry,
        }
    }

    #[instrument(
        skip(self, movement),
        fields(
            item_id = %movement.item_id,
            warehouse_id = ?movement.warehouse_id,
            transaction_type = %movement.transaction_type,
            quantity = movement.quantity
        )
    )]
    pub fn apply(&self, movement: StockMovement) -> StockResult<StockLedgerEntry> {
        movement.check_shape()?;
        let item = self.catalog.require_item(movement.item_id)?;
        let delta = packaging_delta(movement.quantity, movement.unit, item.per_packaging_quantity).ok_or_else(|| {
            StockError::validation(format!(
                "{} {} is not a whole number of {} ({} {} each)",
                movement.quantity,
                item.base_unit,
                item.packaging_unit,
                item.pack_size(),
                item.base_unit
            ))
        })?;
        if delta == 0 {
            return Err(StockError::validation("movement quantity cannot be zero"));
        }

        let key = movement.key();
        let _locks = self.locks.acquire([key])?;
        let warehouses: Vec<WarehouseId> = movement.warehouse_id.into_iter().collect();
        let _active = self.registry.guard_active(&warehouses)?;

        let entry_quantity = movement
            .quantity
            .checked_abs()
            .ok_or_else(|| StockError::validation("movement quantity is out of range"))?;
        let mut batch = StockBatch::new(&self.store);
        batch.record_movement(
            key,
            delta,
            EntryDetails {
                transaction_type: movement.transaction_type,
                entry_quantity,
                entry_unit: item.unit_code(movement.unit).to_string(),
                reference_type: movement.reference_type,
                reference_id: movement.reference_id,
                transfer_id: None,
                notes: movement.notes,
            },
        )?;
        let entry = batch
            .commit()?
            .pop()
            .ok_or_else(|| StockError::invariant("movement commit returned no ledger entry"))?;

        info!(
            entry_id = entry.id,
            quantity_before = entry.quantity_before,
            quantity_after = entry.quantity_after,
            "stock movement applied"
        );
        Ok(entry)
    }
}
