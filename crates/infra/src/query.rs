//! Read-only stock queries: distribution, low/surplus alerts and valuation.
//!
//! Nothing here takes a stock-position lock; every answer is built from store snapshots.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use stockbook_core::{ItemId, StockResult, WarehouseId};
use stockbook_inventory::{Item, StockRecord, Warehouse};

use crate::catalog::ItemCatalog;
use crate::registry::WarehouseRegistry;
use crate::store::StockStore;

/// Where a position stands against its thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StockLevel {
    OutOfStock,
    Low,
    Normal,
    Surplus,
}

/// Thresholds in force for one position: the record's own when set, else the item's.
/// Zero means unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Thresholds {
    pub min: i64,
    pub max: i64,
}

impl Thresholds {
    pub fn for_record(item: &Item, record: Option<&StockRecord>) -> Self {
        Self {
            min: record.and_then(|r| r.min_quantity).unwrap_or(item.min_stock),
            max: record.and_then(|r| r.max_quantity).unwrap_or(item.max_stock),
        }
    }

    pub fn classify(&self, quantity: i64) -> StockLevel {
        if quantity <= 0 {
            StockLevel::OutOfStock
        } else if self.min > 0 && quantity < self.min {
            StockLevel::Low
        } else if self.max > 0 && quantity > self.max {
            StockLevel::Surplus
        } else {
            StockLevel::Normal
        }
    }

    fn is_below_min(&self, quantity: i64) -> bool {
        self.min > 0 && quantity < self.min
    }

    fn is_above_max(&self, quantity: i64) -> bool {
        self.max > 0 && quantity > self.max
    }
}

/// One warehouse's share of an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DistributionRow {
    /// `None` for the item-level position.
    pub warehouse_id: Option<WarehouseId>,
    pub warehouse_code: Option<String>,
    pub warehouse_name: Option<String>,
    pub quantity: i64,
    pub base_quantity: i64,
    pub status: StockLevel,
    pub location_note: Option<String>,
}

/// A position outside its thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockAlert {
    pub item_id: ItemId,
    pub item_name: String,
    pub warehouse_id: Option<WarehouseId>,
    pub warehouse_name: Option<String>,
    pub quantity: i64,
    pub thresholds: Thresholds,
    pub status: StockLevel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockValuation {
    pub item_id: ItemId,
    /// Packaging units across all positions.
    pub quantity: i64,
    pub base_quantity: i64,
    pub purchase_price_per_base_unit: u64,
    /// quantity × per-packaging quantity × price per base unit, in minor currency units.
    pub value: u64,
}

/// One item held in a warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WarehouseStockRow {
    pub item_id: ItemId,
    pub item_name: String,
    pub quantity: i64,
    pub base_quantity: i64,
    pub status: StockLevel,
    pub value: u64,
}

/// Aggregations over the stock store.
pub struct StockQueryService<S, C> {
    store: S,
    catalog: C,
    registry: Arc<WarehouseRegistry>,
}

impl<S: StockStore, C: ItemCatalog> StockQueryService<S, C> {
    pub fn new(store: S, catalog: C, registry: Arc<WarehouseRegistry>) -> Self {
        Self {
            store,
            catalog,
            registry,
        }
    }

    fn warehouses(&self) -> StockResult<HashMap<WarehouseId, Warehouse>> {
        Ok(self.registry.list(false)?.into_iter().map(|w| (w.id, w)).collect())
    }

    /// Positions of `item_id`, ordered by warehouse name; the item-level position last.
    pub fn get_distribution(&self, item_id: ItemId) -> StockResult<Vec<DistributionRow>> {
        let item = self.catalog.require_item(item_id)?;
        let warehouses = self.warehouses()?;

        let mut rows: Vec<DistributionRow> = self
            .store
            .records_for_item(item_id)?
            .into_iter()
            .map(|record| {
                let warehouse = record.warehouse_id.and_then(|id| warehouses.get(&id));
                DistributionRow {
                    warehouse_id: record.warehouse_id,
                    warehouse_code: warehouse.map(|w| w.code.clone()),
                    warehouse_name: warehouse.map(|w| w.name.clone()),
                    quantity: record.quantity,
                    base_quantity: item.to_base_units(record.quantity),
                    status: Thresholds::for_record(&item, Some(&record)).classify(record.quantity),
                    location_note: record.location_note,
                }
            })
            .collect();
        rows.sort_by(|a, b| {
            (a.warehouse_name.is_none(), &a.warehouse_name, a.warehouse_id).cmp(&(
                b.warehouse_name.is_none(),
                &b.warehouse_name,
                b.warehouse_id,
            ))
        });
        Ok(rows)
    }

    fn alerts(&self, wanted: impl Fn(&Thresholds, i64) -> bool) -> StockResult<Vec<StockAlert>> {
        let warehouses = self.warehouses()?;
        let mut alerts = Vec::new();

        for item in self.catalog.items()? {
            let records = self.store.records_for_item(item.id)?;
            if records.is_empty() {
                // Never stocked anywhere: judge the item's own thresholds against zero.
                let thresholds = Thresholds::for_record(&item, None);
                if wanted(&thresholds, 0) {
                    alerts.push(StockAlert {
                        item_id: item.id,
                        item_name: item.name.clone(),
                        warehouse_id: None,
                        warehouse_name: None,
                        quantity: 0,
                        thresholds,
                        status: thresholds.classify(0),
                    });
                }
                continue;
            }

            for record in records {
                let warehouse = match record.warehouse_id {
                    Some(id) => match warehouses.get(&id) {
                        Some(w) if w.is_active => Some(w),
                        _ => continue,
                    },
                    None => None,
                };
                let thresholds = Thresholds::for_record(&item, Some(&record));
                if wanted(&thresholds, record.quantity) {
                    alerts.push(StockAlert {
                        item_id: item.id,
                        item_name: item.name.clone(),
                        warehouse_id: record.warehouse_id,
                        warehouse_name: warehouse.map(|w| w.name.clone()),
                        quantity: record.quantity,
                        thresholds,
                        status: thresholds.classify(record.quantity),
                    });
                }
            }
        }
        Ok(alerts)
    }

    /// Positions below their minimum (including empty ones), by item name.
    pub fn get_low_stock(&self) -> StockResult<Vec<StockAlert>> {
        self.alerts(Thresholds::is_below_min)
    }

    /// Positions above their maximum, by item name.
    pub fn get_surplus_stock(&self) -> StockResult<Vec<StockAlert>> {
        self.alerts(Thresholds::is_above_max)
    }

    pub fn get_stock_value(&self, item_id: ItemId) -> StockResult<StockValuation> {
        let item = self.catalog.require_item(item_id)?;
        let quantity: i64 = self
            .store
            .records_for_item(item_id)?
            .iter()
            .fold(0i64, |total, r| total.saturating_add(r.quantity));
        Ok(StockValuation {
            item_id,
            quantity,
            base_quantity: item.to_base_units(quantity),
            purchase_price_per_base_unit: item.purchase_price_per_base_unit,
            value: item.stock_value(quantity),
        })
    }

    /// Sum of `get_stock_value` over the whole catalog.
    pub fn total_stock_value(&self) -> StockResult<u64> {
        let mut total = 0u64;
        for item in self.catalog.items()? {
            total = total.saturating_add(self.get_stock_value(item.id)?.value);
        }
        Ok(total)
    }

    /// Items with stock in one warehouse, by item name.
    pub fn warehouse_stock(&self, warehouse_id: WarehouseId) -> StockResult<Vec<WarehouseStockRow>> {
        self.registry.get(warehouse_id)?;
        let mut rows = Vec::new();
        for record in self.store.records_for_warehouse(warehouse_id)? {
            if record.quantity <= 0 {
                continue;
            }
            let Some(item) = self.catalog.item(record.item_id)? else {
                continue;
            };
            rows.push(WarehouseStockRow {
                item_id: item.id,
                item_name: item.name.clone(),
                quantity: record.quantity,
                base_quantity: item.to_base_units(record.quantity),
                status: Thresholds::for_record(&item, Some(&record)).classify(record.quantity),
                value: item.stock_value(record.quantity),
            });
        }
        rows.sort_by(|a, b| a.item_name.cmp(&b.item_name).then(a.item_id.cmp(&b.item_id)));
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::batch::{EntryDetails, StockBatch};
    use crate::catalog::InMemoryItemCatalog;
    use crate::store::InMemoryStockStore;
    use stockbook_inventory::{NewWarehouse, StockKey, StockSettings, TransactionType};

    struct Fixture {
        store: Arc<InMemoryStockStore>,
        queries: StockQueryService<Arc<InMemoryStockStore>, Arc<InMemoryItemCatalog>>,
        soap: Item,
        oil: Item,
        north: WarehouseId,
        south: WarehouseId,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStockStore::new());
        let soap = Item::new(ItemId::new(), "Soap", "PCS", "CTN", 12)
            .with_stock_limits(5, 20)
            .with_purchase_price(1_000);
        let oil = Item::new(ItemId::new(), "Oil", "LTR", "CAN", 15).with_purchase_price(12_000);
        let catalog = Arc::new(InMemoryItemCatalog::with_items([soap.clone(), oil.clone()]));
        let registry = Arc::new(WarehouseRegistry::new());
        let north = registry.create_warehouse(NewWarehouse::new("N", "North")).unwrap().id;
        let south = registry.create_warehouse(NewWarehouse::new("S", "South")).unwrap().id;
        let queries = StockQueryService::new(Arc::clone(&store), catalog, registry);
        Fixture {
            store,
            queries,
            soap,
            oil,
            north,
            south,
        }
    }

    fn put(store: &InMemoryStockStore, key: StockKey, quantity: i64) {
        let mut batch = StockBatch::new(store);
        batch
            .record_movement(
                key,
                quantity,
                EntryDetails {
                    transaction_type: TransactionType::Opening,
                    entry_quantity: quantity,
                    entry_unit: "CTN".to_string(),
                    reference_type: None,
                    reference_id: None,
                    transfer_id: None,
                    notes: None,
                },
            )
            .unwrap();
        batch.commit().unwrap();
    }

    #[test]
    fn thresholds_classify_positions() {
        let t = Thresholds { min: 5, max: 20 };
        assert_eq!(t.classify(0), StockLevel::OutOfStock);
        assert_eq!(t.classify(4), StockLevel::Low);
        assert_eq!(t.classify(5), StockLevel::Normal);
        assert_eq!(t.classify(20), StockLevel::Normal);
        assert_eq!(t.classify(21), StockLevel::Surplus);

        let unset = Thresholds { min: 0, max: 0 };
        assert_eq!(unset.classify(1_000), StockLevel::Normal);
    }

    #[test]
    fn distribution_is_ordered_by_warehouse_name() {
        let f = fixture();
        put(&f.store, StockKey::new(f.soap.id, f.south), 3);
        put(&f.store, StockKey::new(f.soap.id, f.north), 30);

        let rows = f.queries.get_distribution(f.soap.id).unwrap();
        let names: Vec<_> = rows.iter().map(|r| r.warehouse_name.as_deref()).collect();
        assert_eq!(names, vec![Some("North"), Some("South")]);
        assert_eq!(rows[0].status, StockLevel::Surplus);
        assert_eq!(rows[0].base_quantity, 360);
        assert_eq!(rows[1].status, StockLevel::Low);
    }

    #[test]
    fn record_thresholds_override_item_thresholds() {
        let f = fixture();
        let key = StockKey::new(f.soap.id, f.north);
        put(&f.store, key, 3);
        put(&f.store, StockKey::new(f.soap.id, f.south), 10);
        f.store
            .save_settings(
                &key,
                StockSettings {
                    min_quantity: Some(2),
                    max_quantity: None,
                    location_note: None,
                },
            )
            .unwrap();

        assert!(f.queries.get_low_stock().unwrap().is_empty());
        assert!(f.queries.get_surplus_stock().unwrap().is_empty());
    }

    #[test]
    fn low_stock_includes_items_never_stocked() {
        let f = fixture();
        let low = f.queries.get_low_stock().unwrap();
        assert_eq!(low.len(), 1);
        assert_eq!(low[0].item_id, f.soap.id);
        assert_eq!(low[0].status, StockLevel::OutOfStock);
    }

    #[test]
    fn valuation_uses_base_units_and_base_price() {
        let f = fixture();
        put(&f.store, StockKey::new(f.soap.id, f.north), 2);
        put(&f.store, StockKey::new(f.soap.id, f.south), 1);
        put(&f.store, StockKey::new(f.oil.id, f.north), 1);

        let soap = f.queries.get_stock_value(f.soap.id).unwrap();
        assert_eq!(soap.quantity, 3);
        assert_eq!(soap.base_quantity, 36);
        assert_eq!(soap.value, 36_000);
        assert_eq!(f.queries.total_stock_value().unwrap(), 36_000 + 180_000);
    }

    #[test]
    fn valuation_saturates_instead_of_overflowing() {
        let f = fixture();
        put(&f.store, StockKey::new(f.soap.id, f.north), i64::MAX);
        put(&f.store, StockKey::new(f.soap.id, f.south), 1);

        let soap = f.queries.get_stock_value(f.soap.id).unwrap();
        assert_eq!(soap.quantity, i64::MAX);
        assert_eq!(soap.value, u64::MAX);
        assert_eq!(f.queries.total_stock_value().unwrap(), u64::MAX);
    }

    #[test]
    fn warehouse_stock_lists_held_items_by_name() {
        let f = fixture();
        put(&f.store, StockKey::new(f.soap.id, f.north), 6);
        put(&f.store, StockKey::new(f.oil.id, f.north), 1);

        let rows = f.queries.warehouse_stock(f.north).unwrap();
        let names: Vec<_> = rows.iter().map(|r| r.item_name.as_str()).collect();
        assert_eq!(names, vec!["Oil", "Soap"]);
        assert!(f.queries.warehouse_stock(f.south).unwrap().is_empty());
        assert!(f.queries.warehouse_stock(WarehouseId::new()).is_err());
    }

    #[test]
    fn alerts_serialize_with_snake_case_status() {
        let f = fixture();
        let low = f.queries.get_low_stock().unwrap();
        let json = serde_json::to_value(&low[0]).unwrap();
        assert_eq!(json["status"], "out_of_stock");
        assert_eq!(json["item_name"], "Soap");
        assert!(json["warehouse_id"].is_null());
        assert_eq!(json["quantity"], 0);
    }
}
