use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockbook_core::{ItemId, Shortfall, StockError, ValidationIssue, WarehouseId};

/// Stock position: one item in one warehouse.
///
/// `warehouse_id == None` is the item-level position used when stock is not tracked
/// per warehouse. The derived ordering (item, then warehouse) is the global lock order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StockKey {
    pub item_id: ItemId,
    pub warehouse_id: Option<WarehouseId>,
}

impl StockKey {
    pub fn new(item_id: ItemId, warehouse_id: WarehouseId) -> Self {
        Self {
            item_id,
            warehouse_id: Some(warehouse_id),
        }
    }

    pub fn item_level(item_id: ItemId) -> Self {
        Self {
            item_id,
            warehouse_id: None,
        }
    }
}

impl core::fmt::Display for StockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.warehouse_id {
            Some(wh) => write!(f, "{}@{}", self.item_id, wh),
            None => write!(f, "{}@item", self.item_id),
        }
    }
}

/// Current quantity of one stock position, in packaging units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRecord {
    pub item_id: ItemId,
    pub warehouse_id: Option<WarehouseId>,
    /// Never negative.
    pub quantity: i64,
    /// Overrides the item's `min_stock` when set.
    pub min_quantity: Option<i64>,
    /// Overrides the item's `max_stock` when set.
    pub max_quantity: Option<i64>,
    pub location_note: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl StockRecord {
    /// A zero-quantity record, as created lazily on first movement.
    pub fn empty(key: StockKey, now: DateTime<Utc>) -> Self {
        Self {
            item_id: key.item_id,
            warehouse_id: key.warehouse_id,
            quantity: 0,
            min_quantity: None,
            max_quantity: None,
            location_note: None,
            updated_at: now,
        }
    }

    pub fn key(&self) -> StockKey {
        StockKey {
            item_id: self.item_id,
            warehouse_id: self.warehouse_id,
        }
    }

    /// Quantity after applying `delta`, or the shortfall that forbids it.
    pub fn checked_adjust(&self, delta: i64) -> Result<i64, StockError> {
        let next = self
            .quantity
            .checked_add(delta)
            .ok_or_else(|| StockError::validation("quantity overflow"))?;
        if next < 0 {
            let requested = delta
                .checked_neg()
                .ok_or_else(|| StockError::validation("quantity overflow"))?;
            return Err(StockError::insufficient(Shortfall {
                item_id: self.item_id,
                warehouse_id: self.warehouse_id,
                requested,
                available: self.quantity,
            }));
        }
        Ok(next)
    }

    pub fn apply_settings(&mut self, settings: StockSettings, now: DateTime<Utc>) {
        self.min_quantity = settings.min_quantity;
        self.max_quantity = settings.max_quantity;
        self.location_note = settings.location_note;
        self.updated_at = now;
    }
}

/// Non-quantity fields of a stock record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockSettings {
    pub min_quantity: Option<i64>,
    pub max_quantity: Option<i64>,
    pub location_note: Option<String>,
}

impl StockSettings {
    pub fn validate(&self) -> Result<(), StockError> {
        let mut issues = Vec::new();
        if self.min_quantity.is_some_and(|q| q < 0) {
            issues.push(ValidationIssue::request("min quantity cannot be negative"));
        }
        if self.max_quantity.is_some_and(|q| q < 0) {
            issues.push(ValidationIssue::request("max quantity cannot be negative"));
        }
        if let (Some(min), Some(max)) = (self.min_quantity, self.max_quantity) {
            if max > 0 && min > max {
                issues.push(ValidationIssue::request("min quantity cannot exceed max quantity"));
            }
        }
        if issues.is_empty() {
            Ok(())
        } else {
            Err(StockError::Validation(issues))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_order_by_item_then_warehouse() {
        let item = ItemId::new();
        let wh_a = WarehouseId::new();
        let wh_b = WarehouseId::new();
        let other_item = ItemId::new();

        let mut keys = vec![
            StockKey::new(other_item, wh_a),
            StockKey::new(item, wh_b),
            StockKey::item_level(item),
            StockKey::new(item, wh_a),
        ];
        keys.sort();

        assert_eq!(
            keys,
            vec![
                StockKey::item_level(item),
                StockKey::new(item, wh_a),
                StockKey::new(item, wh_b),
                StockKey::new(other_item, wh_a),
            ]
        );
    }

    #[test]
    fn adjust_below_zero_reports_shortfall() {
        let key = StockKey::new(ItemId::new(), WarehouseId::new());
        let mut record = StockRecord::empty(key, Utc::now());
        record.quantity = 3;

        assert_eq!(record.checked_adjust(-3).unwrap(), 0);
        match record.checked_adjust(-4).unwrap_err() {
            StockError::InsufficientStock(shortfalls) => {
                assert_eq!(shortfalls.len(), 1);
                assert_eq!(shortfalls[0].requested, 4);
                assert_eq!(shortfalls[0].available, 3);
            }
            other => panic!("expected insufficient stock, got {other:?}"),
        }
    }

    #[test]
    fn adjust_with_extreme_deltas_fails_without_panicking() {
        let key = StockKey::new(ItemId::new(), WarehouseId::new());
        let mut record = StockRecord::empty(key, Utc::now());
        assert!(matches!(record.checked_adjust(i64::MIN), Err(StockError::Validation(_))));

        record.quantity = 1;
        assert!(matches!(record.checked_adjust(i64::MAX), Err(StockError::Validation(_))));
    }

    #[test]
    fn settings_reject_inverted_limits() {
        let settings = StockSettings {
            min_quantity: Some(10),
            max_quantity: Some(5),
            location_note: None,
        };
        assert!(settings.validate().is_err());

        let unset_max = StockSettings {
            min_quantity: Some(10),
            max_quantity: Some(0),
            location_note: Some("Rack B2".to_string()),
        };
        assert!(unset_max.validate().is_ok());
    }
}
