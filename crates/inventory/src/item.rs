use serde::{Deserialize, Serialize};

use stockbook_core::ItemId;

use crate::units::{self, EntryUnit, PackagingQuantity};

/// Catalog view of an item: the conversion factors and thresholds the stock core reads.
///
/// The catalog module owns items; this core never writes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub name: String,
    /// Base unit code, e.g. "PCS".
    pub base_unit: String,
    /// Packaging unit code, e.g. "CTN".
    pub packaging_unit: String,
    /// Base units per packaging unit.
    pub per_packaging_quantity: i64,
    /// Reorder threshold in packaging units (0 = unset).
    pub min_stock: i64,
    /// Overstock threshold in packaging units (0 = unset).
    pub max_stock: i64,
    /// Purchase price per base unit in smallest currency unit (e.g. paise).
    pub purchase_price_per_base_unit: u64,
}

impl Item {
    pub fn new(
        id: ItemId,
        name: impl Into<String>,
        base_unit: impl Into<String>,
        packaging_unit: impl Into<String>,
        per_packaging_quantity: i64,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            base_unit: base_unit.into(),
            packaging_unit: packaging_unit.into(),
            per_packaging_quantity,
            min_stock: 0,
            max_stock: 0,
            purchase_price_per_base_unit: 0,
        }
    }

    pub fn with_stock_limits(mut self, min_stock: i64, max_stock: i64) -> Self {
        self.min_stock = min_stock;
        self.max_stock = max_stock;
        self
    }

    pub fn with_purchase_price(mut self, price_per_base_unit: u64) -> Self {
        self.purchase_price_per_base_unit = price_per_base_unit;
        self
    }

    pub fn pack_size(&self) -> i64 {
        units::pack_size(self.per_packaging_quantity)
    }

    pub fn to_base_units(&self, packaging_quantity: i64) -> i64 {
        units::to_base_units(packaging_quantity, self.per_packaging_quantity)
    }

    pub fn to_packaging_units(&self, base_quantity: i64) -> PackagingQuantity {
        units::to_packaging_units(base_quantity, self.per_packaging_quantity)
    }

    /// Unit code shown in the audit trail for a quantity entered in `unit`.
    pub fn unit_code(&self, unit: EntryUnit) -> &str {
        match unit {
            EntryUnit::Packaging => &self.packaging_unit,
            EntryUnit::Base => &self.base_unit,
        }
    }

    /// Value of `packaging_quantity` at purchase price.
    ///
    /// Always packages × base units per package × price per base unit.
    pub fn stock_value(&self, packaging_quantity: i64) -> u64 {
        let base = self.to_base_units(packaging_quantity.max(0));
        (base as u64).saturating_mul(self.purchase_price_per_base_unit)
    }
}
