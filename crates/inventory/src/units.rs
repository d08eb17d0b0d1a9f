//! Packaging/base unit arithmetic.
//!
//! Stock is stored in packaging units (e.g. cartons). Each item declares how many
//! base units (e.g. pieces) one packaging unit holds. Catalog data is not always
//! complete, so a non-positive factor is read as 1 (no conversion).

use serde::{Deserialize, Serialize};

use stockbook_core::ValueObject;

/// Effective base units per packaging unit.
pub fn pack_size(per_packaging_quantity: i64) -> i64 {
    if per_packaging_quantity <= 0 {
        1
    } else {
        per_packaging_quantity
    }
}

/// Packaging units → base units.
pub fn to_base_units(packaging_quantity: i64, per_packaging_quantity: i64) -> i64 {
    packaging_quantity.saturating_mul(pack_size(per_packaging_quantity))
}

/// Base units → whole packaging units plus the base units left over.
///
/// The remainder is always in `0..pack_size`, so
/// `to_base_units(packages) + remainder` gives back the input for any sign.
pub fn to_packaging_units(base_quantity: i64, per_packaging_quantity: i64) -> PackagingQuantity {
    let size = pack_size(per_packaging_quantity);
    PackagingQuantity {
        packages: base_quantity.div_euclid(size),
        remainder: base_quantity.rem_euclid(size),
    }
}

/// Result of splitting a base quantity into packaging units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackagingQuantity {
    pub packages: i64,
    /// Base units that do not fill a whole package.
    pub remainder: i64,
}

impl PackagingQuantity {
    pub fn is_whole(&self) -> bool {
        self.remainder == 0
    }
}

impl ValueObject for PackagingQuantity {}

/// Unit a caller expressed a movement in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntryUnit {
    #[default]
    Packaging,
    Base,
}

/// Convert a caller-supplied quantity into packaging units.
///
/// Returns `None` when a base-unit quantity does not fill whole packages; stock is
/// only ever stored in whole packaging units.
pub fn packaging_delta(quantity: i64, unit: EntryUnit, per_packaging_quantity: i64) -> Option<i64> {
    match unit {
        EntryUnit::Packaging => Some(quantity),
        EntryUnit::Base => {
            let split = to_packaging_units(quantity, per_packaging_quantity);
            split.is_whole().then_some(split.packages)
        }
    }
}
