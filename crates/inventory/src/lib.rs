//! Stock domain module.
//!
//! Business rules for stock positions, the ledger, warehouses and transfers,
//! implemented as deterministic domain logic (no IO, no locking, no storage).

pub mod item;
pub mod ledger;
pub mod stock;
pub mod transfer;
pub mod units;
pub mod warehouse;

pub use item::Item;
pub use ledger::{Direction, LedgerFilter, NewLedgerEntry, StockLedgerEntry, TransactionType, replay};
pub use stock::{StockKey, StockRecord, StockSettings};
pub use transfer::{NewTransfer, StockTransfer, TransferLine, TransferStatus, format_transfer_no};
pub use units::{EntryUnit, PackagingQuantity, packaging_delta};
pub use warehouse::{NewWarehouse, Warehouse, WarehouseUpdate, normalize_code};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helpers_are_reachable_from_the_crate_root() {
        assert_eq!(packaging_delta(24, EntryUnit::Base, 12), Some(2));
        assert_eq!(format_transfer_no("TRF", 5, 7), "TRF-00007");
        assert_eq!(normalize_code("  wh-a "), "WH-A");
        assert_eq!(replay(std::iter::empty::<&StockLedgerEntry>()).unwrap(), 0);
    }
}
