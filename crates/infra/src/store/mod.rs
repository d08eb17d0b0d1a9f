//! Durable stock state: current records plus the append-only ledger.
//!
//! Records and ledger entries live behind one trait because they are only ever
//! written together: a `StockCommit` carries the new record quantities and the ledger
//! entries that explain them, and `commit` applies both atomically or not at all.
//! Readers see either the state before a commit or the state after it.

pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use std::collections::HashMap;
use std::sync::Arc;

pub use in_memory::InMemoryStockStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStockStore;

use stockbook_core::{ItemId, StockError, StockResult, TransferId, WarehouseId};
use stockbook_inventory::{NewLedgerEntry, StockKey, StockLedgerEntry, StockRecord, StockSettings};

/// Shared, immutable view of one position's ledger, in id order.
pub type LedgerSnapshot = Arc<Vec<StockLedgerEntry>>;

/// Staged changes produced by a `StockBatch`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StockCommit {
    /// Final state of every position the entries touch.
    pub records: Vec<StockRecord>,
    /// Entries in application order. Ids and timestamps are assigned by the store.
    pub entries: Vec<NewLedgerEntry>,
}

impl StockCommit {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Check a commit against the stored ledger tails before anything is written.
///
/// `stored_tail` returns the last persisted `quantity_after` for a position (0 when it
/// has no history). Shared by every backend so they reject the same commits.
pub(crate) fn check_commit(
    changes: &StockCommit,
    mut stored_tail: impl FnMut(&StockKey) -> StockResult<i64>,
) -> StockResult<()> {
    let mut tails: HashMap<StockKey, i64> = HashMap::new();

    for entry in &changes.entries {
        entry.check_arithmetic()?;
        let key = entry.key();
        let tail = match tails.get(&key) {
            Some(tail) => *tail,
            None => stored_tail(&key)?,
        };
        if entry.quantity_before != tail {
            return Err(StockError::conflict(format!(
                "ledger append for {key} expected quantity {tail} but entry starts at {}",
                entry.quantity_before
            )));
        }
        tails.insert(key, entry.quantity_after);
    }

    for record in &changes.records {
        let key = record.key();
        let Some(expected) = tails.get(&key) else {
            return Err(StockError::invariant(format!(
                "record for {key} changed without a ledger entry"
            )));
        };
        if record.quantity != *expected {
            return Err(StockError::invariant(format!(
                "record for {key} holds {} but its ledger ends at {expected}",
                record.quantity
            )));
        }
    }

    Ok(())
}

/// Stock record table + stock ledger.
///
/// `commit` must:
/// - check every entry's `quantity_before` against the last stored `quantity_after`
///   for its position (0 for a position with no history) and fail with
///   `ConcurrencyConflict` on mismatch
/// - check that each record's quantity equals the last staged `quantity_after`
/// - assign monotonically increasing entry ids
/// - persist everything atomically
pub trait StockStore: Send + Sync {
    fn record(&self, key: &StockKey) -> StockResult<Option<StockRecord>>;

    fn records_for_item(&self, item_id: ItemId) -> StockResult<Vec<StockRecord>>;

    fn records_for_warehouse(&self, warehouse_id: WarehouseId) -> StockResult<Vec<StockRecord>>;

    fn records(&self) -> StockResult<Vec<StockRecord>>;

    /// `quantity_after` of the position's latest ledger entry.
    fn ledger_tail(&self, key: &StockKey) -> StockResult<Option<i64>>;

    fn ledger_entries(&self, key: &StockKey) -> StockResult<LedgerSnapshot>;

    /// Entries for an item across all of its positions, in id order.
    fn ledger_entries_for_item(&self, item_id: ItemId) -> StockResult<Vec<StockLedgerEntry>>;

    /// Update min/max/location of a record, creating a zero-quantity record if needed.
    /// Never changes quantity.
    fn save_settings(&self, key: &StockKey, settings: StockSettings) -> StockResult<StockRecord>;

    fn commit(&self, changes: StockCommit) -> StockResult<Vec<StockLedgerEntry>>;

    /// Current quantity; 0 when the position has no record.
    fn quantity(&self, key: &StockKey) -> StockResult<i64> {
        Ok(self.record(key)?.map(|r| r.quantity).unwrap_or(0))
    }

    /// Whether the position's ledger holds an entry written by `transfer_id`.
    fn has_transfer_entries(&self, key: &StockKey, transfer_id: TransferId) -> StockResult<bool> {
        Ok(self
            .ledger_entries(key)?
            .iter()
            .rev()
            .any(|e| e.transfer_id == Some(transfer_id)))
    }
}

impl<S> StockStore for Arc<S>
where
    S: StockStore + ?Sized,
{
    fn record(&self, key: &StockKey) -> StockResult<Option<StockRecord>> {
        (**self).record(key)
    }

    fn records_for_item(&self, item_id: ItemId) -> StockResult<Vec<StockRecord>> {
        (**self).records_for_item(item_id)
    }

    fn records_for_warehouse(&self, warehouse_id: WarehouseId) -> StockResult<Vec<StockRecord>> {
        (**self).records_for_warehouse(warehouse_id)
    }

    fn records(&self) -> StockResult<Vec<StockRecord>> {
        (**self).records()
    }

    fn ledger_tail(&self, key: &StockKey) -> StockResult<Option<i64>> {
        (**self).ledger_tail(key)
    }

    fn ledger_entries(&self, key: &StockKey) -> StockResult<LedgerSnapshot> {
        (**self).ledger_entries(key)
    }

    fn ledger_entries_for_item(&self, item_id: ItemId) -> StockResult<Vec<StockLedgerEntry>> {
        (**self).ledger_entries_for_item(item_id)
    }

    fn save_settings(&self, key: &StockKey, settings: StockSettings) -> StockResult<StockRecord> {
        (**self).save_settings(key, settings)
    }

    fn commit(&self, changes: StockCommit) -> StockResult<Vec<StockLedgerEntry>> {
        (**self).commit(changes)
    }

    fn quantity(&self, key: &StockKey) -> StockResult<i64> {
        (**self).quantity(key)
    }

    fn has_transfer_entries(&self, key: &StockKey, transfer_id: TransferId) -> StockResult<bool> {
        (**self).has_transfer_entries(key, transfer_id)
    }
}
