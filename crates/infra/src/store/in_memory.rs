use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;

use stockbook_core::{ItemId, StockError, StockResult, WarehouseId};
use stockbook_inventory::{StockKey, StockLedgerEntry, StockRecord, StockSettings};

use super::{LedgerSnapshot, StockCommit, StockStore, check_commit};

#[derive(Debug, Default)]
struct StockState {
    records: HashMap<StockKey, StockRecord>,
    /// Copy-on-write per position, so history readers keep a cheap snapshot.
    ledger: HashMap<StockKey, LedgerSnapshot>,
    last_entry_id: u64,
}

impl StockState {
    fn tail(&self, key: &StockKey) -> Option<i64> {
        self.ledger
            .get(key)
            .and_then(|entries| entries.last())
            .map(|e| e.quantity_after)
    }
}

/// In-memory stock store.
///
/// Records and ledger share one lock: a commit takes the write side once and applies
/// all of its records and entries before releasing it. Intended for tests/dev and for
/// embedding in a single process.
#[derive(Debug, Default)]
pub struct InMemoryStockStore {
    state: RwLock<StockState>,
}

fn poisoned() -> StockError {
    StockError::persistence("stock store lock poisoned")
}

impl InMemoryStockStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn sorted(mut records: Vec<StockRecord>) -> Vec<StockRecord> {
        records.sort_by_key(StockRecord::key);
        records
    }
}

impl StockStore for InMemoryStockStore {
    fn record(&self, key: &StockKey) -> StockResult<Option<StockRecord>> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state.records.get(key).cloned())
    }

    fn records_for_item(&self, item_id: ItemId) -> StockResult<Vec<StockRecord>> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(Self::sorted(
            state
                .records
                .values()
                .filter(|r| r.item_id == item_id)
                .cloned()
                .collect(),
        ))
    }

    fn records_for_warehouse(&self, warehouse_id: WarehouseId) -> StockResult<Vec<StockRecord>> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(Self::sorted(
            state
                .records
                .values()
                .filter(|r| r.warehouse_id == Some(warehouse_id))
                .cloned()
                .collect(),
        ))
    }

    fn records(&self) -> StockResult<Vec<StockRecord>> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(Self::sorted(state.records.values().cloned().collect()))
    }

    fn ledger_tail(&self, key: &StockKey) -> StockResult<Option<i64>> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state.tail(key))
    }

    fn ledger_entries(&self, key: &StockKey) -> StockResult<LedgerSnapshot> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state.ledger.get(key).cloned().unwrap_or_default())
    }

    fn ledger_entries_for_item(&self, item_id: ItemId) -> StockResult<Vec<StockLedgerEntry>> {
        let state = self.state.read().map_err(|_| poisoned())?;
        let mut entries: Vec<StockLedgerEntry> = state
            .ledger
            .iter()
            .filter(|(key, _)| key.item_id == item_id)
            .flat_map(|(_, entries)| entries.iter().cloned())
            .collect();
        entries.sort_by_key(|e| e.id);
        Ok(entries)
    }

    fn save_settings(&self, key: &StockKey, settings: StockSettings) -> StockResult<StockRecord> {
        settings.validate()?;
        let now = Utc::now();
        let mut state = self.state.write().map_err(|_| poisoned())?;
        let record = state
            .records
            .entry(*key)
            .or_insert_with(|| StockRecord::empty(*key, now));
        record.apply_settings(settings, now);
        Ok(record.clone())
    }

    fn commit(&self, changes: StockCommit) -> StockResult<Vec<StockLedgerEntry>> {
        if changes.is_empty() {
            return Ok(vec![]);
        }

        let mut state = self.state.write().map_err(|_| poisoned())?;
        check_commit(&changes, |key| Ok(state.tail(key).unwrap_or(0)))?;

        // Validated; from here on nothing can fail.
        let now = Utc::now();
        let mut committed = Vec::with_capacity(changes.entries.len());
        for entry in changes.entries {
            state.last_entry_id += 1;
            let stored = entry.into_entry(state.last_entry_id, now);
            Arc::make_mut(state.ledger.entry(stored.key()).or_default()).push(stored.clone());
            committed.push(stored);
        }

        for staged in changes.records {
            match state.records.get_mut(&staged.key()) {
                // Keep settings written since the batch loaded the record.
                Some(existing) => {
                    existing.quantity = staged.quantity;
                    existing.updated_at = now;
                }
                None => {
                    let mut record = staged;
                    record.updated_at = now;
                    state.records.insert(record.key(), record);
                }
            }
        }

        Ok(committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockbook_inventory::{NewLedgerEntry, TransactionType};

    fn entry(key: StockKey, before: i64, change: i64) -> NewLedgerEntry {
        NewLedgerEntry {
            item_id: key.item_id,
            warehouse_id: key.warehouse_id,
            transaction_type: TransactionType::Adjustment,
            quantity_before: before,
            quantity_change: change,
            quantity_after: before + change,
            entry_quantity: change,
            entry_unit: "CTN".to_string(),
            reference_type: None,
            reference_id: None,
            transfer_id: None,
            notes: None,
        }
    }

    fn record(key: StockKey, quantity: i64) -> StockRecord {
        let mut r = StockRecord::empty(key, Utc::now());
        r.quantity = quantity;
        r
    }

    #[test]
    fn commit_assigns_monotonic_ids_and_updates_records() {
        let store = InMemoryStockStore::new();
        let key = StockKey::new(ItemId::new(), WarehouseId::new());

        let first = store
            .commit(StockCommit {
                records: vec![record(key, 10)],
                entries: vec![entry(key, 0, 10)],
            })
            .unwrap();
        let second = store
            .commit(StockCommit {
                records: vec![record(key, 7)],
                entries: vec![entry(key, 10, -3)],
            })
            .unwrap();

        assert_eq!(first[0].id, 1);
        assert_eq!(second[0].id, 2);
        assert_eq!(store.quantity(&key).unwrap(), 7);
        assert_eq!(store.ledger_tail(&key).unwrap(), Some(7));
        assert_eq!(store.ledger_entries(&key).unwrap().len(), 2);
    }

    #[test]
    fn stale_quantity_before_is_rejected_without_side_effects() {
        let store = InMemoryStockStore::new();
        let key = StockKey::new(ItemId::new(), WarehouseId::new());
        store
            .commit(StockCommit {
                records: vec![record(key, 10)],
                entries: vec![entry(key, 0, 10)],
            })
            .unwrap();

        // A writer that read the position before the first commit.
        let err = store
            .commit(StockCommit {
                records: vec![record(key, 5)],
                entries: vec![entry(key, 0, 5)],
            })
            .unwrap_err();

        assert!(matches!(err, StockError::ConcurrencyConflict(_)));
        assert_eq!(store.quantity(&key).unwrap(), 10);
        assert_eq!(store.ledger_entries(&key).unwrap().len(), 1);
    }

    #[test]
    fn record_without_matching_entry_is_rejected() {
        let store = InMemoryStockStore::new();
        let key = StockKey::new(ItemId::new(), WarehouseId::new());
        let other = StockKey::new(ItemId::new(), WarehouseId::new());

        let err = store
            .commit(StockCommit {
                records: vec![record(key, 10), record(other, 3)],
                entries: vec![entry(key, 0, 10)],
            })
            .unwrap_err();

        assert!(matches!(err, StockError::InvariantViolation(_)));
        assert_eq!(store.record(&key).unwrap(), None);
    }

    #[test]
    fn settings_never_touch_quantity() {
        let store = InMemoryStockStore::new();
        let key = StockKey::new(ItemId::new(), WarehouseId::new());
        store
            .commit(StockCommit {
                records: vec![record(key, 4)],
                entries: vec![entry(key, 0, 4)],
            })
            .unwrap();

        let saved = store
            .save_settings(
                &key,
                StockSettings {
                    min_quantity: Some(2),
                    max_quantity: Some(20),
                    location_note: Some("Rack A1".to_string()),
                },
            )
            .unwrap();

        assert_eq!(saved.quantity, 4);
        assert_eq!(saved.location_note.as_deref(), Some("Rack A1"));
        assert_eq!(store.ledger_entries(&key).unwrap().len(), 1);
    }

    #[test]
    fn history_snapshot_is_unaffected_by_later_commits() {
        let store = InMemoryStockStore::new();
        let key = StockKey::item_level(ItemId::new());
        store
            .commit(StockCommit {
                records: vec![record(key, 1)],
                entries: vec![entry(key, 0, 1)],
            })
            .unwrap();

        let snapshot = store.ledger_entries(&key).unwrap();
        store
            .commit(StockCommit {
                records: vec![record(key, 2)],
                entries: vec![entry(key, 1, 1)],
            })
            .unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(store.ledger_entries(&key).unwrap().len(), 2);
    }
}
