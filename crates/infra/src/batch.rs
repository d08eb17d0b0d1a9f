//! Unit of work over a `StockStore`.
//!
//! A `StockBatch` stages quantity adjustments and the ledger entries that explain
//! them against a working copy of the touched records, then hands everything to
//! `StockStore::commit` in one step. Callers hold the positions' `KeyLocks` for the
//! whole life of the batch.

use std::collections::BTreeMap;

use chrono::Utc;
use tracing::debug;

use stockbook_core::{StockError, StockResult, TransferId};
use stockbook_inventory::{NewLedgerEntry, StockKey, StockLedgerEntry, StockRecord, TransactionType};

use crate::store::{StockCommit, StockStore};

/// Ledger fields that do not depend on the position's quantities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryDetails {
    pub transaction_type: TransactionType,
    pub entry_quantity: i64,
    pub entry_unit: String,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
    pub transfer_id: Option<TransferId>,
    pub notes: Option<String>,
}

impl EntryDetails {
    fn into_entry(self, key: StockKey, before: i64, change: i64, after: i64) -> NewLedgerEntry {
        NewLedgerEntry {
            item_id: key.item_id,
            warehouse_id: key.warehouse_id,
            transaction_type: self.transaction_type,
            quantity_before: before,
            quantity_change: change,
            quantity_after: after,
            entry_quantity: self.entry_quantity,
            entry_unit: self.entry_unit,
            reference_type: self.reference_type,
            reference_id: self.reference_id,
            transfer_id: self.transfer_id,
            notes: self.notes,
        }
    }
}

/// Position in a batch that `compensate_to` can return to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    adjustments: usize,
    entries: usize,
}

impl Checkpoint {
    /// The empty batch.
    pub const START: Checkpoint = Checkpoint {
        adjustments: 0,
        entries: 0,
    };
}

#[derive(Debug, Clone)]
struct Position {
    record: StockRecord,
    /// Stored ledger tail when the position was loaded.
    stored_tail: i64,
}

/// Staged stock changes for one critical section.
pub struct StockBatch<'a, S: StockStore + ?Sized> {
    store: &'a S,
    positions: BTreeMap<StockKey, Position>,
    adjustments: Vec<(StockKey, i64)>,
    entries: Vec<NewLedgerEntry>,
}

impl<'a, S: StockStore + ?Sized> StockBatch<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            positions: BTreeMap::new(),
            adjustments: Vec::new(),
            entries: Vec::new(),
        }
    }

    fn position(&mut self, key: StockKey) -> StockResult<&mut Position> {
        if !self.positions.contains_key(&key) {
            let record = self
                .store
                .record(&key)?
                .unwrap_or_else(|| StockRecord::empty(key, Utc::now()));
            let stored_tail = self.store.ledger_tail(&key)?.unwrap_or(0);
            self.positions.insert(key, Position { record, stored_tail });
        }
        self.positions
            .get_mut(&key)
            .ok_or_else(|| StockError::invariant(format!("position {key} vanished from batch")))
    }

    /// Last `quantity_after` for `key`, counting staged entries.
    fn tail(&self, key: &StockKey) -> Option<i64> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.key() == *key)
            .map(|e| e.quantity_after)
            .or_else(|| self.positions.get(key).map(|p| p.stored_tail))
    }

    /// Staged quantity of a position (stored quantity if untouched).
    pub fn quantity(&mut self, key: StockKey) -> StockResult<i64> {
        Ok(self.position(key)?.record.quantity)
    }

    /// Add `delta` to the position, refusing to go below zero.
    pub fn adjust_quantity(&mut self, key: StockKey, delta: i64) -> StockResult<i64> {
        let position = self.position(key)?;
        let next = position.record.checked_adjust(delta)?;
        position.record.quantity = next;
        self.adjustments.push((key, delta));
        Ok(next)
    }

    /// Stage a ledger entry. It must start where the position's history ends.
    pub fn append(&mut self, entry: NewLedgerEntry) -> StockResult<()> {
        entry.check_arithmetic()?;
        let key = entry.key();
        self.position(key)?;
        let tail = self.tail(&key).unwrap_or(0);
        if entry.quantity_before != tail {
            return Err(StockError::conflict(format!(
                "ledger for {key} ends at {tail} but entry starts at {}",
                entry.quantity_before
            )));
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Adjust a position and append the entry explaining it, as one step.
    pub fn record_movement(&mut self, key: StockKey, delta: i64, details: EntryDetails) -> StockResult<&NewLedgerEntry> {
        let checkpoint = self.checkpoint();
        let before = self.quantity(key)?;
        let after = self.adjust_quantity(key, delta)?;
        if let Err(err) = self.append(details.into_entry(key, before, delta, after)) {
            self.compensate_to(checkpoint);
            return Err(err);
        }
        self.entries
            .last()
            .ok_or_else(|| StockError::invariant("staged entry missing"))
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            adjustments: self.adjustments.len(),
            entries: self.entries.len(),
        }
    }

    /// Undo everything staged after `checkpoint` by applying the opposite adjustments in
    /// reverse order and dropping the entries they produced.
    pub fn compensate_to(&mut self, checkpoint: Checkpoint) {
        while self.adjustments.len() > checkpoint.adjustments {
            let Some((key, delta)) = self.adjustments.pop() else {
                break;
            };
            if let Some(position) = self.positions.get_mut(&key) {
                position.record.quantity -= delta;
                debug!(%key, compensated = -delta, "compensating staged stock adjustment");
            }
        }
        self.entries.truncate(checkpoint.entries);
    }

    pub fn entries(&self) -> &[NewLedgerEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Persist the staged records and entries atomically.
    pub fn commit(self) -> StockResult<Vec<StockLedgerEntry>> {
        let touched: std::collections::BTreeSet<StockKey> = self.entries.iter().map(NewLedgerEntry::key).collect();
        let records = self
            .positions
            .into_iter()
            .filter(|(key, _)| touched.contains(key))
            .map(|(_, position)| position.record)
            .collect();
        self.store.commit(StockCommit {
            records,
            entries: self.entries,
        })
    }
}
