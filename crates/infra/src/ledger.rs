//! Read side of the stock ledger: filtered history, reconciliation and integrity checks.

use std::sync::Arc;

use tracing::warn;

use stockbook_core::{ItemId, StockResult};
use stockbook_inventory::{LedgerFilter, StockKey, StockLedgerEntry, replay};

use crate::store::StockStore;

/// Entries of one history query, ordered by `(timestamp, id)`.
///
/// Holds a snapshot taken when the query ran; iterating it never touches the store, can
/// be done any number of times and does not see later commits.
#[derive(Debug, Clone)]
pub struct LedgerHistory {
    entries: Arc<Vec<StockLedgerEntry>>,
    filter: LedgerFilter,
}

impl LedgerHistory {
    fn new(mut entries: Vec<StockLedgerEntry>, filter: LedgerFilter) -> Self {
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        Self {
            entries: Arc::new(entries),
            filter,
        }
    }

    pub fn iter(&self) -> LedgerIter<'_> {
        LedgerIter {
            entries: self.entries.iter(),
            filter: &self.filter,
        }
    }

    /// Number of entries matching the filter (walks the snapshot).
    pub fn count(&self) -> usize {
        self.iter().count()
    }

    pub fn to_vec(&self) -> Vec<StockLedgerEntry> {
        self.iter().cloned().collect()
    }
}

impl<'a> IntoIterator for &'a LedgerHistory {
    type Item = &'a StockLedgerEntry;
    type IntoIter = LedgerIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Lazy filtered walk over a `LedgerHistory`.
#[derive(Debug, Clone)]
pub struct LedgerIter<'a> {
    entries: std::slice::Iter<'a, StockLedgerEntry>,
    filter: &'a LedgerFilter,
}

impl<'a> Iterator for LedgerIter<'a> {
    type Item = &'a StockLedgerEntry;

    fn next(&mut self) -> Option<Self::Item> {
        let filter = self.filter;
        self.entries.by_ref().find(|e| filter.matches(e))
    }
}

/// Result of comparing one position's record with its ledger.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Reconciliation {
    pub key: StockKey,
    pub record_quantity: i64,
    /// Quantity obtained by replaying the ledger; `None` if the chain is broken.
    pub ledger_quantity: Option<i64>,
    pub entry_count: usize,
}

impl Reconciliation {
    pub fn is_consistent(&self) -> bool {
        self.ledger_quantity == Some(self.record_quantity)
    }
}

/// Ledger read API over a `StockStore`.
pub struct StockLedger<S> {
    store: S,
}

impl<S: StockStore> StockLedger<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// History of one position, filtered.
    pub fn history(&self, key: &StockKey, filter: LedgerFilter) -> StockResult<LedgerHistory> {
        let snapshot = self.store.ledger_entries(key)?;
        Ok(LedgerHistory::new(snapshot.as_ref().clone(), filter))
    }

    /// History of an item across every position it has.
    pub fn history_for_item(&self, item_id: ItemId, filter: LedgerFilter) -> StockResult<LedgerHistory> {
        Ok(LedgerHistory::new(self.store.ledger_entries_for_item(item_id)?, filter))
    }

    /// Replay a position's ledger and return the quantity it adds up to.
    ///
    /// A broken before/after chain is an `InvariantViolation`.
    pub fn reconcile(&self, key: &StockKey) -> StockResult<i64> {
        let entries = self.store.ledger_entries(key)?;
        replay(entries.iter())
    }

    /// Compare a position's record with its replayed ledger.
    pub fn reconciliation(&self, key: &StockKey) -> StockResult<Reconciliation> {
        let entries = self.store.ledger_entries(key)?;
        let record_quantity = self.store.quantity(key)?;
        let ledger_quantity = match replay(entries.iter()) {
            Ok(quantity) => Some(quantity),
            Err(err) => {
                warn!(%key, error = %err, "stock ledger chain is broken");
                None
            }
        };
        Ok(Reconciliation {
            key: *key,
            record_quantity,
            ledger_quantity,
            entry_count: entries.len(),
        })
    }

    /// Reconcile every stored position and return the ones that disagree.
    pub fn verify_integrity(&self) -> StockResult<Vec<Reconciliation>> {
        let mut mismatches = Vec::new();
        for record in self.store.records()? {
            let reconciliation = self.reconciliation(&record.key())?;
            if !reconciliation.is_consistent() {
                warn!(
                    key = %reconciliation.key,
                    record = reconciliation.record_quantity,
                    ledger = ?reconciliation.ledger_quantity,
                    "stock record disagrees with its ledger"
                );
                mismatches.push(reconciliation);
            }
        }
        Ok(mismatches)
    }
}
