//! Stock ledger entries: the immutable audit trail of every quantity change.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockbook_core::{ItemId, StockError, TransferId, WarehouseId};

use crate::stock::StockKey;

/// Why a quantity changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    In,
    Out,
    Sale,
    Purchase,
    Adjustment,
    Return,
    TransferIn,
    TransferOut,
    Opening,
    Correction,
}

/// Sign a transaction type imposes on its quantity change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Increase,
    Decrease,
    Either,
}

impl TransactionType {
    pub const ALL: [TransactionType; 10] = [
        TransactionType::In,
        TransactionType::Out,
        TransactionType::Sale,
        TransactionType::Purchase,
        TransactionType::Adjustment,
        TransactionType::Return,
        TransactionType::TransferIn,
        TransactionType::TransferOut,
        TransactionType::Opening,
        TransactionType::Correction,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TransactionType::In => "IN",
            TransactionType::Out => "OUT",
            TransactionType::Sale => "SALE",
            TransactionType::Purchase => "PURCHASE",
            TransactionType::Adjustment => "ADJUSTMENT",
            TransactionType::Return => "RETURN",
            TransactionType::TransferIn => "TRANSFER_IN",
            TransactionType::TransferOut => "TRANSFER_OUT",
            TransactionType::Opening => "OPENING",
            TransactionType::Correction => "CORRECTION",
        }
    }

    pub fn direction(self) -> Direction {
        match self {
            TransactionType::In
            | TransactionType::Purchase
            | TransactionType::Return
            | TransactionType::TransferIn
            | TransactionType::Opening => Direction::Increase,
            TransactionType::Out | TransactionType::Sale | TransactionType::TransferOut => {
                Direction::Decrease
            }
            TransactionType::Adjustment | TransactionType::Correction => Direction::Either,
        }
    }

    /// Transfer legs are written only by the transfer engine.
    pub fn is_transfer(self) -> bool {
        matches!(self, TransactionType::TransferIn | TransactionType::TransferOut)
    }

    /// Whether a (non-zero) `delta` has the sign this type requires.
    pub fn accepts(self, delta: i64) -> bool {
        match self.direction() {
            Direction::Increase => delta > 0,
            Direction::Decrease => delta < 0,
            Direction::Either => delta != 0,
        }
    }
}

impl core::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = StockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| StockError::validation(format!("unknown transaction type '{s}'")))
    }
}

/// Ledger entry before the ledger assigns it an id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLedgerEntry {
    pub item_id: ItemId,
    pub warehouse_id: Option<WarehouseId>,
    pub transaction_type: TransactionType,
    pub quantity_before: i64,
    pub quantity_change: i64,
    pub quantity_after: i64,
    /// Quantity as the caller entered it (may be in base units).
    pub entry_quantity: i64,
    pub entry_unit: String,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
    pub transfer_id: Option<TransferId>,
    pub notes: Option<String>,
}

impl NewLedgerEntry {
    pub fn key(&self) -> StockKey {
        StockKey {
            item_id: self.item_id,
            warehouse_id: self.warehouse_id,
        }
    }

    /// before + change == after, and after is never negative.
    pub fn check_arithmetic(&self) -> Result<(), StockError> {
        if self.quantity_before.checked_add(self.quantity_change) != Some(self.quantity_after) {
            return Err(StockError::invariant(format!(
                "ledger entry for {} does not add up ({} + {} != {})",
                self.key(),
                self.quantity_before,
                self.quantity_change,
                self.quantity_after
            )));
        }
        if self.quantity_after < 0 {
            return Err(StockError::invariant(format!(
                "ledger entry for {} would leave negative stock",
                self.key()
            )));
        }
        Ok(())
    }

    pub fn into_entry(self, id: u64, timestamp: DateTime<Utc>) -> StockLedgerEntry {
        StockLedgerEntry {
            id,
            item_id: self.item_id,
            warehouse_id: self.warehouse_id,
            transaction_type: self.transaction_type,
            quantity_before: self.quantity_before,
            quantity_change: self.quantity_change,
            quantity_after: self.quantity_after,
            entry_quantity: self.entry_quantity,
            entry_unit: self.entry_unit,
            reference_type: self.reference_type,
            reference_id: self.reference_id,
            transfer_id: self.transfer_id,
            timestamp,
            notes: self.notes,
        }
    }
}

/// Immutable record of one quantity change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLedgerEntry {
    /// Monotonic across the whole ledger.
    pub id: u64,
    pub item_id: ItemId,
    pub warehouse_id: Option<WarehouseId>,
    pub transaction_type: TransactionType,
    pub quantity_before: i64,
    pub quantity_change: i64,
    pub quantity_after: i64,
    pub entry_quantity: i64,
    pub entry_unit: String,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
    pub transfer_id: Option<TransferId>,
    pub timestamp: DateTime<Utc>,
    pub notes: Option<String>,
}

impl StockLedgerEntry {
    pub fn key(&self) -> StockKey {
        StockKey {
            item_id: self.item_id,
            warehouse_id: self.warehouse_id,
        }
    }
}

/// History filter. Empty/`None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerFilter {
    pub transaction_types: Vec<TransactionType>,
    /// Inclusive lower bound.
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound.
    pub to: Option<DateTime<Utc>>,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
    pub transfer_id: Option<TransferId>,
}

impl LedgerFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn of_type(mut self, transaction_type: TransactionType) -> Self {
        self.transaction_types.push(transaction_type);
        self
    }

    pub fn between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn referencing(mut self, reference_type: impl Into<String>, reference_id: impl Into<String>) -> Self {
        self.reference_type = Some(reference_type.into());
        self.reference_id = Some(reference_id.into());
        self
    }

    pub fn for_transfer(mut self, transfer_id: TransferId) -> Self {
        self.transfer_id = Some(transfer_id);
        self
    }

    pub fn matches(&self, entry: &StockLedgerEntry) -> bool {
        if !self.transaction_types.is_empty() && !self.transaction_types.contains(&entry.transaction_type) {
            return false;
        }
        if self.from.is_some_and(|from| entry.timestamp < from) {
            return false;
        }
        if self.to.is_some_and(|to| entry.timestamp >= to) {
            return false;
        }
        if self.reference_type.is_some() && self.reference_type != entry.reference_type {
            return false;
        }
        if self.reference_id.is_some() && self.reference_id != entry.reference_id {
            return false;
        }
        if self.transfer_id.is_some() && self.transfer_id != entry.transfer_id {
            return false;
        }
        true
    }
}

/// Replay one position's entries (in id order) and return the resulting quantity.
///
/// Fails if an entry does not add up or does not start where the previous one ended.
pub fn replay<'a>(entries: impl IntoIterator<Item = &'a StockLedgerEntry>) -> Result<i64, StockError> {
    let mut quantity = 0i64;
    for entry in entries {
        if entry.quantity_before != quantity {
            return Err(StockError::invariant(format!(
                "ledger chain broken at entry {} for {}: expected before {}, found {}",
                entry.id,
                entry.key(),
                quantity,
                entry.quantity_before
            )));
        }
        if entry.quantity_before.checked_add(entry.quantity_change) != Some(entry.quantity_after) {
            return Err(StockError::invariant(format!(
                "ledger entry {} does not add up",
                entry.id
            )));
        }
        quantity = entry.quantity_after;
    }
    Ok(quantity)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u64, before: i64, change: i64) -> StockLedgerEntry {
        NewLedgerEntry {
            item_id: ItemId::new(),
            warehouse_id: None,
            transaction_type: if change >= 0 {
                TransactionType::In
            } else {
                TransactionType::Out
            },
            quantity_before: before,
            quantity_change: change,
            quantity_after: before + change,
            entry_quantity: change.abs(),
            entry_unit: "CTN".to_string(),
            reference_type: None,
            reference_id: None,
            transfer_id: None,
            notes: None,
        }
        .into_entry(id, Utc::now())
    }

    #[test]
    fn transaction_types_use_screaming_snake_case() {
        let json = serde_json::to_string(&TransactionType::TransferOut).unwrap();
        assert_eq!(json, "\"TRANSFER_OUT\"");
        for t in TransactionType::ALL {
            assert_eq!(t.as_str().parse::<TransactionType>().unwrap(), t);
            let back: TransactionType = serde_json::from_str(&format!("\"{t}\"")).unwrap();
            assert_eq!(back, t);
        }
        assert!("SHRINKAGE".parse::<TransactionType>().is_err());
    }

    #[test]
    fn direction_rules() {
        assert!(TransactionType::Sale.accepts(-1));
        assert!(!TransactionType::Sale.accepts(1));
        assert!(TransactionType::Purchase.accepts(5));
        assert!(!TransactionType::Opening.accepts(-5));
        assert!(TransactionType::Correction.accepts(-2));
        assert!(TransactionType::Adjustment.accepts(2));
        assert!(!TransactionType::Adjustment.accepts(0));
    }

    #[test]
    fn replay_follows_the_chain() {
        let entries = vec![entry(1, 0, 50), entry(2, 50, -10), entry(3, 40, 5)];
        assert_eq!(replay(&entries).unwrap(), 45);
    }

    #[test]
    fn replay_detects_gaps() {
        let entries = vec![entry(1, 0, 50), entry(2, 45, -10)];
        assert!(matches!(
            replay(&entries),
            Err(StockError::InvariantViolation(_))
        ));
    }

    #[test]
    fn filter_matches_reference_and_window() {
        let mut e = entry(1, 0, 5);
        e.reference_type = Some("invoice".to_string());
        e.reference_id = Some("INV-7".to_string());

        assert!(LedgerFilter::all().matches(&e));
        assert!(LedgerFilter::all().referencing("invoice", "INV-7").matches(&e));
        assert!(!LedgerFilter::all().referencing("invoice", "INV-8").matches(&e));
        assert!(LedgerFilter::all().of_type(TransactionType::In).matches(&e));
        assert!(!LedgerFilter::all().of_type(TransactionType::Sale).matches(&e));

        let later = e.timestamp + chrono::Duration::seconds(10);
        assert!(!LedgerFilter::all().between(later, later + chrono::Duration::seconds(1)).matches(&e));
        assert!(LedgerFilter::all().between(e.timestamp, later).matches(&e));
    }

    #[test]
    fn arithmetic_check_rejects_negative_after() {
        let bad = NewLedgerEntry {
            item_id: ItemId::new(),
            warehouse_id: None,
            transaction_type: TransactionType::Out,
            quantity_before: 2,
            quantity_change: -3,
            quantity_after: -1,
            entry_quantity: 3,
            entry_unit: "CTN".to_string(),
            reference_type: None,
            reference_id: None,
            transfer_id: None,
            notes: None,
        };
        assert!(bad.check_arithmetic().is_err());
    }
}
