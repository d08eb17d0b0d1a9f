//! Stock transfer between two warehouses (state machine only; no IO).

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use stockbook_core::{Entity, ItemId, StockError, TransferId, ValidationIssue, WarehouseId};

use crate::stock::StockKey;

/// Transfer lifecycle.
///
/// `Draft → Validated → Committed`, or `Validated → Rejected` when the commit fails.
/// Committed and Rejected are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Draft,
    Validated,
    Committed,
    Rejected,
}

impl TransferStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TransferStatus::Committed | TransferStatus::Rejected)
    }
}

/// One item moving between the two warehouses, in packaging units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLine {
    pub item_id: ItemId,
    pub quantity: i64,
}

impl TransferLine {
    pub fn new(item_id: ItemId, quantity: i64) -> Self {
        Self { item_id, quantity }
    }
}

/// Request: create a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTransfer {
    pub source_warehouse_id: WarehouseId,
    pub destination_warehouse_id: WarehouseId,
    pub transfer_date: NaiveDate,
    pub lines: Vec<TransferLine>,
    pub notes: Option<String>,
}

impl NewTransfer {
    /// Problems visible from the request alone: same warehouse twice, no lines,
    /// non-positive quantities (one issue per offending line).
    pub fn shape_issues(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        if self.source_warehouse_id == self.destination_warehouse_id {
            issues.push(ValidationIssue::request(
                "source and destination warehouse must differ",
            ));
        }
        if self.lines.is_empty() {
            issues.push(ValidationIssue::request("transfer must have at least one line"));
        }
        for (idx, line) in self.lines.iter().enumerate() {
            if line.quantity <= 0 {
                issues.push(ValidationIssue::line(
                    idx,
                    format!("quantity must be positive (got {})", line.quantity),
                ));
            }
        }
        if let Err(item_id) = item_totals(&self.lines) {
            issues.push(ValidationIssue::request(format!(
                "total quantity of item {item_id} is out of range"
            )));
        }
        issues
    }
}

/// Per-item sums of the lines, or the first item whose sum overflows.
fn item_totals(lines: &[TransferLine]) -> Result<BTreeMap<ItemId, i64>, ItemId> {
    let mut totals: BTreeMap<ItemId, i64> = BTreeMap::new();
    for line in lines {
        let total = totals.entry(line.item_id).or_insert(0);
        *total = total.checked_add(line.quantity).ok_or(line.item_id)?;
    }
    Ok(totals)
}

/// A stock transfer and its lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockTransfer {
    pub id: TransferId,
    /// Assigned on commit.
    pub transfer_no: Option<String>,
    pub source_warehouse_id: WarehouseId,
    pub destination_warehouse_id: WarehouseId,
    pub transfer_date: NaiveDate,
    pub status: TransferStatus,
    pub lines: Vec<TransferLine>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub committed_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
}

impl Entity for StockTransfer {
    type Id = TransferId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl StockTransfer {
    /// Draft from a request the caller has already validated.
    pub fn draft(id: TransferId, request: NewTransfer, now: DateTime<Utc>) -> Self {
        Self {
            id,
            transfer_no: None,
            source_warehouse_id: request.source_warehouse_id,
            destination_warehouse_id: request.destination_warehouse_id,
            transfer_date: request.transfer_date,
            status: TransferStatus::Draft,
            lines: request.lines,
            notes: request.notes,
            created_at: now,
            committed_at: None,
            rejection_reason: None,
        }
    }

    pub fn source_key(&self, item_id: ItemId) -> StockKey {
        StockKey::new(item_id, self.source_warehouse_id)
    }

    pub fn destination_key(&self, item_id: ItemId) -> StockKey {
        StockKey::new(item_id, self.destination_warehouse_id)
    }

    /// Total requested per item; repeated items are summed.
    pub fn requested_by_item(&self) -> Result<BTreeMap<ItemId, i64>, StockError> {
        item_totals(&self.lines).map_err(|item_id| {
            StockError::validation(format!("requested quantity of item {item_id} overflows"))
        })
    }

    /// Every stock position the transfer touches (source and destination per item),
    /// sorted in lock order and deduplicated.
    pub fn lock_keys(&self) -> Vec<StockKey> {
        let mut keys: Vec<StockKey> = self
            .lines
            .iter()
            .flat_map(|line| [self.source_key(line.item_id), self.destination_key(line.item_id)])
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }

    fn transition_error(&self, action: &str) -> StockError {
        StockError::invariant(format!(
            "cannot {action} transfer {} in status {:?}",
            self.id, self.status
        ))
    }

    /// Draft (or already Validated) → Validated.
    pub fn mark_validated(&mut self) -> Result<(), StockError> {
        match self.status {
            TransferStatus::Draft | TransferStatus::Validated => {
                self.status = TransferStatus::Validated;
                Ok(())
            }
            _ => Err(self.transition_error("validate")),
        }
    }

    /// Guard used before a commit starts applying lines.
    pub fn ensure_committable(&self) -> Result<(), StockError> {
        if self.status == TransferStatus::Validated {
            Ok(())
        } else {
            Err(self.transition_error("commit"))
        }
    }

    pub fn mark_committed(&mut self, transfer_no: String, now: DateTime<Utc>) -> Result<(), StockError> {
        self.ensure_committable()?;
        self.status = TransferStatus::Committed;
        self.transfer_no = Some(transfer_no);
        self.committed_at = Some(now);
        Ok(())
    }

    pub fn mark_rejected(&mut self, reason: impl Into<String>) -> Result<(), StockError> {
        if self.status != TransferStatus::Validated {
            return Err(self.transition_error("reject"));
        }
        self.status = TransferStatus::Rejected;
        self.rejection_reason = Some(reason.into());
        Ok(())
    }

    /// Only transfers that have not started committing can be dropped.
    pub fn is_abandonable(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// Human-readable sequential number, e.g. `TRF-00042`.
pub fn format_transfer_no(prefix: &str, width: usize, sequence: u64) -> String {
    format!("{prefix}-{sequence:0width$}")
}
