//! Transfer persistence.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use stockbook_core::{Entity, StockError, StockResult, TransferId};
use stockbook_inventory::{StockTransfer, TransferStatus};

/// Storage for transfer documents and the transfer-number sequence.
pub trait TransferStore: Send + Sync {
    /// Fails if a transfer with the same id exists.
    fn insert(&self, transfer: StockTransfer) -> StockResult<()>;

    /// Replace a stored transfer. Fails with `NotFound` if it is missing.
    fn update(&self, transfer: StockTransfer) -> StockResult<()>;

    fn get(&self, id: TransferId) -> StockResult<Option<StockTransfer>>;

    /// Transfers in creation order, optionally restricted to one status.
    fn list(&self, status: Option<TransferStatus>) -> StockResult<Vec<StockTransfer>>;

    fn remove(&self, id: TransferId) -> StockResult<Option<StockTransfer>>;

    /// Mark a Validated transfer Committed under the next sequence number (starting at
    /// 1), formatted by `transfer_no`.
    ///
    /// The number is drawn and the status stored in one step: on failure neither
    /// happens, so sequence numbers are used only by Committed transfers.
    fn commit_transfer(
        &self,
        id: TransferId,
        transfer_no: &dyn Fn(u64) -> String,
        committed_at: DateTime<Utc>,
    ) -> StockResult<StockTransfer>;
}

impl<T> TransferStore for Arc<T>
where
    T: TransferStore + ?Sized,
{
    fn insert(&self, transfer: StockTransfer) -> StockResult<()> {
        (**self).insert(transfer)
    }

    fn update(&self, transfer: StockTransfer) -> StockResult<()> {
        (**self).update(transfer)
    }

    fn get(&self, id: TransferId) -> StockResult<Option<StockTransfer>> {
        (**self).get(id)
    }

    fn list(&self, status: Option<TransferStatus>) -> StockResult<Vec<StockTransfer>> {
        (**self).list(status)
    }

    fn remove(&self, id: TransferId) -> StockResult<Option<StockTransfer>> {
        (**self).remove(id)
    }

    fn commit_transfer(
        &self,
        id: TransferId,
        transfer_no: &dyn Fn(u64) -> String,
        committed_at: DateTime<Utc>,
    ) -> StockResult<StockTransfer> {
        (**self).commit_transfer(id, transfer_no, committed_at)
    }
}

#[derive(Debug, Default)]
struct TransferState {
    transfers: HashMap<TransferId, StockTransfer>,
    last_sequence: u64,
}

/// In-memory transfer store.
#[derive(Debug, Default)]
pub struct InMemoryTransferStore {
    state: RwLock<TransferState>,
}

fn poisoned() -> StockError {
    StockError::persistence("transfer store lock poisoned")
}

impl InMemoryTransferStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransferStore for InMemoryTransferStore {
    fn insert(&self, transfer: StockTransfer) -> StockResult<()> {
        let id = *transfer.id();
        let mut state = self.state.write().map_err(|_| poisoned())?;
        if state.transfers.contains_key(&id) {
            return Err(StockError::conflict(format!("transfer {id} already exists")));
        }
        state.transfers.insert(id, transfer);
        Ok(())
    }

    fn update(&self, transfer: StockTransfer) -> StockResult<()> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        match state.transfers.get_mut(&transfer.id) {
            Some(stored) => {
                *stored = transfer;
                Ok(())
            }
            None => Err(StockError::not_found(format!("transfer {}", transfer.id))),
        }
    }

    fn get(&self, id: TransferId) -> StockResult<Option<StockTransfer>> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state.transfers.get(&id).cloned())
    }

    fn list(&self, status: Option<TransferStatus>) -> StockResult<Vec<StockTransfer>> {
        let state = self.state.read().map_err(|_| poisoned())?;
        let mut transfers: Vec<StockTransfer> = state
            .transfers
            .values()
            .filter(|t| status.is_none_or(|s| t.status == s))
            .cloned()
            .collect();
        // v7 ids are time-ordered, so they break ties between equal timestamps.
        transfers.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(transfers)
    }

    fn remove(&self, id: TransferId) -> StockResult<Option<StockTransfer>> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        Ok(state.transfers.remove(&id))
    }

    fn commit_transfer(
        &self,
        id: TransferId,
        transfer_no: &dyn Fn(u64) -> String,
        committed_at: DateTime<Utc>,
    ) -> StockResult<StockTransfer> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        let sequence = state.last_sequence + 1;
        let stored = state
            .transfers
            .get_mut(&id)
            .ok_or_else(|| StockError::not_found(format!("transfer {id}")))?;
        stored.mark_committed(transfer_no(sequence), committed_at)?;
        let committed = stored.clone();
        state.last_sequence = sequence;
        Ok(committed)
    }
}
