//! Multi-line stock transfers between two warehouses.
//!
//! Validation and commit run with every `(item, source)` and `(item, destination)`
//! position locked. A commit stages all lines in one `StockBatch`; if a line fails, the
//! lines already applied are compensated, the transfer is marked Rejected and nothing
//! reaches the store.

#[cfg(feature = "postgres")]
mod postgres;
mod store;

#[cfg(feature = "postgres")]
pub use postgres::PostgresTransferStore;
pub use store::{InMemoryTransferStore, TransferStore};

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};

use stockbook_core::{Shortfall, StockError, StockResult, TransferId, ValidationIssue};
use stockbook_inventory::{
    NewTransfer, StockLedgerEntry, StockTransfer, TransactionType, TransferStatus, format_transfer_no,
};

use crate::batch::{Checkpoint, EntryDetails, StockBatch};
use crate::catalog::ItemCatalog;
use crate::config::StockBookConfig;
use crate::locks::KeyLocks;
use crate::registry::WarehouseRegistry;
use crate::store::StockStore;

/// `reference_type` on transfer ledger entries.
pub const TRANSFER_REFERENCE: &str = "STOCK_TRANSFER";

/// Runs the transfer lifecycle against a stock store and a transfer store.
pub struct TransferEngine<S, C, T> {
    store: S,
    catalog: C,
    transfers: T,
    locks: Arc<KeyLocks>,
    registry: Arc<WarehouseRegistry>,
    config: StockBookConfig,
}

impl<S, C, T> TransferEngine<S, C, T>
where
    S: StockStore,
    C: ItemCatalog,
    T: TransferStore,
{
    pub fn new(
        store: S,
        catalog: C,
        transfers: T,
        locks: Arc<KeyLocks>,
        registry: Arc<WarehouseRegistry>,
        config: StockBookConfig,
    ) -> Self {
        Self {
            store,
            catalog,
            transfers,
            locks,
            registry,
            config,
        }
    }

    fn load(&self, id: TransferId) -> StockResult<StockTransfer> {
        self.transfers
            .get(id)?
            .ok_or_else(|| StockError::not_found(format!("transfer {id}")))
    }

    /// Check a request and store it as a Draft.
    ///
    /// Every problem found is reported in one `Validation` error.
    #[instrument(skip(self, request), fields(
        source = %request.source_warehouse_id,
        destination = %request.destination_warehouse_id,
        lines = request.lines.len()
    ))]
    pub fn create_transfer(&self, request: NewTransfer) -> StockResult<StockTransfer> {
        let mut issues = request.shape_issues();

        for (role, id) in [
            ("source", request.source_warehouse_id),
            ("destination", request.destination_warehouse_id),
        ] {
            match self.registry.get(id) {
                Ok(warehouse) if !warehouse.is_active => issues.push(ValidationIssue::request(format!(
                    "{role} warehouse {} is inactive",
                    warehouse.code
                ))),
                Ok(_) => {}
                Err(StockError::NotFound(_)) => {
                    issues.push(ValidationIssue::request(format!("{role} warehouse {id} does not exist")))
                }
                Err(err) => return Err(err),
            }
        }

        for (idx, line) in request.lines.iter().enumerate() {
            if self.catalog.item(line.item_id)?.is_none() {
                issues.push(ValidationIssue::line(idx, format!("item {} does not exist", line.item_id)));
            }
        }

        if !issues.is_empty() {
            return Err(StockError::Validation(issues));
        }

        let transfer = StockTransfer::draft(TransferId::new(), request, Utc::now());
        self.transfers.insert(transfer.clone())?;
        info!(transfer_id = %transfer.id, "transfer drafted");
        Ok(transfer)
    }

    /// Every item whose summed request exceeds the source quantity.
    fn shortfalls(&self, transfer: &StockTransfer) -> StockResult<Vec<Shortfall>> {
        let mut shortfalls = Vec::new();
        for (item_id, requested) in transfer.requested_by_item()? {
            let available = self.store.quantity(&transfer.source_key(item_id))?;
            if requested > available {
                shortfalls.push(Shortfall {
                    item_id,
                    warehouse_id: Some(transfer.source_warehouse_id),
                    requested,
                    available,
                });
            }
        }
        Ok(shortfalls)
    }

    /// Check stock under the transfer's locks and move a Draft to Validated.
    ///
    /// On a shortfall the transfer keeps its status and the error lists every item
    /// that is short.
    #[instrument(skip(self))]
    pub fn validate(&self, id: TransferId) -> StockResult<StockTransfer> {
        let keys = self.load(id)?.lock_keys();
        let _locks = self.locks.acquire(keys)?;

        let mut transfer = self.load(id)?;
        if transfer.status.is_terminal() {
            return Err(StockError::invariant(format!(
                "cannot validate transfer {id} in status {:?}",
                transfer.status
            )));
        }
        let _active = self
            .registry
            .guard_active(&[transfer.source_warehouse_id, transfer.destination_warehouse_id])?;

        let shortfalls = self.shortfalls(&transfer)?;
        if !shortfalls.is_empty() {
            warn!(transfer_id = %id, short_items = shortfalls.len(), "transfer validation failed");
            return Err(StockError::InsufficientStock(shortfalls));
        }

        transfer.mark_validated()?;
        self.transfers.update(transfer.clone())?;
        info!(transfer_id = %id, "transfer validated");
        Ok(transfer)
    }

    /// Stage both legs of every line; undo the staged lines on the first failure.
    fn apply_lines(&self, transfer: &StockTransfer) -> StockResult<Vec<StockLedgerEntry>> {
        let shortfalls = self.shortfalls(transfer)?;
        if !shortfalls.is_empty() {
            return Err(StockError::InsufficientStock(shortfalls));
        }

        let mut batch = StockBatch::new(&self.store);
        for (idx, line) in transfer.lines.iter().enumerate() {
            if let Err(err) = self.apply_line(&mut batch, transfer, idx) {
                warn!(
                    transfer_id = %transfer.id,
                    failed_line = idx + 1,
                    applied_lines = idx,
                    item_id = %line.item_id,
                    "transfer line failed; compensating applied lines"
                );
                batch.compensate_to(Checkpoint::START);
                return Err(err);
            }
        }
        batch.commit()
    }

    fn apply_line(&self, batch: &mut StockBatch<'_, S>, transfer: &StockTransfer, idx: usize) -> StockResult<()> {
        let line = transfer.lines[idx];
        let item = self.catalog.require_item(line.item_id)?;
        let details = |transaction_type| EntryDetails {
            transaction_type,
            entry_quantity: line.quantity,
            entry_unit: item.packaging_unit.clone(),
            reference_type: Some(TRANSFER_REFERENCE.to_string()),
            reference_id: Some(transfer.id.to_string()),
            transfer_id: Some(transfer.id),
            notes: transfer.notes.clone(),
        };

        let checkpoint = batch.checkpoint();
        batch.record_movement(
            transfer.source_key(line.item_id),
            -line.quantity,
            details(TransactionType::TransferOut),
        )?;
        if let Err(err) = batch.record_movement(
            transfer.destination_key(line.item_id),
            line.quantity,
            details(TransactionType::TransferIn),
        ) {
            batch.compensate_to(checkpoint);
            return Err(err);
        }
        Ok(())
    }

    /// Whether the transfer's ledger entries are already in the store.
    ///
    /// A transfer's entries are committed all together, so one position tells.
    fn stock_applied(&self, transfer: &StockTransfer) -> StockResult<bool> {
        match transfer.lines.first() {
            Some(line) => self
                .store
                .has_transfer_entries(&transfer.source_key(line.item_id), transfer.id),
            None => Ok(false),
        }
    }

    /// Number the transfer and store it as Committed.
    fn finish_commit(&self, id: TransferId, entries: usize) -> StockResult<StockTransfer> {
        let (prefix, width) = (&self.config.transfer_no_prefix, self.config.transfer_no_width);
        let transfer = self.transfers.commit_transfer(
            id,
            &|sequence: u64| format_transfer_no(prefix, width, sequence),
            Utc::now(),
        )?;
        info!(
            transfer_id = %id,
            transfer_no = transfer.transfer_no.as_deref().unwrap_or_default(),
            entries,
            "transfer committed"
        );
        Ok(transfer)
    }

    /// Apply a Validated transfer.
    ///
    /// All lines reach the store together or not at all. A failure marks the transfer
    /// Rejected and returns the error that caused it; success marks it Committed and
    /// assigns the next transfer number.
    ///
    /// If the stock was applied but storing the Committed status failed, the transfer
    /// stays Validated and the error is returned. Committing it again only finishes the
    /// status change; the stock is never applied twice.
    #[instrument(skip(self))]
    pub fn commit(&self, id: TransferId) -> StockResult<StockTransfer> {
        let transfer = self.load(id)?;
        transfer.ensure_committable()?;
        let _locks = self.locks.acquire(transfer.lock_keys())?;

        // Someone may have committed or abandoned it while we waited.
        let mut transfer = self.load(id)?;
        transfer.ensure_committable()?;

        if self.stock_applied(&transfer)? {
            warn!(transfer_id = %id, "stock already applied; completing commit");
            return self.finish_commit(id, 0);
        }

        let applied = self
            .registry
            .guard_active(&[transfer.source_warehouse_id, transfer.destination_warehouse_id])
            .and_then(|_active| self.apply_lines(&transfer));

        match applied {
            Ok(entries) => self.finish_commit(id, entries.len()),
            Err(err) => {
                transfer.mark_rejected(err.to_string())?;
                self.transfers.update(transfer)?;
                warn!(transfer_id = %id, error = %err, "transfer rejected");
                Err(err)
            }
        }
    }

    /// Drop a Draft or Validated transfer. Nothing was applied, so nothing is undone.
    #[instrument(skip(self))]
    pub fn abandon(&self, id: TransferId) -> StockResult<StockTransfer> {
        let transfer = self.load(id)?;
        let _locks = self.locks.acquire(transfer.lock_keys())?;

        let transfer = self.load(id)?;
        if !transfer.is_abandonable() {
            return Err(StockError::invariant(format!(
                "cannot abandon transfer {id} in status {:?}",
                transfer.status
            )));
        }
        if self.stock_applied(&transfer)? {
            return Err(StockError::invariant(format!(
                "cannot abandon transfer {id}: its stock is already applied, commit it instead"
            )));
        }
        self.transfers.remove(id)?;
        info!(transfer_id = %id, "transfer abandoned");
        Ok(transfer)
    }

    pub fn get_transfer(&self, id: TransferId) -> StockResult<StockTransfer> {
        self.load(id)
    }

    pub fn list_transfers(&self, status: Option<TransferStatus>) -> StockResult<Vec<StockTransfer>> {
        self.transfers.list(status)
    }

    /// Create, validate and commit in one call.
    ///
    /// A draft that fails validation is abandoned so the call leaves nothing behind.
    pub fn transfer(&self, request: NewTransfer) -> StockResult<StockTransfer> {
        let draft = self.create_transfer(request)?;
        if let Err(err) = self.validate(draft.id) {
            if let Err(abandon_err) = self.abandon(draft.id) {
                warn!(transfer_id = %draft.id, error = %abandon_err, "could not abandon failed draft");
            }
            return Err(err);
        }
        self.commit(draft.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use chrono::NaiveDate;

    use crate::catalog::InMemoryItemCatalog;
    use crate::store::{InMemoryStockStore, LedgerSnapshot, StockCommit};
    use stockbook_core::{ItemId, WarehouseId};
    use stockbook_inventory::{Item, NewWarehouse, StockKey, StockRecord, StockSettings, TransferLine};

    type Engine<S, T> = TransferEngine<Arc<S>, Arc<InMemoryItemCatalog>, Arc<T>>;

    struct Fixture<S, T = InMemoryTransferStore> {
        store: Arc<S>,
        transfers: Arc<T>,
        engine: Engine<S, T>,
        registry: Arc<WarehouseRegistry>,
        soap: Item,
        rice: Item,
        a: WarehouseId,
        b: WarehouseId,
    }

    fn fixture_with<S: StockStore, T: TransferStore>(store: S, transfers: T) -> Fixture<S, T> {
        let store = Arc::new(store);
        let transfers = Arc::new(transfers);
        let soap = Item::new(ItemId::new(), "Soap", "PCS", "CTN", 12);
        let rice = Item::new(ItemId::new(), "Rice", "KG", "BAG", 25);
        let catalog = Arc::new(InMemoryItemCatalog::with_items([soap.clone(), rice.clone()]));
        let registry = Arc::new(WarehouseRegistry::new());
        let a = registry.create_warehouse(NewWarehouse::new("A", "Alpha")).unwrap().id;
        let b = registry.create_warehouse(NewWarehouse::new("B", "Beta")).unwrap().id;
        let engine = TransferEngine::new(
            Arc::clone(&store),
            catalog,
            Arc::clone(&transfers),
            Arc::new(KeyLocks::new(Duration::from_millis(500))),
            Arc::clone(&registry),
            StockBookConfig::default(),
        );
        Fixture {
            store,
            transfers,
            engine,
            registry,
            soap,
            rice,
            a,
            b,
        }
    }

    fn fixture() -> Fixture<InMemoryStockStore> {
        fixture_with(InMemoryStockStore::new(), InMemoryTransferStore::new())
    }

    fn seed<S: StockStore>(store: &S, key: StockKey, quantity: i64) {
        let mut batch = StockBatch::new(store);
        batch
            .record_movement(
                key,
                quantity,
                EntryDetails {
                    transaction_type: TransactionType::Opening,
                    entry_quantity: quantity,
                    entry_unit: "CTN".to_string(),
                    reference_type: None,
                    reference_id: None,
                    transfer_id: None,
                    notes: None,
                },
            )
            .unwrap();
        batch.commit().unwrap();
    }

    fn request(from: WarehouseId, to: WarehouseId, lines: Vec<TransferLine>) -> NewTransfer {
        NewTransfer {
            source_warehouse_id: from,
            destination_warehouse_id: to,
            transfer_date: NaiveDate::from_ymd_opt(2024, 7, 1).unwrap(),
            lines,
            notes: Some("restock branch".to_string()),
        }
    }

    #[test]
    fn committed_transfer_moves_stock_and_tags_both_legs() {
        let f = fixture();
        seed(&*f.store, StockKey::new(f.soap.id, f.a), 50);

        let done = f
            .engine
            .transfer(request(f.a, f.b, vec![TransferLine::new(f.soap.id, 10)]))
            .unwrap();

        assert_eq!(done.status, TransferStatus::Committed);
        assert_eq!(done.transfer_no.as_deref(), Some("TRF-00001"));
        assert!(done.committed_at.is_some());
        assert_eq!(f.store.quantity(&StockKey::new(f.soap.id, f.a)).unwrap(), 40);
        assert_eq!(f.store.quantity(&StockKey::new(f.soap.id, f.b)).unwrap(), 10);

        let out = f.store.ledger_entries(&StockKey::new(f.soap.id, f.a)).unwrap();
        let inbound = f.store.ledger_entries(&StockKey::new(f.soap.id, f.b)).unwrap();
        let out = out.last().unwrap();
        let inbound = inbound.last().unwrap();
        assert_eq!(out.transaction_type, TransactionType::TransferOut);
        assert_eq!(inbound.transaction_type, TransactionType::TransferIn);
        assert_eq!(out.transfer_id, Some(done.id));
        assert_eq!(inbound.transfer_id, Some(done.id));
        assert_eq!(out.quantity_change, -10);
        assert_eq!(inbound.quantity_change, 10);
    }

    #[test]
    fn create_collects_every_problem() {
        let f = fixture();
        let err = f
            .engine
            .create_transfer(request(
                f.a,
                f.a,
                vec![
                    TransferLine::new(f.soap.id, 0),
                    TransferLine::new(ItemId::new(), 2),
                    TransferLine::new(f.rice.id, -1),
                ],
            ))
            .unwrap_err();

        let StockError::Validation(issues) = err else {
            panic!("expected validation error");
        };
        assert_eq!(issues.iter().filter(|i| i.line.is_none()).count(), 1);
        let lines: Vec<usize> = issues.iter().filter_map(|i| i.line).collect();
        assert_eq!(lines, vec![0, 2, 1]);
    }

    #[test]
    fn create_rejects_inactive_warehouse() {
        let f = fixture();
        f.registry.soft_delete_warehouse(f.b, &*f.store).unwrap();
        assert!(matches!(
            f.engine
                .create_transfer(request(f.a, f.b, vec![TransferLine::new(f.soap.id, 1)])),
            Err(StockError::Validation(_))
        ));
    }

    #[test]
    fn validate_lists_every_short_item_and_keeps_draft() {
        let f = fixture();
        seed(&*f.store, StockKey::new(f.soap.id, f.a), 5);
        let draft = f
            .engine
            .create_transfer(request(
                f.a,
                f.b,
                vec![
                    TransferLine::new(f.soap.id, 4),
                    TransferLine::new(f.rice.id, 1),
                    TransferLine::new(f.soap.id, 2),
                ],
            ))
            .unwrap();

        let StockError::InsufficientStock(shortfalls) = f.engine.validate(draft.id).unwrap_err() else {
            panic!("expected insufficient stock");
        };
        assert_eq!(shortfalls.len(), 2);
        let soap = shortfalls.iter().find(|s| s.item_id == f.soap.id).unwrap();
        assert_eq!((soap.requested, soap.available), (6, 5));
        assert_eq!(f.engine.get_transfer(draft.id).unwrap().status, TransferStatus::Draft);
    }

    #[test]
    fn commit_requires_validation() {
        let f = fixture();
        seed(&*f.store, StockKey::new(f.soap.id, f.a), 5);
        let draft = f
            .engine
            .create_transfer(request(f.a, f.b, vec![TransferLine::new(f.soap.id, 1)]))
            .unwrap();

        assert!(matches!(
            f.engine.commit(draft.id),
            Err(StockError::InvariantViolation(_))
        ));
        assert_eq!(f.store.quantity(&StockKey::new(f.soap.id, f.a)).unwrap(), 5);
    }

    #[test]
    fn stock_drained_after_validation_rejects_without_entries() {
        let f = fixture();
        let source = StockKey::new(f.soap.id, f.a);
        seed(&*f.store, source, 5);
        let draft = f
            .engine
            .create_transfer(request(f.a, f.b, vec![TransferLine::new(f.soap.id, 5)]))
            .unwrap();
        f.engine.validate(draft.id).unwrap();

        // Another movement takes stock between validate and commit.
        let mut batch = StockBatch::new(&*f.store);
        batch
            .record_movement(
                source,
                -1,
                EntryDetails {
                    transaction_type: TransactionType::Sale,
                    entry_quantity: 1,
                    entry_unit: "CTN".to_string(),
                    reference_type: None,
                    reference_id: None,
                    transfer_id: None,
                    notes: None,
                },
            )
            .unwrap();
        batch.commit().unwrap();

        let err = f.engine.commit(draft.id).unwrap_err();
        assert!(matches!(err, StockError::InsufficientStock(_)));

        let rejected = f.engine.get_transfer(draft.id).unwrap();
        assert_eq!(rejected.status, TransferStatus::Rejected);
        assert!(rejected.transfer_no.is_none());
        assert!(rejected.rejection_reason.is_some());
        assert_eq!(f.store.quantity(&source).unwrap(), 4);
        assert!(f.store.ledger_entries(&StockKey::new(f.soap.id, f.b)).unwrap().is_empty());

        // Terminal.
        assert!(f.engine.commit(draft.id).is_err());
        assert!(f.engine.abandon(draft.id).is_err());
    }

    /// Stock store that refuses to load one position once it is broken.
    #[derive(Default)]
    struct FailingPosition {
        inner: InMemoryStockStore,
        broken: Mutex<Option<StockKey>>,
    }

    impl FailingPosition {
        fn break_position(&self, key: StockKey) {
            *self.broken.lock().unwrap() = Some(key);
        }
    }

    impl StockStore for FailingPosition {
        fn record(&self, key: &StockKey) -> StockResult<Option<StockRecord>> {
            if *self.broken.lock().unwrap() == Some(*key) {
                return Err(StockError::persistence("disk unavailable"));
            }
            self.inner.record(key)
        }

        fn records_for_item(&self, item_id: ItemId) -> StockResult<Vec<StockRecord>> {
            self.inner.records_for_item(item_id)
        }

        fn records_for_warehouse(&self, warehouse_id: WarehouseId) -> StockResult<Vec<StockRecord>> {
            self.inner.records_for_warehouse(warehouse_id)
        }

        fn records(&self) -> StockResult<Vec<StockRecord>> {
            self.inner.records()
        }

        fn ledger_tail(&self, key: &StockKey) -> StockResult<Option<i64>> {
            self.inner.ledger_tail(key)
        }

        fn ledger_entries(&self, key: &StockKey) -> StockResult<LedgerSnapshot> {
            self.inner.ledger_entries(key)
        }

        fn ledger_entries_for_item(&self, item_id: ItemId) -> StockResult<Vec<StockLedgerEntry>> {
            self.inner.ledger_entries_for_item(item_id)
        }

        fn save_settings(&self, key: &StockKey, settings: StockSettings) -> StockResult<StockRecord> {
            self.inner.save_settings(key, settings)
        }

        fn commit(&self, changes: StockCommit) -> StockResult<Vec<StockLedgerEntry>> {
            self.inner.commit(changes)
        }

        fn quantity(&self, key: &StockKey) -> StockResult<i64> {
            self.inner.quantity(key)
        }
    }

    #[test]
    fn failing_line_compensates_earlier_lines_and_rejects() {
        let f = fixture_with(FailingPosition::default(), InMemoryTransferStore::new());
        seed(&*f.store, StockKey::new(f.soap.id, f.a), 10);
        seed(&*f.store, StockKey::new(f.rice.id, f.a), 10);

        let draft = f
            .engine
            .create_transfer(request(
                f.a,
                f.b,
                vec![TransferLine::new(f.soap.id, 3), TransferLine::new(f.rice.id, 2)],
            ))
            .unwrap();
        f.engine.validate(draft.id).unwrap();

        // The second line's destination cannot be loaded.
        f.store.break_position(StockKey::new(f.rice.id, f.b));
        let err = f.engine.commit(draft.id).unwrap_err();
        assert!(matches!(err, StockError::Persistence(_)));
        assert_eq!(f.engine.get_transfer(draft.id).unwrap().status, TransferStatus::Rejected);

        assert_eq!(f.store.quantity(&StockKey::new(f.soap.id, f.a)).unwrap(), 10);
        assert_eq!(f.store.quantity(&StockKey::new(f.soap.id, f.b)).unwrap(), 0);
        assert_eq!(f.store.quantity(&StockKey::new(f.rice.id, f.a)).unwrap(), 10);
        assert_eq!(f.store.ledger_entries(&StockKey::new(f.soap.id, f.a)).unwrap().len(), 1);
        assert!(f.store.ledger_entries(&StockKey::new(f.soap.id, f.b)).unwrap().is_empty());
    }

    /// Transfer store whose next `commit_transfer` fails once `fail_next_commit` is set.
    #[derive(Default)]
    struct FlakyCommits {
        inner: InMemoryTransferStore,
        fail_next_commit: AtomicBool,
    }

    impl TransferStore for FlakyCommits {
        fn insert(&self, transfer: StockTransfer) -> StockResult<()> {
            self.inner.insert(transfer)
        }

        fn update(&self, transfer: StockTransfer) -> StockResult<()> {
            self.inner.update(transfer)
        }

        fn get(&self, id: TransferId) -> StockResult<Option<StockTransfer>> {
            self.inner.get(id)
        }

        fn list(&self, status: Option<TransferStatus>) -> StockResult<Vec<StockTransfer>> {
            self.inner.list(status)
        }

        fn remove(&self, id: TransferId) -> StockResult<Option<StockTransfer>> {
            self.inner.remove(id)
        }

        fn commit_transfer(
            &self,
            id: TransferId,
            transfer_no: &dyn Fn(u64) -> String,
            committed_at: chrono::DateTime<Utc>,
        ) -> StockResult<StockTransfer> {
            if self.fail_next_commit.swap(false, Ordering::SeqCst) {
                return Err(StockError::persistence("transfer table unavailable"));
            }
            self.inner.commit_transfer(id, transfer_no, committed_at)
        }
    }

    #[test]
    fn failed_status_write_is_finished_by_retry_without_moving_stock_twice() {
        let f = fixture_with(InMemoryStockStore::new(), FlakyCommits::default());
        let source = StockKey::new(f.soap.id, f.a);
        let destination = StockKey::new(f.soap.id, f.b);
        seed(&*f.store, source, 50);

        let draft = f
            .engine
            .create_transfer(request(f.a, f.b, vec![TransferLine::new(f.soap.id, 10)]))
            .unwrap();
        f.engine.validate(draft.id).unwrap();

        f.transfers.fail_next_commit.store(true, Ordering::SeqCst);
        let err = f.engine.commit(draft.id).unwrap_err();
        assert!(matches!(err, StockError::Persistence(_)));
        assert_eq!(f.engine.get_transfer(draft.id).unwrap().status, TransferStatus::Validated);
        assert_eq!(f.store.quantity(&source).unwrap(), 40);
        assert_eq!(f.store.quantity(&destination).unwrap(), 10);

        // The applied stock pins the transfer: it can only be finished.
        assert!(matches!(
            f.engine.abandon(draft.id),
            Err(StockError::InvariantViolation(_))
        ));

        let committed = f.engine.commit(draft.id).unwrap();
        assert_eq!(committed.status, TransferStatus::Committed);
        assert_eq!(committed.transfer_no.as_deref(), Some("TRF-00001"));
        assert_eq!(f.store.quantity(&source).unwrap(), 40);
        assert_eq!(f.store.quantity(&destination).unwrap(), 10);
        assert_eq!(f.store.ledger_entries(&source).unwrap().len(), 2);
        assert_eq!(f.store.ledger_entries(&destination).unwrap().len(), 1);

        let next = f
            .engine
            .transfer(request(f.a, f.b, vec![TransferLine::new(f.soap.id, 1)]))
            .unwrap();
        assert_eq!(next.transfer_no.as_deref(), Some("TRF-00002"));
    }

    #[test]
    fn abandon_removes_draft_and_numbers_stay_gapless() {
        let f = fixture();
        seed(&*f.store, StockKey::new(f.soap.id, f.a), 10);

        let dropped = f
            .engine
            .create_transfer(request(f.a, f.b, vec![TransferLine::new(f.soap.id, 1)]))
            .unwrap();
        f.engine.abandon(dropped.id).unwrap();
        assert!(matches!(
            f.engine.get_transfer(dropped.id),
            Err(StockError::NotFound(_))
        ));

        let first = f
            .engine
            .transfer(request(f.a, f.b, vec![TransferLine::new(f.soap.id, 1)]))
            .unwrap();
        let failed = f
            .engine
            .transfer(request(f.a, f.b, vec![TransferLine::new(f.soap.id, 100)]));
        let second = f
            .engine
            .transfer(request(f.a, f.b, vec![TransferLine::new(f.soap.id, 1)]))
            .unwrap();

        assert!(failed.is_err());
        assert_eq!(first.transfer_no.as_deref(), Some("TRF-00001"));
        assert_eq!(second.transfer_no.as_deref(), Some("TRF-00002"));
        assert_eq!(f.engine.list_transfers(Some(TransferStatus::Committed)).unwrap().len(), 2);
        assert_eq!(f.engine.list_transfers(None).unwrap().len(), 2);
    }
}
