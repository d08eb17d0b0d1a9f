//! Postgres-backed stock store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StockError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (serialization failure) | `40001` | `ConcurrencyConflict` | Competing transaction on the same positions |
//! | Database (deadlock detected) | `40P01` | `ConcurrencyConflict` | Row locks taken by another writer |
//! | Database (unique violation) | `23505` | `ConcurrencyConflict` | Concurrent first insert of a position |
//! | Database (check violation) | `23514` | `InvariantViolation` | Negative quantity reached the table |
//! | Anything else | N/A | `Persistence` | Network, pool, decoding errors |
//!
//! Positions are keyed by `(item_id, warehouse_id)`; the item-level position is stored
//! with the nil UUID as `warehouse_id` so the pair can be a primary key.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use stockbook_core::{ItemId, StockError, StockResult, TransferId, WarehouseId};
use stockbook_inventory::{StockKey, StockLedgerEntry, StockRecord, StockSettings};

use super::{LedgerSnapshot, StockCommit, StockStore, check_commit};

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS stock_records (
    item_id UUID NOT NULL,
    warehouse_id UUID NOT NULL,
    quantity BIGINT NOT NULL DEFAULT 0 CHECK (quantity >= 0),
    min_quantity BIGINT,
    max_quantity BIGINT,
    location_note TEXT,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (item_id, warehouse_id)
);

CREATE TABLE IF NOT EXISTS stock_ledger_entries (
    id BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
    item_id UUID NOT NULL,
    warehouse_id UUID NOT NULL,
    transaction_type TEXT NOT NULL,
    quantity_before BIGINT NOT NULL,
    quantity_change BIGINT NOT NULL,
    quantity_after BIGINT NOT NULL CHECK (quantity_after >= 0),
    entry_quantity BIGINT NOT NULL,
    entry_unit TEXT NOT NULL,
    reference_type TEXT,
    reference_id TEXT,
    transfer_id UUID,
    timestamp TIMESTAMPTZ NOT NULL DEFAULT now(),
    notes TEXT,
    CHECK (quantity_before + quantity_change = quantity_after)
);

CREATE INDEX IF NOT EXISTS stock_ledger_entries_position
    ON stock_ledger_entries (item_id, warehouse_id, id);

CREATE INDEX IF NOT EXISTS stock_ledger_entries_transfer
    ON stock_ledger_entries (transfer_id) WHERE transfer_id IS NOT NULL;
"#;

fn warehouse_column(warehouse_id: Option<WarehouseId>) -> Uuid {
    warehouse_id.map(Uuid::from).unwrap_or(Uuid::nil())
}

fn warehouse_from_column(value: Uuid) -> Option<WarehouseId> {
    (!value.is_nil()).then(|| WarehouseId::from_uuid(value))
}

pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StockError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("40001") | Some("40P01") | Some("23505") => StockError::conflict(msg),
                Some("23514") => StockError::invariant(msg),
                _ => StockError::persistence(msg),
            }
        }
        sqlx::Error::PoolClosed => StockError::persistence(format!("connection pool closed in {operation}")),
        other => StockError::persistence(format!("sqlx error in {operation}: {other}")),
    }
}

fn record_from_row(row: &PgRow) -> StockResult<StockRecord> {
    let decode = |e: sqlx::Error| map_sqlx_error("decode_stock_record", e);
    Ok(StockRecord {
        item_id: ItemId::from_uuid(row.try_get("item_id").map_err(decode)?),
        warehouse_id: warehouse_from_column(row.try_get("warehouse_id").map_err(decode)?),
        quantity: row.try_get("quantity").map_err(decode)?,
        min_quantity: row.try_get("min_quantity").map_err(decode)?,
        max_quantity: row.try_get("max_quantity").map_err(decode)?,
        location_note: row.try_get("location_note").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
    })
}

fn entry_from_row(row: &PgRow) -> StockResult<StockLedgerEntry> {
    let decode = |e: sqlx::Error| map_sqlx_error("decode_ledger_entry", e);
    let id: i64 = row.try_get("id").map_err(decode)?;
    let transaction_type: String = row.try_get("transaction_type").map_err(decode)?;
    let transfer_id: Option<Uuid> = row.try_get("transfer_id").map_err(decode)?;
    let timestamp: DateTime<Utc> = row.try_get("timestamp").map_err(decode)?;
    Ok(StockLedgerEntry {
        id: u64::try_from(id).map_err(|_| StockError::persistence(format!("negative ledger id {id}")))?,
        item_id: ItemId::from_uuid(row.try_get("item_id").map_err(decode)?),
        warehouse_id: warehouse_from_column(row.try_get("warehouse_id").map_err(decode)?),
        transaction_type: transaction_type.parse()?,
        quantity_before: row.try_get("quantity_before").map_err(decode)?,
        quantity_change: row.try_get("quantity_change").map_err(decode)?,
        quantity_after: row.try_get("quantity_after").map_err(decode)?,
        entry_quantity: row.try_get("entry_quantity").map_err(decode)?,
        entry_unit: row.try_get("entry_unit").map_err(decode)?,
        reference_type: row.try_get("reference_type").map_err(decode)?,
        reference_id: row.try_get("reference_id").map_err(decode)?,
        transfer_id: transfer_id.map(TransferId::from_uuid),
        timestamp,
        notes: row.try_get("notes").map_err(decode)?,
    })
}

const RECORD_COLUMNS: &str =
    "item_id, warehouse_id, quantity, min_quantity, max_quantity, location_note, updated_at";

const ENTRY_COLUMNS: &str = "id, item_id, warehouse_id, transaction_type, quantity_before, quantity_change, \
     quantity_after, entry_quantity, entry_unit, reference_type, reference_id, transfer_id, timestamp, notes";

/// Stock records and ledger in two Postgres tables.
///
/// `commit` runs in one transaction: it locks the touched `stock_records` rows
/// (`SELECT ... FOR UPDATE`), checks the ledger tails, then inserts the entries and
/// updates the quantities. Any error rolls the whole commit back.
///
/// The `StockStore` trait is synchronous; the trait impl drives the async methods on the
/// current tokio runtime and needs a multi-threaded one.
#[derive(Debug, Clone)]
pub struct PostgresStockStore {
    pool: Arc<PgPool>,
}

impl PostgresStockStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    /// Create the tables if they do not exist.
    pub async fn ensure_schema(&self) -> StockResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    pub async fn fetch_record(&self, key: &StockKey) -> StockResult<Option<StockRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM stock_records WHERE item_id = $1 AND warehouse_id = $2"
        ))
        .bind(*key.item_id.as_uuid())
        .bind(warehouse_column(key.warehouse_id))
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_record", e))?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn fetch_records(&self, filter: &str, value: Option<Uuid>) -> StockResult<Vec<StockRecord>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM stock_records {filter} ORDER BY item_id, warehouse_id");
        let mut query = sqlx::query(&sql);
        if let Some(value) = value {
            query = query.bind(value);
        }
        let rows = query
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_records", e))?;
        rows.iter().map(record_from_row).collect()
    }

    pub async fn fetch_ledger_tail(&self, key: &StockKey) -> StockResult<Option<i64>> {
        let row = sqlx::query(
            "SELECT quantity_after FROM stock_ledger_entries \
             WHERE item_id = $1 AND warehouse_id = $2 ORDER BY id DESC LIMIT 1",
        )
        .bind(*key.item_id.as_uuid())
        .bind(warehouse_column(key.warehouse_id))
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_ledger_tail", e))?;
        row.map(|r| r.try_get("quantity_after"))
            .transpose()
            .map_err(|e| map_sqlx_error("fetch_ledger_tail", e))
    }

    pub async fn fetch_ledger(&self, key: &StockKey) -> StockResult<Vec<StockLedgerEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM stock_ledger_entries \
             WHERE item_id = $1 AND warehouse_id = $2 ORDER BY id"
        ))
        .bind(*key.item_id.as_uuid())
        .bind(warehouse_column(key.warehouse_id))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_ledger", e))?;
        rows.iter().map(entry_from_row).collect()
    }

    pub async fn fetch_item_ledger(&self, item_id: ItemId) -> StockResult<Vec<StockLedgerEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM stock_ledger_entries WHERE item_id = $1 ORDER BY id"
        ))
        .bind(*item_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_item_ledger", e))?;
        rows.iter().map(entry_from_row).collect()
    }

    pub async fn fetch_has_transfer_entries(&self, key: &StockKey, transfer_id: TransferId) -> StockResult<bool> {
        sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM stock_ledger_entries \
             WHERE item_id = $1 AND warehouse_id = $2 AND transfer_id = $3)",
        )
        .bind(*key.item_id.as_uuid())
        .bind(warehouse_column(key.warehouse_id))
        .bind(Uuid::from(transfer_id))
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_has_transfer_entries", e))
    }

    pub async fn upsert_settings(&self, key: &StockKey, settings: StockSettings) -> StockResult<StockRecord> {
        settings.validate()?;
        let row = sqlx::query(&format!(
            "INSERT INTO stock_records (item_id, warehouse_id, quantity, min_quantity, max_quantity, location_note, updated_at) \
             VALUES ($1, $2, 0, $3, $4, $5, now()) \
             ON CONFLICT (item_id, warehouse_id) DO UPDATE SET \
                 min_quantity = EXCLUDED.min_quantity, \
                 max_quantity = EXCLUDED.max_quantity, \
                 location_note = EXCLUDED.location_note, \
                 updated_at = EXCLUDED.updated_at \
             RETURNING {RECORD_COLUMNS}"
        ))
        .bind(*key.item_id.as_uuid())
        .bind(warehouse_column(key.warehouse_id))
        .bind(settings.min_quantity)
        .bind(settings.max_quantity)
        .bind(settings.location_note)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_settings", e))?;
        record_from_row(&row)
    }

    /// Lock every touched position and return its stored ledger tail.
    async fn lock_positions(
        tx: &mut Transaction<'_, Postgres>,
        keys: &BTreeSet<StockKey>,
    ) -> StockResult<HashMap<StockKey, i64>> {
        let mut tails = HashMap::with_capacity(keys.len());
        // Ascending key order, same as the in-process lock order.
        for key in keys {
            let item = *key.item_id.as_uuid();
            let warehouse = warehouse_column(key.warehouse_id);
            sqlx::query(
                "INSERT INTO stock_records (item_id, warehouse_id, quantity, updated_at) \
                 VALUES ($1, $2, 0, now()) ON CONFLICT (item_id, warehouse_id) DO NOTHING",
            )
            .bind(item)
            .bind(warehouse)
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("create_position", e))?;
            sqlx::query("SELECT quantity FROM stock_records WHERE item_id = $1 AND warehouse_id = $2 FOR UPDATE")
                .bind(item)
                .bind(warehouse)
                .execute(&mut **tx)
                .await
                .map_err(|e| map_sqlx_error("lock_position", e))?;
            let tail: Option<i64> = sqlx::query_scalar(
                "SELECT quantity_after FROM stock_ledger_entries \
                 WHERE item_id = $1 AND warehouse_id = $2 ORDER BY id DESC LIMIT 1",
            )
            .bind(item)
            .bind(warehouse)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("load_ledger_tail", e))?;
            tails.insert(*key, tail.unwrap_or(0));
        }
        Ok(tails)
    }

    #[instrument(skip(self, changes), fields(entries = changes.entries.len()))]
    pub async fn commit_changes(&self, changes: StockCommit) -> StockResult<Vec<StockLedgerEntry>> {
        if changes.is_empty() {
            return Ok(vec![]);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let keys: BTreeSet<StockKey> = changes.entries.iter().map(|e| e.key()).collect();
        let tails = Self::lock_positions(&mut tx, &keys).await?;
        check_commit(&changes, |key| Ok(tails.get(key).copied().unwrap_or(0)))?;

        let mut committed = Vec::with_capacity(changes.entries.len());
        for entry in changes.entries {
            let row = sqlx::query(&format!(
                "INSERT INTO stock_ledger_entries (item_id, warehouse_id, transaction_type, quantity_before, \
                     quantity_change, quantity_after, entry_quantity, entry_unit, reference_type, reference_id, \
                     transfer_id, notes) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
                 RETURNING {ENTRY_COLUMNS}"
            ))
            .bind(*entry.item_id.as_uuid())
            .bind(warehouse_column(entry.warehouse_id))
            .bind(entry.transaction_type.as_str())
            .bind(entry.quantity_before)
            .bind(entry.quantity_change)
            .bind(entry.quantity_after)
            .bind(entry.entry_quantity)
            .bind(&entry.entry_unit)
            .bind(&entry.reference_type)
            .bind(&entry.reference_id)
            .bind(entry.transfer_id.map(Uuid::from))
            .bind(&entry.notes)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_ledger_entry", e))?;
            committed.push(entry_from_row(&row)?);
        }

        for record in &changes.records {
            sqlx::query(
                "UPDATE stock_records SET quantity = $3, updated_at = now() \
                 WHERE item_id = $1 AND warehouse_id = $2",
            )
            .bind(*record.item_id.as_uuid())
            .bind(warehouse_column(record.warehouse_id))
            .bind(record.quantity)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_stock_record", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(committed)
    }
}

/// Run an async store call from the synchronous trait.
pub(crate) fn block_on<F: Future>(future: F) -> StockResult<F::Output> {
    let handle = tokio::runtime::Handle::try_current().map_err(|_| {
        StockError::persistence("Postgres stores require a tokio runtime; call them from within one")
    })?;
    Ok(tokio::task::block_in_place(|| handle.block_on(future)))
}

impl StockStore for PostgresStockStore {
    fn record(&self, key: &StockKey) -> StockResult<Option<StockRecord>> {
        block_on(self.fetch_record(key))?
    }

    fn records_for_item(&self, item_id: ItemId) -> StockResult<Vec<StockRecord>> {
        block_on(self.fetch_records("WHERE item_id = $1", Some(item_id.into())))?
    }

    fn records_for_warehouse(&self, warehouse_id: WarehouseId) -> StockResult<Vec<StockRecord>> {
        block_on(self.fetch_records("WHERE warehouse_id = $1", Some(warehouse_id.into())))?
    }

    fn records(&self) -> StockResult<Vec<StockRecord>> {
        block_on(self.fetch_records("", None))?
    }

    fn ledger_tail(&self, key: &StockKey) -> StockResult<Option<i64>> {
        block_on(self.fetch_ledger_tail(key))?
    }

    fn ledger_entries(&self, key: &StockKey) -> StockResult<LedgerSnapshot> {
        block_on(self.fetch_ledger(key))?.map(Arc::new)
    }

    fn ledger_entries_for_item(&self, item_id: ItemId) -> StockResult<Vec<StockLedgerEntry>> {
        block_on(self.fetch_item_ledger(item_id))?
    }

    fn save_settings(&self, key: &StockKey, settings: StockSettings) -> StockResult<StockRecord> {
        block_on(self.upsert_settings(key, settings))?
    }

    fn commit(&self, changes: StockCommit) -> StockResult<Vec<StockLedgerEntry>> {
        block_on(self.commit_changes(changes))?
    }

    fn has_transfer_entries(&self, key: &StockKey, transfer_id: TransferId) -> StockResult<bool> {
        block_on(self.fetch_has_transfer_entries(key, transfer_id))?
    }
}
