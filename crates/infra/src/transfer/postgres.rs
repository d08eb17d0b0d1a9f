//! Postgres-backed transfer store.
//!
//! Transfers live in `stock_transfers`, their lines in `stock_transfer_lines`. Lines are
//! written once on insert; `update` stores the lifecycle columns only.
//!
//! Transfer numbers come from the single-row `stock_transfer_sequence` counter, bumped
//! inside the same transaction that marks the transfer Committed. A rolled-back commit
//! also rolls back the counter, which a Postgres `SEQUENCE` would not do.
//!
//! Errors are mapped as for `PostgresStockStore`.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use stockbook_core::{ItemId, StockError, StockResult, TransferId, WarehouseId};
use stockbook_inventory::{StockTransfer, TransferLine, TransferStatus};

use super::TransferStore;
use crate::store::postgres::{block_on, map_sqlx_error};

pub const TRANSFER_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS stock_transfers (
    id UUID PRIMARY KEY,
    transfer_no TEXT UNIQUE,
    source_warehouse_id UUID NOT NULL,
    destination_warehouse_id UUID NOT NULL,
    transfer_date DATE NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('draft', 'validated', 'committed', 'rejected')),
    notes TEXT,
    created_at TIMESTAMPTZ NOT NULL,
    committed_at TIMESTAMPTZ,
    rejection_reason TEXT,
    CHECK (source_warehouse_id <> destination_warehouse_id)
);

CREATE INDEX IF NOT EXISTS stock_transfers_status
    ON stock_transfers (status, created_at, id);

CREATE TABLE IF NOT EXISTS stock_transfer_lines (
    transfer_id UUID NOT NULL REFERENCES stock_transfers (id) ON DELETE CASCADE,
    line_no INTEGER NOT NULL,
    item_id UUID NOT NULL,
    quantity BIGINT NOT NULL CHECK (quantity > 0),
    PRIMARY KEY (transfer_id, line_no)
);

CREATE TABLE IF NOT EXISTS stock_transfer_sequence (
    id BOOLEAN PRIMARY KEY DEFAULT TRUE CHECK (id),
    last_value BIGINT NOT NULL
);

INSERT INTO stock_transfer_sequence (id, last_value) VALUES (TRUE, 0)
    ON CONFLICT (id) DO NOTHING;
"#;

const TRANSFER_COLUMNS: &str = "id, transfer_no, source_warehouse_id, destination_warehouse_id, transfer_date, \
     status, notes, created_at, committed_at, rejection_reason";

fn status_column(status: TransferStatus) -> &'static str {
    match status {
        TransferStatus::Draft => "draft",
        TransferStatus::Validated => "validated",
        TransferStatus::Committed => "committed",
        TransferStatus::Rejected => "rejected",
    }
}

fn status_from_column(value: &str) -> StockResult<TransferStatus> {
    match value {
        "draft" => Ok(TransferStatus::Draft),
        "validated" => Ok(TransferStatus::Validated),
        "committed" => Ok(TransferStatus::Committed),
        "rejected" => Ok(TransferStatus::Rejected),
        other => Err(StockError::persistence(format!("unknown transfer status {other:?}"))),
    }
}

/// Header columns only; lines are attached by the caller.
fn header_from_row(row: &PgRow) -> StockResult<StockTransfer> {
    let decode = |e: sqlx::Error| map_sqlx_error("decode_stock_transfer", e);
    let id: Uuid = row.try_get("id").map_err(decode)?;
    let source: Uuid = row.try_get("source_warehouse_id").map_err(decode)?;
    let destination: Uuid = row.try_get("destination_warehouse_id").map_err(decode)?;
    let transfer_date: NaiveDate = row.try_get("transfer_date").map_err(decode)?;
    let status: String = row.try_get("status").map_err(decode)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(decode)?;
    Ok(StockTransfer {
        id: TransferId::from_uuid(id),
        transfer_no: row.try_get("transfer_no").map_err(decode)?,
        source_warehouse_id: WarehouseId::from_uuid(source),
        destination_warehouse_id: WarehouseId::from_uuid(destination),
        transfer_date,
        status: status_from_column(&status)?,
        lines: Vec::new(),
        notes: row.try_get("notes").map_err(decode)?,
        created_at,
        committed_at: row.try_get("committed_at").map_err(decode)?,
        rejection_reason: row.try_get("rejection_reason").map_err(decode)?,
    })
}

/// Load lines for `transfers` and attach them in line order.
async fn attach_lines(conn: &mut PgConnection, transfers: &mut [StockTransfer]) -> StockResult<()> {
    if transfers.is_empty() {
        return Ok(());
    }
    let ids: Vec<Uuid> = transfers.iter().map(|t| Uuid::from(t.id)).collect();
    let rows = sqlx::query(
        "SELECT transfer_id, item_id, quantity FROM stock_transfer_lines \
         WHERE transfer_id = ANY($1) ORDER BY transfer_id, line_no",
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("fetch_transfer_lines", e))?;

    let decode = |e: sqlx::Error| map_sqlx_error("decode_transfer_line", e);
    let mut lines: HashMap<Uuid, Vec<TransferLine>> = HashMap::new();
    for row in &rows {
        let transfer_id: Uuid = row.try_get("transfer_id").map_err(decode)?;
        let item_id: Uuid = row.try_get("item_id").map_err(decode)?;
        let quantity: i64 = row.try_get("quantity").map_err(decode)?;
        lines
            .entry(transfer_id)
            .or_default()
            .push(TransferLine::new(ItemId::from_uuid(item_id), quantity));
    }
    for transfer in transfers {
        transfer.lines = lines.remove(transfer.id.as_uuid()).unwrap_or_default();
    }
    Ok(())
}

async fn load_transfer(conn: &mut PgConnection, id: TransferId, for_update: bool) -> StockResult<Option<StockTransfer>> {
    let lock = if for_update { " FOR UPDATE" } else { "" };
    let row = sqlx::query(&format!("SELECT {TRANSFER_COLUMNS} FROM stock_transfers WHERE id = $1{lock}"))
        .bind(Uuid::from(id))
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("fetch_transfer", e))?;
    let Some(row) = row else {
        return Ok(None);
    };
    let mut transfers = [header_from_row(&row)?];
    attach_lines(conn, &mut transfers).await?;
    let [transfer] = transfers;
    Ok(Some(transfer))
}

async fn write_lifecycle(conn: &mut PgConnection, transfer: &StockTransfer) -> StockResult<u64> {
    let result = sqlx::query(
        "UPDATE stock_transfers SET transfer_no = $2, status = $3, notes = $4, committed_at = $5, \
             rejection_reason = $6 \
         WHERE id = $1",
    )
    .bind(Uuid::from(transfer.id))
    .bind(&transfer.transfer_no)
    .bind(status_column(transfer.status))
    .bind(&transfer.notes)
    .bind(transfer.committed_at)
    .bind(&transfer.rejection_reason)
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("update_transfer", e))?;
    Ok(result.rows_affected())
}

/// Transfers and their lines in Postgres.
///
/// Like `PostgresStockStore`, the synchronous `TransferStore` impl drives the async
/// methods on the current (multi-threaded) tokio runtime.
#[derive(Debug, Clone)]
pub struct PostgresTransferStore {
    pool: PgPool,
}

impl PostgresTransferStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the tables and the sequence row if they do not exist.
    pub async fn ensure_schema(&self) -> StockResult<()> {
        sqlx::raw_sql(TRANSFER_SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_transfer_schema", e))?;
        Ok(())
    }

    #[instrument(skip(self, transfer), fields(transfer_id = %transfer.id, lines = transfer.lines.len()))]
    pub async fn insert_transfer(&self, transfer: &StockTransfer) -> StockResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query(&format!(
            "INSERT INTO stock_transfers ({TRANSFER_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
        ))
        .bind(Uuid::from(transfer.id))
        .bind(&transfer.transfer_no)
        .bind(Uuid::from(transfer.source_warehouse_id))
        .bind(Uuid::from(transfer.destination_warehouse_id))
        .bind(transfer.transfer_date)
        .bind(status_column(transfer.status))
        .bind(&transfer.notes)
        .bind(transfer.created_at)
        .bind(transfer.committed_at)
        .bind(&transfer.rejection_reason)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_transfer", e))?;

        for (idx, line) in transfer.lines.iter().enumerate() {
            let line_no = i32::try_from(idx + 1)
                .map_err(|_| StockError::validation("transfer has too many lines"))?;
            sqlx::query(
                "INSERT INTO stock_transfer_lines (transfer_id, line_no, item_id, quantity) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(Uuid::from(transfer.id))
            .bind(line_no)
            .bind(Uuid::from(line.item_id))
            .bind(line.quantity)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_transfer_line", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    pub async fn update_transfer(&self, transfer: &StockTransfer) -> StockResult<()> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire_connection", e))?;
        match write_lifecycle(&mut conn, transfer).await? {
            0 => Err(StockError::not_found(format!("transfer {}", transfer.id))),
            _ => Ok(()),
        }
    }

    pub async fn fetch_transfer(&self, id: TransferId) -> StockResult<Option<StockTransfer>> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire_connection", e))?;
        load_transfer(&mut conn, id, false).await
    }

    pub async fn fetch_transfers(&self, status: Option<TransferStatus>) -> StockResult<Vec<StockTransfer>> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire_connection", e))?;
        let rows = match status {
            Some(status) => sqlx::query(&format!(
                "SELECT {TRANSFER_COLUMNS} FROM stock_transfers WHERE status = $1 ORDER BY created_at, id"
            ))
            .bind(status_column(status))
            .fetch_all(&mut *conn)
            .await,
            None => sqlx::query(&format!("SELECT {TRANSFER_COLUMNS} FROM stock_transfers ORDER BY created_at, id"))
                .fetch_all(&mut *conn)
                .await,
        }
        .map_err(|e| map_sqlx_error("fetch_transfers", e))?;

        let mut transfers = rows.iter().map(header_from_row).collect::<StockResult<Vec<_>>>()?;
        attach_lines(&mut conn, &mut transfers).await?;
        Ok(transfers)
    }

    pub async fn delete_transfer(&self, id: TransferId) -> StockResult<Option<StockTransfer>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        let transfer = load_transfer(&mut tx, id, true).await?;
        if transfer.is_some() {
            sqlx::query("DELETE FROM stock_transfers WHERE id = $1")
                .bind(Uuid::from(id))
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("delete_transfer", e))?;
        }
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(transfer)
    }

    /// Bump the counter and mark the transfer Committed in one transaction.
    #[instrument(skip(self, transfer_no))]
    pub async fn commit_transfer_row(
        &self,
        id: TransferId,
        transfer_no: &dyn Fn(u64) -> String,
        committed_at: DateTime<Utc>,
    ) -> StockResult<StockTransfer> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let mut transfer = load_transfer(&mut tx, id, true)
            .await?
            .ok_or_else(|| StockError::not_found(format!("transfer {id}")))?;
        transfer.ensure_committable()?;

        let sequence: i64 = sqlx::query_scalar(
            "UPDATE stock_transfer_sequence SET last_value = last_value + 1 WHERE id RETURNING last_value",
        )
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("next_transfer_sequence", e))?;
        let sequence = u64::try_from(sequence)
            .map_err(|_| StockError::persistence(format!("negative transfer sequence {sequence}")))?;

        transfer.mark_committed(transfer_no(sequence), committed_at)?;
        write_lifecycle(&mut tx, &transfer).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(transfer)
    }
}

impl TransferStore for PostgresTransferStore {
    fn insert(&self, transfer: StockTransfer) -> StockResult<()> {
        block_on(self.insert_transfer(&transfer))?
    }

    fn update(&self, transfer: StockTransfer) -> StockResult<()> {
        block_on(self.update_transfer(&transfer))?
    }

    fn get(&self, id: TransferId) -> StockResult<Option<StockTransfer>> {
        block_on(self.fetch_transfer(id))?
    }

    fn list(&self, status: Option<TransferStatus>) -> StockResult<Vec<StockTransfer>> {
        block_on(self.fetch_transfers(status))?
    }

    fn remove(&self, id: TransferId) -> StockResult<Option<StockTransfer>> {
        block_on(self.delete_transfer(id))?
    }

    fn commit_transfer(
        &self,
        id: TransferId,
        transfer_no: &dyn Fn(u64) -> String,
        committed_at: DateTime<Utc>,
    ) -> StockResult<StockTransfer> {
        block_on(self.commit_transfer_row(id, transfer_no, committed_at))?
    }
}
