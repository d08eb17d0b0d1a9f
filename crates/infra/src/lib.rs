//! Stock ledger and multi-warehouse transfer engine.
//!
//! Layering, bottom up:
//! - `store`: current quantities + append-only ledger, committed atomically
//! - `locks`: per-(item, warehouse) lock table with a fixed acquisition order
//! - `batch`: unit of work staged against a store
//! - `movement`, `transfer`, `registry`: the mutating services
//! - `query`, `ledger`: read-only views
//! - `book`: everything wired together

pub mod batch;
pub mod book;
pub mod catalog;
pub mod config;
pub mod ledger;
pub mod locks;
pub mod movement;
pub mod query;
pub mod registry;
pub mod store;
pub mod transfer;


pub use book::StockBook;
pub use catalog::{InMemoryItemCatalog, ItemCatalog};
pub use config::StockBookConfig;
pub use ledger::{LedgerHistory, Reconciliation, StockLedger};
pub use movement::StockMovement;
pub use query::{StockLevel, StockQueryService};
pub use registry::WarehouseRegistry;
pub use store::{InMemoryStockStore, StockStore};
pub use transfer::{InMemoryTransferStore, TransferEngine, TransferStore};
