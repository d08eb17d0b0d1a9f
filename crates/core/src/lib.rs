//! `stockbook-core`: shared building blocks for the stock core.
//!
//! Identifiers, the error taxonomy and the entity/value-object markers. No IO.

pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;

pub use entity::Entity;
pub use error::{Shortfall, StockError, StockResult, ValidationIssue};
pub use id::{ItemId, TransferId, WarehouseId};
pub use value_object::ValueObject;
