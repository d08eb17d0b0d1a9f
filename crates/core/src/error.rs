//! Error model for the stock core.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::id::{ItemId, WarehouseId};

/// Result type used across the stock core.
pub type StockResult<T> = Result<T, StockError>;

/// One problem found while validating a request.
///
/// `line` is the zero-based index of the offending request line, when the problem
/// belongs to a line rather than to the request as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub line: Option<usize>,
    pub message: String,
}

impl ValidationIssue {
    pub fn request(message: impl Into<String>) -> Self {
        Self {
            line: None,
            message: message.into(),
        }
    }

    pub fn line(line: usize, message: impl Into<String>) -> Self {
        Self {
            line: Some(line),
            message: message.into(),
        }
    }
}

impl core::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.line {
            Some(line) => write!(f, "line {}: {}", line + 1, self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Requested quantity that the source position cannot cover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shortfall {
    pub item_id: ItemId,
    pub warehouse_id: Option<WarehouseId>,
    /// Packaging units requested.
    pub requested: i64,
    /// Packaging units on hand when the check ran.
    pub available: i64,
}

impl core::fmt::Display for Shortfall {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.warehouse_id {
            Some(wh) => write!(
                f,
                "item {} in warehouse {wh}: requested {}, available {}",
                self.item_id, self.requested, self.available
            ),
            None => write!(
                f,
                "item {}: requested {}, available {}",
                self.item_id, self.requested, self.available
            ),
        }
    }
}

fn join<T: core::fmt::Display>(parts: &[T]) -> String {
    parts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Stock core error.
///
/// Every mutation that returns one of these has been fully aborted: no record was
/// updated and no ledger entry was appended.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StockError {
    /// Malformed request. Carries every issue found, not just the first.
    #[error("validation failed: {}", join(.0))]
    Validation(Vec<ValidationIssue>),

    /// Requested quantity exceeds what is on hand. Carries every offending line.
    #[error("insufficient stock: {}", join(.0))]
    InsufficientStock(Vec<Shortfall>),

    /// Warehouse deactivation blocked because it still holds stock.
    #[error(
        "warehouse {warehouse_id} still holds stock for {} item(s); transfer the stock out before deactivating it",
        .items.len()
    )]
    StockExists {
        warehouse_id: WarehouseId,
        items: Vec<ItemId>,
    },

    /// Lock acquisition or a concurrent writer forced an abort; retry the whole operation.
    #[error("concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    /// Underlying storage failure.
    #[error("persistence failure: {0}")]
    Persistence(String),

    /// A referenced warehouse, item or transfer does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A state-machine or ledger-chain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}

impl StockError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(vec![ValidationIssue::request(msg)])
    }

    pub fn insufficient(shortfall: Shortfall) -> Self {
        Self::InsufficientStock(vec![shortfall])
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::ConcurrencyConflict(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    /// Whether the caller may retry the same operation unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict(_))
    }
}
