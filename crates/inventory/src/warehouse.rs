use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockbook_core::{Entity, StockError, ValidationIssue, WarehouseId};

const MAX_CODE_LEN: usize = 32;

/// Canonical form of a warehouse code; uniqueness is checked on this form.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

fn check_code(code: &str, issues: &mut Vec<ValidationIssue>) {
    let code = code.trim();
    if code.is_empty() {
        issues.push(ValidationIssue::request("warehouse code cannot be empty"));
    } else if code.len() > MAX_CODE_LEN {
        issues.push(ValidationIssue::request(format!(
            "warehouse code cannot exceed {MAX_CODE_LEN} characters"
        )));
    } else if code.chars().any(char::is_whitespace) {
        issues.push(ValidationIssue::request("warehouse code cannot contain whitespace"));
    }
}

fn check_name(name: &str, issues: &mut Vec<ValidationIssue>) {
    if name.trim().is_empty() {
        issues.push(ValidationIssue::request("warehouse name cannot be empty"));
    }
}

/// A physical stock location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warehouse {
    pub id: WarehouseId,
    pub code: String,
    pub name: String,
    pub address: Option<String>,
    pub is_active: bool,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for Warehouse {
    type Id = WarehouseId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Request: create a warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewWarehouse {
    pub code: String,
    pub name: String,
    pub address: Option<String>,
}

impl NewWarehouse {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            address: None,
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn validate(&self) -> Result<(), StockError> {
        let mut issues = Vec::new();
        check_code(&self.code, &mut issues);
        check_name(&self.name, &mut issues);
        if issues.is_empty() {
            Ok(())
        } else {
            Err(StockError::Validation(issues))
        }
    }
}

/// Request: edit a warehouse. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseUpdate {
    pub code: Option<String>,
    pub name: Option<String>,
    /// `Some(None)` clears the address.
    pub address: Option<Option<String>>,
}

impl WarehouseUpdate {
    pub fn validate(&self) -> Result<(), StockError> {
        let mut issues = Vec::new();
        if let Some(code) = &self.code {
            check_code(code, &mut issues);
        }
        if let Some(name) = &self.name {
            check_name(name, &mut issues);
        }
        if issues.is_empty() {
            Ok(())
        } else {
            Err(StockError::Validation(issues))
        }
    }
}

impl Warehouse {
    /// Build an active, non-default warehouse from a validated request.
    pub fn create(id: WarehouseId, request: NewWarehouse, now: DateTime<Utc>) -> Result<Self, StockError> {
        request.validate()?;
        Ok(Self {
            id,
            code: normalize_code(&request.code),
            name: request.name.trim().to_string(),
            address: request.address,
            is_active: true,
            is_default: false,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn apply_update(&mut self, update: WarehouseUpdate, now: DateTime<Utc>) -> Result<(), StockError> {
        update.validate()?;
        if let Some(code) = update.code {
            self.code = normalize_code(&code);
        }
        if let Some(name) = update.name {
            self.name = name.trim().to_string();
        }
        if let Some(address) = update.address {
            self.address = address;
        }
        self.updated_at = now;
        Ok(())
    }

    /// Soft delete. A deactivated warehouse cannot stay the default.
    pub fn deactivate(&mut self, now: DateTime<Utc>) {
        self.is_active = false;
        self.is_default = false;
        self.updated_at = now;
    }

    pub fn reactivate(&mut self, now: DateTime<Utc>) {
        self.is_active = true;
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_normalizes_code_and_name() {
        let wh = Warehouse::create(
            WarehouseId::new(),
            NewWarehouse::new("  main-01 ", " Main Godown "),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(wh.code, "MAIN-01");
        assert_eq!(wh.name, "Main Godown");
        assert!(wh.is_active);
        assert!(!wh.is_default);
    }

    #[test]
    fn create_reports_every_problem() {
        let err = NewWarehouse::new("", "  ").validate().unwrap_err();
        match err {
            StockError::Validation(issues) => assert_eq!(issues.len(), 2),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn codes_with_spaces_are_rejected() {
        assert!(NewWarehouse::new("MAIN 01", "Main").validate().is_err());
    }

    #[test]
    fn deactivating_clears_default() {
        let now = Utc::now();
        let mut wh = Warehouse::create(WarehouseId::new(), NewWarehouse::new("A", "A"), now).unwrap();
        wh.is_default = true;
        wh.deactivate(now);
        assert!(!wh.is_active);
        assert!(!wh.is_default);
        wh.reactivate(now);
        assert!(wh.is_active);
        assert!(!wh.is_default);
    }

    #[test]
    fn update_can_clear_address() {
        let now = Utc::now();
        let mut wh = Warehouse::create(
            WarehouseId::new(),
            NewWarehouse::new("A", "A").with_address("Plot 4, MIDC"),
            now,
        )
        .unwrap();
        wh.apply_update(
            WarehouseUpdate {
                address: Some(None),
                ..WarehouseUpdate::default()
            },
            now,
        )
        .unwrap();
        assert_eq!(wh.address, None);
        assert_eq!(wh.code, "A");
    }
}
