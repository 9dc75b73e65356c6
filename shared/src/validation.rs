//! Validation utilities for orders and stock

use std::collections::HashSet;

use chrono::NaiveDate;
use thiserror::Error;

use crate::models::SizeConfig;

/// Why a variety selection does not fit its size
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("At least one variety must be selected")]
    Empty,

    #[error("{size} requires at least {min} varieties, got {actual}")]
    TooFew { size: String, min: u32, actual: usize },

    #[error("{size} allows at most {max} varieties, got {actual}")]
    TooMany { size: String, max: u32, actual: usize },

    #[error("Variety {0} is selected more than once")]
    Duplicate(String),

    #[error("Variety {variety} is not allowed for {size}")]
    NotAllowed { size: String, variety: String },

    #[error("Variety {variety} is excluded from {size}")]
    Excluded { size: String, variety: String },

    #[error("Unknown variety: {0}")]
    UnknownVariety(String),
}

// ============================================================================
// Selection Validations
// ============================================================================

/// Validate a variety selection against the size's count and set constraints
pub fn validate_variety_selection(
    size: &SizeConfig,
    varieties: &[String],
) -> Result<(), SelectionError> {
    if varieties.is_empty() {
        return Err(SelectionError::Empty);
    }

    let mut seen = HashSet::new();
    for variety in varieties {
        if !seen.insert(variety.as_str()) {
            return Err(SelectionError::Duplicate(variety.clone()));
        }
    }

    let count = varieties.len();
    if count < size.min_varieties as usize {
        return Err(SelectionError::TooFew {
            size: size.name.clone(),
            min: size.min_varieties,
            actual: count,
        });
    }
    if count > size.max_varieties as usize {
        return Err(SelectionError::TooMany {
            size: size.name.clone(),
            max: size.max_varieties,
            actual: count,
        });
    }

    for variety in varieties {
        if let Some(allowed) = &size.allowed_varieties {
            if !allowed.contains(variety) {
                return Err(SelectionError::NotAllowed {
                    size: size.name.clone(),
                    variety: variety.clone(),
                });
            }
        }
        if let Some(excluded) = &size.excluded_varieties {
            if excluded.contains(variety) {
                return Err(SelectionError::Excluded {
                    size: size.name.clone(),
                    variety: variety.clone(),
                });
            }
        }
    }

    Ok(())
}

/// Every selected variety must exist in the catalog
pub fn validate_known_varieties(known: &[String], varieties: &[String]) -> Result<(), SelectionError> {
    match varieties.iter().find(|v| !known.contains(v)) {
        Some(unknown) => Err(SelectionError::UnknownVariety(unknown.clone())),
        None => Ok(()),
    }
}

// ============================================================================
// Stock Validations
// ============================================================================

/// Critical level must sit strictly below the minimum stock
pub fn validate_stock_thresholds(minimum_stock: i64, critical_level: i64) -> Result<(), &'static str> {
    if minimum_stock < 0 || critical_level < 0 {
        return Err("Stock thresholds cannot be negative");
    }
    if critical_level >= minimum_stock {
        return Err("Critical level must be below minimum stock");
    }
    Ok(())
}

/// Expiry must fall after production
pub fn validate_shelf_life(production_date: NaiveDate, expiry_date: NaiveDate) -> Result<(), &'static str> {
    if expiry_date <= production_date {
        return Err("Expiry date must be after production date");
    }
    Ok(())
}

/// Quantities moved in or out of stock must be positive
pub fn validate_stock_quantity(quantity: i64) -> Result<(), &'static str> {
    if quantity <= 0 {
        return Err("Quantity must be positive");
    }
    Ok(())
}

/// Stock on hand can never be negative
pub fn validate_stock_units(units: i64) -> Result<(), &'static str> {
    if units < 0 {
        return Err("Stock units cannot be negative");
    }
    Ok(())
}
