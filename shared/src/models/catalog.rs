//! Product catalog models

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// A packaged product tier (Tray, Half Tray, ...) with its variety rules
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
#[validate(schema(function = "validate_size_constraints"))]
pub struct SizeConfig {
    /// Left nil in configuration files; the catalog assigns a stable id
    #[serde(default)]
    pub id: Uuid,
    #[validate(length(min = 1, max = 64))]
    pub name: String,
    pub price: Decimal,
    /// Slices contained in one box of this size
    #[validate(range(min = 1))]
    pub total_slices: u32,
    #[validate(range(min = 1))]
    pub min_varieties: u32,
    pub max_varieties: u32,
    #[serde(default)]
    pub allowed_varieties: Option<Vec<String>>,
    #[serde(default)]
    pub excluded_varieties: Option<Vec<String>>,
    /// Extra charge when the order asks for a box
    #[serde(default)]
    pub box_price: Option<Decimal>,
}

impl SizeConfig {
    /// Deterministic id derived from the size name
    pub fn stable_id(name: &str) -> Uuid {
        Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("size:{}", name).as_bytes())
    }

    /// Unit price for one box of this size
    pub fn unit_price(&self, with_box: bool) -> Decimal {
        match (with_box, self.box_price) {
            (true, Some(box_price)) => self.price + box_price,
            _ => self.price,
        }
    }

    /// Whether a variety passes the allowed/excluded sets
    pub fn permits(&self, variety: &str) -> bool {
        if let Some(allowed) = &self.allowed_varieties {
            return allowed.iter().any(|v| v == variety);
        }
        if let Some(excluded) = &self.excluded_varieties {
            return !excluded.iter().any(|v| v == variety);
        }
        true
    }
}

fn validate_size_constraints(size: &SizeConfig) -> Result<(), ValidationError> {
    if size.max_varieties < size.min_varieties {
        return Err(ValidationError::new("max_varieties_below_min"));
    }
    // Every selected variety must receive at least one slice
    if size.total_slices < size.max_varieties {
        return Err(ValidationError::new("fewer_slices_than_varieties"));
    }
    if size.allowed_varieties.is_some() && size.excluded_varieties.is_some() {
        return Err(ValidationError::new("allowed_and_excluded_both_set"));
    }
    if size.price.is_sign_negative() {
        return Err(ValidationError::new("negative_price"));
    }
    if size.box_price.map_or(false, |p| p.is_sign_negative()) {
        return Err(ValidationError::new("negative_box_price"));
    }
    Ok(())
}
