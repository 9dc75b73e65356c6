//! Slice allocation: turn a size, its varieties and a box count into
//! per-variety slice demand.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::models::SizeConfig;
use crate::validation::{validate_variety_selection, SelectionError};

/// Slices demanded per variety name
pub type SliceAllocation = BTreeMap<String, i64>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocationError {
    #[error("Quantity must be at least 1")]
    InvalidQuantity,

    #[error(transparent)]
    Selection(#[from] SelectionError),
}

/// Split `size.total_slices * quantity` evenly across `varieties`.
///
/// Each variety gets `total / n`; the remainder is handed out one slice at a
/// time to the first varieties in the order listed, so the allocation always
/// sums to the total.
pub fn allocate(
    size: &SizeConfig,
    varieties: &[String],
    quantity: u32,
) -> Result<SliceAllocation, AllocationError> {
    if quantity == 0 {
        return Err(AllocationError::InvalidQuantity);
    }
    validate_variety_selection(size, varieties)?;

    let total = i64::from(size.total_slices) * i64::from(quantity);
    let count = varieties.len() as i64;
    let per_variety = total / count;
    let remainder = total % count;

    Ok(varieties
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let extra = if (idx as i64) < remainder { 1 } else { 0 };
            (name.clone(), per_variety + extra)
        })
        .collect())
}

/// Add one allocation into a running per-variety demand
pub fn merge_demand(demand: &mut SliceAllocation, allocation: &SliceAllocation) {
    for (variety, slices) in allocation {
        *demand.entry(variety.clone()).or_insert(0) += slices;
    }
}

pub fn total_slices(allocation: &SliceAllocation) -> i64 {
    allocation.values().sum()
}
