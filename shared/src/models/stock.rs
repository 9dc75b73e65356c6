//! Physical stock models and the stock history ledger

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reference to a physical stock row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum StockRef {
    /// Box units of a packaged size
    Size(Uuid),
    /// Slice units of a variety
    Variety(Uuid),
}

impl StockRef {
    pub fn id(&self) -> Uuid {
        match self {
            StockRef::Size(id) | StockRef::Variety(id) => *id,
        }
    }

    pub fn kind_str(&self) -> &'static str {
        match self {
            StockRef::Size(_) => "size",
            StockRef::Variety(_) => "variety",
        }
    }
}

impl fmt::Display for StockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind_str(), self.id())
    }
}

/// Box stock for a packaged size
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SizeStock {
    pub id: Uuid,
    /// References `SizeConfig::name`
    pub size_name: String,
    pub box_units: i64,
    pub minimum_stock: i64,
    pub critical_level: i64,
    pub last_updated: DateTime<Utc>,
}

impl SizeStock {
    /// Slices represented by the boxes on hand
    pub fn total_slices(&self, slices_per_box: u32) -> i64 {
        self.box_units * i64::from(slices_per_box)
    }

    pub fn level(&self) -> StockLevel {
        StockLevel::classify(self.box_units, self.minimum_stock, self.critical_level)
    }
}

/// Slice stock for a single variety
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VarietyStock {
    pub id: Uuid,
    pub variety_name: String,
    pub slice_units: i64,
    pub minimum_stock: i64,
    pub critical_level: i64,
    pub production_date: NaiveDate,
    pub expiry_date: NaiveDate,
    pub last_updated: DateTime<Utc>,
}

impl VarietyStock {
    pub fn level(&self) -> StockLevel {
        StockLevel::classify(self.slice_units, self.minimum_stock, self.critical_level)
    }

    pub fn is_expired(&self, on: NaiveDate) -> bool {
        self.expiry_date <= on
    }

    pub fn days_until_expiry(&self, on: NaiveDate) -> i64 {
        (self.expiry_date - on).num_days()
    }
}

/// A physical stock row of either tier
#[derive(Debug, Clone, PartialEq)]
pub enum StockRow {
    Size(SizeStock),
    Variety(VarietyStock),
}

impl StockRow {
    pub fn stock_ref(&self) -> StockRef {
        match self {
            StockRow::Size(s) => StockRef::Size(s.id),
            StockRow::Variety(v) => StockRef::Variety(v.id),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            StockRow::Size(s) => &s.size_name,
            StockRow::Variety(v) => &v.variety_name,
        }
    }

    /// Boxes for size rows, slices for variety rows
    pub fn units(&self) -> i64 {
        match self {
            StockRow::Size(s) => s.box_units,
            StockRow::Variety(v) => v.slice_units,
        }
    }

    pub fn set_units(&mut self, units: i64, at: DateTime<Utc>) {
        match self {
            StockRow::Size(s) => {
                s.box_units = units;
                s.last_updated = at;
            }
            StockRow::Variety(v) => {
                v.slice_units = units;
                v.last_updated = at;
            }
        }
    }

    pub fn minimum_stock(&self) -> i64 {
        match self {
            StockRow::Size(s) => s.minimum_stock,
            StockRow::Variety(v) => v.minimum_stock,
        }
    }

    pub fn critical_level(&self) -> i64 {
        match self {
            StockRow::Size(s) => s.critical_level,
            StockRow::Variety(v) => v.critical_level,
        }
    }

    pub fn level(&self) -> StockLevel {
        match self {
            StockRow::Size(s) => s.level(),
            StockRow::Variety(v) => v.level(),
        }
    }
}

/// Stock level relative to the row's thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockLevel {
    Healthy,
    Low,
    Critical,
    OutOfStock,
}

impl StockLevel {
    /// Thresholds are inclusive: a row sitting exactly on a threshold is at that level
    pub fn classify(units: i64, minimum_stock: i64, critical_level: i64) -> Self {
        if units <= 0 {
            StockLevel::OutOfStock
        } else if units <= critical_level {
            StockLevel::Critical
        } else if units <= minimum_stock {
            StockLevel::Low
        } else {
            StockLevel::Healthy
        }
    }

    pub fn needs_alert(&self) -> bool {
        !matches!(self, StockLevel::Healthy)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StockLevel::Healthy => "healthy",
            StockLevel::Low => "low",
            StockLevel::Critical => "critical",
            StockLevel::OutOfStock => "out_of_stock",
        }
    }
}

/// Kind of stock mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryKind {
    In,
    Out,
    Adjustment,
    Deleted,
}

impl HistoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryKind::In => "in",
            HistoryKind::Out => "out",
            HistoryKind::Adjustment => "adjustment",
            HistoryKind::Deleted => "deleted",
        }
    }
}

/// Append-only record of a single stock mutation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StockHistory {
    pub id: Uuid,
    pub stock: StockRef,
    pub stock_name: String,
    pub kind: HistoryKind,
    /// Signed change, in the row's own unit (boxes or slices)
    pub quantity_delta: i64,
    pub previous_value: i64,
    pub new_value: i64,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub remarks: Option<String>,
    pub order_id: Option<Uuid>,
    /// Set when a later correction reversed this entry
    #[serde(default)]
    pub is_deleted: bool,
}

impl StockHistory {
    /// `new = previous + delta`, with a sign matching the kind
    pub fn is_consistent(&self) -> bool {
        if self.previous_value + self.quantity_delta != self.new_value {
            return false;
        }
        match self.kind {
            HistoryKind::In => self.quantity_delta > 0,
            HistoryKind::Out => self.quantity_delta < 0,
            HistoryKind::Adjustment => true,
            HistoryKind::Deleted => self.new_value == 0,
        }
    }
}
