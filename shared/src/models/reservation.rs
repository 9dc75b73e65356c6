//! Reservation models for scheduled pickups

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::OrderStatus;

/// A claim on future variety demand. Never subtracted from physical stock.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReservedStock {
    pub id: Uuid,
    pub variety_name: String,
    /// Slices claimed
    pub quantity: i64,
    pub reserved_for_date: NaiveDate,
    pub order_id: Uuid,
    /// Mirrors the owning order's status
    pub order_status: OrderStatus,
    pub pickup_time: Option<NaiveTime>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReservedStock {
    /// Still competing for live stock: the order has not been deducted yet
    pub fn holds_stock(&self) -> bool {
        matches!(
            self.order_status,
            OrderStatus::StockReserved | OrderStatus::PreparingOrder
        )
    }
}
