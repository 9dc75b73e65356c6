//! Order models and the order status workflow

use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::StockRef;

/// Order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    OrderConfirmed,
    /// Only reachable by scheduled orders
    StockReserved,
    PreparingOrder,
    ReadyForPickup,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::OrderConfirmed => "order_confirmed",
            OrderStatus::StockReserved => "stock_reserved",
            OrderStatus::PreparingOrder => "preparing_order",
            OrderStatus::ReadyForPickup => "ready_for_pickup",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "order_confirmed" => Some(OrderStatus::OrderConfirmed),
            "stock_reserved" => Some(OrderStatus::StockReserved),
            "preparing_order" => Some(OrderStatus::PreparingOrder),
            "ready_for_pickup" => Some(OrderStatus::ReadyForPickup),
            "completed" => Some(OrderStatus::Completed),
            "cancelled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    /// Statuses reachable in one step from `self`
    pub fn next_statuses(&self, is_scheduled: bool) -> &'static [OrderStatus] {
        use OrderStatus::*;

        if is_scheduled {
            match self {
                OrderConfirmed => &[StockReserved, Cancelled],
                StockReserved => &[PreparingOrder, Cancelled],
                PreparingOrder => &[ReadyForPickup, Cancelled],
                ReadyForPickup => &[Completed, Cancelled],
                Completed | Cancelled => &[],
            }
        } else {
            match self {
                OrderConfirmed => &[PreparingOrder, Cancelled],
                PreparingOrder => &[ReadyForPickup, Cancelled],
                ReadyForPickup => &[Completed, Cancelled],
                // Regular orders never hold reservations
                StockReserved => &[],
                Completed | Cancelled => &[],
            }
        }
    }

    pub fn can_transition_to(&self, target: OrderStatus, is_scheduled: bool) -> bool {
        self.next_statuses(is_scheduled).contains(&target)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OrderStatus::OrderConfirmed => "Order Confirmed",
            OrderStatus::StockReserved => "Stock Reserved",
            OrderStatus::PreparingOrder => "Preparing Order",
            OrderStatus::ReadyForPickup => "Ready for Pickup",
            OrderStatus::Completed => "Completed",
            OrderStatus::Cancelled => "Cancelled",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    EWallet,
    BankTransfer,
    Card,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::EWallet => "e_wallet",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Card => "card",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Refunded,
}

/// One line of an order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
pub struct OrderItem {
    #[validate(length(min = 1))]
    pub size: String,
    #[validate(length(min = 1))]
    pub varieties: Vec<String>,
    #[validate(range(min = 1))]
    pub quantity: u32,
    pub unit_price: Decimal,
}

impl OrderItem {
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// A committed status change
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusChange {
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub at: DateTime<Utc>,
}

/// Amount taken from one stock row when an order became ready for pickup
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StockMovement {
    pub stock: StockRef,
    pub amount: i64,
}

/// A customer order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: Uuid,
    pub customer_name: Option<String>,
    pub items: Vec<OrderItem>,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub total_amount: Decimal,
    pub pickup_date: NaiveDate,
    pub pickup_time: Option<NaiveTime>,
    #[serde(default)]
    pub reserved_stock_ids: Vec<Uuid>,
    #[serde(default)]
    pub deducted_stock: Vec<StockMovement>,
    /// The "out" history entries written by the deduction, for compensation
    #[serde(default)]
    pub deduction_entries: Vec<Uuid>,
    #[serde(default)]
    pub status_history: Vec<StatusChange>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Pickup falls on a later calendar day than the one the order was placed on
    pub fn is_scheduled(&self, offset: FixedOffset) -> bool {
        is_scheduled_pickup(self.created_at, self.pickup_date, offset)
    }

    pub fn items_count(&self) -> u64 {
        self.items.iter().map(|i| u64::from(i.quantity)).sum()
    }

    pub fn compute_total(&self) -> Decimal {
        self.items.iter().map(OrderItem::line_total).sum()
    }
}

/// Calendar days are taken in the bakery's local offset
pub fn is_scheduled_pickup(
    created_at: DateTime<Utc>,
    pickup_date: NaiveDate,
    offset: FixedOffset,
) -> bool {
    pickup_date > created_at.with_timezone(&offset).date_naive()
}
