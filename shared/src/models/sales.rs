//! Sales aggregate models

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Order;

/// Bucket a sales summary covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SalesPeriod {
    Total,
    Day { date: NaiveDate },
    Month { year: i32, month: u32 },
}

impl SalesPeriod {
    pub fn key(&self) -> String {
        match self {
            SalesPeriod::Total => "total".to_string(),
            SalesPeriod::Day { date } => format!("day:{}", date.format("%Y-%m-%d")),
            SalesPeriod::Month { year, month } => format!("month:{:04}-{:02}", year, month),
        }
    }

    /// Summary documents are addressed by their period key
    pub fn summary_id(&self) -> Uuid {
        Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("sales:{}", self.key()).as_bytes())
    }

    /// Every bucket a completion on `date` contributes to
    pub fn for_completion(date: NaiveDate) -> [SalesPeriod; 3] {
        [
            SalesPeriod::Total,
            SalesPeriod::Day { date },
            SalesPeriod::Month {
                year: date.year(),
                month: date.month(),
            },
        ]
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SizeSales {
    pub quantity: u64,
    pub revenue: Decimal,
}

/// Running sales aggregate for one period
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SalesSummary {
    pub id: Uuid,
    pub period: SalesPeriod,
    pub total_revenue: Decimal,
    pub order_count: u64,
    pub items_sold: u64,
    #[serde(default)]
    pub by_size: BTreeMap<String, SizeSales>,
    #[serde(default)]
    pub by_payment_method: BTreeMap<String, Decimal>,
    pub last_updated: DateTime<Utc>,
}

impl SalesSummary {
    pub fn empty(period: SalesPeriod, at: DateTime<Utc>) -> Self {
        Self {
            id: period.summary_id(),
            period,
            total_revenue: Decimal::ZERO,
            order_count: 0,
            items_sold: 0,
            by_size: BTreeMap::new(),
            by_payment_method: BTreeMap::new(),
            last_updated: at,
        }
    }

    /// Fold a completed order into the aggregate
    pub fn record(&mut self, order: &Order, at: DateTime<Utc>) {
        self.total_revenue += order.total_amount;
        self.order_count += 1;
        self.items_sold += order.items_count();

        for item in &order.items {
            let entry = self.by_size.entry(item.size.clone()).or_default();
            entry.quantity += u64::from(item.quantity);
            entry.revenue += item.line_total();
        }

        *self
            .by_payment_method
            .entry(order.payment_method.as_str().to_string())
            .or_insert(Decimal::ZERO) += order.total_amount;

        self.last_updated = at;
    }
}
