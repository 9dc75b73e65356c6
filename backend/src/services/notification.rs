//! Low-stock signalling
//!
//! The ledger reports rows that fall to or below their thresholds once a
//! mutation has committed. Delivery is up to the notifier; the default one
//! only logs.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::{StockLevel, StockRef, StockRow};

/// A stock row sitting at or below one of its thresholds
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StockAlert {
    pub stock: StockRef,
    pub name: String,
    pub level: StockLevel,
    pub units: i64,
    pub minimum_stock: i64,
    pub critical_level: i64,
    pub raised_at: DateTime<Utc>,
}

impl StockAlert {
    /// `None` when the row is healthy
    pub fn for_row(row: &StockRow, raised_at: DateTime<Utc>) -> Option<Self> {
        let level = row.level();
        if !level.needs_alert() {
            return None;
        }
        Some(Self {
            stock: row.stock_ref(),
            name: row.name().to_string(),
            level,
            units: row.units(),
            minimum_stock: row.minimum_stock(),
            critical_level: row.critical_level(),
            raised_at,
        })
    }
}

/// Receives alerts after the mutation that caused them has committed
pub trait StockAlertNotifier: Send + Sync {
    fn notify(&self, alert: &StockAlert);
}

/// Writes alerts to the log
#[derive(Debug, Clone, Default)]
pub struct TracingNotifier;

impl StockAlertNotifier for TracingNotifier {
    fn notify(&self, alert: &StockAlert) {
        tracing::warn!(
            stock = %alert.stock,
            name = %alert.name,
            level = alert.level.as_str(),
            units = alert.units,
            minimum_stock = alert.minimum_stock,
            critical_level = alert.critical_level,
            "Stock below threshold"
        );
    }
}

/// Keeps every alert it receives
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    alerts: Mutex<Vec<StockAlert>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<StockAlert> {
        self.alerts.lock().map(|a| a.clone()).unwrap_or_default()
    }
}

impl StockAlertNotifier for RecordingNotifier {
    fn notify(&self, alert: &StockAlert) {
        if let Ok(mut alerts) = self.alerts.lock() {
            alerts.push(alert.clone());
        }
    }
}
