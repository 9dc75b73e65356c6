//! WebAssembly module for the bakery fulfillment engine
//!
//! Lets the admin UI pre-validate before calling the engine:
//! - Slice allocation for an order line
//! - Variety selection checks against a size
//! - Order status reachability
//! - Scheduled pickup detection

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use wasm_bindgen::prelude::*;

// Re-export shared types for use in JavaScript
pub use shared::models::*;
pub use shared::types::*;
pub use shared::validation::*;

/// Per-variety slice demand as a JSON object
#[wasm_bindgen]
pub fn allocate_slices(size_json: &str, varieties_json: &str, quantity: u32) -> Result<String, JsValue> {
    allocation_json(size_json, varieties_json, quantity).map_err(|e| JsValue::from_str(&e))
}

/// `None` when the selection fits the size, otherwise the reason it does not
#[wasm_bindgen]
pub fn check_variety_selection(size_json: &str, varieties_json: &str) -> Option<String> {
    let size: SizeConfig = match serde_json::from_str(size_json) {
        Ok(size) => size,
        Err(e) => return Some(format!("Invalid size JSON: {}", e)),
    };
    let varieties: Vec<String> = match serde_json::from_str(varieties_json) {
        Ok(varieties) => varieties,
        Err(e) => return Some(format!("Invalid varieties JSON: {}", e)),
    };
    validate_variety_selection(&size, &varieties).err().map(|e| e.to_string())
}

/// Whether `from -> to` is a legal single step
#[wasm_bindgen]
pub fn can_transition(from: &str, to: &str, is_scheduled: bool) -> bool {
    match (OrderStatus::from_str(from), OrderStatus::from_str(to)) {
        (Some(from), Some(to)) => from.can_transition_to(to, is_scheduled),
        _ => false,
    }
}

/// Statuses reachable from `from` as a JSON array of status codes
#[wasm_bindgen]
pub fn next_statuses(from: &str, is_scheduled: bool) -> String {
    let codes: Vec<&str> = OrderStatus::from_str(from)
        .map(|status| status.next_statuses(is_scheduled).iter().map(|s| s.as_str()).collect())
        .unwrap_or_default();
    serde_json::to_string(&codes).unwrap_or_else(|_| "[]".to_string())
}

/// Whether an order placed at `created_at` (RFC 3339) for `pickup_date`
/// (YYYY-MM-DD) follows the scheduled flow
#[wasm_bindgen]
pub fn is_scheduled(created_at: &str, pickup_date: &str, utc_offset_minutes: i32) -> Result<bool, JsValue> {
    scheduled(created_at, pickup_date, utc_offset_minutes).map_err(|e| JsValue::from_str(&e))
}

/// Stock level label for a row's units and thresholds
#[wasm_bindgen]
pub fn stock_level(units: i64, minimum_stock: i64, critical_level: i64) -> String {
    StockLevel::classify(units, minimum_stock, critical_level)
        .as_str()
        .to_string()
}

fn allocation_json(size_json: &str, varieties_json: &str, quantity: u32) -> Result<String, String> {
    let size: SizeConfig =
        serde_json::from_str(size_json).map_err(|e| format!("Invalid size JSON: {}", e))?;
    let varieties: Vec<String> =
        serde_json::from_str(varieties_json).map_err(|e| format!("Invalid varieties JSON: {}", e))?;

    let allocation = shared::allocate(&size, &varieties, quantity).map_err(|e| e.to_string())?;
    serde_json::to_string(&allocation).map_err(|e| e.to_string())
}

fn scheduled(created_at: &str, pickup_date: &str, utc_offset_minutes: i32) -> Result<bool, String> {
    let created_at = DateTime::parse_from_rfc3339(created_at)
        .map_err(|e| format!("Invalid created_at: {}", e))?
        .with_timezone(&Utc);
    let pickup_date = NaiveDate::parse_from_str(pickup_date, "%Y-%m-%d")
        .map_err(|e| format!("Invalid pickup_date: {}", e))?;
    let offset = FixedOffset::east_opt(utc_offset_minutes * 60)
        .ok_or_else(|| "UTC offset out of range".to_string())?;

    Ok(is_scheduled_pickup(created_at, pickup_date, offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRAY: &str = r#"{
        "name": "Tray",
        "price": "420.00",
        "total_slices": 48,
        "min_varieties": 1,
        "max_varieties": 4
    }"#;

    #[test]
    fn test_allocation_json() {
        let json = allocation_json(TRAY, r#"["Bibingka","Sapin-Sapin"]"#, 2).unwrap();
        let allocation: std::collections::BTreeMap<String, i64> = serde_json::from_str(&json).unwrap();
        assert_eq!(allocation["Bibingka"], 48);
        assert_eq!(allocation["Sapin-Sapin"], 48);
    }

    #[test]
    fn test_allocation_rejects_zero_quantity() {
        assert!(allocation_json(TRAY, r#"["Bibingka"]"#, 0).is_err());
    }

    #[test]
    fn test_check_variety_selection() {
        assert_eq!(check_variety_selection(TRAY, r#"["Bibingka"]"#), None);
        assert!(check_variety_selection(TRAY, "[]").is_some());
        assert!(check_variety_selection(TRAY, r#"["Puto","Puto"]"#).is_some());
    }

    #[test]
    fn test_can_transition() {
        assert!(can_transition("order_confirmed", "stock_reserved", true));
        assert!(!can_transition("order_confirmed", "stock_reserved", false));
        assert!(!can_transition("completed", "preparing_order", false));
        assert!(!can_transition("bogus", "completed", false));
    }

    #[test]
    fn test_next_statuses() {
        assert_eq!(
            next_statuses("order_confirmed", false),
            r#"["preparing_order","cancelled"]"#
        );
        assert_eq!(next_statuses("completed", true), "[]");
    }

    #[test]
    fn test_scheduled_in_local_time() {
        assert_eq!(scheduled("2024-12-23T17:00:00Z", "2024-12-24", 480), Ok(false));
        assert_eq!(scheduled("2024-12-23T17:00:00Z", "2024-12-24", 0), Ok(true));
        assert!(scheduled("not a date", "2024-12-24", 480).is_err());
    }

    #[test]
    fn test_stock_level() {
        assert_eq!(stock_level(0, 20, 5), "out_of_stock");
        assert_eq!(stock_level(50, 20, 5), "healthy");
    }
}
