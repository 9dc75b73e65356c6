//! Fixtures shared by the engine integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use bakery_fulfillment::services::{
    CatalogService, NewOrder, NewOrderItem, NewSizeStock, NewVarietyStock, RecordingNotifier,
};
use bakery_fulfillment::store::{DocumentStore, MemoryStore, RetryConfig};
use bakery_fulfillment::FulfillmentEngine;
use chrono::{Duration as Days, FixedOffset, NaiveDate, Utc};
use rust_decimal::Decimal;
use shared::{Order, PaymentMethod, PaymentStatus, SizeConfig, SizeStock, VarietyStock};
use uuid::Uuid;

pub const VARIETIES: [&str; 6] = [
    "Bibingka",
    "Sapin-Sapin",
    "Kutsinta",
    "Puto",
    "Cassava Cake",
    "Ube Halaya",
];

pub fn manila() -> FixedOffset {
    FixedOffset::east_opt(8 * 3600).unwrap()
}

pub fn today() -> NaiveDate {
    Utc::now().with_timezone(&manila()).date_naive()
}

pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 10,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(10),
        backoff_multiplier: 2.0,
    }
}

fn size(name: &str, price: i64, total_slices: u32, min: u32, max: u32) -> SizeConfig {
    SizeConfig {
        id: Uuid::nil(),
        name: name.to_string(),
        price: Decimal::from(price),
        total_slices,
        min_varieties: min,
        max_varieties: max,
        allowed_varieties: None,
        excluded_varieties: None,
        box_price: None,
    }
}

pub fn catalog() -> CatalogService {
    let mut tray = size("Tray", 420, 48, 1, 4);
    tray.box_price = Some(Decimal::from(25));
    let mut half = size("Half Tray", 220, 24, 1, 2);
    half.excluded_varieties = Some(vec!["Ube Halaya".to_string()]);
    let mut slice_box = size("Slice Box", 60, 6, 1, 1);
    slice_box.allowed_varieties = Some(vec!["Bibingka".to_string(), "Cassava Cake".to_string()]);

    CatalogService::new(
        vec![tray, half, slice_box],
        VARIETIES.iter().map(|v| v.to_string()).collect(),
    )
    .unwrap()
}

pub struct TestEngine {
    pub engine: FulfillmentEngine,
    pub store: MemoryStore,
    pub notifier: Arc<RecordingNotifier>,
}

pub fn engine_over(store: Arc<dyn DocumentStore>, retry: RetryConfig, notifier: Arc<RecordingNotifier>) -> FulfillmentEngine {
    FulfillmentEngine::new(store, Arc::new(catalog()), retry, manila(), notifier)
}

pub fn setup() -> TestEngine {
    let store = MemoryStore::new();
    let notifier = Arc::new(RecordingNotifier::new());
    let engine = engine_over(Arc::new(store.clone()), fast_retry(), notifier.clone());
    TestEngine {
        engine,
        store,
        notifier,
    }
}

pub async fn size_stock(engine: &FulfillmentEngine, name: &str, boxes: i64) -> SizeStock {
    engine
        .ledger()
        .create_size_stock(
            NewSizeStock {
                size_name: name.to_string(),
                box_units: boxes,
                minimum_stock: 2,
                critical_level: 1,
            },
            "tester",
        )
        .await
        .unwrap()
}

pub async fn variety_stock(engine: &FulfillmentEngine, name: &str, slices: i64) -> VarietyStock {
    engine
        .ledger()
        .create_variety_stock(
            NewVarietyStock {
                variety_name: name.to_string(),
                slice_units: slices,
                minimum_stock: 20,
                critical_level: 5,
                production_date: today(),
                expiry_date: today() + Days::days(5),
            },
            "tester",
        )
        .await
        .unwrap()
}

pub fn item(size: &str, varieties: &[&str], quantity: u32) -> NewOrderItem {
    NewOrderItem {
        size: size.to_string(),
        varieties: varieties.iter().map(|v| v.to_string()).collect(),
        quantity,
        with_box: false,
    }
}

pub async fn order_for(engine: &FulfillmentEngine, items: Vec<NewOrderItem>, pickup_date: NaiveDate) -> Order {
    engine
        .register_order(NewOrder {
            customer_name: Some("Maria".to_string()),
            items,
            payment_method: PaymentMethod::Cash,
            payment_status: PaymentStatus::Paid,
            pickup_date,
            pickup_time: None,
        })
        .await
        .unwrap()
}

/// Pickup today: the regular flow
pub async fn regular_order(engine: &FulfillmentEngine, items: Vec<NewOrderItem>) -> Order {
    order_for(engine, items, today()).await
}

/// Pickup in two days: the scheduled flow
pub async fn scheduled_order(engine: &FulfillmentEngine, items: Vec<NewOrderItem>) -> Order {
    order_for(engine, items, today() + Days::days(2)).await
}

pub async fn slices(engine: &FulfillmentEngine, variety: &str) -> i64 {
    engine.ledger().variety_stock(variety).await.unwrap().slice_units
}

pub async fn boxes(engine: &FulfillmentEngine, size: &str) -> i64 {
    engine.ledger().size_stock(size).await.unwrap().box_units
}
