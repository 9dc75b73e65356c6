//! Stock ledger tests
//!
//! Tests for stock row creation, all-or-nothing deduction, manual
//! adjustments, history reversal, removal and threshold alerts.

mod common;

use bakery_fulfillment::services::{NewSizeStock, NewVarietyStock};
use bakery_fulfillment::AppError;
use chrono::{Duration, NaiveDate, TimeZone, Utc};
use common::*;
use shared::{DateRange, HistoryKind, StockHistory, StockLevel, StockMovement, StockRef};
use uuid::Uuid;

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    /// Test a deduction that fails on one row leaves every row untouched
    #[tokio::test]
    async fn test_deduct_all_or_nothing() {
        let t = setup();
        let bibingka = variety_stock(&t.engine, "Bibingka", 100).await;
        let puto = variety_stock(&t.engine, "Puto", 10).await;

        let result = t
            .engine
            .ledger()
            .deduct(
                vec![
                    StockMovement {
                        stock: StockRef::Variety(bibingka.id),
                        amount: 30,
                    },
                    StockMovement {
                        stock: StockRef::Variety(puto.id),
                        amount: 11,
                    },
                ],
                "tester",
            )
            .await;

        match result {
            Err(AppError::InsufficientStock {
                stock,
                required,
                available,
                ..
            }) => {
                assert_eq!(stock, StockRef::Variety(puto.id));
                assert_eq!(required, 11);
                assert_eq!(available, 10);
            }
            other => panic!("expected insufficient stock, got {:?}", other),
        }
        assert_eq!(slices(&t.engine, "Bibingka").await, 100);
        assert_eq!(slices(&t.engine, "Puto").await, 10);

        let outs = t
            .engine
            .stock_history(StockRef::Variety(bibingka.id), true)
            .await
            .unwrap()
            .into_iter()
            .filter(|h| h.kind == HistoryKind::Out)
            .count();
        assert_eq!(outs, 0);
    }

    /// Test repeated movements against one row are summed before checking
    #[tokio::test]
    async fn test_deduct_merges_rows() {
        let t = setup();
        let puto = variety_stock(&t.engine, "Puto", 10).await;
        let movement = StockMovement {
            stock: StockRef::Variety(puto.id),
            amount: 6,
        };

        let result = t
            .engine
            .ledger()
            .deduct(vec![movement.clone(), movement.clone()], "tester")
            .await;
        assert!(matches!(result, Err(AppError::InsufficientStock { required: 12, .. })));

        let history = t.engine.ledger().deduct(vec![movement], "tester").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].previous_value, 10);
        assert_eq!(history[0].new_value, 4);
        assert!(history[0].is_consistent());
    }

    /// Test empty and non-positive deductions are rejected
    #[tokio::test]
    async fn test_deduct_validation() {
        let t = setup();
        let puto = variety_stock(&t.engine, "Puto", 10).await;

        assert!(matches!(
            t.engine.ledger().deduct(Vec::new(), "tester").await,
            Err(AppError::Validation { .. })
        ));
        assert!(matches!(
            t.engine
                .ledger()
                .deduct(
                    vec![StockMovement {
                        stock: StockRef::Variety(puto.id),
                        amount: 0,
                    }],
                    "tester"
                )
                .await,
            Err(AppError::Validation { .. })
        ));
    }

    /// Test creation rejects duplicates, unknown sizes and bad thresholds
    #[tokio::test]
    async fn test_create_stock_validation() {
        let t = setup();
        size_stock(&t.engine, "Tray", 3).await;

        let duplicate = t
            .engine
            .ledger()
            .create_size_stock(
                NewSizeStock {
                    size_name: "Tray".to_string(),
                    box_units: 1,
                    minimum_stock: 2,
                    critical_level: 1,
                },
                "tester",
            )
            .await;
        assert!(matches!(duplicate, Err(AppError::DuplicateEntry(_))));

        let unknown = t
            .engine
            .ledger()
            .create_size_stock(
                NewSizeStock {
                    size_name: "Party Platter".to_string(),
                    box_units: 1,
                    minimum_stock: 2,
                    critical_level: 1,
                },
                "tester",
            )
            .await;
        assert!(matches!(unknown, Err(AppError::NotFound(_))));

        let thresholds = t
            .engine
            .ledger()
            .create_variety_stock(
                NewVarietyStock {
                    variety_name: "Puto".to_string(),
                    slice_units: 10,
                    minimum_stock: 5,
                    critical_level: 10,
                    production_date: today(),
                    expiry_date: today() + Duration::days(2),
                },
                "tester",
            )
            .await;
        assert!(matches!(thresholds, Err(AppError::Validation { .. })));

        let shelf_life = t
            .engine
            .ledger()
            .create_variety_stock(
                NewVarietyStock {
                    variety_name: "Puto".to_string(),
                    slice_units: 10,
                    minimum_stock: 5,
                    critical_level: 1,
                    production_date: today(),
                    expiry_date: today() - Duration::days(1),
                },
                "tester",
            )
            .await;
        assert!(matches!(shelf_life, Err(AppError::Validation { .. })));
    }

    /// Test initial units are recorded as an intake entry
    #[tokio::test]
    async fn test_create_records_initial_intake() {
        let t = setup();
        let stock = variety_stock(&t.engine, "Kutsinta", 40).await;

        let history = t
            .engine
            .stock_history(StockRef::Variety(stock.id), false)
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind, HistoryKind::In);
        assert_eq!(history[0].quantity_delta, 40);
        assert_eq!(history[0].previous_value, 0);
        assert_eq!(history[0].actor, "tester");
    }

    /// Test adjustments need a reason and cannot go negative
    #[tokio::test]
    async fn test_adjust() {
        let t = setup();
        let stock = variety_stock(&t.engine, "Puto", 30).await;
        let stock = StockRef::Variety(stock.id);

        let entry = t
            .engine
            .ledger()
            .adjust(stock, -4, "Dropped tray", "tester")
            .await
            .unwrap();
        assert_eq!(entry.kind, HistoryKind::Adjustment);
        assert_eq!(entry.new_value, 26);
        assert_eq!(entry.remarks.as_deref(), Some("Dropped tray"));

        assert!(matches!(
            t.engine.ledger().adjust(stock, -4, "  ", "tester").await,
            Err(AppError::Validation { .. })
        ));
        assert!(matches!(
            t.engine.ledger().adjust(stock, 0, "Nothing", "tester").await,
            Err(AppError::Validation { .. })
        ));
        assert!(matches!(
            t.engine.ledger().adjust(stock, -27, "Too much", "tester").await,
            Err(AppError::InsufficientStock { available: 26, .. })
        ));
        assert_eq!(slices(&t.engine, "Puto").await, 26);
    }

    /// Test intake adds units and records the remarks
    #[tokio::test]
    async fn test_intake() {
        let t = setup();
        let stock = size_stock(&t.engine, "Half Tray", 2).await;

        let entry = t
            .engine
            .ledger()
            .intake(StockRef::Size(stock.id), 5, "baker", Some("Morning delivery".to_string()))
            .await
            .unwrap();
        assert_eq!(entry.kind, HistoryKind::In);
        assert_eq!(entry.previous_value, 2);
        assert_eq!(entry.new_value, 7);
        assert_eq!(boxes(&t.engine, "Half Tray").await, 7);

        assert!(matches!(
            t.engine
                .ledger()
                .intake(StockRef::Size(stock.id), -1, "baker", None)
                .await,
            Err(AppError::Validation { .. })
        ));
    }

    /// Test reversing an entry restores units and hides the original
    #[tokio::test]
    async fn test_reverse_entry() {
        let t = setup();
        let stock = variety_stock(&t.engine, "Puto", 30).await;
        let stock = StockRef::Variety(stock.id);
        let intake = t.engine.ledger().intake(stock, 12, "baker", None).await.unwrap();
        assert_eq!(slices(&t.engine, "Puto").await, 42);

        let reversal = t
            .engine
            .ledger()
            .reverse_entry(intake.id, "manager", None)
            .await
            .unwrap();
        assert_eq!(reversal.kind, HistoryKind::Adjustment);
        assert_eq!(reversal.quantity_delta, -12);
        assert_eq!(slices(&t.engine, "Puto").await, 30);

        let visible = t.engine.stock_history(stock, false).await.unwrap();
        assert!(visible.iter().all(|h| h.id != intake.id));
        let everything = t.engine.stock_history(stock, true).await.unwrap();
        let original = everything.iter().find(|h| h.id == intake.id).unwrap();
        assert!(original.is_deleted);
        assert_eq!(original.quantity_delta, 12);

        assert!(matches!(
            t.engine.ledger().reverse_entry(intake.id, "manager", None).await,
            Err(AppError::Validation { .. })
        ));
    }

    /// Test history is returned newest first
    #[tokio::test]
    async fn test_history_newest_first() {
        let t = setup();
        let stock = variety_stock(&t.engine, "Puto", 30).await;
        let stock = StockRef::Variety(stock.id);
        t.engine.ledger().intake(stock, 1, "baker", None).await.unwrap();
        t.engine.ledger().intake(stock, 2, "baker", None).await.unwrap();

        let history = t.engine.stock_history(stock, false).await.unwrap();
        assert_eq!(history.len(), 3);
        assert!(history.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
        assert_eq!(history[0].new_value, 33);
    }

    /// Test history ranges follow the bakery's local days, not UTC days
    #[tokio::test]
    async fn test_history_between_uses_local_days() {
        let t = setup();
        let stock = variety_stock(&t.engine, "Puto", 30).await;
        // 04:00 on Christmas morning in Manila
        let entry = StockHistory {
            id: Uuid::new_v4(),
            stock: StockRef::Variety(stock.id),
            stock_name: "Puto".to_string(),
            kind: HistoryKind::In,
            quantity_delta: 6,
            previous_value: 30,
            new_value: 36,
            timestamp: Utc.with_ymd_and_hms(2024, 12, 24, 20, 0, 0).unwrap(),
            actor: "baker".to_string(),
            remarks: None,
            order_id: None,
            is_deleted: false,
        };
        bakery_fulfillment::store::save(&t.store, &entry).await.unwrap();

        let christmas = NaiveDate::from_ymd_opt(2024, 12, 25).unwrap();
        let on_the_day = t.engine.history_between(DateRange::single(christmas)).await.unwrap();
        assert_eq!(on_the_day.len(), 1);
        assert_eq!(on_the_day[0].id, entry.id);

        let eve = t
            .engine
            .history_between(DateRange::single(christmas - Duration::days(1)))
            .await
            .unwrap();
        assert!(eve.is_empty());

        // Midnight in Manila opens the 26th
        let late = StockHistory {
            id: Uuid::new_v4(),
            timestamp: Utc.with_ymd_and_hms(2024, 12, 25, 16, 0, 0).unwrap(),
            ..entry.clone()
        };
        bakery_fulfillment::store::save(&t.store, &late).await.unwrap();
        let on_the_day = t.engine.history_between(DateRange::single(christmas)).await.unwrap();
        assert_eq!(on_the_day.len(), 1);
        let both = t
            .engine
            .history_between(DateRange::new(christmas, christmas + Duration::days(1)).unwrap())
            .await
            .unwrap();
        assert_eq!(both.len(), 2);
        assert_eq!(both[0].id, late.id);
    }

    /// Test removing a row records what it held
    #[tokio::test]
    async fn test_remove_stock() {
        let t = setup();
        let stock = variety_stock(&t.engine, "Ube Halaya", 15).await;
        let stock = StockRef::Variety(stock.id);

        let entry = t
            .engine
            .ledger()
            .remove_stock(stock, "manager", Some("Spoiled".to_string()))
            .await
            .unwrap();
        assert_eq!(entry.kind, HistoryKind::Deleted);
        assert_eq!(entry.quantity_delta, -15);
        assert_eq!(entry.new_value, 0);

        assert!(matches!(
            t.engine.ledger().variety_stock("Ube Halaya").await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            t.engine.ledger().reverse_entry(entry.id, "manager", None).await,
            Err(AppError::Validation { .. })
        ));
    }

    /// Test alerts fire once stock drops to a threshold
    #[tokio::test]
    async fn test_low_stock_alerts() {
        let t = setup();
        let stock = variety_stock(&t.engine, "Puto", 30).await;
        let stock = StockRef::Variety(stock.id);
        assert!(t.notifier.alerts().is_empty());

        t.engine
            .ledger()
            .deduct(vec![StockMovement { stock, amount: 12 }], "tester")
            .await
            .unwrap();
        let alerts = t.notifier.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, StockLevel::Low);
        assert_eq!(alerts[0].units, 18);

        t.engine
            .ledger()
            .deduct(vec![StockMovement { stock, amount: 18 }], "tester")
            .await
            .unwrap();
        let alerts = t.notifier.alerts();
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[1].level, StockLevel::OutOfStock);
    }

    /// Test the level report covers both row kinds
    #[tokio::test]
    async fn test_stock_levels_report() {
        let t = setup();
        size_stock(&t.engine, "Tray", 1).await;
        variety_stock(&t.engine, "Bibingka", 100).await;

        let report = t.engine.stock_levels().await.unwrap();
        assert_eq!(report.len(), 2);
        let tray = report.iter().find(|r| r.name == "Tray").unwrap();
        assert_eq!(tray.level, StockLevel::Critical);
        let bibingka = report.iter().find(|r| r.name == "Bibingka").unwrap();
        assert_eq!(bibingka.level, StockLevel::Healthy);
    }

    /// Test expiring varieties are listed soonest first
    #[tokio::test]
    async fn test_expiring_varieties() {
        let t = setup();
        variety_stock(&t.engine, "Bibingka", 100).await;

        let soon = t.engine.ledger().expiring_varieties(today(), 5).await.unwrap();
        assert_eq!(soon.len(), 1);
        let none = t.engine.ledger().expiring_varieties(today(), 1).await.unwrap();
        assert!(none.is_empty());
        assert!(t.engine.ledger().expiring_varieties(today(), -1).await.is_err());
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// Stock never goes negative and a failed deduction changes nothing
        #[test]
        fn prop_deduction_never_goes_negative(
            initial in 0i64..200,
            amounts in prop::collection::vec(1i64..60, 1..8)
        ) {
            tokio_test::block_on(async {
                let t = setup();
                let stock = variety_stock(&t.engine, "Puto", initial).await;
                let stock = StockRef::Variety(stock.id);
                let mut expected = initial;

                for amount in amounts {
                    let result = t
                        .engine
                        .ledger()
                        .deduct(vec![StockMovement { stock, amount }], "tester")
                        .await;
                    if amount <= expected {
                        prop_assert!(result.is_ok());
                        expected -= amount;
                    } else {
                        let is_insufficient = matches!(result, Err(AppError::InsufficientStock { .. }));
                        prop_assert!(is_insufficient);
                    }
                    prop_assert_eq!(slices(&t.engine, "Puto").await, expected);
                }

                let history = t.engine.stock_history(stock, false).await.unwrap();
                prop_assert!(history.iter().all(|h| h.is_consistent() && h.new_value >= 0));
                Ok(())
            })?;
        }
    }
}
