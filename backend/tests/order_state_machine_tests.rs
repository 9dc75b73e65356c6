//! Order state machine tests
//!
//! Covers the regular and scheduled flows, rejected transitions, terminal
//! statuses, the ready-for-pickup deduction and cancellation restock.

mod common;

use bakery_fulfillment::AppError;
use common::*;
use rust_decimal::Decimal;
use shared::{HistoryKind, OrderStatus, SalesPeriod, StockRef};
use uuid::Uuid;

/// The live "out" entry the order's deduction wrote against `stock`
async fn out_entry(t: &TestEngine, stock: StockRef, order_id: Uuid) -> shared::StockHistory {
    t.engine
        .stock_history(stock, false)
        .await
        .unwrap()
        .into_iter()
        .find(|h| h.kind == HistoryKind::Out && h.order_id == Some(order_id))
        .unwrap()
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    /// Test the full regular flow records every step
    #[tokio::test]
    async fn test_regular_flow_to_completion() {
        let t = setup();
        size_stock(&t.engine, "Tray", 10).await;
        variety_stock(&t.engine, "Bibingka", 100).await;
        let order = regular_order(&t.engine, vec![item("Tray", &["Bibingka"], 1)]).await;
        assert_eq!(order.status, OrderStatus::OrderConfirmed);
        assert_eq!(order.total_amount, Decimal::from(420));

        for status in [
            OrderStatus::PreparingOrder,
            OrderStatus::ReadyForPickup,
            OrderStatus::Completed,
        ] {
            let updated = t.engine.transition_order_status(order.id, status).await.unwrap();
            assert_eq!(updated.status, status);
        }

        let history = t.engine.status_history(order.id).await.unwrap();
        let steps: Vec<_> = history.iter().map(|c| (c.from, c.to)).collect();
        assert_eq!(
            steps,
            vec![
                (OrderStatus::OrderConfirmed, OrderStatus::PreparingOrder),
                (OrderStatus::PreparingOrder, OrderStatus::ReadyForPickup),
                (OrderStatus::ReadyForPickup, OrderStatus::Completed),
            ]
        );

        let completed = t.engine.order(order.id).await.unwrap();
        assert!(completed.completed_at.is_some());
        assert!(completed.cancelled_at.is_none());
    }

    /// Test terminal orders reject any further transition
    #[tokio::test]
    async fn test_completed_order_rejects_preparing() {
        let t = setup();
        size_stock(&t.engine, "Tray", 10).await;
        variety_stock(&t.engine, "Bibingka", 100).await;
        let order = regular_order(&t.engine, vec![item("Tray", &["Bibingka"], 1)]).await;
        for status in [
            OrderStatus::PreparingOrder,
            OrderStatus::ReadyForPickup,
            OrderStatus::Completed,
        ] {
            t.engine.transition_order_status(order.id, status).await.unwrap();
        }

        let result = t
            .engine
            .transition_order_status(order.id, OrderStatus::PreparingOrder)
            .await;
        assert!(matches!(
            result,
            Err(AppError::InvalidStateTransition {
                from: OrderStatus::Completed,
                to: OrderStatus::PreparingOrder,
                ..
            })
        ));
    }

    /// Test regular orders cannot enter StockReserved
    #[tokio::test]
    async fn test_regular_order_cannot_reserve() {
        let t = setup();
        variety_stock(&t.engine, "Bibingka", 100).await;
        let order = regular_order(&t.engine, vec![item("Tray", &["Bibingka"], 1)]).await;

        let result = t
            .engine
            .transition_order_status(order.id, OrderStatus::StockReserved)
            .await;
        assert!(matches!(result, Err(AppError::InvalidStateTransition { .. })));
        assert!(t.engine.reservations().list_for_order(order.id).await.unwrap().is_empty());
    }

    /// Test scheduled orders must reserve before preparing
    #[tokio::test]
    async fn test_scheduled_order_must_reserve_first() {
        let t = setup();
        variety_stock(&t.engine, "Bibingka", 100).await;
        let order = scheduled_order(&t.engine, vec![item("Tray", &["Bibingka"], 1)]).await;

        let result = t
            .engine
            .transition_order_status(order.id, OrderStatus::PreparingOrder)
            .await;
        assert!(matches!(result, Err(AppError::InvalidStateTransition { .. })));

        let reserved = t
            .engine
            .transition_order_status(order.id, OrderStatus::StockReserved)
            .await
            .unwrap();
        assert_eq!(reserved.reserved_stock_ids.len(), 1);
    }

    /// Test repeating the current status never double-deducts
    #[tokio::test]
    async fn test_repeated_ready_is_rejected_without_side_effects() {
        let t = setup();
        size_stock(&t.engine, "Tray", 10).await;
        variety_stock(&t.engine, "Bibingka", 100).await;
        let order = regular_order(&t.engine, vec![item("Tray", &["Bibingka"], 1)]).await;
        t.engine.transition_order_status(order.id, OrderStatus::PreparingOrder).await.unwrap();
        t.engine.transition_order_status(order.id, OrderStatus::ReadyForPickup).await.unwrap();
        assert_eq!(slices(&t.engine, "Bibingka").await, 52);

        let again = t
            .engine
            .transition_order_status(order.id, OrderStatus::ReadyForPickup)
            .await;
        assert!(matches!(again, Err(AppError::InvalidStateTransition { .. })));
        assert_eq!(slices(&t.engine, "Bibingka").await, 52);
        assert_eq!(boxes(&t.engine, "Tray").await, 9);
    }

    /// Test unknown orders are reported as not found
    #[tokio::test]
    async fn test_unknown_order() {
        let t = setup();
        let result = t
            .engine
            .transition_order_status(Uuid::new_v4(), OrderStatus::PreparingOrder)
            .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    /// Test the Tray / Bibingka / Sapin-Sapin walkthrough
    #[tokio::test]
    async fn test_ready_for_pickup_all_or_nothing_then_success() {
        let t = setup();
        let tray = size_stock(&t.engine, "Tray", 5).await;
        variety_stock(&t.engine, "Bibingka", 100).await;
        let sapin = variety_stock(&t.engine, "Sapin-Sapin", 40).await;

        let order = regular_order(&t.engine, vec![item("Tray", &["Bibingka", "Sapin-Sapin"], 2)]).await;
        t.engine.transition_order_status(order.id, OrderStatus::PreparingOrder).await.unwrap();

        let result = t
            .engine
            .transition_order_status(order.id, OrderStatus::ReadyForPickup)
            .await;
        match result {
            Err(AppError::InsufficientStock {
                stock,
                required,
                available,
                ..
            }) => {
                assert_eq!(stock, StockRef::Variety(sapin.id));
                assert_eq!(required, 48);
                assert_eq!(available, 40);
            }
            other => panic!("expected insufficient stock, got {:?}", other),
        }
        assert_eq!(slices(&t.engine, "Bibingka").await, 100);
        assert_eq!(slices(&t.engine, "Sapin-Sapin").await, 40);
        assert_eq!(boxes(&t.engine, "Tray").await, 5);
        assert_eq!(
            t.engine.order(order.id).await.unwrap().status,
            OrderStatus::PreparingOrder
        );

        t.engine
            .ledger()
            .intake(StockRef::Variety(sapin.id), 20, "tester", Some("Restock".to_string()))
            .await
            .unwrap();

        let ready = t
            .engine
            .transition_order_status(order.id, OrderStatus::ReadyForPickup)
            .await
            .unwrap();
        assert_eq!(ready.status, OrderStatus::ReadyForPickup);
        assert_eq!(slices(&t.engine, "Bibingka").await, 52);
        assert_eq!(slices(&t.engine, "Sapin-Sapin").await, 12);
        assert_eq!(boxes(&t.engine, "Tray").await, 3);

        let outs: Vec<_> = t
            .engine
            .history_between(shared::DateRange::single(today()))
            .await
            .unwrap()
            .into_iter()
            .filter(|h| h.kind == HistoryKind::Out && h.order_id == Some(order.id))
            .collect();
        assert_eq!(outs.len(), 3);
        assert!(outs.iter().all(|h| h.is_consistent()));
        assert!(outs.iter().any(|h| h.stock == StockRef::Size(tray.id) && h.quantity_delta == -2));

        let deducted: i64 = ready.deducted_stock.iter().map(|m| m.amount).sum();
        assert_eq!(deducted, 2 + 48 + 48);
    }

    /// Test cancelling after deduction puts back exactly what was taken
    #[tokio::test]
    async fn test_cancel_after_ready_restocks() {
        let t = setup();
        size_stock(&t.engine, "Half Tray", 4).await;
        variety_stock(&t.engine, "Puto", 30).await;
        variety_stock(&t.engine, "Kutsinta", 30).await;
        let order = regular_order(&t.engine, vec![item("Half Tray", &["Puto", "Kutsinta"], 1)]).await;
        t.engine.transition_order_status(order.id, OrderStatus::PreparingOrder).await.unwrap();
        t.engine.transition_order_status(order.id, OrderStatus::ReadyForPickup).await.unwrap();
        assert_eq!(slices(&t.engine, "Puto").await, 18);
        assert_eq!(boxes(&t.engine, "Half Tray").await, 3);

        let cancelled = t
            .engine
            .transition_order_status(order.id, OrderStatus::Cancelled)
            .await
            .unwrap();
        assert!(cancelled.cancelled_at.is_some());
        assert_eq!(slices(&t.engine, "Puto").await, 30);
        assert_eq!(slices(&t.engine, "Kutsinta").await, 30);
        assert_eq!(boxes(&t.engine, "Half Tray").await, 4);

        let restocks = t
            .engine
            .history_between(shared::DateRange::single(today()))
            .await
            .unwrap()
            .into_iter()
            .filter(|h| h.kind == HistoryKind::In && h.order_id == Some(order.id))
            .count();
        assert_eq!(restocks, 3);
    }

    /// Test cancelling only restocks the deduction entries that are still in effect
    #[tokio::test]
    async fn test_cancel_after_reversed_deduction_does_not_double_restock() {
        let t = setup();
        let tray = size_stock(&t.engine, "Tray", 10).await;
        let bibingka = variety_stock(&t.engine, "Bibingka", 100).await;
        let order = regular_order(&t.engine, vec![item("Tray", &["Bibingka"], 1)]).await;
        t.engine.transition_order_status(order.id, OrderStatus::PreparingOrder).await.unwrap();
        let ready = t
            .engine
            .transition_order_status(order.id, OrderStatus::ReadyForPickup)
            .await
            .unwrap();
        assert_eq!(ready.deduction_entries.len(), 2);
        assert_eq!(slices(&t.engine, "Bibingka").await, 52);

        // A manager corrects the variety deduction by hand before the cancel
        let variety_out = out_entry(&t, StockRef::Variety(bibingka.id), order.id).await;
        t.engine
            .ledger()
            .reverse_entry(variety_out.id, "manager", Some("Counted wrong".to_string()))
            .await
            .unwrap();
        assert_eq!(slices(&t.engine, "Bibingka").await, 100);
        let size_out = out_entry(&t, StockRef::Size(tray.id), order.id).await;

        t.engine
            .transition_order_status(order.id, OrderStatus::Cancelled)
            .await
            .unwrap();
        assert_eq!(slices(&t.engine, "Bibingka").await, 100);
        assert_eq!(boxes(&t.engine, "Tray").await, 10);

        // The restocked entry is spent and cannot be reversed a second time
        assert!(matches!(
            t.engine.ledger().reverse_entry(size_out.id, "manager", None).await,
            Err(AppError::Validation { .. })
        ));
        assert_eq!(boxes(&t.engine, "Tray").await, 10);
    }

    /// Test completion folds the order into every sales bucket
    #[tokio::test]
    async fn test_completion_updates_sales() {
        let t = setup();
        size_stock(&t.engine, "Tray", 10).await;
        size_stock(&t.engine, "Slice Box", 10).await;
        variety_stock(&t.engine, "Bibingka", 200).await;

        for items in [
            vec![item("Tray", &["Bibingka"], 1)],
            vec![item("Slice Box", &["Bibingka"], 3)],
        ] {
            let order = regular_order(&t.engine, items).await;
            for status in [
                OrderStatus::PreparingOrder,
                OrderStatus::ReadyForPickup,
                OrderStatus::Completed,
            ] {
                t.engine.transition_order_status(order.id, status).await.unwrap();
            }
        }

        let total = t.engine.sales_summary(SalesPeriod::Total).await.unwrap();
        assert_eq!(total.order_count, 2);
        assert_eq!(total.items_sold, 4);
        assert_eq!(total.total_revenue, Decimal::from(420 + 180));
        assert_eq!(total.by_size["Slice Box"].quantity, 3);
        assert_eq!(total.by_payment_method["cash"], Decimal::from(600));

        let [_, day, month] = SalesPeriod::for_completion(today());
        assert_eq!(t.engine.sales_summary(day).await.unwrap().order_count, 2);
        assert_eq!(t.engine.sales_summary(month).await.unwrap().order_count, 2);

        let days = t
            .engine
            .sales()
            .daily(shared::DateRange::single(today()))
            .await
            .unwrap();
        assert_eq!(days.len(), 1);
        assert_eq!(days[0].period, day);
    }

    /// Test cancellation never touches sales
    #[tokio::test]
    async fn test_cancelled_orders_do_not_count_as_sales() {
        let t = setup();
        let order = regular_order(&t.engine, vec![item("Tray", &["Bibingka"], 1)]).await;
        t.engine.transition_order_status(order.id, OrderStatus::Cancelled).await.unwrap();

        let total = t.engine.sales_summary(SalesPeriod::Total).await.unwrap();
        assert_eq!(total.order_count, 0);
    }

    /// Test order intake validates items against the catalog
    #[tokio::test]
    async fn test_register_rejects_bad_selection() {
        let t = setup();
        let result = t
            .engine
            .register_order(bakery_fulfillment::services::NewOrder {
                customer_name: None,
                items: vec![item("Half Tray", &["Ube Halaya"], 1)],
                payment_method: shared::PaymentMethod::Card,
                payment_status: shared::PaymentStatus::Pending,
                pickup_date: today(),
                pickup_time: None,
            })
            .await;
        assert!(matches!(result, Err(AppError::Validation { .. })));
    }

    /// Test box pricing is applied per unit
    #[tokio::test]
    async fn test_register_prices_boxes() {
        let t = setup();
        let mut line = item("Tray", &["Bibingka", "Puto"], 2);
        line.with_box = true;
        let order = regular_order(&t.engine, vec![line]).await;
        assert_eq!(order.items[0].unit_price, Decimal::from(445));
        assert_eq!(order.total_amount, Decimal::from(890));
    }
}
