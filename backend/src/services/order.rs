//! Order state machine
//!
//! Status changes go through [`OrderStateMachine::transition`]. Each one is a
//! single store transaction: the order is re-read, the move is checked
//! against the reachability table, the side effects for the target status
//! are staged (reservations, stock deduction, restock, sales), and everything
//! commits together. A lost race re-runs the whole body.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{FixedOffset, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use shared::{
    Order, OrderItem, OrderStatus, PaymentMethod, PaymentStatus, SliceAllocation,
    StatusChange, StockMovement, StockRef, StockRow,
};
use uuid::Uuid;
use validator::Validate;

use super::catalog::CatalogService;
use super::ledger::{Provenance, StockLedger};
use super::reservation::{Pickup, ReservationService};
use super::sales::SalesService;
use crate::error::{AppError, AppResult};
use crate::store::{fetch_all, fetch_required, save, DocumentStore, Query, RetryConfig, StoreTransaction};

/// One requested line of a new order
#[derive(Debug, Clone, Deserialize)]
pub struct NewOrderItem {
    pub size: String,
    pub varieties: Vec<String>,
    pub quantity: u32,
    #[serde(default)]
    pub with_box: bool,
}

/// Input for registering an order
#[derive(Debug, Clone, Deserialize)]
pub struct NewOrder {
    pub customer_name: Option<String>,
    pub items: Vec<NewOrderItem>,
    pub payment_method: PaymentMethod,
    #[serde(default = "default_payment_status")]
    pub payment_status: PaymentStatus,
    pub pickup_date: NaiveDate,
    pub pickup_time: Option<NaiveTime>,
}

fn default_payment_status() -> PaymentStatus {
    PaymentStatus::Pending
}

/// Everything a transition resolves before it opens a transaction
#[derive(Debug, Default)]
struct TransitionPlan {
    demand: SliceAllocation,
    variety_stock: BTreeMap<String, Uuid>,
    movements: Vec<StockMovement>,
}

#[derive(Clone)]
pub struct OrderStateMachine {
    store: Arc<dyn DocumentStore>,
    catalog: Arc<CatalogService>,
    ledger: StockLedger,
    retry: RetryConfig,
    offset: FixedOffset,
}

impl OrderStateMachine {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        catalog: Arc<CatalogService>,
        ledger: StockLedger,
        retry: RetryConfig,
        offset: FixedOffset,
    ) -> Self {
        Self {
            store,
            catalog,
            ledger,
            retry,
            offset,
        }
    }

    /// Price and store a new order in `OrderConfirmed`
    pub async fn register(&self, input: NewOrder) -> AppResult<Order> {
        if input.items.is_empty() {
            return Err(AppError::validation("items", "An order needs at least one item"));
        }

        let mut items = Vec::with_capacity(input.items.len());
        for item in input.items {
            self.catalog.validate_selection(&item.size, &item.varieties)?;
            let size = self.catalog.size(&item.size)?;
            let line = OrderItem {
                unit_price: size.unit_price(item.with_box),
                size: item.size,
                varieties: item.varieties,
                quantity: item.quantity,
            };
            line.validate()?;
            items.push(line);
        }

        let now = Utc::now();
        let today = now.with_timezone(&self.offset).date_naive();
        if input.pickup_date < today {
            return Err(AppError::validation("pickup_date", "Pickup date cannot be in the past"));
        }

        let mut order = Order {
            id: Uuid::new_v4(),
            customer_name: input.customer_name,
            items,
            status: OrderStatus::OrderConfirmed,
            payment_method: input.payment_method,
            payment_status: input.payment_status,
            total_amount: Decimal::ZERO,
            pickup_date: input.pickup_date,
            pickup_time: input.pickup_time,
            reserved_stock_ids: Vec::new(),
            deducted_stock: Vec::new(),
            deduction_entries: Vec::new(),
            status_history: Vec::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
            cancelled_at: None,
        };
        order.total_amount = order.compute_total();

        save(self.store.as_ref(), &order).await?;

        tracing::info!(
            order_id = %order.id,
            total = %order.total_amount,
            scheduled = order.is_scheduled(self.offset),
            "Order registered"
        );
        Ok(order)
    }

    pub async fn get(&self, order_id: Uuid) -> AppResult<Order> {
        fetch_required(self.store.as_ref(), order_id, "Order").await
    }

    pub async fn list_by_status(&self, status: OrderStatus) -> AppResult<Vec<Order>> {
        fetch_all(
            self.store.as_ref(),
            &Query::new()
                .where_eq("status", status.as_str())
                .order_by("pickup_date", false),
        )
        .await
    }

    pub async fn status_history(&self, order_id: Uuid) -> AppResult<Vec<StatusChange>> {
        Ok(self.get(order_id).await?.status_history)
    }

    pub fn is_scheduled(&self, order: &Order) -> bool {
        order.is_scheduled(self.offset)
    }

    /// Move an order to `target`, applying that status's side effects
    pub async fn transition(&self, order_id: Uuid, target: OrderStatus, actor: &str) -> AppResult<Order> {
        let current = self.get(order_id).await?;
        check_transition(&current, target, self.is_scheduled(&current))?;
        let plan = self.plan(&current, target).await?;

        let (order, touched) = self
            .retry
            .run("transition_order_status", || {
                self.try_transition(order_id, target, &plan, actor)
            })
            .await?;

        if let Some(change) = order.status_history.last() {
            tracing::info!(
                order_id = %order.id,
                from = change.from.as_str(),
                to = change.to.as_str(),
                actor,
                "Order status changed"
            );
        }
        self.ledger.signal(&touched);
        Ok(order)
    }

    /// Demand and stock rows depend only on the order's items, which never
    /// change after registration
    async fn plan(&self, order: &Order, target: OrderStatus) -> AppResult<TransitionPlan> {
        match target {
            OrderStatus::StockReserved => {
                let demand = self.catalog.demand_for(&order.items)?;
                let variety_stock = self.ledger.resolve_varieties(demand.keys()).await?;
                Ok(TransitionPlan {
                    demand,
                    variety_stock,
                    movements: Vec::new(),
                })
            }
            OrderStatus::ReadyForPickup => {
                let demand = self.catalog.demand_for(&order.items)?;
                let variety_stock = self.ledger.resolve_varieties(demand.keys()).await?;

                let mut movements = Vec::new();
                for item in &order.items {
                    let size_stock = self.ledger.size_stock(&item.size).await?;
                    movements.push(StockMovement {
                        stock: StockRef::Size(size_stock.id),
                        amount: i64::from(item.quantity),
                    });
                }
                for (variety, slices) in &demand {
                    if let Some(id) = variety_stock.get(variety) {
                        movements.push(StockMovement {
                            stock: StockRef::Variety(*id),
                            amount: *slices,
                        });
                    }
                }

                Ok(TransitionPlan {
                    demand,
                    variety_stock,
                    movements,
                })
            }
            _ => Ok(TransitionPlan::default()),
        }
    }

    async fn try_transition(
        &self,
        order_id: Uuid,
        target: OrderStatus,
        plan: &TransitionPlan,
        actor: &str,
    ) -> AppResult<(Order, Vec<StockRow>)> {
        let mut tx = StoreTransaction::begin(self.store.as_ref());
        let mut order: Order = tx.require(order_id, "Order").await?;
        let scheduled = order.is_scheduled(self.offset);
        check_transition(&order, target, scheduled)?;

        let now = Utc::now();
        let from = order.status;
        let mut touched = Vec::new();

        match target {
            OrderStatus::StockReserved => {
                let pickup = Pickup {
                    order_id: order.id,
                    date: order.pickup_date,
                    time: order.pickup_time,
                };
                order.reserved_stock_ids =
                    ReservationService::stage_reserve(&mut tx, &pickup, &plan.demand, &plan.variety_stock, now)
                        .await?;
            }
            OrderStatus::ReadyForPickup => {
                let provenance = Provenance {
                    actor,
                    remarks: Some(format!("Order {} ready for pickup", order.id)),
                    order_id: Some(order.id),
                    at: now,
                };
                let (rows, history) = StockLedger::stage_deduction(&mut tx, &plan.movements, &provenance).await?;
                order.deducted_stock = history
                    .iter()
                    .map(|entry| StockMovement {
                        stock: entry.stock,
                        amount: -entry.quantity_delta,
                    })
                    .collect();
                order.deduction_entries = history.iter().map(|entry| entry.id).collect();
                touched = rows;

                if scheduled {
                    ReservationService::stage_mirror(&mut tx, order.id, target, now).await?;
                }
            }
            OrderStatus::Completed => {
                SalesService::stage_completion(&mut tx, &order, now, self.offset).await?;
                if scheduled {
                    ReservationService::stage_release(&mut tx, order.id, target, now).await?;
                    order.reserved_stock_ids.clear();
                }
                order.completed_at = Some(now);
            }
            OrderStatus::Cancelled => {
                if from == OrderStatus::ReadyForPickup {
                    let provenance = Provenance {
                        actor,
                        remarks: Some(format!("Restock for cancelled order {}", order.id)),
                        order_id: Some(order.id),
                        at: now,
                    };
                    touched =
                        StockLedger::stage_compensation(&mut tx, &order.deduction_entries, &provenance).await?;
                }
                if scheduled {
                    ReservationService::stage_release(&mut tx, order.id, target, now).await?;
                }
                order.cancelled_at = Some(now);
            }
            OrderStatus::OrderConfirmed | OrderStatus::PreparingOrder => {
                if scheduled {
                    ReservationService::stage_mirror(&mut tx, order.id, target, now).await?;
                }
            }
        }

        order.status_history.push(StatusChange {
            from,
            to: target,
            at: now,
        });
        order.status = target;
        order.updated_at = now;
        tx.put(&order)?;
        tx.commit().await?;

        Ok((order, touched))
    }
}

fn check_transition(order: &Order, target: OrderStatus, scheduled: bool) -> AppResult<()> {
    let from = order.status;
    if from.can_transition_to(target, scheduled) {
        return Ok(());
    }

    let reason = if from == target {
        "order is already in this status".to_string()
    } else if from.is_terminal() {
        format!("{} is a terminal status", from)
    } else if target == OrderStatus::StockReserved && !scheduled {
        "only scheduled orders reserve stock".to_string()
    } else if scheduled && from == OrderStatus::OrderConfirmed {
        "scheduled orders must reserve stock first".to_string()
    } else {
        format!("{} cannot follow {}", target, from)
    };

    Err(AppError::InvalidStateTransition {
        from,
        to: target,
        reason,
    })
}
