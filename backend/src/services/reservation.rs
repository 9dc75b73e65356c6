//! Reservations for scheduled pickups
//!
//! A reservation is a claim on future variety demand. It never changes
//! physical stock; the order's deduction at ready-for-pickup does that. New
//! claims are checked against live stock minus the claims still outstanding
//! for the same pickup date.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use shared::{DateRange, OrderStatus, ReservedStock, SliceAllocation, StockRef, VarietyStock};
use uuid::Uuid;

use super::ledger::StockLedger;
use crate::error::{AppError, AppResult};
use crate::store::{fetch_all, DocumentStore, FilterOp, Query, RetryConfig, StoreTransaction};

/// Where and when a set of claims is due
#[derive(Debug, Clone, Copy)]
pub(crate) struct Pickup {
    pub order_id: Uuid,
    pub date: NaiveDate,
    pub time: Option<NaiveTime>,
}

#[derive(Clone)]
pub struct ReservationService {
    store: Arc<dyn DocumentStore>,
    ledger: StockLedger,
    retry: RetryConfig,
}

impl ReservationService {
    pub fn new(store: Arc<dyn DocumentStore>, ledger: StockLedger, retry: RetryConfig) -> Self {
        Self { store, ledger, retry }
    }

    /// Create one reservation per variety, returning their ids
    pub async fn reserve(
        &self,
        order_id: Uuid,
        demand: &SliceAllocation,
        pickup_date: NaiveDate,
        pickup_time: Option<NaiveTime>,
    ) -> AppResult<Vec<Uuid>> {
        validate_demand(demand)?;
        let stock_ids = self.ledger.resolve_varieties(demand.keys()).await?;
        let pickup = Pickup {
            order_id,
            date: pickup_date,
            time: pickup_time,
        };

        let ids = self
            .retry
            .run("reserve_stock", || async {
                let mut tx = StoreTransaction::begin(self.store.as_ref());
                let ids = Self::stage_reserve(&mut tx, &pickup, demand, &stock_ids, Utc::now()).await?;
                tx.commit().await?;
                Ok(ids)
            })
            .await?;

        tracing::info!(order_id = %order_id, reservations = ids.len(), date = %pickup_date, "Stock reserved");
        Ok(ids)
    }

    /// Mirror an order status onto its reservations
    pub async fn update_status(&self, order_id: Uuid, status: OrderStatus) -> AppResult<usize> {
        self.retry
            .run("update_reservation_status", || async {
                let mut tx = StoreTransaction::begin(self.store.as_ref());
                let count = Self::stage_mirror(&mut tx, order_id, status, Utc::now()).await?;
                tx.commit().await?;
                Ok(count)
            })
            .await
    }

    /// Completed claims are deleted; anything else is kept with its final status
    pub async fn release(&self, order_id: Uuid, final_status: OrderStatus) -> AppResult<usize> {
        let count = self
            .retry
            .run("release_reserved_stock", || async {
                let mut tx = StoreTransaction::begin(self.store.as_ref());
                let count = Self::stage_release(&mut tx, order_id, final_status, Utc::now()).await?;
                tx.commit().await?;
                Ok(count)
            })
            .await?;

        tracing::info!(order_id = %order_id, status = final_status.as_str(), count, "Reservations released");
        Ok(count)
    }

    pub async fn list_for_date_range(&self, range: DateRange) -> AppResult<Vec<ReservedStock>> {
        let query = Query::new()
            .filter("reserved_for_date", FilterOp::Gte, range.start.to_string())
            .filter("reserved_for_date", FilterOp::Lte, range.end.to_string())
            .order_by("reserved_for_date", false);
        fetch_all(self.store.as_ref(), &query).await
    }

    pub async fn list_for_date(&self, date: NaiveDate) -> AppResult<Vec<ReservedStock>> {
        self.list_for_date_range(DateRange::single(date)).await
    }

    pub async fn list_for_order(&self, order_id: Uuid) -> AppResult<Vec<ReservedStock>> {
        fetch_all(
            self.store.as_ref(),
            &Query::new().where_eq("order_id", order_id.to_string()),
        )
        .await
    }

    /// Slices still claimed for a variety on a date
    pub async fn outstanding_for(&self, variety_name: &str, date: NaiveDate) -> AppResult<i64> {
        let reservations: Vec<ReservedStock> =
            fetch_all(self.store.as_ref(), &for_variety_on(variety_name, date)).await?;
        Ok(reservations
            .iter()
            .filter(|r| r.holds_stock())
            .map(|r| r.quantity)
            .sum())
    }

    /// Drop cancelled reservations last touched before `before`
    pub async fn cleanup_released(&self, before: DateTime<Utc>) -> AppResult<usize> {
        let removed = self
            .retry
            .run("cleanup_reservations", || async {
                let mut tx = StoreTransaction::begin(self.store.as_ref());
                let cancelled: Vec<ReservedStock> = tx
                    .query(&Query::new().where_eq("order_status", OrderStatus::Cancelled.as_str()))
                    .await?;

                let mut removed: usize = 0;
                for reservation in cancelled.iter().filter(|r| r.updated_at < before) {
                    tx.delete::<ReservedStock>(reservation.id);
                    removed += 1;
                }
                tx.commit().await?;
                Ok(removed)
            })
            .await?;

        tracing::info!(removed, before = %before, "Released reservations cleaned up");
        Ok(removed)
    }

    // ========================================================================
    // Staging inside a caller's transaction
    // ========================================================================

    pub(crate) async fn stage_reserve(
        tx: &mut StoreTransaction<'_>,
        pickup: &Pickup,
        demand: &SliceAllocation,
        stock_ids: &BTreeMap<String, Uuid>,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Uuid>> {
        let mut ids = Vec::with_capacity(demand.len());

        for (variety, quantity) in demand {
            let stock_id = stock_ids
                .get(variety)
                .copied()
                .ok_or_else(|| AppError::NotFound(format!("Variety stock for '{}'", variety)))?;
            let stock: VarietyStock = tx.require(stock_id, "Variety stock").await?;

            let existing: Vec<ReservedStock> = tx.query(&for_variety_on(variety, pickup.date)).await?;
            let claimed: i64 = existing
                .iter()
                .filter(|r| r.holds_stock() && r.order_id != pickup.order_id)
                .map(|r| r.quantity)
                .sum();

            let available = (stock.slice_units - claimed).max(0);
            if *quantity > available {
                return Err(AppError::InsufficientStock {
                    stock: StockRef::Variety(stock.id),
                    name: variety.clone(),
                    required: *quantity,
                    available,
                });
            }

            let reservation = ReservedStock {
                id: Uuid::new_v4(),
                variety_name: variety.clone(),
                quantity: *quantity,
                reserved_for_date: pickup.date,
                order_id: pickup.order_id,
                order_status: OrderStatus::StockReserved,
                pickup_time: pickup.time,
                created_at: now,
                updated_at: now,
            };
            tx.put(&reservation)?;
            ids.push(reservation.id);
        }

        Ok(ids)
    }

    pub(crate) async fn stage_mirror(
        tx: &mut StoreTransaction<'_>,
        order_id: Uuid,
        status: OrderStatus,
        now: DateTime<Utc>,
    ) -> AppResult<usize> {
        let reservations = Self::for_order(tx, order_id).await?;
        for mut reservation in reservations.iter().cloned() {
            reservation.order_status = status;
            reservation.updated_at = now;
            tx.put(&reservation)?;
        }
        Ok(reservations.len())
    }

    pub(crate) async fn stage_release(
        tx: &mut StoreTransaction<'_>,
        order_id: Uuid,
        final_status: OrderStatus,
        now: DateTime<Utc>,
    ) -> AppResult<usize> {
        if final_status != OrderStatus::Completed {
            return Self::stage_mirror(tx, order_id, final_status, now).await;
        }

        let reservations = Self::for_order(tx, order_id).await?;
        for reservation in &reservations {
            tx.delete::<ReservedStock>(reservation.id);
        }
        Ok(reservations.len())
    }

    async fn for_order(tx: &mut StoreTransaction<'_>, order_id: Uuid) -> AppResult<Vec<ReservedStock>> {
        tx.query(&Query::new().where_eq("order_id", order_id.to_string()))
            .await
    }
}

fn for_variety_on(variety_name: &str, date: NaiveDate) -> Query {
    Query::new()
        .where_eq("variety_name", variety_name)
        .where_eq("reserved_for_date", date.to_string())
}

fn validate_demand(demand: &SliceAllocation) -> AppResult<()> {
    if demand.is_empty() {
        return Err(AppError::validation("demand", "Nothing to reserve"));
    }
    if let Some((variety, _)) = demand.iter().find(|(_, slices)| **slices <= 0) {
        return Err(AppError::validation(
            "demand",
            format!("Demand for {} must be positive", variety),
        ));
    }
    Ok(())
}
