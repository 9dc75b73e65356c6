//! Fulfillment engine facade
//!
//! The single entry point collaborators (admin UI, notification layer,
//! reporting) call into. It wires the services around one document store and
//! one catalog.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use shared::{
    DateRange, Order, OrderStatus, ReservedStock, SalesPeriod, SalesSummary, SliceAllocation,
    StatusChange, StockHistory, StockRef,
};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::services::{
    CatalogService, NewOrder, OrderStateMachine, ReservationService, SalesService, StockAlertNotifier,
    StockLedger, StockLevelReport, TracingNotifier,
};
use crate::store::{DocumentStore, RetryConfig};

/// Actor recorded when a caller does not name one
pub const SYSTEM_ACTOR: &str = "system";

#[derive(Clone)]
pub struct FulfillmentEngine {
    catalog: Arc<CatalogService>,
    ledger: StockLedger,
    reservations: ReservationService,
    sales: SalesService,
    orders: OrderStateMachine,
}

impl FulfillmentEngine {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        catalog: Arc<CatalogService>,
        retry: RetryConfig,
        offset: chrono::FixedOffset,
        notifier: Arc<dyn StockAlertNotifier>,
    ) -> Self {
        let ledger = StockLedger::new(store.clone(), catalog.clone(), retry.clone(), notifier, offset);
        let reservations = ReservationService::new(store.clone(), ledger.clone(), retry.clone());
        let sales = SalesService::new(store.clone());
        let orders = OrderStateMachine::new(store, catalog.clone(), ledger.clone(), retry, offset);

        Self {
            catalog,
            ledger,
            reservations,
            sales,
            orders,
        }
    }

    /// Engine over `store` with the catalog, retry policy and offset from configuration
    pub fn from_config(store: Arc<dyn DocumentStore>, config: &Config) -> AppResult<Self> {
        let catalog = Arc::new(CatalogService::from_config(&config.catalog)?);
        let offset = config.business.utc_offset().ok_or_else(|| {
            AppError::Configuration(format!(
                "business.utc_offset_minutes out of range: {}",
                config.business.utc_offset_minutes
            ))
        })?;

        Ok(Self::new(
            store,
            catalog,
            RetryConfig::from(&config.retry),
            offset,
            Arc::new(TracingNotifier),
        ))
    }

    pub fn catalog(&self) -> &CatalogService {
        &self.catalog
    }

    pub fn ledger(&self) -> &StockLedger {
        &self.ledger
    }

    pub fn reservations(&self) -> &ReservationService {
        &self.reservations
    }

    pub fn sales(&self) -> &SalesService {
        &self.sales
    }

    pub fn orders(&self) -> &OrderStateMachine {
        &self.orders
    }

    // ========================================================================
    // Orders
    // ========================================================================

    pub async fn register_order(&self, input: NewOrder) -> AppResult<Order> {
        self.orders.register(input).await
    }

    pub async fn transition_order_status(&self, order_id: Uuid, target: OrderStatus) -> AppResult<Order> {
        self.orders.transition(order_id, target, SYSTEM_ACTOR).await
    }

    pub async fn transition_order_status_as(
        &self,
        order_id: Uuid,
        target: OrderStatus,
        actor: &str,
    ) -> AppResult<Order> {
        self.orders.transition(order_id, target, actor).await
    }

    pub async fn order(&self, order_id: Uuid) -> AppResult<Order> {
        self.orders.get(order_id).await
    }

    pub async fn status_history(&self, order_id: Uuid) -> AppResult<Vec<StatusChange>> {
        self.orders.status_history(order_id).await
    }

    // ========================================================================
    // Reservations
    // ========================================================================

    pub async fn reserve_stock(
        &self,
        order_id: Uuid,
        demand: &SliceAllocation,
        pickup_date: NaiveDate,
        pickup_time: Option<NaiveTime>,
    ) -> AppResult<Vec<Uuid>> {
        self.reservations
            .reserve(order_id, demand, pickup_date, pickup_time)
            .await
    }

    pub async fn release_reserved_stock(&self, order_id: Uuid, final_status: OrderStatus) -> AppResult<usize> {
        self.reservations.release(order_id, final_status).await
    }

    pub async fn reservations_for_date_range(&self, range: DateRange) -> AppResult<Vec<ReservedStock>> {
        self.reservations.list_for_date_range(range).await
    }

    pub async fn reservations_for_date(&self, date: NaiveDate) -> AppResult<Vec<ReservedStock>> {
        self.reservations.list_for_date(date).await
    }

    // ========================================================================
    // Allocation, stock and sales
    // ========================================================================

    pub fn allocate_slices(&self, size: &str, varieties: &[String], quantity: u32) -> AppResult<SliceAllocation> {
        self.catalog.allocate(size, varieties, quantity)
    }

    pub async fn stock_history(&self, stock: StockRef, include_deleted: bool) -> AppResult<Vec<StockHistory>> {
        self.ledger.history_for(stock, include_deleted).await
    }

    pub async fn history_between(&self, range: DateRange) -> AppResult<Vec<StockHistory>> {
        self.ledger.list_history(range).await
    }

    pub async fn stock_levels(&self) -> AppResult<Vec<StockLevelReport>> {
        self.ledger.stock_levels().await
    }

    pub async fn sales_summary(&self, period: SalesPeriod) -> AppResult<SalesSummary> {
        self.sales.summary(period).await
    }
}
