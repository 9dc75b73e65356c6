//! Sales aggregate maintained on order completion

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use shared::{DateRange, Order, SalesPeriod, SalesSummary};

use crate::error::AppResult;
use crate::store::{fetch, fetch_all, DocumentStore, Query, StoreTransaction};

#[derive(Clone)]
pub struct SalesService {
    store: Arc<dyn DocumentStore>,
}

impl SalesService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Summary for a period; periods with no completed orders read as empty
    pub async fn summary(&self, period: SalesPeriod) -> AppResult<SalesSummary> {
        Ok(fetch::<SalesSummary>(self.store.as_ref(), period.summary_id())
            .await?
            .unwrap_or_else(|| SalesSummary::empty(period, Utc::now())))
    }

    /// Daily summaries that exist within `range`, oldest first
    pub async fn daily(&self, range: DateRange) -> AppResult<Vec<SalesSummary>> {
        let summaries: Vec<SalesSummary> =
            fetch_all(self.store.as_ref(), &Query::new().where_eq("period.type", "day")).await?;

        let mut days: Vec<SalesSummary> = summaries
            .into_iter()
            .filter(|s| matches!(s.period, SalesPeriod::Day { date } if range.contains(date)))
            .collect();
        days.sort_by_key(|s| match s.period {
            SalesPeriod::Day { date } => Some(date),
            _ => None,
        });
        Ok(days)
    }

    /// Fold a completed order into the total, day and month buckets. The
    /// current aggregates are read through `tx`, so a concurrent completion
    /// forces a retry instead of losing an update.
    pub(crate) async fn stage_completion(
        tx: &mut StoreTransaction<'_>,
        order: &Order,
        completed_at: DateTime<Utc>,
        offset: FixedOffset,
    ) -> AppResult<()> {
        let local_date = completed_at.with_timezone(&offset).date_naive();

        for period in SalesPeriod::for_completion(local_date) {
            let mut summary = tx
                .get::<SalesSummary>(period.summary_id())
                .await?
                .unwrap_or_else(|| SalesSummary::empty(period, completed_at));
            summary.record(order, completed_at);
            tx.put(&summary)?;
        }
        Ok(())
    }
}
