//! Stock ledger
//!
//! The only writer of `SizeStock::box_units` and `VarietyStock::slice_units`
//! and the only creator of `StockHistory` rows. Every mutation re-reads the
//! rows it touches inside one store transaction, validates, writes the new
//! values and appends history in the same commit.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use shared::{
    validate_shelf_life, validate_stock_quantity, validate_stock_thresholds, validate_stock_units,
    DateRange, HistoryKind, SizeStock, StockHistory, StockLevel, StockMovement, StockRef, StockRow,
    VarietyStock,
};
use uuid::Uuid;

use super::catalog::CatalogService;
use super::notification::{StockAlert, StockAlertNotifier};
use crate::error::{AppError, AppResult};
use crate::store::{fetch_all, DocumentStore, FilterOp, Query, RetryConfig, StoreTransaction};

/// Input for registering a size stock row
#[derive(Debug, Clone, Deserialize)]
pub struct NewSizeStock {
    pub size_name: String,
    pub box_units: i64,
    pub minimum_stock: i64,
    pub critical_level: i64,
}

/// Input for registering a variety stock row
#[derive(Debug, Clone, Deserialize)]
pub struct NewVarietyStock {
    pub variety_name: String,
    pub slice_units: i64,
    pub minimum_stock: i64,
    pub critical_level: i64,
    pub production_date: NaiveDate,
    pub expiry_date: NaiveDate,
}

/// One line of a stock level report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StockLevelReport {
    pub stock: StockRef,
    pub name: String,
    pub units: i64,
    pub level: StockLevel,
}

/// Who and why, attached to every history row a mutation appends
#[derive(Debug, Clone)]
pub(crate) struct Provenance<'a> {
    pub actor: &'a str,
    pub remarks: Option<String>,
    pub order_id: Option<Uuid>,
    pub at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct StockLedger {
    store: Arc<dyn DocumentStore>,
    catalog: Arc<CatalogService>,
    retry: RetryConfig,
    notifier: Arc<dyn StockAlertNotifier>,
    offset: FixedOffset,
}

impl StockLedger {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        catalog: Arc<CatalogService>,
        retry: RetryConfig,
        notifier: Arc<dyn StockAlertNotifier>,
        offset: FixedOffset,
    ) -> Self {
        Self {
            store,
            catalog,
            retry,
            notifier,
            offset,
        }
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Deduct every row or none of them
    pub async fn deduct(&self, rows: Vec<StockMovement>, actor: &str) -> AppResult<Vec<StockHistory>> {
        if rows.is_empty() {
            return Err(AppError::validation("rows", "Nothing to deduct"));
        }
        for row in &rows {
            validate_stock_quantity(row.amount).map_err(|e| AppError::validation("amount", e))?;
        }

        let (updated, history) = self
            .retry
            .run("deduct_stock", || async {
                let mut tx = StoreTransaction::begin(self.store.as_ref());
                let provenance = Provenance {
                    actor,
                    remarks: None,
                    order_id: None,
                    at: Utc::now(),
                };
                let result = Self::stage_deduction(&mut tx, &rows, &provenance).await?;
                tx.commit().await?;
                Ok(result)
            })
            .await?;

        tracing::info!(rows = history.len(), actor, "Stock deducted");
        self.signal(&updated);
        Ok(history)
    }

    /// Manual correction with a signed delta
    pub async fn adjust(
        &self,
        stock: StockRef,
        delta: i64,
        reason: &str,
        actor: &str,
    ) -> AppResult<StockHistory> {
        if delta == 0 {
            return Err(AppError::validation("delta", "Adjustment must change the stock"));
        }
        if reason.trim().is_empty() {
            return Err(AppError::validation("reason", "Adjustments require a reason"));
        }
        self.apply_change(
            "adjust_stock",
            stock,
            delta,
            HistoryKind::Adjustment,
            actor,
            Some(reason.to_string()),
        )
        .await
    }

    /// New stock arriving
    pub async fn intake(
        &self,
        stock: StockRef,
        amount: i64,
        actor: &str,
        remarks: Option<String>,
    ) -> AppResult<StockHistory> {
        validate_stock_quantity(amount).map_err(|e| AppError::validation("amount", e))?;
        self.apply_change("stock_intake", stock, amount, HistoryKind::In, actor, remarks)
            .await
    }

    async fn apply_change(
        &self,
        operation: &str,
        stock: StockRef,
        delta: i64,
        kind: HistoryKind,
        actor: &str,
        remarks: Option<String>,
    ) -> AppResult<StockHistory> {
        let (row, entry) = self
            .retry
            .run(operation, || async {
                let mut tx = StoreTransaction::begin(self.store.as_ref());
                let provenance = Provenance {
                    actor,
                    remarks: remarks.clone(),
                    order_id: None,
                    at: Utc::now(),
                };
                let result = Self::stage_change(&mut tx, stock, delta, kind, &provenance).await?;
                tx.commit().await?;
                Ok(result)
            })
            .await?;

        tracing::info!(
            stock = %stock,
            kind = kind.as_str(),
            delta,
            new_value = entry.new_value,
            "Stock changed"
        );
        self.signal(std::slice::from_ref(&row));
        Ok(entry)
    }

    pub async fn create_size_stock(&self, input: NewSizeStock, actor: &str) -> AppResult<SizeStock> {
        self.catalog.size(&input.size_name)?;
        validate_stock_thresholds(input.minimum_stock, input.critical_level)
            .map_err(|e| AppError::validation("critical_level", e))?;
        validate_stock_units(input.box_units).map_err(|e| AppError::validation("box_units", e))?;

        let stock = self
            .retry
            .run("create_size_stock", || async {
                let mut tx = StoreTransaction::begin(self.store.as_ref());
                let existing: Vec<SizeStock> = tx
                    .query(&Query::new().where_eq("size_name", input.size_name.as_str()))
                    .await?;
                if !existing.is_empty() {
                    return Err(AppError::DuplicateEntry("size_name".to_string()));
                }

                let now = Utc::now();
                let stock = SizeStock {
                    id: Uuid::new_v4(),
                    size_name: input.size_name.clone(),
                    box_units: input.box_units,
                    minimum_stock: input.minimum_stock,
                    critical_level: input.critical_level,
                    last_updated: now,
                };
                tx.put(&stock)?;
                if stock.box_units > 0 {
                    let row = StockRow::Size(stock.clone());
                    tx.put(&history_entry(&row, HistoryKind::In, stock.box_units, 0, &registration(actor, now)))?;
                }
                tx.commit().await?;
                Ok(stock)
            })
            .await?;

        tracing::info!(id = %stock.id, size = %stock.size_name, boxes = stock.box_units, "Size stock registered");
        Ok(stock)
    }

    pub async fn create_variety_stock(&self, input: NewVarietyStock, actor: &str) -> AppResult<VarietyStock> {
        self.catalog.require_variety(&input.variety_name)?;
        validate_stock_thresholds(input.minimum_stock, input.critical_level)
            .map_err(|e| AppError::validation("critical_level", e))?;
        validate_stock_units(input.slice_units).map_err(|e| AppError::validation("slice_units", e))?;
        validate_shelf_life(input.production_date, input.expiry_date)
            .map_err(|e| AppError::validation("expiry_date", e))?;

        let stock = self
            .retry
            .run("create_variety_stock", || async {
                let mut tx = StoreTransaction::begin(self.store.as_ref());
                let existing: Vec<VarietyStock> = tx
                    .query(&Query::new().where_eq("variety_name", input.variety_name.as_str()))
                    .await?;
                if !existing.is_empty() {
                    return Err(AppError::DuplicateEntry("variety_name".to_string()));
                }

                let now = Utc::now();
                let stock = VarietyStock {
                    id: Uuid::new_v4(),
                    variety_name: input.variety_name.clone(),
                    slice_units: input.slice_units,
                    minimum_stock: input.minimum_stock,
                    critical_level: input.critical_level,
                    production_date: input.production_date,
                    expiry_date: input.expiry_date,
                    last_updated: now,
                };
                tx.put(&stock)?;
                if stock.slice_units > 0 {
                    let row = StockRow::Variety(stock.clone());
                    tx.put(&history_entry(&row, HistoryKind::In, stock.slice_units, 0, &registration(actor, now)))?;
                }
                tx.commit().await?;
                Ok(stock)
            })
            .await?;

        tracing::info!(
            id = %stock.id,
            variety = %stock.variety_name,
            slices = stock.slice_units,
            "Variety stock registered"
        );
        Ok(stock)
    }

    /// Undo a history entry by applying its inverse as an adjustment. The
    /// original entry keeps its quantities and is only marked as reversed.
    pub async fn reverse_entry(
        &self,
        history_id: Uuid,
        actor: &str,
        remarks: Option<String>,
    ) -> AppResult<StockHistory> {
        let (row, entry) = self
            .retry
            .run("reverse_history_entry", || async {
                let mut tx = StoreTransaction::begin(self.store.as_ref());
                let mut original: StockHistory = tx.require(history_id, "Stock history entry").await?;
                if original.is_deleted {
                    return Err(AppError::validation("history_id", "Entry has already been reversed"));
                }
                if original.kind == HistoryKind::Deleted {
                    return Err(AppError::validation("history_id", "Stock removals cannot be reversed"));
                }

                let provenance = Provenance {
                    actor,
                    remarks: Some(
                        remarks
                            .clone()
                            .unwrap_or_else(|| format!("Reversal of entry {}", original.id)),
                    ),
                    order_id: original.order_id,
                    at: Utc::now(),
                };
                let result = Self::stage_change(
                    &mut tx,
                    original.stock,
                    -original.quantity_delta,
                    HistoryKind::Adjustment,
                    &provenance,
                )
                .await?;

                original.is_deleted = true;
                tx.put(&original)?;
                tx.commit().await?;
                Ok(result)
            })
            .await?;

        tracing::info!(history_id = %history_id, new_value = entry.new_value, "History entry reversed");
        self.signal(std::slice::from_ref(&row));
        Ok(entry)
    }

    /// Delete a stock row, recording what it held
    pub async fn remove_stock(
        &self,
        stock: StockRef,
        actor: &str,
        remarks: Option<String>,
    ) -> AppResult<StockHistory> {
        let entry = self
            .retry
            .run("remove_stock", || async {
                let mut tx = StoreTransaction::begin(self.store.as_ref());
                let row = load_row(&mut tx, stock).await?;
                let units = row.units();
                let provenance = Provenance {
                    actor,
                    remarks: remarks.clone(),
                    order_id: None,
                    at: Utc::now(),
                };
                let entry = history_entry(&row, HistoryKind::Deleted, -units, units, &provenance);

                match stock {
                    StockRef::Size(id) => tx.delete::<SizeStock>(id),
                    StockRef::Variety(id) => tx.delete::<VarietyStock>(id),
                }
                tx.put(&entry)?;
                tx.commit().await?;
                Ok(entry)
            })
            .await?;

        tracing::info!(stock = %stock, name = %entry.stock_name, "Stock row removed");
        Ok(entry)
    }

    // ========================================================================
    // Staging inside a caller's transaction
    // ========================================================================

    /// Validate every movement against freshly read rows, then write them all.
    /// Movements against the same row are summed first.
    pub(crate) async fn stage_deduction(
        tx: &mut StoreTransaction<'_>,
        movements: &[StockMovement],
        provenance: &Provenance<'_>,
    ) -> AppResult<(Vec<StockRow>, Vec<StockHistory>)> {
        let mut totals: BTreeMap<StockRef, i64> = BTreeMap::new();
        for movement in movements {
            *totals.entry(movement.stock).or_insert(0) += movement.amount;
        }

        let mut rows = Vec::with_capacity(totals.len());
        for (stock, amount) in &totals {
            rows.push((load_row(tx, *stock).await?, *amount));
        }

        if let Some((row, amount)) = rows.iter().find(|(row, amount)| row.units() < *amount) {
            return Err(AppError::InsufficientStock {
                stock: row.stock_ref(),
                name: row.name().to_string(),
                required: *amount,
                available: row.units(),
            });
        }

        let mut updated = Vec::with_capacity(rows.len());
        let mut history = Vec::with_capacity(rows.len());
        for (mut row, amount) in rows {
            let previous = row.units();
            row.set_units(previous - amount, provenance.at);
            put_row(tx, &row)?;

            let entry = history_entry(&row, HistoryKind::Out, -amount, previous, provenance);
            tx.put(&entry)?;
            history.push(entry);
            updated.push(row);
        }

        Ok((updated, history))
    }

    /// Apply a signed delta to one row; the result may not go negative
    pub(crate) async fn stage_change(
        tx: &mut StoreTransaction<'_>,
        stock: StockRef,
        delta: i64,
        kind: HistoryKind,
        provenance: &Provenance<'_>,
    ) -> AppResult<(StockRow, StockHistory)> {
        let mut row = load_row(tx, stock).await?;
        let previous = row.units();
        let next = previous + delta;
        if next < 0 {
            return Err(AppError::InsufficientStock {
                stock,
                name: row.name().to_string(),
                required: -delta,
                available: previous,
            });
        }

        row.set_units(next, provenance.at);
        put_row(tx, &row)?;

        let entry = history_entry(&row, kind, delta, previous, provenance);
        tx.put(&entry)?;
        Ok((row, entry))
    }

    /// Put back what the given "out" entries took, skipping any that a
    /// correction already reversed, and mark each one reversed
    pub(crate) async fn stage_compensation(
        tx: &mut StoreTransaction<'_>,
        entry_ids: &[Uuid],
        provenance: &Provenance<'_>,
    ) -> AppResult<Vec<StockRow>> {
        let mut touched = Vec::with_capacity(entry_ids.len());
        for id in entry_ids {
            let mut entry: StockHistory = tx.require(*id, "Stock history entry").await?;
            if entry.is_deleted || entry.kind != HistoryKind::Out {
                continue;
            }

            let (row, _) =
                Self::stage_change(tx, entry.stock, -entry.quantity_delta, HistoryKind::In, provenance).await?;
            entry.is_deleted = true;
            tx.put(&entry)?;
            touched.push(row);
        }
        Ok(touched)
    }

    /// Raise alerts for rows that ended up at or below a threshold
    pub(crate) fn signal(&self, rows: &[StockRow]) {
        let now = Utc::now();
        for alert in rows.iter().filter_map(|row| StockAlert::for_row(row, now)) {
            self.notifier.notify(&alert);
        }
    }

    // ========================================================================
    // Lookups and reports
    // ========================================================================

    pub async fn size_stock(&self, size_name: &str) -> AppResult<SizeStock> {
        fetch_all::<SizeStock>(
            self.store.as_ref(),
            &Query::new().where_eq("size_name", size_name).limit(1),
        )
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| AppError::NotFound(format!("Size stock for '{}'", size_name)))
    }

    pub async fn variety_stock(&self, variety_name: &str) -> AppResult<VarietyStock> {
        fetch_all::<VarietyStock>(
            self.store.as_ref(),
            &Query::new().where_eq("variety_name", variety_name).limit(1),
        )
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| AppError::NotFound(format!("Variety stock for '{}'", variety_name)))
    }

    /// Map variety names to their stock rows
    pub async fn resolve_varieties<'a>(
        &self,
        names: impl IntoIterator<Item = &'a String>,
    ) -> AppResult<BTreeMap<String, Uuid>> {
        let mut resolved = BTreeMap::new();
        for name in names {
            let stock = self.variety_stock(name).await?;
            resolved.insert(name.clone(), stock.id);
        }
        Ok(resolved)
    }

    /// History for one row, newest first
    pub async fn history_for(&self, stock: StockRef, include_deleted: bool) -> AppResult<Vec<StockHistory>> {
        let mut query = Query::new()
            .where_eq("stock.kind", stock.kind_str())
            .where_eq("stock.id", stock.id().to_string());
        if !include_deleted {
            query = query.where_eq("is_deleted", false);
        }

        let mut entries = fetch_all::<StockHistory>(self.store.as_ref(), &query).await?;
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(entries)
    }

    /// Every entry recorded on the bakery-local days in `range`, newest first
    pub async fn list_history(&self, range: DateRange) -> AppResult<Vec<StockHistory>> {
        let from = local_midnight(range.start, self.offset);
        let until = local_midnight(range.end + Duration::days(1), self.offset);

        // Whole UTC days narrow the scan; the exact bounds are applied below
        let query = Query::new()
            .filter("timestamp", FilterOp::Gte, from.date_naive().to_string())
            .filter(
                "timestamp",
                FilterOp::Lt,
                (until.date_naive() + Duration::days(1)).to_string(),
            );

        let mut entries = fetch_all::<StockHistory>(self.store.as_ref(), &query).await?;
        entries.retain(|entry| entry.timestamp >= from && entry.timestamp < until);
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(entries)
    }

    pub async fn stock_levels(&self) -> AppResult<Vec<StockLevelReport>> {
        let sizes = fetch_all::<SizeStock>(self.store.as_ref(), &Query::new().order_by("size_name", false)).await?;
        let varieties =
            fetch_all::<VarietyStock>(self.store.as_ref(), &Query::new().order_by("variety_name", false)).await?;

        Ok(sizes
            .into_iter()
            .map(StockRow::Size)
            .chain(varieties.into_iter().map(StockRow::Variety))
            .map(|row| StockLevelReport {
                stock: row.stock_ref(),
                name: row.name().to_string(),
                units: row.units(),
                level: row.level(),
            })
            .collect())
    }

    /// Varieties expiring within `within_days` of `on`, soonest first
    pub async fn expiring_varieties(&self, on: NaiveDate, within_days: i64) -> AppResult<Vec<VarietyStock>> {
        if within_days < 0 {
            return Err(AppError::validation("within_days", "Window cannot be negative"));
        }
        let horizon = on + Duration::days(within_days);
        let query = Query::new()
            .filter("expiry_date", FilterOp::Lte, horizon.to_string())
            .order_by("expiry_date", false);
        fetch_all(self.store.as_ref(), &query).await
    }
}

/// The UTC instant at which `date` begins in the bakery's offset
fn local_midnight(date: NaiveDate, offset: FixedOffset) -> DateTime<Utc> {
    let local = date.and_time(NaiveTime::MIN);
    Utc.from_utc_datetime(&(local - Duration::seconds(i64::from(offset.local_minus_utc()))))
}

async fn load_row(tx: &mut StoreTransaction<'_>, stock: StockRef) -> AppResult<StockRow> {
    match stock {
        StockRef::Size(id) => Ok(StockRow::Size(tx.require(id, "Size stock").await?)),
        StockRef::Variety(id) => Ok(StockRow::Variety(tx.require(id, "Variety stock").await?)),
    }
}

fn put_row(tx: &mut StoreTransaction<'_>, row: &StockRow) -> AppResult<()> {
    match row {
        StockRow::Size(stock) => tx.put(stock),
        StockRow::Variety(stock) => tx.put(stock),
    }
}

fn registration(actor: &str, at: DateTime<Utc>) -> Provenance<'_> {
    Provenance {
        actor,
        remarks: Some("Initial stock".to_string()),
        order_id: None,
        at,
    }
}

/// `row` already holds the new value
fn history_entry(
    row: &StockRow,
    kind: HistoryKind,
    delta: i64,
    previous: i64,
    provenance: &Provenance<'_>,
) -> StockHistory {
    StockHistory {
        id: Uuid::new_v4(),
        stock: row.stock_ref(),
        stock_name: row.name().to_string(),
        kind,
        quantity_delta: delta,
        previous_value: previous,
        new_value: previous + delta,
        timestamp: provenance.at,
        actor: provenance.actor.to_string(),
        remarks: provenance.remarks.clone(),
        order_id: provenance.order_id,
        is_deleted: false,
    }
}
