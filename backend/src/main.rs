//! Bakery fulfillment maintenance runner
//!
//! Opens the configured document store, seeds the size catalog, drops
//! cancelled reservations past their retention window and logs a stock level
//! report. Meant to run from a scheduler.

use std::sync::Arc;

use bakery_fulfillment::config::StoreBackend;
use bakery_fulfillment::store::{DocumentStore, MemoryStore, PgDocumentStore};
use bakery_fulfillment::{Config, FulfillmentEngine};
use chrono::{Duration, Utc};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bakery_fulfillment=debug,bakery_maintenance=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::load()?;

    tracing::info!("Starting bakery maintenance run");
    tracing::info!("Environment: {}", config.environment);

    let store: Arc<dyn DocumentStore> = match config.store.backend {
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory store; nothing will persist past this run");
            Arc::new(MemoryStore::new())
        }
        StoreBackend::Postgres => {
            tracing::info!("Connecting to database...");
            let store = PgDocumentStore::connect(&config.database).await?;
            tracing::info!("Database connection established");

            tracing::info!("Running database migrations...");
            store.migrate().await?;
            tracing::info!("Migrations completed");
            Arc::new(store)
        }
    };

    let engine = FulfillmentEngine::from_config(store.clone(), &config)?;

    let seeded = engine.catalog().seed(store.as_ref()).await?;
    tracing::info!(sizes = seeded, varieties = engine.catalog().varieties().len(), "Catalog ready");

    let cutoff = Utc::now() - Duration::days(config.reservations.retention_days);
    let removed = engine.reservations().cleanup_released(cutoff).await?;
    tracing::info!(removed, retention_days = config.reservations.retention_days, "Reservation cleanup done");

    let offset = config
        .business
        .utc_offset()
        .ok_or_else(|| anyhow::anyhow!("business.utc_offset_minutes is out of range"))?;
    let today = Utc::now().with_timezone(&offset).date_naive();
    for report in engine.stock_levels().await? {
        if report.level.needs_alert() {
            tracing::warn!(stock = %report.stock, name = %report.name, units = report.units, level = report.level.as_str(), "Stock level");
        } else {
            tracing::info!(stock = %report.stock, name = %report.name, units = report.units, level = report.level.as_str(), "Stock level");
        }
    }

    for variety in engine.ledger().expiring_varieties(today, 1).await? {
        tracing::warn!(
            variety = %variety.variety_name,
            slices = variety.slice_units,
            expiry_date = %variety.expiry_date,
            "Variety expiring"
        );
    }

    tracing::info!("Maintenance run finished");
    Ok(())
}
