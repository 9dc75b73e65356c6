//! Bakery order fulfillment engine
//!
//! Order status workflow, stock ledger, reservations for scheduled pickups
//! and the sales aggregate, persisted through a versioned document store.

pub mod config;
pub mod engine;
pub mod error;
pub mod services;
pub mod store;

pub use config::Config;
pub use engine::{FulfillmentEngine, SYSTEM_ACTOR};
pub use error::{AppError, AppResult, ErrorDetail};
