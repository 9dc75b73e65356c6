//! Shared types and models for the bakery fulfillment engine
//!
//! This crate contains the pure domain layer shared between the backend
//! engine and the admin UI (via WASM): models, the slice allocation
//! algorithm, the order status workflow and validation helpers.

pub mod allocation;
pub mod models;
pub mod types;
pub mod validation;

pub use allocation::*;
pub use models::*;
pub use types::*;
pub use validation::*;
