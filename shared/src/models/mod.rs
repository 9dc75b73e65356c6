//! Domain models for the bakery fulfillment engine

mod catalog;
mod order;
mod reservation;
mod sales;
mod stock;

pub use catalog::*;
pub use order::*;
pub use reservation::*;
pub use sales::*;
pub use stock::*;
