//! Business logic services for the fulfillment engine

pub mod catalog;
pub mod ledger;
pub mod notification;
pub mod order;
pub mod reservation;
pub mod sales;

pub use catalog::CatalogService;
pub use ledger::{NewSizeStock, NewVarietyStock, StockLedger, StockLevelReport};
pub use notification::{RecordingNotifier, StockAlert, StockAlertNotifier, TracingNotifier};
pub use order::{NewOrder, NewOrderItem, OrderStateMachine};
pub use reservation::ReservationService;
pub use sales::SalesService;
