//! Generation orders: the engine's unit of work.
//!
//! - [`Order`] - the order model with its status machine
//! - [`OrderLog`] - operator-facing breadcrumbs per order
//! - [`OrderWorker`] - the single cooperative worker loop
//! - [`availability`] - acceptance-time scope conflict rules

pub mod availability;
mod order;
mod order_log;
mod worker;

pub use availability::{check_availability, Availability};
pub use order::{NewOrder, Order, OrderKind, OrderStatus, RequestedBy};
pub use order_log::{LogLevel, LogStage, OrderLog};
pub use worker::{OrderWorker, OrderWorkerConfig};
