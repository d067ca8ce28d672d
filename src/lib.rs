//! stockpot: FIFO-costed inventory and sales ledger for small
//! food-service businesses.
//!
//! Ingredients arrive in purchase lots at fixed unit costs, leave through
//! recipe-driven sales, manual corrections, and shift staging, and every
//! change lands in an append-only stock-movement ledger. Cost of goods sold
//! is derived from the exact lots each sale consumed, oldest purchase
//! first, and frozen at sale time.
//!
//! All multi-step workflows (purchase, sale, adjustment, session
//! open/close) run inside IMMEDIATE SQLite transactions: they commit whole
//! or leave no trace. The embedding application owns HTTP, authentication,
//! and rendering; it hands each workflow an acting user id and translates
//! [`StoreError`] kinds into its own response codes.

pub mod adjustments;
pub mod catalog;
pub mod db;
pub mod error;
pub mod expenses;
pub mod fifo;
pub mod ledger;
pub mod lots;
pub mod purchases;
pub mod reports;
pub mod sales;
pub mod sessions;

pub use db::DbState;
pub use error::{Result, StoreError};
pub use ledger::{MovementKind, StockMovement};
pub use lots::InventoryLot;
pub use sales::PaymentType;
