//! Inventory domain module.
//!
//! Business rules for the blanket supply chain: catalog products, stock
//! records, published listings and the transfer journal. Everything here is
//! deterministic domain logic (no IO, no storage, no clock reads).

pub mod journal;
pub mod listing;
pub mod product;
pub mod stock;

pub use journal::{JournalFilter, OrderStatus, TransferBoundary, TransferRecord};
pub use listing::{Availability, ListingRecord};
pub use product::{NewProduct, Product};
pub use stock::{AvailabilityCheck, StockRecord, TransferPlan, validate_quantity};
