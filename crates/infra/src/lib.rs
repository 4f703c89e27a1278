//! Infrastructure layer: transactional stores, the Transfer Engine and the
//! components it drives (stock ledger, order journal, listing projection,
//! catalog).
//!
//! Every operation takes the [`store::UnitOfWork`] explicitly; nothing here
//! holds a global store handle.

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod journal;
pub mod ledger;
pub mod listing;
pub mod store;

pub use catalog::Catalog;
pub use config::EngineConfig;
pub use engine::{
    DistributorToSeller, ListingSync, ProducerToDistributor, SellerToCustomer, TransferEngine, TransferReceipt,
};
pub use error::{TransferError, TransferResult};
pub use journal::OrderJournal;
pub use ledger::StockLedger;
pub use listing::ListingProjection;
pub use store::{InMemoryStore, PostgresStore, StoreError, Transaction, UnitOfWork};

mod integration_tests;
