//! Transactional storage boundary.
//!
//! A [`UnitOfWork`] is handed explicitly to every engine call and owns
//! transaction boundaries: each call to [`UnitOfWork::begin`] opens one isolated
//! [`Transaction`]. Nothing is visible to other transactions until
//! [`Transaction::commit`]; dropping a transaction without committing
//! discards its writes.
//!
//! Implementations must guarantee that a row read with a `*_for_update` method
//! stays locked until commit/rollback, so two concurrent transfers against the
//! same source can never both pass the availability check.

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;
use thiserror::Error;

use blanketchain_core::{PartyName, ProductId, StockOwner, Tier, TransferId};
use blanketchain_inventory::{
    JournalFilter, ListingRecord, NewProduct, OrderStatus, Product, StockRecord, TransferRecord,
};

/// Storage-level failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Lock timeout, serialization failure or deadlock; the caller may retry.
    #[error("transaction conflict: {0}")]
    Conflict(String),

    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("constraint violated: {0}")]
    Constraint(String),

    #[error("row not found: {0}")]
    MissingRow(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

/// Source of isolated transactions (a connection pool, or the in-memory store).
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    /// Open a transaction. Waits at most the configured lock timeout and fails
    /// with [`StoreError::Conflict`] instead of blocking indefinitely.
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError>;
}

/// One open transaction over products, stock records, listings and the journal.
#[async_trait]
pub trait Transaction: Send {
    async fn insert_product(&mut self, product: NewProduct) -> Result<Product, StoreError>;

    async fn product(&mut self, id: ProductId) -> Result<Option<Product>, StoreError>;

    async fn products(&mut self) -> Result<Vec<Product>, StoreError>;

    /// Read a stock record without taking a lock.
    ///
    /// The producer's record is synthesized from the product's own stock.
    async fn stock(&mut self, owner: &StockOwner, product_id: ProductId) -> Result<Option<StockRecord>, StoreError>;

    /// Read a stock record and lock it until the transaction ends.
    async fn stock_for_update(
        &mut self,
        owner: &StockOwner,
        product_id: ProductId,
    ) -> Result<Option<StockRecord>, StoreError>;

    /// Add `delta` to a stock record, creating it at zero first if absent.
    /// Returns the new quantity; a negative result is a [`StoreError::Constraint`].
    async fn adjust_stock(&mut self, owner: &StockOwner, product_id: ProductId, delta: i64) -> Result<i64, StoreError>;

    /// All stock records of a tier, optionally narrowed to one owner.
    async fn stock_records(&mut self, tier: Tier, owner: Option<&PartyName>) -> Result<Vec<StockRecord>, StoreError>;

    async fn listing(&mut self, seller: &PartyName, product_id: ProductId) -> Result<Option<ListingRecord>, StoreError>;

    async fn listing_for_update(
        &mut self,
        seller: &PartyName,
        product_id: ProductId,
    ) -> Result<Option<ListingRecord>, StoreError>;

    /// Insert a new listing; a second listing for the same (seller, product) is a
    /// [`StoreError::UniqueViolation`].
    async fn insert_listing(&mut self, listing: &ListingRecord) -> Result<(), StoreError>;

    async fn update_listing(&mut self, listing: &ListingRecord) -> Result<(), StoreError>;

    async fn delete_listing(&mut self, seller: &PartyName, product_id: ProductId) -> Result<bool, StoreError>;

    async fn listings_for_seller(&mut self, seller: &PartyName) -> Result<Vec<ListingRecord>, StoreError>;

    /// Append a journal entry. Entries are never updated or deleted.
    async fn append_transfer(&mut self, record: &TransferRecord) -> Result<(), StoreError>;

    async fn transfer(&mut self, id: TransferId) -> Result<Option<TransferRecord>, StoreError>;

    /// Journal entries matching `filter`, oldest first.
    async fn transfers(&mut self, filter: &JournalFilter) -> Result<Vec<TransferRecord>, StoreError>;

    /// Overwrite the status of a customer order. Returns `false` when no
    /// customer order has that id.
    async fn set_order_status(&mut self, id: TransferId, status: &OrderStatus) -> Result<bool, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Commit `tx` if `result` is a success, otherwise roll it back.
pub async fn finish<T: Send>(tx: Box<dyn Transaction>, result: crate::TransferResult<T>) -> crate::TransferResult<T> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "rollback failed; transaction is discarded on drop");
            }
            Err(err)
        }
    }
}

/// Roll back a read-only transaction and hand back its result.
pub async fn discard<T: Send>(tx: Box<dyn Transaction>, result: crate::TransferResult<T>) -> crate::TransferResult<T> {
    if let Err(rollback_err) = tx.rollback().await {
        tracing::warn!(error = %rollback_err, "rollback of read-only transaction failed");
    }
    result
}
