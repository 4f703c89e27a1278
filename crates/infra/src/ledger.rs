//! Stock Ledger Store: per-(owner, product) quantities.
//!
//! All functions run inside a caller-supplied transaction; the caller decides
//! when it commits.

use blanketchain_core::{DomainError, PartyName, ProductId, StockOwner, Tier};
use blanketchain_inventory::StockRecord;

use crate::error::{TransferError, TransferResult};
use crate::store::{StoreError, Transaction};

pub struct StockLedger;

impl StockLedger {
    /// Current quantity, 0 when no record exists.
    pub async fn quantity(tx: &mut dyn Transaction, owner: &StockOwner, product_id: ProductId) -> TransferResult<i64> {
        Ok(tx
            .stock(owner, product_id)
            .await?
            .map(|r| r.quantity)
            .unwrap_or(0))
    }

    /// Lock and return the record, failing with `NotFound` when it does not exist.
    pub async fn locked(
        tx: &mut dyn Transaction,
        owner: &StockOwner,
        product_id: ProductId,
    ) -> TransferResult<StockRecord> {
        tx.stock_for_update(owner, product_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("no stock of product {product_id} held by {owner}")).into())
    }

    /// Apply `delta` and return the new quantity.
    ///
    /// Fails with `InsufficientStock` (nothing written) if the result would be
    /// negative; creates the record on the first credit.
    pub async fn adjust(
        tx: &mut dyn Transaction,
        owner: &StockOwner,
        product_id: ProductId,
        delta: i64,
    ) -> TransferResult<i64> {
        if delta == 0 {
            return Err(DomainError::validation("stock adjustment must be non-zero").into());
        }

        let current = match tx.stock_for_update(owner, product_id).await? {
            Some(record) => record,
            None if delta < 0 => return Err(DomainError::insufficient_stock(0, delta.saturating_neg()).into()),
            None => {
                if tx.product(product_id).await?.is_none() {
                    return Err(DomainError::not_found(format!("product {product_id}")).into());
                }
                StockRecord::empty(owner.clone(), product_id)
            }
        };
        current.after_delta(delta)?;

        tx.adjust_stock(owner, product_id, delta).await.map_err(|err| match err {
            StoreError::Constraint(_) => {
                TransferError::from(DomainError::insufficient_stock(current.quantity, delta.saturating_neg()))
            }
            other => TransferError::from(other),
        })
    }

    /// Holdings of a tier, optionally narrowed to one holder.
    pub async fn records_for(
        tx: &mut dyn Transaction,
        tier: Tier,
        identity: Option<&PartyName>,
    ) -> TransferResult<Vec<StockRecord>> {
        if !tier.holds_stock() {
            return Err(DomainError::validation(format!("{tier} tier does not hold stock")).into());
        }
        Ok(tx.stock_records(tier, identity).await?)
    }
}
