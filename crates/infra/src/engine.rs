//! Transfer Engine: one operation per tier boundary.
//!
//! Every transfer runs its read, check, debit, credit and journal steps in one
//! transaction obtained from the caller's [`UnitOfWork`]:
//!
//! ```text
//! begin
//!   ↓
//! 1. validate quantity, resolve product
//!   ↓
//! 2. lock source stock (and the listing, for customer orders)
//!   ↓
//! 3. check availability / totals (nothing written yet)
//!   ↓
//! 4. debit source, credit destination, append journal entry
//!   ↓
//! commit
//!   ↓
//! 5. resync the seller's listing in its own transaction (best effort)
//! ```
//!
//! A failure in steps 1-4 rolls the transaction back, so callers observe either
//! the whole transfer or none of it. A failure in step 5 is logged and reported
//! in the receipt but never undoes the committed transfer.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use blanketchain_core::{ActorRole, DomainError, Money, PartyName, ProductId, StockOwner, Tier, TransferId};
use blanketchain_inventory::{
    validate_quantity, AvailabilityCheck, JournalFilter, ListingRecord, OrderStatus, StockRecord, TransferPlan,
    TransferRecord,
};

use crate::config::EngineConfig;
use crate::error::{TransferError, TransferResult};
use crate::journal::OrderJournal;
use crate::ledger::StockLedger;
use crate::listing::ListingProjection;
use crate::store::{discard, finish, Transaction, UnitOfWork};

/// Producer ships to a distributor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerToDistributor {
    pub product_id: ProductId,
    pub quantity: i64,
    pub distributor: PartyName,
    /// Who asked for the shipment (recorded on the journal entry).
    pub requested_by: PartyName,
}

/// Distributor ships to a seller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributorToSeller {
    pub product_id: ProductId,
    pub quantity: i64,
    pub distributor: PartyName,
    pub seller: PartyName,
}

/// Seller sells to a customer from a published listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SellerToCustomer {
    pub product_id: ProductId,
    pub quantity: i64,
    pub seller: PartyName,
    pub customer: PartyName,
    pub requester_role: ActorRole,
    /// Total the caller expects to pay; checked against `price * quantity`.
    pub expected_total: Option<Money>,
}

/// What happened to the seller's listing after a committed transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum ListingSync {
    /// The transfer does not touch seller stock.
    NotAttempted,
    Synced(ListingRecord),
    /// The seller has not published this product.
    NotPublished,
    /// Resync failed; the listing lags the stock record until the next resync.
    Failed(String),
}

/// Result of a committed transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferReceipt {
    pub record: TransferRecord,
    pub source_remaining: i64,
    /// `None` for customer orders: customers do not hold stock.
    pub destination_balance: Option<i64>,
    pub processed_quantity: i64,
    pub total: Option<Money>,
    pub listing_sync: ListingSync,
}

#[derive(Debug, Clone, Default)]
pub struct TransferEngine {
    config: EngineConfig,
}

impl TransferEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[instrument(
        skip_all,
        fields(
            product_id = %request.product_id,
            quantity = request.quantity,
            distributor = %request.distributor,
        )
    )]
    pub async fn transfer_producer_to_distributor(
        &self,
        uow: &dyn UnitOfWork,
        request: ProducerToDistributor,
    ) -> TransferResult<TransferReceipt> {
        let mut tx = uow.begin().await?;
        let result = self.producer_to_distributor_in(tx.as_mut(), request).await;
        let (record, source_remaining, destination_balance) = finish(tx, result).await.inspect_err(log_rejection)?;

        tracing::info!(
            transfer_id = %record.id,
            source_remaining,
            destination_balance,
            "producer transfer committed"
        );
        Ok(TransferReceipt {
            processed_quantity: record.quantity,
            total: None,
            source_remaining,
            destination_balance: Some(destination_balance),
            listing_sync: ListingSync::NotAttempted,
            record,
        })
    }

    async fn producer_to_distributor_in(
        &self,
        tx: &mut dyn Transaction,
        request: ProducerToDistributor,
    ) -> TransferResult<(TransferRecord, i64, i64)> {
        let destination = StockOwner::Distributor(request.distributor.clone());
        let (source_after, destination_after) = move_stock(
            tx,
            &StockOwner::Producer,
            &destination,
            request.product_id,
            request.quantity,
        )
        .await?;

        let record = TransferRecord::producer_to_distributor(
            request.product_id,
            request.quantity,
            request.distributor,
            request.requested_by,
            Utc::now(),
        );
        OrderJournal::append(tx, &record).await?;
        Ok((record, source_after, destination_after))
    }

    #[instrument(
        skip_all,
        fields(
            product_id = %request.product_id,
            quantity = request.quantity,
            distributor = %request.distributor,
            seller = %request.seller,
        )
    )]
    pub async fn transfer_distributor_to_seller(
        &self,
        uow: &dyn UnitOfWork,
        request: DistributorToSeller,
    ) -> TransferResult<TransferReceipt> {
        let seller = request.seller.clone();
        let product_id = request.product_id;

        let mut tx = uow.begin().await?;
        let result = self.distributor_to_seller_in(tx.as_mut(), request).await;
        let (record, source_remaining, destination_balance) = finish(tx, result).await.inspect_err(log_rejection)?;

        tracing::info!(
            transfer_id = %record.id,
            source_remaining,
            destination_balance,
            "distributor transfer committed"
        );
        let listing_sync = resync_listing(uow, &seller, product_id).await;

        Ok(TransferReceipt {
            processed_quantity: record.quantity,
            total: None,
            source_remaining,
            destination_balance: Some(destination_balance),
            listing_sync,
            record,
        })
    }

    async fn distributor_to_seller_in(
        &self,
        tx: &mut dyn Transaction,
        request: DistributorToSeller,
    ) -> TransferResult<(TransferRecord, i64, i64)> {
        let source = StockOwner::Distributor(request.distributor.clone());
        let destination = StockOwner::Seller(request.seller.clone());
        let (source_after, destination_after) =
            move_stock(tx, &source, &destination, request.product_id, request.quantity).await?;

        let record = TransferRecord::distributor_to_seller(
            request.product_id,
            request.quantity,
            request.distributor,
            request.seller,
            Utc::now(),
        );
        OrderJournal::append(tx, &record).await?;
        Ok((record, source_after, destination_after))
    }

    #[instrument(
        skip_all,
        fields(
            product_id = %request.product_id,
            quantity = request.quantity,
            seller = %request.seller,
            customer = %request.customer,
            requester_role = ?request.requester_role,
        )
    )]
    pub async fn transfer_seller_to_customer(
        &self,
        uow: &dyn UnitOfWork,
        request: SellerToCustomer,
    ) -> TransferResult<TransferReceipt> {
        let seller = request.seller.clone();
        let product_id = request.product_id;

        let mut tx = uow.begin().await?;
        let result = self.seller_to_customer_in(tx.as_mut(), request).await;
        let (record, source_remaining) = finish(tx, result).await.inspect_err(log_rejection)?;

        tracing::info!(
            transfer_id = %record.id,
            source_remaining,
            total = ?record.total,
            status = ?record.status,
            "customer order committed"
        );
        let listing_sync = resync_listing(uow, &seller, product_id).await;

        Ok(TransferReceipt {
            processed_quantity: record.quantity,
            total: record.total,
            source_remaining,
            destination_balance: None,
            listing_sync,
            record,
        })
    }

    async fn seller_to_customer_in(
        &self,
        tx: &mut dyn Transaction,
        request: SellerToCustomer,
    ) -> TransferResult<(TransferRecord, i64)> {
        validate_quantity(request.quantity)?;
        ensure_product(tx, request.product_id).await?;

        let listing = tx
            .listing_for_update(&request.seller, request.product_id)
            .await?
            .ok_or(DomainError::NotPublished)?;
        listing.ensure_can_sell(request.quantity)?;

        let total = listing.total_for(request.quantity)?;
        if let Some(provided) = request.expected_total {
            if !total.within(provided, self.config.total_tolerance) {
                return Err(DomainError::TotalMismatch {
                    expected: total,
                    provided,
                }
                .into());
            }
        }

        // The listing may lag the stock record; the ledger has the final say.
        let source = StockOwner::Seller(request.seller.clone());
        let source_after = StockLedger::adjust(tx, &source, request.product_id, -request.quantity).await?;

        let record = TransferRecord::seller_to_customer(
            request.product_id,
            request.quantity,
            request.seller,
            request.customer,
            total,
            OrderStatus::initial_for(request.requester_role),
            Utc::now(),
        );
        OrderJournal::append(tx, &record).await?;
        Ok((record, source_after))
    }

    /// Pre-flight check of the producer's stock. Never writes; the transfer
    /// itself re-checks under lock.
    pub async fn check_producer_stock(
        &self,
        uow: &dyn UnitOfWork,
        product_id: ProductId,
        required: i64,
    ) -> TransferResult<AvailabilityCheck> {
        check_stock(uow, &StockOwner::Producer, product_id, required).await
    }

    pub async fn check_distributor_stock(
        &self,
        uow: &dyn UnitOfWork,
        distributor: &PartyName,
        product_id: ProductId,
        required: i64,
    ) -> TransferResult<AvailabilityCheck> {
        check_stock(uow, &StockOwner::Distributor(distributor.clone()), product_id, required).await
    }

    pub async fn check_seller_stock(
        &self,
        uow: &dyn UnitOfWork,
        seller: &PartyName,
        product_id: ProductId,
        required: i64,
    ) -> TransferResult<AvailabilityCheck> {
        check_stock(uow, &StockOwner::Seller(seller.clone()), product_id, required).await
    }

    /// Current quantity held by `owner` (0 if none).
    pub async fn stock_quantity(
        &self,
        uow: &dyn UnitOfWork,
        owner: &StockOwner,
        product_id: ProductId,
    ) -> TransferResult<i64> {
        let mut tx = uow.begin().await?;
        let result = StockLedger::quantity(tx.as_mut(), owner, product_id).await;
        discard(tx, result).await
    }

    pub async fn stock_records(
        &self,
        uow: &dyn UnitOfWork,
        tier: Tier,
        identity: Option<&PartyName>,
    ) -> TransferResult<Vec<StockRecord>> {
        let mut tx = uow.begin().await?;
        let result = StockLedger::records_for(tx.as_mut(), tier, identity).await;
        discard(tx, result).await
    }

    pub async fn transfer(&self, uow: &dyn UnitOfWork, id: TransferId) -> TransferResult<TransferRecord> {
        let mut tx = uow.begin().await?;
        let result = OrderJournal::get(tx.as_mut(), id).await;
        discard(tx, result).await
    }

    pub async fn transfers(&self, uow: &dyn UnitOfWork, filter: &JournalFilter) -> TransferResult<Vec<TransferRecord>> {
        let mut tx = uow.begin().await?;
        let result = OrderJournal::list(tx.as_mut(), filter).await;
        discard(tx, result).await
    }

    /// Status of a customer order.
    pub async fn order_status(&self, uow: &dyn UnitOfWork, id: TransferId) -> TransferResult<OrderStatus> {
        let mut tx = uow.begin().await?;
        let result = OrderJournal::get(tx.as_mut(), id).await.and_then(|record| match record.status {
            Some(status) if record.is_customer_order() => Ok(status),
            _ => Err(not_a_customer_order(id)),
        });
        discard(tx, result).await
    }

    /// Overwrite a customer order's status. Any value is accepted and setting
    /// the current value again is a no-op.
    #[instrument(skip_all, fields(transfer_id = %id, status = %status), err)]
    pub async fn update_order_status(
        &self,
        uow: &dyn UnitOfWork,
        id: TransferId,
        status: OrderStatus,
    ) -> TransferResult<TransferRecord> {
        let mut tx = uow.begin().await?;
        let result = update_status_in(tx.as_mut(), id, &status).await;
        let record = finish(tx, result).await?;

        tracing::info!("order status updated");
        Ok(record)
    }
}

async fn update_status_in(tx: &mut dyn Transaction, id: TransferId, status: &OrderStatus) -> TransferResult<TransferRecord> {
    if !tx.set_order_status(id, status).await? {
        return Err(not_a_customer_order(id));
    }
    OrderJournal::get(tx, id).await
}

/// Debit `source` and credit `destination` by `quantity`, returning both new balances.
async fn move_stock(
    tx: &mut dyn Transaction,
    source: &StockOwner,
    destination: &StockOwner,
    product_id: ProductId,
    quantity: i64,
) -> TransferResult<(i64, i64)> {
    validate_quantity(quantity)?;
    ensure_product(tx, product_id).await?;

    let source_record = StockLedger::locked(tx, source, product_id).await?;
    let destination_before = tx
        .stock_for_update(destination, product_id)
        .await?
        .map(|r| r.quantity)
        .unwrap_or(0);
    let plan = TransferPlan::new(&source_record, destination_before, quantity)?;

    let source_after = StockLedger::adjust(tx, source, product_id, -quantity).await?;
    let destination_after = StockLedger::adjust(tx, destination, product_id, quantity).await?;

    // The source row is locked; an absent destination row is not, so a
    // concurrent first credit may land between the read and the upsert.
    debug_assert_eq!(source_after, plan.source_after);
    debug_assert!(destination_after >= plan.destination_after);

    Ok((source_after, destination_after))
}

async fn ensure_product(tx: &mut dyn Transaction, product_id: ProductId) -> TransferResult<()> {
    match tx.product(product_id).await? {
        Some(_) => Ok(()),
        None => Err(DomainError::not_found(format!("product {product_id}")).into()),
    }
}

async fn check_stock(
    uow: &dyn UnitOfWork,
    owner: &StockOwner,
    product_id: ProductId,
    required: i64,
) -> TransferResult<AvailabilityCheck> {
    validate_quantity(required)?;

    let mut tx = uow.begin().await?;
    let result = tx
        .stock(owner, product_id)
        .await
        .map(|record| AvailabilityCheck::evaluate(record.as_ref(), required))
        .map_err(TransferError::from);
    discard(tx, result).await
}

/// Bring the seller's listing in line with their stock after a committed transfer.
async fn resync_listing(uow: &dyn UnitOfWork, seller: &PartyName, product_id: ProductId) -> ListingSync {
    match ListingProjection::resync(uow, seller, product_id).await {
        Ok(listing) => ListingSync::Synced(listing),
        Err(TransferError::Domain(DomainError::NotPublished)) => {
            tracing::debug!("seller has no listing for this product; nothing to resync");
            ListingSync::NotPublished
        }
        Err(err) => {
            tracing::warn!(error = %err, "listing resync failed; listing lags stock until the next resync");
            ListingSync::Failed(err.to_string())
        }
    }
}

fn not_a_customer_order(id: TransferId) -> TransferError {
    DomainError::not_found(format!("customer order {id}")).into()
}

fn log_rejection(err: &TransferError) {
    match err {
        TransferError::Store(store_err) => tracing::error!(error = %store_err, "transfer failed in storage"),
        other => tracing::debug!(code = other.code(), error = %other, "transfer rejected"),
    }
}
