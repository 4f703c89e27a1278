//! Listing Projection: sellers' published offers, kept in step with their stock.

use chrono::Utc;
use tracing::instrument;

use blanketchain_core::{DomainError, ListingId, Money, PartyName, ProductId, StockOwner};
use blanketchain_inventory::{Availability, ListingRecord};

use crate::error::{TransferError, TransferResult};
use crate::ledger::StockLedger;
use crate::store::{discard, finish, StoreError, Transaction, UnitOfWork};

pub struct ListingProjection;

impl ListingProjection {
    /// Publish the seller's stock of a product at `price`.
    ///
    /// The seller must already hold a stock record for the product (possibly
    /// zero); a second listing for the same pair is `AlreadyExists`.
    #[instrument(skip_all, fields(seller = %seller, product_id = %product_id), err)]
    pub async fn publish(
        uow: &dyn UnitOfWork,
        seller: &PartyName,
        product_id: ProductId,
        price: Money,
    ) -> TransferResult<ListingRecord> {
        let mut tx = uow.begin().await?;
        let result = Self::publish_in(tx.as_mut(), seller, product_id, price).await;
        let listing = finish(tx, result).await?;

        tracing::info!(listing_id = %listing.id, quantity = listing.quantity, "listing published");
        Ok(listing)
    }

    async fn publish_in(
        tx: &mut dyn Transaction,
        seller: &PartyName,
        product_id: ProductId,
        price: Money,
    ) -> TransferResult<ListingRecord> {
        let owner = StockOwner::Seller(seller.clone());
        let stock = tx.stock(&owner, product_id).await?.ok_or_else(|| {
            DomainError::not_found(format!("seller {seller} has no inventory of product {product_id}"))
        })?;

        if tx.listing(seller, product_id).await?.is_some() {
            return Err(already_published(seller, product_id));
        }

        let listing = ListingRecord::publish(ListingId::new(), &stock, price, Utc::now())?;
        tx.insert_listing(&listing).await.map_err(|err| match err {
            StoreError::UniqueViolation(_) => already_published(seller, product_id),
            other => TransferError::from(other),
        })?;
        Ok(listing)
    }

    /// Re-derive quantity and availability from the seller's current stock.
    #[instrument(skip_all, fields(seller = %seller, product_id = %product_id))]
    pub async fn resync(uow: &dyn UnitOfWork, seller: &PartyName, product_id: ProductId) -> TransferResult<ListingRecord> {
        let mut tx = uow.begin().await?;
        let result = Self::modify(tx.as_mut(), seller, product_id, |listing, quantity| {
            listing.resync(quantity, Utc::now());
            Ok(())
        })
        .await;
        finish(tx, result).await
    }

    #[instrument(skip_all, fields(seller = %seller, product_id = %product_id, price = %price), err)]
    pub async fn update_price(
        uow: &dyn UnitOfWork,
        seller: &PartyName,
        product_id: ProductId,
        price: Money,
    ) -> TransferResult<ListingRecord> {
        let mut tx = uow.begin().await?;
        let result = Self::modify(tx.as_mut(), seller, product_id, |listing, _| {
            listing.set_price(price, Utc::now())
        })
        .await;
        finish(tx, result).await
    }

    /// Seller override of availability, applied on top of the current stock
    /// quantity. `InStock` is refused while nothing is on hand.
    #[instrument(skip_all, fields(seller = %seller, product_id = %product_id, availability = availability.as_str()), err)]
    pub async fn update_availability(
        uow: &dyn UnitOfWork,
        seller: &PartyName,
        product_id: ProductId,
        availability: Availability,
    ) -> TransferResult<ListingRecord> {
        let mut tx = uow.begin().await?;
        let result = Self::modify(tx.as_mut(), seller, product_id, |listing, quantity| {
            let now = Utc::now();
            listing.resync(quantity, now);
            listing.set_availability(availability, now)
        })
        .await;
        finish(tx, result).await
    }

    /// Remove a listing. The seller's stock record is untouched.
    #[instrument(skip_all, fields(seller = %seller, product_id = %product_id), err)]
    pub async fn withdraw(uow: &dyn UnitOfWork, seller: &PartyName, product_id: ProductId) -> TransferResult<()> {
        let mut tx = uow.begin().await?;
        let result = match tx.delete_listing(seller, product_id).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(DomainError::NotPublished.into()),
            Err(err) => Err(err.into()),
        };
        finish(tx, result).await
    }

    pub async fn get(uow: &dyn UnitOfWork, seller: &PartyName, product_id: ProductId) -> TransferResult<ListingRecord> {
        let mut tx = uow.begin().await?;
        let result = match tx.listing(seller, product_id).await {
            Ok(Some(listing)) => Ok(listing),
            Ok(None) => Err(DomainError::NotPublished.into()),
            Err(err) => Err(err.into()),
        };
        discard(tx, result).await
    }

    pub async fn list_for_seller(uow: &dyn UnitOfWork, seller: &PartyName) -> TransferResult<Vec<ListingRecord>> {
        let mut tx = uow.begin().await?;
        let result = tx.listings_for_seller(seller).await.map_err(TransferError::from);
        discard(tx, result).await
    }

    /// Lock the listing, apply `change` with the seller's current stock quantity,
    /// and write it back.
    async fn modify<F>(
        tx: &mut dyn Transaction,
        seller: &PartyName,
        product_id: ProductId,
        change: F,
    ) -> TransferResult<ListingRecord>
    where
        F: FnOnce(&mut ListingRecord, i64) -> Result<(), DomainError> + Send,
    {
        let mut listing = tx
            .listing_for_update(seller, product_id)
            .await?
            .ok_or(DomainError::NotPublished)?;
        let quantity = StockLedger::quantity(tx, &StockOwner::Seller(seller.clone()), product_id).await?;

        change(&mut listing, quantity)?;
        tx.update_listing(&listing).await?;
        Ok(listing)
    }
}

fn already_published(seller: &PartyName, product_id: ProductId) -> TransferError {
    DomainError::already_exists(format!("listing of product {product_id} by seller {seller}")).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use blanketchain_inventory::NewProduct;

    fn seller() -> PartyName {
        PartyName::parse("s1").unwrap()
    }

    /// A product with `seller` holding `quantity` units.
    async fn seeded(quantity: i64) -> (InMemoryStore, ProductId) {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let product = tx
            .insert_product(NewProduct {
                name: "Cotton".into(),
                material: "cotton".into(),
                stock: 100,
                production_capacity: 1_000,
            })
            .await
            .unwrap();
        if quantity > 0 {
            tx.adjust_stock(&StockOwner::Seller(seller()), product.id, quantity).await.unwrap();
        }
        tx.commit().await.unwrap();
        (store, product.id)
    }

    async fn set_seller_stock(store: &InMemoryStore, product_id: ProductId, delta: i64) {
        let mut tx = store.begin().await.unwrap();
        StockLedger::adjust(tx.as_mut(), &StockOwner::Seller(seller()), product_id, delta)
            .await
            .unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn publish_mirrors_current_stock() {
        let (store, product_id) = seeded(12).await;
        let listing = ListingProjection::publish(&store, &seller(), product_id, Money::from_cents(2_500))
            .await
            .unwrap();
        assert_eq!(listing.quantity, 12);
        assert_eq!(listing.availability, Availability::InStock);
    }

    #[tokio::test]
    async fn publish_without_inventory_is_not_found() {
        let (store, product_id) = seeded(0).await;
        let err = ListingProjection::publish(&store, &seller(), product_id, Money::from_cents(100))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "not_found");
    }

    #[tokio::test]
    async fn second_publish_is_rejected() {
        let (store, product_id) = seeded(3).await;
        ListingProjection::publish(&store, &seller(), product_id, Money::from_cents(100))
            .await
            .unwrap();
        let err = ListingProjection::publish(&store, &seller(), product_id, Money::from_cents(200))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "already_exists");

        let listing = ListingProjection::get(&store, &seller(), product_id).await.unwrap();
        assert_eq!(listing.price, Money::from_cents(100));
    }

    #[tokio::test]
    async fn resync_follows_stock_both_ways() {
        let (store, product_id) = seeded(4).await;
        ListingProjection::publish(&store, &seller(), product_id, Money::from_cents(100))
            .await
            .unwrap();

        set_seller_stock(&store, product_id, -4).await;
        let listing = ListingProjection::resync(&store, &seller(), product_id).await.unwrap();
        assert_eq!(listing.quantity, 0);
        assert_eq!(listing.availability, Availability::OutOfStock);

        set_seller_stock(&store, product_id, 6).await;
        let listing = ListingProjection::resync(&store, &seller(), product_id).await.unwrap();
        assert_eq!(listing.quantity, 6);
        assert_eq!(listing.availability, Availability::InStock);
    }

    #[tokio::test]
    async fn forced_out_of_stock_survives_restock() {
        let (store, product_id) = seeded(5).await;
        ListingProjection::publish(&store, &seller(), product_id, Money::from_cents(100))
            .await
            .unwrap();
        ListingProjection::update_availability(&store, &seller(), product_id, Availability::OutOfStock)
            .await
            .unwrap();

        set_seller_stock(&store, product_id, 5).await;
        let listing = ListingProjection::resync(&store, &seller(), product_id).await.unwrap();
        assert_eq!(listing.quantity, 10);
        assert_eq!(listing.availability, Availability::OutOfStock);
    }

    #[tokio::test]
    async fn availability_override_uses_current_stock() {
        let (store, product_id) = seeded(2).await;
        ListingProjection::publish(&store, &seller(), product_id, Money::from_cents(100))
            .await
            .unwrap();
        set_seller_stock(&store, product_id, -2).await;
        ListingProjection::resync(&store, &seller(), product_id).await.unwrap();

        // Restocked, but the listing has not been resynced yet.
        set_seller_stock(&store, product_id, 5).await;
        let listing = ListingProjection::update_availability(&store, &seller(), product_id, Availability::InStock)
            .await
            .unwrap();
        assert_eq!(listing.quantity, 5);
        assert_eq!(listing.availability, Availability::InStock);

        // Sold out behind the listing's back.
        set_seller_stock(&store, product_id, -5).await;
        let err = ListingProjection::update_availability(&store, &seller(), product_id, Availability::InStock)
            .await
            .unwrap_err();
        assert_eq!(err, TransferError::Domain(DomainError::OutOfStock));
        let listing = ListingProjection::get(&store, &seller(), product_id).await.unwrap();
        assert_eq!(listing.quantity, 5);
    }

    #[tokio::test]
    async fn resync_without_listing_is_not_published() {
        let (store, product_id) = seeded(5).await;
        let err = ListingProjection::resync(&store, &seller(), product_id).await.unwrap_err();
        assert_eq!(err, TransferError::Domain(DomainError::NotPublished));
    }

    #[tokio::test]
    async fn price_update_rejects_zero_and_keeps_old_price() {
        let (store, product_id) = seeded(5).await;
        ListingProjection::publish(&store, &seller(), product_id, Money::from_cents(100))
            .await
            .unwrap();

        let err = ListingProjection::update_price(&store, &seller(), product_id, Money::ZERO)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "validation_error");

        let updated = ListingProjection::update_price(&store, &seller(), product_id, Money::from_cents(150))
            .await
            .unwrap();
        assert_eq!(updated.price, Money::from_cents(150));
    }

    #[tokio::test]
    async fn withdraw_keeps_stock() {
        let (store, product_id) = seeded(5).await;
        ListingProjection::publish(&store, &seller(), product_id, Money::from_cents(100))
            .await
            .unwrap();
        ListingProjection::withdraw(&store, &seller(), product_id).await.unwrap();

        assert!(ListingProjection::list_for_seller(&store, &seller()).await.unwrap().is_empty());
        let err = ListingProjection::withdraw(&store, &seller(), product_id).await.unwrap_err();
        assert_eq!(err.code(), "not_published");

        let mut tx = store.begin().await.unwrap();
        let quantity = StockLedger::quantity(tx.as_mut(), &StockOwner::Seller(seller()), product_id)
            .await
            .unwrap();
        assert_eq!(quantity, 5);
    }
}
