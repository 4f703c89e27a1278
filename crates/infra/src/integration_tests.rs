//! Integration tests for the full transfer pipeline.
//!
//! Tests: Catalog → TransferEngine → StockLedger / OrderJournal → ListingProjection
//!
//! Verifies:
//! - Stock is conserved across every tier boundary
//! - Rejected transfers leave stock, listings and the journal untouched
//! - Concurrent transfers against one source never overdraw it
//! - Listings track seller stock after every transfer

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use blanketchain_core::{ActorRole, DomainError, Money, PartyName, ProductId, StockOwner, Tier};
    use blanketchain_inventory::{Availability, JournalFilter, NewProduct, OrderStatus, TransferBoundary};

    use crate::catalog::Catalog;
    use crate::config::EngineConfig;
    use crate::engine::{DistributorToSeller, ListingSync, ProducerToDistributor, SellerToCustomer, TransferEngine};
    use crate::error::TransferError;
    use crate::listing::ListingProjection;
    use crate::store::{InMemoryStore, StoreError, Transaction, UnitOfWork};

    /// Opens `healthy` transactions, then fails every later `begin`.
    struct FailingAfter {
        inner: InMemoryStore,
        healthy: AtomicUsize,
    }

    impl FailingAfter {
        fn new(inner: InMemoryStore, healthy: usize) -> Self {
            Self {
                inner,
                healthy: AtomicUsize::new(healthy),
            }
        }
    }

    #[async_trait]
    impl UnitOfWork for FailingAfter {
        async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
            let opened = self
                .healthy
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
            match opened {
                Ok(_) => self.inner.begin().await,
                Err(_) => Err(StoreError::Backend("boom".to_string())),
            }
        }
    }

    fn name(s: &str) -> PartyName {
        PartyName::parse(s).unwrap()
    }

    async fn setup(producer_stock: i64) -> (InMemoryStore, TransferEngine, ProductId) {
        let store = InMemoryStore::new();
        let product = Catalog::register(
            &store,
            NewProduct {
                name: "Weighted blanket".to_string(),
                material: "cotton".to_string(),
                stock: producer_stock,
                production_capacity: 10_000,
            },
        )
        .await
        .unwrap();
        (store, TransferEngine::new(EngineConfig::default()), product.id)
    }

    fn ship(product_id: ProductId, quantity: i64, distributor: &str) -> ProducerToDistributor {
        ProducerToDistributor {
            product_id,
            quantity,
            distributor: name(distributor),
            requested_by: name(distributor),
        }
    }

    fn supply(product_id: ProductId, quantity: i64, distributor: &str, seller: &str) -> DistributorToSeller {
        DistributorToSeller {
            product_id,
            quantity,
            distributor: name(distributor),
            seller: name(seller),
        }
    }

    fn sell(product_id: ProductId, quantity: i64, role: ActorRole, expected_total: Option<Money>) -> SellerToCustomer {
        SellerToCustomer {
            product_id,
            quantity,
            seller: name("s1"),
            customer: name("c1"),
            requester_role: role,
            expected_total,
        }
    }

    async fn quantity(store: &InMemoryStore, engine: &TransferEngine, owner: StockOwner, product_id: ProductId) -> i64 {
        engine.stock_quantity(store, &owner, product_id).await.unwrap()
    }

    /// Seller `s1` holding `units` of a published product priced at 5.00.
    async fn published(units: i64) -> (InMemoryStore, TransferEngine, ProductId) {
        let (store, engine, product_id) = setup(100).await;
        engine
            .transfer_producer_to_distributor(&store, ship(product_id, units, "d1"))
            .await
            .unwrap();
        engine
            .transfer_distributor_to_seller(&store, supply(product_id, units, "d1", "s1"))
            .await
            .unwrap();
        ListingProjection::publish(&store, &name("s1"), product_id, Money::from_cents(500))
            .await
            .unwrap();
        (store, engine, product_id)
    }

    #[tokio::test]
    async fn end_to_end_scenario() {
        let (store, engine, p1) = setup(100).await;
        let d1 = StockOwner::Distributor(name("d1"));
        let s1 = StockOwner::Seller(name("s1"));

        // Producer -> D1: 30
        let receipt = engine
            .transfer_producer_to_distributor(&store, ship(p1, 30, "d1"))
            .await
            .unwrap();
        assert_eq!(receipt.source_remaining, 70);
        assert_eq!(receipt.destination_balance, Some(30));
        assert_eq!(engine.transfers(&store, &JournalFilter::all()).await.unwrap().len(), 1);

        // D1 -> S1: 50 exceeds what D1 holds
        let err = engine
            .transfer_distributor_to_seller(&store, supply(p1, 50, "d1", "s1"))
            .await
            .unwrap_err();
        assert_eq!(err, TransferError::Domain(DomainError::insufficient_stock(30, 50)));
        assert_eq!(quantity(&store, &engine, d1.clone(), p1).await, 30);
        assert_eq!(quantity(&store, &engine, s1.clone(), p1).await, 0);
        assert_eq!(engine.transfers(&store, &JournalFilter::all()).await.unwrap().len(), 1);

        // D1 -> S1: 20
        let receipt = engine
            .transfer_distributor_to_seller(&store, supply(p1, 20, "d1", "s1"))
            .await
            .unwrap();
        assert_eq!(receipt.source_remaining, 10);
        assert_eq!(receipt.destination_balance, Some(20));
        assert_eq!(receipt.listing_sync, ListingSync::NotPublished);

        // S1 publishes at 5.00
        let listing = ListingProjection::publish(&store, &name("s1"), p1, Money::from_cents(500))
            .await
            .unwrap();
        assert_eq!(listing.quantity, 20);
        assert_eq!(listing.availability, Availability::InStock);

        // Customer buys all 20
        let receipt = engine
            .transfer_seller_to_customer(&store, sell(p1, 20, ActorRole::Customer, None))
            .await
            .unwrap();
        assert_eq!(receipt.total, Some(Money::from_cents(10_000)));
        assert_eq!(receipt.source_remaining, 0);
        assert_eq!(receipt.destination_balance, None);
        assert_eq!(receipt.record.status, Some(OrderStatus::new(OrderStatus::PENDING)));

        match receipt.listing_sync {
            ListingSync::Synced(listing) => {
                assert_eq!(listing.quantity, 0);
                assert_eq!(listing.availability, Availability::OutOfStock);
            }
            other => panic!("expected a synced listing, got {other:?}"),
        }
        assert_eq!(quantity(&store, &engine, s1, p1).await, 0);
        assert_eq!(quantity(&store, &engine, StockOwner::Producer, p1).await, 70);
        assert_eq!(engine.transfers(&store, &JournalFilter::all()).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn conservation_across_boundaries() {
        let (store, engine, product_id) = setup(100).await;
        let d1 = StockOwner::Distributor(name("d1"));
        let s1 = StockOwner::Seller(name("s1"));

        engine
            .transfer_producer_to_distributor(&store, ship(product_id, 40, "d1"))
            .await
            .unwrap();
        engine
            .transfer_distributor_to_seller(&store, supply(product_id, 15, "d1", "s1"))
            .await
            .unwrap();

        let producer = quantity(&store, &engine, StockOwner::Producer, product_id).await;
        let distributor = quantity(&store, &engine, d1, product_id).await;
        let seller = quantity(&store, &engine, s1, product_id).await;
        assert_eq!((producer, distributor, seller), (60, 25, 15));
        assert_eq!(producer + distributor + seller, 100);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_transfers_never_overdraw_the_source() {
        let (store, engine, product_id) = setup(100).await;
        let store = Arc::new(store);
        let engine = Arc::new(engine);

        let mut handles = Vec::new();
        for (quantity, distributor) in [(60, "d1"), (70, "d2")] {
            let store = store.clone();
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .transfer_producer_to_distributor(store.as_ref(), ship(product_id, quantity, distributor))
                    .await
            }));
        }

        let mut successes = 0;
        let mut shortfalls = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(TransferError::Domain(DomainError::InsufficientStock { .. })) => shortfalls += 1,
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        assert_eq!((successes, shortfalls), (1, 1));

        let remaining = quantity(&store, &engine, StockOwner::Producer, product_id).await;
        assert!(remaining == 40 || remaining == 30, "remaining = {remaining}");
        assert_eq!(engine.transfers(store.as_ref(), &JournalFilter::all()).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn many_small_concurrent_sales_sell_out_exactly() {
        let (store, engine, product_id) = published(10).await;
        let store = Arc::new(store);
        let engine = Arc::new(engine);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .transfer_seller_to_customer(store.as_ref(), sell(product_id, 1, ActorRole::Seller, None))
                    .await
            }));
        }

        let mut sold = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                sold += 1;
            }
        }
        assert_eq!(sold, 10);

        let listing = ListingProjection::get(store.as_ref(), &name("s1"), product_id).await.unwrap();
        assert_eq!(listing.quantity, 0);
        assert_eq!(listing.availability, Availability::OutOfStock);
        assert_eq!(quantity(&store, &engine, StockOwner::Seller(name("s1")), product_id).await, 0);
    }

    #[tokio::test]
    async fn restock_resyncs_published_listing() {
        let (store, engine, product_id) = published(5).await;
        engine
            .transfer_producer_to_distributor(&store, ship(product_id, 7, "d1"))
            .await
            .unwrap();

        let receipt = engine
            .transfer_distributor_to_seller(&store, supply(product_id, 7, "d1", "s1"))
            .await
            .unwrap();

        match receipt.listing_sync {
            ListingSync::Synced(listing) => {
                assert_eq!(listing.quantity, 12);
                assert!(listing.is_consistent_with(12));
            }
            other => panic!("expected a synced listing, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_resync_keeps_the_committed_transfer() {
        let (store, engine, product_id) = published(5).await;
        engine
            .transfer_producer_to_distributor(&store, ship(product_id, 3, "d1"))
            .await
            .unwrap();

        // The transfer's own transaction opens; the resync that follows cannot.
        let flaky = FailingAfter::new(store.clone(), 1);
        let receipt = engine
            .transfer_distributor_to_seller(&flaky, supply(product_id, 3, "d1", "s1"))
            .await
            .unwrap();

        assert!(matches!(&receipt.listing_sync, ListingSync::Failed(msg) if msg.contains("boom")));
        assert_eq!(receipt.source_remaining, 0);
        assert_eq!(receipt.destination_balance, Some(8));
        assert_eq!(quantity(&store, &engine, StockOwner::Distributor(name("d1")), product_id).await, 0);
        assert_eq!(quantity(&store, &engine, StockOwner::Seller(name("s1")), product_id).await, 8);

        let journal = engine.transfers(&store, &JournalFilter::all()).await.unwrap();
        assert!(journal.contains(&receipt.record));
        let supplies = journal
            .iter()
            .filter(|r| r.boundary == TransferBoundary::DistributorToSeller)
            .count();
        assert_eq!(supplies, 2);

        // The listing lags until the next resync repairs it.
        let stale = ListingProjection::get(&store, &name("s1"), product_id).await.unwrap();
        assert_eq!(stale.quantity, 5);
        let repaired = ListingProjection::resync(&store, &name("s1"), product_id).await.unwrap();
        assert_eq!(repaired.quantity, 8);
        assert!(repaired.is_consistent_with(8));
    }

    #[tokio::test]
    async fn sale_without_listing_is_not_published() {
        let (store, engine, product_id) = setup(100).await;
        engine
            .transfer_producer_to_distributor(&store, ship(product_id, 10, "d1"))
            .await
            .unwrap();
        engine
            .transfer_distributor_to_seller(&store, supply(product_id, 10, "d1", "s1"))
            .await
            .unwrap();

        let err = engine
            .transfer_seller_to_customer(&store, sell(product_id, 1, ActorRole::Customer, None))
            .await
            .unwrap_err();
        assert_eq!(err, TransferError::Domain(DomainError::NotPublished));
        assert_eq!(quantity(&store, &engine, StockOwner::Seller(name("s1")), product_id).await, 10);
    }

    #[tokio::test]
    async fn sale_from_forced_out_of_stock_listing_is_rejected() {
        let (store, engine, product_id) = published(5).await;
        ListingProjection::update_availability(&store, &name("s1"), product_id, Availability::OutOfStock)
            .await
            .unwrap();

        let err = engine
            .transfer_seller_to_customer(&store, sell(product_id, 1, ActorRole::Customer, None))
            .await
            .unwrap_err();
        assert_eq!(err, TransferError::Domain(DomainError::OutOfStock));
    }

    #[tokio::test]
    async fn sale_above_listed_quantity_is_rejected() {
        let (store, engine, product_id) = published(5).await;
        let err = engine
            .transfer_seller_to_customer(&store, sell(product_id, 6, ActorRole::Customer, None))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            TransferError::Domain(DomainError::InsufficientQuantity {
                available: 5,
                requested: 6
            })
        );
    }

    #[tokio::test]
    async fn total_mismatch_rejects_before_any_write() {
        let (store, engine, product_id) = published(5).await;

        let err = engine
            .transfer_seller_to_customer(&store, sell(product_id, 2, ActorRole::Customer, Some(Money::from_cents(998))))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            TransferError::Domain(DomainError::TotalMismatch {
                expected: Money::from_cents(1_000),
                provided: Money::from_cents(998),
            })
        );
        assert_eq!(quantity(&store, &engine, StockOwner::Seller(name("s1")), product_id).await, 5);

        let customer_orders = JournalFilter {
            tier: Some(Tier::Customer),
            ..JournalFilter::default()
        };
        assert!(engine.transfers(&store, &customer_orders).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn total_within_one_cent_is_accepted() {
        let (store, engine, product_id) = published(5).await;
        let receipt = engine
            .transfer_seller_to_customer(&store, sell(product_id, 2, ActorRole::Seller, Some(Money::from_cents(999))))
            .await
            .unwrap();
        assert_eq!(receipt.total, Some(Money::from_cents(1_000)));
        assert_eq!(receipt.record.status, Some(OrderStatus::new(OrderStatus::COMPLETED)));
    }

    #[tokio::test]
    async fn order_status_is_free_form_and_idempotent() {
        let (store, engine, product_id) = published(5).await;
        let receipt = engine
            .transfer_seller_to_customer(&store, sell(product_id, 1, ActorRole::Customer, None))
            .await
            .unwrap();
        let id = receipt.record.id;

        assert_eq!(engine.order_status(&store, id).await.unwrap().as_str(), "pending");
        for status in ["completed", "confirmed", "confirmed"] {
            let record = engine
                .update_order_status(&store, id, OrderStatus::new(status))
                .await
                .unwrap();
            assert_eq!(record.status, Some(OrderStatus::new(status)));
        }
        assert_eq!(engine.order_status(&store, id).await.unwrap().as_str(), "confirmed");
    }

    #[tokio::test]
    async fn journal_filters_by_party_and_tier() {
        let (store, engine, product_id) = setup(100).await;
        engine
            .transfer_producer_to_distributor(&store, ship(product_id, 10, "d1"))
            .await
            .unwrap();
        engine
            .transfer_producer_to_distributor(&store, ship(product_id, 10, "d2"))
            .await
            .unwrap();
        engine
            .transfer_distributor_to_seller(&store, supply(product_id, 4, "d1", "s1"))
            .await
            .unwrap();

        let d1 = engine
            .transfers(&store, &JournalFilter::involving(Tier::Distributor, name("d1")))
            .await
            .unwrap();
        assert_eq!(
            d1.iter().map(|r| r.boundary).collect::<Vec<_>>(),
            vec![TransferBoundary::ProducerToDistributor, TransferBoundary::DistributorToSeller]
        );

        let s1 = engine
            .transfers(&store, &JournalFilter::involving(Tier::Seller, name("s1")))
            .await
            .unwrap();
        assert_eq!(s1.len(), 1);

        let fetched = engine.transfer(&store, s1[0].id).await.unwrap();
        assert_eq!(fetched, s1[0]);
    }

    #[tokio::test]
    async fn availability_checks_never_mutate_state() {
        let (store, engine, product_id) = published(5).await;
        let before = engine.transfers(&store, &JournalFilter::all()).await.unwrap();

        for _ in 0..3 {
            let check = engine
                .check_seller_stock(&store, &name("s1"), product_id, 5)
                .await
                .unwrap();
            assert!(check.available);
            let check = engine
                .check_distributor_stock(&store, &name("d1"), product_id, 1)
                .await
                .unwrap();
            assert!(!check.available);
            assert_eq!(check.current_stock, 0);
        }

        assert_eq!(engine.transfers(&store, &JournalFilter::all()).await.unwrap(), before);
        assert_eq!(quantity(&store, &engine, StockOwner::Seller(name("s1")), product_id).await, 5);
    }

    #[tokio::test]
    async fn holdings_are_reported_per_tier() {
        let (store, engine, product_id) = setup(100).await;
        engine
            .transfer_producer_to_distributor(&store, ship(product_id, 10, "d1"))
            .await
            .unwrap();
        engine
            .transfer_producer_to_distributor(&store, ship(product_id, 5, "d2"))
            .await
            .unwrap();

        let all = engine.stock_records(&store, Tier::Distributor, None).await.unwrap();
        assert_eq!(all.len(), 2);

        let d2 = engine
            .stock_records(&store, Tier::Distributor, Some(&name("d2")))
            .await
            .unwrap();
        assert_eq!(d2.len(), 1);
        assert_eq!(d2[0].quantity, 5);
    }

    #[tokio::test]
    async fn lock_timeout_surfaces_as_retryable_conflict() {
        let config = EngineConfig {
            lock_timeout: std::time::Duration::from_millis(20),
            ..EngineConfig::default()
        };
        let store = InMemoryStore::from_config(&config);
        let engine = TransferEngine::new(config);

        let _held = store.begin().await.unwrap();
        let err = engine
            .transfer_producer_to_distributor(&store, ship(ProductId::new(1), 1, "d1"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
