//! Walks one product down the whole chain against the configured store:
//! producer → distributor → seller → published listing → customer.
//!
//! The store is Postgres when `USE_PERSISTENT_STORES=true` and `DATABASE_URL`
//! is set, in-memory otherwise.

use blanketchain_core::{ActorRole, Money, PartyName};
use blanketchain_infra::{
    Catalog, DistributorToSeller, EngineConfig, InMemoryStore, ListingProjection, PostgresStore,
    ProducerToDistributor, SellerToCustomer, TransferEngine, TransferResult, UnitOfWork,
};
use blanketchain_inventory::NewProduct;

#[tokio::main]
async fn main() -> TransferResult<()> {
    blanketchain_observability::init();

    let config = EngineConfig::from_env();
    let store: Box<dyn UnitOfWork> = match config.persistent_url() {
        Some(_) => {
            let store = PostgresStore::connect(&config).await?;
            store.ensure_schema().await?;
            tracing::info!("using postgres store");
            Box::new(store)
        }
        None => {
            if config.use_persistent_stores {
                tracing::warn!("USE_PERSISTENT_STORES=true but DATABASE_URL is not set, falling back to in-memory");
            }
            Box::new(InMemoryStore::from_config(&config))
        }
    };

    let engine = TransferEngine::new(config);
    walk_the_chain(&engine, store.as_ref()).await
}

async fn walk_the_chain(engine: &TransferEngine, uow: &dyn UnitOfWork) -> TransferResult<()> {
    let distributor = PartyName::parse("north-distribution")?;
    let seller = PartyName::parse("corner-linens")?;
    let customer = PartyName::parse("walk-in")?;

    let product = Catalog::register(
        uow,
        NewProduct {
            name: "Classic wool blanket".to_string(),
            material: "wool".to_string(),
            stock: 100,
            production_capacity: 500,
        },
    )
    .await?;

    let shipped = engine
        .transfer_producer_to_distributor(
            uow,
            ProducerToDistributor {
                product_id: product.id,
                quantity: 30,
                distributor: distributor.clone(),
                requested_by: distributor.clone(),
            },
        )
        .await?;
    tracing::info!(producer = shipped.source_remaining, distributor = ?shipped.destination_balance, "shipped");

    let supplied = engine
        .transfer_distributor_to_seller(
            uow,
            DistributorToSeller {
                product_id: product.id,
                quantity: 20,
                distributor,
                seller: seller.clone(),
            },
        )
        .await?;
    tracing::info!(distributor = supplied.source_remaining, seller = ?supplied.destination_balance, "supplied");

    let listing = ListingProjection::publish(uow, &seller, product.id, Money::from_cents(500)).await?;
    tracing::info!(price = %listing.price, quantity = listing.quantity, "published");

    let sold = engine
        .transfer_seller_to_customer(
            uow,
            SellerToCustomer {
                product_id: product.id,
                quantity: 20,
                seller,
                customer,
                requester_role: ActorRole::Customer,
                expected_total: None,
            },
        )
        .await?;
    tracing::info!(
        seller = sold.source_remaining,
        total = ?sold.total,
        listing = ?sold.listing_sync,
        "sold"
    );

    Ok(())
}
