use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use blanketchain_core::{PartyName, ProductId, StockOwner, Tier, TransferId};
use blanketchain_inventory::{
    JournalFilter, ListingRecord, NewProduct, OrderStatus, Product, StockRecord, TransferRecord,
};

use super::{StoreError, Transaction, UnitOfWork};
use crate::config::EngineConfig;

#[derive(Debug, Clone, Default)]
struct State {
    next_product_id: i64,
    products: BTreeMap<ProductId, Product>,
    stock: BTreeMap<(StockOwner, ProductId), i64>,
    listings: BTreeMap<(PartyName, ProductId), ListingRecord>,
    transfers: Vec<TransferRecord>,
}

/// In-memory transactional store.
///
/// Intended for tests/dev. Not optimized for performance: a transaction holds
/// the whole store exclusively (serializable by construction) and works on a
/// copy that replaces the shared state on commit.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
    lock_timeout: Duration,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(EngineConfig::default().lock_timeout)
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            lock_timeout,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::with_lock_timeout(config.lock_timeout)
    }
}

#[async_trait]
impl UnitOfWork for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        let guard = tokio::time::timeout(self.lock_timeout, self.state.clone().lock_owned())
            .await
            .map_err(|_| {
                StoreError::Conflict(format!(
                    "timed out after {:?} waiting for the store lock",
                    self.lock_timeout
                ))
            })?;
        let working = guard.clone();
        Ok(Box::new(InMemoryTransaction { guard, working }))
    }
}

struct InMemoryTransaction {
    guard: OwnedMutexGuard<State>,
    working: State,
}

impl InMemoryTransaction {
    fn product_stock(&self, product_id: ProductId) -> Option<StockRecord> {
        self.working.products.get(&product_id).map(|p| StockRecord {
            owner: StockOwner::Producer,
            product_id,
            quantity: p.stock,
        })
    }

    fn read_stock(&self, owner: &StockOwner, product_id: ProductId) -> Option<StockRecord> {
        match owner {
            StockOwner::Producer => self.product_stock(product_id),
            _ => self
                .working
                .stock
                .get(&(owner.clone(), product_id))
                .map(|quantity| StockRecord {
                    owner: owner.clone(),
                    product_id,
                    quantity: *quantity,
                }),
        }
    }
}

#[async_trait]
impl Transaction for InMemoryTransaction {
    async fn insert_product(&mut self, product: NewProduct) -> Result<Product, StoreError> {
        self.working.next_product_id += 1;
        let id = ProductId::new(self.working.next_product_id);
        let product = product.into_product(id);
        self.working.products.insert(id, product.clone());
        Ok(product)
    }

    async fn product(&mut self, id: ProductId) -> Result<Option<Product>, StoreError> {
        Ok(self.working.products.get(&id).cloned())
    }

    async fn products(&mut self) -> Result<Vec<Product>, StoreError> {
        Ok(self.working.products.values().cloned().collect())
    }

    async fn stock(&mut self, owner: &StockOwner, product_id: ProductId) -> Result<Option<StockRecord>, StoreError> {
        Ok(self.read_stock(owner, product_id))
    }

    async fn stock_for_update(
        &mut self,
        owner: &StockOwner,
        product_id: ProductId,
    ) -> Result<Option<StockRecord>, StoreError> {
        // The transaction already holds the whole store.
        Ok(self.read_stock(owner, product_id))
    }

    async fn adjust_stock(&mut self, owner: &StockOwner, product_id: ProductId, delta: i64) -> Result<i64, StoreError> {
        if !self.working.products.contains_key(&product_id) {
            return Err(StoreError::MissingRow(format!("product {product_id}")));
        }

        let slot = match owner {
            StockOwner::Producer => match self.working.products.get_mut(&product_id) {
                Some(product) => &mut product.stock,
                None => return Err(StoreError::MissingRow(format!("product {product_id}"))),
            },
            _ => self.working.stock.entry((owner.clone(), product_id)).or_insert(0),
        };

        let next = *slot + delta;
        if next < 0 {
            return Err(StoreError::Constraint(format!(
                "stock for {owner} / product {product_id} would become {next}"
            )));
        }
        *slot = next;
        Ok(next)
    }

    async fn stock_records(&mut self, tier: Tier, owner: Option<&PartyName>) -> Result<Vec<StockRecord>, StoreError> {
        if tier == Tier::Producer {
            return Ok(self
                .working
                .products
                .keys()
                .filter_map(|id| self.product_stock(*id))
                .collect());
        }

        Ok(self
            .working
            .stock
            .iter()
            .filter(|((o, _), _)| o.tier() == tier && owner.is_none_or(|name| o.name() == Some(name)))
            .map(|((o, product_id), quantity)| StockRecord {
                owner: o.clone(),
                product_id: *product_id,
                quantity: *quantity,
            })
            .collect())
    }

    async fn listing(&mut self, seller: &PartyName, product_id: ProductId) -> Result<Option<ListingRecord>, StoreError> {
        Ok(self.working.listings.get(&(seller.clone(), product_id)).cloned())
    }

    async fn listing_for_update(
        &mut self,
        seller: &PartyName,
        product_id: ProductId,
    ) -> Result<Option<ListingRecord>, StoreError> {
        self.listing(seller, product_id).await
    }

    async fn insert_listing(&mut self, listing: &ListingRecord) -> Result<(), StoreError> {
        let key = (listing.seller.clone(), listing.product_id);
        if self.working.listings.contains_key(&key) {
            return Err(StoreError::UniqueViolation(format!(
                "listing for seller {} and product {}",
                listing.seller, listing.product_id
            )));
        }
        self.working.listings.insert(key, listing.clone());
        Ok(())
    }

    async fn update_listing(&mut self, listing: &ListingRecord) -> Result<(), StoreError> {
        match self.working.listings.get_mut(&(listing.seller.clone(), listing.product_id)) {
            Some(existing) => {
                *existing = listing.clone();
                Ok(())
            }
            None => Err(StoreError::MissingRow(format!("listing {}", listing.id))),
        }
    }

    async fn delete_listing(&mut self, seller: &PartyName, product_id: ProductId) -> Result<bool, StoreError> {
        Ok(self.working.listings.remove(&(seller.clone(), product_id)).is_some())
    }

    async fn listings_for_seller(&mut self, seller: &PartyName) -> Result<Vec<ListingRecord>, StoreError> {
        Ok(self
            .working
            .listings
            .values()
            .filter(|l| &l.seller == seller)
            .cloned()
            .collect())
    }

    async fn append_transfer(&mut self, record: &TransferRecord) -> Result<(), StoreError> {
        if self.working.transfers.iter().any(|t| t.id == record.id) {
            return Err(StoreError::UniqueViolation(format!("transfer {}", record.id)));
        }
        self.working.transfers.push(record.clone());
        Ok(())
    }

    async fn transfer(&mut self, id: TransferId) -> Result<Option<TransferRecord>, StoreError> {
        Ok(self.working.transfers.iter().find(|t| t.id == id).cloned())
    }

    async fn transfers(&mut self, filter: &JournalFilter) -> Result<Vec<TransferRecord>, StoreError> {
        Ok(self
            .working
            .transfers
            .iter()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect())
    }

    async fn set_order_status(&mut self, id: TransferId, status: &OrderStatus) -> Result<bool, StoreError> {
        match self
            .working
            .transfers
            .iter_mut()
            .find(|t| t.id == id && t.is_customer_order())
        {
            Some(order) => {
                order.status = Some(status.clone());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let InMemoryTransaction { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
