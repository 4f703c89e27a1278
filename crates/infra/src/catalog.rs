//! Product catalog owned by the producer tier.

use tracing::instrument;

use blanketchain_core::{DomainError, ProductId};
use blanketchain_inventory::{NewProduct, Product};

use crate::error::{TransferError, TransferResult};
use crate::store::{discard, finish, UnitOfWork};

pub struct Catalog;

impl Catalog {
    /// Register a product; its `stock` becomes the producer's on-hand quantity.
    #[instrument(skip_all, fields(name = %product.name), err)]
    pub async fn register(uow: &dyn UnitOfWork, product: NewProduct) -> TransferResult<Product> {
        product.validate()?;

        let mut tx = uow.begin().await?;
        let result = tx.insert_product(product).await.map_err(TransferError::from);
        let product = finish(tx, result).await?;

        tracing::info!(product_id = %product.id, stock = product.stock, "product registered");
        Ok(product)
    }

    pub async fn get(uow: &dyn UnitOfWork, id: ProductId) -> TransferResult<Product> {
        let mut tx = uow.begin().await?;
        let result = match tx.product(id).await {
            Ok(Some(product)) => Ok(product),
            Ok(None) => Err(DomainError::not_found(format!("product {id}")).into()),
            Err(err) => Err(err.into()),
        };
        discard(tx, result).await
    }

    pub async fn list(uow: &dyn UnitOfWork) -> TransferResult<Vec<Product>> {
        let mut tx = uow.begin().await?;
        let result = tx.products().await.map_err(TransferError::from);
        discard(tx, result).await
    }
}
