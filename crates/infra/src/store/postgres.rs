//! Postgres-backed transactional store.
//!
//! Every [`Transaction`] is one database transaction. Row locks come from
//! `SELECT ... FOR UPDATE`, and `lock_timeout` is set per transaction so a
//! blocked transfer fails instead of hanging.
//!
//! ## Error Mapping
//!
//! | PostgreSQL Error Code | StoreError | Scenario |
//! |-----------------------|------------|----------|
//! | `40001` | `Conflict` | Serialization failure |
//! | `40P01` | `Conflict` | Deadlock detected |
//! | `55P03` | `Conflict` | Lock not available within `lock_timeout` |
//! | `23505` | `UniqueViolation` | Second listing for the same (seller, product) |
//! | `23514` | `Constraint` | Stock would become negative |
//! | `23503` | `MissingRow` | Unknown product referenced |
//! | Any other | `Backend` | Network errors, pool closed, etc. |

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row};
use tracing::instrument;
use uuid::Uuid;

use blanketchain_core::{ListingId, Money, PartyName, ProductId, StockOwner, Tier, TransferId};
use blanketchain_inventory::{
    Availability, JournalFilter, ListingRecord, NewProduct, OrderStatus, Product, StockRecord, TransferBoundary,
    TransferRecord,
};

use super::{StoreError, Transaction, UnitOfWork};
use crate::config::EngineConfig;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS products (
        id BIGSERIAL PRIMARY KEY,
        name TEXT NOT NULL,
        material TEXT NOT NULL,
        stock BIGINT NOT NULL CHECK (stock >= 0),
        production_capacity BIGINT NOT NULL CHECK (production_capacity >= 0)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS stock_records (
        tier TEXT NOT NULL CHECK (tier IN ('distributor', 'seller')),
        owner_name VARCHAR(100) NOT NULL,
        product_id BIGINT NOT NULL REFERENCES products (id),
        quantity BIGINT NOT NULL CHECK (quantity >= 0),
        PRIMARY KEY (tier, owner_name, product_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS listings (
        id UUID PRIMARY KEY,
        seller VARCHAR(100) NOT NULL,
        product_id BIGINT NOT NULL REFERENCES products (id),
        price_cents BIGINT NOT NULL CHECK (price_cents > 0),
        quantity BIGINT NOT NULL CHECK (quantity >= 0),
        availability TEXT NOT NULL,
        availability_forced BOOLEAN NOT NULL DEFAULT FALSE,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL,
        UNIQUE (seller, product_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS transfers (
        seq BIGSERIAL UNIQUE,
        id UUID PRIMARY KEY,
        boundary TEXT NOT NULL,
        source VARCHAR(100),
        destination VARCHAR(100) NOT NULL,
        product_id BIGINT NOT NULL REFERENCES products (id),
        quantity BIGINT NOT NULL CHECK (quantity > 0),
        total_cents BIGINT,
        status TEXT,
        requested_by VARCHAR(100),
        occurred_at TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS transfers_product_idx ON transfers (product_id)",
];

const LISTING_COLUMNS: &str =
    "id, seller, product_id, price_cents, quantity, availability, availability_forced, created_at, updated_at";

const TRANSFER_COLUMNS: &str =
    "id, boundary, source, destination, product_id, quantity, total_cents, status, requested_by, occurred_at";

/// Postgres-backed store.
///
/// `PgPool` is internally reference counted, so clones share one pool.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PostgresStore {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    /// Connect using `DATABASE_URL` from `config`.
    #[instrument(skip(config), err)]
    pub async fn connect(config: &EngineConfig) -> Result<Self, StoreError> {
        let url = config
            .database_url
            .as_deref()
            .ok_or_else(|| StoreError::Backend("DATABASE_URL is not set".to_string()))?;

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(config.lock_timeout)
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        Ok(Self::new(pool, config.lock_timeout))
    }

    /// Create tables and indexes if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl UnitOfWork for PostgresStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", self.lock_timeout.as_millis()))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_lock_timeout", e))?;

        Ok(Box::new(PgTransaction { tx }))
    }
}

struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

impl PgTransaction {
    async fn read_stock(
        &mut self,
        owner: &StockOwner,
        product_id: ProductId,
        for_update: bool,
    ) -> Result<Option<StockRecord>, StoreError> {
        let quantity: Option<i64> = match owner.name() {
            // NO KEY UPDATE leaves the key-share locks taken by foreign key checks unblocked.
            None => sqlx::query_scalar(&format!(
                "SELECT stock FROM products WHERE id = $1{}",
                if for_update { " FOR NO KEY UPDATE" } else { "" }
            ))
            .bind(product_id.get())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("read_producer_stock", e))?,
            Some(name) => sqlx::query_scalar(&format!(
                "SELECT quantity FROM stock_records WHERE tier = $1 AND owner_name = $2 AND product_id = $3{}",
                if for_update { " FOR UPDATE" } else { "" }
            ))
            .bind(owner.tier().as_str())
            .bind(name.as_str())
            .bind(product_id.get())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("read_stock", e))?,
        };

        Ok(quantity.map(|quantity| StockRecord {
            owner: owner.clone(),
            product_id,
            quantity,
        }))
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn insert_product(&mut self, product: NewProduct) -> Result<Product, StoreError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO products (name, material, stock, production_capacity)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(product.name.trim())
        .bind(product.material.trim())
        .bind(product.stock)
        .bind(product.production_capacity)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_product", e))?;

        Ok(product.into_product(ProductId::new(id)))
    }

    async fn product(&mut self, id: ProductId) -> Result<Option<Product>, StoreError> {
        let row = sqlx::query("SELECT id, name, material, stock, production_capacity FROM products WHERE id = $1")
            .bind(id.get())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("product", e))?;

        row.as_ref().map(product_from_row).transpose()
    }

    async fn products(&mut self) -> Result<Vec<Product>, StoreError> {
        let rows = sqlx::query("SELECT id, name, material, stock, production_capacity FROM products ORDER BY id")
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("products", e))?;

        rows.iter().map(product_from_row).collect()
    }

    async fn stock(&mut self, owner: &StockOwner, product_id: ProductId) -> Result<Option<StockRecord>, StoreError> {
        self.read_stock(owner, product_id, false).await
    }

    async fn stock_for_update(
        &mut self,
        owner: &StockOwner,
        product_id: ProductId,
    ) -> Result<Option<StockRecord>, StoreError> {
        self.read_stock(owner, product_id, true).await
    }

    async fn adjust_stock(&mut self, owner: &StockOwner, product_id: ProductId, delta: i64) -> Result<i64, StoreError> {
        match owner.name() {
            None => {
                let next: Option<i64> =
                    sqlx::query_scalar("UPDATE products SET stock = stock + $2 WHERE id = $1 RETURNING stock")
                        .bind(product_id.get())
                        .bind(delta)
                        .fetch_optional(&mut *self.tx)
                        .await
                        .map_err(|e| map_sqlx_error("adjust_producer_stock", e))?;
                next.ok_or_else(|| StoreError::MissingRow(format!("product {product_id}")))
            }
            Some(name) => sqlx::query_scalar(
                r#"
                INSERT INTO stock_records (tier, owner_name, product_id, quantity)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (tier, owner_name, product_id)
                DO UPDATE SET quantity = stock_records.quantity + EXCLUDED.quantity
                RETURNING quantity
                "#,
            )
            .bind(owner.tier().as_str())
            .bind(name.as_str())
            .bind(product_id.get())
            .bind(delta)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("adjust_stock", e)),
        }
    }

    async fn stock_records(&mut self, tier: Tier, owner: Option<&PartyName>) -> Result<Vec<StockRecord>, StoreError> {
        if tier == Tier::Producer {
            let rows = sqlx::query("SELECT id, stock FROM products ORDER BY id")
                .fetch_all(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx_error("producer_stock_records", e))?;

            return rows
                .iter()
                .map(|row| -> Result<StockRecord, StoreError> {
                    Ok(StockRecord {
                        owner: StockOwner::Producer,
                        product_id: ProductId::new(column(row, "id")?),
                        quantity: column(row, "stock")?,
                    })
                })
                .collect();
        }

        let rows = sqlx::query(
            r#"
            SELECT owner_name, product_id, quantity
            FROM stock_records
            WHERE tier = $1 AND ($2::text IS NULL OR owner_name = $2)
            ORDER BY owner_name, product_id
            "#,
        )
        .bind(tier.as_str())
        .bind(owner.map(PartyName::as_str))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("stock_records", e))?;

        rows.iter()
            .map(|row| -> Result<StockRecord, StoreError> {
                let name = party(column::<String>(row, "owner_name")?)?;
                Ok(StockRecord {
                    owner: StockOwner::from_parts(tier, Some(name)).map_err(decode_error)?,
                    product_id: ProductId::new(column(row, "product_id")?),
                    quantity: column(row, "quantity")?,
                })
            })
            .collect()
    }

    async fn listing(&mut self, seller: &PartyName, product_id: ProductId) -> Result<Option<ListingRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {LISTING_COLUMNS} FROM listings WHERE seller = $1 AND product_id = $2"
        ))
        .bind(seller.as_str())
        .bind(product_id.get())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("listing", e))?;

        row.as_ref().map(listing_from_row).transpose()
    }

    async fn listing_for_update(
        &mut self,
        seller: &PartyName,
        product_id: ProductId,
    ) -> Result<Option<ListingRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {LISTING_COLUMNS} FROM listings WHERE seller = $1 AND product_id = $2 FOR UPDATE"
        ))
        .bind(seller.as_str())
        .bind(product_id.get())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("listing_for_update", e))?;

        row.as_ref().map(listing_from_row).transpose()
    }

    async fn insert_listing(&mut self, listing: &ListingRecord) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO listings ({LISTING_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        ))
        .bind(*listing.id.as_uuid())
        .bind(listing.seller.as_str())
        .bind(listing.product_id.get())
        .bind(listing.price.cents())
        .bind(listing.quantity)
        .bind(listing.availability.as_str())
        .bind(listing.availability_forced)
        .bind(listing.created_at)
        .bind(listing.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_listing", e))?;
        Ok(())
    }

    async fn update_listing(&mut self, listing: &ListingRecord) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE listings
            SET price_cents = $2, quantity = $3, availability = $4, availability_forced = $5, updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(*listing.id.as_uuid())
        .bind(listing.price.cents())
        .bind(listing.quantity)
        .bind(listing.availability.as_str())
        .bind(listing.availability_forced)
        .bind(listing.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_listing", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::MissingRow(format!("listing {}", listing.id)));
        }
        Ok(())
    }

    async fn delete_listing(&mut self, seller: &PartyName, product_id: ProductId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM listings WHERE seller = $1 AND product_id = $2")
            .bind(seller.as_str())
            .bind(product_id.get())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_listing", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn listings_for_seller(&mut self, seller: &PartyName) -> Result<Vec<ListingRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {LISTING_COLUMNS} FROM listings WHERE seller = $1 ORDER BY product_id"
        ))
        .bind(seller.as_str())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("listings_for_seller", e))?;

        rows.iter().map(listing_from_row).collect()
    }

    async fn append_transfer(&mut self, record: &TransferRecord) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO transfers ({TRANSFER_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
        ))
        .bind(*record.id.as_uuid())
        .bind(record.boundary.as_str())
        .bind(record.source.as_ref().map(PartyName::as_str))
        .bind(record.destination.as_str())
        .bind(record.product_id.get())
        .bind(record.quantity)
        .bind(record.total.map(Money::cents))
        .bind(record.status.as_ref().map(OrderStatus::as_str))
        .bind(record.requested_by.as_ref().map(PartyName::as_str))
        .bind(record.occurred_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("append_transfer", e))?;
        Ok(())
    }

    async fn transfer(&mut self, id: TransferId) -> Result<Option<TransferRecord>, StoreError> {
        let row = sqlx::query(&format!("SELECT {TRANSFER_COLUMNS} FROM transfers WHERE id = $1"))
            .bind(*id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("transfer", e))?;

        row.as_ref().map(transfer_from_row).transpose()
    }

    async fn transfers(&mut self, filter: &JournalFilter) -> Result<Vec<TransferRecord>, StoreError> {
        let as_source: Vec<String> = filter
            .source_boundaries()
            .into_iter()
            .map(|b| b.as_str().to_string())
            .collect();
        let as_destination: Vec<String> = filter
            .destination_boundaries()
            .into_iter()
            .map(|b| b.as_str().to_string())
            .collect();

        let rows = sqlx::query(&format!(
            r#"
            SELECT {TRANSFER_COLUMNS}
            FROM transfers
            WHERE (
                (boundary = ANY($1::text[]) AND ($3::text IS NULL OR source = $3))
                OR (boundary = ANY($2::text[]) AND ($3::text IS NULL OR destination = $3))
            )
            AND ($4::bigint IS NULL OR product_id = $4)
            ORDER BY seq ASC
            "#
        ))
        .bind(as_source)
        .bind(as_destination)
        .bind(filter.party.as_ref().map(PartyName::as_str))
        .bind(filter.product_id.map(ProductId::get))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("transfers", e))?;

        rows.iter().map(transfer_from_row).collect()
    }

    async fn set_order_status(&mut self, id: TransferId, status: &OrderStatus) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE transfers SET status = $2 WHERE id = $1 AND boundary = $3")
            .bind(*id.as_uuid())
            .bind(status.as_str())
            .bind(TransferBoundary::SellerToCustomer.as_str())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("set_order_status", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let PgTransaction { tx } = *self;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        let PgTransaction { tx } = *self;
        tx.rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name)
        .map_err(|e| StoreError::Backend(format!("failed to decode column {name}: {e}")))
}

fn decode_error(err: blanketchain_core::DomainError) -> StoreError {
    StoreError::Backend(format!("stored row is invalid: {err}"))
}

fn party(raw: String) -> Result<PartyName, StoreError> {
    PartyName::parse(raw).map_err(decode_error)
}

fn product_from_row(row: &PgRow) -> Result<Product, StoreError> {
    Ok(Product {
        id: ProductId::new(column(row, "id")?),
        name: column(row, "name")?,
        material: column(row, "material")?,
        stock: column(row, "stock")?,
        production_capacity: column(row, "production_capacity")?,
    })
}

fn listing_from_row(row: &PgRow) -> Result<ListingRecord, StoreError> {
    let availability: String = column(row, "availability")?;
    Ok(ListingRecord {
        id: ListingId::from_uuid(column::<Uuid>(row, "id")?),
        seller: party(column(row, "seller")?)?,
        product_id: ProductId::new(column(row, "product_id")?),
        price: Money::from_cents(column(row, "price_cents")?),
        quantity: column(row, "quantity")?,
        availability: availability.parse::<Availability>().map_err(decode_error)?,
        availability_forced: column(row, "availability_forced")?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    })
}

fn transfer_from_row(row: &PgRow) -> Result<TransferRecord, StoreError> {
    let boundary: String = column(row, "boundary")?;
    let source: Option<String> = column(row, "source")?;
    let requested_by: Option<String> = column(row, "requested_by")?;
    let total: Option<i64> = column(row, "total_cents")?;
    let status: Option<String> = column(row, "status")?;

    Ok(TransferRecord {
        id: TransferId::from_uuid(column::<Uuid>(row, "id")?),
        boundary: boundary.parse::<TransferBoundary>().map_err(decode_error)?,
        source: source.map(party).transpose()?,
        destination: party(column(row, "destination")?)?,
        product_id: ProductId::new(column(row, "product_id")?),
        quantity: column(row, "quantity")?,
        total: total.map(Money::from_cents),
        status: status.map(OrderStatus::new),
        requested_by: requested_by.map(party).transpose()?,
        occurred_at: column(row, "occurred_at")?,
    })
}

/// Map a SQLx error to a `StoreError`.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("40001") | Some("40P01") | Some("55P03") => StoreError::Conflict(msg),
                Some("23505") => StoreError::UniqueViolation(msg),
                Some("23514") => StoreError::Constraint(msg),
                Some("23503") => StoreError::MissingRow(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Conflict(format!("timed out acquiring a connection in {}", operation))
        }
        sqlx::Error::PoolClosed => StoreError::Backend(format!("connection pool closed in {}", operation)),
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}
