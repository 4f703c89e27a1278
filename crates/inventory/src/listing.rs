use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use blanketchain_core::{DomainError, DomainResult, ListingId, Money, PartyName, ProductId, StockOwner};

use crate::stock::StockRecord;

/// Whether a listing can currently be bought from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Availability {
    #[serde(rename = "In stock")]
    InStock,
    #[serde(rename = "Out of stock")]
    OutOfStock,
}

impl Availability {
    pub fn for_quantity(quantity: i64) -> Self {
        if quantity > 0 {
            Availability::InStock
        } else {
            Availability::OutOfStock
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Availability::InStock => "in_stock",
            Availability::OutOfStock => "out_of_stock",
        }
    }
}

impl core::str::FromStr for Availability {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(' ', "_").as_str() {
            "in_stock" => Ok(Availability::InStock),
            "out_of_stock" => Ok(Availability::OutOfStock),
            other => Err(DomainError::validation(format!("unknown availability: {other}"))),
        }
    }
}

/// A seller's published offer for one product.
///
/// `quantity` mirrors the seller's stock record. `availability_forced` is set
/// when the seller marked the listing out of stock while units remained; resync
/// leaves such an override alone until the stock itself reaches zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingRecord {
    pub id: ListingId,
    pub seller: PartyName,
    pub product_id: ProductId,
    pub price: Money,
    pub quantity: i64,
    pub availability: Availability,
    pub availability_forced: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ListingRecord {
    /// Publish a listing mirroring the seller's current stock record.
    pub fn publish(
        id: ListingId,
        stock: &StockRecord,
        price: Money,
        at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let seller = match &stock.owner {
            StockOwner::Seller(name) => name.clone(),
            other => {
                return Err(DomainError::validation(format!(
                    "only sellers can publish listings (owner: {other})"
                )));
            }
        };
        ensure_price(price)?;

        Ok(Self {
            id,
            seller,
            product_id: stock.product_id,
            price,
            quantity: stock.quantity,
            availability: Availability::for_quantity(stock.quantity),
            availability_forced: false,
            created_at: at,
            updated_at: at,
        })
    }

    /// Re-derive quantity and availability from the seller's stock quantity.
    ///
    /// Zero stock is authoritative (always `OutOfStock`, override cleared);
    /// positive stock flips `OutOfStock` back only when it was not forced.
    pub fn resync(&mut self, stock_quantity: i64, at: DateTime<Utc>) {
        self.quantity = stock_quantity;
        if stock_quantity == 0 {
            self.availability = Availability::OutOfStock;
            self.availability_forced = false;
        } else if self.availability == Availability::OutOfStock && !self.availability_forced {
            self.availability = Availability::InStock;
        }
        self.updated_at = at;
    }

    pub fn set_price(&mut self, price: Money, at: DateTime<Utc>) -> DomainResult<()> {
        ensure_price(price)?;
        self.price = price;
        self.updated_at = at;
        Ok(())
    }

    /// Seller-initiated availability override.
    pub fn set_availability(&mut self, availability: Availability, at: DateTime<Utc>) -> DomainResult<()> {
        match availability {
            Availability::InStock if self.quantity == 0 => return Err(DomainError::OutOfStock),
            Availability::InStock => self.availability_forced = false,
            Availability::OutOfStock => self.availability_forced = self.quantity > 0,
        }
        self.availability = availability;
        self.updated_at = at;
        Ok(())
    }

    /// Listing-side preconditions for selling `quantity` units.
    pub fn ensure_can_sell(&self, quantity: i64) -> DomainResult<()> {
        if self.availability == Availability::OutOfStock {
            return Err(DomainError::OutOfStock);
        }
        if self.quantity < quantity {
            return Err(DomainError::InsufficientQuantity {
                available: self.quantity,
                requested: quantity,
            });
        }
        Ok(())
    }

    /// `price * quantity`.
    pub fn total_for(&self, quantity: i64) -> DomainResult<Money> {
        self.price.times(quantity)
    }

    /// True when quantity mirrors `stock_quantity` and zero stock reads out of stock.
    pub fn is_consistent_with(&self, stock_quantity: i64) -> bool {
        self.quantity == stock_quantity
            && (stock_quantity != 0 || self.availability == Availability::OutOfStock)
    }
}

fn ensure_price(price: Money) -> DomainResult<()> {
    if !price.is_positive() {
        return Err(DomainError::validation("price must be positive"));
    }
    Ok(())
}
