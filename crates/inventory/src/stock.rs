use serde::{Deserialize, Serialize};

use blanketchain_core::{DomainError, DomainResult, ProductId, StockOwner};

/// Quantity on hand for one (owner, product) pair.
///
/// Records are created lazily on the first credit and never deleted; a zero
/// quantity is a valid, queryable state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRecord {
    pub owner: StockOwner,
    pub product_id: ProductId,
    pub quantity: i64,
}

impl StockRecord {
    pub fn empty(owner: StockOwner, product_id: ProductId) -> Self {
        Self {
            owner,
            product_id,
            quantity: 0,
        }
    }

    /// Quantity after applying `delta`, or `InsufficientStock` if it would go negative.
    pub fn after_delta(&self, delta: i64) -> DomainResult<i64> {
        let next = self
            .quantity
            .checked_add(delta)
            .ok_or_else(|| DomainError::validation("stock quantity overflows"))?;
        if next < 0 {
            return Err(DomainError::insufficient_stock(self.quantity, delta.saturating_neg()));
        }
        Ok(next)
    }

    pub fn can_supply(&self, quantity: i64) -> bool {
        self.quantity >= quantity
    }
}

/// Transfer quantities must be strictly positive.
pub fn validate_quantity(quantity: i64) -> DomainResult<()> {
    if quantity <= 0 {
        return Err(DomainError::validation("quantity must be positive"));
    }
    Ok(())
}

/// Balances on both sides of a movement, computed before anything is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferPlan {
    pub source_after: i64,
    pub destination_after: i64,
}

impl TransferPlan {
    /// Plan moving `quantity` from `source` to a destination currently holding
    /// `destination_before` units.
    pub fn new(source: &StockRecord, destination_before: i64, quantity: i64) -> DomainResult<Self> {
        validate_quantity(quantity)?;
        if !source.can_supply(quantity) {
            return Err(DomainError::insufficient_stock(source.quantity, quantity));
        }
        let destination_after = destination_before
            .checked_add(quantity)
            .ok_or_else(|| DomainError::validation("stock quantity overflows"))?;
        Ok(Self {
            source_after: source.quantity - quantity,
            destination_after,
        })
    }
}

/// Result of a non-mutating availability pre-flight check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityCheck {
    pub available: bool,
    pub current_stock: i64,
    pub message: String,
}

impl AvailabilityCheck {
    pub fn evaluate(record: Option<&StockRecord>, required: i64) -> Self {
        match record {
            None => Self {
                available: false,
                current_stock: 0,
                message: "no stock record for this owner and product".to_string(),
            },
            Some(r) if r.can_supply(required) => Self {
                available: true,
                current_stock: r.quantity,
                message: "stock available".to_string(),
            },
            Some(r) => Self {
                available: false,
                current_stock: r.quantity,
                message: format!(
                    "insufficient stock (available: {}, required: {required})",
                    r.quantity
                ),
            },
        }
    }
}
