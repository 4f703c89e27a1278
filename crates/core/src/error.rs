//! Domain error model.

use thiserror::Error;

use crate::money::Money;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Every variant is a deterministic precondition or consistency failure that is
/// detected before any mutation. Storage failures live in the infra layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. non-positive quantity, blank identity).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Unknown product or unknown stock owner.
    #[error("not found: {0}")]
    NotFound(String),

    /// A stock record does not hold enough units for the requested debit.
    #[error("insufficient stock (available: {available}, requested: {requested})")]
    InsufficientStock { available: i64, requested: i64 },

    /// A listing advertises fewer units than the customer requested.
    #[error("insufficient listed quantity (available: {available}, requested: {requested})")]
    InsufficientQuantity { available: i64, requested: i64 },

    /// The listing is marked out of stock.
    #[error("listing is out of stock")]
    OutOfStock,

    /// A uniqueness rule was violated (e.g. a second listing for the same pair).
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The caller's expected total does not match the computed one.
    #[error("total value mismatch (expected: {expected}, provided: {provided})")]
    TotalMismatch { expected: Money, provided: Money },

    /// The seller has no listing for the product.
    #[error("product is not published by this seller")]
    NotPublished,
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn already_exists(what: impl Into<String>) -> Self {
        Self::AlreadyExists(what.into())
    }

    pub fn insufficient_stock(available: i64, requested: i64) -> Self {
        Self::InsufficientStock {
            available,
            requested,
        }
    }

    /// Stable machine-readable code for binding layers.
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::Validation(_) => "validation_error",
            DomainError::NotFound(_) => "not_found",
            DomainError::InsufficientStock { .. } => "insufficient_stock",
            DomainError::InsufficientQuantity { .. } => "insufficient_quantity",
            DomainError::OutOfStock => "out_of_stock",
            DomainError::AlreadyExists(_) => "already_exists",
            DomainError::TotalMismatch { .. } => "total_mismatch",
            DomainError::NotPublished => "not_published",
        }
    }
}
