//! Errors surfaced by engine operations.

use thiserror::Error;

use blanketchain_core::DomainError;

use crate::store::StoreError;

/// Failure of an engine operation.
///
/// Every failure leaves stock, listings and the journal exactly as they were
/// before the call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Lock timeout, deadlock or serialization failure. Safe to retry.
    #[error("concurrent modification: {0}")]
    Conflict(String),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for TransferError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(msg) => TransferError::Conflict(msg),
            other => TransferError::Store(other),
        }
    }
}

impl TransferError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransferError::Conflict(_))
    }

    /// Stable machine-readable code for binding layers.
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::Domain(err) => err.code(),
            TransferError::Conflict(_) => "conflict",
            TransferError::Store(_) => "storage_error",
        }
    }

    pub fn as_domain(&self) -> Option<&DomainError> {
        match self {
            TransferError::Domain(err) => Some(err),
            _ => None,
        }
    }
}

pub type TransferResult<T> = Result<T, TransferError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_conflicts_become_retryable_transfer_conflicts() {
        let err = TransferError::from(StoreError::Conflict("lock timeout".into()));
        assert!(err.is_retryable());
        assert_eq!(err.code(), "conflict");
    }

    #[test]
    fn domain_codes_pass_through() {
        let err = TransferError::from(DomainError::OutOfStock);
        assert!(!err.is_retryable());
        assert_eq!(err.code(), "out_of_stock");
        assert_eq!(err.as_domain(), Some(&DomainError::OutOfStock));
    }

    #[test]
    fn other_store_failures_are_not_retryable() {
        let err = TransferError::from(StoreError::Backend("connection reset".into()));
        assert!(!err.is_retryable());
        assert_eq!(err.code(), "storage_error");
    }
}
