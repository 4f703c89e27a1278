//! `blanketchain-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod error;
pub mod id;
pub mod money;
pub mod tier;

pub use error::{DomainError, DomainResult};
pub use id::{ListingId, PartyName, ProductId, TransferId};
pub use money::Money;
pub use tier::{ActorRole, StockOwner, Tier};
