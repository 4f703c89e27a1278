//! Supply-chain tiers, stock owners and acting roles.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::id::PartyName;

/// Position in the supply chain (manufacturer -> distributor -> seller -> customer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Producer,
    Distributor,
    Seller,
    Customer,
}

impl Tier {
    /// Customers receive goods but never hold a stock record.
    pub fn holds_stock(self) -> bool {
        !matches!(self, Tier::Customer)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Producer => "producer",
            Tier::Distributor => "distributor",
            Tier::Seller => "seller",
            Tier::Customer => "customer",
        }
    }
}

impl core::fmt::Display for Tier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for Tier {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "producer" | "manufacturer" => Ok(Tier::Producer),
            "distributor" => Ok(Tier::Distributor),
            "seller" => Ok(Tier::Seller),
            "customer" => Ok(Tier::Customer),
            other => Err(DomainError::validation(format!("unknown tier: {other}"))),
        }
    }
}

/// Owner of a stock record.
///
/// The producer is a single, unnamed owner whose stock is the product's own
/// on-hand count; distributors and sellers are identified by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "tier", content = "name", rename_all = "lowercase")]
pub enum StockOwner {
    Producer,
    Distributor(PartyName),
    Seller(PartyName),
}

impl StockOwner {
    pub fn tier(&self) -> Tier {
        match self {
            StockOwner::Producer => Tier::Producer,
            StockOwner::Distributor(_) => Tier::Distributor,
            StockOwner::Seller(_) => Tier::Seller,
        }
    }

    pub fn name(&self) -> Option<&PartyName> {
        match self {
            StockOwner::Producer => None,
            StockOwner::Distributor(name) | StockOwner::Seller(name) => Some(name),
        }
    }

    /// Build an owner from a tier plus optional identity.
    pub fn from_parts(tier: Tier, name: Option<PartyName>) -> Result<Self, DomainError> {
        match (tier, name) {
            (Tier::Producer, _) => Ok(StockOwner::Producer),
            (Tier::Distributor, Some(name)) => Ok(StockOwner::Distributor(name)),
            (Tier::Seller, Some(name)) => Ok(StockOwner::Seller(name)),
            (Tier::Distributor | Tier::Seller, None) => Err(DomainError::validation(format!(
                "{tier} stock owner requires a name"
            ))),
            (Tier::Customer, _) => Err(DomainError::validation("customers do not hold stock")),
        }
    }
}

impl core::fmt::Display for StockOwner {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}:{}", self.tier(), name),
            None => write!(f, "{}", self.tier()),
        }
    }
}

/// Role of whoever is invoking an operation.
///
/// Decoupled from any credential type; the authentication layer maps its
/// principal onto one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorRole {
    Producer,
    Distributor,
    Seller,
    Customer,
}

impl ActorRole {
    /// A seller placing a customer order is fulfilling it directly.
    pub fn fulfils_directly(self) -> bool {
        matches!(self, ActorRole::Seller)
    }
}

impl core::str::FromStr for ActorRole {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "producer" | "manufacturer" => Ok(ActorRole::Producer),
            "distributor" => Ok(ActorRole::Distributor),
            "seller" => Ok(ActorRole::Seller),
            "customer" => Ok(ActorRole::Customer),
            other => Err(DomainError::validation(format!("unknown role: {other}"))),
        }
    }
}
