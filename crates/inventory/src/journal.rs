use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use blanketchain_core::{ActorRole, DomainError, Money, PartyName, ProductId, Tier, TransferId};

/// The tier boundary a transfer crosses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferBoundary {
    ProducerToDistributor,
    DistributorToSeller,
    SellerToCustomer,
}

impl TransferBoundary {
    pub const ALL: [TransferBoundary; 3] = [
        TransferBoundary::ProducerToDistributor,
        TransferBoundary::DistributorToSeller,
        TransferBoundary::SellerToCustomer,
    ];

    pub fn source_tier(self) -> Tier {
        match self {
            TransferBoundary::ProducerToDistributor => Tier::Producer,
            TransferBoundary::DistributorToSeller => Tier::Distributor,
            TransferBoundary::SellerToCustomer => Tier::Seller,
        }
    }

    pub fn destination_tier(self) -> Tier {
        match self {
            TransferBoundary::ProducerToDistributor => Tier::Distributor,
            TransferBoundary::DistributorToSeller => Tier::Seller,
            TransferBoundary::SellerToCustomer => Tier::Customer,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransferBoundary::ProducerToDistributor => "producer_to_distributor",
            TransferBoundary::DistributorToSeller => "distributor_to_seller",
            TransferBoundary::SellerToCustomer => "seller_to_customer",
        }
    }
}

impl core::str::FromStr for TransferBoundary {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransferBoundary::ALL
            .into_iter()
            .find(|b| b.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown transfer boundary: {s}")))
    }
}

/// Customer order status.
///
/// Deliberately free-form: any string is accepted on update and there is no
/// transition graph. Only the two initial values have names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderStatus(String);

impl OrderStatus {
    pub const PENDING: &'static str = "pending";
    pub const COMPLETED: &'static str = "completed";

    pub fn new(status: impl Into<String>) -> Self {
        Self(status.into())
    }

    /// A seller placing the order fulfils it on the spot; anyone else waits for
    /// the seller's confirmation.
    pub fn initial_for(role: ActorRole) -> Self {
        if role.fulfils_directly() {
            Self::new(Self::COMPLETED)
        } else {
            Self::new(Self::PENDING)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable journal entry for one completed stock movement.
///
/// `source` is `None` for producer transfers (the producer is unnamed).
/// `total` and `status` are only present on customer orders; `status` is the
/// one field that may change after the record is written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub id: TransferId,
    pub boundary: TransferBoundary,
    pub source: Option<PartyName>,
    pub destination: PartyName,
    pub product_id: ProductId,
    pub quantity: i64,
    pub total: Option<Money>,
    pub status: Option<OrderStatus>,
    pub requested_by: Option<PartyName>,
    pub occurred_at: DateTime<Utc>,
}

impl TransferRecord {
    pub fn producer_to_distributor(
        product_id: ProductId,
        quantity: i64,
        distributor: PartyName,
        requested_by: PartyName,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TransferId::new(),
            boundary: TransferBoundary::ProducerToDistributor,
            source: None,
            destination: distributor,
            product_id,
            quantity,
            total: None,
            status: None,
            requested_by: Some(requested_by),
            occurred_at,
        }
    }

    pub fn distributor_to_seller(
        product_id: ProductId,
        quantity: i64,
        distributor: PartyName,
        seller: PartyName,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TransferId::new(),
            boundary: TransferBoundary::DistributorToSeller,
            source: Some(distributor),
            destination: seller,
            product_id,
            quantity,
            total: None,
            status: None,
            requested_by: None,
            occurred_at,
        }
    }

    pub fn seller_to_customer(
        product_id: ProductId,
        quantity: i64,
        seller: PartyName,
        customer: PartyName,
        total: Money,
        status: OrderStatus,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TransferId::new(),
            boundary: TransferBoundary::SellerToCustomer,
            source: Some(seller),
            destination: customer,
            product_id,
            quantity,
            total: Some(total),
            status: Some(status),
            requested_by: None,
            occurred_at,
        }
    }

    pub fn is_customer_order(&self) -> bool {
        self.boundary == TransferBoundary::SellerToCustomer
    }
}

/// Read-side filter over the journal.
///
/// `tier` + `party` select records where that party is the source (when the
/// boundary's source tier matches) or the destination (when the destination
/// tier matches). Absent fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalFilter {
    pub tier: Option<Tier>,
    pub party: Option<PartyName>,
    pub product_id: Option<ProductId>,
}

impl JournalFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn involving(tier: Tier, party: PartyName) -> Self {
        Self {
            tier: Some(tier),
            party: Some(party),
            product_id: None,
        }
    }

    pub fn for_product(mut self, product_id: ProductId) -> Self {
        self.product_id = Some(product_id);
        self
    }

    /// Boundaries whose source side is selected by `tier`.
    pub fn source_boundaries(&self) -> Vec<TransferBoundary> {
        TransferBoundary::ALL
            .into_iter()
            .filter(|b| self.tier.is_none_or(|t| b.source_tier() == t))
            .collect()
    }

    /// Boundaries whose destination side is selected by `tier`.
    pub fn destination_boundaries(&self) -> Vec<TransferBoundary> {
        TransferBoundary::ALL
            .into_iter()
            .filter(|b| self.tier.is_none_or(|t| b.destination_tier() == t))
            .collect()
    }

    pub fn matches(&self, record: &TransferRecord) -> bool {
        if self.product_id.is_some_and(|p| p != record.product_id) {
            return false;
        }

        let party_is = |name: Option<&PartyName>| match &self.party {
            None => true,
            Some(p) => name == Some(p),
        };

        let as_source = self.source_boundaries().contains(&record.boundary) && party_is(record.source.as_ref());
        let as_destination =
            self.destination_boundaries().contains(&record.boundary) && party_is(Some(&record.destination));

        as_source || as_destination
    }
}
