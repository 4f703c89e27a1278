//! Order Journal: append-only record of completed transfers.

use blanketchain_core::{DomainError, PartyName, Tier, TransferId};
use blanketchain_inventory::{JournalFilter, TransferRecord};

use crate::error::TransferResult;
use crate::store::Transaction;

pub struct OrderJournal;

impl OrderJournal {
    pub async fn append(tx: &mut dyn Transaction, record: &TransferRecord) -> TransferResult<TransferId> {
        tx.append_transfer(record).await?;
        Ok(record.id)
    }

    pub async fn get(tx: &mut dyn Transaction, id: TransferId) -> TransferResult<TransferRecord> {
        tx.transfer(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("transfer {id}")).into())
    }

    /// Entries matching `filter`, oldest first.
    pub async fn list(tx: &mut dyn Transaction, filter: &JournalFilter) -> TransferResult<Vec<TransferRecord>> {
        Ok(tx.transfers(filter).await?)
    }

    /// Everything `identity` sent or received at `tier`.
    pub async fn list_by_filter(
        tx: &mut dyn Transaction,
        tier: Tier,
        identity: PartyName,
    ) -> TransferResult<Vec<TransferRecord>> {
        Self::list(tx, &JournalFilter::involving(tier, identity)).await
    }
}
