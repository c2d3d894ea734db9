// ============================================================================
// Ledger & Aggregator
// ============================================================================
//
// The durable record of settled payments, keyed by correlation id.
//
// - store()        idempotent upsert; a repeated id overwrites, never duplicates
// - range_query()  count and cents total for one processor over a window
// - summary()      both processors over the same window
//
// Backends:
// - LocalLedger   per-replica, in process; replicas merge via their peer
// - SharedLedger  one Redis hash seen by every replica; no merge needed
//
// ============================================================================

mod local;
mod shared;

pub use local::LocalLedger;
pub use shared::SharedLedger;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{MoneyError, ProcessorKind, SettledPayment, Summary, SummaryItem, TimeWindow};

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Aggregate overflow: {0}")]
    Overflow(#[from] MoneyError),
}

#[async_trait]
pub trait Ledger: Send + Sync {
    async fn store(&self, payment: &SettledPayment) -> Result<(), LedgerError>;

    async fn contains(&self, correlation_id: &Uuid) -> Result<bool, LedgerError>;

    async fn range_query(
        &self,
        processor: ProcessorKind,
        window: &TimeWindow,
    ) -> Result<SummaryItem, LedgerError>;

    async fn summary(&self, window: &TimeWindow) -> Result<Summary, LedgerError> {
        Ok(Summary {
            default: self.range_query(ProcessorKind::Default, window).await?,
            fallback: self.range_query(ProcessorKind::Fallback, window).await?,
        })
    }

    /// Drop every record.
    async fn purge(&self) -> Result<(), LedgerError>;

    async fn len(&self) -> Result<usize, LedgerError>;

    /// Whether every replica reads this same ledger.
    fn is_shared(&self) -> bool;
}

/// Fold the records of `processor` that fall inside `window`.
pub(crate) fn aggregate<'a>(
    payments: impl IntoIterator<Item = &'a SettledPayment>,
    processor: ProcessorKind,
    window: &TimeWindow,
) -> Result<SummaryItem, LedgerError> {
    let mut item = SummaryItem::default();
    for payment in payments
        .into_iter()
        .filter(|p| p.processor == processor && window.contains(p.requested_at))
    {
        item.record(payment.amount)?;
    }
    Ok(item)
}
