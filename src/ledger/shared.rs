use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use uuid::Uuid;

use super::{aggregate, Ledger, LedgerError};
use crate::domain::{ProcessorKind, SettledPayment, SummaryItem, TimeWindow};

/// Redis hash: correlation id -> settled payment JSON.
pub const LEDGER_KEY: &str = "payments:ledger";

/// Ledger shared by every replica through one Redis hash. HSET makes the
/// upsert idempotent per correlation id.
pub struct SharedLedger {
    conn: MultiplexedConnection,
}

impl SharedLedger {
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl Ledger for SharedLedger {
    async fn store(&self, payment: &SettledPayment) -> Result<(), LedgerError> {
        let record = serde_json::to_string(payment)?;
        let mut conn = self.conn.clone();
        redis::cmd("HSET")
            .arg(LEDGER_KEY)
            .arg(payment.correlation_id.to_string())
            .arg(record)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn contains(&self, correlation_id: &Uuid) -> Result<bool, LedgerError> {
        let mut conn = self.conn.clone();
        let exists: bool = redis::cmd("HEXISTS")
            .arg(LEDGER_KEY)
            .arg(correlation_id.to_string())
            .query_async(&mut conn)
            .await?;
        Ok(exists)
    }

    async fn range_query(
        &self,
        processor: ProcessorKind,
        window: &TimeWindow,
    ) -> Result<SummaryItem, LedgerError> {
        let mut conn = self.conn.clone();
        let records: Vec<String> = redis::cmd("HVALS")
            .arg(LEDGER_KEY)
            .query_async(&mut conn)
            .await?;

        let payments: Vec<SettledPayment> = records
            .iter()
            .filter_map(|raw| match serde_json::from_str::<SettledPayment>(raw) {
                Ok(payment) => Some(payment),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unreadable ledger record");
                    None
                }
            })
            .collect();

        aggregate(&payments, processor, window)
    }

    async fn purge(&self) -> Result<(), LedgerError> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL").arg(LEDGER_KEY).query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn len(&self) -> Result<usize, LedgerError> {
        let mut conn = self.conn.clone();
        let len: usize = redis::cmd("HLEN").arg(LEDGER_KEY).query_async(&mut conn).await?;
        Ok(len)
    }

    fn is_shared(&self) -> bool {
        true
    }
}
