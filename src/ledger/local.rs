use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use super::{aggregate, Ledger, LedgerError};
use crate::domain::{ProcessorKind, SettledPayment, SummaryItem, TimeWindow};

/// In-process ledger. Concurrent upserts from every worker go straight to
/// the sharded map; range queries scan it.
#[derive(Default)]
pub struct LocalLedger {
    payments: DashMap<Uuid, SettledPayment>,
}

impl LocalLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Ledger for LocalLedger {
    async fn store(&self, payment: &SettledPayment) -> Result<(), LedgerError> {
        if let Some(previous) = self.payments.insert(payment.correlation_id, payment.clone()) {
            tracing::debug!(
                correlation_id = %payment.correlation_id,
                previous = %previous.processor,
                processor = %payment.processor,
                "Overwrote existing ledger record"
            );
        }
        Ok(())
    }

    async fn contains(&self, correlation_id: &Uuid) -> Result<bool, LedgerError> {
        Ok(self.payments.contains_key(correlation_id))
    }

    async fn range_query(
        &self,
        processor: ProcessorKind,
        window: &TimeWindow,
    ) -> Result<SummaryItem, LedgerError> {
        let snapshot: Vec<SettledPayment> = self
            .payments
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        aggregate(&snapshot, processor, window)
    }

    async fn purge(&self) -> Result<(), LedgerError> {
        self.payments.clear();
        Ok(())
    }

    async fn len(&self) -> Result<usize, LedgerError> {
        Ok(self.payments.len())
    }

    fn is_shared(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Cents;
    use chrono::{DateTime, Duration, Utc};
    use rust_decimal::Decimal;
    use std::sync::Arc;

    fn payment(
        amount: i64,
        processor: ProcessorKind,
        requested_at: DateTime<Utc>,
    ) -> SettledPayment {
        SettledPayment {
            correlation_id: Uuid::new_v4(),
            amount: Cents::new(amount),
            requested_at,
            processor,
        }
    }

    #[tokio::test]
    async fn test_store_is_idempotent() {
        let ledger = LocalLedger::new();
        let record = payment(1990, ProcessorKind::Default, Utc::now());

        ledger.store(&record).await.unwrap();
        ledger.store(&record).await.unwrap();

        assert_eq!(ledger.len().await.unwrap(), 1);
        let summary = ledger.summary(&TimeWindow::unbounded()).await.unwrap();
        assert_eq!(summary.default, SummaryItem::new(1, Cents::new(1990)));
    }

    #[tokio::test]
    async fn test_repeated_id_overwrites_processor() {
        let ledger = LocalLedger::new();
        let mut record = payment(500, ProcessorKind::Default, Utc::now());
        ledger.store(&record).await.unwrap();

        record.processor = ProcessorKind::Fallback;
        ledger.store(&record).await.unwrap();

        let summary = ledger.summary(&TimeWindow::unbounded()).await.unwrap();
        assert_eq!(summary.default, SummaryItem::default());
        assert_eq!(summary.fallback, SummaryItem::new(1, Cents::new(500)));
    }

    #[tokio::test]
    async fn test_range_query_respects_inclusive_window() {
        let ledger = LocalLedger::new();
        let start = Utc::now();
        let end = start + Duration::seconds(10);

        ledger.store(&payment(100, ProcessorKind::Default, start)).await.unwrap();
        ledger.store(&payment(200, ProcessorKind::Default, end)).await.unwrap();
        ledger
            .store(&payment(400, ProcessorKind::Default, end + Duration::milliseconds(1)))
            .await
            .unwrap();
        ledger
            .store(&payment(800, ProcessorKind::Default, start - Duration::milliseconds(1)))
            .await
            .unwrap();

        let window = TimeWindow::new(Some(start), Some(end));
        let item = ledger.range_query(ProcessorKind::Default, &window).await.unwrap();
        assert_eq!(item, SummaryItem::new(2, Cents::new(300)));

        let open_start = TimeWindow::new(None, Some(end));
        let item = ledger.range_query(ProcessorKind::Default, &open_start).await.unwrap();
        assert_eq!(item, SummaryItem::new(3, Cents::new(1100)));
    }

    #[tokio::test]
    async fn test_ten_thousand_payments_sum_exactly() {
        let ledger = LocalLedger::new();
        let now = Utc::now();
        for _ in 0..10_000 {
            ledger.store(&payment(1999, ProcessorKind::Fallback, now)).await.unwrap();
        }

        let item = ledger
            .range_query(ProcessorKind::Fallback, &TimeWindow::unbounded())
            .await
            .unwrap();
        assert_eq!(item.total_requests, 10_000);
        assert_eq!(item.total_amount.to_string(), "199900.00");
    }

    #[tokio::test]
    async fn test_overflowing_total_is_an_error() {
        let ledger = LocalLedger::new();
        let huge = Cents::from_amount(Decimal::new(50_000_000_000_000_000, 0)).unwrap();
        for _ in 0..2 {
            ledger
                .store(&SettledPayment {
                    correlation_id: Uuid::new_v4(),
                    amount: huge,
                    requested_at: Utc::now(),
                    processor: ProcessorKind::Default,
                })
                .await
                .unwrap();
        }

        let err = ledger.summary(&TimeWindow::unbounded()).await.unwrap_err();

        assert!(matches!(err, LedgerError::Overflow(_)));
    }

    #[tokio::test]
    async fn test_concurrent_upserts() {
        let ledger = Arc::new(LocalLedger::new());
        let now = Utc::now();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    ledger.store(&payment(1, ProcessorKind::Default, now)).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(ledger.len().await.unwrap(), 800);
    }

    #[tokio::test]
    async fn test_purge_empties_ledger() {
        let ledger = LocalLedger::new();
        ledger.store(&payment(1, ProcessorKind::Default, Utc::now())).await.unwrap();

        ledger.purge().await.unwrap();

        assert_eq!(ledger.len().await.unwrap(), 0);
        assert_eq!(ledger.summary(&TimeWindow::unbounded()).await.unwrap(), Default::default());
    }
}
