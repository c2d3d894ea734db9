use std::time::{Duration, Instant};
use tokio::sync::watch;

use super::dead_letter::{DeadLetter, DeadLetterQueue, DeadLetterReason};
use super::retry::{retry_with_backoff, RetryConfig, RetryResult};
use super::{SettlementGuarantee, SettlementOutcome, SettlementPolicy, WorkerContext};
use crate::coordination::{keys, CoordinationError, Reservation};
use crate::domain::{ProcessorKind, ProcessorPayment, QueueEntry, SettledPayment};
use crate::processor::ProcessorError;

/// Pause after a store error before reserving again.
const STORE_BACKOFF: Duration = Duration::from_millis(250);

fn stopping(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}

/// One settlement loop: reserve, settle, record, ack.
pub struct SettlementWorker {
    id: usize,
    holding: String,
    ctx: WorkerContext,
    dead_letters: DeadLetterQueue,
}

impl SettlementWorker {
    pub fn new(id: usize, holding: String, ctx: WorkerContext) -> Self {
        let dead_letters = DeadLetterQueue::new(ctx.store.clone());
        Self {
            id,
            holding,
            ctx,
            dead_letters,
        }
    }

    pub fn holding(&self) -> &str {
        &self.holding
    }

    /// Drain the queue until `shutdown` flips to true. An attempt in progress
    /// is always finished first.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        self.recover_holding().await;
        tracing::debug!(worker = self.id, holding = %self.holding, "Settlement worker started");

        while !stopping(&shutdown) {
            if let Err(e) = self.process_next().await {
                tracing::warn!(worker = self.id, error = %e, "Coordination store error");
                tokio::time::sleep(STORE_BACKOFF).await;
                // A failed ack or release leaves the payment in the holding list.
                self.recover_holding().await;
            }
        }

        tracing::debug!(worker = self.id, "Settlement worker stopped");
    }

    /// Move anything left in this worker's holding list back to the head of
    /// the queue.
    async fn recover_holding(&self) {
        match self.ctx.store.recover(keys::PAYMENTS_QUEUE, &self.holding).await {
            Ok(0) => {}
            Ok(recovered) => tracing::info!(
                worker = self.id,
                recovered = recovered,
                "Returned stranded in-flight payments to the queue"
            ),
            Err(e) => {
                tracing::warn!(worker = self.id, error = %e, "Failed to recover holding list")
            }
        }
    }

    /// Settle at most one payment. `None` when nothing arrived within the
    /// reserve timeout.
    pub async fn process_next(&self) -> Result<Option<SettlementOutcome>, CoordinationError> {
        let Some(reservation) = self
            .ctx
            .store
            .reserve(keys::PAYMENTS_QUEUE, &self.holding, self.ctx.config.reserve_timeout)
            .await?
        else {
            return Ok(None);
        };

        let entry = match QueueEntry::decode(&reservation.payload) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::error!(
                    worker = self.id,
                    payload = %reservation.payload,
                    error = %e,
                    "Discarding undecodable queue entry"
                );
                self.ctx.store.ack(&reservation).await?;
                return Ok(Some(SettlementOutcome::Discarded));
            }
        };

        if self.ctx.config.guarantee == SettlementGuarantee::LedgerChecked {
            match self.ctx.ledger.contains(&entry.correlation_id).await {
                Ok(false) => {}
                Ok(true) => {
                    tracing::debug!(
                        worker = self.id,
                        correlation_id = %entry.correlation_id,
                        "Payment already in ledger, skipping"
                    );
                    self.ctx.store.ack(&reservation).await?;
                    return Ok(Some(SettlementOutcome::AlreadySettled));
                }
                Err(e) => {
                    // Without the check the payment could be charged twice.
                    tracing::warn!(
                        worker = self.id,
                        correlation_id = %entry.correlation_id,
                        error = %e,
                        "Ledger check failed, requeueing"
                    );
                    self.ctx.store.release(&reservation, &reservation.payload).await?;
                    self.ctx.metrics.record_requeue();
                    return Ok(Some(SettlementOutcome::Requeued));
                }
            }
        }

        let outcome = match self.attempt(&entry).await {
            Ok(processor) => self.record(&reservation, &entry, processor).await?,
            Err(error) => self.requeue(&reservation, &entry, error).await?,
        };
        Ok(Some(outcome))
    }

    /// Send to the processor(s) the policy picks. Returns who accepted.
    async fn attempt(&self, entry: &QueueEntry) -> Result<ProcessorKind, ProcessorError> {
        let payment = ProcessorPayment::from(entry);

        match &self.ctx.config.policy {
            SettlementPolicy::FollowArbiter => {
                let target = self.ctx.decisions.current().service;
                self.send(target, &payment).await.map(|()| target)
            }
            SettlementPolicy::DefaultFirst {
                default_attempts,
                retry_delay,
            } => {
                let retry = RetryConfig::fixed(*default_attempts, *retry_delay);
                let this = self;
                let payment = &payment;
                let result =
                    retry_with_backoff(&retry, move |_| this.send(ProcessorKind::Default, payment))
                        .await;

                match result {
                    RetryResult::Success { .. } => Ok(ProcessorKind::Default),
                    RetryResult::Failed { attempts, .. } => {
                        tracing::debug!(
                            worker = self.id,
                            correlation_id = %entry.correlation_id,
                            attempts = attempts,
                            "Default exhausted, trying fallback"
                        );
                        self.send(ProcessorKind::Fallback, payment)
                            .await
                            .map(|()| ProcessorKind::Fallback)
                    }
                }
            }
        }
    }

    async fn send(
        &self,
        processor: ProcessorKind,
        payment: &ProcessorPayment,
    ) -> Result<(), ProcessorError> {
        let started = Instant::now();
        let result = self.ctx.client.send(processor, payment).await;
        self.ctx
            .metrics
            .record_attempt(processor, started.elapsed().as_secs_f64(), result.is_ok());

        if let Err(e) = &result {
            tracing::debug!(
                worker = self.id,
                correlation_id = %payment.correlation_id,
                processor = %processor,
                error = %e,
                "Settlement attempt failed"
            );
        }
        result
    }

    async fn record(
        &self,
        reservation: &Reservation,
        entry: &QueueEntry,
        processor: ProcessorKind,
    ) -> Result<SettlementOutcome, CoordinationError> {
        let settled = SettledPayment::from_entry(entry, processor);
        let ledger = &self.ctx.ledger;
        let settled_ref = &settled;
        let written =
            retry_with_backoff(&RetryConfig::ledger_write(), move |_| ledger.store(settled_ref))
                .await;

        match written {
            RetryResult::Success { .. } => {
                self.ctx.store.ack(reservation).await?;
                self.ctx.metrics.record_settled(processor);
                tracing::debug!(
                    worker = self.id,
                    correlation_id = %entry.correlation_id,
                    processor = %processor,
                    "Payment settled"
                );
                Ok(SettlementOutcome::Settled(processor))
            }
            RetryResult::Failed { error, attempts } => {
                // Money has moved; resubmitting could charge twice.
                tracing::error!(
                    worker = self.id,
                    correlation_id = %entry.correlation_id,
                    processor = %processor,
                    amount = %entry.amount,
                    attempts = attempts,
                    error = %error,
                    "CRITICAL: processor accepted payment but ledger write failed"
                );
                self.dead_letter(entry, DeadLetterReason::LedgerWriteFailed, error.to_string())
                    .await?;
                self.ctx.store.ack(reservation).await?;
                Ok(SettlementOutcome::DeadLettered(DeadLetterReason::LedgerWriteFailed))
            }
        }
    }

    async fn requeue(
        &self,
        reservation: &Reservation,
        entry: &QueueEntry,
        error: ProcessorError,
    ) -> Result<SettlementOutcome, CoordinationError> {
        let next = entry.next_attempt();

        if let Some(max_attempts) = self.ctx.config.max_attempts {
            if next.attempts >= max_attempts {
                self.dead_letter(&next, DeadLetterReason::RetriesExhausted, error.to_string())
                    .await?;
                self.ctx.store.ack(reservation).await?;
                return Ok(SettlementOutcome::DeadLettered(DeadLetterReason::RetriesExhausted));
            }
        }

        tracing::warn!(
            worker = self.id,
            correlation_id = %entry.correlation_id,
            attempts = next.attempts,
            error = %error,
            "Settlement failed, requeueing"
        );

        self.ctx.store.release(reservation, &next.encode()?).await?;
        self.ctx.metrics.record_requeue();

        let delay = self.ctx.config.requeue_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(SettlementOutcome::Requeued)
    }

    async fn dead_letter(
        &self,
        entry: &QueueEntry,
        reason: DeadLetterReason,
        error: String,
    ) -> Result<(), CoordinationError> {
        let letter = DeadLetter {
            entry: entry.clone(),
            reason,
            attempts: entry.attempts,
            failed_at: chrono::Utc::now(),
            error,
        };
        self.dead_letters.add(&letter).await?;
        self.ctx.metrics.record_dead_letter(reason.as_str());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::{MemoryStore, WorkQueue};
    use crate::domain::{Cents, SummaryItem, TimeWindow};
    use crate::ledger::{Ledger, LedgerError, LocalLedger};
    use crate::metrics::Metrics;
    use crate::settlement::SettlementConfig;
    use crate::testing::{FixedDecision, FlakyStore, ScriptedProcessor};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Arc;
    use uuid::Uuid;

    struct Harness {
        store: Arc<MemoryStore>,
        client: Arc<ScriptedProcessor>,
        decisions: Arc<FixedDecision>,
        ledger: Arc<dyn Ledger>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_ledger(Arc::new(LocalLedger::new()))
        }

        fn with_ledger(ledger: Arc<dyn Ledger>) -> Self {
            Self {
                store: Arc::new(MemoryStore::new()),
                client: Arc::new(ScriptedProcessor::new()),
                decisions: Arc::new(FixedDecision::new(ProcessorKind::Default)),
                ledger,
            }
        }

        fn worker(&self, config: SettlementConfig) -> SettlementWorker {
            let ctx = WorkerContext {
                store: self.store.clone(),
                client: self.client.clone(),
                decisions: self.decisions.clone(),
                ledger: self.ledger.clone(),
                metrics: Arc::new(Metrics::new().unwrap()),
                config,
            };
            SettlementWorker::new(0, keys::holding_list("test", 0), ctx)
        }

        async fn enqueue(&self, entry: &QueueEntry) {
            self.store
                .enqueue(keys::PAYMENTS_QUEUE, &entry.encode().unwrap())
                .await
                .unwrap();
        }

        async fn queued(&self) -> Vec<QueueEntry> {
            self.store
                .peek(keys::PAYMENTS_QUEUE, 100)
                .await
                .unwrap()
                .iter()
                .map(|raw| QueueEntry::decode(raw).unwrap())
                .collect()
        }
    }

    fn config(policy: SettlementPolicy) -> SettlementConfig {
        SettlementConfig {
            policy,
            requeue_delay: Duration::ZERO,
            reserve_timeout: Duration::from_millis(20),
            ..SettlementConfig::default()
        }
    }

    fn default_first() -> SettlementPolicy {
        SettlementPolicy::DefaultFirst {
            default_attempts: 3,
            retry_delay: Duration::from_millis(1),
        }
    }

    fn entry(cents: i64) -> QueueEntry {
        QueueEntry::new(Uuid::new_v4(), Cents::new(cents), Utc::now())
    }

    struct BrokenLedger;

    #[async_trait]
    impl Ledger for BrokenLedger {
        async fn store(&self, _payment: &SettledPayment) -> Result<(), LedgerError> {
            Err(serde_json::from_str::<u8>("broken").unwrap_err().into())
        }

        async fn contains(&self, _correlation_id: &Uuid) -> Result<bool, LedgerError> {
            Err(serde_json::from_str::<u8>("broken").unwrap_err().into())
        }

        async fn range_query(
            &self,
            _processor: ProcessorKind,
            _window: &TimeWindow,
        ) -> Result<SummaryItem, LedgerError> {
            Ok(SummaryItem::default())
        }

        async fn purge(&self) -> Result<(), LedgerError> {
            Ok(())
        }

        async fn len(&self) -> Result<usize, LedgerError> {
            Ok(0)
        }

        fn is_shared(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_empty_queue_yields_nothing() {
        let harness = Harness::new();
        let worker = harness.worker(config(SettlementPolicy::FollowArbiter));

        assert_eq!(worker.process_next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_follows_arbiter_decision() {
        let harness = Harness::new();
        harness.decisions.set(ProcessorKind::Fallback);
        let worker = harness.worker(config(SettlementPolicy::FollowArbiter));
        let payment = entry(10000);
        harness.enqueue(&payment).await;

        let outcome = worker.process_next().await.unwrap();

        assert_eq!(outcome, Some(SettlementOutcome::Settled(ProcessorKind::Fallback)));
        assert_eq!(harness.client.sent(), vec![(ProcessorKind::Fallback, payment.correlation_id)]);
        assert_eq!(harness.store.depth(worker.holding()).await.unwrap(), 0);
        assert_eq!(harness.ledger.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_default_failing_three_times_settles_on_fallback() {
        let harness = Harness::new();
        harness
            .client
            .script_sends(ProcessorKind::Default, &[false, false, false]);
        let worker = harness.worker(config(default_first()));
        let payment = entry(1990);
        harness.enqueue(&payment).await;

        let outcome = worker.process_next().await.unwrap();

        assert_eq!(outcome, Some(SettlementOutcome::Settled(ProcessorKind::Fallback)));
        assert_eq!(harness.client.sends_to(ProcessorKind::Default), 3);
        assert_eq!(harness.client.sends_to(ProcessorKind::Fallback), 1);

        let summary = harness.ledger.summary(&TimeWindow::unbounded()).await.unwrap();
        assert_eq!(summary.fallback, SummaryItem::new(1, Cents::new(1990)));
        assert_eq!(summary.default, SummaryItem::default());
    }

    #[tokio::test]
    async fn test_default_first_stops_at_first_success() {
        let harness = Harness::new();
        harness.client.script_sends(ProcessorKind::Default, &[false, true]);
        let worker = harness.worker(config(default_first()));
        harness.enqueue(&entry(500)).await;

        let outcome = worker.process_next().await.unwrap();

        assert_eq!(outcome, Some(SettlementOutcome::Settled(ProcessorKind::Default)));
        assert_eq!(harness.client.sends_to(ProcessorKind::Default), 2);
        assert_eq!(harness.client.sends_to(ProcessorKind::Fallback), 0);
    }

    #[tokio::test]
    async fn test_failure_requeues_with_attempt_count() {
        let harness = Harness::new();
        harness.client.set_accepting(ProcessorKind::Default, false);
        harness.client.set_accepting(ProcessorKind::Fallback, false);
        let worker = harness.worker(config(default_first()));
        let payment = entry(700);
        harness.enqueue(&payment).await;

        let outcome = worker.process_next().await.unwrap();

        assert_eq!(outcome, Some(SettlementOutcome::Requeued));
        let queued = harness.queued().await;
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].correlation_id, payment.correlation_id);
        assert_eq!(queued[0].requested_at, payment.requested_at);
        assert_eq!(queued[0].attempts, 1);
        assert_eq!(harness.store.depth(worker.holding()).await.unwrap(), 0);
        assert_eq!(harness.ledger.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_requeued_payment_goes_behind_waiting_ones() {
        let harness = Harness::new();
        harness.client.script_sends(ProcessorKind::Default, &[false]);
        let worker = harness.worker(config(SettlementPolicy::FollowArbiter));
        let first = entry(100);
        let second = entry(200);
        harness.enqueue(&first).await;
        harness.enqueue(&second).await;

        worker.process_next().await.unwrap();

        let order: Vec<Uuid> = harness.queued().await.iter().map(|e| e.correlation_id).collect();
        assert_eq!(order, vec![second.correlation_id, first.correlation_id]);
    }

    #[tokio::test]
    async fn test_bounded_attempts_dead_letter() {
        let harness = Harness::new();
        harness.client.set_accepting(ProcessorKind::Default, false);
        let worker = harness.worker(SettlementConfig {
            max_attempts: Some(2),
            ..config(SettlementPolicy::FollowArbiter)
        });
        harness.enqueue(&entry(100)).await;

        assert_eq!(worker.process_next().await.unwrap(), Some(SettlementOutcome::Requeued));
        assert_eq!(
            worker.process_next().await.unwrap(),
            Some(SettlementOutcome::DeadLettered(DeadLetterReason::RetriesExhausted))
        );

        assert_eq!(harness.store.depth(keys::PAYMENTS_QUEUE).await.unwrap(), 0);
        let letters = worker.dead_letters.list(10).await.unwrap();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].attempts, 2);
        assert_eq!(letters[0].reason, DeadLetterReason::RetriesExhausted);
    }

    #[tokio::test]
    async fn test_ledger_write_failure_is_dead_lettered_not_resent() {
        let harness = Harness::with_ledger(Arc::new(BrokenLedger));
        let worker = harness.worker(config(SettlementPolicy::FollowArbiter));
        harness.enqueue(&entry(100)).await;

        let outcome = worker.process_next().await.unwrap();

        assert_eq!(
            outcome,
            Some(SettlementOutcome::DeadLettered(DeadLetterReason::LedgerWriteFailed))
        );
        assert_eq!(harness.client.sent().len(), 1);
        assert_eq!(harness.store.depth(keys::PAYMENTS_QUEUE).await.unwrap(), 0);
        assert_eq!(harness.store.depth(worker.holding()).await.unwrap(), 0);
        assert_eq!(worker.dead_letters.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_at_least_once_resends_recorded_payment() {
        let harness = Harness::new();
        let payment = entry(100);
        harness
            .ledger
            .store(&SettledPayment::from_entry(&payment, ProcessorKind::Default))
            .await
            .unwrap();
        let worker = harness.worker(config(SettlementPolicy::FollowArbiter));
        harness.enqueue(&payment).await;

        let outcome = worker.process_next().await.unwrap();

        assert_eq!(outcome, Some(SettlementOutcome::Settled(ProcessorKind::Default)));
        assert_eq!(harness.client.sent().len(), 1);
        assert_eq!(harness.ledger.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_ledger_checked_skips_recorded_payment() {
        let harness = Harness::new();
        let payment = entry(100);
        harness
            .ledger
            .store(&SettledPayment::from_entry(&payment, ProcessorKind::Default))
            .await
            .unwrap();
        let worker = harness.worker(SettlementConfig {
            guarantee: SettlementGuarantee::LedgerChecked,
            ..config(SettlementPolicy::FollowArbiter)
        });
        harness.enqueue(&payment).await;

        let outcome = worker.process_next().await.unwrap();

        assert_eq!(outcome, Some(SettlementOutcome::AlreadySettled));
        assert!(harness.client.sent().is_empty());
        assert_eq!(harness.store.depth(keys::PAYMENTS_QUEUE).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_discarded() {
        let harness = Harness::new();
        harness.store.enqueue(keys::PAYMENTS_QUEUE, "not a payment").await.unwrap();
        let worker = harness.worker(config(SettlementPolicy::FollowArbiter));

        assert_eq!(worker.process_next().await.unwrap(), Some(SettlementOutcome::Discarded));
        assert_eq!(harness.store.depth(keys::PAYMENTS_QUEUE).await.unwrap(), 0);
        assert_eq!(harness.store.depth(worker.holding()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_run_recovers_stranded_work_then_stops() {
        let harness = Harness::new();
        let worker = harness.worker(config(SettlementPolicy::FollowArbiter));
        let payment = entry(4200);
        harness.enqueue(&payment).await;
        // A previous incarnation reserved the payment and crashed.
        harness
            .store
            .reserve(keys::PAYMENTS_QUEUE, worker.holding(), Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(harness.store.depth(keys::PAYMENTS_QUEUE).await.unwrap(), 0);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(worker.run(shutdown_rx));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while harness.ledger.len().await.unwrap() == 0 {
            assert!(tokio::time::Instant::now() < deadline, "payment never settled");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        shutdown_tx.send_replace(true);
        handle.await.unwrap();

        assert!(harness.ledger.contains(&payment.correlation_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_run_retries_payment_after_failed_release() {
        let store = Arc::new(FlakyStore::failing_releases(1));
        let client = Arc::new(ScriptedProcessor::new());
        client.script_sends(ProcessorKind::Default, &[false]);
        let ledger = Arc::new(LocalLedger::new());
        let worker = SettlementWorker::new(
            0,
            keys::holding_list("test", 0),
            WorkerContext {
                store: store.clone(),
                client: client.clone(),
                decisions: Arc::new(FixedDecision::new(ProcessorKind::Default)),
                ledger: ledger.clone(),
                metrics: Arc::new(Metrics::new().unwrap()),
                config: config(SettlementPolicy::FollowArbiter),
            },
        );
        let holding = worker.holding().to_string();
        let payment = entry(100);
        store
            .enqueue(keys::PAYMENTS_QUEUE, &payment.encode().unwrap())
            .await
            .unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(worker.run(shutdown_rx));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        while !ledger.contains(&payment.correlation_id).await.unwrap() {
            assert!(tokio::time::Instant::now() < deadline, "payment stuck in holding list");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        shutdown_tx.send_replace(true);
        handle.await.unwrap();

        assert_eq!(store.failed_releases(), 1);
        assert_eq!(client.sends_to(ProcessorKind::Default), 2);
        assert_eq!(store.depth(&holding).await.unwrap(), 0);
        assert_eq!(store.depth(keys::PAYMENTS_QUEUE).await.unwrap(), 0);
    }
}
