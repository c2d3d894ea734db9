//! Test doubles shared by the unit tests of several modules.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use crate::arbiter::DecisionSource;
use crate::coordination::{
    CoordinationError, DistributedLock, LeaderLock, MemoryStore, Reservation, SharedState,
    WorkQueue,
};
use crate::domain::{ProcessorDecision, ProcessorKind, ProcessorPayment, Summary, TimeWindow};
use crate::processor::{HealthReport, ProcessorClient, ProcessorError};
use crate::summary::{PeerError, PeerSummary};

#[derive(Debug, Clone, Copy)]
enum Health {
    Healthy,
    Failing,
    Unreachable,
}

/// A processor pair whose health and answers are set by the test.
///
/// Both processors start healthy and accepting. Scripted send outcomes are
/// consumed first; once exhausted the processor's standing answer applies.
pub(crate) struct ScriptedProcessor {
    health: Mutex<HashMap<ProcessorKind, Health>>,
    accepting: Mutex<HashMap<ProcessorKind, bool>>,
    scripted: Mutex<HashMap<ProcessorKind, VecDeque<bool>>>,
    sent: Mutex<Vec<(ProcessorKind, Uuid)>>,
    probes: Mutex<Vec<ProcessorKind>>,
}

impl ScriptedProcessor {
    pub(crate) fn new() -> Self {
        Self {
            health: Mutex::new(HashMap::new()),
            accepting: Mutex::new(HashMap::new()),
            scripted: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            probes: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn set_healthy(&self, processor: ProcessorKind, healthy: bool) {
        let health = if healthy { Health::Healthy } else { Health::Failing };
        self.health.lock().unwrap().insert(processor, health);
    }

    pub(crate) fn set_probe_error(&self, processor: ProcessorKind) {
        self.health.lock().unwrap().insert(processor, Health::Unreachable);
    }

    pub(crate) fn set_accepting(&self, processor: ProcessorKind, accepting: bool) {
        self.accepting.lock().unwrap().insert(processor, accepting);
    }

    /// Queue one-off answers for the next sends to `processor`.
    pub(crate) fn script_sends(&self, processor: ProcessorKind, outcomes: &[bool]) {
        self.scripted
            .lock()
            .unwrap()
            .entry(processor)
            .or_default()
            .extend(outcomes.iter().copied());
    }

    /// Every send attempt, accepted or not, in call order.
    pub(crate) fn sent(&self) -> Vec<(ProcessorKind, Uuid)> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn sends_to(&self, processor: ProcessorKind) -> usize {
        self.sent().iter().filter(|(p, _)| *p == processor).count()
    }

    pub(crate) fn probes(&self) -> Vec<ProcessorKind> {
        self.probes.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessorClient for ScriptedProcessor {
    async fn send(
        &self,
        processor: ProcessorKind,
        payment: &ProcessorPayment,
    ) -> Result<(), ProcessorError> {
        self.sent.lock().unwrap().push((processor, payment.correlation_id));

        let scripted = self
            .scripted
            .lock()
            .unwrap()
            .get_mut(&processor)
            .and_then(VecDeque::pop_front);
        let accepted = scripted.unwrap_or_else(|| {
            *self.accepting.lock().unwrap().get(&processor).unwrap_or(&true)
        });

        if accepted {
            Ok(())
        } else {
            Err(ProcessorError::Rejected { processor, status: 500 })
        }
    }

    async fn probe_health(&self, processor: ProcessorKind) -> Result<HealthReport, ProcessorError> {
        self.probes.lock().unwrap().push(processor);

        let health = *self.health.lock().unwrap().get(&processor).unwrap_or(&Health::Healthy);
        match health {
            Health::Healthy => Ok(HealthReport {
                failing: false,
                min_response_time: 5,
            }),
            Health::Failing => Ok(HealthReport {
                failing: true,
                min_response_time: 0,
            }),
            Health::Unreachable => Err(ProcessorError::Rejected { processor, status: 429 }),
        }
    }

    fn endpoint(&self, processor: ProcessorKind) -> String {
        format!("http://{processor}.test")
    }
}

/// A decision that only changes when the test says so.
pub(crate) struct FixedDecision(Mutex<Arc<ProcessorDecision>>);

impl FixedDecision {
    pub(crate) fn new(service: ProcessorKind) -> Self {
        Self(Mutex::new(Arc::new(decision(service))))
    }

    pub(crate) fn set(&self, service: ProcessorKind) {
        *self.0.lock().unwrap() = Arc::new(decision(service));
    }
}

fn decision(service: ProcessorKind) -> ProcessorDecision {
    ProcessorDecision::decided(service, format!("http://{service}.test"), chrono::Utc::now())
}

impl DecisionSource for FixedDecision {
    fn current(&self) -> Arc<ProcessorDecision> {
        self.0.lock().unwrap().clone()
    }
}

/// A peer replica answering with a fixed summary, or failing.
pub(crate) struct StaticPeer {
    summary: Option<Summary>,
    windows: Mutex<Vec<TimeWindow>>,
    purges: Mutex<usize>,
}

impl StaticPeer {
    pub(crate) fn answering(summary: Summary) -> Self {
        Self {
            summary: Some(summary),
            windows: Mutex::new(Vec::new()),
            purges: Mutex::new(0),
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            summary: None,
            windows: Mutex::new(Vec::new()),
            purges: Mutex::new(0),
        }
    }

    /// Windows the peer was asked for, in call order.
    pub(crate) fn windows(&self) -> Vec<TimeWindow> {
        self.windows.lock().unwrap().clone()
    }

    pub(crate) fn purges(&self) -> usize {
        *self.purges.lock().unwrap()
    }
}

#[async_trait]
impl PeerSummary for StaticPeer {
    async fn fetch_summary(&self, window: &TimeWindow) -> Result<Summary, PeerError> {
        self.windows.lock().unwrap().push(*window);
        self.summary.ok_or(PeerError::Status(503))
    }

    async fn purge(&self) -> Result<(), PeerError> {
        *self.purges.lock().unwrap() += 1;
        match self.summary {
            Some(_) => Ok(()),
            None => Err(PeerError::Status(503)),
        }
    }
}

/// An in-memory store whose next `n` releases fail, leaving the reserved
/// item where it was.
pub(crate) struct FlakyStore {
    inner: MemoryStore,
    release_failures: AtomicUsize,
    failed_releases: AtomicUsize,
}

impl FlakyStore {
    pub(crate) fn failing_releases(n: usize) -> Self {
        Self {
            inner: MemoryStore::new(),
            release_failures: AtomicUsize::new(n),
            failed_releases: AtomicUsize::new(0),
        }
    }

    pub(crate) fn failed_releases(&self) -> usize {
        self.failed_releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkQueue for FlakyStore {
    async fn enqueue(&self, queue: &str, item: &str) -> Result<(), CoordinationError> {
        self.inner.enqueue(queue, item).await
    }

    async fn enqueue_bounded(
        &self,
        queue: &str,
        item: &str,
        capacity: usize,
    ) -> Result<bool, CoordinationError> {
        self.inner.enqueue_bounded(queue, item, capacity).await
    }

    async fn pop_blocking(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<String>, CoordinationError> {
        self.inner.pop_blocking(queue, timeout).await
    }

    async fn reserve(
        &self,
        queue: &str,
        holding: &str,
        timeout: Duration,
    ) -> Result<Option<Reservation>, CoordinationError> {
        self.inner.reserve(queue, holding, timeout).await
    }

    async fn ack(&self, reservation: &Reservation) -> Result<(), CoordinationError> {
        self.inner.ack(reservation).await
    }

    async fn release(
        &self,
        reservation: &Reservation,
        payload: &str,
    ) -> Result<(), CoordinationError> {
        let failing = self
            .release_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            self.failed_releases.fetch_add(1, Ordering::SeqCst);
            return Err(serde_json::from_str::<u8>("connection reset").unwrap_err().into());
        }
        self.inner.release(reservation, payload).await
    }

    async fn recover(&self, queue: &str, holding: &str) -> Result<usize, CoordinationError> {
        self.inner.recover(queue, holding).await
    }

    async fn depth(&self, queue: &str) -> Result<usize, CoordinationError> {
        self.inner.depth(queue).await
    }

    async fn peek(&self, queue: &str, limit: usize) -> Result<Vec<String>, CoordinationError> {
        self.inner.peek(queue, limit).await
    }

    async fn clear(&self, queue: &str) -> Result<(), CoordinationError> {
        self.inner.clear(queue).await
    }

    async fn clear_prefix(&self, prefix: &str) -> Result<usize, CoordinationError> {
        self.inner.clear_prefix(prefix).await
    }
}

#[async_trait]
impl DistributedLock for FlakyStore {
    async fn try_acquire_lock(&self, lock: &LeaderLock) -> Result<bool, CoordinationError> {
        self.inner.try_acquire_lock(lock).await
    }

    async fn renew_lock(&self, lock: &LeaderLock) -> Result<bool, CoordinationError> {
        self.inner.renew_lock(lock).await
    }

    async fn release_lock(&self, lock: &LeaderLock) -> Result<bool, CoordinationError> {
        self.inner.release_lock(lock).await
    }
}

#[async_trait]
impl SharedState for FlakyStore {
    async fn publish(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), CoordinationError> {
        self.inner.publish(key, value, ttl).await
    }

    async fn read(&self, key: &str) -> Result<Option<String>, CoordinationError> {
        self.inner.read(key).await
    }
}
