use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::coordination::{keys, CoordinationError, CoordinationStore, LeaderLock};
use crate::domain::{ProcessorDecision, ProcessorKind};
use crate::metrics::Metrics;
use crate::processor::{HealthReport, ProcessorClient};

// ============================================================================
// Health Arbiter
// ============================================================================
//
// Decides which processor settlement should target. Once per tick:
//
//   leader   (holds "health-lock")  probe default, then fallback if needed,
//                                   install and publish the decision
//   follower                        read the last published decision
//
// Only the leader touches the processors' health endpoints, which penalize
// excessive probing. Leadership is kept by renewing the lock every tick and
// given up on shutdown; a crashed leader's lock lapses after its TTL.
//
// Workers read the decision through `current()`, a clone of an immutable
// snapshot that is replaced wholesale. It never blocks and never touches
// the network.
//
// ============================================================================

#[derive(Debug, Clone)]
pub struct ArbiterConfig {
    pub tick_interval: Duration,
    pub lock_ttl: Duration,
    pub probe_timeout: Duration,
    /// Expiry of the published decision; `None` keeps it until overwritten.
    pub decision_ttl: Option<Duration>,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(6),
            lock_ttl: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(1),
            decision_ttl: None,
        }
    }
}

/// Wire form of a decision in the shared store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedDecision {
    pub service: ProcessorKind,
    pub decided_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// This replica held the lock and probed.
    Led {
        decision: Arc<ProcessorDecision>,
        changed: bool,
    },
    /// Another replica leads; its published decision was adopted.
    Followed(Arc<ProcessorDecision>),
    /// Another replica leads but has not published anything yet.
    NoDecision,
}

/// Read side of the arbiter, as seen by settlement workers.
pub trait DecisionSource: Send + Sync {
    fn current(&self) -> Arc<ProcessorDecision>;
}

pub struct HealthArbiter {
    store: Arc<dyn CoordinationStore>,
    client: Arc<dyn ProcessorClient>,
    config: ArbiterConfig,
    lock: LeaderLock,
    snapshot: watch::Sender<Arc<ProcessorDecision>>,
    is_leader: AtomicBool,
    metrics: Arc<Metrics>,
}

impl HealthArbiter {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        client: Arc<dyn ProcessorClient>,
        config: ArbiterConfig,
        owner: impl Into<String>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let initial = ProcessorDecision::initial(client.endpoint(ProcessorKind::Default));
        let (snapshot, _) = watch::channel(Arc::new(initial));
        let lock = LeaderLock::new(keys::HEALTH_LOCK, owner, config.lock_ttl);

        Self {
            store,
            client,
            config,
            lock,
            snapshot,
            is_leader: AtomicBool::new(false),
            metrics,
        }
    }

    pub fn current(&self) -> Arc<ProcessorDecision> {
        self.snapshot.borrow().clone()
    }

    /// Receiver notified every time a new snapshot is installed.
    pub fn subscribe(&self) -> watch::Receiver<Arc<ProcessorDecision>> {
        self.snapshot.subscribe()
    }

    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::Acquire)
    }

    /// Run one arbitration round.
    pub async fn tick(&self) -> Result<TickOutcome, CoordinationError> {
        if self.claim_leadership().await? {
            self.metrics.record_arbiter_tick("leader");
            Ok(self.lead().await)
        } else {
            self.metrics.record_arbiter_tick("follower");
            self.follow().await
        }
    }

    /// Tick on a fixed interval until `shutdown` flips to true, then give up
    /// the lock.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!(
                owner = %self.lock.owner,
                tick_ms = self.config.tick_interval.as_millis() as u64,
                "Health arbiter started"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.tick().await {
                            tracing::warn!(error = %e, "Health arbiter tick failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            self.resign().await;
            tracing::info!(owner = %self.lock.owner, "Health arbiter stopped");
        })
    }

    /// Release the leader lock if held.
    pub async fn resign(&self) {
        if !self.is_leader.swap(false, Ordering::AcqRel) {
            return;
        }
        match self.store.release_lock(&self.lock).await {
            Ok(true) => tracing::info!(owner = %self.lock.owner, "Released health leadership"),
            Ok(false) => tracing::debug!(owner = %self.lock.owner, "Health lock already lapsed"),
            Err(e) => tracing::warn!(error = %e, "Failed to release health lock"),
        }
    }

    async fn claim_leadership(&self) -> Result<bool, CoordinationError> {
        let was_leader = self.is_leader();
        let held = if was_leader {
            self.store.renew_lock(&self.lock).await?
        } else {
            self.store.try_acquire_lock(&self.lock).await?
        };

        if held != was_leader {
            self.is_leader.store(held, Ordering::Release);
            if held {
                tracing::info!(owner = %self.lock.owner, "Acquired health leadership");
            } else {
                tracing::warn!(owner = %self.lock.owner, "Lost health leadership");
            }
        }
        Ok(held)
    }

    async fn lead(&self) -> TickOutcome {
        let previous = self.current();

        let mut healthy = None;
        for processor in ProcessorKind::ALL {
            if let Some(report) = self.probe(processor).await {
                if !report.failing {
                    healthy = Some((processor, report));
                    break;
                }
            }
        }

        let Some((service, report)) = healthy else {
            tracing::warn!(
                service = %previous.service,
                "No processor healthy, keeping previous decision"
            );
            if previous.decided_at.is_some() {
                self.publish(&previous).await;
            }
            return TickOutcome::Led {
                decision: previous,
                changed: false,
            };
        };

        let decision = Arc::new(ProcessorDecision::decided(
            service,
            self.client.endpoint(service),
            Utc::now(),
        ));
        let changed = previous.decided_at.is_none() || previous.service != service;
        if changed {
            tracing::info!(
                service = %service,
                min_response_time = report.min_response_time,
                "Processor preference changed"
            );
        } else {
            tracing::debug!(
                service = %service,
                min_response_time = report.min_response_time,
                "Processor preference confirmed"
            );
        }

        self.install(decision.clone());
        self.publish(&decision).await;
        TickOutcome::Led { decision, changed }
    }

    async fn follow(&self) -> Result<TickOutcome, CoordinationError> {
        let Some(raw) = self.store.read(keys::HEALTH_DECISION).await? else {
            return Ok(TickOutcome::NoDecision);
        };
        let published: PublishedDecision = serde_json::from_str(&raw)?;

        let current = self.current();
        if current.service == published.service
            && current.decided_at == Some(published.decided_at)
        {
            return Ok(TickOutcome::Followed(current));
        }

        let decision = Arc::new(ProcessorDecision::decided(
            published.service,
            self.client.endpoint(published.service),
            published.decided_at,
        ));
        if current.service != published.service {
            tracing::info!(service = %published.service, "Adopted published processor preference");
        }
        self.install(decision.clone());
        Ok(TickOutcome::Followed(decision))
    }

    async fn probe(&self, processor: ProcessorKind) -> Option<HealthReport> {
        let report = self.client.probe_health(processor);
        match tokio::time::timeout(self.config.probe_timeout, report).await {
            Ok(Ok(report)) => Some(report),
            Ok(Err(e)) => {
                tracing::warn!(processor = %processor, error = %e, "Health probe failed");
                None
            }
            Err(_) => {
                tracing::warn!(
                    processor = %processor,
                    timeout_ms = self.config.probe_timeout.as_millis() as u64,
                    "Health probe timed out"
                );
                None
            }
        }
    }

    fn install(&self, decision: Arc<ProcessorDecision>) {
        self.metrics.update_preferred_processor(Some(decision.service));
        self.snapshot.send_replace(decision);
    }

    async fn publish(&self, decision: &ProcessorDecision) {
        let Some(decided_at) = decision.decided_at else {
            return;
        };
        let published = PublishedDecision {
            service: decision.service,
            decided_at,
        };
        let result = match serde_json::to_string(&published) {
            Ok(value) => self
                .store
                .publish(keys::HEALTH_DECISION, &value, self.config.decision_ttl)
                .await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "Failed to publish processor decision");
        }
    }
}

impl DecisionSource for HealthArbiter {
    fn current(&self) -> Arc<ProcessorDecision> {
        HealthArbiter::current(self)
    }
}
