// Private module declaration
mod server;

use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

use crate::domain::ProcessorKind;

// Re-export for public API
pub use server::{encode, CONTENT_TYPE};

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Provides metrics for:
// - Admission (accepted, rejected by reason)
// - Settlement attempts, latency and outcomes per processor
// - Requeues and dead letters
// - Health arbiter ticks and the current preferred processor
// - Queue depth
//
// Each replica owns one registry, scraped via the internal listener's /metrics
// ============================================================================

pub struct Metrics {
    registry: Registry,

    // Admission Metrics
    pub payments_admitted: IntCounter,
    pub payments_rejected: IntCounterVec,

    // Settlement Metrics
    pub settlement_attempts: IntCounterVec,
    pub settlement_duration: HistogramVec,
    pub payments_settled: IntCounterVec,
    pub payments_requeued: IntCounter,

    // Dead Letter Metrics
    pub dead_letters: IntCounterVec,

    // Arbiter Metrics
    pub arbiter_ticks: IntCounterVec,
    pub preferred_processor: IntGauge,

    // Queue Metrics
    pub queue_depth: IntGauge,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        // Admission Metrics
        let payments_admitted =
            IntCounter::new("payments_admitted_total", "Payments accepted into the queue")?;
        registry.register(Box::new(payments_admitted.clone()))?;

        let payments_rejected = IntCounterVec::new(
            Opts::new("payments_rejected_total", "Payments refused at admission"),
            &["reason"],
        )?;
        registry.register(Box::new(payments_rejected.clone()))?;

        // Settlement Metrics
        let settlement_attempts = IntCounterVec::new(
            Opts::new("settlement_attempts_total", "Calls made to a payment processor"),
            &["processor", "outcome"],
        )?;
        registry.register(Box::new(settlement_attempts.clone()))?;

        let settlement_duration = HistogramVec::new(
            HistogramOpts::new("settlement_duration_seconds", "Payment processor call duration")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["processor"],
        )?;
        registry.register(Box::new(settlement_duration.clone()))?;

        let payments_settled = IntCounterVec::new(
            Opts::new("payments_settled_total", "Payments recorded in the ledger"),
            &["processor"],
        )?;
        registry.register(Box::new(payments_settled.clone()))?;

        let payments_requeued =
            IntCounter::new("payments_requeued_total", "Payments returned to the queue")?;
        registry.register(Box::new(payments_requeued.clone()))?;

        // Dead Letter Metrics
        let dead_letters = IntCounterVec::new(
            Opts::new("dead_letters_total", "Payments moved to the dead-letter list"),
            &["reason"],
        )?;
        registry.register(Box::new(dead_letters.clone()))?;

        // Arbiter Metrics
        let arbiter_ticks = IntCounterVec::new(
            Opts::new("arbiter_ticks_total", "Health arbiter ticks by role"),
            &["role"],
        )?;
        registry.register(Box::new(arbiter_ticks.clone()))?;

        let preferred_processor = IntGauge::new(
            "preferred_processor",
            "Processor currently preferred (-1=Unknown, 0=Default, 1=Fallback)",
        )?;
        preferred_processor.set(-1);
        registry.register(Box::new(preferred_processor.clone()))?;

        // Queue Metrics
        let queue_depth = IntGauge::new("queue_depth", "Payments waiting in the shared queue")?;
        registry.register(Box::new(queue_depth.clone()))?;

        Ok(Self {
            registry,
            payments_admitted,
            payments_rejected,
            settlement_attempts,
            settlement_duration,
            payments_settled,
            payments_requeued,
            dead_letters,
            arbiter_ticks,
            preferred_processor,
            queue_depth,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_admission(&self, rejected_reason: Option<&str>) {
        match rejected_reason {
            None => self.payments_admitted.inc(),
            Some(reason) => self.payments_rejected.with_label_values(&[reason]).inc(),
        }
    }

    /// Helper to record one processor call
    pub fn record_attempt(&self, processor: ProcessorKind, duration_secs: f64, success: bool) {
        let outcome = if success { "accepted" } else { "failed" };
        self.settlement_attempts
            .with_label_values(&[processor.as_str(), outcome])
            .inc();
        self.settlement_duration
            .with_label_values(&[processor.as_str()])
            .observe(duration_secs);
    }

    pub fn record_settled(&self, processor: ProcessorKind) {
        self.payments_settled.with_label_values(&[processor.as_str()]).inc();
    }

    pub fn record_requeue(&self) {
        self.payments_requeued.inc();
    }

    pub fn record_dead_letter(&self, reason: &str) {
        self.dead_letters.with_label_values(&[reason]).inc();
    }

    pub fn record_arbiter_tick(&self, role: &str) {
        self.arbiter_ticks.with_label_values(&[role]).inc();
    }

    pub fn update_preferred_processor(&self, processor: Option<ProcessorKind>) {
        let value = match processor {
            None => -1,
            Some(ProcessorKind::Default) => 0,
            Some(ProcessorKind::Fallback) => 1,
        };
        self.preferred_processor.set(value);
    }

    pub fn update_queue_depth(&self, depth: usize) {
        self.queue_depth.set(i64::try_from(depth).unwrap_or(i64::MAX));
    }
}
