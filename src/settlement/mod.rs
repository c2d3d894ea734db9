// ============================================================================
// Settlement Worker Pool
// ============================================================================
//
// N workers drain the shared queue. For each payment:
//
//   reserve -> pick processor -> send -> ledger upsert -> ack
//                                  |
//                                  +-- failed -> release to the tail (attempts + 1)
//
// A 2xx from a processor is the only success. A failed payment is never
// dropped: it goes back to the queue for any worker to retry, optionally
// until a configured attempt bound sends it to the dead-letter list.
//
// Delivery is at-least-once by default. A crash after the processor accepted
// but before the ack leaves the payment in the worker's holding list; it is
// recovered on restart and sent again. `LedgerChecked` closes that window
// for payments whose ledger write landed.
//
// ============================================================================

pub mod dead_letter;
mod pool;
pub mod retry;
mod worker;

pub use dead_letter::{DeadLetter, DeadLetterQueue, DeadLetterReason};
pub use pool::WorkerPool;
pub use worker::SettlementWorker;

use std::sync::Arc;
use std::time::Duration;

use crate::arbiter::DecisionSource;
use crate::coordination::CoordinationStore;
use crate::domain::ProcessorKind;
use crate::ledger::Ledger;
use crate::metrics::Metrics;
use crate::processor::ProcessorClient;

/// How a worker picks the processor for an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementPolicy {
    /// Send only to the arbiter's current choice.
    FollowArbiter,
    /// Try default up to `default_attempts` times `retry_delay` apart, then
    /// fallback once.
    DefaultFirst { default_attempts: u32, retry_delay: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementGuarantee {
    /// Send every dequeued payment.
    AtLeastOnce,
    /// Skip payments the ledger already records.
    LedgerChecked,
}

#[derive(Debug, Clone)]
pub struct SettlementConfig {
    pub policy: SettlementPolicy,
    pub guarantee: SettlementGuarantee,
    /// Pause after releasing a failed payment.
    pub requeue_delay: Duration,
    /// Failed rounds before dead-lettering; `None` retries forever.
    pub max_attempts: Option<u32>,
    /// How long one reserve waits for work.
    pub reserve_timeout: Duration,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            policy: SettlementPolicy::FollowArbiter,
            guarantee: SettlementGuarantee::AtLeastOnce,
            requeue_delay: Duration::from_millis(10),
            max_attempts: None,
            reserve_timeout: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementOutcome {
    Settled(ProcessorKind),
    Requeued,
    DeadLettered(DeadLetterReason),
    /// Skipped under `LedgerChecked`.
    AlreadySettled,
    /// Payload could not be decoded.
    Discarded,
}

/// Everything a worker shares with its siblings.
#[derive(Clone)]
pub struct WorkerContext {
    pub store: Arc<dyn CoordinationStore>,
    pub client: Arc<dyn ProcessorClient>,
    pub decisions: Arc<dyn DecisionSource>,
    pub ledger: Arc<dyn Ledger>,
    pub metrics: Arc<Metrics>,
    pub config: SettlementConfig,
}
