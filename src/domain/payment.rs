use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::money::{decimal_number, Cents};
use super::processor::ProcessorKind;

// ============================================================================
// Payment Value Objects
// ============================================================================
//
// A payment moves through three shapes:
//   PaymentRequest  - client body of POST /payments
//   QueueEntry      - admitted, waiting in the coordination store
//   SettledPayment  - accepted by a processor, recorded in the ledger
//
// `requested_at` is stamped once at admission and carried unchanged through
// every retry, so a payment is always reported under the window it was
// submitted in.
//
// ============================================================================

/// Body of `POST /payments`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub correlation_id: Uuid,
    pub amount: Decimal,
}

/// A payment awaiting settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub correlation_id: Uuid,
    pub amount: Cents,
    pub requested_at: DateTime<Utc>,
    /// Failed settlement attempts so far.
    #[serde(default)]
    pub attempts: u32,
}

impl QueueEntry {
    pub fn new(correlation_id: Uuid, amount: Cents, requested_at: DateTime<Utc>) -> Self {
        Self {
            correlation_id,
            amount,
            requested_at,
            attempts: 0,
        }
    }

    /// Copy of this entry with one more failed attempt recorded.
    pub fn next_attempt(&self) -> Self {
        Self {
            attempts: self.attempts.saturating_add(1),
            ..self.clone()
        }
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn decode(payload: &str) -> serde_json::Result<Self> {
        serde_json::from_str(payload)
    }
}

/// Body of a processor's `POST /payments`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorPayment {
    pub correlation_id: Uuid,
    #[serde(with = "decimal_number")]
    pub amount: Cents,
    pub requested_at: DateTime<Utc>,
}

impl From<&QueueEntry> for ProcessorPayment {
    fn from(entry: &QueueEntry) -> Self {
        Self {
            correlation_id: entry.correlation_id,
            amount: entry.amount,
            requested_at: entry.requested_at,
        }
    }
}

/// A ledger record: a payment some processor accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettledPayment {
    pub correlation_id: Uuid,
    pub amount: Cents,
    pub requested_at: DateTime<Utc>,
    pub processor: ProcessorKind,
}

impl SettledPayment {
    pub fn from_entry(entry: &QueueEntry, processor: ProcessorKind) -> Self {
        Self {
            correlation_id: entry.correlation_id,
            amount: entry.amount,
            requested_at: entry.requested_at,
            processor,
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
