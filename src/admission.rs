use chrono::Utc;
use std::sync::Arc;

use crate::coordination::{keys, CoordinationError, CoordinationStore};
use crate::domain::{Cents, MoneyError, PaymentRequest, QueueEntry};
use crate::metrics::Metrics;

// ============================================================================
// Admission Gate
// ============================================================================
//
// Validates a payment request, stamps `requested_at`, and pushes it onto the
// shared queue. The queue is bounded: once it holds `capacity` entries new
// payments are refused immediately instead of waiting for space.
//
// ============================================================================

pub const DEFAULT_QUEUE_CAPACITY: usize = 20_000;

#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("Malformed payment request: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("Invalid amount: {0}")]
    InvalidAmount(#[from] MoneyError),

    #[error("Payment queue is full ({capacity} pending)")]
    Saturated { capacity: usize },

    #[error("Coordination store unavailable: {0}")]
    Store(#[from] CoordinationError),
}

impl AdmissionError {
    /// Label for the rejection counter.
    pub fn reason(&self) -> &'static str {
        match self {
            AdmissionError::Malformed(_) => "malformed",
            AdmissionError::InvalidAmount(_) => "invalid_amount",
            AdmissionError::Saturated { .. } => "saturated",
            AdmissionError::Store(_) => "store",
        }
    }
}

pub struct AdmissionGate {
    store: Arc<dyn CoordinationStore>,
    capacity: usize,
    metrics: Arc<Metrics>,
}

impl AdmissionGate {
    pub fn new(store: Arc<dyn CoordinationStore>, capacity: usize, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            capacity,
            metrics,
        }
    }

    /// Admit the raw body of a `POST /payments`.
    pub async fn submit(&self, body: &[u8]) -> Result<QueueEntry, AdmissionError> {
        let result = self.admit(body).await;
        self.metrics
            .record_admission(result.as_ref().err().map(AdmissionError::reason));
        result
    }

    async fn admit(&self, body: &[u8]) -> Result<QueueEntry, AdmissionError> {
        let request: PaymentRequest =
            serde_json::from_slice(body).map_err(AdmissionError::Malformed)?;
        let amount = Cents::from_amount(request.amount)?;

        let entry = QueueEntry::new(request.correlation_id, amount, Utc::now());
        let payload = entry.encode().map_err(CoordinationError::from)?;

        let accepted = self
            .store
            .enqueue_bounded(keys::PAYMENTS_QUEUE, &payload, self.capacity)
            .await?;

        if !accepted {
            tracing::warn!(
                correlation_id = %entry.correlation_id,
                capacity = self.capacity,
                "Payment queue saturated, rejecting"
            );
            return Err(AdmissionError::Saturated {
                capacity: self.capacity,
            });
        }

        tracing::debug!(
            correlation_id = %entry.correlation_id,
            amount = %entry.amount,
            "Payment admitted"
        );
        Ok(entry)
    }
}
