use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::coordination::{keys, CoordinationError, CoordinationStore};
use crate::domain::QueueEntry;

// ============================================================================
// Dead Letter List
// ============================================================================
//
// Payments that leave the settlement loop without a ledger record:
// - RetriesExhausted   no processor accepted within the attempt bound
// - LedgerWriteFailed  a processor accepted, the ledger write kept failing;
//                      money has moved, never resubmit automatically
//
// Stored as JSON in a store list so every replica's operators see one list.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterReason {
    RetriesExhausted,
    LedgerWriteFailed,
}

impl DeadLetterReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeadLetterReason::RetriesExhausted => "retries_exhausted",
            DeadLetterReason::LedgerWriteFailed => "ledger_write_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub entry: QueueEntry,
    pub reason: DeadLetterReason,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
    pub error: String,
}

pub struct DeadLetterQueue {
    store: Arc<dyn CoordinationStore>,
}

impl DeadLetterQueue {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }

    pub async fn add(&self, letter: &DeadLetter) -> Result<(), CoordinationError> {
        tracing::error!(
            correlation_id = %letter.entry.correlation_id,
            amount = %letter.entry.amount,
            reason = letter.reason.as_str(),
            attempts = letter.attempts,
            error = %letter.error,
            "Adding payment to dead-letter list"
        );

        let payload = serde_json::to_string(letter)?;
        self.store.enqueue(keys::DEAD_LETTER_QUEUE, &payload).await
    }

    /// Oldest first, up to `limit`.
    pub async fn list(&self, limit: usize) -> Result<Vec<DeadLetter>, CoordinationError> {
        let raw = self.store.peek(keys::DEAD_LETTER_QUEUE, limit).await?;
        let mut letters = Vec::with_capacity(raw.len());
        for item in raw {
            letters.push(serde_json::from_str(&item)?);
        }
        Ok(letters)
    }

    pub async fn count(&self) -> Result<usize, CoordinationError> {
        self.store.depth(keys::DEAD_LETTER_QUEUE).await
    }

    pub async fn clear(&self) -> Result<(), CoordinationError> {
        self.store.clear(keys::DEAD_LETTER_QUEUE).await
    }
}
