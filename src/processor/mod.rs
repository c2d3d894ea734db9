// ============================================================================
// Processor Client
// ============================================================================
//
// The external payment processors seen as a black box:
// - send(processor, payment)  -> accepted | failed
// - probe_health(processor)   -> health report | failed
//
// A 2xx answer is the only success. Every call is bounded by a short
// per-call timeout so a single attempt cannot stall a worker for long.
//
// ============================================================================

mod http_client;

pub use http_client::{HttpProcessorClient, ProcessorEndpoints};

use async_trait::async_trait;
use serde::Deserialize;

use crate::domain::{ProcessorKind, ProcessorPayment};

#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error("{processor} answered with status {status}")]
    Rejected { processor: ProcessorKind, status: u16 },

    #[error("{processor} did not answer in time")]
    Timeout { processor: ProcessorKind },

    #[error("{processor} request failed: {source}")]
    Transport {
        processor: ProcessorKind,
        #[source]
        source: reqwest::Error,
    },
}

/// Body of a processor's `GET /payments/service-health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub failing: bool,
    #[serde(default)]
    pub min_response_time: u64,
}

#[async_trait]
pub trait ProcessorClient: Send + Sync {
    async fn send(
        &self,
        processor: ProcessorKind,
        payment: &ProcessorPayment,
    ) -> Result<(), ProcessorError>;

    async fn probe_health(&self, processor: ProcessorKind) -> Result<HealthReport, ProcessorError>;

    /// Base URL of `processor`, for logs and decision snapshots.
    fn endpoint(&self, processor: ProcessorKind) -> String;
}
