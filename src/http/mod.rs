// ============================================================================
// HTTP Surface
// ============================================================================
//
// Public listener:
//   POST /payments           admit, 202 with empty body
//   GET  /payments-summary   merged summary over ?from&to
//   POST /purge-payments     reset queue, dead letters and ledger
//   GET  /health             liveness
//
// Internal listener (never exposed outside the deployment network):
//   GET  /internal/payments-summary   local-only summary, for the peer
//   POST /internal/purge-payments     local-only purge, for the peer
//   GET  /metrics                     Prometheus text format
//
// ============================================================================

mod handlers;

use actix_web::web;
use std::sync::Arc;

use crate::admission::AdmissionGate;
use crate::coordination::{keys, CoordinationError, CoordinationStore};
use crate::ledger::{Ledger, LedgerError};
use crate::metrics::Metrics;
use crate::settlement::DeadLetterQueue;
use crate::summary::SummaryService;

#[derive(Debug, thiserror::Error)]
pub enum PurgeError {
    #[error("Coordination store error: {0}")]
    Store(#[from] CoordinationError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

#[derive(Clone)]
pub struct AppState {
    pub admission: Arc<AdmissionGate>,
    pub summary: Arc<SummaryService>,
    pub store: Arc<dyn CoordinationStore>,
    pub ledger: Arc<dyn Ledger>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// Clear the queue, dead letters, every replica's holding lists and this
    /// replica's ledger.
    ///
    /// A payment a worker is sending at this moment is not interrupted: if the
    /// processor accepts it, it still lands in the ledger after the purge.
    pub async fn purge_local(&self) -> Result<(), PurgeError> {
        self.store.clear(keys::PAYMENTS_QUEUE).await?;
        DeadLetterQueue::new(self.store.clone()).clear().await?;
        let holdings = self.store.clear_prefix(keys::HOLDING_PREFIX).await?;
        self.ledger.purge().await?;
        tracing::info!(holding_lists = holdings, "Purged queue and ledger");
        Ok(())
    }
}

pub fn public_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/payments", web::post().to(handlers::create_payment))
        .route("/payments-summary", web::get().to(handlers::payments_summary))
        .route("/purge-payments", web::post().to(handlers::purge_payments))
        .route("/health", web::get().to(handlers::health));
}

pub fn internal_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/internal/payments-summary", web::get().to(handlers::internal_summary))
        .route("/internal/purge-payments", web::post().to(handlers::internal_purge))
        .route("/metrics", web::get().to(handlers::metrics))
        .route("/health", web::get().to(handlers::health));
}
